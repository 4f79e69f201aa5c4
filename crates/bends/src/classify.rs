use serde::Serialize;

use crate::pipelines::{Outcome, PipelineRun};

/// The notification-relevant reading of a service's latest scheduled run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// The latest scheduled run succeeded, or is still in flight.
    Ok,
    /// The latest scheduled run failed.
    NeedsAttention,
    /// No recent scheduled run exists, or its state could not be read.
    NoData,
}

/// Maps the latest scheduled run, or its absence, to a verdict.
///
/// In-flight runs are not failures: they are picked up again by the next
/// scheduled invocation, never retried within this one. There is no further
/// time-based staleness check; staleness is bounded by the invocation
/// schedule itself.
pub fn classify(run: Option<&PipelineRun>) -> Verdict {
    match run {
        None => Verdict::NoData,
        Some(run) => match run.outcome {
            Outcome::Success | Outcome::InProgress => Verdict::Ok,
            Outcome::Failure => Verdict::NeedsAttention,
            Outcome::Unknown => Verdict::NoData,
        },
    }
}
