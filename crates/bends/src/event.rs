use serde::Deserialize;

use crate::run::{RunOptions, RunReport};
use crate::{build_runner, config, filter};

/// Payload delivered by the scheduled trigger. Scheduled invocations always
/// evaluate the full catalog; there is no team or override selection.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct TriggerEvent {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub verbose: bool,
}

/// Entry point for scheduled invocations. The hosting environment owns
/// logging setup and the overall deadline; the report is the invocation's
/// return value, surfaced for external monitoring.
pub async fn handle_event(event: TriggerEvent) -> anyhow::Result<RunReport> {
    let settings = config::Settings::from_env(event.dry_run)?;
    let runner = build_runner(&settings)?;
    let options = RunOptions {
        dry_run: event.dry_run,
        verbose: event.verbose,
    };
    Ok(runner.run(&filter::FilterCriteria::default(), options).await?)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn event_fields_default_to_false() {
        let event: TriggerEvent = serde_json::from_str("{}").unwrap();
        assert!(!event.dry_run && !event.verbose);

        let event: TriggerEvent =
            serde_json::from_str(r#"{"dry_run": true, "verbose": true}"#).unwrap();
        assert!(event.dry_run && event.verbose);
    }
}
