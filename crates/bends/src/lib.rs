use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

pub mod catalog;
pub mod classify;
pub mod config;
pub mod event;
pub mod filter;
pub mod group;
pub mod message;
pub mod notify;
pub mod pipelines;
pub mod run;

pub use event::{handle_event, TriggerEvent};
pub use run::{RunOptions, RunReport, Runner};

/// Fatal failures which abort an invocation. Per-service lookup failures and
/// per-team delivery failures never surface here: they degrade the affected
/// service or team and are counted in the [`RunReport`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to fetch the service catalog")]
    CatalogUnavailable(#[source] anyhow::Error),
    #[error("configuration error: {0}")]
    Config(String),
}

/// Notify owning teams in Slack when the latest scheduled pipeline run of a
/// service's repository failed or went missing.
#[derive(Debug, Parser)]
#[clap(version)]
pub struct Cli {
    /// Teams to process services for. All teams by default.
    #[clap(long, short = 't', value_name = "TEAM", num_args(1..))]
    pub teams: Vec<String>,
    /// Glob patterns of service names to ignore. `*` matches any run of
    /// characters; patterns cover the full name.
    #[clap(long = "override", short = 'o', value_name = "GLOB", num_args(1..))]
    pub overrides: Vec<String>,
    /// Path of a JSON file holding an explicit service allow-list (an array
    /// of service names). Listed services are evaluated regardless of their
    /// catalog active flag or override patterns.
    #[clap(long, short = 'D', value_name = "PATH")]
    pub data: Option<PathBuf>,
    /// Run all the logic but only log intended notifications, posting
    /// nothing to Slack.
    #[clap(long, short = 'd')]
    pub dry_run: bool,
    /// Log per-service detail during filtering and classification.
    #[clap(long, short = 'v')]
    pub verbose: bool,
}

impl Cli {
    pub async fn run(&self) -> anyhow::Result<RunReport> {
        let settings = config::Settings::from_env(self.dry_run)?;
        let allowlist = self.data.as_deref().map(filter::load_allowlist).transpose()?;
        let criteria = filter::FilterCriteria::new(&self.overrides, &self.teams, allowlist)?;

        let runner = build_runner(&settings)?;
        let options = RunOptions {
            dry_run: self.dry_run,
            verbose: self.verbose,
        };
        Ok(runner.run(&criteria, options).await?)
    }
}

/// Wires the production clients into a [`Runner`].
pub(crate) fn build_runner(settings: &config::Settings) -> anyhow::Result<Runner> {
    let notifier: Arc<dyn notify::Notifier> = match &settings.slack_webhook {
        Some(webhook) => Arc::new(notify::SlackNotifier::new(webhook.clone())?),
        None => Arc::new(notify::DisabledNotifier),
    };
    Ok(Runner {
        catalog: Arc::new(catalog::DatadogCatalog::new(&settings.datadog)?),
        pipelines: Arc::new(pipelines::BitbucketPipelines::new(
            &settings.bitbucket,
            &settings.workspace,
        )?),
        notifier,
        dispatch: settings.dispatch.clone(),
    })
}
