use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::catalog::{CatalogClient, Service};
use crate::classify::{self, Verdict};
use crate::config::DispatchSettings;
use crate::filter::{self, FilterCriteria};
use crate::group;
use crate::message;
use crate::notify::Notifier;
use crate::pipelines::{PipelineClient, PipelineRun};
use crate::Error;

/// Number of pipeline lookups in flight at once.
pub const FETCH_CONCURRENCY: usize = 10;

/// Ceiling for a single pipeline lookup. A slower lookup degrades its
/// service to NoData instead of stalling the invocation.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Perform all the logic but only log intended notifications.
    pub dry_run: bool,
    /// Log per-service detail during filtering and classification. Never
    /// changes a verdict or a dispatch decision.
    pub verbose: bool,
}

/// Counts reported by every invocation: the CLI prints it, the scheduled
/// trigger returns it for external monitoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub services_total: usize,
    pub services_selected: usize,
    pub ok: usize,
    pub needs_attention: usize,
    pub no_data: usize,
    /// Services degraded to NoData because their pipeline lookup failed or
    /// timed out.
    pub fetch_failures: usize,
    /// Bundles produced; in a dry run these are the bundles that would have
    /// been dispatched.
    pub bundles: usize,
    pub dispatched: usize,
    pub delivery_failures: usize,
    pub dry_run: bool,
}

/// Sequences one invocation: catalog → filter → pipeline lookups → classify
/// → group → dispatch. The clients are injected so tests substitute fakes.
pub struct Runner {
    pub catalog: Arc<dyn CatalogClient>,
    pub pipelines: Arc<dyn PipelineClient>,
    pub notifier: Arc<dyn Notifier>,
    pub dispatch: DispatchSettings,
}

impl Runner {
    pub async fn run(
        &self,
        criteria: &FilterCriteria,
        options: RunOptions,
    ) -> Result<RunReport, Error> {
        // No partial catalog is acceptable: a fetch error is fatal.
        let services = self
            .catalog
            .fetch_services()
            .await
            .map_err(Error::CatalogUnavailable)?;
        tracing::info!(services = services.len(), "fetched service catalog");

        let selected = filter::select(&services, criteria);
        let mut report = RunReport {
            services_total: services.len(),
            services_selected: selected.len(),
            dry_run: options.dry_run,
            ..Default::default()
        };

        // Fan out the pipeline lookups, then join results back by repository
        // so classification sees catalog order at any concurrency degree.
        let fetches = selected.iter().map(|service| {
            let pipelines = self.pipelines.clone();
            let slug = service.repo_slug.clone();
            async move {
                let result =
                    match tokio::time::timeout(FETCH_TIMEOUT, pipelines.latest_scheduled_run(&slug))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(anyhow::anyhow!(
                            "pipeline lookup timed out after {FETCH_TIMEOUT:?}"
                        )),
                    };
                (slug, result)
            }
        });
        let by_repo: HashMap<String, anyhow::Result<Option<PipelineRun>>> = stream::iter(fetches)
            .buffer_unordered(FETCH_CONCURRENCY)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect();

        let mut classified: Vec<(Service, Verdict)> = Vec::with_capacity(selected.len());
        for service in selected {
            let verdict = match by_repo.get(&service.repo_slug) {
                Some(Ok(run)) => classify::classify(run.as_ref()),
                Some(Err(err)) => {
                    tracing::warn!(service = %service.name, error = ?err, "pipeline lookup failed; treating as no data");
                    report.fetch_failures += 1;
                    Verdict::NoData
                }
                // Every selected service was fetched; an absent entry means a
                // repository slug collision in the catalog.
                None => Verdict::NoData,
            };
            if options.verbose {
                tracing::debug!(service = %service.name, team = %service.team, ?verdict, "classified");
            }
            match verdict {
                Verdict::Ok => report.ok += 1,
                Verdict::NeedsAttention => report.needs_attention += 1,
                Verdict::NoData => report.no_data += 1,
            }
            classified.push((service, verdict));
        }

        let bundles = group::group(&classified);
        report.bundles = bundles.len();

        for bundle in &bundles {
            let channel = self.dispatch.channel_for(&bundle.team);
            let ok = classified
                .iter()
                .filter(|(service, verdict)| {
                    service.team == bundle.team && *verdict == Verdict::Ok
                })
                .count();
            let blocks = message::team_summary(bundle, ok);

            if options.dry_run {
                tracing::info!(
                    team = %bundle.team,
                    channel = %channel,
                    entries = bundle.entries.len(),
                    "dry run: would dispatch"
                );
                continue;
            }
            match self.notifier.post(&channel, &blocks).await {
                Ok(()) => report.dispatched += 1,
                Err(err) => {
                    tracing::error!(team = %bundle.team, error = ?err, "failed to deliver notification");
                    report.delivery_failures += 1;
                }
            }
        }

        if let Some(team) = &self.dispatch.summary_team {
            if options.dry_run {
                tracing::info!(team = %team, "dry run: would dispatch the overall summary");
            } else {
                let blocks = message::overall_summary(&classified);
                if let Err(err) = self.notifier.post(&self.dispatch.channel_for(team), &blocks).await
                {
                    tracing::error!(team = %team, error = ?err, "failed to deliver the overall summary");
                    report.delivery_failures += 1;
                }
            }
        }

        tracing::info!(
            selected = report.services_selected,
            needs_attention = report.needs_attention,
            no_data = report.no_data,
            fetch_failures = report.fetch_failures,
            bundles = report.bundles,
            dispatched = report.dispatched,
            "run complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pipelines::Outcome;
    use std::collections::{BTreeSet, HashSet};
    use std::sync::Mutex;

    struct FixedCatalog {
        services: Vec<Service>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl CatalogClient for FixedCatalog {
        async fn fetch_services(&self) -> anyhow::Result<Vec<Service>> {
            if self.fail {
                anyhow::bail!("503 from the catalog");
            }
            Ok(self.services.clone())
        }
    }

    #[derive(Default)]
    struct FakePipelines {
        runs: HashMap<String, PipelineRun>,
        errors: HashSet<String>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl PipelineClient for FakePipelines {
        async fn latest_scheduled_run(
            &self,
            repo_slug: &str,
        ) -> anyhow::Result<Option<PipelineRun>> {
            self.calls.lock().unwrap().push(repo_slug.to_string());
            if self.errors.contains(repo_slug) {
                anyhow::bail!("repository lookup failed");
            }
            Ok(self.runs.get(repo_slug).cloned())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        posts: Mutex<Vec<(String, Vec<serde_json::Value>)>>,
        fail_channels: HashSet<String>,
    }

    #[async_trait::async_trait]
    impl Notifier for RecordingNotifier {
        async fn post(&self, channel: &str, blocks: &[serde_json::Value]) -> anyhow::Result<()> {
            if self.fail_channels.contains(channel) {
                anyhow::bail!("Slack returned 500");
            }
            self.posts
                .lock()
                .unwrap()
                .push((channel.to_string(), blocks.to_vec()));
            Ok(())
        }
    }

    fn svc(name: &str, team: &str, repo: &str, active: bool) -> Service {
        Service {
            name: name.to_string(),
            team: team.to_string(),
            repo_slug: repo.to_string(),
            repo_url: format!("https://bitbucket.org/acme/{repo}"),
            active,
        }
    }

    fn run_with(repo: &str, outcome: Outcome) -> (String, PipelineRun) {
        (
            repo.to_string(),
            PipelineRun {
                repo_slug: repo.to_string(),
                created_on: Some(chrono::Utc::now()),
                outcome,
            },
        )
    }

    fn runner(
        services: Vec<Service>,
        pipelines: FakePipelines,
    ) -> (Runner, Arc<FakePipelines>, Arc<RecordingNotifier>) {
        let pipelines = Arc::new(pipelines);
        let notifier = Arc::new(RecordingNotifier::default());
        let runner = Runner {
            catalog: Arc::new(FixedCatalog {
                services,
                fail: false,
            }),
            pipelines: pipelines.clone(),
            notifier: notifier.clone(),
            dispatch: DispatchSettings::default(),
        };
        (runner, pipelines, notifier)
    }

    #[tokio::test]
    async fn failed_pipeline_notifies_the_owning_team() {
        let (runner, _, notifier) = runner(
            vec![svc("svc-a", "bits", "r1", true)],
            FakePipelines {
                runs: HashMap::from([run_with("r1", Outcome::Failure)]),
                ..Default::default()
            },
        );

        let report = runner
            .run(&FilterCriteria::default(), RunOptions::default())
            .await
            .unwrap();

        assert_eq!(report.needs_attention, 1);
        assert_eq!(report.bundles, 1);
        assert_eq!(report.dispatched, 1);

        let posts = notifier.posts.lock().unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].0, "team-bits-bots");
        let rendered = serde_json::to_string(&posts[0].1).unwrap();
        assert!(rendered.contains("svc-a"));
    }

    #[tokio::test]
    async fn filtered_services_are_never_fetched() {
        let (runner, pipelines, notifier) = runner(
            vec![svc("svc-media-1", "media", "m1", false)],
            FakePipelines::default(),
        );
        let criteria =
            FilterCriteria::new(&["svc-media*".to_string()], &[], None).unwrap();

        let report = runner.run(&criteria, RunOptions::default()).await.unwrap();

        assert_eq!(report.services_selected, 0);
        assert_eq!(report.bundles, 0);
        assert!(pipelines.calls.lock().unwrap().is_empty());
        assert!(notifier.posts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn allowlisted_service_without_a_run_is_no_data() {
        let (runner, _, notifier) = runner(
            vec![svc("svc-z", "ops", "rz", true)],
            FakePipelines::default(),
        );
        let criteria = FilterCriteria::new(
            &[],
            &[],
            Some(BTreeSet::from(["svc-z".to_string()])),
        )
        .unwrap();

        let report = runner.run(&criteria, RunOptions::default()).await.unwrap();

        assert_eq!(report.no_data, 1);
        assert_eq!(report.bundles, 1);
        assert_eq!(notifier.posts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dry_run_dispatches_nothing_but_counts_bundles() {
        let (runner, _, notifier) = runner(
            vec![svc("svc-a", "bits", "r1", true)],
            FakePipelines {
                runs: HashMap::from([run_with("r1", Outcome::Failure)]),
                ..Default::default()
            },
        );

        let report = runner
            .run(
                &FilterCriteria::default(),
                RunOptions {
                    dry_run: true,
                    verbose: false,
                },
            )
            .await
            .unwrap();

        assert!(report.dry_run);
        assert_eq!(report.bundles, 1);
        assert_eq!(report.dispatched, 0);
        assert!(notifier.posts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn catalog_failure_is_fatal() {
        let runner = Runner {
            catalog: Arc::new(FixedCatalog {
                services: Vec::new(),
                fail: true,
            }),
            pipelines: Arc::new(FakePipelines::default()),
            notifier: Arc::new(RecordingNotifier::default()),
            dispatch: DispatchSettings::default(),
        };

        let err = runner
            .run(&FilterCriteria::default(), RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CatalogUnavailable(_)));
    }

    #[tokio::test]
    async fn lookup_failure_degrades_one_service_only() {
        let (runner, _, _) = runner(
            vec![
                svc("svc-a", "bits", "r1", true),
                svc("svc-b", "bits", "r2", true),
            ],
            FakePipelines {
                runs: HashMap::from([run_with("r2", Outcome::Success)]),
                errors: HashSet::from(["r1".to_string()]),
                ..Default::default()
            },
        );

        let report = runner
            .run(&FilterCriteria::default(), RunOptions::default())
            .await
            .unwrap();

        assert_eq!(report.fetch_failures, 1);
        assert_eq!(report.no_data, 1);
        assert_eq!(report.ok, 1);
        assert_eq!(report.bundles, 1);
    }

    #[tokio::test]
    async fn delivery_failure_leaves_other_teams_unaffected() {
        let pipelines = FakePipelines {
            runs: HashMap::from([
                run_with("r1", Outcome::Failure),
                run_with("r2", Outcome::Failure),
            ]),
            ..Default::default()
        };
        let notifier = Arc::new(RecordingNotifier {
            fail_channels: HashSet::from(["team-bits-bots".to_string()]),
            ..Default::default()
        });
        let runner = Runner {
            catalog: Arc::new(FixedCatalog {
                services: vec![
                    svc("svc-a", "bits", "r1", true),
                    svc("svc-b", "media", "r2", true),
                ],
                fail: false,
            }),
            pipelines: Arc::new(pipelines),
            notifier: notifier.clone(),
            dispatch: DispatchSettings::default(),
        };

        let report = runner
            .run(&FilterCriteria::default(), RunOptions::default())
            .await
            .unwrap();

        assert_eq!(report.bundles, 2);
        assert_eq!(report.dispatched, 1);
        assert_eq!(report.delivery_failures, 1);
        let posts = notifier.posts.lock().unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].0, "team-media-bots");
    }

    #[tokio::test]
    async fn summary_team_receives_the_overall_summary() {
        let pipelines = FakePipelines {
            runs: HashMap::from([run_with("r1", Outcome::Failure)]),
            ..Default::default()
        };
        let notifier = Arc::new(RecordingNotifier::default());
        let runner = Runner {
            catalog: Arc::new(FixedCatalog {
                services: vec![svc("svc-a", "bits", "r1", true)],
                fail: false,
            }),
            pipelines: Arc::new(pipelines),
            notifier: notifier.clone(),
            dispatch: DispatchSettings {
                channels: Default::default(),
                summary_team: Some("platform".to_string()),
            },
        };

        runner
            .run(&FilterCriteria::default(), RunOptions::default())
            .await
            .unwrap();

        let posts = notifier.posts.lock().unwrap();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[1].0, "team-platform-bots");
    }
}
