use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::config::BitbucketAuth;

const BITBUCKET_API: &str = "https://api.bitbucket.org";
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Scheduled runs older than this are treated as if no run exists: the
/// schedule has evidently stopped firing, which is NoData rather than Ok.
pub const RECENCY_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    InProgress,
    Unknown,
}

/// The most recent scheduled pipeline execution of a repository.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineRun {
    pub repo_slug: String,
    pub created_on: Option<DateTime<Utc>>,
    pub outcome: Outcome,
}

/// Source of per-repository pipeline state. Errors are per-call: the caller
/// downgrades the affected service rather than aborting the run.
#[async_trait::async_trait]
pub trait PipelineClient: Send + Sync {
    /// The most recent scheduled run against the repository's default branch
    /// within the recency window, or None if there is none.
    async fn latest_scheduled_run(&self, repo_slug: &str) -> anyhow::Result<Option<PipelineRun>>;
}

/// Pipeline state backed by the Bitbucket API v2.
pub struct BitbucketPipelines {
    http: reqwest::Client,
    base: url::Url,
    workspace: String,
    user: String,
    app_password: String,
}

impl BitbucketPipelines {
    pub fn new(auth: &BitbucketAuth, workspace: &str) -> anyhow::Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()?,
            base: url::Url::parse(BITBUCKET_API)?,
            workspace: workspace.to_string(),
            user: auth.user.clone(),
            app_password: auth.app_password.clone(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> anyhow::Result<T> {
        let url = self.base.join(path)?;
        let resp = self
            .http
            .get(url)
            .basic_auth(&self.user, Some(&self.app_password))
            .header("Accept", "application/json")
            .query(query)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("{status}: {body}");
        }
        resp.json().await.context("decoding Bitbucket response")
    }

    async fn default_branch(&self, repo_slug: &str) -> anyhow::Result<Option<String>> {
        let page: BranchPage = self
            .get_json(
                &format!(
                    "/2.0/repositories/{}/{}/refs/branches",
                    self.workspace, repo_slug
                ),
                &[("q", r#"name="main" OR name="master""#)],
            )
            .await
            .with_context(|| format!("fetching the default branch of {repo_slug}"))?;
        Ok(page.values.into_iter().next().map(|branch| branch.name))
    }
}

#[async_trait::async_trait]
impl PipelineClient for BitbucketPipelines {
    async fn latest_scheduled_run(&self, repo_slug: &str) -> anyhow::Result<Option<PipelineRun>> {
        let Some(branch) = self.default_branch(repo_slug).await? else {
            tracing::warn!(repo_slug, "repository has no main or master branch");
            return Ok(None);
        };

        let page: PipelinePage = self
            .get_json(
                &format!("/2.0/repositories/{}/{}/pipelines", self.workspace, repo_slug),
                &[("sort", "-created_on")],
            )
            .await
            .with_context(|| format!("fetching pipelines of {repo_slug}"))?;

        let horizon = Utc::now() - Duration::days(RECENCY_WINDOW_DAYS);
        Ok(latest_scheduled(page.values, &branch, horizon).map(|pipeline| PipelineRun {
            repo_slug: repo_slug.to_string(),
            created_on: Some(pipeline.created_on),
            outcome: pipeline.state.outcome(),
        }))
    }
}

// Pipelines arrive newest-first, so the scan stops at the first one older
// than the horizon.
fn latest_scheduled(
    pipelines: Vec<Pipeline>,
    branch: &str,
    horizon: DateTime<Utc>,
) -> Option<Pipeline> {
    for pipeline in pipelines {
        if pipeline.created_on < horizon {
            break;
        }
        if pipeline.trigger.name != "SCHEDULE" {
            continue;
        }
        if pipeline
            .target
            .selector
            .as_ref()
            .map(|selector| selector.pattern.as_str())
            != Some(branch)
        {
            continue;
        }
        return Some(pipeline);
    }
    None
}

#[derive(Debug, Deserialize)]
struct BranchPage {
    #[serde(default)]
    values: Vec<Branch>,
}

#[derive(Debug, Deserialize)]
struct Branch {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PipelinePage {
    #[serde(default)]
    values: Vec<Pipeline>,
}

#[derive(Debug, Deserialize)]
struct Pipeline {
    created_on: DateTime<Utc>,
    trigger: Trigger,
    #[serde(default)]
    target: Target,
    state: State,
}

#[derive(Debug, Deserialize)]
struct Trigger {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct Target {
    selector: Option<Selector>,
}

#[derive(Debug, Deserialize)]
struct Selector {
    #[serde(default)]
    pattern: String,
}

#[derive(Debug, Deserialize)]
struct State {
    name: String,
    result: Option<StateResult>,
}

#[derive(Debug, Deserialize)]
struct StateResult {
    name: String,
}

impl State {
    fn outcome(&self) -> Outcome {
        match self.result.as_ref().map(|result| result.name.as_str()) {
            Some("SUCCESSFUL") => Outcome::Success,
            Some("FAILED") | Some("ERROR") => Outcome::Failure,
            None if matches!(self.name.as_str(), "IN_PROGRESS" | "PENDING") => Outcome::InProgress,
            _ => Outcome::Unknown,
        }
    }
}
