use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::config::DatadogKeys;

const DATADOG_API: &str = "https://api.datadoghq.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A service as registered in the catalog. Read-only for the duration of a
/// run; names are unique within a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub team: String,
    pub repo_slug: String,
    pub repo_url: String,
    /// Whether the catalog still flags the service as active. Inactive
    /// (deprecated, retired) services are out of scope for evaluation.
    pub active: bool,
}

/// Source of the service catalog snapshot. Returns the complete snapshot or
/// fails, never a silent partial list.
#[async_trait::async_trait]
pub trait CatalogClient: Send + Sync {
    async fn fetch_services(&self) -> anyhow::Result<Vec<Service>>;
}

/// Catalog backed by the Datadog service-definitions API (schema v2.1).
pub struct DatadogCatalog {
    http: reqwest::Client,
    endpoint: url::Url,
    api_key: String,
    app_key: String,
}

impl DatadogCatalog {
    pub fn new(keys: &DatadogKeys) -> anyhow::Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()?,
            endpoint: url::Url::parse(DATADOG_API)?,
            api_key: keys.api_key.clone(),
            app_key: keys.app_key.clone(),
        })
    }
}

#[async_trait::async_trait]
impl CatalogClient for DatadogCatalog {
    async fn fetch_services(&self) -> anyhow::Result<Vec<Service>> {
        let url = self.endpoint.join("/api/v2/services/definitions")?;
        let mut services = Vec::new();

        for page in 0u32.. {
            let page_number = page.to_string();
            let resp = self
                .http
                .get(url.clone())
                .query(&[
                    ("schema_version", "v2.1"),
                    ("page[number]", page_number.as_str()),
                ])
                .header("DD-API-KEY", &self.api_key)
                .header("DD-APPLICATION-KEY", &self.app_key)
                .send()
                .await
                .context("requesting service definitions")?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                anyhow::bail!("{status}: {body}");
            }
            let body: DefinitionPage = resp
                .json()
                .await
                .context("decoding service definitions page")?;

            if body.data.is_empty() {
                break;
            }
            services.extend(body.data.into_iter().filter_map(Definition::into_service));
        }

        tracing::debug!(services = services.len(), "fetched service definitions");
        Ok(services)
    }
}

#[derive(Debug, Deserialize)]
struct DefinitionPage {
    #[serde(default)]
    data: Vec<Definition>,
}

#[derive(Debug, Deserialize)]
struct Definition {
    attributes: Attributes,
}

#[derive(Debug, Deserialize)]
struct Attributes {
    schema: SchemaV2,
}

#[derive(Debug, Deserialize)]
struct SchemaV2 {
    #[serde(rename = "dd-service")]
    dd_service: String,
    #[serde(default)]
    team: String,
    #[serde(default)]
    lifecycle: Option<String>,
    #[serde(default)]
    links: Vec<SchemaLink>,
}

#[derive(Debug, Deserialize)]
struct SchemaLink {
    url: String,
}

impl Definition {
    /// The source repository is the last link of the definition. Definitions
    /// with no usable repository link, or whose link points at the workspace
    /// rather than a repository, are skipped.
    fn into_service(self) -> Option<Service> {
        let schema = self.attributes.schema;

        let Some(link) = schema.links.last() else {
            tracing::warn!(service = %schema.dd_service, "service definition has no repository link; skipping");
            return None;
        };
        let Some(slug) = repo_slug(&link.url) else {
            tracing::warn!(service = %schema.dd_service, url = %link.url, "could not derive a repository slug; skipping");
            return None;
        };
        if slug == "workspace" {
            return None;
        }

        let active = !matches!(
            schema.lifecycle.as_deref(),
            Some("deprecated") | Some("retired") | Some("decommissioned")
        );
        Some(Service {
            name: schema.dd_service,
            team: schema.team,
            repo_slug: slug,
            repo_url: link.url.clone(),
            active,
        })
    }
}

// Repository slug of a link like https://bitbucket.org/{workspace}/{slug}.
fn repo_slug(link: &str) -> Option<String> {
    let url = url::Url::parse(link).ok()?;
    let mut segments = url.path_segments()?;
    let _workspace = segments.next()?;
    segments.next().map(str::to_owned)
}
