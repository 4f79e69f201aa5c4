use std::collections::BTreeSet;
use std::path::Path;

use crate::catalog::Service;
use crate::Error;

/// A compiled service-name pattern. The filter engine only needs `matches`,
/// so an alternative pattern syntax can be swapped in behind this trait.
pub trait NameMatcher {
    fn matches(&self, name: &str) -> bool;
}

/// Case-sensitive glob covering the full service name: `*` matches any run
/// of characters, every other character matches itself.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    raw: String,
    regex: regex::Regex,
}

impl GlobPattern {
    pub fn new(pattern: &str) -> Result<Self, Error> {
        let expr = format!(
            "^{}$",
            pattern
                .split('*')
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(".*")
        );
        let regex = regex::Regex::new(&expr)
            .map_err(|err| Error::Config(format!("invalid override pattern {pattern:?}: {err}")))?;
        Ok(Self {
            raw: pattern.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl NameMatcher for GlobPattern {
    fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }
}

/// Per-invocation selection criteria, built once from CLI or event input.
#[derive(Debug, Default)]
pub struct FilterCriteria {
    /// Services whose name matches any of these are excluded.
    pub overrides: Vec<GlobPattern>,
    /// If present, only services owned by these teams pass.
    pub teams: Option<BTreeSet<String>>,
    /// If present, exactly these services pass, bypassing every other rule.
    pub services: Option<BTreeSet<String>>,
}

impl FilterCriteria {
    pub fn new(
        overrides: &[String],
        teams: &[String],
        services: Option<BTreeSet<String>>,
    ) -> Result<Self, Error> {
        let overrides = overrides
            .iter()
            .map(|pattern| GlobPattern::new(pattern))
            .collect::<Result<Vec<_>, _>>()?;
        let teams = if teams.is_empty() {
            None
        } else {
            Some(teams.iter().cloned().collect())
        };
        Ok(Self {
            overrides,
            teams,
            services,
        })
    }
}

/// Reads an explicit service allow-list: a JSON array of service names.
pub fn load_allowlist(path: &Path) -> Result<BTreeSet<String>, Error> {
    let raw = std::fs::read_to_string(path)
        .map_err(|err| Error::Config(format!("reading allow-list {}: {err}", path.display())))?;
    let names: Vec<String> = serde_json::from_str(&raw)
        .map_err(|err| Error::Config(format!("parsing allow-list {}: {err}", path.display())))?;
    Ok(names.into_iter().collect())
}

/// Selects the services in scope for evaluation, preserving catalog order.
///
/// Decision order, first matching rule wins:
/// 1. A non-empty explicit allow-list admits exactly its members and bypasses
///    every other rule, including the active gate. Escape hatch for manual
///    and debugging runs.
/// 2. Services the catalog no longer flags as active are excluded. Note the
///    direction: `active` is the catalog's "this service is still a going
///    concern" flag, not a repository-traffic signal; inactive services are
///    out of scope even if their schedules still fire.
/// 3. Services whose name matches an override pattern are excluded.
/// 4. A non-empty team allow-list admits only services of those teams.
///
/// The catalog guarantees unique names; duplicates are its contract breach
/// and are not handled here.
pub fn select(services: &[Service], criteria: &FilterCriteria) -> Vec<Service> {
    services
        .iter()
        .filter(|service| {
            if let Some(allow) = &criteria.services {
                let keep = allow.contains(&service.name);
                if !keep {
                    tracing::debug!(service = %service.name, "not in the explicit allow-list; skipping");
                }
                return keep;
            }
            if !service.active {
                tracing::debug!(service = %service.name, "service is not active in the catalog; skipping");
                return false;
            }
            if let Some(pattern) = criteria
                .overrides
                .iter()
                .find(|pattern| pattern.matches(&service.name))
            {
                tracing::info!(service = %service.name, pattern = %pattern.as_str(), "service overridden; skipping");
                return false;
            }
            if let Some(teams) = &criteria.teams {
                if !teams.contains(&service.team) {
                    tracing::debug!(service = %service.name, team = %service.team, "team not selected; skipping");
                    return false;
                }
            }
            true
        })
        .cloned()
        .collect()
}
