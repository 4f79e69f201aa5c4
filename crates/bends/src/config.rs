use std::collections::BTreeMap;
use std::env;

use url::Url;

use crate::Error;

#[derive(Debug, Clone)]
pub struct BitbucketAuth {
    pub user: String,
    pub app_password: String,
}

#[derive(Debug, Clone)]
pub struct DatadogKeys {
    pub api_key: String,
    pub app_key: String,
}

/// Dispatch tunables, passed explicitly into the runner rather than read
/// from module state.
#[derive(Debug, Clone, Default)]
pub struct DispatchSettings {
    /// Team-to-channel overrides. Teams without an entry post to
    /// `team-{team}-bots`.
    pub channels: BTreeMap<String, String>,
    /// Team receiving the cross-team summary, if any.
    pub summary_team: Option<String>,
}

impl DispatchSettings {
    pub fn channel_for(&self, team: &str) -> String {
        self.channels
            .get(team)
            .cloned()
            .unwrap_or_else(|| format!("team-{team}-bots"))
    }
}

/// Credentials and tunables resolved once at startup. The clients receive
/// these pre-resolved; nothing reads the environment after construction.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Bitbucket workspace holding the source repositories.
    pub workspace: String,
    pub bitbucket: BitbucketAuth,
    pub datadog: DatadogKeys,
    /// Absent only in dry-run mode, where nothing is delivered.
    pub slack_webhook: Option<Url>,
    pub dispatch: DispatchSettings,
}

fn required(name: &str) -> Result<String, Error> {
    env::var(name).map_err(|_| Error::Config(format!("{name} must be set")))
}

impl Settings {
    pub fn from_env(dry_run: bool) -> Result<Self, Error> {
        let slack_webhook = match env::var("SLACK_WEBHOOK_URL") {
            Ok(raw) => Some(Url::parse(&raw).map_err(|err| {
                Error::Config(format!("SLACK_WEBHOOK_URL is not a valid URL: {err}"))
            })?),
            Err(_) if dry_run => None,
            Err(_) => return Err(Error::Config("SLACK_WEBHOOK_URL must be set".to_string())),
        };
        let channels = match env::var("BENDS_CHANNELS") {
            Ok(raw) => serde_json::from_str(&raw).map_err(|err| {
                Error::Config(format!(
                    "BENDS_CHANNELS is not a JSON object of team to channel: {err}"
                ))
            })?,
            Err(_) => BTreeMap::new(),
        };

        Ok(Self {
            workspace: required("BENDS_WORKSPACE")?,
            bitbucket: BitbucketAuth {
                user: required("BB_USER_ID")?,
                app_password: required("BB_APP_PASS")?,
            },
            datadog: DatadogKeys {
                api_key: required("DD_API_KEY")?,
                app_key: required("DD_APP_KEY")?,
            },
            slack_webhook,
            dispatch: DispatchSettings {
                channels,
                summary_team: env::var("BENDS_SUMMARY_TEAM").ok(),
            },
        })
    }
}
