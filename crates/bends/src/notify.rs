use anyhow::Context;
use serde_json::{json, Value};

/// Slack truncates oversized payloads, so messages are delivered in chunks
/// of at most this many blocks.
pub const MAX_BLOCKS_PER_MESSAGE: usize = 10;

/// One-way message delivery to a team channel. A delivery failure is the
/// caller's to log and count; it never aborts the dispatch loop.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn post(&self, channel: &str, blocks: &[Value]) -> anyhow::Result<()>;
}

/// Delivery through a Slack incoming webhook.
pub struct SlackNotifier {
    http: reqwest::Client,
    webhook: url::Url,
}

const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

impl SlackNotifier {
    pub fn new(webhook: url::Url) -> anyhow::Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()?,
            webhook,
        })
    }
}

#[async_trait::async_trait]
impl Notifier for SlackNotifier {
    async fn post(&self, channel: &str, blocks: &[Value]) -> anyhow::Result<()> {
        for payload in payloads(channel, blocks) {
            let resp = self
                .http
                .post(self.webhook.clone())
                .json(&payload)
                .send()
                .await
                .context("posting to Slack")?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                anyhow::bail!("Slack returned {status}: {body}");
            }
        }
        Ok(())
    }
}

fn payloads(channel: &str, blocks: &[Value]) -> Vec<Value> {
    blocks
        .chunks(MAX_BLOCKS_PER_MESSAGE)
        .map(|chunk| json!({"channel": channel, "blocks": chunk}))
        .collect()
}

/// Stand-in used when no webhook is configured, which only happens in dry
/// runs. Reaching `post` through it is a bug.
pub struct DisabledNotifier;

#[async_trait::async_trait]
impl Notifier for DisabledNotifier {
    async fn post(&self, _channel: &str, _blocks: &[Value]) -> anyhow::Result<()> {
        anyhow::bail!("no Slack webhook is configured")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn oversized_messages_are_chunked() {
        let blocks: Vec<Value> = (0..25).map(|i| json!({"type": "divider", "n": i})).collect();
        let payloads = payloads("team-bits-bots", &blocks);

        assert_eq!(payloads.len(), 3);
        assert_eq!(payloads[0]["blocks"].as_array().unwrap().len(), 10);
        assert_eq!(payloads[2]["blocks"].as_array().unwrap().len(), 5);
        assert_eq!(payloads[1]["channel"], "team-bits-bots");
    }

    #[test]
    fn a_small_message_is_one_payload() {
        let blocks = vec![json!({"type": "divider"})];
        assert_eq!(payloads("team-bits-bots", &blocks).len(), 1);
    }
}
