//! Slack channel — posts to an incoming webhook.

use async_trait::async_trait;
use secrecy::ExposeSecret;

use crate::channels::{ChannelKind, Notifier, check_status, format, http_error};
use crate::config::{Mode, SlackConfig};
use crate::error::NotifyError;
use crate::pipeline::types::ApplicationEvent;

/// Slack incoming-webhook notifier. Holds both webhooks and picks one per send.
pub struct SlackNotifier {
    config: SlackConfig,
    client: reqwest::Client,
}

impl SlackNotifier {
    pub fn new(config: SlackConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Slack
    }

    async fn send(&self, event: &ApplicationEvent, mode: Mode) -> Result<(), NotifyError> {
        let webhook = self
            .config
            .webhook_url(mode)
            .map_err(|source| NotifyError::Config {
                channel: self.kind().name().into(),
                source,
            })?;

        let text = format::slack_text(event, mode, &self.config.mention_user_ids);
        post_webhook(&self.client, webhook.expose_secret(), &text).await?;

        tracing::info!(%mode, source = %event.source, "Slack notification sent");
        Ok(())
    }
}

/// POST `{"text": ...}` to a Slack webhook.
pub(crate) async fn post_webhook(
    client: &reqwest::Client,
    url: &str,
    text: &str,
) -> Result<(), NotifyError> {
    let resp = client
        .post(url)
        .json(&serde_json::json!({ "text": text }))
        .send()
        .await
        .map_err(|e| http_error(ChannelKind::Slack, e))?;
    check_status(ChannelKind::Slack, resp).await
}
