//! Operator alerts — posts failures to a dedicated Slack webhook.
//!
//! Alerting must never fail the caller, so every error here is logged and
//! swallowed.

use secrecy::{ExposeSecret, SecretString};
use tracing::{error, warn};

use crate::channels::{format, slack::post_webhook};

pub struct ErrorAlerter {
    webhook_url: Option<SecretString>,
    client: reqwest::Client,
}

impl ErrorAlerter {
    pub fn new(webhook_url: Option<SecretString>, client: reqwest::Client) -> Self {
        Self {
            webhook_url,
            client,
        }
    }

    /// An alerter that only logs.
    pub fn disabled() -> Self {
        Self::new(None, reqwest::Client::new())
    }

    pub fn is_enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    /// Report `detail` to the alert webhook, if one is configured.
    pub async fn alert(&self, detail: &str) {
        let Some(url) = &self.webhook_url else {
            warn!("SLACK_ERROR_WEBHOOK_URL is not set; alert not delivered: {detail}");
            return;
        };

        if let Err(e) = post_webhook(&self.client, url.expose_secret(), &format::alert_text(detail)).await {
            error!("Failed to deliver error alert: {e}");
        }
    }
}
