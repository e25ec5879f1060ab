//! Channel abstraction: the inbound mailbox and the outbound notifiers.

pub mod alert;
pub mod email;
pub mod email_types;
pub mod format;
pub mod line;
pub mod slack;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::Mode;
use crate::error::{MailError, NotifyError};
use crate::pipeline::types::ApplicationEvent;

pub use alert::ErrorAlerter;
pub use email::ImapMailbox;
pub use email_types::{MailMessage, MailUid};
pub use line::LineNotifier;
pub use slack::SlackNotifier;

/// Timeout applied to every outbound HTTP call.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the shared HTTP client.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("Falling back to default HTTP client: {e}");
            reqwest::Client::new()
        })
}

/// Source of unseen mail.
#[async_trait]
pub trait MailSource: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch every unseen message without changing its flags.
    async fn fetch_unseen(&self) -> Result<Vec<MailMessage>, MailError>;

    /// Flag the given messages as `\Seen`.
    async fn mark_seen(&self, uids: &[MailUid]) -> Result<(), MailError>;

    /// End of a poll cycle: release any connection held since `fetch_unseen`.
    async fn close(&self) {}
}

/// Outbound channel kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Slack,
    Line,
}

impl ChannelKind {
    pub fn name(self) -> &'static str {
        match self {
            ChannelKind::Slack => "slack",
            ChannelKind::Line => "line",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of one channel send. Used for logging only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationResult {
    pub channel: ChannelKind,
    pub success: bool,
    pub error_detail: Option<String>,
}

impl NotificationResult {
    pub fn sent(channel: ChannelKind) -> Self {
        Self {
            channel,
            success: true,
            error_detail: None,
        }
    }

    pub fn failed(channel: ChannelKind, error: &NotifyError) -> Self {
        Self {
            channel,
            success: false,
            error_detail: Some(error.to_string()),
        }
    }
}

/// A destination that application events are pushed to.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Render and deliver one event. Missing configuration for `mode`
    /// surfaces as `NotifyError::Config`.
    async fn send(&self, event: &ApplicationEvent, mode: Mode) -> Result<(), NotifyError>;
}

/// Turn a non-2xx response into `NotifyError::Status`.
pub(crate) async fn check_status(
    channel: ChannelKind,
    resp: reqwest::Response,
) -> Result<(), NotifyError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let body = resp.text().await.unwrap_or_default();
    Err(NotifyError::Status {
        channel: channel.name().into(),
        status: status.as_u16(),
        body,
    })
}

pub(crate) fn http_error(channel: ChannelKind, err: reqwest::Error) -> NotifyError {
    NotifyError::Http {
        channel: channel.name().into(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_constructors() {
        let ok = NotificationResult::sent(ChannelKind::Slack);
        assert!(ok.success);
        assert!(ok.error_detail.is_none());

        let err = NotifyError::Http {
            channel: "line".into(),
            reason: "timed out".into(),
        };
        let failed = NotificationResult::failed(ChannelKind::Line, &err);
        assert!(!failed.success);
        assert_eq!(failed.error_detail.as_deref(), Some("line request failed: timed out"));
    }

    #[test]
    fn channel_names() {
        assert_eq!(ChannelKind::Slack.to_string(), "slack");
        assert_eq!(ChannelKind::Line.to_string(), "line");
    }
}
