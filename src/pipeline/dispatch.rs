//! Fan an application event out to every configured channel.
//!
//! Channels are attempted in order and independently: a failure on one is
//! logged (and alerted) but never stops the next.

use std::sync::Arc;

use tracing::{error, warn};

use crate::channels::{ErrorAlerter, NotificationResult, Notifier};
use crate::config::Mode;
use crate::pipeline::types::ApplicationEvent;

pub struct Dispatcher {
    notifiers: Vec<Arc<dyn Notifier>>,
    alerter: Arc<ErrorAlerter>,
}

impl Dispatcher {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>, alerter: Arc<ErrorAlerter>) -> Self {
        Self { notifiers, alerter }
    }

    /// Send `event` on every channel, one result per channel.
    pub async fn notify(&self, event: &ApplicationEvent, mode: Mode) -> Vec<NotificationResult> {
        let mut results = Vec::with_capacity(self.notifiers.len());

        for notifier in &self.notifiers {
            let channel = notifier.kind();
            let result = match notifier.send(event, mode).await {
                Ok(()) => NotificationResult::sent(channel),
                Err(e) if e.is_config() => {
                    warn!(%channel, "Channel skipped: {e}");
                    NotificationResult::failed(channel, &e)
                }
                Err(e) => {
                    error!(%channel, "Notification failed: {e}");
                    self.alerter
                        .alert(&format!("{channel} notify failed: {e}"))
                        .await;
                    NotificationResult::failed(channel, &e)
                }
            };
            results.push(result);
        }

        results
    }
}
