//! Poll loop — fetch unseen mail, classify, extract, notify, mark seen.
//!
//! Delivery is at-most-once: every fetched message is marked `\Seen` after
//! its notifications were attempted, whether or not they succeeded. The
//! mailbox flag is the only state the service keeps between cycles.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::channels::{ErrorAlerter, MailMessage, MailSource};
use crate::config::Mode;
use crate::error::MailError;
use crate::pipeline::dispatch::Dispatcher;
use crate::pipeline::extract::extract;
use crate::pipeline::rules::Classifier;
use crate::pipeline::types::CycleReport;

/// Drives one mailbox through the notification pipeline.
pub struct Processor {
    source: Arc<dyn MailSource>,
    classifier: Classifier,
    dispatcher: Dispatcher,
    alerter: Arc<ErrorAlerter>,
    mode: Mode,
}

impl Processor {
    pub fn new(
        source: Arc<dyn MailSource>,
        dispatcher: Dispatcher,
        alerter: Arc<ErrorAlerter>,
        mode: Mode,
    ) -> Self {
        Self {
            source,
            classifier: Classifier::default(),
            dispatcher,
            alerter,
            mode,
        }
    }

    /// Run a single poll cycle.
    ///
    /// Only a failure to fetch aborts the cycle; everything after that is
    /// per-message and logged. The mail source is closed once the cycle is
    /// done with it.
    pub async fn poll_once(&self) -> Result<CycleReport, MailError> {
        let messages = self.source.fetch_unseen().await?;
        let report = self.process_all(&messages).await;
        self.source.close().await;
        Ok(report)
    }

    async fn process_all(&self, messages: &[MailMessage]) -> CycleReport {
        let mut report = CycleReport {
            fetched: messages.len(),
            ..CycleReport::default()
        };

        if messages.is_empty() {
            debug!("No unseen messages");
            return report;
        }

        for message in messages {
            if self.process_message(message).await {
                report.notified += 1;
            } else {
                report.skipped += 1;
            }

            match self.source.mark_seen(&[message.uid]).await {
                Ok(()) => report.marked_seen += 1,
                Err(e) => {
                    error!(uid = message.uid, "Failed to mark message as seen: {e}");
                    self.alerter
                        .alert(&format!("Failed to mark uid {} as seen: {e}", message.uid))
                        .await;
                }
            }
        }

        info!(
            fetched = report.fetched,
            notified = report.notified,
            skipped = report.skipped,
            marked_seen = report.marked_seen,
            "Poll cycle complete"
        );
        report
    }

    /// Classify → extract → notify. Returns whether notifications were attempted.
    async fn process_message(&self, message: &MailMessage) -> bool {
        let source = self.classifier.classify(message);
        if !source.is_known() {
            info!(
                uid = message.uid,
                subject = %truncate(&message.subject, 50),
                "Skip non-target mail"
            );
            return false;
        }

        let event = extract(message, source);
        let missing = event.missing_fields();
        if !missing.is_empty() {
            warn!(
                uid = message.uid,
                %source,
                missing = ?missing,
                "Could not extract all fields, sending placeholders"
            );
        }

        info!(
            uid = message.uid,
            %source,
            name = event.applicant_name.as_deref().unwrap_or("-"),
            url = event.confirmation_url.as_deref().unwrap_or("-"),
            "Notify"
        );

        for result in self.dispatcher.notify(&event, self.mode).await {
            debug!(
                uid = message.uid,
                channel = %result.channel,
                success = result.success,
                error = result.error_detail.as_deref().unwrap_or(""),
                "Channel result"
            );
        }
        true
    }

    /// Run `poll_once`, reporting a failed fetch instead of returning it.
    pub async fn run_cycle(&self) -> Option<CycleReport> {
        match self.poll_once().await {
            Ok(report) => Some(report),
            Err(e) => {
                error!(source = self.source.name(), "Mail poll failed: {e}");
                self.alerter
                    .alert(&format!("Gmail polling error: {e}"))
                    .await;
                None
            }
        }
    }
}

/// Spawn the poll loop. The first cycle runs immediately, then one per
/// `interval`. Send `true` on the returned channel, or drop it, to stop the
/// loop; a running cycle is allowed to finish.
pub fn spawn_processor(
    processor: Arc<Processor>,
    interval: Duration,
) -> (JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        info!("Mail poller started, polling every {}s", interval.as_secs());

        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {}
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        info!("Shutdown sender dropped, mail poller stopping");
                        return;
                    }
                }
            }

            if *shutdown_rx.borrow() {
                info!("Mail poller shutting down");
                return;
            }

            processor.run_cycle().await;
        }
    });

    (handle, shutdown_tx)
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use wiremock::matchers::{body_string_contains, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::channels::{ChannelKind, Notifier};
    use crate::error::NotifyError;
    use crate::pipeline::types::{ApplicationEvent, Classification};

    #[derive(Default)]
    struct MemoryMailbox {
        inbox: Mutex<Vec<MailMessage>>,
        seen: Mutex<Vec<u32>>,
        closes: AtomicUsize,
        fail_fetch: bool,
    }

    #[async_trait]
    impl MailSource for MemoryMailbox {
        fn name(&self) -> &str {
            "memory"
        }

        async fn fetch_unseen(&self) -> Result<Vec<MailMessage>, MailError> {
            if self.fail_fetch {
                return Err(MailError::Connection {
                    host: "imap.test.com:993".into(),
                    reason: "connection refused".into(),
                });
            }
            let seen = self.seen.lock().unwrap().clone();
            Ok(self
                .inbox
                .lock()
                .unwrap()
                .iter()
                .filter(|m| !seen.contains(&m.uid))
                .cloned()
                .collect())
        }

        async fn mark_seen(&self, uids: &[u32]) -> Result<(), MailError> {
            self.seen.lock().unwrap().extend_from_slice(uids);
            Ok(())
        }

        async fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        events: Mutex<Vec<ApplicationEvent>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        fn kind(&self) -> ChannelKind {
            ChannelKind::Slack
        }

        async fn send(&self, event: &ApplicationEvent, _mode: Mode) -> Result<(), NotifyError> {
            self.events.lock().unwrap().push(event.clone());
            Err(NotifyError::Http {
                channel: "slack".into(),
                reason: "down".into(),
            })
        }
    }

    fn processor(mailbox: Arc<MemoryMailbox>, notifier: Arc<RecordingNotifier>) -> Processor {
        let alerter = Arc::new(ErrorAlerter::disabled());
        let notifiers: Vec<Arc<dyn Notifier>> = vec![notifier as Arc<dyn Notifier>];
        Processor::new(
            mailbox,
            Dispatcher::new(notifiers, Arc::clone(&alerter)),
            alerter,
            Mode::Prod,
        )
    }

    #[tokio::test]
    async fn unknown_mail_is_skipped_but_marked_seen() {
        let mailbox = Arc::new(MemoryMailbox::default());
        mailbox
            .inbox
            .lock()
            .unwrap()
            .push(MailMessage::plain(5, "Weekly newsletter", "hello"));
        let notifier = Arc::new(RecordingNotifier::default());

        let report = processor(Arc::clone(&mailbox), Arc::clone(&notifier))
            .poll_once()
            .await
            .unwrap();

        assert_eq!(
            report,
            CycleReport {
                fetched: 1,
                notified: 0,
                skipped: 1,
                marked_seen: 1
            }
        );
        assert!(notifier.events.lock().unwrap().is_empty());
        assert_eq!(*mailbox.seen.lock().unwrap(), vec![5]);
    }

    #[tokio::test]
    async fn failed_notification_still_marks_seen_and_is_not_retried() {
        let mailbox = Arc::new(MemoryMailbox::default());
        mailbox.inbox.lock().unwrap().push(MailMessage::plain(
            9,
            "新しい応募者のお知らせ",
            "山田太郎さんから応募がありました。",
        ));
        let notifier = Arc::new(RecordingNotifier::default());
        let processor = processor(Arc::clone(&mailbox), Arc::clone(&notifier));

        let first = processor.poll_once().await.unwrap();
        assert_eq!(first.notified, 1);
        assert_eq!(first.marked_seen, 1);

        let second = processor.poll_once().await.unwrap();
        assert_eq!(second, CycleReport::default());
        assert_eq!(notifier.events.lock().unwrap().len(), 1);

        let event = &notifier.events.lock().unwrap()[0];
        assert_eq!(event.source, Classification::Indeed);
        assert_eq!(event.applicant_name.as_deref(), Some("山田太郎"));
    }

    #[tokio::test]
    async fn fetch_failure_aborts_cycle() {
        let mailbox = Arc::new(MemoryMailbox {
            fail_fetch: true,
            ..MemoryMailbox::default()
        });
        let processor = processor(mailbox, Arc::new(RecordingNotifier::default()));
        assert!(matches!(
            processor.poll_once().await,
            Err(MailError::Connection { .. })
        ));
        assert!(processor.run_cycle().await.is_none());
    }

    #[tokio::test]
    async fn spawned_loop_runs_first_cycle_and_stops() {
        let mailbox = Arc::new(MemoryMailbox::default());
        mailbox
            .inbox
            .lock()
            .unwrap()
            .push(MailMessage::plain(1, "ジモティー", "鈴木さんから"));
        let notifier = Arc::new(RecordingNotifier::default());
        let processor = Arc::new(processor(Arc::clone(&mailbox), Arc::clone(&notifier)));

        let (handle, shutdown) = spawn_processor(processor, Duration::from_secs(3600));

        // The first tick fires immediately.
        for _ in 0..50 {
            if !mailbox.seen.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(*mailbox.seen.lock().unwrap(), vec![1]);

        shutdown.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn every_cycle_closes_the_source() {
        let mailbox = Arc::new(MemoryMailbox::default());
        mailbox
            .inbox
            .lock()
            .unwrap()
            .push(MailMessage::plain(2, "新しい応募者のお知らせ", "山田太郎さんから応募"));
        let processor = processor(Arc::clone(&mailbox), Arc::new(RecordingNotifier::default()));

        processor.poll_once().await.unwrap();
        processor.poll_once().await.unwrap();
        assert_eq!(mailbox.closes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fetch_failure_is_alerted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("Gmail polling error"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mailbox = Arc::new(MemoryMailbox {
            fail_fetch: true,
            ..MemoryMailbox::default()
        });
        let alerter = Arc::new(ErrorAlerter::new(
            Some(secrecy::SecretString::from(server.uri())),
            reqwest::Client::new(),
        ));
        let processor = Processor::new(
            mailbox,
            Dispatcher::new(Vec::new(), Arc::clone(&alerter)),
            alerter,
            Mode::Prod,
        );

        assert!(processor.run_cycle().await.is_none());
    }

    #[tokio::test]
    async fn dropped_shutdown_sender_stops_loop() {
        let mailbox = Arc::new(MemoryMailbox::default());
        let processor = Arc::new(processor(
            Arc::clone(&mailbox),
            Arc::new(RecordingNotifier::default()),
        ));

        let (handle, shutdown) = spawn_processor(processor, Duration::from_secs(3600));
        drop(shutdown);

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(mailbox.closes.load(Ordering::SeqCst) <= 1);
    }

    #[test]
    fn truncate_counts_chars() {
        assert_eq!(truncate("short", 50), "short");
        assert_eq!(truncate("新しい応募者のお知らせ", 3), "新しい…");
    }
}
