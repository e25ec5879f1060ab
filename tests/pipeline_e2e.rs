//! End-to-end poll cycles: in-memory mailbox, config from a key map, and
//! wiremock standing in for Slack and the LINE Messaging API.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use recruit_notifier::channels::{
    ErrorAlerter, LineNotifier, MailMessage, MailSource, MailUid, Notifier, SlackNotifier,
};
use recruit_notifier::config::AppConfig;
use recruit_notifier::error::MailError;
use recruit_notifier::pipeline::{CycleReport, Dispatcher, Processor};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct MemoryMailbox {
    inbox: Mutex<Vec<MailMessage>>,
    seen: Mutex<Vec<MailUid>>,
}

impl MemoryMailbox {
    fn with(messages: Vec<MailMessage>) -> Arc<Self> {
        Arc::new(Self {
            inbox: Mutex::new(messages),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn seen(&self) -> Vec<MailUid> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailSource for MemoryMailbox {
    fn name(&self) -> &str {
        "memory"
    }

    async fn fetch_unseen(&self) -> Result<Vec<MailMessage>, MailError> {
        let seen = self.seen();
        Ok(self
            .inbox
            .lock()
            .unwrap()
            .iter()
            .filter(|m| !seen.contains(&m.uid))
            .cloned()
            .collect())
    }

    async fn mark_seen(&self, uids: &[MailUid]) -> Result<(), MailError> {
        self.seen.lock().unwrap().extend_from_slice(uids);
        Ok(())
    }
}

fn env(server: &MockServer, overrides: &[(&str, Option<&str>)]) -> HashMap<String, String> {
    let mut vars: HashMap<String, String> = [
        ("GMAIL_IMAP_USER", "recruit@example.com".to_string()),
        ("GMAIL_IMAP_PASSWORD", "app-password".to_string()),
        ("SLACK_WEBHOOK_URL_TEST", format!("{}/slack/test", server.uri())),
        ("SLACK_WEBHOOK_URL_PROD", format!("{}/slack/prod", server.uri())),
        ("LINE_CHANNEL_ACCESS_TOKEN", "line-token".to_string()),
        ("LINE_TO_ID_TEST", "Ctest".to_string()),
        ("LINE_TO_ID_PROD", "Cprod".to_string()),
        ("LINE_API_BASE_URL", server.uri()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    for (key, value) in overrides {
        match value {
            Some(v) => vars.insert(key.to_string(), v.to_string()),
            None => vars.remove(*key),
        };
    }
    vars
}

fn processor(vars: HashMap<String, String>, mailbox: Arc<MemoryMailbox>) -> Processor {
    let config = AppConfig::from_lookup(|key| vars.get(key).cloned()).unwrap();
    let client = reqwest::Client::new();
    let alerter = Arc::new(ErrorAlerter::new(config.error_webhook_url, client.clone()));
    let notifiers: Vec<Arc<dyn Notifier>> = vec![
        Arc::new(SlackNotifier::new(config.slack, client.clone())) as Arc<dyn Notifier>,
        Arc::new(LineNotifier::new(config.line, client)) as Arc<dyn Notifier>,
    ];
    Processor::new(
        mailbox,
        Dispatcher::new(notifiers, Arc::clone(&alerter)),
        alerter,
        config.mode,
    )
}

async fn mount_ok(server: &MockServer) {
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(server)
        .await;
}

async fn bodies_at(server: &MockServer, route: &str) -> Vec<serde_json::Value> {
    server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.url.path() == route)
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect()
}

fn indeed_mail(uid: MailUid) -> MailMessage {
    MailMessage::plain(
        uid,
        "新しい応募者のお知らせ",
        "山田太郎さんから応募がありました。\n\n応募内容を確認する\nhttps://indeed.com/applications/123\n",
    )
    .with_from_name("Indeed")
}

#[tokio::test]
async fn indeed_mail_in_prod_reaches_both_channels() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/bot/message/push"))
        .and(header("Authorization", "Bearer line-token"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/slack/prod"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let mailbox = MemoryMailbox::with(vec![indeed_mail(42)]);
    let report = processor(env(&server, &[]), Arc::clone(&mailbox))
        .poll_once()
        .await
        .unwrap();

    assert_eq!(
        report,
        CycleReport {
            fetched: 1,
            notified: 1,
            skipped: 0,
            marked_seen: 1
        }
    );
    assert_eq!(mailbox.seen(), vec![42]);

    let url = "https://indeed.com/applications/123";
    let slack = bodies_at(&server, "/slack/prod").await;
    assert_eq!(
        slack[0]["text"],
        format!("【Indeed応募】山田太郎 さんから応募がありました。\n\n応募内容はこちら:\n{url}")
    );

    let line = bodies_at(&server, "/v2/bot/message/push").await;
    assert_eq!(line[0]["to"], "Cprod");
    assert_eq!(
        line[0]["messages"][0]["text"],
        format!("山田太郎 さんからIndeedに応募がありました。\n\n詳細はこちら:\n{url}")
    );
    for text in [&slack[0]["text"], &line[0]["messages"][0]["text"]] {
        assert!(!text.as_str().unwrap().contains("テストバージョン"));
    }
}

#[tokio::test]
async fn missing_slack_webhook_still_sends_line_and_marks_seen() {
    let server = MockServer::start().await;
    mount_ok(&server).await;

    let mailbox = MemoryMailbox::with(vec![indeed_mail(7)]);
    let vars = env(&server, &[("SLACK_WEBHOOK_URL_PROD", None)]);
    let report = processor(vars, Arc::clone(&mailbox)).poll_once().await.unwrap();

    assert_eq!(report.notified, 1);
    assert_eq!(mailbox.seen(), vec![7]);
    assert!(bodies_at(&server, "/slack/prod").await.is_empty());
    assert_eq!(bodies_at(&server, "/v2/bot/message/push").await.len(), 1);
}

#[tokio::test]
async fn non_target_mail_sends_nothing_but_is_marked_seen() {
    let server = MockServer::start().await;
    mount_ok(&server).await;

    let mailbox = MemoryMailbox::with(vec![MailMessage::plain(
        3,
        "Your weekly digest",
        "Nothing to see here.",
    )]);
    let report = processor(env(&server, &[]), Arc::clone(&mailbox))
        .poll_once()
        .await
        .unwrap();

    assert_eq!(report.skipped, 1);
    assert_eq!(mailbox.seen(), vec![3]);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_mode_prefixes_both_channels_and_uses_test_targets() {
    let server = MockServer::start().await;
    mount_ok(&server).await;

    let jimoty = MailMessage::plain(
        11,
        "【ジモティー】新着メッセージ",
        "佐藤花子さんからメッセージが届きました。\nhttps://jmty.jp/web_mail/posts/999",
    );
    let mailbox = MemoryMailbox::with(vec![jimoty]);
    let vars = env(&server, &[("MODE", Some("test"))]);
    processor(vars, Arc::clone(&mailbox)).poll_once().await.unwrap();

    assert!(bodies_at(&server, "/slack/prod").await.is_empty());
    let slack = bodies_at(&server, "/slack/test").await;
    assert_eq!(
        slack[0]["text"],
        "【テストバージョン】\n【ジモティー】佐藤花子 さんから応募がありました。\n\n応募内容はこちら:\nhttps://jmty.jp/web_mail/posts/999"
    );

    let line = bodies_at(&server, "/v2/bot/message/push").await;
    assert_eq!(line[0]["to"], "Ctest");
    assert_eq!(
        line[0]["messages"][0]["text"],
        "【テストバージョン】\n佐藤花子 さんからジモティーで新着があります。\n\n詳細はこちら:\nhttps://jmty.jp/web_mail/posts/999"
    );
}

#[tokio::test]
async fn channel_failures_are_alerted_and_do_not_cause_redelivery() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/slack/prod"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/bot/message/push"))
        .respond_with(ResponseTemplate::new(401).set_body_string("{\"message\":\"invalid token\"}"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/slack/alerts"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let alerts = format!("{}/slack/alerts", server.uri());
    let vars = env(&server, &[("SLACK_ERROR_WEBHOOK_URL", Some(alerts.as_str()))]);
    let mailbox = MemoryMailbox::with(vec![indeed_mail(5)]);
    let processor = processor(vars, Arc::clone(&mailbox));

    processor.poll_once().await.unwrap();
    assert_eq!(mailbox.seen(), vec![5]);

    let again = processor.poll_once().await.unwrap();
    assert_eq!(again, CycleReport::default());

    let alert_bodies = bodies_at(&server, "/slack/alerts").await;
    assert!(
        alert_bodies
            .iter()
            .all(|b| b["text"].as_str().unwrap().starts_with("🚨 Indeed応募通知エラー発生\n"))
    );
}
