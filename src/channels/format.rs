//! Message rendering for the outbound channels.
//!
//! Pure string building so the exact wording can be tested without HTTP.

use crate::config::Mode;
use crate::pipeline::types::{ApplicationEvent, Classification};

/// Shown in place of a field the extractor could not find.
pub const PLACEHOLDER: &str = "unknown";

/// Prepended to every outbound message in test mode.
pub const TEST_PREFIX: &str = "【テストバージョン】\n";

/// Prefix `message` with the test marker when running in test mode.
pub fn with_mode_prefix(message: &str, mode: Mode) -> String {
    if mode.is_test() {
        format!("{TEST_PREFIX}{message}")
    } else {
        message.to_string()
    }
}

fn name_of(event: &ApplicationEvent) -> &str {
    event.applicant_name.as_deref().unwrap_or(PLACEHOLDER)
}

fn url_of(event: &ApplicationEvent) -> &str {
    event.confirmation_url.as_deref().unwrap_or(PLACEHOLDER)
}

/// Slack body without mentions or mode prefix.
pub fn slack_body(event: &ApplicationEvent) -> String {
    let title = match event.source {
        Classification::Jimoty => "【ジモティー】",
        _ => "【Indeed応募】",
    };
    format!(
        "{title}{} さんから応募がありました。\n\n応募内容はこちら:\n{}",
        name_of(event),
        url_of(event)
    )
}

/// Full Slack text: mode prefix, then `<@user>` mentions, then the body.
pub fn slack_text(event: &ApplicationEvent, mode: Mode, mention_user_ids: &[String]) -> String {
    let mut text = String::new();
    if !mention_user_ids.is_empty() {
        let mentions: Vec<String> = mention_user_ids.iter().map(|id| format!("<@{id}>")).collect();
        text.push_str(&mentions.join(" "));
        text.push('\n');
    }
    text.push_str(&slack_body(event));
    with_mode_prefix(&text, mode)
}

/// LINE body without mode prefix.
pub fn line_body(event: &ApplicationEvent) -> String {
    let headline = match event.source {
        Classification::Jimoty => "ジモティーで新着があります。",
        _ => "Indeedに応募がありました。",
    };
    format!(
        "{} さんから{headline}\n\n詳細はこちら:\n{}",
        name_of(event),
        url_of(event)
    )
}

/// Substitution key of the `index`-th LINE mention.
pub fn line_mention_key(index: usize) -> String {
    format!("m{index}")
}

/// Full LINE text: mode prefix, then `{m0} {m1} ` mention placeholders, then
/// the body. Placeholders resolve through [`line_mention_key`].
pub fn line_text(event: &ApplicationEvent, mode: Mode, mention_user_ids: &[String]) -> String {
    let mut text = String::new();
    for i in 0..mention_user_ids.len() {
        text.push_str(&format!("{{{}}} ", line_mention_key(i)));
    }
    text.push_str(&line_body(event));
    with_mode_prefix(&text, mode)
}

/// Operator alert text for the error webhook.
pub fn alert_text(detail: &str) -> String {
    format!("🚨 Indeed応募通知エラー発生\n{detail}")
}
