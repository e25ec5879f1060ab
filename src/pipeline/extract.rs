//! Field extraction — applicant name and confirmation URL from a mail.
//!
//! Pure functions over `MailMessage`; nothing here touches the network. A
//! field that cannot be located is returned as `None` and the caller decides
//! how loudly to complain about it.

use std::sync::LazyLock;

use regex::Regex;

use crate::channels::email_types::{MailMessage, strip_html};
use crate::pipeline::types::{ApplicationEvent, Classification};

/// Anchor text of the button in Indeed mails that opens the application.
pub const INDEED_BUTTON_TEXT: &str = "応募内容を確認する";

/// Jimoty's message inbox, used when the mail carries no direct link.
pub const JIMOTY_INBOX_URL: &str = "https://jmty.jp/web_mail/posts";

static LABELLED_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^[ \t　]*(?:応募者名|応募者|氏名|お名前|名前)[ \t　]*[:：][ \t　]*(?P<name>[^\r\n]+?)[ \t　]*$",
    )
    .expect("labelled name pattern")
});

// A sentence name starts at a line start or after a delimiter and may hold
// one inner half- or full-width space ("山田 太郎", "山田　太郎").
static INDEED_SENTENCE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)(?:^|[\s「」『』、。:：()（）<>])(?P<name>[^\s「」『』、。:：()（）<>]{1,20}?(?:[ 　][^\s「」『』、。:：()（）<>]{1,20}?)?)[ 　]*(?:さん|様)(?:が|から)[^\r\n]*?応募",
    )
    .expect("indeed sentence pattern")
});

static JIMOTY_SENTENCE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)(?:^|[\s「」『』、。:：()（）<>])(?P<name>[^\s「」『』、。:：()（）<>]{1,20}?(?:[ 　][^\s「」『』、。:：()（）<>]{1,20}?)?)[ 　]*(?:さん|様)から",
    )
    .expect("jimoty sentence pattern")
});

static ANCHOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\b[^>]*?\bhref\s*=\s*["']([^"']+)["'][^>]*>(.*?)</a\s*>"#)
        .expect("anchor pattern")
});

static PLAIN_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://[^\s<>"'）」、。]+"#).expect("url pattern")
});

/// Extract an `ApplicationEvent` for an already-classified message.
pub fn extract(message: &MailMessage, source: Classification) -> ApplicationEvent {
    let (applicant_name, confirmation_url) = match source {
        Classification::Indeed => (
            find_name(message, &INDEED_SENTENCE_NAME),
            find_indeed_url(message),
        ),
        Classification::Jimoty => (
            find_name(message, &JIMOTY_SENTENCE_NAME),
            Some(find_jimoty_url(message)),
        ),
        Classification::Unknown => (None, None),
    };

    ApplicationEvent {
        source,
        applicant_name,
        confirmation_url,
    }
}

/// Body patterns first, then the `From` display name. A body match that is
/// only part of the display name (given name alone) yields the display name.
fn find_name(message: &MailMessage, sentence: &Regex) -> Option<String> {
    let body = &message.text_body;
    let from_body = LABELLED_NAME
        .captures(body)
        .or_else(|| sentence.captures(body))
        .and_then(|caps| caps.name("name"))
        .map(|m| clean_name(m.as_str()))
        .filter(|n| !n.is_empty());
    let from_header = message
        .from_name
        .as_deref()
        .map(clean_name)
        .filter(|n| !n.is_empty());

    match (from_body, from_header) {
        (Some(body), Some(header)) if header.len() > body.len() && header.contains(&body) => {
            Some(header)
        }
        (Some(body), _) => Some(body),
        (None, header) => header,
    }
}

/// Trim whitespace and a trailing honorific.
pub fn clean_name(raw: &str) -> String {
    let trimmed = raw.trim_matches(|c: char| c.is_whitespace() || c == '"');
    let trimmed = trimmed
        .strip_suffix("さん")
        .or_else(|| trimmed.strip_suffix("様"))
        .unwrap_or(trimmed);
    trimmed.trim().to_string()
}

/// Button link, then any Indeed anchor, then any Indeed URL in the text.
pub fn find_indeed_url(message: &MailMessage) -> Option<String> {
    let anchors = message.html_body.as_deref().map(anchors).unwrap_or_default();

    anchors
        .iter()
        .find(|(_, text)| text.contains(INDEED_BUTTON_TEXT))
        .or_else(|| {
            anchors
                .iter()
                .find(|(href, _)| href.to_ascii_lowercase().contains("indeed"))
        })
        .map(|(href, _)| href.clone())
        .or_else(|| first_url_containing(&message.text_body, "indeed"))
}

/// First jmty.jp link in the mail, else the Jimoty inbox.
pub fn find_jimoty_url(message: &MailMessage) -> String {
    first_url_containing(&message.text_body, "jmty.jp")
        .or_else(|| {
            message
                .html_body
                .as_deref()
                .map(anchors)
                .unwrap_or_default()
                .into_iter()
                .map(|(href, _)| href)
                .find(|href| href.contains("jmty.jp"))
        })
        .unwrap_or_else(|| JIMOTY_INBOX_URL.to_string())
}

/// `(href, visible text)` of every anchor in an HTML document.
pub fn anchors(html: &str) -> Vec<(String, String)> {
    ANCHOR
        .captures_iter(html)
        .map(|caps| {
            let href = caps[1].trim().replace("&amp;", "&");
            let text = strip_html(&caps[2]);
            (href, text)
        })
        .collect()
}

fn first_url_containing(text: &str, needle: &str) -> Option<String> {
    PLAIN_URL
        .find_iter(text)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ')']))
        .find(|url| url.to_ascii_lowercase().contains(needle))
        .map(str::to_string)
}
