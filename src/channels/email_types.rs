//! Email-specific types — the fetched `MailMessage` and RFC 822 parsing.

use mail_parser::{MessageParser, PartType};

/// IMAP UID of a message in the selected mailbox.
pub type MailUid = u32;

/// A message fetched from the mailbox, reduced to what the pipeline reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailMessage {
    /// IMAP UID, used to set `\Seen` once the message has been processed.
    pub uid: MailUid,
    /// Decoded subject line (RFC 2047 words already decoded).
    pub subject: String,
    /// Display name of the `From` header, if any.
    pub from_name: Option<String>,
    /// Plain-text body. Falls back to tag-stripped HTML.
    pub text_body: String,
    /// Original HTML body, kept for anchor extraction.
    pub html_body: Option<String>,
}

impl MailMessage {
    /// Convenience constructor for plain-text messages.
    pub fn plain(uid: MailUid, subject: &str, text_body: &str) -> Self {
        Self {
            uid,
            subject: subject.to_string(),
            text_body: text_body.to_string(),
            ..Self::default()
        }
    }

    pub fn with_from_name(mut self, name: &str) -> Self {
        self.from_name = Some(name.to_string());
        self
    }

    pub fn with_html(mut self, html: &str) -> Self {
        self.html_body = Some(html.to_string());
        self
    }
}

/// Parse a raw RFC 822 message.
///
/// Never fails: an unparseable message comes back with empty fields so it
/// still flows through the pipeline (and gets marked seen).
pub fn parse_message(uid: MailUid, raw: &[u8]) -> MailMessage {
    let Some(parsed) = MessageParser::default().parse(raw) else {
        tracing::warn!(uid, "Unparseable message, treating as empty");
        return MailMessage {
            uid,
            ..MailMessage::default()
        };
    };

    let subject = parsed.subject().unwrap_or_default().to_string();
    let from_name = parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.name())
        .map(clean_display_name)
        .filter(|n| !n.is_empty());

    // mail-parser points html_part at the text part (and vice versa) when a
    // message only has one flavour, so match on the part type.
    let html_body = parsed.html_part(0).and_then(|part| match &part.body {
        PartType::Html(html) => Some(html.to_string()),
        _ => None,
    });

    let text_body = parsed
        .text_part(0)
        .map(|part| match &part.body {
            PartType::Text(text) => text.to_string(),
            PartType::Html(html) => strip_html(html),
            _ => String::new(),
        })
        .unwrap_or_default();

    MailMessage {
        uid,
        subject,
        from_name,
        text_body,
        html_body,
    }
}

/// Strip surrounding quotes and whitespace from a display name.
pub fn clean_display_name(name: &str) -> String {
    name.replace('"', "").trim().to_string()
}

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                result.push(' ');
            }
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}
