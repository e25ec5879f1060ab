//! LINE channel — Messaging API push messages.
//!
//! Without mention IDs a plain `text` message is pushed. With mention IDs
//! the message becomes `textV2`: `{m0} {m1} ` placeholders sit between the
//! test prefix and the body, and the `substitution` map resolves each to a
//! user mention.

use std::collections::BTreeMap;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Serialize;

use crate::channels::{ChannelKind, Notifier, check_status, format, http_error};
use crate::config::{LineConfig, Mode};
use crate::error::NotifyError;
use crate::pipeline::types::ApplicationEvent;

/// Push request body.
#[derive(Debug, Serialize)]
pub struct PushRequest<'a> {
    pub to: &'a str,
    pub messages: Vec<LineMessage>,
}

/// A single LINE message object.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum LineMessage {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "textV2")]
    TextV2 {
        text: String,
        substitution: BTreeMap<String, Substitution>,
    },
}

/// A `textV2` substitution entry.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Substitution {
    Mention { mentionee: Mentionee },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Mentionee {
    User {
        #[serde(rename = "userId")]
        user_id: String,
    },
}

/// Build the message object for an already rendered `text`. With mentions the
/// text must carry the `{m<i>}` placeholders from [`format::line_text`].
pub fn build_message(text: String, mention_user_ids: &[String]) -> LineMessage {
    if mention_user_ids.is_empty() {
        return LineMessage::Text { text };
    }

    let substitution = mention_user_ids
        .iter()
        .enumerate()
        .map(|(i, user_id)| {
            let mention = Substitution::Mention {
                mentionee: Mentionee::User {
                    user_id: user_id.clone(),
                },
            };
            (format::line_mention_key(i), mention)
        })
        .collect();

    LineMessage::TextV2 { text, substitution }
}

/// LINE Messaging API push notifier.
pub struct LineNotifier {
    config: LineConfig,
    client: reqwest::Client,
}

impl LineNotifier {
    pub fn new(config: LineConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    fn config_error(&self, source: crate::error::ConfigError) -> NotifyError {
        NotifyError::Config {
            channel: self.kind().name().into(),
            source,
        }
    }
}

#[async_trait]
impl Notifier for LineNotifier {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Line
    }

    async fn send(&self, event: &ApplicationEvent, mode: Mode) -> Result<(), NotifyError> {
        let token = self
            .config
            .access_token()
            .map_err(|e| self.config_error(e))?;
        let to = self.config.to_id(mode).map_err(|e| self.config_error(e))?;

        let mentions = &self.config.mention_user_ids;
        let body = PushRequest {
            to,
            messages: vec![build_message(format::line_text(event, mode, mentions), mentions)],
        };

        let resp = self
            .client
            .post(self.config.push_endpoint())
            .bearer_auth(token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| http_error(self.kind(), e))?;

        tracing::info!(status = resp.status().as_u16(), "LINE API response");
        check_status(self.kind(), resp).await?;

        tracing::info!(%mode, source = %event.source, "LINE notification sent");
        Ok(())
    }
}
