//! Configuration types.
//!
//! Everything is read once at startup into an immutable [`AppConfig`] and
//! handed to the components that need it. Tests build configs through
//! [`AppConfig::from_lookup`] instead of touching the process environment.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

const DEFAULT_IMAP_HOST: &str = "imap.gmail.com";
const DEFAULT_IMAP_PORT: u16 = 993;
const DEFAULT_LINE_API_BASE_URL: &str = "https://api.line.me";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
const DEFAULT_SEARCH_DAYS: u32 = 7;

/// Delivery mode: selects destination credentials and the test prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    Test,
    #[default]
    Prod,
}

impl Mode {
    pub fn is_test(self) -> bool {
        self == Mode::Test
    }

    /// Suffix used by the per-mode environment variables.
    pub fn env_suffix(self) -> &'static str {
        match self {
            Mode::Test => "TEST",
            Mode::Prod => "PROD",
        }
    }
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "test" => Ok(Mode::Test),
            "prod" => Ok(Mode::Prod),
            other => Err(ConfigError::InvalidValue {
                key: "MODE".into(),
                message: format!("expected \"test\" or \"prod\", got \"{other}\""),
            }),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Test => "test",
            Mode::Prod => "prod",
        })
    }
}

/// IMAP mailbox settings.
#[derive(Debug)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub mailbox: String,
    /// Restrict the UNSEEN search to the last N days. `0` searches everything.
    pub search_days: u32,
}

/// Slack incoming-webhook settings for both modes.
#[derive(Debug, Default)]
pub struct SlackConfig {
    pub webhook_url_test: Option<SecretString>,
    pub webhook_url_prod: Option<SecretString>,
    /// Slack user IDs mentioned at the top of every notification.
    pub mention_user_ids: Vec<String>,
}

impl SlackConfig {
    /// Webhook for the given mode, or the name of the missing variable.
    pub fn webhook_url(&self, mode: Mode) -> Result<&SecretString, ConfigError> {
        let url = match mode {
            Mode::Test => self.webhook_url_test.as_ref(),
            Mode::Prod => self.webhook_url_prod.as_ref(),
        };
        url.ok_or_else(|| {
            ConfigError::MissingEnvVar(format!("SLACK_WEBHOOK_URL_{}", mode.env_suffix()))
        })
    }
}

/// LINE Messaging API settings for both modes.
#[derive(Debug)]
pub struct LineConfig {
    pub channel_access_token: Option<SecretString>,
    pub to_id_test: Option<String>,
    pub to_id_prod: Option<String>,
    pub api_base_url: String,
    /// LINE user IDs mentioned through `textV2` substitutions.
    pub mention_user_ids: Vec<String>,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            channel_access_token: None,
            to_id_test: None,
            to_id_prod: None,
            api_base_url: DEFAULT_LINE_API_BASE_URL.to_string(),
            mention_user_ids: Vec::new(),
        }
    }
}

impl LineConfig {
    pub fn access_token(&self) -> Result<&SecretString, ConfigError> {
        self.channel_access_token
            .as_ref()
            .ok_or_else(|| ConfigError::MissingEnvVar("LINE_CHANNEL_ACCESS_TOKEN".into()))
    }

    /// Push destination (user, group or room ID) for the given mode.
    pub fn to_id(&self, mode: Mode) -> Result<&str, ConfigError> {
        let to = match mode {
            Mode::Test => self.to_id_test.as_deref(),
            Mode::Prod => self.to_id_prod.as_deref(),
        };
        to.ok_or_else(|| ConfigError::MissingEnvVar(format!("LINE_TO_ID_{}", mode.env_suffix())))
    }

    pub fn push_endpoint(&self) -> String {
        format!("{}/v2/bot/message/push", self.api_base_url.trim_end_matches('/'))
    }
}

/// Full service configuration.
#[derive(Debug)]
pub struct AppConfig {
    pub mode: Mode,
    pub imap: ImapConfig,
    pub slack: SlackConfig,
    pub line: LineConfig,
    /// Operator alert webhook for delivery and polling failures.
    pub error_webhook_url: Option<SecretString>,
    pub poll_interval: Duration,
    pub run_once: bool,
}

impl AppConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let require = |key: &str| get(key).ok_or_else(|| ConfigError::MissingEnvVar(key.into()));
        let secret = |key: &str| get(key).map(SecretString::from);

        let mode = match get("MODE") {
            Some(raw) => raw.parse()?,
            None => Mode::default(),
        };

        let imap = ImapConfig {
            host: get("GMAIL_IMAP_HOST").unwrap_or_else(|| DEFAULT_IMAP_HOST.to_string()),
            port: parse_or("GMAIL_IMAP_PORT", get("GMAIL_IMAP_PORT"), DEFAULT_IMAP_PORT)?,
            username: require("GMAIL_IMAP_USER")?,
            password: SecretString::from(require("GMAIL_IMAP_PASSWORD")?),
            mailbox: "INBOX".to_string(),
            search_days: parse_or("SEARCH_DAYS", get("SEARCH_DAYS"), DEFAULT_SEARCH_DAYS)?,
        };

        let slack = SlackConfig {
            webhook_url_test: secret("SLACK_WEBHOOK_URL_TEST"),
            webhook_url_prod: secret("SLACK_WEBHOOK_URL_PROD"),
            mention_user_ids: split_list(get("SLACK_MENTION_USER_IDS")),
        };

        let line = LineConfig {
            channel_access_token: secret("LINE_CHANNEL_ACCESS_TOKEN"),
            to_id_test: get("LINE_TO_ID_TEST"),
            to_id_prod: get("LINE_TO_ID_PROD"),
            api_base_url: get("LINE_API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_LINE_API_BASE_URL.to_string()),
            mention_user_ids: split_list(get("LINE_MENTION_USER_IDS")),
        };

        let poll_secs: u64 = parse_or(
            "POLL_INTERVAL_SECONDS",
            get("POLL_INTERVAL_SECONDS"),
            DEFAULT_POLL_INTERVAL_SECS,
        )?;
        if poll_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "POLL_INTERVAL_SECONDS".into(),
                message: "must be greater than zero".into(),
            });
        }

        let run_once = match get("RUN_ONCE") {
            Some(raw) => parse_bool("RUN_ONCE", &raw)?,
            None => false,
        };

        Ok(Self {
            mode,
            imap,
            slack,
            line,
            error_webhook_url: secret("SLACK_ERROR_WEBHOOK_URL"),
            poll_interval: Duration::from_secs(poll_secs),
            run_once,
        })
    }
}

fn parse_or<T: FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T::Err: fmt::Display,
{
    match raw {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.into(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.into(),
            message: format!("expected a boolean, got \"{other}\""),
        }),
    }
}

fn split_list(raw: Option<String>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
