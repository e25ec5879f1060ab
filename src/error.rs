//! Error types for the recruit notifier.

/// Configuration-related errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Mailbox (IMAP) errors. Any of these aborts the current poll cycle.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Failed to connect to {host}: {reason}")]
    Connection { host: String, reason: String },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("IMAP login rejected for {user}")]
    AuthFailed { user: String },

    #[error("IMAP command {command} failed: {detail}")]
    Command { command: String, detail: String },

    #[error("IMAP protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Mail task failed: {0}")]
    Task(String),
}

/// Outbound notification errors, scoped to one channel.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("{channel} not configured: {source}")]
    Config {
        channel: String,
        #[source]
        source: ConfigError,
    },

    #[error("{channel} request failed: {reason}")]
    Http { channel: String, reason: String },

    #[error("{channel} returned {status}: {body}")]
    Status {
        channel: String,
        status: u16,
        body: String,
    },
}

impl NotifyError {
    /// Missing configuration is a skip, not a delivery failure.
    pub fn is_config(&self) -> bool {
        matches!(self, NotifyError::Config { .. })
    }
}
