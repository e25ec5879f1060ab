//! Email channel — IMAP over TLS for the inbound mailbox.
//!
//! A small synchronous IMAP client (`ImapSession`) speaks just the commands
//! the poller needs: LOGIN, SELECT, UID SEARCH, UID FETCH, UID STORE and
//! LOGOUT. Messages are fetched with `BODY.PEEK[]` so the server never sets
//! `\Seen` on its own; `mark_seen` does that explicitly once the pipeline is
//! done with a message.
//!
//! One logged-in session serves a whole poll cycle: `fetch_unseen` opens it,
//! every `mark_seen` reuses it and `close` logs out. A command failure drops
//! the session and the next call reconnects.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use rustls_pki_types::ServerName;
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};

use crate::channels::MailSource;
use crate::channels::email_types::{MailMessage, MailUid, parse_message};
use crate::config::ImapConfig;
use crate::error::MailError;

/// Read/write timeout on the IMAP socket.
const IMAP_TIMEOUT: Duration = Duration::from_secs(30);

/// Byte stream an IMAP session runs over.
pub trait ImapStream: Read + Write + Send {}

impl<T: Read + Write + Send> ImapStream for T {}

type BoxedSession = ImapSession<Box<dyn ImapStream>>;

type Connector = dyn Fn(&ImapConfig) -> Result<Box<dyn ImapStream>, MailError> + Send + Sync;

// ── Mail source ─────────────────────────────────────────────────────

/// Gmail (or any IMAP4rev1) mailbox polled for unseen messages.
pub struct ImapMailbox {
    config: Arc<ImapConfig>,
    connector: Arc<Connector>,
    session: Arc<Mutex<Option<BoxedSession>>>,
}

impl ImapMailbox {
    pub fn new(config: ImapConfig) -> Self {
        Self::with_connector(config, |config: &ImapConfig| {
            connect_tls(config).map(|stream| Box::new(stream) as Box<dyn ImapStream>)
        })
    }

    fn with_connector<F>(config: ImapConfig, connector: F) -> Self
    where
        F: Fn(&ImapConfig) -> Result<Box<dyn ImapStream>, MailError> + Send + Sync + 'static,
    {
        Self {
            config: Arc::new(config),
            connector: Arc::new(connector),
            session: Arc::new(Mutex::new(None)),
        }
    }

    /// Run `op` on the cached session, logging in first if there is none.
    /// The session is kept only if `op` succeeds.
    async fn with_session<T, F>(&self, op: F) -> Result<T, MailError>
    where
        T: Send + 'static,
        F: FnOnce(&mut BoxedSession) -> Result<T, MailError> + Send + 'static,
    {
        let config = Arc::clone(&self.config);
        let connector = Arc::clone(&self.connector);
        let slot = Arc::clone(&self.session);

        tokio::task::spawn_blocking(move || {
            let mut slot = slot
                .lock()
                .map_err(|_| MailError::Task("IMAP session lock poisoned".into()))?;
            let mut session = match slot.take() {
                Some(session) => session,
                None => open_session(&config, connector.as_ref())?,
            };
            let result = op(&mut session);
            if result.is_ok() {
                *slot = Some(session);
            }
            result
        })
        .await
        .map_err(|e| MailError::Task(e.to_string()))?
    }
}

#[async_trait]
impl MailSource for ImapMailbox {
    fn name(&self) -> &str {
        "imap"
    }

    async fn fetch_unseen(&self) -> Result<Vec<MailMessage>, MailError> {
        let since = search_since(chrono::Local::now().date_naive(), self.config.search_days);
        self.with_session(move |session| fetch_unseen_in(session, since))
            .await
    }

    async fn mark_seen(&self, uids: &[MailUid]) -> Result<(), MailError> {
        if uids.is_empty() {
            return Ok(());
        }
        let uids = uids.to_vec();
        self.with_session(move |session| mark_seen_in(session, &uids))
            .await
    }

    async fn close(&self) {
        let slot = Arc::clone(&self.session);
        let closed = tokio::task::spawn_blocking(move || {
            let session = slot.lock().ok().and_then(|mut slot| slot.take());
            if let Some(mut session) = session {
                session.logout();
            }
        })
        .await;
        if let Err(e) = closed {
            warn!("IMAP logout task failed: {e}");
        }
    }
}

/// First day of the search window, or `None` for an unbounded search.
pub fn search_since(today: NaiveDate, search_days: u32) -> Option<NaiveDate> {
    if search_days == 0 {
        return None;
    }
    today.checked_sub_days(chrono::Days::new(u64::from(search_days)))
}

/// Open a TLS connection to the configured server.
fn connect_tls(
    config: &ImapConfig,
) -> Result<rustls::StreamOwned<rustls::ClientConnection, TcpStream>, MailError> {
    let tcp = TcpStream::connect((config.host.as_str(), config.port)).map_err(|e| {
        MailError::Connection {
            host: format!("{}:{}", config.host, config.port),
            reason: e.to_string(),
        }
    })?;
    tcp.set_read_timeout(Some(IMAP_TIMEOUT))?;
    tcp.set_write_timeout(Some(IMAP_TIMEOUT))?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name =
        ServerName::try_from(config.host.clone()).map_err(|e| MailError::Tls(e.to_string()))?;
    let conn = rustls::ClientConnection::new(tls_config, server_name)
        .map_err(|e| MailError::Tls(e.to_string()))?;

    Ok(rustls::StreamOwned::new(conn, tcp))
}

/// Connect, read the greeting, LOGIN and SELECT the configured mailbox.
fn open_session(config: &ImapConfig, connector: &Connector) -> Result<BoxedSession, MailError> {
    let mut session = ImapSession::open(connector(config)?)?;
    session.login(&config.username, config.password.expose_secret())?;
    session.select(&config.mailbox)?;
    debug!(mailbox = %config.mailbox, "IMAP session ready");
    Ok(session)
}

/// UID SEARCH UNSEEN → UID FETCH each.
fn fetch_unseen_in<S: Read + Write>(
    session: &mut ImapSession<S>,
    since: Option<NaiveDate>,
) -> Result<Vec<MailMessage>, MailError> {
    let uids = session.search_unseen(since)?;
    debug!(count = uids.len(), "Unseen messages found");

    let mut messages = Vec::with_capacity(uids.len());
    for uid in uids {
        match session.fetch_raw(uid) {
            Ok(Some(raw)) => messages.push(parse_message(uid, &raw)),
            Ok(None) => warn!(uid, "FETCH returned no body, will retry next poll"),
            // Rejected per-message fetches leave the message unseen.
            Err(MailError::Command { detail, .. }) => {
                warn!(uid, %detail, "FETCH rejected, will retry next poll");
            }
            Err(e) => return Err(e),
        }
    }

    info!(count = messages.len(), "Fetched unseen messages");
    Ok(messages)
}

/// UID STORE +FLAGS (\Seen) each.
fn mark_seen_in<S: Read + Write>(
    session: &mut ImapSession<S>,
    uids: &[MailUid],
) -> Result<(), MailError> {
    for &uid in uids {
        session.store_seen(uid)?;
        debug!(uid, "Marked \\Seen");
    }
    Ok(())
}

// ── IMAP session ────────────────────────────────────────────────────

/// One untagged server response (`* ...`), with any literals it carried.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Untagged {
    pub text: String,
    pub literals: Vec<Vec<u8>>,
}

/// Minimal blocking IMAP client over any byte stream.
pub struct ImapSession<S: Read + Write> {
    stream: BufReader<S>,
    next_tag: u32,
}

impl<S: Read + Write> ImapSession<S> {
    /// Wrap a connected stream and consume the server greeting.
    pub fn open(stream: S) -> Result<Self, MailError> {
        let mut session = Self {
            stream: BufReader::new(stream),
            next_tag: 1,
        };
        let greeting = session.read_line()?;
        let greeting = String::from_utf8_lossy(&greeting);
        if !(greeting.starts_with("* OK") || greeting.starts_with("* PREAUTH")) {
            return Err(MailError::Protocol(format!(
                "unexpected greeting: {}",
                greeting.trim_end()
            )));
        }
        Ok(session)
    }

    pub fn login(&mut self, user: &str, password: &str) -> Result<(), MailError> {
        let cmd = format!("LOGIN {} {}", quote(user), quote(password));
        match self.command(&cmd) {
            Ok(_) => Ok(()),
            Err(MailError::Command { .. }) => Err(MailError::AuthFailed { user: user.into() }),
            Err(e) => Err(e),
        }
    }

    pub fn select(&mut self, mailbox: &str) -> Result<(), MailError> {
        self.command(&format!("SELECT {}", quote(mailbox)))
            .map(|_| ())
    }

    /// UIDs of unseen messages, optionally restricted to `SINCE <date>`.
    pub fn search_unseen(&mut self, since: Option<NaiveDate>) -> Result<Vec<MailUid>, MailError> {
        let mut cmd = String::from("UID SEARCH UNSEEN");
        if let Some(date) = since {
            cmd.push_str(&format!(" SINCE {}", date.format("%d-%b-%Y")));
        }

        let responses = self.command(&cmd)?;
        let mut uids = Vec::new();
        for resp in &responses {
            if let Some(rest) = resp.text.strip_prefix("* SEARCH") {
                uids.extend(rest.split_whitespace().filter_map(|n| n.parse::<MailUid>().ok()));
            }
        }
        Ok(uids)
    }

    /// Full RFC 822 source of a message without touching its flags.
    pub fn fetch_raw(&mut self, uid: MailUid) -> Result<Option<Vec<u8>>, MailError> {
        let responses = self.command(&format!("UID FETCH {uid} (BODY.PEEK[])"))?;
        Ok(responses
            .into_iter()
            .filter(|r| r.text.contains("FETCH"))
            .find_map(|r| r.literals.into_iter().next()))
    }

    pub fn store_seen(&mut self, uid: MailUid) -> Result<(), MailError> {
        self.command(&format!("UID STORE {uid} +FLAGS (\\Seen)"))
            .map(|_| ())
    }

    /// Best-effort LOGOUT; the connection is dropped either way.
    pub fn logout(&mut self) {
        if let Err(e) = self.command("LOGOUT") {
            debug!("LOGOUT failed: {e}");
        }
    }

    /// Send a tagged command and collect untagged responses until the tagged
    /// completion. A `NO`/`BAD` completion becomes `MailError::Command`.
    pub fn command(&mut self, cmd: &str) -> Result<Vec<Untagged>, MailError> {
        let tag = format!("A{}", self.next_tag);
        let tag_prefix = format!("{tag} ");
        self.next_tag += 1;

        let stream = self.stream.get_mut();
        stream.write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        stream.flush()?;

        let mut responses = Vec::new();
        loop {
            let resp = self.read_response()?;
            if let Some(status) = resp.text.strip_prefix(&tag_prefix) {
                let status = status.trim();
                if status.starts_with("OK") {
                    return Ok(responses);
                }
                return Err(MailError::Command {
                    command: command_name(cmd),
                    detail: status.to_string(),
                });
            }
            responses.push(resp);
        }
    }

    /// Read one complete response, following `{n}` literals.
    fn read_response(&mut self) -> Result<Untagged, MailError> {
        let mut resp = Untagged::default();
        loop {
            let line = self.read_line()?;
            let text = String::from_utf8_lossy(&line);
            match literal_len(&text) {
                Some(len) => {
                    resp.text.push_str(text.trim_end());
                    let mut literal = vec![0u8; len];
                    self.stream.read_exact(&mut literal)?;
                    resp.literals.push(literal);
                }
                None => {
                    resp.text.push_str(text.trim_end_matches(['\r', '\n']));
                    return Ok(resp);
                }
            }
        }
    }

    fn read_line(&mut self) -> Result<Vec<u8>, MailError> {
        let mut buf = Vec::new();
        let n = self.stream.read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Err(MailError::Protocol("connection closed by server".into()));
        }
        Ok(buf)
    }

    #[cfg(test)]
    fn into_inner(self) -> S {
        self.stream.into_inner()
    }
}

/// Length of a literal announced at the end of a line (`... {123}\r\n`).
fn literal_len(line: &str) -> Option<usize> {
    let line = line.trim_end_matches(['\r', '\n']);
    let inner = line.strip_suffix('}')?;
    let open = inner.rfind('{')?;
    inner[open + 1..].parse().ok()
}

/// IMAP quoted string.
fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Command keyword(s) for error messages; never includes arguments.
fn command_name(cmd: &str) -> String {
    let mut words = cmd.split_whitespace();
    match words.next() {
        Some("UID") => format!("UID {}", words.next().unwrap_or_default()),
        Some(word) => word.to_string(),
        None => String::new(),
    }
}

// ── Tests ───────────────────────────────────────────────────────────
