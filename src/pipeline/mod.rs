//! Mail notification pipeline.
//!
//! Every unseen message flows through:
//! 1. `MailSource::fetch_unseen()` — IMAP I/O
//! 2. `Classifier::classify()` — subject matching (Indeed / Jimoty / unknown)
//! 3. `extract()` — applicant name and confirmation URL
//! 4. `Dispatcher::notify()` — Slack then LINE, independently
//! 5. `MailSource::mark_seen()` — always, whatever the notification outcome

pub mod dispatch;
pub mod extract;
pub mod processor;
pub mod rules;
pub mod types;

pub use dispatch::Dispatcher;
pub use processor::{Processor, spawn_processor};
pub use rules::Classifier;
pub use types::{ApplicationEvent, Classification, CycleReport};
