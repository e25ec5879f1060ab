//! Recruit notifier — forwards job-application mail to Slack and LINE.

pub mod channels;
pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
