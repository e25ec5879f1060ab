//! Subject rules that decide which job board a mail belongs to.
//!
//! Rules are checked in order and the first match wins, so Indeed takes
//! precedence when a subject somehow carries both markers.

use tracing::debug;

use crate::channels::email_types::MailMessage;
use crate::pipeline::types::Classification;

/// Subject marker of Indeed's "new applicant notification" mail.
pub const INDEED_SUBJECT_MARKER: &str = "新しい応募者のお知らせ";

/// Subject markers of Jimoty message notifications.
pub const JIMOTY_SUBJECT_MARKERS: [&str; 2] = ["ジモティー", "Jimoty"];

/// A single subject rule.
#[derive(Debug, Clone)]
pub struct SubjectRule {
    pub markers: Vec<&'static str>,
    pub classification: Classification,
}

impl SubjectRule {
    fn matches(&self, subject: &str) -> bool {
        self.markers.iter().any(|m| subject.contains(m))
    }
}

/// Ordered subject rules.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<SubjectRule>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self {
            rules: vec![
                SubjectRule {
                    markers: vec![INDEED_SUBJECT_MARKER],
                    classification: Classification::Indeed,
                },
                SubjectRule {
                    markers: JIMOTY_SUBJECT_MARKERS.to_vec(),
                    classification: Classification::Jimoty,
                },
            ],
        }
    }
}

impl Classifier {
    /// Classify a message by its subject.
    pub fn classify(&self, message: &MailMessage) -> Classification {
        classify_subject_with(&self.rules, &message.subject, message.uid)
    }
}

/// Classify a message with the default rules.
pub fn classify(message: &MailMessage) -> Classification {
    Classifier::default().classify(message)
}

fn classify_subject_with(rules: &[SubjectRule], subject: &str, uid: u32) -> Classification {
    let class = rules
        .iter()
        .find(|rule| rule.matches(subject))
        .map_or(Classification::Unknown, |rule| rule.classification);
    debug!(uid, %class, "Classified by subject");
    class
}
