//! Pipeline types — the classification of a mail and what was extracted from it.

use std::fmt;

/// Which job board a notification mail came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    Indeed,
    Jimoty,
    Unknown,
}

impl Classification {
    pub fn label(self) -> &'static str {
        match self {
            Classification::Indeed => "indeed",
            Classification::Jimoty => "jimoty",
            Classification::Unknown => "unknown",
        }
    }

    pub fn is_known(self) -> bool {
        self != Classification::Unknown
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A job application recognised in a mail. Fields the extractor could not
/// locate are `None`; rendering substitutes a placeholder for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationEvent {
    pub source: Classification,
    pub applicant_name: Option<String>,
    pub confirmation_url: Option<String>,
}

impl ApplicationEvent {
    pub fn new(source: Classification) -> Self {
        Self {
            source,
            applicant_name: None,
            confirmation_url: None,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.applicant_name = Some(name.to_string());
        self
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.confirmation_url = Some(url.to_string());
        self
    }

    /// Names of the fields extraction could not find.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.applicant_name.is_none() {
            missing.push("applicant_name");
        }
        if self.confirmation_url.is_none() {
            missing.push("confirmation_url");
        }
        missing
    }
}

/// Counters for one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub notified: usize,
    pub skipped: usize,
    pub marked_seen: usize,
}
