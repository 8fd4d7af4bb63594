use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::load::UpsertCounts;
use crate::normalize::DiagnosticCounts;

/// Summary of one pipeline run, one CSV row per run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub timestamp: DateTime<Utc>,
    /// `arrivals` or `line_routes`.
    pub kind: String,
    /// Stop point id or the request fingerprint.
    pub target: String,

    pub fetched: usize,
    pub accepted: usize,

    // diagnostics
    pub malformed: usize,
    pub unmapped: usize,
    pub conflicting: usize,
    pub duplicates_collapsed: usize,

    // load
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
}

impl RunReport {
    pub fn new(kind: &str, target: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind: kind.to_string(),
            target: target.into(),
            ..Self::default()
        }
    }

    pub fn with_diagnostics(mut self, counts: DiagnosticCounts) -> Self {
        self.malformed = counts.malformed;
        self.unmapped = counts.unmapped;
        self.conflicting = counts.conflicting;
        self.duplicates_collapsed = counts.duplicates_collapsed;
        self
    }

    pub fn with_load(mut self, counts: UpsertCounts) -> Self {
        self.inserted = counts.inserted;
        self.updated = counts.updated;
        self.skipped = counts.skipped;
        self
    }

    /// Records excluded from output for data-quality reasons.
    pub fn diagnosed(&self) -> usize {
        self.malformed + self.unmapped + self.conflicting
    }
}
