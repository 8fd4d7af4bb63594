//! Raw records to canonical rows.
//!
//! Bad records never abort a batch. Each one is excluded and described by a
//! [`Diagnostic`]; the counts travel with the accepted rows in [`Normalized`].

mod arrivals;
pub mod resolve;
mod routes;

pub use arrivals::normalize_arrivals;
pub use routes::normalize_routes;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

use crate::extract::RejectedRecord;
use crate::rows::{CanonicalRow, NaturalKey};
use resolve::UnmappedReason;

/// A per-record data-quality finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    MalformedRecord {
        index: usize,
        reason: String,
    },
    /// Null line id that could not be resolved; the record was withheld.
    Unmapped {
        index: usize,
        name: Option<String>,
        reason: UnmappedReason,
    },
    /// Several records share a key but disagree on values; all were withheld.
    ConflictingDuplicate {
        key: NaturalKey,
        variants: usize,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    pub entries: Vec<Diagnostic>,
    /// Identical duplicates folded into one row.
    pub duplicates_collapsed: usize,
}

/// Counts-only view of [`Diagnostics`], for reports and logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiagnosticCounts {
    pub malformed: usize,
    pub unmapped: usize,
    pub conflicting: usize,
    pub duplicates_collapsed: usize,
}

impl Diagnostics {
    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.entries.push(diagnostic);
    }

    pub fn reject(&mut self, index: usize, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::debug!(index, reason = %reason, "Malformed record");
        self.push(Diagnostic::MalformedRecord { index, reason });
    }

    pub fn counts(&self) -> DiagnosticCounts {
        let mut counts = DiagnosticCounts {
            duplicates_collapsed: self.duplicates_collapsed,
            ..DiagnosticCounts::default()
        };
        for entry in &self.entries {
            match entry {
                Diagnostic::MalformedRecord { .. } => counts.malformed += 1,
                Diagnostic::Unmapped { .. } => counts.unmapped += 1,
                Diagnostic::ConflictingDuplicate { .. } => counts.conflicting += 1,
            }
        }
        counts
    }

    /// Undecodable elements found by the extractor count as malformed.
    pub fn extend_rejected(&mut self, rejected: &[RejectedRecord]) {
        for r in rejected {
            self.push(Diagnostic::MalformedRecord {
                index: r.index,
                reason: format!("undecodable record: {}", r.reason),
            });
        }
    }
}

/// Accepted rows plus the diagnostics for everything that was not accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized<R> {
    pub rows: Vec<R>,
    pub diagnostics: Diagnostics,
}

impl<R: Into<CanonicalRow>> Normalized<R> {
    pub fn into_canonical(self) -> (Vec<CanonicalRow>, Diagnostics) {
        (
            self.rows.into_iter().map(Into::into).collect(),
            self.diagnostics,
        )
    }
}

/// Parses an API timestamp into UTC.
///
/// Accepts RFC 3339 with any offset; a timestamp without an offset is read
/// as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|ts| ts.and_utc())
        })
}

/// Collapses rows sharing a natural key.
///
/// Identical duplicates fold into one row. Disagreeing duplicates are all
/// withheld and reported, since picking one would hide the conflict.
/// First-seen order of keys is kept.
pub(crate) fn dedup<R, F>(rows: Vec<R>, key_of: F, diagnostics: &mut Diagnostics) -> Vec<R>
where
    R: PartialEq,
    F: Fn(&R) -> NaturalKey,
{
    let mut order: Vec<NaturalKey> = Vec::new();
    let mut groups: HashMap<NaturalKey, Vec<R>> = HashMap::new();
    for row in rows {
        let key = key_of(&row);
        let group = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            Vec::new()
        });
        group.push(row);
    }

    let mut out = Vec::with_capacity(order.len());
    for key in order {
        let Some(mut group) = groups.remove(&key) else {
            continue;
        };
        let total = group.len();
        let mut variants: Vec<R> = Vec::new();
        for row in group.drain(..) {
            if !variants.contains(&row) {
                variants.push(row);
            }
        }

        if variants.len() == 1 {
            diagnostics.duplicates_collapsed += total - 1;
            out.extend(variants);
        } else {
            tracing::warn!(key = %key, variants = variants.len(), "Conflicting duplicate records");
            diagnostics.push(Diagnostic::ConflictingDuplicate {
                key,
                variants: variants.len(),
            });
        }
    }
    out
}
