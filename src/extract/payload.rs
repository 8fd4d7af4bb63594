use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::fetch::RequestFingerprint;

/// A response body exactly as received, bound to the request that produced it.
///
/// Kept for replay and debugging even when normalization rejects part of it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawPayload {
    pub fingerprint: RequestFingerprint,
    pub captured_at: DateTime<Utc>,
    pub body: serde_json::Value,
}

impl RawPayload {
    pub fn new(fingerprint: RequestFingerprint, body: serde_json::Value) -> Self {
        Self {
            fingerprint,
            captured_at: Utc::now(),
            body,
        }
    }

    /// Number of top-level elements when the body is an array, else 1.
    pub fn record_count(&self) -> usize {
        self.body.as_array().map_or(1, Vec::len)
    }
}
