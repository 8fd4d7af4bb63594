//! Error types for the extraction and load stages.
//!
//! Data-quality problems are not errors; see [`crate::normalize::Diagnostic`].

use std::time::Duration;
use thiserror::Error;

use crate::rows::NaturalKey;

/// Top-level JSON shape an endpoint is expected to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Array,
    Object,
}

impl Shape {
    pub fn matches(&self, value: &serde_json::Value) -> bool {
        match self {
            Shape::Array => value.is_array(),
            Shape::Object => value.is_object(),
        }
    }

    /// Name of the JSON kind actually found in `value`.
    pub fn describe(value: &serde_json::Value) -> &'static str {
        match value {
            serde_json::Value::Null => "null",
            serde_json::Value::Bool(_) => "boolean",
            serde_json::Value::Number(_) => "number",
            serde_json::Value::String(_) => "string",
            serde_json::Value::Array(_) => "array",
            serde_json::Value::Object(_) => "object",
        }
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Shape::Array => f.write_str("array"),
            Shape::Object => f.write_str("object"),
        }
    }
}

/// Failure of a single API request after the retry policy has run.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request to {path} timed out after {attempts} attempt(s)")]
    Timeout { path: String, attempts: u32 },

    #[error("rate limited on {path} after {attempts} attempt(s)")]
    RateLimited {
        path: String,
        attempts: u32,
        retry_after: Option<Duration>,
    },

    #[error("authentication rejected by API (status {status})")]
    AuthenticationFailure { status: u16 },

    #[error("unexpected response shape from {path}: expected {expected}, found {found}")]
    InvalidResponseShape {
        path: String,
        expected: Shape,
        found: String,
    },

    #[error("API returned status {status} for {path}: {body}")]
    UnexpectedStatus {
        path: String,
        status: u16,
        body: String,
    },

    #[error("transport failure on {path}: {message}")]
    Transport { path: String, message: String },

    #[error("invalid request URL: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    /// Fatal errors stop the run without any retry having been attempted.
    pub fn is_authentication(&self) -> bool {
        matches!(self, FetchError::AuthenticationFailure { .. })
    }
}

/// A warehouse batch that did not commit.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("batch of {} row(s) was rolled back: {source}", pending_keys.len())]
    LoadFailure {
        /// Every natural key of the batch; none of them is confirmed committed.
        pending_keys: Vec<NaturalKey>,
        #[source]
        source: sqlx::Error,
    },

    #[error("warehouse unavailable: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("no warehouse table named {0:?}")]
    UnknownTable(String),
}

/// Fatal failure of one pipeline run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Load(#[from] LoadError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_shape_matches() {
        assert!(Shape::Array.matches(&json!([])));
        assert!(!Shape::Array.matches(&json!({})));
        assert!(Shape::Object.matches(&json!({"a": 1})));
        assert!(!Shape::Object.matches(&json!("x")));
    }

    #[test]
    fn test_shape_describe() {
        assert_eq!(Shape::describe(&json!(null)), "null");
        assert_eq!(Shape::describe(&json!({"a": 1})), "object");
        assert_eq!(Shape::describe(&json!(3)), "number");
    }

    #[test]
    fn test_load_failure_message_counts_keys() {
        let err = LoadError::LoadFailure {
            pending_keys: vec![
                NaturalKey::new("arrivals", ["a", "b"]),
                NaturalKey::new("arrivals", ["c", "d"]),
            ],
            source: sqlx::Error::PoolClosed,
        };
        assert!(err.to_string().starts_with("batch of 2 row(s)"));
    }
}
