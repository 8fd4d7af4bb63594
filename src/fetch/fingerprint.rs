use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identity of a request: endpoint path plus filter parameters.
///
/// Parameters are kept sorted so equal requests produce equal fingerprints.
/// Credentials are added below this layer and never appear here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestFingerprint {
    pub endpoint: String,
    pub params: BTreeMap<String, String>,
}

impl RequestFingerprint {
    pub fn new(endpoint: impl Into<String>, params: &[(&str, String)]) -> Self {
        Self {
            endpoint: endpoint.into(),
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    /// File-name friendly form of the endpoint, e.g. `/Line/Route` -> `line-route`.
    pub fn slug(&self) -> String {
        self.endpoint
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_ascii_lowercase())
            .collect::<Vec<_>>()
            .join("-")
    }
}

impl std::fmt::Display for RequestFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.endpoint)?;
        for (i, (k, v)) in self.params.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{sep}{k}={v}")?;
        }
        Ok(())
    }
}
