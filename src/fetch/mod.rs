//! HTTP client wrapper for the transit API.
//!
//! [`ApiClient::request`] owns the retry loop: transient failures (timeouts,
//! dropped connections, 5xx, 429) are retried with exponential backoff, while
//! authentication failures and other 4xx responses fail on the first attempt.
//! Every attempt emits one `request attempt` event carrying the path, the
//! parameter fingerprint, the attempt number and the outcome.

mod basic;
mod client;
mod fingerprint;
mod retry;
pub mod auth;

#[cfg(test)]
pub(crate) mod scripted;

pub use basic::BasicClient;
pub use client::{HttpClient, HttpResponse, TransportError};
pub use fingerprint::RequestFingerprint;
pub use retry::RetryPolicy;

use crate::error::{FetchError, Shape};
use reqwest::{Method, StatusCode, Url};
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.tfl.gov.uk";

/// Failure classes that are worth another attempt.
enum Transient {
    Timeout,
    RateLimited(Option<Duration>),
    Server { status: u16, body: String },
    Connection(String),
}

impl Transient {
    fn label(&self) -> &'static str {
        match self {
            Transient::Timeout => "timeout",
            Transient::RateLimited(_) => "rate_limited",
            Transient::Server { .. } => "server_error",
            Transient::Connection(_) => "connection_error",
        }
    }

    fn hint(&self) -> Option<Duration> {
        match self {
            Transient::RateLimited(hint) => *hint,
            _ => None,
        }
    }

    fn into_error(self, path: &str, attempts: u32) -> FetchError {
        let path = path.to_string();
        match self {
            Transient::Timeout => FetchError::Timeout { path, attempts },
            Transient::RateLimited(retry_after) => FetchError::RateLimited {
                path,
                attempts,
                retry_after,
            },
            Transient::Server { status, body } => FetchError::UnexpectedStatus { path, status, body },
            Transient::Connection(message) => FetchError::Transport { path, message },
        }
    }
}

fn body_excerpt(body: &[u8]) -> String {
    String::from_utf8_lossy(body).chars().take(200).collect()
}

/// Request executor bound to one API host and one shared session.
pub struct ApiClient<C> {
    client: C,
    base_url: String,
    policy: RetryPolicy,
}

impl<C: HttpClient> ApiClient<C> {
    pub fn new(client: C, base_url: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            policy,
        }
    }

    pub fn inner(&self) -> &C {
        &self.client
    }

    fn build_url(&self, path: &str, params: &[(&str, String)]) -> Result<Url, FetchError> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|e| FetchError::InvalidUrl(format!("{}{}: {e}", self.base_url, path)))?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in params {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }

    /// Issues `GET {base_url}{path}?{params}` and returns the decoded JSON body.
    ///
    /// # Errors
    ///
    /// Returns the last failure once the retry policy is exhausted, or
    /// immediately for non-transient failures. A body that is not JSON of the
    /// `expected` shape is reported as [`FetchError::InvalidResponseShape`].
    #[tracing::instrument(skip_all, fields(path = %path))]
    pub async fn request(
        &self,
        path: &str,
        params: &[(&str, String)],
        expected: Shape,
    ) -> Result<serde_json::Value, FetchError> {
        let fingerprint = RequestFingerprint::new(path, params);
        let url = self.build_url(path, params)?;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let req = reqwest::Request::new(Method::GET, url.clone());

            let failure = match self.client.execute(req).await {
                Ok(resp) if resp.status.is_success() => {
                    info!(
                        path,
                        params = %fingerprint,
                        attempt,
                        outcome = "success",
                        status = resp.status.as_u16(),
                        bytes = resp.body.len(),
                        "request attempt"
                    );
                    return decode(path, &resp.body, expected);
                }
                Ok(resp) => {
                    let status = resp.status;
                    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                        error!(path, params = %fingerprint, attempt, outcome = "auth_failure", status = status.as_u16(), "request attempt");
                        return Err(FetchError::AuthenticationFailure {
                            status: status.as_u16(),
                        });
                    }
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        Transient::RateLimited(resp.retry_after)
                    } else if status.is_server_error() {
                        Transient::Server {
                            status: status.as_u16(),
                            body: body_excerpt(&resp.body),
                        }
                    } else {
                        warn!(path, params = %fingerprint, attempt, outcome = "rejected", status = status.as_u16(), "request attempt");
                        return Err(FetchError::UnexpectedStatus {
                            path: path.to_string(),
                            status: status.as_u16(),
                            body: body_excerpt(&resp.body),
                        });
                    }
                }
                Err(TransportError::Timeout) => Transient::Timeout,
                Err(err) if err.is_transient() => Transient::Connection(err.to_string()),
                Err(err) => {
                    warn!(path, params = %fingerprint, attempt, outcome = "transport_failure", error = %err, "request attempt");
                    return Err(FetchError::Transport {
                        path: path.to_string(),
                        message: err.to_string(),
                    });
                }
            };

            if !self.policy.has_attempts_left(attempt) {
                warn!(path, params = %fingerprint, attempt, outcome = failure.label(), "request attempt");
                error!(path, attempts = attempt, "Retries exhausted");
                return Err(failure.into_error(path, attempt));
            }

            let delay = self.policy.delay_after(attempt, failure.hint());
            warn!(
                path,
                params = %fingerprint,
                attempt,
                outcome = failure.label(),
                delay_ms = delay.as_millis() as u64,
                "request attempt"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

fn decode(path: &str, body: &[u8], expected: Shape) -> Result<serde_json::Value, FetchError> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| FetchError::InvalidResponseShape {
            path: path.to_string(),
            expected,
            found: format!("non-JSON body ({e})"),
        })?;

    if !expected.matches(&value) {
        return Err(FetchError::InvalidResponseShape {
            path: path.to_string(),
            expected,
            found: Shape::describe(&value).to_string(),
        });
    }

    debug!(path, "Response body decoded");
    Ok(value)
}
