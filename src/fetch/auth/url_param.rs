use crate::fetch::client::{HttpClient, HttpResponse, TransportError};
use async_trait::async_trait;

/// An [`HttpClient`] wrapper that appends a credential as a URL query parameter.
///
/// The transit API expects `app_id` and `app_key` on every call, so the two
/// are stacked. The outer wrapper appends first:
/// `UrlParam::new(UrlParam::new(inner, "app_key", key), "app_id", id)` yields
/// `?app_id=..&app_key=..`.
/// The path and the request fingerprint never see the credential.
pub struct UrlParam<C> {
    pub inner: C,
    pub param_name: String,
    pub key: String,
}

impl<C> UrlParam<C> {
    pub fn new(inner: C, param_name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            inner,
            param_name: param_name.into(),
            key: key.into(),
        }
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for UrlParam<C> {
    async fn execute(&self, mut req: reqwest::Request) -> Result<HttpResponse, TransportError> {
        req.url_mut()
            .query_pairs_mut()
            .append_pair(&self.param_name, &self.key);
        self.inner.execute(req).await
    }
}

/// Wraps `inner` so that `app_id` and `app_key` ride along on every request.
pub fn app_credentials<C: HttpClient>(
    inner: C,
    app_id: impl Into<String>,
    app_key: impl Into<String>,
) -> UrlParam<UrlParam<C>> {
    UrlParam::new(UrlParam::new(inner, "app_key", app_key), "app_id", app_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    #[async_trait]
    impl HttpClient for Recorder {
        async fn execute(&self, req: reqwest::Request) -> Result<HttpResponse, TransportError> {
            self.0.lock().unwrap().push(req.url().to_string());
            Ok(HttpResponse::new(StatusCode::OK, "[]"))
        }
    }

    #[tokio::test]
    async fn test_credentials_appended_as_query_params() {
        let client = app_credentials(Recorder::default(), "my-id", "my-key");
        let req = reqwest::Request::new(
            reqwest::Method::GET,
            "https://api.example.com/Line/Route?modes=tube".parse().unwrap(),
        );
        client.execute(req).await.unwrap();

        let urls = client.inner.inner.0.lock().unwrap();
        assert_eq!(
            urls[0],
            "https://api.example.com/Line/Route?modes=tube&app_id=my-id&app_key=my-key"
        );
        assert_eq!(client.param_name, "app_id");
        assert_eq!(client.inner.param_name, "app_key");
    }
}
