//! In-memory [`HttpClient`] replaying a fixed script of responses.

use super::client::{HttpClient, HttpResponse, TransportError};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Default)]
pub struct ScriptedClient {
    script: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    seen: Mutex<Vec<String>>,
}

impl ScriptedClient {
    pub fn new(script: Vec<Result<HttpResponse, TransportError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn ok_json(body: serde_json::Value) -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse::new(StatusCode::OK, body.to_string()))
    }

    pub fn status(code: u16) -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse::new(
            StatusCode::from_u16(code).unwrap(),
            "error body",
        ))
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpClient for ScriptedClient {
    async fn execute(&self, req: reqwest::Request) -> Result<HttpResponse, TransportError> {
        self.seen.lock().unwrap().push(req.url().to_string());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Other("script exhausted".into())))
    }
}
