use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use handshake_core::HandshakeError;
use serde_json::Value;

/// A JSON POST to an embedding endpoint.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

/// Status and parsed body of a provider answer. Bodies that are not JSON
/// come back as a JSON string.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub status: u16,
    pub body: Value,
}

/// Transport used by the HTTP embedding providers.
#[async_trait]
pub trait ProviderBackend: Send + Sync {
    async fn send(&self, request: ProviderRequest) -> Result<ProviderResponse, HandshakeError>;
}

// ---------------------------------------------------------------------------
// HttpBackend
// ---------------------------------------------------------------------------

/// [`ProviderBackend`] over a `reqwest` client.
#[derive(Clone, Default)]
pub struct HttpBackend {
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, HandshakeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                HandshakeError::Configuration(format!("failed to build HTTP client: {e}"))
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ProviderBackend for HttpBackend {
    async fn send(&self, request: ProviderRequest) -> Result<ProviderResponse, HandshakeError> {
        let mut builder = self.client.post(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .json(&request.body)
            .send()
            .await
            .map_err(|e| HandshakeError::Embedding(format!("request to {} failed: {e}", request.url)))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| HandshakeError::Embedding(format!("failed to read response: {e}")))?;
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));

        Ok(ProviderResponse { status, body })
    }
}

// ---------------------------------------------------------------------------
// FakeBackend
// ---------------------------------------------------------------------------

/// Scripted [`ProviderBackend`] for tests. Answers with queued responses in
/// order and records every request it receives.
#[derive(Default)]
pub struct FakeBackend {
    responses: Mutex<VecDeque<ProviderResponse>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, response: ProviderResponse) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(response);
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ProviderBackend for FakeBackend {
    async fn send(&self, request: ProviderRequest) -> Result<ProviderResponse, HandshakeError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| HandshakeError::Embedding("no scripted response left".to_string()))
    }
}
