//! HTTP arbitration backend
//!
//! Talks to any endpoint that speaks the chat-completions wire format.
//! The model is asked for a JSON object and its text reply is handed to
//! [`crate::prompt::parse_verdicts`].

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::error::ArbiterError;
use crate::prompt::{build_prompt, parse_verdicts, SYSTEM_PROMPT};
use crate::verdict::{ArbitrationVerdict, MemorySummary};
use crate::{ArbiterResult, RelevanceArbiter};

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Arbiter endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpArbiterConfig {
    /// Full chat-completions URL
    pub endpoint: String,
    /// Bearer token (optional for local gateways)
    pub api_key: Option<String>,
    /// Model name sent with each request
    pub model: String,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
}

impl HttpArbiterConfig {
    /// Create config for a specific endpoint
    pub fn new(endpoint: &str) -> Self {
        HttpArbiterConfig {
            endpoint: endpoint.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    /// Load from `MESH_ARBITER_ENDPOINT`, `MESH_ARBITER_API_KEY`,
    /// `MESH_ARBITER_MODEL` and `MESH_ARBITER_TIMEOUT_MS`.
    ///
    /// Returns `None` when no endpoint is set.
    pub fn from_env() -> Option<Self> {
        let endpoint = std::env::var("MESH_ARBITER_ENDPOINT").ok()?;
        if endpoint.trim().is_empty() {
            return None;
        }
        let mut config = Self::new(endpoint.trim());
        config.api_key = std::env::var("MESH_ARBITER_API_KEY").ok();
        if let Ok(model) = std::env::var("MESH_ARBITER_MODEL") {
            config.model = model;
        }
        if let Some(ms) = std::env::var("MESH_ARBITER_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.timeout_ms = ms;
        }
        Some(config)
    }

    /// Set authentication token
    pub fn with_api_key(mut self, key: &str) -> Self {
        self.api_key = Some(key.to_string());
        self
    }

    /// Set model name
    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions arbiter client
pub struct HttpArbiter {
    config: HttpArbiterConfig,
    http_client: reqwest::Client,
}

impl HttpArbiter {
    /// Create a new client
    pub fn new(config: HttpArbiterConfig) -> ArbiterResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("mesh-arbiter/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(HttpArbiter {
            config,
            http_client,
        })
    }

    /// Create a client from the environment, if an endpoint is configured
    pub fn from_env() -> ArbiterResult<Option<Self>> {
        HttpArbiterConfig::from_env().map(Self::new).transpose()
    }

    pub fn config(&self) -> &HttpArbiterConfig {
        &self.config
    }

    fn request_body(&self, source: &MemorySummary, candidates: &[MemorySummary]) -> serde_json::Value {
        json!({
            "model": self.config.model,
            "temperature": 0.0,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": build_prompt(source, candidates) },
            ],
        })
    }
}

#[async_trait]
impl RelevanceArbiter for HttpArbiter {
    async fn evaluate_batch(
        &self,
        source: &MemorySummary,
        candidates: &[MemorySummary],
    ) -> ArbiterResult<Vec<Option<ArbitrationVerdict>>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        debug!(
            source = %source.memory_id,
            candidates = candidates.len(),
            "Sending arbitration batch"
        );

        let mut request = self
            .http_client
            .post(&self.config.endpoint)
            .json(&self.request_body(source, candidates));
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ArbiterError::Timeout {
                    timeout_ms: self.config.timeout_ms,
                }
            } else {
                ArbiterError::from(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "Arbiter endpoint returned an error");
            return Err(ArbiterError::Http(format!("{status}: {body}")));
        }

        let chat: ChatResponse = response.json().await?;
        let text = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ArbiterError::Malformed("empty completion".to_string()))?;

        parse_verdicts(&text, candidates)
    }

    fn name(&self) -> &str {
        "http"
    }
}
