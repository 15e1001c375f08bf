use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    config::ChatConfig,
    error::{ChatError, Result},
    prompt::{InsurerContext, build_prompt},
    query::QueryParams,
};

/// Raw body of a streaming generation response.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
}

/// Text generation backend.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Starts generating for `prompt` and hands back the open response body.
    async fn generate(&self, prompt: &str) -> Result<ByteStream>;

    /// Generates for `question`, grounded in `context` when there is any.
    async fn generate_grounded(
        &self,
        question: &str,
        context: Option<&InsurerContext>,
        params: &QueryParams,
    ) -> Result<ByteStream> {
        self.generate(&build_prompt(question, context, params)).await
    }
}

/// Client for an Ollama-compatible `/api/generate` endpoint.
pub struct OllamaClient {
    client: Client,
    url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            model: model.into(),
        }
    }

    pub fn from_config(config: &ChatConfig) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.generation_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ChatError::GenerationConnect(e.to_string()))?;

        Ok(Self {
            client,
            url: config.generation_api_url.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl TextGenerator for OllamaClient {
    async fn generate(&self, prompt: &str) -> Result<ByteStream> {
        let request = GenerateRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            stream: true,
        };

        debug!(
            url = %self.url,
            model = %self.model,
            prompt_length = prompt.len(),
            "Opening generation stream"
        );

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ChatError::GenerationConnect(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::GenerationStatus {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| ChatError::StreamRead(e.to_string()))
        });

        Ok(Box::pin(body))
    }
}
