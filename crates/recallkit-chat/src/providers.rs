//! Remote LLM providers.
//!
//! `CompletionProvider` is the narrow seam for chat completions. The
//! `OpenAiClient` speaks the OpenAI-compatible HTTP API and implements both
//! it and `EmbeddingProvider`.

use async_trait::async_trait;
use ndarray::Array1;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

use recallkit_core::{Error, Result};
use recallkit_infer::EmbeddingProvider;

use crate::config::LLMConfig;
use crate::types::Message;

/// Trait for chat completion backends.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Generate a reply to `messages`.
    async fn complete(
        &self,
        messages: &[Message],
        model: &str,
        temperature: f32,
        max_tokens: Option<u32>,
    ) -> Result<String>;
}

/// Client for OpenAI-compatible `/chat/completions` and `/embeddings`.
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: String,
    embedding_model: String,
}

impl OpenAiClient {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        embedding_model: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            embedding_model: embedding_model.into(),
        }
    }

    /// Build a client from `config`; requires an API key.
    pub fn from_config(config: &LLMConfig) -> Result<Self> {
        Ok(Self::new(
            config.require_api_key()?,
            config.base_url.clone(),
            config.embedding_model.clone(),
        ))
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
            .map_err(|e| {
                warn!("Request to {} failed: {}", url, e);
                Error::Provider(format!("Request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!("API error {} from {}", status, url);
            return Err(Error::Provider(format!("API error {}: {}", status, text)));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| Error::Provider(format!("Invalid response body: {}", e)))
    }
}

/// Request body for a chat completion.
pub(crate) fn chat_body(
    messages: &[Message],
    model: &str,
    temperature: f32,
    max_tokens: Option<u32>,
) -> Value {
    let msgs: Vec<Value> = messages
        .iter()
        .map(|m| json!({"role": m.role, "content": m.content}))
        .collect();

    let mut body = json!({
        "model": model,
        "messages": msgs,
        "temperature": temperature,
    });
    if let Some(max) = max_tokens {
        body["max_tokens"] = json!(max);
    }
    body
}

pub(crate) fn parse_chat_response(parsed: &Value) -> Result<String> {
    parsed["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| Error::Provider("response has no message content".into()))
}

/// Embeddings from an `/embeddings` response, ordered by their `index`.
pub(crate) fn parse_embedding_response(parsed: &Value, expected: usize) -> Result<Vec<Array1<f32>>> {
    let data = parsed["data"]
        .as_array()
        .ok_or_else(|| Error::Provider("response has no data array".into()))?;

    let mut rows: Vec<(usize, Array1<f32>)> = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item["index"].as_u64().map_or(position, |i| i as usize);
        let values = item["embedding"]
            .as_array()
            .ok_or_else(|| Error::Provider("embedding is not an array".into()))?
            .iter()
            .map(|v| {
                v.as_f64()
                    .map(|f| f as f32)
                    .ok_or_else(|| Error::Provider("embedding value is not a number".into()))
            })
            .collect::<Result<Vec<f32>>>()?;
        rows.push((index, Array1::from(values)));
    }

    if rows.len() != expected {
        return Err(Error::Provider(format!(
            "expected {} embeddings, got {}",
            expected,
            rows.len()
        )));
    }
    rows.sort_by_key(|(index, _)| *index);
    // Each input must come back exactly once.
    if let Some((position, (index, _))) = rows
        .iter()
        .enumerate()
        .find(|(position, (index, _))| position != index)
    {
        return Err(Error::Provider(format!(
            "embedding index {} does not match input {}",
            index, position
        )));
    }
    Ok(rows.into_iter().map(|(_, v)| v).collect())
}

#[async_trait]
impl CompletionProvider for OpenAiClient {
    async fn complete(
        &self,
        messages: &[Message],
        model: &str,
        temperature: f32,
        max_tokens: Option<u32>,
    ) -> Result<String> {
        let body = chat_body(messages, model, temperature, max_tokens);
        let parsed = self.post("/chat/completions", &body).await?;
        parse_chat_response(&parsed)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiClient {
    fn model(&self) -> &str {
        &self.embedding_model
    }

    async fn embed(&self, text: &str) -> Result<Array1<f32>> {
        let body = json!({"model": self.embedding_model, "input": text});
        let parsed = self.post("/embeddings", &body).await?;
        parse_embedding_response(&parsed, 1)?
            .pop()
            .ok_or_else(|| Error::Provider("empty embedding response".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Array1<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = json!({"model": self.embedding_model, "input": texts});
        let parsed = self.post("/embeddings", &body).await?;
        parse_embedding_response(&parsed, texts.len())
    }
}
