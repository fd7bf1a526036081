//! Memoized completion calls.
//!
//! Single-prompt completions are cached by `(prompt, model, temperature,
//! max_tokens)`. Multi-turn calls are never cached; when a context budget is
//! set the conversation is truncated before it is sent.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::debug;

use recallkit_core::{CoreConfig, Result};
use recallkit_infer::{CacheKey, CacheStats, MemoCache};

use crate::config::{LLMConfig, DEFAULT_CHAT_MODEL, DEFAULT_TEMPERATURE};
use crate::context::truncate_with_report;
use crate::providers::CompletionProvider;
use crate::types::{Message, Role};

/// Per-call completion parameters. Every field is part of the cache key.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            model: DEFAULT_CHAT_MODEL.into(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: None,
        }
    }
}

impl From<&LLMConfig> for CompletionOptions {
    fn from(config: &LLMConfig) -> Self {
        Self {
            model: config.chat_model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

/// Completion provider fronted by a prompt cache.
pub struct CachedCompleter<P: ?Sized> {
    provider: Arc<P>,
    cache: MemoCache<CacheKey, String>,
    context_budget: Option<usize>,
}

impl<P> CachedCompleter<P>
where
    P: CompletionProvider + ?Sized,
{
    pub fn new(provider: Arc<P>, cache_capacity: usize) -> Result<Self> {
        Ok(Self {
            provider,
            cache: MemoCache::new(cache_capacity)?,
            context_budget: None,
        })
    }

    /// Capacity and context budget taken from `config`.
    pub fn from_config(provider: Arc<P>, config: &CoreConfig) -> Result<Self> {
        Ok(Self::new(provider, config.cache_capacity)?.with_context_budget(config.context_budget))
    }

    /// Token budget applied to `complete_with_history`.
    pub fn with_context_budget(mut self, budget: Option<usize>) -> Self {
        self.context_budget = budget;
        self
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Complete a single user prompt, consulting the cache first.
    pub async fn complete_prompt(&self, prompt: &str, options: &CompletionOptions) -> Result<String> {
        let key = CacheKey::completion(prompt, &options.model, options.temperature, options.max_tokens);
        let fingerprint = key.fingerprint();
        let messages = [Message::new(Role::User, prompt, 0)];

        self.cache
            .call(key, || {
                debug!(key = %fingerprint, model = %options.model, "Completion cache miss");
                self.provider.complete(
                    &messages,
                    &options.model,
                    options.temperature,
                    options.max_tokens,
                )
            })
            .await
    }

    /// Complete `prompt` followed by a blank line and `format_instructions`.
    pub async fn complete_structured(
        &self,
        prompt: &str,
        format_instructions: &str,
        options: &CompletionOptions,
    ) -> Result<String> {
        let full_prompt = format!("{}\n\n{}", prompt, format_instructions);
        self.complete_prompt(&full_prompt, options).await
    }

    /// `complete_structured`, then parse the reply as JSON into `T`.
    pub async fn complete_json<T: DeserializeOwned>(
        &self,
        prompt: &str,
        format_instructions: &str,
        options: &CompletionOptions,
    ) -> Result<T> {
        let reply = self.complete_structured(prompt, format_instructions, options).await?;
        Ok(serde_json::from_str(reply.trim())?)
    }

    /// Complete a multi-turn conversation. Never cached.
    pub async fn complete_with_history(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<String> {
        let truncated;
        let messages = match self.context_budget {
            Some(budget) => {
                let (kept, report) = truncate_with_report(messages, budget);
                debug!(removed = report.removed, total = report.total_tokens, "Prepared conversation");
                truncated = kept;
                truncated.as_slice()
            }
            None => messages,
        };

        self.provider
            .complete(messages, &options.model, options.temperature, options.max_tokens)
            .await
    }
}
