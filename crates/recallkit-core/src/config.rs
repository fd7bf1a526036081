//! Core configuration: cache capacity, batching, tokenizer defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

pub const DEFAULT_CACHE_CAPACITY: usize = 1000;
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_TOKENIZER_MODEL: &str = "gpt-4";

/// Top-level recallkit configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Maximum number of memoized results per cache.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// Maximum number of inputs handed to one collaborator call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// How many chunks may be in flight at once (1 = sequential).
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,
    /// Model whose tokenization scheme is used for token counting.
    #[serde(default = "default_tokenizer_model")]
    pub tokenizer_model: String,
    /// Token budget for conversations. No default: callers must opt in.
    #[serde(default)]
    pub context_budget: Option<usize>,
    /// Lower-case and collapse whitespace before embedding.
    #[serde(default = "default_normalize_text")]
    pub normalize_text: bool,
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}
fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}
fn default_batch_concurrency() -> usize {
    1
}
fn default_tokenizer_model() -> String {
    DEFAULT_TOKENIZER_MODEL.into()
}
fn default_normalize_text() -> bool {
    true
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_concurrency: 1,
            tokenizer_model: DEFAULT_TOKENIZER_MODEL.into(),
            context_budget: None,
            normalize_text: true,
        }
    }
}

impl CoreConfig {
    /// Create configuration from environment and defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_with(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load config from a JSON file, then apply environment overrides.
    ///
    /// A missing file yields the defaults; a malformed one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: CoreConfig = match std::fs::read_to_string(path) {
            Ok(s) => serde_json::from_str(&s)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => return Err(e.into()),
        };
        config.apply_env_with(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `RECALLKIT_*` variables resolved through `lookup`.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse = |name: &str| -> Option<usize> {
            let raw = lookup(name)?;
            match raw.trim().parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!("Ignoring {}={:?}: not a non-negative integer", name, raw);
                    None
                }
            }
        };

        if let Some(v) = parse("RECALLKIT_CACHE_CAPACITY") {
            self.cache_capacity = v;
        }
        if let Some(v) = parse("RECALLKIT_BATCH_SIZE") {
            self.batch_size = v;
        }
        if let Some(v) = parse("RECALLKIT_BATCH_CONCURRENCY") {
            self.batch_concurrency = v;
        }
        if let Some(v) = parse("RECALLKIT_CONTEXT_BUDGET") {
            self.context_budget = Some(v);
        }
        if let Some(model) = lookup("RECALLKIT_TOKENIZER_MODEL") {
            if !model.trim().is_empty() {
                self.tokenizer_model = model.trim().to_string();
            }
        }
    }

    /// Reject settings the components cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.cache_capacity == 0 {
            return Err(Error::Config("cache_capacity must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".into()));
        }
        if self.batch_concurrency == 0 {
            return Err(Error::Config("batch_concurrency must be at least 1".into()));
        }
        if self.tokenizer_model.is_empty() {
            return Err(Error::Config("tokenizer_model must not be empty".into()));
        }
        Ok(())
    }

    /// Save config to disk as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
