//! recallkit chat: conversations, context budgeting, and LLM completions.
//!
//! Conversations are kept within a token budget by dropping the oldest
//! messages. Single-prompt completions go through a memoizing cache;
//! multi-turn completions are always sent to the provider.

pub mod completion;
pub mod config;
pub mod context;
pub mod providers;
pub mod types;

pub use completion::{CachedCompleter, CompletionOptions};
pub use config::LLMConfig;
pub use context::{total_tokens, truncate, truncate_with_report, TruncationReport};
pub use providers::{CompletionProvider, OpenAiClient};
pub use types::{Message, Role};
