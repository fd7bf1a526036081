//! recallkit core: error taxonomy and configuration.

pub mod config;
pub mod error;

pub use config::{CoreConfig, DEFAULT_BATCH_SIZE, DEFAULT_CACHE_CAPACITY, DEFAULT_TOKENIZER_MODEL};
pub use error::{Error, Result};
