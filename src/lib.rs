//! Async client for text-completion HTTP APIs.
//!
//! Requests are plain parameter bags that serialize without the fields left
//! unset. Blocking calls return one [`CompletionResult`]; streaming calls
//! return a [`CompletionStream`] that decodes `data: ` lines lazily until
//! the `[DONE]` sentinel.

pub mod client;
pub mod config;
pub mod error;
pub mod logger;
pub mod models;
pub mod stream;

pub use client::{CompletionClient, TextCompletion};
pub use config::ClientConfig;
pub use error::{CompletionError, Result};
pub use models::{Choice, CompletionRequest, CompletionResult, LogProbs, Prompt, ResponseMetadata};
pub use stream::CompletionStream;
