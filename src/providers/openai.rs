pub mod client;
pub mod types;

pub use client::{Dialect, OpenAIAdapter, is_reasoning_model};
pub use types::ChatCompletionRequest;
