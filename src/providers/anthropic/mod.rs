mod client;
pub mod request;
pub mod response;

pub use client::AnthropicAdapter;
