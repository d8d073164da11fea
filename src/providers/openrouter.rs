//! OpenRouter speaks the Chat Completions wire format, so this adapter is the OpenAI one in its
//! OpenRouter dialect: `max_tokens`, `reasoning {..}`, `:online` web search, and no native PDFs.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ProviderKind;
use crate::error::Result;
use crate::providers::openai::{Dialect, OpenAIAdapter};
use crate::providers::streaming::ChunkStream;
use crate::providers::types::{GenerationParams, Message, ProviderResponse};
use crate::providers::ProviderAdapter;
use crate::server::storage_traits::TextExtractor;

pub struct OpenRouterAdapter {
    inner: OpenAIAdapter,
}

impl OpenRouterAdapter {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        extractor: Arc<dyn TextExtractor>,
    ) -> Self {
        Self {
            inner: OpenAIAdapter::with_dialect(
                client,
                base_url,
                api_key,
                extractor,
                Dialect::OpenRouter,
            ),
        }
    }
}

#[async_trait]
impl ProviderAdapter for OpenRouterAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenRouter
    }

    async fn generate_response(
        &self,
        model: &str,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<ProviderResponse> {
        self.inner.generate_response(model, messages, params).await
    }

    async fn generate_stream(
        &self,
        model: &str,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<ChunkStream> {
        self.inner.generate_stream(model, messages, params).await
    }
}
