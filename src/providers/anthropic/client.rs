use std::sync::Arc;

use async_trait::async_trait;
use reqwest_eventsource::RequestBuilderExt;

use crate::config::ProviderKind;
use crate::error::{GatewayError, Result};
use crate::providers::streaming::{ChunkStream, drive_event_source};
use crate::providers::types::{GenerationParams, Message, ProviderResponse};
use crate::providers::{ProviderAdapter, is_truncation, send_json};
use crate::server::storage_traits::TextExtractor;

use super::request::{CreateMessageParams, build_create_message};
use super::response::{CreateMessageResponse, MessageStreamDecoder};

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    extractor: Arc<dyn TextExtractor>,
}

impl AnthropicAdapter {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        extractor: Arc<dyn TextExtractor>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            extractor,
        }
    }

    fn post(&self, request: &CreateMessageParams) -> reqwest::RequestBuilder {
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        self.client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(request)
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    async fn generate_response(
        &self,
        model: &str,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<ProviderResponse> {
        let request =
            build_create_message(self.extractor.as_ref(), model, messages, params, false).await;
        let resp: CreateMessageResponse =
            send_json(ProviderKind::Anthropic, self.post(&request)).await?;
        Ok(ProviderResponse {
            content: resp.text(),
            model: if resp.model.is_empty() {
                model.to_string()
            } else {
                resp.model.clone()
            },
            provider: ProviderKind::Anthropic,
            usage: resp.token_usage(),
            is_truncated: is_truncation(resp.stop_reason.as_deref()),
            stop_reason: resp.stop_reason,
        })
    }

    async fn generate_stream(
        &self,
        model: &str,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<ChunkStream> {
        let request =
            build_create_message(self.extractor.as_ref(), model, messages, params, true).await;
        let es = self
            .post(&request)
            .header("Accept", "text/event-stream")
            .eventsource()
            .map_err(|e| GatewayError::Stream(e.to_string()))?;
        Ok(drive_event_source(
            es,
            ProviderKind::Anthropic,
            MessageStreamDecoder::default(),
        ))
    }
}
