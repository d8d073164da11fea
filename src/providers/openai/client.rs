use std::sync::Arc;

use async_trait::async_trait;
use reqwest_eventsource::RequestBuilderExt;
use serde_json::{Value, json};

use crate::config::ProviderKind;
use crate::error::{GatewayError, Result};
use crate::providers::streaming::{ChunkStream, DecodeStep, SseDecoder, drive_event_source};
use crate::providers::types::{
    FileAttachment, GenerationParams, Message, ProviderResponse, ReasoningEffort, Role,
    StreamChunk, Usage,
};
use crate::providers::{ProviderAdapter, is_truncation, send_json, text_with_folded_files};
use crate::server::storage_traits::TextExtractor;
use crate::server::token_model_limits::canonical_model_id;

use super::types::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse,
    ChatCompletionStreamOptions, ContentPart, FileData, ImageUrl, LooseCompletion, WireContent,
    WireMessage, finish_reason_str,
};

/// Wire flavour of an OpenAI-compatible endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    OpenAI,
    OpenRouter,
}

pub struct OpenAIAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    extractor: Arc<dyn TextExtractor>,
    dialect: Dialect,
}

/// gpt-5 and the o-series take `reasoning_effort` and reject custom temperatures.
pub fn is_reasoning_model(model: &str) -> bool {
    let id = canonical_model_id(model);
    id.starts_with("gpt-5")
        || ["o1", "o3", "o4"]
            .iter()
            .any(|f| id == *f || id.starts_with(&format!("{}-", f)))
}

impl OpenAIAdapter {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        extractor: Arc<dyn TextExtractor>,
    ) -> Self {
        Self::with_dialect(client, base_url, api_key, extractor, Dialect::OpenAI)
    }

    pub(crate) fn with_dialect(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        extractor: Arc<dyn TextExtractor>,
        dialect: Dialect,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            extractor,
            dialect,
        }
    }

    fn provider(&self) -> ProviderKind {
        match self.dialect {
            Dialect::OpenAI => ProviderKind::OpenAI,
            Dialect::OpenRouter => ProviderKind::OpenRouter,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn post(&self, body: &ChatCompletionRequest) -> reqwest::RequestBuilder {
        let mut rb = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");
        if self.dialect == Dialect::OpenRouter {
            rb = rb.header("X-Title", "inference-gateway");
        }
        rb.json(body)
    }

    async fn wire_message(&self, message: &Message) -> WireMessage {
        let role = match message.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        if message.files.is_empty() || message.role != Role::User {
            return WireMessage {
                role,
                content: WireContent::Text(message.content.clone()),
            };
        }

        let native_pdf = self.dialect == Dialect::OpenAI;
        let is_native = |f: &&FileAttachment| {
            f.inline_data().is_some() && (f.is_image() || (native_pdf && f.is_pdf()))
        };
        let folded: Vec<&FileAttachment> =
            message.files.iter().filter(|f| !is_native(f)).collect();
        let text = text_with_folded_files(self.extractor.as_ref(), &message.content, &folded).await;

        let mut parts = vec![ContentPart::Text { text }];
        for file in message.files.iter().filter(is_native) {
            let Some(url) = file.data_url() else { continue };
            if file.is_image() {
                parts.push(ContentPart::ImageUrl {
                    image_url: ImageUrl { url },
                });
            } else {
                parts.push(ContentPart::File {
                    file: FileData {
                        filename: file.name.clone(),
                        file_data: url,
                    },
                });
            }
        }
        WireMessage {
            role,
            content: WireContent::Parts(parts),
        }
    }

    pub(crate) async fn build_request(
        &self,
        model: &str,
        messages: &[Message],
        params: &GenerationParams,
        stream: bool,
    ) -> ChatCompletionRequest {
        let mut wire = Vec::with_capacity(messages.len() + 1);
        if let Some(system) = &params.system_prompt {
            wire.push(WireMessage {
                role: "system",
                content: WireContent::Text(system.clone()),
            });
        }
        for m in messages {
            wire.push(self.wire_message(m).await);
        }

        let mut req = ChatCompletionRequest {
            model: model.to_string(),
            messages: wire,
            temperature: Some(params.temperature),
            max_completion_tokens: None,
            max_tokens: None,
            reasoning_effort: None,
            verbosity: None,
            web_search_options: None,
            reasoning: None,
            stream: stream.then_some(true),
            stream_options: stream.then_some(ChatCompletionStreamOptions {
                include_usage: true,
            }),
        };

        match self.dialect {
            Dialect::OpenAI => {
                req.max_completion_tokens = Some(params.max_tokens);
                let search_model = model.contains("search");
                if is_reasoning_model(model) {
                    req.temperature = None;
                    req.reasoning_effort = params.reasoning_effort.clone().or_else(|| {
                        params.extended_thinking.then_some(ReasoningEffort::High)
                    });
                    if canonical_model_id(model).starts_with("gpt-5") {
                        req.verbosity = params.verbosity;
                    }
                }
                if search_model {
                    req.temperature = None;
                    if params.enable_web_search {
                        req.web_search_options = Some(json!({}));
                    }
                }
            }
            Dialect::OpenRouter => {
                req.max_tokens = Some(params.max_tokens);
                if params.enable_web_search && !model.ends_with(":online") {
                    req.model = format!("{}:online", model);
                }
                if params.extended_thinking {
                    req.reasoning = Some(json!({ "max_tokens": params.thinking_budget_tokens }));
                } else if let Some(effort) = &params.reasoning_effort {
                    req.reasoning = Some(json!({ "effort": effort }));
                }
            }
        }
        req
    }
}

fn error_text(err: &Value) -> String {
    err.get("message")
        .and_then(|m| m.as_str())
        .or_else(|| err.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| err.to_string())
}

/// Content, finish reason, usage and model from a completion body, typed first.
fn read_completion(body: Value) -> Result<(String, Option<String>, Option<Usage>, Option<String>)> {
    if let Ok(typed) = serde_json::from_value::<ChatCompletionResponse>(body.clone()) {
        let choice = typed.choices.first();
        let content = choice
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();
        let finish = choice
            .and_then(|c| c.finish_reason)
            .map(|r| finish_reason_str(r).to_string());
        let usage = typed.usage.as_ref().map(Usage::from);
        return Ok((content, finish, usage, Some(typed.model)));
    }
    let loose: LooseCompletion = serde_json::from_value(body)?;
    let choice = loose.choices.first();
    let content = choice
        .and_then(|c| c.message.as_ref())
        .and_then(|m| m.content.clone())
        .unwrap_or_default();
    let finish = choice.and_then(|c| c.finish_reason.clone());
    let usage = loose.usage.map(|u| Usage {
        prompt_tokens: u.prompt_tokens,
        completion_tokens: u.completion_tokens,
        total_tokens: u.total_tokens,
    });
    Ok((content, finish, usage, loose.model))
}

#[async_trait]
impl ProviderAdapter for OpenAIAdapter {
    fn kind(&self) -> ProviderKind {
        self.provider()
    }

    async fn generate_response(
        &self,
        model: &str,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<ProviderResponse> {
        let body = self.build_request(model, messages, params, false).await;
        let value: Value = send_json(self.provider(), self.post(&body)).await?;
        // OpenRouter can report upstream failures inside a 200 body
        if let Some(err) = value.get("error").filter(|e| !e.is_null()) {
            return Err(GatewayError::Upstream {
                provider: self.provider(),
                status: err.get("code").and_then(|c| c.as_u64()).unwrap_or(502) as u16,
                message: error_text(err),
            });
        }
        let (content, stop_reason, usage, upstream_model) = read_completion(value)?;
        Ok(ProviderResponse {
            content,
            model: upstream_model.unwrap_or_else(|| model.to_string()),
            provider: self.provider(),
            usage: usage.unwrap_or_default(),
            is_truncated: is_truncation(stop_reason.as_deref()),
            stop_reason,
        })
    }

    async fn generate_stream(
        &self,
        model: &str,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<ChunkStream> {
        let body = self.build_request(model, messages, params, true).await;
        let es = self
            .post(&body)
            .header("Accept", "text/event-stream")
            .eventsource()
            .map_err(|e| GatewayError::Stream(e.to_string()))?;
        Ok(drive_event_source(
            es,
            self.provider(),
            ChatChunkDecoder::default(),
        ))
    }
}

/// Chat Completions SSE chunks to canonical deltas.
#[derive(Debug, Default)]
pub(crate) struct ChatChunkDecoder {
    usage: Option<Usage>,
    finish_reason: Option<String>,
}

impl SseDecoder for ChatChunkDecoder {
    fn decode(&mut self, _event: &str, data: &str) -> Result<DecodeStep> {
        let value: Value = serde_json::from_str(data)?;
        if let Some(err) = value.get("error").filter(|e| !e.is_null()) {
            return Err(GatewayError::Stream(error_text(err)));
        }

        let mut step = DecodeStep::default();
        if let Ok(chunk) = serde_json::from_value::<ChatCompletionChunk>(value.clone()) {
            for choice in &chunk.choices {
                if let Some(text) = choice.delta.content.as_deref().filter(|t| !t.is_empty()) {
                    step.chunks.push(StreamChunk::delta(text));
                }
                if let Some(r) = choice.finish_reason {
                    self.finish_reason = Some(finish_reason_str(r).to_string());
                }
            }
            if let Some(u) = &chunk.usage {
                self.usage = Some(Usage::from(u));
            }
            return Ok(step);
        }

        // vendor extensions the typed chunk rejects
        let loose: LooseCompletion = serde_json::from_value(value)?;
        for choice in &loose.choices {
            if let Some(text) = choice
                .delta
                .as_ref()
                .and_then(|d| d.content.as_deref())
                .filter(|t| !t.is_empty())
            {
                step.chunks.push(StreamChunk::delta(text));
            }
            if let Some(r) = &choice.finish_reason {
                self.finish_reason = Some(r.clone());
            }
        }
        if let Some(u) = loose.usage {
            self.usage = Some(Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            });
        }
        Ok(step)
    }

    fn finish(&mut self) -> StreamChunk {
        let truncated = is_truncation(self.finish_reason.as_deref());
        StreamChunk::finished(self.usage, self.finish_reason.take(), truncated)
    }
}
