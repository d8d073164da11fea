//! Gemini via Google AI Studio (`generativelanguage.googleapis.com`).
//!
//! - sync: `models/{model}:generateContent`
//! - stream: `models/{model}:streamGenerateContent?alt=sse`

use std::sync::Arc;

use async_trait::async_trait;
use reqwest_eventsource::RequestBuilderExt;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::ProviderKind;
use crate::error::{GatewayError, Result};
use crate::providers::streaming::{ChunkStream, DecodeStep, SseDecoder, drive_event_source};
use crate::providers::types::{
    FileAttachment, GenerationParams, Message, ProviderResponse, Role, StreamChunk, Usage,
};
use crate::providers::{ProviderAdapter, is_truncation, send_json, text_with_folded_files};
use crate::server::storage_traits::TextExtractor;

/// Upper bound Gemini 2.5 accepts for `thinkingBudget`.
const MAX_THINKING_BUDGET: u32 = 32_768;

pub struct GoogleAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    extractor: Arc<dyn TextExtractor>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GoogleRequest {
    contents: Vec<GoogleContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GoogleContent>,
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Serialize)]
struct GoogleContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<GooglePart>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum GooglePart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking_config: Option<ThinkingConfig>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    thinking_budget: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct GoogleResponse {
    candidates: Vec<GoogleCandidate>,
    usage_metadata: Option<GoogleUsageMetadata>,
    model_version: Option<String>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct GoogleCandidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct CandidateContent {
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ResponsePart {
    text: Option<String>,
    thought: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct GoogleUsageMetadata {
    prompt_token_count: u32,
    candidates_token_count: u32,
    thoughts_token_count: u32,
    total_token_count: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl From<GoogleUsageMetadata> for Usage {
    fn from(u: GoogleUsageMetadata) -> Self {
        let completion = u.candidates_token_count.saturating_add(u.thoughts_token_count);
        Usage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: completion,
            total_tokens: if u.total_token_count > 0 {
                u.total_token_count
            } else {
                u.prompt_token_count.saturating_add(completion)
            },
        }
    }
}

impl GoogleResponse {
    /// Answer text of the first candidate; thought parts excluded.
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| {
                c.parts
                    .iter()
                    .filter(|p| p.thought != Some(true))
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
    }

    fn finish_reason(&self) -> Option<String> {
        self.candidates.first().and_then(|c| c.finish_reason.clone())
    }

    fn blocked(&self) -> Option<GatewayError> {
        let reason = self.prompt_feedback.as_ref()?.block_reason.as_ref()?;
        self.candidates.is_empty().then(|| GatewayError::Upstream {
            provider: ProviderKind::Google,
            status: 400,
            message: format!("Prompt blocked by safety filters: {}", reason),
        })
    }
}

fn is_native(file: &FileAttachment) -> bool {
    file.inline_data().is_some()
        && (file.is_image() || file.is_pdf() || file.mime_type == "text/plain")
}

impl GoogleAdapter {
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

    fn endpoint_url(&self, model: &str, streaming: bool) -> String {
        let base = self.base_url.trim_end_matches('/');
        if streaming {
            format!("{}/models/{}:streamGenerateContent?alt=sse", base, model)
        } else {
            format!("{}/models/{}:generateContent", base, model)
        }
    }

    fn post(&self, model: &str, streaming: bool, body: &GoogleRequest) -> reqwest::RequestBuilder {
        self.client
            .post(self.endpoint_url(model, streaming))
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(body)
    }

    async fn transform_request(
        &self,
        model: &str,
        messages: &[Message],
        params: &GenerationParams,
    ) -> GoogleRequest {
        let mut system_texts: Vec<String> = params.system_prompt.iter().cloned().collect();
        let mut contents = Vec::with_capacity(messages.len());

        for m in messages {
            let role = match m.role {
                Role::System => {
                    if !m.content.trim().is_empty() {
                        system_texts.push(m.content.clone());
                    }
                    continue;
                }
                Role::User => "user",
                Role::Assistant => "model",
            };
            let mut parts = Vec::new();
            let folded: Vec<&FileAttachment> =
                m.files.iter().filter(|f| !is_native(f)).collect();
            let text = text_with_folded_files(self.extractor.as_ref(), &m.content, &folded).await;
            if !text.is_empty() {
                parts.push(GooglePart::Text { text });
            }
            for file in m.files.iter().filter(|f| is_native(f)) {
                if let Some(data) = file.inline_data() {
                    parts.push(GooglePart::InlineData {
                        inline_data: InlineData {
                            mime_type: file.mime_type.clone(),
                            data: data.to_string(),
                        },
                    });
                }
            }
            if !parts.is_empty() {
                contents.push(GoogleContent {
                    role: Some(role),
                    parts,
                });
            }
        }

        let thinking_config = (params.extended_thinking && model.contains("2.5")).then(|| {
            ThinkingConfig {
                thinking_budget: params.thinking_budget_tokens.min(MAX_THINKING_BUDGET),
            }
        });

        GoogleRequest {
            contents,
            system_instruction: (!system_texts.is_empty()).then(|| GoogleContent {
                role: None,
                parts: vec![GooglePart::Text {
                    text: system_texts.join("\n\n"),
                }],
            }),
            generation_config: GenerationConfig {
                temperature: params.temperature,
                max_output_tokens: params.max_tokens,
                thinking_config,
            },
            tools: params
                .enable_web_search
                .then(|| vec![json!({ "google_search": {} })]),
        }
    }
}

#[async_trait]
impl ProviderAdapter for GoogleAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    async fn generate_response(
        &self,
        model: &str,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<ProviderResponse> {
        let body = self.transform_request(model, messages, params).await;
        let resp: GoogleResponse = send_json(ProviderKind::Google, self.post(model, false, &body)).await?;
        if let Some(err) = resp.blocked() {
            return Err(err);
        }
        let stop_reason = resp.finish_reason();
        Ok(ProviderResponse {
            content: resp.text(),
            model: resp.model_version.clone().unwrap_or_else(|| model.to_string()),
            provider: ProviderKind::Google,
            usage: resp.usage_metadata.map(Usage::from).unwrap_or_default(),
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
        let body = self.transform_request(model, messages, params).await;
        let es = self
            .post(model, true, &body)
            .eventsource()
            .map_err(|e| GatewayError::Stream(e.to_string()))?;
        Ok(drive_event_source(
            es,
            ProviderKind::Google,
            GeminiStreamDecoder::default(),
        ))
    }
}

#[derive(Debug, Default)]
struct GeminiStreamDecoder {
    usage: Option<Usage>,
    finish_reason: Option<String>,
}

impl SseDecoder for GeminiStreamDecoder {
    fn decode(&mut self, _event: &str, data: &str) -> Result<DecodeStep> {
        let value: Value = serde_json::from_str(data)?;
        if let Some(err) = value.get("error") {
            let message = err["message"].as_str().unwrap_or("upstream stream error");
            return Err(GatewayError::Stream(message.to_string()));
        }
        let resp: GoogleResponse = serde_json::from_value(value)?;
        if let Some(err) = resp.blocked() {
            return Err(err);
        }
        if let Some(u) = resp.usage_metadata {
            self.usage = Some(u.into());
        }
        if let Some(r) = resp.finish_reason() {
            self.finish_reason = Some(r);
        }
        let text = resp.text();
        if text.is_empty() {
            Ok(DecodeStep::default())
        } else {
            Ok(DecodeStep::chunk(StreamChunk::delta(text)))
        }
    }

    fn finish(&mut self) -> StreamChunk {
        let truncated = is_truncation(self.finish_reason.as_deref());
        StreamChunk::finished(self.usage, self.finish_reason.take(), truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::types::FilePayload;
    use crate::server::storage_traits::PlainTextExtractor;
    use futures_util::StreamExt;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(base: &str) -> GoogleAdapter {
        GoogleAdapter::new(reqwest::Client::new(), base, "g-key", Arc::new(PlainTextExtractor))
    }

    #[test]
    fn endpoint_urls() {
        let a = adapter("https://generativelanguage.googleapis.com/v1beta/");
        assert_eq!(
            a.endpoint_url("gemini-2.5-pro", false),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-pro:generateContent"
        );
        assert!(a.endpoint_url("gemini-2.5-pro", true).ends_with(":streamGenerateContent?alt=sse"));
    }

    #[test]
    fn usage_metadata_saturates() {
        let u: Usage = GoogleUsageMetadata {
            prompt_token_count: u32::MAX - 1,
            candidates_token_count: u32::MAX,
            thoughts_token_count: 5,
            total_token_count: 0,
        }
        .into();
        assert_eq!(u.completion_tokens, u32::MAX);
        assert_eq!(u.total_tokens, u32::MAX);
    }

    #[tokio::test]
    async fn request_shape() {
        let mut user = Message::text(Role::User, "describe");
        user.files.push(FileAttachment {
            name: "a.png".into(),
            mime_type: "image/png".into(),
            size: 3,
            payload: FilePayload::Inline("YWJj".into()),
        });
        let messages = vec![
            Message::text(Role::System, "sys"),
            user,
            Message::text(Role::Assistant, "ok"),
        ];
        let params = GenerationParams {
            extended_thinking: true,
            thinking_budget_tokens: 50_000,
            max_tokens: 65_536,
            temperature: 1.0,
            enable_web_search: true,
            ..Default::default()
        };
        let req = adapter("http://x").transform_request("gemini-2.5-flash", &messages, &params).await;
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["systemInstruction"]["parts"][0]["text"], "sys");
        assert_eq!(v["contents"][0]["role"], "user");
        assert_eq!(v["contents"][0]["parts"][1]["inlineData"]["mimeType"], "image/png");
        assert_eq!(v["contents"][1]["role"], "model");
        assert_eq!(v["generationConfig"]["maxOutputTokens"], 65_536);
        assert_eq!(v["generationConfig"]["thinkingConfig"]["thinkingBudget"], 32_768);
        assert!(v["tools"][0].get("google_search").is_some());
    }

    #[tokio::test]
    async fn sync_generation_excludes_thoughts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-2.5-pro:generateContent"))
            .and(header("x-goog-api-key", "g-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": {"role": "model", "parts": [
                        {"text": "thinking...", "thought": true},
                        {"text": "Answer"}
                    ]},
                    "finishReason": "MAX_TOKENS"
                }],
                "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 4, "thoughtsTokenCount": 5, "totalTokenCount": 12},
                "modelVersion": "gemini-2.5-pro"
            })))
            .mount(&server)
            .await;
        let resp = adapter(&server.uri())
            .generate_response("gemini-2.5-pro", &[Message::text(Role::User, "q")], &GenerationParams::default())
            .await
            .unwrap();
        assert_eq!(resp.content, "Answer");
        assert!(resp.is_truncated);
        assert_eq!(resp.stop_reason.as_deref(), Some("MAX_TOKENS"));
        assert_eq!(resp.usage, Usage { prompt_tokens: 3, completion_tokens: 9, total_tokens: 12 });
    }

    #[tokio::test]
    async fn blocked_prompt_is_content_policy() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "promptFeedback": {"blockReason": "SAFETY"}
            })))
            .mount(&server)
            .await;
        let err = adapter(&server.uri())
            .generate_response("gemini-2.0-flash", &[Message::text(Role::User, "q")], &GenerationParams::default())
            .await
            .unwrap_err();
        assert_eq!(
            err.category(),
            crate::server::error_classifier::ErrorCategory::ContentPolicy
        );
    }

    #[tokio::test]
    async fn stream_ends_on_clean_close() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hi \"}]}}]}\n\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"there\"}]},\"finishReason\":\"STOP\"}],\"usageMetadata\":{\"promptTokenCount\":2,\"candidatesTokenCount\":2,\"totalTokenCount\":4}}\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/models/gemini-2.0-flash:streamGenerateContent"))
            .and(query_param("alt", "sse"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;
        let chunks: Vec<_> = adapter(&server.uri())
            .generate_stream("gemini-2.0-flash", &[Message::text(Role::User, "q")], &GenerationParams::default())
            .await
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].content_delta, "there");
        assert!(chunks[2].is_complete);
        assert_eq!(chunks[2].usage.map(|u| u.total_tokens), Some(4));
        assert_eq!(chunks[2].stop_reason.as_deref(), Some("STOP"));
    }
}
