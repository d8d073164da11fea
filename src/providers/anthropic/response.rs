use anthropic_ai_sdk::types::message::{
    ContentBlockDelta, StreamError, StreamUsage, Usage as MessageUsage,
};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{GatewayError, Result};
use crate::providers::is_truncation;
use crate::providers::streaming::{DecodeStep, SseDecoder};
use crate::providers::types::{StreamChunk, Usage};

/// Non-streaming reply. Blocks stay open-ended since web search adds
/// `server_tool_use` and `web_search_tool_result` entries.
#[derive(Debug, Deserialize)]
pub struct CreateMessageResponse {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub content: Vec<ResponseBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: Option<MessageUsage>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

impl From<&MessageUsage> for Usage {
    fn from(u: &MessageUsage) -> Self {
        Usage::new(u.input_tokens, u.output_tokens)
    }
}

impl CreateMessageResponse {
    /// Visible text only; thinking and tool blocks are dropped.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ResponseBlock::Text { text } => Some(text.as_str()),
                ResponseBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn token_usage(&self) -> Usage {
        self.usage.as_ref().map(Usage::from).unwrap_or_default()
    }
}

/// Messages API stream events to canonical chunks.
#[derive(Debug, Default)]
pub struct MessageStreamDecoder {
    input_tokens: u32,
    output_tokens: u32,
    stop_reason: Option<String>,
}

impl SseDecoder for MessageStreamDecoder {
    fn decode(&mut self, event: &str, data: &str) -> Result<DecodeStep> {
        let v: Value = serde_json::from_str(data)?;
        let kind = v.get("type").and_then(|t| t.as_str()).unwrap_or(event);
        match kind {
            "message_start" => {
                if let Ok(u) = serde_json::from_value::<MessageUsage>(v["message"]["usage"].clone()) {
                    self.input_tokens = u.input_tokens;
                    self.output_tokens = u.output_tokens;
                }
                Ok(DecodeStep::default())
            }
            "content_block_delta" => {
                // citations_delta and friends are not modelled; skip them
                match serde_json::from_value::<ContentBlockDelta>(v["delta"].clone()) {
                    Ok(ContentBlockDelta::TextDelta { text }) if !text.is_empty() => {
                        Ok(DecodeStep::chunk(StreamChunk::delta(text)))
                    }
                    _ => Ok(DecodeStep::default()),
                }
            }
            "message_delta" => {
                if let Some(reason) = v["delta"]["stop_reason"].as_str() {
                    self.stop_reason = Some(reason.to_string());
                }
                if let Ok(u) = serde_json::from_value::<StreamUsage>(v["usage"].clone()) {
                    self.output_tokens = u.output_tokens;
                }
                Ok(DecodeStep::default())
            }
            "message_stop" => Ok(DecodeStep::done()),
            "error" => {
                let message = serde_json::from_value::<StreamError>(v["error"].clone())
                    .map(|e| e.message)
                    .unwrap_or_else(|_| "upstream stream error".to_string());
                Err(GatewayError::Stream(message))
            }
            // ping, content_block_start/stop
            _ => Ok(DecodeStep::default()),
        }
    }

    fn finish(&mut self) -> StreamChunk {
        let usage = Usage::new(self.input_tokens, self.output_tokens);
        let truncated = is_truncation(self.stop_reason.as_deref());
        StreamChunk::finished(Some(usage), self.stop_reason.take(), truncated)
    }
}
