use anthropic_ai_sdk::types::message::{ImageSource, Thinking, ThinkingType};
use serde::Serialize;
use serde_json::{Value, json};

use crate::providers::text_with_folded_files;
use crate::providers::types::{FileAttachment, GenerationParams, Message, Role};
use crate::server::storage_traits::TextExtractor;
use crate::server::token_model_limits::canonical_model_id;

/// Smallest thinking budget the Messages API accepts.
pub const MIN_THINKING_BUDGET: u32 = 1024;

/// Request body. The SDK's own params type has no room for server tools, so only
/// its leaf types are reused here.
#[derive(Debug, Serialize)]
pub struct CreateMessageParams {
    pub model: String,
    pub max_tokens: u32,
    pub messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<Thinking>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnthropicMessage {
    pub role: &'static str,
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Image { source: ImageSource },
    Document {
        source: ImageSource,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
}

// documents use the same base64 source shape as images
fn base64_source(file: &FileAttachment) -> Option<ImageSource> {
    file.inline_data().map(|data| ImageSource {
        type_: "base64".to_string(),
        media_type: file.mime_type.clone(),
        data: data.to_string(),
    })
}

/// Families that accept a `thinking` block; 3.5 and older reject it.
const THINKING_FAMILIES: [&str; 4] = ["claude-3-7", "sonnet-4", "opus-4", "haiku-4"];

pub fn supports_thinking(model: &str) -> bool {
    let id = canonical_model_id(model);
    THINKING_FAMILIES.iter().any(|f| id.contains(f))
}

/// Thinking budget kept strictly below `max_tokens`; `None` when no valid budget fits.
pub fn thinking_budget(params: &GenerationParams) -> Option<u32> {
    if !params.extended_thinking {
        return None;
    }
    let ceiling = params.max_tokens.saturating_sub(1);
    let budget = params.thinking_budget_tokens.max(MIN_THINKING_BUDGET).min(ceiling);
    (budget >= MIN_THINKING_BUDGET).then_some(budget)
}

fn is_native(file: &FileAttachment) -> bool {
    file.inline_data().is_some()
        && (matches!(
            file.mime_type.as_str(),
            "image/jpeg" | "image/png" | "image/gif" | "image/webp"
        ) || file.is_pdf())
}

async fn user_blocks(extractor: &dyn TextExtractor, message: &Message) -> Vec<ContentBlock> {
    let mut blocks = Vec::new();
    for file in message.files.iter().filter(|f| is_native(f)) {
        let Some(source) = base64_source(file) else { continue };
        if file.is_pdf() {
            blocks.push(ContentBlock::Document {
                source,
                title: Some(file.name.clone()),
            });
        } else {
            blocks.push(ContentBlock::Image { source });
        }
    }
    let folded: Vec<&FileAttachment> =
        message.files.iter().filter(|f| !is_native(f)).collect();
    let text = text_with_folded_files(extractor, &message.content, &folded).await;
    if !text.trim().is_empty() {
        blocks.push(ContentBlock::Text { text });
    }
    blocks
}

/// Canonical conversation to a Messages API request.
///
/// System turns move into `system`; consecutive same-role turns are merged because the API
/// requires strict alternation.
pub async fn build_create_message(
    extractor: &dyn TextExtractor,
    model: &str,
    messages: &[Message],
    params: &GenerationParams,
    stream: bool,
) -> CreateMessageParams {
    let mut system_parts: Vec<String> = params.system_prompt.iter().cloned().collect();
    let mut mapped: Vec<AnthropicMessage> = Vec::with_capacity(messages.len());

    for m in messages {
        let (role, blocks) = match m.role {
            Role::System => {
                if !m.content.trim().is_empty() {
                    system_parts.push(m.content.clone());
                }
                continue;
            }
            Role::User => ("user", user_blocks(extractor, m).await),
            Role::Assistant if m.content.trim().is_empty() => continue,
            Role::Assistant => (
                "assistant",
                vec![ContentBlock::Text {
                    text: m.content.clone(),
                }],
            ),
        };
        if blocks.is_empty() {
            continue;
        }
        match mapped.last_mut() {
            Some(prev) if prev.role == role => prev.content.extend(blocks),
            _ => mapped.push(AnthropicMessage {
                role,
                content: blocks,
            }),
        }
    }

    let thinking = supports_thinking(model)
        .then(|| thinking_budget(params))
        .flatten()
        .map(|budget| Thinking {
            budget_tokens: budget as usize,
            type_: ThinkingType::Enabled,
        });
    let temperature = if thinking.is_some() {
        1.0
    } else {
        params.temperature.clamp(0.0, 1.0)
    };
    let tools = params.enable_web_search.then(|| {
        vec![json!({
            "type": "web_search_20250305",
            "name": "web_search",
            "max_uses": 5
        })]
    });

    CreateMessageParams {
        model: model.to_string(),
        max_tokens: params.max_tokens,
        messages: mapped,
        system: (!system_parts.is_empty()).then(|| system_parts.join("\n\n")),
        temperature: Some(temperature),
        thinking,
        tools,
        stream: stream.then_some(true),
    }
}
