use axum::extract::Multipart;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64_STANDARD;
use serde::Deserialize;
use serde_json::Value;

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::providers::types::{
    ChatRequest, FileAttachment, FilePayload, FileWarning, GenerationParams, Message,
    ReasoningEffort, Role, Verbosity,
};
use crate::server::attachments::{decoded_len, normalize_mime};
use crate::server::token_model_limits::DEFAULT_MAX_TOKENS;

/// File as it appears inside a JSON message.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct WireFile {
    name: Option<String>,
    #[serde(rename = "type", alias = "mimeType", alias = "mime_type")]
    mime_type: Option<String>,
    size: Option<u64>,
    data: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct WireMessage {
    role: Role,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, alias = "attachments")]
    files: Vec<WireFile>,
}

/// Logical fields shared by both transports, before defaults are applied.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ChatFields {
    messages: Option<Value>,
    model: Option<String>,
    stream: Option<bool>,
    #[serde(alias = "extendedThinking")]
    extended_thinking: Option<bool>,
    #[serde(alias = "thinkingBudgetTokens")]
    thinking_budget_tokens: Option<u32>,
    #[serde(alias = "reasoningEffort")]
    reasoning_effort: Option<String>,
    #[serde(alias = "enableWebSearch")]
    enable_web_search: Option<bool>,
    verbosity: Option<String>,
    #[serde(alias = "systemInstruction", alias = "system_prompt")]
    system_instruction: Option<String>,
    temperature: Option<f32>,
}

/// Turns either transport encoding into one canonical [`ChatRequest`].
#[derive(Debug, Clone)]
pub struct RequestNormalizer {
    defaults: GatewayConfig,
}

impl RequestNormalizer {
    pub fn new(defaults: GatewayConfig) -> Self {
        Self { defaults }
    }

    /// `application/json` body; files are inlined per message.
    pub fn from_json(&self, body: &[u8]) -> Result<ChatRequest> {
        let fields: ChatFields = serde_json::from_slice(body)
            .map_err(|e| GatewayError::MalformedRequest(format!("Invalid JSON body: {}", e)))?;
        self.build(fields, Vec::new())
    }

    /// `multipart/form-data` body; `messages` is a JSON string and `file_*` parts carry bytes.
    pub async fn from_multipart(&self, mut multipart: Multipart) -> Result<ChatRequest> {
        let mut fields = ChatFields::default();
        let mut uploads = Vec::new();

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            if name.starts_with("file") {
                let file_name = field
                    .file_name()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| name.clone());
                let declared = field.content_type().map(|s| s.to_string());
                let bytes = field.bytes().await?;
                uploads.push(FileAttachment {
                    mime_type: normalize_mime(declared.as_deref(), &file_name),
                    name: file_name,
                    size: bytes.len() as u64,
                    payload: FilePayload::Inline(B64_STANDARD.encode(&bytes)),
                });
                continue;
            }

            let text = field.text().await?;
            match name.as_str() {
                "messages" => {
                    let parsed = serde_json::from_str::<Value>(&text).map_err(|e| {
                        GatewayError::MalformedRequest(format!("messages is not valid JSON: {}", e))
                    })?;
                    fields.messages = Some(parsed);
                }
                "model" => fields.model = Some(text),
                "stream" => fields.stream = parse_flag(&text),
                "extended_thinking" => fields.extended_thinking = parse_flag(&text),
                "thinking_budget_tokens" => fields.thinking_budget_tokens = text.trim().parse().ok(),
                "reasoning_effort" => fields.reasoning_effort = Some(text),
                "enable_web_search" => fields.enable_web_search = parse_flag(&text),
                "verbosity" => fields.verbosity = Some(text),
                "system_instruction" => fields.system_instruction = Some(text),
                "temperature" => fields.temperature = text.trim().parse().ok(),
                other => tracing::debug!("ignoring multipart field {}", other),
            }
        }

        self.build(fields, uploads)
    }

    fn build(&self, fields: ChatFields, uploads: Vec<FileAttachment>) -> Result<ChatRequest> {
        let raw_messages = match fields.messages {
            Some(Value::Array(items)) => items,
            Some(_) => {
                return Err(GatewayError::MalformedRequest(
                    "messages must be an array".into(),
                ));
            }
            None => return Err(GatewayError::MalformedRequest("messages is required".into())),
        };
        if raw_messages.is_empty() {
            return Err(GatewayError::MalformedRequest(
                "messages must not be empty".into(),
            ));
        }

        let mut messages = Vec::with_capacity(raw_messages.len());
        for raw in raw_messages {
            let wire: WireMessage = serde_json::from_value(raw)
                .map_err(|e| GatewayError::MalformedRequest(format!("invalid message: {}", e)))?;
            messages.push(Message {
                role: wire.role,
                content: wire.content.unwrap_or_default(),
                files: wire.files.into_iter().map(attachment_from_wire).collect(),
            });
        }

        let model = fields
            .model
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.defaults.default_model.clone());

        let mut params = GenerationParams {
            temperature: fields.temperature.unwrap_or(self.defaults.default_temperature),
            max_tokens: DEFAULT_MAX_TOKENS,
            extended_thinking: fields.extended_thinking.unwrap_or(false),
            thinking_budget_tokens: fields
                .thinking_budget_tokens
                .unwrap_or(self.defaults.default_thinking_budget_tokens),
            reasoning_effort: parse_enum::<ReasoningEffort>("reasoning_effort", fields.reasoning_effort)?,
            verbosity: parse_enum::<Verbosity>("verbosity", fields.verbosity)?,
            enable_web_search: fields.enable_web_search.unwrap_or(false),
            system_prompt: fields
                .system_instruction
                .filter(|s| !s.trim().is_empty()),
        };
        params.enforce_thinking_temperature();

        let mut request = ChatRequest {
            messages,
            model,
            stream: fields.stream.unwrap_or(false),
            params,
            warnings: Vec::new(),
        };

        request.retain_only_last_user_files();
        if !uploads.is_empty() {
            match request.last_user_index() {
                Some(i) => request.messages[i].files.extend(uploads),
                None => {
                    tracing::warn!("{} uploaded file(s) ignored: no user message", uploads.len());
                    request.warnings.extend(uploads.into_iter().map(|f| {
                        FileWarning::new(f.name, "no user message to attach the file to")
                    }));
                }
            }
        }

        Ok(request)
    }
}

fn attachment_from_wire(file: WireFile) -> FileAttachment {
    let name = file.name.unwrap_or_else(|| "attachment".to_string());
    let (payload, data_url_mime) = match (file.data, file.url) {
        (Some(data), _) => {
            // tolerate `data:<mime>;base64,<payload>`
            match data.strip_prefix("data:").and_then(|rest| rest.split_once(',')) {
                Some((meta, b64)) => {
                    let mime = meta.split(';').next().map(|s| s.to_string());
                    (FilePayload::Inline(b64.to_string()), mime)
                }
                None => (FilePayload::Inline(data), None),
            }
        }
        (None, Some(url)) => (FilePayload::Url(url), None),
        (None, None) => (FilePayload::Inline(String::new()), None),
    };
    let declared = file.mime_type.or(data_url_mime);
    // inline bytes are measured, never taken from the client
    let size = match &payload {
        FilePayload::Inline(b64) => decoded_len(b64),
        FilePayload::Url(_) => file.size.unwrap_or(0),
    };
    FileAttachment {
        mime_type: normalize_mime(declared.as_deref(), &name),
        name,
        size,
        payload,
    }
}

fn parse_flag(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

fn parse_enum<T: serde::de::DeserializeOwned>(field: &str, raw: Option<String>) -> Result<Option<T>> {
    let Some(raw) = raw.map(|s| s.trim().to_ascii_lowercase()).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    serde_json::from_value(Value::String(raw.clone()))
        .map(Some)
        .map_err(|_| GatewayError::MalformedRequest(format!("invalid {}: '{}'", field, raw)))
}
