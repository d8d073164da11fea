use serde::{Deserialize, Serialize};

use crate::config::ProviderKind;

pub use async_openai::types::ReasoningEffort;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilePayload {
    /// base64, no `data:` prefix
    Inline(String),
    Url(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttachment {
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    pub payload: FilePayload,
}

impl FileAttachment {
    pub fn inline_data(&self) -> Option<&str> {
        match &self.payload {
            FilePayload::Inline(b64) => Some(b64),
            FilePayload::Url(_) => None,
        }
    }

    pub fn data_url(&self) -> Option<String> {
        self.inline_data()
            .map(|b64| format!("data:{};base64,{}", self.mime_type, b64))
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    pub fn is_pdf(&self) -> bool {
        self.mime_type == "application/pdf"
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub files: Vec<FileAttachment>,
}

impl Message {
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            files: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    /// Resolved by the budget calculator, never taken from the caller.
    pub max_tokens: u32,
    pub extended_thinking: bool,
    pub thinking_budget_tokens: u32,
    pub reasoning_effort: Option<ReasoningEffort>,
    pub verbosity: Option<Verbosity>,
    pub enable_web_search: bool,
    pub system_prompt: Option<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: crate::server::token_model_limits::DEFAULT_MAX_TOKENS,
            extended_thinking: false,
            thinking_budget_tokens: 0,
            reasoning_effort: None,
            verbosity: None,
            enable_web_search: false,
            system_prompt: None,
        }
    }
}

impl GenerationParams {
    /// Extended thinking requires temperature exactly 1.
    pub fn enforce_thinking_temperature(&mut self) {
        if self.extended_thinking {
            self.temperature = 1.0;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub model: String,
    pub stream: bool,
    pub params: GenerationParams,
    /// Files dropped while normalizing the request, reported back to the caller.
    pub warnings: Vec<FileWarning>,
}

impl ChatRequest {
    pub fn last_user_index(&self) -> Option<usize> {
        self.messages.iter().rposition(|m| m.role == Role::User)
    }

    /// Files eligible for generation: those on the chronologically last user message.
    pub fn eligible_files(&self) -> &[FileAttachment] {
        self.last_user_index()
            .map(|i| self.messages[i].files.as_slice())
            .unwrap_or(&[])
    }

    pub fn replace_eligible_files(&mut self, files: Vec<FileAttachment>) {
        if let Some(i) = self.last_user_index() {
            self.messages[i].files = files;
        }
    }

    /// Drops files from every message except the last user one.
    pub fn retain_only_last_user_files(&mut self) {
        let last = self.last_user_index();
        for (i, m) in self.messages.iter_mut().enumerate() {
            if Some(i) != last {
                m.files.clear();
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

impl From<&async_openai::types::CompletionUsage> for Usage {
    fn from(u: &async_openai::types::CompletionUsage) -> Self {
        Self {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderResponse {
    pub content: String,
    pub model: String,
    pub provider: ProviderKind,
    pub usage: Usage,
    pub is_truncated: bool,
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileWarning {
    pub file_name: String,
    pub reason: String,
}

impl FileWarning {
    pub fn new(file_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamChunk {
    pub content_delta: String,
    pub is_complete: bool,
    pub usage: Option<Usage>,
    pub is_truncated: Option<bool>,
    pub stop_reason: Option<String>,
    pub warnings: Option<Vec<FileWarning>>,
}

impl StreamChunk {
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            content_delta: text.into(),
            ..Default::default()
        }
    }

    pub fn finished(usage: Option<Usage>, stop_reason: Option<String>, is_truncated: bool) -> Self {
        Self {
            is_complete: true,
            usage,
            is_truncated: Some(is_truncated),
            stop_reason,
            ..Default::default()
        }
    }
}
