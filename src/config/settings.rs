use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{GatewayError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub gateway: GatewayConfig,
    pub attachments: AttachmentLimits,
    pub providers: HashMap<String, Provider>,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    #[serde(default)]
    pub name: String,
    pub api_type: ProviderKind,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_keys: Vec<String>,
    /// 当 api_keys 为空时读取的环境变量名
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Provider {
    /// First usable key: configured list first, then the named (or conventional) env var.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(k) = self.api_keys.iter().find(|k| !k.trim().is_empty()) {
            return Some(k.clone());
        }
        let var = self
            .api_key_env
            .as_deref()
            .unwrap_or(self.api_type.api_key_env());
        std::env::var(var).ok().filter(|v| !v.trim().is_empty())
    }

    pub fn effective_base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| self.api_type.default_base_url().to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAI,
    Anthropic,
    Google,
    OpenRouter,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::OpenAI,
        ProviderKind::Anthropic,
        ProviderKind::Google,
        ProviderKind::OpenRouter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAI => "openai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
            Self::OpenRouter => "openrouter",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAI => "https://api.openai.com",
            Self::Anthropic => "https://api.anthropic.com",
            Self::Google => "https://generativelanguage.googleapis.com/v1beta",
            Self::OpenRouter => "https://openrouter.ai/api",
        }
    }

    pub fn api_key_env(&self) -> &'static str {
        match self {
            Self::OpenAI => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::Google => "GEMINI_API_KEY",
            Self::OpenRouter => "OPENROUTER_API_KEY",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["http://localhost:3000".to_string()],
            max_body_bytes: 100 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub default_provider: ProviderKind,
    pub default_model: String,
    pub heartbeat_secs: u64,
    pub default_temperature: f32,
    pub default_thinking_budget_tokens: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            default_provider: ProviderKind::OpenAI,
            default_model: "gpt-5".to_string(),
            heartbeat_secs: 20,
            default_temperature: 0.7,
            default_thinking_budget_tokens: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachmentLimits {
    pub max_file_bytes: u64,
    pub max_files: usize,
    pub max_total_bytes: u64,
    /// Let attachment URLs point at loopback or private addresses.
    pub allow_private_urls: bool,
}

impl Default for AttachmentLimits {
    fn default() -> Self {
        Self {
            max_file_bytes: 10 * 1024 * 1024,
            max_files: 10,
            max_total_bytes: 50 * 1024 * 1024,
            allow_private_urls: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub tokens: Vec<AuthToken>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthToken {
    pub token: String,
    pub user_id: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub professional_role: Option<String>,
}

fn default_role() -> String {
    "user".to_string()
}

impl Settings {
    pub fn load() -> Result<Self> {
        // .env 不存在时忽略
        let _ = dotenvy::dotenv();

        let mut settings = match Self::find_config_file() {
            Some(path) => {
                tracing::info!("Loading configuration from {}", path);
                Self::from_file(&path)?
            }
            None => {
                tracing::warn!("No config file found, using defaults and environment keys");
                Settings::default()
            }
        };
        settings.fill_provider_names();
        Ok(settings)
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let mut settings: Settings =
            toml::from_str(content).map_err(|e| GatewayError::Config(e.to_string()))?;
        settings.fill_provider_names();
        Ok(settings)
    }

    fn fill_provider_names(&mut self) {
        for (name, provider) in &mut self.providers {
            provider.name = name.clone();
        }
    }

    /// Provider section for a kind; when none is configured, a synthetic entry pointing at the
    /// public endpoint is returned so environment keys still work.
    pub fn provider_for_kind(&self, kind: ProviderKind) -> Provider {
        let mut configured: Vec<&Provider> = self
            .providers
            .values()
            .filter(|p| p.api_type == kind)
            .collect();
        configured.sort_by(|a, b| a.name.cmp(&b.name));
        match configured.first() {
            Some(p) => (*p).clone(),
            None => Provider {
                name: kind.as_str().to_string(),
                api_type: kind,
                base_url: None,
                api_keys: Vec::new(),
                api_key_env: None,
                timeout_secs: None,
            },
        }
    }

    fn find_config_file() -> Option<String> {
        let possible_names = ["custom-config.toml", "config.toml"];

        possible_names
            .iter()
            .find(|name| Path::new(name).exists())
            .map(|name| name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_gateway_limits() {
        let s = Settings::default();
        assert_eq!(s.server.port, 8000);
        assert_eq!(s.gateway.heartbeat_secs, 20);
        assert_eq!(s.attachments.max_files, 10);
        assert_eq!(s.attachments.max_file_bytes, 10 * 1024 * 1024);
        assert_eq!(s.attachments.max_total_bytes, 50 * 1024 * 1024);
    }

    #[test]
    fn parses_partial_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[server]
port = 9001
cors_origins = ["https://chat.example.com"]

[gateway]
default_provider = "anthropic"

[providers.claude]
api_type = "anthropic"
api_keys = ["sk-ant-test"]

[[auth.tokens]]
token = "t1"
user_id = "u1"
professional_role = "nurse"
"#
        )
        .unwrap();

        let s = Settings::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(s.server.port, 9001);
        assert_eq!(s.server.host, "0.0.0.0");
        assert_eq!(s.gateway.default_provider, ProviderKind::Anthropic);
        assert_eq!(s.gateway.default_model, "gpt-5");

        let p = s.provider_for_kind(ProviderKind::Anthropic);
        assert_eq!(p.name, "claude");
        assert_eq!(p.resolve_api_key().as_deref(), Some("sk-ant-test"));
        assert_eq!(p.effective_base_url(), "https://api.anthropic.com");

        assert_eq!(s.auth.tokens[0].role, "user");
        assert_eq!(s.auth.tokens[0].professional_role.as_deref(), Some("nurse"));
    }

    #[test]
    fn unknown_provider_kind_is_config_error() {
        let err = Settings::from_toml("[providers.x]\napi_type = \"zhipu\"\n").unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }

    #[test]
    fn missing_kind_yields_public_endpoint() {
        let s = Settings::default();
        let p = s.provider_for_kind(ProviderKind::OpenRouter);
        assert_eq!(p.effective_base_url(), "https://openrouter.ai/api");
        assert_eq!(p.api_type.api_key_env(), "OPENROUTER_API_KEY");
    }
}
