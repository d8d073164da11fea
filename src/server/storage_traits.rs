use async_trait::async_trait;
use axum::body::Bytes;

use crate::error::{GatewayError, Result};
use crate::providers::types::FileAttachment;
use crate::server::ssrf::validate_attachment_url;

/// Characters of extracted text folded into a prompt per file.
pub const MAX_EXTRACTED_CHARS: usize = 100_000;

// 对象存储抽象：把附件引用 URL 解析为字节
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn fetch(&self, url: &str, max_bytes: u64) -> Result<Bytes>;
}

// 文本提取抽象：供不支持原生文件输入的 Provider 使用
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, file: &FileAttachment, bytes: &[u8]) -> Option<String>;
}

/// Downloads references over plain HTTP(S) with the shared client.
pub struct HttpObjectStore {
    client: reqwest::Client,
    allow_private_hosts: bool,
}

impl HttpObjectStore {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            allow_private_hosts: false,
        }
    }

    /// Skip the internal-address guard, for object stores on a private network.
    pub fn allow_private_hosts(mut self, allow: bool) -> Self {
        self.allow_private_hosts = allow;
        self
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn fetch(&self, url: &str, max_bytes: u64) -> Result<Bytes> {
        if !self.allow_private_hosts {
            validate_attachment_url(url).await?;
        }
        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(GatewayError::Attachment(format!(
                "fetch returned status {}",
                resp.status()
            )));
        }
        if resp.content_length().is_some_and(|len| len > max_bytes) {
            return Err(GatewayError::Attachment("remote file exceeds size cap".into()));
        }
        let bytes = resp.bytes().await?;
        if bytes.len() as u64 > max_bytes {
            return Err(GatewayError::Attachment("remote file exceeds size cap".into()));
        }
        Ok(bytes)
    }
}

/// UTF-8 decoding for text-like types; binary office formats and images yield nothing.
pub struct PlainTextExtractor;

fn is_text_like(mime: &str) -> bool {
    mime.starts_with("text/") || mime == "application/json" || mime == "application/xml"
}

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract(&self, file: &FileAttachment, bytes: &[u8]) -> Option<String> {
        if !is_text_like(&file.mime_type) || bytes.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(bytes);
        Some(text.chars().take(MAX_EXTRACTED_CHARS).collect())
    }
}
