pub mod anthropic;
pub mod google;
pub mod openai;
pub mod openrouter;
pub mod streaming;
pub mod types;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64_STANDARD;
use serde::de::DeserializeOwned;

use crate::config::ProviderKind;
use crate::error::{GatewayError, Result};
use crate::server::storage_traits::TextExtractor;
use crate::server::util::upstream_error_message;

pub use anthropic::AnthropicAdapter;
pub use google::GoogleAdapter;
pub use openai::OpenAIAdapter;
pub use openrouter::OpenRouterAdapter;
pub use streaming::ChunkStream;
pub use types::{GenerationParams, Message, ProviderResponse};

/// Uniform generate/stream contract implemented once per provider.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn generate_response(
        &self,
        model: &str,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<ProviderResponse>;

    async fn generate_stream(
        &self,
        model: &str,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<ChunkStream>;
}

/// Sends a prepared request and decodes a 2xx JSON body; anything else becomes `Upstream`.
pub(crate) async fn send_json<T: DeserializeOwned>(
    provider: ProviderKind,
    request: reqwest::RequestBuilder,
) -> Result<T> {
    let resp = request.send().await?;
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        return Err(GatewayError::Upstream {
            provider,
            status: status.as_u16(),
            message: upstream_error_message(&body),
        });
    }
    Ok(serde_json::from_str(&body)?)
}

/// Whether a native stop reason means the output ceiling was hit.
pub(crate) fn is_truncation(stop_reason: Option<&str>) -> bool {
    stop_reason.is_some_and(|r| {
        let r = r.to_ascii_lowercase();
        r == "length" || r == "max_tokens"
    })
}

/// Text note for a file the provider cannot read natively.
pub(crate) async fn folded_file_text(
    extractor: &dyn TextExtractor,
    file: &types::FileAttachment,
) -> String {
    let bytes = file
        .inline_data()
        .and_then(|b64| B64_STANDARD.decode(b64).ok());
    let extracted = match &bytes {
        Some(b) => extractor.extract(file, b).await,
        None => None,
    };
    match extracted {
        Some(text) => format!("[Attached file: {}]\n{}\n[End of file: {}]", file.name, text, file.name),
        None => format!(
            "[Attached file: {} ({}) could not be converted to text]",
            file.name, file.mime_type
        ),
    }
}

/// Message text with the notes of any non-native files appended.
pub(crate) async fn text_with_folded_files(
    extractor: &dyn TextExtractor,
    content: &str,
    files: &[&types::FileAttachment],
) -> String {
    let mut out = content.to_string();
    for file in files.iter().copied() {
        let note = folded_file_text(extractor, file).await;
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(&note);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::types::{FileAttachment, FilePayload};
    use crate::server::storage_traits::PlainTextExtractor;

    #[tokio::test]
    async fn folds_text_and_placeholder_notes() {
        let csv = FileAttachment {
            name: "data.csv".into(),
            mime_type: "text/csv".into(),
            size: 7,
            payload: FilePayload::Inline(B64_STANDARD.encode("a,b\n1,2")),
        };
        let docx = FileAttachment {
            name: "notes.docx".into(),
            mime_type: "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
                .into(),
            size: 4,
            payload: FilePayload::Inline(B64_STANDARD.encode("PK..")),
        };
        let out = text_with_folded_files(&PlainTextExtractor, "Summarise", &[&csv, &docx]).await;
        assert!(out.starts_with("Summarise\n\n[Attached file: data.csv]\na,b\n1,2"));
        assert!(out.contains("[Attached file: notes.docx ("));
        assert!(out.ends_with("could not be converted to text]"));
    }
}
