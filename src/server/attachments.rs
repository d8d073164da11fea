use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64_STANDARD;

use crate::config::AttachmentLimits;
use crate::providers::types::{FileAttachment, FilePayload, FileWarning};
use crate::server::storage_traits::ObjectStore;

const MIB: u64 = 1024 * 1024;

/// MIME types accepted for generation. Everything else is dropped with a warning.
pub const ALLOWED_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "application/pdf",
    "text/plain",
    "text/markdown",
    "text/csv",
    "text/html",
    "application/json",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
];

pub fn is_allowed_mime(mime: &str) -> bool {
    ALLOWED_MIME_TYPES.contains(&mime)
}

/// Lower-cases, strips parameters, fixes `image/jpg`; a missing or generic type is guessed from
/// the file extension.
pub fn normalize_mime(declared: Option<&str>, file_name: &str) -> String {
    let cleaned = declared
        .and_then(|m| m.split(';').next())
        .map(|m| m.trim().to_ascii_lowercase())
        .unwrap_or_default();
    let cleaned = match cleaned.as_str() {
        "image/jpg" | "image/pjpeg" => "image/jpeg".to_string(),
        "text/x-markdown" => "text/markdown".to_string(),
        _ => cleaned,
    };
    if cleaned.is_empty() || cleaned == "application/octet-stream" {
        if let Some(guess) = mime_guess::from_path(file_name).first() {
            return guess.essence_str().to_string();
        }
        return "application/octet-stream".to_string();
    }
    cleaned
}

/// Decoded length of a standard base64 payload, without decoding it.
pub fn decoded_len(b64: &str) -> u64 {
    let trimmed = b64.trim_end();
    let padding = trimmed.bytes().rev().take_while(|b| *b == b'=').count() as u64;
    let len = trimmed.len() as u64;
    (len / 4) * 3 + match len % 4 {
        2 => 1,
        3 => 2,
        _ => 0,
    } - padding.min((len / 4) * 3)
}

fn format_mb(bytes: u64) -> String {
    let mb = bytes as f64 / MIB as f64;
    if mb.fract() == 0.0 {
        format!("{:.0}", mb)
    } else {
        format!("{:.1}", mb)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub files: Vec<FileAttachment>,
    pub warnings: Vec<FileWarning>,
}

/// Count, size and type policy for the files of one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentPolicy {
    pub max_file_bytes: u64,
    pub max_files: usize,
    pub max_total_bytes: u64,
}

impl Default for AttachmentPolicy {
    fn default() -> Self {
        AttachmentLimits::default().into()
    }
}

impl From<AttachmentLimits> for AttachmentPolicy {
    fn from(l: AttachmentLimits) -> Self {
        Self {
            max_file_bytes: l.max_file_bytes,
            max_files: l.max_files,
            max_total_bytes: l.max_total_bytes,
        }
    }
}

impl AttachmentPolicy {
    fn per_file_rejection(&self, file: &FileAttachment) -> Option<String> {
        // a remote file may not know its size until fetched
        if file.size == 0 && matches!(file.payload, FilePayload::Inline(_)) {
            return Some("File is empty".to_string());
        }
        if file.size > self.max_file_bytes {
            return Some(format!(
                "File size ({} MB) exceeds the maximum of {} MB per file",
                format_mb(file.size),
                format_mb(self.max_file_bytes)
            ));
        }
        if !is_allowed_mime(&file.mime_type) {
            return Some(format!("File type '{}' is not supported", file.mime_type));
        }
        None
    }

    /// Per-file policy, then count cap, then aggregate size cap. Order-preserving and idempotent.
    pub fn validate(&self, files: Vec<FileAttachment>) -> ValidationOutcome {
        let mut warnings = Vec::new();

        let mut survivors: Vec<FileAttachment> = Vec::with_capacity(files.len());
        for file in files {
            match self.per_file_rejection(&file) {
                Some(reason) => warnings.push(FileWarning::new(&file.name, reason)),
                None => survivors.push(file),
            }
        }

        if survivors.len() > self.max_files {
            let dropped = survivors.len() - self.max_files;
            survivors.truncate(self.max_files);
            warnings.push(FileWarning::new(
                format!("{} file(s)", dropped),
                format!(
                    "{} file(s) exceeded the limit of {} files per message and were skipped",
                    dropped, self.max_files
                ),
            ));
        }

        let mut total: u64 = 0;
        let mut kept = Vec::with_capacity(survivors.len());
        for file in survivors {
            if total + file.size <= self.max_total_bytes {
                total += file.size;
                kept.push(file);
            } else {
                warnings.push(FileWarning::new(
                    &file.name,
                    format!(
                        "Adding this file would exceed the total size limit of {} MB",
                        format_mb(self.max_total_bytes)
                    ),
                ));
            }
        }

        ValidationOutcome {
            files: kept,
            warnings,
        }
    }

    /// Fetches referenced files and inlines them. Failed fetches are dropped with a warning; the
    /// result is validated again so the now-known sizes are held to the same caps.
    pub async fn resolve_remote(
        &self,
        files: Vec<FileAttachment>,
        store: &dyn ObjectStore,
    ) -> ValidationOutcome {
        if files
            .iter()
            .all(|f| matches!(f.payload, FilePayload::Inline(_)))
        {
            return ValidationOutcome {
                files,
                warnings: Vec::new(),
            };
        }

        let mut warnings = Vec::new();
        let mut resolved = Vec::with_capacity(files.len());
        for mut file in files {
            let FilePayload::Url(url) = &file.payload else {
                resolved.push(file);
                continue;
            };
            match store.fetch(url, self.max_file_bytes).await {
                Ok(bytes) => {
                    file.size = bytes.len() as u64;
                    file.payload = FilePayload::Inline(B64_STANDARD.encode(&bytes));
                    resolved.push(file);
                }
                Err(e) => {
                    tracing::warn!("failed to fetch attachment {}: {}", file.name, e);
                    warnings.push(FileWarning::new(
                        &file.name,
                        "File could not be retrieved from storage",
                    ));
                }
            }
        }

        let mut outcome = self.validate(resolved);
        warnings.append(&mut outcome.warnings);
        outcome.warnings = warnings;
        outcome
    }
}
