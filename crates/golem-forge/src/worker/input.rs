//! Worker inputs: prompt text plus attachments, and the attachment
//! policy enforcement that runs before any model call.

use crate::worker::definition::AttachmentPolicy;
use crate::{FileData, FilePart};
use base64::Engine;
use serde::{Deserialize, Serialize};

// ── Attachments ────────────────────────────────────────────────────

/// Attachment payload: text or raw bytes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttachmentData {
    Text(String),
    Binary(Vec<u8>),
}

/// A file attached to a worker input.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(default)]
    pub name: Option<String>,
    pub mime_type: String,
    pub data: AttachmentData,
}

impl Attachment {
    pub fn text(name: impl Into<String>, mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            mime_type: mime_type.into(),
            data: AttachmentData::Text(data.into()),
        }
    }

    pub fn binary(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            name: Some(name.into()),
            mime_type: mime_type.into(),
            data: AttachmentData::Binary(data),
        }
    }

    /// Payload size in bytes.
    pub fn byte_len(&self) -> u64 {
        match &self.data {
            AttachmentData::Text(s) => s.len() as u64,
            AttachmentData::Binary(b) => b.len() as u64,
        }
    }

    /// Lowercased file extension including the dot (e.g. `".txt"`), from
    /// the attachment name.
    pub fn suffix(&self) -> Option<String> {
        let name = self.name.as_deref()?;
        let dot = name.rfind('.')?;
        if dot == 0 || dot + 1 == name.len() {
            return None;
        }
        #[allow(clippy::string_slice)] // dot is a '.' boundary from rfind
        Some(name[dot..].to_lowercase())
    }

    /// Render as a typed file part for the initial user message.
    pub fn to_file_part(&self) -> FilePart {
        FilePart {
            name: self.name.clone(),
            mime_type: self.mime_type.clone(),
            data: match &self.data {
                AttachmentData::Text(s) => FileData::Text(s.clone()),
                AttachmentData::Binary(b) => {
                    FileData::Base64(base64::engine::general_purpose::STANDARD.encode(b))
                }
            },
        }
    }
}

// ── Input ──────────────────────────────────────────────────────────

/// Input to a worker run: plain text, optionally with attachments.
#[derive(Clone, Debug, Default)]
pub struct WorkerInput {
    pub content: String,
    pub attachments: Vec<Attachment>,
}

impl WorkerInput {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    /// Empty text and no attachments.
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty() && self.attachments.is_empty()
    }
}

impl From<&str> for WorkerInput {
    fn from(s: &str) -> Self {
        WorkerInput::new(s)
    }
}

impl From<String> for WorkerInput {
    fn from(s: String) -> Self {
        WorkerInput::new(s)
    }
}

// ── MIME heuristics ────────────────────────────────────────────────

/// Extension-based MIME detection — the single seam a content-sniffing
/// detector would replace.
pub fn mime_type_for_path(path: &str) -> &'static str {
    let ext = path
        .rsplit('.')
        .next()
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "json" => "application/json",
        "yaml" | "yml" => "application/yaml",
        "toml" => "application/toml",
        "xml" => "application/xml",
        "js" => "text/javascript",
        "rs" | "py" | "go" | "ts" | "sh" | "c" | "h" | "cpp" => "text/plain",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        _ => "application/octet-stream",
    }
}

/// Whether a MIME type carries text (read as a string) rather than bytes.
pub fn is_text_mime(mime: &str) -> bool {
    mime.starts_with("text/")
        || matches!(
            mime,
            "application/json"
                | "application/yaml"
                | "application/toml"
                | "application/xml"
                | "application/javascript"
        )
}

// ── Policy enforcement ─────────────────────────────────────────────

/// Enforce an attachment policy, in order: count, total bytes, allowed
/// suffixes, denied suffixes. The error message names the offending
/// attachment and rule. Runs before any attachment content is used.
pub fn enforce_attachment_policy(
    policy: &AttachmentPolicy,
    attachments: &[Attachment],
) -> Result<(), String> {
    if let Some(max) = policy.max_attachments
        && attachments.len() > max
    {
        return Err(format!(
            "Attachment policy violation: {} attachments exceed the maximum of {max}",
            attachments.len()
        ));
    }

    if let Some(max) = policy.max_total_bytes {
        let total: u64 = attachments.iter().map(|a| a.byte_len()).sum();
        if total > max {
            return Err(format!(
                "Attachment policy violation: total size {total} bytes exceeds the maximum of {max} bytes"
            ));
        }
    }

    for attachment in attachments {
        let label = attachment.name.as_deref().unwrap_or("<unnamed>");
        let suffix = attachment.suffix();

        if !policy.allowed_suffixes.is_empty() {
            let allowed = suffix
                .as_deref()
                .is_some_and(|s| policy.allowed_suffixes.iter().any(|a| a == s));
            if !allowed {
                return Err(format!(
                    "Attachment policy violation: '{label}' has suffix '{}' which is not in the allowed list",
                    suffix.as_deref().unwrap_or("")
                ));
            }
        }

        if let Some(ref s) = suffix
            && policy.denied_suffixes.iter().any(|d| d == s)
        {
            return Err(format!(
                "Attachment policy violation: '{label}' has denied suffix '{s}'"
            ));
        }
    }

    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn txt(name: &str, bytes: usize) -> Attachment {
        Attachment::text(name, "text/plain", "x".repeat(bytes))
    }

    #[test]
    fn input_emptiness() {
        assert!(WorkerInput::new("").is_empty());
        assert!(WorkerInput::new("   ").is_empty());
        assert!(!WorkerInput::new("hi").is_empty());
        assert!(
            !WorkerInput::new("")
                .with_attachments(vec![txt("a.txt", 1)])
                .is_empty()
        );
    }

    #[test]
    fn suffix_extraction() {
        assert_eq!(txt("a.TXT", 1).suffix().as_deref(), Some(".txt"));
        assert_eq!(txt("archive.tar.gz", 1).suffix().as_deref(), Some(".gz"));
        assert_eq!(txt("noext", 1).suffix(), None);
        assert_eq!(txt(".hidden", 1).suffix(), None);
    }

    #[test]
    fn policy_count_violation_names_the_rule() {
        // Two attachments against max_attachments 1: rejected on count
        // before anything is read.
        let policy = AttachmentPolicy {
            max_attachments: Some(1),
            max_total_bytes: Some(1024),
            allowed_suffixes: vec![".txt".into()],
            denied_suffixes: vec![],
        };
        let attachments = vec![txt("a.txt", 500), txt("b.pdf", 200)];

        let err = enforce_attachment_policy(&policy, &attachments).unwrap_err();
        assert_eq!(
            err,
            "Attachment policy violation: 2 attachments exceed the maximum of 1"
        );
    }

    #[test]
    fn policy_size_violation() {
        let policy = AttachmentPolicy {
            max_total_bytes: Some(100),
            ..Default::default()
        };
        let err = enforce_attachment_policy(&policy, &[txt("a.txt", 60), txt("b.txt", 60)])
            .unwrap_err();
        assert!(err.contains("total size 120 bytes exceeds the maximum of 100"));
    }

    #[test]
    fn policy_allowed_suffixes() {
        let policy = AttachmentPolicy {
            allowed_suffixes: vec![".txt".into(), ".md".into()],
            ..Default::default()
        };
        assert!(enforce_attachment_policy(&policy, &[txt("ok.md", 1)]).is_ok());

        let err = enforce_attachment_policy(&policy, &[txt("bad.pdf", 1)]).unwrap_err();
        assert!(err.contains("'bad.pdf'"));
        assert!(err.contains("'.pdf'"));
    }

    #[test]
    fn policy_denied_suffixes() {
        let policy = AttachmentPolicy {
            denied_suffixes: vec![".exe".into()],
            ..Default::default()
        };
        let err = enforce_attachment_policy(&policy, &[txt("evil.exe", 1)]).unwrap_err();
        assert!(err.contains("denied suffix '.exe'"));
    }

    #[test]
    fn policy_order_is_count_then_size_then_suffix() {
        // All three violated; the count rule fires first.
        let policy = AttachmentPolicy {
            max_attachments: Some(1),
            max_total_bytes: Some(1),
            allowed_suffixes: vec![".md".into()],
            denied_suffixes: vec![],
        };
        let err = enforce_attachment_policy(&policy, &[txt("a.txt", 50), txt("b.txt", 50)])
            .unwrap_err();
        assert!(err.contains("attachments exceed the maximum"));
    }

    #[test]
    fn empty_policy_accepts_anything() {
        let policy = AttachmentPolicy::default();
        assert!(enforce_attachment_policy(&policy, &[txt("a.bin", 10_000)]).is_ok());
    }

    #[test]
    fn file_part_rendering() {
        let text = txt("a.txt", 3).to_file_part();
        assert_eq!(text.data, FileData::Text("xxx".into()));

        let binary = Attachment::binary("img.png", "image/png", vec![1, 2, 3]).to_file_part();
        match binary.data {
            FileData::Base64(ref b64) => {
                assert_eq!(b64, &base64::engine::general_purpose::STANDARD.encode([1, 2, 3]));
            }
            other => panic!("expected base64, got {other:?}"),
        }
    }

    #[test]
    fn mime_heuristics() {
        assert_eq!(mime_type_for_path("/w/a.md"), "text/markdown");
        assert_eq!(mime_type_for_path("/w/a.png"), "image/png");
        assert_eq!(mime_type_for_path("/w/unknown.xyz"), "application/octet-stream");

        assert!(is_text_mime("text/plain"));
        assert!(is_text_mime("application/json"));
        assert!(!is_text_mime("image/png"));
        assert!(!is_text_mime("application/pdf"));
    }
}
