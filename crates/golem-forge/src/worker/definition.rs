//! Worker definitions: the immutable record a worker file parses into.
//!
//! The external collaborator that discovers worker files and parses their
//! YAML front matter produces a [`WorkerDefinition`]; every field beyond
//! `name` and `instructions` is optional with a serde default, and unknown
//! keys are ignored, so an absent front matter is just the defaults.

use crate::sandbox::SandboxRestriction;
use serde::{Deserialize, Serialize};

/// Execution mode for a worker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerMode {
    /// One input, one final response.
    #[default]
    Single,
    /// Interactive conversation; the UI supplies follow-up messages.
    Chat,
}

/// Per-worker limits on attached files.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AttachmentPolicy {
    /// Maximum number of attachments per input.
    #[serde(default)]
    pub max_attachments: Option<usize>,
    /// Maximum total size of all attachments, in bytes.
    #[serde(default)]
    pub max_total_bytes: Option<u64>,
    /// When non-empty, every attachment's lowercased extension must be
    /// in this list (e.g. `[".txt", ".md"]`).
    #[serde(default)]
    pub allowed_suffixes: Vec<String>,
    /// Extensions that are always rejected.
    #[serde(default)]
    pub denied_suffixes: Vec<String>,
}

/// The `filesystem:` toolset block. Currently carries no options; its
/// presence requests the sandbox-backed filesystem tools.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FilesystemToolset {}

/// The `workers:` toolset block: which workers this one may delegate to,
/// plus an optional call-site restriction tightening every child.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WorkersToolset {
    #[serde(default)]
    pub allowed: Vec<String>,
    /// Virtual path every child is narrowed to, on top of the child's own
    /// declared restriction.
    #[serde(default)]
    pub restrict: Option<String>,
    /// Force every child read-only.
    #[serde(default)]
    pub readonly: Option<bool>,
}

/// Declarative toolsets map from the worker file.
///
/// `git` and `custom` are opaque here — those toolsets are assembled by
/// external collaborators; the core only uses their presence for the
/// sandbox-required check.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ToolsetsConfig {
    #[serde(default)]
    pub filesystem: Option<FilesystemToolset>,
    #[serde(default)]
    pub git: Option<serde_json::Value>,
    #[serde(default)]
    pub workers: Option<WorkersToolset>,
    #[serde(default)]
    pub custom: Option<serde_json::Value>,
}

/// An immutable worker definition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerDefinition {
    pub name: String,
    /// The system prompt body, verbatim.
    pub instructions: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub mode: WorkerMode,
    /// Shell-style glob patterns; a model id must match one to run this
    /// worker. `None` accepts any model; an empty list is a
    /// configuration error.
    #[serde(default)]
    pub compatible_models: Option<Vec<String>>,
    /// Context ceiling for chat mode; exceeding it warns, never truncates.
    #[serde(default)]
    pub max_context_tokens: Option<u64>,
    #[serde(default)]
    pub allow_empty_input: bool,
    #[serde(default)]
    pub attachment_policy: AttachmentPolicy,
    #[serde(default)]
    pub toolsets: ToolsetsConfig,
    /// Restriction applied to this worker's sandbox when it runs as a
    /// sub-worker.
    #[serde(default)]
    pub sandbox: Option<SandboxRestriction>,
}

impl WorkerDefinition {
    pub fn new(name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            description: None,
            mode: WorkerMode::default(),
            compatible_models: None,
            max_context_tokens: None,
            allow_empty_input: false,
            attachment_policy: AttachmentPolicy::default(),
            toolsets: ToolsetsConfig::default(),
            sandbox: None,
        }
    }

    // ── Builder methods ────────────────────────────────────────────

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_mode(mut self, mode: WorkerMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_compatible_models(mut self, patterns: Vec<String>) -> Self {
        self.compatible_models = Some(patterns);
        self
    }

    pub fn with_max_context_tokens(mut self, tokens: u64) -> Self {
        self.max_context_tokens = Some(tokens);
        self
    }

    pub fn with_allow_empty_input(mut self, allow: bool) -> Self {
        self.allow_empty_input = allow;
        self
    }

    pub fn with_attachment_policy(mut self, policy: AttachmentPolicy) -> Self {
        self.attachment_policy = policy;
        self
    }

    pub fn with_toolsets(mut self, toolsets: ToolsetsConfig) -> Self {
        self.toolsets = toolsets;
        self
    }

    pub fn with_sandbox_restriction(mut self, restriction: SandboxRestriction) -> Self {
        self.sandbox = Some(restriction);
        self
    }

    /// Whether running this worker requires a sandbox: true when a
    /// filesystem or git toolset is declared, or a sandbox restriction is
    /// present.
    pub fn requires_sandbox(&self) -> bool {
        self.toolsets.filesystem.is_some()
            || self.toolsets.git.is_some()
            || self.sandbox.is_some()
    }
}

/// Match a model id against shell-style glob patterns (`*` matches any
/// run of characters). The id is admitted if any pattern matches; a
/// pattern that fails to parse falls back to literal comparison.
pub fn model_matches(patterns: &[String], model_id: &str) -> bool {
    patterns.iter().any(|p| match glob::Pattern::new(p) {
        Ok(pattern) => pattern.matches(model_id),
        Err(_) => p == model_id,
    })
}

// ── Tests ──────────────────────────────────────────────────────────
