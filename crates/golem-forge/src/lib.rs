//! Execution engine for LLM-backed *workers*: declarative artifacts
//! (system prompt + configuration + allowed toolsets) that turn a model
//! call into a reusable, composable function.
//!
//! The core abstraction is the [`WorkerRuntime`](worker::runtime::WorkerRuntime)
//! — an orchestration loop that drives an LLM through alternating generation
//! and tool execution until the model produces a text-only response or a
//! budget is hit. Three subsystems make that loop safe and composable:
//!
//! 1. The [`ToolExecutor`](worker::execution::ToolExecutor) routes every
//!    tool call through an [`ApprovalController`](approval::ApprovalController)
//!    before it runs, with session-scoped approval memory.
//! 2. The [`Sandbox`](sandbox::Sandbox) exposes a bind-mount virtual
//!    filesystem that sub-workers can only ever *narrow*, never widen.
//! 3. The [`EventBus`](ui::bus::EventBus) carries typed display and action
//!    events between the runtime and whatever frontend is attached.
//!
//! # Getting started
//!
//! ```ignore
//! use golem_forge::prelude::*;
//!
//! #[tokio::main]
//! async fn main() {
//!     let definition = WorkerDefinition::new(
//!         "summarizer",
//!         "You summarize documents the user provides.",
//!     );
//!
//!     let model: Arc<dyn ModelProvider> = my_platform_model();
//!     let tools = ToolSet::new();
//!
//!     let mut runtime = WorkerRuntime::builder(definition, model, "claude-sonnet-4")
//!         .tools(tools)
//!         .approval_controller(Arc::new(ApprovalController::approve_all()))
//!         .build()
//!         .expect("valid configuration");
//!
//!     let result = runtime.run("Summarize the attached report.").await;
//!     println!("{}", result.response.unwrap_or_default());
//! }
//! ```
//!
//! # Where to find things
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`worker`] | Runtime loop, worker definitions, delegation, registry, runtime events |
//! | [`tools`] | [`Tool`](tools::core::Tool) trait, [`ToolSet`](tools::core::ToolSet), sandbox-backed filesystem tools |
//! | [`approval`] | Approval modes, decisions, and the session approval memory |
//! | [`sandbox`] | Mount-based virtual filesystem with never-widening restriction |
//! | [`ui`] | Event bus, [`RuntimeUI`](ui::RuntimeUI) facade, tracing → status bridge |
//! | [`model`] | The `generate` contract platform model factories implement |
//!
//! # Design principles
//!
//! 1. **The child never exceeds the parent.** Delegation shares the approval
//!    controller, narrows the sandbox, and bounds depth — a parent can hand
//!    untrusted sub-prompts to a child with a mechanical guarantee.
//! 2. **Side effects go through approval.** Every tool call resolves its
//!    approval requirement before `execute` runs; denials flow back to the
//!    model as tool results it can recover from.
//! 3. **Errors are data.** Tool and model failures become `"Error: ..."`
//!    tool results; only configuration and input-policy problems fail fast.
//! 4. **The core persists nothing.** All state is in-memory for the run;
//!    sandboxes write through to whatever the embedder mounted.

pub mod approval;
pub mod model;
pub mod prelude;
pub mod sandbox;
pub mod tools;
pub mod ui;
pub mod worker;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// Re-export schemars so downstream tool crates derive against the same
// version the schema bridge uses.
pub use schemars;

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type implementing
/// `schemars::JsonSchema`. This is the bridge between typed tool argument
/// structs and the schema object the model-facing tool definition carries.
///
/// # Example
///
/// ```
/// use golem_forge::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct ReadArgs {
///     path: String,
/// }
///
/// let schema = json_schema_for::<ReadArgs>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"path".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// A typed file part attached to a user message.
///
/// Text attachments are carried inline; binary attachments are base64
/// encoded so the whole message stays serialisable.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FilePart {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub mime_type: String,
    pub data: FileData,
}

/// Payload of a [`FilePart`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "encoding", content = "value", rename_all = "lowercase")]
pub enum FileData {
    Text(String),
    Base64(String),
}

/// A message in the conversation.
///
/// Assistant messages may carry text and/or tool-call parts; tool messages
/// carry one result entry per executed call, tagged by `tool_call_id`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Message {
    pub role: MessageRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parts: Option<Vec<FilePart>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_results: Option<Vec<ToolResultPart>>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: Some(content.into()),
            parts: None,
            tool_calls: None,
            tool_results: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: Some(content.into()),
            parts: None,
            tool_calls: None,
            tool_results: None,
        }
    }

    /// A user message carrying attachment file parts alongside its text.
    pub fn user_with_parts(content: impl Into<String>, parts: Vec<FilePart>) -> Self {
        Self {
            role: MessageRole::User,
            content: Some(content.into()),
            parts: if parts.is_empty() { None } else { Some(parts) },
            tool_calls: None,
            tool_results: None,
        }
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: Some(content.into()),
            parts: None,
            tool_calls: None,
            tool_results: None,
        }
    }

    /// An assistant message with optional text plus its tool-call parts.
    pub fn assistant(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content,
            parts: None,
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
            tool_results: None,
        }
    }

    /// A tool message with one entry per executed call.
    pub fn tool_results(results: Vec<ToolResultPart>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: None,
            parts: None,
            tool_calls: None,
            tool_results: Some(results),
        }
    }
}

// ── Tool wire types ────────────────────────────────────────────────

/// A tool definition handed to the model provider.
///
/// `parameters` is the JSON Schema for the tool's arguments; the provider
/// shapes it into whatever its API expects.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDef {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// A tool call produced by the model.
///
/// Providers emit arguments under `input`; the legacy `args` key is
/// accepted on deserialization for older provider glue.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(rename = "input", alias = "args", default)]
    pub tool_args: serde_json::Value,
}

impl ToolCall {
    pub fn new(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        tool_args: serde_json::Value,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            tool_args,
        }
    }
}

/// One entry of a tool-result message.
///
/// `output` is the raw tool return value (or an error string); the runtime
/// never parses it — it flows back to the model verbatim.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultPart {
    pub tool_call_id: String,
    pub tool_name: String,
    pub output: serde_json::Value,
    #[serde(default)]
    pub is_error: bool,
}

// ── Usage ──────────────────────────────────────────────────────────

/// Token usage reported by the model for one generation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct UsageInfo {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

impl UsageInfo {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

// ── Tests ──────────────────────────────────────────────────────────
