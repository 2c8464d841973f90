//! Tool abstraction for the worker runtime.
//!
//! The [`Tool`] trait defines what every tool provides: a definition
//! (name, description, JSON Schema parameters), an async `execute`
//! operation, an approval predicate, and an optional manual-execution
//! descriptor. Tools are collected into a [`ToolSet`], which splits the
//! LLM-visible definitions from the manual catalogue and is consumed by
//! the [`ToolExecutor`](crate::worker::execution::ToolExecutor).

use crate::{Message, ToolDef};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info, trace};

// ── Trait ──────────────────────────────────────────────────────────

/// Boxed future returned by [`Tool::execute`].
///
/// `Ok` carries the tool's JSON-serialisable return value; `Err` carries
/// a failure message the executor flattens to an `"Error: ..."` result
/// the model can recover from.
pub type ToolFuture<'a> =
    Pin<Box<dyn Future<Output = Result<serde_json::Value, String>> + Send + 'a>>;

/// Per-call context handed to [`Tool::execute`].
#[derive(Clone, Debug)]
pub struct ToolContext {
    /// The id of the call being executed.
    pub tool_call_id: String,
    /// Snapshot of the conversation at call time.
    pub messages: Arc<Vec<Message>>,
}

impl ToolContext {
    pub fn new(tool_call_id: impl Into<String>, messages: Arc<Vec<Message>>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            messages,
        }
    }
}

/// Who may trigger a tool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManualMode {
    /// Model only (the default for tools without a descriptor).
    LlmOnly,
    /// UI catalogue only; never offered to the model.
    ManualOnly,
    /// Both surfaces.
    Both,
}

/// Manual-execution descriptor for tools exposed in the UI catalogue.
#[derive(Clone, Debug)]
pub struct ManualExecution {
    pub mode: ManualMode,
    pub label: String,
    pub category: String,
}

impl ManualExecution {
    pub fn new(mode: ManualMode, label: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            mode,
            label: label.into(),
            category: category.into(),
        }
    }
}

/// A named, schema-typed operation the model (or the UI, manually) can
/// invoke during a run.
///
/// Approval requirements collapse to a single predicate: tools that never
/// need approval keep the default, tools that always do return `true`,
/// and per-call policies inspect the arguments.
pub trait Tool: Send + Sync {
    /// The definition exported to the model provider.
    fn definition(&self) -> ToolDef;

    /// Execute with schema-conforming arguments and the call context.
    fn execute(&self, args: &serde_json::Value, ctx: &ToolContext) -> ToolFuture<'_>;

    /// The tool's name (delegates to the definition).
    fn name(&self) -> String {
        self.definition().name
    }

    /// Whether this call requires approval before executing.
    fn needs_approval(&self, args: &serde_json::Value) -> bool {
        let _ = args;
        false
    }

    /// Manual-execution descriptor, if the tool appears in the UI
    /// catalogue. `None` means model-only.
    fn manual_execution(&self) -> Option<ManualExecution> {
        None
    }
}

// ── ToolSet ────────────────────────────────────────────────────────

/// A collection of tools dispatchable by name.
pub struct ToolSet {
    tools: HashMap<String, Arc<dyn Tool>>,
    /// Validate arguments against the declared schema before execution.
    validate_args: bool,
}

impl fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSet")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("validate_args", &self.validate_args)
            .finish()
    }
}

impl Default for ToolSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolSet {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            validate_args: false,
        }
    }

    /// Enable JSON Schema argument validation before execution.
    pub fn with_arg_validation(mut self, enabled: bool) -> Self {
        self.validate_args = enabled;
        self
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    /// Register an already-shared tool.
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name(), tool);
    }

    /// Register a tool (builder pattern).
    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.register(tool);
        self
    }

    /// Conditionally register a tool (builder pattern).
    pub fn with_if(self, condition: bool, tool: impl Tool + 'static) -> Self {
        if condition { self.with(tool) } else { self }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn validates_args(&self) -> bool {
        self.validate_args
    }

    /// All definitions, including manual-only tools.
    pub fn definitions(&self) -> Vec<ToolDef> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    /// Definitions offered to the model: manual-only tools are excluded
    /// but stay executable on explicit manual invocation.
    pub fn llm_definitions(&self) -> Vec<ToolDef> {
        self.tools
            .values()
            .filter(|t| {
                !matches!(
                    t.manual_execution().map(|m| m.mode),
                    Some(ManualMode::ManualOnly)
                )
            })
            .map(|t| t.definition())
            .collect()
    }

    /// The manual catalogue exposed to the UI.
    pub fn manual_tools(&self) -> Vec<crate::ui::bus::ManualToolEntry> {
        let mut entries: Vec<_> = self
            .tools
            .values()
            .filter_map(|t| {
                t.manual_execution().map(|m| crate::ui::bus::ManualToolEntry {
                    name: t.name(),
                    label: m.label,
                    category: m.category,
                    description: t.definition().description,
                })
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }
}

// ── FnTool ─────────────────────────────────────────────────────────

/// Internal approval rule for [`FnTool`] — the three-way
/// absent/bool/function shape collapsed at registration.
enum ApprovalRule {
    Never,
    Always,
    When(Box<dyn Fn(&serde_json::Value) -> bool + Send + Sync>),
}

/// Type-erased async handler for [`FnTool`].
type ErasedHandler = Box<
    dyn Fn(serde_json::Value) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, String>> + Send>>
        + Send
        + Sync,
>;

/// A closure-based tool with typed-argument auto-parsing.
///
/// Use for stateless tools whose logic is a pure async function; tools
/// carrying shared state (a sandbox, a registry) implement [`Tool`]
/// directly.
///
/// # Example
///
/// ```ignore
/// #[derive(Deserialize, JsonSchema)]
/// struct EchoArgs { text: String }
///
/// let tool = FnTool::new(
///     ToolDef::new("echo", "Echo the input", json_schema_for::<EchoArgs>()),
///     |args: EchoArgs| async move { Ok(serde_json::json!(args.text)) },
/// )
/// .requires_approval(false);
/// ```
pub struct FnTool {
    def: ToolDef,
    handler: ErasedHandler,
    approval: ApprovalRule,
    manual: Option<ManualExecution>,
}

impl FnTool {
    pub fn new<A, F, Fut>(def: ToolDef, handler: F) -> Self
    where
        A: serde::de::DeserializeOwned + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, String>> + Send + 'static,
    {
        let erased = move |raw: serde_json::Value| -> Pin<
            Box<dyn Future<Output = Result<serde_json::Value, String>> + Send>,
        > {
            let args: A = match serde_json::from_value(raw) {
                Ok(a) => a,
                Err(e) => {
                    return Box::pin(async move {
                        Err(format!(
                            "invalid tool arguments: {e}. Provide JSON matching the tool's \
                             parameter schema."
                        ))
                    });
                }
            };
            Box::pin(handler(args))
        };

        Self {
            def,
            handler: Box::new(erased),
            approval: ApprovalRule::Never,
            manual: None,
        }
    }

    /// Statically require (or not) approval for every call.
    pub fn requires_approval(mut self, required: bool) -> Self {
        self.approval = if required {
            ApprovalRule::Always
        } else {
            ApprovalRule::Never
        };
        self
    }

    /// Decide approval per call from the arguments. The predicate is
    /// assumed pure.
    pub fn requires_approval_when(
        mut self,
        predicate: impl Fn(&serde_json::Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.approval = ApprovalRule::When(Box::new(predicate));
        self
    }

    /// Attach a manual-execution descriptor.
    pub fn manual(mut self, manual: ManualExecution) -> Self {
        self.manual = Some(manual);
        self
    }
}

impl Tool for FnTool {
    fn definition(&self) -> ToolDef {
        self.def.clone()
    }

    fn execute(&self, args: &serde_json::Value, _ctx: &ToolContext) -> ToolFuture<'_> {
        Box::pin((self.handler)(args.clone()))
    }

    fn needs_approval(&self, args: &serde_json::Value) -> bool {
        match &self.approval {
            ApprovalRule::Never => false,
            ApprovalRule::Always => true,
            ApprovalRule::When(predicate) => predicate(args),
        }
    }

    fn manual_execution(&self) -> Option<ManualExecution> {
        self.manual.clone()
    }
}

impl fmt::Debug for FnTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool").field("name", &self.def.name).finish()
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Validate arguments against the tool's declared JSON Schema.
///
/// Returns `None` when valid, or an error string formatted for the model
/// to self-correct. An invalid schema skips validation.
pub fn validate_tool_arguments(tool: &dyn Tool, args: &serde_json::Value) -> Option<String> {
    let schema = tool.definition().parameters;
    let validator = match jsonschema::validator_for(&schema) {
        Ok(v) => v,
        Err(_) => return None,
    };

    let errors: Vec<String> = validator
        .iter_errors(args)
        .map(|e| format!("  - {}: {e}", e.instance_path()))
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(format!(
            "argument validation failed for tool '{}':\n{}\nFix the arguments and try again.",
            tool.name(),
            errors.join("\n")
        ))
    }
}

/// Parse a tool's JSON arguments into a typed struct, with a
/// model-correctable error message.
pub fn parse_tool_args<T: serde::de::DeserializeOwned>(
    args: &serde_json::Value,
) -> Result<T, String> {
    serde_json::from_value(args.clone()).map_err(|e| {
        format!(
            "invalid tool arguments: {e}. Provide JSON matching the tool's parameter schema."
        )
    })
}

/// Log a tool call at INFO with a truncated argument preview.
pub fn log_tool_call(name: &str, args: &serde_json::Value) {
    let rendered = args.to_string();
    let preview: String = rendered.chars().take(120).collect();
    info!(
        "[tool] {name}({preview}{})",
        if rendered.len() > 120 { "..." } else { "" }
    );
    debug!("[tool] {name} full args ({} bytes)", rendered.len());
    trace!("[tool] {name} arguments: {rendered}");
}

/// Truncate a string to at most `max` characters, appending a notice when
/// trimmed. Character-based so multi-byte text never splits.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max).collect();
        format!("{head}...[truncated]")
    } else {
        s.to_string()
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json_schema_for;
    use schemars::JsonSchema;
    use serde::Deserialize;

    fn ctx() -> ToolContext {
        ToolContext::new("call-1", Arc::new(Vec::new()))
    }

    #[derive(Debug, Deserialize, JsonSchema)]
    struct EchoArgs {
        text: String,
    }

    fn echo_tool() -> FnTool {
        FnTool::new(
            ToolDef::new("echo", "Echo the input", json_schema_for::<EchoArgs>()),
            |args: EchoArgs| async move { Ok(serde_json::json!(args.text)) },
        )
    }

    struct FailTool;

    impl Tool for FailTool {
        fn definition(&self) -> ToolDef {
            ToolDef::new("fail", "Always fails", serde_json::json!({"type": "object"}))
        }

        fn execute(&self, _args: &serde_json::Value, _ctx: &ToolContext) -> ToolFuture<'_> {
            Box::pin(async { Err("intentional failure".to_string()) })
        }
    }

    #[test]
    fn tool_name_from_definition() {
        assert_eq!(echo_tool().name(), "echo");
    }

    #[tokio::test]
    async fn fn_tool_parses_typed_args() {
        let tool = echo_tool();
        let result = tool
            .execute(&serde_json::json!({"text": "hello"}), &ctx())
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!("hello"));
    }

    #[tokio::test]
    async fn fn_tool_reports_parse_errors() {
        let tool = echo_tool();
        let err = tool
            .execute(&serde_json::json!({"wrong": 1}), &ctx())
            .await
            .unwrap_err();
        assert!(err.contains("invalid tool arguments"));
    }

    #[test]
    fn approval_rules_collapse_to_one_predicate() {
        let never = echo_tool();
        assert!(!never.needs_approval(&serde_json::json!({})));

        let always = echo_tool().requires_approval(true);
        assert!(always.needs_approval(&serde_json::json!({})));

        let dynamic = echo_tool()
            .requires_approval_when(|args| args.get("dangerous").is_some());
        assert!(!dynamic.needs_approval(&serde_json::json!({"text": "x"})));
        assert!(dynamic.needs_approval(&serde_json::json!({"dangerous": true})));
    }

    #[test]
    fn toolset_register_and_lookup() {
        let set = ToolSet::new().with(echo_tool()).with(FailTool);
        assert_eq!(set.len(), 2);
        assert!(set.get("echo").is_some());
        assert!(set.get("missing").is_none());
        assert!(set.contains("fail"));
    }

    #[test]
    fn with_if_controls_registration() {
        let set = ToolSet::new().with_if(false, echo_tool());
        assert!(set.is_empty());
        let set = ToolSet::new().with_if(true, echo_tool());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn manual_only_tools_hidden_from_llm() {
        let manual = echo_tool().manual(ManualExecution::new(
            ManualMode::ManualOnly,
            "Echo",
            "diagnostics",
        ));
        let set = ToolSet::new().with(manual).with(FailTool);

        let llm_names: Vec<String> = set
            .llm_definitions()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(llm_names, vec!["fail"]);

        // Still present in the set and the manual catalogue.
        assert!(set.get("echo").is_some());
        let catalogue = set.manual_tools();
        assert_eq!(catalogue.len(), 1);
        assert_eq!(catalogue[0].name, "echo");
        assert_eq!(catalogue[0].label, "Echo");
    }

    #[test]
    fn both_mode_tools_visible_everywhere() {
        let both = echo_tool().manual(ManualExecution::new(ManualMode::Both, "Echo", "general"));
        let set = ToolSet::new().with(both);

        assert_eq!(set.llm_definitions().len(), 1);
        assert_eq!(set.manual_tools().len(), 1);
    }

    #[test]
    fn validate_tool_arguments_catches_shape_errors() {
        let tool = echo_tool();
        assert!(validate_tool_arguments(&tool, &serde_json::json!({"text": "ok"})).is_none());

        let error =
            validate_tool_arguments(&tool, &serde_json::json!({"text": 42})).unwrap();
        assert!(error.contains("argument validation failed for tool 'echo'"));
    }

    #[test]
    fn parse_tool_args_typed() {
        let args: EchoArgs = parse_tool_args(&serde_json::json!({"text": "hi"})).unwrap();
        assert_eq!(args.text, "hi");

        let err = parse_tool_args::<EchoArgs>(&serde_json::json!({})).unwrap_err();
        assert!(err.contains("invalid tool arguments"));
    }

    #[test]
    fn truncate_chars_is_character_safe() {
        assert_eq!(truncate_chars("short", 100), "short");
        let long = "é".repeat(50);
        let truncated = truncate_chars(&long, 10);
        assert!(truncated.starts_with(&"é".repeat(10)));
        assert!(truncated.ends_with("...[truncated]"));
    }

    #[test]
    fn replacing_a_tool_keeps_one_entry() {
        let set = ToolSet::new().with(echo_tool()).with(echo_tool());
        assert_eq!(set.len(), 1);
    }
}
