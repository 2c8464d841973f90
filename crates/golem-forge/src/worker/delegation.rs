//! Sub-worker delegation tools.
//!
//! Each worker name in a parent's `workers.allowed` list becomes its own
//! tool carrying that worker's name and description — there is no generic
//! `call_worker` surface. Invocation guards recursion (no worker name
//! twice in one delegation path) and depth, narrows the parent's sandbox
//! through the child's declared restriction plus any call-site
//! restriction, and runs the child with the *same* approval controller
//! and a fresh executor. Failures come back as structured results, never
//! as panics — the parent model sees `{success: false, error}` and can
//! pivot.

use crate::approval::ApprovalController;
use crate::model::ModelProvider;
use crate::sandbox::{Sandbox, SandboxRestriction};
use crate::tools::core::{Tool, ToolContext, ToolFuture, ToolSet, parse_tool_args};
use crate::tools::names;
use crate::ui::bus::EventBus;
use crate::worker::definition::{WorkerDefinition, WorkersToolset};
use crate::worker::events::EventHandler;
use crate::worker::input::{
    Attachment, WorkerInput, is_text_mime, mime_type_for_path,
};
use crate::worker::registry::WorkerRegistry;
use crate::worker::runtime::{ConfigError, InterruptSignal, WorkerRuntime};
use crate::worker::toolsets;
use crate::{ToolDef, json_schema_for};
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Default ceiling on delegation depth.
pub const DEFAULT_MAX_DELEGATION_DEPTH: u32 = 5;

/// Everything a delegation tool needs to construct and run a child
/// runtime. Cloned per tool; the delegation path is copied by value so
/// sibling delegations never alias each other's paths.
#[derive(Clone)]
pub struct DelegationContext {
    pub registry: Arc<dyn WorkerRegistry>,
    pub model: Arc<dyn ModelProvider>,
    pub model_id: String,
    /// Shared with the parent — one approval memory per run tree.
    pub approval: Arc<ApprovalController>,
    pub sandbox: Option<Arc<Sandbox>>,
    pub bus: Option<Arc<EventBus>>,
    pub handler: Arc<dyn EventHandler>,
    /// Worker names from the root to the delegating worker.
    pub delegation_path: Vec<String>,
    pub depth: u32,
    pub max_delegation_depth: u32,
    /// Tightening applied to every child at this call site.
    pub call_site_restriction: Option<SandboxRestriction>,
    pub interrupt: InterruptSignal,
}

/// Typed arguments for a delegation tool.
#[derive(Deserialize, JsonSchema)]
pub struct DelegationArgs {
    /// The task or question for the delegated worker.
    pub input: String,
    /// Virtual paths (in this worker's sandbox) of files to forward as
    /// attachments.
    #[serde(default)]
    pub attachments: Option<Vec<String>>,
}

/// The tool a parent calls to delegate to one named worker.
pub struct WorkerTool {
    worker_name: String,
    description: String,
    ctx: DelegationContext,
}

impl WorkerTool {
    pub fn new(
        worker_name: impl Into<String>,
        description: impl Into<String>,
        ctx: DelegationContext,
    ) -> Self {
        Self {
            worker_name: worker_name.into(),
            description: description.into(),
            ctx,
        }
    }

    fn failure(&self, error: impl Into<String>) -> serde_json::Value {
        serde_json::json!({
            "success": false,
            "workerName": self.worker_name,
            "error": error.into(),
        })
    }

    async fn delegate(&self, args: DelegationArgs) -> serde_json::Value {
        let Some(child_def) = self.ctx.registry.get(&self.worker_name) else {
            return self.failure(format!("Worker '{}' not found", self.worker_name));
        };

        // Recursion guards, before anything touches a model.
        if self.ctx.delegation_path.contains(&self.worker_name) {
            let mut cycle = self.ctx.delegation_path.clone();
            cycle.push(self.worker_name.clone());
            return self.failure(format!("Circular delegation: {}", cycle.join(" → ")));
        }
        if self.ctx.depth + 1 > self.ctx.max_delegation_depth {
            return self.failure(format!(
                "Maximum delegation depth ({}) exceeded",
                self.ctx.max_delegation_depth
            ));
        }

        let child_sandbox = match narrow_sandbox(
            self.ctx.sandbox.as_ref(),
            child_def.sandbox.as_ref(),
            self.ctx.call_site_restriction.as_ref(),
        ) {
            Ok(sandbox) => sandbox,
            Err(e) => return self.failure(e),
        };

        let attachments = match self.read_attachments(args.attachments.as_deref()).await {
            Ok(attachments) => attachments,
            Err(e) => return self.failure(e),
        };

        let mut child_path = self.ctx.delegation_path.clone();
        child_path.push(self.worker_name.clone());

        let child_ctx = DelegationContext {
            registry: Arc::clone(&self.ctx.registry),
            model: Arc::clone(&self.ctx.model),
            model_id: self.ctx.model_id.clone(),
            approval: Arc::clone(&self.ctx.approval),
            sandbox: child_sandbox.clone(),
            bus: self.ctx.bus.clone(),
            handler: Arc::clone(&self.ctx.handler),
            delegation_path: child_path.clone(),
            depth: self.ctx.depth + 1,
            max_delegation_depth: self.ctx.max_delegation_depth,
            call_site_restriction: None,
            interrupt: self.ctx.interrupt.clone(),
        };

        let child_tools =
            match toolsets::build_toolset(&child_def, child_sandbox.as_ref(), Some(&child_ctx)) {
                Ok(tools) => tools,
                Err(e) => return self.failure(e.to_string()),
            };

        let mut builder = WorkerRuntime::builder(
            child_def,
            Arc::clone(&self.ctx.model),
            self.ctx.model_id.clone(),
        )
        .tools(child_tools)
        .approval_controller(Arc::clone(&self.ctx.approval))
        .event_handler(Arc::clone(&self.ctx.handler))
        .depth(self.ctx.depth + 1)
        .delegation_path(child_path)
        .interrupt(self.ctx.interrupt.clone());
        if let Some(sandbox) = child_sandbox {
            builder = builder.sandbox(sandbox);
        }
        if let Some(bus) = self.ctx.bus.clone() {
            builder = builder.bus(bus);
        }

        let mut child = match builder.build() {
            Ok(runtime) => runtime,
            Err(e) => return self.failure(e.to_string()),
        };

        info!(
            "delegating to '{}' (depth {})",
            self.worker_name,
            self.ctx.depth + 1
        );
        let result = child
            .run(WorkerInput::new(args.input).with_attachments(attachments))
            .await;
        child.dispose();

        let mut value = serde_json::json!({
            "success": result.success,
            "workerName": self.worker_name,
            "toolCallCount": result.tool_call_count,
            "tokens": result.tokens,
        });
        if let Some(response) = result.response {
            value["response"] = serde_json::Value::String(response);
        }
        if let Some(error) = result.error {
            value["error"] = serde_json::Value::String(error);
        }
        value
    }

    /// Read forwarded attachments from the parent's sandbox, choosing
    /// text vs binary by MIME heuristic. The child's attachment policy is
    /// enforced by the child runtime itself.
    async fn read_attachments(&self, paths: Option<&[String]>) -> Result<Vec<Attachment>, String> {
        let Some(paths) = paths else {
            return Ok(Vec::new());
        };
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        let Some(sandbox) = self.ctx.sandbox.as_ref() else {
            return Err("Cannot forward attachments without a sandbox".to_string());
        };

        let mut attachments = Vec::with_capacity(paths.len());
        for path in paths {
            let name = path.rsplit('/').next().unwrap_or(path).to_string();
            let mime = mime_type_for_path(path);
            let attachment = if is_text_mime(mime) {
                let content = sandbox.read(path).await.map_err(|e| e.to_string())?;
                Attachment::text(name, mime, content)
            } else {
                let bytes = sandbox.read_binary(path).await.map_err(|e| e.to_string())?;
                Attachment::binary(name, mime, bytes)
            };
            attachments.push(attachment);
        }
        Ok(attachments)
    }
}

impl Tool for WorkerTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            &self.worker_name,
            &self.description,
            json_schema_for::<DelegationArgs>(),
        )
    }

    fn execute(&self, args: &serde_json::Value, _ctx: &ToolContext) -> ToolFuture<'_> {
        let args = args.clone();
        Box::pin(async move {
            let args: DelegationArgs = parse_tool_args(&args)?;
            Ok(self.delegate(args).await)
        })
    }
}

/// Compute a child sandbox: the child's declared restriction first, then
/// the call-site restriction. No sandbox stays no sandbox — a child that
/// requires one fails at construction instead.
pub(crate) fn narrow_sandbox(
    parent: Option<&Arc<Sandbox>>,
    declared: Option<&SandboxRestriction>,
    call_site: Option<&SandboxRestriction>,
) -> Result<Option<Arc<Sandbox>>, String> {
    let Some(parent) = parent else {
        return Ok(None);
    };

    let mut sandbox = Arc::clone(parent);
    for restriction in [declared, call_site].into_iter().flatten() {
        sandbox = Arc::new(sandbox.restrict(restriction).map_err(|e| e.to_string())?);
    }
    Ok(Some(sandbox))
}

/// Register one delegation tool per allowed worker.
///
/// Refuses any worker whose name collides with a reserved tool name.
/// Workers missing from the registry still get a tool — invoking it
/// returns the structured not-found failure.
pub fn register_worker_tools(
    mut set: ToolSet,
    config: &WorkersToolset,
    ctx: &DelegationContext,
) -> Result<ToolSet, ConfigError> {
    let call_site = if config.restrict.is_some() || config.readonly.is_some() {
        Some(SandboxRestriction {
            restrict: config.restrict.clone(),
            readonly: config.readonly,
        })
    } else {
        None
    };

    for name in &config.allowed {
        if names::RESERVED.contains(&name.as_str()) {
            return Err(ConfigError::ReservedWorkerName(name.clone()));
        }

        let description = match self_description(&*ctx.registry, name) {
            Some(description) => description,
            None => {
                warn!("allowed worker '{name}' is not in the registry yet");
                format!("Delegate a task to the '{name}' worker")
            }
        };

        let mut tool_ctx = ctx.clone();
        tool_ctx.call_site_restriction = call_site.clone();
        set.register(WorkerTool::new(name, description, tool_ctx));
    }
    Ok(set)
}

fn self_description(registry: &dyn WorkerRegistry, name: &str) -> Option<String> {
    let definition: WorkerDefinition = registry.get(name)?;
    Some(
        definition
            .description
            .unwrap_or_else(|| format!("Delegate a task to the '{name}' worker")),
    )
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::{ApprovalCallback, ApprovalDecision, RememberScope};
    use crate::model::{GenerateFuture, GenerateRequest, GenerateResponse};
    use crate::sandbox::SandboxConfig;
    use crate::worker::definition::ToolsetsConfig;
    use crate::worker::events::NoopHandler;
    use crate::worker::registry::InMemoryWorkerRegistry;
    use crate::{ToolCall, UsageInfo};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Scripted model that records every request it sees.
    struct MockModel {
        responses: Mutex<VecDeque<GenerateResponse>>,
        requests: Mutex<Vec<GenerateRequest>>,
        calls: AtomicU32,
    }

    impl MockModel {
        fn new(responses: Vec<GenerateResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ModelProvider for MockModel {
        fn generate(&self, request: GenerateRequest) -> GenerateFuture<'_> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request);
            let next = self.responses.lock().unwrap().pop_front();
            Box::pin(async move {
                match next {
                    Some(response) => Ok(response),
                    None => Err("mock model exhausted".to_string()),
                }
            })
        }
    }

    fn text_response(text: &str) -> GenerateResponse {
        GenerateResponse {
            text: Some(text.to_string()),
            tool_calls: vec![],
            usage: UsageInfo {
                input_tokens: 7,
                output_tokens: 3,
            },
        }
    }

    fn ctx(
        registry: Arc<dyn WorkerRegistry>,
        model: Arc<dyn ModelProvider>,
        sandbox: Option<Arc<Sandbox>>,
    ) -> DelegationContext {
        DelegationContext {
            registry,
            model,
            model_id: "test-model".into(),
            approval: Arc::new(ApprovalController::approve_all()),
            sandbox,
            bus: None,
            handler: Arc::new(NoopHandler),
            delegation_path: vec!["orchestrator".into()],
            depth: 0,
            max_delegation_depth: DEFAULT_MAX_DELEGATION_DEPTH,
            call_site_restriction: None,
            interrupt: InterruptSignal::new(),
        }
    }

    fn tool_ctx() -> ToolContext {
        ToolContext::new("call-1", Arc::new(Vec::new()))
    }

    #[tokio::test]
    async fn unknown_worker_returns_structured_not_found() {
        let model = MockModel::new(vec![]);
        let registry = Arc::new(InMemoryWorkerRegistry::new());
        let tool = WorkerTool::new("ghost", "desc", ctx(registry, model.clone(), None));

        let result = tool
            .execute(&serde_json::json!({"input": "do it"}), &tool_ctx())
            .await
            .unwrap();

        assert_eq!(result["success"], false);
        assert_eq!(result["workerName"], "ghost");
        assert_eq!(result["error"], "Worker 'ghost' not found");
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn cycle_is_detected_before_any_model_call() {
        // orchestrator → analyzer → orchestrator must be refused.
        let model = MockModel::new(vec![]);
        let registry = Arc::new(
            InMemoryWorkerRegistry::new()
                .with(WorkerDefinition::new("orchestrator", "Delegate.")),
        );
        let mut context = ctx(registry, model.clone(), None);
        context.delegation_path = vec!["orchestrator".into(), "analyzer".into()];
        context.depth = 1;
        let tool = WorkerTool::new("orchestrator", "desc", context);

        let result = tool
            .execute(&serde_json::json!({"input": "loop"}), &tool_ctx())
            .await
            .unwrap();

        assert_eq!(result["success"], false);
        assert_eq!(
            result["error"],
            "Circular delegation: orchestrator → analyzer → orchestrator"
        );
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn depth_ceiling_is_enforced() {
        let model = MockModel::new(vec![]);
        let registry = Arc::new(
            InMemoryWorkerRegistry::new().with(WorkerDefinition::new("deep", "Dig.")),
        );
        let mut context = ctx(registry, model.clone(), None);
        context.depth = 5;
        context.delegation_path = vec![
            "a".into(),
            "b".into(),
            "c".into(),
            "d".into(),
            "e".into(),
            "f".into(),
        ];
        let tool = WorkerTool::new("deep", "desc", context);

        let result = tool
            .execute(&serde_json::json!({"input": "deeper"}), &tool_ctx())
            .await
            .unwrap();

        assert_eq!(result["success"], false);
        assert_eq!(result["error"], "Maximum delegation depth (5) exceeded");
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn successful_delegation_surfaces_child_result() {
        let model = MockModel::new(vec![text_response("child says hi")]);
        let registry = Arc::new(
            InMemoryWorkerRegistry::new().with(WorkerDefinition::new("analyzer", "Analyze.")),
        );
        let tool = WorkerTool::new("analyzer", "desc", ctx(registry, model.clone(), None));

        let result = tool
            .execute(&serde_json::json!({"input": "analyze this"}), &tool_ctx())
            .await
            .unwrap();

        assert_eq!(result["success"], true);
        assert_eq!(result["workerName"], "analyzer");
        assert_eq!(result["response"], "child says hi");
        assert_eq!(result["toolCallCount"], 0);
        assert_eq!(result["tokens"]["input"], 7);
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn child_failure_is_surfaced_not_thrown() {
        let model = MockModel::new(vec![]); // child model call fails
        let registry = Arc::new(
            InMemoryWorkerRegistry::new().with(WorkerDefinition::new("flaky", "Fail.")),
        );
        let tool = WorkerTool::new("flaky", "desc", ctx(registry, model, None));

        let result = tool
            .execute(&serde_json::json!({"input": "try"}), &tool_ctx())
            .await
            .unwrap();

        assert_eq!(result["success"], false);
        assert_eq!(result["error"], "mock model exhausted");
    }

    #[test]
    fn narrow_sandbox_applies_declared_then_call_site() {
        let parent = Arc::new(
            Sandbox::new(
                SandboxConfig::new("/host/p").mount("/host/c", "/cache", false),
            )
            .unwrap(),
        );

        let declared = SandboxRestriction {
            restrict: Some("/cache".into()),
            readonly: None,
        };
        let call_site = SandboxRestriction {
            restrict: None,
            readonly: Some(true),
        };

        let child = narrow_sandbox(Some(&parent), Some(&declared), Some(&call_site))
            .unwrap()
            .unwrap();
        assert!(!child.can_write("/x").unwrap());
        assert_eq!(
            child.resolve("/x").unwrap(),
            std::path::PathBuf::from("/host/c/x")
        );
        // Parent untouched.
        assert!(parent.can_write("/cache/x").unwrap());
    }

    #[test]
    fn narrow_sandbox_rejects_escalation() {
        let parent = Arc::new(
            Sandbox::new(SandboxConfig::new("/host/p").readonly(true)).unwrap(),
        );
        let widen = SandboxRestriction {
            restrict: None,
            readonly: Some(false),
        };
        let err = narrow_sandbox(Some(&parent), Some(&widen), None).unwrap_err();
        assert!(err.contains("Permission escalation"));
    }

    #[tokio::test]
    async fn attachments_are_read_from_parent_sandbox() {
        let dir = tempfile::TempDir::new().unwrap();
        let sandbox = Arc::new(Sandbox::new(SandboxConfig::new(dir.path())).unwrap());
        sandbox.write("/docs/report.md", "# Findings").await.unwrap();

        let model = MockModel::new(vec![text_response("received")]);
        let registry = Arc::new(
            InMemoryWorkerRegistry::new().with(WorkerDefinition::new("reader", "Read.")),
        );
        let tool = WorkerTool::new(
            "reader",
            "desc",
            ctx(registry, model.clone(), Some(sandbox)),
        );

        let result = tool
            .execute(
                &serde_json::json!({"input": "summarize", "attachments": ["/docs/report.md"]}),
                &tool_ctx(),
            )
            .await
            .unwrap();
        assert_eq!(result["success"], true);

        // The child saw the attachment as a typed file part.
        let requests = model.requests.lock().unwrap();
        let user_msg = &requests[0].messages[1];
        let parts = user_msg.parts.as_ref().expect("file parts");
        assert_eq!(parts[0].name.as_deref(), Some("report.md"));
        assert_eq!(parts[0].mime_type, "text/markdown");
    }

    #[tokio::test]
    async fn missing_attachment_fails_the_delegation() {
        let dir = tempfile::TempDir::new().unwrap();
        let sandbox = Arc::new(Sandbox::new(SandboxConfig::new(dir.path())).unwrap());

        let model = MockModel::new(vec![text_response("unused")]);
        let registry = Arc::new(
            InMemoryWorkerRegistry::new().with(WorkerDefinition::new("reader", "Read.")),
        );
        let tool = WorkerTool::new("reader", "desc", ctx(registry, model.clone(), Some(sandbox)));

        let result = tool
            .execute(
                &serde_json::json!({"input": "go", "attachments": ["/missing.txt"]}),
                &tool_ctx(),
            )
            .await
            .unwrap();

        assert_eq!(result["success"], false);
        assert_eq!(result["error"], "File not found: /missing.txt");
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn shared_controller_silences_repeat_approvals_in_child() {
        let dir = tempfile::TempDir::new().unwrap();
        let sandbox = Arc::new(Sandbox::new(SandboxConfig::new(dir.path())).unwrap());

        // Callback approves with session memory on the first call and
        // would deny any later call.
        let prompts = Arc::new(AtomicU32::new(0));
        let prompts_in_cb = prompts.clone();
        let callback: ApprovalCallback = Arc::new(move |_req| {
            let n = prompts_in_cb.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if n == 0 {
                    ApprovalDecision::approved(RememberScope::Session)
                } else {
                    ApprovalDecision::denied(None)
                }
            })
        });
        let controller = Arc::new(ApprovalController::interactive(callback));

        // Parent pre-approves exactly the write the child will make.
        let write_args = serde_json::json!({"path": "/out.txt", "content": "data"});
        let decision = controller
            .request_approval(crate::approval::ApprovalRequest {
                tool_name: names::WRITE_FILE.into(),
                tool_args: write_args.clone(),
                description: "write".into(),
            })
            .await;
        assert!(decision.approved);

        // Child: filesystem worker whose model writes the same file.
        let child_def = WorkerDefinition::new("scribe", "Write files.").with_toolsets(
            ToolsetsConfig {
                filesystem: Some(crate::worker::definition::FilesystemToolset {}),
                ..Default::default()
            },
        );
        let model = MockModel::new(vec![
            GenerateResponse {
                text: None,
                tool_calls: vec![ToolCall::new("c1", names::WRITE_FILE, write_args)],
                usage: UsageInfo::default(),
            },
            text_response("written"),
        ]);
        let registry = Arc::new(InMemoryWorkerRegistry::new().with(child_def));

        let mut context = ctx(registry, model, Some(sandbox.clone()));
        context.approval = controller;
        let tool = WorkerTool::new("scribe", "desc", context);

        let result = tool
            .execute(&serde_json::json!({"input": "write it"}), &tool_ctx())
            .await
            .unwrap();

        assert_eq!(result["success"], true);
        // One prompt total: the parent's. The child's write hit the cache.
        assert_eq!(prompts.load(Ordering::SeqCst), 1);
        assert_eq!(sandbox.read("/out.txt").await.unwrap(), "data");
    }

    #[test]
    fn reserved_worker_names_are_refused() {
        let registry: Arc<dyn WorkerRegistry> = Arc::new(InMemoryWorkerRegistry::new());
        let model: Arc<dyn ModelProvider> = MockModel::new(vec![]);
        let context = ctx(registry, model, None);

        let config = WorkersToolset {
            allowed: vec!["read_file".into()],
            ..Default::default()
        };
        let err = register_worker_tools(ToolSet::new(), &config, &context).unwrap_err();
        assert!(matches!(err, ConfigError::ReservedWorkerName(_)));
    }

    #[test]
    fn register_worker_tools_uses_child_descriptions() {
        let registry = Arc::new(
            InMemoryWorkerRegistry::new().with(
                WorkerDefinition::new("analyzer", "Analyze.")
                    .with_description("Deep code analysis"),
            ),
        );
        let model: Arc<dyn ModelProvider> = MockModel::new(vec![]);
        let context = ctx(registry, model, None);

        let config = WorkersToolset {
            allowed: vec!["analyzer".into(), "unregistered".into()],
            ..Default::default()
        };
        let set = register_worker_tools(ToolSet::new(), &config, &context).unwrap();
        assert_eq!(set.len(), 2);

        let analyzer = set.get("analyzer").unwrap();
        assert_eq!(analyzer.definition().description, "Deep code analysis");

        // Missing workers still get a tool; invoking it reports not-found.
        assert!(set.get("unregistered").is_some());
    }
}
