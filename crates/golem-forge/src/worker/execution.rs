//! The tool executor: approval resolution, invocation, and event
//! emission for every tool call.
//!
//! Kept separate from the runtime loop so it is independently testable
//! and reusable — manual UI-initiated invocations go through the same
//! path as model-initiated batches. Batches execute strictly
//! sequentially: deterministic approval ordering for the user,
//! predictable side-effect sequencing.

use crate::approval::{ApprovalController, ApprovalRequest};
use crate::tools::core::{ToolContext, ToolSet, log_tool_call, truncate_chars, validate_tool_arguments};
use crate::ui::RuntimeUI;
use crate::worker::events::{EventHandler, RuntimeEvent};
use crate::{Message, ToolCall, ToolResultPart};
use std::sync::Arc;
use std::time::Instant;

/// Maximum characters of tool output carried in event payloads. The full
/// output still reaches the model.
pub const EVENT_OUTPUT_LIMIT: usize = 1000;

/// The result of executing one tool call.
#[derive(Clone, Debug)]
pub struct ToolCallOutcome {
    pub tool_call_id: String,
    pub tool_name: String,
    /// Raw tool return value, or an error string. Never parsed by the
    /// runtime — it flows back to the model verbatim.
    pub output: serde_json::Value,
    pub is_error: bool,
    pub duration_ms: u64,
}

impl ToolCallOutcome {
    /// Convert to a tool-result message entry.
    pub fn to_result_part(&self) -> ToolResultPart {
        ToolResultPart {
            tool_call_id: self.tool_call_id.clone(),
            tool_name: self.tool_name.clone(),
            output: self.output.clone(),
            is_error: self.is_error,
        }
    }
}

/// Executes tool calls against a [`ToolSet`], routing each through the
/// [`ApprovalController`] and emitting observability events.
pub struct ToolExecutor {
    tools: Arc<ToolSet>,
    approval: Arc<ApprovalController>,
}

impl ToolExecutor {
    pub fn new(tools: Arc<ToolSet>, approval: Arc<ApprovalController>) -> Self {
        Self { tools, approval }
    }

    pub fn tools(&self) -> &Arc<ToolSet> {
        &self.tools
    }

    /// Execute a batch of calls sequentially, in model order.
    pub async fn execute_batch(
        &self,
        calls: &[ToolCall],
        messages: Arc<Vec<Message>>,
        handler: &dyn EventHandler,
        ui: Option<&RuntimeUI>,
    ) -> Vec<ToolCallOutcome> {
        let mut outcomes = Vec::with_capacity(calls.len());
        for (position, call) in calls.iter().enumerate() {
            outcomes.push(
                self.execute_call(
                    call,
                    position,
                    calls.len(),
                    Arc::clone(&messages),
                    handler,
                    ui,
                )
                .await,
            );
        }
        outcomes
    }

    /// Execute one call: lookup → approval → invoke → events.
    pub async fn execute_call(
        &self,
        call: &ToolCall,
        position: usize,
        batch_size: usize,
        messages: Arc<Vec<Message>>,
        handler: &dyn EventHandler,
        ui: Option<&RuntimeUI>,
    ) -> ToolCallOutcome {
        let start = Instant::now();
        handler.on_event(&RuntimeEvent::ToolCallStart {
            tool_call_id: &call.tool_call_id,
            tool_name: &call.tool_name,
            tool_args: &call.tool_args,
            position,
            batch_size,
        });
        if let Some(ui) = ui {
            ui.show_tool_started(&call.tool_call_id, &call.tool_name, call.tool_args.clone());
        }

        let result = self.resolve_and_invoke(call, messages, handler).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let outcome = match result {
            Ok(output) => ToolCallOutcome {
                tool_call_id: call.tool_call_id.clone(),
                tool_name: call.tool_name.clone(),
                output,
                is_error: false,
                duration_ms,
            },
            Err(message) => ToolCallOutcome {
                tool_call_id: call.tool_call_id.clone(),
                tool_name: call.tool_name.clone(),
                output: serde_json::Value::String(message),
                is_error: true,
                duration_ms,
            },
        };

        let rendered = match &outcome.output {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let preview = truncate_chars(&rendered, EVENT_OUTPUT_LIMIT);
        if outcome.is_error {
            handler.on_event(&RuntimeEvent::ToolCallError {
                tool_call_id: &outcome.tool_call_id,
                tool_name: &outcome.tool_name,
                error: &preview,
                duration_ms,
            });
        } else {
            handler.on_event(&RuntimeEvent::ToolCallEnd {
                tool_call_id: &outcome.tool_call_id,
                tool_name: &outcome.tool_name,
                output_preview: &preview,
                duration_ms,
            });
        }
        if let Some(ui) = ui {
            ui.show_tool_result(
                &outcome.tool_call_id,
                &outcome.tool_name,
                preview,
                outcome.is_error,
                duration_ms,
            );
        }

        outcome
    }

    async fn resolve_and_invoke(
        &self,
        call: &ToolCall,
        messages: Arc<Vec<Message>>,
        handler: &dyn EventHandler,
    ) -> Result<serde_json::Value, String> {
        let Some(tool) = self.tools.get(&call.tool_name) else {
            return Err(format!("Error: Tool not found: {}", call.tool_name));
        };

        if self.tools.validates_args()
            && let Some(error) = validate_tool_arguments(tool.as_ref(), &call.tool_args)
        {
            return Err(format!("Error: {error}"));
        }

        // Approval predicates are assumed pure; a `true` routes the call
        // through the controller before anything executes.
        if tool.needs_approval(&call.tool_args) {
            let request = ApprovalRequest {
                tool_name: call.tool_name.clone(),
                tool_args: call.tool_args.clone(),
                description: tool.definition().description,
            };
            handler.on_event(&RuntimeEvent::ApprovalRequested {
                tool_name: &call.tool_name,
            });
            let decision = self.approval.request_approval(request).await;
            handler.on_event(&RuntimeEvent::ApprovalDecided {
                tool_name: &call.tool_name,
                approved: decision.approved,
            });

            if !decision.approved {
                let note = decision
                    .note
                    .as_deref()
                    .map(|n| format!(": {n}"))
                    .unwrap_or_default();
                return Err(format!("Error: [DENIED] {}{note}", call.tool_name));
            }
        }

        log_tool_call(&call.tool_name, &call.tool_args);
        let ctx = ToolContext::new(call.tool_call_id.clone(), messages);
        tool.execute(&call.tool_args, &ctx)
            .await
            .map_err(|e| format!("Error: {e}"))
    }

    /// Execute a tool on explicit manual invocation (UI-initiated).
    ///
    /// Goes through the same approval and event path as model calls; the
    /// synthetic call id marks the origin.
    pub async fn execute_manual(
        &self,
        tool_name: &str,
        tool_args: serde_json::Value,
        handler: &dyn EventHandler,
        ui: Option<&RuntimeUI>,
    ) -> ToolCallOutcome {
        static MANUAL_COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);
        let n = MANUAL_COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let call = ToolCall::new(format!("manual-{n}"), tool_name, tool_args);
        self.execute_call(&call, 0, 1, Arc::new(Vec::new()), handler, ui)
            .await
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::{ApprovalCallback, ApprovalDecision, RememberScope};
    use crate::tools::core::FnTool;
    use crate::worker::events::{FnEventHandler, NoopHandler};
    use crate::{ToolDef, json_schema_for};
    use schemars::JsonSchema;
    use serde::Deserialize;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Deserialize, JsonSchema)]
    struct EchoArgs {
        text: String,
    }

    fn echo_tool() -> FnTool {
        FnTool::new(
            ToolDef::new("echo", "Echo the input", json_schema_for::<EchoArgs>()),
            |args: EchoArgs| async move { Ok(serde_json::json!(args.text)) },
        )
    }

    fn failing_tool() -> FnTool {
        FnTool::new(
            ToolDef::new("explode", "Always fails", serde_json::json!({"type": "object"})),
            |_: serde_json::Value| async move {
                Err::<serde_json::Value, String>("disk on fire".to_string())
            },
        )
    }

    fn executor(tools: ToolSet, approval: ApprovalController) -> ToolExecutor {
        ToolExecutor::new(Arc::new(tools), Arc::new(approval))
    }

    fn call(id: &str, name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall::new(id, name, args)
    }

    #[tokio::test]
    async fn successful_call_returns_output() {
        let exec = executor(
            ToolSet::new().with(echo_tool()),
            ApprovalController::approve_all(),
        );
        let outcome = exec
            .execute_call(
                &call("c1", "echo", serde_json::json!({"text": "hi"})),
                0,
                1,
                Arc::new(Vec::new()),
                &NoopHandler,
                None,
            )
            .await;

        assert!(!outcome.is_error);
        assert_eq!(outcome.output, serde_json::json!("hi"));
        assert_eq!(outcome.tool_call_id, "c1");
    }

    #[tokio::test]
    async fn unknown_tool_is_a_distinguished_error() {
        let exec = executor(ToolSet::new(), ApprovalController::approve_all());
        let outcome = exec
            .execute_call(
                &call("c1", "missing", serde_json::json!({})),
                0,
                1,
                Arc::new(Vec::new()),
                &NoopHandler,
                None,
            )
            .await;

        assert!(outcome.is_error);
        assert_eq!(
            outcome.output,
            serde_json::json!("Error: Tool not found: missing")
        );
    }

    #[tokio::test]
    async fn failing_tool_flattens_to_error_string() {
        let exec = executor(
            ToolSet::new().with(failing_tool()),
            ApprovalController::approve_all(),
        );
        let outcome = exec
            .execute_call(
                &call("c1", "explode", serde_json::json!({})),
                0,
                1,
                Arc::new(Vec::new()),
                &NoopHandler,
                None,
            )
            .await;

        assert!(outcome.is_error);
        assert_eq!(outcome.output, serde_json::json!("Error: disk on fire"));
    }

    #[tokio::test]
    async fn denial_produces_denied_output() {
        let gated = echo_tool().requires_approval(true);
        let exec = executor(ToolSet::new().with(gated), ApprovalController::strict());
        let outcome = exec
            .execute_call(
                &call("c1", "echo", serde_json::json!({"text": "x"})),
                0,
                1,
                Arc::new(Vec::new()),
                &NoopHandler,
                None,
            )
            .await;

        assert!(outcome.is_error);
        assert_eq!(
            outcome.output,
            serde_json::json!("Error: [DENIED] echo: Strict mode: echo requires approval")
        );
    }

    #[tokio::test]
    async fn approved_gated_call_executes() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_cb = calls.clone();
        let callback: ApprovalCallback = Arc::new(move |_| {
            calls_in_cb.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { ApprovalDecision::approved(RememberScope::None) })
        });
        let gated = echo_tool().requires_approval(true);
        let exec = executor(
            ToolSet::new().with(gated),
            ApprovalController::interactive(callback),
        );

        let outcome = exec
            .execute_call(
                &call("c1", "echo", serde_json::json!({"text": "ok"})),
                0,
                1,
                Arc::new(Vec::new()),
                &NoopHandler,
                None,
            )
            .await;

        assert!(!outcome.is_error);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ungated_tools_skip_the_controller() {
        // A strict controller would deny anything it is asked about; the
        // ungated tool must never ask.
        let exec = executor(
            ToolSet::new().with(echo_tool()),
            ApprovalController::strict(),
        );
        let outcome = exec
            .execute_call(
                &call("c1", "echo", serde_json::json!({"text": "free"})),
                0,
                1,
                Arc::new(Vec::new()),
                &NoopHandler,
                None,
            )
            .await;
        assert!(!outcome.is_error);
    }

    #[tokio::test]
    async fn batch_executes_sequentially_in_order() {
        let exec = executor(
            ToolSet::new().with(echo_tool()),
            ApprovalController::approve_all(),
        );
        let events = Arc::new(Mutex::new(Vec::new()));
        let e = events.clone();
        let handler = FnEventHandler::new(move |event| {
            let tag = match event {
                RuntimeEvent::ToolCallStart { tool_call_id, .. } => {
                    format!("start:{tool_call_id}")
                }
                RuntimeEvent::ToolCallEnd { tool_call_id, .. } => format!("end:{tool_call_id}"),
                RuntimeEvent::ToolCallError { tool_call_id, .. } => {
                    format!("error:{tool_call_id}")
                }
                _ => return,
            };
            e.lock().unwrap().push(tag);
        });

        let batch = [
            call("c1", "echo", serde_json::json!({"text": "1"})),
            call("c2", "echo", serde_json::json!({"text": "2"})),
            call("c3", "echo", serde_json::json!({"text": "3"})),
        ];
        let outcomes = exec
            .execute_batch(&batch, Arc::new(Vec::new()), &handler, None)
            .await;

        assert_eq!(outcomes.len(), 3);
        // Start of call N+1 strictly after end of call N.
        assert_eq!(
            *events.lock().unwrap(),
            vec!["start:c1", "end:c1", "start:c2", "end:c2", "start:c3", "end:c3"]
        );
    }

    #[tokio::test]
    async fn event_output_is_truncated_but_result_is_full() {
        let big = FnTool::new(
            ToolDef::new("big", "Big output", serde_json::json!({"type": "object"})),
            |_: serde_json::Value| async move { Ok(serde_json::json!("a".repeat(5000))) },
        );
        let exec = executor(ToolSet::new().with(big), ApprovalController::approve_all());

        let previews = Arc::new(Mutex::new(Vec::new()));
        let p = previews.clone();
        let handler = FnEventHandler::new(move |event| {
            if let RuntimeEvent::ToolCallEnd { output_preview, .. } = event {
                p.lock().unwrap().push(output_preview.len());
            }
        });

        let outcome = exec
            .execute_call(
                &call("c1", "big", serde_json::json!({})),
                0,
                1,
                Arc::new(Vec::new()),
                &handler,
                None,
            )
            .await;

        assert_eq!(outcome.output.as_str().unwrap().len(), 5000);
        let previews = previews.lock().unwrap();
        assert!(previews[0] <= EVENT_OUTPUT_LIMIT + "...[truncated]".len());
    }

    #[tokio::test]
    async fn arg_validation_rejects_before_execution() {
        let exec = ToolExecutor::new(
            Arc::new(ToolSet::new().with_arg_validation(true).with(echo_tool())),
            Arc::new(ApprovalController::approve_all()),
        );
        let outcome = exec
            .execute_call(
                &call("c1", "echo", serde_json::json!({"text": 42})),
                0,
                1,
                Arc::new(Vec::new()),
                &NoopHandler,
                None,
            )
            .await;

        assert!(outcome.is_error);
        let text = outcome.output.as_str().unwrap();
        assert!(text.starts_with("Error: argument validation failed"));
    }

    #[tokio::test]
    async fn manual_invocation_goes_through_the_same_path() {
        let exec = executor(
            ToolSet::new().with(echo_tool()),
            ApprovalController::approve_all(),
        );
        let outcome = exec
            .execute_manual(
                "echo",
                serde_json::json!({"text": "manual"}),
                &NoopHandler,
                None,
            )
            .await;

        assert!(!outcome.is_error);
        assert!(outcome.tool_call_id.starts_with("manual-"));
        assert_eq!(outcome.output, serde_json::json!("manual"));
    }

    #[tokio::test]
    async fn approval_events_fire_in_strict_sequence() {
        let gated = echo_tool().requires_approval(true);
        let exec = executor(ToolSet::new().with(gated), ApprovalController::strict());

        let events = Arc::new(Mutex::new(Vec::new()));
        let e = events.clone();
        let handler = FnEventHandler::new(move |event| {
            let tag = match event {
                RuntimeEvent::ToolCallStart { .. } => "start",
                RuntimeEvent::ApprovalRequested { .. } => "approval_request",
                RuntimeEvent::ApprovalDecided { .. } => "approval_decision",
                RuntimeEvent::ToolCallEnd { .. } => "end",
                RuntimeEvent::ToolCallError { .. } => "error",
                _ => return,
            };
            e.lock().unwrap().push(tag);
        });

        exec.execute_call(
            &call("c1", "echo", serde_json::json!({"text": "x"})),
            0,
            1,
            Arc::new(Vec::new()),
            &handler,
            None,
        )
        .await;

        assert_eq!(
            *events.lock().unwrap(),
            vec!["start", "approval_request", "approval_decision", "error"]
        );
    }

    #[tokio::test]
    async fn denied_batch_member_does_not_stop_later_calls() {
        let gated = FnTool::new(
            ToolDef::new("gated", "Gated", serde_json::json!({"type": "object"})),
            |_: serde_json::Value| async move { Ok(serde_json::json!("ran")) },
        )
        .requires_approval(true);
        let exec = executor(
            ToolSet::new().with(gated).with(echo_tool()),
            ApprovalController::strict(),
        );

        let batch = [
            call("c1", "gated", serde_json::json!({})),
            call("c2", "echo", serde_json::json!({"text": "after"})),
        ];
        let outcomes = exec
            .execute_batch(&batch, Arc::new(Vec::new()), &NoopHandler, None)
            .await;

        assert!(outcomes[0].is_error);
        assert!(!outcomes[1].is_error);
        assert_eq!(outcomes[1].output, serde_json::json!("after"));
    }
}
