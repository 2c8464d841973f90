//! The worker runtime loop.
//!
//! A [`WorkerRuntime`] drives one worker over one input: build messages,
//! call the model with the LLM-visible tool schemas, route returned tool
//! calls through the [`ToolExecutor`](super::execution::ToolExecutor),
//! append results, and repeat until the model produces a text-only
//! response (single mode), the user ends the conversation (chat mode),
//! or a budget/interrupt stops the loop.
//!
//! Construction validates the whole configuration up front — model
//! compatibility, sandbox requirements, approval wiring — so a run that
//! starts can only fail for input-policy, model, or loop reasons, and
//! those all come back as a failed [`WorkerResult`], never a panic.

use crate::approval::{ApprovalCallback, ApprovalController, ApprovalMode};
use crate::model::{GenerateRequest, ModelProvider, RetryPolicy};
use crate::sandbox::Sandbox;
use crate::tools::core::ToolSet;
use crate::ui::RuntimeUI;
use crate::ui::bus::{EventBus, SessionEndReason, StatusLevel, WorkerStatus};
use crate::worker::definition::{WorkerDefinition, WorkerMode, model_matches};
use crate::worker::events::{EventHandler, NoopHandler, RuntimeEvent};
use crate::worker::execution::{ToolCallOutcome, ToolExecutor};
use crate::worker::input::{WorkerInput, enforce_attachment_policy};
use crate::{Message, UsageInfo};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info};

/// Default iteration ceiling.
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

// ── Interrupt signal ───────────────────────────────────────────────

/// Cooperative cancellation flag, polled at the top of every iteration.
///
/// In-flight model calls and tool executions are never aborted — the
/// loop exits before the next model call once the flag is observed.
#[derive(Clone, Debug, Default)]
pub struct InterruptSignal(Arc<AtomicBool>);

impl InterruptSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ── Errors & results ───────────────────────────────────────────────

/// Configuration failures raised at construction; the run never starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("worker '{0}' declares an empty compatible_models list")]
    EmptyCompatibleModels(String),

    #[error("model '{model}' matches none of worker '{worker}'s compatible_models patterns")]
    IncompatibleModel { worker: String, model: String },

    #[error("worker '{0}' requires a sandbox but none was provided")]
    SandboxRequired(String),

    #[error("interactive approval mode requires a callback, a UI bus, or a shared approval controller")]
    MissingApprovalCallback,

    #[error("worker name '{0}' collides with a reserved tool name")]
    ReservedWorkerName(String),
}

/// Cumulative token totals for a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct TokenTotals {
    pub input: u64,
    pub output: u64,
}

impl TokenTotals {
    fn add(&mut self, usage: &UsageInfo) {
        self.input += usage.input_tokens;
        self.output += usage.output_tokens;
    }
}

/// The outcome of a worker run.
#[derive(Clone, Debug)]
pub struct WorkerResult {
    pub success: bool,
    pub response: Option<String>,
    pub error: Option<String>,
    pub tool_call_count: u32,
    pub tokens: TokenTotals,
}

/// Unique id for one runtime instance.
pub fn generate_instance_id() -> String {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    format!("wk-{ts:x}-{:04x}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

// ── Builder ────────────────────────────────────────────────────────

/// Builder for [`WorkerRuntime`]; `build()` performs every construction
/// check up front so an invalid configuration never starts a run.
pub struct WorkerRuntimeBuilder {
    definition: WorkerDefinition,
    model: Arc<dyn ModelProvider>,
    model_id: String,
    tools: ToolSet,
    sandbox: Option<Arc<Sandbox>>,
    approval_controller: Option<Arc<ApprovalController>>,
    approval_mode: ApprovalMode,
    approval_callback: Option<ApprovalCallback>,
    bus: Option<Arc<EventBus>>,
    handler: Arc<dyn EventHandler>,
    max_iterations: u32,
    retry: RetryPolicy,
    depth: u32,
    delegation_path: Vec<String>,
    interrupt: Option<InterruptSignal>,
}

impl WorkerRuntimeBuilder {
    /// Attach the tool set the worker may call.
    pub fn tools(mut self, tools: ToolSet) -> Self {
        self.tools = tools;
        self
    }

    pub fn sandbox(mut self, sandbox: Arc<Sandbox>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    /// Share an existing controller (and its session memory). Takes
    /// precedence over `approval_mode`.
    pub fn approval_controller(mut self, controller: Arc<ApprovalController>) -> Self {
        self.approval_controller = Some(controller);
        self
    }

    pub fn approval_mode(mut self, mode: ApprovalMode) -> Self {
        self.approval_mode = mode;
        self
    }

    pub fn approval_callback(mut self, callback: ApprovalCallback) -> Self {
        self.approval_callback = Some(callback);
        self
    }

    /// Attach a UI event bus; the runtime creates its own
    /// [`RuntimeUI`] facade on it.
    pub fn bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handler = handler;
        self
    }

    pub fn max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    /// Worker names from the root to (and including) this worker.
    pub fn delegation_path(mut self, path: Vec<String>) -> Self {
        self.delegation_path = path;
        self
    }

    pub fn interrupt(mut self, signal: InterruptSignal) -> Self {
        self.interrupt = Some(signal);
        self
    }

    pub fn build(self) -> Result<WorkerRuntime, ConfigError> {
        let definition = self.definition;

        if let Some(ref patterns) = definition.compatible_models {
            if patterns.is_empty() {
                return Err(ConfigError::EmptyCompatibleModels(definition.name.clone()));
            }
            if !model_matches(patterns, &self.model_id) {
                return Err(ConfigError::IncompatibleModel {
                    worker: definition.name.clone(),
                    model: self.model_id.clone(),
                });
            }
        }

        if definition.requires_sandbox() && self.sandbox.is_none() {
            return Err(ConfigError::SandboxRequired(definition.name.clone()));
        }

        let ui = self
            .bus
            .as_ref()
            .map(|bus| RuntimeUI::new(Arc::clone(bus), definition.name.clone()));

        let approval = match self.approval_controller {
            Some(controller) => controller,
            None => match self.approval_mode {
                ApprovalMode::ApproveAll => Arc::new(ApprovalController::approve_all()),
                ApprovalMode::Strict => Arc::new(ApprovalController::strict()),
                ApprovalMode::Interactive => {
                    let callback = self
                        .approval_callback
                        .or_else(|| ui.as_ref().map(|ui| ui.approval_callback()))
                        .ok_or(ConfigError::MissingApprovalCallback)?;
                    Arc::new(ApprovalController::interactive(callback))
                }
            },
        };

        let interrupt = self.interrupt.unwrap_or_default();
        if let Some(ref ui) = ui {
            let signal = interrupt.clone();
            ui.on_interrupt(move || signal.interrupt());
        }

        let delegation_path = if self.delegation_path.is_empty() {
            vec![definition.name.clone()]
        } else {
            self.delegation_path
        };

        let executor = ToolExecutor::new(Arc::new(self.tools), Arc::clone(&approval));

        Ok(WorkerRuntime {
            instance_id: generate_instance_id(),
            definition,
            model: self.model,
            model_id: self.model_id,
            executor,
            approval,
            sandbox: self.sandbox,
            ui,
            handler: self.handler,
            max_iterations: self.max_iterations,
            retry: self.retry,
            depth: self.depth,
            delegation_path,
            interrupt,
            messages: Vec::new(),
            iterations: 0,
            tool_call_count: 0,
            tokens: TokenTotals::default(),
        })
    }
}

// ── Runtime ────────────────────────────────────────────────────────

/// An executing instance of a worker on a single input.
pub struct WorkerRuntime {
    instance_id: String,
    definition: WorkerDefinition,
    model: Arc<dyn ModelProvider>,
    model_id: String,
    executor: ToolExecutor,
    approval: Arc<ApprovalController>,
    sandbox: Option<Arc<Sandbox>>,
    ui: Option<Arc<RuntimeUI>>,
    handler: Arc<dyn EventHandler>,
    max_iterations: u32,
    retry: RetryPolicy,
    depth: u32,
    delegation_path: Vec<String>,
    interrupt: InterruptSignal,

    // Per-run state.
    messages: Vec<Message>,
    iterations: u32,
    tool_call_count: u32,
    tokens: TokenTotals,
}

impl WorkerRuntime {
    /// Start building a runtime for `definition` on `model`.
    pub fn builder(
        definition: WorkerDefinition,
        model: Arc<dyn ModelProvider>,
        model_id: impl Into<String>,
    ) -> WorkerRuntimeBuilder {
        WorkerRuntimeBuilder {
            definition,
            model,
            model_id: model_id.into(),
            tools: ToolSet::new(),
            sandbox: None,
            approval_controller: None,
            approval_mode: ApprovalMode::Interactive,
            approval_callback: None,
            bus: None,
            handler: Arc::new(NoopHandler),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            retry: RetryPolicy::none(),
            depth: 0,
            delegation_path: Vec::new(),
            interrupt: None,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn definition(&self) -> &WorkerDefinition {
        &self.definition
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn delegation_path(&self) -> &[String] {
        &self.delegation_path
    }

    pub fn approval_controller(&self) -> &Arc<ApprovalController> {
        &self.approval
    }

    pub fn sandbox(&self) -> Option<&Arc<Sandbox>> {
        self.sandbox.as_ref()
    }

    pub fn interrupt_signal(&self) -> InterruptSignal {
        self.interrupt.clone()
    }

    /// Run the worker to completion on one input.
    pub async fn run(&mut self, input: impl Into<WorkerInput>) -> WorkerResult {
        let input = input.into();
        info!(
            "worker '{}' run started: instance={}, model={}, depth={}",
            self.definition.name, self.instance_id, self.model_id, self.depth
        );

        if let Some(ui) = self.ui.clone() {
            ui.update_worker(WorkerStatus::Running, None);
            let manual = self.executor.tools().manual_tools();
            if !manual.is_empty() {
                ui.show_manual_tools(manual);
            }
        }

        // Input policy, before any model call or attachment read.
        if input.is_empty() && !self.definition.allow_empty_input {
            return self.fail("No input provided and the worker does not allow empty input".into());
        }
        if let Err(violation) =
            enforce_attachment_policy(&self.definition.attachment_policy, &input.attachments)
        {
            return self.fail(violation);
        }

        // Message assembly: instructions verbatim, then the user text with
        // each attachment as a typed file part.
        self.messages = vec![Message::system(&self.definition.instructions)];
        let parts = input.attachments.iter().map(|a| a.to_file_part()).collect();
        self.messages.push(Message::user_with_parts(input.content, parts));

        self.drive_loop().await
    }

    async fn drive_loop(&mut self) -> WorkerResult {
        let mut last_text: Option<String> = None;

        loop {
            // Interrupt is polled once per iteration, before the counter
            // moves — an interrupted run reports the iterations it finished.
            if self.interrupt.is_interrupted() {
                self.handler.on_event(&RuntimeEvent::Interrupted);
                self.end_session(SessionEndReason::Interrupted, None);
                return WorkerResult {
                    success: true,
                    response: Some("[Interrupted]".into()),
                    error: None,
                    tool_call_count: self.tool_call_count,
                    tokens: self.tokens,
                };
            }

            if self.iterations >= self.max_iterations {
                self.handler.on_event(&RuntimeEvent::IterationLimitReached {
                    max_iterations: self.max_iterations,
                });
                return self.fail(format!(
                    "Maximum iterations ({}) exceeded",
                    self.max_iterations
                ));
            }
            self.iterations += 1;

            self.handler.on_event(&RuntimeEvent::MessageSend {
                iteration: self.iterations,
                max_iterations: self.max_iterations,
                message_count: self.messages.len(),
            });

            let request = GenerateRequest {
                model: self.model_id.clone(),
                messages: self.messages.clone(),
                tools: self.executor.tools().llm_definitions(),
            };
            let model = Arc::clone(&self.model);
            let response = match self
                .retry
                .run(|| {
                    let model = Arc::clone(&model);
                    let request = request.clone();
                    async move { model.generate(request).await }
                })
                .await
            {
                Ok(response) => response,
                Err(e) => return self.fail(e),
            };

            self.tokens.add(&response.usage);
            self.handler.on_event(&RuntimeEvent::TokenUsage {
                input_tokens: response.usage.input_tokens,
                output_tokens: response.usage.output_tokens,
            });
            self.handler.on_event(&RuntimeEvent::ResponseReceive {
                iteration: self.iterations,
                text: response.text.as_deref(),
                tool_call_count: response.tool_calls.len(),
            });

            if let Some(ref text) = response.text
                && !text.is_empty()
            {
                if let Some(ui) = &self.ui {
                    ui.show_message(text.clone());
                }
                last_text = Some(text.clone());
            }

            if response.tool_calls.is_empty() {
                match self.definition.mode {
                    WorkerMode::Single => {
                        if let Some(ref text) = response.text {
                            self.messages.push(Message::assistant_text(text.clone()));
                        }
                        self.handler.on_event(&RuntimeEvent::Finished);
                        if let Some(ui) = &self.ui {
                            ui.update_worker(WorkerStatus::Done, None);
                        }
                        self.end_session(SessionEndReason::Completed, None);
                        return WorkerResult {
                            success: true,
                            response: last_text,
                            error: None,
                            tool_call_count: self.tool_call_count,
                            tokens: self.tokens,
                        };
                    }
                    WorkerMode::Chat => {
                        if let Some(ref text) = response.text {
                            self.messages.push(Message::assistant_text(text.clone()));
                        }
                        if !self.next_chat_turn(&response.usage).await {
                            self.handler.on_event(&RuntimeEvent::Finished);
                            if let Some(ui) = &self.ui {
                                ui.update_worker(WorkerStatus::Done, None);
                            }
                            self.end_session(SessionEndReason::Completed, None);
                            return WorkerResult {
                                success: true,
                                response: last_text,
                                error: None,
                                tool_call_count: self.tool_call_count,
                                tokens: self.tokens,
                            };
                        }
                        continue;
                    }
                }
            }

            // Tool calls: append the assistant turn, execute the batch
            // sequentially, append one result entry per call.
            self.messages
                .push(Message::assistant(response.text.clone(), response.tool_calls.clone()));
            self.tool_call_count += response.tool_calls.len() as u32;

            let snapshot = Arc::new(self.messages.clone());
            let outcomes: Vec<ToolCallOutcome> = self
                .executor
                .execute_batch(
                    &response.tool_calls,
                    snapshot,
                    self.handler.as_ref(),
                    self.ui.as_deref(),
                )
                .await;
            self.messages.push(Message::tool_results(
                outcomes.iter().map(|o| o.to_result_part()).collect(),
            ));
        }
    }

    /// Chat-mode turn boundary: report context usage, prompt for the next
    /// user message, and handle `/new` and `/exit`. Returns `false` when
    /// the conversation should end.
    async fn next_chat_turn(&mut self, usage: &UsageInfo) -> bool {
        let used = usage.total();
        self.handler.on_event(&RuntimeEvent::ContextUsage {
            used_tokens: used,
            max_tokens: self.definition.max_context_tokens,
        });
        if let Some(max) = self.definition.max_context_tokens
            && used > max
            && let Some(ui) = &self.ui
        {
            // Never truncate silently; the user decides with /new.
            ui.show_status(
                StatusLevel::Warning,
                format!(
                    "Context usage {used} tokens exceeds the limit of {max}. \
                     Use /new to reset the conversation."
                ),
            );
        }

        let Some(ui) = self.ui.clone() else {
            debug!("chat worker has no UI attached; ending conversation");
            return false;
        };

        loop {
            let text = ui
                .get_user_input("Enter a message (/new resets, /exit ends)")
                .await;
            match text.trim() {
                "/exit" => return false,
                "/new" => {
                    // Reset to only the system message.
                    self.messages = vec![Message::system(&self.definition.instructions)];
                    ui.show_status(StatusLevel::Info, "Conversation reset");
                }
                "" => {}
                other => {
                    self.messages.push(Message::user(other));
                    return true;
                }
            }
        }
    }

    /// Execute a tool on explicit manual (UI-initiated) invocation.
    ///
    /// Manual invocation lives with the runtime instance that registered
    /// the tool — a child run's manual tools never reach the parent.
    pub async fn invoke_manual_tool(
        &self,
        tool_name: &str,
        tool_args: serde_json::Value,
    ) -> ToolCallOutcome {
        self.executor
            .execute_manual(tool_name, tool_args, self.handler.as_ref(), self.ui.as_deref())
            .await
    }

    fn fail(&self, error: String) -> WorkerResult {
        self.handler
            .on_event(&RuntimeEvent::ExecutionError { error: &error });
        if let Some(ui) = &self.ui {
            ui.show_status(StatusLevel::Error, error.clone());
            ui.update_worker(WorkerStatus::Error, Some(error.clone()));
        }
        self.end_session(SessionEndReason::Error, Some(error.clone()));
        WorkerResult {
            success: false,
            response: None,
            error: Some(error),
            tool_call_count: self.tool_call_count,
            tokens: self.tokens,
        }
    }

    /// `sessionEnd` is the root worker's to emit — exactly once per
    /// terminal state, never from delegated children.
    fn end_session(&self, reason: SessionEndReason, message: Option<String>) {
        if self.depth == 0
            && let Some(ui) = &self.ui
        {
            ui.end_session(reason, message);
        }
    }

    /// Release UI subscriptions. Sandbox contents persist by design.
    pub fn dispose(&mut self) {
        if let Some(ui) = &self.ui {
            ui.dispose();
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────
