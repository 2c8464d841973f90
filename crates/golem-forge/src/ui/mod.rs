//! UI-facing surface of the runtime.
//!
//! [`RuntimeUI`] is a facade over the [`EventBus`](bus::EventBus): it emits
//! every display event the runtime produces and resolves the interactive
//! round-trips (approval, user input) by pairing a display event carrying a
//! `request_id` with the matching action event. No timeouts are imposed —
//! cancellation flows through the `interrupt` action, which fails all
//! pending requests with their safe fallbacks (denied / `/exit`).

pub mod bus;
pub mod tracing;

use crate::approval::{ApprovalCallback, ApprovalDecision, ApprovalRequest};
use bus::{
    ActionEvent, DisplayEvent, EventBus, ManualToolEntry, SessionEndReason, StatusLevel,
    StreamPhase, SubscriptionId, WorkerStatus,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// In-flight request/response round-trips, keyed by request id.
#[derive(Default)]
struct PendingRequests {
    approvals: HashMap<u64, oneshot::Sender<ApprovalDecision>>,
    inputs: HashMap<u64, oneshot::Sender<String>>,
}

impl PendingRequests {
    /// Drop every pending sender; receivers observe closure and fall back.
    fn cancel_all(&mut self) {
        self.approvals.clear();
        self.inputs.clear();
    }
}

/// Facade the runtime uses to talk to whatever frontend is on the bus.
///
/// Construct one per runtime instance with [`RuntimeUI::new`]; call
/// [`dispose`](RuntimeUI::dispose) when the runtime is done to drop its
/// bus subscriptions and cancel outstanding requests.
pub struct RuntimeUI {
    bus: Arc<EventBus>,
    worker: String,
    pending: Arc<Mutex<PendingRequests>>,
    next_request_id: AtomicU64,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl std::fmt::Debug for RuntimeUI {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeUI")
            .field("worker", &self.worker)
            .finish_non_exhaustive()
    }
}

impl RuntimeUI {
    /// Attach a facade for `worker` to the bus and wire up the action-side
    /// plumbing (`approvalResponse`, `userInput`, `interrupt`).
    pub fn new(bus: Arc<EventBus>, worker: impl Into<String>) -> Arc<Self> {
        let ui = Arc::new(Self {
            bus: Arc::clone(&bus),
            worker: worker.into(),
            pending: Arc::new(Mutex::new(PendingRequests::default())),
            next_request_id: AtomicU64::new(1),
            subscriptions: Mutex::new(Vec::new()),
        });

        let pending = Arc::clone(&ui.pending);
        let approval_sub = bus.subscribe_action("approvalResponse", move |event| {
            if let ActionEvent::ApprovalResponse {
                request_id,
                decision,
            } = event
            {
                let sender = pending
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .approvals
                    .remove(request_id);
                if let Some(tx) = sender {
                    let _ = tx.send(decision.clone());
                }
            }
        });

        let pending = Arc::clone(&ui.pending);
        let input_sub = bus.subscribe_action("userInput", move |event| {
            if let ActionEvent::UserInput { request_id, text } = event {
                let sender = pending
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .inputs
                    .remove(request_id);
                if let Some(tx) = sender {
                    let _ = tx.send(text.clone());
                }
            }
        });

        let pending = Arc::clone(&ui.pending);
        let interrupt_sub = bus.subscribe_action("interrupt", move |_| {
            pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .cancel_all();
        });

        ui.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend([approval_sub, input_sub, interrupt_sub]);
        ui
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn worker(&self) -> &str {
        &self.worker
    }

    // ── Display emitters ───────────────────────────────────────────

    pub fn show_message(&self, text: impl Into<String>) {
        self.bus.emit_display(&DisplayEvent::Message {
            worker: self.worker.clone(),
            text: text.into(),
        });
    }

    pub fn show_status(&self, level: StatusLevel, text: impl Into<String>) {
        self.bus.emit_display(&DisplayEvent::Status {
            level,
            text: text.into(),
        });
    }

    pub fn start_streaming(&self) {
        self.emit_streaming(StreamPhase::Start, String::new());
    }

    pub fn append_streaming(&self, delta: impl Into<String>) {
        self.emit_streaming(StreamPhase::Append, delta.into());
    }

    pub fn end_streaming(&self) {
        self.emit_streaming(StreamPhase::End, String::new());
    }

    fn emit_streaming(&self, phase: StreamPhase, delta: String) {
        self.bus.emit_display(&DisplayEvent::Streaming {
            worker: self.worker.clone(),
            phase,
            delta,
        });
    }

    pub fn show_tool_started(
        &self,
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        tool_args: serde_json::Value,
    ) {
        self.bus.emit_display(&DisplayEvent::ToolStarted {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            tool_args,
        });
    }

    pub fn show_tool_result(
        &self,
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        output: impl Into<String>,
        is_error: bool,
        duration_ms: u64,
    ) {
        self.bus.emit_display(&DisplayEvent::ToolResult {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            output: output.into(),
            is_error,
            duration_ms,
        });
    }

    pub fn update_worker(&self, status: WorkerStatus, detail: Option<String>) {
        self.bus.emit_display(&DisplayEvent::WorkerUpdate {
            worker: self.worker.clone(),
            status,
            detail,
        });
    }

    pub fn show_manual_tools(&self, tools: Vec<ManualToolEntry>) {
        self.bus
            .emit_display(&DisplayEvent::ManualToolsAvailable { tools });
    }

    pub fn show_diff_summary(&self, summary: impl Into<String>) {
        self.bus.emit_display(&DisplayEvent::DiffSummary {
            summary: summary.into(),
        });
    }

    pub fn show_diff_content(
        &self,
        request_id: u64,
        path: impl Into<String>,
        content: impl Into<String>,
    ) {
        self.bus.emit_display(&DisplayEvent::DiffContent {
            request_id,
            path: path.into(),
            content: content.into(),
        });
    }

    /// Emit `sessionEnd`. The runtime calls this only at depth 0.
    pub fn end_session(&self, reason: SessionEndReason, message: Option<String>) {
        self.bus
            .emit_display(&DisplayEvent::SessionEnd { reason, message });
    }

    // ── Request/response round-trips ───────────────────────────────

    /// Ask the frontend for an approval decision.
    ///
    /// Resolves when a matching `approvalResponse` action arrives; an
    /// interrupt cancels the request and yields a denial.
    pub async fn request_approval(&self, request: ApprovalRequest) -> ApprovalDecision {
        let (tx, rx) = oneshot::channel();
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .approvals
            .insert(request_id, tx);

        self.bus.emit_display(&DisplayEvent::ApprovalRequired {
            request_id,
            request,
        });

        match rx.await {
            Ok(decision) => decision,
            Err(_) => ApprovalDecision::denied(Some("Interrupted".to_string())),
        }
    }

    /// Prompt the frontend for the next user message.
    ///
    /// An interrupt cancels the request and yields `/exit` so the chat
    /// loop winds down.
    pub async fn get_user_input(&self, prompt: impl Into<String>) -> String {
        let (tx, rx) = oneshot::channel();
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .inputs
            .insert(request_id, tx);

        self.bus.emit_display(&DisplayEvent::InputPrompt {
            request_id,
            prompt: prompt.into(),
        });

        rx.await.unwrap_or_else(|_| "/exit".to_string())
    }

    /// An [`ApprovalCallback`] bridging an interactive controller to this
    /// facade's `approvalRequired`/`approvalResponse` round-trip.
    pub fn approval_callback(self: &Arc<Self>) -> ApprovalCallback {
        let ui = Arc::clone(self);
        Arc::new(move |request| {
            let ui = Arc::clone(&ui);
            Box::pin(async move { ui.request_approval(request).await })
        })
    }

    // ── Action-side handlers ───────────────────────────────────────

    /// Run a handler on every `interrupt` action.
    pub fn on_interrupt(&self, handler: impl Fn() + Send + Sync + 'static) -> SubscriptionId {
        let id = self.bus.subscribe_action("interrupt", move |_| handler());
        self.track(id);
        id
    }

    /// Run a handler on every `manualToolInvoke` action.
    pub fn on_manual_tool_invoke(
        &self,
        handler: impl Fn(&str, &serde_json::Value) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.bus.subscribe_action("manualToolInvoke", move |event| {
            if let ActionEvent::ManualToolInvoke {
                tool_name,
                tool_args,
            } = event
            {
                handler(tool_name, tool_args);
            }
        });
        self.track(id);
        id
    }

    /// Run a handler on every `getDiff` action. The handler answers by
    /// emitting `diffContent` with the same request id.
    pub fn on_get_diff(
        &self,
        handler: impl Fn(u64, Option<&str>) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.bus.subscribe_action("getDiff", move |event| {
            if let ActionEvent::GetDiff { request_id, path } = event {
                handler(*request_id, path.as_deref());
            }
        });
        self.track(id);
        id
    }

    fn track(&self, id: SubscriptionId) {
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(id);
    }

    /// Drop all bus subscriptions and cancel outstanding requests.
    /// Idempotent.
    pub fn dispose(&self) {
        let ids: Vec<SubscriptionId> = self
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for id in ids {
            self.bus.unsubscribe(id);
        }
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .cancel_all();
    }
}

// ── Tests ──────────────────────────────────────────────────────────
