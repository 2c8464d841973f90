//! Typed pub/sub bus between the runtime and UI frontends.
//!
//! Two event categories share one bus: **display events** flow runtime →
//! UI and are fire-and-forget; **action events** flow UI → runtime.
//! Handlers subscribe per event name. Delivery is synchronous within the
//! emitting call, in subscription order; a panicking listener is trapped
//! and logged so later listeners still run. Payloads are serialisable
//! values plus opaque correlation ids — no runtime internals.

use crate::approval::{ApprovalDecision, ApprovalRequest};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::warn;

// ── Display events ─────────────────────────────────────────────────

/// Severity for `status` display events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    Info,
    Warning,
    Error,
}

/// Streaming phase for the `streaming` display event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamPhase {
    Start,
    Append,
    End,
}

/// Worker status carried by `workerUpdate`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Running,
    Waiting,
    Done,
    Error,
}

/// Why a session ended. Emitted only by the root worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionEndReason {
    Completed,
    Error,
    Interrupted,
}

/// A manual-tool catalogue entry for `manualToolsAvailable`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ManualToolEntry {
    pub name: String,
    pub label: String,
    pub category: String,
    pub description: String,
}

/// Runtime → UI events. Fire-and-forget.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum DisplayEvent {
    Message {
        worker: String,
        text: String,
    },
    Streaming {
        worker: String,
        phase: StreamPhase,
        delta: String,
    },
    Status {
        level: StatusLevel,
        text: String,
    },
    ToolStarted {
        tool_call_id: String,
        tool_name: String,
        tool_args: serde_json::Value,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        output: String,
        is_error: bool,
        duration_ms: u64,
    },
    WorkerUpdate {
        worker: String,
        status: WorkerStatus,
        detail: Option<String>,
    },
    ApprovalRequired {
        request_id: u64,
        request: ApprovalRequest,
    },
    ManualToolsAvailable {
        tools: Vec<ManualToolEntry>,
    },
    DiffSummary {
        summary: String,
    },
    DiffContent {
        request_id: u64,
        path: String,
        content: String,
    },
    InputPrompt {
        request_id: u64,
        prompt: String,
    },
    SessionEnd {
        reason: SessionEndReason,
        message: Option<String>,
    },
}

impl DisplayEvent {
    /// The event name handlers subscribe under.
    pub fn name(&self) -> &'static str {
        match self {
            DisplayEvent::Message { .. } => "message",
            DisplayEvent::Streaming { .. } => "streaming",
            DisplayEvent::Status { .. } => "status",
            DisplayEvent::ToolStarted { .. } => "toolStarted",
            DisplayEvent::ToolResult { .. } => "toolResult",
            DisplayEvent::WorkerUpdate { .. } => "workerUpdate",
            DisplayEvent::ApprovalRequired { .. } => "approvalRequired",
            DisplayEvent::ManualToolsAvailable { .. } => "manualToolsAvailable",
            DisplayEvent::DiffSummary { .. } => "diffSummary",
            DisplayEvent::DiffContent { .. } => "diffContent",
            DisplayEvent::InputPrompt { .. } => "inputPrompt",
            DisplayEvent::SessionEnd { .. } => "sessionEnd",
        }
    }
}

// ── Action events ──────────────────────────────────────────────────

/// UI → runtime events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ActionEvent {
    UserInput {
        request_id: u64,
        text: String,
    },
    ApprovalResponse {
        request_id: u64,
        decision: ApprovalDecision,
    },
    ManualToolInvoke {
        tool_name: String,
        tool_args: serde_json::Value,
    },
    Interrupt,
    GetDiff {
        request_id: u64,
        path: Option<String>,
    },
}

impl ActionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ActionEvent::UserInput { .. } => "userInput",
            ActionEvent::ApprovalResponse { .. } => "approvalResponse",
            ActionEvent::ManualToolInvoke { .. } => "manualToolInvoke",
            ActionEvent::Interrupt => "interrupt",
            ActionEvent::GetDiff { .. } => "getDiff",
        }
    }
}

// ── Bus ────────────────────────────────────────────────────────────

/// Handle returned by `subscribe_*`; pass to [`EventBus::unsubscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type DisplayListener = Arc<dyn Fn(&DisplayEvent) + Send + Sync>;
type ActionListener = Arc<dyn Fn(&ActionEvent) + Send + Sync>;

struct Registrations<L> {
    by_name: HashMap<String, Vec<(SubscriptionId, L)>>,
}

impl<L> Registrations<L> {
    fn new() -> Self {
        Self {
            by_name: HashMap::new(),
        }
    }

    fn remove(&mut self, id: SubscriptionId) {
        for listeners in self.by_name.values_mut() {
            listeners.retain(|(sid, _)| *sid != id);
        }
    }
}

/// The shared event bus.
pub struct EventBus {
    display: Mutex<Registrations<DisplayListener>>,
    action: Mutex<Registrations<ActionListener>>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            display: Mutex::new(Registrations::new()),
            action: Mutex::new(Registrations::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn allocate_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Subscribe to a display event by name (e.g. `"toolStarted"`).
    pub fn subscribe_display(
        &self,
        event_name: &str,
        listener: impl Fn(&DisplayEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.allocate_id();
        let mut reg = self.display.lock().unwrap_or_else(|e| e.into_inner());
        reg.by_name
            .entry(event_name.to_string())
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Subscribe to an action event by name (e.g. `"approvalResponse"`).
    pub fn subscribe_action(
        &self,
        event_name: &str,
        listener: impl Fn(&ActionEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.allocate_id();
        let mut reg = self.action.lock().unwrap_or_else(|e| e.into_inner());
        reg.by_name
            .entry(event_name.to_string())
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove a subscription. Idempotent; unknown ids are a no-op.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.display
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        self.action
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
    }

    /// Emit a display event synchronously to its subscribers, in
    /// subscription order. Returns after all listeners have run.
    pub fn emit_display(&self, event: &DisplayEvent) {
        let listeners = {
            let reg = self.display.lock().unwrap_or_else(|e| e.into_inner());
            reg.by_name
                .get(event.name())
                .map(|ls| ls.iter().map(|(_, l)| Arc::clone(l)).collect::<Vec<_>>())
                .unwrap_or_default()
        };
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                warn!("display listener for '{}' panicked; continuing", event.name());
            }
        }
    }

    /// Emit an action event synchronously to its subscribers.
    pub fn emit_action(&self, event: &ActionEvent) {
        let listeners = {
            let reg = self.action.lock().unwrap_or_else(|e| e.into_inner());
            reg.by_name
                .get(event.name())
                .map(|ls| ls.iter().map(|(_, l)| Arc::clone(l)).collect::<Vec<_>>())
                .unwrap_or_default()
        };
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                warn!("action listener for '{}' panicked; continuing", event.name());
            }
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────
