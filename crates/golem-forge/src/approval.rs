//! Approval resolution for side-effecting tool calls.
//!
//! Every tool call whose tool requires approval is routed through an
//! [`ApprovalController`] before it executes. The controller dispatches on
//! its [`ApprovalMode`]: approve everything, deny everything, or ask a
//! callback (typically a human behind the UI bus) and remember approved
//! decisions for the rest of the session.
//!
//! A parent runtime passes its controller to delegated children, so a
//! decision approved once silences repeat prompts for structurally
//! identical calls anywhere in the delegation tree.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::debug;

// ── Requests and decisions ─────────────────────────────────────────

/// A pending approval request presented to the deciding party.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub tool_name: String,
    pub tool_args: serde_json::Value,
    pub description: String,
}

/// How long a decision should be remembered.
///
/// There is deliberately no "always" scope here: persistent approval
/// policy belongs to an external store, not the in-memory session cache.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RememberScope {
    #[default]
    None,
    Session,
}

/// The outcome of an approval request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub approved: bool,
    #[serde(default)]
    pub remember: RememberScope,
    #[serde(default)]
    pub note: Option<String>,
}

impl ApprovalDecision {
    pub fn approved(remember: RememberScope) -> Self {
        Self {
            approved: true,
            remember,
            note: None,
        }
    }

    pub fn denied(note: Option<String>) -> Self {
        Self {
            approved: false,
            remember: RememberScope::None,
            note,
        }
    }
}

/// Async callback bridging an approval request to the deciding party.
///
/// May block arbitrarily long; must not mutate the request; concurrent
/// invocations resolve independently.
pub type ApprovalCallback =
    Arc<dyn Fn(ApprovalRequest) -> BoxFuture<'static, ApprovalDecision> + Send + Sync>;

// ── Modes ──────────────────────────────────────────────────────────

/// Approval dispatch mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    /// Always approved; never prompts, never caches.
    ApproveAll,
    /// Always denied with a stock note.
    Strict,
    /// Check the session memory, else prompt the callback.
    Interactive,
}

// ── Controller ─────────────────────────────────────────────────────

/// One cached, approved, session-scoped decision.
struct MemoryEntry {
    tool_name: String,
    tool_args: serde_json::Value,
    decision: ApprovalDecision,
}

/// Mode dispatch plus the session approval memory.
///
/// The memory maps `(tool_name, args)` to an approved decision, compared
/// by structural equality on the argument value (key order and string
/// whitespace both matter only insofar as `serde_json::Value` equality
/// says they do — map key order does not). Denials are never cached, so
/// every denial stays an explicit choice.
pub struct ApprovalController {
    mode: ApprovalMode,
    callback: Option<ApprovalCallback>,
    memory: Mutex<Vec<MemoryEntry>>,
}

impl std::fmt::Debug for ApprovalController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalController")
            .field("mode", &self.mode)
            .field("cached", &self.memory.lock().map(|m| m.len()).unwrap_or(0))
            .finish()
    }
}

impl ApprovalController {
    /// A controller that approves everything without prompting.
    pub fn approve_all() -> Self {
        Self {
            mode: ApprovalMode::ApproveAll,
            callback: None,
            memory: Mutex::new(Vec::new()),
        }
    }

    /// A controller that denies everything with a stock note.
    pub fn strict() -> Self {
        Self {
            mode: ApprovalMode::Strict,
            callback: None,
            memory: Mutex::new(Vec::new()),
        }
    }

    /// An interactive controller backed by the given callback.
    pub fn interactive(callback: ApprovalCallback) -> Self {
        Self {
            mode: ApprovalMode::Interactive,
            callback: Some(callback),
            memory: Mutex::new(Vec::new()),
        }
    }

    pub fn mode(&self) -> ApprovalMode {
        self.mode
    }

    /// Resolve an approval request according to the controller's mode.
    pub async fn request_approval(&self, request: ApprovalRequest) -> ApprovalDecision {
        match self.mode {
            ApprovalMode::ApproveAll => ApprovalDecision::approved(RememberScope::None),
            ApprovalMode::Strict => ApprovalDecision::denied(Some(format!(
                "Strict mode: {} requires approval",
                request.tool_name
            ))),
            ApprovalMode::Interactive => self.resolve_interactive(request).await,
        }
    }

    async fn resolve_interactive(&self, request: ApprovalRequest) -> ApprovalDecision {
        if let Some(cached) = self.lookup(&request.tool_name, &request.tool_args) {
            debug!(
                "approval memory hit for {}; skipping prompt",
                request.tool_name
            );
            return cached;
        }

        // Interactive controllers are always constructed with a callback.
        let Some(ref callback) = self.callback else {
            return ApprovalDecision::denied(Some(
                "No approval callback configured".to_string(),
            ));
        };

        let decision = callback(request.clone()).await;

        if decision.approved && decision.remember == RememberScope::Session {
            self.remember(request, decision.clone());
        }
        decision
    }

    fn lookup(&self, tool_name: &str, tool_args: &serde_json::Value) -> Option<ApprovalDecision> {
        let memory = self.memory.lock().unwrap_or_else(|e| e.into_inner());
        memory
            .iter()
            .find(|e| e.tool_name == tool_name && &e.tool_args == tool_args)
            .map(|e| e.decision.clone())
    }

    fn remember(&self, request: ApprovalRequest, decision: ApprovalDecision) {
        let mut memory = self.memory.lock().unwrap_or_else(|e| e.into_inner());
        let already = memory
            .iter()
            .any(|e| e.tool_name == request.tool_name && e.tool_args == request.tool_args);
        if !already {
            memory.push(MemoryEntry {
                tool_name: request.tool_name,
                tool_args: request.tool_args,
                decision,
            });
        }
    }

    /// Purge every cached decision.
    pub fn clear(&self) {
        self.memory
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Number of cached decisions (diagnostics).
    pub fn cached_decisions(&self) -> usize {
        self.memory.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

// ── Tests ──────────────────────────────────────────────────────────
