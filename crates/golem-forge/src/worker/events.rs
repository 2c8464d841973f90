//! Runtime events and the handler family observing them.
//!
//! The runtime and tool executor narrate a run through [`RuntimeEvent`]
//! values: iteration boundaries, tool-call lifecycle, approval outcomes,
//! token usage, and terminal states. Handlers are pure observers —
//! approval decisions flow through the
//! [`ApprovalController`](crate::approval::ApprovalController), never
//! through event return values.
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or fire-and-forget runs |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures |
//! | [`CompositeEventHandler`] | Compose handlers in order |

use tracing::{debug, info, warn};

/// Events emitted during a worker run.
///
/// For a single tool call the sequence is strict:
/// `ToolCallStart` → (`ApprovalRequested` → `ApprovalDecided`)? →
/// (`ToolCallEnd` | `ToolCallError`).
#[derive(Debug)]
pub enum RuntimeEvent<'a> {
    /// The runtime is about to call the model.
    MessageSend {
        iteration: u32,
        max_iterations: u32,
        message_count: usize,
    },
    /// The model responded.
    ResponseReceive {
        iteration: u32,
        text: Option<&'a str>,
        tool_call_count: usize,
    },
    /// A tool call is starting (with its position in the batch).
    ToolCallStart {
        tool_call_id: &'a str,
        tool_name: &'a str,
        tool_args: &'a serde_json::Value,
        position: usize,
        batch_size: usize,
    },
    /// The call's tool requires approval; the controller is being asked.
    ApprovalRequested { tool_name: &'a str },
    /// The controller answered.
    ApprovalDecided { tool_name: &'a str, approved: bool },
    /// A tool call completed. `output_preview` is truncated for event
    /// payload safety; the full output went back to the model.
    ToolCallEnd {
        tool_call_id: &'a str,
        tool_name: &'a str,
        output_preview: &'a str,
        duration_ms: u64,
    },
    /// A tool call failed (missing tool, denial, or execution error).
    ToolCallError {
        tool_call_id: &'a str,
        tool_name: &'a str,
        error: &'a str,
        duration_ms: u64,
    },
    /// Token usage reported by the model for one call.
    TokenUsage {
        input_tokens: u64,
        output_tokens: u64,
    },
    /// Chat-mode context accounting after a turn.
    ContextUsage {
        used_tokens: u64,
        max_tokens: Option<u64>,
    },
    /// The interrupt signal was observed; the loop is exiting.
    Interrupted,
    /// The run completed with a terminal generation.
    Finished,
    /// The iteration ceiling was hit without a terminal generation.
    IterationLimitReached { max_iterations: u32 },
    /// The run failed; the message is the error verbatim.
    ExecutionError { error: &'a str },
}

/// Observer for [`RuntimeEvent`]s.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &RuntimeEvent<'_>) {
        let _ = event;
    }
}

/// Ignores every event.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
pub struct FnEventHandler<F>(F)
where
    F: Fn(&RuntimeEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&RuntimeEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&RuntimeEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &RuntimeEvent<'_>) {
        (self.0)(event)
    }
}

/// Delegates to multiple handlers in registration order.
#[derive(Default)]
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &RuntimeEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

/// Logs events via `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &RuntimeEvent<'_>) {
        match event {
            RuntimeEvent::MessageSend {
                iteration,
                max_iterations,
                message_count,
            } => {
                info!("[iteration {iteration}/{max_iterations}] sending {message_count} message(s)");
            }
            RuntimeEvent::ResponseReceive {
                iteration,
                text,
                tool_call_count,
            } => {
                let text_len = text.map_or(0, |t| t.len());
                debug!(
                    "iteration {iteration}: {text_len} chars text, {tool_call_count} tool call(s)"
                );
            }
            RuntimeEvent::ToolCallStart {
                tool_name,
                position,
                batch_size,
                ..
            } => {
                debug!("tool {tool_name} starting ({}/{batch_size})", position + 1);
            }
            RuntimeEvent::ApprovalRequested { tool_name } => {
                info!("approval requested for {tool_name}");
            }
            RuntimeEvent::ApprovalDecided {
                tool_name,
                approved,
            } => {
                info!(
                    "approval for {tool_name}: {}",
                    if *approved { "approved" } else { "denied" }
                );
            }
            RuntimeEvent::ToolCallEnd {
                tool_name,
                duration_ms,
                ..
            } => {
                debug!("tool {tool_name} completed in {duration_ms}ms");
            }
            RuntimeEvent::ToolCallError {
                tool_name, error, ..
            } => {
                warn!("tool {tool_name} failed: {error}");
            }
            RuntimeEvent::TokenUsage {
                input_tokens,
                output_tokens,
            } => {
                debug!("tokens: input={input_tokens}, output={output_tokens}");
            }
            RuntimeEvent::ContextUsage {
                used_tokens,
                max_tokens,
            } => match max_tokens {
                Some(max) => debug!("context: {used_tokens}/{max} tokens"),
                None => debug!("context: {used_tokens} tokens"),
            },
            RuntimeEvent::Interrupted => {
                info!("run interrupted");
            }
            RuntimeEvent::Finished => {
                info!("run finished");
            }
            RuntimeEvent::IterationLimitReached { max_iterations } => {
                info!("iteration limit reached ({max_iterations})");
            }
            RuntimeEvent::ExecutionError { error } => {
                warn!("execution error: {error}");
            }
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn fn_handler_receives_events() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let handler = FnEventHandler::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        handler.on_event(&RuntimeEvent::Finished);
        handler.on_event(&RuntimeEvent::Interrupted);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn composite_delegates_to_all_in_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let a = order.clone();
        let b = order.clone();
        let handler = CompositeEventHandler::new()
            .with(FnEventHandler::new(move |_| a.lock().unwrap().push("a")))
            .with(FnEventHandler::new(move |_| b.lock().unwrap().push("b")));

        handler.on_event(&RuntimeEvent::Finished);
        assert_eq!(*order.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn composite_with_if_false_skips() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let handler = CompositeEventHandler::new().with_if(
            false,
            FnEventHandler::new(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );

        handler.on_event(&RuntimeEvent::Finished);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn noop_and_logging_handlers_accept_all_variants() {
        let args = serde_json::json!({"path": "/a"});
        let events = [
            RuntimeEvent::MessageSend {
                iteration: 1,
                max_iterations: 10,
                message_count: 2,
            },
            RuntimeEvent::ResponseReceive {
                iteration: 1,
                text: Some("hi"),
                tool_call_count: 1,
            },
            RuntimeEvent::ToolCallStart {
                tool_call_id: "c1",
                tool_name: "read_file",
                tool_args: &args,
                position: 0,
                batch_size: 1,
            },
            RuntimeEvent::ApprovalRequested {
                tool_name: "write_file",
            },
            RuntimeEvent::ApprovalDecided {
                tool_name: "write_file",
                approved: false,
            },
            RuntimeEvent::ToolCallEnd {
                tool_call_id: "c1",
                tool_name: "read_file",
                output_preview: "ok",
                duration_ms: 3,
            },
            RuntimeEvent::ToolCallError {
                tool_call_id: "c2",
                tool_name: "write_file",
                error: "Error: [DENIED] write_file",
                duration_ms: 1,
            },
            RuntimeEvent::TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
            },
            RuntimeEvent::ContextUsage {
                used_tokens: 100,
                max_tokens: Some(1000),
            },
            RuntimeEvent::Interrupted,
            RuntimeEvent::Finished,
            RuntimeEvent::IterationLimitReached { max_iterations: 10 },
            RuntimeEvent::ExecutionError { error: "boom" },
        ];
        for event in &events {
            NoopHandler.on_event(event);
            LoggingHandler.on_event(event);
        }
    }
}
