//! Common imports for building on the worker engine.
//!
//! ```ignore
//! use golem_forge::prelude::*;
//! ```

pub use crate::approval::{
    ApprovalCallback, ApprovalController, ApprovalDecision, ApprovalMode, ApprovalRequest,
    RememberScope,
};
pub use crate::model::{
    GenerateFuture, GenerateRequest, GenerateResponse, ModelProvider, RetryPolicy,
};
pub use crate::sandbox::{
    FileStat, Mount, Sandbox, SandboxConfig, SandboxError, SandboxRestriction,
};
pub use crate::tools::core::{
    FnTool, ManualExecution, ManualMode, Tool, ToolContext, ToolFuture, ToolSet,
};
pub use crate::ui::RuntimeUI;
pub use crate::ui::bus::{
    ActionEvent, DisplayEvent, EventBus, SessionEndReason, StatusLevel, WorkerStatus,
};
pub use crate::worker::definition::{
    AttachmentPolicy, ToolsetsConfig, WorkerDefinition, WorkerMode, WorkersToolset,
};
pub use crate::worker::delegation::{DelegationContext, WorkerTool};
pub use crate::worker::events::{
    CompositeEventHandler, EventHandler, FnEventHandler, LoggingHandler, NoopHandler, RuntimeEvent,
};
pub use crate::worker::execution::{ToolCallOutcome, ToolExecutor};
pub use crate::worker::input::{Attachment, AttachmentData, WorkerInput};
pub use crate::worker::registry::{InMemoryWorkerRegistry, WorkerRegistry};
pub use crate::worker::runtime::{
    ConfigError, InterruptSignal, TokenTotals, WorkerResult, WorkerRuntime,
};
pub use crate::worker::toolsets::build_toolset;
pub use crate::{Message, MessageRole, ToolCall, ToolDef, UsageInfo, json_schema_for};

pub use std::sync::Arc;
