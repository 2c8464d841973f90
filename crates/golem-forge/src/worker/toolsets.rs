//! Assembly of a worker's declarative `toolsets` map into a [`ToolSet`].
//!
//! The core wires the toolsets it owns: `filesystem` (sandbox-backed
//! tools) and `workers` (per-worker delegation tools). `git` and
//! `custom` belong to external collaborators — embedders register those
//! tools on the returned set themselves.

use crate::sandbox::Sandbox;
use crate::tools::core::ToolSet;
use crate::tools::fs::register_filesystem_tools;
use crate::worker::definition::WorkerDefinition;
use crate::worker::delegation::{DelegationContext, register_worker_tools};
use crate::worker::runtime::ConfigError;
use std::sync::Arc;
use tracing::warn;

/// Build the core-owned tools for a worker definition.
///
/// Fails when the `filesystem` toolset is declared without a sandbox, or
/// an allowed worker name collides with a reserved tool name. A
/// `workers` toolset without a [`DelegationContext`] is skipped with a
/// warning — the embedder chose not to wire delegation.
pub fn build_toolset(
    definition: &WorkerDefinition,
    sandbox: Option<&Arc<Sandbox>>,
    delegation: Option<&DelegationContext>,
) -> Result<ToolSet, ConfigError> {
    let mut set = ToolSet::new();

    if definition.toolsets.filesystem.is_some() {
        let Some(sandbox) = sandbox else {
            return Err(ConfigError::SandboxRequired(definition.name.clone()));
        };
        set = register_filesystem_tools(set, Arc::clone(sandbox));
    }

    if let Some(ref workers) = definition.toolsets.workers {
        match delegation {
            Some(ctx) => {
                set = register_worker_tools(set, workers, ctx)?;
            }
            None => {
                warn!(
                    "worker '{}' declares a workers toolset but no delegation context was provided",
                    definition.name
                );
            }
        }
    }

    Ok(set)
}

// ── Tests ──────────────────────────────────────────────────────────
