//! Filesystem tools backed by the sandbox.
//!
//! Every tool here resolves paths through an [`Arc<Sandbox>`] — the
//! sandbox is the only path authority, so mounts, read-only zones, and
//! containment apply uniformly. Mutating tools (`write_file`,
//! `delete_file`) require approval.
//!
//! | Tool | Name | Purpose |
//! |------|------|---------|
//! | [`ReadFileTool`] | `read_file` | Read a text file |
//! | [`WriteFileTool`] | `write_file` | Create or overwrite a file |
//! | [`ListDirTool`] | `list_dir` | List directory entries |
//! | [`DeleteFileTool`] | `delete_file` | Delete a file |
//! | [`StatFileTool`] | `stat_file` | File metadata |

use crate::sandbox::Sandbox;
use crate::tools::core::{Tool, ToolContext, ToolFuture, ToolSet, parse_tool_args};
use crate::tools::names;
use crate::{ToolDef, json_schema_for};
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;

// ── Typed argument structs ──────────────────────────────────────────

/// Typed arguments for `read_file`.
#[derive(Deserialize, JsonSchema)]
pub struct ReadFileArgs {
    /// Virtual path inside the sandbox (e.g. '/workspace/notes.md').
    pub path: String,
}

/// Typed arguments for `write_file`.
#[derive(Deserialize, JsonSchema)]
pub struct WriteFileArgs {
    /// Virtual path inside the sandbox (e.g. '/workspace/out.txt').
    pub path: String,
    /// Full file content to write.
    pub content: String,
}

/// Typed arguments for `list_dir`.
#[derive(Deserialize, JsonSchema)]
pub struct ListDirArgs {
    /// Virtual directory path (e.g. '/' or '/workspace').
    pub path: String,
}

/// Typed arguments for `delete_file`.
#[derive(Deserialize, JsonSchema)]
pub struct DeleteFileArgs {
    /// Virtual path of the file to delete.
    pub path: String,
}

/// Typed arguments for `stat_file`.
#[derive(Deserialize, JsonSchema)]
pub struct StatFileArgs {
    /// Virtual path to inspect.
    pub path: String,
}

// ── ReadFileTool ────────────────────────────────────────────────────

/// Read a text file from the sandbox.
pub struct ReadFileTool {
    sandbox: Arc<Sandbox>,
}

impl ReadFileTool {
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self { sandbox }
    }
}

impl Tool for ReadFileTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            names::READ_FILE,
            "Read a text file from the sandbox. Use list_dir first if you \
             are unsure of the path.",
            json_schema_for::<ReadFileArgs>(),
        )
    }

    fn execute(&self, args: &serde_json::Value, _ctx: &ToolContext) -> ToolFuture<'_> {
        let args = args.clone();
        Box::pin(async move {
            let args: ReadFileArgs = parse_tool_args(&args)?;
            let content = self
                .sandbox
                .read(&args.path)
                .await
                .map_err(|e| e.to_string())?;
            Ok(serde_json::json!(content))
        })
    }
}

// ── WriteFileTool ───────────────────────────────────────────────────

/// Create or overwrite a file in the sandbox. Requires approval.
pub struct WriteFileTool {
    sandbox: Arc<Sandbox>,
}

impl WriteFileTool {
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self { sandbox }
    }
}

impl Tool for WriteFileTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            names::WRITE_FILE,
            "Create or overwrite a file in the sandbox with the given \
             content. Parent directories are created as needed.",
            json_schema_for::<WriteFileArgs>(),
        )
    }

    fn needs_approval(&self, _args: &serde_json::Value) -> bool {
        true
    }

    fn execute(&self, args: &serde_json::Value, _ctx: &ToolContext) -> ToolFuture<'_> {
        let args = args.clone();
        Box::pin(async move {
            let args: WriteFileArgs = parse_tool_args(&args)?;
            self.sandbox
                .write(&args.path, &args.content)
                .await
                .map_err(|e| e.to_string())?;
            Ok(serde_json::json!(format!(
                "Wrote {} bytes to {}",
                args.content.len(),
                args.path
            )))
        })
    }
}

// ── ListDirTool ─────────────────────────────────────────────────────

/// List directory entries (sorted).
pub struct ListDirTool {
    sandbox: Arc<Sandbox>,
}

impl ListDirTool {
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self { sandbox }
    }
}

impl Tool for ListDirTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            names::LIST_DIR,
            "List the entries of a sandbox directory, sorted by name.",
            json_schema_for::<ListDirArgs>(),
        )
    }

    fn execute(&self, args: &serde_json::Value, _ctx: &ToolContext) -> ToolFuture<'_> {
        let args = args.clone();
        Box::pin(async move {
            let args: ListDirArgs = parse_tool_args(&args)?;
            let entries = self
                .sandbox
                .list(&args.path)
                .await
                .map_err(|e| e.to_string())?;
            Ok(serde_json::json!(entries))
        })
    }
}

// ── DeleteFileTool ──────────────────────────────────────────────────

/// Delete a file from the sandbox. Requires approval.
pub struct DeleteFileTool {
    sandbox: Arc<Sandbox>,
}

impl DeleteFileTool {
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self { sandbox }
    }
}

impl Tool for DeleteFileTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            names::DELETE_FILE,
            "Delete a file from the sandbox. This cannot be undone.",
            json_schema_for::<DeleteFileArgs>(),
        )
    }

    fn needs_approval(&self, _args: &serde_json::Value) -> bool {
        true
    }

    fn execute(&self, args: &serde_json::Value, _ctx: &ToolContext) -> ToolFuture<'_> {
        let args = args.clone();
        Box::pin(async move {
            let args: DeleteFileArgs = parse_tool_args(&args)?;
            self.sandbox
                .delete(&args.path)
                .await
                .map_err(|e| e.to_string())?;
            Ok(serde_json::json!(format!("Deleted {}", args.path)))
        })
    }
}

// ── StatFileTool ────────────────────────────────────────────────────

/// File metadata: size, timestamps, directory flag.
pub struct StatFileTool {
    sandbox: Arc<Sandbox>,
}

impl StatFileTool {
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self { sandbox }
    }
}

impl Tool for StatFileTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            names::STAT_FILE,
            "Get metadata for a sandbox path: size, created/modified \
             timestamps, and whether it is a directory.",
            json_schema_for::<StatFileArgs>(),
        )
    }

    fn execute(&self, args: &serde_json::Value, _ctx: &ToolContext) -> ToolFuture<'_> {
        let args = args.clone();
        Box::pin(async move {
            let args: StatFileArgs = parse_tool_args(&args)?;
            let stat = self
                .sandbox
                .stat(&args.path)
                .await
                .map_err(|e| e.to_string())?;
            serde_json::to_value(&stat).map_err(|e| e.to_string())
        })
    }
}

// ── Assembly ────────────────────────────────────────────────────────

/// Register the full filesystem toolset against a sandbox.
pub fn register_filesystem_tools(set: ToolSet, sandbox: Arc<Sandbox>) -> ToolSet {
    set.with(ReadFileTool::new(Arc::clone(&sandbox)))
        .with(WriteFileTool::new(Arc::clone(&sandbox)))
        .with(ListDirTool::new(Arc::clone(&sandbox)))
        .with(DeleteFileTool::new(Arc::clone(&sandbox)))
        .with(StatFileTool::new(sandbox))
}

// ── Tests ──────────────────────────────────────────────────────────
