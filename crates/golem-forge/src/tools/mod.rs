//! Tool definitions, collection, and the built-in filesystem toolset.
//!
//! - [`core`] — the [`Tool`](core::Tool) trait, [`ToolSet`](core::ToolSet),
//!   closure-based [`FnTool`](core::FnTool), and argument validation.
//! - [`fs`] — sandbox-backed filesystem tools.
//! - [`names`] — canonical tool-name constants and the reserved list.

pub mod core;
pub mod fs;
pub mod names;
