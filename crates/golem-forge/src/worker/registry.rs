//! Worker registry: the lookup contract delegation resolves child
//! definitions through.
//!
//! Worker-file discovery and parsing live outside the core; whatever
//! does that job exposes the result behind [`WorkerRegistry`]. The
//! in-memory implementation covers embedders and tests.

use crate::worker::definition::WorkerDefinition;
use std::collections::HashMap;
use std::sync::RwLock;

/// Lookup surface for worker definitions.
pub trait WorkerRegistry: Send + Sync {
    /// The definition for `name`, if the worker exists.
    fn get(&self, name: &str) -> Option<WorkerDefinition>;

    /// All known worker names, sorted.
    fn names(&self) -> Vec<String>;
}

/// A registry backed by a map.
#[derive(Default)]
pub struct InMemoryWorkerRegistry {
    workers: RwLock<HashMap<String, WorkerDefinition>>,
}

impl InMemoryWorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition under its own name, replacing any previous
    /// definition with that name.
    pub fn insert(&self, definition: WorkerDefinition) {
        self.workers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(definition.name.clone(), definition);
    }

    /// Builder-style registration.
    pub fn with(self, definition: WorkerDefinition) -> Self {
        self.insert(definition);
        self
    }
}

impl WorkerRegistry for InMemoryWorkerRegistry {
    fn get(&self, name: &str) -> Option<WorkerDefinition> {
        self.workers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .workers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get() {
        let registry = InMemoryWorkerRegistry::new()
            .with(WorkerDefinition::new("analyzer", "Analyze."))
            .with(WorkerDefinition::new("writer", "Write."));

        assert!(registry.get("analyzer").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.names(), vec!["analyzer", "writer"]);
    }

    #[test]
    fn insert_replaces_by_name() {
        let registry = InMemoryWorkerRegistry::new();
        registry.insert(WorkerDefinition::new("w", "first"));
        registry.insert(WorkerDefinition::new("w", "second"));

        assert_eq!(registry.get("w").unwrap().instructions, "second");
        assert_eq!(registry.names().len(), 1);
    }
}
