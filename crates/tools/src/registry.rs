//! The frozen tool registry and its staging path.
//!
//! Startup builds descriptors through [`ToolRegistryBuilder`] and freezes
//! them into an immutable [`ToolRegistry`]. Runtime additions (e.g. an MCP
//! bridge advertising new tools) stage a new builder seeded from the
//! current snapshot and atomically swap it in via [`SharedRegistry`].

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use wv_domain::error::{Error, Result};
use wv_domain::tool::ToolDefinition;

use crate::descriptor::ToolDescriptor;
use crate::validate::CompiledSchema;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Builder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct ToolRegistryBuilder {
    entries: BTreeMap<String, Entry>,
}

struct Entry {
    descriptor: ToolDescriptor,
    schema: Arc<CompiledSchema>,
}

impl ToolRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor. The parameters schema is compiled here so a
    /// malformed schema fails at startup, not mid-turn.
    pub fn register(&mut self, descriptor: ToolDescriptor) -> Result<&mut Self> {
        let name = descriptor.name().to_owned();
        if self.entries.contains_key(&name) {
            return Err(Error::DuplicateTool(name));
        }
        let schema = Arc::new(CompiledSchema::compile(&descriptor.definition.parameters)?);
        self.entries.insert(name, Entry { descriptor, schema });
        Ok(self)
    }

    /// Freeze into an immutable snapshot.
    pub fn freeze(self) -> Arc<ToolRegistry> {
        tracing::info!(tools = self.entries.len(), "tool registry frozen");
        Arc::new(ToolRegistry {
            entries: self.entries,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Frozen registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Read-only after freeze; shared across all turns.
pub struct ToolRegistry {
    entries: BTreeMap<String, Entry>,
}

impl ToolRegistry {
    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.entries.get(name).map(|e| &e.descriptor)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Descriptors whose name passes `filter`, in name order.
    pub fn list<F: Fn(&str) -> bool>(&self, filter: F) -> Vec<&ToolDescriptor> {
        self.entries
            .values()
            .filter(|e| filter(e.descriptor.name()))
            .map(|e| &e.descriptor)
            .collect()
    }

    /// Tool definitions for the LLM, filtered to the enabled set, in name
    /// order.
    pub fn definitions_for<F: Fn(&str) -> bool>(&self, filter: F) -> Vec<ToolDefinition> {
        self.list(filter)
            .into_iter()
            .map(|d| d.definition.clone())
            .collect()
    }

    /// Validate call arguments against the tool's schema. Returns the
    /// normalized arguments or a `Validation` error; unknown tool names
    /// also fail validation.
    pub fn validate_args(&self, name: &str, args: serde_json::Value) -> Result<serde_json::Value> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| Error::Validation(format!("unknown tool: {name}")))?;
        entry.schema.validate(name, args)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared handle with atomic snapshot swap
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Process-wide handle to the current frozen snapshot. In-flight turns
/// keep the snapshot they loaded; new turns see the swapped one.
pub struct SharedRegistry {
    current: RwLock<Arc<ToolRegistry>>,
}

impl SharedRegistry {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            current: RwLock::new(registry),
        }
    }

    /// The current frozen snapshot.
    pub fn load(&self) -> Arc<ToolRegistry> {
        self.current.read().clone()
    }

    /// Start a staging builder seeded with every currently-registered
    /// descriptor.
    pub fn stage(&self) -> Result<ToolRegistryBuilder> {
        let snapshot = self.load();
        let mut builder = ToolRegistryBuilder::new();
        for entry in snapshot.entries.values() {
            builder.register(entry.descriptor.clone())?;
        }
        Ok(builder)
    }

    /// Atomically replace the snapshot.
    pub fn swap(&self, next: Arc<ToolRegistry>) {
        let mut current = self.current.write();
        tracing::info!(
            before = current.len(),
            after = next.len(),
            "tool registry snapshot swapped"
        );
        *current = next;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{FnHandler, ToolCategory};

    fn descriptor(name: &str) -> ToolDescriptor {
        ToolDescriptor::new(
            name,
            "a test tool",
            serde_json::json!({
                "type": "object",
                "properties": { "query": { "type": "string" } },
                "required": ["query"]
            }),
            ToolCategory::Utility,
            Arc::new(FnHandler(|_ctx, args| async move { Ok(args) })),
        )
    }

    #[test]
    fn register_and_get() {
        let mut builder = ToolRegistryBuilder::new();
        builder.register(descriptor("web_search")).unwrap();
        let registry = builder.freeze();
        assert!(registry.contains("web_search"));
        assert_eq!(registry.get("web_search").unwrap().name(), "web_search");
        assert!(registry.get("nope").is_none());
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut builder = ToolRegistryBuilder::new();
        builder.register(descriptor("web_search")).unwrap();
        match builder.register(descriptor("web_search")) {
            Err(err) => assert!(matches!(err, Error::DuplicateTool(name) if name == "web_search")),
            Ok(_) => panic!("expected duplicate tool error"),
        }
    }

    #[test]
    fn list_is_filtered_and_ordered() {
        let mut builder = ToolRegistryBuilder::new();
        builder.register(descriptor("zeta")).unwrap();
        builder.register(descriptor("alpha")).unwrap();
        builder.register(descriptor("mid")).unwrap();
        let registry = builder.freeze();

        let names: Vec<&str> = registry
            .list(|n| n != "mid")
            .iter()
            .map(|d| d.name())
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn validate_args_unknown_tool() {
        let registry = ToolRegistryBuilder::new().freeze();
        let err = registry
            .validate_args("ghost", serde_json::json!({}))
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn validate_args_enforces_schema() {
        let mut builder = ToolRegistryBuilder::new();
        builder.register(descriptor("web_search")).unwrap();
        let registry = builder.freeze();

        assert!(registry
            .validate_args("web_search", serde_json::json!({ "query": "ok" }))
            .is_ok());
        assert!(registry
            .validate_args("web_search", serde_json::json!({}))
            .is_err());
    }

    #[test]
    fn staging_swap_preserves_existing_tools() {
        let mut builder = ToolRegistryBuilder::new();
        builder.register(descriptor("web_search")).unwrap();
        let shared = SharedRegistry::new(builder.freeze());

        let mut staged = shared.stage().unwrap();
        staged.register(descriptor("mcp_extra")).unwrap();
        shared.swap(staged.freeze());

        let now = shared.load();
        assert!(now.contains("web_search"));
        assert!(now.contains("mcp_extra"));
        assert_eq!(now.len(), 2);
    }

    #[test]
    fn inflight_snapshot_unaffected_by_swap() {
        let mut builder = ToolRegistryBuilder::new();
        builder.register(descriptor("web_search")).unwrap();
        let shared = SharedRegistry::new(builder.freeze());

        let held = shared.load();
        let mut staged = shared.stage().unwrap();
        staged.register(descriptor("late")).unwrap();
        shared.swap(staged.freeze());

        assert!(!held.contains("late"));
        assert!(shared.load().contains("late"));
    }
}
