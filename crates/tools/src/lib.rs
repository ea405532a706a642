//! Tool-invocation substrate.
//!
//! Tools are `(name, json-schema, handler)` contracts. A descriptor is
//! immutable after registration; the registry is frozen before the server
//! accepts requests, and runtime additions go through a staging builder
//! that atomically swaps in a new frozen snapshot.

pub mod builtin;
pub mod descriptor;
pub mod registry;
mod validate;

pub use descriptor::{FnHandler, ToolCategory, ToolContext, ToolDescriptor, ToolHandler, ToolOutput, ToolProgress};
pub use registry::{SharedRegistry, ToolRegistry, ToolRegistryBuilder};
