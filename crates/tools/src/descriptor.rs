use std::sync::Arc;

use serde::{Deserialize, Serialize};

use wv_domain::cancel::CancelToken;
use wv_domain::error::Result;
use wv_domain::stream::BoxStream;
use wv_domain::tool::ToolDefinition;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler capability
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-invocation context handed to tool handlers.
#[derive(Clone)]
pub struct ToolContext {
    pub thread_id: String,
    pub call_id: String,
    /// Handlers poll this at I/O boundaries or wrap their I/O with it.
    pub cancel: CancelToken,
}

/// Incremental output from a streaming tool handler.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolProgress {
    /// Intermediate progress payload, surfaced as a `tool_progress` event.
    Progress { data: serde_json::Value },
    /// A captured screenshot (base64), surfaced as `tool_screenshot`.
    Screenshot { data: String, mime: String },
}

/// What a handler returns: either a complete value, or a stream of
/// progress items followed by the final value.
pub enum ToolOutput {
    Value(serde_json::Value),
    Stream {
        progress: BoxStream<'static, Result<ToolProgress>>,
        /// Resolves to the final value after the progress stream ends.
        result: futures_core::future::BoxFuture<'static, Result<serde_json::Value>>,
    },
}

/// The capability every tool body implements. Anything providing this
/// contract plus a descriptor is a tool; there is no shared base type.
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    async fn invoke(&self, ctx: ToolContext, args: serde_json::Value) -> Result<ToolOutput>;
}

/// Adapter so plain async closures can act as handlers (tests, wiring).
pub struct FnHandler<F>(pub F);

#[async_trait::async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(ToolContext, serde_json::Value) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<serde_json::Value>> + Send,
{
    async fn invoke(&self, ctx: ToolContext, args: serde_json::Value) -> Result<ToolOutput> {
        (self.0)(ctx, args).await.map(ToolOutput::Value)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Descriptor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    Search,
    Browser,
    Code,
    Document,
    Utility,
}

/// An immutable registered tool: definition + policy + handler.
#[derive(Clone)]
pub struct ToolDescriptor {
    pub definition: ToolDefinition,
    pub category: ToolCategory,
    /// Calls to this tool suspend the graph for human approval.
    pub requires_approval: bool,
    pub handler: Arc<dyn ToolHandler>,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
        category: ToolCategory,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            definition: ToolDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
            category,
            requires_approval: false,
            handler,
        }
    }

    pub fn with_approval(mut self) -> Self {
        self.requires_approval = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.definition.name)
            .field("category", &self.category)
            .field("requires_approval", &self.requires_approval)
            .finish()
    }
}
