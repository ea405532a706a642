//! Built-in tool descriptors.
//!
//! Only schemas and wiring live here; real tool bodies (browser, sandbox,
//! OCR) are injected by the host. `web_search` ships with a handler that
//! fails with a structured tool error until a search backend is
//! configured, so the full dispatch path stays exercised.

use std::sync::Arc;

use wv_domain::error::{Error, Result};

use crate::descriptor::{ToolCategory, ToolContext, ToolDescriptor, ToolHandler, ToolOutput};

/// JSON schema shared by every web-search implementation.
pub fn web_search_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "query": { "type": "string", "description": "Search query" },
            "max_results": {
                "type": "integer",
                "minimum": 1,
                "maximum": 50,
                "description": "Maximum number of results (default 10)"
            }
        },
        "required": ["query"]
    })
}

/// The `web_search` descriptor with the given handler.
pub fn web_search(handler: Arc<dyn ToolHandler>) -> ToolDescriptor {
    ToolDescriptor::new(
        "web_search",
        "Search the web. Returns a list of results with title, url, snippet, \
         relevance score, and published date when available.",
        web_search_schema(),
        ToolCategory::Search,
        handler,
    )
}

/// Placeholder handler used when no search backend is configured.
pub struct UnconfiguredHandler {
    tool: &'static str,
}

impl UnconfiguredHandler {
    pub fn new(tool: &'static str) -> Self {
        Self { tool }
    }
}

#[async_trait::async_trait]
impl ToolHandler for UnconfiguredHandler {
    async fn invoke(&self, _ctx: ToolContext, _args: serde_json::Value) -> Result<ToolOutput> {
        Err(Error::Tool {
            tool: self.tool.into(),
            message: "no backend configured for this tool".into(),
        })
    }
}
