//! AppState construction — every subsystem is initialized here, once,
//! and handed to the API layer as explicit dependencies.

use std::sync::Arc;

use anyhow::Context;

use wv_domain::config::{Config, ConfigSeverity};
use wv_events::EventBus;
use wv_providers::ProviderRegistry;
use wv_sessions::ThreadStore;
use wv_tools::builtin::{web_search, UnconfiguredHandler};
use wv_tools::{SharedRegistry, ToolDescriptor, ToolRegistryBuilder};

use crate::runtime::cancel::CancelMap;
use crate::runtime::nodes::build_graph;
use crate::state::AppState;

/// Validate config, initialize every subsystem, and return a fully-wired
/// [`AppState`].
///
/// `extra_tools` lets the host inject real tool bodies (search backends,
/// sandboxes) on top of the built-in descriptors.
pub fn build_app_state(
    config: Arc<Config>,
    extra_tools: Vec<ToolDescriptor>,
) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── LLM providers ────────────────────────────────────────────────
    let llm = Arc::new(
        ProviderRegistry::from_config(&config.llm).context("initializing LLM providers")?,
    );
    if llm.is_empty() {
        tracing::warn!("no LLM providers initialized — turns will fail until one is configured");
    } else {
        tracing::info!(providers = llm.len(), "LLM provider registry ready");
    }

    // ── Tool registry ────────────────────────────────────────────────
    // Host tools first so a real web_search body shadows the stub.
    let mut builder = ToolRegistryBuilder::new();
    let mut host_names = std::collections::BTreeSet::new();
    for descriptor in extra_tools {
        host_names.insert(descriptor.name().to_owned());
        builder.register(descriptor).context("registering host tool")?;
    }
    if !host_names.contains("web_search") {
        builder
            .register(web_search(Arc::new(UnconfiguredHandler::new("web_search"))))
            .context("registering web_search stub")?;
    }
    let tools = Arc::new(SharedRegistry::new(builder.freeze()));

    // ── Event bus ────────────────────────────────────────────────────
    let events = Arc::new(EventBus::new(config.events.clone()));
    tracing::info!(
        buffer = config.events.buffer_size,
        backlog = config.events.subscriber_backlog,
        "event bus ready"
    );

    // ── Thread store ─────────────────────────────────────────────────
    let threads = Arc::new(
        ThreadStore::new(&config.server.state_path).context("initializing thread store")?,
    );

    // ── Checkpointer ─────────────────────────────────────────────────
    let checkpointer = wv_checkpoint::from_config(&config.checkpoint, &config.server.state_path)
        .context("initializing checkpointer")?;
    tracing::info!(backend = ?config.checkpoint.backend, "checkpointer ready");

    // ── Cancel map + graph ───────────────────────────────────────────
    let cancel_map = Arc::new(CancelMap::new());
    let graph = Arc::new(build_graph().context("compiling turn graph")?);
    tracing::info!("turn graph compiled");

    Ok(AppState {
        config,
        llm,
        tools,
        events,
        threads,
        checkpointer,
        cancel_map,
        graph,
    })
}
