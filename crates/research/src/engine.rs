//! The multi-epoch research loop.

use std::sync::Arc;

use wv_domain::cancel::CancelToken;
use wv_domain::config::ResearchConfig;
use wv_domain::error::{Error, Result};
use wv_domain::event::EventKind;
use wv_domain::state::DeepResearchState;
use wv_events::ThreadBus;
use wv_providers::LlmProvider;
use wv_tools::ToolRegistry;

use crate::decompose::decompose;
use crate::quality;
use crate::search::{retain_new_sources, run_searches};
use crate::summarize::summarize_all;
use crate::synthesis::{citation_numbering, synthesize};

/// Everything the engine borrows from the host for one run.
pub struct EngineDeps {
    pub provider: Arc<dyn LlmProvider>,
    pub model: String,
    pub registry: Arc<ToolRegistry>,
}

/// Drives [`DeepResearchState`] through search/summarize epochs until the
/// quality targets are met or the epoch cap is hit.
pub struct ResearchEngine {
    config: ResearchConfig,
}

impl ResearchEngine {
    pub fn new(config: ResearchConfig) -> Self {
        Self { config }
    }

    /// Run the loop, mutating `state` in place. When `synthesize_report`
    /// is set the final report lands in `state.final_report`; callers that
    /// synthesize through their own tool loop pass `false`.
    ///
    /// Emits `research_node_start`, `search`, `research_node_complete`,
    /// `research_tree_update`, and `quality_update` events as it goes.
    pub async fn run(
        &self,
        thread_id: &str,
        state: &mut DeepResearchState,
        deps: &EngineDeps,
        bus: &ThreadBus,
        cancel: &CancelToken,
        synthesize_report: bool,
    ) -> Result<()> {
        let span = tracing::info_span!("research", query = %state.original_query);
        let _guard = span.enter();

        // ── Decompose (first epoch only) ──────────────────────────────
        if state.sub_queries.is_empty() {
            state.sub_queries = decompose(
                &deps.provider,
                &deps.model,
                &state.original_query,
                self.config.max_sub_queries,
            )
            .await;
            for (index, sub_query) in state.sub_queries.iter().enumerate() {
                bus.emit(
                    EventKind::ResearchNodeStart,
                    serde_json::json!({ "sub_query": sub_query, "index": index }),
                );
            }
        }

        // ── Epoch loop ────────────────────────────────────────────────
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let epoch = state.epoch;
            tracing::info!(epoch, sub_queries = state.sub_queries.len(), "research epoch start");

            // Search (parallel, bounded).
            let per_query = run_searches(
                &deps.registry,
                thread_id,
                &state.sub_queries,
                self.config.max_sources_per_epoch,
                self.config.search_concurrency,
                cancel,
            )
            .await?;
            for (sub_query, hits) in &per_query {
                bus.emit(
                    EventKind::Search,
                    serde_json::json!({
                        "sub_query": sub_query,
                        "epoch": epoch,
                        "results": hits.len(),
                    }),
                );
            }

            let new_sources = retain_new_sources(
                per_query,
                &mut state.seen_urls,
                self.config.max_sources_per_epoch,
                epoch,
            );
            tracing::debug!(epoch, new_sources = new_sources.len(), "sources retained");
            state.sources.extend(new_sources);

            // Summarize (parallel, bounded) against the global numbering.
            let numbering = citation_numbering(state);
            let summaries = summarize_all(
                &deps.provider,
                &deps.model,
                &state.sub_queries,
                &state.sources,
                &numbering,
                self.config.summarize_concurrency,
                cancel,
            )
            .await?;
            for (sub_query, _) in &summaries {
                bus.emit(
                    EventKind::ResearchNodeComplete,
                    serde_json::json!({ "sub_query": sub_query, "epoch": epoch }),
                );
            }
            // Later epochs refine earlier summaries; merge keeps the best
            // known answer per sub-query.
            state.summaries.extend(summaries);

            // Evaluate.
            let consistency =
                quality::consistency_score(&deps.provider, &deps.model, &state.summaries).await;
            state.quality = quality::finalize_scores(
                &self.config,
                &state.original_query,
                &state.sub_queries,
                &state.sources,
                &state.summaries,
                consistency,
                chrono::Utc::now().date_naive(),
            );

            bus.emit(
                EventKind::ResearchTreeUpdate,
                serde_json::json!({
                    "epoch": epoch,
                    "sub_queries": state.sub_queries,
                    "sources": state.sources.len(),
                    "seen_urls": state.seen_urls.len(),
                }),
            );
            bus.emit(
                EventKind::QualityUpdate,
                serde_json::to_value(&state.quality).unwrap_or_default(),
            );

            // Decide continuation.
            state.should_continue = quality::should_continue(
                &self.config,
                epoch,
                state.max_epochs,
                &state.quality,
                &state.sub_queries,
                &state.summaries,
            );
            if !state.should_continue {
                break;
            }
            state.epoch += 1;
        }

        // ── Synthesis ─────────────────────────────────────────────────
        if synthesize_report {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let report = synthesize(&deps.provider, &deps.model, state).await?;
            state.final_report = Some(report);
        }

        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use wv_domain::config::EventsConfig;
    use wv_domain::stream::{BoxStream, StreamEvent};
    use wv_events::EventBus;
    use wv_providers::{ChatRequest, ChatResponse};
    use wv_tools::{FnHandler, ToolCategory, ToolDescriptor, ToolRegistryBuilder};

    /// Scripted fake: decompose -> two sub-queries; summaries carry
    /// citations; consistency finds nothing.
    struct FakeLlm {
        calls: Mutex<u32>,
    }

    #[async_trait::async_trait]
    impl LlmProvider for FakeLlm {
        async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
            *self.calls.lock() += 1;
            let system = req.messages[0].content.joined_text();
            let content = if system.contains("sub-queries") {
                r#"{"sub_queries": ["postgres oltp", "mysql oltp"]}"#.to_string()
            } else if system.contains("contradict") {
                r#"{"contradictions": []}"#.to_string()
            } else if system.contains("final research report") {
                "Postgres leads on writes [1]. MySQL holds reads [2].".to_string()
            } else {
                // Summary: cite the first listed source number.
                let user = req.messages[1].content.joined_text();
                let n = user
                    .split('[')
                    .nth(1)
                    .and_then(|s| s.split(']').next())
                    .unwrap_or("1");
                format!("Strong transactional showing [{n}]. Widely deployed [{n}].")
            };
            Ok(ChatResponse {
                content,
                tool_calls: vec![],
                usage: None,
                model: "fake".into(),
                finish_reason: Some("stop".into()),
            })
        }

        async fn chat_stream(
            &self,
            _req: &ChatRequest,
            _cancel: &CancelToken,
        ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
            unimplemented!("engine only uses chat()")
        }

        fn provider_id(&self) -> &str {
            "fake"
        }
        fn known_models(&self) -> &[String] {
            &[]
        }
    }

    fn search_registry() -> Arc<ToolRegistry> {
        let mut builder = ToolRegistryBuilder::new();
        builder
            .register(ToolDescriptor::new(
                "web_search",
                "fake search",
                wv_tools::builtin::web_search_schema(),
                ToolCategory::Search,
                Arc::new(FnHandler(|_ctx, args: serde_json::Value| async move {
                    let query = args["query"].as_str().unwrap_or("").to_string();
                    let prefix = if query.contains("postgres") { "pg" } else { "my" };
                    let results: Vec<serde_json::Value> = (0..6)
                        .map(|i| {
                            serde_json::json!({
                                "title": format!("{prefix} source {i}"),
                                "url": format!("https://{prefix}.example.com/{i}"),
                                "snippet": "benchmark data",
                                "score": 0.9 - i as f64 * 0.1,
                                "published_date": "2026-07-15",
                            })
                        })
                        .collect();
                    Ok(serde_json::json!({ "results": results }))
                })),
            ))
            .unwrap();
        builder.freeze()
    }

    fn deps() -> EngineDeps {
        EngineDeps {
            provider: Arc::new(FakeLlm { calls: Mutex::new(0) }),
            model: "fake-model".into(),
            registry: search_registry(),
        }
    }

    #[tokio::test]
    async fn full_run_produces_cited_report() {
        let engine = ResearchEngine::new(ResearchConfig::default());
        let mut state = DeepResearchState::new("compare postgres and mysql for oltp", 3);
        let bus = EventBus::new(EventsConfig::default());
        let thread = bus.thread("t1");

        engine
            .run("t1", &mut state, &deps(), &thread, &CancelToken::new(), true)
            .await
            .unwrap();

        assert_eq!(state.sub_queries.len(), 2);
        assert!(!state.sources.is_empty());
        assert_eq!(state.seen_urls.len(), state.sources.len());
        assert!(state.final_report.is_some());
        assert!(state.quality.citation > 0.9);
        assert!(state.quality.coverage > 0.9);
        assert!(!state.should_continue);
    }

    #[tokio::test]
    async fn urls_never_repeat_across_epochs() {
        // Low targets force a second epoch even with good results? No —
        // force continuation by capping sources below what search returns
        // and setting targets the first epoch cannot hit.
        let config = ResearchConfig {
            max_epochs: 2,
            max_sources_per_epoch: 3,
            citation_target: 2.0, // unreachable: always continue until cap
            ..ResearchConfig::default()
        };
        let engine = ResearchEngine::new(config);
        let mut state = DeepResearchState::new("compare postgres and mysql", 2);
        let bus = EventBus::new(EventsConfig::default());
        let thread = bus.thread("t1");

        engine
            .run("t1", &mut state, &deps(), &thread, &CancelToken::new(), false)
            .await
            .unwrap();

        assert_eq!(state.epoch, 2);
        // Every retained URL is unique.
        let mut urls: Vec<&str> = state.sources.iter().map(|s| s.url.as_str()).collect();
        let before = urls.len();
        urls.sort();
        urls.dedup();
        assert_eq!(urls.len(), before);
        // Second-epoch sources are disjoint from the first by construction.
        assert!(state.sources.iter().any(|s| s.epoch_found == 2));
    }

    #[tokio::test]
    async fn emits_research_events_in_order() {
        use futures_util::StreamExt;
        let engine = ResearchEngine::new(ResearchConfig::default());
        let mut state = DeepResearchState::new("compare postgres and mysql", 3);
        let bus = EventBus::new(EventsConfig::default());
        let thread = bus.thread("t1");

        engine
            .run("t1", &mut state, &deps(), &thread, &CancelToken::new(), false)
            .await
            .unwrap();

        let mut stream = thread.subscribe(Some(0));
        let mut kinds = Vec::new();
        for _ in 0..thread.latest_seq() {
            kinds.push(stream.next().await.unwrap().kind);
        }
        assert_eq!(kinds[0], EventKind::ResearchNodeStart);
        assert!(kinds.contains(&EventKind::Search));
        assert!(kinds.contains(&EventKind::ResearchNodeComplete));
        assert!(kinds.contains(&EventKind::ResearchTreeUpdate));
        assert_eq!(*kinds.last().unwrap(), EventKind::QualityUpdate);
    }

    #[tokio::test]
    async fn cancel_between_epochs_propagates() {
        let engine = ResearchEngine::new(ResearchConfig::default());
        let mut state = DeepResearchState::new("anything", 3);
        let bus = EventBus::new(EventsConfig::default());
        let thread = bus.thread("t1");
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = engine
            .run("t1", &mut state, &deps(), &thread, &cancel, false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "cancelled");
    }

    #[tokio::test]
    async fn missing_search_tool_is_a_validation_error() {
        let engine = ResearchEngine::new(ResearchConfig::default());
        let mut state = DeepResearchState::new("anything", 3);
        let bus = EventBus::new(EventsConfig::default());
        let thread = bus.thread("t1");
        let deps = EngineDeps {
            provider: Arc::new(FakeLlm { calls: Mutex::new(0) }),
            model: "fake".into(),
            registry: ToolRegistryBuilder::new().freeze(),
        };

        let err = engine
            .run("t1", &mut state, &deps, &thread, &CancelToken::new(), false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }
}
