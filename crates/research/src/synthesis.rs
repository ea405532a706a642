//! Final report synthesis.

use std::collections::BTreeMap;
use std::sync::Arc;

use wv_domain::error::{Error, Result};
use wv_domain::state::DeepResearchState;
use wv_domain::tool::Message;
use wv_providers::{ChatRequest, LlmProvider};

const SYNTHESIS_PROMPT: &str = "Write the final research report answering the original \
question. Use the per-topic summaries below as your only evidence. Keep the inline \
citation markers [n] exactly as they appear; they refer to the numbered source list. \
Structure the report with short sections and end without a source list (the caller \
appends it).";

/// Render the deduplicated, numbered source list in first-appearance
/// order. Citation `[n]` in any summary or the report refers to line `n`.
pub fn render_source_list(state: &DeepResearchState) -> String {
    state
        .sources
        .iter()
        .enumerate()
        .map(|(i, s)| format!("[{}] {} — {}", i + 1, s.title, s.url))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Global citation numbering: canonical URL -> 1-based first-appearance
/// position.
pub fn citation_numbering(state: &DeepResearchState) -> BTreeMap<String, usize> {
    state
        .sources
        .iter()
        .enumerate()
        .map(|(i, s)| (s.url.clone(), i + 1))
        .collect()
}

/// Produce the final report text (summaries + source list in, report out).
///
/// The engine always returns a report: if the synthesis call fails, the
/// concatenated summaries stand in so the caller still gets an answer
/// alongside the quality metrics.
pub async fn synthesize(
    provider: &Arc<dyn LlmProvider>,
    model: &str,
    state: &DeepResearchState,
) -> Result<String> {
    if state.summaries.is_empty() {
        return Err(Error::Tool {
            tool: "web_search".into(),
            message: "research produced no summaries to synthesize".into(),
        });
    }

    let summaries: String = state
        .summaries
        .iter()
        .map(|(sq, s)| format!("## {sq}\n{s}"))
        .collect::<Vec<_>>()
        .join("\n\n");
    let sources = render_source_list(state);

    let req = ChatRequest {
        messages: vec![
            Message::system(SYNTHESIS_PROMPT),
            Message::user(format!(
                "Original question: {}\n\nSummaries:\n{summaries}\n\nSources:\n{sources}",
                state.original_query
            )),
        ],
        temperature: Some(0.3),
        model: Some(model.to_string()),
        ..Default::default()
    };

    match provider.chat(&req).await {
        Ok(resp) if !resp.content.trim().is_empty() => Ok(resp.content),
        Ok(_) | Err(_) => {
            tracing::warn!("synthesis call failed or empty, falling back to raw summaries");
            Ok(summaries)
        }
    }
}
