//! Grounded per-sub-query summaries with inline citations.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::Semaphore;

use wv_domain::cancel::CancelToken;
use wv_domain::error::{Error, Result};
use wv_domain::state::Source;
use wv_domain::tool::Message;
use wv_providers::{ChatRequest, LlmProvider};

const SUMMARIZE_PROMPT: &str = "Summarize what the sources below say about the question. \
Stay under 300 tokens. Every claim must carry a citation marker like [3] using the \
source numbers shown. Do not cite numbers that are not listed. Do not invent facts.";

/// Render one sub-query's sources with their global citation numbers.
///
/// `numbering` maps canonical URL to the 1-based position in the global
/// first-appearance list, so citations stay stable across epochs.
fn render_sources(sources: &[&Source], numbering: &BTreeMap<String, usize>) -> String {
    sources
        .iter()
        .filter_map(|s| {
            let n = numbering.get(&s.url)?;
            Some(format!("[{n}] {} — {}\n{}", s.title, s.url, s.snippet))
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Summarize each sub-query's retained sources in parallel (bounded).
///
/// Returns `sub_query -> summary`. Sub-queries without sources are
/// skipped; a failed summary call drops that sub-query's entry for the
/// epoch rather than failing the run.
#[allow(clippy::too_many_arguments)]
pub async fn summarize_all(
    provider: &Arc<dyn LlmProvider>,
    model: &str,
    sub_queries: &[String],
    sources: &[Source],
    numbering: &BTreeMap<String, usize>,
    concurrency: usize,
    cancel: &CancelToken,
) -> Result<BTreeMap<String, String>> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let futures = sub_queries.iter().filter_map(|sq| {
        let for_query: Vec<&Source> = sources.iter().filter(|s| &s.sub_query == sq).collect();
        if for_query.is_empty() {
            return None;
        }
        let rendered = render_sources(&for_query, numbering);
        let provider = provider.clone();
        let model = model.to_string();
        let semaphore = semaphore.clone();
        let cancel = cancel.clone();
        let sq = sq.clone();
        Some(async move {
            let _permit = semaphore.acquire().await;
            if cancel.is_cancelled() {
                return None;
            }
            let req = ChatRequest {
                messages: vec![
                    Message::system(SUMMARIZE_PROMPT),
                    Message::user(format!("Question: {sq}\n\nSources:\n{rendered}")),
                ],
                temperature: Some(0.2),
                max_tokens: Some(400),
                model: Some(model),
                ..Default::default()
            };
            match provider.chat(&req).await {
                Ok(resp) if !resp.content.trim().is_empty() => Some((sq, resp.content)),
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!(sub_query = %sq, error = %e, "summary call failed");
                    None
                }
            }
        })
    });

    let results = join_all(futures).await;
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(results.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(url: &str, sub_query: &str) -> Source {
        Source {
            title: "t".into(),
            url: url.into(),
            snippet: "snippet".into(),
            score: 0.5,
            published_date: None,
            epoch_found: 1,
            sub_query: sub_query.into(),
        }
    }

    #[test]
    fn rendered_sources_use_global_numbering() {
        let s1 = source("https://a.com", "q");
        let s2 = source("https://b.com", "q");
        let mut numbering = BTreeMap::new();
        numbering.insert("https://a.com".to_string(), 1);
        numbering.insert("https://b.com".to_string(), 2);

        let rendered = render_sources(&[&s1, &s2], &numbering);
        assert!(rendered.starts_with("[1] "));
        assert!(rendered.contains("\n\n[2] "));
    }

    #[test]
    fn sources_without_numbering_are_dropped() {
        let s = source("https://unknown.com", "q");
        let rendered = render_sources(&[&s], &BTreeMap::new());
        assert!(rendered.is_empty());
    }
}
