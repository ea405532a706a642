//! Search execution: the web-search tool call, URL canonicalization, and
//! per-epoch deduplication.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::Semaphore;

use wv_domain::cancel::CancelToken;
use wv_domain::error::{Error, Result};
use wv_domain::state::{DeepResearchState, Source};
use wv_tools::{ToolContext, ToolOutput, ToolRegistry};

/// Query parameters that identify tracking, not content; stripped during
/// canonicalization.
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "ref",
    "ref_src",
];

/// Canonicalize a URL for deduplication: lowercase scheme and host, strip
/// the fragment, default ports, tracking params, and any trailing slash.
/// Unparseable URLs fall back to trimmed lowercase.
pub fn canonicalize_url(raw: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(raw.trim()) else {
        return raw.trim().to_ascii_lowercase();
    };

    parsed.set_fragment(None);
    // url already lowercases scheme and host and drops default ports.

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !TRACKING_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        let query: String = kept
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{k}={v}")
                }
            })
            .collect::<Vec<_>>()
            .join("&");
        parsed.set_query(Some(&query));
    }

    let mut s = parsed.to_string();
    if s.ends_with('/') && parsed.path() == "/" && parsed.query().is_none() {
        s.pop();
    }
    s
}

/// One raw hit from the search provider, pre-dedup.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub score: f64,
    pub published_date: Option<chrono::NaiveDate>,
}

/// Parse the web-search tool's result payload:
/// `{ "results": [{title, url, snippet, score?, published_date?}, ...] }`.
fn parse_hits(value: &serde_json::Value) -> Vec<SearchHit> {
    let Some(results) = value.get("results").and_then(|r| r.as_array()) else {
        return Vec::new();
    };
    results
        .iter()
        .filter_map(|r| {
            let url = r.get("url")?.as_str()?.to_string();
            Some(SearchHit {
                title: r
                    .get("title")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string(),
                url,
                snippet: r
                    .get("snippet")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string(),
                score: r.get("score").and_then(|v| v.as_f64()).unwrap_or(0.5),
                published_date: r
                    .get("published_date")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse().ok()),
            })
        })
        .collect()
}

/// Run the web-search tool for every sub-query with bounded concurrency.
///
/// Returns `(sub_query, hits)` pairs in sub-query order. A failing search
/// contributes an empty hit list (it shows up as lost coverage, not as a
/// failed turn).
pub async fn run_searches(
    registry: &ToolRegistry,
    thread_id: &str,
    sub_queries: &[String],
    max_results: usize,
    concurrency: usize,
    cancel: &CancelToken,
) -> Result<Vec<(String, Vec<SearchHit>)>> {
    let descriptor = registry
        .get("web_search")
        .ok_or_else(|| Error::Validation("web_search tool is not registered".into()))?;

    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let futures = sub_queries.iter().map(|sq| {
        let semaphore = semaphore.clone();
        let handler = descriptor.handler.clone();
        let ctx = ToolContext {
            thread_id: thread_id.to_owned(),
            call_id: format!("search-{}", uuid::Uuid::new_v4()),
            cancel: cancel.clone(),
        };
        let args = serde_json::json!({ "query": sq, "max_results": max_results });
        let sq = sq.clone();
        async move {
            let _permit = semaphore.acquire().await;
            if ctx.cancel.is_cancelled() {
                return (sq, Vec::new());
            }
            match handler.invoke(ctx, args).await {
                Ok(ToolOutput::Value(v)) => {
                    let hits = parse_hits(&v);
                    (sq, hits)
                }
                Ok(ToolOutput::Stream { result, .. }) => match result.await {
                    Ok(v) => {
                        let hits = parse_hits(&v);
                        (sq, hits)
                    }
                    Err(e) => {
                        tracing::warn!(sub_query = %sq, error = %e, "search failed");
                        (sq, Vec::new())
                    }
                },
                Err(e) => {
                    tracing::warn!(sub_query = %sq, error = %e, "search failed");
                    (sq, Vec::new())
                }
            }
        }
    });

    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(join_all(futures).await)
}

/// Merge one epoch's hits: canonicalize, drop URLs already seen in any
/// prior epoch, dedup within the epoch, rank by provider score, keep the
/// top `max_sources`, and extend `seen`.
pub fn retain_new_sources(
    per_query: Vec<(String, Vec<SearchHit>)>,
    seen: &mut BTreeSet<String>,
    max_sources: usize,
    epoch: u32,
) -> Vec<Source> {
    let mut epoch_urls: BTreeSet<String> = BTreeSet::new();
    let mut candidates: Vec<Source> = Vec::new();

    for (sub_query, hits) in per_query {
        for hit in hits {
            let canonical = canonicalize_url(&hit.url);
            if canonical.is_empty() || seen.contains(&canonical) || epoch_urls.contains(&canonical)
            {
                continue;
            }
            epoch_urls.insert(canonical.clone());
            candidates.push(Source {
                title: hit.title,
                url: canonical,
                snippet: hit.snippet,
                score: hit.score,
                published_date: hit.published_date,
                epoch_found: epoch,
                sub_query: sub_query.clone(),
            });
        }
    }

    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.url.cmp(&b.url))
    });
    candidates.truncate(max_sources);

    for source in &candidates {
        seen.insert(source.url.clone());
    }
    candidates
}

/// Fold a raw web-search payload (the tool contract's `{results: [...]}`
/// shape) into the research state: canonicalize, skip URLs seen in any
/// epoch, and append the remainder to the source list. Returns how many
/// sources were added.
///
/// This is the entry point for searches that happen outside the epoch
/// loop — tool-assisted synthesis in ultra mode — so everything the model
/// consulted still resolves against `sources`.
pub fn absorb_search_payload(
    state: &mut DeepResearchState,
    sub_query: &str,
    payload: &serde_json::Value,
    max_sources: usize,
) -> usize {
    let hits = parse_hits(payload);
    if hits.is_empty() {
        return 0;
    }
    let added = retain_new_sources(
        vec![(sub_query.to_owned(), hits)],
        &mut state.seen_urls,
        max_sources,
        state.epoch,
    );
    let count = added.len();
    state.sources.extend(added);
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_strips_fragment_and_tracking() {
        assert_eq!(
            canonicalize_url("HTTPS://Example.COM/page?utm_source=x&id=7#section"),
            "https://example.com/page?id=7"
        );
    }

    #[test]
    fn canonicalize_drops_default_port_and_bare_slash() {
        assert_eq!(canonicalize_url("http://example.com:80/"), "http://example.com");
        assert_eq!(canonicalize_url("https://example.com/"), "https://example.com");
    }

    #[test]
    fn canonicalize_keeps_meaningful_query() {
        assert_eq!(
            canonicalize_url("https://example.com/search?q=rust&page=2"),
            "https://example.com/search?q=rust&page=2"
        );
    }

    #[test]
    fn canonicalize_unparseable_falls_back_to_lowercase() {
        assert_eq!(canonicalize_url("  Not A URL  "), "not a url");
    }

    fn hit(url: &str, score: f64) -> SearchHit {
        SearchHit {
            title: url.to_string(),
            url: url.to_string(),
            snippet: String::new(),
            score,
            published_date: None,
        }
    }

    #[test]
    fn retain_filters_seen_and_ranks_by_score() {
        let mut seen = BTreeSet::new();
        seen.insert("https://old.com/a".to_string());

        let per_query = vec![(
            "q1".to_string(),
            vec![
                hit("https://old.com/a", 0.9),
                hit("https://new.com/low", 0.2),
                hit("https://new.com/high", 0.8),
            ],
        )];
        let sources = retain_new_sources(per_query, &mut seen, 2, 1);
        let urls: Vec<&str> = sources.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(urls, vec!["https://new.com/high", "https://new.com/low"]);
        assert!(seen.contains("https://new.com/high"));
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn retain_dedups_within_epoch_across_queries() {
        let mut seen = BTreeSet::new();
        let per_query = vec![
            ("q1".to_string(), vec![hit("https://x.com/p", 0.9)]),
            ("q2".to_string(), vec![hit("https://x.com/p#frag", 0.7)]),
        ];
        let sources = retain_new_sources(per_query, &mut seen, 10, 1);
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].sub_query, "q1");
    }

    #[test]
    fn retain_caps_at_max_sources() {
        let mut seen = BTreeSet::new();
        let hits: Vec<SearchHit> = (0..30)
            .map(|i| hit(&format!("https://s.com/{i}"), i as f64 / 30.0))
            .collect();
        let sources = retain_new_sources(vec![("q".into(), hits)], &mut seen, 15, 1);
        assert_eq!(sources.len(), 15);
        assert_eq!(seen.len(), 15);
    }

    #[test]
    fn absorb_records_new_urls_and_skips_seen() {
        let mut state = DeepResearchState::new("q", 3);
        state.seen_urls.insert("https://known.com/a".to_string());

        let payload = serde_json::json!({
            "results": [
                { "title": "known", "url": "https://known.com/a", "score": 0.9 },
                { "title": "fresh", "url": "https://fresh.com/b", "score": 0.4 },
            ]
        });
        let added = absorb_search_payload(&mut state, "follow-up", &payload, 15);
        assert_eq!(added, 1);
        assert_eq!(state.sources.len(), 1);
        assert_eq!(state.sources[0].url, "https://fresh.com/b");
        assert_eq!(state.sources[0].sub_query, "follow-up");
        // The dedup invariant survives out-of-loop absorption.
        assert_eq!(state.seen_urls.len(), 2);
    }

    #[test]
    fn absorb_ignores_malformed_payloads() {
        let mut state = DeepResearchState::new("q", 3);
        let added = absorb_search_payload(
            &mut state,
            "q",
            &serde_json::json!({ "error": "backend down" }),
            15,
        );
        assert_eq!(added, 0);
        assert!(state.sources.is_empty());
        assert!(state.seen_urls.is_empty());
    }

    #[test]
    fn parse_hits_reads_provider_shape() {
        let v = serde_json::json!({
            "results": [
                { "title": "T", "url": "https://a.com", "snippet": "s",
                  "score": 0.7, "published_date": "2026-07-01" },
                { "url": "https://b.com" }
            ]
        });
        let hits = parse_hits(&v);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].score, 0.7);
        assert!(hits[0].published_date.is_some());
        assert_eq!(hits[1].score, 0.5);
    }
}
