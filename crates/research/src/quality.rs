//! Epoch quality evaluation.

use std::collections::BTreeMap;
use std::sync::Arc;

use wv_domain::config::ResearchConfig;
use wv_domain::state::{QualityScores, Source};
use wv_domain::tool::Message;
use wv_providers::{ChatRequest, LlmProvider};

const MAX_CONSISTENCY_CLAIMS: usize = 8;

const CONSISTENCY_PROMPT: &str = "You will be given numbered claims extracted from research \
summaries. Identify pairs that directly contradict each other. Respond with JSON: \
{\"contradictions\": [[i, j], ...]} using the claim numbers. Respond {\"contradictions\": []} \
if there are none.";

/// Fraction of sentences across all summaries carrying at least one
/// citation marker `[n]`.
pub fn citation_score(summaries: &BTreeMap<String, String>) -> f64 {
    let marker = regex::Regex::new(r"\[\d+\]").expect("static regex");
    let mut sentences = 0usize;
    let mut cited = 0usize;
    for summary in summaries.values() {
        for sentence in summary
            .split(['.', '!', '?'])
            .map(str::trim)
            .filter(|s| s.len() > 3)
        {
            sentences += 1;
            if marker.is_match(sentence) {
                cited += 1;
            }
        }
    }
    if sentences == 0 {
        0.0
    } else {
        cited as f64 / sentences as f64
    }
}

/// `1 - (fraction of sub-queries with zero retained sources)`.
pub fn coverage_score(sub_queries: &[String], sources: &[Source]) -> f64 {
    if sub_queries.is_empty() {
        return 0.0;
    }
    let uncovered = sub_queries
        .iter()
        .filter(|sq| !sources.iter().any(|s| &s.sub_query == *sq))
        .count();
    1.0 - uncovered as f64 / sub_queries.len() as f64
}

/// Fraction of sources published within the freshness window, measured
/// against `now`. Sources without a date count as stale.
pub fn freshness_score(sources: &[Source], window_days: i64, now: chrono::NaiveDate) -> Option<f64> {
    if sources.is_empty() {
        return None;
    }
    let fresh = sources
        .iter()
        .filter(|s| {
            s.published_date
                .is_some_and(|d| (now - d).num_days() <= window_days)
        })
        .count();
    Some(fresh as f64 / sources.len() as f64)
}

/// Whether the query reads as time-sensitive (asks about a current state
/// of the world rather than established facts).
pub fn is_time_sensitive(query: &str) -> bool {
    const MARKERS: &[&str] = &[
        "latest", "current", "today", "now", "recent", "news", "price", "this year", "this month",
        "2025", "2026",
    ];
    let lower = query.to_ascii_lowercase();
    MARKERS.iter().any(|m| lower.contains(m))
}

/// Fraction of summarized sub-queries whose summary mentions at least
/// half of the sub-query's key terms.
pub fn query_coverage_score(summaries: &BTreeMap<String, String>) -> Option<f64> {
    if summaries.is_empty() {
        return None;
    }
    let mut covered = 0usize;
    for (sub_query, summary) in summaries {
        let terms = key_terms(sub_query);
        if terms.is_empty() {
            covered += 1;
            continue;
        }
        let lower = summary.to_ascii_lowercase();
        let hits = terms.iter().filter(|t| lower.contains(t.as_str())).count();
        if hits * 2 >= terms.len() {
            covered += 1;
        }
    }
    Some(covered as f64 / summaries.len() as f64)
}

const STOPWORDS: &[&str] = &[
    "about", "after", "against", "between", "compare", "could", "does", "from", "have", "into",
    "should", "their", "there", "these", "this", "versus", "what", "when", "where", "which",
    "with", "would",
];

fn key_terms(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_ascii_lowercase())
        .filter(|w| w.len() >= 4 && !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Consistency via a lightweight pairwise check: extract one key claim
/// per summary (capped at 8), ask the LLM for contradictory pairs, and
/// score `1 - contradictory_pairs / total_pairs`. Failures of the check
/// itself count as fully consistent rather than blocking the epoch.
pub async fn consistency_score(
    provider: &Arc<dyn LlmProvider>,
    model: &str,
    summaries: &BTreeMap<String, String>,
) -> f64 {
    let claims: Vec<String> = summaries
        .values()
        .filter_map(|s| {
            s.split(['.', '!', '?'])
                .map(str::trim)
                .find(|c| c.len() > 20)
                .map(str::to_string)
        })
        .take(MAX_CONSISTENCY_CLAIMS)
        .collect();

    if claims.len() < 2 {
        return 1.0;
    }
    let total_pairs = claims.len() * (claims.len() - 1) / 2;

    let numbered: String = claims
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}. {}", i + 1, c))
        .collect::<Vec<_>>()
        .join("\n");

    let req = ChatRequest {
        messages: vec![
            Message::system(CONSISTENCY_PROMPT),
            Message::user(numbered),
        ],
        json_mode: true,
        temperature: Some(0.0),
        model: Some(model.to_string()),
        ..Default::default()
    };

    let contradictions = match provider.chat(&req).await {
        Ok(resp) => serde_json::from_str::<serde_json::Value>(resp.content.trim())
            .ok()
            .and_then(|v| v.get("contradictions").and_then(|c| c.as_array()).cloned())
            .map(|pairs| pairs.len())
            .unwrap_or(0),
        Err(e) => {
            tracing::warn!(error = %e, "consistency check failed, assuming consistent");
            0
        }
    };

    1.0 - (contradictions.min(total_pairs) as f64 / total_pairs as f64)
}

/// Assemble the epoch's scores and the low-freshness warning.
pub fn finalize_scores(
    config: &ResearchConfig,
    original_query: &str,
    sub_queries: &[String],
    sources: &[Source],
    summaries: &BTreeMap<String, String>,
    consistency: f64,
    now: chrono::NaiveDate,
) -> QualityScores {
    let freshness = freshness_score(sources, config.freshness_window_days, now);
    let warning = match freshness {
        Some(f) if is_time_sensitive(original_query) && f < 0.3 => {
            Some("low_freshness_for_time_sensitive_query".to_string())
        }
        _ => None,
    };
    QualityScores {
        coverage: coverage_score(sub_queries, sources),
        citation: citation_score(summaries),
        consistency,
        freshness,
        query_coverage: query_coverage_score(summaries),
        warning,
    }
}

/// Continue iff under the epoch cap and quality is still short: low
/// coverage, low citation, or sub-queries that have produced no summary.
pub fn should_continue(
    config: &ResearchConfig,
    epoch: u32,
    max_epochs: u32,
    scores: &QualityScores,
    sub_queries: &[String],
    summaries: &BTreeMap<String, String>,
) -> bool {
    if epoch >= max_epochs {
        return false;
    }
    let unanswered = sub_queries.iter().any(|sq| !summaries.contains_key(sq));
    scores.coverage < config.coverage_target
        || scores.citation < config.citation_target
        || unanswered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(url: &str, sub_query: &str, date: Option<&str>) -> Source {
        Source {
            title: "t".into(),
            url: url.into(),
            snippet: String::new(),
            score: 0.5,
            published_date: date.and_then(|d| d.parse().ok()),
            epoch_found: 1,
            sub_query: sub_query.into(),
        }
    }

    #[test]
    fn citation_counts_marked_sentences() {
        let mut summaries = BTreeMap::new();
        summaries.insert(
            "q".to_string(),
            "Postgres is fast [1]. MySQL is popular. Both scale [2].".to_string(),
        );
        let score = citation_score(&summaries);
        assert!((score - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn citation_empty_is_zero() {
        assert_eq!(citation_score(&BTreeMap::new()), 0.0);
    }

    #[test]
    fn coverage_counts_queries_with_sources() {
        let queries = vec!["a".to_string(), "b".to_string(), "c".to_string(), "d".to_string()];
        let sources = vec![
            source("u1", "a", None),
            source("u2", "b", None),
            source("u3", "c", None),
        ];
        assert!((coverage_score(&queries, &sources) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn freshness_measures_window() {
        let now: chrono::NaiveDate = "2026-08-01".parse().unwrap();
        let sources = vec![
            source("u1", "a", Some("2026-07-20")),
            source("u2", "a", Some("2026-01-01")),
            source("u3", "a", None),
        ];
        let f = freshness_score(&sources, 30, now).unwrap();
        assert!((f - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn time_sensitive_detection() {
        assert!(is_time_sensitive("current price of bitcoin"));
        assert!(is_time_sensitive("latest rust release"));
        assert!(!is_time_sensitive("how does a b-tree work"));
    }

    #[test]
    fn query_coverage_requires_half_of_terms() {
        let mut summaries = BTreeMap::new();
        summaries.insert(
            "postgres performance tuning".to_string(),
            "Postgres gains from tuning shared buffers.".to_string(),
        );
        summaries.insert(
            "mysql replication lag".to_string(),
            "Unrelated text about databases.".to_string(),
        );
        let score = query_coverage_score(&summaries).unwrap();
        assert!((score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn continuation_stops_at_epoch_cap() {
        let config = ResearchConfig::default();
        let good = QualityScores {
            coverage: 0.9,
            citation: 0.9,
            consistency: 1.0,
            ..Default::default()
        };
        assert!(!should_continue(&config, 3, 3, &good, &[], &BTreeMap::new()));
    }

    #[test]
    fn continuation_driven_by_quality_targets() {
        let config = ResearchConfig::default();
        let queries = vec!["a".to_string()];
        let mut summaries = BTreeMap::new();
        summaries.insert("a".to_string(), "s".to_string());

        let low_coverage = QualityScores {
            coverage: 0.5,
            citation: 0.9,
            consistency: 1.0,
            ..Default::default()
        };
        assert!(should_continue(&config, 1, 3, &low_coverage, &queries, &summaries));

        let good = QualityScores {
            coverage: 0.9,
            citation: 0.9,
            consistency: 1.0,
            ..Default::default()
        };
        assert!(!should_continue(&config, 1, 3, &good, &queries, &summaries));
    }

    #[test]
    fn unanswered_sub_queries_force_continuation() {
        let config = ResearchConfig::default();
        let queries = vec!["a".to_string(), "b".to_string()];
        let mut summaries = BTreeMap::new();
        summaries.insert("a".to_string(), "s".to_string());
        let good = QualityScores {
            coverage: 1.0,
            citation: 1.0,
            consistency: 1.0,
            ..Default::default()
        };
        assert!(should_continue(&config, 1, 3, &good, &queries, &summaries));
    }

    #[test]
    fn low_freshness_warning_only_for_time_sensitive() {
        let config = ResearchConfig::default();
        let now: chrono::NaiveDate = "2026-08-01".parse().unwrap();
        let sources = vec![source("u1", "a", Some("2020-01-01"))];
        let summaries = BTreeMap::new();

        let scores = finalize_scores(
            &config,
            "latest llm benchmarks",
            &["a".to_string()],
            &sources,
            &summaries,
            1.0,
            now,
        );
        assert_eq!(
            scores.warning.as_deref(),
            Some("low_freshness_for_time_sensitive_query")
        );

        let scores = finalize_scores(
            &config,
            "history of sql databases",
            &["a".to_string()],
            &sources,
            &summaries,
            1.0,
            now,
        );
        assert!(scores.warning.is_none());
    }
}
