//! Intent router: classifies a user query into an execution mode.
//!
//! Order of precedence: explicit user override, LLM classification, then
//! keyword/shape heuristics when the classifier is unavailable or unsure.
//! The router only returns a decision; it never performs the work.

use std::sync::Arc;

use wv_domain::state::{RouteDecision, SearchMode};
use wv_domain::tool::Message;
use wv_providers::{ChatRequest, LlmProvider};

/// Confidence below which the LLM's answer is discarded for heuristics.
const MIN_CONFIDENCE: f64 = 0.5;

const CLASSIFY_PROMPT: &str = "Classify the user's request into one execution mode:\n\
- \"direct\": answerable from knowledge, no tools\n\
- \"web\": needs a quick web lookup (current facts, a specific page)\n\
- \"agent\": needs tool use or code work (run, fix, refactor, file edits)\n\
- \"deep\": needs multi-source research with a structured report\n\
Respond with JSON only: {\"mode\": \"...\", \"confidence\": 0.0-1.0, \"rationale\": \"...\"}.";

/// Decide the execution mode for a turn.
pub async fn route(
    provider: &Arc<dyn LlmProvider>,
    model: &str,
    latest: &str,
    requested: SearchMode,
) -> RouteDecision {
    // 1. Explicit user override wins outright.
    if requested != SearchMode::Auto {
        return RouteDecision {
            mode: requested,
            confidence: 1.0,
            rationale: "user override".into(),
        };
    }

    // 2. LLM classification.
    let req = ChatRequest {
        messages: vec![Message::system(CLASSIFY_PROMPT), Message::user(latest.to_string())],
        json_mode: true,
        temperature: Some(0.0),
        max_tokens: Some(200),
        model: Some(model.to_string()),
        ..Default::default()
    };
    match provider.chat(&req).await {
        Ok(resp) => {
            if let Some(decision) = parse_decision(&resp.content) {
                if decision.confidence >= MIN_CONFIDENCE {
                    return decision;
                }
                tracing::debug!(
                    confidence = decision.confidence,
                    "classifier unsure, falling back to heuristics"
                );
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "classification call failed, falling back to heuristics");
        }
    }

    // 3. Heuristic rules.
    heuristic_route(latest)
}

fn parse_decision(content: &str) -> Option<RouteDecision> {
    let v: serde_json::Value = serde_json::from_str(content.trim()).ok()?;
    let mode = match v.get("mode")?.as_str()? {
        "direct" => SearchMode::Direct,
        "web" => SearchMode::Web,
        "agent" => SearchMode::Agent,
        "deep" => SearchMode::Deep,
        _ => return None,
    };
    Some(RouteDecision {
        mode,
        confidence: v
            .get("confidence")
            .and_then(|c| c.as_f64())
            .unwrap_or(0.0)
            .clamp(0.0, 1.0),
        rationale: v
            .get("rationale")
            .and_then(|r| r.as_str())
            .unwrap_or("classifier")
            .to_string(),
    })
}

/// Keyword/shape rules used when classification is unavailable or unsure.
pub fn heuristic_route(latest: &str) -> RouteDecision {
    let url = regex::Regex::new(r"https?://\S+").expect("static regex");
    if url.is_match(latest) {
        return decision(SearchMode::Web, "contains a URL");
    }

    let lower = latest.trim().to_ascii_lowercase();
    if lower.starts_with("```")
        || lower.starts_with("fix")
        || lower.starts_with("refactor")
        || lower.starts_with("debug")
    {
        return decision(SearchMode::Agent, "code-work marker");
    }

    const DEEP_TERMS: &[&str] = &["compare", "analyze", "deep", "research", "report", "survey"];
    let deep_hits = DEEP_TERMS.iter().filter(|t| lower.contains(*t)).count();
    if deep_hits >= 2 {
        return decision(SearchMode::Deep, "multiple research keywords");
    }

    decision(SearchMode::Direct, "default")
}

fn decision(mode: SearchMode, rationale: &str) -> RouteDecision {
    RouteDecision {
        mode,
        confidence: 0.6,
        rationale: rationale.into(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_routes_to_web() {
        let d = heuristic_route("summarize https://example.com/post");
        assert_eq!(d.mode, SearchMode::Web);
    }

    #[test]
    fn code_markers_route_to_agent() {
        assert_eq!(heuristic_route("fix the failing test").mode, SearchMode::Agent);
        assert_eq!(heuristic_route("refactor this module").mode, SearchMode::Agent);
        assert_eq!(heuristic_route("```rust\nfn main() {}\n```").mode, SearchMode::Agent);
    }

    #[test]
    fn two_research_terms_route_to_deep() {
        let d = heuristic_route("compare and analyze postgres vs mysql");
        assert_eq!(d.mode, SearchMode::Deep);
    }

    #[test]
    fn single_research_term_stays_direct() {
        assert_eq!(heuristic_route("compare these two numbers").mode, SearchMode::Direct);
    }

    #[test]
    fn plain_question_is_direct() {
        assert_eq!(heuristic_route("what is 2+2?").mode, SearchMode::Direct);
    }

    #[test]
    fn parse_decision_accepts_valid_json() {
        let d = parse_decision(r#"{"mode":"web","confidence":0.9,"rationale":"needs lookup"}"#)
            .unwrap();
        assert_eq!(d.mode, SearchMode::Web);
        assert!((d.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn parse_decision_rejects_unknown_mode() {
        assert!(parse_decision(r#"{"mode":"turbo","confidence":1.0}"#).is_none());
    }

    #[test]
    fn parse_decision_rejects_prose() {
        assert!(parse_decision("I think this is a web query.").is_none());
    }

    #[test]
    fn confidence_is_clamped() {
        let d = parse_decision(r#"{"mode":"direct","confidence":7.5}"#).unwrap();
        assert_eq!(d.confidence, 1.0);
    }
}
