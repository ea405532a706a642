//! Query decomposition (epoch 1 only).

use std::sync::Arc;

use wv_providers::{ChatRequest, LlmProvider};
use wv_domain::tool::Message;

const DECOMPOSE_PROMPT: &str = "Break the research question into focused, independently \
searchable sub-queries. Respond with a JSON object: {\"sub_queries\": [\"...\"]}. \
Use at most {max} sub-queries. Do not include commentary.";

/// Ask the LLM for sub-queries; malformed output falls back to the
/// original query alone.
pub async fn decompose(
    provider: &Arc<dyn LlmProvider>,
    model: &str,
    original_query: &str,
    max_sub_queries: usize,
) -> Vec<String> {
    let prompt = DECOMPOSE_PROMPT.replace("{max}", &max_sub_queries.to_string());
    let req = ChatRequest {
        messages: vec![
            Message::system(prompt),
            Message::user(original_query.to_string()),
        ],
        json_mode: true,
        temperature: Some(0.2),
        model: Some(model.to_string()),
        ..Default::default()
    };

    let fallback = vec![original_query.to_string()];
    let content = match provider.chat(&req).await {
        Ok(resp) => resp.content,
        Err(e) => {
            tracing::warn!(error = %e, "decomposition call failed, using original query");
            return fallback;
        }
    };

    match parse_sub_queries(&content, max_sub_queries) {
        Some(queries) if !queries.is_empty() => queries,
        _ => {
            tracing::warn!("decomposition output malformed, using original query");
            fallback
        }
    }
}

fn parse_sub_queries(content: &str, max: usize) -> Option<Vec<String>> {
    let v: serde_json::Value = serde_json::from_str(content.trim()).ok()?;
    // Accept either the object form or a bare array.
    let arr = v
        .get("sub_queries")
        .and_then(|s| s.as_array())
        .or_else(|| v.as_array())?;
    let queries: Vec<String> = arr
        .iter()
        .filter_map(|q| q.as_str())
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .take(max)
        .collect();
    Some(queries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_object_form() {
        let out = parse_sub_queries(
            r#"{"sub_queries": ["postgres oltp performance", "mysql oltp performance"]}"#,
            5,
        )
        .unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn parses_bare_array() {
        let out = parse_sub_queries(r#"["a", "b", "c"]"#, 5).unwrap();
        assert_eq!(out, vec!["a", "b", "c"]);
    }

    #[test]
    fn caps_at_max() {
        let out = parse_sub_queries(r#"["a","b","c","d","e","f","g"]"#, 5).unwrap();
        assert_eq!(out.len(), 5);
    }

    #[test]
    fn rejects_non_json() {
        assert!(parse_sub_queries("Sure! Here are some sub-queries:", 5).is_none());
    }

    #[test]
    fn drops_empty_entries() {
        let out = parse_sub_queries(r#"["a", "", "  "]"#, 5).unwrap();
        assert_eq!(out, vec!["a"]);
    }
}
