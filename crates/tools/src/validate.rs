//! JSON-schema argument validation.
//!
//! Each descriptor's schema is compiled once at registration; validation
//! errors are flattened into a single `Validation` error listing every
//! failing path.

use wv_domain::error::{Error, Result};

/// A schema compiled for repeated validation.
pub struct CompiledSchema {
    validator: jsonschema::Validator,
}

impl CompiledSchema {
    pub fn compile(schema: &serde_json::Value) -> Result<Self> {
        let validator = jsonschema::validator_for(schema)
            .map_err(|e| Error::Validation(format!("invalid tool schema: {e}")))?;
        Ok(Self { validator })
    }

    /// Validate `args` against the schema; returns the args unchanged on
    /// success so callers can treat the result as normalized input.
    pub fn validate(&self, tool: &str, args: serde_json::Value) -> Result<serde_json::Value> {
        let errors: Vec<String> = self
            .validator
            .iter_errors(&args)
            .map(|e| format!("{}: {}", e.instance_path(), e))
            .collect();
        if errors.is_empty() {
            Ok(args)
        } else {
            Err(Error::Validation(format!(
                "arguments for {tool} failed schema validation: {}",
                errors.join("; ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "max_results": { "type": "integer", "minimum": 1 }
            },
            "required": ["query"]
        })
    }

    #[test]
    fn valid_args_pass_through() {
        let compiled = CompiledSchema::compile(&schema()).unwrap();
        let args = serde_json::json!({ "query": "rust", "max_results": 5 });
        let out = compiled.validate("web_search", args.clone()).unwrap();
        assert_eq!(out, args);
    }

    #[test]
    fn missing_required_field_fails() {
        let compiled = CompiledSchema::compile(&schema()).unwrap();
        let err = compiled
            .validate("web_search", serde_json::json!({ "max_results": 5 }))
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert!(err.to_string().contains("query"));
    }

    #[test]
    fn wrong_type_fails() {
        let compiled = CompiledSchema::compile(&schema()).unwrap();
        assert!(compiled
            .validate("web_search", serde_json::json!({ "query": 42 }))
            .is_err());
    }

    #[test]
    fn malformed_schema_is_rejected_at_compile() {
        let bad = serde_json::json!({ "type": "definitely-not-a-type" });
        assert!(CompiledSchema::compile(&bad).is_err());
    }
}
