//! Provider registry.
//!
//! Constructs and holds all configured LLM provider instances. At startup
//! the registry reads the [`LlmConfig`], resolves authentication from the
//! environment, and instantiates the appropriate adapter for each entry.
//! Providers that fail to initialize are logged and skipped; their errors
//! are kept for the health endpoint.

use std::collections::HashMap;
use std::sync::Arc;

use crate::anthropic::AnthropicProvider;
use crate::openai_compat::OpenAiCompatProvider;
use crate::traits::LlmProvider;
use wv_domain::config::{LlmConfig, ProviderKind};
use wv_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ProviderRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Records a provider that failed to initialize.
#[derive(Debug, Clone)]
pub struct ProviderInitError {
    pub provider_id: String,
    pub kind: String,
    pub error: String,
}

pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    default_provider: Option<String>,
    default_model: String,
    init_errors: Vec<ProviderInitError>,
}

impl ProviderRegistry {
    /// Build the registry from the application's [`LlmConfig`].
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let mut providers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
        let mut init_errors: Vec<ProviderInitError> = Vec::new();

        for pc in &config.providers {
            let result: Result<Arc<dyn LlmProvider>> = match pc.kind {
                ProviderKind::OpenaiCompat => OpenAiCompatProvider::from_config(pc)
                    .map(|p| Arc::new(p) as Arc<dyn LlmProvider>),
                ProviderKind::Anthropic => AnthropicProvider::from_config(pc)
                    .map(|p| Arc::new(p) as Arc<dyn LlmProvider>),
            };

            match result {
                Ok(provider) => {
                    tracing::info!(provider_id = %pc.id, kind = ?pc.kind, "registered LLM provider");
                    providers.insert(pc.id.clone(), provider);
                }
                Err(e) => {
                    tracing::warn!(
                        provider_id = %pc.id,
                        kind = ?pc.kind,
                        error = %e,
                        "failed to initialize LLM provider, skipping"
                    );
                    init_errors.push(ProviderInitError {
                        provider_id: pc.id.clone(),
                        kind: format!("{:?}", pc.kind),
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(Self {
            providers,
            default_provider: config.default_provider.clone(),
            default_model: config.default_model.clone(),
            init_errors,
        })
    }

    /// Look up a provider by its config id.
    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(provider_id).cloned()
    }

    /// Resolve a model spec to `(provider, model)`.
    ///
    /// Specs may be `"provider/model"`, a bare model name (served by the
    /// default or any provider that lists it), or empty (all defaults).
    pub fn resolve(&self, spec: Option<&str>) -> Result<(Arc<dyn LlmProvider>, String)> {
        match spec {
            Some(spec) if spec.contains('/') => {
                let (provider_id, model) = spec.split_once('/').unwrap_or((spec, ""));
                let provider = self.get(provider_id).ok_or_else(|| {
                    Error::Validation(format!("unknown provider: {provider_id}"))
                })?;
                Ok((provider, model.to_string()))
            }
            Some(model) if !model.is_empty() => {
                // Prefer a provider that lists this model, else the default.
                let by_model = self
                    .providers
                    .values()
                    .find(|p| p.known_models().iter().any(|m| m == model))
                    .cloned();
                let provider = by_model
                    .or_else(|| self.default())
                    .ok_or_else(|| Error::Validation("no LLM provider available".into()))?;
                Ok((provider, model.to_string()))
            }
            _ => {
                let provider = self
                    .default()
                    .ok_or_else(|| Error::Validation("no LLM provider available".into()))?;
                Ok((provider, self.default_model.clone()))
            }
        }
    }

    /// Whether any registered provider serves the named model. Providers
    /// with an empty model list accept anything.
    pub fn knows_model(&self, model: &str) -> bool {
        if model.contains('/') {
            let (provider_id, rest) = model.split_once('/').unwrap_or((model, ""));
            return match self.get(provider_id) {
                Some(p) => {
                    p.known_models().is_empty() || p.known_models().iter().any(|m| m == rest)
                }
                None => false,
            };
        }
        self.providers
            .values()
            .any(|p| p.known_models().is_empty() || p.known_models().iter().any(|m| m == model))
    }

    fn default(&self) -> Option<Arc<dyn LlmProvider>> {
        if let Some(id) = &self.default_provider {
            if let Some(p) = self.providers.get(id) {
                return Some(p.clone());
            }
        }
        // Deterministic fallback: lowest provider id.
        let mut ids: Vec<&String> = self.providers.keys().collect();
        ids.sort();
        ids.first().and_then(|id| self.providers.get(*id)).cloned()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Provider initialization errors (empty if all succeeded).
    pub fn init_errors(&self) -> &[ProviderInitError] {
        &self.init_errors
    }

    /// Registry with pre-built providers, for tests and embedding.
    pub fn with_providers(
        providers: Vec<Arc<dyn LlmProvider>>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            providers: providers
                .into_iter()
                .map(|p| (p.provider_id().to_string(), p))
                .collect(),
            default_provider: None,
            default_model: default_model.into(),
            init_errors: Vec::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
