pub use crate::config::cache::{CacheConfig, CacheStore, InMemoryConfig};
pub use crate::config::evaluator::{EvaluatorBackend, EvaluatorConfig};
use confique::Config;

pub mod cache;
pub mod evaluator;

/// Main configuration structure for the scope resolver
#[derive(Debug, Config, Clone)]
pub struct Settings {
    /// Debug mode (injects debug attributes to OPA requests)
    #[config(env = "SCOPES_DEBUG")]
    pub debug: Option<bool>,

    /// Permission evaluator configuration
    #[config(nested)]
    pub evaluator: EvaluatorConfig,

    /// Cache configuration
    #[config(nested)]
    pub cache: CacheConfig,
}

impl Settings {
    /// Loads the settings from `SCOPES_*` environment variables, falling back to defaults
    pub fn new() -> Result<Self, confique::Error> {
        Self::builder().env().load()
    }

    /// Settings made only of the default values, ignoring the environment
    pub fn defaults() -> Result<Self, confique::Error> {
        Self::builder().load()
    }

    #[cfg(test)]
    pub fn for_test_with_mock(opa_mock: &wiremock::MockServer) -> Self {
        Self {
            debug: None,
            evaluator: EvaluatorConfig {
                backend: EvaluatorBackend::Opa,
                opa_url: opa_mock.uri(),
                opa_policy_path: "/v1/data/oauthserver/impersonate".to_string(),
                query_timeout: 5,
                api_token: Some("test_api_token".to_string()),
            },
            cache: CacheConfig {
                ttl: 60,
                store: CacheStore::None,
                memory: InMemoryConfig { capacity: 128 },
            },
        }
    }
}
