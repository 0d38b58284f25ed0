use crate::cache::CacheError;
use crate::evaluator::EvaluationError;
use thiserror::Error;

/// Errors returned by scope resolution
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Permission evaluation failed: {0}")]
    Evaluation(#[from] EvaluationError),
}

/// Errors that can occur while building a resolver from settings
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Configuration error: {0}")]
    Config(#[from] confique::Error),
    #[error("Invalid setting {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },
    #[error("Failed to create cache: {0}")]
    Cache(#[from] CacheError),
    #[error("Failed to create evaluator client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

impl SetupError {
    pub fn invalid<S: ToString>(name: &'static str, reason: S) -> Self {
        Self::InvalidSetting {
            name,
            reason: reason.to_string(),
        }
    }
}
