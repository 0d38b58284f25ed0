use crate::context::RequestContext;
use crate::models::{Permission, SignedInUser};
use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

pub mod cached;
pub mod local;
pub mod opa;

pub use cached::CachedEvaluator;
pub use local::LocalEvaluator;
pub use opa::OpaEvaluator;

/// Errors that can occur while evaluating a permission
#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("Failed to send request to OPA: {0}")]
    Request(#[from] reqwest::Error),
    #[error("OPA request failed with status: {0}")]
    InvalidStatus(StatusCode),
    #[error("Failed to parse OPA response: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Evaluation was cancelled")]
    Cancelled,
    #[error("Permission store unavailable: {0}")]
    Unavailable(String),
}

/// Decides whether a subject holds a required permission.
///
/// Implementations may block on I/O. They must give up with
/// [`EvaluationError::Cancelled`] once the context is cancelled.
#[async_trait]
pub trait AccessEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        ctx: &RequestContext,
        subject: &SignedInUser,
        required: &Permission,
    ) -> Result<bool, EvaluationError>;
}

/// Returns true when a held scope covers the required one.
///
/// `*` covers everything, `users:*` covers `users:id:3` and `users:*` itself, and any
/// other scope only covers an identical one.
pub fn scope_covers(held: &str, required: &str) -> bool {
    if held == required {
        return true;
    }
    match held.strip_suffix('*') {
        Some(prefix) => required.starts_with(prefix),
        None => false,
    }
}
