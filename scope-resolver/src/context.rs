use tokio_util::sync::CancellationToken;

/// Per-call context handed through to the permission evaluator.
///
/// The resolver itself never times out or retries; callers that need to bound a
/// resolution cancel the token and the evaluator gives up with
/// [`EvaluationError::Cancelled`](crate::evaluator::EvaluationError::Cancelled).
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    cancellation: CancellationToken,
}

impl RequestContext {
    /// A context that is never cancelled
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_cancellation(cancellation: CancellationToken) -> Self {
        Self { cancellation }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
