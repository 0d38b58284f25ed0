use super::{scope_covers, AccessEvaluator, EvaluationError};
use crate::context::RequestContext;
use crate::models::{Permission, SignedInUser};
use async_trait::async_trait;
use log::debug;

/// Evaluates permissions in process, against those carried by the subject for its
/// current organization.
#[derive(Debug, Clone, Default)]
pub struct LocalEvaluator;

impl LocalEvaluator {
    pub fn new() -> Self {
        LocalEvaluator
    }

    fn holds(subject: &SignedInUser, required: &Permission) -> bool {
        subject
            .org_permissions()
            .and_then(|permissions| permissions.get(&required.action))
            .is_some_and(|scopes| {
                scopes
                    .iter()
                    .any(|held| scope_covers(held, &required.scope))
            })
    }
}

#[async_trait]
impl AccessEvaluator for LocalEvaluator {
    async fn evaluate(
        &self,
        ctx: &RequestContext,
        subject: &SignedInUser,
        required: &Permission,
    ) -> Result<bool, EvaluationError> {
        if ctx.is_cancelled() {
            return Err(EvaluationError::Cancelled);
        }
        let allowed = Self::holds(subject, required);
        debug!(
            "Local evaluation of {}:{} for user {} in org {}: {}",
            required.action, required.scope, subject.user_id, subject.org_id, allowed
        );
        Ok(allowed)
    }
}
