use super::{AccessEvaluator, EvaluationError};
use crate::cache::{Cache, CacheBackend};
use crate::context::RequestContext;
use crate::models::{Permission, SignedInUser};
use async_trait::async_trait;
use log::{debug, warn};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Caches the decisions of another evaluator.
///
/// Only successful decisions are cached; errors always reach the caller.
#[derive(Clone)]
pub struct CachedEvaluator {
    inner: Arc<dyn AccessEvaluator>,
    cache: Cache,
}

impl CachedEvaluator {
    pub fn new(inner: Arc<dyn AccessEvaluator>, cache: Cache) -> Self {
        Self { inner, cache }
    }
}

/// Canonical form of a decision input, with sorted maps so equal inputs hash alike
#[derive(Serialize)]
struct DecisionKey<'a> {
    user_id: i64,
    org_id: i64,
    permissions: BTreeMap<&'a str, Vec<&'a str>>,
    action: &'a str,
    scope: &'a str,
}

/// Generate a cache key for a decision
fn generate_decision_cache_key(
    subject: &SignedInUser,
    required: &Permission,
) -> Result<String, serde_json::Error> {
    let permissions = subject
        .permissions
        .get(&subject.org_id)
        .map(|permissions| {
            permissions
                .iter()
                .map(|(action, scopes)| {
                    let mut scopes: Vec<&str> = scopes.iter().map(String::as_str).collect();
                    scopes.sort_unstable();
                    (action.as_str(), scopes)
                })
                .collect()
        })
        .unwrap_or_default();
    let key = DecisionKey {
        user_id: subject.user_id,
        org_id: subject.org_id,
        permissions,
        action: &required.action,
        scope: &required.scope,
    };

    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_string(&key)?.as_bytes());
    let hash = format!("{:x}", hasher.finalize());
    Ok(format!("evaluator:decision:{}", &hash[..16]))
}

#[async_trait]
impl AccessEvaluator for CachedEvaluator {
    async fn evaluate(
        &self,
        ctx: &RequestContext,
        subject: &SignedInUser,
        required: &Permission,
    ) -> Result<bool, EvaluationError> {
        if ctx.is_cancelled() {
            return Err(EvaluationError::Cancelled);
        }
        let cache_key = generate_decision_cache_key(subject, required)?;

        match self.cache.get::<bool>(&cache_key).await {
            Ok(Some(allowed)) => {
                debug!("Cache hit for key: {}", cache_key);
                return Ok(allowed);
            }
            Ok(None) => debug!("Cache miss for key: {}", cache_key),
            Err(cache_err) => warn!("Cache error for key {}: {}", cache_key, cache_err),
        }

        let allowed = self.inner.evaluate(ctx, subject, required).await?;

        if let Err(cache_err) = self.cache.set(&cache_key, &allowed).await {
            warn!("Failed to cache decision for {}: {}", cache_key, cache_err);
        }
        Ok(allowed)
    }
}
