use crate::cache::{Cache, CacheBackend, CacheError};
use log::{debug, warn};

/// Resolved impersonation scopes shared between client instances, keyed by client ID.
///
/// Entries expire with the cache TTL and can be dropped with [`ScopeStore::invalidate`].
#[derive(Clone)]
pub struct ScopeStore {
    cache: Cache,
}

impl ScopeStore {
    pub fn new(cache: Cache) -> Self {
        Self { cache }
    }

    fn key(client_id: &str) -> String {
        format!("oauth:impersonate_scopes:{client_id}")
    }

    /// Looks up stored scopes; failures are logged and reported as a miss
    pub async fn get(&self, client_id: &str) -> Option<Vec<String>> {
        let key = Self::key(client_id);
        match self.cache.get::<Vec<String>>(&key).await {
            Ok(Some(scopes)) if !scopes.is_empty() => {
                debug!("Scope store hit for client '{}'", client_id);
                Some(scopes)
            }
            Ok(_) => {
                debug!("Scope store miss for client '{}'", client_id);
                None
            }
            Err(e) => {
                warn!("Scope store error for client '{}': {}", client_id, e);
                None
            }
        }
    }

    /// Stores scopes; failures are logged and otherwise ignored
    pub async fn put(&self, client_id: &str, scopes: &[String]) {
        if scopes.is_empty() {
            return;
        }
        if let Err(e) = self.cache.set(&Self::key(client_id), &scopes).await {
            warn!("Failed to store scopes for client '{}': {}", client_id, e);
        }
    }

    pub async fn invalidate(&self, client_id: &str) -> Result<(), CacheError> {
        debug!("Invalidating stored scopes for client '{}'", client_id);
        self.cache.delete(&Self::key(client_id)).await
    }
}
