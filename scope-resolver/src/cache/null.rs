use super::{CacheBackend, CacheError};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

/// NullCache is a cache implementation that does nothing.
/// It is used when caching is disabled but the cache interface is still required.
#[derive(Clone, Debug)]
pub struct NullCache;

impl NullCache {
    /// Create a new NullCache instance
    pub fn new() -> Self {
        NullCache
    }
}

impl Default for NullCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for NullCache {
    async fn set<T: Serialize + Send + Sync>(
        &self,
        _key: &str,
        _value: &T,
    ) -> Result<(), CacheError> {
        Ok(())
    }

    async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        _key: &str,
    ) -> Result<Option<T>, CacheError> {
        Ok(None)
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Ok(())
    }
}
