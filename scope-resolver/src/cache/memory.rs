use super::{CacheBackend, CacheError};
use async_trait::async_trait;
use moka::future::Cache as MokaCache;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

/// Moka-backed cache holding serialized values, weighted by their byte length
#[derive(Clone)]
pub struct InMemoryCache {
    cache: MokaCache<String, String>,
}

impl InMemoryCache {
    /// Initialize a new in-memory cache instance
    pub fn new(ttl_secs: u64, capacity_mib: usize) -> Result<Self, String> {
        let max_capacity_bytes: u64 = capacity_mib
            .checked_mul(1024 * 1024)
            .and_then(|bytes| u64::try_from(bytes).ok())
            .ok_or_else(|| format!("Cache capacity of {capacity_mib} MiB is too large"))?;

        let cache = MokaCache::builder()
            .time_to_live(Duration::from_secs(ttl_secs))
            .weigher(|key: &String, value: &String| -> u32 {
                (key.len() + value.len()).try_into().unwrap_or(u32::MAX)
            })
            .max_capacity(max_capacity_bytes)
            .build();

        Ok(Self { cache })
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), CacheError> {
        let serialized = serde_json::to_string(value)?;
        self.cache.insert(key.to_string(), serialized).await;
        Ok(())
    }

    async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Option<T>, CacheError> {
        if let Some(value) = self.cache.get(key).await {
            serde_json::from_str(&value)
                .map_err(|e| CacheError::Deserialization(e.to_string()))
                .map(Some)
        } else {
            Ok(None)
        }
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.cache.remove(key).await;
        Ok(())
    }
}
