use crate::config::{CacheStore, Settings};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

pub mod memory;
pub mod null;

/// Errors that can occur during cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Failed to serialize value: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Failed to parse value: {0}")]
    Deserialization(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Cache trait defining the interface for all cache implementations.
///
/// Values are stored serialized, so any serde type can be cached. Implementations
/// must be thread-safe and cheap to clone, since the decision cache and the scope
/// store share one instance.
#[async_trait::async_trait]
pub trait CacheBackend: Send + Sync {
    /// Store a value in the cache with default TTL
    async fn set<T: Serialize + Send + Sync>(&self, key: &str, value: &T)
        -> Result<(), CacheError>;

    /// Retrieve a value from the cache
    async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Option<T>, CacheError>;

    /// Delete a value from the cache
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// Cache implementation chosen at runtime from the settings
#[derive(Clone)]
pub enum Cache {
    /// In-memory cache implementation using Moka
    InMemory(memory::InMemoryCache),
    /// No-op cache implementation that doesn't actually cache anything
    Null(null::NullCache),
}

impl Cache {
    /// Whether anything stored here can ever be read back
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Null(_))
    }
}

#[async_trait::async_trait]
impl CacheBackend for Cache {
    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), CacheError> {
        match self {
            Self::InMemory(cache) => cache.set(key, value).await,
            Self::Null(cache) => cache.set(key, value).await,
        }
    }

    async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Option<T>, CacheError> {
        match self {
            Self::InMemory(cache) => cache.get(key).await,
            Self::Null(cache) => cache.get(key).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        match self {
            Self::InMemory(cache) => cache.delete(key).await,
            Self::Null(cache) => cache.delete(key).await,
        }
    }
}

/// Creates the cache implementation selected by the settings
pub fn create_cache(settings: &Settings) -> Result<Cache, CacheError> {
    match settings.cache.store {
        CacheStore::InMemory => {
            let cache =
                memory::InMemoryCache::new(settings.cache.ttl, settings.cache.memory.capacity)
                    .map_err(CacheError::Config)?;
            Ok(Cache::InMemory(cache))
        }
        CacheStore::None => Ok(Cache::Null(null::NullCache::new())),
    }
}
