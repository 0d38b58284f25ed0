use confique::Config;
use serde::Deserialize;
use std::str::FromStr;

/// Specifies which cache store implementation to use
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(try_from = "String")]
pub enum CacheStore {
    InMemory,
    #[default]
    None,
}

impl FromStr for CacheStore {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "in-memory" => Ok(Self::InMemory),
            "none" | "" => Ok(Self::None),
            other => Err(format!("unknown cache store '{other}'")),
        }
    }
}

impl TryFrom<String> for CacheStore {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Configuration for the caching subsystem
#[derive(Debug, Config, Clone)]
pub struct CacheConfig {
    /// Cache TTL in seconds (default: 1 hour)
    #[config(env = "SCOPES_CACHE_TTL", default = 3600)]
    pub ttl: u64,

    /// Cache store type: "in-memory" or "none" (default)
    #[config(env = "SCOPES_CACHE_STORE", default = "none")]
    pub store: CacheStore,

    /// In-memory cache specific configuration
    #[config(nested)]
    pub memory: InMemoryConfig,
}

/// In-memory cache configuration options
#[derive(Debug, Config, Clone)]
pub struct InMemoryConfig {
    /// Maximum capacity in MiB (default: 128 MiB)
    #[config(env = "SCOPES_CACHE_MEMORY_CAPACITY", default = 128)]
    pub capacity: usize,
}
