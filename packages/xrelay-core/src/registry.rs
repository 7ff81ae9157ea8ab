//! Token Registry
//!
//! Maps a source-chain asset to its wrapped counterpart on the destination.
//! The messenger contract holds the authoritative copy; the relay only reads
//! it, through [`CachedTokenRegistry`].
//!
//! Mappings are immutable once registered, so the cache can hold positive
//! entries for a long TTL. Negative entries expire quickly so that a mapping
//! registered out of band is picked up without a restart.

use alloy::primitives::Address;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, error};

use crate::error::RegistryError;
use crate::types::TokenMapping;

/// Backend the cache refreshes from
#[async_trait]
pub trait TokenMappingSource: Send + Sync {
    async fn fetch_mapping(
        &self,
        source_chain: u64,
        remote_token: Address,
    ) -> eyre::Result<Option<String>>;
}

// ============================================================================
// In-memory registry
// ============================================================================

/// Registry with the same register/resolve rules as the messenger contract
#[derive(Debug, Default)]
pub struct TokenRegistry {
    mappings: RwLock<HashMap<(u64, Address), String>>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mapping. Re-registering the same pair is a no-op.
    pub fn register(
        &self,
        source_chain: u64,
        remote_token: Address,
        local_token: impl Into<String>,
    ) -> Result<(), RegistryError> {
        let local_token = local_token.into();
        let mut mappings = self.mappings.write().unwrap_or_else(|e| e.into_inner());

        match mappings.get(&(source_chain, remote_token)) {
            Some(existing) if *existing == local_token => Ok(()),
            Some(existing) => Err(RegistryError::MappingConflict {
                source_chain,
                remote_token,
                existing: existing.clone(),
                requested: local_token,
            }),
            None => {
                mappings.insert((source_chain, remote_token), local_token);
                Ok(())
            }
        }
    }

    pub fn resolve(&self, source_chain: u64, remote_token: Address) -> Result<String, RegistryError> {
        self.mappings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(source_chain, remote_token))
            .cloned()
            .ok_or(RegistryError::UnmappedToken {
                source_chain,
                remote_token,
            })
    }

    pub fn mappings(&self) -> Vec<TokenMapping> {
        self.mappings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|((source_chain, remote_token), local_token)| TokenMapping {
                source_chain: *source_chain,
                remote_token: *remote_token,
                local_token: local_token.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl TokenMappingSource for TokenRegistry {
    async fn fetch_mapping(
        &self,
        source_chain: u64,
        remote_token: Address,
    ) -> eyre::Result<Option<String>> {
        Ok(self.resolve(source_chain, remote_token).ok())
    }
}

// ============================================================================
// Cached client
// ============================================================================

#[derive(Debug, Clone)]
struct CacheEntry {
    local_token: Option<String>,
    fetched_at: Instant,
}

pub struct CachedTokenRegistry {
    source: Arc<dyn TokenMappingSource>,
    ttl: Duration,
    negative_ttl: Duration,
    entries: tokio::sync::RwLock<HashMap<(u64, Address), CacheEntry>>,
}

impl CachedTokenRegistry {
    pub fn new(source: Arc<dyn TokenMappingSource>, ttl: Duration, negative_ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            negative_ttl,
            entries: tokio::sync::RwLock::new(HashMap::new()),
        }
    }

    /// Resolve a remote token, refreshing from the source when the entry is stale
    pub async fn resolve(
        &self,
        source_chain: u64,
        remote_token: Address,
    ) -> Result<String, RegistryError> {
        let key = (source_chain, remote_token);
        let previous = self.entries.read().await.get(&key).cloned();

        if let Some(entry) = &previous {
            let ttl = if entry.local_token.is_some() {
                self.ttl
            } else {
                self.negative_ttl
            };
            if entry.fetched_at.elapsed() < ttl {
                return entry.local_token.clone().ok_or(RegistryError::UnmappedToken {
                    source_chain,
                    remote_token,
                });
            }
        }

        let fetched = self
            .source
            .fetch_mapping(source_chain, remote_token)
            .await
            .map_err(|e| RegistryError::Unavailable(format!("{:#}", e)))?;

        // Mappings never change; a different answer means the backend was swapped
        if let (Some(existing), Some(requested)) =
            (previous.and_then(|e| e.local_token), fetched.as_ref())
        {
            if existing != *requested {
                error!(
                    source_chain,
                    remote_token = %remote_token,
                    existing = %existing,
                    requested = %requested,
                    "Token mapping changed underneath the cache"
                );
                return Err(RegistryError::MappingConflict {
                    source_chain,
                    remote_token,
                    existing,
                    requested: requested.clone(),
                });
            }
        }

        debug!(
            source_chain,
            remote_token = %remote_token,
            local_token = ?fetched,
            "Refreshed token mapping"
        );

        self.entries.write().await.insert(
            key,
            CacheEntry {
                local_token: fetched.clone(),
                fetched_at: Instant::now(),
            },
        );

        fetched.ok_or(RegistryError::UnmappedToken {
            source_chain,
            remote_token,
        })
    }

    /// Drop a cached entry so the next resolve hits the source
    pub async fn invalidate(&self, source_chain: u64, remote_token: Address) {
        self.entries.write().await.remove(&(source_chain, remote_token));
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        inner: TokenRegistry,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenMappingSource for CountingSource {
        async fn fetch_mapping(
            &self,
            source_chain: u64,
            remote_token: Address,
        ) -> eyre::Result<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.fetch_mapping(source_chain, remote_token).await
        }
    }

    struct BrokenSource;

    #[async_trait]
    impl TokenMappingSource for BrokenSource {
        async fn fetch_mapping(&self, _: u64, _: Address) -> eyre::Result<Option<String>> {
            Err(eyre::eyre!("connection refused"))
        }
    }

    fn hoc() -> Address {
        Address::repeat_byte(0x0c)
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = TokenRegistry::new();
        registry.register(1, hoc(), "whoc").unwrap();
        registry.register(1, hoc(), "whoc").unwrap();
        assert_eq!(registry.resolve(1, hoc()).unwrap(), "whoc");
        assert_eq!(registry.mappings().len(), 1);
    }

    #[test]
    fn test_register_conflict() {
        let registry = TokenRegistry::new();
        registry.register(1, hoc(), "whoc").unwrap();
        let err = registry.register(1, hoc(), "other").unwrap_err();
        assert!(matches!(err, RegistryError::MappingConflict { .. }));
        assert_eq!(registry.resolve(1, hoc()).unwrap(), "whoc");
    }

    #[test]
    fn test_resolve_is_scoped_by_chain() {
        let registry = TokenRegistry::new();
        registry.register(1, hoc(), "whoc").unwrap();
        assert!(matches!(
            registry.resolve(2, hoc()),
            Err(RegistryError::UnmappedToken { source_chain: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_cache_serves_positive_hits() {
        let source = Arc::new(CountingSource {
            inner: TokenRegistry::new(),
            calls: AtomicUsize::new(0),
        });
        source.inner.register(1, hoc(), "whoc").unwrap();

        let cache = CachedTokenRegistry::new(
            source.clone(),
            Duration::from_secs(60),
            Duration::from_secs(60),
        );
        assert_eq!(cache.resolve(1, hoc()).await.unwrap(), "whoc");
        assert_eq!(cache.resolve(1, hoc()).await.unwrap(), "whoc");
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_negative_entry_picks_up_registration() {
        let source = Arc::new(CountingSource {
            inner: TokenRegistry::new(),
            calls: AtomicUsize::new(0),
        });
        let cache =
            CachedTokenRegistry::new(source.clone(), Duration::from_secs(60), Duration::ZERO);

        assert!(matches!(
            cache.resolve(1, hoc()).await,
            Err(RegistryError::UnmappedToken { .. })
        ));

        source.inner.register(1, hoc(), "whoc").unwrap();
        assert_eq!(cache.resolve(1, hoc()).await.unwrap(), "whoc");
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_source_failure_is_unavailable() {
        let cache = CachedTokenRegistry::new(
            Arc::new(BrokenSource),
            Duration::from_secs(60),
            Duration::from_secs(5),
        );
        let err = cache.resolve(1, hoc()).await.unwrap_err();
        assert!(matches!(err, RegistryError::Unavailable(_)));
        assert!(!err.is_configuration());
        assert_eq!(cache.len().await, 0);
    }
}
