// # Memory Address Store
//
// In-memory implementation of AddressStore.
//
// ## Crash Behavior
//
// - All state is lost on restart/crash
// - First observation after a restart is treated as new and notifies again
//
// ## When to Use
//
// - Testing environments
// - Deployments where a repeated "first seen" alert after restart is harmless

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::config::AddressStoreConfig;
use crate::traits::address_store::{AddressRecord, AddressStore, AddressStoreFactory, CasOutcome};

/// In-memory address store implementation
///
/// All records live in a `HashMap` behind a `RwLock`. `compare_and_set`
/// holds the write lock across the compare and the set, which makes it
/// atomic (and serializes all tokens, which is fine for an in-memory map).
#[derive(Debug, Clone, Default)]
pub struct MemoryAddressStore {
    inner: Arc<RwLock<HashMap<String, AddressRecord>>>,
}

impl MemoryAddressStore {
    /// Create a new empty memory address store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of records in the store
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl AddressStore for MemoryAddressStore {
    async fn get(&self, token: &str) -> Result<Option<IpAddr>, Error> {
        let guard = self.inner.read().await;
        Ok(guard.get(token).map(|record| record.last_ip))
    }

    async fn get_record(&self, token: &str) -> Result<Option<AddressRecord>, Error> {
        let guard = self.inner.read().await;
        Ok(guard.get(token).cloned())
    }

    async fn compare_and_set(&self, token: &str, new_ip: IpAddr) -> Result<CasOutcome, Error> {
        let mut guard = self.inner.write().await;
        let previous = guard.get(token).map(|record| record.last_ip);

        if previous == Some(new_ip) {
            return Ok(CasOutcome::unchanged(new_ip));
        }

        guard.insert(token.to_string(), AddressRecord::new(new_ip));
        Ok(CasOutcome::changed(previous))
    }

    async fn list_tokens(&self) -> Result<Vec<String>, Error> {
        let guard = self.inner.read().await;
        Ok(guard.keys().cloned().collect())
    }

    async fn flush(&self) -> Result<(), Error> {
        // Nothing buffered
        Ok(())
    }
}

/// Factory for the `memory` store type
pub struct MemoryAddressStoreFactory;

#[async_trait]
impl AddressStoreFactory for MemoryAddressStoreFactory {
    async fn create(&self, config: &AddressStoreConfig) -> Result<Arc<dyn AddressStore>, Error> {
        match config {
            AddressStoreConfig::Memory => {
                tracing::warn!("Using in-memory address store: state will not survive a restart");
                Ok(Arc::new(MemoryAddressStore::new()))
            }
            _ => Err(Error::config("Invalid config for memory address store")),
        }
    }
}
