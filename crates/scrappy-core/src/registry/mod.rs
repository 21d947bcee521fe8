//! Plugin-based provider registry
//!
//! The registry maps configuration type names to factories, so the daemon
//! builds its address store and notifier from configuration without a
//! hard-coded if-else chain.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use scrappy_core::ProviderRegistry;
//!
//! // Built-in stores ("file", "memory") and notifier ("log")
//! let mut registry = ProviderRegistry::with_builtins();
//!
//! // Push providers register themselves
//! scrappy_notify_pushover::register(&mut registry);
//!
//! let store = registry.create_address_store(&config.address_store).await?;
//! let notifier = registry.create_notifier(&config.notifier)?;
//! ```

use crate::config::{AddressStoreConfig, NotifierConfig};
use crate::error::{Error, Result};
use crate::notifier::LogNotifierFactory;
use crate::state::{FileAddressStoreFactory, MemoryAddressStoreFactory};
use crate::traits::{AddressStore, AddressStoreFactory, Notifier, NotifierFactory};
use std::collections::HashMap;
use std::sync::Arc;

/// Provider registry for plugin-based store and notifier creation
///
/// Registration happens during startup, before the registry is shared, so
/// it takes `&mut self` and needs no interior locking.
#[derive(Default)]
pub struct ProviderRegistry {
    /// Registered notifier factories
    notifiers: HashMap<String, Box<dyn NotifierFactory>>,

    /// Registered address store factories
    address_stores: HashMap<String, Box<dyn AddressStoreFactory>>,
}

impl ProviderRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the factories shipped in this crate
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_address_store("file", Box::new(FileAddressStoreFactory));
        registry.register_address_store("memory", Box::new(MemoryAddressStoreFactory));
        registry.register_notifier("log", Box::new(LogNotifierFactory));
        registry
    }

    /// Register a notifier factory
    ///
    /// # Parameters
    ///
    /// - `name`: Notifier type name (e.g., "pushover")
    /// - `factory`: Factory object for creating notifier instances
    pub fn register_notifier(&mut self, name: impl Into<String>, factory: Box<dyn NotifierFactory>) {
        self.notifiers.insert(name.into(), factory);
    }

    /// Register an address store factory
    ///
    /// # Parameters
    ///
    /// - `name`: Store type name (e.g., "file", "memory")
    /// - `factory`: Factory object for creating store instances
    pub fn register_address_store(
        &mut self,
        name: impl Into<String>,
        factory: Box<dyn AddressStoreFactory>,
    ) {
        self.address_stores.insert(name.into(), factory);
    }

    /// Create a notifier from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Arc<dyn Notifier>)`: Created notifier instance
    /// - `Err(Error)`: If the type is not registered or creation fails
    pub fn create_notifier(&self, config: &NotifierConfig) -> Result<Arc<dyn Notifier>> {
        let notifier_type = config.type_name();
        let factory = self
            .notifiers
            .get(notifier_type)
            .ok_or_else(|| Error::config(format!("Unknown notifier type: {}", notifier_type)))?;

        factory.create(config)
    }

    /// Create an address store from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Arc<dyn AddressStore>)`: Created store instance
    /// - `Err(Error)`: If the type is not registered or creation fails
    pub async fn create_address_store(
        &self,
        config: &AddressStoreConfig,
    ) -> Result<Arc<dyn AddressStore>> {
        let store_type = config.type_name();
        let factory = self
            .address_stores
            .get(store_type)
            .ok_or_else(|| Error::config(format!("Unknown address store type: {}", store_type)))?;

        factory.create(config).await
    }

    /// List all registered notifier types
    pub fn list_notifiers(&self) -> Vec<String> {
        self.notifiers.keys().cloned().collect()
    }

    /// List all registered address store types
    pub fn list_address_stores(&self) -> Vec<String> {
        self.address_stores.keys().cloned().collect()
    }

    /// Check if a notifier type is registered
    pub fn has_notifier(&self, name: &str) -> bool {
        self.notifiers.contains_key(name)
    }

    /// Check if an address store type is registered
    pub fn has_address_store(&self, name: &str) -> bool {
        self.address_stores.contains_key(name)
    }
}
