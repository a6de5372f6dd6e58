//! Plugin-based gateway registry
//!
//! Maps configuration type names to factories so messaging gateways and
//! registry stores are created from config without hard-coded branches.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dioalert_core::registry::GatewayRegistry;
//!
//! let registry = GatewayRegistry::with_builtin_stores();
//!
//! // In the dioalert-gateway-http crate
//! dioalert_gateway_http::register(&registry);
//!
//! let gateway = registry.create_gateway(&config.gateway.provider)?;
//! let store = registry
//!     .create_registry_store(&config.registry, &addresses, &operator)
//!     .await?;
//! ```

use crate::address::AddressFormat;
use crate::config::{GatewayProviderConfig, RegistryConfig};
use crate::error::{Error, Result};
use crate::state::FileRegistryStoreFactory;
use crate::traits::{MessagingGateway, MessagingGatewayFactory, RegistryStore, RegistryStoreFactory};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Registry of gateway and registry-store factories
///
/// ## Thread Safety
///
/// Interior mutability with RwLock: concurrent reads, exclusive writes.
#[derive(Default)]
pub struct GatewayRegistry {
    /// Registered messaging gateway factories
    gateways: RwLock<HashMap<String, Box<dyn MessagingGatewayFactory>>>,

    /// Registered registry store factories
    stores: RwLock<HashMap<String, Arc<dyn RegistryStoreFactory>>>,
}

// A panic while registering leaves the map itself intact, so a poisoned
// lock is still usable.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl GatewayRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in `file` and `memory` stores
    pub fn with_builtin_stores() -> Self {
        let registry = Self::new();
        registry.register_registry_store("file", Box::new(FileRegistryStoreFactory));
        registry.register_registry_store("memory", Box::new(FileRegistryStoreFactory));
        registry
    }

    /// Register a messaging gateway factory
    ///
    /// # Parameters
    ///
    /// - `name`: Gateway type name (e.g., "http")
    /// - `factory`: Factory object for creating gateway instances
    pub fn register_gateway(&self, name: impl Into<String>, factory: Box<dyn MessagingGatewayFactory>) {
        write(&self.gateways).insert(name.into(), factory);
    }

    /// Register a registry store factory
    ///
    /// # Parameters
    ///
    /// - `name`: Store type name (e.g., "file", "memory")
    /// - `factory`: Factory object for creating store instances
    pub fn register_registry_store(&self, name: impl Into<String>, factory: Box<dyn RegistryStoreFactory>) {
        write(&self.stores).insert(name.into(), Arc::from(factory));
    }

    /// Create a messaging gateway from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn MessagingGateway>)`: Created gateway instance
    /// - `Err(Error)`: If the gateway type is not registered or creation fails
    pub fn create_gateway(&self, config: &GatewayProviderConfig) -> Result<Box<dyn MessagingGateway>> {
        let gateway_type = config.type_name();
        let gateways = read(&self.gateways);

        let factory = gateways
            .get(gateway_type)
            .ok_or_else(|| Error::config(format!("Unknown gateway type: {}", gateway_type)))?;

        factory.create(config)
    }

    /// Create a registry store from configuration
    ///
    /// # Parameters
    ///
    /// - `config`: Registry configuration
    /// - `addresses`: Address format for the durable short form
    /// - `operator_address`: Seed for a fresh recipient set
    pub async fn create_registry_store(
        &self,
        config: &RegistryConfig,
        addresses: &AddressFormat,
        operator_address: &str,
    ) -> Result<Box<dyn RegistryStore>> {
        let store_type = config.type_name();

        // Release the lock before the async create
        let factory = read(&self.stores)
            .get(store_type)
            .cloned()
            .ok_or_else(|| Error::config(format!("Unknown registry store type: {}", store_type)))?;

        factory.create(config, addresses, operator_address).await
    }

    /// Registered gateway type names
    pub fn list_gateways(&self) -> Vec<String> {
        read(&self.gateways).keys().cloned().collect()
    }

    /// Registered registry store type names
    pub fn list_registry_stores(&self) -> Vec<String> {
        read(&self.stores).keys().cloned().collect()
    }

    /// Check if a gateway type is registered
    pub fn has_gateway(&self, name: &str) -> bool {
        read(&self.gateways).contains_key(name)
    }

    /// Check if a registry store type is registered
    pub fn has_registry_store(&self, name: &str) -> bool {
        read(&self.stores).contains_key(name)
    }
}
