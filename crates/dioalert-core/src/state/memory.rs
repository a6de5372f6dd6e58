// # Memory Registry Store
//
// In-memory implementation of RegistryStore.
//
// ## Purpose
//
// Provides a simple, fast registry that doesn't persist across restarts.
// Useful for testing, demos, and deployments where recipients are
// reconfigured at every start.
//
// ## Crash Behavior
//
// - All recipients and names are lost on restart/crash
// - The recipient set restarts as `{operator}`

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::registry_store::{Membership, NameChange, RegistryStore};

/// In-memory registry store implementation
///
/// # Example
///
/// ```rust,no_run
/// use dioalert_core::state::MemoryRegistryStore;
/// use dioalert_core::traits::RegistryStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryRegistryStore::with_operator("5491156511894@s.whatsapp.net");
///
///     store.set_name("860599001234567", "North Branch").await?;
///     let name = store.display_name("860599001234567").await?;
///     assert_eq!(name.as_deref(), Some("North Branch"));
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistryStore {
    inner: Arc<RwLock<Registries>>,
}

#[derive(Debug, Default)]
struct Registries {
    recipients: Vec<String>,
    names: BTreeMap<String, String>,
}

impl MemoryRegistryStore {
    /// Create a store with an empty recipient set
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store whose recipient set holds only the operator
    pub fn with_operator(operator_address: impl Into<String>) -> Self {
        Self::with_recipients([operator_address.into()])
    }

    /// Create a store with the given recipients (duplicates are dropped)
    pub fn with_recipients(recipients: impl IntoIterator<Item = String>) -> Self {
        let mut list: Vec<String> = Vec::new();
        for address in recipients {
            if !list.contains(&address) {
                list.push(address);
            }
        }

        Self {
            inner: Arc::new(RwLock::new(Registries {
                recipients: list,
                names: BTreeMap::new(),
            })),
        }
    }
}

#[async_trait]
impl RegistryStore for MemoryRegistryStore {
    async fn recipients(&self) -> Result<Vec<String>, Error> {
        Ok(self.inner.read().await.recipients.clone())
    }

    async fn add_recipient(&self, address: &str) -> Result<Membership, Error> {
        let mut guard = self.inner.write().await;
        if guard.recipients.iter().any(|a| a == address) {
            return Ok(Membership::AlreadyPresent);
        }
        guard.recipients.push(address.to_string());
        Ok(Membership::Added)
    }

    async fn remove_recipient(&self, address: &str) -> Result<Membership, Error> {
        let mut guard = self.inner.write().await;
        match guard.recipients.iter().position(|a| a == address) {
            Some(index) => {
                guard.recipients.remove(index);
                Ok(Membership::Removed)
            }
            None => Ok(Membership::NotFound),
        }
    }

    async fn display_name(&self, device_id: &str) -> Result<Option<String>, Error> {
        Ok(self.inner.read().await.names.get(device_id).cloned())
    }

    async fn set_name(&self, device_id: &str, name: &str) -> Result<NameChange, Error> {
        let mut guard = self.inner.write().await;
        Ok(
            match guard.names.insert(device_id.to_string(), name.to_string()) {
                Some(previous) => NameChange::Renamed { previous },
                None => NameChange::Registered,
            },
        )
    }

    async fn delete_name(&self, device_id: &str) -> Result<bool, Error> {
        let mut guard = self.inner.write().await;
        Ok(guard.names.remove(device_id).is_some())
    }

    async fn names(&self) -> Result<Vec<(String, String)>, Error> {
        let guard = self.inner.read().await;
        Ok(guard
            .names
            .iter()
            .map(|(id, name)| (id.clone(), name.clone()))
            .collect())
    }

    async fn flush(&self) -> Result<(), Error> {
        // Nothing is ever pending in memory
        Ok(())
    }
}
