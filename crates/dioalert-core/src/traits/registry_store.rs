// # Registry Store Trait
//
// Defines the interface for the two durable registries:
// - the recipient set (full gateway addresses that receive alerts)
// - the device name registry (device id → display name)
//
// ## Write-through
//
// Every mutation updates memory and rewrites the durable form before it
// returns. A failed write is returned to the caller; memory and disk may
// then disagree until the next successful write.
//
// ## Implementations
//
// - File-based: two JSON documents (`state::FileRegistryStore`)
// - In-memory: `state::MemoryRegistryStore`
//
// ## Usage
//
// ```rust,ignore
// use dioalert_core::RegistryStore;
// use dioalert_core::traits::Membership;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let store = /* RegistryStore implementation */;
//
//     match store.add_recipient("5491155512345@s.whatsapp.net").await? {
//         Membership::Added => println!("added"),
//         _ => println!("already there"),
//     }
//
//     store.set_name("860599001234567", "North Branch").await?;
//     Ok(())
// }
// ```

use async_trait::async_trait;

/// Outcome of a recipient set mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    /// The address was inserted
    Added,
    /// The address was already in the set (no write performed)
    AlreadyPresent,
    /// The address was removed
    Removed,
    /// The address was not in the set (no write performed)
    NotFound,
}

/// Outcome of a device name assignment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameChange {
    /// The device had no name before
    Registered,
    /// The device had a different name before
    Renamed { previous: String },
}

/// Trait for registry store implementations
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks. Each
/// check-and-mutate (e.g. "add unless present") must be atomic, so two
/// concurrent `add_recipient` calls for one address yield exactly one
/// [`Membership::Added`].
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Snapshot of the recipient set, in insertion order
    async fn recipients(&self) -> Result<Vec<String>, crate::Error>;

    /// Add a full address to the recipient set
    ///
    /// # Returns
    ///
    /// - `Ok(Membership::Added)`: Inserted and persisted
    /// - `Ok(Membership::AlreadyPresent)`: No change
    /// - `Err(Error)`: Storage error
    async fn add_recipient(&self, address: &str) -> Result<Membership, crate::Error>;

    /// Remove a full address from the recipient set
    ///
    /// # Returns
    ///
    /// - `Ok(Membership::Removed)`: Removed and persisted
    /// - `Ok(Membership::NotFound)`: No change
    /// - `Err(Error)`: Storage error
    async fn remove_recipient(&self, address: &str) -> Result<Membership, crate::Error>;

    /// Stored display name of a device, if any
    async fn display_name(&self, device_id: &str) -> Result<Option<String>, crate::Error>;

    /// Assign a display name to a device
    async fn set_name(&self, device_id: &str, name: &str) -> Result<NameChange, crate::Error>;

    /// Remove the display name of a device
    ///
    /// Returns `Ok(false)` when the device had no name.
    async fn delete_name(&self, device_id: &str) -> Result<bool, crate::Error>;

    /// All `(device_id, name)` pairs, ordered by device id
    async fn names(&self) -> Result<Vec<(String, String)>, crate::Error>;

    /// Persist any pending changes
    ///
    /// Write-through stores have nothing pending; this exists so shutdown
    /// can be explicit about durability.
    async fn flush(&self) -> Result<(), crate::Error>;
}

/// Helper trait for constructing registry stores from configuration
#[async_trait]
pub trait RegistryStoreFactory: Send + Sync {
    /// Create a RegistryStore instance
    ///
    /// # Parameters
    ///
    /// - `config`: Registry configuration
    /// - `addresses`: Address format used for the durable short form
    /// - `operator_address`: Full address seeded into a fresh recipient set
    async fn create(
        &self,
        config: &crate::config::RegistryConfig,
        addresses: &crate::address::AddressFormat,
        operator_address: &str,
    ) -> Result<Box<dyn RegistryStore>, crate::Error>;
}
