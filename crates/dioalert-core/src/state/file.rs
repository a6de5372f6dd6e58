// # File Registry Store
//
// File-based implementation of RegistryStore with crash recovery.
//
// ## Purpose
//
// Keeps the recipient set and the device name registry across daemon
// restarts. Each registry is its own JSON document and is fully rewritten on
// every mutation.
//
// ## Crash Recovery
//
// - Atomic writes: Uses write-then-rename for atomicity
// - Corruption detection: Validates JSON on load
// - Automatic backup: Keeps .backup of last known good document
// - Recovery: Falls back to backup if corruption detected
//
// ## File Formats
//
// Recipients (short-form numbers, country code and domain stripped):
//
// ```json
// ["1156511894", "1155512345"]
// ```
//
// Device names:
//
// ```json
// {
//   "860599001234567": "North Branch"
// }
// ```

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::Error;
use crate::address::AddressFormat;
use crate::config::RegistryConfig;
use crate::traits::registry_store::{
    Membership, NameChange, RegistryStore, RegistryStoreFactory,
};

/// What was found on disk for one document
#[derive(Debug)]
enum LoadOutcome<T> {
    /// Parsed (possibly recovered from backup)
    Loaded(T),
    /// No document on disk
    Missing,
    /// Document and backup are both unusable
    Unreadable,
}

/// One JSON document with atomic replace and backup
#[derive(Debug, Clone)]
struct JsonDocument {
    path: PathBuf,
}

impl JsonDocument {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Load the document, recovering from the backup when it is corrupted
    async fn load_with_recovery<T: DeserializeOwned>(&self) -> Result<LoadOutcome<T>, Error> {
        match Self::load(&self.path).await? {
            LoadOutcome::Unreadable => {
                tracing::warn!(
                    "Registry file {} appears corrupted. Attempting recovery from backup.",
                    self.path.display()
                );

                let backup_path = self.backup_path();
                match Self::load(&backup_path).await? {
                    LoadOutcome::Loaded(value) => {
                        tracing::info!("Recovered {} from backup", self.path.display());

                        if let Err(e) = fs::copy(&backup_path, &self.path).await {
                            tracing::error!(
                                "Failed to restore {} from backup: {}",
                                self.path.display(),
                                e
                            );
                        }

                        Ok(LoadOutcome::Loaded(value))
                    }
                    _ => {
                        tracing::error!(
                            "No usable backup for {}. Falling back to defaults.",
                            self.path.display()
                        );
                        Ok(LoadOutcome::Unreadable)
                    }
                }
            }
            outcome => Ok(outcome),
        }
    }

    /// Load one file without recovery
    async fn load<T: DeserializeOwned>(path: &Path) -> Result<LoadOutcome<T>, Error> {
        if !path.exists() {
            tracing::debug!("Registry file does not exist: {}", path.display());
            return Ok(LoadOutcome::Missing);
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::registry(format!("Failed to read {}: {}", path.display(), e))
        })?;

        match serde_json::from_str(&content) {
            Ok(value) => Ok(LoadOutcome::Loaded(value)),
            Err(e) => {
                tracing::warn!("Failed to parse {}: {}", path.display(), e);
                Ok(LoadOutcome::Unreadable)
            }
        }
    }

    /// Write the document atomically
    async fn write<T: Serialize>(&self, value: &T) -> Result<(), Error> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| Error::registry(format!("Failed to serialize registry: {}", e)))?;

        // Write to temporary file first
        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::registry(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.write_all(json.as_bytes()).await.map_err(|e| {
                Error::registry(format!(
                    "Failed to write to temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.flush().await.map_err(|e| {
                Error::registry(format!(
                    "Failed to flush temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        // Keep the last good document as backup
        if self.path.exists() {
            if let Err(e) = fs::copy(&self.path, self.backup_path()).await {
                tracing::warn!("Failed to create backup of {}: {}", self.path.display(), e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::registry(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!("Registry written to file: {}", self.path.display());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(&self) -> PathBuf {
        let mut backup = self.path.clone();
        backup.set_extension("backup");
        backup
    }
}

/// File-based registry store with crash recovery
///
/// Each registry has its own lock; a mutation holds the lock until the
/// document is on disk, so writes of one registry never interleave.
///
/// # Example
///
/// ```rust,no_run
/// use dioalert_core::address::AddressFormat;
/// use dioalert_core::state::FileRegistryStore;
/// use dioalert_core::traits::RegistryStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let addresses = AddressFormat::new("549", "s.whatsapp.net");
///     let store = FileRegistryStore::open(
///         "/var/lib/dioalert/recipients.json",
///         "/var/lib/dioalert/names.json",
///         addresses.clone(),
///         &addresses.normalize("1156511894"),
///     )
///     .await?;
///
///     store.add_recipient(&addresses.normalize("1155512345")).await?;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileRegistryStore {
    recipients_doc: JsonDocument,
    names_doc: JsonDocument,
    addresses: AddressFormat,
    recipients: Arc<RwLock<Vec<String>>>,
    names: Arc<RwLock<BTreeMap<String, String>>>,
}

impl FileRegistryStore {
    /// Open (or create) the two registry documents
    ///
    /// - A missing or unrecoverable recipient document starts as
    ///   `{operator_address}` and is written immediately
    /// - A missing or unrecoverable names document starts empty and is not
    ///   written
    pub async fn open(
        recipients_path: impl AsRef<Path>,
        names_path: impl AsRef<Path>,
        addresses: AddressFormat,
        operator_address: &str,
    ) -> Result<Self, Error> {
        let recipients_doc = JsonDocument::new(recipients_path.as_ref().to_path_buf());
        let names_doc = JsonDocument::new(names_path.as_ref().to_path_buf());

        for path in [&recipients_doc.path, &names_doc.path] {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    fs::create_dir_all(parent).await.map_err(|e| {
                        Error::config(format!(
                            "Failed to create registry directory {}: {}",
                            parent.display(),
                            e
                        ))
                    })?;
                }
            }
        }

        let loaded = Self::load_state(&recipients_doc, &names_doc, &addresses).await?;
        let seed_recipients = loaded.recipients.is_none();

        let recipients = loaded
            .recipients
            .unwrap_or_else(|| vec![operator_address.to_string()]);

        let store = Self {
            recipients_doc,
            names_doc,
            addresses,
            recipients: Arc::new(RwLock::new(recipients)),
            names: Arc::new(RwLock::new(loaded.names)),
        };

        if seed_recipients {
            tracing::info!("Recipient list initialized with operator {}", operator_address);
            let guard = store.recipients.read().await;
            store.write_recipients(&guard).await?;
        }

        Ok(store)
    }

    async fn load_state(
        recipients_doc: &JsonDocument,
        names_doc: &JsonDocument,
        addresses: &AddressFormat,
    ) -> Result<LoadedState, Error> {
        let recipients = match recipients_doc.load_with_recovery::<Vec<String>>().await? {
            LoadOutcome::Loaded(numbers) => {
                let mut list: Vec<String> = Vec::with_capacity(numbers.len());
                for number in numbers {
                    let address = addresses.normalize(&number);
                    if !list.contains(&address) {
                        list.push(address);
                    }
                }
                tracing::info!("{} recipient(s) loaded", list.len());
                Some(list)
            }
            LoadOutcome::Missing | LoadOutcome::Unreadable => None,
        };

        let names = match names_doc
            .load_with_recovery::<BTreeMap<String, String>>()
            .await?
        {
            LoadOutcome::Loaded(names) => {
                tracing::info!("{} device name(s) loaded", names.len());
                names
            }
            LoadOutcome::Missing | LoadOutcome::Unreadable => BTreeMap::new(),
        };

        Ok(LoadedState { recipients, names })
    }

    async fn write_recipients(&self, recipients: &[String]) -> Result<(), Error> {
        let short: Vec<&str> = recipients
            .iter()
            .map(|address| self.addresses.short_form(address))
            .collect();
        self.recipients_doc.write(&short).await?;
        tracing::info!("Recipients saved: {}", short.join(", "));
        Ok(())
    }

    async fn write_names(&self, names: &BTreeMap<String, String>) -> Result<(), Error> {
        self.names_doc.write(names).await?;
        tracing::info!("Device names saved ({} entries)", names.len());
        Ok(())
    }
}

struct LoadedState {
    recipients: Option<Vec<String>>,
    names: BTreeMap<String, String>,
}

#[async_trait]
impl RegistryStore for FileRegistryStore {
    async fn recipients(&self) -> Result<Vec<String>, Error> {
        Ok(self.recipients.read().await.clone())
    }

    async fn add_recipient(&self, address: &str) -> Result<Membership, Error> {
        let mut guard = self.recipients.write().await;
        if guard.iter().any(|a| a == address) {
            return Ok(Membership::AlreadyPresent);
        }

        guard.push(address.to_string());

        // Immediate write for durability
        self.write_recipients(&guard).await?;
        Ok(Membership::Added)
    }

    async fn remove_recipient(&self, address: &str) -> Result<Membership, Error> {
        let mut guard = self.recipients.write().await;
        let Some(index) = guard.iter().position(|a| a == address) else {
            return Ok(Membership::NotFound);
        };

        guard.remove(index);

        // Immediate write for durability
        self.write_recipients(&guard).await?;
        Ok(Membership::Removed)
    }

    async fn display_name(&self, device_id: &str) -> Result<Option<String>, Error> {
        Ok(self.names.read().await.get(device_id).cloned())
    }

    async fn set_name(&self, device_id: &str, name: &str) -> Result<NameChange, Error> {
        let mut guard = self.names.write().await;
        let change = match guard.insert(device_id.to_string(), name.to_string()) {
            Some(previous) => NameChange::Renamed { previous },
            None => NameChange::Registered,
        };

        // Immediate write for durability
        self.write_names(&guard).await?;
        Ok(change)
    }

    async fn delete_name(&self, device_id: &str) -> Result<bool, Error> {
        let mut guard = self.names.write().await;
        if guard.remove(device_id).is_none() {
            return Ok(false);
        }

        // Immediate write for durability
        self.write_names(&guard).await?;
        Ok(true)
    }

    async fn names(&self) -> Result<Vec<(String, String)>, Error> {
        let guard = self.names.read().await;
        Ok(guard
            .iter()
            .map(|(id, name)| (id.clone(), name.clone()))
            .collect())
    }

    async fn flush(&self) -> Result<(), Error> {
        // Every mutation is already on disk
        Ok(())
    }
}

/// Factory for file-backed and memory registry stores
#[derive(Debug, Default)]
pub struct FileRegistryStoreFactory;

#[async_trait]
impl RegistryStoreFactory for FileRegistryStoreFactory {
    async fn create(
        &self,
        config: &RegistryConfig,
        addresses: &AddressFormat,
        operator_address: &str,
    ) -> Result<Box<dyn RegistryStore>, Error> {
        match config {
            RegistryConfig::File {
                recipients_path,
                names_path,
            } => {
                let store = FileRegistryStore::open(
                    recipients_path,
                    names_path,
                    addresses.clone(),
                    operator_address,
                )
                .await?;
                Ok(Box::new(store))
            }
            RegistryConfig::Memory => Ok(Box::new(
                super::MemoryRegistryStore::with_operator(operator_address),
            )),
        }
    }
}
