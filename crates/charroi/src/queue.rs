//! The offline validation queue.
//!
//! [`OfflineQueue`] is what callers hold: it owns the storage, the submitter
//! and the gates that keep concurrent `store` and `sync` calls from stepping
//! on each other. Every storage access goes through one async mutex, so each
//! read-modify-write of the queue is atomic.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::config::Config;
use crate::error::Result;
use crate::storage::{Storage, StorageStats};
use crate::submit::{HttpSubmitter, ValidationSubmitter};
use crate::sync::SyncOptions;
use crate::validation::PendingValidation;

/// Durable queue of validations waiting for connectivity.
///
/// Cheap to clone; clones share the same storage and gates.
#[derive(Clone)]
pub struct OfflineQueue {
    pub(crate) storage: Arc<Mutex<Storage>>,
    pub(crate) submitter: Arc<dyn ValidationSubmitter>,
    pub(crate) sync_gate: Arc<Mutex<()>>,
    pub(crate) options: SyncOptions,
}

impl std::fmt::Debug for OfflineQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineQueue")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl OfflineQueue {
    /// Build a queue from its parts.
    #[must_use]
    pub fn new(
        storage: Storage,
        submitter: Arc<dyn ValidationSubmitter>,
        options: SyncOptions,
    ) -> Self {
        Self {
            storage: Arc::new(Mutex::new(storage)),
            submitter,
            sync_gate: Arc::new(Mutex::new(())),
            options,
        }
    }

    /// Open the configured database and wire up the HTTP submitter.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the endpoint is
    /// not usable.
    pub fn from_config(config: &Config) -> Result<Self> {
        let storage = Storage::open(config.database_path())?;
        let submitter = HttpSubmitter::from_config(config)?;
        Ok(Self::new(
            storage,
            Arc::new(submitter),
            SyncOptions::from(&config.sync),
        ))
    }

    /// Sync behaviour of this queue.
    #[must_use]
    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Record a validation that could not be submitted right away.
    ///
    /// The payload is appended to the end of the queue; duplicates are kept.
    /// Returns the new entry id.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload could not be stored. The error is
    /// logged as well, so callers can tell the user the action was lost.
    pub async fn store(&self, payload: Value) -> Result<i64> {
        let entry = PendingValidation::new(payload);
        let result = self.storage.lock().await.insert(&entry);
        match &result {
            Ok(id) => info!(
                entry_id = id,
                fingerprint = %entry.short_fingerprint(),
                "Validation queued for later submission"
            ),
            Err(e) => error!(error = %e, "Failed to queue validation"),
        }
        result
    }

    /// Pending entries in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn pending(&self) -> Result<Vec<PendingValidation>> {
        self.storage.lock().await.pending()
    }

    /// Dead-lettered entries in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn dead_letters(&self) -> Result<Vec<PendingValidation>> {
        self.storage.lock().await.dead_letters()
    }

    /// Return a dead-lettered entry to the queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry does not exist or the database
    /// operation fails.
    pub async fn requeue(&self, id: i64) -> Result<()> {
        self.storage.lock().await.requeue(id)
    }

    /// Drop an entry without submitting it.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn remove(&self, id: i64) -> Result<bool> {
        self.storage.lock().await.remove(id)
    }

    /// Drop every entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn clear(&self) -> Result<usize> {
        self.storage.lock().await.clear()
    }

    /// Queue statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn stats(&self) -> Result<StorageStats> {
        self.storage.lock().await.stats()
    }

    /// Append the payloads of a legacy single-blob queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob is malformed or the database operation
    /// fails; nothing is imported then.
    pub async fn import_legacy_blob(&self, text: &str) -> Result<usize> {
        self.storage.lock().await.import_legacy_blob(text)
    }
}
