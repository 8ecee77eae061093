//! Replaying queued validations against the server.
//!
//! A sync reads the pending entries once and submits them one by one in
//! insertion order. The first failure stops the run; entries after it are not
//! attempted. Only one sync runs at a time: a second caller gets
//! [`Error::SyncInProgress`] instead of submitting the same entries again.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::queue::OfflineQueue;
use crate::validation::EntryState;

/// How long a sync lease is honoured before another process may take it.
const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(600);

/// When submitted entries leave the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckMode {
    /// Remove each entry right after its own successful submission.
    PerEntry,
    /// Remove nothing until every entry of the run succeeded.
    #[default]
    Batch,
}

impl std::fmt::Display for AckMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PerEntry => write!(f, "per_entry"),
            Self::Batch => write!(f, "batch"),
        }
    }
}

/// Tuning for the sync runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// When submitted entries are removed.
    pub ack_mode: AckMode,
    /// Failures after which an entry is dead-lettered; 0 never skips.
    pub max_attempts: u32,
    /// Lifetime of the cross-process sync lease.
    pub lease_ttl: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            ack_mode: AckMode::default(),
            max_attempts: 0,
            lease_ttl: DEFAULT_LEASE_TTL,
        }
    }
}

impl From<&SyncConfig> for SyncOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            ack_mode: config.ack_mode,
            max_attempts: config.max_attempts,
            lease_ttl: Duration::from_secs(config.lease_ttl_secs),
        }
    }
}

/// Outcome of a sync that did not halt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Entries accepted by the server.
    pub submitted: usize,
    /// Entries parked because they kept failing.
    pub dead_lettered: usize,
    /// Pending entries left afterwards, including any queued meanwhile.
    pub remaining: i64,
}

impl OfflineQueue {
    /// Submit every pending entry in insertion order.
    ///
    /// Stops at the first submission failure and returns
    /// [`Error::SyncHalted`]; the failing entry and everything after it stay
    /// queued, and in [`AckMode::Batch`] the entries before it do too. With
    /// `max_attempts` set, an entry that reaches that many failures is
    /// dead-lettered and the run continues past it.
    ///
    /// # Errors
    ///
    /// - [`Error::SyncInProgress`] if another sync holds the queue.
    /// - [`Error::SyncHalted`] if a submission failed.
    /// - [`Error::ConfigValidation`] if the lease TTL is out of range.
    /// - A storage error if the queue could not be read or updated; when the
    ///   initial read fails nothing is submitted.
    pub async fn sync(&self) -> Result<SyncReport> {
        let Ok(_gate) = self.sync_gate.try_lock() else {
            debug!("Sync requested while another sync is running");
            return Err(Error::SyncInProgress);
        };

        let holder = lease_holder();
        let acquired = self
            .storage
            .lock()
            .await
            .try_acquire_sync_lease(&holder, lease_ttl(self.options.lease_ttl)?)?;
        if !acquired {
            debug!("Sync lease held by another process");
            return Err(Error::SyncInProgress);
        }

        let result = self.drain().await;

        if let Err(e) = self.storage.lock().await.release_sync_lease(&holder) {
            warn!(error = %e, "Failed to release sync lease");
        }
        result
    }

    /// Run [`OfflineQueue::sync`] and report through callbacks.
    ///
    /// `on_success` runs when the whole queue was replayed, `on_failure` once
    /// when the read or a submission failed. A sync skipped because another
    /// one is running calls neither. The report is returned on success.
    pub async fn sync_with_callbacks<S, F>(
        &self,
        on_success: S,
        on_failure: F,
    ) -> Option<SyncReport>
    where
        S: FnOnce(&SyncReport),
        F: FnOnce(&Error),
    {
        match self.sync().await {
            Ok(report) => {
                on_success(&report);
                Some(report)
            }
            Err(Error::SyncInProgress) => None,
            Err(e) => {
                on_failure(&e);
                None
            }
        }
    }

    async fn drain(&self) -> Result<SyncReport> {
        let entries = self.storage.lock().await.pending().map_err(|e| {
            error!(error = %e, "Failed to read queued validations");
            e
        })?;

        let mut report = SyncReport::default();
        if entries.is_empty() {
            debug!("No queued validations to sync");
            return Ok(report);
        }

        info!(
            count = entries.len(),
            ack_mode = %self.options.ack_mode,
            "Replaying queued validations"
        );

        let mut submitted_ids = Vec::with_capacity(entries.len());
        for entry in &entries {
            let Some(id) = entry.id else {
                continue;
            };

            match self.submitter.submit(&entry.payload).await {
                Ok(()) => {
                    report.submitted += 1;
                    match self.options.ack_mode {
                        AckMode::PerEntry => {
                            self.storage.lock().await.acknowledge(id)?;
                        }
                        AckMode::Batch => submitted_ids.push(id),
                    }
                    debug!(entry_id = id, "Queued validation submitted");
                }
                Err(err) => {
                    warn!(entry_id = id, error = %err, "Queued validation failed");
                    if self.should_dead_letter(id, &err).await? {
                        report.dead_lettered += 1;
                        continue;
                    }
                    return Err(Error::SyncHalted {
                        entry_id: id,
                        submitted: report.submitted,
                        source: Box::new(err),
                    });
                }
            }
        }

        let storage = self.storage.lock().await;
        if self.options.ack_mode == AckMode::Batch {
            storage.acknowledge_all(&submitted_ids)?;
        }
        report.remaining = storage.count(EntryState::Pending)?;

        info!(
            submitted = report.submitted,
            dead_lettered = report.dead_lettered,
            remaining = report.remaining,
            "Sync complete"
        );
        Ok(report)
    }

    /// Record a failure and dead-letter the entry once it hit the cap.
    async fn should_dead_letter(&self, id: i64, err: &Error) -> Result<bool> {
        let storage = self.storage.lock().await;
        let attempts = match storage.record_failure(id, &err.to_string()) {
            Ok(attempts) => attempts,
            // Dropped by hand while we were submitting it.
            Err(Error::EntryNotFound { .. }) => return Ok(false),
            Err(e) => return Err(e),
        };

        let max = self.options.max_attempts;
        if max == 0 || attempts < max {
            return Ok(false);
        }
        storage.dead_letter(id)?;
        Ok(true)
    }
}

fn lease_holder() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or_default();
    format!("{}-{nanos}", std::process::id())
}

fn lease_ttl(ttl: Duration) -> Result<chrono::Duration> {
    chrono::Duration::from_std(ttl).map_err(|_| Error::ConfigValidation {
        message: format!("sync lease TTL of {}s is out of range", ttl.as_secs()),
    })
}
