//! Storage layer for charroi.
//!
//! This module provides `SQLite`-based persistent storage for the offline
//! validation queue. Every entry is its own row, so entries can be
//! acknowledged one at a time and nothing is cached in memory.

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, types::Type, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::validation::{EntryState, PendingValidation};

use schema::ENTRY_COLUMNS;

/// Storage engine for the pending-validation queue.
///
/// Provides persistent storage using `SQLite` with support for:
/// - Appending payloads in arrival order
/// - Per-entry acknowledgement after submission
/// - Failure bookkeeping and dead-lettering
/// - Importing the legacy single-blob queue format
#[derive(Debug)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
}

impl Storage {
    /// Open or create a storage database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    /// Initializes the schema if this is a new database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening queue database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        // A queued validation must survive a crash right after `store` returns.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")?;

        migrations::initialize_schema(&conn)?;

        info!("Queue database opened at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Create an in-memory storage instance for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw connection, for tests that need to damage the database.
    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Append a payload to the end of the queue.
    ///
    /// No uniqueness check is made: the same payload queued twice is
    /// submitted twice. Returns the new entry id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn enqueue(&self, payload: &Value) -> Result<i64> {
        self.insert(&PendingValidation::new(payload.clone()))
    }

    /// Insert a prepared entry, ignoring any id it carries.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn insert(&self, entry: &PendingValidation) -> Result<i64> {
        let payload = serde_json::to_string(&entry.payload)?;

        self.conn.execute(
            r"
            INSERT INTO pending_validations
                (payload, fingerprint, queued_at, attempts, last_error, last_attempt_at, state)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
            params![
                payload,
                entry.fingerprint,
                entry.queued_at.to_rfc3339(),
                entry.attempts,
                entry.last_error,
                entry.last_attempt_at.map(|at| at.to_rfc3339()),
                entry.state.as_str(),
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        debug!(entry_id = id, fingerprint = %entry.short_fingerprint(), "Queued validation");
        Ok(id)
    }

    /// Get an entry by its id, whatever its state.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get(&self, id: i64) -> Result<Option<PendingValidation>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM pending_validations WHERE id = ?1");
        let entry = self
            .conn
            .query_row(&sql, [id], Self::row_to_entry)
            .optional()?;
        Ok(entry)
    }

    /// Pending entries in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn pending(&self) -> Result<Vec<PendingValidation>> {
        self.list_by_state(EntryState::Pending)
    }

    /// Dead-lettered entries in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn dead_letters(&self) -> Result<Vec<PendingValidation>> {
        self.list_by_state(EntryState::Dead)
    }

    fn list_by_state(&self, state: EntryState) -> Result<Vec<PendingValidation>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM pending_validations WHERE state = ?1 ORDER BY id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let entries = stmt
            .query_map([state.as_str()], Self::row_to_entry)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Remove an entry after its successful submission.
    ///
    /// Returns `false` if the entry was already gone.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn acknowledge(&self, id: i64) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM pending_validations WHERE id = ?1", [id])?;
        Ok(affected > 0)
    }

    /// Remove exactly the given entries in one transaction.
    ///
    /// Entries queued after `ids` was read are left alone. Returns the number
    /// of rows removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails; nothing is removed then.
    pub fn acknowledge_all(&self, ids: &[i64]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM pending_validations WHERE id = ?1")?;
            for id in ids {
                removed += stmt.execute([id])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    /// Record a failed submission and return the new attempt count.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EntryNotFound`] if the entry does not exist, or an
    /// error if the database operation fails.
    pub fn record_failure(&self, id: i64, error: &str) -> Result<u32> {
        let affected = self.conn.execute(
            r"
            UPDATE pending_validations
            SET attempts = attempts + 1, last_error = ?2, last_attempt_at = ?3
            WHERE id = ?1
            ",
            params![id, error, Utc::now().to_rfc3339()],
        )?;
        if affected == 0 {
            return Err(Error::EntryNotFound { id });
        }

        let attempts: u32 = self.conn.query_row(
            "SELECT attempts FROM pending_validations WHERE id = ?1",
            [id],
            |row| row.get(0),
        )?;
        Ok(attempts)
    }

    /// Park an entry so syncs skip it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EntryNotFound`] if the entry does not exist, or an
    /// error if the database operation fails.
    pub fn dead_letter(&self, id: i64) -> Result<()> {
        self.set_state(id, EntryState::Dead)?;
        warn!(entry_id = id, "Validation moved to dead letters");
        Ok(())
    }

    /// Return a dead-lettered entry to the queue with a fresh attempt count.
    ///
    /// The entry keeps its id, so it is replayed at its original position.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EntryNotFound`] if the entry does not exist, or an
    /// error if the database operation fails.
    pub fn requeue(&self, id: i64) -> Result<()> {
        let affected = self.conn.execute(
            r"
            UPDATE pending_validations
            SET state = ?2, attempts = 0, last_error = NULL, last_attempt_at = NULL
            WHERE id = ?1
            ",
            params![id, EntryState::Pending.as_str()],
        )?;
        if affected == 0 {
            return Err(Error::EntryNotFound { id });
        }
        info!(entry_id = id, "Validation requeued");
        Ok(())
    }

    fn set_state(&self, id: i64, state: EntryState) -> Result<()> {
        let affected = self.conn.execute(
            "UPDATE pending_validations SET state = ?2 WHERE id = ?1",
            params![id, state.as_str()],
        )?;
        if affected == 0 {
            return Err(Error::EntryNotFound { id });
        }
        Ok(())
    }

    /// Delete an entry without submitting it.
    ///
    /// Returns `true` if an entry was deleted, `false` if not found.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn remove(&self, id: i64) -> Result<bool> {
        let removed = self.acknowledge(id)?;
        if removed {
            info!(entry_id = id, "Validation removed without submission");
        }
        Ok(removed)
    }

    /// Delete every entry, pending and dead.
    ///
    /// Returns the number of entries deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn clear(&self) -> Result<usize> {
        let affected = self.conn.execute("DELETE FROM pending_validations", [])?;
        if affected > 0 {
            info!("Cleared {} queued validations", affected);
        }
        Ok(affected)
    }

    /// Count entries in the given state.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count(&self, state: EntryState) -> Result<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM pending_validations WHERE state = ?1",
            [state.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Import a queue saved in the legacy format.
    ///
    /// The legacy format is one JSON array of payloads stored under a single
    /// key. Empty text and `null` import nothing; each array element is
    /// appended in order inside one transaction. Returns the number of
    /// payloads imported.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not JSON, is not an array, or the
    /// database operation fails; nothing is imported then.
    pub fn import_legacy_blob(&self, text: &str) -> Result<usize> {
        if text.trim().is_empty() {
            return Ok(0);
        }

        let payloads = match serde_json::from_str::<Value>(text)? {
            Value::Null => return Ok(0),
            Value::Array(items) => items,
            other => {
                return Err(Error::LegacyFormat {
                    found: json_type_name(&other),
                })
            }
        };

        let tx = self.conn.unchecked_transaction()?;
        for payload in &payloads {
            self.enqueue(payload)?;
        }
        tx.commit()?;

        info!("Imported {} validations from legacy queue", payloads.len());
        Ok(payloads.len())
    }

    /// Try to take the sync lease shared by every process using this database.
    ///
    /// The lease is a single metadata row holding an expiry time and the
    /// holder name. It is granted when absent or expired and the grant is a
    /// single statement, so two processes cannot both win. Returns `true` if
    /// `holder` now owns the lease.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigValidation`] if `ttl` pushes the expiry past
    /// the representable range, or an error if the database operation fails.
    pub fn try_acquire_sync_lease(&self, holder: &str, ttl: Duration) -> Result<bool> {
        let now = Utc::now();
        let expires = now
            .checked_add_signed(ttl)
            .ok_or_else(|| Error::ConfigValidation {
                message: format!("sync lease TTL of {}s is out of range", ttl.num_seconds()),
            })?;
        let value = format!("{}|{holder}", lease_timestamp(expires));
        let affected = self.conn.execute(
            r"
            INSERT INTO metadata (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            WHERE substr(metadata.value, 1, instr(metadata.value, '|') - 1) < ?3
            ",
            params![SYNC_LEASE_KEY, value, lease_timestamp(now)],
        )?;
        Ok(affected > 0)
    }

    /// Give the sync lease back if `holder` still owns it.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn release_sync_lease(&self, holder: &str) -> Result<()> {
        self.conn.execute(
            r"
            DELETE FROM metadata
            WHERE key = ?1 AND substr(value, instr(value, '|') + 1) = ?2
            ",
            params![SYNC_LEASE_KEY, holder],
        )?;
        Ok(())
    }

    /// Get queue statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StorageStats> {
        let pending = self.count(EntryState::Pending)?;
        let dead = self.count(EntryState::Dead)?;

        let duplicate_entries: i64 = self.conn.query_row(
            r"
            SELECT COALESCE(SUM(n - 1), 0) FROM (
                SELECT COUNT(*) AS n FROM pending_validations
                GROUP BY fingerprint HAVING COUNT(*) > 1
            )
            ",
            [],
            |row| row.get(0),
        )?;

        let (oldest, newest): (Option<String>, Option<String>) = self.conn.query_row(
            "SELECT MIN(queued_at), MAX(queued_at) FROM pending_validations WHERE state = ?1",
            [EntryState::Pending.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            pending,
            dead,
            duplicate_entries,
            oldest_pending: oldest.as_deref().and_then(parse_timestamp),
            newest_pending: newest.as_deref().and_then(parse_timestamp),
            db_size_bytes,
        })
    }

    fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<PendingValidation> {
        let id: i64 = row.get(0)?;
        let payload_text: String = row.get(1)?;
        let fingerprint: String = row.get(2)?;
        let queued_at_text: String = row.get(3)?;
        let attempts: u32 = row.get(4)?;
        let last_error: Option<String> = row.get(5)?;
        let last_attempt_text: Option<String> = row.get(6)?;
        let state_text: String = row.get(7)?;

        let payload = serde_json::from_str(&payload_text)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;

        let queued_at = parse_timestamp(&queued_at_text).unwrap_or_else(|| {
            warn!(entry_id = id, "Unparseable queued_at: {}", queued_at_text);
            Utc::now()
        });

        let state = match state_text.as_str() {
            "pending" => EntryState::Pending,
            "dead" => EntryState::Dead,
            _ => {
                warn!(
                    entry_id = id,
                    "Unknown entry state: {}, treating as pending", state_text
                );
                EntryState::Pending
            }
        };

        Ok(PendingValidation {
            id: Some(id),
            payload,
            fingerprint,
            queued_at,
            attempts,
            last_error,
            last_attempt_at: last_attempt_text.as_deref().and_then(parse_timestamp),
            state,
        })
    }
}

/// Metadata key of the cross-process sync lease.
const SYNC_LEASE_KEY: &str = "sync_lease";

/// Fixed-width UTC timestamp, so lease expiries compare as text.
fn lease_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Statistics about the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    /// Entries waiting to be submitted.
    pub pending: i64,
    /// Dead-lettered entries.
    pub dead: i64,
    /// Entries whose payload repeats an earlier entry's payload.
    pub duplicate_entries: i64,
    /// Enqueue time of the oldest pending entry.
    pub oldest_pending: Option<DateTime<Utc>>,
    /// Enqueue time of the newest pending entry.
    pub newest_pending: Option<DateTime<Utc>>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}
