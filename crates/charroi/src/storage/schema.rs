//! `SQLite` schema definitions for charroi.
//!
//! This module contains the SQL statements for creating and managing
//! the database schema.

/// SQL statement to create the queue table.
///
/// `id` is `AUTOINCREMENT` so ids are never reused and always follow
/// insertion order, even after the newest rows were acknowledged.
pub const CREATE_PENDING_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS pending_validations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    payload TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    queued_at TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    last_attempt_at TEXT,
    state TEXT NOT NULL DEFAULT 'pending'
)
";

/// SQL statement to create an index on state for draining the queue.
pub const CREATE_STATE_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_pending_state ON pending_validations(state, id)
";

/// SQL statement to create an index on `fingerprint` for duplicate reports.
pub const CREATE_FINGERPRINT_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_pending_fingerprint ON pending_validations(fingerprint)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_PENDING_TABLE,
    CREATE_STATE_INDEX,
    CREATE_FINGERPRINT_INDEX,
    CREATE_METADATA_TABLE,
];

/// Columns selected whenever a full entry is read.
pub const ENTRY_COLUMNS: &str =
    "id, payload, fingerprint, queued_at, attempts, last_error, last_attempt_at, state";
