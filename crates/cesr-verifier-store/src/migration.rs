//! Database schema migrations for SQLite.
//!
//! We use a simple versioned migration system. Each migration is a SQL string
//! that transforms the schema from version N to N+1.

use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::traits::now_millis;

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    // Create migrations table if it doesn't exist
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    // Get current version
    let current: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    // Apply migrations
    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }

        tx.commit()?;
        tracing::debug!(from = current, to = CURRENT_VERSION, "applied schema migrations");
    }

    Ok(())
}

/// Apply a specific migration version.
fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Current key state per identifier
        CREATE TABLE key_states (
            prefix TEXT PRIMARY KEY,          -- qb64 identifier prefix
            sn INTEGER NOT NULL,              -- latest accepted sequence number
            state BLOB NOT NULL,              -- CBOR KeyState
            updated_at INTEGER NOT NULL
        );

        -- Accepted key events
        CREATE TABLE key_events (
            prefix TEXT NOT NULL,
            sn INTEGER NOT NULL,
            said TEXT NOT NULL,
            record BLOB NOT NULL,             -- CBOR KeyEventRecord, raw body included
            accepted_at INTEGER NOT NULL,
            PRIMARY KEY (prefix, sn)
        );

        -- Non-transferable receipt couples per event
        CREATE TABLE receipts (
            prefix TEXT NOT NULL,
            said TEXT NOT NULL,               -- SAID of the receipted event
            witness TEXT NOT NULL,            -- qb64 receiptor prefix
            signature TEXT NOT NULL,          -- qb64 signature
            received_at INTEGER NOT NULL,
            PRIMARY KEY (prefix, said, witness)
        );

        -- Registry state
        CREATE TABLE registries (
            registry TEXT PRIMARY KEY,
            state BLOB NOT NULL,              -- CBOR RegistryState
            updated_at INTEGER NOT NULL
        );

        -- Credential issuance status
        CREATE TABLE credential_status (
            credential TEXT PRIMARY KEY,
            status BLOB NOT NULL,             -- CBOR CredentialStatus
            updated_at INTEGER NOT NULL
        );

        -- Accepted registry and status events
        CREATE TABLE tel_events (
            id TEXT NOT NULL,                 -- registry id or credential SAID
            sn INTEGER NOT NULL,
            said TEXT NOT NULL,
            record BLOB NOT NULL,             -- CBOR TelEventRecord
            accepted_at INTEGER NOT NULL,
            PRIMARY KEY (id, sn)
        );

        -- Verified credentials
        CREATE TABLE credentials (
            said TEXT PRIMARY KEY,
            issuer TEXT NOT NULL,
            schema TEXT NOT NULL,
            record BLOB NOT NULL,             -- CBOR VerifiedCredential
            saved_at INTEGER NOT NULL
        );

        -- Last presentation time per credential
        CREATE TABLE presentations (
            said TEXT PRIMARY KEY,
            presented_at TEXT NOT NULL        -- ISO-8601 datetime
        );

        -- Groups waiting on a missing dependency
        CREATE TABLE escrows (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            dependency TEXT NOT NULL,         -- e.g. "kel:<prefix>"
            entry_id TEXT NOT NULL,           -- Blake3 of raw, hex
            raw BLOB NOT NULL,
            escrowed_at INTEGER NOT NULL,
            UNIQUE(dependency, entry_id)
        );

        -- Indexes for common queries
        CREATE INDEX idx_key_events_said ON key_events(said);
        CREATE INDEX idx_credentials_issuer ON credentials(issuer);
        CREATE INDEX idx_escrows_dependency ON escrows(dependency);
        CREATE INDEX idx_escrows_time ON escrows(escrowed_at);
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_creates_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        // Verify tables exist
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for table in [
            "key_states",
            "key_events",
            "receipts",
            "registries",
            "credential_status",
            "tel_events",
            "credentials",
            "presentations",
            "escrows",
            "schema_migrations",
        ] {
            assert!(tables.contains(&table.to_string()), "missing table {table}");
        }
    }

    #[test]
    fn test_migration_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap(); // Should not error
        migrate(&mut conn).unwrap(); // Still should not error

        // Verify version is 1
        let version: u32 = conn
            .query_row(
                "SELECT MAX(version) FROM schema_migrations",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(version, 1);
    }
}
