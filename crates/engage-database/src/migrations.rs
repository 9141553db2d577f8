//! Database migrations.
//!
//! Migrations are run in order and tracked in the `migrations` table.

use crate::DatabaseResult;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 3;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> DatabaseResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    debug!(current_version, target_version = CURRENT_VERSION, "Running migrations");

    if current_version < 1 {
        migrate_v1_request_queue(conn)?;
    }
    if current_version < 2 {
        migrate_v2_displayed_campaign(conn)?;
    }
    if current_version < 3 {
        migrate_v3_key_value_store(conn)?;
    }

    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> DatabaseResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: Outbound request queue.
///
/// `seq` gives the FIFO order, `request_id` is the caller-visible id.
fn migrate_v1_request_queue(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v1: request queue");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS request (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            request_id TEXT NOT NULL UNIQUE,
            method TEXT NOT NULL,
            url TEXT NOT NULL,
            headers TEXT NOT NULL DEFAULT '{}',
            body TEXT,
            created_at INTEGER NOT NULL,
            ttl_ms INTEGER
        );
        ",
    )?;

    record_migration(conn, 1, "request_queue")
}

/// V2: Displayed in-app campaign log.
fn migrate_v2_displayed_campaign(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v2: displayed campaign");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS displayed_campaign (
            campaign_id TEXT NOT NULL,
            timestamp INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_displayed_campaign_campaign_id
            ON displayed_campaign(campaign_id);
        ",
    )?;

    record_migration(conn, 2, "displayed_campaign")
}

/// V3: Key-value store for identity and app-login state.
fn migrate_v3_key_value_store(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v3: key value store");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS key_value_store (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        ",
    )?;

    record_migration(conn, 3, "key_value_store")
}
