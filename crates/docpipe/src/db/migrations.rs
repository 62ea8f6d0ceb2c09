//! Schema versioning through `PRAGMA user_version`.
//!
//! All pending steps run inside one immediate transaction, so two consumer
//! processes opening a fresh file cannot both apply them.

use rusqlite::{Connection, TransactionBehavior};

use super::error::DatabaseError;

struct Migration {
    description: &'static str,
    sql: &'static str,
}

const CREATE_SOURCES: &str = "
CREATE TABLE IF NOT EXISTS sources (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    name TEXT,
    created_at TEXT NOT NULL
);";

const CREATE_JOBS: &str = "
CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    parent_id INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    attempt_count INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    output TEXT,
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    updated_at TEXT NOT NULL,
    version INTEGER NOT NULL DEFAULT 0,
    UNIQUE (kind, parent_id)
);
CREATE INDEX IF NOT EXISTS idx_jobs_kind_status ON jobs (kind, status);";

const ADD_PUBLISHED_AT: &str = "ALTER TABLE jobs ADD COLUMN published_at TEXT;";

/// Step `i` brings the schema to version `i + 1`.
const MIGRATIONS: &[Migration] = &[
    Migration {
        description: "create sources",
        sql: CREATE_SOURCES,
    },
    Migration {
        description: "create jobs",
        sql: CREATE_JOBS,
    },
    Migration {
        description: "track published announcements",
        sql: ADD_PUBLISHED_AT,
    },
];

pub const SCHEMA_VERSION: u32 = MIGRATIONS.len() as u32;

pub fn schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

/// Brings the schema up to [`SCHEMA_VERSION`] and returns it. A file written
/// by a newer build is refused rather than guessed at.
pub fn migrate(conn: &mut Connection) -> Result<u32, DatabaseError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let current = schema_version(&tx)?;
    if current > SCHEMA_VERSION {
        return Err(DatabaseError::Migration {
            version: current,
            reason: format!("schema is newer than this build supports (v{})", SCHEMA_VERSION),
        });
    }
    if current == SCHEMA_VERSION {
        return Ok(current);
    }

    for (version, migration) in (1..).zip(MIGRATIONS).skip(current as usize) {
        log::info!("Applying schema v{}: {}", version, migration.description);
        tx.execute_batch(migration.sql)
            .map_err(|e| DatabaseError::Migration {
                version,
                reason: e.to_string(),
            })?;
    }
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tx.commit()?;

    Ok(SCHEMA_VERSION)
}
