//! Job repository — row-level operations on the `jobs` and `sources` tables.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};
use crate::job::{JobKind, JobOutput, JobRecord};
use crate::repository::Source;

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: i64,
    pub kind: String,
    pub parent_id: i64,
    pub status: String,
    pub attempt_count: u32,
    pub error_message: Option<String>,
    pub output: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub updated_at: String,
    pub published_at: Option<String>,
    pub version: i64,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            kind: row.get("kind")?,
            parent_id: row.get("parent_id")?,
            status: row.get("status")?,
            attempt_count: row.get("attempt_count")?,
            error_message: row.get("error_message")?,
            output: row.get("output")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            updated_at: row.get("updated_at")?,
            published_at: row.get("published_at")?,
            version: row.get("version")?,
        })
    }

    pub fn from_record(record: &JobRecord) -> Result<Self, serde_json::Error> {
        let output = record.output.as_ref().map(serde_json::to_string).transpose()?;
        Ok(Self {
            id: record.id,
            kind: record.kind.as_str().to_string(),
            parent_id: record.parent_id,
            status: record.status.as_str().to_string(),
            attempt_count: record.attempt_count,
            error_message: record.error_message.clone(),
            output,
            created_at: format_ts(record.created_at),
            started_at: record.started_at.map(format_ts),
            completed_at: record.completed_at.map(format_ts),
            updated_at: format_ts(record.updated_at),
            published_at: record.published_at.map(format_ts),
            version: record.version,
        })
    }

    /// Parses the stored strings back into a typed record.
    pub fn into_record(self) -> Result<JobRecord, String> {
        let output = match self.output {
            Some(json) => Some(
                serde_json::from_str::<JobOutput>(&json)
                    .map_err(|e| format!("invalid output: {}", e))?,
            ),
            None => None,
        };

        Ok(JobRecord {
            id: self.id,
            kind: self.kind.parse()?,
            parent_id: self.parent_id,
            status: self.status.parse()?,
            attempt_count: self.attempt_count,
            error_message: self.error_message,
            output,
            created_at: parse_ts(&self.created_at)?,
            started_at: self.started_at.as_deref().map(parse_ts).transpose()?,
            completed_at: self.completed_at.as_deref().map(parse_ts).transpose()?,
            updated_at: parse_ts(&self.updated_at)?,
            published_at: self.published_at.as_deref().map(parse_ts).transpose()?,
            version: self.version,
        })
    }
}

pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid timestamp '{}': {}", value, e))
}

/// Outcome of a compare-and-write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    /// The row exists but its version moved on.
    Stale,
    Missing,
}

/// Inserts a source row and returns it with its assigned id.
pub fn insert_source(db: &Database, url: &str, name: Option<&str>) -> Result<Source, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO sources (url, name, created_at) VALUES (?1, ?2, ?3)",
            params![url, name, format_ts(Utc::now())],
        )?;
        Ok(Source {
            id: conn.last_insert_rowid(),
            url: url.to_string(),
            name: name.map(str::to_string),
        })
    })
}

pub fn find_source(db: &Database, id: i64) -> Result<Option<Source>, DatabaseError> {
    db.with_conn(|conn| {
        let source = conn
            .query_row(
                "SELECT id, url, name FROM sources WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Source {
                        id: row.get(0)?,
                        url: row.get(1)?,
                        name: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(source)
    })
}

/// Inserts a pending job for `(kind, parent_id)` unless one exists, then
/// returns the row.
pub fn insert_or_get(db: &Database, kind: JobKind, parent_id: i64) -> Result<JobRow, DatabaseError> {
    db.write(|conn| {
        let now = format_ts(Utc::now());
        conn.execute(
            "INSERT OR IGNORE INTO jobs (kind, parent_id, status, attempt_count, created_at, updated_at, version)
             VALUES (?1, ?2, 'pending', 0, ?3, ?3, 0)",
            params![kind.as_str(), parent_id, now],
        )?;
        let row = conn.query_row(
            "SELECT * FROM jobs WHERE kind = ?1 AND parent_id = ?2",
            params![kind.as_str(), parent_id],
            JobRow::from_row,
        )?;
        Ok(row)
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: i64) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Writes every mutable column if the stored version equals `job.version`,
/// bumping it to `job.version + 1`. `id`, `kind`, `parent_id` and
/// `created_at` are never rewritten.
pub fn compare_and_update(db: &Database, job: &JobRow) -> Result<UpdateOutcome, DatabaseError> {
    db.write(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status=?3, attempt_count=?4, error_message=?5, output=?6,
             started_at=?7, completed_at=?8, updated_at=?9, published_at=?10, version=?2 + 1
             WHERE id=?1 AND version=?2",
            params![
                job.id,
                job.version,
                job.status,
                job.attempt_count,
                job.error_message,
                job.output,
                job.started_at,
                job.completed_at,
                job.updated_at,
                job.published_at,
            ],
        )?;
        if changed == 1 {
            return Ok(UpdateOutcome::Updated);
        }

        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM jobs WHERE id = ?1)",
            params![job.id],
            |r| r.get(0),
        )?;
        Ok(if exists {
            UpdateOutcome::Stale
        } else {
            UpdateOutcome::Missing
        })
    })
}

/// Completed jobs of `kind` without a published announcement, oldest first.
pub fn list_unpublished(db: &Database, kind: JobKind, limit: u64) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM jobs WHERE kind = ?1 AND status = 'completed' AND published_at IS NULL
             ORDER BY completed_at ASC, id ASC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![kind.as_str(), limit as i64], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Counts jobs with the given status.
pub fn count_by_status(db: &Database, status: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE status = ?1",
            params![status],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
