//! SQLite store backend: WAL-mode database holding the persistent queue.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row, params};

use crate::core::errors::{DqhError, Result};
use crate::store::EntityStore;
use crate::store::entity::{EntityId, EntityPatch, EntityStatus, QueueEntity};

/// Persistent store with WAL mode and prepared statements.
///
/// The connection is behind a mutex: the queue sees a handful of writes per
/// file lifecycle, nowhere near enough to justify a pool.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteStore {
    /// Open (or create) the database at `path`, applying schema and PRAGMAs.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| DqhError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        apply_pragmas(&conn)?;
        apply_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    /// In-memory database, used by tests that still want SQL semantics.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    /// Path to the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS queue_entities (
            id          INTEGER PRIMARY KEY,
            path        TEXT NOT NULL,
            file_name   TEXT NOT NULL,
            extension   TEXT NOT NULL,
            size_bytes  INTEGER NOT NULL,
            file_key    INTEGER NOT NULL,
            detected_at TEXT NOT NULL,
            deadline    TEXT,
            status      TEXT NOT NULL,
            retry_count INTEGER NOT NULL DEFAULT 0,
            error       TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_queue_status ON queue_entities(status);
        CREATE INDEX IF NOT EXISTS idx_queue_file_key ON queue_entities(file_key);",
    )?;
    Ok(())
}

const SELECT_COLUMNS: &str = "id, path, file_name, extension, size_bytes, file_key, \
     detected_at, deadline, status, retry_count, error";

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DqhError::Sql {
            context: "timestamp",
            details: format!("unparseable timestamp {raw:?}: {e}"),
        })
}

/// Row with timestamps and status still in their stored TEXT form.
///
/// Parsed outside the rusqlite closure so failures surface as `DqhError`
/// rather than being squeezed through rusqlite's conversion error.
struct RawRow {
    id: EntityId,
    path: String,
    file_name: String,
    extension: String,
    size_bytes: u64,
    file_key: u64,
    detected_at: String,
    deadline: Option<String>,
    status: String,
    retry_count: u32,
    error: Option<String>,
}

fn raw_from_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        id: row.get(0)?,
        path: row.get(1)?,
        file_name: row.get(2)?,
        extension: row.get(3)?,
        size_bytes: row.get(4)?,
        file_key: row.get(5)?,
        detected_at: row.get(6)?,
        deadline: row.get(7)?,
        status: row.get(8)?,
        retry_count: row.get(9)?,
        error: row.get(10)?,
    })
}

fn finish_entity(raw: RawRow) -> Result<QueueEntity> {
    let status = EntityStatus::parse(&raw.status).ok_or_else(|| DqhError::Sql {
        context: "status",
        details: format!("unknown status {:?}", raw.status),
    })?;
    Ok(QueueEntity {
        id: raw.id,
        path: PathBuf::from(raw.path),
        file_name: raw.file_name,
        extension: raw.extension,
        size_bytes: raw.size_bytes,
        file_key: raw.file_key,
        detected_at: parse_timestamp(&raw.detected_at)?,
        deadline: raw.deadline.as_deref().map(parse_timestamp).transpose()?,
        status,
        retry_count: raw.retry_count,
        error: raw.error,
    })
}

impl EntityStore for SqliteStore {
    fn all(&self) -> Result<Vec<QueueEntity>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {SELECT_COLUMNS} FROM queue_entities ORDER BY detected_at DESC, id DESC"
        ))?;
        let rows = stmt
            .query_map([], raw_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(finish_entity).collect()
    }

    fn get(&self, id: EntityId) -> Result<Option<QueueEntity>> {
        let conn = self.conn.lock();
        let row = conn
            .prepare_cached(&format!(
                "SELECT {SELECT_COLUMNS} FROM queue_entities WHERE id = ?1"
            ))?
            .query_row(params![id], raw_from_row)
            .optional()?;
        row.map(finish_entity).transpose()
    }

    fn upsert(&self, entity: &QueueEntity) -> Result<()> {
        let conn = self.conn.lock();
        conn.prepare_cached(
            "INSERT INTO queue_entities (
                id, path, file_name, extension, size_bytes, file_key,
                detected_at, deadline, status, retry_count, error
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)
            ON CONFLICT(id) DO UPDATE SET
                path = excluded.path,
                file_name = excluded.file_name,
                extension = excluded.extension,
                size_bytes = excluded.size_bytes,
                file_key = excluded.file_key,
                detected_at = excluded.detected_at,
                deadline = excluded.deadline,
                status = excluded.status,
                retry_count = excluded.retry_count,
                error = excluded.error",
        )?
        .execute(params![
            entity.id,
            entity.path.to_string_lossy(),
            entity.file_name,
            entity.extension,
            entity.size_bytes,
            entity.file_key,
            entity.detected_at.to_rfc3339(),
            entity.deadline.map(|d| d.to_rfc3339()),
            entity.status.as_str(),
            entity.retry_count,
            entity.error,
        ])?;
        Ok(())
    }

    fn patch(&self, id: EntityId, patch: &EntityPatch) -> Result<Option<QueueEntity>> {
        // Read-modify-write; EntityPatch::apply is the single source of truth
        // for patch semantics across backends.
        let current = self.get(id)?;
        let Some(mut entity) = current else {
            return Ok(None);
        };
        patch.apply(&mut entity);
        self.upsert(&entity)?;
        Ok(Some(entity))
    }

    fn remove(&self, id: EntityId) -> Result<bool> {
        let conn = self.conn.lock();
        let affected = conn
            .prepare_cached("DELETE FROM queue_entities WHERE id = ?1")?
            .execute(params![id])?;
        Ok(affected > 0)
    }

    fn max_id(&self) -> Result<EntityId> {
        let conn = self.conn.lock();
        let max: Option<EntityId> = conn
            .prepare_cached("SELECT MAX(id) FROM queue_entities")?
            .query_row([], |row| row.get(0))?;
        Ok(max.unwrap_or(0))
    }
}
