//! Durable checkpoint storage on SQLite
//!
//! [`SqliteCheckpointSaver`] keeps snapshots in a `checkpoints` table and their
//! pending writes in a `checkpoint_writes` table, both keyed by
//! `(namespace, thread_id, checkpoint_id)`. Every mutation runs in an
//! `IMMEDIATE` transaction, so id allocation is serialized per database and a
//! checkpoint becomes visible together with its writes or not at all.
//!
//! The driver is blocking. The backend advertises `supports_async = false`
//! and the workflow engine refuses to pair it with an async caller; pick the
//! memory or TTL-keyed backend for `ainvoke`.
//!
//! # Connection strings
//!
//! | URL                       | Database                     |
//! |---------------------------|------------------------------|
//! | `sqlite::memory:`         | private in-memory database   |
//! | `sqlite://data/lingo.db`  | file, created if missing     |
//! | `data/lingo.db`           | same as above                |
//!
//! # Schema
//!
//! `setup()` applies versioned migrations whose statements are all
//! `CREATE ... IF NOT EXISTS`, so re-running it against a provisioned database
//! changes nothing.

use crate::{
    checkpoint::{Checkpoint, CheckpointId, PendingWrite, ThreadKey},
    error::{CheckpointError, Result},
    timeout::IoKind,
    traits::{Capabilities, CheckpointBackend, CheckpointIter, CheckpointSaver},
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use rusqlite_migration::{Migrations, M};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const BACKEND: &str = "sqlite";

/// Rows fetched per round trip by [`CheckpointSaver::list`]
const PAGE_SIZE: usize = 64;

type SharedConn = Arc<Mutex<Option<Connection>>>;

fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(
            "CREATE TABLE IF NOT EXISTS checkpoints ( \
             namespace TEXT NOT NULL, \
             thread_id TEXT NOT NULL, \
             checkpoint_id INTEGER NOT NULL CHECK (checkpoint_id > 0), \
             parent_id INTEGER, \
             payload TEXT NOT NULL, \
             written_at TEXT NOT NULL, \
             PRIMARY KEY (namespace, thread_id, checkpoint_id) \
             ) STRICT",
        ),
        // Writes cascade with their checkpoint on `delete_thread`.
        M::up(
            "CREATE TABLE IF NOT EXISTS checkpoint_writes ( \
             namespace TEXT NOT NULL, \
             thread_id TEXT NOT NULL, \
             checkpoint_id INTEGER NOT NULL, \
             idx INTEGER NOT NULL CHECK (idx >= 0), \
             task_id TEXT NOT NULL, \
             channel TEXT NOT NULL, \
             value TEXT NOT NULL, \
             PRIMARY KEY (namespace, thread_id, checkpoint_id, idx), \
             FOREIGN KEY (namespace, thread_id, checkpoint_id) \
             REFERENCES checkpoints (namespace, thread_id, checkpoint_id) \
             ON DELETE CASCADE \
             ) STRICT",
        ),
    ])
}

/// Maps driver errors into the checkpoint taxonomy by operation kind
trait SqlResultExt<T> {
    fn or_kind(self, kind: IoKind) -> Result<T>;
}

impl<T> SqlResultExt<T> for rusqlite::Result<T> {
    fn or_kind(self, kind: IoKind) -> Result<T> {
        self.map_err(|e| kind.error(BACKEND, e))
    }
}

enum Location {
    Memory,
    File(PathBuf),
}

fn parse_location(url: &str) -> Result<Location> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(CheckpointError::configuration(
            "sqlite backend requires a connection URL",
        ));
    }
    if matches!(trimmed, "sqlite::memory:" | ":memory:" | "sqlite://:memory:") {
        return Ok(Location::Memory);
    }

    let path = if let Some(rest) = trimmed.strip_prefix("sqlite://") {
        rest
    } else if let Some(rest) = trimmed.strip_prefix("sqlite:") {
        rest
    } else if trimmed.contains("://") {
        return Err(CheckpointError::configuration(format!(
            "`{trimmed}` is not a sqlite URL"
        )));
    } else {
        trimmed
    };
    // Query parameters such as `?mode=rwc` are accepted and ignored.
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(CheckpointError::configuration(format!(
            "`{trimmed}` does not name a database file"
        )));
    }
    Ok(Location::File(PathBuf::from(path)))
}

/// Connection-level pragmas, applied once per connection.
fn setup_conn(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.busy_timeout(busy_timeout)?;
    Ok(())
}

// SQLite integers are signed; ids stay positive through the CHECK constraint.
fn id_to_sql(id: CheckpointId) -> i64 {
    id.get() as i64
}

fn id_from_sql(value: i64) -> Result<CheckpointId> {
    u64::try_from(value)
        .map(CheckpointId::new)
        .map_err(|_| CheckpointError::read(BACKEND, format!("invalid checkpoint id {value}")))
}

struct RawCheckpoint {
    id: i64,
    parent_id: Option<i64>,
    payload: String,
    written_at: String,
}

impl RawCheckpoint {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            parent_id: row.get(1)?,
            payload: row.get(2)?,
            written_at: row.get(3)?,
        })
    }

    fn into_checkpoint(self, key: &ThreadKey) -> Result<Checkpoint> {
        let written_at = DateTime::parse_from_rfc3339(&self.written_at)
            .map_err(|e| CheckpointError::read(BACKEND, format!("bad written_at: {e}")))?
            .with_timezone(&Utc);
        Ok(Checkpoint {
            id: id_from_sql(self.id)?,
            thread_id: key.thread_id.clone(),
            namespace: key.namespace.clone(),
            payload: serde_json::from_str(&self.payload)?,
            parent_id: self.parent_id.map(id_from_sql).transpose()?,
            written_at,
        })
    }
}

const SELECT_CHECKPOINT: &str = "SELECT checkpoint_id, parent_id, payload, written_at \
                                 FROM checkpoints \
                                 WHERE namespace = ?1 AND thread_id = ?2";

/// Durable, transactional, blocking checkpoint store
///
/// The connection is released when the last handle (including open `list`
/// iterators) is dropped, or earlier through [`close`](Self::close).
pub struct SqliteCheckpointSaver {
    conn: SharedConn,
    durable: bool,
}

impl SqliteCheckpointSaver {
    /// Open the database named by `url`; `busy_timeout` bounds lock waits.
    pub fn open(url: &str, busy_timeout: Duration) -> Result<Self> {
        let location = parse_location(url)?;
        let (conn, durable) = match &location {
            Location::Memory => (Connection::open_in_memory(), false),
            Location::File(path) => (Connection::open(path), true),
        };
        let conn = conn.or_kind(IoKind::Setup)?;
        setup_conn(&conn, busy_timeout).or_kind(IoKind::Setup)?;

        tracing::debug!(url, durable, "opened sqlite checkpoint database");
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            durable,
        })
    }

    /// Private in-memory database, mostly for tests
    pub fn open_in_memory() -> Result<Self> {
        Self::open("sqlite::memory:", Duration::from_secs(5))
    }

    /// Close the connection now instead of on drop.
    ///
    /// Every later operation fails with a read or write error.
    pub fn close(&self) -> Result<()> {
        match self.conn.lock().take() {
            Some(conn) => conn
                .close()
                .map_err(|(_conn, e)| CheckpointError::write(BACKEND, e)),
            None => Ok(()),
        }
    }

    fn with_conn<T>(
        &self,
        kind: IoKind,
        f: impl FnOnce(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        with_shared(&self.conn, kind, f)
    }
}

fn with_shared<T>(
    conn: &SharedConn,
    kind: IoKind,
    f: impl FnOnce(&mut Connection) -> Result<T>,
) -> Result<T> {
    let mut guard = conn.lock();
    let conn = guard
        .as_mut()
        .ok_or_else(|| kind.error(BACKEND, "connection is closed"))?;
    f(conn)
}

fn checkpoint_exists(txn: &Transaction<'_>, key: &ThreadKey, id: CheckpointId) -> Result<bool> {
    Ok(txn
        .query_row(
            "SELECT 1 FROM checkpoints \
             WHERE namespace = ?1 AND thread_id = ?2 AND checkpoint_id = ?3",
            (&key.namespace, &key.thread_id, id_to_sql(id)),
            |_| Ok(()),
        )
        .optional()
        .or_kind(IoKind::Write)?
        .is_some())
}

fn insert_writes(
    txn: &Transaction<'_>,
    key: &ThreadKey,
    id: CheckpointId,
    writes: &[PendingWrite],
) -> Result<()> {
    if writes.is_empty() {
        return Ok(());
    }

    let start: i64 = txn
        .query_row(
            "SELECT COALESCE(MAX(idx) + 1, 0) FROM checkpoint_writes \
             WHERE namespace = ?1 AND thread_id = ?2 AND checkpoint_id = ?3",
            (&key.namespace, &key.thread_id, id_to_sql(id)),
            |row| row.get(0),
        )
        .or_kind(IoKind::Write)?;

    let mut stmt = txn
        .prepare_cached(
            "INSERT INTO checkpoint_writes \
             (namespace, thread_id, checkpoint_id, idx, task_id, channel, value) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .or_kind(IoKind::Write)?;
    for (offset, write) in (0i64..).zip(writes) {
        stmt.execute((
            &key.namespace,
            &key.thread_id,
            id_to_sql(id),
            start + offset,
            &write.task_id,
            &write.channel,
            serde_json::to_string(&write.value)?,
        ))
        .or_kind(IoKind::Write)?;
    }
    Ok(())
}

impl CheckpointSaver for SqliteCheckpointSaver {
    fn setup(&self) -> Result<()> {
        self.with_conn(IoKind::Setup, |conn| {
            migrations()
                .to_latest(conn)
                .map_err(|e| CheckpointError::setup(BACKEND, e))
        })?;
        tracing::debug!("sqlite checkpoint schema is current");
        Ok(())
    }

    fn put_with_writes(
        &self,
        key: &ThreadKey,
        payload: serde_json::Value,
        parent_id: Option<CheckpointId>,
        writes: Vec<PendingWrite>,
    ) -> Result<CheckpointId> {
        let payload = serde_json::to_string(&payload)?;

        let id = self.with_conn(IoKind::Write, |conn| {
            let txn = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .or_kind(IoKind::Write)?;

            let next: i64 = txn
                .query_row(
                    "SELECT COALESCE(MAX(checkpoint_id), 0) + 1 FROM checkpoints \
                     WHERE namespace = ?1 AND thread_id = ?2",
                    (&key.namespace, &key.thread_id),
                    |row| row.get(0),
                )
                .or_kind(IoKind::Write)?;
            let id = id_from_sql(next)?;

            txn.execute(
                "INSERT INTO checkpoints \
                 (namespace, thread_id, checkpoint_id, parent_id, payload, written_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (
                    &key.namespace,
                    &key.thread_id,
                    id_to_sql(id),
                    parent_id.map(id_to_sql),
                    &payload,
                    Utc::now().to_rfc3339(),
                ),
            )
            .or_kind(IoKind::Write)?;
            insert_writes(&txn, key, id, &writes)?;

            // Dropping an uncommitted transaction rolls it back, so every
            // early return above leaves the previous latest untouched.
            txn.commit().or_kind(IoKind::Write)?;
            Ok(id)
        })?;

        tracing::debug!(thread = %key, checkpoint_id = %id, writes = writes.len(), "stored checkpoint");
        Ok(id)
    }

    fn get_latest(&self, key: &ThreadKey) -> Result<Option<Checkpoint>> {
        let raw = self.with_conn(IoKind::Read, |conn| {
            conn.query_row(
                &format!("{SELECT_CHECKPOINT} ORDER BY checkpoint_id DESC LIMIT 1"),
                (&key.namespace, &key.thread_id),
                RawCheckpoint::from_row,
            )
            .optional()
            .or_kind(IoKind::Read)
        })?;
        raw.map(|raw| raw.into_checkpoint(key)).transpose()
    }

    fn get(&self, key: &ThreadKey, id: CheckpointId) -> Result<Option<Checkpoint>> {
        let raw = self.with_conn(IoKind::Read, |conn| {
            conn.query_row(
                &format!("{SELECT_CHECKPOINT} AND checkpoint_id = ?3"),
                (&key.namespace, &key.thread_id, id_to_sql(id)),
                RawCheckpoint::from_row,
            )
            .optional()
            .or_kind(IoKind::Read)
        })?;
        raw.map(|raw| raw.into_checkpoint(key)).transpose()
    }

    fn list(&self, key: &ThreadKey) -> Result<CheckpointIter> {
        Ok(Box::new(CheckpointLoader::new(
            Arc::clone(&self.conn),
            key.clone(),
            PAGE_SIZE,
        )))
    }

    fn put_writes(
        &self,
        key: &ThreadKey,
        id: CheckpointId,
        writes: Vec<PendingWrite>,
    ) -> Result<()> {
        self.with_conn(IoKind::Write, |conn| {
            let txn = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .or_kind(IoKind::Write)?;
            if !checkpoint_exists(&txn, key, id)? {
                return Err(CheckpointError::write(
                    BACKEND,
                    format!("checkpoint {id} not found for {key}"),
                ));
            }
            insert_writes(&txn, key, id, &writes)?;
            txn.commit().or_kind(IoKind::Write)
        })
    }

    fn get_writes(&self, key: &ThreadKey, id: CheckpointId) -> Result<Vec<PendingWrite>> {
        let rows: Vec<(String, String, String)> = self.with_conn(IoKind::Read, |conn| {
            let mut stmt = conn
                .prepare_cached(
                    "SELECT task_id, channel, value FROM checkpoint_writes \
                     WHERE namespace = ?1 AND thread_id = ?2 AND checkpoint_id = ?3 \
                     ORDER BY idx",
                )
                .or_kind(IoKind::Read)?;
            let rows = stmt
                .query_map((&key.namespace, &key.thread_id, id_to_sql(id)), |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })
                .or_kind(IoKind::Read)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .or_kind(IoKind::Read)?;
            Ok(rows)
        })?;

        rows.into_iter()
            .map(|(task_id, channel, value)| {
                Ok(PendingWrite {
                    task_id,
                    channel,
                    value: serde_json::from_str(&value)?,
                })
            })
            .collect()
    }

    fn delete_thread(&self, key: &ThreadKey) -> Result<()> {
        self.with_conn(IoKind::Write, |conn| {
            let txn = conn.transaction().or_kind(IoKind::Write)?;
            txn.execute(
                "DELETE FROM checkpoint_writes WHERE namespace = ?1 AND thread_id = ?2",
                (&key.namespace, &key.thread_id),
            )
            .or_kind(IoKind::Write)?;
            let removed = txn
                .execute(
                    "DELETE FROM checkpoints WHERE namespace = ?1 AND thread_id = ?2",
                    (&key.namespace, &key.thread_id),
                )
                .or_kind(IoKind::Write)?;
            txn.commit().or_kind(IoKind::Write)?;
            tracing::debug!(thread = %key, removed, "deleted thread history");
            Ok(())
        })
    }
}

impl CheckpointBackend for SqliteCheckpointSaver {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::sync_only(self.durable)
    }

    fn as_sync(&self) -> Option<&dyn CheckpointSaver> {
        Some(self)
    }
}

enum Cursor {
    Uninit,
    InProgress(i64),
    Done,
}

/// Iterator that keeps a connection handle so no transaction stays open
/// while the caller walks a long history.
struct CheckpointLoader {
    conn: SharedConn,
    key: ThreadKey,
    batch_size: usize,
    cursor: Cursor,
    buffer: VecDeque<RawCheckpoint>,
}

impl CheckpointLoader {
    fn new(conn: SharedConn, key: ThreadKey, batch_size: usize) -> Self {
        Self {
            conn,
            key,
            batch_size,
            cursor: Cursor::Uninit,
            buffer: VecDeque::new(),
        }
    }

    fn select(&self, after: i64) -> Result<Vec<RawCheckpoint>> {
        with_shared(&self.conn, IoKind::Read, |conn| {
            let mut stmt = conn
                .prepare_cached(&format!(
                    "{SELECT_CHECKPOINT} AND checkpoint_id > ?3 \
                     ORDER BY checkpoint_id LIMIT ?4"
                ))
                .or_kind(IoKind::Read)?;
            let rows = stmt
                .query_map(
                    (
                        &self.key.namespace,
                        &self.key.thread_id,
                        after,
                        self.batch_size as i64,
                    ),
                    RawCheckpoint::from_row,
                )
                .or_kind(IoKind::Read)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .or_kind(IoKind::Read)?;
            Ok(rows)
        })
    }

    fn fill(&mut self) -> Result<()> {
        let after = match self.cursor {
            Cursor::Uninit => 0,
            Cursor::InProgress(last) => last,
            Cursor::Done => return Ok(()),
        };

        let batch = self.select(after)?;
        self.cursor = match batch.last() {
            Some(last) if batch.len() == self.batch_size => Cursor::InProgress(last.id),
            _ => Cursor::Done,
        };
        self.buffer.extend(batch);
        Ok(())
    }
}

impl Iterator for CheckpointLoader {
    type Item = Result<Checkpoint>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() {
            if let Err(e) = self.fill() {
                self.cursor = Cursor::Done;
                return Some(Err(e));
            }
        }
        self.buffer
            .pop_front()
            .map(|raw| raw.into_checkpoint(&self.key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn saver() -> SqliteCheckpointSaver {
        let saver = SqliteCheckpointSaver::open_in_memory().unwrap();
        saver.setup().unwrap();
        saver
    }

    #[test]
    fn migrations_valid() {
        migrations().validate().unwrap();
    }

    #[test]
    fn test_parse_location() {
        assert!(matches!(parse_location("sqlite::memory:"), Ok(Location::Memory)));
        assert!(matches!(
            parse_location("sqlite://data/lingo.db?mode=rwc"),
            Ok(Location::File(p)) if p == PathBuf::from("data/lingo.db")
        ));
        assert!(matches!(parse_location("lingo.db"), Ok(Location::File(_))));
        assert!(matches!(
            parse_location("postgres://localhost/db"),
            Err(CheckpointError::Configuration(_))
        ));
        assert!(matches!(parse_location(""), Err(CheckpointError::Configuration(_))));
    }

    #[test]
    fn test_put_before_setup_is_write_error() {
        let saver = SqliteCheckpointSaver::open_in_memory().unwrap();
        let err = saver
            .put(&ThreadKey::thread("t1"), json!({}), None)
            .unwrap_err();
        assert!(matches!(err, CheckpointError::Write { .. }));
    }

    #[test]
    fn test_put_with_writes_is_atomic() {
        let saver = saver();
        let key = ThreadKey::thread("t1");
        let writes = vec![
            PendingWrite::new("router", "intent", json!("exercise")),
            PendingWrite::new("router", "current_agent", json!("tutor")),
        ];

        let id = saver
            .put_with_writes(&key, json!({"messages": ["hi"]}), None, writes.clone())
            .unwrap();

        assert_eq!(saver.get_writes(&key, id).unwrap(), writes);
        let latest = saver.get_latest(&key).unwrap().unwrap();
        assert_eq!(latest.id, id);
        assert_eq!(latest.payload, json!({"messages": ["hi"]}));
    }

    #[test]
    fn test_put_writes_appends_after_existing() {
        let saver = saver();
        let key = ThreadKey::thread("t1");
        let id = saver
            .put_with_writes(&key, json!(1), None, vec![PendingWrite::new("a", "x", json!(1))])
            .unwrap();

        saver
            .put_writes(&key, id, vec![PendingWrite::new("b", "y", json!(2))])
            .unwrap();

        let channels: Vec<_> = saver
            .get_writes(&key, id)
            .unwrap()
            .into_iter()
            .map(|w| w.channel)
            .collect();
        assert_eq!(channels, vec!["x", "y"]);
    }

    #[test]
    fn test_list_pages_through_history() {
        let saver = saver();
        let key = ThreadKey::thread("long");
        let total = PAGE_SIZE * 2 + 3;
        let mut parent = None;
        for step in 0..total {
            parent = Some(saver.put(&key, json!({ "step": step }), parent).unwrap());
        }

        let ids: Vec<u64> = saver
            .list(&key)
            .unwrap()
            .map(|c| c.unwrap().id.get())
            .collect();
        assert_eq!(ids, (1..=total as u64).collect::<Vec<_>>());
    }

    #[test]
    fn test_delete_thread_removes_writes() {
        let saver = saver();
        let key = ThreadKey::thread("gone");
        let id = saver
            .put_with_writes(&key, json!({}), None, vec![PendingWrite::new("a", "x", json!(1))])
            .unwrap();

        saver.delete_thread(&key).unwrap();

        assert!(saver.get_latest(&key).unwrap().is_none());
        assert!(saver.get_writes(&key, id).unwrap().is_empty());
    }

    #[test]
    fn test_close_releases_connection() {
        let saver = saver();
        saver.close().unwrap();
        saver.close().unwrap();

        let err = saver.get_latest(&ThreadKey::thread("t1")).unwrap_err();
        assert!(matches!(err, CheckpointError::Read { .. }));
    }

    #[test]
    fn test_capabilities_are_sync_only() {
        let saver = saver();
        let caps = saver.capabilities();
        assert!(caps.supports_sync);
        assert!(!caps.supports_async);
        assert!(saver.as_async().is_none());
    }
}
