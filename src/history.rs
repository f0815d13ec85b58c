//! History store interface and the SQLite implementation
//!
//! The history store persists past chat events. The view model only reads
//! pages from it, so the interface is two queries plus a purge hook.

use crate::error::Result;
use crate::message::{EncryptionType, FileInfo, Message, MessageKind, ReceiptStatus};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OpenFlags};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Which record types a history query returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryFilter {
    pub messages: bool,
    pub file_records: bool,
}

impl HistoryFilter {
    pub fn all() -> Self {
        Self {
            messages: true,
            file_records: true,
        }
    }

    pub fn messages_only() -> Self {
        Self {
            messages: true,
            file_records: false,
        }
    }
}

impl Default for HistoryFilter {
    fn default() -> Self {
        Self::all()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

/// A completed (or failed) file transfer kept in history
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub id: String,
    pub contact: String,
    pub direction: Direction,
    pub timestamp: DateTime<Utc>,
    pub file: FileInfo,
}

/// One entry returned by the history store
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryRecord {
    /// A message we sent
    Delivered(Message),
    /// A message we received
    Received(Message),
    FileRecord(FileRecord),
}

impl HistoryRecord {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            HistoryRecord::Delivered(m) | HistoryRecord::Received(m) => m.timestamp,
            HistoryRecord::FileRecord(r) => r.timestamp,
        }
    }

    /// Normalize into the uniform message shape
    pub fn into_message(self) -> Message {
        match self {
            HistoryRecord::Delivered(m) | HistoryRecord::Received(m) => m,
            HistoryRecord::FileRecord(r) => {
                let body = r.file.name.clone();
                let mut msg = Message::new(
                    r.id,
                    r.contact,
                    MessageKind::FileTransferHistory,
                    r.timestamp,
                    body,
                );
                let mut file = r.file;
                file.outgoing = r.direction == Direction::Out;
                msg.with_file(file)
            }
        }
    }
}

/// Read access to persisted history, ordered oldest first
pub trait HistoryStore: Send + Sync {
    /// The most recent `limit` records of a conversation
    fn find_last(
        &self,
        filter: &HistoryFilter,
        conversation: &str,
        limit: usize,
    ) -> Result<Vec<HistoryRecord>>;

    /// The most recent `limit` records strictly older than `before`
    fn find_last_before(
        &self,
        filter: &HistoryFilter,
        conversation: &str,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<HistoryRecord>>;

    /// Erase locally stored messages; stores that cannot erase ignore it
    fn purge(&self, _conversation: &str, _ids: &[String]) -> Result<usize> {
        Ok(0)
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    uid           TEXT PRIMARY KEY,
    conversation  TEXT NOT NULL,
    sender        TEXT NOT NULL,
    sender_name   TEXT NOT NULL,
    timestamp     INTEGER NOT NULL,
    kind          TEXT NOT NULL,
    body          TEXT NOT NULL,
    encryption    INTEGER NOT NULL DEFAULT 0,
    corrected_uid TEXT,
    receipt       INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS messages_conv_ts ON messages (conversation, timestamp);

CREATE TABLE IF NOT EXISTS file_records (
    id            TEXT PRIMARY KEY,
    conversation  TEXT NOT NULL,
    contact       TEXT NOT NULL,
    timestamp     INTEGER NOT NULL,
    direction     TEXT NOT NULL,
    name          TEXT NOT NULL,
    mime_type     TEXT NOT NULL,
    size          INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS file_records_conv_ts ON file_records (conversation, timestamp);
"#;

/// History kept in a SQLite file
pub struct SqliteHistory {
    db_path: PathBuf,
}

impl SqliteHistory {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    /// Open a read-only connection; a missing file is an error
    fn open_db(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(conn)
    }

    fn open_rw(&self) -> Result<Connection> {
        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&self.db_path)?;
        Ok(conn)
    }

    /// Create the tables if they do not exist yet
    pub fn init(&self) -> Result<()> {
        let conn = self.open_rw()?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Store messages of one conversation; existing uids are replaced
    pub fn insert_messages(&self, conversation: &str, messages: &[Message]) -> Result<usize> {
        let mut conn = self.open_rw()?;
        conn.execute_batch(SCHEMA)?;
        let tx = conn.transaction()?;
        let mut count = 0;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR REPLACE INTO messages
                    (uid, conversation, sender, sender_name, timestamp, kind, body,
                     encryption, corrected_uid, receipt)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
            )?;
            let mut file_stmt = tx.prepare(
                r#"
                INSERT OR REPLACE INTO file_records
                    (id, conversation, contact, timestamp, direction, name, mime_type, size)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )?;

            for msg in messages {
                match (&msg.kind, &msg.file) {
                    (MessageKind::FileTransferHistory, Some(file)) => {
                        let direction = if file.outgoing {
                            "out"
                        } else {
                            "in"
                        };
                        file_stmt.execute(params![
                            msg.uid,
                            conversation,
                            msg.sender,
                            msg.timestamp.timestamp_millis(),
                            direction,
                            file.name,
                            file.mime_type,
                            file.size,
                        ])?;
                    }
                    _ => {
                        stmt.execute(params![
                            msg.uid,
                            conversation,
                            msg.sender,
                            msg.sender_name,
                            msg.timestamp.timestamp_millis(),
                            msg.kind.as_str(),
                            msg.body,
                            msg.encryption.as_i32(),
                            msg.corrected_uid,
                            msg.receipt.as_i32(),
                        ])?;
                    }
                }
                count += 1;
            }
        }
        tx.commit()?;
        debug!(conversation, count, "stored history messages");
        Ok(count)
    }

    fn query(
        &self,
        filter: &HistoryFilter,
        conversation: &str,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<HistoryRecord>> {
        let conn = self.open_db()?;
        let before_ms = before.map(|b| b.timestamp_millis()).unwrap_or(i64::MAX);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let mut records = Vec::new();

        if filter.messages {
            let mut stmt = conn.prepare(
                r#"
                SELECT uid, sender, sender_name, timestamp, kind, body,
                       encryption, corrected_uid, receipt
                FROM messages
                WHERE conversation = ?1 AND timestamp < ?2
                ORDER BY timestamp DESC
                LIMIT ?3
                "#,
            )?;
            let rows = stmt.query_map(params![conversation, before_ms, limit], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, i32>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, i32>(8)?,
                ))
            })?;

            for row in rows {
                let (uid, sender, sender_name, ts, kind, body, enc, corrected, receipt) = row?;
                let kind = match MessageKind::parse(&kind) {
                    Some(k) => k,
                    None => {
                        warn!(uid = %uid, kind = %kind, "skipping history row with unknown kind");
                        continue;
                    }
                };
                let msg = Message {
                    uid,
                    sender,
                    sender_name,
                    timestamp: millis_to_datetime(ts),
                    kind,
                    body,
                    encryption: EncryptionType::from_i32(enc),
                    corrected_uid: corrected,
                    receipt: ReceiptStatus::from_i32(receipt),
                    file: None,
                };
                records.push(if kind == MessageKind::Outgoing {
                    HistoryRecord::Delivered(msg)
                } else {
                    HistoryRecord::Received(msg)
                });
            }
        }

        if filter.file_records {
            let mut stmt = conn.prepare(
                r#"
                SELECT id, contact, timestamp, direction, name, mime_type, size
                FROM file_records
                WHERE conversation = ?1 AND timestamp < ?2
                ORDER BY timestamp DESC
                LIMIT ?3
                "#,
            )?;
            let rows = stmt.query_map(params![conversation, before_ms, limit], |row| {
                let direction: String = row.get(3)?;
                Ok(FileRecord {
                    id: row.get(0)?,
                    contact: row.get(1)?,
                    timestamp: millis_to_datetime(row.get(2)?),
                    direction: if direction == "out" {
                        Direction::Out
                    } else {
                        Direction::In
                    },
                    file: FileInfo {
                        name: row.get(4)?,
                        mime_type: row.get(5)?,
                        size: row.get(6)?,
                        outgoing: direction == "out",
                    },
                })
            })?;
            for row in rows {
                records.push(HistoryRecord::FileRecord(row?));
            }
        }

        // Newest `limit` across both tables, returned oldest first
        records.sort_by_key(|r| std::cmp::Reverse(r.timestamp()));
        records.truncate(limit as usize);
        records.reverse();
        Ok(records)
    }
}

impl HistoryStore for SqliteHistory {
    fn find_last(
        &self,
        filter: &HistoryFilter,
        conversation: &str,
        limit: usize,
    ) -> Result<Vec<HistoryRecord>> {
        self.query(filter, conversation, None, limit)
    }

    fn find_last_before(
        &self,
        filter: &HistoryFilter,
        conversation: &str,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<HistoryRecord>> {
        self.query(filter, conversation, Some(before), limit)
    }

    fn purge(&self, conversation: &str, ids: &[String]) -> Result<usize> {
        let conn = self.open_rw()?;
        let mut removed = 0;
        for id in ids {
            removed += conn.execute(
                "DELETE FROM messages WHERE conversation = ?1 AND uid = ?2",
                params![conversation, id],
            )?;
            removed += conn.execute(
                "DELETE FROM file_records WHERE conversation = ?1 AND id = ?2",
                params![conversation, id],
            )?;
        }
        Ok(removed)
    }
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
