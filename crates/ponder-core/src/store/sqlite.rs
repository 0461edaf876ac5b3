//! SQLite persistence for the thought log and memory tiers.
//!
//! Vectors and metadata are stored as JSON text, timestamps as RFC 3339.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

use crate::error::{PonderError, PonderResult};
use crate::types::{MemoryRecord, Priority, Thought, ThoughtId, Tier};

/// SQLite-backed agent state.
pub struct SqliteStateStore {
    conn: Arc<Mutex<Connection>>,
}

fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn conversion_error(col: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(err))
}

impl SqliteStateStore {
    /// Open (or create) a store at `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> PonderResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> PonderResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> PonderResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| PonderError::database(e.to_string()))
    }

    fn init_schema(&self) -> PonderResult<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS thoughts (
                id INTEGER PRIMARY KEY,
                content TEXT NOT NULL,
                source_tag TEXT NOT NULL,
                priority TEXT NOT NULL,
                created_at TEXT NOT NULL,
                spoken INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS memory_records (
                id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                tier TEXT NOT NULL,
                day TEXT NOT NULL,
                embedding TEXT,
                metadata TEXT NOT NULL DEFAULT '{}'
            );

            CREATE INDEX IF NOT EXISTS idx_memory_records_tier ON memory_records(tier);
            CREATE INDEX IF NOT EXISTS idx_memory_records_day ON memory_records(tier, day);
            ",
        )?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Thoughts
    // ------------------------------------------------------------------

    pub fn save_thought(&self, thought: &Thought) -> PonderResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO thoughts (id, content, source_tag, priority, created_at, spoken)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET spoken = MAX(spoken, excluded.spoken)",
            params![
                thought.id as i64,
                thought.content,
                thought.source_tag,
                thought.priority.to_string(),
                thought.created_at.to_rfc3339(),
                thought.spoken as i32,
            ],
        )?;
        Ok(())
    }

    /// Set spoken flags. Never clears one.
    pub fn mark_spoken(&self, ids: &[ThoughtId]) -> PonderResult<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut updated = 0;
        {
            let mut stmt = tx.prepare("UPDATE thoughts SET spoken = 1 WHERE id = ?1 AND spoken = 0")?;
            for id in ids {
                updated += stmt.execute(params![*id as i64])?;
            }
        }
        tx.commit()?;
        Ok(updated)
    }

    /// Full thought log, in id order.
    pub fn load_thoughts(&self) -> PonderResult<Vec<Thought>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, content, source_tag, priority, created_at, spoken
             FROM thoughts ORDER BY id ASC",
        )?;

        let thoughts = stmt
            .query_map([], |row| {
                let id: i64 = row.get(0)?;
                let priority_str: String = row.get(3)?;
                let created_at_str: String = row.get(4)?;
                let spoken: i32 = row.get(5)?;

                let priority = Priority::from_str(&priority_str).map_err(|e| conversion_error(3, e))?;

                Ok(Thought {
                    id: id as ThoughtId,
                    content: row.get(1)?,
                    source_tag: row.get(2)?,
                    priority,
                    created_at: parse_time(&created_at_str),
                    spoken: spoken != 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(thoughts)
    }

    pub fn thought_count(&self) -> PonderResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM thoughts", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // ------------------------------------------------------------------
    // Memory records
    // ------------------------------------------------------------------

    fn upsert_with(conn: &Connection, record: &MemoryRecord) -> PonderResult<()> {
        let embedding = record
            .embedding
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let metadata = serde_json::to_string(&record.metadata)?;

        conn.execute(
            "INSERT INTO memory_records (id, text, timestamp, tier, day, embedding, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                text = excluded.text,
                timestamp = excluded.timestamp,
                tier = excluded.tier,
                day = excluded.day,
                embedding = excluded.embedding,
                metadata = excluded.metadata",
            params![
                record.id.to_string(),
                record.text,
                record.timestamp.to_rfc3339(),
                record.tier.to_string(),
                record.day().to_string(),
                embedding,
                metadata,
            ],
        )?;
        Ok(())
    }

    /// Insert or update a record (including a tier change).
    pub fn upsert_record(&self, record: &MemoryRecord) -> PonderResult<()> {
        let conn = self.lock()?;
        Self::upsert_with(&conn, record)
    }

    /// Move overflow entries to Daily and add the new Recent entry in one
    /// transaction, so a restart never sees half of an insert.
    pub fn insert_recent(&self, migrated: &[MemoryRecord], record: &MemoryRecord) -> PonderResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for m in migrated {
            Self::upsert_with(&tx, m)?;
        }
        Self::upsert_with(&tx, record)?;
        tx.commit()?;
        Ok(())
    }

    pub fn delete_record(&self, id: &Uuid) -> PonderResult<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM memory_records WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(deleted > 0)
    }

    /// Write the archived summary and drop the day's Daily rows atomically.
    pub fn archive_day(&self, day: NaiveDate, archived: &MemoryRecord) -> PonderResult<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        Self::upsert_with(&tx, archived)?;
        let purged = tx.execute(
            "DELETE FROM memory_records WHERE tier = ?1 AND day = ?2",
            params![Tier::Daily.to_string(), day.to_string()],
        )?;
        tx.commit()?;
        debug!(day = %day, purged, "Archived day persisted");
        Ok(purged)
    }

    pub fn get_record(&self, id: &Uuid) -> PonderResult<Option<MemoryRecord>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                "SELECT id, text, timestamp, tier, embedding, metadata
                 FROM memory_records WHERE id = ?1",
                params![id.to_string()],
                Self::map_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Records of one tier, oldest first.
    pub fn load_records(&self, tier: Tier) -> PonderResult<Vec<MemoryRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, text, timestamp, tier, embedding, metadata
             FROM memory_records WHERE tier = ?1 ORDER BY rowid ASC",
        )?;

        let mut records = stmt
            .query_map(params![tier.to_string()], Self::map_record)?
            .collect::<Result<Vec<_>, _>>()?;
        // stable: insertion order breaks timestamp ties
        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }

    fn map_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryRecord> {
        let id_str: String = row.get(0)?;
        let timestamp_str: String = row.get(2)?;
        let tier_str: String = row.get(3)?;
        let embedding_str: Option<String> = row.get(4)?;
        let metadata_str: String = row.get(5)?;

        let id = Uuid::parse_str(&id_str).map_err(|e| conversion_error(0, e))?;
        let tier = Tier::from_str(&tier_str).map_err(|e| conversion_error(3, e))?;
        let embedding = embedding_str
            .map(|s| serde_json::from_str::<Vec<f32>>(&s))
            .transpose()
            .map_err(|e| conversion_error(4, e))?;
        let metadata: HashMap<String, serde_json::Value> =
            serde_json::from_str(&metadata_str).map_err(|e| conversion_error(5, e))?;

        Ok(MemoryRecord {
            id,
            text: row.get(1)?,
            timestamp: parse_time(&timestamp_str),
            tier,
            embedding,
            metadata,
        })
    }
}
