//! SQLite-backed captcha store
//!
//! One connection, owned by the persistence writer thread. Sequence numbers
//! are contiguous and monotonic; on reopen the store resumes from the highest
//! committed `slno`.

use std::path::Path;

use rusqlite::{params, Connection};
use thiserror::Error;
use tracing::info;

use super::{format_timestamp, CaptchaRecord};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database failure: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("could not prepare database location: {0}")]
    Io(#[from] std::io::Error),
}

pub struct CaptchaStore {
    conn: Connection,
}

impl CaptchaStore {
    /// Open (creating if needed) the store at the given path.
    pub fn open(path: &Path) -> Result<Self, PersistenceError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        let store = Self { conn };
        store.init_schema()?;
        info!("Captcha store open at {:?}", path);
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), PersistenceError> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS captchas (
                slno INTEGER PRIMARY KEY,
                processed_image_blob BLOB,
                ocr_text TEXT,
                b64 TEXT,
                confidence REAL,
                timestamp TEXT,
                boxes_image_blob BLOB
            )",
            [],
        )?;
        Ok(())
    }

    /// The sequence number the next committed record will take.
    pub fn next_sequence(&self) -> Result<i64, PersistenceError> {
        Ok(self.max_sequence()?.map_or(1, |max| max + 1))
    }

    /// Highest committed sequence number, if any records exist.
    pub fn max_sequence(&self) -> Result<Option<i64>, PersistenceError> {
        let max: Option<i64> =
            self.conn
                .query_row("SELECT MAX(slno) FROM captchas", [], |row| row.get(0))?;
        Ok(max)
    }

    pub fn count(&self) -> Result<i64, PersistenceError> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM captchas", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Commit a batch in one transaction, assigning contiguous sequence
    /// numbers starting at `start_slno`. All-or-nothing: on error nothing
    /// from the batch is committed.
    pub fn insert_batch(
        &mut self,
        start_slno: i64,
        records: &[CaptchaRecord],
    ) -> Result<(), PersistenceError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO captchas
                    (slno, processed_image_blob, ocr_text, b64, confidence, timestamp, boxes_image_blob)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for (i, record) in records.iter().enumerate() {
                stmt.execute(params![
                    start_slno + i as i64,
                    record.processed_png,
                    record.text,
                    record.raw_b64,
                    f64::from(record.confidence),
                    format_timestamp(&record.timestamp),
                    record.overlay_png,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// All `(slno, ocr_text)` rows in sequence order.
    pub fn fetch_texts(&self) -> Result<Vec<(i64, String)>, PersistenceError> {
        let mut stmt = self
            .conn
            .prepare("SELECT slno, ocr_text FROM captchas ORDER BY slno")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
