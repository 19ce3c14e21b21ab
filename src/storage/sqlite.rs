//! SQLite storage implementation
//!
//! One connection guarded by a mutex, shared by every worker. Same-key
//! upserts serialize on the `records` primary key.

use crate::crawler::RunMetadata;
use crate::frontier::FrontierEntry;
use crate::record::{merge_fields, Record};
use crate::state::EntryState;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{
    FrontierStore, RunLog, Sink, StorageError, StorageResult, StoredRecord, UpsertOutcome,
};
use crate::storage::{RunRecord, RunStatus};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Insert, or replace the stored document when the key exists
///
/// The WHERE clause skips the update (and leaves `updated_at` alone) when the
/// merged document equals the stored one, so `changes()` tells written from
/// unchanged.
const UPSERT_SQL: &str = "
    INSERT INTO records (collection, key, fields, first_seen, updated_at)
    VALUES (?1, ?2, ?3, ?4, ?4)
    ON CONFLICT(collection, key) DO UPDATE SET
        fields = excluded.fields,
        updated_at = excluded.updated_at
    WHERE records.fields IS NOT excluded.fields
";

const RUN_COLUMNS: &str = "id, started_at, finished_at, config_hash, status, pages_fetched, \
     records_written, records_unchanged, records_skipped, retries, failures";

/// SQLite storage backend
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) the database at `path`
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database (tests and dry runs)
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Closes the connection, reporting any error SQLite raises on close
    pub fn close(self) -> StorageResult<()> {
        let conn = self.conn.into_inner().unwrap_or_else(PoisonError::into_inner);
        conn.close().map_err(|(_, e)| StorageError::Sqlite(e))
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stored_record(row: &Row<'_>) -> rusqlite::Result<(String, String, String, String, String)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
    }

    fn decode_record(
        (collection, key, fields, first_seen, updated_at): (String, String, String, String, String),
    ) -> StorageResult<StoredRecord> {
        let fields: Map<String, Value> = serde_json::from_str(&fields)?;
        Ok(StoredRecord {
            record: Record {
                collection,
                key,
                fields,
            },
            first_seen,
            updated_at,
        })
    }

    fn run_record(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
        Ok(RunRecord {
            id: row.get(0)?,
            started_at: row.get(1)?,
            finished_at: row.get(2)?,
            config_hash: row.get(3)?,
            status: RunStatus::from_db_string(&row.get::<_, String>(4)?)
                .unwrap_or(RunStatus::Aborted),
            pages_fetched: row.get::<_, i64>(5)? as u64,
            records_written: row.get::<_, i64>(6)? as u64,
            records_unchanged: row.get::<_, i64>(7)? as u64,
            records_skipped: row.get::<_, i64>(8)? as u64,
            retries: row.get::<_, i64>(9)? as u64,
            failures: row.get::<_, i64>(10)? as u64,
        })
    }
}

impl Sink for SqliteStore {
    fn upsert(&self, record: &Record) -> StorageResult<UpsertOutcome> {
        let now = Utc::now().to_rfc3339();
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let stored: Option<String> = tx
            .query_row(
                "SELECT fields FROM records WHERE collection = ?1 AND key = ?2",
                params![record.collection, record.key],
                |row| row.get(0),
            )
            .optional()?;

        let mut fields = match &stored {
            Some(text) => serde_json::from_str::<Map<String, Value>>(text)?,
            None => Map::new(),
        };
        let before = stored.is_some().then(|| fields.clone());
        merge_fields(&mut fields, &record.fields);

        if before.as_ref() == Some(&fields) {
            return Ok(UpsertOutcome::Unchanged);
        }

        let changed = tx.execute(
            UPSERT_SQL,
            params![
                record.collection,
                record.key,
                serde_json::to_string(&fields)?,
                now
            ],
        )?;
        tx.commit()?;

        Ok(if changed == 0 {
            UpsertOutcome::Unchanged
        } else {
            UpsertOutcome::Written
        })
    }

    fn exists(&self, collection: &str, key: &str) -> StorageResult<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM records WHERE collection = ?1 AND key = ?2",
                params![collection, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn get(&self, collection: &str, key: &str) -> StorageResult<Option<StoredRecord>> {
        let row = self
            .conn()
            .query_row(
                "SELECT collection, key, fields, first_seen, updated_at
                 FROM records WHERE collection = ?1 AND key = ?2",
                params![collection, key],
                Self::stored_record,
            )
            .optional()?;

        row.map(Self::decode_record).transpose()
    }

    fn records(&self, collection: &str) -> StorageResult<Vec<StoredRecord>> {
        let rows = {
            let conn = self.conn();
            let mut stmt = conn.prepare(
                "SELECT collection, key, fields, first_seen, updated_at
                 FROM records WHERE collection = ?1 ORDER BY rowid",
            )?;
            let rows = stmt
                .query_map(params![collection], Self::stored_record)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        rows.into_iter().map(Self::decode_record).collect()
    }

    fn count(&self, collection: Option<&str>) -> StorageResult<u64> {
        let conn = self.conn();
        let count: i64 = match collection {
            Some(collection) => conn.query_row(
                "SELECT COUNT(*) FROM records WHERE collection = ?1",
                params![collection],
                |row| row.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?,
        };
        Ok(count as u64)
    }

    fn collections(&self) -> StorageResult<Vec<String>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT DISTINCT collection FROM records ORDER BY collection")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    fn flush(&self) -> StorageResult<()> {
        self.conn()
            .execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }
}

impl FrontierStore for SqliteStore {
    fn save_frontier(&self, entries: &[FrontierEntry]) -> StorageResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM frontier", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO frontier (url, ordinal, state, attempts, discovered_at, last_error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (ordinal, entry) in entries.iter().enumerate() {
                stmt.execute(params![
                    entry.url,
                    ordinal as i64,
                    entry.state.to_db_string(),
                    entry.attempts,
                    entry.discovered_at.to_rfc3339(),
                    entry.last_error,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn load_frontier(&self) -> StorageResult<Vec<FrontierEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT url, state, attempts, discovered_at, last_error
             FROM frontier ORDER BY ordinal",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, u32>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut entries = Vec::with_capacity(rows.len());
        for (url, state, attempts, discovered_at, last_error) in rows {
            let state = EntryState::from_db_string(&state).ok_or_else(|| {
                StorageError::ConstraintViolation(format!(
                    "frontier entry {} has unknown state '{}'",
                    url, state
                ))
            })?;
            let discovered_at = DateTime::parse_from_rfc3339(&discovered_at)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());

            entries.push(FrontierEntry {
                url,
                discovered_at,
                state,
                attempts,
                last_error,
            });
        }

        Ok(entries)
    }

    fn clear_frontier(&self) -> StorageResult<()> {
        self.conn().execute("DELETE FROM frontier", [])?;
        Ok(())
    }
}

impl RunLog for SqliteStore {
    fn create_run(&self, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn finish_run(
        &self,
        run_id: i64,
        status: RunStatus,
        metadata: &RunMetadata,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let updated = self.conn().execute(
            "UPDATE runs SET status = ?1, finished_at = ?2, pages_fetched = ?3,
                 records_written = ?4, records_unchanged = ?5, records_skipped = ?6,
                 retries = ?7, failures = ?8
             WHERE id = ?9",
            params![
                status.to_db_string(),
                now,
                metadata.pages_fetched as i64,
                metadata.records_written as i64,
                metadata.records_unchanged as i64,
                metadata.records_skipped as i64,
                metadata.retries as i64,
                metadata.failures as i64,
                run_id
            ],
        )?;

        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.conn()
            .query_row(
                &format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS),
                params![run_id],
                Self::run_record,
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let run = self
            .conn()
            .query_row(
                &format!("SELECT {} FROM runs ORDER BY id DESC LIMIT 1", RUN_COLUMNS),
                [],
                Self::run_record,
            )
            .optional()?;
        Ok(run)
    }

    fn list_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM runs ORDER BY id DESC LIMIT ?1",
            RUN_COLUMNS
        ))?;
        let runs = stmt
            .query_map(params![limit as i64], Self::run_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }
}
