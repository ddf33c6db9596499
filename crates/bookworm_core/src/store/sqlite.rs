//! SQLite-backed record store.
//!
//! # Responsibility
//! - Persist records as one row per record with JSON-encoded attributes.
//! - Keep SQL details inside the storage boundary.
//!
//! # Invariants
//! - Every commit runs in a single `IMMEDIATE` transaction.
//! - Updates and deletes that touch zero rows abort the commit with `NotFound`.
//! - Loaded rows are ordered by `insertion_seq ASC, uuid ASC`.

use crate::db::{open_db_in_memory, open_db_with_timeout, DbResult, DEFAULT_BUSY_TIMEOUT};
use crate::model::record::Record;
use crate::model::schema::{AttributeValue, Schema};
use crate::store::{ChangeBatch, RecordStore, StoreError, StoreResult};
use log::{error, info};
use rusqlite::{params, Connection, Row, TransactionBehavior};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use uuid::Uuid;

const RECORD_SELECT_SQL: &str = "SELECT
    uuid,
    entity,
    insertion_seq,
    attributes
FROM records
ORDER BY insertion_seq ASC, uuid ASC;";

/// Record store over one migrated SQLite connection.
pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

impl SqliteRecordStore {
    /// Opens (or creates) a database file.
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn open_with_timeout(path: impl AsRef<Path>, busy_timeout: Duration) -> DbResult<Self> {
        Ok(Self::from_connection(open_db_with_timeout(path, busy_timeout)?))
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> DbResult<Self> {
        Ok(Self::from_connection(open_db_in_memory()?))
    }

    /// Wraps an already migrated connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Number of persisted rows.
    pub fn count(&self) -> StoreResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM records;", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl RecordStore for SqliteRecordStore {
    fn load_all(&self, schema: &Schema) -> StoreResult<Vec<Record>> {
        let started_at = Instant::now();
        let conn = self.lock()?;
        let mut stmt = conn.prepare(RECORD_SELECT_SQL)?;
        let mut rows = stmt.query([])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_record_row(row, schema)?);
        }

        info!(
            "event=store_load module=store status=ok records={} duration_ms={}",
            records.len(),
            started_at.elapsed().as_millis()
        );
        Ok(records)
    }

    fn commit(&self, batch: &ChangeBatch) -> StoreResult<()> {
        let started_at = Instant::now();
        let mut conn = self.lock()?;
        let result = commit_in_tx(&mut conn, batch);
        match &result {
            Ok(()) => info!(
                "event=store_commit module=store status=ok inserted={} updated={} deleted={} duration_ms={}",
                batch.inserts.len(),
                batch.updates.len(),
                batch.deletes.len(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=store_commit module=store status=error changes={} duration_ms={} error={}",
                batch.len(),
                started_at.elapsed().as_millis(),
                err
            ),
        }
        result
    }
}

fn commit_in_tx(conn: &mut Connection, batch: &ChangeBatch) -> StoreResult<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    for record in &batch.inserts {
        tx.execute(
            "INSERT INTO records (uuid, entity, insertion_seq, attributes)
             VALUES (?1, ?2, ?3, ?4);",
            params![
                record.id().to_string(),
                record.entity().name,
                seq_to_db(record.seq())?,
                encode_attributes(record)?,
            ],
        )?;
    }

    for record in &batch.updates {
        let changed = tx.execute(
            "UPDATE records
             SET
                attributes = ?2,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE uuid = ?1;",
            params![record.id().to_string(), encode_attributes(record)?],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(record.id()));
        }
    }

    for id in &batch.deletes {
        let changed = tx.execute("DELETE FROM records WHERE uuid = ?1;", [id.to_string()])?;
        if changed == 0 {
            return Err(StoreError::NotFound(*id));
        }
    }

    tx.commit()?;
    Ok(())
}

fn encode_attributes(record: &Record) -> StoreResult<String> {
    let map: BTreeMap<&str, &AttributeValue> = record.attributes().collect();
    serde_json::to_string(&map).map_err(|err| {
        StoreError::InvalidData(format!(
            "cannot encode attributes of record {}: {err}",
            record.id()
        ))
    })
}

fn parse_record_row(row: &Row<'_>, schema: &Schema) -> StoreResult<Record> {
    let uuid_text: String = row.get("uuid")?;
    let id = Uuid::parse_str(&uuid_text).map_err(|_| {
        StoreError::InvalidData(format!("invalid uuid value `{uuid_text}` in records.uuid"))
    })?;

    let entity_name: String = row.get("entity")?;
    let entity = schema.entity(&entity_name).ok_or_else(|| {
        StoreError::InvalidData(format!(
            "unknown entity `{entity_name}` in records.entity for {id}"
        ))
    })?;

    let seq = match row.get::<_, i64>("insertion_seq")? {
        value if value >= 0 => value.unsigned_abs(),
        other => {
            return Err(StoreError::InvalidData(format!(
                "invalid insertion_seq `{other}` for {id}"
            )));
        }
    };

    let mut record = Record::with_id(id, entity, seq)
        .map_err(|err| StoreError::InvalidData(format!("{err} in records.uuid")))?;

    let attributes_text: String = row.get("attributes")?;
    let attributes: BTreeMap<String, AttributeValue> = serde_json::from_str(&attributes_text)
        .map_err(|err| StoreError::InvalidData(format!("invalid attributes for {id}: {err}")))?;
    for (name, value) in attributes {
        record
            .set(&name, value)
            .map_err(|err| StoreError::InvalidData(format!("record {id}: {err}")))?;
    }

    Ok(record)
}

fn seq_to_db(seq: u64) -> StoreResult<i64> {
    i64::try_from(seq)
        .map_err(|_| StoreError::InvalidData(format!("insertion_seq {seq} exceeds storage range")))
}
