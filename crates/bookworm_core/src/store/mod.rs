//! Durable record storage contracts.
//!
//! # Responsibility
//! - Define the storage seam used by the context and the save coordinator.
//! - Return semantic errors (`NotFound`, `InvalidData`) next to DB transport errors.
//!
//! # Invariants
//! - `commit` applies a whole `ChangeBatch` or nothing.
//! - Load paths reject persisted rows that do not match the schema instead
//!   of masking them.

use crate::db::DbError;
use crate::model::record::{Record, RecordId};
use crate::model::schema::Schema;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod sqlite;

pub type StoreResult<T> = Result<T, StoreError>;

/// Storage-layer error for load and commit operations.
#[derive(Debug)]
pub enum StoreError {
    Db(DbError),
    /// Update or delete targeted a row that no longer exists.
    NotFound(RecordId),
    /// Persisted row cannot be decoded against the schema.
    InvalidData(String),
    /// Connection guard was poisoned by a panicking writer.
    Poisoned,
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "record not found in storage: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted record data: {message}"),
            Self::Poisoned => write!(f, "storage connection lock poisoned"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::NotFound(_) | Self::InvalidData(_) | Self::Poisoned => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Frozen set of staged changes written by one save.
#[derive(Debug, Clone, Default)]
pub struct ChangeBatch {
    pub inserts: Vec<Record>,
    pub updates: Vec<Record>,
    pub deletes: Vec<RecordId>,
}

impl ChangeBatch {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inserts.len() + self.updates.len() + self.deletes.len()
    }
}

/// Durable storage for records.
///
/// Implementations must be shareable with a background save worker.
pub trait RecordStore: Send + Sync {
    /// Loads every persisted record known to `schema`, ordered by insertion.
    fn load_all(&self, schema: &Schema) -> StoreResult<Vec<Record>>;
    /// Applies one batch atomically.
    fn commit(&self, batch: &ChangeBatch) -> StoreResult<()>;
}
