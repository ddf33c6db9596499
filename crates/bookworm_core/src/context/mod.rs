//! Record context: identity map, staged mutations and live views.
//!
//! # Responsibility
//! - Own the working set of records for one logical session.
//! - Stage create/mutate/delete and push each change to bound views
//!   before returning.
//! - Hand staged changes to the save coordinator (`save` submodule).
//!
//! # Invariants
//! - Record ids are unique within a context across every state transition.
//! - Mutations are rejected with `SaveInProgress` while a save is in flight.
//! - Only entities declared in the context schema can be created, so every
//!   saved row can be loaded again with the same schema.
//! - Views never observe staged deletions.
//! - A context is confined to one thread; only `PendingSave` crosses threads.

mod identity;
pub mod save;

use crate::model::record::{Record, RecordId, RecordSnapshot, RecordState};
use crate::model::schema::{AttributeError, AttributeValue, EntitySchema, Schema};
use crate::store::{RecordStore, StoreError};
use crate::view::{RecordLookup, ViewDefinition, ViewHandle, ViewRegistry};
use identity::IdentityMap;
use log::{debug, info};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

pub use save::{
    PendingSave, SaveError, SaveOutcome, SaveSummary, ValidationIssue, ValidationProblem,
};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

pub type ContextResult<T> = Result<T, ContextError>;

/// Errors from context mutations and loading.
#[derive(Debug)]
pub enum ContextError {
    /// Attribute is unknown or value does not satisfy its type constraint.
    InvalidAttribute(AttributeError),
    /// Handle is not (or no longer) present in the identity map.
    UnknownRecord(RecordId),
    /// Entity is not declared in the context schema.
    UnknownEntity(&'static str),
    /// A save is in flight; retry after it finishes.
    SaveInProgress,
    /// Loading durable records failed.
    Store(StoreError),
}

impl Display for ContextError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidAttribute(err) => write!(f, "invalid attribute: {err}"),
            Self::UnknownRecord(id) => write!(f, "unknown record: {id}"),
            Self::UnknownEntity(name) => write!(f, "entity `{name}` is not in the schema"),
            Self::SaveInProgress => write!(f, "a save is in progress"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ContextError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidAttribute(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::UnknownRecord(_) | Self::UnknownEntity(_) | Self::SaveInProgress => None,
        }
    }
}

impl From<AttributeError> for ContextError {
    fn from(value: AttributeError) -> Self {
        Self::InvalidAttribute(value)
    }
}

impl From<StoreError> for ContextError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// Staging area for one logical session over a record store.
pub struct Context<S: RecordStore> {
    id: u64,
    store: Arc<S>,
    schema: Schema,
    records: IdentityMap,
    views: ViewRegistry,
    next_seq: u64,
    next_save_id: u64,
    /// Id of the save in flight, `0` when idle. Shared with its `PendingSave`.
    save_lock: Arc<AtomicU64>,
}

impl<S: RecordStore> Context<S> {
    /// Loads every durable record of `schema` from `store` as `Clean`.
    pub fn open(store: Arc<S>, schema: Schema) -> ContextResult<Self> {
        let started_at = Instant::now();
        let loaded = store.load_all(&schema)?;

        let mut records = IdentityMap::default();
        let mut next_seq = 0;
        for record in loaded {
            next_seq = next_seq.max(record.seq() + 1);
            records.insert_clean(record);
        }

        let context = Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            store,
            schema,
            records,
            views: ViewRegistry::default(),
            next_seq,
            next_save_id: 0,
            save_lock: Arc::new(AtomicU64::new(0)),
        };
        info!(
            "event=context_open module=context status=ok context_id={} records={} duration_ms={}",
            context.id,
            context.records.len(),
            started_at.elapsed().as_millis()
        );
        Ok(context)
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Allocates a new `Inserted` record with empty attribute values.
    pub fn create(&mut self, entity: &'static EntitySchema) -> ContextResult<RecordId> {
        self.ensure_idle()?;
        if !self
            .schema
            .entity(entity.name)
            .is_some_and(|declared| std::ptr::eq(declared, entity))
        {
            return Err(ContextError::UnknownEntity(entity.name));
        }

        let record = Record::new(entity, self.next_seq);
        self.next_seq += 1;
        let id = record.id();
        self.records.insert_new(record);
        self.views.record_changed(id, &self.records);

        debug!(
            "event=record_create module=context status=ok entity={} record_id={}",
            entity.name, id
        );
        Ok(id)
    }

    /// Sets one attribute on a live record.
    ///
    /// `Clean` records become `Modified`; setting an equal value is a no-op.
    pub fn mutate(
        &mut self,
        id: RecordId,
        attribute: &str,
        value: AttributeValue,
    ) -> ContextResult<()> {
        self.ensure_idle()?;
        let entry = self
            .records
            .get_mut(&id)
            .filter(|entry| entry.state != RecordState::Deleted)
            .ok_or(ContextError::UnknownRecord(id))?;

        if !entry.record.set(attribute, value)? {
            return Ok(());
        }
        if entry.state == RecordState::Clean {
            entry.state = RecordState::Modified;
        }
        self.views.record_changed(id, &self.records);

        debug!(
            "event=record_mutate module=context status=ok record_id={} attribute={}",
            id, attribute
        );
        Ok(())
    }

    /// Removes a record from every view and stages its deletion.
    ///
    /// Records never saved are dropped from the map immediately.
    pub fn delete(&mut self, id: RecordId) -> ContextResult<()> {
        self.ensure_idle()?;
        let entry = self
            .records
            .get_mut(&id)
            .filter(|entry| entry.state != RecordState::Deleted)
            .ok_or(ContextError::UnknownRecord(id))?;

        let staged = entry.state != RecordState::Inserted;
        if staged {
            entry.state = RecordState::Deleted;
        } else {
            self.records.remove(&id);
        }
        self.views.record_removed(id);

        debug!(
            "event=record_delete module=context status=ok record_id={} staged={}",
            id, staged
        );
        Ok(())
    }

    /// Snapshot of a live record.
    pub fn get(&self, id: RecordId) -> Option<RecordSnapshot> {
        self.records.live_record(&id).map(Record::snapshot)
    }

    /// Live record by id.
    pub fn record(&self, id: RecordId) -> Option<&Record> {
        self.records.live_record(&id)
    }

    /// Staging state of any record in the map, including staged deletions.
    pub fn state(&self, id: RecordId) -> Option<RecordState> {
        self.records.get(&id).map(|entry| entry.state)
    }

    /// Every record in the map with its state, in insertion order.
    pub fn snapshot(&self) -> Vec<(RecordId, RecordState)> {
        self.records
            .ordered()
            .into_iter()
            .map(|entry| (entry.record.id(), entry.state))
            .collect()
    }

    /// Returns whether any record is staged.
    pub fn has_changes(&self) -> bool {
        self.records.has_staged()
    }

    /// Returns whether a save holds the context lock.
    pub fn is_saving(&self) -> bool {
        self.save_lock.load(Ordering::Acquire) != 0
    }

    /// Reverts all staged changes to the last durable baseline.
    ///
    /// Every view is rebuilt and receives a `Reset` event.
    pub fn discard_changes(&mut self) -> ContextResult<usize> {
        self.ensure_idle()?;
        let reverted = self.records.discard_staged();
        self.views.rebuild_all(&self.records);
        info!(
            "event=context_discard module=context status=ok context_id={} reverted={}",
            self.id, reverted
        );
        Ok(reverted)
    }

    /// Defines a live view bound to this context.
    pub fn define_view(&mut self, definition: &ViewDefinition) -> ContextResult<ViewHandle> {
        let query = definition.compile()?;
        Ok(self.views.register(query, &self.records))
    }

    /// Current contents of `view` as record snapshots.
    pub fn view_records(&self, view: &ViewHandle) -> Vec<RecordSnapshot> {
        view.ids()
            .iter()
            .filter_map(|id| self.records.live_record(id))
            .map(Record::snapshot)
            .collect()
    }

    /// Number of views still held by callers.
    pub fn live_views(&self) -> usize {
        self.views.live_count()
    }

    fn ensure_idle(&self) -> ContextResult<()> {
        if self.is_saving() {
            debug!(
                "event=context_busy module=context status=rejected context_id={}",
                self.id
            );
            return Err(ContextError::SaveInProgress);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Context, ContextError};
    use crate::model::book::BOOK;
    use crate::model::record::RecordState;
    use crate::model::schema::{AttributeDef, AttributeValue, EntitySchema, Schema};
    use crate::store::sqlite::SqliteRecordStore;
    use std::sync::Arc;

    static NOTE: EntitySchema = EntitySchema {
        name: "Note",
        attributes: &[AttributeDef::text("body")],
    };

    fn context() -> Context<SqliteRecordStore> {
        let store = Arc::new(SqliteRecordStore::open_in_memory().unwrap());
        Context::open(store, Schema::bookworm()).unwrap()
    }

    #[test]
    fn create_rejects_entities_missing_from_schema() {
        let mut context = context();
        let err = context.create(&NOTE).unwrap_err();
        assert!(matches!(err, ContextError::UnknownEntity("Note")));
        assert!(context.schema().entity("Note").is_none());
        assert!(!context.has_changes());
    }

    #[test]
    fn mutate_with_equal_value_keeps_state() {
        let mut context = context();
        let id = context.create(&BOOK).unwrap();
        context.mutate(id, "rating", AttributeValue::Integer(0)).unwrap();
        assert_eq!(context.state(id), Some(RecordState::Inserted));
    }

    #[test]
    fn mutate_rejects_staged_deletion() {
        let mut context = context();
        let id = context.create(&BOOK).unwrap();
        context.mutate(id, "title", AttributeValue::text("Kept")).unwrap();
        context.save().unwrap();
        context.delete(id).unwrap();

        let err = context
            .mutate(id, "title", AttributeValue::text("Late"))
            .unwrap_err();
        assert!(matches!(err, ContextError::UnknownRecord(found) if found == id));
        assert_eq!(context.state(id), Some(RecordState::Deleted));
    }

    #[test]
    fn sequence_continues_after_reload() {
        let store = Arc::new(SqliteRecordStore::open_in_memory().unwrap());
        let mut first = Context::open(store.clone(), Schema::bookworm()).unwrap();
        let id = first.create(&BOOK).unwrap();
        first.mutate(id, "title", AttributeValue::text("A")).unwrap();
        first.mutate(id, "author", AttributeValue::text("B")).unwrap();
        first.save().unwrap();

        let mut second = Context::open(store, Schema::bookworm()).unwrap();
        let next = second.create(&BOOK).unwrap();
        assert!(second.record(next).unwrap().seq() > second.record(id).unwrap().seq());
    }
}
