//! Save coordinator: validation and atomic commit of staged changes.
//!
//! # Responsibility
//! - Validate staged records before anything is written.
//! - Commit inserts, updates and deletions as one storage transaction.
//! - Collapse staged state into the durable baseline only after success.
//!
//! # Invariants
//! - All-or-nothing: a failed save leaves storage and the context unchanged.
//! - The context rejects mutations while a save ticket holds its lock.
//! - Dropping a `PendingSave` or `SaveOutcome` unfinished releases the lock.
//! - A save with no staged changes is a no-op success.
//! - Once `PendingSave::run` starts there is no cancellation.

use super::Context;
use crate::model::record::{RecordId, RecordState};
use crate::model::schema::AttributeKind;
use crate::store::{ChangeBatch, RecordStore, StoreError, StoreResult};
use crate::view::RecordLookup;
use log::{error, info, warn};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Errors returned by `save`, `begin_save` and `finish_save`.
#[derive(Debug)]
pub enum SaveError {
    /// A staged record failed pre-save validation; nothing was written.
    ValidationFailed {
        record_id: RecordId,
        attribute: String,
    },
    /// The storage transaction failed and was rolled back.
    StorageFailure(StoreError),
    /// Storage no longer holds a record the batch updates or deletes.
    UnknownRecord(RecordId),
    /// Another save has not been finished yet.
    SaveInProgress,
    /// Outcome does not belong to the save in flight on this context.
    ///
    /// The outcome is handed back so it can reach the context that owns it.
    UnknownSave(Box<SaveOutcome>),
}

impl Display for SaveError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ValidationFailed {
                record_id,
                attribute,
            } => write!(f, "validation failed for record {record_id} attribute `{attribute}`"),
            Self::StorageFailure(err) => write!(f, "storage failure: {err}"),
            Self::UnknownRecord(id) => write!(f, "record missing from storage: {id}"),
            Self::SaveInProgress => write!(f, "a save is in progress"),
            Self::UnknownSave(_) => {
                write!(f, "save outcome does not match the save in flight")
            }
        }
    }
}

impl Error for SaveError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::StorageFailure(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for SaveError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(id) => Self::UnknownRecord(id),
            other => Self::StorageFailure(other),
        }
    }
}

impl From<ValidationIssue> for SaveError {
    fn from(value: ValidationIssue) -> Self {
        Self::ValidationFailed {
            record_id: value.record_id,
            attribute: value.attribute.to_string(),
        }
    }
}

/// Why a staged record cannot be saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationProblem {
    /// Required attribute is null or blank after trimming.
    MissingRequired,
    /// Reference does not resolve to a live record.
    DanglingReference(RecordId),
    /// Reference resolves to a record of another entity.
    WrongEntity(RecordId),
}

/// One pre-save validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationIssue {
    pub record_id: RecordId,
    pub attribute: &'static str,
    pub problem: ValidationProblem,
}

/// Ids written by one successful save.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveSummary {
    pub inserted: Vec<RecordId>,
    pub updated: Vec<RecordId>,
    pub deleted: Vec<RecordId>,
}

impl SaveSummary {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn total(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.deleted.len()
    }
}

/// Claim on a context save lock; the lock holds the claiming save id, `0` when idle.
///
/// Dropping the ticket releases the lock unless another save claimed it since.
#[derive(Debug)]
struct SaveTicket {
    lock: Arc<AtomicU64>,
    save_id: u64,
}

impl SaveTicket {
    fn holds(&self, lock: &Arc<AtomicU64>) -> bool {
        Arc::ptr_eq(&self.lock, lock) && lock.load(Ordering::Acquire) == self.save_id
    }
}

impl Drop for SaveTicket {
    fn drop(&mut self) {
        let _ = self
            .lock
            .compare_exchange(self.save_id, 0, Ordering::AcqRel, Ordering::Acquire);
    }
}

/// Validated, frozen change batch ready to be written, possibly on another thread.
///
/// Dropping it without calling `run` unlocks the context; staged state is kept.
#[must_use = "a pending save keeps its context locked until run or dropped"]
pub struct PendingSave<S: RecordStore> {
    context_id: u64,
    ticket: SaveTicket,
    batch: ChangeBatch,
    store: Arc<S>,
}

impl<S: RecordStore> PendingSave<S> {
    pub fn batch(&self) -> &ChangeBatch {
        &self.batch
    }

    /// Runs the storage transaction to completion or failure.
    ///
    /// A panic inside the store unwinds through here and unlocks the context.
    pub fn run(self) -> SaveOutcome {
        let Self {
            context_id,
            ticket,
            batch,
            store,
        } = self;
        let result = if batch.is_empty() {
            Ok(())
        } else {
            store.commit(&batch)
        };
        SaveOutcome {
            context_id,
            ticket,
            batch,
            result,
        }
    }
}

/// Result of `PendingSave::run`, handed back to `Context::finish_save`.
///
/// Dropping it unfinished unlocks the context without collapsing staged state.
#[must_use = "staged state is only collapsed once the outcome is finished"]
#[derive(Debug)]
pub struct SaveOutcome {
    context_id: u64,
    ticket: SaveTicket,
    batch: ChangeBatch,
    result: StoreResult<()>,
}

impl SaveOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

impl<S: RecordStore> Context<S> {
    /// Checks every staged record without saving.
    ///
    /// Issues are ordered by record insertion order, then attribute order.
    pub fn validate(&self) -> Vec<ValidationIssue> {
        let deleted: HashSet<RecordId> = self
            .records
            .staged()
            .into_iter()
            .filter(|entry| entry.state == RecordState::Deleted)
            .map(|entry| entry.record.id())
            .collect();

        let mut issues = Vec::new();
        for entry in self.records.ordered() {
            let record = &entry.record;
            let fully_checked =
                matches!(entry.state, RecordState::Inserted | RecordState::Modified);
            if entry.state == RecordState::Deleted || (!fully_checked && deleted.is_empty()) {
                continue;
            }

            for (index, def) in record.entity().attributes.iter().enumerate() {
                let value = record.value_at(index);
                if fully_checked && def.required && value.is_blank() {
                    issues.push(ValidationIssue {
                        record_id: record.id(),
                        attribute: def.name,
                        problem: ValidationProblem::MissingRequired,
                    });
                    continue;
                }

                let (AttributeKind::Reference(target_entity), Some(target_id)) =
                    (def.kind, value.as_reference())
                else {
                    continue;
                };
                let problem = match self.records.live_record(&target_id) {
                    None if fully_checked || deleted.contains(&target_id) => {
                        Some(ValidationProblem::DanglingReference(target_id))
                    }
                    Some(target) if fully_checked && target.entity().name != target_entity => {
                        Some(ValidationProblem::WrongEntity(target_id))
                    }
                    _ => None,
                };
                if let Some(problem) = problem {
                    issues.push(ValidationIssue {
                        record_id: record.id(),
                        attribute: def.name,
                        problem,
                    });
                }
            }
        }
        issues
    }

    /// Validates, commits and collapses staged changes in one call.
    pub fn save(&mut self) -> Result<SaveSummary, SaveError> {
        if self.is_saving() {
            return Err(SaveError::SaveInProgress);
        }
        if !self.has_changes() {
            info!(
                "event=save module=save status=ok context_id={} changes=0",
                self.id
            );
            return Ok(SaveSummary::default());
        }

        let pending = self.begin_save()?;
        let outcome = pending.run();
        self.finish_save(outcome)
    }

    /// Validates staged changes, freezes them into a batch and locks the context.
    ///
    /// The returned `PendingSave` may run on a worker thread; its outcome
    /// is passed to `finish_save` to collapse staged state.
    pub fn begin_save(&mut self) -> Result<PendingSave<S>, SaveError> {
        if self.is_saving() {
            return Err(SaveError::SaveInProgress);
        }

        if let Some(issue) = self.validate().into_iter().next() {
            warn!(
                "event=save module=save status=rejected context_id={} record_id={} attribute={} problem={:?}",
                self.id, issue.record_id, issue.attribute, issue.problem
            );
            return Err(issue.into());
        }

        let mut batch = ChangeBatch::default();
        for entry in self.records.staged() {
            match entry.state {
                RecordState::Inserted => batch.inserts.push(entry.record.clone()),
                RecordState::Modified => batch.updates.push(entry.record.clone()),
                RecordState::Deleted => batch.deletes.push(entry.record.id()),
                RecordState::Clean => {}
            }
        }

        self.next_save_id += 1;
        let save_id = self.next_save_id;
        self.save_lock.store(save_id, Ordering::Release);
        info!(
            "event=save module=save status=start context_id={} save_id={} changes={}",
            self.id,
            save_id,
            batch.len()
        );

        Ok(PendingSave {
            context_id: self.id,
            ticket: SaveTicket {
                lock: Arc::clone(&self.save_lock),
                save_id,
            },
            batch,
            store: Arc::clone(&self.store),
        })
    }

    /// Applies a finished storage transaction and unlocks the context.
    ///
    /// On failure staged state is left untouched so the caller can retry.
    /// An outcome of another save is returned inside `UnknownSave`.
    pub fn finish_save(&mut self, outcome: SaveOutcome) -> Result<SaveSummary, SaveError> {
        if outcome.context_id != self.id || !outcome.ticket.holds(&self.save_lock) {
            warn!(
                "event=save module=save status=rejected context_id={} outcome_context_id={} save_id={}",
                self.id, outcome.context_id, outcome.ticket.save_id
            );
            return Err(SaveError::UnknownSave(Box::new(outcome)));
        }

        let started_at = Instant::now();
        let SaveOutcome { batch, result, ticket, .. } = outcome;
        drop(ticket);
        if let Err(err) = result {
            error!(
                "event=save module=save status=error context_id={} changes={} error={}",
                self.id,
                batch.len(),
                err
            );
            return Err(err.into());
        }

        let mut summary = SaveSummary::default();
        for record in &batch.inserts {
            self.records.mark_clean(&record.id());
            summary.inserted.push(record.id());
        }
        for record in &batch.updates {
            self.records.mark_clean(&record.id());
            summary.updated.push(record.id());
        }
        for id in &batch.deletes {
            self.records.remove(id);
            summary.deleted.push(*id);
        }
        if !summary.is_empty() {
            self.views.committed();
        }

        info!(
            "event=save module=save status=ok context_id={} inserted={} updated={} deleted={} duration_ms={}",
            self.id,
            summary.inserted.len(),
            summary.updated.len(),
            summary.deleted.len(),
            started_at.elapsed().as_millis()
        );
        Ok(summary)
    }

    /// Unlocks the context when the outcome of a save can no longer arrive.
    ///
    /// Staged state is kept and the aborted outcome is rejected by
    /// `finish_save` afterwards. If its storage write did complete, the next
    /// save reports the conflict as a storage failure.
    /// Returns whether a save was in flight.
    pub fn abort_save(&mut self) -> bool {
        let save_id = self.save_lock.swap(0, Ordering::AcqRel);
        if save_id != 0 {
            warn!(
                "event=save module=save status=aborted context_id={} save_id={}",
                self.id, save_id
            );
        }
        save_id != 0
    }
}

#[cfg(test)]
mod tests {
    use super::{SaveError, ValidationProblem};
    use crate::context::Context;
    use crate::model::book::BOOK;
    use crate::model::record::RecordState;
    use crate::model::schema::{AttributeDef, AttributeValue, EntitySchema, Schema};
    use crate::store::sqlite::SqliteRecordStore;
    use std::sync::Arc;

    static AUTHOR: EntitySchema = EntitySchema {
        name: "Author",
        attributes: &[AttributeDef::text("name").required()],
    };

    static CHAPTER: EntitySchema = EntitySchema {
        name: "Chapter",
        attributes: &[
            AttributeDef::text("heading"),
            AttributeDef::reference("author", "Author"),
        ],
    };

    fn context() -> Context<SqliteRecordStore> {
        let store = Arc::new(SqliteRecordStore::open_in_memory().unwrap());
        Context::open(store, Schema::new(vec![&AUTHOR, &CHAPTER, &BOOK])).unwrap()
    }

    #[test]
    fn dangling_reference_fails_validation() {
        let mut context = context();
        let author = context.create(&AUTHOR).unwrap();
        context.mutate(author, "name", AttributeValue::text("Le Guin")).unwrap();
        let chapter = context.create(&CHAPTER).unwrap();
        context
            .mutate(chapter, "author", AttributeValue::Reference(author))
            .unwrap();
        context.save().unwrap();

        context.delete(author).unwrap();
        let issues = context.validate();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].record_id, chapter);
        assert_eq!(issues[0].problem, ValidationProblem::DanglingReference(author));

        let err = context.save().unwrap_err();
        assert!(matches!(
            err,
            SaveError::ValidationFailed { record_id, ref attribute }
                if record_id == chapter && attribute == "author"
        ));
    }

    #[test]
    fn reference_to_wrong_entity_fails_validation() {
        let mut context = context();
        let book = context.create(&BOOK).unwrap();
        let chapter = context.create(&CHAPTER).unwrap();
        context
            .mutate(chapter, "author", AttributeValue::Reference(book))
            .unwrap();

        let issues = context.validate();
        assert!(issues
            .iter()
            .any(|issue| issue.problem == ValidationProblem::WrongEntity(book)));
    }

    #[test]
    fn outcome_from_other_context_is_rejected() {
        let mut first = context();
        let mut second = context();
        let a = first.create(&AUTHOR).unwrap();
        first.mutate(a, "name", AttributeValue::text("A")).unwrap();
        let b = second.create(&AUTHOR).unwrap();
        second.mutate(b, "name", AttributeValue::text("B")).unwrap();

        let pending = first.begin_save().unwrap();
        let _other = second.begin_save().unwrap();
        let outcome = match second.finish_save(pending.run()) {
            Err(SaveError::UnknownSave(outcome)) => outcome,
            other => panic!("unexpected result: {other:?}"),
        };
        assert!(first.is_saving());
        assert!(second.is_saving());

        let summary = first.finish_save(*outcome).unwrap();
        assert_eq!(summary.inserted, vec![a]);
        assert!(!first.is_saving());
    }

    #[test]
    fn dropping_pending_save_unlocks_context() {
        let mut context = context();
        let id = context.create(&AUTHOR).unwrap();
        context.mutate(id, "name", AttributeValue::text("Butler")).unwrap();

        let pending = context.begin_save().unwrap();
        assert!(context.is_saving());
        drop(pending);

        assert!(!context.is_saving());
        context.mutate(id, "name", AttributeValue::text("Octavia Butler")).unwrap();
        assert_eq!(context.save().unwrap().inserted, vec![id]);
    }

    #[test]
    fn dropping_unfinished_outcome_unlocks_context() {
        let mut context = context();
        let id = context.create(&AUTHOR).unwrap();
        context.mutate(id, "name", AttributeValue::text("Gaiman")).unwrap();

        let outcome = context.begin_save().unwrap().run();
        assert!(context.is_saving());
        drop(outcome);

        assert!(!context.is_saving());
        assert_eq!(context.state(id), Some(RecordState::Inserted));
    }

    #[test]
    fn abort_save_rejects_late_outcome() {
        let mut context = context();
        let id = context.create(&AUTHOR).unwrap();
        context.mutate(id, "name", AttributeValue::text("Jemisin")).unwrap();

        let pending = context.begin_save().unwrap();
        assert!(context.abort_save());
        assert!(!context.abort_save());
        context.mutate(id, "name", AttributeValue::text("N. K. Jemisin")).unwrap();

        let late = pending.run();
        assert!(matches!(context.finish_save(late), Err(SaveError::UnknownSave(_))));
        assert!(!context.is_saving());
        assert_eq!(context.state(id), Some(RecordState::Inserted));
    }
}
