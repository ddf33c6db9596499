//! Identity map holding every loaded or staged record of one context.
//!
//! # Invariants
//! - Ids are unique across all states.
//! - `Deleted` entries stay in the map until a save purges them, but are
//!   invisible through `RecordLookup`.
//! - Entries loaded from storage keep their durable copy while staged, so
//!   staged changes can be discarded.

use crate::model::record::{Record, RecordId, RecordState};
use crate::view::RecordLookup;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub(crate) record: Record,
    pub(crate) state: RecordState,
    /// Last durable copy; `None` for records never saved.
    baseline: Option<Record>,
}

#[derive(Debug, Default)]
pub(crate) struct IdentityMap {
    entries: HashMap<RecordId, Entry>,
}

impl IdentityMap {
    pub(crate) fn insert_clean(&mut self, record: Record) {
        self.entries.insert(
            record.id(),
            Entry {
                baseline: Some(record.clone()),
                record,
                state: RecordState::Clean,
            },
        );
    }

    pub(crate) fn insert_new(&mut self, record: Record) {
        self.entries.insert(
            record.id(),
            Entry {
                record,
                state: RecordState::Inserted,
                baseline: None,
            },
        );
    }

    pub(crate) fn get(&self, id: &RecordId) -> Option<&Entry> {
        self.entries.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &RecordId) -> Option<&mut Entry> {
        self.entries.get_mut(id)
    }

    pub(crate) fn remove(&mut self, id: &RecordId) -> Option<Entry> {
        self.entries.remove(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries ordered by insertion sequence.
    pub(crate) fn ordered(&self) -> Vec<&Entry> {
        let mut entries: Vec<&Entry> = self.entries.values().collect();
        entries.sort_by_key(|entry| (entry.record.seq(), entry.record.id()));
        entries
    }

    /// Staged entries ordered by insertion sequence.
    pub(crate) fn staged(&self) -> Vec<&Entry> {
        let mut entries = self.ordered();
        entries.retain(|entry| entry.state.is_staged());
        entries
    }

    pub(crate) fn has_staged(&self) -> bool {
        self.entries.values().any(|entry| entry.state.is_staged())
    }

    /// Collapses a committed record into the durable baseline.
    pub(crate) fn mark_clean(&mut self, id: &RecordId) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.state = RecordState::Clean;
            entry.baseline = Some(entry.record.clone());
        }
    }

    /// Reverts every staged entry to its durable baseline.
    ///
    /// Returns the number of entries touched.
    pub(crate) fn discard_staged(&mut self) -> usize {
        let before = self.entries.len();
        let mut reverted = 0;
        self.entries.retain(|_, entry| match (entry.state, entry.baseline.take()) {
            (RecordState::Clean, baseline) => {
                entry.baseline = baseline;
                true
            }
            (_, Some(baseline)) => {
                entry.record = baseline.clone();
                entry.baseline = Some(baseline);
                entry.state = RecordState::Clean;
                reverted += 1;
                true
            }
            (_, None) => false,
        });
        reverted + (before - self.entries.len())
    }
}

impl RecordLookup for IdentityMap {
    fn live_record(&self, id: &RecordId) -> Option<&Record> {
        self.entries
            .get(id)
            .filter(|entry| entry.state != RecordState::Deleted)
            .map(|entry| &entry.record)
    }

    fn live_records(&self) -> Box<dyn Iterator<Item = &Record> + '_> {
        Box::new(
            self.entries
                .values()
                .filter(|entry| entry.state != RecordState::Deleted)
                .map(|entry| &entry.record),
        )
    }
}
