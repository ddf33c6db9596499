//! Live query engine.
//!
//! # Responsibility
//! - Materialize sorted, filtered record id sequences per view.
//! - Keep every live view consistent with the context after each change.
//! - Push recomputed orderings to subscribers over channels.
//!
//! # Invariants
//! - A view's ids always equal a from-scratch filter+sort over the live
//!   (non-deleted) records of its entity.
//! - Views hold record ids only; they never keep a record alive or block a delete.
//! - A view lives as long as its `ViewHandle`; released views are pruned lazily.

pub mod query;

use crate::model::record::{Record, RecordId};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::debug;
use query::CompiledQuery;
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::{Rc, Weak};

pub use query::{compare_values, Predicate, SortKey, SortOrder, ViewDefinition};

/// Read access to the live records of a context.
pub trait RecordLookup {
    /// Returns the record when present and not staged for deletion.
    fn live_record(&self, id: &RecordId) -> Option<&Record>;
    /// Iterates every live record.
    fn live_records(&self) -> Box<dyn Iterator<Item = &Record> + '_>;
}

/// Context-local view identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewId(pub u64);

/// What changed a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewChange {
    /// Record entered the view.
    Inserted(RecordId),
    /// Member record changed (position may have moved).
    Updated(RecordId),
    /// Record left the view (filtered out or deleted).
    Removed(RecordId),
    /// Staged state was committed to storage.
    Committed,
    /// View was rebuilt from scratch.
    Reset,
}

/// Recomputed ordering pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewEvent {
    pub view: ViewId,
    pub cause: ViewChange,
    pub ids: Vec<RecordId>,
}

pub(crate) struct ViewState {
    id: ViewId,
    query: CompiledQuery,
    ids: Vec<RecordId>,
    members: HashSet<RecordId>,
    subscribers: Vec<Sender<ViewEvent>>,
}

impl ViewState {
    fn new(id: ViewId, query: CompiledQuery, records: &dyn RecordLookup) -> Self {
        let mut state = Self {
            id,
            query,
            ids: Vec::new(),
            members: HashSet::new(),
            subscribers: Vec::new(),
        };
        state.rebuild(records);
        state
    }

    fn rebuild(&mut self, records: &dyn RecordLookup) {
        let mut matching: Vec<&Record> = records
            .live_records()
            .filter(|record| self.query.admits(record))
            .collect();
        matching.sort_by(|left, right| self.query.compare(left, right));
        self.ids = matching.iter().map(|record| record.id()).collect();
        self.members = self.ids.iter().copied().collect();
    }

    /// Re-positions one changed record.
    fn upsert(&mut self, record: &Record, records: &dyn RecordLookup) -> Option<ViewChange> {
        if record.entity().name != self.query.entity_name() {
            return None;
        }

        let id = record.id();
        let was_member = self.detach(id);
        if !self.query.admits(record) {
            return was_member.then_some(ViewChange::Removed(id));
        }

        let query = &self.query;
        let position = self.ids.partition_point(|other| {
            records
                .live_record(other)
                .map_or(true, |other| query.compare(other, record).is_lt())
        });
        self.ids.insert(position, id);
        self.members.insert(id);

        Some(if was_member {
            ViewChange::Updated(id)
        } else {
            ViewChange::Inserted(id)
        })
    }

    fn remove(&mut self, id: RecordId) -> Option<ViewChange> {
        self.detach(id).then_some(ViewChange::Removed(id))
    }

    fn detach(&mut self, id: RecordId) -> bool {
        if !self.members.remove(&id) {
            return false;
        }
        if let Some(position) = self.ids.iter().position(|current| *current == id) {
            self.ids.remove(position);
        }
        true
    }

    fn publish(&mut self, change: ViewChange) {
        if self.subscribers.is_empty() {
            return;
        }
        let event = ViewEvent {
            view: self.id,
            cause: change,
            ids: self.ids.clone(),
        };
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}

/// Caller-owned handle to one live view.
///
/// Dropping the last clone releases the view.
#[derive(Clone)]
pub struct ViewHandle {
    state: Rc<RefCell<ViewState>>,
}

impl ViewHandle {
    pub fn id(&self) -> ViewId {
        self.state.borrow().id
    }

    /// Current ordered record ids.
    pub fn ids(&self) -> Vec<RecordId> {
        self.state.borrow().ids.clone()
    }

    pub fn len(&self) -> usize {
        self.state.borrow().ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.borrow().ids.is_empty()
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.state.borrow().members.contains(&id)
    }

    /// Position of `id` in the current ordering.
    pub fn position(&self, id: RecordId) -> Option<usize> {
        self.state.borrow().ids.iter().position(|current| *current == id)
    }

    /// Subscribes to recomputed orderings.
    ///
    /// Dropping the receiver unsubscribes on the next change.
    pub fn subscribe(&self) -> Receiver<ViewEvent> {
        let (sender, receiver) = unbounded();
        self.state.borrow_mut().subscribers.push(sender);
        receiver
    }
}

impl std::fmt::Debug for ViewHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("ViewHandle")
            .field("id", &state.id)
            .field("entity", &state.query.entity_name())
            .field("len", &state.ids.len())
            .finish()
    }
}

/// Weak registry of the live views bound to one context.
#[derive(Default)]
pub(crate) struct ViewRegistry {
    views: Vec<Weak<RefCell<ViewState>>>,
    next_id: u64,
}

impl ViewRegistry {
    pub(crate) fn register(
        &mut self,
        query: CompiledQuery,
        records: &dyn RecordLookup,
    ) -> ViewHandle {
        self.next_id += 1;
        let id = ViewId(self.next_id);
        let state = Rc::new(RefCell::new(ViewState::new(id, query, records)));
        self.views.push(Rc::downgrade(&state));
        debug!(
            "event=view_define module=view status=ok view_id={} live_views={}",
            id.0,
            self.views.len()
        );
        ViewHandle { state }
    }

    /// Number of views whose handles are still held.
    pub(crate) fn live_count(&self) -> usize {
        self.views
            .iter()
            .filter(|view| view.strong_count() > 0)
            .count()
    }

    /// Re-positions `id` in every view after a create or mutate.
    pub(crate) fn record_changed(&mut self, id: RecordId, records: &dyn RecordLookup) {
        match records.live_record(&id) {
            Some(record) => self.for_each(|view| {
                if let Some(change) = view.upsert(record, records) {
                    view.publish(change);
                }
            }),
            None => self.record_removed(id),
        }
    }

    /// Drops `id` from every view.
    pub(crate) fn record_removed(&mut self, id: RecordId) {
        self.for_each(|view| {
            if let Some(change) = view.remove(id) {
                view.publish(change);
            }
        });
    }

    pub(crate) fn rebuild_all(&mut self, records: &dyn RecordLookup) {
        self.for_each(|view| {
            view.rebuild(records);
            view.publish(ViewChange::Reset);
        });
    }

    pub(crate) fn committed(&mut self) {
        self.for_each(|view| view.publish(ViewChange::Committed));
    }

    fn for_each(&mut self, mut apply: impl FnMut(&mut ViewState)) {
        self.views.retain(|view| match view.upgrade() {
            Some(state) => {
                apply(&mut *state.borrow_mut());
                true
            }
            None => false,
        });
    }
}
