//! Record domain model.
//!
//! # Responsibility
//! - Define the canonical record held by the context identity map.
//! - Provide read-only snapshots handed to callers and views.
//!
//! # Invariants
//! - `id` is stable, non-nil and never reused for another record.
//! - `values` always has one entry per declared attribute, in schema order.
//! - Equality is identity: two records are equal when their ids match.

use crate::model::schema::{AttributeError, AttributeValue, EntitySchema};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier of one record.
pub type RecordId = Uuid;

/// Staging state of a record inside a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    /// Matches durable storage.
    Clean,
    /// New, not yet saved.
    Inserted,
    /// Changed since the last save.
    Modified,
    /// Marked for removal; purged by the next successful save.
    Deleted,
}

impl RecordState {
    /// Returns whether the record has pending changes.
    pub fn is_staged(self) -> bool {
        !matches!(self, Self::Clean)
    }
}

/// Rejected record identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NilRecordId;

impl Display for NilRecordId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "record id must not be nil")
    }
}

impl Error for NilRecordId {}

/// In-memory record with typed attribute values.
#[derive(Debug, Clone)]
pub struct Record {
    id: RecordId,
    entity: &'static EntitySchema,
    seq: u64,
    values: Vec<AttributeValue>,
}

impl Record {
    /// Creates a record with a generated id and every attribute set to its
    /// empty sentinel.
    ///
    /// `seq` is the insertion order used to break sort ties.
    pub fn new(entity: &'static EntitySchema, seq: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity,
            seq,
            values: entity
                .attributes
                .iter()
                .map(|def| def.kind.empty_value())
                .collect(),
        }
    }

    /// Creates an empty record with a caller-provided id.
    ///
    /// Used by load paths where identity already exists in storage.
    pub fn with_id(
        id: RecordId,
        entity: &'static EntitySchema,
        seq: u64,
    ) -> Result<Self, NilRecordId> {
        if id.is_nil() {
            return Err(NilRecordId);
        }
        let mut record = Self::new(entity, seq);
        record.id = id;
        Ok(record)
    }

    pub fn id(&self) -> RecordId {
        self.id
    }

    pub fn entity(&self) -> &'static EntitySchema {
        self.entity
    }

    /// Insertion order within the owning store.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Returns the value of `attribute`, or `None` when it is not declared.
    pub fn get(&self, attribute: &str) -> Option<&AttributeValue> {
        self.entity
            .index_of(attribute)
            .map(|index| &self.values[index])
    }

    /// Returns the value at a schema position.
    pub fn value_at(&self, index: usize) -> &AttributeValue {
        &self.values[index]
    }

    /// Sets one attribute after checking it against the schema.
    ///
    /// Returns whether the stored value changed.
    pub fn set(&mut self, attribute: &str, value: AttributeValue) -> Result<bool, AttributeError> {
        let index = self.entity.check_value(attribute, &value)?;
        if self.values[index] == value {
            return Ok(false);
        }
        self.values[index] = value;
        Ok(true)
    }

    /// Iterates `(attribute name, value)` pairs in schema order.
    pub fn attributes(&self) -> impl Iterator<Item = (&'static str, &AttributeValue)> + '_ {
        self.entity
            .attributes
            .iter()
            .map(|def| def.name)
            .zip(self.values.iter())
    }

    /// Copies this record into a caller-facing snapshot.
    pub fn snapshot(&self) -> RecordSnapshot {
        RecordSnapshot {
            id: self.id,
            entity: self.entity.name.to_string(),
            attributes: self
                .attributes()
                .map(|(name, value)| (name.to_string(), value.clone()))
                .collect(),
            fallbacks: self
                .entity
                .attributes
                .iter()
                .filter_map(|def| def.fallback.map(|text| (def.name, text)))
                .collect(),
        }
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Record {}

/// Read-only copy of one record: id plus attribute values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordSnapshot {
    pub id: RecordId,
    pub entity: String,
    pub attributes: Vec<(String, AttributeValue)>,
    #[serde(skip)]
    fallbacks: Vec<(&'static str, &'static str)>,
}

impl RecordSnapshot {
    pub fn get(&self, attribute: &str) -> Option<&AttributeValue> {
        self.attributes
            .iter()
            .find(|(name, _)| name == attribute)
            .map(|(_, value)| value)
    }

    /// Returns display text for `attribute`, using the declared fallback when
    /// the value is empty.
    pub fn display(&self, attribute: &str) -> String {
        let value = self.get(attribute);
        if let Some(value) = value.filter(|value| !value.is_empty()) {
            return value.to_string();
        }
        self.fallbacks
            .iter()
            .find(|(name, _)| *name == attribute)
            .map(|(_, text)| (*text).to_string())
            .unwrap_or_default()
    }
}
