//! View definitions: filter predicates, sort keys and record ordering.
//!
//! # Invariants
//! - Ordering is total: sort keys left to right, then insertion sequence,
//!   then id.
//! - Null/empty values sort first ascending and last descending.
//! - Text compares ordinally unless the attribute is declared case-insensitive.

use crate::model::record::Record;
use crate::model::schema::{AttributeError, AttributeValue, EntitySchema};
use std::cmp::Ordering;
use std::fmt::{Debug, Formatter};
use std::rc::Rc;

/// Direction of one sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// One `(attribute, direction)` sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub attribute: String,
    pub order: SortOrder,
}

impl SortKey {
    pub fn ascending(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            order: SortOrder::Ascending,
        }
    }

    pub fn descending(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            order: SortOrder::Descending,
        }
    }
}

/// Membership filter evaluated against a record.
#[derive(Clone)]
pub enum Predicate {
    /// Attribute equals the value exactly.
    Equals(String, AttributeValue),
    /// Text attribute contains `needle`.
    Contains {
        attribute: String,
        needle: String,
        case_insensitive: bool,
    },
    /// Attribute is null or empty text.
    IsEmpty(String),
    Not(Box<Predicate>),
    /// Every inner predicate matches. Empty list matches everything.
    All(Vec<Predicate>),
    /// At least one inner predicate matches.
    Any(Vec<Predicate>),
    /// Caller-supplied closure.
    Custom(Rc<dyn Fn(&Record) -> bool>),
}

impl Predicate {
    pub fn equals(attribute: impl Into<String>, value: AttributeValue) -> Self {
        Self::Equals(attribute.into(), value)
    }

    pub fn contains(attribute: impl Into<String>, needle: impl Into<String>) -> Self {
        Self::Contains {
            attribute: attribute.into(),
            needle: needle.into(),
            case_insensitive: true,
        }
    }

    pub fn custom(predicate: impl Fn(&Record) -> bool + 'static) -> Self {
        Self::Custom(Rc::new(predicate))
    }

    /// Returns whether `record` satisfies this predicate.
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Self::Equals(attribute, value) => record.get(attribute) == Some(value),
            Self::Contains {
                attribute,
                needle,
                case_insensitive,
            } => match record.get(attribute).and_then(AttributeValue::as_text) {
                Some(text) if *case_insensitive => {
                    text.to_lowercase().contains(&needle.to_lowercase())
                }
                Some(text) => text.contains(needle.as_str()),
                None => false,
            },
            Self::IsEmpty(attribute) => {
                record.get(attribute).map_or(true, AttributeValue::is_empty)
            }
            Self::Not(inner) => !inner.matches(record),
            Self::All(inner) => inner.iter().all(|predicate| predicate.matches(record)),
            Self::Any(inner) => inner.iter().any(|predicate| predicate.matches(record)),
            Self::Custom(predicate) => predicate(record),
        }
    }

    /// Checks every referenced attribute exists on `entity`.
    pub fn check(&self, entity: &EntitySchema) -> Result<(), AttributeError> {
        match self {
            Self::Equals(attribute, value) => entity.check_value(attribute, value).map(|_| ()),
            Self::Contains { attribute, .. } | Self::IsEmpty(attribute) => {
                entity.attribute(attribute).map(|_| ())
            }
            Self::Not(inner) => inner.check(entity),
            Self::All(inner) | Self::Any(inner) => {
                inner.iter().try_for_each(|predicate| predicate.check(entity))
            }
            Self::Custom(_) => Ok(()),
        }
    }
}

impl Debug for Predicate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Equals(attribute, value) => {
                f.debug_tuple("Equals").field(attribute).field(value).finish()
            }
            Self::Contains {
                attribute,
                needle,
                case_insensitive,
            } => f
                .debug_struct("Contains")
                .field("attribute", attribute)
                .field("needle", needle)
                .field("case_insensitive", case_insensitive)
                .finish(),
            Self::IsEmpty(attribute) => f.debug_tuple("IsEmpty").field(attribute).finish(),
            Self::Not(inner) => f.debug_tuple("Not").field(inner).finish(),
            Self::All(inner) => f.debug_tuple("All").field(inner).finish(),
            Self::Any(inner) => f.debug_tuple("Any").field(inner).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Caller request for one live view.
#[derive(Debug, Clone)]
pub struct ViewDefinition {
    pub entity: &'static EntitySchema,
    pub filter: Option<Predicate>,
    pub sort_keys: Vec<SortKey>,
}

impl ViewDefinition {
    /// Unfiltered, insertion-ordered view over `entity`.
    pub fn new(entity: &'static EntitySchema) -> Self {
        Self {
            entity,
            filter: None,
            sort_keys: Vec::new(),
        }
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filter = Some(predicate);
        self
    }

    pub fn sort_by(mut self, key: SortKey) -> Self {
        self.sort_keys.push(key);
        self
    }

    /// Resolves attribute names against the entity schema.
    pub(crate) fn compile(&self) -> Result<CompiledQuery, AttributeError> {
        if let Some(filter) = &self.filter {
            filter.check(self.entity)?;
        }
        let keys = self
            .sort_keys
            .iter()
            .map(|key| {
                let (index, def) = self.entity.attribute(&key.attribute)?;
                Ok::<_, AttributeError>(CompiledKey {
                    index,
                    descending: key.order == SortOrder::Descending,
                    case_insensitive: def.case_insensitive,
                })
            })
            .collect::<Result<Vec<_>, AttributeError>>()?;

        Ok(CompiledQuery {
            entity: self.entity,
            filter: self.filter.clone(),
            keys,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct CompiledKey {
    index: usize,
    descending: bool,
    case_insensitive: bool,
}

/// View definition with attribute names resolved to schema positions.
#[derive(Debug, Clone)]
pub(crate) struct CompiledQuery {
    entity: &'static EntitySchema,
    filter: Option<Predicate>,
    keys: Vec<CompiledKey>,
}

impl CompiledQuery {
    pub(crate) fn entity_name(&self) -> &'static str {
        self.entity.name
    }

    /// Returns whether `record` belongs in the view.
    pub(crate) fn admits(&self, record: &Record) -> bool {
        record.entity().name == self.entity.name
            && self
                .filter
                .as_ref()
                .map_or(true, |filter| filter.matches(record))
    }

    /// Total order used for view positions.
    pub(crate) fn compare(&self, left: &Record, right: &Record) -> Ordering {
        for key in &self.keys {
            let ordering = compare_values(
                left.value_at(key.index),
                right.value_at(key.index),
                key.case_insensitive,
            );
            let ordering = if key.descending {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        left.seq()
            .cmp(&right.seq())
            .then_with(|| left.id().cmp(&right.id()))
    }
}

/// Compares two attribute values with empty values first.
pub fn compare_values(
    left: &AttributeValue,
    right: &AttributeValue,
    case_insensitive: bool,
) -> Ordering {
    match (left.is_empty(), right.is_empty()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        (false, false) => {}
    }

    match (left, right) {
        (AttributeValue::Text(left), AttributeValue::Text(right)) if case_insensitive => {
            left.to_lowercase().cmp(&right.to_lowercase())
        }
        (AttributeValue::Text(left), AttributeValue::Text(right)) => left.cmp(right),
        (AttributeValue::Integer(left), AttributeValue::Integer(right))
        | (AttributeValue::Date(left), AttributeValue::Date(right)) => left.cmp(right),
        (AttributeValue::Reference(left), AttributeValue::Reference(right)) => left.cmp(right),
        (left, right) => kind_rank(left).cmp(&kind_rank(right)),
    }
}

fn kind_rank(value: &AttributeValue) -> u8 {
    match value {
        AttributeValue::Null => 0,
        AttributeValue::Text(_) => 1,
        AttributeValue::Integer(_) => 2,
        AttributeValue::Date(_) => 3,
        AttributeValue::Reference(_) => 4,
    }
}
