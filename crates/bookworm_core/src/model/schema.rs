//! Entity schema declarations and attribute type checks.
//!
//! # Responsibility
//! - Describe, per entity type, the ordered attribute list with kinds,
//!   defaults, constraints and display fallbacks.
//! - Check candidate values against an attribute before they reach a record.
//!
//! # Invariants
//! - Schemas are declared as `static` items and never change at runtime.
//! - `Null` is accepted for every attribute; requiredness is enforced at save.
//! - Empty text is accepted for non-required constrained text attributes.

use crate::model::record::RecordId;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Storage/type kind for one attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    Text,
    Integer,
    /// Unix epoch milliseconds.
    Date,
    /// Foreign-key-style reference to a record of the named entity.
    Reference(&'static str),
}

impl AttributeKind {
    /// Stable lowercase label used in error messages and logs.
    pub fn label(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Date => "date",
            Self::Reference(_) => "reference",
        }
    }

    /// Empty sentinel used to initialize fresh records.
    pub fn empty_value(self) -> AttributeValue {
        match self {
            Self::Text => AttributeValue::Text(String::new()),
            Self::Integer => AttributeValue::Integer(0),
            Self::Date | Self::Reference(_) => AttributeValue::Null,
        }
    }
}

/// One attribute value.
///
/// Serialized as `{"kind": "...", "value": ...}` so persisted rows can be
/// checked against the schema on load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AttributeValue {
    Null,
    Text(String),
    Integer(i64),
    Date(i64),
    Reference(RecordId),
}

impl AttributeValue {
    /// Convenience constructor for text values.
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    /// Returns whether this value counts as missing for sorting purposes.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(value) => value.is_empty(),
            _ => false,
        }
    }

    /// Returns whether this value counts as missing for required checks.
    ///
    /// Text is trimmed before the check.
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(value) => value.trim().is_empty(),
            _ => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<RecordId> {
        match self {
            Self::Reference(id) => Some(*id),
            _ => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Text(_) => "text",
            Self::Integer(_) => "integer",
            Self::Date(_) => "date",
            Self::Reference(_) => "reference",
        }
    }

    fn matches(&self, kind: AttributeKind) -> bool {
        matches!(
            (self, kind),
            (Self::Null, _)
                | (Self::Text(_), AttributeKind::Text)
                | (Self::Integer(_), AttributeKind::Integer)
                | (Self::Date(_), AttributeKind::Date)
                | (Self::Reference(_), AttributeKind::Reference(_))
        )
    }
}

impl Display for AttributeValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Text(value) => write!(f, "{value}"),
            Self::Integer(value) | Self::Date(value) => write!(f, "{value}"),
            Self::Reference(id) => write!(f, "{id}"),
        }
    }
}

/// Value constraint beyond the attribute kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    /// Inclusive integer range.
    Range { min: i64, max: i64 },
    /// Text must be one of the listed choices.
    OneOf(&'static [&'static str]),
}

/// Declaration of one attribute on an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeDef {
    pub name: &'static str,
    pub kind: AttributeKind,
    /// Must be non-blank at save time.
    pub required: bool,
    /// Text comparisons in views ignore ASCII and Unicode case.
    pub case_insensitive: bool,
    pub constraint: Option<Constraint>,
    /// Display text used when the stored value is empty.
    pub fallback: Option<&'static str>,
}

impl AttributeDef {
    pub const fn new(name: &'static str, kind: AttributeKind) -> Self {
        Self {
            name,
            kind,
            required: false,
            case_insensitive: false,
            constraint: None,
            fallback: None,
        }
    }

    pub const fn text(name: &'static str) -> Self {
        Self::new(name, AttributeKind::Text)
    }

    pub const fn integer(name: &'static str) -> Self {
        Self::new(name, AttributeKind::Integer)
    }

    pub const fn date(name: &'static str) -> Self {
        Self::new(name, AttributeKind::Date)
    }

    pub const fn reference(name: &'static str, entity: &'static str) -> Self {
        Self::new(name, AttributeKind::Reference(entity))
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub const fn case_insensitive(mut self) -> Self {
        self.case_insensitive = true;
        self
    }

    pub const fn range(mut self, min: i64, max: i64) -> Self {
        self.constraint = Some(Constraint::Range { min, max });
        self
    }

    pub const fn one_of(mut self, choices: &'static [&'static str]) -> Self {
        self.constraint = Some(Constraint::OneOf(choices));
        self
    }

    pub const fn fallback(mut self, text: &'static str) -> Self {
        self.fallback = Some(text);
        self
    }
}

/// Rejected attribute name or value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeError {
    /// Attribute is not declared on the entity.
    Unknown {
        entity: &'static str,
        attribute: String,
    },
    /// Value kind does not match the declared kind.
    TypeMismatch {
        entity: &'static str,
        attribute: &'static str,
        expected: &'static str,
        found: &'static str,
    },
    /// Integer outside the declared range.
    OutOfRange {
        entity: &'static str,
        attribute: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },
    /// Text not among the declared choices.
    NotAllowed {
        entity: &'static str,
        attribute: &'static str,
        value: String,
    },
}

impl AttributeError {
    /// Name of the offending attribute.
    pub fn attribute(&self) -> &str {
        match self {
            Self::Unknown { attribute, .. } => attribute.as_str(),
            Self::TypeMismatch { attribute, .. }
            | Self::OutOfRange { attribute, .. }
            | Self::NotAllowed { attribute, .. } => attribute,
        }
    }
}

impl Display for AttributeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown { entity, attribute } => {
                write!(f, "entity `{entity}` has no attribute `{attribute}`")
            }
            Self::TypeMismatch {
                entity,
                attribute,
                expected,
                found,
            } => write!(
                f,
                "attribute `{entity}.{attribute}` expects {expected}, got {found}"
            ),
            Self::OutOfRange {
                entity,
                attribute,
                value,
                min,
                max,
            } => write!(
                f,
                "attribute `{entity}.{attribute}` must be within {min}..={max}, got {value}"
            ),
            Self::NotAllowed {
                entity,
                attribute,
                value,
            } => write!(
                f,
                "attribute `{entity}.{attribute}` does not accept `{value}`"
            ),
        }
    }
}

impl Error for AttributeError {}

/// Static declaration of one entity type.
#[derive(Debug, PartialEq, Eq)]
pub struct EntitySchema {
    pub name: &'static str,
    pub attributes: &'static [AttributeDef],
}

impl EntitySchema {
    /// Position of `attribute` in the declared attribute order.
    pub fn index_of(&self, attribute: &str) -> Option<usize> {
        self.attributes.iter().position(|def| def.name == attribute)
    }

    /// Looks up one attribute declaration.
    pub fn attribute(
        &self,
        attribute: &str,
    ) -> Result<(usize, &'static AttributeDef), AttributeError> {
        let attributes: &'static [AttributeDef] = self.attributes;
        attributes
            .iter()
            .enumerate()
            .find(|(_, def)| def.name == attribute)
            .ok_or_else(|| AttributeError::Unknown {
                entity: self.name,
                attribute: attribute.to_string(),
            })
    }

    /// Checks that `value` may be stored in `attribute`.
    ///
    /// Returns the attribute position on success.
    pub fn check_value(
        &self,
        attribute: &str,
        value: &AttributeValue,
    ) -> Result<usize, AttributeError> {
        let (index, def) = self.attribute(attribute)?;
        if !value.matches(def.kind) {
            return Err(AttributeError::TypeMismatch {
                entity: self.name,
                attribute: def.name,
                expected: def.kind.label(),
                found: value.label(),
            });
        }

        match (def.constraint, value) {
            (Some(Constraint::Range { min, max }), AttributeValue::Integer(number))
                if *number < min || *number > max =>
            {
                Err(AttributeError::OutOfRange {
                    entity: self.name,
                    attribute: def.name,
                    value: *number,
                    min,
                    max,
                })
            }
            (Some(Constraint::OneOf(choices)), AttributeValue::Text(text))
                if !text.is_empty() && !choices.iter().any(|choice| *choice == text.as_str()) =>
            {
                Err(AttributeError::NotAllowed {
                    entity: self.name,
                    attribute: def.name,
                    value: text.clone(),
                })
            }
            _ => Ok(index),
        }
    }
}

/// Registry of entity schemas known to one store.
#[derive(Debug, Clone)]
pub struct Schema {
    entities: Vec<&'static EntitySchema>,
}

impl Schema {
    pub fn new(entities: Vec<&'static EntitySchema>) -> Self {
        Self { entities }
    }

    /// Schema with every Bookworm entity registered.
    pub fn bookworm() -> Self {
        Self::new(vec![&crate::model::book::BOOK, &crate::model::book::STUDENT])
    }

    pub fn entity(&self, name: &str) -> Option<&'static EntitySchema> {
        self.entities.iter().copied().find(|entity| entity.name == name)
    }

    pub fn entities(&self) -> &[&'static EntitySchema] {
        &self.entities
    }
}
