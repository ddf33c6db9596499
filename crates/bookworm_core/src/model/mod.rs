//! Statically declared record model.
//!
//! # Responsibility
//! - Define attribute kinds, values and per-entity schemas.
//! - Define the canonical in-memory record shared by context, views and storage.
//!
//! # Invariants
//! - Every record is identified by a stable, non-nil `RecordId`.
//! - Every attribute of a record holds a defined value; absent data is the
//!   attribute's empty sentinel, never uninitialized.

pub mod book;
pub mod record;
pub mod schema;
