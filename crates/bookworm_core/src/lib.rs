//! Persistence core for Bookworm.
//! Owns records, staged changes, live views and atomic saves.

pub mod config;
pub mod context;
pub mod db;
pub mod logging;
pub mod model;
pub mod store;
pub mod view;

pub use config::{ConfigError, StoreConfig};
pub use context::{
    Context, ContextError, ContextResult, PendingSave, SaveError, SaveOutcome, SaveSummary,
    ValidationIssue, ValidationProblem,
};
pub use logging::{init_logging, logging_status, LogLevel};
pub use model::book::{BOOK, GENRES, MAX_RATING, STUDENT};
pub use model::record::{Record, RecordId, RecordSnapshot, RecordState};
pub use model::schema::{
    AttributeDef, AttributeError, AttributeKind, AttributeValue, Constraint, EntitySchema, Schema,
};
pub use store::sqlite::SqliteRecordStore;
pub use store::{ChangeBatch, RecordStore, StoreError, StoreResult};
pub use view::{
    Predicate, SortKey, SortOrder, ViewChange, ViewDefinition, ViewEvent, ViewHandle, ViewId,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
