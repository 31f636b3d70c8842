//! Schema Forge
//!
//! Runtime-defined entity schemas that keep a physical table in step with
//! their published definition.
//!
//! ## Features
//!
//! - **Stable field ids**: fields are matched across edits by id, so renames are
//!   real renames and never a drop plus an add
//! - **Ordered change lists**: a pure detector diffs a draft against the
//!   published document
//! - **Atomic migrations**: each publish applies one idempotent migration unit
//!   inside one transaction
//! - **Draft / publish lifecycle**: with append-only history and a read cache
//!
//! ## Flow
//!
//! ```text
//! DraftRequest ─assemble─> SchemaDocument (DRAFT)
//!                               │ publish
//!                               ▼
//!            detect_changes(draft, published) -> [Change]
//!                               │
//!                               ▼
//!            ChangeExecutor -> MigrationUnit -> RelationalStore (1 tx)
//!                               │
//!                               ▼
//!            promote / merge -> HistoryEntry -> cache invalidation
//! ```

pub mod assembler;
pub mod cache;
pub mod change;
pub mod checksum;
pub mod config;
pub mod detector;
pub mod document;
pub mod error;
pub mod executor;
pub mod migration;
pub mod service;
pub mod sqlite;
pub mod store;
pub mod types;

pub use assembler::{assemble, extract_fields, DraftRequest, EntityDescriptor, FieldDescriptor, IndexDescriptor};
pub use cache::SchemaCache;
pub use change::Change;
pub use checksum::Checksum;
pub use config::ForgeConfig;
pub use detector::ChangeDetector;
pub use document::{FieldDef, FieldId, IndexDef, SchemaDocument};
pub use error::{Result, SchemaError};
pub use executor::{ApplyOutcome, ChangeExecutor, RelationalStore};
pub use migration::{MigrationPrimitive, MigrationUnit};
pub use service::{PublishOutcome, PublishPreview, SchemaService};
pub use store::{DocumentStore, HistoryEntry, RecordFilter, SchemaRecord, SchemaStatus};
pub use types::{LogicalType, TypeResolver};
