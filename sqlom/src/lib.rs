//! Declarative entity metadata and type coercion for relational rows.
//!
//! Entities are plain structs annotated with `#[derive(SqlomEntity)]` and
//! `#[sqlom(...)]` attributes. The derive emits a metadata table describing
//! every member (storage column, declared kind, filters, codec, validation
//! rules, scenes) plus a field enum for symbolic column references. The
//! runtime caches that table per process, coerces values across the storage
//! boundary in both directions, hydrates [`Record`]s from raw rows, and
//! builds structured statements for an [`SqlExecutor`].

pub mod coerce;
pub mod errors;
pub mod filters;
pub mod handle;
pub mod query;
pub mod record;
pub mod registry;
pub mod runtime;
pub mod types;
pub mod validation;

pub use errors::{OrmError, ValidationError, ValidationIssue, ValidationResult};
pub use handle::{FieldHandle, HandleValue};
pub use query::{ChangeEvent, ChangeKind, Query};
pub use record::Record;
pub use registry::{descriptor_named, metadata_for, register_descriptor, relation_target};
pub use runtime::{
    Aggregate, AggregateFn, BindValue, CmpOp, Condition, DeleteStatement, InsertStatement, Join,
    JoinKind, MemoryExecutor, Row, SelectStatement, SortOrder, SqlExecutor, SqlValue,
    UpdateStatement, WriteOutcome, WriteValue,
};
pub use types::{
    ArrayEncoding, AutoRole, ColumnType, Entity, EntityDescriptor, EntityField, ExportDescriptor,
    FieldCodec, FieldFormat, FieldKind, FilterFn, PropertyMetadata, RelationDescriptor,
    RelationKind, SceneDescriptor, ValidationDescriptor, ValidationRule,
};

pub use sqlom_macros::SqlomEntity;
