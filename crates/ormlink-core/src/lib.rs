//! Core types and traits for ormlink.
//!
//! This crate provides the mapping layer between domain objects and rows:
//!
//! - `EntityMapping` / `ColumnMapping` for per-class column mappings and triggers
//! - `Relationship` metadata (to-one, one-to-many, many-to-many) and its registry
//! - `Catalog`, the registry object holding every mapping of an application
//! - `Connection`, the collaborator that executes statements
//! - `PersistenceContext`, implemented by sessions to drive deserialization

pub mod catalog;
pub mod context;
pub mod error;
pub mod generator;
pub mod mapping;
pub mod metadata;
pub mod object;
pub mod registry;
pub mod relationship;
pub mod row;
pub mod statement;
pub mod value;

pub use catalog::Catalog;
pub use context::PersistenceContext;
pub use error::{
    Error, MappingError, MappingErrorKind, QueryError, QueryErrorKind, Result, TypeError,
};
pub use generator::{GeneratorConfig, SequenceGenerator, TableGenerator, ValueGenerator};
pub use mapping::{
    AttributeDescriptor, ColumnMapping, EntityMapping, TriggerEvent, TriggerFn, Triggers,
    is_identifier,
};
pub use metadata::{ColumnDef, EntityDef, MappingDocument, RelationshipDef, TriggerCallbacks};
pub use object::{LazySlot, Object, ObjectId, ObjectRef, RelatedValue, Target};
pub use registry::{Cardinality, RelationshipRegistry};
pub use relationship::{
    Cascade, FetchMethod, JoinEntity, Operation, Relationship, RelationshipKind,
};
pub use row::{FromValue, Row};
pub use statement::{Condition, Connection, Statement};
pub use value::{Value, key_signature};
