//! ormlink - relationship resolution and cascading persistence.
//!
//! ormlink maps domain objects to rows and keeps object graphs and stored
//! rows in step:
//!
//! - Per-class entity mappings with primary/unique keys, generated values
//!   and lifecycle triggers
//! - To-one, one-to-many and many-to-many relationships, fetched eagerly or
//!   on first access
//! - Cascading insert, update, delete and merge that orders statements so
//!   foreign keys are always known
//! - Declarative mapping documents in JSON
//!
//! # Quick Start
//!
//! ```ignore
//! use ormlink::prelude::*;
//!
//! let mut catalog = Catalog::new();
//! catalog.register_entity(
//!     EntityMapping::new("Dept", "dept")?
//!         .with_column("deptno", "id")?
//!         .with_column("dname", "name")?
//!         .with_primary_key(&["deptno"])?,
//! )?;
//! catalog.register_entity(
//!     EntityMapping::new("Employee", "emp")?
//!         .with_column("empno", "id")?
//!         .with_column("ename", "name")?
//!         .with_column("deptno", "dept_id")?
//!         .with_primary_key(&["empno"])?,
//! )?;
//! catalog.register_relationship(
//!     Relationship::to_one("Employee", "dept", AttributeDescriptor::new("dept").associated("Dept"))?
//!         .cascade(Cascade::All),
//! )?;
//!
//! let conn = MemoryConnection::new();
//! let mut session = Session::new(Arc::new(catalog), &conn);
//!
//! let dept = session.build("Dept", Row::new().with("id", 50).with("name", "dept50"))?;
//! let emp = session.build("Employee", Row::new().with("id", 21).with("name", "emp21"))?;
//! emp.set_one("dept", Some(dept));
//!
//! // INSERT INTO dept ..., then INSERT INTO emp ... with deptno = 50
//! session.insert(&emp)?;
//! ```

// Re-export all public types from sub-crates
pub use ormlink_core::{
    AttributeDescriptor,
    Cardinality,
    Cascade,
    Catalog,
    ColumnDef,
    ColumnMapping,
    Condition,
    // Collaborator
    Connection,
    EntityDef,
    // Mapping
    EntityMapping,
    // Errors
    Error,
    FetchMethod,
    FromValue,
    // Generators
    GeneratorConfig,
    JoinEntity,
    LazySlot,
    // Metadata documents
    MappingDocument,
    MappingError,
    MappingErrorKind,
    // Objects
    Object,
    ObjectId,
    ObjectRef,
    Operation,
    PersistenceContext,
    QueryError,
    QueryErrorKind,
    RelatedValue,
    // Relationships
    Relationship,
    RelationshipDef,
    RelationshipKind,
    RelationshipRegistry,
    Result,
    // Data
    Row,
    SequenceGenerator,
    Statement,
    TableGenerator,
    Target,
    TriggerCallbacks,
    TriggerEvent,
    TriggerFn,
    Triggers,
    TypeError,
    Value,
    ValueGenerator,
    is_identifier,
    key_signature,
};

pub use ormlink_session::{
    CascadeEngine, CascadeReport, CascadeState, IdentityMap, Session, SessionConfig,
};

pub use ormlink_memory::MemoryConnection;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use ormlink::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        AttributeDescriptor,
        Cascade,
        Catalog,
        Condition,
        Connection,
        EntityMapping,
        Error,
        FetchMethod,
        MappingDocument,
        // In-memory driver
        MemoryConnection,
        Object,
        ObjectRef,
        Operation,
        RelatedValue,
        Relationship,
        Result,
        Row,
        // Session
        Session,
        SessionConfig,
        Target,
        TriggerCallbacks,
        TriggerEvent,
        Value,
    };
    pub use std::sync::Arc;
}
