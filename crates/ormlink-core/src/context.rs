//! The persistence context seen by mappings and relationships.
//!
//! A context owns everything that outlives a single deserialize call: the
//! catalog, the per-object lazy-fetch flags, the operation bracket, and the
//! path to the connection. The session crate provides the real
//! implementation.

use crate::catalog::Catalog;
use crate::error::Result;
use crate::object::{ObjectId, ObjectRef};
use crate::row::Row;
use crate::statement::Statement;
use std::sync::Arc;

pub trait PersistenceContext {
    /// Mapping metadata shared by every object in this context.
    fn catalog(&self) -> Arc<Catalog>;

    /// Open a deserialize bracket for `entity`. Brackets nest.
    fn begin_operation(&mut self, entity: &str);

    /// Close the innermost bracket. Called on every exit path.
    fn complete_operation(&mut self, entity: &str);

    /// Has `attribute` of `object` already been fetched in this context?
    fn has_lazy_fetch_flag(&self, object: ObjectId, attribute: &str) -> bool;

    /// Record that `attribute` of `object` has been fetched.
    fn set_lazy_fetch_flag(&mut self, object: ObjectId, attribute: &str);

    /// Register a freshly built object. Returns the instance callers should
    /// use, which is an existing one when the context already holds an
    /// object with the same identity.
    fn attach(&mut self, object: ObjectRef) -> ObjectRef;

    /// Forget an object whose construction failed.
    fn detach(&mut self, object: &ObjectRef);

    /// Run a query through the connection.
    #[allow(clippy::result_large_err)]
    fn select(&mut self, statement: &Statement) -> Result<Vec<Row>>;

    /// Materialise a row of `class` into an object.
    #[allow(clippy::result_large_err)]
    fn load(&mut self, class: &str, row: &Row) -> Result<ObjectRef>;
}
