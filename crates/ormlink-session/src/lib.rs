//! Persistence context and cascade engine for ormlink.
//!
//! `ormlink-session` is the **stateful layer**. A [`Session`] wraps one
//! connection and one shared [`Catalog`] and owns everything that belongs to a
//! single persistence context:
//!
//! - **Identity map**: one in-memory object per (class, primary key).
//! - **Lazy-fetch flags**: which relationship attributes have been fetched,
//!   so a lazy attribute hits the connection at most once.
//! - **Operation brackets**: deserialization of nested objects happens inside
//!   `begin_operation` / `complete_operation` pairs.
//! - **Cascades**: insert, update, delete and merge through
//!   [`CascadeEngine`], which follows relationships whose cascade setting
//!   matches the operation.
//!
//! # Example
//!
//! ```ignore
//! let mut session = Session::new(Arc::clone(&catalog), &connection);
//!
//! let emp = session.build("Employee", Row::new().with("id", 21).with("name", "emp21"))?;
//! emp.set_one("dept", Some(dept));
//! session.insert(&emp)?;
//!
//! // Lazy relationship, fetched once
//! let staff = session.related(&dept, "employees")?;
//! ```

pub mod cascade;
pub mod identity_map;

pub use cascade::{CascadeEngine, CascadeReport, CascadeState};
pub use identity_map::IdentityMap;

use ormlink_core::{
    Catalog, Condition, Connection, LazySlot, ObjectId, ObjectRef, PersistenceContext,
    RelatedValue, Relationship, Result, Row, Statement, Target, Value,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

// ============================================================================
// Session Configuration
// ============================================================================

/// Configuration for Session behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Wrap each top-level cascade in the connection's begin/commit/rollback.
    pub atomic_cascades: bool,
    /// Maximum nesting of cascaded operations before giving up.
    pub max_cascade_depth: usize,
    /// Track loaded objects so each row maps to one instance.
    pub identity_map: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            atomic_cascades: true,
            max_cascade_depth: 32,
            identity_map: true,
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// A persistence context over one connection.
pub struct Session<C: Connection> {
    catalog: Arc<Catalog>,
    connection: C,
    config: SessionConfig,
    identity_map: IdentityMap,
    /// (object, attribute) pairs whose relationship has been fetched.
    lazy_flags: HashSet<(ObjectId, String)>,
    /// Entities whose deserialization is in progress, innermost last.
    operations: Vec<String>,
}

impl<C: Connection> std::fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("tracked", &self.identity_map.len())
            .field("lazy_flags", &self.lazy_flags.len())
            .field("operations", &self.operations)
            .finish_non_exhaustive()
    }
}

impl<C: Connection> Session<C> {
    /// Create a new session with the default configuration.
    pub fn new(catalog: Arc<Catalog>, connection: C) -> Self {
        Self::with_config(catalog, connection, SessionConfig::default())
    }

    /// Create a new session with custom configuration.
    pub fn with_config(catalog: Arc<Catalog>, connection: C, config: SessionConfig) -> Self {
        Self {
            catalog,
            connection,
            config,
            identity_map: IdentityMap::new(),
            lazy_flags: HashSet::new(),
            operations: Vec::new(),
        }
    }

    /// Get a reference to the underlying connection.
    pub fn connection(&self) -> &C {
        &self.connection
    }

    /// Get the session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn identity_map(&self) -> &IdentityMap {
        &self.identity_map
    }

    /// Entities currently being deserialized, outermost first.
    pub fn active_operations(&self) -> &[String] {
        &self.operations
    }

    /// Build a new, unsaved object of a mapped class from attribute values.
    #[allow(clippy::result_large_err)]
    pub fn build(&self, class: &str, attributes: Row) -> Result<ObjectRef> {
        let mapping = self.catalog.entity(class)?;
        let mut object = ormlink_core::Object::new(class);
        mapping.populate(&mut object, &mapping.serialize_fields(&attributes));
        Ok(ObjectRef::new(object))
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    /// Find an object by primary key. The identity map is consulted first.
    #[tracing::instrument(level = "debug", skip(self, key))]
    #[allow(clippy::result_large_err)]
    pub fn find(&mut self, class: &str, key: &[Value]) -> Result<Option<ObjectRef>> {
        if self.config.identity_map {
            if let Some(existing) = self.identity_map.get(class, key) {
                tracing::trace!("Found in identity map");
                return Ok(Some(existing));
            }
        }
        let catalog = Arc::clone(&self.catalog);
        let mapping = catalog.entity(class)?;
        let condition = Condition::from_pairs(mapping.primary_key(), key);
        let rows = self.select(&Statement::select(mapping.entity_name(), condition))?;
        match rows.first() {
            Some(row) => Ok(Some(self.load(class, row)?)),
            None => Ok(None),
        }
    }

    /// Find every object of a class matching a condition.
    #[tracing::instrument(level = "debug", skip(self, condition))]
    #[allow(clippy::result_large_err)]
    pub fn find_where(&mut self, class: &str, condition: Condition) -> Result<Vec<ObjectRef>> {
        let catalog = Arc::clone(&self.catalog);
        let mapping = catalog.entity(class)?;
        let rows = self.select(&Statement::select(mapping.entity_name(), condition))?;
        let mut objects = Vec::with_capacity(rows.len());
        for row in &rows {
            objects.push(self.load(class, row)?);
        }
        tracing::debug!(count = objects.len(), "Loaded objects");
        Ok(objects)
    }

    // ========================================================================
    // Deferred reads
    // ========================================================================

    /// Read a relationship attribute, fetching it on first access.
    ///
    /// A value this session fetched is returned without touching the
    /// connection while the session holds its lazy-fetch flag. Values
    /// fetched elsewhere (another session, or before [`Session::clear`])
    /// are loaded again. Values assigned by the caller are returned as is.
    /// A read that arrives while the same attribute is being fetched
    /// returns the current (empty) value.
    #[tracing::instrument(level = "debug", skip(self, object), fields(class = %object.class()))]
    #[allow(clippy::result_large_err)]
    pub fn related(&mut self, object: &ObjectRef, attribute: &str) -> Result<RelatedValue> {
        let relationship = self
            .catalog
            .relationships()
            .get(object.class(), attribute)?;
        let attribute = relationship.attribute();

        enum Slot {
            Current(RelatedValue),
            Stale,
            Resolving,
            Unresolved,
        }
        let slot = match object.read().slot(attribute) {
            Some(LazySlot::Assigned(value)) => Slot::Current(value.clone()),
            Some(LazySlot::Resolved(value)) if self.has_lazy_fetch_flag(object.id(), attribute) => {
                Slot::Current(value.clone())
            }
            Some(LazySlot::Resolved(_)) => Slot::Stale,
            Some(LazySlot::Resolving) => Slot::Resolving,
            Some(LazySlot::Unresolved) | None => Slot::Unresolved,
        };

        match slot {
            Slot::Current(value) => return Ok(value),
            Slot::Resolving => {
                tracing::trace!(attribute, "Re-entrant read during fetch");
                return Ok(empty_value(&relationship));
            }
            Slot::Stale => {
                tracing::trace!(attribute, "Fetched outside this session; reloading");
                object.write().invalidate(attribute);
            }
            Slot::Unresolved => {}
        }

        {
            let mut guard = object.write();
            guard.defer(attribute);
            guard.begin_resolving(attribute);
        }
        match relationship.fetch_related(object, self) {
            Ok(value) => {
                object
                    .write()
                    .fill_related(attribute.to_string(), value.clone());
                self.set_lazy_fetch_flag(object.id(), attribute);
                tracing::debug!(attribute, count = value.len(), "Lazy load complete");
                Ok(value)
            }
            Err(err) => {
                object.write().abandon_resolving(attribute);
                Err(err)
            }
        }
    }

    /// Read a to-one relationship attribute.
    #[allow(clippy::result_large_err)]
    pub fn related_one(&mut self, object: &ObjectRef, attribute: &str) -> Result<Option<ObjectRef>> {
        Ok(self.related(object, attribute)?.as_one().cloned())
    }

    /// Read a to-many relationship attribute.
    #[allow(clippy::result_large_err)]
    pub fn related_many(&mut self, object: &ObjectRef, attribute: &str) -> Result<Vec<ObjectRef>> {
        Ok(self.related(object, attribute)?.as_many().to_vec())
    }

    // ========================================================================
    // Cascading persistence
    // ========================================================================

    /// A cascade engine bound to this session.
    pub fn cascade(&mut self) -> CascadeEngine<'_, C> {
        CascadeEngine::new(self)
    }

    /// Insert an object and cascade to its relationships.
    #[allow(clippy::result_large_err)]
    pub fn insert(&mut self, object: &ObjectRef) -> Result<CascadeReport> {
        self.cascade().insert(object)
    }

    /// Update an object (optionally only some attributes) and cascade.
    #[allow(clippy::result_large_err)]
    pub fn update(&mut self, object: &ObjectRef, fields: Option<&[&str]>) -> Result<CascadeReport> {
        self.cascade().update(object, fields)
    }

    /// Delete an object and cascade to its relationships.
    #[allow(clippy::result_large_err)]
    pub fn delete(&mut self, object: &ObjectRef) -> Result<CascadeReport> {
        self.cascade().delete(object)
    }

    /// Insert or update an object, keyed by primary or unique columns.
    #[allow(clippy::result_large_err)]
    pub fn merge(&mut self, object: &ObjectRef) -> Result<CascadeReport> {
        self.cascade().merge(object)
    }

    /// Insert or update a raw dataset of a mapped class.
    #[allow(clippy::result_large_err)]
    pub fn merge_row(&mut self, class: &str, row: Row) -> Result<CascadeReport> {
        self.cascade().merge_row(class, row)
    }

    /// Make the persisted children of `parent` through relationship `name`
    /// equal exactly `children`.
    #[allow(clippy::result_large_err)]
    pub fn relationship_merge(
        &mut self,
        owner_class: &str,
        name: &str,
        parent: impl Into<Target>,
        children: Vec<Target>,
    ) -> Result<CascadeReport> {
        self.cascade()
            .relationship_merge(owner_class, name, parent.into(), children)
    }

    // ========================================================================
    // Context maintenance
    // ========================================================================

    /// Stop tracking an object and forget its fetched relationships.
    pub fn expunge(&mut self, object: &ObjectRef) {
        self.identity_map.remove(object);
        let id = object.id();
        self.lazy_flags.retain(|(obj, _)| *obj != id);
    }

    /// Forget every tracked object and lazy-fetch flag.
    pub fn clear(&mut self) {
        self.identity_map.clear();
        self.lazy_flags.clear();
    }

    /// Re-register an object under its current primary key.
    pub(crate) fn track(&mut self, object: &ObjectRef) {
        if !self.config.identity_map {
            return;
        }
        if let Ok(mapping) = self.catalog.entity(object.class()) {
            let key = mapping.primary_key_values(&object.read());
            self.identity_map.rekey(&key, object);
        }
    }

    #[allow(clippy::result_large_err)]
    pub(crate) fn execute(&mut self, statement: &Statement) -> Result<u64> {
        tracing::debug!(
            entity = %statement.entity(),
            statement = %statement,
            "Executing statement"
        );
        self.connection.execute(statement)
    }

    pub(crate) fn catalog_arc(&self) -> Arc<Catalog> {
        Arc::clone(&self.catalog)
    }
}

fn empty_value(relationship: &Relationship) -> RelatedValue {
    if relationship.is_to_one() {
        RelatedValue::One(None)
    } else {
        RelatedValue::Many(Vec::new())
    }
}

impl<C: Connection> PersistenceContext for Session<C> {
    fn catalog(&self) -> Arc<Catalog> {
        Arc::clone(&self.catalog)
    }

    fn begin_operation(&mut self, entity: &str) {
        tracing::trace!(entity, depth = self.operations.len(), "Begin operation");
        self.operations.push(entity.to_string());
    }

    fn complete_operation(&mut self, entity: &str) {
        match self.operations.pop() {
            Some(open) if open == entity => {}
            Some(open) => {
                tracing::warn!(expected = %open, completed = entity, "Unbalanced operation bracket");
            }
            None => tracing::warn!(entity, "Operation completed without a matching begin"),
        }
    }

    fn has_lazy_fetch_flag(&self, object: ObjectId, attribute: &str) -> bool {
        self.lazy_flags.contains(&(object, attribute.to_string()))
    }

    fn set_lazy_fetch_flag(&mut self, object: ObjectId, attribute: &str) {
        self.lazy_flags.insert((object, attribute.to_string()));
    }

    fn attach(&mut self, object: ObjectRef) -> ObjectRef {
        if !self.config.identity_map {
            return object;
        }
        match self.catalog.entity(object.class()) {
            Ok(mapping) => {
                let key = mapping.primary_key_values(&object.read());
                self.identity_map.insert(&key, object)
            }
            Err(_) => object,
        }
    }

    fn detach(&mut self, object: &ObjectRef) {
        self.expunge(object);
    }

    fn select(&mut self, statement: &Statement) -> Result<Vec<Row>> {
        tracing::debug!(
            entity = %statement.entity(),
            statement = %statement,
            "Running query"
        );
        self.connection.query(statement)
    }

    fn load(&mut self, class: &str, row: &Row) -> Result<ObjectRef> {
        let catalog = Arc::clone(&self.catalog);
        let mapping = catalog.entity(class)?;
        if self.config.identity_map && row.has_values_for(mapping.primary_key()) {
            let key = row.values_for(mapping.primary_key());
            if let Some(existing) = self.identity_map.get(class, &key) {
                return Ok(existing);
            }
        }
        mapping.deserialize(row, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ormlink_core::{
        AttributeDescriptor, Cascade, EntityMapping, Error, FetchMethod, MappingErrorKind,
        QueryError, QueryErrorKind,
    };
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockState {
        queries: usize,
        executes: usize,
        fail_queries: bool,
    }

    /// Connection that serves fixed rows and counts calls.
    #[derive(Clone, Default)]
    struct MockConnection {
        rows: Arc<Mutex<Vec<(String, Row)>>>,
        state: Arc<Mutex<MockState>>,
    }

    impl MockConnection {
        fn with_row(self, entity: &str, row: Row) -> Self {
            self.rows
                .lock()
                .expect("lock poisoned")
                .push((entity.to_string(), row));
            self
        }

        fn queries(&self) -> usize {
            self.state.lock().expect("lock poisoned").queries
        }
    }

    impl Connection for MockConnection {
        fn query(&self, statement: &Statement) -> Result<Vec<Row>> {
            let mut state = self.state.lock().expect("lock poisoned");
            state.queries += 1;
            if state.fail_queries {
                return Err(Error::Query(QueryError {
                    kind: QueryErrorKind::Timeout,
                    statement: Some(statement.to_string()),
                    message: "statement timeout".to_string(),
                    source: None,
                }));
            }
            let Statement::Select {
                entity, condition, ..
            } = statement
            else {
                return Ok(Vec::new());
            };
            Ok(self
                .rows
                .lock()
                .expect("lock poisoned")
                .iter()
                .filter(|(e, r)| e == entity && condition.matches(r))
                .map(|(_, r)| r.clone())
                .collect())
        }

        fn execute(&self, _statement: &Statement) -> Result<u64> {
            self.state.lock().expect("lock poisoned").executes += 1;
            Ok(1)
        }
    }

    fn catalog(fetch: FetchMethod) -> Arc<Catalog> {
        let mut catalog = Catalog::new();
        catalog
            .register_entity(
                EntityMapping::new("Employee", "emp")
                    .unwrap()
                    .with_column("empno", "id")
                    .unwrap()
                    .with_column("ename", "name")
                    .unwrap()
                    .with_column("deptno", "dept_id")
                    .unwrap()
                    .with_primary_key(&["empno"])
                    .unwrap(),
            )
            .unwrap();
        catalog
            .register_entity(
                EntityMapping::new("Dept", "dept")
                    .unwrap()
                    .with_column("deptno", "id")
                    .unwrap()
                    .with_column("dname", "name")
                    .unwrap()
                    .with_primary_key(&["deptno"])
                    .unwrap(),
            )
            .unwrap();
        catalog
            .register_relationship(
                ormlink_core::Relationship::to_one(
                    "Employee",
                    "dept",
                    AttributeDescriptor::new("dept").associated("Dept"),
                )
                .unwrap()
                .fetch(fetch),
            )
            .unwrap();
        catalog
            .register_relationship(
                ormlink_core::Relationship::one_to_many(
                    "Dept",
                    "employees",
                    AttributeDescriptor::new("employees").associated("Employee"),
                )
                .unwrap()
                .fetch(fetch)
                .cascade(Cascade::All),
            )
            .unwrap();
        Arc::new(catalog)
    }

    fn connection() -> MockConnection {
        MockConnection::default()
            .with_row("dept", Row::new().with("deptno", 50_i64).with("dname", "dept50"))
            .with_row(
                "emp",
                Row::new()
                    .with("empno", 21_i64)
                    .with("ename", "emp21")
                    .with("deptno", 50_i64),
            )
    }

    #[test]
    fn lazy_attribute_is_fetched_once() {
        let conn = connection();
        let mut session = Session::new(catalog(FetchMethod::Lazy), conn.clone());
        let dept = session.find("Dept", &[Value::BigInt(50)]).unwrap().unwrap();
        let before = conn.queries();

        for _ in 0..3 {
            let staff = session.related_many(&dept, "employees").unwrap();
            assert_eq!(staff.len(), 1);
        }
        assert_eq!(conn.queries() - before, 1);
        assert!(session.has_lazy_fetch_flag(dept.id(), "employees"));
    }

    #[test]
    fn identity_map_shares_instances() {
        let conn = connection();
        let mut session = Session::new(catalog(FetchMethod::Lazy), conn.clone());
        let emp = session.find("Employee", &[Value::BigInt(21)]).unwrap().unwrap();
        let dept = session.related_one(&emp, "dept").unwrap().unwrap();
        let staff = session.related_many(&dept, "employees").unwrap();
        assert!(staff[0].ptr_eq(&emp));

        let queries = conn.queries();
        let again = session.find("Employee", &[Value::Int(21)]).unwrap().unwrap();
        assert!(again.ptr_eq(&emp));
        assert_eq!(conn.queries(), queries);
    }

    #[test]
    fn eager_cycle_terminates() {
        let conn = connection();
        let mut session = Session::new(catalog(FetchMethod::Eager), conn);
        let emp = session.find("Employee", &[Value::BigInt(21)]).unwrap().unwrap();
        let guard = emp.read();
        let dept = guard.related("dept").and_then(RelatedValue::as_one).unwrap().clone();
        drop(guard);
        let staff = dept.read().related("employees").unwrap().as_many().to_vec();
        assert!(staff[0].ptr_eq(&emp));
        assert!(session.active_operations().is_empty());
    }

    #[test]
    fn failed_fetch_leaves_attribute_unresolved() {
        let conn = connection();
        let mut session = Session::new(catalog(FetchMethod::Lazy), conn.clone());
        let dept = session.find("Dept", &[Value::BigInt(50)]).unwrap().unwrap();
        conn.state.lock().expect("lock poisoned").fail_queries = true;
        let err = session.related(&dept, "employees").unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(dept.read().slot("employees"), Some(LazySlot::Unresolved)));
        assert!(!session.has_lazy_fetch_flag(dept.id(), "employees"));

        conn.state.lock().expect("lock poisoned").fail_queries = false;
        assert_eq!(session.related_many(&dept, "employees").unwrap().len(), 1);
    }

    #[test]
    fn resolving_slot_returns_empty_value() {
        let conn = connection();
        let mut session = Session::new(catalog(FetchMethod::Lazy), conn.clone());
        let dept = session.find("Dept", &[Value::BigInt(50)]).unwrap().unwrap();
        assert!(dept.write().begin_resolving("employees"));
        let queries = conn.queries();
        assert!(session.related(&dept, "employees").unwrap().is_empty());
        assert_eq!(conn.queries(), queries);
    }

    #[test]
    fn unknown_relationship_is_reported() {
        let mut session = Session::new(catalog(FetchMethod::Lazy), connection());
        let dept = session.find("Dept", &[Value::BigInt(50)]).unwrap().unwrap();
        let err = session.related(&dept, "projects").unwrap_err();
        assert_eq!(err.mapping_kind(), Some(MappingErrorKind::UnknownRelationship));
    }

    #[test]
    fn identity_map_can_be_disabled() {
        let config = SessionConfig {
            identity_map: false,
            ..SessionConfig::default()
        };
        let mut session = Session::with_config(catalog(FetchMethod::Lazy), connection(), config);
        let a = session.find("Dept", &[Value::BigInt(50)]).unwrap().unwrap();
        let b = session.find("Dept", &[Value::BigInt(50)]).unwrap().unwrap();
        assert!(!a.ptr_eq(&b));
        assert!(session.identity_map().is_empty());
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: SessionConfig = serde_json::from_str(r#"{"max_cascade_depth": 4}"#).unwrap();
        assert_eq!(config.max_cascade_depth, 4);
        assert!(config.atomic_cascades);
        assert!(config.identity_map);
    }

    #[test]
    fn build_maps_attribute_names() {
        let session = Session::new(catalog(FetchMethod::Lazy), connection());
        let emp = session
            .build("Employee", Row::new().with("id", 7_i64).with("name", "x"))
            .unwrap();
        assert_eq!(emp.field("id"), Value::BigInt(7));
        assert!(emp.field("dept_id").is_null());
        let err = session.build("Project", Row::new()).unwrap_err();
        assert_eq!(err.mapping_kind(), Some(MappingErrorKind::UnknownEntity));
    }

    #[test]
    fn expunge_forgets_flags() {
        let mut session = Session::new(catalog(FetchMethod::Lazy), connection());
        let dept = session.find("Dept", &[Value::BigInt(50)]).unwrap().unwrap();
        session.related(&dept, "employees").unwrap();
        session.expunge(&dept);
        assert!(!session.has_lazy_fetch_flag(dept.id(), "employees"));
        assert!(!session.identity_map().contains_object(&dept));
    }

    fn second_employee(conn: &MockConnection) {
        let _ = conn.clone().with_row(
            "emp",
            Row::new()
                .with("empno", 22_i64)
                .with("ename", "emp22")
                .with("deptno", 50_i64),
        );
    }

    #[test]
    fn clear_reloads_fetched_relationships() {
        let conn = connection();
        let mut session = Session::new(catalog(FetchMethod::Lazy), conn.clone());
        let dept = session.find("Dept", &[Value::BigInt(50)]).unwrap().unwrap();
        assert_eq!(session.related_many(&dept, "employees").unwrap().len(), 1);

        second_employee(&conn);
        assert_eq!(session.related_many(&dept, "employees").unwrap().len(), 1);

        session.clear();
        assert_eq!(session.related_many(&dept, "employees").unwrap().len(), 2);
        assert!(session.has_lazy_fetch_flag(dept.id(), "employees"));
    }

    #[test]
    fn values_fetched_by_another_session_are_reloaded() {
        let conn = connection();
        let mut first = Session::new(catalog(FetchMethod::Lazy), conn.clone());
        let dept = first.find("Dept", &[Value::BigInt(50)]).unwrap().unwrap();
        assert_eq!(first.related_many(&dept, "employees").unwrap().len(), 1);

        second_employee(&conn);
        let mut second = Session::new(catalog(FetchMethod::Lazy), conn.clone());
        let before = conn.queries();
        assert_eq!(second.related_many(&dept, "employees").unwrap().len(), 2);
        assert!(conn.queries() > before);
        assert!(first.has_lazy_fetch_flag(dept.id(), "employees"));
    }

    #[test]
    fn assigned_values_are_read_without_fetching() {
        let conn = connection();
        let mut session = Session::new(catalog(FetchMethod::Lazy), conn.clone());
        let dept = session
            .build("Dept", Row::new().with("id", 50_i64).with("name", "dept50"))
            .unwrap();
        dept.set_many("employees", Vec::new());
        let before = conn.queries();
        assert!(session.related_many(&dept, "employees").unwrap().is_empty());
        assert_eq!(conn.queries(), before);
    }
}
