//! Domain objects managed by entity mappings.
//!
//! An [`Object`] is an instance of a mapped class: scalar attribute slots
//! keyed by storage key, plus one relationship slot per relationship
//! attribute. Objects are shared through [`ObjectRef`] so that an object
//! graph (an employee pointing at its department, the department holding
//! its employees) can alias the same instance from several places.
//!
//! Relationship slots carry the deferred-read state machine:
//!
//! ```text
//! Unresolved --read--> Resolving --fetch ok--> Resolved(value)
//!                          |
//!                          +--fetch failed--> Unresolved
//! ```

use crate::row::Row;
use crate::value::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);
static NULL_VALUE: Value = Value::Null;

/// Process-unique identity of an in-memory object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    fn next() -> Self {
        Self(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric id.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The value held by a relationship attribute.
#[derive(Debug, Clone)]
pub enum RelatedValue {
    /// To-one reference (None when the foreign key is NULL or unset)
    One(Option<ObjectRef>),
    /// To-many collection
    Many(Vec<ObjectRef>),
}

impl RelatedValue {
    /// The referenced object of a to-one value.
    pub fn as_one(&self) -> Option<&ObjectRef> {
        match self {
            RelatedValue::One(obj) => obj.as_ref(),
            RelatedValue::Many(_) => None,
        }
    }

    /// The members of a to-many value (empty for to-one).
    pub fn as_many(&self) -> &[ObjectRef] {
        match self {
            RelatedValue::Many(items) => items,
            RelatedValue::One(_) => &[],
        }
    }

    /// Every object referenced by this value.
    pub fn objects(&self) -> Vec<ObjectRef> {
        match self {
            RelatedValue::One(obj) => obj.iter().cloned().collect(),
            RelatedValue::Many(items) => items.clone(),
        }
    }

    /// Number of referenced objects.
    pub fn len(&self) -> usize {
        match self {
            RelatedValue::One(obj) => usize::from(obj.is_some()),
            RelatedValue::Many(items) => items.len(),
        }
    }

    /// True if nothing is referenced.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-attribute state of a relationship slot.
#[derive(Debug, Clone)]
pub enum LazySlot {
    /// Deferred: nothing has been fetched yet
    Unresolved,
    /// A fetch for this slot is in progress
    Resolving,
    /// Loaded from the store; only current while the loading context
    /// holds its lazy-fetch flag
    Resolved(RelatedValue),
    /// Assigned by the caller
    Assigned(RelatedValue),
}

/// An instance of a mapped class.
#[derive(Debug)]
pub struct Object {
    id: ObjectId,
    class: Arc<str>,
    fields: HashMap<String, Value>,
    related: HashMap<String, LazySlot>,
}

impl Object {
    /// Allocate an empty instance of `class`. Every attribute starts NULL.
    pub fn new(class: &str) -> Self {
        Self {
            id: ObjectId::next(),
            class: Arc::from(class),
            fields: HashMap::new(),
            related: HashMap::new(),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    /// Read a scalar slot by storage key (NULL when never set).
    pub fn field(&self, storage_key: &str) -> &Value {
        self.fields.get(storage_key).unwrap_or(&NULL_VALUE)
    }

    /// Write a scalar slot by storage key.
    pub fn set_field(&mut self, storage_key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(storage_key.into(), value.into());
    }

    /// True if the slot was ever written.
    pub fn has_field(&self, storage_key: &str) -> bool {
        self.fields.contains_key(storage_key)
    }

    /// Relationship slot state for an attribute (None when never touched).
    pub fn slot(&self, attribute: &str) -> Option<&LazySlot> {
        self.related.get(attribute)
    }

    /// Resolved relationship value, without triggering any fetch.
    pub fn related(&self, attribute: &str) -> Option<&RelatedValue> {
        match self.related.get(attribute) {
            Some(LazySlot::Resolved(value) | LazySlot::Assigned(value)) => Some(value),
            _ => None,
        }
    }

    /// Assign a relationship value.
    pub fn set_related(&mut self, attribute: impl Into<String>, value: RelatedValue) {
        self.related
            .insert(attribute.into(), LazySlot::Assigned(value));
    }

    /// Store a value fetched from the store.
    pub fn fill_related(&mut self, attribute: impl Into<String>, value: RelatedValue) {
        self.related
            .insert(attribute.into(), LazySlot::Resolved(value));
    }

    /// Return a fetched slot to `Unresolved` so the next read loads it again.
    /// Assigned values are kept.
    pub fn invalidate(&mut self, attribute: &str) {
        if let Some(slot) = self.related.get_mut(attribute) {
            if matches!(slot, LazySlot::Resolved(_)) {
                *slot = LazySlot::Unresolved;
            }
        }
    }

    /// Install a deferred-read slot unless the attribute already has one.
    pub fn defer(&mut self, attribute: &str) {
        self.related
            .entry(attribute.to_string())
            .or_insert(LazySlot::Unresolved);
    }

    /// Move an unresolved slot into `Resolving`. Returns false if the slot is
    /// not unresolved (already resolving or resolved).
    pub fn begin_resolving(&mut self, attribute: &str) -> bool {
        match self.related.get_mut(attribute) {
            Some(slot) if matches!(slot, LazySlot::Unresolved) => {
                *slot = LazySlot::Resolving;
                true
            }
            _ => false,
        }
    }

    /// Return a `Resolving` slot to `Unresolved` after a failed fetch.
    pub fn abandon_resolving(&mut self, attribute: &str) {
        if let Some(slot) = self.related.get_mut(attribute) {
            if matches!(slot, LazySlot::Resolving) {
                *slot = LazySlot::Unresolved;
            }
        }
    }
}

/// A shared handle to an [`Object`].
///
/// Identity and class are cached on the handle so they can be read without
/// taking the lock.
#[derive(Clone)]
pub struct ObjectRef {
    id: ObjectId,
    class: Arc<str>,
    inner: Arc<RwLock<Object>>,
}

impl ObjectRef {
    pub fn new(object: Object) -> Self {
        Self {
            id: object.id,
            class: Arc::clone(&object.class),
            inner: Arc::new(RwLock::new(object)),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    /// Shared access; a poisoned lock is recovered.
    pub fn read(&self) -> RwLockReadGuard<'_, Object> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Exclusive access; a poisoned lock is recovered.
    pub fn write(&self) -> RwLockWriteGuard<'_, Object> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Same underlying instance?
    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Shorthand for reading a scalar slot.
    pub fn field(&self, storage_key: &str) -> Value {
        self.read().field(storage_key).clone()
    }

    /// Shorthand for writing a scalar slot.
    pub fn set_field(&self, storage_key: impl Into<String>, value: impl Into<Value>) {
        self.write().set_field(storage_key, value);
    }

    /// Shorthand for assigning a to-one relationship.
    pub fn set_one(&self, attribute: impl Into<String>, target: Option<ObjectRef>) {
        self.write().set_related(attribute, RelatedValue::One(target));
    }

    /// Shorthand for assigning a to-many relationship.
    pub fn set_many(&self, attribute: impl Into<String>, members: Vec<ObjectRef>) {
        self.write().set_related(attribute, RelatedValue::Many(members));
    }
}

impl fmt::Debug for ObjectRef {
    // Object graphs are cyclic; print identity only.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.class, self.id)
    }
}

impl From<Object> for ObjectRef {
    fn from(object: Object) -> Self {
        ObjectRef::new(object)
    }
}

/// Anything a cascade can persist: a mapped object or an untyped dataset.
///
/// The tag is decided once at the cascade entry point.
#[derive(Debug, Clone)]
pub enum Target {
    /// A typed domain object with an entity mapping
    Mapped(ObjectRef),
    /// A raw `column -> value` dataset
    Raw(Row),
}

impl From<ObjectRef> for Target {
    fn from(obj: ObjectRef) -> Self {
        Target::Mapped(obj)
    }
}

impl From<&ObjectRef> for Target {
    fn from(obj: &ObjectRef) -> Self {
        Target::Mapped(obj.clone())
    }
}

impl From<Row> for Target {
    fn from(row: Row) -> Self {
        Target::Raw(row)
    }
}
