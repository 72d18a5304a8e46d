//! Identity Map pattern for tracking unique object instances per primary key.
//!
//! The identity map ensures that each row corresponds to exactly one object
//! instance within a session:
//!
//! - **Uniqueness**: the same (class, primary key) always yields the same `ObjectRef`
//! - **Termination**: eager relationships that point back at an object under
//!   construction find it here instead of building it again
//! - **Consistency**: changes to an object are visible everywhere it is referenced
//!
//! Entries are keyed by class name and the key signature of the primary key
//! values, so `Int(1)` and `BigInt(1)` address the same row.

use ormlink_core::{ObjectId, ObjectRef, Value, key_signature};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct IdentityKey {
    class: String,
    signature: String,
}

impl IdentityKey {
    fn new(class: &str, pk_values: &[Value]) -> Self {
        Self {
            class: class.to_string(),
            signature: key_signature(pk_values),
        }
    }
}

#[derive(Debug, Default)]
pub struct IdentityMap {
    entries: HashMap<IdentityKey, ObjectRef>,
    /// Reverse index used to forget objects by identity.
    keys: HashMap<ObjectId, IdentityKey>,
}

impl IdentityMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an object under its primary key.
    ///
    /// If an object with the same key already exists, the existing reference
    /// is returned and the new object is ignored. Keys containing NULL are
    /// never tracked; the object is returned unchanged.
    pub fn insert(&mut self, pk_values: &[Value], object: ObjectRef) -> ObjectRef {
        if pk_values.is_empty() || pk_values.iter().any(Value::is_null) {
            return object;
        }
        let key = IdentityKey::new(object.class(), pk_values);
        if let Some(existing) = self.entries.get(&key) {
            return existing.clone();
        }
        self.keys.insert(object.id(), key.clone());
        self.entries.insert(key, object.clone());
        object
    }

    /// Look up an object by class and primary key.
    pub fn get(&self, class: &str, pk_values: &[Value]) -> Option<ObjectRef> {
        self.entries
            .get(&IdentityKey::new(class, pk_values))
            .cloned()
    }

    pub fn contains(&self, class: &str, pk_values: &[Value]) -> bool {
        self.entries
            .contains_key(&IdentityKey::new(class, pk_values))
    }

    /// Is this exact instance tracked?
    pub fn contains_object(&self, object: &ObjectRef) -> bool {
        self.keys.contains_key(&object.id())
    }

    /// Forget an object. Returns `true` if it was tracked.
    pub fn remove(&mut self, object: &ObjectRef) -> bool {
        match self.keys.remove(&object.id()) {
            Some(key) => {
                self.entries.remove(&key);
                true
            }
            None => false,
        }
    }

    /// Re-key an object after its primary key changed (for example once a
    /// generated key has been assigned on insert).
    pub fn rekey(&mut self, pk_values: &[Value], object: &ObjectRef) -> ObjectRef {
        self.remove(object);
        self.insert(pk_values, object.clone())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.keys.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
