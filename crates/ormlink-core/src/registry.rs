//! Relationship registry.
//!
//! Relationships are indexed per owner class and kept in registration order,
//! which is also the order cascades visit them.

use crate::error::{Error, Result};
use crate::relationship::{FetchMethod, Operation, Relationship};
use std::collections::HashMap;
use std::sync::Arc;

/// Cardinality filter for [`RelationshipRegistry::relationships_for`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cardinality {
    ToOne,
    ToMany,
    #[default]
    Any,
}

impl Cardinality {
    fn admits(self, rel: &Relationship) -> bool {
        match self {
            Cardinality::ToOne => rel.is_to_one(),
            Cardinality::ToMany => rel.is_to_many(),
            Cardinality::Any => true,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct RelationshipRegistry {
    by_class: HashMap<String, Vec<Arc<Relationship>>>,
}

impl RelationshipRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a relationship. A relationship already registered on the same
    /// owner attribute is replaced in place.
    pub fn add_relationship(&mut self, relationship: Relationship) -> Arc<Relationship> {
        let relationship = Arc::new(relationship);
        let entries = self
            .by_class
            .entry(relationship.owner_class().to_string())
            .or_default();
        if let Some(existing) = entries
            .iter_mut()
            .find(|r| r.attribute() == relationship.attribute())
        {
            tracing::warn!(
                owner = %relationship.owner_class(),
                attribute = %relationship.attribute(),
                "Replacing previously registered relationship"
            );
            *existing = Arc::clone(&relationship);
        } else {
            entries.push(Arc::clone(&relationship));
        }
        relationship
    }

    /// Look up a relationship by relationship or attribute name.
    #[allow(clippy::result_large_err)]
    pub fn get(&self, owner_class: &str, name: &str) -> Result<Arc<Relationship>> {
        self.by_class
            .get(owner_class)
            .and_then(|rels| rels.iter().find(|r| r.answers_to(name)))
            .cloned()
            .ok_or_else(|| Error::unknown_relationship(owner_class, name))
    }

    /// Every relationship of a class (empty for unknown classes).
    pub fn for_class(&self, owner_class: &str) -> Vec<Arc<Relationship>> {
        self.by_class.get(owner_class).cloned().unwrap_or_default()
    }

    /// Relationships of a class filtered by cardinality and, when an
    /// operation is given, by whether they cascade it.
    pub fn relationships_for(
        &self,
        owner_class: &str,
        operation: Option<Operation>,
        cardinality: Cardinality,
    ) -> Vec<Arc<Relationship>> {
        self.by_class
            .get(owner_class)
            .map(|rels| {
                rels.iter()
                    .filter(|r| cardinality.admits(r))
                    .filter(|r| operation.is_none_or(|op| r.cascades(op)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Relationships of a class that are loaded with their owner.
    pub fn eager_relationships(&self, owner_class: &str) -> Vec<Arc<Relationship>> {
        self.for_class(owner_class)
            .into_iter()
            .filter(|r| r.fetch_method() == FetchMethod::Eager)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_class.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
