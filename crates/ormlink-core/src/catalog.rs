//! The mapping catalog: entity mappings, relationships and key generators
//! for a set of classes.
//!
//! A catalog is built once, then shared read-only (usually as
//! `Arc<Catalog>`) by every session that works with those classes.

use crate::error::{Error, Result};
use crate::generator::ValueGenerator;
use crate::mapping::EntityMapping;
use crate::registry::RelationshipRegistry;
use crate::relationship::Relationship;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct Catalog {
    entities: HashMap<String, EntityMapping>,
    /// entity name -> class name
    entity_index: HashMap<String, String>,
    relationships: RelationshipRegistry,
    generators: HashMap<String, Vec<(String, Arc<dyn ValueGenerator>)>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the mapping for a class. Each class maps exactly once.
    #[allow(clippy::result_large_err)]
    pub fn register_entity(&mut self, mapping: EntityMapping) -> Result<()> {
        let class = mapping.class_name().to_string();
        if self.entities.contains_key(&class) {
            return Err(Error::duplicate_entity(&class));
        }
        tracing::debug!(
            class = %class,
            entity = %mapping.entity_name(),
            columns = mapping.columns().len(),
            "Registering entity mapping"
        );
        self.entity_index
            .insert(mapping.entity_name().to_string(), class.clone());
        self.entities.insert(class, mapping);
        Ok(())
    }

    /// Mapping for a class.
    #[allow(clippy::result_large_err)]
    pub fn entity(&self, class: &str) -> Result<&EntityMapping> {
        self.entities
            .get(class)
            .ok_or_else(|| Error::unknown_entity(class))
    }

    /// Mutable mapping for a class, for registering columns or triggers
    /// after the fact.
    #[allow(clippy::result_large_err)]
    pub fn entity_mut(&mut self, class: &str) -> Result<&mut EntityMapping> {
        self.entities
            .get_mut(class)
            .ok_or_else(|| Error::unknown_entity(class))
    }

    /// Mapping for a class, if one is registered.
    pub fn find_entity_mapping(&self, class: &str) -> Option<&EntityMapping> {
        self.entities.get(class)
    }

    /// Mapping by entity (table) name.
    pub fn entity_by_name(&self, entity: &str) -> Option<&EntityMapping> {
        self.entity_index
            .get(entity)
            .and_then(|class| self.entities.get(class))
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    /// Register a relationship after checking it against both mappings.
    ///
    /// Default join columns are filled in from the primary keys, and the
    /// owner gets a declaration for the relationship attribute.
    #[allow(clippy::result_large_err)]
    pub fn register_relationship(&mut self, mut relationship: Relationship) -> Result<Arc<Relationship>> {
        let owner = self.entity(relationship.owner_class())?;
        let target = self.entity(relationship.target_class())?;
        relationship.bind(owner, target)?;

        tracing::debug!(
            owner = %relationship.owner_class(),
            name = %relationship.name(),
            target = %relationship.target_class(),
            kind = ?relationship.kind(),
            fetch = ?relationship.fetch_method(),
            cascade = ?relationship.cascade_setting(),
            "Registering relationship"
        );
        let descriptor = relationship.attribute_descriptor().clone();
        self.entity_mut(relationship.owner_class())?
            .declare_attribute(descriptor)?;
        Ok(self.relationships.add_relationship(relationship))
    }

    pub fn relationships(&self) -> &RelationshipRegistry {
        &self.relationships
    }

    /// Attach a value generator to a mapped column.
    #[allow(clippy::result_large_err)]
    pub fn register_generator(
        &mut self,
        class: &str,
        column: &str,
        generator: Arc<dyn ValueGenerator>,
    ) -> Result<()> {
        let mapping = self.entity(class)?;
        if !mapping.has_column(column) {
            return Err(Error::unknown_attribute(class, column));
        }
        let slots = self.generators.entry(class.to_string()).or_default();
        match slots.iter_mut().find(|(c, _)| c == column) {
            Some(slot) => slot.1 = generator,
            None => slots.push((column.to_string(), generator)),
        }
        Ok(())
    }

    /// Generators of a class, as `(column, generator)` pairs.
    pub fn generators_for(&self, class: &str) -> &[(String, Arc<dyn ValueGenerator>)] {
        self.generators
            .get(class)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}
