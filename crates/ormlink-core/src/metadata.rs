//! Declarative mapping documents.
//!
//! A [`MappingDocument`] describes entities, columns, keys, generators,
//! triggers and relationships as data. Triggers are referenced by callback
//! name and resolved against a [`TriggerCallbacks`] table when the document
//! is built into a [`Catalog`].
//!
//! ```json
//! {
//!   "entities": [
//!     {
//!       "class": "Dept",
//!       "entity": "dept",
//!       "columns": [{"column": "deptno", "attribute": "id"}],
//!       "primary_key": ["deptno"],
//!       "generators": {"deptno": {"strategy": "sequence", "sequence": "dept_seq"}},
//!       "triggers": {"before_insert": "stamp"}
//!     }
//!   ],
//!   "relationships": []
//! }
//! ```

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::generator::GeneratorConfig;
use crate::mapping::{AttributeDescriptor, EntityMapping, TriggerEvent, TriggerFn};
use crate::object::Object;
use crate::relationship::{Cascade, FetchMethod, JoinEntity, Relationship, RelationshipKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingDocument {
    #[serde(default)]
    pub entities: Vec<EntityDef>,
    #[serde(default)]
    pub relationships: Vec<RelationshipDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDef {
    pub class: String,
    pub entity: String,
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub unique: Vec<Vec<String>>,
    /// column -> generator settings
    #[serde(default)]
    pub generators: BTreeMap<String, GeneratorConfig>,
    /// event name -> callback name
    #[serde(default)]
    pub triggers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub column: String,
    pub attribute: String,
    #[serde(default)]
    pub storage_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipDef {
    pub owner: String,
    pub name: String,
    pub attribute: String,
    /// Associated class; a relationship without one is rejected.
    #[serde(default)]
    pub target: Option<String>,
    pub kind: RelationshipKind,
    #[serde(default)]
    pub fetch: FetchMethod,
    #[serde(default)]
    pub cascade: Cascade,
    #[serde(default)]
    pub join_columns: Vec<String>,
    #[serde(default)]
    pub join_entity: Option<JoinEntity>,
}

/// Named trigger callbacks available to mapping documents.
#[derive(Default, Clone)]
pub struct TriggerCallbacks {
    by_name: HashMap<String, TriggerFn>,
}

impl TriggerCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: &str, callback: F) -> &mut Self
    where
        F: Fn(&mut Object) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.by_name.insert(name.to_string(), Arc::new(callback));
        self
    }

    pub fn get(&self, name: &str) -> Option<&TriggerFn> {
        self.by_name.get(name)
    }
}

impl std::fmt::Debug for TriggerCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.by_name.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("TriggerCallbacks")
            .field("names", &names)
            .finish()
    }
}

impl MappingDocument {
    #[allow(clippy::result_large_err)]
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Build a fresh catalog from this document.
    #[allow(clippy::result_large_err)]
    pub fn build(&self, callbacks: &TriggerCallbacks) -> Result<Catalog> {
        let mut catalog = Catalog::new();
        self.apply(&mut catalog, callbacks)?;
        Ok(catalog)
    }

    /// Register this document's definitions into an existing catalog.
    ///
    /// Entities are registered before relationships so relationship targets
    /// can refer to any entity in the document.
    #[allow(clippy::result_large_err)]
    pub fn apply(&self, catalog: &mut Catalog, callbacks: &TriggerCallbacks) -> Result<()> {
        for def in &self.entities {
            catalog.register_entity(def.to_mapping(callbacks)?)?;
            for (column, config) in &def.generators {
                catalog.register_generator(&def.class, column, config.build())?;
            }
        }
        for def in &self.relationships {
            catalog.register_relationship(def.to_relationship()?)?;
        }
        tracing::info!(
            entities = self.entities.len(),
            relationships = self.relationships.len(),
            "Loaded mapping document"
        );
        Ok(())
    }
}

impl EntityDef {
    #[allow(clippy::result_large_err)]
    fn to_mapping(&self, callbacks: &TriggerCallbacks) -> Result<EntityMapping> {
        let mut mapping = EntityMapping::new(&self.class, &self.entity)?;
        for col in &self.columns {
            let mut attribute = AttributeDescriptor::new(col.attribute.as_str());
            if let Some(key) = &col.storage_key {
                attribute = attribute.stored_as(key.as_str());
            }
            mapping.add_column(&col.column, attribute)?;
        }
        if !self.primary_key.is_empty() {
            mapping.set_primary_key(&self.primary_key)?;
        }
        for unique in &self.unique {
            mapping.add_unique(unique)?;
        }
        for (event_name, callback_name) in &self.triggers {
            let event = TriggerEvent::parse(event_name)
                .ok_or_else(|| Error::invalid_trigger_name(&self.class, event_name))?;
            let callback = callbacks
                .get(callback_name)
                .ok_or_else(|| Error::invalid_callback(&self.class, event_name, callback_name))?;
            mapping.on(event, Arc::clone(callback));
        }
        Ok(mapping)
    }
}

impl RelationshipDef {
    #[allow(clippy::result_large_err)]
    fn to_relationship(&self) -> Result<Relationship> {
        let mut attribute = AttributeDescriptor::new(self.attribute.as_str());
        if let Some(target) = &self.target {
            attribute = attribute.associated(target.as_str());
        }
        let rel = match (self.kind, &self.join_entity) {
            (RelationshipKind::ManyToMany, Some(join)) => {
                Relationship::many_to_many(&self.owner, &self.name, attribute, join.clone())?
            }
            (kind, _) => Relationship::new(kind, &self.owner, &self.name, attribute)?,
        };
        Ok(rel
            .fetch(self.fetch)
            .cascade(self.cascade)
            .join_columns(&self.join_columns))
    }
}
