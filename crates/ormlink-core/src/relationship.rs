//! Relationship metadata and fetching.
//!
//! A [`Relationship`] describes how an attribute of an owner class refers to
//! instances of a target class: through foreign-key columns on the owner
//! (to-one), on the target (one-to-many), or through a join entity
//! (many-to-many). Relationships carry their fetch method and cascade
//! behavior; the cascade itself is driven by the session layer.

use crate::context::PersistenceContext;
use crate::error::{Error, Result};
use crate::mapping::{AttributeDescriptor, EntityMapping};
use crate::object::{ObjectRef, RelatedValue};
use crate::row::Row;
use crate::statement::{Condition, Statement};
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Cardinality and storage shape of a relationship.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    /// Many-to-one or one-to-one: join columns live on the owner.
    #[default]
    ToOne,
    /// One owner, many targets: join columns live on the target.
    OneToMany,
    /// Owners and targets linked through rows of a join entity.
    ManyToMany,
}

/// When related objects are loaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMethod {
    /// Load on first read of the attribute (default).
    #[default]
    Lazy,
    /// Load while the owner is being built.
    Eager,
}

/// Which owner operations propagate to related objects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cascade {
    #[default]
    None,
    All,
    OnInsert,
    OnUpdate,
    OnDelete,
}

/// A persistence operation that may cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl Cascade {
    /// Does this cascade setting propagate `operation`?
    pub const fn applies_to(self, operation: Operation) -> bool {
        matches!(
            (self, operation),
            (Cascade::All, _)
                | (Cascade::OnInsert, Operation::Insert)
                | (Cascade::OnUpdate, Operation::Update)
                | (Cascade::OnDelete, Operation::Delete)
        )
    }
}

/// Link entity for a many-to-many relationship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinEntity {
    /// Link entity name (e.g. `"emp_project"`)
    pub entity: String,
    /// Link columns holding the owner's primary key, in key order
    pub owner_columns: Vec<String>,
    /// Link columns holding the target's primary key, in key order
    pub target_columns: Vec<String>,
}

impl JoinEntity {
    pub fn new<S: AsRef<str>>(entity: &str, owner_columns: &[S], target_columns: &[S]) -> Self {
        Self {
            entity: entity.to_string(),
            owner_columns: owner_columns.iter().map(|c| c.as_ref().to_string()).collect(),
            target_columns: target_columns.iter().map(|c| c.as_ref().to_string()).collect(),
        }
    }

    /// Link row joining an owner key to a target key.
    pub fn link_row(&self, owner_key: &[Value], target_key: &[Value]) -> Row {
        self.owner_columns
            .iter()
            .zip(owner_key)
            .chain(self.target_columns.iter().zip(target_key))
            .map(|(c, v)| (c.clone(), v.clone()))
            .collect()
    }
}

/// Metadata for one relationship attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    name: String,
    owner_class: String,
    attribute: AttributeDescriptor,
    target_class: String,
    kind: RelationshipKind,
    fetch: FetchMethod,
    cascade: Cascade,
    join_columns: Vec<String>,
    join_entity: Option<JoinEntity>,
}

impl Relationship {
    /// Describe a relationship of `kind` from `owner_class`.
    ///
    /// The attribute must name its associated class; that class becomes the
    /// relationship's target.
    pub fn new(
        kind: RelationshipKind,
        owner_class: &str,
        name: &str,
        attribute: impl Into<AttributeDescriptor>,
    ) -> Result<Self> {
        let attribute = attribute.into();
        let target_class = attribute
            .associated_class
            .clone()
            .ok_or_else(|| Error::missing_associated_class(owner_class, &attribute.name))?;
        Ok(Self {
            name: name.to_string(),
            owner_class: owner_class.to_string(),
            attribute,
            target_class,
            kind,
            fetch: FetchMethod::Lazy,
            cascade: Cascade::None,
            join_columns: Vec::new(),
            join_entity: None,
        })
    }

    pub fn to_one(
        owner_class: &str,
        name: &str,
        attribute: impl Into<AttributeDescriptor>,
    ) -> Result<Self> {
        Self::new(RelationshipKind::ToOne, owner_class, name, attribute)
    }

    pub fn one_to_many(
        owner_class: &str,
        name: &str,
        attribute: impl Into<AttributeDescriptor>,
    ) -> Result<Self> {
        Self::new(RelationshipKind::OneToMany, owner_class, name, attribute)
    }

    pub fn many_to_many(
        owner_class: &str,
        name: &str,
        attribute: impl Into<AttributeDescriptor>,
        join_entity: JoinEntity,
    ) -> Result<Self> {
        let mut rel = Self::new(RelationshipKind::ManyToMany, owner_class, name, attribute)?;
        rel.join_entity = Some(join_entity);
        Ok(rel)
    }

    #[must_use]
    pub fn fetch(mut self, fetch: FetchMethod) -> Self {
        self.fetch = fetch;
        self
    }

    #[must_use]
    pub fn eager(self) -> Self {
        self.fetch(FetchMethod::Eager)
    }

    #[must_use]
    pub fn cascade(mut self, cascade: Cascade) -> Self {
        self.cascade = cascade;
        self
    }

    /// Set the foreign-key columns. For to-one relationships these are owner
    /// columns matching the target's primary key; for one-to-many they are
    /// target columns matching the owner's primary key.
    #[must_use]
    pub fn join_columns<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        self.join_columns = columns.iter().map(|c| c.as_ref().to_string()).collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner_class(&self) -> &str {
        &self.owner_class
    }

    pub fn target_class(&self) -> &str {
        &self.target_class
    }

    /// Attribute name on the owner that holds the related value.
    pub fn attribute(&self) -> &str {
        &self.attribute.name
    }

    pub fn attribute_descriptor(&self) -> &AttributeDescriptor {
        &self.attribute
    }

    pub fn kind(&self) -> RelationshipKind {
        self.kind
    }

    pub fn fetch_method(&self) -> FetchMethod {
        self.fetch
    }

    pub fn cascade_setting(&self) -> Cascade {
        self.cascade
    }

    pub fn join_column_names(&self) -> &[String] {
        &self.join_columns
    }

    pub fn join_entity(&self) -> Option<&JoinEntity> {
        self.join_entity.as_ref()
    }

    pub fn is_to_one(&self) -> bool {
        self.kind == RelationshipKind::ToOne
    }

    pub fn is_to_many(&self) -> bool {
        !self.is_to_one()
    }

    /// Does `operation` on the owner propagate through this relationship?
    pub fn cascades(&self, operation: Operation) -> bool {
        self.cascade.applies_to(operation)
    }

    /// Does this relationship answer to `name` (relationship or attribute name)?
    pub fn answers_to(&self, name: &str) -> bool {
        self.name == name || self.attribute.name == name
    }

    /// Fill in default join columns and check every referenced column
    /// exists on the side it belongs to.
    pub(crate) fn bind(&mut self, owner: &EntityMapping, target: &EntityMapping) -> Result<()> {
        match self.kind {
            RelationshipKind::ToOne => {
                if self.join_columns.is_empty() {
                    self.join_columns = target.primary_key().to_vec();
                }
                require_columns(owner, &self.join_columns)?;
                require_arity(owner, &self.name, &self.join_columns, target.primary_key())?;
            }
            RelationshipKind::OneToMany => {
                if self.join_columns.is_empty() {
                    self.join_columns = owner.primary_key().to_vec();
                }
                require_columns(target, &self.join_columns)?;
                require_arity(target, &self.name, &self.join_columns, owner.primary_key())?;
            }
            RelationshipKind::ManyToMany => {
                let join = self
                    .join_entity
                    .as_ref()
                    .ok_or_else(|| Error::unknown_entity(&format!("{}.{}", self.owner_class, self.name)))?;
                require_arity(owner, &self.name, &join.owner_columns, owner.primary_key())?;
                require_arity(target, &self.name, &join.target_columns, target.primary_key())?;
            }
        }
        Ok(())
    }

    /// Dataset binding this relationship's join columns to `key`.
    ///
    /// For many-to-many relationships the owner-side link columns are used.
    pub fn join_row(&self, key: &[Value]) -> Row {
        let columns = match (&self.kind, &self.join_entity) {
            (RelationshipKind::ManyToMany, Some(join)) => &join.owner_columns,
            _ => &self.join_columns,
        };
        columns
            .iter()
            .zip(key)
            .map(|(c, v)| (c.clone(), v.clone()))
            .collect()
    }

    /// Load the related value of `owner` through the context.
    pub fn fetch_related(
        &self,
        owner: &ObjectRef,
        ctx: &mut dyn PersistenceContext,
    ) -> Result<RelatedValue> {
        let catalog = ctx.catalog();
        let owner_mapping = catalog.entity(&self.owner_class)?;
        self.fetch_with(owner, owner_mapping, ctx)
    }

    /// Resolve an eager relationship while the owner is being built.
    pub fn deserialize_attribute(
        &self,
        owner: &ObjectRef,
        ctx: &mut dyn PersistenceContext,
        owner_mapping: &EntityMapping,
    ) -> Result<()> {
        let value = self.fetch_with(owner, owner_mapping, ctx)?;
        owner.write().fill_related(self.attribute.name.clone(), value);
        ctx.set_lazy_fetch_flag(owner.id(), &self.attribute.name);
        Ok(())
    }

    fn fetch_with(
        &self,
        owner: &ObjectRef,
        owner_mapping: &EntityMapping,
        ctx: &mut dyn PersistenceContext,
    ) -> Result<RelatedValue> {
        let catalog = ctx.catalog();
        let target = catalog.entity(&self.target_class)?;
        tracing::debug!(
            owner = %owner.class(),
            relationship = %self.name,
            target = %self.target_class,
            "Fetching related objects"
        );

        match self.kind {
            RelationshipKind::ToOne => {
                let keys = owner_mapping.column_values_for(&owner.read(), &self.join_columns)?;
                if !keys.has_values_for(&self.join_columns) {
                    return Ok(RelatedValue::One(None));
                }
                let condition =
                    Condition::from_pairs(target.primary_key(), &keys.values_for(&self.join_columns));
                let rows = ctx.select(&Statement::select(target.entity_name(), condition))?;
                match rows.first() {
                    Some(row) => Ok(RelatedValue::One(Some(ctx.load(&self.target_class, row)?))),
                    None => Ok(RelatedValue::One(None)),
                }
            }
            RelationshipKind::OneToMany => {
                let key = owner_mapping.primary_key_values(&owner.read());
                if !is_complete(&key) {
                    return Ok(RelatedValue::Many(Vec::new()));
                }
                let condition = Condition::from_pairs(&self.join_columns, &key);
                let rows = ctx.select(&Statement::select(target.entity_name(), condition))?;
                let mut members = Vec::with_capacity(rows.len());
                for row in &rows {
                    members.push(ctx.load(&self.target_class, row)?);
                }
                Ok(RelatedValue::Many(members))
            }
            RelationshipKind::ManyToMany => {
                let Some(join) = self.join_entity.as_ref() else {
                    return Ok(RelatedValue::Many(Vec::new()));
                };
                let key = owner_mapping.primary_key_values(&owner.read());
                if !is_complete(&key) {
                    return Ok(RelatedValue::Many(Vec::new()));
                }
                let links = ctx.select(&Statement::select(
                    join.entity.as_str(),
                    Condition::from_pairs(&join.owner_columns, &key),
                ))?;
                let mut members = Vec::with_capacity(links.len());
                for link in &links {
                    let target_key = link.values_for(&join.target_columns);
                    if !is_complete(&target_key) {
                        continue;
                    }
                    let condition = Condition::from_pairs(target.primary_key(), &target_key);
                    let rows = ctx.select(&Statement::select(target.entity_name(), condition))?;
                    if let Some(row) = rows.first() {
                        members.push(ctx.load(&self.target_class, row)?);
                    }
                }
                Ok(RelatedValue::Many(members))
            }
        }
    }
}

fn is_complete(key: &[Value]) -> bool {
    !key.is_empty() && key.iter().all(|v| !v.is_null())
}

fn require_columns(mapping: &EntityMapping, columns: &[String]) -> Result<()> {
    match columns.iter().find(|c| !mapping.has_column(c)) {
        Some(missing) => Err(Error::unknown_attribute(mapping.class_name(), missing)),
        None => Ok(()),
    }
}

fn require_arity(
    mapping: &EntityMapping,
    relationship: &str,
    columns: &[String],
    key: &[String],
) -> Result<()> {
    if columns.is_empty() || columns.len() != key.len() {
        return Err(Error::join_column_arity(mapping.class_name(), relationship, columns, key));
    }
    Ok(())
}
