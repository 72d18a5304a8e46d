//! Cascading insert, update, delete and merge.
//!
//! A [`CascadeEngine`] runs one top-level operation against a session and
//! follows every relationship whose cascade setting matches it. Ordering
//! within a cascade:
//!
//! - **Insert**: generated keys, then referenced (to-one) objects, then
//!   `before_insert`, the row itself, `after_insert`, then owned
//!   (to-many) objects with their foreign keys filled in.
//! - **Update**: referenced objects, `before_update`, the row,
//!   `after_update`, then owned objects (reconciled against the store).
//! - **Delete**: `before_delete`, link rows and cascaded children, the row,
//!   `after_delete`, then cascaded referenced objects.
//!
//! Each object is visited at most once per operation kind, and each stored
//! row is deleted at most once, so cyclic graphs terminate. The parent of a
//! reconciliation is never deleted by the removal of its orphans. Nesting
//! deeper than `SessionConfig::max_cascade_depth` fails.

use crate::Session;
use ormlink_core::{
    Cardinality, Catalog, Condition, Connection, EntityMapping, Error, JoinEntity, ObjectId,
    ObjectRef, Operation, PersistenceContext, RelatedValue, Relationship, RelationshipKind, Result,
    Row, Statement, Target, TriggerEvent, Value, key_signature,
};
use std::collections::HashSet;
use std::sync::Arc;

/// Lifecycle of one top-level cascade.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CascadeState {
    #[default]
    Pending,
    Executing,
    Committed,
    Failed,
}

/// What a cascade did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeReport {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub state: CascadeState,
}

impl CascadeReport {
    /// Total number of rows written.
    pub fn rows_written(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Step {
    Insert,
    Update,
    Delete,
    Merge,
}

/// Runs cascading operations for one session.
pub struct CascadeEngine<'s, C: Connection> {
    session: &'s mut Session<C>,
    catalog: Arc<Catalog>,
    state: CascadeState,
    visited: HashSet<(ObjectId, Step)>,
    /// `(entity, key signature)` of rows deleted by this cascade
    deleted_rows: HashSet<(String, String)>,
    /// `(entity, key signature)` of parents whose children are being reconciled
    retained_rows: HashSet<(String, String)>,
    depth: usize,
    report: CascadeReport,
}

impl<C: Connection> std::fmt::Debug for CascadeEngine<'_, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CascadeEngine")
            .field("state", &self.state)
            .field("depth", &self.depth)
            .field("visited", &self.visited.len())
            .field("report", &self.report)
            .finish_non_exhaustive()
    }
}

impl<'s, C: Connection> CascadeEngine<'s, C> {
    pub fn new(session: &'s mut Session<C>) -> Self {
        let catalog = session.catalog_arc();
        Self {
            session,
            catalog,
            state: CascadeState::Pending,
            visited: HashSet::new(),
            deleted_rows: HashSet::new(),
            retained_rows: HashSet::new(),
            depth: 0,
            report: CascadeReport::default(),
        }
    }

    /// State of the most recent operation.
    pub fn state(&self) -> CascadeState {
        self.state
    }

    // ========================================================================
    // Entry points
    // ========================================================================

    #[tracing::instrument(level = "debug", skip(self, object), fields(class = %object.class(), object = %object.id()))]
    #[allow(clippy::result_large_err)]
    pub fn insert(&mut self, object: &ObjectRef) -> Result<CascadeReport> {
        self.run(Operation::Insert.as_str(), |engine| engine.insert_object(object))
    }

    /// Update `object`. With `fields`, only those attributes (or columns)
    /// are written.
    #[tracing::instrument(level = "debug", skip(self, object, fields), fields(class = %object.class(), object = %object.id()))]
    #[allow(clippy::result_large_err)]
    pub fn update(&mut self, object: &ObjectRef, fields: Option<&[&str]>) -> Result<CascadeReport> {
        self.run(Operation::Update.as_str(), |engine| {
            engine.update_object(object, fields)
        })
    }

    #[tracing::instrument(level = "debug", skip(self, object), fields(class = %object.class(), object = %object.id()))]
    #[allow(clippy::result_large_err)]
    pub fn delete(&mut self, object: &ObjectRef) -> Result<CascadeReport> {
        self.run(Operation::Delete.as_str(), |engine| engine.delete_object(object))
    }

    /// Insert `object` if no stored row matches its primary key (or, when
    /// the key is missing, one of its unique column sets); update otherwise.
    #[tracing::instrument(level = "debug", skip(self, object), fields(class = %object.class(), object = %object.id()))]
    #[allow(clippy::result_large_err)]
    pub fn merge(&mut self, object: &ObjectRef) -> Result<CascadeReport> {
        self.run("merge", |engine| engine.merge_object(object))
    }

    /// Merge a raw dataset of a mapped class.
    #[tracing::instrument(level = "debug", skip(self, row))]
    #[allow(clippy::result_large_err)]
    pub fn merge_row(&mut self, class: &str, row: Row) -> Result<CascadeReport> {
        self.run("merge", |engine| engine.merge_raw(class, row).map(|_| ()))
    }

    /// Make the stored children of `parent` through relationship `name`
    /// exactly `children`: new ones are inserted, known ones updated and
    /// stored ones that are no longer listed deleted (or unlinked, for
    /// many-to-many).
    ///
    /// For a to-one relationship the first child becomes the referenced
    /// row; with no children nothing happens.
    #[tracing::instrument(level = "debug", skip(self, parent, children), fields(children = children.len()))]
    #[allow(clippy::result_large_err)]
    pub fn relationship_merge(
        &mut self,
        owner_class: &str,
        name: &str,
        parent: Target,
        children: Vec<Target>,
    ) -> Result<CascadeReport> {
        self.run("relationship_merge", |engine| {
            engine.merge_relationship(owner_class, name, &parent, children)
        })
    }

    /// Values for a relationship's join columns, taken from `dataset`.
    ///
    /// The key side is the target for to-one relationships and the owner
    /// otherwise. Its primary key is read from the dataset; when incomplete
    /// it is resolved through the key side's unique columns.
    #[allow(clippy::result_large_err)]
    pub fn join_column_values(&mut self, relationship: &Relationship, dataset: &Row) -> Result<Row> {
        let catalog = Arc::clone(&self.catalog);
        let key_class = if relationship.is_to_one() {
            relationship.target_class()
        } else {
            relationship.owner_class()
        };
        let mapping = catalog.entity(key_class)?;
        let pk = mapping.primary_key();
        if dataset.has_values_for(pk) {
            return Ok(relationship.join_row(&dataset.values_for(pk)));
        }
        match self.resolve_by_unique(mapping, dataset)? {
            Some(found) if found.has_values_for(pk) => {
                Ok(relationship.join_row(&found.values_for(pk)))
            }
            _ => Err(Error::primary_key_unresolvable(
                mapping.entity_name(),
                Some(relationship.name()),
            )),
        }
    }

    #[allow(clippy::result_large_err)]
    fn run(
        &mut self,
        operation: &'static str,
        body: impl FnOnce(&mut Self) -> Result<()>,
    ) -> Result<CascadeReport> {
        self.visited.clear();
        self.deleted_rows.clear();
        self.retained_rows.clear();
        self.depth = 0;
        self.report = CascadeReport::default();
        self.state = CascadeState::Executing;

        let atomic = self.session.config().atomic_cascades;
        if atomic {
            if let Err(err) = self.session.connection().begin() {
                self.fail();
                return Err(err);
            }
        }

        let mut outcome = body(self);
        if atomic && outcome.is_ok() {
            outcome = self.session.connection().commit();
        }

        match outcome {
            Ok(()) => {
                self.state = CascadeState::Committed;
                self.report.state = CascadeState::Committed;
                tracing::info!(
                    operation,
                    inserted = self.report.inserted,
                    updated = self.report.updated,
                    deleted = self.report.deleted,
                    "Cascade committed"
                );
                Ok(self.report.clone())
            }
            Err(err) => {
                self.fail();
                if atomic {
                    if let Err(rollback_err) = self.session.connection().rollback() {
                        tracing::warn!(error = %rollback_err, "Rollback after failed cascade also failed");
                    }
                }
                tracing::warn!(operation, error = %err, "Cascade failed");
                Err(err)
            }
        }
    }

    fn fail(&mut self) {
        self.state = CascadeState::Failed;
        self.report.state = CascadeState::Failed;
    }

    #[allow(clippy::result_large_err)]
    fn nested(&mut self, class: &str, body: impl FnOnce(&mut Self) -> Result<()>) -> Result<()> {
        let limit = self.session.config().max_cascade_depth;
        if self.depth >= limit {
            return Err(Error::cascade_depth_exceeded(class, limit));
        }
        self.depth += 1;
        let result = body(self);
        self.depth -= 1;
        result
    }

    // ========================================================================
    // Insert
    // ========================================================================

    #[allow(clippy::result_large_err)]
    fn insert_object(&mut self, object: &ObjectRef) -> Result<()> {
        if !self.visited.insert((object.id(), Step::Insert)) {
            return Ok(());
        }
        self.nested(object.class(), |engine| engine.insert_within(object))
    }

    #[allow(clippy::result_large_err)]
    fn insert_within(&mut self, object: &ObjectRef) -> Result<()> {
        let catalog = Arc::clone(&self.catalog);
        let mapping = catalog.entity(object.class())?;

        self.generate_keys(mapping, object)?;
        self.cascade_references(mapping, object, Operation::Insert)?;

        mapping.fire(TriggerEvent::BeforeInsert, object)?;
        let row = mapping.serialize(&object.read());
        self.session
            .execute(&Statement::insert(mapping.entity_name(), row))?;
        self.report.inserted += 1;
        self.session.track(object);
        mapping.fire(TriggerEvent::AfterInsert, object)?;

        self.cascade_collections(mapping, object, Operation::Insert)
    }

    /// Fill NULL generated columns of an object.
    #[allow(clippy::result_large_err)]
    fn generate_keys(&mut self, mapping: &EntityMapping, object: &ObjectRef) -> Result<()> {
        let catalog = Arc::clone(&self.catalog);
        for (column, generator) in catalog.generators_for(mapping.class_name()) {
            let Some(target) = mapping.column(column) else {
                continue;
            };
            if !target.read(&object.read()).is_null() {
                continue;
            }
            let value = generator.next_value(self.session.connection())?;
            tracing::debug!(class = mapping.class_name(), column = %column, value = ?value, "Generated value");
            target.write(&mut object.write(), value);
        }
        Ok(())
    }

    /// Fill NULL generated columns of a raw dataset.
    #[allow(clippy::result_large_err)]
    fn generate_row_keys(&mut self, mapping: &EntityMapping, row: &mut Row) -> Result<()> {
        let catalog = Arc::clone(&self.catalog);
        for (column, generator) in catalog.generators_for(mapping.class_name()) {
            if row.get_or_null(column).is_null() {
                let value = generator.next_value(self.session.connection())?;
                tracing::debug!(entity = mapping.entity_name(), column = %column, value = ?value, "Generated value");
                row.set(column.as_str(), value);
            }
        }
        Ok(())
    }

    /// Persist cascaded to-one targets and copy their keys into the owner's
    /// join columns.
    ///
    /// Non-cascading references still contribute their key when it is
    /// already known.
    #[allow(clippy::result_large_err)]
    fn cascade_references(
        &mut self,
        mapping: &EntityMapping,
        object: &ObjectRef,
        operation: Operation,
    ) -> Result<()> {
        let catalog = Arc::clone(&self.catalog);
        let references = catalog.relationships().relationships_for(
            mapping.class_name(),
            None,
            Cardinality::ToOne,
        );
        for rel in references {
            let target = object
                .read()
                .related(rel.attribute())
                .and_then(RelatedValue::as_one)
                .cloned();
            let Some(target) = target else {
                continue;
            };
            let cascades = rel.cascades(operation);
            if cascades {
                self.merge_object(&target)?;
            }
            let target_mapping = catalog.entity(rel.target_class())?;
            let target_row = target_mapping.serialize(&target.read());
            if !cascades && !target_row.has_values_for(target_mapping.primary_key()) {
                continue;
            }
            let join = self.join_column_values(&rel, &target_row)?;
            fold(mapping, object, &join);
        }
        Ok(())
    }

    /// Persist the resolved members of cascading to-many relationships.
    ///
    /// Collections that were never loaded are left alone.
    #[allow(clippy::result_large_err)]
    fn cascade_collections(
        &mut self,
        mapping: &EntityMapping,
        object: &ObjectRef,
        operation: Operation,
    ) -> Result<()> {
        let catalog = Arc::clone(&self.catalog);
        let collections = catalog.relationships().relationships_for(
            mapping.class_name(),
            Some(operation),
            Cardinality::ToMany,
        );
        for rel in collections {
            let members = object
                .read()
                .related(rel.attribute())
                .map(|value| value.as_many().to_vec());
            let Some(members) = members else {
                continue;
            };
            let parent_row = mapping.serialize(&object.read());
            let children = members.into_iter().map(Target::Mapped).collect();
            self.merge_children(&rel, &parent_row, children, operation)?;
        }
        Ok(())
    }

    // ========================================================================
    // Update
    // ========================================================================

    #[allow(clippy::result_large_err)]
    fn update_object(&mut self, object: &ObjectRef, fields: Option<&[&str]>) -> Result<()> {
        if !self.visited.insert((object.id(), Step::Update)) {
            return Ok(());
        }
        self.nested(object.class(), |engine| engine.update_within(object, fields))
    }

    #[allow(clippy::result_large_err)]
    fn update_within(&mut self, object: &ObjectRef, fields: Option<&[&str]>) -> Result<()> {
        let catalog = Arc::clone(&self.catalog);
        let mapping = catalog.entity(object.class())?;

        self.cascade_references(mapping, object, Operation::Update)?;
        mapping.fire(TriggerEvent::BeforeUpdate, object)?;

        let condition = self.key_condition(mapping, object)?;
        let row = mapping.serialize(&object.read());
        let mut values = match fields {
            Some(names) => project_fields(mapping, &row, names)?,
            None => row,
        };
        for column in mapping.primary_key() {
            values.remove(column);
        }
        if values.is_empty() {
            tracing::debug!(class = mapping.class_name(), "Nothing to update");
        } else {
            self.session
                .execute(&Statement::update(mapping.entity_name(), values, condition))?;
            self.report.updated += 1;
        }
        mapping.fire(TriggerEvent::AfterUpdate, object)?;

        self.cascade_collections(mapping, object, Operation::Update)
    }

    /// Condition addressing the object's stored row.
    ///
    /// Without a complete primary key the row is located through unique
    /// columns and the key found there is copied into the object.
    #[allow(clippy::result_large_err)]
    fn key_condition(&mut self, mapping: &EntityMapping, object: &ObjectRef) -> Result<Condition> {
        let row = mapping.serialize(&object.read());
        if let Some(condition) = mapping.key_condition(&row) {
            return Ok(condition);
        }
        let pk = mapping.primary_key();
        match self.resolve_by_unique(mapping, &row)? {
            Some(found) if found.has_values_for(pk) => {
                fold(mapping, object, &found.project(pk));
                self.session.track(object);
                Ok(Condition::from_pairs(pk, &found.values_for(pk)))
            }
            _ => Err(Error::primary_key_unresolvable(mapping.entity_name(), None)),
        }
    }

    // ========================================================================
    // Delete
    // ========================================================================

    #[allow(clippy::result_large_err)]
    fn delete_object(&mut self, object: &ObjectRef) -> Result<()> {
        if !self.visited.insert((object.id(), Step::Delete)) {
            return Ok(());
        }
        if let Some(row) = self.stored_identity(object)? {
            if self.retained_rows.contains(&row) {
                tracing::debug!(class = %object.class(), "Parent of a reconciliation is kept");
                return Ok(());
            }
            if !self.deleted_rows.insert(row) {
                return Ok(());
            }
        }
        self.nested(object.class(), |engine| engine.delete_within(object))
    }

    /// `(entity, key signature)` of the object's row, when its key is complete.
    #[allow(clippy::result_large_err)]
    fn stored_identity(&self, object: &ObjectRef) -> Result<Option<(String, String)>> {
        let mapping = self.catalog.entity(object.class())?;
        let key = mapping.primary_key_values(&object.read());
        if key.is_empty() || key.iter().any(Value::is_null) {
            return Ok(None);
        }
        Ok(Some((mapping.entity_name().to_string(), key_signature(&key))))
    }

    #[allow(clippy::result_large_err)]
    fn delete_within(&mut self, object: &ObjectRef) -> Result<()> {
        let catalog = Arc::clone(&self.catalog);
        let mapping = catalog.entity(object.class())?;
        let registry = catalog.relationships();

        let condition = self.key_condition(mapping, object)?;
        let key = mapping.primary_key_values(&object.read());
        mapping.fire(TriggerEvent::BeforeDelete, object)?;

        // Referenced objects are read before the owner row goes away.
        let mut referenced = Vec::new();
        for rel in registry.relationships_for(
            mapping.class_name(),
            Some(Operation::Delete),
            Cardinality::ToOne,
        ) {
            if let Some(target) = self.session.related_one(object, rel.attribute())? {
                referenced.push(target);
            }
        }

        for rel in registry.relationships_for(mapping.class_name(), None, Cardinality::ToMany) {
            match rel.join_entity() {
                Some(link) if rel.kind() == RelationshipKind::ManyToMany => {
                    self.delete_links(&rel, link, &key)?;
                }
                _ if rel.cascades(Operation::Delete) => self.delete_children(&rel, &key)?,
                _ => {}
            }
        }

        self.session
            .execute(&Statement::delete(mapping.entity_name(), condition))?;
        self.report.deleted += 1;
        self.session.expunge(object);
        mapping.fire(TriggerEvent::AfterDelete, object)?;

        for target in &referenced {
            self.delete_object(target)?;
        }
        Ok(())
    }

    /// Delete the stored one-to-many children of the owner with `key`.
    #[allow(clippy::result_large_err)]
    fn delete_children(&mut self, rel: &Relationship, key: &[Value]) -> Result<()> {
        let catalog = Arc::clone(&self.catalog);
        let target = catalog.entity(rel.target_class())?;
        let condition = Condition::from_pairs(rel.join_column_names(), key);
        let rows = self
            .session
            .select(&Statement::select(target.entity_name(), condition))?;
        for row in &rows {
            let child = self.session.load(rel.target_class(), row)?;
            self.delete_object(&child)?;
        }
        Ok(())
    }

    /// Remove the owner's link rows; targets are deleted as well when the
    /// relationship cascades deletes.
    #[allow(clippy::result_large_err)]
    fn delete_links(&mut self, rel: &Relationship, link: &JoinEntity, key: &[Value]) -> Result<()> {
        let condition = Condition::from_pairs(&link.owner_columns, key);
        let mut targets = Vec::new();
        if rel.cascades(Operation::Delete) {
            let links = self
                .session
                .select(&Statement::select(link.entity.as_str(), condition.clone()))?;
            for row in &links {
                let target_key = row.values_for(&link.target_columns);
                if let Some(target) = self.session.find(rel.target_class(), &target_key)? {
                    targets.push(target);
                }
            }
        }
        let removed = self
            .session
            .execute(&Statement::delete(link.entity.as_str(), condition))?;
        self.report.deleted += usize::try_from(removed).unwrap_or(usize::MAX);
        for target in &targets {
            self.delete_object(target)?;
        }
        Ok(())
    }

    // ========================================================================
    // Merge
    // ========================================================================

    #[allow(clippy::result_large_err)]
    fn merge_object(&mut self, object: &ObjectRef) -> Result<()> {
        let id = object.id();
        if self.visited.contains(&(id, Step::Insert))
            || self.visited.contains(&(id, Step::Update))
            || !self.visited.insert((id, Step::Merge))
        {
            return Ok(());
        }
        let catalog = Arc::clone(&self.catalog);
        let mapping = catalog.entity(object.class())?;
        let row = mapping.serialize(&object.read());
        match self.locate(mapping, &row)? {
            Some(found) => {
                let missing: Row = mapping
                    .primary_key()
                    .iter()
                    .filter(|c| row.get_or_null(c).is_null())
                    .map(|c| (c.clone(), found.get_or_null(c)))
                    .collect();
                if !missing.is_empty() {
                    fold(mapping, object, &missing);
                    self.session.track(object);
                }
                self.update_object(object, None)
            }
            None => self.insert_object(object),
        }
    }

    /// Merge a raw dataset, returning the row as stored.
    #[allow(clippy::result_large_err)]
    fn merge_raw(&mut self, class: &str, mut row: Row) -> Result<Row> {
        let catalog = Arc::clone(&self.catalog);
        let mapping = catalog.entity(class)?;
        let pk = mapping.primary_key();
        match self.locate(mapping, &row)? {
            Some(found) => {
                let condition = Condition::from_pairs(pk, &found.values_for(pk));
                let mut values = row;
                for column in pk {
                    values.remove(column);
                }
                if !values.is_empty() {
                    self.session.execute(&Statement::update(
                        mapping.entity_name(),
                        values.clone(),
                        condition,
                    ))?;
                    self.report.updated += 1;
                }
                let mut merged = found;
                merged.extend_from(&values);
                Ok(merged)
            }
            None => {
                self.generate_row_keys(mapping, &mut row)?;
                if !row.has_values_for(pk) {
                    return Err(Error::primary_key_unresolvable(mapping.entity_name(), None));
                }
                self.session
                    .execute(&Statement::insert(mapping.entity_name(), row.clone()))?;
                self.report.inserted += 1;
                Ok(row)
            }
        }
    }

    /// Merge any target and return its stored row.
    #[allow(clippy::result_large_err)]
    fn merge_target(&mut self, class: &str, target: Target) -> Result<Row> {
        match target {
            Target::Mapped(object) => {
                self.merge_object(&object)?;
                let catalog = Arc::clone(&self.catalog);
                let mapping = catalog.entity(object.class())?;
                Ok(mapping.serialize(&object.read()))
            }
            Target::Raw(row) => self.merge_raw(class, row),
        }
    }

    #[allow(clippy::result_large_err)]
    fn merge_relationship(
        &mut self,
        owner_class: &str,
        name: &str,
        parent: &Target,
        children: Vec<Target>,
    ) -> Result<()> {
        let catalog = Arc::clone(&self.catalog);
        let rel = catalog.relationships().get(owner_class, name)?;
        let owner = catalog.entity(owner_class)?;
        let parent_row = match parent {
            Target::Mapped(object) => owner.serialize(&object.read()),
            Target::Raw(row) => row.clone(),
        };

        if rel.is_to_one() {
            return self.merge_reference(&rel, owner, parent, &parent_row, children);
        }

        let members: Option<Vec<ObjectRef>> = children
            .iter()
            .map(|child| match child {
                Target::Mapped(object) => Some(object.clone()),
                Target::Raw(_) => None,
            })
            .collect();
        self.merge_children(&rel, &parent_row, children, Operation::Update)?;
        if let (Target::Mapped(object), Some(members)) = (parent, members) {
            object.set_many(rel.attribute(), members);
            self.session.set_lazy_fetch_flag(object.id(), rel.attribute());
        }
        Ok(())
    }

    /// Point a to-one relationship at the (merged) first child.
    #[allow(clippy::result_large_err)]
    fn merge_reference(
        &mut self,
        rel: &Relationship,
        owner: &EntityMapping,
        parent: &Target,
        parent_row: &Row,
        children: Vec<Target>,
    ) -> Result<()> {
        let Some(child) = children.into_iter().next() else {
            tracing::debug!(relationship = rel.name(), "No referenced row given");
            return Ok(());
        };
        let referenced = match &child {
            Target::Mapped(object) => Some(object.clone()),
            Target::Raw(_) => None,
        };
        let target_row = self.merge_target(rel.target_class(), child)?;
        let join = self.join_column_values(rel, &target_row)?;

        if let Target::Mapped(object) = parent {
            fold(owner, object, &join);
            if let Some(target) = referenced {
                object.set_one(rel.attribute(), Some(target));
                self.session.set_lazy_fetch_flag(object.id(), rel.attribute());
            }
        }

        if let Some(found) = self.locate(owner, parent_row)? {
            let pk = owner.primary_key();
            let condition = Condition::from_pairs(pk, &found.values_for(pk));
            self.session
                .execute(&Statement::update(owner.entity_name(), join, condition))?;
            self.report.updated += 1;
        }
        Ok(())
    }

    /// Merge `children` under the parent described by `parent_row`.
    ///
    /// Outside of inserts, stored children not among `children` are deleted
    /// (one-to-many) or unlinked (many-to-many).
    #[allow(clippy::result_large_err)]
    fn merge_children(
        &mut self,
        rel: &Relationship,
        parent_row: &Row,
        children: Vec<Target>,
        operation: Operation,
    ) -> Result<()> {
        let join = self.join_column_values(rel, parent_row)?;
        if let (RelationshipKind::ManyToMany, Some(link)) = (rel.kind(), rel.join_entity()) {
            return self.merge_links(rel, link, &join, children, operation);
        }
        let reconcile = operation != Operation::Insert;

        let catalog = Arc::clone(&self.catalog);
        let target = catalog.entity(rel.target_class())?;
        let pk = target.primary_key();
        let existing = if reconcile {
            self.session
                .select(&Statement::select(target.entity_name(), row_condition(&join)))?
        } else {
            Vec::new()
        };

        let mut kept = HashSet::new();
        for child in children {
            let row = match child {
                Target::Mapped(object) => {
                    fold(target, &object, &join);
                    self.merge_object(&object)?;
                    target.serialize(&object.read())
                }
                Target::Raw(mut row) => {
                    row.extend_from(&join);
                    self.merge_raw(rel.target_class(), row)?
                }
            };
            kept.insert(key_signature(&row.values_for(pk)));
        }

        if existing.is_empty() {
            return Ok(());
        }
        let owner = catalog.entity(rel.owner_class())?;
        self.retained_rows.insert((
            owner.entity_name().to_string(),
            key_signature(&join.values_for(rel.join_column_names())),
        ));
        for row in existing {
            if kept.contains(&key_signature(&row.values_for(pk))) {
                continue;
            }
            tracing::debug!(relationship = rel.name(), "Deleting orphaned child");
            let orphan = self.session.load(rel.target_class(), &row)?;
            self.delete_object(&orphan)?;
        }
        Ok(())
    }

    #[allow(clippy::result_large_err)]
    fn merge_links(
        &mut self,
        rel: &Relationship,
        link: &JoinEntity,
        join: &Row,
        children: Vec<Target>,
        operation: Operation,
    ) -> Result<()> {
        let catalog = Arc::clone(&self.catalog);
        let target = catalog.entity(rel.target_class())?;
        let owner_key = join.values_for(&link.owner_columns);
        let reconcile = operation != Operation::Insert;
        let cascades = rel.cascades(operation);

        let existing = if reconcile {
            self.session
                .select(&Statement::select(link.entity.as_str(), row_condition(join)))?
        } else {
            Vec::new()
        };
        let linked: HashSet<String> = existing
            .iter()
            .map(|row| key_signature(&row.values_for(&link.target_columns)))
            .collect();

        let mut kept = HashSet::new();
        for child in children {
            let row = if cascades {
                self.merge_target(rel.target_class(), child)?
            } else {
                self.stored_target(rel, target, &child)?
            };
            let target_key = row.values_for(target.primary_key());
            if !row.has_values_for(target.primary_key()) {
                return Err(Error::primary_key_unresolvable(
                    target.entity_name(),
                    Some(rel.name()),
                ));
            }
            let signature = key_signature(&target_key);
            if !linked.contains(&signature) && !kept.contains(&signature) {
                self.session
                    .execute(&Statement::insert(link.entity.as_str(), link.link_row(&owner_key, &target_key)))?;
                self.report.inserted += 1;
            }
            kept.insert(signature);
        }

        for row in &existing {
            let target_key = row.values_for(&link.target_columns);
            if kept.contains(&key_signature(&target_key)) {
                continue;
            }
            let condition = link
                .target_columns
                .iter()
                .zip(target_key)
                .fold(Condition::from_pairs(&link.owner_columns, &owner_key), |c, (column, value)| {
                    c.and(column.as_str(), value)
                });
            self.session
                .execute(&Statement::delete(link.entity.as_str(), condition))?;
            self.report.deleted += 1;
        }
        Ok(())
    }

    /// Stored row of a link target that is not merged itself.
    #[allow(clippy::result_large_err)]
    fn stored_target(
        &mut self,
        rel: &Relationship,
        mapping: &EntityMapping,
        child: &Target,
    ) -> Result<Row> {
        let row = match child {
            Target::Mapped(object) => mapping.serialize(&object.read()),
            Target::Raw(row) => row.clone(),
        };
        let Some(found) = self.locate(mapping, &row)? else {
            return Err(Error::primary_key_unresolvable(
                mapping.entity_name(),
                Some(rel.name()),
            ));
        };
        let pk = mapping.primary_key();
        if let Target::Mapped(object) = child {
            if !row.has_values_for(pk) {
                fold(mapping, object, &found.project(pk));
                self.session.track(object);
            }
        }
        Ok(found)
    }

    // ========================================================================
    // Row location
    // ========================================================================

    /// Stored row matching the dataset's primary key, or else one of its
    /// unique column sets.
    #[allow(clippy::result_large_err)]
    fn locate(&mut self, mapping: &EntityMapping, row: &Row) -> Result<Option<Row>> {
        let pk = mapping.primary_key();
        if row.has_values_for(pk) {
            let rows = self.session.select(&Statement::select(
                mapping.entity_name(),
                Condition::from_pairs(pk, &row.values_for(pk)),
            ))?;
            return Ok(rows.into_iter().next());
        }
        self.resolve_by_unique(mapping, row)
    }

    #[allow(clippy::result_large_err)]
    fn resolve_by_unique(&mut self, mapping: &EntityMapping, row: &Row) -> Result<Option<Row>> {
        for unique in mapping.unique_keys() {
            if !row.has_values_for(unique) {
                continue;
            }
            let rows = self.session.select(&Statement::select(
                mapping.entity_name(),
                Condition::from_pairs(unique, &row.values_for(unique)),
            ))?;
            if rows.len() > 1 {
                tracing::warn!(
                    entity = mapping.entity_name(),
                    columns = ?unique,
                    matches = rows.len(),
                    "Unique columns match several rows; using the first"
                );
            }
            if let Some(found) = rows.into_iter().next() {
                tracing::warn!(
                    entity = mapping.entity_name(),
                    columns = ?unique,
                    "Primary key resolved through unique columns"
                );
                return Ok(Some(found));
            }
        }
        Ok(None)
    }
}

/// Copy column values into an object's slots (unmapped columns are skipped).
fn fold(mapping: &EntityMapping, object: &ObjectRef, values: &Row) {
    let mut guard = object.write();
    for (column, value) in values.iter() {
        if let Some(target) = mapping.column(column) {
            target.write(&mut guard, value.clone());
        }
    }
}

fn row_condition(row: &Row) -> Condition {
    row.iter()
        .fold(Condition::all(), |c, (column, value)| c.and(column, value.clone()))
}

/// Columns named by attribute or column name.
#[allow(clippy::result_large_err)]
fn project_fields(mapping: &EntityMapping, row: &Row, names: &[&str]) -> Result<Row> {
    let mut out = Row::new();
    for name in names {
        let column = mapping
            .column_for_attribute(name)
            .or_else(|| mapping.column(name))
            .ok_or_else(|| Error::unknown_attribute(mapping.class_name(), name))?;
        out.set(column.column_name(), row.get_or_null(column.column_name()));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SessionConfig;
    use ormlink_core::{
        AttributeDescriptor, Cascade, FetchMethod, MappingErrorKind, Object, SequenceGenerator,
    };
    use ormlink_memory::MemoryConnection;
    use std::sync::Mutex;

    fn catalog(employees: Cascade, dept: Cascade) -> Arc<Catalog> {
        Arc::new(base_catalog(employees, dept))
    }

    fn base_catalog(employees: Cascade, dept: Cascade) -> Catalog {
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
                    .unwrap()
                    .with_unique(&["dname"])
                    .unwrap(),
            )
            .unwrap();
        catalog
            .register_relationship(
                Relationship::to_one(
                    "Employee",
                    "dept",
                    AttributeDescriptor::new("dept").associated("Dept"),
                )
                .unwrap()
                .cascade(dept),
            )
            .unwrap();
        catalog
            .register_relationship(
                Relationship::one_to_many(
                    "Dept",
                    "employees",
                    AttributeDescriptor::new("employees").associated("Employee"),
                )
                .unwrap()
                .fetch(FetchMethod::Lazy)
                .cascade(employees),
            )
            .unwrap();
        catalog
    }

    fn object(class: &str, fields: &[(&str, Value)]) -> ObjectRef {
        let mut obj = Object::new(class);
        for (key, value) in fields {
            obj.set_field(*key, value.clone());
        }
        ObjectRef::new(obj)
    }

    fn dept(no: i64, name: &str) -> ObjectRef {
        object("Dept", &[("id", Value::BigInt(no)), ("name", Value::from(name))])
    }

    fn emp(no: i64, name: &str) -> ObjectRef {
        object("Employee", &[("id", Value::BigInt(no)), ("name", Value::from(name))])
    }

    #[test]
    fn insert_writes_referenced_row_first() {
        let conn = MemoryConnection::new();
        let mut session = Session::new(catalog(Cascade::None, Cascade::All), &conn);
        let d = dept(50, "dept50");
        let e = emp(21, "emp21");
        e.set_one("dept", Some(d));

        let report = session.insert(&e).unwrap();
        assert_eq!(report.inserted, 2);
        assert_eq!(report.state, CascadeState::Committed);
        assert_eq!(
            conn.statements(),
            [
                "INSERT INTO dept (deptno, dname) VALUES (?, ?)",
                "INSERT INTO emp (empno, ename, deptno) VALUES (?, ?, ?)",
            ]
        );
        assert_eq!(e.field("dept_id"), Value::BigInt(50));
        assert_eq!(conn.rows("emp")[0].get_or_null("deptno"), Value::BigInt(50));
        assert_eq!(conn.log().first().map(String::as_str), Some("BEGIN"));
        assert_eq!(conn.log().last().map(String::as_str), Some("COMMIT"));
    }

    #[test]
    fn insert_fills_children_foreign_keys() {
        let conn = MemoryConnection::new();
        let mut session = Session::new(catalog(Cascade::All, Cascade::None), &conn);
        let d = dept(50, "dept50");
        d.set_many("employees", vec![emp(21, "emp21"), emp(22, "emp22")]);

        let report = session.insert(&d).unwrap();
        assert_eq!(report.inserted, 3);
        let rows = conn.rows("emp");
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.get_or_null("deptno") == Value::BigInt(50)));
        assert!(conn.statements()[0].starts_with("INSERT INTO dept"));
    }

    #[test]
    fn cyclic_graph_is_written_once() {
        let conn = MemoryConnection::new();
        let mut session = Session::new(catalog(Cascade::All, Cascade::All), &conn);
        let d = dept(50, "dept50");
        let e = emp(21, "emp21");
        e.set_one("dept", Some(d.clone()));
        d.set_many("employees", vec![e.clone()]);

        let report = session.insert(&e).unwrap();
        assert_eq!(report.inserted, 2);
        assert_eq!(conn.rows("dept").len(), 1);
        assert_eq!(conn.rows("emp").len(), 1);
    }

    #[test]
    fn generators_fill_missing_keys() {
        let mut catalog = base_catalog(Cascade::None, Cascade::None);
        catalog
            .register_generator("Dept", "deptno", Arc::new(SequenceGenerator::new("dept_seq")))
            .unwrap();
        let conn = MemoryConnection::new().with_sequence("dept_seq", 60);
        let mut session = Session::new(Arc::new(catalog), &conn);
        let d = object("Dept", &[("name", Value::from("new"))]);
        session.insert(&d).unwrap();
        assert_eq!(d.field("id"), Value::BigInt(60));
        assert!(
            session
                .identity_map()
                .get("Dept", &[Value::BigInt(60)])
                .is_some_and(|o| o.ptr_eq(&d))
        );
    }

    #[test]
    fn update_projects_fields() {
        let conn = MemoryConnection::new()
            .with_row("emp", Row::new().with("empno", 21_i64).with("ename", "old").with("deptno", 10_i64));
        let mut session = Session::new(catalog(Cascade::None, Cascade::None), &conn);
        let e = emp(21, "new");
        e.set_field("dept_id", 99_i64);

        session.update(&e, Some(&["name"])).unwrap();
        let row = &conn.rows("emp")[0];
        assert_eq!(row.get_or_null("ename"), Value::from("new"));
        assert_eq!(row.get_or_null("deptno"), Value::BigInt(10));

        let err = session.update(&e, Some(&["salary"])).unwrap_err();
        assert_eq!(err.mapping_kind(), Some(MappingErrorKind::UnknownAttribute));
    }

    #[test]
    fn update_resolves_key_through_unique_columns() {
        let conn = MemoryConnection::new()
            .with_row("dept", Row::new().with("deptno", 50_i64).with("dname", "dept50"));
        let mut session = Session::new(catalog(Cascade::None, Cascade::None), &conn);
        let d = object("Dept", &[("name", Value::from("dept50"))]);
        session.update(&d, None).unwrap();
        assert_eq!(d.field("id"), Value::BigInt(50));

        let stray = object("Dept", &[("name", Value::from("nowhere"))]);
        let err = session.update(&stray, None).unwrap_err();
        assert_eq!(err.mapping_kind(), Some(MappingErrorKind::PrimaryKeyUnresolvable));
    }

    #[test]
    fn delete_removes_children_before_parent() {
        let conn = MemoryConnection::new()
            .with_row("dept", Row::new().with("deptno", 50_i64).with("dname", "dept50"))
            .with_row("emp", Row::new().with("empno", 21_i64).with("ename", "a").with("deptno", 50_i64))
            .with_row("emp", Row::new().with("empno", 22_i64).with("ename", "b").with("deptno", 50_i64))
            .with_row("emp", Row::new().with("empno", 23_i64).with("ename", "c").with("deptno", 60_i64));
        let mut session = Session::new(catalog(Cascade::OnDelete, Cascade::None), &conn);
        let d = session.find("Dept", &[Value::BigInt(50)]).unwrap().unwrap();

        let report = session.delete(&d).unwrap();
        assert_eq!(report.deleted, 3);
        let statements = conn.statements();
        assert_eq!(statements.last().map(String::as_str), Some("DELETE FROM dept WHERE deptno = ?"));
        assert!(conn.rows("dept").is_empty());
        assert_eq!(conn.rows("emp").len(), 1);
        assert!(!session.identity_map().contains_object(&d));
    }

    #[test]
    fn relationship_merge_reconciles_children() {
        let conn = MemoryConnection::new()
            .with_row("dept", Row::new().with("deptno", 50_i64).with("dname", "dept50"))
            .with_row("emp", Row::new().with("empno", 21_i64).with("ename", "a").with("deptno", 50_i64))
            .with_row("emp", Row::new().with("empno", 22_i64).with("ename", "b").with("deptno", 50_i64));
        let mut session = Session::new(catalog(Cascade::None, Cascade::None), &conn);

        let report = session
            .relationship_merge(
                "Dept",
                "employees",
                Row::new().with("deptno", 50_i64),
                vec![
                    Target::Raw(Row::new().with("empno", 21_i64).with("ename", "renamed")),
                    Target::Raw(Row::new().with("empno", 30_i64).with("ename", "hired")),
                ],
            )
            .unwrap();
        assert_eq!((report.inserted, report.updated, report.deleted), (1, 1, 1));

        let mut names: Vec<String> = conn
            .rows("emp")
            .iter()
            .map(|r| r.get_named::<String>("ename").unwrap())
            .collect();
        names.sort();
        assert_eq!(names, ["hired", "renamed"]);
        assert!(conn.rows("emp").iter().all(|r| r.get_or_null("deptno") == Value::BigInt(50)));
    }

    #[test]
    fn relationship_merge_resolves_parent_by_unique_columns() {
        let conn = MemoryConnection::new()
            .with_row("dept", Row::new().with("deptno", 50_i64).with("dname", "dept50"));
        let mut session = Session::new(catalog(Cascade::None, Cascade::None), &conn);
        session
            .relationship_merge(
                "Dept",
                "employees",
                Row::new().with("dname", "dept50"),
                vec![Target::Raw(Row::new().with("empno", 1_i64).with("ename", "x"))],
            )
            .unwrap();
        assert_eq!(conn.rows("emp")[0].get_or_null("deptno"), Value::BigInt(50));

        let err = session
            .relationship_merge("Dept", "employees", Row::new().with("dname", "ghost"), vec![])
            .unwrap_err();
        assert_eq!(err.mapping_kind(), Some(MappingErrorKind::PrimaryKeyUnresolvable));
        assert!(err.to_string().contains("employees"));
    }

    #[test]
    fn to_one_merge_without_children_is_a_no_op() {
        let conn = MemoryConnection::new();
        let mut session = Session::new(catalog(Cascade::None, Cascade::None), &conn);
        let report = session
            .relationship_merge("Employee", "dept", Row::new().with("empno", 1_i64), vec![])
            .unwrap();
        assert_eq!(report.rows_written(), 0);
        assert!(conn.statements().is_empty());
    }

    #[test]
    fn to_one_merge_updates_owner_foreign_key() {
        let conn = MemoryConnection::new()
            .with_row("emp", Row::new().with("empno", 21_i64).with("ename", "a").with("deptno", 10_i64));
        let mut session = Session::new(catalog(Cascade::None, Cascade::None), &conn);
        let e = emp(21, "a");
        let d = dept(70, "dept70");
        session
            .relationship_merge("Employee", "dept", &e, vec![Target::Mapped(d.clone())])
            .unwrap();
        assert_eq!(conn.rows("dept").len(), 1);
        assert_eq!(conn.rows("emp")[0].get_or_null("deptno"), Value::BigInt(70));
        assert!(session.related_one(&e, "dept").unwrap().unwrap().ptr_eq(&d));
    }

    #[test]
    fn failure_rolls_back_the_whole_cascade() {
        let conn = MemoryConnection::new();
        conn.fail_next("insert", "emp");
        let mut session = Session::new(catalog(Cascade::All, Cascade::None), &conn);
        let d = dept(50, "dept50");
        d.set_many("employees", vec![emp(21, "emp21")]);

        let mut engine = session.cascade();
        assert!(engine.insert(&d).is_err());
        assert_eq!(engine.state(), CascadeState::Failed);
        assert!(conn.rows("dept").is_empty());
        assert_eq!(conn.log().last().map(String::as_str), Some("ROLLBACK"));
    }

    #[test]
    fn depth_limit_is_enforced() {
        let config = SessionConfig {
            max_cascade_depth: 1,
            ..SessionConfig::default()
        };
        let conn = MemoryConnection::new();
        let mut session = Session::with_config(catalog(Cascade::All, Cascade::None), &conn, config);
        let d = dept(50, "dept50");
        d.set_many("employees", vec![emp(21, "emp21")]);
        let err = session.insert(&d).unwrap_err();
        assert_eq!(err.mapping_kind(), Some(MappingErrorKind::CascadeDepthExceeded));
    }

    #[test]
    fn triggers_bracket_the_statement() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut catalog = base_catalog(Cascade::None, Cascade::None);
        let mapping = catalog.entity_mut("Dept").unwrap();
        for event in [TriggerEvent::BeforeInsert, TriggerEvent::AfterInsert] {
            let seen = Arc::clone(&seen);
            mapping.on(
                event,
                Arc::new(move |_obj: &mut Object| -> std::result::Result<(), String> {
                    seen.lock().expect("lock poisoned").push(event.as_str());
                    Ok(())
                }),
            );
        }
        let conn = MemoryConnection::new();
        let mut session = Session::new(Arc::new(catalog), &conn);
        session.insert(&dept(50, "dept50")).unwrap();
        assert_eq!(*seen.lock().expect("lock poisoned"), ["before_insert", "after_insert"]);
    }
}
