//! Column and entity mappings.
//!
//! An [`EntityMapping`] ties one domain class to one entity (table): it owns
//! the class's [`ColumnMapping`]s, its key declarations and its lifecycle
//! [`Triggers`], and converts between column-keyed datasets and
//! [`Object`]s in both directions.

use crate::context::PersistenceContext;
use crate::error::{Error, Result};
use crate::object::{Object, ObjectRef};
use crate::relationship::FetchMethod;
use crate::row::Row;
use crate::statement::Condition;
use crate::value::Value;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Plain and schema-qualified identifiers (`emp`, `hr.emp`).
const IDENTIFIER_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$";

fn identifier_regex() -> std::result::Result<&'static Regex, &'static regex::Error> {
    static IDENT: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    IDENT.get_or_init(|| Regex::new(IDENTIFIER_PATTERN)).as_ref()
}

/// Check that `name` is usable as a class, entity, column or attribute name.
pub fn is_identifier(name: &str) -> bool {
    match identifier_regex() {
        Ok(re) => re.is_match(name),
        Err(e) => {
            tracing::warn!(
                pattern = IDENTIFIER_PATTERN,
                error = %e,
                "Invalid identifier pattern, rejecting every name"
            );
            false
        }
    }
}

fn check_identifier(owner: &str, name: &str) -> Result<()> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(Error::invalid_identifier(owner, name))
    }
}

/// Declaration of an attribute on a mapped class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDescriptor {
    /// Attribute name as seen by callers
    pub name: String,
    /// Slot in the object that backs the attribute
    pub storage_key: String,
    /// Class of the objects this attribute refers to (relationship attributes)
    pub associated_class: Option<String>,
}

impl AttributeDescriptor {
    /// A scalar attribute stored under its own name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            storage_key: name.clone(),
            name,
            associated_class: None,
        }
    }

    /// Store the attribute under a different slot name.
    #[must_use]
    pub fn stored_as(mut self, storage_key: impl Into<String>) -> Self {
        self.storage_key = storage_key.into();
        self
    }

    /// Declare the class this attribute refers to.
    #[must_use]
    pub fn associated(mut self, class: impl Into<String>) -> Self {
        self.associated_class = Some(class.into());
        self
    }
}

impl From<&str> for AttributeDescriptor {
    fn from(name: &str) -> Self {
        AttributeDescriptor::new(name)
    }
}

/// Bidirectional mapping between a column and an object attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    column_name: String,
    attribute: AttributeDescriptor,
}

impl ColumnMapping {
    pub fn column_name(&self) -> &str {
        &self.column_name
    }

    pub fn attribute(&self) -> &str {
        &self.attribute.name
    }

    pub fn storage_key(&self) -> &str {
        &self.attribute.storage_key
    }

    /// Read the attribute's current value from an object.
    pub fn read(&self, object: &Object) -> Value {
        object.field(&self.attribute.storage_key).clone()
    }

    /// Write a column value into the object's backing slot.
    pub fn write(&self, object: &mut Object, value: Value) {
        object.set_field(self.attribute.storage_key.clone(), value);
    }
}

/// The fixed set of lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerEvent {
    BeforeInsert,
    AfterInsert,
    BeforeUpdate,
    AfterUpdate,
    BeforeDelete,
    AfterDelete,
    OnFetch,
}

impl TriggerEvent {
    pub const ALL: [TriggerEvent; 7] = [
        TriggerEvent::BeforeInsert,
        TriggerEvent::AfterInsert,
        TriggerEvent::BeforeUpdate,
        TriggerEvent::AfterUpdate,
        TriggerEvent::BeforeDelete,
        TriggerEvent::AfterDelete,
        TriggerEvent::OnFetch,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            TriggerEvent::BeforeInsert => "before_insert",
            TriggerEvent::AfterInsert => "after_insert",
            TriggerEvent::BeforeUpdate => "before_update",
            TriggerEvent::AfterUpdate => "after_update",
            TriggerEvent::BeforeDelete => "before_delete",
            TriggerEvent::AfterDelete => "after_delete",
            TriggerEvent::OnFetch => "on_fetch",
        }
    }

    /// Parse an event name; anything outside the fixed set is rejected.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.as_str() == name)
    }
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle callback. Returning `Err` aborts the surrounding operation.
pub type TriggerFn = Arc<dyn Fn(&mut Object) -> std::result::Result<(), String> + Send + Sync>;

/// One optional callback slot per lifecycle event.
#[derive(Default, Clone)]
pub struct Triggers {
    before_insert: Option<TriggerFn>,
    after_insert: Option<TriggerFn>,
    before_update: Option<TriggerFn>,
    after_update: Option<TriggerFn>,
    before_delete: Option<TriggerFn>,
    after_delete: Option<TriggerFn>,
    on_fetch: Option<TriggerFn>,
}

impl Triggers {
    fn slot_mut(&mut self, event: TriggerEvent) -> &mut Option<TriggerFn> {
        match event {
            TriggerEvent::BeforeInsert => &mut self.before_insert,
            TriggerEvent::AfterInsert => &mut self.after_insert,
            TriggerEvent::BeforeUpdate => &mut self.before_update,
            TriggerEvent::AfterUpdate => &mut self.after_update,
            TriggerEvent::BeforeDelete => &mut self.before_delete,
            TriggerEvent::AfterDelete => &mut self.after_delete,
            TriggerEvent::OnFetch => &mut self.on_fetch,
        }
    }

    /// Callback registered for an event.
    pub fn get(&self, event: TriggerEvent) -> Option<&TriggerFn> {
        match event {
            TriggerEvent::BeforeInsert => self.before_insert.as_ref(),
            TriggerEvent::AfterInsert => self.after_insert.as_ref(),
            TriggerEvent::BeforeUpdate => self.before_update.as_ref(),
            TriggerEvent::AfterUpdate => self.after_update.as_ref(),
            TriggerEvent::BeforeDelete => self.before_delete.as_ref(),
            TriggerEvent::AfterDelete => self.after_delete.as_ref(),
            TriggerEvent::OnFetch => self.on_fetch.as_ref(),
        }
    }

    /// Install a callback, replacing any previous one for the event.
    pub fn set(&mut self, event: TriggerEvent, callback: TriggerFn) {
        *self.slot_mut(event) = Some(callback);
    }
}

impl fmt::Debug for Triggers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registered: Vec<&str> = TriggerEvent::ALL
            .iter()
            .filter(|e| self.get(**e).is_some())
            .map(TriggerEvent::as_str)
            .collect();
        f.debug_struct("Triggers")
            .field("registered", &registered)
            .finish()
    }
}

/// Per-class mapping between objects and rows of one entity.
#[derive(Debug, Clone)]
pub struct EntityMapping {
    class_name: String,
    entity_name: String,
    columns: Vec<ColumnMapping>,
    by_column: HashMap<String, usize>,
    attributes: HashMap<String, AttributeDescriptor>,
    primary_key: Vec<String>,
    unique: Vec<Vec<String>>,
    triggers: Triggers,
}

impl EntityMapping {
    /// Create an empty mapping of `class_name` onto `entity_name`.
    pub fn new(class_name: &str, entity_name: &str) -> Result<Self> {
        check_identifier(class_name, class_name)?;
        check_identifier(class_name, entity_name)?;
        Ok(Self {
            class_name: class_name.to_string(),
            entity_name: entity_name.to_string(),
            columns: Vec::new(),
            by_column: HashMap::new(),
            attributes: HashMap::new(),
            primary_key: Vec::new(),
            unique: Vec::new(),
            triggers: Triggers::default(),
        })
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    /// Register a column. Fails if the column or its storage slot is already
    /// mapped on this class.
    pub fn add_column(
        &mut self,
        column_name: &str,
        attribute: impl Into<AttributeDescriptor>,
    ) -> Result<&mut Self> {
        let attribute = attribute.into();
        check_identifier(&self.class_name, column_name)?;
        check_identifier(&self.class_name, &attribute.name)?;
        if self.by_column.contains_key(column_name) {
            return Err(Error::duplicate_column(&self.class_name, column_name));
        }
        if let Some(clash) = self
            .columns
            .iter()
            .find(|c| c.storage_key() == attribute.storage_key)
        {
            return Err(Error::duplicate_column(&self.class_name, clash.column_name()));
        }
        self.by_column
            .insert(column_name.to_string(), self.columns.len());
        self.attributes
            .insert(attribute.name.clone(), attribute.clone());
        self.columns.push(ColumnMapping {
            column_name: column_name.to_string(),
            attribute,
        });
        Ok(self)
    }

    /// Builder-style [`add_column`](Self::add_column).
    pub fn with_column(
        mut self,
        column_name: &str,
        attribute: impl Into<AttributeDescriptor>,
    ) -> Result<Self> {
        self.add_column(column_name, attribute)?;
        Ok(self)
    }

    /// Declare a non-column attribute (relationship attributes).
    pub fn declare_attribute(&mut self, attribute: AttributeDescriptor) -> Result<()> {
        check_identifier(&self.class_name, &attribute.name)?;
        self.attributes.insert(attribute.name.clone(), attribute);
        Ok(())
    }

    /// Declare the primary key columns, in key order.
    pub fn set_primary_key<S: AsRef<str>>(&mut self, columns: &[S]) -> Result<()> {
        self.primary_key = self.checked_columns(columns)?;
        Ok(())
    }

    /// Builder-style [`set_primary_key`](Self::set_primary_key).
    pub fn with_primary_key<S: AsRef<str>>(mut self, columns: &[S]) -> Result<Self> {
        self.set_primary_key(columns)?;
        Ok(self)
    }

    /// Declare a set of columns whose values identify a row.
    pub fn add_unique<S: AsRef<str>>(&mut self, columns: &[S]) -> Result<()> {
        let cols = self.checked_columns(columns)?;
        self.unique.push(cols);
        Ok(())
    }

    /// Builder-style [`add_unique`](Self::add_unique).
    pub fn with_unique<S: AsRef<str>>(mut self, columns: &[S]) -> Result<Self> {
        self.add_unique(columns)?;
        Ok(self)
    }

    fn checked_columns<S: AsRef<str>>(&self, columns: &[S]) -> Result<Vec<String>> {
        columns
            .iter()
            .map(|c| {
                let c = c.as_ref();
                if self.by_column.contains_key(c) {
                    Ok(c.to_string())
                } else {
                    Err(Error::unknown_attribute(&self.class_name, c))
                }
            })
            .collect()
    }

    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    pub fn unique_keys(&self) -> &[Vec<String>] {
        &self.unique
    }

    pub fn columns(&self) -> &[ColumnMapping] {
        &self.columns
    }

    pub fn column(&self, column_name: &str) -> Option<&ColumnMapping> {
        self.by_column.get(column_name).map(|&i| &self.columns[i])
    }

    pub fn has_column(&self, column_name: &str) -> bool {
        self.by_column.contains_key(column_name)
    }

    /// Column mapped to an attribute name.
    pub fn column_for_attribute(&self, attribute: &str) -> Option<&ColumnMapping> {
        self.columns.iter().find(|c| c.attribute() == attribute)
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.attributes.get(name)
    }

    /// Register a trigger by event name.
    ///
    /// Fails with `InvalidTriggerName` if `event_name` is not one of the
    /// seven lifecycle events.
    pub fn register_trigger(&mut self, event_name: &str, callback: TriggerFn) -> Result<()> {
        let event = TriggerEvent::parse(event_name)
            .ok_or_else(|| Error::invalid_trigger_name(&self.class_name, event_name))?;
        self.on(event, callback);
        Ok(())
    }

    /// Register a trigger for a typed event.
    pub fn on(&mut self, event: TriggerEvent, callback: TriggerFn) {
        tracing::debug!(class = %self.class_name, event = event.as_str(), "Registering trigger");
        self.triggers.set(event, callback);
    }

    pub fn triggers(&self) -> &Triggers {
        &self.triggers
    }

    /// Run the callback for `event` against `object`, if one is registered.
    pub fn fire(&self, event: TriggerEvent, object: &ObjectRef) -> Result<()> {
        let Some(callback) = self.triggers.get(event) else {
            return Ok(());
        };
        tracing::trace!(class = %self.class_name, event = event.as_str(), object = %object.id(), "Firing trigger");
        let mut guard = object.write();
        callback(&mut *guard).map_err(|message| Error::Trigger {
            entity: self.class_name.clone(),
            event: event.as_str(),
            message,
        })
    }

    /// Copy the columns present in `row` into the object's slots. Columns
    /// absent from the row leave their slots untouched.
    pub fn populate(&self, object: &mut Object, row: &Row) {
        for column in &self.columns {
            if let Some(value) = row.get(column.column_name()) {
                column.write(object, value.clone());
            }
        }
    }

    /// Object state as a column-keyed dataset (every mapped column).
    pub fn serialize(&self, object: &Object) -> Row {
        self.columns
            .iter()
            .map(|c| (c.column_name().to_string(), c.read(object)))
            .collect()
    }

    /// Translate an attribute-keyed dataset into a column-keyed one.
    ///
    /// Keys may name either the attribute or its storage slot; keys that
    /// match neither are ignored.
    pub fn serialize_fields(&self, fields: &Row) -> Row {
        let mut out = Row::new();
        for column in &self.columns {
            let value = fields
                .get(column.attribute())
                .or_else(|| fields.get(column.storage_key()));
            if let Some(value) = value {
                out.set(column.column_name(), value.clone());
            }
        }
        out
    }

    /// Current values of the named columns.
    pub fn column_values_for<S: AsRef<str>>(&self, object: &Object, columns: &[S]) -> Result<Row> {
        columns
            .iter()
            .map(|c| {
                let c = c.as_ref();
                self.column(c)
                    .map(|m| (c.to_string(), m.read(object)))
                    .ok_or_else(|| Error::unknown_attribute(&self.class_name, c))
            })
            .collect()
    }

    /// Read an attribute by name.
    pub fn get_attribute(&self, object: &Object, attribute: &str) -> Result<Value> {
        self.column_for_attribute(attribute)
            .map(|c| c.read(object))
            .ok_or_else(|| Error::unknown_attribute(&self.class_name, attribute))
    }

    /// Write an attribute by name.
    pub fn set_attribute(
        &self,
        object: &ObjectRef,
        attribute: &str,
        value: impl Into<Value>,
    ) -> Result<()> {
        let column = self
            .column_for_attribute(attribute)
            .ok_or_else(|| Error::unknown_attribute(&self.class_name, attribute))?;
        column.write(&mut object.write(), value.into());
        Ok(())
    }

    /// Primary key values of an object, in key order.
    pub fn primary_key_values(&self, object: &Object) -> Vec<Value> {
        self.primary_key
            .iter()
            .map(|c| self.column(c).map_or(Value::Null, |m| m.read(object)))
            .collect()
    }

    /// Condition selecting a row by primary key, if the dataset carries a
    /// complete primary key.
    pub fn key_condition(&self, row: &Row) -> Option<Condition> {
        if row.has_values_for(&self.primary_key) {
            Some(Condition::from_pairs(
                &self.primary_key,
                &row.values_for(&self.primary_key),
            ))
        } else {
            None
        }
    }

    /// Build an object from a dataset.
    ///
    /// The context brackets the whole construction so nested relationship
    /// resolution has a well-defined window: columns are copied, the object
    /// is attached to the context, eager relationships are fetched, lazy ones
    /// get a deferred slot, and `on_fetch` fires last.
    pub fn deserialize(&self, row: &Row, ctx: &mut dyn PersistenceContext) -> Result<ObjectRef> {
        ctx.begin_operation(&self.entity_name);
        let result = self.deserialize_within(row, ctx);
        ctx.complete_operation(&self.entity_name);
        result
    }

    fn deserialize_within(&self, row: &Row, ctx: &mut dyn PersistenceContext) -> Result<ObjectRef> {
        let mut object = Object::new(&self.class_name);
        self.populate(&mut object, row);
        let fresh = ObjectRef::new(object);
        let object = ctx.attach(fresh.clone());
        if !object.ptr_eq(&fresh) {
            // Already materialised in this context.
            return Ok(object);
        }

        let catalog = ctx.catalog();
        let registry = catalog.relationships();
        {
            let mut guard = object.write();
            for rel in registry.for_class(&self.class_name) {
                if rel.fetch_method() == FetchMethod::Lazy {
                    guard.defer(rel.attribute());
                }
            }
        }
        for rel in registry.eager_relationships(&self.class_name) {
            if let Err(err) = rel.deserialize_attribute(&object, ctx, self) {
                ctx.detach(&object);
                return Err(err);
            }
        }

        if let Err(err) = self.fire(TriggerEvent::OnFetch, &object) {
            ctx.detach(&object);
            return Err(err);
        }
        Ok(object)
    }
}
