//! QueryProxy entity metadata
//!
//! An `EntityDescriptor` is the declarative description of a mapped type: its
//! columns, primary key, default ordering, relationships and computed
//! attributes. The sort decorator resolves user sort keys against it and
//! backing stores use it to validate and execute queries.
//!
//! # Examples
//!
//! ```
//! use queryproxy::{ColumnType, EntityDescriptor, OrderTerm, Schema};
//!
//! let movie = EntityDescriptor::new(
//!     "movie",
//!     Schema::new(vec![
//!         ("id".to_string(), ColumnType::Int64, false),
//!         ("title".to_string(), ColumnType::String, false),
//!         ("director_id".to_string(), ColumnType::Int64, true),
//!     ]),
//!     vec!["id".to_string()],
//! )
//! .with_default_order(vec![OrderTerm::ascending("title")])
//! .with_relationship("director", "person", vec!["director_id".to_string()]);
//!
//! assert_eq!(movie.primary_key(), &["id".to_string()]);
//! assert!(movie.relationship("director").is_some());
//! ```

use crate::column::{ColumnType, ColumnValue};
use crate::error::{StoreError, StoreResult};
use crate::object::ObjectRef;
use crate::query::OrderTerm;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Schema definition with column names and types.
#[derive(Debug, Clone)]
pub struct Schema {
    columns: Vec<(String, ColumnType, bool)>, // (name, type, nullable)
}

impl Schema {
    /// Creates a new schema from `(column_name, column_type, is_nullable)` tuples.
    pub fn new(columns: Vec<(String, ColumnType, bool)>) -> Self {
        Schema { columns }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn get_column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(name, _, _)| name.as_str()).collect()
    }

    pub fn get_column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|(n, _, _)| n == name)
    }

    pub fn get_column_type(&self, name: &str) -> Option<ColumnType> {
        self.columns
            .iter()
            .find(|(n, _, _)| n == name)
            .map(|(_, ty, _)| *ty)
    }

    pub fn is_column_nullable(&self, name: &str) -> Option<bool> {
        self.columns
            .iter()
            .find(|(n, _, _)| n == name)
            .map(|(_, _, nullable)| *nullable)
    }

    /// Columns of type `String`, in declaration order.
    pub fn text_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|(_, ty, _)| *ty == ColumnType::String)
            .map(|(name, _, _)| name.as_str())
            .collect()
    }
}

/// A many-to-one relationship to another entity through local foreign-key columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub name: String,
    pub target: String,
    pub foreign_key: Vec<String>,
}

type ComputeFn = dyn Fn(&ObjectRef) -> ColumnValue + Send + Sync;

/// An attribute whose value is derived from other columns of the object.
#[derive(Clone)]
pub struct ComputedAttribute {
    name: String,
    compute: Arc<ComputeFn>,
}

impl ComputedAttribute {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn evaluate(&self, object: &ObjectRef) -> ColumnValue {
        (self.compute)(object)
    }
}

impl fmt::Debug for ComputedAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedAttribute").field("name", &self.name).finish()
    }
}

/// How a sort key names an attribute of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind<'a> {
    Column(ColumnType),
    Computed(&'a ComputedAttribute),
    Relationship(&'a Relationship),
}

impl PartialEq for ComputedAttribute {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ComputedAttribute {}

/// Declarative description of a mapped entity.
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    name: String,
    schema: Schema,
    primary_key: Vec<String>,
    default_order: Vec<OrderTerm>,
    relationships: Vec<Relationship>,
    computed: Vec<ComputedAttribute>,
}

impl EntityDescriptor {
    pub fn new(name: impl Into<String>, schema: Schema, primary_key: Vec<String>) -> Self {
        EntityDescriptor {
            name: name.into(),
            schema,
            primary_key,
            default_order: Vec::new(),
            relationships: Vec::new(),
            computed: Vec::new(),
        }
    }

    /// Ordering applied when a query does not ask for one explicitly.
    pub fn with_default_order(mut self, order: Vec<OrderTerm>) -> Self {
        self.default_order = order;
        self
    }

    pub fn with_relationship(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: Vec<String>,
    ) -> Self {
        self.relationships.push(Relationship {
            name: name.into(),
            target: target.into(),
            foreign_key,
        });
        self
    }

    pub fn with_computed<F>(mut self, name: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&ObjectRef) -> ColumnValue + Send + Sync + 'static,
    {
        self.computed.push(ComputedAttribute {
            name: name.into(),
            compute: Arc::new(compute),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    pub fn default_order(&self) -> &[OrderTerm] {
        &self.default_order
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    pub fn relationship(&self, name: &str) -> Option<&Relationship> {
        self.relationships.iter().find(|r| r.name == name)
    }

    pub fn computed(&self, name: &str) -> Option<&ComputedAttribute> {
        self.computed.iter().find(|c| c.name == name)
    }

    /// Resolve an attribute name. Computed attributes shadow columns of the
    /// same name; `None` means the name is not mapped at all.
    pub fn attribute(&self, name: &str) -> Option<AttributeKind<'_>> {
        if let Some(computed) = self.computed(name) {
            return Some(AttributeKind::Computed(computed));
        }
        if let Some(column_type) = self.schema.get_column_type(name) {
            return Some(AttributeKind::Column(column_type));
        }
        self.relationship(name).map(AttributeKind::Relationship)
    }

    pub fn require_column(&self, column: &str) -> StoreResult<ColumnType> {
        self.schema
            .get_column_type(column)
            .ok_or_else(|| StoreError::UnknownColumn {
                entity: self.name.clone(),
                column: column.to_string(),
            })
    }

    pub fn require_relationship(&self, name: &str) -> StoreResult<&Relationship> {
        self.relationship(name)
            .ok_or_else(|| StoreError::UnknownRelationship {
                entity: self.name.clone(),
                relationship: name.to_string(),
            })
    }

    /// Primary key values of `object`, or `None` while any of them is null
    /// (the object has not been persisted yet).
    pub fn primary_key_of(&self, object: &ObjectRef) -> Option<Vec<ColumnValue>> {
        let key: Vec<ColumnValue> = self.primary_key.iter().map(|c| object.get(c)).collect();
        if key.is_empty() || key.iter().any(ColumnValue::is_null) {
            None
        } else {
            Some(key)
        }
    }

    /// Whether `name` is a column or computed attribute, i.e. has a value.
    pub fn has_value_attribute(&self, name: &str) -> bool {
        self.computed(name).is_some() || self.schema.get_column_index(name).is_some()
    }

    /// Attribute value used for filtering and ordering: computed attributes
    /// are evaluated, other names read the stored field.
    pub fn attribute_value(&self, object: &ObjectRef, name: &str) -> Option<ColumnValue> {
        if let Some(computed) = self.computed(name) {
            return Some(computed.evaluate(object));
        }
        self.schema.get_column_index(name).map(|_| object.get(name))
    }
}

/// Set of entity descriptors known to a backing store, keyed by entity name.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entities: HashMap<String, Arc<EntityDescriptor>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    pub fn register(&mut self, descriptor: EntityDescriptor) -> Arc<EntityDescriptor> {
        let descriptor = Arc::new(descriptor);
        self.entities
            .insert(descriptor.name().to_string(), Arc::clone(&descriptor));
        descriptor
    }

    pub fn get(&self, name: &str) -> StoreResult<Arc<EntityDescriptor>> {
        self.entities
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::UnknownEntity(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entities.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
