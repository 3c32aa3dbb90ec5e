//! In-memory backing store
//!
//! `MemoryStore` plays the role of an ORM session over an in-memory database:
//! an identity map per entity (one `ObjectRef` per primary key), a set of new
//! objects waiting for `flush`, and a query executor honoring criteria,
//! outer joins, ordering and pagination with the same semantics the proxies
//! expect from a relational backend.
//!
//! The store can be switched unavailable to simulate a lost connection, and it
//! counts its round trips so callers can verify how many queries an operation
//! issued.
//!
//! # Examples
//!
//! ```
//! use queryproxy::{Backend, ColumnType, EntityDescriptor, MemoryStore, Query, Schema};
//!
//! let store = MemoryStore::new();
//! store.register(EntityDescriptor::new(
//!     "movie",
//!     Schema::new(vec![
//!         ("id".to_string(), ColumnType::Int64, false),
//!         ("title".to_string(), ColumnType::String, false),
//!     ]),
//!     vec!["id".to_string()],
//! ));
//!
//! store.load_json("movie", r#"[{"title": "The Shining"}, {"title": "Toy Story"}]"#).unwrap();
//!
//! let titles: Vec<String> = store
//!     .fetch(&Query::new("movie").filter_str("title CONTAINS 'toy'").unwrap())
//!     .unwrap()
//!     .iter()
//!     .map(|movie| movie.get("title").as_string().unwrap_or_default().to_string())
//!     .collect();
//! assert_eq!(titles, vec!["Toy Story".to_string()]);
//! ```

use crate::column::{ColumnType, ColumnValue};
use crate::entity::{EntityDescriptor, Registry};
use crate::error::{StoreError, StoreResult};
use crate::expr::{eval_expr, extract_columns};
use crate::object::ObjectRef;
use crate::query::{OrderExpr, OrderTerm, Query, SortOrder};
use crate::store::Backend;
use log::{debug, trace, warn};
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

/// Round trips served by a `MemoryStore` since creation or the last reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub fetches: usize,
    pub counts: usize,
    pub lookups: usize,
}

#[derive(Default)]
struct EntityTable {
    /// Persisted objects in insertion order
    rows: Vec<ObjectRef>,
    by_key: HashMap<Vec<ColumnValue>, ObjectRef>,
    next_id: i64,
}

#[derive(Default)]
struct SessionState {
    registry: Registry,
    tables: HashMap<String, EntityTable>,
    new: Vec<ObjectRef>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<SessionState>,
    unavailable: AtomicBool,
    fetches: AtomicUsize,
    counts: AtomicUsize,
    lookups: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Register an entity; re-registering a name replaces its descriptor.
    pub fn register(&self, descriptor: EntityDescriptor) -> Arc<EntityDescriptor> {
        let mut state = self.state.write();
        state.tables.entry(descriptor.name().to_string()).or_default();
        state.registry.register(descriptor)
    }

    /// Create a detached object of `entity`, validating and coercing the
    /// given values against the schema. The object is not part of the session
    /// until it is `add`ed.
    pub fn create<K, I>(&self, entity: &str, fields: I) -> StoreResult<ObjectRef>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, ColumnValue)>,
    {
        let descriptor = self.state.read().registry.get(entity)?;
        let mut values = Vec::new();
        for (column, value) in fields {
            let column = column.into();
            let column_type = descriptor.require_column(&column)?;
            let value = value.coerce(column_type).ok_or_else(|| StoreError::InvalidValue {
                entity: entity.to_string(),
                column: column.clone(),
                reason: format!("expected {:?}", column_type),
            })?;
            values.push((column, value));
        }
        Ok(ObjectRef::new(entity, values))
    }

    /// Add an object to the session's set of new objects.
    pub fn add(&self, object: &ObjectRef) -> StoreResult<()> {
        let mut state = self.state.write();
        state.registry.get(object.entity())?;
        let persisted = state
            .tables
            .get(object.entity())
            .is_some_and(|table| table.rows.contains(object));
        if !persisted && !state.new.contains(object) {
            state.new.push(object.clone());
        }
        Ok(())
    }

    /// Persist all new objects, assigning integer primary keys where they are
    /// still null. Returns the number of objects flushed.
    ///
    /// An object that fails validation is dropped from the new set untouched;
    /// the objects after it stay new.
    pub fn flush(&self) -> StoreResult<usize> {
        if self.unavailable.load(AtomicOrdering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        let mut state = self.state.write();
        let pending = std::mem::take(&mut state.new);
        let mut flushed = 0;

        for (position, object) in pending.iter().enumerate() {
            if let Err(err) = Self::persist(&mut state, object) {
                warn!("discarding unflushable {} object: {}", object.entity(), err);
                state.new.extend(pending[position + 1..].iter().cloned());
                return Err(err);
            }
            flushed += 1;
        }

        debug!("flushed {} new objects", flushed);
        Ok(flushed)
    }

    /// Validate `object` and add it to its table. Nothing is modified unless it
    /// succeeds.
    fn persist(state: &mut SessionState, object: &ObjectRef) -> StoreResult<()> {
        let descriptor = state.registry.get(object.entity())?;
        let table = state.tables.entry(descriptor.name().to_string()).or_default();
        let invalid = |column: String, reason: String| StoreError::InvalidValue {
            entity: descriptor.name().to_string(),
            column,
            reason,
        };

        let generated = match descriptor.primary_key() {
            [pk_column] if object.get(pk_column).is_null() => {
                let id = table.next_id + 1;
                match descriptor.require_column(pk_column)? {
                    ColumnType::Int32 => {
                        let id = i32::try_from(id).map_err(|_| {
                            invalid(pk_column.clone(), "primary key sequence exhausted".to_string())
                        })?;
                        Some((pk_column, ColumnValue::Int32(id)))
                    }
                    ColumnType::Int64 => Some((pk_column, ColumnValue::Int64(id))),
                    _ => None,
                }
            }
            _ => None,
        };

        for column in descriptor.schema().get_column_names() {
            let assigned = generated.as_ref().is_some_and(|(pk, _)| pk.as_str() == column);
            if descriptor.schema().is_column_nullable(column) == Some(false)
                && object.get(column).is_null()
                && !assigned
            {
                return Err(invalid(column.to_string(), "null in non-nullable column".to_string()));
            }
        }

        let key = match &generated {
            Some((_, id)) => vec![id.clone()],
            None => descriptor.primary_key_of(object).ok_or_else(|| {
                invalid(descriptor.primary_key().join(","), "primary key is null".to_string())
            })?,
        };
        if table.by_key.contains_key(&key) {
            return Err(invalid(
                descriptor.primary_key().join(","),
                format!("duplicate primary key {:?}", key),
            ));
        }

        if let Some((pk_column, id)) = generated {
            object.set(pk_column, id);
        }
        if let [single] = key.as_slice() {
            if let Some(id) = single.as_i64() {
                table.next_id = table.next_id.max(id);
            }
        }
        trace!("persisted {} {:?}", descriptor.name(), key);
        table.by_key.insert(key, object.clone());
        table.rows.push(object.clone());
        Ok(())
    }

    /// Create, add and flush an object in one step.
    pub fn insert<K, I>(&self, entity: &str, fields: I) -> StoreResult<ObjectRef>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, ColumnValue)>,
    {
        let object = self.create(entity, fields)?;
        self.add(&object)?;
        self.flush()?;
        Ok(object)
    }

    /// Remove an object from the session, persisted or new. Returns whether
    /// it was known.
    pub fn delete(&self, object: &ObjectRef) -> bool {
        let mut state = self.state.write();
        if let Some(position) = state.new.iter().position(|o| o == object) {
            state.new.remove(position);
            return true;
        }
        let Some(table) = state.tables.get_mut(object.entity()) else {
            return false;
        };
        let Some(position) = table.rows.iter().position(|o| o == object) else {
            return false;
        };
        table.rows.remove(position);
        table.by_key.retain(|_, o| o != object);
        true
    }

    /// Identity-map lookup, bypassing any query criteria.
    pub fn get_by_key(&self, entity: &str, key: &[ColumnValue]) -> Option<ObjectRef> {
        self.state
            .read()
            .tables
            .get(entity)
            .and_then(|table| table.by_key.get(key).cloned())
    }

    /// Number of persisted objects of `entity`.
    pub fn len(&self, entity: &str) -> usize {
        self.state
            .read()
            .tables
            .get(entity)
            .map_or(0, |table| table.rows.len())
    }

    /// Number of objects waiting for `flush`.
    pub fn new_count(&self) -> usize {
        self.state.read().new.len()
    }

    /// Load fixtures from a JSON array of objects and flush them.
    ///
    /// Keys must be columns of `entity`; missing columns are null (and integer
    /// primary keys are assigned).
    pub fn load_json(&self, entity: &str, json: &str) -> StoreResult<Vec<ObjectRef>> {
        let descriptor = self.state.read().registry.get(entity)?;
        let parsed: Vec<serde_json::Value> = serde_json::from_str(json)?;

        let mut objects = Vec::with_capacity(parsed.len());
        for (index, item) in parsed.iter().enumerate() {
            let fields = item
                .as_object()
                .ok_or_else(|| StoreError::InvalidFixture(format!("element {} is not an object", index)))?;
            let mut values = Vec::with_capacity(fields.len());
            for (column, json_value) in fields {
                let column_type = descriptor.require_column(column)?;
                let value = ColumnValue::from_json(json_value, column_type).map_err(|reason| {
                    StoreError::InvalidValue {
                        entity: entity.to_string(),
                        column: column.clone(),
                        reason,
                    }
                })?;
                values.push((column.clone(), value));
            }
            objects.push(ObjectRef::new(entity, values));
        }

        for object in &objects {
            self.add(object)?;
        }
        self.flush()?;
        debug!("loaded {} {} fixtures", objects.len(), entity);
        Ok(objects)
    }

    /// Simulate losing or regaining the connection.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, AtomicOrdering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        !self.unavailable.load(AtomicOrdering::SeqCst)
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            fetches: self.fetches.load(AtomicOrdering::Relaxed),
            counts: self.counts.load(AtomicOrdering::Relaxed),
            lookups: self.lookups.load(AtomicOrdering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        self.fetches.store(0, AtomicOrdering::Relaxed);
        self.counts.store(0, AtomicOrdering::Relaxed);
        self.lookups.store(0, AtomicOrdering::Relaxed);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(StoreError::Unavailable)
        }
    }

    fn validate_criteria(descriptor: &EntityDescriptor, query: &Query) -> StoreResult<()> {
        for expr in query.criteria() {
            for column in extract_columns(expr) {
                if !descriptor.has_value_attribute(&column) {
                    return Err(StoreError::UnknownColumn {
                        entity: descriptor.name().to_string(),
                        column,
                    });
                }
            }
        }
        for join in query.joins() {
            descriptor.require_relationship(join)?;
        }
        Ok(())
    }

    /// Persisted objects matching the criteria of `query`, in insertion order.
    fn matching(state: &SessionState, descriptor: &EntityDescriptor, query: &Query) -> StoreResult<Vec<ObjectRef>> {
        Self::validate_criteria(descriptor, query)?;

        let Some(table) = state.tables.get(descriptor.name()) else {
            return Ok(Vec::new());
        };
        Ok(table
            .rows
            .iter()
            .filter(|object| {
                query
                    .criteria()
                    .iter()
                    .all(|expr| eval_expr(expr, &|column: &str| descriptor.attribute_value(object, column)))
            })
            .cloned()
            .collect())
    }

    /// Value of one ordering term for `object`. Unmatched outer joins yield NULL.
    fn order_value(
        state: &SessionState,
        descriptor: &EntityDescriptor,
        object: &ObjectRef,
        expr: &OrderExpr,
    ) -> ColumnValue {
        match expr {
            OrderExpr::Column(column) | OrderExpr::Computed(column) => descriptor
                .attribute_value(object, column)
                .unwrap_or(ColumnValue::Null),
            OrderExpr::Related { relationship, column } => {
                let Some(rel) = descriptor.relationship(relationship) else {
                    return ColumnValue::Null;
                };
                let key: Vec<ColumnValue> = rel.foreign_key.iter().map(|c| object.get(c)).collect();
                if key.iter().any(ColumnValue::is_null) {
                    return ColumnValue::Null;
                }
                state
                    .tables
                    .get(&rel.target)
                    .and_then(|table| table.by_key.get(&key))
                    .map_or(ColumnValue::Null, |target| target.get(column))
            }
        }
    }

    fn validate_order(state: &SessionState, descriptor: &EntityDescriptor, query: &Query) -> StoreResult<()> {
        for term in query.order() {
            match &term.expr {
                OrderExpr::Column(column) => {
                    descriptor.require_column(column)?;
                }
                OrderExpr::Computed(name) => {
                    if descriptor.computed(name).is_none() {
                        return Err(StoreError::UnknownColumn {
                            entity: descriptor.name().to_string(),
                            column: name.clone(),
                        });
                    }
                }
                OrderExpr::Related { relationship, column } => {
                    let rel = descriptor.require_relationship(relationship)?;
                    if !query.is_joined(relationship) {
                        return Err(StoreError::NotJoined(relationship.clone()));
                    }
                    state.registry.get(&rel.target)?.require_column(column)?;
                }
            }
        }
        Ok(())
    }
}

/// Compare two rows by their precomputed ordering values. NULL sorts last in
/// ascending order and first in descending order.
fn compare_rows(a: &[ColumnValue], b: &[ColumnValue], terms: &[OrderTerm]) -> Ordering {
    for ((va, vb), term) in a.iter().zip(b.iter()).zip(terms) {
        let cmp = match (va.is_null(), vb.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => va.total_cmp(vb),
        };
        let cmp = match term.order {
            SortOrder::Ascending => cmp,
            SortOrder::Descending => cmp.reverse(),
        };
        if cmp != Ordering::Equal {
            return cmp;
        }
    }
    Ordering::Equal
}

impl Backend for MemoryStore {
    fn descriptor(&self, entity: &str) -> StoreResult<Arc<EntityDescriptor>> {
        self.state.read().registry.get(entity)
    }

    fn count(&self, query: &Query) -> StoreResult<usize> {
        self.check_available()?;
        self.counts.fetch_add(1, AtomicOrdering::Relaxed);
        let state = self.state.read();
        let descriptor = state.registry.get(query.entity())?;
        Ok(Self::matching(&state, &descriptor, query)?.len())
    }

    fn fetch(&self, query: &Query) -> StoreResult<Vec<ObjectRef>> {
        self.check_available()?;
        self.fetches.fetch_add(1, AtomicOrdering::Relaxed);
        let state = self.state.read();
        let descriptor = state.registry.get(query.entity())?;
        Self::validate_order(&state, &descriptor, query)?;

        let rows = Self::matching(&state, &descriptor, query)?;
        let mut keyed: Vec<(Vec<ColumnValue>, ObjectRef)> = rows
            .into_iter()
            .map(|object| {
                let values = query
                    .order()
                    .iter()
                    .map(|term| Self::order_value(&state, &descriptor, &object, &term.expr))
                    .collect();
                (values, object)
            })
            .collect();
        // Stable: ties keep insertion order
        keyed.sort_by(|(a, _), (b, _)| compare_rows(a, b, query.order()));

        let page = keyed
            .into_iter()
            .skip(query.offset_value())
            .take(query.limit_value().unwrap_or(usize::MAX))
            .map(|(_, object)| object)
            .collect::<Vec<_>>();
        trace!(
            "fetched {} {} rows (offset {}, limit {:?})",
            page.len(),
            query.entity(),
            query.offset_value(),
            query.limit_value()
        );
        Ok(page)
    }

    fn get(&self, query: &Query, key: &[ColumnValue]) -> StoreResult<Option<ObjectRef>> {
        self.check_available()?;
        self.lookups.fetch_add(1, AtomicOrdering::Relaxed);
        let state = self.state.read();
        let descriptor = state.registry.get(query.entity())?;
        Self::validate_criteria(&descriptor, query)?;

        let Some(object) = state
            .tables
            .get(query.entity())
            .and_then(|table| table.by_key.get(key))
        else {
            return Ok(None);
        };
        let visible = query
            .criteria()
            .iter()
            .all(|expr| eval_expr(expr, &|column: &str| descriptor.attribute_value(object, column)));
        Ok(visible.then(|| object.clone()))
    }

    fn is_new(&self, object: &ObjectRef) -> bool {
        self.state.read().new.contains(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Schema;

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.register(
            EntityDescriptor::new(
                "person",
                Schema::new(vec![
                    ("id".to_string(), ColumnType::Int64, false),
                    ("name".to_string(), ColumnType::String, false),
                ]),
                vec!["id".to_string()],
            )
            .with_default_order(vec![OrderTerm::ascending("name")]),
        );
        store.register(
            EntityDescriptor::new(
                "movie",
                Schema::new(vec![
                    ("id".to_string(), ColumnType::Int64, false),
                    ("title".to_string(), ColumnType::String, false),
                    ("rating".to_string(), ColumnType::Int32, true),
                    ("director_id".to_string(), ColumnType::Int64, true),
                ]),
                vec!["id".to_string()],
            )
            .with_relationship("director", "person", vec!["director_id".to_string()]),
        );
        store
            .load_json("person", r#"[{"name": "Stanley Kubrick"}, {"name": "Doug Liman"}]"#)
            .unwrap();
        store
            .load_json(
                "movie",
                r#"[
                    {"title": "The Shining", "rating": 4, "director_id": 1},
                    {"title": "The Bourne Identity", "rating": 4, "director_id": 2},
                    {"title": "Casino Royale", "rating": 5},
                    {"title": "Toy Story", "rating": null}
                ]"#,
            )
            .unwrap();
        store
    }

    fn titles(objects: &[ObjectRef]) -> Vec<String> {
        objects
            .iter()
            .map(|o| o.get("title").as_string().unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn test_flush_assigns_keys() {
        let store = store();
        assert_eq!(store.len("movie"), 4);
        let alien = store.create("movie", vec![("title", ColumnValue::from("Alien"))]).unwrap();
        store.add(&alien).unwrap();
        assert!(store.is_new(&alien));
        assert!(alien.get("id").is_null());

        assert_eq!(store.flush().unwrap(), 1);
        assert!(!store.is_new(&alien));
        assert_eq!(alien.get("id"), ColumnValue::Int64(5));
        assert_eq!(store.get_by_key("movie", &[ColumnValue::Int64(5)]), Some(alien));
    }

    #[test]
    fn test_fetch_orders_with_nulls_last() {
        let store = store();
        let query = Query::new("movie")
            .order_by(OrderTerm::descending("rating"))
            .order_by(OrderTerm::ascending("id"));
        // Descending puts NULL first
        assert_eq!(
            titles(&store.fetch(&query).unwrap()),
            vec!["Toy Story", "Casino Royale", "The Shining", "The Bourne Identity"]
        );

        let query = Query::new("movie").order_by(OrderTerm::ascending("rating")).limit(2).offset(2);
        assert_eq!(titles(&store.fetch(&query).unwrap()), vec!["Casino Royale", "Toy Story"]);
    }

    #[test]
    fn test_related_ordering_requires_join() {
        let store = store();
        let term = OrderTerm::new(
            OrderExpr::Related {
                relationship: "director".to_string(),
                column: "name".to_string(),
            },
            SortOrder::Ascending,
        );
        let query = Query::new("movie").order_by(term.clone());
        assert!(matches!(store.fetch(&query), Err(StoreError::NotJoined(_))));

        let query = Query::new("movie")
            .outer_join("director")
            .order_by(term)
            .order_by(OrderTerm::ascending("id"));
        assert_eq!(
            titles(&store.fetch(&query).unwrap()),
            vec!["The Bourne Identity", "The Shining", "Casino Royale", "Toy Story"]
        );
    }

    #[test]
    fn test_count_and_get_honor_criteria() {
        let store = store();
        let query = Query::new("movie").filter_str("rating == 4").unwrap();
        assert_eq!(store.count(&query).unwrap(), 2);
        assert!(store.get(&query, &[ColumnValue::Int64(1)]).unwrap().is_some());
        assert!(store.get(&query, &[ColumnValue::Int64(3)]).unwrap().is_none());
        assert_eq!(store.stats(), StoreStats { fetches: 0, counts: 1, lookups: 2 });
    }

    #[test]
    fn test_unknown_column_is_an_error() {
        let store = store();
        let query = Query::new("movie").filter_str("budget > 10").unwrap();
        assert!(matches!(store.count(&query), Err(StoreError::UnknownColumn { .. })));
        assert!(matches!(
            store.fetch(&Query::new("movie").order_by(OrderTerm::ascending("budget"))),
            Err(StoreError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn test_unavailable_store() {
        let store = store();
        store.set_available(false);
        assert!(matches!(store.count(&Query::new("movie")), Err(StoreError::Unavailable)));
        assert!(matches!(store.fetch(&Query::new("movie")), Err(StoreError::Unavailable)));
        store.set_available(true);
        assert_eq!(store.count(&Query::new("movie")).unwrap(), 4);
    }

    #[test]
    fn test_delete_and_invalid_fixtures() {
        let store = store();
        let shining = store.get_by_key("movie", &[ColumnValue::Int64(1)]).unwrap();
        assert!(store.delete(&shining));
        assert!(!store.delete(&shining));
        assert_eq!(store.len("movie"), 3);

        assert!(matches!(
            store.load_json("movie", r#"[{"title": 3}]"#),
            Err(StoreError::InvalidValue { .. })
        ));
        assert!(matches!(
            store.load_json("movie", r#"[{"plot": "x"}]"#),
            Err(StoreError::UnknownColumn { .. })
        ));
        assert!(matches!(store.load_json("movie", r#"[1]"#), Err(StoreError::InvalidFixture(_))));
        assert!(matches!(store.load_json("movie", "not json"), Err(StoreError::Json(_))));
    }

    #[test]
    fn test_failed_flush_drops_only_the_invalid_object() {
        let store = store();
        let nameless = store.create("person", Vec::<(String, ColumnValue)>::new()).unwrap();
        let ridley = store.create("person", vec![("name", ColumnValue::from("Ridley Scott"))]).unwrap();
        store.add(&nameless).unwrap();
        store.add(&ridley).unwrap();

        assert!(matches!(store.flush(), Err(StoreError::InvalidValue { .. })));
        assert!(nameless.get("id").is_null());
        assert!(!store.is_new(&nameless));
        assert!(store.is_new(&ridley));

        assert_eq!(store.flush().unwrap(), 1);
        assert_eq!(ridley.get("id"), ColumnValue::Int64(3));
        assert_eq!(store.len("person"), 3);
    }

    #[test]
    fn test_invalid_fixture_does_not_break_the_session() {
        let store = store();
        assert!(matches!(store.load_json("person", "[{}]"), Err(StoreError::InvalidValue { .. })));
        assert_eq!(store.new_count(), 0);

        let person = store.insert("person", vec![("name", ColumnValue::from("Ridley Scott"))]).unwrap();
        assert_eq!(person.get("id"), ColumnValue::Int64(3));
    }
}
