//! Query model proxy
//!
//! `QueryModelProxy` projects a query of a backing store, extended with a list
//! of pending objects, onto virtual rows:
//!
//! ```text
//!   rows 0 .. count            objects returned by the filtered, sorted query
//!   rows count .. count + n    pending objects, in the order they were appended
//! ```
//!
//! Nothing is fetched up front. The length costs one count round trip and is
//! memoized; rows are resolved a window at a time with
//! `extend_indexed_objects`, one fetch per window, and cached in a two-way
//! index so the row of an object can be found without another query.
//!
//! Sorting, filtering and removal invalidate the cache wholesale and bump the
//! proxy's generation. A reader that captured an older generation gets
//! `ProxyError::StaleGeneration` from `row_checked` and re-resolves.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use queryproxy::{
//!     ColumnType, ColumnValue, EntityDescriptor, MemoryStore, ModelProxy, Query, QueryModelProxy, Schema,
//! };
//!
//! let store = Arc::new(MemoryStore::new());
//! store.register(EntityDescriptor::new(
//!     "movie",
//!     Schema::new(vec![
//!         ("id".to_string(), ColumnType::Int64, false),
//!         ("title".to_string(), ColumnType::String, false),
//!     ]),
//!     vec!["id".to_string()],
//! ));
//! store.load_json("movie", r#"[{"title": "Casino"}, {"title": "Alien"}, {"title": "Heat"}]"#).unwrap();
//!
//! let mut proxy = QueryModelProxy::new(store.clone(), Query::new("movie")).unwrap();
//! proxy.sort(Some("title"), false).unwrap();
//!
//! assert_eq!(proxy.len().unwrap(), 3);
//! let titles: Vec<ColumnValue> = proxy
//!     .rows(0, 3)
//!     .unwrap()
//!     .iter()
//!     .map(|movie| movie.get("title"))
//!     .collect();
//! let expected: Vec<ColumnValue> = vec!["Alien".into(), "Casino".into(), "Heat".into()];
//! assert_eq!(titles, expected);
//! ```

use crate::entity::EntityDescriptor;
use crate::error::ProxyResult;
use crate::filter::{Filter, FilterSet, FilterValue};
use crate::list_proxy::{ListModelProxy, ModelProxy};
use crate::mapper::TwoWayDict;
use crate::object::ObjectRef;
use crate::options::ProxyOptions;
use crate::query::Query;
use crate::sort::SortDecorator;
use crate::store::Backend;
use log::{debug, trace};
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub struct QueryModelProxy {
    backend: Arc<dyn Backend>,
    descriptor: Arc<EntityDescriptor>,
    query: Query,
    /// Objects appended while not (yet) part of the query result
    pending: ListModelProxy,
    indexed: TwoWayDict<usize, ObjectRef>,
    /// Memoized number of objects in the query result
    length: Option<usize>,
    filters: FilterSet,
    sort_decorator: SortDecorator,
    generation: u64,
    options: ProxyOptions,
}

impl QueryModelProxy {
    pub fn new(backend: Arc<dyn Backend>, query: Query) -> ProxyResult<Self> {
        let descriptor = backend.descriptor(query.entity())?;
        Ok(QueryModelProxy {
            backend,
            descriptor,
            query,
            pending: ListModelProxy::default(),
            indexed: TwoWayDict::new(),
            length: None,
            filters: FilterSet::new(),
            sort_decorator: SortDecorator::unsorted(),
            generation: 0,
            options: ProxyOptions::default(),
        })
    }

    pub fn with_options(mut self, options: ProxyOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &ProxyOptions {
        &self.options
    }

    pub fn descriptor(&self) -> &EntityDescriptor {
        &self.descriptor
    }

    /// The query the proxy was created with, without filters or ordering.
    pub fn base_query(&self) -> &Query {
        &self.query
    }

    pub fn pending(&self) -> &ListModelProxy {
        &self.pending
    }

    pub fn sort_decorator(&self) -> &SortDecorator {
        &self.sort_decorator
    }

    /// An independent proxy over the same backend, base query and pending
    /// objects. Filters, ordering, memoized count and index cache are copied,
    /// so changing one proxy does not affect the other.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// The query used to fetch rows: the base query decorated by every active
    /// filter and, when `order_clause` is set, by the sort decorator.
    pub fn get_query(&self, order_clause: bool) -> ProxyResult<Query> {
        let query = self.filters.decorate(self.query.clone())?;
        if order_clause {
            Ok(self.sort_decorator.decorate(query, &self.descriptor))
        } else {
            Ok(query)
        }
    }

    fn persisted_count(&mut self) -> ProxyResult<usize> {
        if let Some(length) = self.length {
            return Ok(length);
        }
        let query = self.get_query(false)?.without_order();
        let length = self.backend.count(&query)?;
        debug!("{} rows in {} query", length, self.descriptor.name());
        self.length = Some(length);
        Ok(length)
    }

    /// Activate `filter` with `value`, replacing a filter with the same key.
    pub fn set_filter(&mut self, filter: Arc<dyn Filter>, value: FilterValue) {
        self.filters.set(filter, value);
        self.reset();
    }

    /// Deactivate the filter with `key`. Returns whether it was active.
    pub fn clear_filter(&mut self, key: &str) -> bool {
        let removed = self.filters.remove(key);
        if removed {
            self.reset();
        }
        removed
    }

    pub fn filters(&self) -> &FilterSet {
        &self.filters
    }

    /// Forget the memoized count and every resolved row.
    pub fn reset(&mut self) {
        self.length = None;
        self.indexed.clear();
        self.pending.reset_cache();
        self.generation += 1;
    }

    /// Object at `row`, resolving the window of `options.window` rows that
    /// contains it when the row is not cached yet.
    pub fn object_at(&mut self, row: usize) -> ProxyResult<Option<ObjectRef>> {
        if let Some(object) = self.row(row) {
            return Ok(Some(object));
        }
        let window = self.options.window.max(1);
        self.extend_indexed_objects(row - row % window, window)?;
        Ok(self.row(row))
    }
}

impl ModelProxy for QueryModelProxy {
    fn len(&mut self) -> ProxyResult<usize> {
        Ok(self.persisted_count()? + self.pending.length())
    }

    fn append(&mut self, object: ObjectRef) -> ProxyResult<()> {
        if self.pending.contains(&object) {
            return Ok(());
        }
        // Unflushed objects cannot be part of the query result
        if self.backend.is_new(&object) {
            self.pending.push(object);
            return Ok(());
        }
        if let Some(key) = self.descriptor.primary_key_of(&object) {
            let query = self.get_query(false)?;
            if self.backend.get(&query, &key)?.is_some() {
                return Ok(());
            }
        }
        self.pending.push(object);
        Ok(())
    }

    fn remove(&mut self, object: &ObjectRef) -> ProxyResult<()> {
        if !self.pending.discard(object) {
            // Trust the caller: the object is assumed to be in the query result
            if let Some(length) = self.length {
                self.length = Some(length.saturating_sub(1));
            }
        }
        self.indexed.clear();
        self.pending.reset_cache();
        self.generation += 1;
        Ok(())
    }

    fn index(&mut self, object: &ObjectRef) -> ProxyResult<Option<usize>> {
        if let Some(row) = self.indexed.get_key(object) {
            return Ok(Some(*row));
        }
        let Some(position) = self.pending.position(object) else {
            return Ok(None);
        };
        let row = self.persisted_count()? + position;
        self.indexed.insert(row, object.clone());
        Ok(Some(row))
    }

    fn sort(&mut self, key: Option<&str>, reverse: bool) -> ProxyResult<()> {
        self.sort_decorator = match key {
            Some(key) => SortDecorator::new(&self.descriptor, self.backend.as_ref(), key, reverse),
            None => SortDecorator::unsorted(),
        };
        self.indexed.clear();
        self.length = None;
        self.generation += 1;
        Ok(())
    }

    fn extend_indexed_objects(&mut self, offset: usize, limit: usize) -> ProxyResult<()> {
        debug!("extend cache from {} with limit {}", offset, limit);
        if limit == 0 {
            return Ok(());
        }
        let query = self.get_query(true)?.offset(offset).limit(limit);
        let fetched = self.backend.fetch(&query)?;

        let mut free_row = offset;
        for object in fetched {
            // Lowest row that is free or already holds this object
            while let Some(existing) = self.indexed.get_value(&free_row) {
                if *existing == object {
                    break;
                }
                free_row += 1;
            }
            // A row cached earlier, e.g. the pending tail row, is rebound
            if self.indexed.get_key(&object) != Some(&free_row) {
                trace!("row {} -> object {}", free_row, object.oid());
                self.indexed.insert(free_row, object.clone());
            }
            // Became visible through the query; keep the total length unchanged
            if self.pending.discard(&object) {
                if let Some(length) = self.length {
                    self.length = Some(length + 1);
                }
            }
        }

        let row_count = self.len()?;
        let rows_in_query = row_count - self.pending.length();
        let end = offset.saturating_add(limit);
        if end >= rows_in_query {
            for row in rows_in_query.max(offset)..end.min(row_count) {
                if let Some(object) = self.pending.object_at(row - rows_in_query) {
                    self.indexed.insert(row, object.clone());
                }
            }
        }
        Ok(())
    }

    fn row(&self, row: usize) -> Option<ObjectRef> {
        self.indexed.get_value(&row).cloned()
    }

    fn generation(&self) -> u64 {
        self.generation
    }
}

impl fmt::Debug for QueryModelProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryModelProxy")
            .field("query", &self.query)
            .field("pending", &self.pending.length())
            .field("indexed", &self.indexed.len())
            .field("length", &self.length)
            .field("filters", &self.filters.keys())
            .field("sort", &self.sort_decorator)
            .field("generation", &self.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{ColumnType, ColumnValue};
    use crate::entity::Schema;
    use crate::error::{ProxyError, StoreError};
    use crate::filter::{ExprFilter, FieldFilter};
    use crate::memory::{MemoryStore, StoreStats};
    use crate::query::OrderTerm;

    fn person_descriptor() -> EntityDescriptor {
        EntityDescriptor::new(
            "person",
            Schema::new(vec![
                ("id".to_string(), ColumnType::Int64, false),
                ("name".to_string(), ColumnType::String, false),
                ("age".to_string(), ColumnType::Int32, true),
                ("city".to_string(), ColumnType::String, true),
            ]),
            vec!["id".to_string()],
        )
    }

    /// Ten people with primary keys 1..=10; ages cycle 21, 22, 20.
    fn people() -> Arc<MemoryStore> {
        people_of(person_descriptor())
    }

    fn people_of(descriptor: EntityDescriptor) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.register(descriptor);
        for i in 1..=10 {
            let city = if i % 2 == 0 { "Ghent" } else { "Brussels" };
            store
                .insert(
                    "person",
                    vec![
                        ("name", ColumnValue::from(format!("person {:02}", i))),
                        ("age", ColumnValue::Int32(20 + i % 3)),
                        ("city", ColumnValue::from(city)),
                    ],
                )
                .unwrap();
        }
        store.reset_stats();
        store
    }

    fn proxy(store: &Arc<MemoryStore>) -> QueryModelProxy {
        QueryModelProxy::new(store.clone(), Query::new("person")).unwrap()
    }

    fn new_person(store: &MemoryStore, name: &str) -> ObjectRef {
        let person = store
            .create("person", vec![("name", ColumnValue::from(name))])
            .unwrap();
        store.add(&person).unwrap();
        person
    }

    fn ids(objects: &[ObjectRef]) -> Vec<i64> {
        objects
            .iter()
            .map(|o| o.get("id").as_i64().unwrap_or(-1))
            .collect()
    }

    #[test]
    fn test_window_resolves_with_one_fetch() {
        let store = people();
        let mut proxy = proxy(&store);

        proxy.extend_indexed_objects(2, 3).unwrap();
        let rows: Vec<ObjectRef> = (2..5).filter_map(|row| proxy.row(row)).collect();
        assert_eq!(ids(&rows), vec![3, 4, 5]);
        assert_eq!(proxy.row(1), None);
        assert_eq!(proxy.row(5), None);
        assert_eq!(store.stats().fetches, 1);
    }

    #[test]
    fn test_full_window_in_primary_key_order() {
        let store = people();
        let mut proxy = proxy(&store);
        assert_eq!(proxy.len().unwrap(), 10);

        proxy.extend_indexed_objects(0, 10).unwrap();
        let rows: Vec<ObjectRef> = (0..10).filter_map(|row| proxy.row(row)).collect();
        assert_eq!(ids(&rows), (1..=10).collect::<Vec<i64>>());
    }

    #[test]
    fn test_append_new_object_goes_to_tail() {
        let store = people();
        let mut proxy = proxy(&store);
        let person = new_person(&store, "newcomer");

        proxy.append(person.clone()).unwrap();
        assert_eq!(proxy.len().unwrap(), 11);
        assert_eq!(proxy.index(&person).unwrap(), Some(10));
        // No lookup is needed for an unflushed object
        assert_eq!(store.stats().lookups, 0);

        proxy.extend_indexed_objects(8, 4).unwrap();
        assert_eq!(proxy.row(10), Some(person));
        assert_eq!(proxy.row(11), None);
    }

    #[test]
    fn test_filter_with_pending_object() {
        let store = people();
        let mut proxy = proxy(&store);
        proxy.set_filter(Arc::new(ExprFilter::new("where")), FilterValue::Text("age == 21".to_string()));
        assert_eq!(proxy.len().unwrap(), 4);

        let person = new_person(&store, "newcomer");
        proxy.append(person.clone()).unwrap();
        assert_eq!(proxy.len().unwrap(), 5);

        let rows = proxy.rows(0, 5).unwrap();
        assert_eq!(ids(&rows[..4]), vec![1, 4, 7, 10]);
        assert_eq!(rows[4], person);
        assert_eq!(proxy.index(&person).unwrap(), Some(4));
    }

    #[test]
    fn test_window_of_one_gives_total_order() {
        let store = people();
        let mut proxy = proxy(&store);
        proxy.sort(Some("age"), false).unwrap();

        let mut traversals = Vec::new();
        for _ in 0..2 {
            let mut one_by_one = Vec::new();
            for row in 0..10 {
                proxy.extend_indexed_objects(row, 1).unwrap();
                one_by_one.extend(proxy.row(row));
            }
            traversals.push(one_by_one);
        }
        let one_by_one = traversals.remove(0);
        assert_eq!(one_by_one, traversals[0]);
        let distinct: std::collections::HashSet<_> = one_by_one.iter().collect();
        assert_eq!(distinct.len(), 10);

        let mut other = self::proxy(&store);
        other.sort(Some("age"), false).unwrap();
        assert_eq!(one_by_one, other.rows(0, 10).unwrap());
    }

    #[test]
    fn test_sort_ties_are_ordered_by_primary_key() {
        let store = people();
        let mut proxy = proxy(&store);
        proxy.sort(Some("age"), false).unwrap();
        let rows = proxy.rows(0, 10).unwrap();
        assert_eq!(ids(&rows), vec![3, 6, 9, 1, 4, 7, 10, 2, 5, 8]);

        proxy.sort(Some("age"), true).unwrap();
        let rows = proxy.rows(0, 10).unwrap();
        assert_eq!(ids(&rows), vec![2, 5, 8, 1, 4, 7, 10, 3, 6, 9]);
    }

    #[test]
    fn test_append_is_idempotent() {
        let store = people();
        let mut proxy = proxy(&store);
        let resident = store.get_by_key("person", &[ColumnValue::Int64(3)]).unwrap();

        proxy.append(resident).unwrap();
        assert_eq!(proxy.len().unwrap(), 10);
        assert_eq!(store.stats().lookups, 1);

        let person = new_person(&store, "newcomer");
        proxy.append(person.clone()).unwrap();
        proxy.append(person).unwrap();
        assert_eq!(proxy.len().unwrap(), 11);
    }

    #[test]
    fn test_append_object_outside_filter() {
        let store = people();
        let mut proxy = proxy(&store);
        proxy.set_filter(Arc::new(FieldFilter::new("city")), FilterValue::One(ColumnValue::from("Ghent")));
        assert_eq!(proxy.len().unwrap(), 5);

        let outsider = store.get_by_key("person", &[ColumnValue::Int64(1)]).unwrap();
        proxy.append(outsider.clone()).unwrap();
        assert_eq!(proxy.len().unwrap(), 6);
        assert_eq!(proxy.index(&outsider).unwrap(), Some(5));
    }

    #[test]
    fn test_remove_and_append_are_symmetric() {
        let store = people();
        let mut proxy = proxy(&store);
        let person = new_person(&store, "newcomer");

        proxy.append(person.clone()).unwrap();
        assert_eq!(proxy.len().unwrap(), 11);
        proxy.remove(&person).unwrap();
        assert_eq!(proxy.len().unwrap(), 10);
        assert_eq!(proxy.index(&person).unwrap(), None);
        proxy.append(person.clone()).unwrap();
        assert_eq!(proxy.len().unwrap(), 11);
        assert_eq!(proxy.index(&person).unwrap(), Some(10));
    }

    #[test]
    fn test_remove_resident_decrements_memoized_count() {
        let store = people();
        let mut proxy = proxy(&store);
        let resident = store.get_by_key("person", &[ColumnValue::Int64(3)]).unwrap();

        // Without a memoized count there is nothing to decrement
        proxy.remove(&resident).unwrap();
        assert_eq!(store.stats().counts, 0);

        assert_eq!(proxy.len().unwrap(), 10);
        proxy.extend_indexed_objects(0, 10).unwrap();
        let generation = proxy.generation();
        proxy.remove(&resident).unwrap();
        assert_eq!(proxy.len().unwrap(), 9);
        assert_eq!(proxy.row(0), None);
        assert!(proxy.generation() > generation);

        assert!(store.delete(&resident));
        let rows = proxy.rows(0, 9).unwrap();
        assert!(!rows.contains(&resident));
        assert_eq!(rows.len(), 9);
    }

    #[test]
    fn test_flushed_pending_object_is_reclassified() {
        let store = people();
        let mut proxy = proxy(&store);
        let person = new_person(&store, "person 11");
        proxy.append(person.clone()).unwrap();
        assert_eq!(proxy.len().unwrap(), 11);

        store.flush().unwrap();
        proxy.extend_indexed_objects(0, 11).unwrap();

        assert_eq!(proxy.len().unwrap(), 11);
        assert!(proxy.pending().is_empty());
        assert_eq!(proxy.index(&person).unwrap(), Some(10));
        assert_eq!(person.get("id"), ColumnValue::Int64(11));
    }

    #[test]
    fn test_flushed_pending_object_moves_to_its_query_row() {
        let store = people_of(person_descriptor().with_default_order(vec![OrderTerm::ascending("name")]));
        let mut proxy = proxy(&store);
        let person = new_person(&store, "aaa");
        proxy.append(person.clone()).unwrap();
        assert_eq!(proxy.index(&person).unwrap(), Some(10));

        // Ordered by name, the flushed object now comes first
        store.flush().unwrap();
        proxy.extend_indexed_objects(0, 5).unwrap();
        proxy.extend_indexed_objects(5, 6).unwrap();

        assert_eq!(proxy.len().unwrap(), 11);
        assert!(proxy.pending().is_empty());
        let rows: Vec<ObjectRef> = (0..11).filter_map(|row| proxy.row(row)).collect();
        assert_eq!(rows.len(), 11);
        assert_eq!(rows[0], person);
        assert_eq!(ids(&rows[1..]), (1..=10).collect::<Vec<i64>>());
        assert_eq!(proxy.row(11), None);
        assert_eq!(proxy.index(&person).unwrap(), Some(0));

        // Reading again in other windows keeps every row in place
        proxy.extend_indexed_objects(3, 4).unwrap();
        proxy.extend_indexed_objects(9, 5).unwrap();
        let again: Vec<ObjectRef> = (0..11).filter_map(|row| proxy.row(row)).collect();
        assert_eq!(again, rows);
        assert_eq!(proxy.row(11), None);
    }

    #[test]
    fn test_unavailable_store_propagates_errors() {
        let store = people();
        let mut proxy = proxy(&store);
        store.set_available(false);

        assert!(matches!(proxy.len(), Err(ProxyError::Store(StoreError::Unavailable))));
        assert!(matches!(
            proxy.extend_indexed_objects(0, 5),
            Err(ProxyError::Store(StoreError::Unavailable))
        ));
        // Nothing was retried
        assert_eq!(store.stats(), StoreStats::default());

        store.set_available(true);
        assert_eq!(proxy.len().unwrap(), 10);
    }

    #[test]
    fn test_round_trips() {
        let store = people();
        let mut proxy = proxy(&store);

        proxy.len().unwrap();
        proxy.len().unwrap();
        assert_eq!(store.stats().counts, 1);

        proxy.extend_indexed_objects(0, 5).unwrap();
        proxy.extend_indexed_objects(5, 5).unwrap();
        assert_eq!(
            store.stats(),
            StoreStats {
                fetches: 2,
                counts: 1,
                lookups: 0
            }
        );

        // Sorting forgets the memoized count
        proxy.sort(Some("name"), true).unwrap();
        proxy.len().unwrap();
        assert_eq!(store.stats().counts, 2);
    }

    #[test]
    fn test_object_at_resolves_aligned_window() {
        let store = people();
        let mut proxy = proxy(&store).with_options(ProxyOptions { window: 4 });

        let person = proxy.object_at(5).unwrap().unwrap();
        assert_eq!(person.get("id"), ColumnValue::Int64(6));
        assert_eq!(proxy.row(4).map(|o| o.get("id")), Some(ColumnValue::Int64(5)));
        assert_eq!(proxy.row(8), None);

        proxy.object_at(7).unwrap();
        assert_eq!(store.stats().fetches, 1);
        assert_eq!(proxy.object_at(42).unwrap(), None);
    }

    #[test]
    fn test_stale_generation() {
        let store = people();
        let mut proxy = proxy(&store);
        proxy.extend_indexed_objects(0, 3).unwrap();
        let generation = proxy.generation();
        assert!(proxy.row_checked(0, generation).unwrap().is_some());

        proxy.sort(Some("age"), false).unwrap();
        assert!(matches!(
            proxy.row_checked(0, generation),
            Err(ProxyError::StaleGeneration { .. })
        ));

        let generation = proxy.generation();
        proxy.set_filter(Arc::new(FieldFilter::new("city")), FilterValue::All);
        assert!(proxy.generation() > generation);
    }

    #[test]
    fn test_copy_is_independent() {
        let store = people();
        let mut original = proxy(&store);
        original.len().unwrap();

        let mut copy = original.copy();
        copy.set_filter(Arc::new(FieldFilter::new("city")), FilterValue::One(ColumnValue::from("Ghent")));
        copy.append(new_person(&store, "newcomer")).unwrap();

        assert_eq!(copy.len().unwrap(), 6);
        assert_eq!(original.len().unwrap(), 10);
        assert!(original.filters().is_empty());
        assert!(original.pending().is_empty());
    }

    #[test]
    fn test_get_query_leaves_base_alone() {
        let store = people();
        let mut proxy = proxy(&store);
        proxy.set_filter(Arc::new(FieldFilter::new("city")), FilterValue::One(ColumnValue::from("Ghent")));
        proxy.sort(Some("name"), false).unwrap();

        let query = proxy.get_query(true).unwrap();
        assert_eq!(query.criteria().len(), 1);
        assert_eq!(query.order().len(), 2);
        assert!(proxy.get_query(false).unwrap().order().is_empty());
        assert!(proxy.base_query().criteria().is_empty());
        assert!(proxy.base_query().order().is_empty());
    }

    #[test]
    fn test_invalid_filter_expression() {
        let store = people();
        let mut proxy = proxy(&store);
        proxy.set_filter(Arc::new(ExprFilter::new("where")), FilterValue::Text("age >".to_string()));
        assert!(matches!(proxy.len(), Err(ProxyError::Expr(_))));

        assert!(proxy.clear_filter("where"));
        assert_eq!(proxy.len().unwrap(), 10);
    }

    #[test]
    fn test_zero_limit_does_nothing() {
        let store = people();
        let mut proxy = proxy(&store);
        proxy.extend_indexed_objects(3, 0).unwrap();
        assert_eq!(store.stats(), StoreStats::default());
    }
}
