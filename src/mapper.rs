/// Row index bookkeeping
///
/// `TwoWayDict` is the sparse, bidirectional row <-> object cache the proxies
/// fill while windows are resolved. `SortingRowMapper` holds the ordering
/// of an in-memory list and computes the permutation lazily, the first time a
/// row is read after the order changed.

use crate::column::ColumnValue;
use crate::object::ObjectRef;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::hash::Hash;

/// Bijective mapping between keys and values, populated incrementally.
///
/// Inserting a pair replaces any earlier association of either side, so the
/// mapping stays one-to-one. Owners clear it wholesale on structural changes
/// instead of correcting it entry by entry.
#[derive(Debug, Clone)]
pub struct TwoWayDict<K, V> {
    forward: HashMap<K, V>,
    backward: HashMap<V, K>,
}

impl<K, V> Default for TwoWayDict<K, V> {
    fn default() -> Self {
        TwoWayDict {
            forward: HashMap::new(),
            backward: HashMap::new(),
        }
    }
}

impl<K, V> TwoWayDict<K, V>
where
    K: Hash + Eq + Clone,
    V: Hash + Eq + Clone,
{
    pub fn new() -> Self {
        TwoWayDict::default()
    }

    /// Value mapped to `key`, `None` when unknown.
    pub fn get_value(&self, key: &K) -> Option<&V> {
        self.forward.get(key)
    }

    /// Key mapped to `value`, `None` when unknown.
    pub fn get_key(&self, value: &V) -> Option<&K> {
        self.backward.get(value)
    }

    pub fn insert(&mut self, key: K, value: V) {
        if let Some(old_value) = self.forward.remove(&key) {
            self.backward.remove(&old_value);
        }
        if let Some(old_key) = self.backward.remove(&value) {
            self.forward.remove(&old_key);
        }
        self.forward.insert(key.clone(), value.clone());
        self.backward.insert(value, key);
    }

    pub fn remove_key(&mut self, key: &K) -> Option<V> {
        let value = self.forward.remove(key)?;
        self.backward.remove(&value);
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    pub fn clear(&mut self) {
        self.forward.clear();
        self.backward.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.forward.iter()
    }
}

/// Sort key installed on an in-memory list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOrder {
    pub column: String,
    pub reverse: bool,
}

/// Maps virtual rows of an in-memory list to positions in its source order.
#[derive(Debug, Clone, Default)]
pub struct SortingRowMapper {
    order: Option<ListOrder>,
    /// row -> source position, computed lazily
    row_to_source: Option<Vec<usize>>,
    /// source position -> row
    source_to_row: Vec<usize>,
}

impl SortingRowMapper {
    pub fn new() -> Self {
        SortingRowMapper::default()
    }

    /// Install a new ordering; the permutation is computed on the next read.
    pub fn set_order(&mut self, order: Option<ListOrder>) {
        self.order = order;
        self.invalidate();
    }

    pub fn order(&self) -> Option<&ListOrder> {
        self.order.as_ref()
    }

    pub fn invalidate(&mut self) {
        self.row_to_source = None;
        self.source_to_row.clear();
    }

    pub fn is_computed(&self) -> bool {
        self.order.is_none() || self.row_to_source.is_some()
    }

    /// Compute the permutation for `objects` if the order requires one and
    /// it is not known yet. The sort is stable and puts NULL last, whatever
    /// the direction.
    pub fn ensure<'a, I>(&mut self, objects: I)
    where
        I: IntoIterator<Item = &'a ObjectRef>,
    {
        let Some(order) = &self.order else {
            return;
        };
        if self.row_to_source.is_some() {
            return;
        }

        let keys: Vec<ColumnValue> = objects.into_iter().map(|o| o.get(&order.column)).collect();
        let mut permutation: Vec<usize> = (0..keys.len()).collect();
        permutation.sort_by(|&a, &b| {
            let (va, vb) = (&keys[a], &keys[b]);
            match (va.is_null(), vb.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) if order.reverse => vb.total_cmp(va),
                (false, false) => va.total_cmp(vb),
            }
        });

        let mut inverse = vec![0; permutation.len()];
        for (row, &source) in permutation.iter().enumerate() {
            inverse[source] = row;
        }
        self.source_to_row = inverse;
        self.row_to_source = Some(permutation);
    }

    /// Source position shown at `row`. Identity while unsorted or not computed.
    pub fn source_position(&self, row: usize) -> usize {
        match &self.row_to_source {
            Some(permutation) => {
                debug_assert!(row < permutation.len(), "row {} outside permutation", row);
                permutation.get(row).copied().unwrap_or(row)
            }
            None => row,
        }
    }

    /// Row showing the object at source `position`.
    pub fn virtual_row(&self, position: usize) -> usize {
        match &self.row_to_source {
            Some(_) => {
                debug_assert!(position < self.source_to_row.len(), "position {} outside permutation", position);
                self.source_to_row.get(position).copied().unwrap_or(position)
            }
            None => position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_way_lookup() {
        let mut dict: TwoWayDict<usize, &str> = TwoWayDict::new();
        assert!(dict.get_value(&0).is_none());
        dict.insert(0, "a");
        dict.insert(1, "b");
        assert_eq!(dict.get_value(&1), Some(&"b"));
        assert_eq!(dict.get_key(&"a"), Some(&0));
        assert_eq!(dict.len(), 2);
    }

    #[test]
    fn test_insert_replaces_both_sides() {
        let mut dict: TwoWayDict<usize, &str> = TwoWayDict::new();
        dict.insert(0, "a");
        dict.insert(1, "b");

        // Overwriting row 0 drops the stale link for "a"
        dict.insert(0, "c");
        assert_eq!(dict.get_key(&"a"), None);
        assert_eq!(dict.get_value(&0), Some(&"c"));

        // Moving "b" to row 5 frees row 1
        dict.insert(5, "b");
        assert_eq!(dict.get_value(&1), None);
        assert_eq!(dict.get_key(&"b"), Some(&5));
        assert_eq!(dict.len(), 2);

        assert_eq!(dict.remove_key(&5), Some("b"));
        assert_eq!(dict.get_key(&"b"), None);
        dict.clear();
        assert!(dict.is_empty());
    }

    fn people(ages: &[Option<i32>]) -> Vec<ObjectRef> {
        ages.iter()
            .map(|age| {
                ObjectRef::new(
                    "person",
                    vec![("age", age.map(ColumnValue::Int32).unwrap_or(ColumnValue::Null))],
                )
            })
            .collect()
    }

    #[test]
    fn test_sorting_row_mapper_is_lazy_and_stable() {
        let objects = people(&[Some(30), None, Some(20), Some(30)]);
        let mut mapper = SortingRowMapper::new();
        assert_eq!(mapper.source_position(2), 2);

        mapper.set_order(Some(ListOrder {
            column: "age".to_string(),
            reverse: false,
        }));
        assert!(!mapper.is_computed());
        mapper.ensure(objects.iter());
        assert!(mapper.is_computed());

        let rows: Vec<usize> = (0..4).map(|row| mapper.source_position(row)).collect();
        assert_eq!(rows, vec![2, 0, 3, 1]);
        assert_eq!(mapper.virtual_row(1), 3);

        mapper.set_order(Some(ListOrder {
            column: "age".to_string(),
            reverse: true,
        }));
        mapper.ensure(objects.iter());
        let rows: Vec<usize> = (0..4).map(|row| mapper.source_position(row)).collect();
        // Ties keep source order, NULL stays last
        assert_eq!(rows, vec![0, 3, 2, 1]);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "outside permutation")]
    fn test_row_past_computed_permutation_panics_in_debug() {
        let objects = people(&[Some(30), Some(20)]);
        let mut mapper = SortingRowMapper::new();
        mapper.set_order(Some(ListOrder {
            column: "age".to_string(),
            reverse: false,
        }));
        mapper.ensure(objects.iter());
        mapper.source_position(5);
    }
}
