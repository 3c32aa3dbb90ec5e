//! Model proxies and the in-memory list proxy
//!
//! A model proxy presents a collection of domain objects as a sequence of
//! virtual rows. Consumers resolve windows with `extend_indexed_objects` and
//! then read individual rows from the proxy's index cache, so a view only ever
//! materializes the rows it shows.
//!
//! `ListModelProxy` is the in-memory flavor: it wraps an ordered list of
//! objects. It is also the pending-object collection of `QueryModelProxy`.
//!
//! # Examples
//!
//! ```
//! use queryproxy::{ColumnValue, ListModelProxy, ModelProxy, ObjectRef};
//!
//! let objects: Vec<ObjectRef> = [3, 1, 2]
//!     .iter()
//!     .map(|n| ObjectRef::new("item", vec![("n", ColumnValue::Int32(*n))]))
//!     .collect();
//!
//! let mut proxy = ListModelProxy::new(objects.clone());
//! proxy.sort(Some("n"), false).unwrap();
//!
//! let rows = proxy.rows(0, 3).unwrap();
//! assert_eq!(rows, vec![objects[1].clone(), objects[2].clone(), objects[0].clone()]);
//! assert_eq!(proxy.index(&objects[0]).unwrap(), Some(2));
//! ```

use crate::error::{ProxyError, ProxyResult};
use crate::mapper::{ListOrder, SortingRowMapper, TwoWayDict};
use crate::object::ObjectRef;
use log::trace;

/// Row-access contract shared by the proxies.
pub trait ModelProxy {
    /// Number of virtual rows.
    fn len(&mut self) -> ProxyResult<usize>;

    /// Add an object at the end of the collection, unless it is already part of it.
    fn append(&mut self, object: ObjectRef) -> ProxyResult<()>;

    /// Remove an object. Removing an object that is not present does nothing.
    fn remove(&mut self, object: &ObjectRef) -> ProxyResult<()>;

    /// Virtual row of `object`, `None` when it cannot be resolved.
    fn index(&mut self, object: &ObjectRef) -> ProxyResult<Option<usize>>;

    /// Install an ordering; `None` restores the natural order. Clears the index cache.
    fn sort(&mut self, key: Option<&str>, reverse: bool) -> ProxyResult<()>;

    /// Resolve rows `offset..offset + limit` into the index cache.
    fn extend_indexed_objects(&mut self, offset: usize, limit: usize) -> ProxyResult<()>;

    /// Cached object at `row`, `None` while the row has not been resolved.
    fn row(&self, row: usize) -> Option<ObjectRef>;

    /// Cache generation, bumped by every invalidation.
    fn generation(&self) -> u64;

    /// Cached object at `row`, provided the cache still is at `generation`.
    fn row_checked(&self, row: usize, generation: u64) -> ProxyResult<Option<ObjectRef>> {
        let current = self.generation();
        if current != generation {
            return Err(ProxyError::StaleGeneration {
                held: generation,
                current,
            });
        }
        Ok(self.row(row))
    }

    /// Resolve a window and return the objects it contains, in row order.
    fn rows(&mut self, offset: usize, limit: usize) -> ProxyResult<Vec<ObjectRef>> {
        self.extend_indexed_objects(offset, limit)?;
        let end = offset.saturating_add(limit).min(self.len()?);
        Ok((offset..end).filter_map(|row| self.row(row)).collect())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListModelProxy {
    objects: im::Vector<ObjectRef>,
    indexed: TwoWayDict<usize, ObjectRef>,
    row_mapper: SortingRowMapper,
    generation: u64,
}

impl ListModelProxy {
    pub fn new<I>(objects: I) -> Self
    where
        I: IntoIterator<Item = ObjectRef>,
    {
        ListModelProxy {
            objects: objects.into_iter().collect(),
            ..ListModelProxy::default()
        }
    }

    pub fn length(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn contains(&self, object: &ObjectRef) -> bool {
        self.position(object).is_some()
    }

    /// Position of `object` in source order, ignoring any sort.
    pub fn position(&self, object: &ObjectRef) -> Option<usize> {
        self.objects.iter().position(|o| o == object)
    }

    pub fn object_at(&self, position: usize) -> Option<&ObjectRef> {
        self.objects.get(position)
    }

    /// Snapshot of the objects in source order. Shares structure with the proxy.
    pub fn objects(&self) -> im::Vector<ObjectRef> {
        self.objects.clone()
    }

    /// Add at the tail of the source order. Returns false when already present.
    pub fn push(&mut self, object: ObjectRef) -> bool {
        if self.contains(&object) {
            return false;
        }
        self.objects.push_back(object);
        if self.row_mapper.order().is_some() {
            // The new object may sort anywhere
            self.reset_cache();
        }
        true
    }

    /// Remove from the source order. Returns false when absent.
    pub fn discard(&mut self, object: &ObjectRef) -> bool {
        match self.position(object) {
            Some(position) => {
                self.objects.remove(position);
                self.reset_cache();
                true
            }
            None => false,
        }
    }

    /// An independent proxy over the same objects. The list is shared until
    /// either side mutates it; cache and ordering are per proxy.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// Discard the index cache and the computed permutation.
    pub fn reset_cache(&mut self) {
        self.indexed.clear();
        self.row_mapper.invalidate();
        self.generation += 1;
    }

    pub fn order(&self) -> Option<&ListOrder> {
        self.row_mapper.order()
    }
}

impl ModelProxy for ListModelProxy {
    fn len(&mut self) -> ProxyResult<usize> {
        Ok(self.objects.len())
    }

    fn append(&mut self, object: ObjectRef) -> ProxyResult<()> {
        self.push(object);
        Ok(())
    }

    fn remove(&mut self, object: &ObjectRef) -> ProxyResult<()> {
        self.discard(object);
        Ok(())
    }

    fn index(&mut self, object: &ObjectRef) -> ProxyResult<Option<usize>> {
        if let Some(row) = self.indexed.get_key(object) {
            return Ok(Some(*row));
        }
        let Some(position) = self.position(object) else {
            return Ok(None);
        };
        self.row_mapper.ensure(self.objects.iter());
        let row = self.row_mapper.virtual_row(position);
        self.indexed.insert(row, object.clone());
        Ok(Some(row))
    }

    fn sort(&mut self, key: Option<&str>, reverse: bool) -> ProxyResult<()> {
        self.row_mapper.set_order(key.map(|column| ListOrder {
            column: column.to_string(),
            reverse,
        }));
        self.indexed.clear();
        self.generation += 1;
        Ok(())
    }

    fn extend_indexed_objects(&mut self, offset: usize, limit: usize) -> ProxyResult<()> {
        let end = offset.saturating_add(limit).min(self.objects.len());
        if offset >= end {
            return Ok(());
        }
        self.row_mapper.ensure(self.objects.iter());
        for row in offset..end {
            if let Some(object) = self.objects.get(self.row_mapper.source_position(row)) {
                trace!("row {} -> object {}", row, object.oid());
                self.indexed.insert(row, object.clone());
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
