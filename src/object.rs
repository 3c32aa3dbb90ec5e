/// Domain object handles
///
/// An `ObjectRef` is a cheap, clonable handle to one domain object. Equality
/// and hashing follow object identity, never field values: the backing store's
/// identity map hands out a single handle per persisted primary key, and an
/// object created in memory keeps its identity when it is flushed.

use crate::column::ColumnValue;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_OID: AtomicU64 = AtomicU64::new(1);

struct ObjectInner {
    oid: u64,
    entity: String,
    fields: RwLock<HashMap<String, ColumnValue>>,
}

#[derive(Clone)]
pub struct ObjectRef(Arc<ObjectInner>);

impl ObjectRef {
    /// Creates a detached object of `entity` with the given field values.
    pub fn new<K, I>(entity: impl Into<String>, fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, ColumnValue)>,
    {
        let fields = fields.into_iter().map(|(k, v)| (k.into(), v)).collect();
        ObjectRef(Arc::new(ObjectInner {
            oid: NEXT_OID.fetch_add(1, Ordering::Relaxed),
            entity: entity.into(),
            fields: RwLock::new(fields),
        }))
    }

    /// Process-unique object identity.
    pub fn oid(&self) -> u64 {
        self.0.oid
    }

    pub fn entity(&self) -> &str {
        &self.0.entity
    }

    /// Value of a field, `Null` when the field was never set.
    pub fn get(&self, column: &str) -> ColumnValue {
        self.0
            .fields
            .read()
            .get(column)
            .cloned()
            .unwrap_or(ColumnValue::Null)
    }

    pub fn set(&self, column: &str, value: ColumnValue) {
        self.0.fields.write().insert(column.to_string(), value);
    }

    /// Copy of all field values.
    pub fn snapshot(&self) -> HashMap<String, ColumnValue> {
        self.0.fields.read().clone()
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for ObjectRef {}

impl Hash for ObjectRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.oid.hash(state);
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRef")
            .field("oid", &self.0.oid)
            .field("entity", &self.0.entity)
            .field("fields", &*self.0.fields.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_not_value_equality() {
        let a = ObjectRef::new("movie", vec![("title", ColumnValue::from("Alien"))]);
        let b = ObjectRef::new("movie", vec![("title", ColumnValue::from("Alien"))]);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        assert_ne!(a.oid(), b.oid());
    }

    #[test]
    fn test_fields_shared_between_clones() {
        let a = ObjectRef::new("movie", Vec::<(String, ColumnValue)>::new());
        let b = a.clone();
        b.set("rating", ColumnValue::Int32(5));
        assert_eq!(a.get("rating"), ColumnValue::Int32(5));
        assert!(a.get("missing").is_null());
        assert_eq!(a.snapshot().len(), 1);
    }
}
