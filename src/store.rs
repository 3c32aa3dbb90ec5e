/// Backing store contract
///
/// The proxies never talk to a database directly. They build `Query` values
/// and hand them to a `Backend`, which owns connections, identity and
/// persistence. Errors are returned unchanged to the proxy's caller; no retry
/// happens on this side of the boundary.

use crate::column::ColumnValue;
use crate::entity::EntityDescriptor;
use crate::error::StoreResult;
use crate::object::ObjectRef;
use crate::query::Query;
use std::sync::Arc;

pub trait Backend: Send + Sync {
    /// Metadata for `entity`.
    fn descriptor(&self, entity: &str) -> StoreResult<Arc<EntityDescriptor>>;

    /// Number of objects matching the query's criteria. Ordering and
    /// pagination do not influence the count.
    fn count(&self, query: &Query) -> StoreResult<usize>;

    /// Objects matching the query, ordered and paginated, in one round trip.
    fn fetch(&self, query: &Query) -> StoreResult<Vec<ObjectRef>>;

    /// The object with primary key `key`, provided it also satisfies the
    /// query's criteria.
    fn get(&self, query: &Query, key: &[ColumnValue]) -> StoreResult<Option<ObjectRef>>;

    /// Whether `object` was added to the session but not flushed yet. Such an
    /// object cannot be part of any query result.
    fn is_new(&self, object: &ObjectRef) -> bool;
}
