/// QueryProxy - Lazy, Sorted, Filtered Views over Relational Queries
///
/// Presents the result of a query, plus objects that are not (yet) part of it,
/// as a sequence of virtual rows that is resolved one window at a time. Sorting
/// and filtering are pushed down into the query, and the row of any resolved
/// object can be found again without a round trip.

pub mod column;
pub mod error;
pub mod expr;
pub mod entity;
pub mod object;
pub mod query;
pub mod store;
pub mod memory;
pub mod mapper;
pub mod list_proxy;
pub mod filter;
pub mod sort;
pub mod query_proxy;
pub mod options;
pub mod auth;

pub use column::{ColumnType, ColumnValue};
pub use error::{ExprError, ProxyError, ProxyResult, StoreError, StoreResult};
pub use expr::{eval_expr, extract_columns, parse_expr, CompareOp, Expr};
pub use entity::{AttributeKind, EntityDescriptor, Registry, Relationship, Schema};
pub use object::ObjectRef;
pub use query::{OrderExpr, OrderTerm, Query, SortOrder};
pub use store::Backend;
pub use memory::{MemoryStore, StoreStats};
pub use mapper::{ListOrder, SortingRowMapper, TwoWayDict};
pub use list_proxy::{ListModelProxy, ModelProxy};
pub use filter::{ExprFilter, FieldFilter, Filter, FilterSet, FilterValue, SearchFilter};
pub use sort::SortDecorator;
pub use query_proxy::QueryModelProxy;
pub use options::ProxyOptions;
