//! Immutable query builder
//!
//! A `Query` describes which objects of one entity to fetch: filter criteria,
//! outer-joined relationships, ordering and pagination. Every builder method
//! consumes the query and returns a new one, so a base query can be kept and
//! decorated over and over without accumulating state.
//!
//! # Examples
//!
//! ```
//! use queryproxy::{Expr, OrderTerm, Query};
//!
//! let base = Query::new("movie").filter(Expr::equals("genre", "action"));
//! let page = base
//!     .clone()
//!     .order_by(OrderTerm::descending("rating"))
//!     .offset(20)
//!     .limit(10);
//!
//! assert!(base.order().is_empty());
//! assert_eq!(page.order().len(), 1);
//! assert_eq!(page.limit_value(), Some(10));
//! ```

use crate::error::ExprError;
use crate::expr::{parse_expr, Expr};

/// Sort order specification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Ascending order (smallest first)
    Ascending,
    /// Descending order (largest first)
    Descending,
}

impl SortOrder {
    pub fn from_reverse(reverse: bool) -> Self {
        if reverse {
            SortOrder::Descending
        } else {
            SortOrder::Ascending
        }
    }
}

/// The expression a query is ordered by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OrderExpr {
    /// A stored column of the queried entity
    Column(String),
    /// A computed attribute of the queried entity
    Computed(String),
    /// A column of the target of an outer-joined relationship
    Related { relationship: String, column: String },
}

/// A single ordering term: expression plus direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTerm {
    pub expr: OrderExpr,
    pub order: SortOrder,
}

impl OrderTerm {
    pub fn new(expr: OrderExpr, order: SortOrder) -> Self {
        OrderTerm { expr, order }
    }

    pub fn ascending(column: impl Into<String>) -> Self {
        OrderTerm::new(OrderExpr::Column(column.into()), SortOrder::Ascending)
    }

    pub fn descending(column: impl Into<String>) -> Self {
        OrderTerm::new(OrderExpr::Column(column.into()), SortOrder::Descending)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    entity: String,
    criteria: Vec<Expr>,
    joins: Vec<String>,
    order: Vec<OrderTerm>,
    offset: usize,
    limit: Option<usize>,
}

impl Query {
    /// All objects of `entity`, unordered and unpaginated.
    pub fn new(entity: impl Into<String>) -> Self {
        Query {
            entity: entity.into(),
            criteria: Vec::new(),
            joins: Vec::new(),
            order: Vec::new(),
            offset: 0,
            limit: None,
        }
    }

    /// Restrict the result further; criteria are combined with AND.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.criteria.push(expr);
        self
    }

    /// Parse `expression` and restrict the result with it.
    pub fn filter_str(self, expression: &str) -> Result<Self, ExprError> {
        Ok(self.filter(parse_expr(expression)?))
    }

    /// Outer join a relationship so its target's columns can be ordered by.
    /// Joining the same relationship twice is a no-op.
    pub fn outer_join(mut self, relationship: impl Into<String>) -> Self {
        let relationship = relationship.into();
        if !self.joins.contains(&relationship) {
            self.joins.push(relationship);
        }
        self
    }

    /// Append an ordering term after the existing ones.
    pub fn order_by(mut self, term: OrderTerm) -> Self {
        self.order.push(term);
        self
    }

    /// Drop every ordering term.
    pub fn without_order(mut self) -> Self {
        self.order.clear();
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn without_paging(mut self) -> Self {
        self.offset = 0;
        self.limit = None;
        self
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn criteria(&self) -> &[Expr] {
        &self.criteria
    }

    pub fn joins(&self) -> &[String] {
        &self.joins
    }

    pub fn is_joined(&self, relationship: &str) -> bool {
        self.joins.iter().any(|j| j == relationship)
    }

    pub fn order(&self) -> &[OrderTerm] {
        &self.order
    }

    pub fn offset_value(&self) -> usize {
        self.offset
    }

    pub fn limit_value(&self) -> Option<usize> {
        self.limit
    }
}
