/// Sort decorator
///
/// Composes the ORDER BY of a proxy's query. The user's requested key comes
/// first, followed by whatever order the query already had, the entity's
/// default order and finally the primary key columns, so the result always
/// has a total order and pagination is deterministic.

use crate::entity::{AttributeKind, EntityDescriptor};
use crate::query::{OrderExpr, OrderTerm, Query, SortOrder};
use crate::store::Backend;
use log::{debug, warn};
use std::collections::HashSet;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortDecorator {
    requested: Option<OrderTerm>,
    /// Relationship to outer join for the requested term
    join: Option<String>,
}

impl SortDecorator {
    /// Decorator imposing only the default ordering.
    pub fn unsorted() -> Self {
        SortDecorator::default()
    }

    /// Resolve `key` against `descriptor`. Keys that do not name a column,
    /// computed attribute or relationship are left out of the ordering.
    pub fn new(descriptor: &EntityDescriptor, backend: &dyn Backend, key: &str, reverse: bool) -> Self {
        let order = SortOrder::from_reverse(reverse);
        match descriptor.attribute(key) {
            Some(AttributeKind::Column(_)) => SortDecorator {
                requested: Some(OrderTerm::new(OrderExpr::Column(key.to_string()), order)),
                join: None,
            },
            Some(AttributeKind::Computed(computed)) => SortDecorator {
                requested: Some(OrderTerm::new(OrderExpr::Computed(computed.name().to_string()), order)),
                join: None,
            },
            Some(AttributeKind::Relationship(relationship)) => {
                let target_column = backend
                    .descriptor(&relationship.target)
                    .ok()
                    .and_then(|target| match target.default_order().first() {
                        Some(OrderTerm {
                            expr: OrderExpr::Column(column),
                            ..
                        }) => Some(column.clone()),
                        _ => None,
                    });
                if let Some(column) = target_column {
                    return SortDecorator {
                        requested: Some(OrderTerm::new(
                            OrderExpr::Related {
                                relationship: relationship.name.clone(),
                                column,
                            },
                            order,
                        )),
                        join: Some(relationship.name.clone()),
                    };
                }
                match relationship.foreign_key.first() {
                    Some(foreign_key) => SortDecorator {
                        requested: Some(OrderTerm::new(OrderExpr::Column(foreign_key.clone()), order)),
                        join: None,
                    },
                    None => {
                        warn!("relationship {}.{} has no foreign key to sort on", descriptor.name(), key);
                        SortDecorator::unsorted()
                    }
                }
            }
            None => {
                warn!("cannot sort {} on unknown attribute {}", descriptor.name(), key);
                SortDecorator::unsorted()
            }
        }
    }

    pub fn requested(&self) -> Option<&OrderTerm> {
        self.requested.as_ref()
    }

    pub fn join(&self) -> Option<&str> {
        self.join.as_deref()
    }

    /// Return `query` with the composed ordering replacing its own.
    pub fn decorate(&self, query: Query, descriptor: &EntityDescriptor) -> Query {
        let query = match &self.join {
            Some(relationship) => query.outer_join(relationship.clone()),
            None => query,
        };

        let primary_key = descriptor
            .primary_key()
            .iter()
            .map(|column| OrderTerm::ascending(column.clone()));
        let candidates: Vec<OrderTerm> = self
            .requested
            .iter()
            .cloned()
            .chain(query.order().iter().cloned())
            .chain(descriptor.default_order().iter().cloned())
            .chain(primary_key)
            .collect();

        let mut seen = HashSet::new();
        let mut decorated = query.without_order();
        for term in candidates {
            if seen.insert(term.expr.clone()) {
                decorated = decorated.order_by(term);
            }
        }
        debug!("order for {}: {:?}", descriptor.name(), decorated.order());
        decorated
    }
}
