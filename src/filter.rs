/// Query filters
///
/// A filter narrows the proxy's query. It is keyed, so the presentation layer
/// can replace or clear it, and it receives its current value when the
/// proxy's effective query is built.

use crate::column::ColumnValue;
use crate::error::ProxyResult;
use crate::expr::{parse_expr, Expr};
use crate::query::Query;
use std::fmt;
use std::sync::Arc;

/// Current value of a filter, as selected by the user.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    /// No restriction
    All,
    One(ColumnValue),
    AnyOf(Vec<ColumnValue>),
    Text(String),
}

pub trait Filter: fmt::Debug + Send + Sync {
    /// Key identifying the filter within a proxy.
    fn key(&self) -> &str;

    /// Return `query` restricted according to `value`.
    fn decorate_query(&self, query: Query, value: &FilterValue) -> ProxyResult<Query>;
}

/// Restricts a single column to one value or a set of values.
#[derive(Debug, Clone)]
pub struct FieldFilter {
    key: String,
    column: String,
}

impl FieldFilter {
    pub fn new(column: impl Into<String>) -> Self {
        let column = column.into();
        FieldFilter {
            key: column.clone(),
            column,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }
}

impl Filter for FieldFilter {
    fn key(&self) -> &str {
        &self.key
    }

    fn decorate_query(&self, query: Query, value: &FilterValue) -> ProxyResult<Query> {
        Ok(match value {
            FilterValue::All => query,
            FilterValue::One(v) if v.is_null() => query.filter(Expr::IsNull {
                column: self.column.clone(),
            }),
            FilterValue::One(v) => query.filter(Expr::equals(self.column.clone(), v.clone())),
            FilterValue::AnyOf(values) => query.filter(Expr::any_of(self.column.clone(), values.clone())),
            FilterValue::Text(text) => query.filter(Expr::equals(self.column.clone(), text.as_str())),
        })
    }
}

/// Case-insensitive substring search over several text columns; an object
/// matches when any of the columns contains the text.
#[derive(Debug, Clone)]
pub struct SearchFilter {
    key: String,
    columns: Vec<String>,
}

impl SearchFilter {
    pub fn new(key: impl Into<String>, columns: Vec<String>) -> Self {
        SearchFilter {
            key: key.into(),
            columns,
        }
    }

    fn condition(&self, text: &str) -> Option<Expr> {
        self.columns
            .iter()
            .map(|column| Expr::contains(column.clone(), text))
            .reduce(Expr::or)
    }
}

impl Filter for SearchFilter {
    fn key(&self) -> &str {
        &self.key
    }

    fn decorate_query(&self, query: Query, value: &FilterValue) -> ProxyResult<Query> {
        let text = match value {
            FilterValue::Text(text) => text.as_str(),
            FilterValue::One(ColumnValue::String(text)) => text.as_str(),
            _ => return Ok(query),
        };
        let text = text.trim();
        if text.is_empty() {
            return Ok(query);
        }
        Ok(match self.condition(text) {
            Some(expr) => query.filter(expr),
            None => query,
        })
    }
}

/// Takes a textual expression as its value, e.g. `rating >= 4 AND genre == 'drama'`.
#[derive(Debug, Clone)]
pub struct ExprFilter {
    key: String,
}

impl ExprFilter {
    pub fn new(key: impl Into<String>) -> Self {
        ExprFilter { key: key.into() }
    }
}

impl Filter for ExprFilter {
    fn key(&self) -> &str {
        &self.key
    }

    fn decorate_query(&self, query: Query, value: &FilterValue) -> ProxyResult<Query> {
        match value {
            FilterValue::Text(text) if !text.trim().is_empty() => Ok(query.filter(parse_expr(text)?)),
            _ => Ok(query),
        }
    }
}

/// Active filters in insertion order.
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    entries: Vec<(Arc<dyn Filter>, FilterValue)>,
}

impl FilterSet {
    pub fn new() -> Self {
        FilterSet::default()
    }

    /// Activate `filter` with `value`. A filter with the same key keeps its
    /// position and gets replaced.
    pub fn set(&mut self, filter: Arc<dyn Filter>, value: FilterValue) {
        match self.entries.iter_mut().find(|(f, _)| f.key() == filter.key()) {
            Some(entry) => *entry = (filter, value),
            None => self.entries.push((filter, value)),
        }
    }

    /// Deactivate the filter with `key`. Returns whether it was active.
    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(f, _)| f.key() != key);
        self.entries.len() != before
    }

    pub fn get(&self, key: &str) -> Option<&FilterValue> {
        self.entries
            .iter()
            .find(|(f, _)| f.key() == key)
            .map(|(_, value)| value)
    }

    pub fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|(f, _)| f.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Apply every filter to `query`, in insertion order. Works on a
    /// snapshot of the entries, so the set may be changed while the
    /// resulting query is in use.
    pub fn decorate(&self, query: Query) -> ProxyResult<Query> {
        let snapshot = self.entries.clone();
        snapshot
            .iter()
            .try_fold(query, |query, (filter, value)| filter.decorate_query(query, value))
    }
}
