/// QueryProxy column values
///
/// Scalar values stored in the fields of domain objects, together with the
/// ordering used when rows are sorted and the conversions used when objects
/// are loaded from JSON fixtures.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

/// Column data types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Int32,
    Int64,
    Float64,
    String,
    Bool,
}

/// Column value enum to support multiple types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ColumnValue {
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    Bool(bool),
    Null,
}

impl ColumnValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ColumnValue::Null)
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            ColumnValue::Int32(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer view of the value, widening `Int32`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ColumnValue::Int32(v) => Some(*v as i64),
            ColumnValue::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view of the value, widening the integer variants.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ColumnValue::Int32(v) => Some(*v as f64),
            ColumnValue::Int64(v) => Some(*v as f64),
            ColumnValue::Float64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            ColumnValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ColumnValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// The type of a non-null value.
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            ColumnValue::Int32(_) => Some(ColumnType::Int32),
            ColumnValue::Int64(_) => Some(ColumnType::Int64),
            ColumnValue::Float64(_) => Some(ColumnType::Float64),
            ColumnValue::String(_) => Some(ColumnType::String),
            ColumnValue::Bool(_) => Some(ColumnType::Bool),
            ColumnValue::Null => None,
        }
    }

    /// Whether this value may be stored in a column of `column_type`.
    /// Integers are accepted by wider numeric columns.
    pub fn fits(&self, column_type: ColumnType) -> bool {
        match (self, column_type) {
            (ColumnValue::Null, _) => true,
            (ColumnValue::Int32(_), ColumnType::Int32 | ColumnType::Int64 | ColumnType::Float64) => true,
            (ColumnValue::Int64(_), ColumnType::Int64 | ColumnType::Float64) => true,
            (ColumnValue::Float64(_), ColumnType::Float64) => true,
            (ColumnValue::String(_), ColumnType::String) => true,
            (ColumnValue::Bool(_), ColumnType::Bool) => true,
            _ => false,
        }
    }

    /// Convert the value into the representation of `column_type`, widening
    /// integers where needed.
    pub fn coerce(self, column_type: ColumnType) -> Option<ColumnValue> {
        if !self.fits(column_type) {
            return None;
        }
        let coerced = match (self, column_type) {
            (ColumnValue::Int32(v), ColumnType::Int64) => ColumnValue::Int64(v as i64),
            (ColumnValue::Int32(v), ColumnType::Float64) => ColumnValue::Float64(v as f64),
            (ColumnValue::Int64(v), ColumnType::Float64) => ColumnValue::Float64(v as f64),
            (value, _) => value,
        };
        Some(coerced)
    }

    /// Total order over non-null values.
    ///
    /// Numbers compare numerically across the integer and float variants,
    /// floats use IEEE total ordering. Values of unrelated types compare by
    /// type rank so mixed columns still sort deterministically.
    pub fn total_cmp(&self, other: &ColumnValue) -> Ordering {
        match (self, other) {
            (ColumnValue::Int32(a), ColumnValue::Int32(b)) => a.cmp(b),
            (ColumnValue::Int64(a), ColumnValue::Int64(b)) => a.cmp(b),
            (ColumnValue::Int32(a), ColumnValue::Int64(b)) => (*a as i64).cmp(b),
            (ColumnValue::Int64(a), ColumnValue::Int32(b)) => a.cmp(&(*b as i64)),
            (ColumnValue::String(a), ColumnValue::String(b)) => a.cmp(b),
            (ColumnValue::Bool(a), ColumnValue::Bool(b)) => a.cmp(b),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                _ => a.type_rank().cmp(&b.type_rank()),
            },
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            ColumnValue::Bool(_) => 0,
            ColumnValue::Int32(_) | ColumnValue::Int64(_) | ColumnValue::Float64(_) => 1,
            ColumnValue::String(_) => 2,
            ColumnValue::Null => 3,
        }
    }

    /// Convert a JSON scalar into a value for a column of `column_type`.
    pub fn from_json(value: &serde_json::Value, column_type: ColumnType) -> Result<ColumnValue, String> {
        let converted = match (value, column_type) {
            (serde_json::Value::Null, _) => ColumnValue::Null,
            (serde_json::Value::Number(n), ColumnType::Int32) => n
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .map(ColumnValue::Int32)
                .ok_or_else(|| format!("{} does not fit in INT32", n))?,
            (serde_json::Value::Number(n), ColumnType::Int64) => n
                .as_i64()
                .map(ColumnValue::Int64)
                .ok_or_else(|| format!("{} is not an integer", n))?,
            (serde_json::Value::Number(n), ColumnType::Float64) => n
                .as_f64()
                .map(ColumnValue::Float64)
                .ok_or_else(|| format!("{} is not a number", n))?,
            (serde_json::Value::String(s), ColumnType::String) => ColumnValue::String(s.clone()),
            (serde_json::Value::Bool(b), ColumnType::Bool) => ColumnValue::Bool(*b),
            (other, ty) => return Err(format!("expected {:?}, got {}", ty, other)),
        };
        Ok(converted)
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ColumnValue::Int32(n) => serde_json::Value::Number((*n).into()),
            ColumnValue::Int64(n) => serde_json::Value::Number((*n).into()),
            ColumnValue::Float64(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ColumnValue::String(s) => serde_json::Value::String(s.clone()),
            ColumnValue::Bool(b) => serde_json::Value::Bool(*b),
            ColumnValue::Null => serde_json::Value::Null,
        }
    }
}

// Equality is structural; floats compare by bit pattern so values can key maps.
impl PartialEq for ColumnValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ColumnValue::Int32(a), ColumnValue::Int32(b)) => a == b,
            (ColumnValue::Int64(a), ColumnValue::Int64(b)) => a == b,
            (ColumnValue::Float64(a), ColumnValue::Float64(b)) => a.to_bits() == b.to_bits(),
            (ColumnValue::String(a), ColumnValue::String(b)) => a == b,
            (ColumnValue::Bool(a), ColumnValue::Bool(b)) => a == b,
            (ColumnValue::Null, ColumnValue::Null) => true,
            _ => false,
        }
    }
}

impl Eq for ColumnValue {}

impl Hash for ColumnValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            ColumnValue::Int32(v) => v.hash(state),
            ColumnValue::Int64(v) => v.hash(state),
            ColumnValue::Float64(v) => v.to_bits().hash(state),
            ColumnValue::String(v) => v.hash(state),
            ColumnValue::Bool(v) => v.hash(state),
            ColumnValue::Null => {}
        }
    }
}

impl From<i32> for ColumnValue {
    fn from(v: i32) -> Self {
        ColumnValue::Int32(v)
    }
}

impl From<i64> for ColumnValue {
    fn from(v: i64) -> Self {
        ColumnValue::Int64(v)
    }
}

impl From<f64> for ColumnValue {
    fn from(v: f64) -> Self {
        ColumnValue::Float64(v)
    }
}

impl From<bool> for ColumnValue {
    fn from(v: bool) -> Self {
        ColumnValue::Bool(v)
    }
}

impl From<&str> for ColumnValue {
    fn from(v: &str) -> Self {
        ColumnValue::String(v.to_string())
    }
}

impl From<String> for ColumnValue {
    fn from(v: String) -> Self {
        ColumnValue::String(v)
    }
}
