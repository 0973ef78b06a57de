//! The tagged scalar values a row's columns and an index's keys are built
//! from. See `encoding::keycode` for how these are turned into
//! order-preserving byte strings.

use std::fmt::{self, Display, Formatter};

use serde_derive::{Deserialize, Serialize};

/// A column's declared type, independent of any particular value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Integer,
    Bigint,
    Double,
    Text,
    Blob,
    Timestamp,
}

impl Display for DataType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Boolean => "BOOLEAN",
            DataType::Integer => "INTEGER",
            DataType::Bigint => "BIGINT",
            DataType::Double => "DOUBLE",
            DataType::Text => "TEXT",
            DataType::Blob => "BLOB",
            DataType::Timestamp => "TIMESTAMP",
        };
        write!(f, "{name}")
    }
}

/// A single scalar value. Immutable once constructed (spec.md §3: "Values:
/// immutable once constructed").
#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i32),
    Bigint(i64),
    Double(f64),
    Text(String),
    Blob(Vec<u8>),
    /// Nanoseconds since the Unix epoch.
    Timestamp(i64),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn datatype(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(DataType::Boolean),
            Value::Integer(_) => Some(DataType::Integer),
            Value::Bigint(_) => Some(DataType::Bigint),
            Value::Double(_) => Some(DataType::Double),
            Value::Text(_) => Some(DataType::Text),
            Value::Blob(_) => Some(DataType::Blob),
            Value::Timestamp(_) => Some(DataType::Timestamp),
        }
    }

    /// Coerces an integral value to `Double`, for use by indexes that mix
    /// integer and floating-point values in the same ordering (spec.md
    /// §4.1 "mixed integer/double comparability"). Non-numeric values pass
    /// through unchanged.
    pub fn to_numeric(&self) -> Value {
        match self {
            Value::Integer(i) => Value::Double(*i as f64),
            Value::Bigint(i) => Value::Double(*i as f64),
            other => other.clone(),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Bigint(i) => write!(f, "{i}"),
            Value::Double(d) => write!(f, "{d}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Blob(b) => write!(f, "{}", hex::encode(b)),
            Value::Timestamp(t) => write!(f, "@{t}ns"),
        }
    }
}

/// Value equality follows the comparison rules in spec.md §3: numbers
/// compare by numeric value across integer/double, text and blob
/// lexicographically. `NaN` never equals anything, including itself.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Null, Null) => true,
            (Boolean(a), Boolean(b)) => a == b,
            (Text(a), Text(b)) => a == b,
            (Blob(a), Blob(b)) => a == b,
            (Timestamp(a), Timestamp(b)) => a == b,
            (a, b) if a.is_numeric() && b.is_numeric() => a.as_f64() == b.as_f64(),
            _ => false,
        }
    }
}

/// Partial order used only by tests/debugging, not by the storage layer --
/// the authoritative ordering is the byte encoding in `encoding::keycode`,
/// which this mirrors for the cases it covers (spec.md §3 invariant 4:
/// numbers order numerically across integer/double, text/blob
/// lexicographically). Values that don't order against each other (e.g.
/// `Null`, `NaN`, or mismatched non-numeric types) return `None`.
impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        use Value::*;
        match (self, other) {
            (Text(a), Text(b)) => a.partial_cmp(b),
            (Blob(a), Blob(b)) => a.partial_cmp(b),
            (Timestamp(a), Timestamp(b)) => a.partial_cmp(b),
            (Boolean(a), Boolean(b)) => a.partial_cmp(b),
            (a, b) if a.is_numeric() && b.is_numeric() => a.as_f64().partial_cmp(&b.as_f64()),
            _ => None,
        }
    }
}

impl Value {
    fn is_numeric(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Bigint(_) | Value::Double(_))
    }

    fn as_f64(&self) -> f64 {
        match self {
            Value::Integer(i) => *i as f64,
            Value::Bigint(i) => *i as f64,
            Value::Double(d) => *d,
            _ => f64::NAN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_equality_crosses_types() {
        assert_eq!(Value::Integer(10), Value::Double(10.0));
        assert_eq!(Value::Bigint(10), Value::Integer(10));
        assert_ne!(Value::Integer(10), Value::Double(10.5));
    }

    #[test]
    fn null_is_not_numeric_equal_to_anything() {
        assert_ne!(Value::Null, Value::Integer(0));
    }

    #[test]
    fn to_numeric_coerces_integers_only() {
        assert_eq!(Value::Integer(5).to_numeric(), Value::Double(5.0));
        assert_eq!(Value::Text("x".into()).to_numeric(), Value::Text("x".into()));
    }
}
