use super::{LabelId, LogicalType, NodeOffset, RelOffset};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

// Identity of a node: which label it belongs to and its offset there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    pub label: LabelId,
    pub offset: NodeOffset,
}

// Identity of a rel, offset within its rel label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelId {
    pub label: LabelId,
    pub offset: RelOffset,
}

/// Calendar interval, stored as separate month/day/microsecond components
/// so that month arithmetic stays exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IntervalValue {
    pub months: i32,
    pub days: i32,
    pub micros: i64,
}

/// A single runtime value. Vectors hold one of these per slot; `Null` is
/// legal in every vector regardless of its declared type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    Double(f64),
    String(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    Interval(IntervalValue),
    List(Vec<Value>),
    Node(NodeId),
    Rel(RelId),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn data_type(&self) -> LogicalType {
        match self {
            Value::Null => LogicalType::Any,
            Value::Bool(_) => LogicalType::Bool,
            Value::Int64(_) => LogicalType::Int64,
            Value::Double(_) => LogicalType::Double,
            Value::String(_) => LogicalType::String,
            Value::Date(_) => LogicalType::Date,
            Value::Timestamp(_) => LogicalType::Timestamp,
            Value::Interval(_) => LogicalType::Interval,
            Value::List(values) => {
                let child = values
                    .iter()
                    .find(|v| !v.is_null())
                    .map(|v| v.data_type())
                    .unwrap_or(LogicalType::Any);
                LogicalType::List(Box::new(child))
            }
            Value::Node(_) => LogicalType::Node,
            Value::Rel(_) => LogicalType::Rel,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int64(&self) -> Option<i64> {
        match self {
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            Value::Node(id) => Some(*id),
            _ => None,
        }
    }

    /// Numeric view used by arithmetic and aggregates; integers widen.
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Int64(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Date(d) => write!(f, "{d}"),
            Value::Timestamp(t) => write!(f, "{t}"),
            Value::Interval(iv) => {
                write!(f, "{} months {} days {} us", iv.months, iv.days, iv.micros)
            }
            Value::List(values) => {
                write!(f, "[")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Value::Node(id) => write!(f, "({}:{})", id.label, id.offset),
            Value::Rel(id) => write!(f, "[{}:{}]", id.label, id.offset),
        }
    }
}

/// Hashes a value the same way regardless of which vector it came from.
/// Doubles hash by bit pattern; `Null` hashes to a fixed tag so grouping
/// treats nulls as one group.
pub fn hash_value(value: &Value, state: &mut impl std::hash::Hasher) {
    use std::hash::Hash;
    match value {
        Value::Null => 0u8.hash(state),
        Value::Bool(b) => (1u8, b).hash(state),
        Value::Int64(v) => (2u8, v).hash(state),
        Value::Double(v) => (3u8, v.to_bits()).hash(state),
        Value::String(s) => (4u8, s).hash(state),
        Value::Date(d) => (5u8, d).hash(state),
        Value::Timestamp(t) => (6u8, t).hash(state),
        Value::Interval(iv) => (7u8, iv.months, iv.days, iv.micros).hash(state),
        Value::List(values) => {
            8u8.hash(state);
            values.len().hash(state);
            for v in values {
                hash_value(v, state);
            }
        }
        Value::Node(id) => (9u8, id.label, id.offset).hash(state),
        Value::Rel(id) => (10u8, id.label, id.offset).hash(state),
    }
}

/// Wrapper giving `Value` rows `Eq + Hash` for hash aggregation and
/// DISTINCT tracking. NaNs compare equal to themselves by bit pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupKey(pub Vec<Value>);

impl Eq for GroupKey {}

impl std::hash::Hash for GroupKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        for v in &self.0 {
            hash_value(v, state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn group_key_treats_nulls_as_equal() {
        let mut set = HashSet::new();
        set.insert(GroupKey(vec![Value::Null, Value::Int64(1)]));
        assert!(!set.insert(GroupKey(vec![Value::Null, Value::Int64(1)])));
        assert!(set.insert(GroupKey(vec![Value::Null, Value::Int64(2)])));
    }

    #[test]
    fn list_type_from_first_non_null_element() {
        let v = Value::List(vec![Value::Null, Value::Int64(3)]);
        assert_eq!(v.data_type(), LogicalType::List(Box::new(LogicalType::Int64)));
    }
}
