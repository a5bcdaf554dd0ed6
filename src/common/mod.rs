// # Common Types
//
// Shared identifiers, the runtime value model, logical types, and engine-wide
// constants. Every other module builds on these definitions.

mod value;

pub use value::{hash_value, GroupKey, IntervalValue, NodeId, RelId, Value};

use serde::{Deserialize, Serialize};

// ============================================================================
// Identifiers
// ============================================================================

// Offset of a node within its label's stores
pub type NodeOffset = u64;

// Offset of a rel within its label's stores
pub type RelOffset = u64;

// Catalog identifier of a node or rel label
pub type LabelId = u32;

// Index of a structured property within its label's property list
pub type PropertyId = u32;

// Page index within a single file
pub type PageIdx = u64;

pub const INVALID_NODE_OFFSET: NodeOffset = u64::MAX;

// ============================================================================
// Engine constants
// ============================================================================

/// Size of a regular buffer-pool page.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Size of a large buffer-pool page, used by list stores.
pub const LARGE_PAGE_SIZE: usize = 16 * DEFAULT_PAGE_SIZE;

/// Maximum number of values a value vector holds.
pub const DEFAULT_VECTOR_CAPACITY: usize = 2048;

/// Number of node offsets claimed by one scan morsel.
pub const NODE_MORSEL_SIZE: u64 = DEFAULT_VECTOR_CAPACITY as u64;

/// Strings at most this long live entirely inside their 16-byte column slot.
pub const STRING_INLINE_LENGTH: usize = 12;

/// Byte width of a variable-width column slot (length, prefix, location).
pub const STRING_DESCRIPTOR_SIZE: usize = 16;

// ============================================================================
// Rel direction
// ============================================================================

/// Direction of an adjacency structure relative to its source node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Fwd,
    Bwd,
}

impl Direction {
    pub fn reverse(self) -> Direction {
        match self {
            Direction::Fwd => Direction::Bwd,
            Direction::Bwd => Direction::Fwd,
        }
    }
}

/// Cardinality of a rel label, constraining how its adjacency is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cardinality {
    OneOne,
    OneMany,
    ManyOne,
    ManyMany,
}

impl Cardinality {
    /// Whether each node on the given side has at most one edge, which
    /// lets that direction use a single-slot adjacency column.
    pub fn is_single(self, direction: Direction) -> bool {
        match direction {
            Direction::Fwd => matches!(self, Cardinality::OneOne | Cardinality::ManyOne),
            Direction::Bwd => matches!(self, Cardinality::OneOne | Cardinality::OneMany),
        }
    }
}

// ============================================================================
// Logical types
// ============================================================================

/// Data type of a property, expression, or value vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalType {
    /// Placeholder for expressions whose type is only known at execution
    /// time (unbound parameters, unstructured reads).
    Any,
    Bool,
    Int64,
    Double,
    String,
    Date,
    Timestamp,
    Interval,
    List(Box<LogicalType>),
    Node,
    Rel,
    Path,
    Unstructured,
}

impl LogicalType {
    /// Whether values of this type are stored through the overflow file.
    pub fn is_variable_width(&self) -> bool {
        matches!(
            self,
            LogicalType::String | LogicalType::List(_) | LogicalType::Unstructured
        )
    }

    /// Byte width of one column slot of this type. Variable-width types
    /// store a fixed-size descriptor.
    pub fn column_width(&self) -> usize {
        match self {
            LogicalType::Bool => 1,
            LogicalType::Int64 | LogicalType::Double | LogicalType::Timestamp => 8,
            LogicalType::Date => 4,
            LogicalType::Interval => 16,
            LogicalType::Node | LogicalType::Rel => 8,
            _ => STRING_DESCRIPTOR_SIZE,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, LogicalType::Int64 | LogicalType::Double)
    }
}

impl std::fmt::Display for LogicalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogicalType::Any => write!(f, "ANY"),
            LogicalType::Bool => write!(f, "BOOL"),
            LogicalType::Int64 => write!(f, "INT64"),
            LogicalType::Double => write!(f, "DOUBLE"),
            LogicalType::String => write!(f, "STRING"),
            LogicalType::Date => write!(f, "DATE"),
            LogicalType::Timestamp => write!(f, "TIMESTAMP"),
            LogicalType::Interval => write!(f, "INTERVAL"),
            LogicalType::List(child) => write!(f, "LIST({child})"),
            LogicalType::Node => write!(f, "NODE"),
            LogicalType::Rel => write!(f, "REL"),
            LogicalType::Path => write!(f, "PATH"),
            LogicalType::Unstructured => write!(f, "UNSTRUCTURED"),
        }
    }
}

// ============================================================================
// Hashing
// ============================================================================

/// 64-bit mix of an integer key. Used by the hash index, hash joins, and
/// the HASH_NODE_ID primitive, so the shard choice for a key is stable.
#[inline]
pub fn hash_int64(value: i64) -> u64 {
    let mut h = (value as u64) ^ 0x9e37_79b9_7f4a_7c15;
    h = (h ^ (h >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    h = (h ^ (h >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    h ^ (h >> 31)
}

/// FNV-1a over raw bytes, for string keys.
#[inline]
pub fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut h = 0xcbf2_9ce4_8422_2325u64;
    for &b in bytes {
        h ^= b as u64;
        h = h.wrapping_mul(0x0000_0100_0000_01b3);
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_widths_are_slot_sized() {
        assert_eq!(LogicalType::Int64.column_width(), 8);
        assert_eq!(LogicalType::Date.column_width(), 4);
        assert_eq!(LogicalType::String.column_width(), STRING_DESCRIPTOR_SIZE);
        assert_eq!(
            LogicalType::List(Box::new(LogicalType::Int64)).column_width(),
            STRING_DESCRIPTOR_SIZE
        );
    }

    #[test]
    fn hash_int64_is_stable() {
        assert_eq!(hash_int64(42), hash_int64(42));
        assert_ne!(hash_int64(42), hash_int64(43));
    }
}
