// # Value Vectors & Vectorized Primitives
//
// Fixed-capacity batches of values plus the flat/unflat selection state
// shared by every vector of a data chunk. The primitive set covers the
// boolean, comparison, arithmetic, null-test, hash, and cast kernels in
// both execute and select shapes.

mod operations;
mod value_vector;

pub use operations::{
    compare_values, compute_binary_value, compute_unary_value, execute_binary, execute_unary,
    select_binary, select_unary, BinaryOperator, UnaryOperator,
};
pub use value_vector::{ChunkState, DataChunk, ValueVector};
