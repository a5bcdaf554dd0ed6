use crate::common::{LogicalType, Value, DEFAULT_VECTOR_CAPACITY};

/// A batch of up to `DEFAULT_VECTOR_CAPACITY` values of one logical type.
/// Nulls are first-class values; `is_null` is authoritative regardless of
/// what was previously stored at a position.
#[derive(Debug, Clone)]
pub struct ValueVector {
    pub data_type: LogicalType,
    values: Vec<Value>,
}

impl ValueVector {
    pub fn new(data_type: LogicalType) -> Self {
        Self { data_type, values: vec![Value::Null; DEFAULT_VECTOR_CAPACITY] }
    }

    #[inline]
    pub fn value(&self, pos: usize) -> &Value {
        &self.values[pos]
    }

    #[inline]
    pub fn set_value(&mut self, pos: usize, value: Value) {
        self.values[pos] = value;
    }

    #[inline]
    pub fn set_null(&mut self, pos: usize) {
        self.values[pos] = Value::Null;
    }

    #[inline]
    pub fn is_null(&self, pos: usize) -> bool {
        self.values[pos].is_null()
    }

    pub fn reset(&mut self) {
        for v in &mut self.values {
            *v = Value::Null;
        }
    }
}

/// Selection state shared by all vectors of one data chunk.
///
/// Unflat: `selected_positions` lists the live physical positions.
/// Flat: `curr_idx` points at one entry of `selected_positions`; the chunk
/// behaves as a single row until the cursor moves.
#[derive(Debug, Clone)]
pub struct ChunkState {
    pub curr_idx: Option<usize>,
    pub selected_positions: Vec<usize>,
}

impl ChunkState {
    /// Identity selection over `size` positions, unflat.
    pub fn unflat_identity(size: usize) -> Self {
        Self { curr_idx: None, selected_positions: (0..size).collect() }
    }

    /// Single-row state, fixed at physical position 0.
    pub fn flat_single() -> Self {
        Self { curr_idx: Some(0), selected_positions: vec![0] }
    }

    #[inline]
    pub fn is_flat(&self) -> bool {
        self.curr_idx.is_some()
    }

    #[inline]
    pub fn selected_size(&self) -> usize {
        self.selected_positions.len()
    }

    /// Physical position of the current row; panics on unflat states.
    #[inline]
    pub fn curr_position(&self) -> usize {
        self.selected_positions[self.curr_idx.expect("state is unflat")]
    }

    /// Replaces the selection with `size` identity positions, unflat.
    pub fn reset_identity(&mut self, size: usize) {
        self.curr_idx = None;
        self.selected_positions.clear();
        self.selected_positions.extend(0..size);
    }

    /// The physical positions an operator should touch: the single current
    /// position when flat, every selected position otherwise.
    pub fn positions(&self) -> Box<dyn Iterator<Item = usize> + '_> {
        match self.curr_idx {
            Some(i) => Box::new(std::iter::once(self.selected_positions[i])),
            None => Box::new(self.selected_positions.iter().copied()),
        }
    }
}

impl Default for ChunkState {
    fn default() -> Self {
        Self::unflat_identity(0)
    }
}

/// Ordered vectors sharing one selection state; the unit the execution
/// engine moves between operators.
#[derive(Debug, Default)]
pub struct DataChunk {
    pub state: ChunkState,
    pub vectors: Vec<ValueVector>,
}

impl DataChunk {
    pub fn new(types: &[LogicalType]) -> Self {
        Self {
            state: ChunkState::unflat_identity(0),
            vectors: types.iter().cloned().map(ValueVector::new).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_state_positions() {
        let mut state = ChunkState::unflat_identity(4);
        state.selected_positions = vec![1, 3, 5, 7];
        state.curr_idx = Some(2);
        assert!(state.is_flat());
        assert_eq!(state.curr_position(), 5);
        assert_eq!(state.positions().collect::<Vec<_>>(), vec![5]);
    }

    #[test]
    fn unflat_state_positions() {
        let state = ChunkState::unflat_identity(3);
        assert!(!state.is_flat());
        assert_eq!(state.positions().collect::<Vec<_>>(), vec![0, 1, 2]);
    }
}
