// Evaluator trees mirror bound expression trees. Leaves either carry a
// constant or read a result-set slot; interior nodes own their result
// vector and write it at the positions of the governing (unflat) child
// state, so factorized inputs stay factorized through expression work.

use crate::common::{LogicalType, Value};
use crate::error::{GraphError, Result};
use crate::processor::{DataPos, ExecutionContext, ResultSet};
use crate::vector::{
    execute_binary, execute_unary, select_binary, select_unary, BinaryOperator, ChunkState,
    UnaryOperator, ValueVector,
};

#[derive(Debug, Clone)]
enum EvalKind {
    Literal(Value),
    Parameter(String),
    Reference(DataPos),
    Unary(UnaryOperator),
    Binary(BinaryOperator),
}

#[derive(Debug, Clone)]
pub struct ExprEvaluator {
    kind: EvalKind,
    children: Vec<ExprEvaluator>,
    data_type: LogicalType,
    result: ValueVector,
    own_state: ChunkState,
}

impl ExprEvaluator {
    pub fn literal(value: Value) -> Self {
        let data_type = value.data_type();
        Self {
            kind: EvalKind::Literal(value),
            children: Vec::new(),
            result: ValueVector::new(data_type.clone()),
            data_type,
            own_state: ChunkState::flat_single(),
        }
    }

    pub fn parameter(name: String) -> Self {
        Self {
            kind: EvalKind::Parameter(name),
            children: Vec::new(),
            data_type: LogicalType::Any,
            result: ValueVector::new(LogicalType::Any),
            own_state: ChunkState::flat_single(),
        }
    }

    pub fn reference(pos: DataPos, data_type: LogicalType) -> Self {
        Self {
            kind: EvalKind::Reference(pos),
            children: Vec::new(),
            result: ValueVector::new(data_type.clone()),
            data_type,
            own_state: ChunkState::flat_single(),
        }
    }

    pub fn unary(op: UnaryOperator, child: ExprEvaluator, data_type: LogicalType) -> Self {
        Self {
            kind: EvalKind::Unary(op),
            children: vec![child],
            result: ValueVector::new(data_type.clone()),
            data_type,
            own_state: ChunkState::flat_single(),
        }
    }

    pub fn binary(
        op: BinaryOperator,
        left: ExprEvaluator,
        right: ExprEvaluator,
        data_type: LogicalType,
    ) -> Self {
        Self {
            kind: EvalKind::Binary(op),
            children: vec![left, right],
            result: ValueVector::new(data_type.clone()),
            data_type,
            own_state: ChunkState::flat_single(),
        }
    }

    pub fn data_type(&self) -> &LogicalType {
        &self.data_type
    }

    /// The vector holding this evaluator's value plus the selection state
    /// governing it.
    pub fn resolve<'a>(&'a self, rs: &'a ResultSet) -> (&'a ValueVector, &'a ChunkState) {
        match &self.kind {
            EvalKind::Reference(pos) => (rs.vector(*pos), rs.chunk_state(pos.chunk)),
            _ => (&self.result, self.governing_state(rs)),
        }
    }

    /// All children flat means this node is flat too; otherwise the single
    /// unflat child's state governs size and positions.
    fn governing_state<'a>(&'a self, rs: &'a ResultSet) -> &'a ChunkState {
        for child in &self.children {
            let (_, state) = child.resolve(rs);
            if !state.is_flat() {
                return state;
            }
        }
        if let Some(first) = self.children.first() {
            return first.resolve(rs).1;
        }
        &self.own_state
    }

    pub fn is_result_flat(&self, rs: &ResultSet) -> bool {
        self.resolve(rs).1.is_flat()
    }

    /// Chunk position of the unflat chunk this evaluator reads, if any.
    /// Filters narrow that chunk's selection.
    pub fn unflat_chunk_pos(&self, rs: &ResultSet) -> Option<usize> {
        match &self.kind {
            EvalKind::Reference(pos) => {
                (!rs.chunk_state(pos.chunk).is_flat()).then_some(pos.chunk)
            }
            _ => self.children.iter().find_map(|c| c.unflat_chunk_pos(rs)),
        }
    }

    pub fn evaluate(&mut self, rs: &ResultSet, ctx: &ExecutionContext) -> Result<()> {
        for child in &mut self.children {
            child.evaluate(rs, ctx)?;
        }
        let kind = self.kind.clone();
        match kind {
            EvalKind::Literal(value) => {
                self.result.set_value(0, value);
            }
            EvalKind::Parameter(name) => {
                let value = ctx.param(&name)?;
                self.result.set_value(0, value);
            }
            EvalKind::Reference(_) => {}
            EvalKind::Unary(op) => {
                let (children, result) = (&self.children, &mut self.result);
                let (input, input_state) = children[0].resolve(rs);
                execute_unary(op, input, input_state, result)?;
            }
            EvalKind::Binary(op) => {
                let (children, result) = (&self.children, &mut self.result);
                let (lhs, lhs_state) = children[0].resolve(rs);
                let (rhs, rhs_state) = children[1].resolve(rs);
                execute_binary(op, lhs, lhs_state, rhs, rhs_state, result)?;
            }
        }
        Ok(())
    }

    /// Select shape, defined only for BOOL expressions: appends surviving
    /// physical positions and returns the survivor count. Comparisons and
    /// null tests run fused; everything else evaluates and scans, which
    /// keeps the survivor set identical to `evaluate` by construction.
    pub fn select(
        &mut self,
        rs: &ResultSet,
        ctx: &ExecutionContext,
        out_positions: &mut Vec<usize>,
    ) -> Result<usize> {
        if self.data_type != LogicalType::Bool && self.data_type != LogicalType::Any {
            return Err(GraphError::Unsupported(format!(
                "select over non-boolean expression of type {}",
                self.data_type
            )));
        }
        match self.kind.clone() {
            EvalKind::Binary(op) if op.returns_bool() && !is_connective(op) => {
                for child in &mut self.children {
                    child.evaluate(rs, ctx)?;
                }
                let (lhs, lhs_state) = self.children[0].resolve(rs);
                let (rhs, rhs_state) = self.children[1].resolve(rs);
                select_binary(op, lhs, lhs_state, rhs, rhs_state, out_positions)
            }
            EvalKind::Unary(op)
                if matches!(op, UnaryOperator::IsNull | UnaryOperator::IsNotNull) =>
            {
                self.children[0].evaluate(rs, ctx)?;
                let (input, input_state) = self.children[0].resolve(rs);
                select_unary(op, input, input_state, out_positions)
            }
            _ => {
                self.evaluate(rs, ctx)?;
                let (vector, state) = self.resolve(rs);
                let mut count = 0;
                for pos in state.positions() {
                    if *vector.value(pos) == Value::Bool(true) {
                        out_positions.push(pos);
                        count += 1;
                    }
                }
                Ok(count)
            }
        }
    }
}

fn is_connective(op: BinaryOperator) -> bool {
    matches!(op, BinaryOperator::And | BinaryOperator::Or | BinaryOperator::Xor)
}
