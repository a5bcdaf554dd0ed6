// Vectorized primitives. Every operation comes in an execute shape that
// writes a result vector and, for BOOL-producing kinds, a select shape
// that emits surviving positions instead, so filters fuse without
// materializing a boolean vector.
//
// Null semantics: AND/OR/XOR follow three-valued logic, comparisons and
// arithmetic are null if any operand is null, IS [NOT] NULL never returns
// null.

use super::value_vector::{ChunkState, ValueVector};
use crate::common::{hash_int64, Value};
use crate::error::{GraphError, Result};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    And,
    Or,
    Xor,
    Equals,
    NotEquals,
    LessThan,
    LessThanEquals,
    GreaterThan,
    GreaterThanEquals,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
}

impl BinaryOperator {
    pub fn returns_bool(self) -> bool {
        !matches!(
            self,
            BinaryOperator::Add
                | BinaryOperator::Subtract
                | BinaryOperator::Multiply
                | BinaryOperator::Divide
                | BinaryOperator::Modulo
                | BinaryOperator::Power
        )
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOperator::And => "AND",
            BinaryOperator::Or => "OR",
            BinaryOperator::Xor => "XOR",
            BinaryOperator::Equals => "=",
            BinaryOperator::NotEquals => "<>",
            BinaryOperator::LessThan => "<",
            BinaryOperator::LessThanEquals => "<=",
            BinaryOperator::GreaterThan => ">",
            BinaryOperator::GreaterThanEquals => ">=",
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Modulo => "%",
            BinaryOperator::Power => "^",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
    Not,
    Negate,
    Abs,
    IsNull,
    IsNotNull,
    HashNodeId,
    CastToString,
    CastToUnstructured,
    CastUnstructuredToBool,
}

impl UnaryOperator {
    pub fn returns_bool(self) -> bool {
        matches!(
            self,
            UnaryOperator::Not
                | UnaryOperator::IsNull
                | UnaryOperator::IsNotNull
                | UnaryOperator::CastUnstructuredToBool
        )
    }

    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOperator::Not => "NOT",
            UnaryOperator::Negate => "-",
            UnaryOperator::Abs => "ABS",
            UnaryOperator::IsNull => "IS_NULL",
            UnaryOperator::IsNotNull => "IS_NOT_NULL",
            UnaryOperator::HashNodeId => "HASH_NODE_ID",
            UnaryOperator::CastToString => "CAST_TO_STRING",
            UnaryOperator::CastToUnstructured => "CAST_TO_UNSTRUCTURED",
            UnaryOperator::CastUnstructuredToBool => "CAST_TO_BOOL",
        }
    }
}

// ============================================================================
// Scalar kernels
// ============================================================================

/// Ordering between two non-null values; `None` for NaN comparisons,
/// an error for type combinations with no defined order.
pub fn compare_values(lhs: &Value, rhs: &Value) -> Result<Option<Ordering>> {
    let ord = match (lhs, rhs) {
        (Value::Int64(a), Value::Int64(b)) => a.cmp(b),
        (Value::Double(a), Value::Double(b)) => {
            return Ok(a.partial_cmp(b));
        }
        (Value::Int64(a), Value::Double(b)) => {
            return Ok((*a as f64).partial_cmp(b));
        }
        (Value::Double(a), Value::Int64(b)) => {
            return Ok(a.partial_cmp(&(*b as f64)));
        }
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Date(a), Value::Date(b)) => a.cmp(b),
        (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
        (Value::Interval(a), Value::Interval(b)) => {
            // Approximate total order: months as 30 days, days as 24 hours.
            let total = |iv: &crate::common::IntervalValue| {
                (iv.months as i64) * 30 * 86_400_000_000 + (iv.days as i64) * 86_400_000_000 + iv.micros
            };
            total(a).cmp(&total(b))
        }
        // Node-id specialization: compare (label, offset) pairs.
        (Value::Node(a), Value::Node(b)) => a.cmp(b),
        (Value::Rel(a), Value::Rel(b)) => a.cmp(b),
        _ => {
            return Err(GraphError::Unsupported(format!(
                "cannot compare {} with {}",
                lhs.data_type(),
                rhs.data_type()
            )))
        }
    };
    Ok(Some(ord))
}

fn arithmetic(op: BinaryOperator, lhs: &Value, rhs: &Value) -> Result<Value> {
    // Integer pairs stay integral (except power); anything else widens.
    if let (Value::Int64(a), Value::Int64(b)) = (lhs, rhs) {
        let (a, b) = (*a, *b);
        return match op {
            BinaryOperator::Add => a
                .checked_add(b)
                .map(Value::Int64)
                .ok_or_else(|| GraphError::Runtime(format!("INT64 overflow: {a} + {b}"))),
            BinaryOperator::Subtract => a
                .checked_sub(b)
                .map(Value::Int64)
                .ok_or_else(|| GraphError::Runtime(format!("INT64 overflow: {a} - {b}"))),
            BinaryOperator::Multiply => a
                .checked_mul(b)
                .map(Value::Int64)
                .ok_or_else(|| GraphError::Runtime(format!("INT64 overflow: {a} * {b}"))),
            BinaryOperator::Divide => {
                if b == 0 {
                    Err(GraphError::Runtime("division by zero".to_string()))
                } else {
                    Ok(Value::Int64(a.wrapping_div(b)))
                }
            }
            BinaryOperator::Modulo => {
                if b == 0 {
                    Err(GraphError::Runtime("modulo by zero".to_string()))
                } else {
                    Ok(Value::Int64(a.wrapping_rem(b)))
                }
            }
            BinaryOperator::Power => Ok(Value::Double((a as f64).powf(b as f64))),
            _ => unreachable!("not an arithmetic operator"),
        };
    }
    let (a, b) = match (lhs.as_double(), rhs.as_double()) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(GraphError::Unsupported(format!(
                "arithmetic {} over {} and {}",
                op.symbol(),
                lhs.data_type(),
                rhs.data_type()
            )))
        }
    };
    Ok(Value::Double(match op {
        BinaryOperator::Add => a + b,
        BinaryOperator::Subtract => a - b,
        BinaryOperator::Multiply => a * b,
        BinaryOperator::Divide => a / b,
        BinaryOperator::Modulo => a % b,
        BinaryOperator::Power => a.powf(b),
        _ => unreachable!("not an arithmetic operator"),
    }))
}

/// One binary operation over two scalar operands.
pub fn compute_binary_value(op: BinaryOperator, lhs: &Value, rhs: &Value) -> Result<Value> {
    match op {
        BinaryOperator::And => Ok(match (lhs.as_bool(), rhs.as_bool()) {
            (Some(false), _) | (_, Some(false)) => Value::Bool(false),
            (Some(true), Some(true)) => Value::Bool(true),
            _ => Value::Null,
        }),
        BinaryOperator::Or => Ok(match (lhs.as_bool(), rhs.as_bool()) {
            (Some(true), _) | (_, Some(true)) => Value::Bool(true),
            (Some(false), Some(false)) => Value::Bool(false),
            _ => Value::Null,
        }),
        BinaryOperator::Xor => Ok(match (lhs.as_bool(), rhs.as_bool()) {
            (Some(a), Some(b)) => Value::Bool(a ^ b),
            _ => Value::Null,
        }),
        BinaryOperator::Equals
        | BinaryOperator::NotEquals
        | BinaryOperator::LessThan
        | BinaryOperator::LessThanEquals
        | BinaryOperator::GreaterThan
        | BinaryOperator::GreaterThanEquals => {
            if lhs.is_null() || rhs.is_null() {
                return Ok(Value::Null);
            }
            let ord = match compare_values(lhs, rhs)? {
                Some(ord) => ord,
                None => return Ok(Value::Null), // NaN comparisons
            };
            Ok(Value::Bool(match op {
                BinaryOperator::Equals => ord == Ordering::Equal,
                BinaryOperator::NotEquals => ord != Ordering::Equal,
                BinaryOperator::LessThan => ord == Ordering::Less,
                BinaryOperator::LessThanEquals => ord != Ordering::Greater,
                BinaryOperator::GreaterThan => ord == Ordering::Greater,
                BinaryOperator::GreaterThanEquals => ord != Ordering::Less,
                _ => unreachable!(),
            }))
        }
        _ => {
            if lhs.is_null() || rhs.is_null() {
                return Ok(Value::Null);
            }
            arithmetic(op, lhs, rhs)
        }
    }
}

/// One unary operation over a scalar operand.
pub fn compute_unary_value(op: UnaryOperator, input: &Value) -> Result<Value> {
    Ok(match op {
        UnaryOperator::Not => match input.as_bool() {
            Some(b) => Value::Bool(!b),
            None => Value::Null,
        },
        UnaryOperator::IsNull => Value::Bool(input.is_null()),
        UnaryOperator::IsNotNull => Value::Bool(!input.is_null()),
        UnaryOperator::Negate => match input {
            Value::Null => Value::Null,
            Value::Int64(v) => Value::Int64(v.checked_neg().ok_or_else(|| {
                GraphError::Runtime(format!("INT64 overflow: -({v})"))
            })?),
            Value::Double(v) => Value::Double(-v),
            other => {
                return Err(GraphError::Unsupported(format!(
                    "NEGATE over {}",
                    other.data_type()
                )))
            }
        },
        UnaryOperator::Abs => match input {
            Value::Null => Value::Null,
            Value::Int64(v) => Value::Int64(v.checked_abs().ok_or_else(|| {
                GraphError::Runtime(format!("INT64 overflow: abs({v})"))
            })?),
            Value::Double(v) => Value::Double(v.abs()),
            other => {
                return Err(GraphError::Unsupported(format!("ABS over {}", other.data_type())))
            }
        },
        UnaryOperator::HashNodeId => match input {
            Value::Null => Value::Null,
            Value::Node(id) => {
                Value::Int64(hash_int64(id.offset as i64 ^ ((id.label as i64) << 48)) as i64)
            }
            other => {
                return Err(GraphError::Unsupported(format!(
                    "HASH_NODE_ID over {}",
                    other.data_type()
                )))
            }
        },
        UnaryOperator::CastToString => match input {
            Value::Null => Value::Null,
            other => Value::String(other.to_string()),
        },
        UnaryOperator::CastToUnstructured => input.clone(),
        UnaryOperator::CastUnstructuredToBool => match input {
            Value::Null => Value::Null,
            Value::Bool(b) => Value::Bool(*b),
            other => {
                return Err(GraphError::Runtime(format!(
                    "cannot cast {} to BOOL",
                    other.data_type()
                )))
            }
        },
    })
}

// ============================================================================
// Vector shapes
// ============================================================================

/// Physical position of an operand for a given output position: flat
/// operands always read their current row, unflat ones co-vary with the
/// output.
#[inline]
fn operand_pos(state: &ChunkState, out_pos: usize) -> usize {
    if state.is_flat() {
        state.curr_position()
    } else {
        out_pos
    }
}

/// Output positions are governed by the unflat operand's state; with two
/// flat operands the left one governs.
fn governing<'a>(lhs_state: &'a ChunkState, rhs_state: &'a ChunkState) -> &'a ChunkState {
    if !lhs_state.is_flat() {
        lhs_state
    } else if !rhs_state.is_flat() {
        rhs_state
    } else {
        lhs_state
    }
}

pub fn execute_binary(
    op: BinaryOperator,
    lhs: &ValueVector,
    lhs_state: &ChunkState,
    rhs: &ValueVector,
    rhs_state: &ChunkState,
    out: &mut ValueVector,
) -> Result<()> {
    let gov = governing(lhs_state, rhs_state);
    for pos in gov.positions() {
        let l = lhs.value(operand_pos(lhs_state, pos));
        let r = rhs.value(operand_pos(rhs_state, pos));
        let v = compute_binary_value(op, l, r)?;
        out.set_value(pos, v);
    }
    Ok(())
}

pub fn execute_unary(
    op: UnaryOperator,
    input: &ValueVector,
    input_state: &ChunkState,
    out: &mut ValueVector,
) -> Result<()> {
    for pos in input_state.positions() {
        let v = compute_unary_value(op, input.value(pos))?;
        out.set_value(pos, v);
    }
    Ok(())
}

/// Select shape: appends the physical positions whose result is TRUE and
/// returns how many survived. Null results never survive.
pub fn select_binary(
    op: BinaryOperator,
    lhs: &ValueVector,
    lhs_state: &ChunkState,
    rhs: &ValueVector,
    rhs_state: &ChunkState,
    out_positions: &mut Vec<usize>,
) -> Result<usize> {
    debug_assert!(op.returns_bool());
    let gov = governing(lhs_state, rhs_state);
    let mut count = 0;
    for pos in gov.positions() {
        let l = lhs.value(operand_pos(lhs_state, pos));
        let r = rhs.value(operand_pos(rhs_state, pos));
        if compute_binary_value(op, l, r)? == Value::Bool(true) {
            out_positions.push(pos);
            count += 1;
        }
    }
    Ok(count)
}

pub fn select_unary(
    op: UnaryOperator,
    input: &ValueVector,
    input_state: &ChunkState,
    out_positions: &mut Vec<usize>,
) -> Result<usize> {
    debug_assert!(op.returns_bool());
    let mut count = 0;
    for pos in input_state.positions() {
        if compute_unary_value(op, input.value(pos))? == Value::Bool(true) {
            out_positions.push(pos);
            count += 1;
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::LogicalType;

    fn int_vector(values: &[Option<i64>]) -> ValueVector {
        let mut v = ValueVector::new(LogicalType::Int64);
        for (i, val) in values.iter().enumerate() {
            match val {
                Some(x) => v.set_value(i, Value::Int64(*x)),
                None => v.set_null(i),
            }
        }
        v
    }

    #[test]
    fn three_valued_and() {
        let t = Value::Bool(true);
        let f = Value::Bool(false);
        let n = Value::Null;
        assert_eq!(compute_binary_value(BinaryOperator::And, &t, &n).unwrap(), Value::Null);
        assert_eq!(compute_binary_value(BinaryOperator::And, &f, &n).unwrap(), Value::Bool(false));
        assert_eq!(compute_binary_value(BinaryOperator::Or, &t, &n).unwrap(), Value::Bool(true));
        assert_eq!(compute_binary_value(BinaryOperator::Or, &n, &n).unwrap(), Value::Null);
        assert_eq!(compute_binary_value(BinaryOperator::Xor, &t, &n).unwrap(), Value::Null);
    }

    #[test]
    fn null_comparison_yields_null() {
        let v = Value::Int64(4);
        assert_eq!(
            compute_binary_value(BinaryOperator::Equals, &v, &Value::Null).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn integer_overflow_is_a_runtime_error() {
        let max = Value::Int64(i64::MAX);
        let one = Value::Int64(1);
        assert!(matches!(
            compute_binary_value(BinaryOperator::Add, &max, &one),
            Err(GraphError::Runtime(_))
        ));
        assert!(matches!(
            compute_binary_value(BinaryOperator::Divide, &one, &Value::Int64(0)),
            Err(GraphError::Runtime(_))
        ));
    }

    #[test]
    fn mixed_numeric_widens_to_double() {
        assert_eq!(
            compute_binary_value(BinaryOperator::Add, &Value::Int64(1), &Value::Double(0.5))
                .unwrap(),
            Value::Double(1.5)
        );
    }

    #[test]
    fn execute_and_select_agree_on_survivors() {
        let lhs = int_vector(&[Some(1), Some(5), None, Some(9)]);
        let rhs = int_vector(&[Some(3), Some(3), Some(3), Some(3)]);
        let state = ChunkState::unflat_identity(4);

        let mut out = ValueVector::new(LogicalType::Bool);
        execute_binary(BinaryOperator::GreaterThan, &lhs, &state, &rhs, &state, &mut out).unwrap();
        let executed: Vec<usize> = (0..4)
            .filter(|&i| *out.value(i) == Value::Bool(true))
            .collect();

        let mut selected = Vec::new();
        select_binary(BinaryOperator::GreaterThan, &lhs, &state, &rhs, &state, &mut selected)
            .unwrap();
        assert_eq!(executed, selected);
        assert_eq!(selected, vec![1, 3]);
    }

    #[test]
    fn flat_unflat_mix_governed_by_unflat() {
        let unflat = int_vector(&[Some(10), Some(20), Some(30)]);
        let unflat_state = ChunkState::unflat_identity(3);
        let flat = int_vector(&[Some(15)]);
        let flat_state = ChunkState::flat_single();

        let mut selected = Vec::new();
        let n = select_binary(
            BinaryOperator::GreaterThan,
            &unflat,
            &unflat_state,
            &flat,
            &flat_state,
            &mut selected,
        )
        .unwrap();
        assert_eq!(n, 2);
        assert_eq!(selected, vec![1, 2]);
    }

    #[test]
    fn unsupported_combination_errors() {
        assert!(matches!(
            compute_binary_value(
                BinaryOperator::Add,
                &Value::String("a".into()),
                &Value::Int64(1)
            ),
            Err(GraphError::Unsupported(_))
        ));
    }
}
