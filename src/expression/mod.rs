// # Bound Expressions
//
// Typed expression trees produced by the binder and consumed by the
// planner and the evaluator. Expressions are identified across planning
// by their unique name, which doubles as the schema key for computed
// slots.

mod evaluator;

pub use evaluator::ExprEvaluator;

use crate::common::{LabelId, LogicalType, PropertyId, Value};
use crate::vector::{BinaryOperator, UnaryOperator};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Collect,
}

impl AggregateFunction {
    pub fn name(self) -> &'static str {
        match self {
            AggregateFunction::Count => "COUNT",
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
            AggregateFunction::Collect => "COLLECT",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal {
        value: Value,
    },
    Parameter {
        name: String,
    },
    /// A matched node variable; evaluates to its node id.
    NodeVariable {
        name: String,
        label: LabelId,
    },
    /// A matched rel variable; evaluates to its rel id.
    RelVariable {
        name: String,
        label: LabelId,
    },
    Property {
        variable: String,
        /// Label of the variable the property is read from.
        label: LabelId,
        property: String,
        property_id: PropertyId,
        data_type: LogicalType,
        /// Whether `variable` is a rel (else a node).
        on_rel: bool,
    },
    /// An UNWIND alias or WITH-projected value, read from its slot.
    Alias {
        name: String,
        data_type: LogicalType,
    },
    Unary {
        op: UnaryOperator,
        child: Box<Expression>,
    },
    Binary {
        op: BinaryOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Aggregate {
        function: AggregateFunction,
        child: Option<Box<Expression>>,
        distinct: bool,
    },
}

impl Expression {
    pub fn data_type(&self) -> LogicalType {
        match self {
            Expression::Literal { value } => value.data_type(),
            Expression::Parameter { .. } => LogicalType::Any,
            Expression::NodeVariable { .. } => LogicalType::Node,
            Expression::RelVariable { .. } => LogicalType::Rel,
            Expression::Property { data_type, .. } => data_type.clone(),
            Expression::Alias { data_type, .. } => data_type.clone(),
            Expression::Unary { op, child } => {
                if op.returns_bool() {
                    LogicalType::Bool
                } else {
                    match op {
                        UnaryOperator::CastToString => LogicalType::String,
                        UnaryOperator::CastToUnstructured => LogicalType::Unstructured,
                        UnaryOperator::HashNodeId => LogicalType::Int64,
                        _ => child.data_type(),
                    }
                }
            }
            Expression::Binary { op, left, right } => {
                if op.returns_bool() {
                    LogicalType::Bool
                } else {
                    match (left.data_type(), right.data_type()) {
                        (LogicalType::Int64, LogicalType::Int64)
                            if *op != BinaryOperator::Power =>
                        {
                            LogicalType::Int64
                        }
                        (l, r) if l.is_numeric() && r.is_numeric() => LogicalType::Double,
                        _ => LogicalType::Any,
                    }
                }
            }
            Expression::Aggregate { function, child, .. } => match function {
                AggregateFunction::Count => LogicalType::Int64,
                AggregateFunction::Avg => LogicalType::Double,
                AggregateFunction::Collect => LogicalType::List(Box::new(
                    child.as_ref().map(|c| c.data_type()).unwrap_or(LogicalType::Any),
                )),
                _ => child.as_ref().map(|c| c.data_type()).unwrap_or(LogicalType::Any),
            },
        }
    }

    /// Canonical name used as the slot key in schemas and result sets.
    pub fn unique_name(&self) -> String {
        match self {
            Expression::Literal { value } => format!("lit({value})"),
            Expression::Parameter { name } => format!("${name}"),
            Expression::NodeVariable { name, .. } => name.clone(),
            Expression::RelVariable { name, .. } => name.clone(),
            Expression::Property { variable, property, .. } => format!("{variable}.{property}"),
            Expression::Alias { name, .. } => name.clone(),
            Expression::Unary { op, child } => format!("{}({})", op.symbol(), child.unique_name()),
            Expression::Binary { op, left, right } => {
                format!("{}({},{})", op.symbol(), left.unique_name(), right.unique_name())
            }
            Expression::Aggregate { function, child, distinct } => {
                let inner = child.as_ref().map(|c| c.unique_name()).unwrap_or_else(|| "*".into());
                if *distinct {
                    format!("{}(DISTINCT {})", function.name(), inner)
                } else {
                    format!("{}({})", function.name(), inner)
                }
            }
        }
    }

    /// Names of the node/rel variables this expression depends on.
    pub fn collect_variables(&self, out: &mut HashSet<String>) {
        match self {
            Expression::NodeVariable { name, .. } | Expression::RelVariable { name, .. } => {
                out.insert(name.clone());
            }
            Expression::Property { variable, .. } => {
                out.insert(variable.clone());
            }
            Expression::Unary { child, .. } => child.collect_variables(out),
            Expression::Binary { left, right, .. } => {
                left.collect_variables(out);
                right.collect_variables(out);
            }
            Expression::Aggregate { child, .. } => {
                if let Some(child) = child {
                    child.collect_variables(out);
                }
            }
            _ => {}
        }
    }

    /// Property sub-expressions that must be scanned from storage before
    /// this expression can run.
    pub fn collect_properties<'a>(&'a self, out: &mut Vec<&'a Expression>) {
        match self {
            Expression::Property { .. } => out.push(self),
            Expression::Unary { child, .. } => child.collect_properties(out),
            Expression::Binary { left, right, .. } => {
                left.collect_properties(out);
                right.collect_properties(out);
            }
            Expression::Aggregate { child, .. } => {
                if let Some(child) = child {
                    child.collect_properties(out);
                }
            }
            _ => {}
        }
    }

    /// Aggregate sub-expressions, outermost first.
    pub fn collect_aggregates<'a>(&'a self, out: &mut Vec<&'a Expression>) {
        match self {
            Expression::Aggregate { .. } => out.push(self),
            Expression::Unary { child, .. } => child.collect_aggregates(out),
            Expression::Binary { left, right, .. } => {
                left.collect_aggregates(out);
                right.collect_aggregates(out);
            }
            _ => {}
        }
    }

    pub fn has_aggregate(&self) -> bool {
        let mut aggs = Vec::new();
        self.collect_aggregates(&mut aggs);
        !aggs.is_empty()
    }

    /// Splits a predicate on top-level ANDs into its conjuncts.
    pub fn split_conjuncts(self) -> Vec<Expression> {
        match self {
            Expression::Binary { op: BinaryOperator::And, left, right } => {
                let mut parts = left.split_conjuncts();
                parts.extend(right.split_conjuncts());
                parts
            }
            other => vec![other],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prop(var: &str, name: &str) -> Expression {
        Expression::Property {
            variable: var.to_string(),
            label: 0,
            property: name.to_string(),
            property_id: 0,
            data_type: LogicalType::Int64,
            on_rel: false,
        }
    }

    #[test]
    fn unique_names_are_canonical() {
        let e = Expression::Binary {
            op: BinaryOperator::Add,
            left: Box::new(prop("a", "age")),
            right: Box::new(Expression::Literal { value: Value::Int64(2) }),
        };
        assert_eq!(e.unique_name(), "+(a.age,lit(2))");
        assert_eq!(e.data_type(), LogicalType::Int64);
    }

    #[test]
    fn conjunct_splitting() {
        let e = Expression::Binary {
            op: BinaryOperator::And,
            left: Box::new(Expression::Binary {
                op: BinaryOperator::And,
                left: Box::new(prop("a", "x")),
                right: Box::new(prop("a", "y")),
            }),
            right: Box::new(prop("b", "z")),
        };
        let parts = e.split_conjuncts();
        assert_eq!(parts.len(), 3);
    }

    #[test]
    fn variable_collection_spans_tree() {
        let e = Expression::Binary {
            op: BinaryOperator::Equals,
            left: Box::new(prop("a", "ID")),
            right: Box::new(prop("b", "ID")),
        };
        let mut vars = HashSet::new();
        e.collect_variables(&mut vars);
        assert!(vars.contains("a") && vars.contains("b"));
    }
}
