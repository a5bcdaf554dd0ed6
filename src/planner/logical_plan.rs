// Logical operator tree plus the factorization schema it produces.
// Operators reference expressions by value; the physical mapper resolves
// slots through the schema captured on the plan.

use super::schema::Schema;
use crate::common::{Direction, LabelId, LogicalType, PropertyId};
use crate::expression::Expression;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOperatorKind {
    ScanNode,
    IndexScanNode,
    ScanNodeProperty,
    Extend,
    RecursiveExtend,
    Flatten,
    Filter,
    HashJoin,
    Projection,
    Aggregate,
    OrderBy,
    MultiplicityReducer,
    Skip,
    Limit,
    Unwind,
    CreateNode,
    SetProperty,
    DeleteNode,
}

/// One property slot read from storage: schema slot name, column, type.
#[derive(Debug, Clone)]
pub struct PropertyRef {
    pub name: String,
    pub property_id: PropertyId,
    pub data_type: LogicalType,
}

/// All structured properties of one node to be created, in property order.
#[derive(Debug, Clone)]
pub struct CreateNodeInfo {
    pub label: LabelId,
    pub values: Vec<Expression>,
}

#[derive(Debug, Clone)]
pub struct SetItem {
    pub variable: String,
    pub label: LabelId,
    pub property_id: PropertyId,
    pub value: Expression,
}

/// Payload column carried from the build side of a hash join into the
/// probe-side result.
#[derive(Debug, Clone)]
pub struct JoinPayload {
    pub name: String,
    pub data_type: LogicalType,
    /// Whether the slot is factorized inside the build table.
    pub from_unflat: bool,
}

#[derive(Debug, Clone)]
pub enum LogicalOperator {
    ScanNode {
        variable: String,
        label: LabelId,
    },
    IndexScanNode {
        variable: String,
        label: LabelId,
        key: Expression,
    },
    ScanNodeProperty {
        variable: String,
        label: LabelId,
        properties: Vec<PropertyRef>,
        child: Box<LogicalOperator>,
    },
    Extend {
        bound_variable: String,
        nbr_variable: String,
        rel_variable: String,
        label: LabelId,
        direction: Direction,
        is_column: bool,
        rel_properties: Vec<PropertyRef>,
        child: Box<LogicalOperator>,
    },
    RecursiveExtend {
        bound_variable: String,
        nbr_variable: String,
        rel_variable: String,
        label: LabelId,
        direction: Direction,
        lower: u32,
        upper: u32,
        track_path: bool,
        child: Box<LogicalOperator>,
    },
    Flatten {
        group: usize,
        child: Box<LogicalOperator>,
    },
    Filter {
        predicate: Expression,
        child: Box<LogicalOperator>,
    },
    HashJoin {
        join_node: String,
        payload: Vec<JoinPayload>,
        build_plan: Box<LogicalPlan>,
        child: Box<LogicalOperator>,
    },
    Projection {
        expressions: Vec<Expression>,
        /// Output slot name per expression.
        aliases: Vec<String>,
        discarded_groups: Vec<usize>,
        child: Box<LogicalOperator>,
    },
    Aggregate {
        group_bys: Vec<Expression>,
        aggregates: Vec<Expression>,
        child_schema: Schema,
        child: Box<LogicalOperator>,
    },
    OrderBy {
        keys: Vec<Expression>,
        ascending: Vec<bool>,
        child_schema: Schema,
        child: Box<LogicalOperator>,
    },
    MultiplicityReducer {
        child: Box<LogicalOperator>,
    },
    Skip {
        count: u64,
        child: Box<LogicalOperator>,
    },
    Limit {
        count: u64,
        child: Box<LogicalOperator>,
    },
    Unwind {
        list: Expression,
        alias: String,
        element_type: LogicalType,
        child: Option<Box<LogicalOperator>>,
    },
    CreateNode {
        items: Vec<CreateNodeInfo>,
        child: Option<Box<LogicalOperator>>,
    },
    SetProperty {
        items: Vec<SetItem>,
        child: Box<LogicalOperator>,
    },
    DeleteNode {
        variables: Vec<(String, LabelId)>,
        child: Box<LogicalOperator>,
    },
}

impl LogicalOperator {
    pub fn kind(&self) -> LogicalOperatorKind {
        match self {
            LogicalOperator::ScanNode { .. } => LogicalOperatorKind::ScanNode,
            LogicalOperator::IndexScanNode { .. } => LogicalOperatorKind::IndexScanNode,
            LogicalOperator::ScanNodeProperty { .. } => LogicalOperatorKind::ScanNodeProperty,
            LogicalOperator::Extend { .. } => LogicalOperatorKind::Extend,
            LogicalOperator::RecursiveExtend { .. } => LogicalOperatorKind::RecursiveExtend,
            LogicalOperator::Flatten { .. } => LogicalOperatorKind::Flatten,
            LogicalOperator::Filter { .. } => LogicalOperatorKind::Filter,
            LogicalOperator::HashJoin { .. } => LogicalOperatorKind::HashJoin,
            LogicalOperator::Projection { .. } => LogicalOperatorKind::Projection,
            LogicalOperator::Aggregate { .. } => LogicalOperatorKind::Aggregate,
            LogicalOperator::OrderBy { .. } => LogicalOperatorKind::OrderBy,
            LogicalOperator::MultiplicityReducer { .. } => LogicalOperatorKind::MultiplicityReducer,
            LogicalOperator::Skip { .. } => LogicalOperatorKind::Skip,
            LogicalOperator::Limit { .. } => LogicalOperatorKind::Limit,
            LogicalOperator::Unwind { .. } => LogicalOperatorKind::Unwind,
            LogicalOperator::CreateNode { .. } => LogicalOperatorKind::CreateNode,
            LogicalOperator::SetProperty { .. } => LogicalOperatorKind::SetProperty,
            LogicalOperator::DeleteNode { .. } => LogicalOperatorKind::DeleteNode,
        }
    }

    /// Children in execution order; hash joins list probe first, build
    /// second.
    pub fn children(&self) -> Vec<&LogicalOperator> {
        match self {
            LogicalOperator::ScanNode { .. } | LogicalOperator::IndexScanNode { .. } => vec![],
            LogicalOperator::ScanNodeProperty { child, .. }
            | LogicalOperator::Extend { child, .. }
            | LogicalOperator::RecursiveExtend { child, .. }
            | LogicalOperator::Flatten { child, .. }
            | LogicalOperator::Filter { child, .. }
            | LogicalOperator::Projection { child, .. }
            | LogicalOperator::Aggregate { child, .. }
            | LogicalOperator::OrderBy { child, .. }
            | LogicalOperator::MultiplicityReducer { child }
            | LogicalOperator::Skip { child, .. }
            | LogicalOperator::Limit { child, .. }
            | LogicalOperator::SetProperty { child, .. }
            | LogicalOperator::DeleteNode { child, .. } => vec![child],
            LogicalOperator::HashJoin { child, build_plan, .. } => {
                vec![child, &build_plan.root]
            }
            LogicalOperator::Unwind { child, .. } | LogicalOperator::CreateNode { child, .. } => {
                child.iter().map(|c| c.as_ref()).collect()
            }
        }
    }

    pub fn child(&self, idx: usize) -> Option<&LogicalOperator> {
        self.children().into_iter().nth(idx)
    }

    fn describe_one(&self) -> String {
        match self {
            LogicalOperator::ScanNode { variable, .. } => format!("SCAN_NODE({variable})"),
            LogicalOperator::IndexScanNode { variable, key, .. } => {
                format!("INDEX_SCAN_NODE({variable}={})", key.unique_name())
            }
            LogicalOperator::ScanNodeProperty { variable, properties, .. } => {
                let names: Vec<&str> = properties.iter().map(|p| p.name.as_str()).collect();
                format!("SCAN_NODE_PROPERTY({variable}:{})", names.join(","))
            }
            LogicalOperator::Extend { bound_variable, nbr_variable, .. } => {
                format!("EXTEND({bound_variable}->{nbr_variable})")
            }
            LogicalOperator::RecursiveExtend { bound_variable, nbr_variable, lower, upper, .. } => {
                format!("RECURSIVE_EXTEND({bound_variable}-[*{lower}..{upper}]->{nbr_variable})")
            }
            LogicalOperator::Flatten { group, .. } => format!("FLATTEN(group {group})"),
            LogicalOperator::Filter { predicate, .. } => {
                format!("FILTER({})", predicate.unique_name())
            }
            LogicalOperator::HashJoin { join_node, .. } => format!("HASH_JOIN({join_node})"),
            LogicalOperator::Projection { expressions, .. } => {
                let names: Vec<String> = expressions.iter().map(|e| e.unique_name()).collect();
                format!("PROJECTION({})", names.join(","))
            }
            LogicalOperator::Aggregate { aggregates, .. } => {
                let names: Vec<String> = aggregates.iter().map(|e| e.unique_name()).collect();
                format!("AGGREGATE({})", names.join(","))
            }
            LogicalOperator::OrderBy { keys, .. } => {
                let names: Vec<String> = keys.iter().map(|e| e.unique_name()).collect();
                format!("ORDER_BY({})", names.join(","))
            }
            LogicalOperator::MultiplicityReducer { .. } => "MULTIPLICITY_REDUCER".to_string(),
            LogicalOperator::Skip { count, .. } => format!("SKIP({count})"),
            LogicalOperator::Limit { count, .. } => format!("LIMIT({count})"),
            LogicalOperator::Unwind { alias, .. } => format!("UNWIND({alias})"),
            LogicalOperator::CreateNode { items, .. } => format!("CREATE_NODE(x{})", items.len()),
            LogicalOperator::SetProperty { items, .. } => format!("SET_PROPERTY(x{})", items.len()),
            LogicalOperator::DeleteNode { variables, .. } => {
                let names: Vec<&str> = variables.iter().map(|(v, _)| v.as_str()).collect();
                format!("DELETE_NODE({})", names.join(","))
            }
        }
    }

    fn describe_into(&self, depth: usize, out: &mut String) {
        out.push_str(&"  ".repeat(depth));
        out.push_str(&self.describe_one());
        out.push('\n');
        for child in self.children() {
            child.describe_into(depth + 1, out);
        }
    }

    /// Operator names along the leftmost (probe) spine, root first. The
    /// canonical sequence used for deterministic plan tie-breaking.
    pub fn canonical_sequence(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut op = Some(self);
        while let Some(current) = op {
            out.push(current.describe_one());
            op = current.child(0);
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct LogicalPlan {
    pub root: Box<LogicalOperator>,
    pub schema: Schema,
    pub estimated_cardinality: f64,
    pub cost: f64,
    /// Expressions the final collector materializes, with output aliases.
    pub expressions_to_collect: Vec<(Expression, String)>,
    /// Predicates consumed so far, as a bitmask over the part's predicate
    /// list. Planning-internal.
    pub(crate) used_predicates: u64,
}

impl LogicalPlan {
    pub fn describe(&self) -> String {
        let mut out = String::new();
        self.root.describe_into(0, &mut out);
        out
    }

    /// Deterministic ordering key: cost, then cardinality, then operator
    /// count, then a hash of the canonical operator sequence.
    pub fn ranking_key(&self) -> (u64, u64, usize, u64) {
        fn count_ops(op: &LogicalOperator) -> usize {
            1 + op.children().iter().map(|c| count_ops(c)).sum::<usize>()
        }
        let seq = self.root.canonical_sequence().join("|");
        (
            self.cost as u64,
            self.estimated_cardinality as u64,
            count_ops(&self.root),
            crate::common::hash_bytes(seq.as_bytes()),
        )
    }
}
