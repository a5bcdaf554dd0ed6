// Binder output: catalog-resolved statements the planner consumes. One
// bound query is a sequence of parts; each WITH starts a new part, and the
// final part carries the RETURN (or ends at an update clause).

use crate::common::{LabelId, LogicalType};
use crate::expression::Expression;
use crate::planner::query_graph::QueryGraph;
use crate::planner::{CreateNodeInfo, SetItem};

#[derive(Debug, Clone)]
pub struct BoundUnwind {
    pub list: Expression,
    pub alias: String,
    pub element_type: LogicalType,
}

#[derive(Debug, Clone)]
pub enum BoundUpdate {
    Create(Vec<CreateNodeInfo>),
    Set(Vec<SetItem>),
    Delete(Vec<(String, LabelId)>),
}

#[derive(Debug, Clone)]
pub struct BoundProjection {
    pub expressions: Vec<Expression>,
    /// Output column name per expression (explicit alias or rendered text).
    pub aliases: Vec<String>,
    pub order_by: Vec<Expression>,
    pub ascending: Vec<bool>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    /// WHERE attached to a WITH clause.
    pub predicate: Option<Expression>,
    pub is_final_return: bool,
}

#[derive(Debug, Clone, Default)]
pub struct BoundQueryPart {
    pub query_graph: QueryGraph,
    /// Conjunct-split MATCH ... WHERE predicates.
    pub predicates: Vec<Expression>,
    pub unwind: Option<BoundUnwind>,
    pub updates: Vec<BoundUpdate>,
    pub projection: Option<BoundProjection>,
}

impl BoundQueryPart {
    pub fn has_updates(&self) -> bool {
        !self.updates.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct BoundQuery {
    pub parts: Vec<BoundQueryPart>,
    pub is_write: bool,
    pub is_explain: bool,
    pub is_profile: bool,
    /// Parameter names seen while binding, for execute-time validation.
    pub parameter_names: Vec<String>,
}

impl BoundQuery {
    /// The RETURN projection, when the query has one.
    pub fn final_projection(&self) -> Option<&BoundProjection> {
        self.parts.last().and_then(|p| p.projection.as_ref()).filter(|p| p.is_final_return)
    }
}
