// Logical-to-physical mapping. Walks the logical tree bottom-up, assigns
// monotonically increasing operator ids, resolves every expression slot
// through the result-set descriptor derived from the plan's factorization
// schema, and splits the tree into pipelines at materializer boundaries
// (hash-join builds, aggregates, order-by, recursive-join inputs).

use super::factorized_table::{ColumnSchema, TableSchema};
use super::operator::*;
use super::pipeline::{PhysicalPlan, Pipeline};
use super::result_set::{DataPos, ResultSetDescriptor};
use crate::catalog::Catalog;
use crate::common::{Direction, LogicalType};
use crate::error::{GraphError, Result};
use crate::expression::{Expression, ExprEvaluator};
use crate::planner::schema::Schema;
use crate::planner::{LogicalOperator, LogicalPlan};
use crate::storage::StorageManager;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

pub struct PlanMapper<'a> {
    storage: &'a Arc<StorageManager>,
    catalog: &'a Catalog,
    next_operator_id: u32,
    pipelines: Vec<Pipeline>,
    /// Set while mapping operators that must not run in parallel (writes,
    /// ordered rescans); captured by the pipeline being built.
    current_single_threaded: bool,
    final_scoped_chunks: Vec<usize>,
}

/// Output column header of a statement: alias and type per slot.
pub type ResultHeader = Vec<(String, LogicalType)>;

impl<'a> PlanMapper<'a> {
    pub fn map_plan(
        plan: &LogicalPlan,
        storage: &'a Arc<StorageManager>,
        catalog: &'a Catalog,
    ) -> Result<(PhysicalPlan, Arc<SharedFactorizedTable>, ResultHeader)> {
        let mut mapper = PlanMapper {
            storage,
            catalog,
            next_operator_id: 0,
            pipelines: Vec::new(),
            current_single_threaded: false,
            final_scoped_chunks: plan.schema.groups_in_scope().into_iter().collect(),
        };
        let descriptor = descriptor_from_schema(&plan.schema);
        let root = mapper.map_operator(&plan.root, &descriptor)?;

        let mut payload = Vec::new();
        let mut header = Vec::new();
        let mut columns = Vec::new();
        for (expr, alias) in &plan.expressions_to_collect {
            let pos = descriptor.data_pos(alias).ok_or_else(|| {
                GraphError::Plan(format!("output column {alias} has no slot"))
            })?;
            payload.push(pos);
            header.push((alias.clone(), expr.data_type()));
            columns.push(ColumnSchema {
                name: alias.clone(),
                data_type: expr.data_type(),
                is_unflat: false,
            });
        }
        let shared = Arc::new(SharedFactorizedTable::new(TableSchema { columns }));
        let id = mapper.next_id();
        let sink = Box::new(ResultCollector::new(id, root, payload, Arc::clone(&shared)));
        let single_threaded = mapper.current_single_threaded;
        mapper.pipelines.push(Pipeline { sink, descriptor, single_threaded });
        Ok((PhysicalPlan { pipelines: mapper.pipelines }, shared, header))
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_operator_id;
        self.next_operator_id += 1;
        id
    }

    fn build_evaluator(
        &self,
        expr: &Expression,
        descriptor: &ResultSetDescriptor,
    ) -> Result<ExprEvaluator> {
        build_evaluator(expr, descriptor)
    }

    fn map_operator(
        &mut self,
        op: &LogicalOperator,
        descriptor: &ResultSetDescriptor,
    ) -> Result<Box<dyn PhysicalOperator>> {
        let id = self.next_id();
        Ok(match op {
            LogicalOperator::ScanNode { variable, label } => {
                let table = self.storage.node_table(*label);
                let shared = Arc::new(ScanNodeIdSharedState::new(table.num_nodes(), None));
                let out = self.slot(descriptor, variable)?;
                Box::new(ScanNodeId::new(id, *label, table, shared, out))
            }
            LogicalOperator::IndexScanNode { variable, label, key } => {
                let table = self.storage.node_table(*label);
                let index = self.storage.index(*label);
                let key = self.build_evaluator(key, descriptor)?;
                let out = self.slot(descriptor, variable)?;
                Box::new(IndexScan::new(id, *label, key, index, table, out))
            }
            LogicalOperator::ScanNodeProperty { variable, label, properties, child } => {
                let child = self.map_operator(child, descriptor)?;
                let input = self.slot(descriptor, variable)?;
                let items = properties
                    .iter()
                    .map(|p| Ok((p.property_id, self.slot(descriptor, &p.name)?)))
                    .collect::<Result<Vec<_>>>()?;
                Box::new(ScanNodeProperty::new(
                    id,
                    child,
                    input,
                    items,
                    self.storage.node_table(*label),
                ))
            }
            LogicalOperator::Extend {
                bound_variable,
                nbr_variable,
                rel_variable,
                label,
                direction,
                is_column,
                rel_properties,
                child,
            } => {
                let child = self.map_operator(child, descriptor)?;
                let rel_schema = self.catalog.rel_label(*label);
                let nbr_label = match direction {
                    Direction::Fwd => rel_schema.dst_label,
                    Direction::Bwd => rel_schema.src_label,
                };
                let items = rel_properties
                    .iter()
                    .map(|p| Ok((p.property_id, self.slot(descriptor, &p.name)?)))
                    .collect::<Result<Vec<_>>>()?;
                Box::new(Extend::new(
                    id,
                    child,
                    self.slot(descriptor, bound_variable)?,
                    self.slot(descriptor, nbr_variable)?,
                    self.slot(descriptor, rel_variable)?,
                    items,
                    self.storage.rel_table(*label),
                    *direction,
                    *is_column,
                    nbr_label,
                    *label,
                ))
            }
            LogicalOperator::RecursiveExtend {
                bound_variable,
                nbr_variable,
                rel_variable,
                label,
                direction,
                lower,
                upper,
                track_path,
                child,
            } => {
                // The child materializes every source tuple into an input
                // table consumed one morsel (one source) at a time.
                let carried = defined_slot_names(child);
                let child_op = self.map_operator(child, descriptor)?;
                let input_positions: Vec<DataPos> = carried
                    .iter()
                    .map(|name| self.slot(descriptor, name))
                    .collect::<Result<_>>()?;
                let input_schema = TableSchema {
                    columns: carried
                        .iter()
                        .zip(&input_positions)
                        .map(|(name, pos)| ColumnSchema {
                            name: name.clone(),
                            data_type: descriptor.chunks[pos.chunk].vectors[pos.vector]
                                .data_type
                                .clone(),
                            is_unflat: false,
                        })
                        .collect(),
                };
                let input_table = Arc::new(SharedFactorizedTable::new(input_schema));
                let collector_id = self.next_id();
                let collector = Box::new(ResultCollector::new(
                    collector_id,
                    child_op,
                    input_positions.clone(),
                    Arc::clone(&input_table),
                ));
                self.pipelines.push(Pipeline {
                    sink: collector,
                    descriptor: descriptor.clone(),
                    single_threaded: false,
                });

                let rel_schema = self.catalog.rel_label(*label);
                let node_label = match direction {
                    Direction::Fwd => rel_schema.dst_label,
                    Direction::Bwd => rel_schema.src_label,
                };
                let num_nodes = self.catalog.node_label(node_label).num_nodes;
                let shared =
                    Arc::new(RecursiveJoinSharedState::new(Arc::clone(&input_table), num_nodes));
                let vectors_to_scan: Vec<(usize, DataPos)> = input_positions
                    .iter()
                    .enumerate()
                    .map(|(i, &pos)| (i, pos))
                    .collect();
                let src_column = carried
                    .iter()
                    .position(|n| n == bound_variable)
                    .ok_or_else(|| {
                        GraphError::Plan(format!(
                            "recursive extend source {bound_variable} is not materialized"
                        ))
                    })?;
                let out_path = if *track_path {
                    Some(self.slot(descriptor, &format!("path({rel_variable})"))?)
                } else {
                    None
                };
                Box::new(RecursiveJoin::new(
                    id,
                    shared,
                    *lower,
                    *upper,
                    *track_path,
                    vectors_to_scan,
                    src_column,
                    self.slot(descriptor, nbr_variable)?,
                    self.slot(descriptor, &format!("length({rel_variable})"))?,
                    out_path,
                    self.storage.rel_table(*label),
                    *direction,
                    rel_schema.cardinality.is_single(*direction),
                    node_label,
                    *label,
                ))
            }
            LogicalOperator::Flatten { group, child } => {
                let child = self.map_operator(child, descriptor)?;
                Box::new(Flatten::new(id, child, *group))
            }
            LogicalOperator::Filter { predicate, child } => {
                let child = self.map_operator(child, descriptor)?;
                let predicate = self.build_evaluator(predicate, descriptor)?;
                Box::new(Filter::new(id, child, predicate))
            }
            LogicalOperator::HashJoin { join_node, payload, build_plan, child } => {
                // Build side first, as its own pipeline.
                let build_descriptor = descriptor_from_schema(&build_plan.schema);
                let build_child = self.map_operator(&build_plan.root, &build_descriptor)?;
                let key_pos = self.slot(&build_descriptor, join_node)?;
                let mut build_positions = vec![key_pos];
                let mut columns = vec![ColumnSchema {
                    name: join_node.clone(),
                    data_type: LogicalType::Node,
                    is_unflat: false,
                }];
                for p in payload {
                    build_positions.push(self.slot(&build_descriptor, &p.name)?);
                    columns.push(ColumnSchema {
                        name: p.name.clone(),
                        data_type: p.data_type.clone(),
                        is_unflat: p.from_unflat,
                    });
                }
                let shared = Arc::new(HashJoinSharedState::new(TableSchema { columns }));
                let build_id = self.next_id();
                let build = Box::new(HashJoinBuild::new(
                    build_id,
                    build_child,
                    build_positions,
                    Arc::clone(&shared),
                ));
                self.pipelines.push(Pipeline {
                    sink: build,
                    descriptor: build_descriptor,
                    single_threaded: false,
                });

                let probe_child = self.map_operator(child, descriptor)?;
                let probe_payload = payload
                    .iter()
                    .enumerate()
                    .map(|(i, p)| {
                        Ok(ProbePayload {
                            column: i + 1,
                            out: self.slot(descriptor, &p.name)?,
                            from_unflat: p.from_unflat,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Box::new(HashJoinProbe::new(
                    id,
                    probe_child,
                    self.slot(descriptor, join_node)?,
                    probe_payload,
                    shared,
                ))
            }
            LogicalOperator::Projection { expressions, aliases, discarded_groups, child } => {
                let child = self.map_operator(child, descriptor)?;
                let mut items = Vec::with_capacity(expressions.len());
                for (expr, alias) in expressions.iter().zip(aliases) {
                    let out = self.slot(descriptor, alias)?;
                    let identity = descriptor.data_pos(&expr.unique_name()) == Some(out);
                    items.push(ProjectionItem {
                        evaluator: self.build_evaluator(expr, descriptor)?,
                        out,
                        identity,
                    });
                }
                Box::new(Projection::new(id, child, items, discarded_groups.clone()))
            }
            LogicalOperator::Aggregate { group_bys, aggregates, child_schema, child } => {
                let child_descriptor = descriptor_from_schema(child_schema);
                let child_op = self.map_operator(child, &child_descriptor)?;
                let group_evals = group_bys
                    .iter()
                    .map(|e| self.build_evaluator(e, &child_descriptor))
                    .collect::<Result<Vec<_>>>()?;
                let mut descs = Vec::new();
                let mut inputs = Vec::new();
                for agg in aggregates {
                    let Expression::Aggregate { function, child: input, distinct } = agg else {
                        return Err(GraphError::Plan(format!(
                            "aggregate list holds a non-aggregate: {}",
                            agg.unique_name()
                        )));
                    };
                    descs.push(AggDesc {
                        function: *function,
                        distinct: *distinct,
                        has_input: input.is_some(),
                    });
                    inputs.push(match input {
                        Some(input) => Some(self.build_evaluator(input, &child_descriptor)?),
                        None => None,
                    });
                }
                let shared = Arc::new(AggregateSharedState::new(descs));
                let build_id = self.next_id();
                let build = Box::new(AggregateBuild::new(
                    build_id,
                    child_op,
                    group_evals,
                    inputs,
                    Arc::clone(&shared),
                ));
                self.pipelines.push(Pipeline {
                    sink: build,
                    descriptor: child_descriptor,
                    single_threaded: false,
                });

                let outputs = group_bys
                    .iter()
                    .chain(aggregates)
                    .map(|e| self.slot(descriptor, &e.unique_name()))
                    .collect::<Result<Vec<_>>>()?;
                Box::new(AggregateScan::new(id, outputs, shared))
            }
            LogicalOperator::OrderBy { keys, ascending, child_schema, child } => {
                let child_descriptor = descriptor_from_schema(child_schema);
                let child_op = self.map_operator(child, &child_descriptor)?;
                let key_evals = keys
                    .iter()
                    .map(|e| self.build_evaluator(e, &child_descriptor))
                    .collect::<Result<Vec<_>>>()?;
                let carried = child_schema.expressions_in_scope();
                let payload = carried
                    .iter()
                    .map(|(name, _)| self.slot(&child_descriptor, name))
                    .collect::<Result<Vec<_>>>()?;
                let shared = Arc::new(OrderBySharedState::new(ascending.clone()));
                let sink_id = self.next_id();
                let sink = Box::new(OrderBySink::new(
                    sink_id,
                    child_op,
                    key_evals,
                    payload,
                    Arc::clone(&shared),
                ));
                self.pipelines.push(Pipeline {
                    sink,
                    descriptor: child_descriptor,
                    single_threaded: false,
                });

                // Ordered rescan must stay on one thread.
                self.current_single_threaded = true;
                let outputs = carried
                    .iter()
                    .map(|(name, _)| self.slot(descriptor, name))
                    .collect::<Result<Vec<_>>>()?;
                Box::new(OrderByScan::new(id, outputs, shared))
            }
            LogicalOperator::MultiplicityReducer { child } => {
                let child = self.map_operator(child, descriptor)?;
                Box::new(MultiplicityReducer::new(id, child, self.final_scoped_chunks.clone()))
            }
            LogicalOperator::Skip { count, child } => {
                let child = self.map_operator(child, descriptor)?;
                Box::new(Skip::new(
                    id,
                    child,
                    *count,
                    self.final_scoped_chunks.clone(),
                    Arc::new(AtomicU64::new(0)),
                ))
            }
            LogicalOperator::Limit { count, child } => {
                let child = self.map_operator(child, descriptor)?;
                Box::new(Limit::new(
                    id,
                    child,
                    *count,
                    self.final_scoped_chunks.clone(),
                    Arc::new(AtomicU64::new(0)),
                ))
            }
            LogicalOperator::Unwind { list, alias, element_type: _, child } => {
                let child = match child {
                    Some(child) => Some(self.map_operator(child, descriptor)?),
                    None => {
                        // A source-mode UNWIND emits its list exactly once.
                        self.current_single_threaded = true;
                        None
                    }
                };
                let list = self.build_evaluator(list, descriptor)?;
                let out = self.slot(descriptor, alias)?;
                Box::new(Unwind::new(id, child, list, out))
            }
            LogicalOperator::CreateNode { items, child } => {
                self.current_single_threaded = true;
                let child = match child {
                    Some(child) => Some(self.map_operator(child, descriptor)?),
                    None => None,
                };
                let items = items
                    .iter()
                    .map(|item| {
                        let values = item
                            .values
                            .iter()
                            .map(|v| self.build_evaluator(v, descriptor))
                            .collect::<Result<Vec<_>>>()?;
                        Ok(CreateNodeItem {
                            label: item.label,
                            table: self.storage.node_table(item.label),
                            index: self.storage.index(item.label),
                            primary_key: self.catalog.node_label(item.label).primary_key,
                            values,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Box::new(CreateNode::new(id, child, items, Arc::clone(self.storage)))
            }
            LogicalOperator::SetProperty { items, child } => {
                self.current_single_threaded = true;
                let child = self.map_operator(child, descriptor)?;
                let items = items
                    .iter()
                    .map(|item| {
                        Ok(SetPropertyItem {
                            node: self.slot(descriptor, &item.variable)?,
                            label: item.label,
                            table: self.storage.node_table(item.label),
                            property_id: item.property_id,
                            value: self.build_evaluator(&item.value, descriptor)?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Box::new(SetProperty::new(id, child, items, Arc::clone(self.storage)))
            }
            LogicalOperator::DeleteNode { variables, child } => {
                self.current_single_threaded = true;
                let child = self.map_operator(child, descriptor)?;
                let items = variables
                    .iter()
                    .map(|(variable, label)| {
                        Ok(DeleteNodeItem {
                            node: self.slot(descriptor, variable)?,
                            label: *label,
                            table: self.storage.node_table(*label),
                            index: self.storage.index(*label),
                            primary_key: self.catalog.node_label(*label).primary_key,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Box::new(DeleteNode::new(id, child, items, Arc::clone(self.storage)))
            }
        })
    }

    fn slot(&self, descriptor: &ResultSetDescriptor, name: &str) -> Result<DataPos> {
        descriptor
            .data_pos(name)
            .ok_or_else(|| GraphError::Plan(format!("expression {name} has no result-set slot")))
    }
}

/// Descriptor mirroring the plan's factorization schema: one chunk per
/// group, one vector per expression slot, in stable order.
pub fn descriptor_from_schema(schema: &Schema) -> ResultSetDescriptor {
    let mut descriptor = ResultSetDescriptor::default();
    for group in &schema.groups {
        let chunk = descriptor.add_chunk();
        for (name, data_type) in &group.expressions {
            descriptor.add_vector(chunk, name, data_type.clone());
        }
    }
    descriptor
}

/// Builds an evaluator tree, reading already-computed slots instead of
/// recomputing shared subexpressions.
pub fn build_evaluator(
    expr: &Expression,
    descriptor: &ResultSetDescriptor,
) -> Result<ExprEvaluator> {
    if let Some(pos) = descriptor.data_pos(&expr.unique_name()) {
        return Ok(ExprEvaluator::reference(pos, expr.data_type()));
    }
    match expr {
        Expression::Literal { value } => Ok(ExprEvaluator::literal(value.clone())),
        Expression::Parameter { name } => Ok(ExprEvaluator::parameter(name.clone())),
        Expression::Unary { op, child } => Ok(ExprEvaluator::unary(
            *op,
            build_evaluator(child, descriptor)?,
            expr.data_type(),
        )),
        Expression::Binary { op, left, right } => Ok(ExprEvaluator::binary(
            *op,
            build_evaluator(left, descriptor)?,
            build_evaluator(right, descriptor)?,
            expr.data_type(),
        )),
        other => Err(GraphError::Plan(format!(
            "expression {} is not materialized in the result set",
            other.unique_name()
        ))),
    }
}

/// Slot names a subtree defines, in definition order. Used to pick the
/// columns carried through materialization boundaries.
fn defined_slot_names(op: &LogicalOperator) -> Vec<String> {
    fn visit(op: &LogicalOperator, out: &mut Vec<String>) {
        match op {
            LogicalOperator::ScanNode { variable, .. }
            | LogicalOperator::IndexScanNode { variable, .. } => {
                if !out.contains(variable) {
                    out.push(variable.clone());
                }
            }
            LogicalOperator::ScanNodeProperty { properties, child, .. } => {
                visit(child, out);
                for p in properties {
                    if !out.contains(&p.name) {
                        out.push(p.name.clone());
                    }
                }
            }
            LogicalOperator::Extend {
                nbr_variable, rel_variable, rel_properties, child, ..
            } => {
                visit(child, out);
                for name in [nbr_variable, rel_variable] {
                    if !out.contains(name) {
                        out.push(name.clone());
                    }
                }
                for p in rel_properties {
                    if !out.contains(&p.name) {
                        out.push(p.name.clone());
                    }
                }
            }
            LogicalOperator::RecursiveExtend { nbr_variable, rel_variable, track_path, child, .. } => {
                visit(child, out);
                for name in [
                    nbr_variable.clone(),
                    format!("length({rel_variable})"),
                ] {
                    if !out.contains(&name) {
                        out.push(name);
                    }
                }
                if *track_path {
                    let name = format!("path({rel_variable})");
                    if !out.contains(&name) {
                        out.push(name);
                    }
                }
            }
            LogicalOperator::HashJoin { join_node, payload, child, .. } => {
                visit(child, out);
                if !out.contains(join_node) {
                    out.push(join_node.clone());
                }
                for p in payload {
                    if !out.contains(&p.name) {
                        out.push(p.name.clone());
                    }
                }
            }
            LogicalOperator::Projection { aliases, child, .. } => {
                visit(child, out);
                for alias in aliases {
                    if !out.contains(alias) {
                        out.push(alias.clone());
                    }
                }
            }
            LogicalOperator::Aggregate { group_bys, aggregates, .. } => {
                for e in group_bys.iter().chain(aggregates) {
                    let name = e.unique_name();
                    if !out.contains(&name) {
                        out.push(name);
                    }
                }
            }
            LogicalOperator::Unwind { alias, child, .. } => {
                if let Some(child) = child {
                    visit(child, out);
                }
                if !out.contains(alias) {
                    out.push(alias.clone());
                }
            }
            LogicalOperator::OrderBy { child_schema, .. } => {
                for (name, _) in child_schema.expressions_in_scope() {
                    if !out.contains(&name) {
                        out.push(name);
                    }
                }
            }
            LogicalOperator::CreateNode { child, .. } => {
                if let Some(child) = child {
                    visit(child, out);
                }
            }
            LogicalOperator::Flatten { child, .. }
            | LogicalOperator::Filter { child, .. }
            | LogicalOperator::MultiplicityReducer { child }
            | LogicalOperator::Skip { child, .. }
            | LogicalOperator::Limit { child, .. }
            | LogicalOperator::SetProperty { child, .. }
            | LogicalOperator::DeleteNode { child, .. } => visit(child, out),
        }
    }
    let mut out = Vec::new();
    visit(op, &mut out);
    out
}
