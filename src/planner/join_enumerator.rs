// Bottom-up dynamic programming over connected subgraphs. Size-one
// subgraphs get base scans (an index scan when a primary-key equality
// exists); each level extends by one rel whose endpoint touches the
// subgraph, and from size two upward also considers hash joins of two
// enumerated subgraphs sharing exactly one node. The best few plans per
// subgraph survive, ranked by cost with deterministic tie-breaking.
//
// Predicates are applied as soon as every variable they mention is in
// scope; property scans are inserted lazily right before their consumer.

use super::logical_plan::{JoinPayload, LogicalOperator, LogicalPlan, PropertyRef};
use super::query_graph::{QueryGraph, SubqueryGraph};
use super::schema::Schema;
use crate::catalog::Catalog;
use crate::common::{Direction, LabelId, LogicalType};
use crate::error::{GraphError, Result};
use crate::expression::Expression;
use crate::vector::BinaryOperator;
use std::collections::{BTreeSet, HashMap};

/// Plans kept per subgraph.
const PLANS_PER_SUBGRAPH: usize = 3;

const EQUALITY_SELECTIVITY: f64 = 0.1;
const COMPARISON_SELECTIVITY: f64 = 0.3;

pub(crate) struct PlannerContext<'a> {
    pub catalog: &'a Catalog,
    /// Rel properties referenced anywhere in the query, per rel variable.
    /// Extends read them in lockstep with the adjacency.
    pub rel_props: HashMap<String, Vec<PropertyRef>>,
    /// Alias slots referenced anywhere (length/path of recursive rels,
    /// WITH/UNWIND names). Drives path tracking.
    pub alias_refs: std::collections::HashSet<String>,
}

// ============================================================================
// Plan-building helpers shared with the projection enumerator
// ============================================================================

fn dummy_root() -> Box<LogicalOperator> {
    Box::new(LogicalOperator::ScanNode { variable: String::new(), label: 0 })
}

/// Replaces the plan root with an operator built around the previous root.
pub(crate) fn replace_root(
    plan: &mut LogicalPlan,
    build: impl FnOnce(Box<LogicalOperator>) -> LogicalOperator,
) {
    let old = std::mem::replace(&mut plan.root, dummy_root());
    plan.root = Box::new(build(old));
}

fn collect_leaf_groups(expr: &Expression, schema: &Schema, out: &mut BTreeSet<usize>) {
    match expr {
        Expression::NodeVariable { name, .. }
        | Expression::RelVariable { name, .. }
        | Expression::Alias { name, .. } => {
            if let Some(g) = schema.group_of(name) {
                out.insert(g);
            }
        }
        Expression::Property { variable, .. } => {
            if let Some(g) = schema.group_of(&expr.unique_name()) {
                out.insert(g);
            } else if let Some(g) = schema.group_of(variable) {
                out.insert(g);
            }
        }
        Expression::Aggregate { child, .. } => {
            if let Some(g) = schema.group_of(&expr.unique_name()) {
                out.insert(g);
            } else if let Some(child) = child {
                collect_leaf_groups(child, schema, out);
            }
        }
        Expression::Unary { child, .. } => collect_leaf_groups(child, schema, out),
        Expression::Binary { left, right, .. } => {
            collect_leaf_groups(left, schema, out);
            collect_leaf_groups(right, schema, out);
        }
        Expression::Literal { .. } | Expression::Parameter { .. } => {}
    }
}

/// Factorization groups the expression's slots live in.
pub(crate) fn dependent_groups(expr: &Expression, schema: &Schema) -> BTreeSet<usize> {
    let mut out = BTreeSet::new();
    collect_leaf_groups(expr, schema, &mut out);
    out
}

/// Flattens every unflat group in the set.
pub(crate) fn append_flattens(plan: &mut LogicalPlan, groups: &BTreeSet<usize>) {
    for &group in groups {
        append_flatten(plan, group);
    }
}

pub(crate) fn append_flatten(plan: &mut LogicalPlan, group: usize) {
    if plan.schema.is_flat(group) {
        return;
    }
    plan.schema.set_flat(group);
    plan.cost += plan.schema.estimated_cardinality(group);
    replace_root(plan, |child| LogicalOperator::Flatten { group, child });
}

/// Flattens all but one of the unflat groups, keeping the one whose
/// flatten would cost the most. Returns the group left unflat, if any.
pub(crate) fn append_flattens_but_one(
    plan: &mut LogicalPlan,
    groups: &BTreeSet<usize>,
) -> Option<usize> {
    let unflat = plan.schema.unflat_groups(groups);
    if unflat.is_empty() {
        return None;
    }
    let keep = unflat
        .iter()
        .copied()
        .max_by(|&a, &b| {
            plan.schema
                .estimated_cardinality(a)
                .total_cmp(&plan.schema.estimated_cardinality(b))
        })
        .expect("non-empty unflat set");
    for group in unflat {
        if group != keep {
            append_flatten(plan, group);
        }
    }
    Some(keep)
}

/// Inserts scans for node properties the expression needs but the schema
/// does not yet hold. Rel properties must already be present (they ride
/// with their extend).
pub(crate) fn append_scan_node_properties(
    plan: &mut LogicalPlan,
    expr: &Expression,
    _catalog: &Catalog,
) -> Result<()> {
    let mut properties = Vec::new();
    expr.collect_properties(&mut properties);
    // Group missing property scans by variable, keeping slot order stable.
    let mut by_var: Vec<(String, LabelId, Vec<PropertyRef>)> = Vec::new();
    for property in properties {
        let (variable, label, on_rel) = match property {
            Expression::Property { variable, label, on_rel, .. } => (variable, *label, *on_rel),
            _ => continue,
        };
        let name = property.unique_name();
        if plan.schema.contains(&name) {
            plan.schema.add_to_scope(&name);
            continue;
        }
        if on_rel {
            return Err(GraphError::Plan(format!(
                "rel property {name} is not available; properties of recursive rels cannot be read"
            )));
        }
        if !plan.schema.contains(variable) {
            return Err(GraphError::Bind(format!("variable {variable} is not in scope")));
        }
        let (property_id, data_type) = match property {
            Expression::Property { property_id, data_type, .. } => {
                (*property_id, data_type.clone())
            }
            _ => unreachable!(),
        };
        let slot = PropertyRef { name: name.clone(), property_id, data_type };
        match by_var.iter_mut().find(|(v, _, _)| v == variable) {
            Some((_, _, list)) => list.push(slot),
            None => by_var.push((variable.clone(), label, vec![slot])),
        }
    }
    for (variable, label, props) in by_var {
        let group = plan.schema.group_of(&variable).expect("variable checked above");
        for p in &props {
            plan.schema.insert(&p.name, p.data_type.clone(), group);
        }
        plan.cost += plan.schema.estimated_cardinality(group) * props.len() as f64;
        replace_root(plan, |child| LogicalOperator::ScanNodeProperty {
            variable,
            label,
            properties: props,
            child,
        });
    }
    Ok(())
}

pub(crate) fn estimate_selectivity(predicate: &Expression) -> f64 {
    match predicate {
        Expression::Binary { op: BinaryOperator::Equals, .. } => EQUALITY_SELECTIVITY,
        _ => COMPARISON_SELECTIVITY,
    }
}

/// Scans missing properties, flattens all dependent groups but one, and
/// appends the filter, updating cardinalities by the selectivity.
pub(crate) fn append_filter(
    plan: &mut LogicalPlan,
    predicate: Expression,
    catalog: &Catalog,
) -> Result<()> {
    append_scan_node_properties(plan, &predicate, catalog)?;
    let groups = dependent_groups(&predicate, &plan.schema);
    let kept = append_flattens_but_one(plan, &groups);
    plan.cost += plan.estimated_cardinality;
    let selectivity = estimate_selectivity(&predicate);
    if let Some(group) = kept {
        plan.schema.scale_cardinality(group, selectivity);
    }
    plan.estimated_cardinality = (plan.estimated_cardinality * selectivity).max(1.0);
    replace_root(plan, |child| LogicalOperator::Filter { predicate, child });
    Ok(())
}

/// Applies every not-yet-used predicate whose variables are all in scope.
pub(crate) fn apply_ready_predicates(
    plan: &mut LogicalPlan,
    predicates: &[Expression],
    catalog: &Catalog,
) -> Result<()> {
    for (i, predicate) in predicates.iter().enumerate() {
        if plan.used_predicates & (1 << i) != 0 {
            continue;
        }
        let mut vars = std::collections::HashSet::new();
        predicate.collect_variables(&mut vars);
        if vars.iter().all(|v| plan.schema.contains(v)) {
            plan.used_predicates |= 1 << i;
            append_filter(plan, predicate.clone(), catalog)?;
        }
    }
    Ok(())
}

// ============================================================================
// Base scans
// ============================================================================

/// The literal/parameter side of a primary-key equality on `variable`,
/// if the predicate is one.
fn pk_equality_key(
    predicate: &Expression,
    variable: &str,
    label: LabelId,
    catalog: &Catalog,
) -> Option<Expression> {
    let Expression::Binary { op: BinaryOperator::Equals, left, right } = predicate else {
        return None;
    };
    let pk = catalog.node_label(label).primary_key;
    let is_pk_prop = |e: &Expression| {
        matches!(e, Expression::Property { variable: v, property_id, on_rel: false, .. }
            if v == variable && *property_id == pk)
    };
    let is_const =
        |e: &Expression| matches!(e, Expression::Literal { .. } | Expression::Parameter { .. });
    if is_pk_prop(left) && is_const(right) {
        return Some(right.as_ref().clone());
    }
    if is_pk_prop(right) && is_const(left) {
        return Some(left.as_ref().clone());
    }
    None
}

fn plan_node_scans(
    ctx: &PlannerContext<'_>,
    graph: &QueryGraph,
    node_pos: usize,
    predicates: &[Expression],
) -> Result<Vec<LogicalPlan>> {
    let node = &graph.nodes[node_pos];
    let num_nodes = ctx.catalog.node_label(node.label).num_nodes.max(1) as f64;
    let mut plans = Vec::new();

    // Index scan when some predicate pins the primary key.
    for (i, predicate) in predicates.iter().enumerate() {
        if let Some(key) = pk_equality_key(predicate, &node.name, node.label, ctx.catalog) {
            let mut schema = Schema::new();
            let group = schema.create_group(false, 1.0);
            schema.insert(&node.name, LogicalType::Node, group);
            let mut plan = LogicalPlan {
                root: Box::new(LogicalOperator::IndexScanNode {
                    variable: node.name.clone(),
                    label: node.label,
                    key,
                }),
                schema,
                estimated_cardinality: 1.0,
                cost: 1.0,
                expressions_to_collect: Vec::new(),
                used_predicates: 1 << i,
            };
            apply_ready_predicates(&mut plan, predicates, ctx.catalog)?;
            plans.push(plan);
            break;
        }
    }

    // Full scan is always available.
    let mut schema = Schema::new();
    let group = schema.create_group(false, num_nodes);
    schema.insert(&node.name, LogicalType::Node, group);
    let mut plan = LogicalPlan {
        root: Box::new(LogicalOperator::ScanNode { variable: node.name.clone(), label: node.label }),
        schema,
        estimated_cardinality: num_nodes,
        cost: num_nodes,
        expressions_to_collect: Vec::new(),
        used_predicates: 0,
    };
    apply_ready_predicates(&mut plan, predicates, ctx.catalog)?;
    plans.push(plan);
    Ok(plans)
}

// ============================================================================
// Extend
// ============================================================================

fn average_degree(catalog: &Catalog, label: LabelId, direction: Direction) -> f64 {
    let schema = catalog.rel_label(label);
    let side_label = match direction {
        Direction::Fwd => schema.src_label,
        Direction::Bwd => schema.dst_label,
    };
    let nodes = catalog.node_label(side_label).num_nodes.max(1) as f64;
    (schema.num_rels as f64 / nodes).max(0.1)
}

fn append_extend(
    ctx: &PlannerContext<'_>,
    graph: &QueryGraph,
    plan: &mut LogicalPlan,
    rel_pos: usize,
    src_covered: bool,
    dst_covered: bool,
) -> Result<()> {
    let rel = &graph.rels[rel_pos];
    let closing = src_covered && dst_covered;
    let direction = if src_covered { Direction::Fwd } else { Direction::Bwd };
    let (bound_pos, nbr_pos) = match direction {
        Direction::Fwd => (rel.src_node, rel.dst_node),
        Direction::Bwd => (rel.dst_node, rel.src_node),
    };
    let bound_variable = graph.nodes[bound_pos].name.clone();
    let real_nbr_variable = graph.nodes[nbr_pos].name.clone();
    let nbr_label = graph.nodes[nbr_pos].label;
    // Closing a cycle extends into a shadow variable and filters on node
    // identity afterwards.
    let nbr_variable = if closing {
        format!("{}..{}", rel.name, real_nbr_variable)
    } else {
        real_nbr_variable.clone()
    };
    let bound_group = plan
        .schema
        .group_of(&bound_variable)
        .ok_or_else(|| GraphError::Plan(format!("bound variable {bound_variable} not in schema")))?;

    if rel.is_recursive() {
        append_flatten(plan, bound_group);
        let degree = average_degree(ctx.catalog, rel.label, direction);
        let fanout = degree.powi(rel.upper.min(8) as i32).max(1.0);
        let out_card = plan.estimated_cardinality * fanout;
        let group = plan.schema.create_group(false, out_card);
        plan.schema.insert(&nbr_variable, LogicalType::Node, group);
        plan.schema.insert(
            &format!("length({})", rel.name),
            LogicalType::Int64,
            group,
        );
        let track_path = ctx.alias_refs.contains(&format!("path({})", rel.name));
        if track_path {
            plan.schema.insert(
                &format!("path({})", rel.name),
                LogicalType::Path,
                group,
            );
        }
        plan.cost += out_card;
        plan.estimated_cardinality = out_card;
        replace_root(plan, |child| LogicalOperator::RecursiveExtend {
            bound_variable,
            nbr_variable: nbr_variable.clone(),
            rel_variable: rel.name.clone(),
            label: rel.label,
            direction,
            lower: rel.lower,
            upper: rel.upper,
            track_path,
            child,
        });
    } else {
        let rel_schema = ctx.catalog.rel_label(rel.label);
        let is_column = rel_schema.cardinality.is_single(direction);
        let rel_properties = ctx.rel_props.get(&rel.name).cloned().unwrap_or_default();
        if is_column {
            // Single neighbour: output stays in the bound group.
            let group = bound_group;
            plan.schema.insert(&nbr_variable, LogicalType::Node, group);
            plan.schema.insert(&rel.name, LogicalType::Rel, group);
            for p in &rel_properties {
                plan.schema.insert(&p.name, p.data_type.clone(), group);
            }
            plan.cost += plan.estimated_cardinality;
            replace_root(plan, |child| LogicalOperator::Extend {
                bound_variable,
                nbr_variable: nbr_variable.clone(),
                rel_variable: rel.name.clone(),
                label: rel.label,
                direction,
                is_column: true,
                rel_properties,
                child,
            });
        } else {
            append_flatten(plan, bound_group);
            let out_card =
                plan.estimated_cardinality * average_degree(ctx.catalog, rel.label, direction);
            let group = plan.schema.create_group(false, out_card);
            plan.schema.insert(&nbr_variable, LogicalType::Node, group);
            plan.schema.insert(&rel.name, LogicalType::Rel, group);
            for p in &rel_properties {
                plan.schema.insert(&p.name, p.data_type.clone(), group);
            }
            plan.cost += out_card;
            plan.estimated_cardinality = out_card;
            replace_root(plan, |child| LogicalOperator::Extend {
                bound_variable,
                nbr_variable: nbr_variable.clone(),
                rel_variable: rel.name.clone(),
                label: rel.label,
                direction,
                is_column: false,
                rel_properties,
                child,
            });
        }
    }

    if closing {
        let predicate = Expression::Binary {
            op: BinaryOperator::Equals,
            left: Box::new(Expression::NodeVariable { name: nbr_variable, label: nbr_label }),
            right: Box::new(Expression::NodeVariable {
                name: real_nbr_variable,
                label: nbr_label,
            }),
        };
        append_filter(plan, predicate, ctx.catalog)?;
    }
    Ok(())
}

// ============================================================================
// Hash join
// ============================================================================

fn create_hash_join(
    ctx: &PlannerContext<'_>,
    graph: &QueryGraph,
    probe: &LogicalPlan,
    build: &LogicalPlan,
    join_node_pos: usize,
) -> Result<LogicalPlan> {
    let join_node = graph.nodes[join_node_pos].name.clone();
    let mut plan = probe.clone();
    // The probe reads one key per call; its key chunk must be flat.
    let key_group = plan
        .schema
        .group_of(&join_node)
        .ok_or_else(|| GraphError::Plan(format!("join node {join_node} missing on probe side")))?;
    append_flatten(&mut plan, key_group);

    let build_key_group = build
        .schema
        .group_of(&join_node)
        .ok_or_else(|| GraphError::Plan(format!("join node {join_node} missing on build side")))?;
    let mut payload = Vec::new();
    for (name, data_type) in build.schema.expressions_in_scope() {
        if name == join_node || plan.schema.contains(&name) {
            continue;
        }
        let group = build.schema.group_of(&name).expect("scoped expression has a group");
        let from_unflat = !build.schema.is_flat(group) && group != build_key_group;
        payload.push(JoinPayload { name, data_type, from_unflat });
    }

    // Flat build columns land in one new unflat group of matches;
    // factorized build columns unnest per original build group, so
    // co-varying lists stay in one chunk.
    let build_card = build.estimated_cardinality;
    let flat_group = plan.schema.create_group(false, build_card.max(1.0));
    for p in payload.iter().filter(|p| !p.from_unflat) {
        plan.schema.insert(&p.name, p.data_type.clone(), flat_group);
    }
    let mut unflat_groups: HashMap<usize, usize> = HashMap::new();
    for p in payload.iter().filter(|p| p.from_unflat) {
        let src_group = build.schema.group_of(&p.name).expect("payload has a build group");
        let group = *unflat_groups
            .entry(src_group)
            .or_insert_with(|| plan.schema.create_group(false, build_card.max(1.0)));
        plan.schema.insert(&p.name, p.data_type.clone(), group);
    }

    let join_label = graph.nodes[join_node_pos].label;
    let join_nodes = ctx.catalog.node_label(join_label).num_nodes.max(1) as f64;
    plan.cost = probe.cost + build.cost + 2.0 * build.estimated_cardinality
        + probe.estimated_cardinality;
    plan.estimated_cardinality =
        (probe.estimated_cardinality * build.estimated_cardinality / join_nodes).max(1.0);
    plan.used_predicates = probe.used_predicates | build.used_predicates;
    replace_root(&mut plan, |child| LogicalOperator::HashJoin {
        join_node,
        payload,
        build_plan: Box::new(build.clone()),
        child,
    });
    Ok(plan)
}

// ============================================================================
// Enumeration
// ============================================================================

fn keep_best(plans: &mut Vec<LogicalPlan>) {
    plans.sort_by_key(|p| p.ranking_key());
    plans.dedup_by_key(|p| p.ranking_key());
    plans.truncate(PLANS_PER_SUBGRAPH);
}

pub(crate) fn enumerate_join_plans(
    ctx: &PlannerContext<'_>,
    graph: &QueryGraph,
    predicates: &[Expression],
) -> Result<Vec<LogicalPlan>> {
    if graph.is_empty() {
        return Err(GraphError::Plan("cannot enumerate an empty pattern".to_string()));
    }
    if !graph.is_connected() {
        return Err(GraphError::Plan(
            "MATCH pattern is disconnected; split it into separate MATCH clauses".to_string(),
        ));
    }
    if predicates.len() > 64 {
        return Err(GraphError::Plan("too many predicates".to_string()));
    }

    let mut plans: HashMap<SubqueryGraph, Vec<LogicalPlan>> = HashMap::new();
    for node_pos in 0..graph.nodes.len() {
        let node_plans = plan_node_scans(ctx, graph, node_pos, predicates)?;
        plans.insert(SubqueryGraph::single_node(node_pos), node_plans);
    }

    let num_rels = graph.rels.len();
    for level in 1..=num_rels {
        let mut new_plans: HashMap<SubqueryGraph, Vec<LogicalPlan>> = HashMap::new();

        // Extension by one query rel.
        for (sub, sub_plans) in &plans {
            if sub.num_rels() as usize != level - 1 {
                continue;
            }
            for (rel_pos, src_in, dst_in) in graph.connected_rels(sub) {
                let mut new_sub = *sub;
                new_sub.add_rel(graph, rel_pos);
                for plan in sub_plans {
                    let mut p = plan.clone();
                    append_extend(ctx, graph, &mut p, rel_pos, src_in, dst_in)?;
                    apply_ready_predicates(&mut p, predicates, ctx.catalog)?;
                    new_plans.entry(new_sub).or_default().push(p);
                }
            }
        }

        // Binary join of two enumerated subgraphs sharing one node.
        if level >= 2 {
            let keys: Vec<SubqueryGraph> = plans.keys().copied().collect();
            for &a in &keys {
                for &b in &keys {
                    if a.num_rels() == 0 || b.num_rels() == 0 {
                        continue;
                    }
                    if (a.num_rels() + b.num_rels()) as usize != level || a.overlaps_rels(&b) {
                        continue;
                    }
                    let shared = a.shared_nodes(&b);
                    if shared.count_ones() != 1 {
                        continue;
                    }
                    let join_node_pos = shared.trailing_zeros() as usize;
                    let target = a.union(&b);
                    for probe in &plans[&a] {
                        for build in &plans[&b] {
                            let mut p = create_hash_join(ctx, graph, probe, build, join_node_pos)?;
                            apply_ready_predicates(&mut p, predicates, ctx.catalog)?;
                            new_plans.entry(target).or_default().push(p);
                        }
                    }
                }
            }
        }

        for (sub, mut list) in new_plans {
            keep_best(&mut list);
            plans.entry(sub).or_default().extend(list);
            keep_best(plans.get_mut(&sub).expect("just inserted"));
        }
    }

    let mut full = SubqueryGraph::default();
    for pos in 0..graph.nodes.len() {
        full.add_node(pos);
    }
    for pos in 0..num_rels {
        full.add_rel(graph, pos);
    }
    let mut final_plans = plans.remove(&full).unwrap_or_default();
    if final_plans.is_empty() {
        return Err(GraphError::Plan("no plan found for MATCH pattern".to_string()));
    }
    // Any predicate must have been applied by full coverage.
    for plan in &mut final_plans {
        apply_ready_predicates(plan, predicates, ctx.catalog)?;
    }
    keep_best(&mut final_plans);
    Ok(final_plans)
}
