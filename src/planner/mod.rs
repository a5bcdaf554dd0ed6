// # Plan Enumerator
//
// Turns a bound query into costed logical plans: DP join enumeration over
// the query graph, a projection overlay per part, and update operators for
// CREATE/SET/DELETE. `enumerate_plans` returns every surviving plan for
// inspection; `best_plan` picks the cheapest with deterministic
// tie-breaking.

pub mod logical_plan;
pub mod query_graph;
pub mod schema;

mod join_enumerator;
mod projection_enumerator;

pub use logical_plan::{
    CreateNodeInfo, JoinPayload, LogicalOperator, LogicalOperatorKind, LogicalPlan, PropertyRef,
    SetItem,
};
pub use query_graph::{QueryGraph, QueryRel, SubqueryGraph};
pub use schema::Schema;

use crate::binder::bound::{BoundQuery, BoundQueryPart, BoundUnwind, BoundUpdate};
use crate::catalog::Catalog;
use crate::error::{GraphError, Result};
use crate::expression::Expression;
use join_enumerator::{
    append_filter, append_flattens, append_scan_node_properties, dependent_groups,
    enumerate_join_plans, replace_root, PlannerContext,
};
use projection_enumerator::apply_projection;
use std::collections::{HashMap, HashSet};

pub struct Planner;

impl Planner {
    /// Every plan the enumerator kept for the full query, best first.
    pub fn enumerate_plans(catalog: &Catalog, query: &BoundQuery) -> Result<Vec<LogicalPlan>> {
        if query.parts.is_empty() {
            return Err(GraphError::Plan("empty query".to_string()));
        }
        let ctx = PlannerContext {
            catalog,
            rel_props: collect_rel_props(query),
            alias_refs: collect_alias_refs(query),
        };
        let mut plans = plan_first_part(&ctx, &query.parts[0])?;
        for part in &query.parts[1..] {
            if !part.query_graph.is_empty() {
                return Err(GraphError::Plan(
                    "MATCH after WITH is not supported; merge the patterns into one MATCH"
                        .to_string(),
                ));
            }
            for plan in &mut plans {
                apply_later_part(&ctx, plan, part)?;
            }
        }
        plans.sort_by_key(|p| p.ranking_key());
        Ok(plans)
    }

    pub fn best_plan(catalog: &Catalog, query: &BoundQuery) -> Result<LogicalPlan> {
        let mut plans = Self::enumerate_plans(catalog, query)?;
        if plans.is_empty() {
            return Err(GraphError::Plan("no plan produced".to_string()));
        }
        Ok(plans.remove(0))
    }
}

/// Rel properties referenced anywhere, keyed by rel variable; extends scan
/// these alongside the adjacency.
fn collect_rel_props(query: &BoundQuery) -> HashMap<String, Vec<PropertyRef>> {
    let mut out: HashMap<String, Vec<PropertyRef>> = HashMap::new();
    visit_expressions(query, &mut |expr| {
        let mut props = Vec::new();
        expr.collect_properties(&mut props);
        for p in props {
            if let Expression::Property {
                variable, property_id, data_type, on_rel: true, ..
            } = p
            {
                let name = p.unique_name();
                let list = out.entry(variable.clone()).or_default();
                if !list.iter().any(|r| r.name == name) {
                    list.push(PropertyRef {
                        name,
                        property_id: *property_id,
                        data_type: data_type.clone(),
                    });
                }
            }
        }
    });
    out
}

fn collect_alias_refs(query: &BoundQuery) -> HashSet<String> {
    let mut out = HashSet::new();
    visit_expressions(query, &mut |expr| {
        collect_aliases(expr, &mut out);
    });
    out
}

fn collect_aliases(expr: &Expression, out: &mut HashSet<String>) {
    match expr {
        Expression::Alias { name, .. } => {
            out.insert(name.clone());
        }
        Expression::Unary { child, .. } => collect_aliases(child, out),
        Expression::Binary { left, right, .. } => {
            collect_aliases(left, out);
            collect_aliases(right, out);
        }
        Expression::Aggregate { child: Some(child), .. } => collect_aliases(child, out),
        _ => {}
    }
}

fn visit_expressions(query: &BoundQuery, f: &mut impl FnMut(&Expression)) {
    for part in &query.parts {
        for predicate in &part.predicates {
            f(predicate);
        }
        if let Some(unwind) = &part.unwind {
            f(&unwind.list);
        }
        for update in &part.updates {
            match update {
                BoundUpdate::Create(items) => {
                    for item in items {
                        for value in &item.values {
                            f(value);
                        }
                    }
                }
                BoundUpdate::Set(items) => {
                    for item in items {
                        f(&item.value);
                    }
                }
                BoundUpdate::Delete(_) => {}
            }
        }
        if let Some(projection) = &part.projection {
            for expr in projection.expressions.iter().chain(&projection.order_by) {
                f(expr);
            }
            if let Some(predicate) = &projection.predicate {
                f(predicate);
            }
        }
    }
}

// ============================================================================
// Part planning
// ============================================================================

fn plan_first_part(ctx: &PlannerContext<'_>, part: &BoundQueryPart) -> Result<Vec<LogicalPlan>> {
    let mut unwind_consumed = false;
    let mut update_start = 0usize;
    let mut plans: Vec<LogicalPlan> = if !part.query_graph.is_empty() {
        enumerate_join_plans(ctx, &part.query_graph, &part.predicates)?
    } else if let Some(unwind) = &part.unwind {
        unwind_consumed = true;
        vec![plan_from_unwind(unwind)]
    } else if matches!(part.updates.first(), Some(BoundUpdate::Create(_))) {
        update_start = 1;
        let items = match &part.updates[0] {
            BoundUpdate::Create(items) => items.clone(),
            _ => unreachable!(),
        };
        vec![LogicalPlan {
            root: Box::new(LogicalOperator::CreateNode { items, child: None }),
            schema: Schema::new(),
            estimated_cardinality: 1.0,
            cost: 1.0,
            expressions_to_collect: Vec::new(),
            used_predicates: 0,
        }]
    } else {
        return Err(GraphError::Plan(
            "statement has no data source (expected MATCH, UNWIND, or CREATE)".to_string(),
        ));
    };

    for plan in &mut plans {
        if !unwind_consumed {
            if let Some(unwind) = &part.unwind {
                append_unwind(ctx, plan, unwind)?;
            }
        }
        for update in &part.updates[update_start..] {
            append_update(ctx, plan, update)?;
        }
        if let Some(projection) = &part.projection {
            apply_projection(plan, projection, ctx.catalog)?;
        }
    }
    Ok(plans)
}

fn apply_later_part(
    ctx: &PlannerContext<'_>,
    plan: &mut LogicalPlan,
    part: &BoundQueryPart,
) -> Result<()> {
    for predicate in &part.predicates {
        append_filter(plan, predicate.clone(), ctx.catalog)?;
    }
    if let Some(unwind) = &part.unwind {
        append_unwind(ctx, plan, unwind)?;
    }
    for update in &part.updates {
        append_update(ctx, plan, update)?;
    }
    if let Some(projection) = &part.projection {
        apply_projection(plan, projection, ctx.catalog)?;
    }
    Ok(())
}

fn plan_from_unwind(unwind: &BoundUnwind) -> LogicalPlan {
    let mut schema = Schema::new();
    let group = schema.create_group(false, 10.0);
    schema.insert(&unwind.alias, unwind.element_type.clone(), group);
    LogicalPlan {
        root: Box::new(LogicalOperator::Unwind {
            list: unwind.list.clone(),
            alias: unwind.alias.clone(),
            element_type: unwind.element_type.clone(),
            child: None,
        }),
        schema,
        estimated_cardinality: 10.0,
        cost: 1.0,
        expressions_to_collect: Vec::new(),
        used_predicates: 0,
    }
}

fn append_unwind(
    ctx: &PlannerContext<'_>,
    plan: &mut LogicalPlan,
    unwind: &BoundUnwind,
) -> Result<()> {
    append_scan_node_properties(plan, &unwind.list, ctx.catalog)?;
    let deps = dependent_groups(&unwind.list, &plan.schema);
    append_flattens(plan, &deps);
    let out_card = plan.estimated_cardinality * 10.0;
    let group = plan.schema.create_group(false, out_card);
    plan.schema.insert(&unwind.alias, unwind.element_type.clone(), group);
    plan.estimated_cardinality = out_card;
    plan.cost += out_card;
    let (list, alias, element_type) =
        (unwind.list.clone(), unwind.alias.clone(), unwind.element_type.clone());
    replace_root(plan, move |child| LogicalOperator::Unwind {
        list,
        alias,
        element_type,
        child: Some(child),
    });
    Ok(())
}

fn append_update(
    ctx: &PlannerContext<'_>,
    plan: &mut LogicalPlan,
    update: &BoundUpdate,
) -> Result<()> {
    match update {
        BoundUpdate::Create(items) => {
            for item in items {
                for value in &item.values {
                    append_scan_node_properties(plan, value, ctx.catalog)?;
                    let deps = dependent_groups(value, &plan.schema);
                    append_flattens(plan, &deps);
                }
            }
            let items = items.clone();
            replace_root(plan, move |child| LogicalOperator::CreateNode {
                items,
                child: Some(child),
            });
        }
        BoundUpdate::Set(items) => {
            for item in items {
                append_scan_node_properties(plan, &item.value, ctx.catalog)?;
                let mut deps = dependent_groups(&item.value, &plan.schema);
                if let Some(group) = plan.schema.group_of(&item.variable) {
                    deps.insert(group);
                }
                append_flattens(plan, &deps);
            }
            let items = items.clone();
            replace_root(plan, move |child| LogicalOperator::SetProperty { items, child });
        }
        BoundUpdate::Delete(variables) => {
            for (variable, _) in variables {
                if let Some(group) = plan.schema.group_of(variable) {
                    let mut deps = std::collections::BTreeSet::new();
                    deps.insert(group);
                    append_flattens(plan, &deps);
                }
            }
            let variables = variables.clone();
            replace_root(plan, move |child| LogicalOperator::DeleteNode { variables, child });
        }
    }
    Ok(())
}
