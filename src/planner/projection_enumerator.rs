// Projection overlay applied to each enumerated join plan, in a fixed
// order: aggregate (when an ungrouped aggregate appears), order-by,
// projection with group discard, the WITH predicate, then multiplicity
// reducer, skip, and limit.

use super::join_enumerator::{
    append_filter, append_flattens, append_flattens_but_one, append_scan_node_properties,
    dependent_groups, replace_root,
};
use super::logical_plan::{LogicalOperator, LogicalPlan};
use crate::binder::bound::BoundProjection;
use crate::catalog::Catalog;
use crate::error::Result;
use crate::expression::Expression;

pub(crate) fn apply_projection(
    plan: &mut LogicalPlan,
    projection: &BoundProjection,
    catalog: &Catalog,
) -> Result<()> {
    // Aggregates not yet computed force an aggregation step; every
    // aggregate-free projection expression becomes a group key.
    let mut aggregates: Vec<Expression> = Vec::new();
    for expr in projection.expressions.iter().chain(&projection.order_by) {
        let mut found = Vec::new();
        expr.collect_aggregates(&mut found);
        for agg in found {
            let name = agg.unique_name();
            if !plan.schema.contains(&name)
                && !aggregates.iter().any(|a| a.unique_name() == name)
            {
                aggregates.push(agg.clone());
            }
        }
    }
    if !aggregates.is_empty() {
        let group_bys: Vec<Expression> = projection
            .expressions
            .iter()
            .filter(|e| !e.has_aggregate())
            .cloned()
            .collect();
        append_aggregate(plan, group_bys, aggregates, catalog)?;
    }

    if !projection.order_by.is_empty() {
        append_order_by(plan, &projection.order_by, &projection.ascending, catalog)?;
    }

    let (expressions, aliases) = expand_projection_expressions(projection, catalog);
    append_projection_ops(plan, &expressions, &aliases, catalog)?;
    if projection.is_final_return {
        plan.expressions_to_collect = expressions
            .iter()
            .cloned()
            .zip(aliases.iter().cloned())
            .collect();
    }

    if let Some(predicate) = &projection.predicate {
        append_filter(plan, predicate.clone(), catalog)?;
    }

    if projection.skip.is_some() || projection.limit.is_some() {
        replace_root(plan, |child| LogicalOperator::MultiplicityReducer { child });
        if let Some(count) = projection.skip {
            plan.estimated_cardinality = (plan.estimated_cardinality - count as f64).max(1.0);
            replace_root(plan, |child| LogicalOperator::Skip { count, child });
        }
        if let Some(count) = projection.limit {
            plan.estimated_cardinality = plan.estimated_cardinality.min(count as f64);
            replace_root(plan, |child| LogicalOperator::Limit { count, child });
        }
    }
    Ok(())
}

/// A final RETURN of a bare node or rel variable expands into one column
/// per structured property.
fn expand_projection_expressions(
    projection: &BoundProjection,
    catalog: &Catalog,
) -> (Vec<Expression>, Vec<String>) {
    if !projection.is_final_return {
        return (projection.expressions.clone(), projection.aliases.clone());
    }
    let mut expressions = Vec::new();
    let mut aliases = Vec::new();
    for (expr, alias) in projection.expressions.iter().zip(&projection.aliases) {
        match expr {
            Expression::NodeVariable { name, label } => {
                for property in &catalog.node_label(*label).properties {
                    expressions.push(Expression::Property {
                        variable: name.clone(),
                        label: *label,
                        property: property.name.clone(),
                        property_id: property.property_id,
                        data_type: property.data_type.clone(),
                        on_rel: false,
                    });
                    aliases.push(format!("{}.{}", name, property.name));
                }
            }
            Expression::RelVariable { name, label } => {
                for property in &catalog.rel_label(*label).properties {
                    expressions.push(Expression::Property {
                        variable: name.clone(),
                        label: *label,
                        property: property.name.clone(),
                        property_id: property.property_id,
                        data_type: property.data_type.clone(),
                        on_rel: true,
                    });
                    aliases.push(format!("{}.{}", name, property.name));
                }
            }
            other => {
                expressions.push(other.clone());
                aliases.push(alias.clone());
            }
        }
    }
    (expressions, aliases)
}

fn append_projection_ops(
    plan: &mut LogicalPlan,
    expressions: &[Expression],
    aliases: &[String],
    catalog: &Catalog,
) -> Result<()> {
    for expr in expressions {
        append_scan_node_properties(plan, expr, catalog)?;
    }
    let groups_before = plan.schema.groups_in_scope();
    plan.schema.clear_scope();
    for (expr, alias) in expressions.iter().zip(aliases) {
        let deps = dependent_groups(expr, &plan.schema);
        let kept = append_flattens_but_one(plan, &deps);
        let group = kept
            .or_else(|| deps.iter().next().copied())
            .unwrap_or_else(|| plan.schema.create_group(true, 1.0));
        plan.schema.insert(alias, expr.data_type(), group);
    }
    let groups_after = plan.schema.groups_in_scope();
    let discarded_groups: Vec<usize> =
        groups_before.difference(&groups_after).copied().collect();
    let expressions = expressions.to_vec();
    let aliases = aliases.to_vec();
    replace_root(plan, move |child| LogicalOperator::Projection {
        expressions,
        aliases,
        discarded_groups,
        child,
    });
    Ok(())
}

fn append_aggregate(
    plan: &mut LogicalPlan,
    group_bys: Vec<Expression>,
    aggregates: Vec<Expression>,
    catalog: &Catalog,
) -> Result<()> {
    for expr in &group_bys {
        append_scan_node_properties(plan, expr, catalog)?;
        let deps = dependent_groups(expr, &plan.schema);
        append_flattens(plan, &deps);
    }
    for expr in &aggregates {
        if let Expression::Aggregate { child: Some(child), .. } = expr {
            append_scan_node_properties(plan, child, catalog)?;
            let deps = dependent_groups(child, &plan.schema);
            append_flattens_but_one(plan, &deps);
        }
    }
    let child_schema = plan.schema.clone();
    plan.cost += plan.estimated_cardinality;
    let out_card = (plan.estimated_cardinality * 0.1).max(1.0);

    let mut schema = crate::planner::schema::Schema::new();
    let group = schema.create_group(false, out_card);
    for expr in &group_bys {
        schema.insert(&expr.unique_name(), expr.data_type(), group);
    }
    for expr in &aggregates {
        schema.insert(&expr.unique_name(), expr.data_type(), group);
    }
    plan.schema = schema;
    plan.estimated_cardinality = out_card;
    replace_root(plan, move |child| LogicalOperator::Aggregate {
        group_bys,
        aggregates,
        child_schema,
        child,
    });
    Ok(())
}

fn append_order_by(
    plan: &mut LogicalPlan,
    keys: &[Expression],
    ascending: &[bool],
    catalog: &Catalog,
) -> Result<()> {
    for key in keys {
        append_scan_node_properties(plan, key, catalog)?;
        let deps = dependent_groups(key, &plan.schema);
        append_flattens(plan, &deps);
    }
    // Sorting materializes fully expanded tuples and rescans them into a
    // single fresh group.
    let scoped = plan.schema.groups_in_scope();
    append_flattens(plan, &scoped);
    let child_schema = plan.schema.clone();
    let in_scope = plan.schema.expressions_in_scope();
    plan.cost += plan.estimated_cardinality * 2.0;

    let mut schema = crate::planner::schema::Schema::new();
    let group = schema.create_group(false, plan.estimated_cardinality);
    for (name, data_type) in in_scope {
        schema.insert(&name, data_type, group);
    }
    plan.schema = schema;
    let keys = keys.to_vec();
    let ascending: Vec<bool> = if ascending.len() == keys.len() {
        ascending.to_vec()
    } else {
        vec![true; keys.len()]
    };
    replace_root(plan, move |child| LogicalOperator::OrderBy {
        keys,
        ascending,
        child_schema,
        child,
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::bound::BoundProjection;
    use crate::common::{LogicalType, Value};

    #[test]
    fn bare_variable_expands_to_properties_on_final_return() {
        let mut catalog = Catalog::new();
        catalog
            .add_node_label(
                "person",
                vec![
                    ("ID".to_string(), LogicalType::Int64),
                    ("age".to_string(), LogicalType::Int64),
                ],
                "ID",
                false,
            )
            .unwrap();
        let projection = BoundProjection {
            expressions: vec![
                Expression::NodeVariable { name: "a".to_string(), label: 0 },
                Expression::Literal { value: Value::Int64(1) },
            ],
            aliases: vec!["a".to_string(), "1".to_string()],
            order_by: vec![],
            ascending: vec![],
            skip: None,
            limit: None,
            predicate: None,
            is_final_return: true,
        };
        let (exprs, aliases) = expand_projection_expressions(&projection, &catalog);
        assert_eq!(aliases, vec!["a.ID", "a.age", "1"]);
        assert_eq!(exprs.len(), 3);
    }
}
