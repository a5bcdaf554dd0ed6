// # Binder
//
// Resolves parsed queries against the catalog: variables get labels,
// properties get column ids and types, patterns become a query graph, and
// WITH boundaries split the statement into parts. Everything the planner
// consumes is produced here.

pub mod bound;

pub use bound::{BoundProjection, BoundQuery, BoundQueryPart, BoundUnwind, BoundUpdate};

use crate::catalog::Catalog;
use crate::common::{LabelId, LogicalType, Value};
use crate::error::{GraphError, Result};
use crate::expression::{AggregateFunction, Expression};
use crate::parser::{
    Clause, NodePattern, ParsedExpr, ParsedQuery, PatternPart, ProjectionBody, RelOrientation,
};
use crate::planner::query_graph::QueryRel;
use crate::planner::{CreateNodeInfo, SetItem};
use crate::vector::{BinaryOperator, UnaryOperator};
use std::collections::HashMap;

#[derive(Debug, Clone)]
enum ScopeEntry {
    Node { label: LabelId },
    Rel { label: LabelId, recursive: bool },
    Alias { data_type: LogicalType },
}

pub struct Binder<'a> {
    catalog: &'a Catalog,
    scope: HashMap<String, ScopeEntry>,
    parameter_names: Vec<String>,
    anon_counter: usize,
}

impl<'a> Binder<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog, scope: HashMap::new(), parameter_names: Vec::new(), anon_counter: 0 }
    }

    pub fn bind(mut self, query: &ParsedQuery) -> Result<BoundQuery> {
        let mut parts: Vec<BoundQueryPart> = Vec::new();
        let mut current = BoundQueryPart::default();
        let mut is_write = false;
        let mut saw_return = false;

        for clause in &query.clauses {
            if saw_return {
                return Err(GraphError::Bind("RETURN must be the final clause".to_string()));
            }
            match clause {
                Clause::Match { patterns, where_clause } => {
                    if current.unwind.is_some()
                        || !current.updates.is_empty()
                        || current.projection.is_some()
                    {
                        return Err(GraphError::Bind(
                            "MATCH must precede UNWIND and update clauses of its query part"
                                .to_string(),
                        ));
                    }
                    for part in patterns {
                        self.bind_pattern_part(part, &mut current)?;
                    }
                    if let Some(expr) = where_clause {
                        let predicate = self.bind_expr(expr)?;
                        self.expect_boolean(&predicate)?;
                        current.predicates.extend(predicate.split_conjuncts());
                    }
                }
                Clause::Unwind { list, alias } => {
                    let list = self.bind_expr(list)?;
                    let element_type = match list.data_type() {
                        LogicalType::List(child) => *child,
                        LogicalType::Any => LogicalType::Any,
                        other => {
                            return Err(GraphError::Bind(format!(
                                "UNWIND expects a list, got {other}"
                            )))
                        }
                    };
                    self.scope.insert(
                        alias.clone(),
                        ScopeEntry::Alias { data_type: element_type.clone() },
                    );
                    current.unwind =
                        Some(bound::BoundUnwind { list, alias: alias.clone(), element_type });
                }
                Clause::Create { patterns } => {
                    is_write = true;
                    current.updates.push(BoundUpdate::Create(self.bind_create(patterns)?));
                }
                Clause::Set { items } => {
                    is_write = true;
                    let mut bound_items = Vec::new();
                    for (variable, property, value) in items {
                        let label = self.node_label_of(variable)?;
                        let schema = self.catalog.node_label(label);
                        let definition = schema.property(property).ok_or_else(|| {
                            GraphError::Bind(format!(
                                "{} has no property {property}",
                                schema.name
                            ))
                        })?;
                        bound_items.push(SetItem {
                            variable: variable.clone(),
                            label,
                            property_id: definition.property_id,
                            value: self.bind_expr(value)?,
                        });
                    }
                    current.updates.push(BoundUpdate::Set(bound_items));
                }
                Clause::Delete { variables } => {
                    is_write = true;
                    let mut bound = Vec::new();
                    for variable in variables {
                        bound.push((variable.clone(), self.node_label_of(variable)?));
                    }
                    current.updates.push(BoundUpdate::Delete(bound));
                }
                Clause::With { body, where_clause } => {
                    let mut projection = self.bind_projection(body, false)?;
                    if let Some(expr) = where_clause {
                        let predicate = self.bind_expr_in_new_scope(&projection, expr)?;
                        self.expect_boolean(&predicate)?;
                        projection.predicate = Some(predicate);
                    }
                    self.rescope_after_projection(&projection);
                    current.projection = Some(projection);
                    parts.push(std::mem::take(&mut current));
                }
                Clause::Return { body } => {
                    current.projection = Some(self.bind_projection(body, true)?);
                    saw_return = true;
                }
            }
        }
        parts.push(current);

        if !is_write && !saw_return {
            return Err(GraphError::Bind("read-only query needs a RETURN clause".to_string()));
        }
        Ok(BoundQuery {
            parts,
            is_write,
            is_explain: query.is_explain,
            is_profile: query.is_profile,
            parameter_names: self.parameter_names,
        })
    }

    // ------------------------------------------------------------------
    // Patterns
    // ------------------------------------------------------------------

    fn fresh_name(&mut self, prefix: &str) -> String {
        self.anon_counter += 1;
        format!("_{prefix}{}", self.anon_counter)
    }

    fn bind_pattern_part(
        &mut self,
        part: &PatternPart,
        current: &mut BoundQueryPart,
    ) -> Result<()> {
        let mut node_positions = Vec::with_capacity(part.nodes.len());
        for node in &part.nodes {
            node_positions.push(self.bind_node_pattern(node, current)?);
        }
        for (i, rel) in part.rels.iter().enumerate() {
            let (src, dst) = match rel.orientation {
                RelOrientation::LeftToRight => (node_positions[i], node_positions[i + 1]),
                RelOrientation::RightToLeft => (node_positions[i + 1], node_positions[i]),
                RelOrientation::Undirected => {
                    return Err(GraphError::Bind(
                        "undirected rel patterns are not supported".to_string(),
                    ))
                }
            };
            let src_label = current.query_graph.nodes[src].label;
            let dst_label = current.query_graph.nodes[dst].label;
            let label = match &rel.label {
                Some(name) => {
                    self.catalog
                        .rel_label_by_name(name)
                        .ok_or_else(|| GraphError::Bind(format!("unknown rel label {name}")))?
                        .label_id
                }
                None => {
                    let candidates = self.catalog.rel_labels_between(src_label, dst_label);
                    match candidates.as_slice() {
                        [one] => *one,
                        [] => {
                            return Err(GraphError::Bind(
                                "no rel label connects the pattern's node labels".to_string(),
                            ))
                        }
                        _ => {
                            return Err(GraphError::Bind(
                                "rel pattern is ambiguous; name its label".to_string(),
                            ))
                        }
                    }
                }
            };
            let schema = self.catalog.rel_label(label);
            if schema.src_label != src_label || schema.dst_label != dst_label {
                return Err(GraphError::Bind(format!(
                    "rel label {} does not connect the given node labels in this direction",
                    schema.name
                )));
            }
            let (lower, upper) = rel.range.unwrap_or((1, 1));
            let recursive = !(lower == 1 && upper == 1);
            if recursive && src_label != dst_label {
                return Err(GraphError::Bind(
                    "variable-length rels require matching source and destination labels"
                        .to_string(),
                ));
            }
            let name = match &rel.variable {
                Some(name) => name.clone(),
                None => self.fresh_name("e"),
            };
            self.scope.insert(name.clone(), ScopeEntry::Rel { label, recursive });
            current.query_graph.add_rel(QueryRel {
                name,
                src_node: src,
                dst_node: dst,
                label,
                lower,
                upper,
            })?;
        }
        Ok(())
    }

    fn bind_node_pattern(
        &mut self,
        node: &NodePattern,
        current: &mut BoundQueryPart,
    ) -> Result<usize> {
        let name = match &node.variable {
            Some(name) => name.clone(),
            None => self.fresh_name("n"),
        };
        let label = match (&node.label, self.scope.get(&name)) {
            (Some(label_name), _) => self
                .catalog
                .node_label_by_name(label_name)
                .ok_or_else(|| GraphError::Bind(format!("unknown node label {label_name}")))?
                .label_id,
            (None, Some(ScopeEntry::Node { label })) => *label,
            (None, _) => {
                return Err(GraphError::Bind(format!(
                    "node pattern ({name}) requires a label"
                )))
            }
        };
        self.scope.insert(name.clone(), ScopeEntry::Node { label });
        let pos = current.query_graph.add_node(&name, label)?;
        // Inline properties are equality predicates.
        for (key, value) in &node.properties {
            let schema = self.catalog.node_label(label);
            let definition = schema.property(key).ok_or_else(|| {
                GraphError::Bind(format!("{} has no property {key}", schema.name))
            })?;
            current.predicates.push(Expression::Binary {
                op: BinaryOperator::Equals,
                left: Box::new(Expression::Property {
                    variable: name.clone(),
                    label,
                    property: key.clone(),
                    property_id: definition.property_id,
                    data_type: definition.data_type.clone(),
                    on_rel: false,
                }),
                right: Box::new(self.bind_expr(value)?),
            });
        }
        Ok(pos)
    }

    fn bind_create(&mut self, patterns: &[PatternPart]) -> Result<Vec<CreateNodeInfo>> {
        let mut items = Vec::new();
        for part in patterns {
            if !part.rels.is_empty() {
                return Err(GraphError::Bind(
                    "CREATE of rel patterns is not supported".to_string(),
                ));
            }
            for node in &part.nodes {
                let label_name = node.label.as_ref().ok_or_else(|| {
                    GraphError::Bind("CREATE requires a node label".to_string())
                })?;
                let schema = self
                    .catalog
                    .node_label_by_name(label_name)
                    .ok_or_else(|| GraphError::Bind(format!("unknown node label {label_name}")))?;
                let label = schema.label_id;
                let mut values: Vec<Expression> = schema
                    .properties
                    .iter()
                    .map(|_| Expression::Literal { value: Value::Null })
                    .collect();
                for (key, value) in &node.properties {
                    let definition = schema.property(key).ok_or_else(|| {
                        GraphError::Bind(format!("{} has no property {key}", schema.name))
                    })?;
                    values[definition.property_id as usize] = self.bind_expr(value)?;
                }
                if let Some(variable) = &node.variable {
                    self.scope.insert(variable.clone(), ScopeEntry::Node { label });
                }
                items.push(CreateNodeInfo { label, values });
            }
        }
        Ok(items)
    }

    // ------------------------------------------------------------------
    // Projections
    // ------------------------------------------------------------------

    fn bind_projection(
        &mut self,
        body: &ProjectionBody,
        is_final_return: bool,
    ) -> Result<BoundProjection> {
        let mut expressions = Vec::new();
        let mut aliases = Vec::new();
        for (expr, alias) in &body.items {
            let bound = self.bind_expr(expr)?;
            let alias = alias.clone().unwrap_or_else(|| default_alias(&bound));
            if aliases.contains(&alias) {
                return Err(GraphError::Bind(format!("duplicate output name {alias}")));
            }
            expressions.push(bound);
            aliases.push(alias);
        }
        let mut order_by = Vec::new();
        let mut ascending = Vec::new();
        for (key, asc) in &body.order_by {
            order_by.push(self.bind_expr(key)?);
            ascending.push(*asc);
        }
        Ok(BoundProjection {
            expressions,
            aliases,
            order_by,
            ascending,
            skip: body.skip,
            limit: body.limit,
            predicate: None,
            is_final_return,
        })
    }

    /// WITH ... WHERE sees the projected names, not the pre-WITH scope.
    fn bind_expr_in_new_scope(
        &mut self,
        projection: &BoundProjection,
        expr: &ParsedExpr,
    ) -> Result<Expression> {
        let saved = self.scope.clone();
        self.rescope_after_projection(projection);
        let result = self.bind_expr(expr);
        self.scope = saved;
        result
    }

    fn rescope_after_projection(&mut self, projection: &BoundProjection) {
        let mut scope = HashMap::new();
        for (expr, alias) in projection.expressions.iter().zip(&projection.aliases) {
            let entry = match expr {
                Expression::NodeVariable { label, .. } => ScopeEntry::Node { label: *label },
                Expression::RelVariable { label, .. } => {
                    ScopeEntry::Rel { label: *label, recursive: false }
                }
                other => ScopeEntry::Alias { data_type: other.data_type() },
            };
            scope.insert(alias.clone(), entry);
        }
        self.scope = scope;
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn node_label_of(&self, variable: &str) -> Result<LabelId> {
        match self.scope.get(variable) {
            Some(ScopeEntry::Node { label }) => Ok(*label),
            Some(_) => Err(GraphError::Bind(format!("{variable} is not a node variable"))),
            None => Err(GraphError::Bind(format!("variable {variable} is not defined"))),
        }
    }

    fn expect_boolean(&self, expr: &Expression) -> Result<()> {
        match expr.data_type() {
            LogicalType::Bool | LogicalType::Any => Ok(()),
            other => Err(GraphError::Bind(format!(
                "expected a boolean predicate, got {other}"
            ))),
        }
    }

    fn bind_expr(&mut self, expr: &ParsedExpr) -> Result<Expression> {
        Ok(match expr {
            ParsedExpr::Literal(value) => Expression::Literal { value: value.clone() },
            ParsedExpr::Parameter(name) => {
                if !self.parameter_names.contains(name) {
                    self.parameter_names.push(name.clone());
                }
                Expression::Parameter { name: name.clone() }
            }
            ParsedExpr::Variable(name) => match self.scope.get(name) {
                Some(ScopeEntry::Node { label }) => {
                    Expression::NodeVariable { name: name.clone(), label: *label }
                }
                Some(ScopeEntry::Rel { label, recursive }) => {
                    if *recursive {
                        return Err(GraphError::Bind(format!(
                            "variable-length rel {name} cannot be referenced directly; use length({name}) or path({name})"
                        )));
                    }
                    Expression::RelVariable { name: name.clone(), label: *label }
                }
                Some(ScopeEntry::Alias { data_type }) => {
                    Expression::Alias { name: name.clone(), data_type: data_type.clone() }
                }
                None => {
                    return Err(GraphError::Bind(format!("variable {name} is not defined")))
                }
            },
            ParsedExpr::Property(variable, property) => match self.scope.get(variable) {
                Some(ScopeEntry::Node { label }) => {
                    let schema = self.catalog.node_label(*label);
                    let definition = schema.property(property).ok_or_else(|| {
                        GraphError::Bind(format!("{} has no property {property}", schema.name))
                    })?;
                    Expression::Property {
                        variable: variable.clone(),
                        label: *label,
                        property: property.clone(),
                        property_id: definition.property_id,
                        data_type: definition.data_type.clone(),
                        on_rel: false,
                    }
                }
                Some(ScopeEntry::Rel { label, recursive }) => {
                    if *recursive {
                        return Err(GraphError::Bind(format!(
                            "properties of variable-length rel {variable} are not accessible"
                        )));
                    }
                    let schema = self.catalog.rel_label(*label);
                    let definition = schema.property(property).ok_or_else(|| {
                        GraphError::Bind(format!("{} has no property {property}", schema.name))
                    })?;
                    Expression::Property {
                        variable: variable.clone(),
                        label: *label,
                        property: property.clone(),
                        property_id: definition.property_id,
                        data_type: definition.data_type.clone(),
                        on_rel: true,
                    }
                }
                Some(ScopeEntry::Alias { .. }) => {
                    return Err(GraphError::Bind(format!(
                        "{variable} is not a node or rel variable"
                    )))
                }
                None => {
                    return Err(GraphError::Bind(format!(
                        "variable {variable} is not defined"
                    )))
                }
            },
            ParsedExpr::Unary(op, child) => {
                let child = self.bind_expr(child)?;
                if *op == UnaryOperator::Not {
                    self.expect_boolean(&child)?;
                }
                Expression::Unary { op: *op, child: Box::new(child) }
            }
            ParsedExpr::Binary(op, left, right) => {
                let left = self.bind_expr(left)?;
                let right = self.bind_expr(right)?;
                if matches!(op, BinaryOperator::And | BinaryOperator::Or | BinaryOperator::Xor) {
                    self.expect_boolean(&left)?;
                    self.expect_boolean(&right)?;
                }
                Expression::Binary { op: *op, left: Box::new(left), right: Box::new(right) }
            }
            ParsedExpr::ListLiteral(elements) => {
                let mut values = Vec::with_capacity(elements.len());
                for element in elements {
                    match self.bind_expr(element)? {
                        Expression::Literal { value } => values.push(value),
                        _ => {
                            return Err(GraphError::Bind(
                                "list literals must contain constants".to_string(),
                            ))
                        }
                    }
                }
                Expression::Literal { value: Value::List(values) }
            }
            ParsedExpr::Function { name, distinct, star, args } => {
                self.bind_function(name, *distinct, *star, args)?
            }
        })
    }

    fn bind_function(
        &mut self,
        name: &str,
        distinct: bool,
        star: bool,
        args: &[ParsedExpr],
    ) -> Result<Expression> {
        let lowered = name.to_ascii_lowercase();
        let aggregate = match lowered.as_str() {
            "count" => Some(AggregateFunction::Count),
            "sum" => Some(AggregateFunction::Sum),
            "avg" => Some(AggregateFunction::Avg),
            "min" => Some(AggregateFunction::Min),
            "max" => Some(AggregateFunction::Max),
            "collect" => Some(AggregateFunction::Collect),
            _ => None,
        };
        if let Some(function) = aggregate {
            let child = if star {
                if function != AggregateFunction::Count {
                    return Err(GraphError::Bind(format!("{name}(*) is not defined")));
                }
                None
            } else {
                match args {
                    [arg] => Some(Box::new(self.bind_expr(arg)?)),
                    _ => {
                        return Err(GraphError::Bind(format!(
                            "{name} takes exactly one argument"
                        )))
                    }
                }
            };
            return Ok(Expression::Aggregate { function, child, distinct });
        }
        match lowered.as_str() {
            "abs" => match args {
                [arg] => Ok(Expression::Unary {
                    op: UnaryOperator::Abs,
                    child: Box::new(self.bind_expr(arg)?),
                }),
                _ => Err(GraphError::Bind("abs takes exactly one argument".to_string())),
            },
            "to_string" => match args {
                [arg] => Ok(Expression::Unary {
                    op: UnaryOperator::CastToString,
                    child: Box::new(self.bind_expr(arg)?),
                }),
                _ => Err(GraphError::Bind("to_string takes exactly one argument".to_string())),
            },
            "length" | "path" => match args {
                [ParsedExpr::Variable(rel)] => {
                    let Some(ScopeEntry::Rel { recursive: true, .. }) = self.scope.get(rel) else {
                        return Err(GraphError::Bind(format!(
                            "{lowered}() expects a variable-length rel variable"
                        )));
                    };
                    let data_type = if lowered == "length" {
                        LogicalType::Int64
                    } else {
                        LogicalType::Path
                    };
                    Ok(Expression::Alias { name: format!("{lowered}({rel})"), data_type })
                }
                _ => Err(GraphError::Bind(format!(
                    "{lowered}() expects a variable-length rel variable"
                ))),
            },
            other => Err(GraphError::Bind(format!("unknown function {other}"))),
        }
    }
}

fn default_alias(expr: &Expression) -> String {
    expr.unique_name()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Cardinality;
    use crate::parser::Parser;

    fn tinysnb_catalog() -> Catalog {
        let mut catalog = Catalog::new();
        let person = catalog
            .add_node_label(
                "person",
                vec![
                    ("ID".to_string(), LogicalType::Int64),
                    ("fName".to_string(), LogicalType::String),
                    ("age".to_string(), LogicalType::Int64),
                ],
                "ID",
                false,
            )
            .unwrap();
        catalog
            .add_rel_label(
                "knows",
                vec![("date".to_string(), LogicalType::Date)],
                person,
                person,
                Cardinality::ManyMany,
            )
            .unwrap();
        catalog
    }

    fn bind(query: &str) -> Result<BoundQuery> {
        let catalog = tinysnb_catalog();
        let parsed = Parser::parse(query)?;
        Binder::new(&catalog).bind(&parsed)
    }

    #[test]
    fn binds_match_and_predicates() {
        let bound = bind("MATCH (a:person)-[e:knows]->(b:person) WHERE a.ID = 0 RETURN e.date")
            .unwrap();
        let part = &bound.parts[0];
        assert_eq!(part.query_graph.nodes.len(), 2);
        assert_eq!(part.query_graph.rels.len(), 1);
        assert_eq!(part.predicates.len(), 1);
        assert!(!bound.is_write);
    }

    #[test]
    fn inline_properties_become_predicates() {
        let bound = bind("MATCH (a:person {ID: 3}) RETURN a.age").unwrap();
        assert_eq!(bound.parts[0].predicates.len(), 1);
    }

    #[test]
    fn unknown_property_is_a_bind_error() {
        let err = bind("MATCH (a:person) RETURN a.salary").unwrap_err();
        assert!(matches!(err, GraphError::Bind(_)));
    }

    #[test]
    fn recursive_rel_variable_is_fenced() {
        assert!(bind("MATCH (a:person)-[e:knows*1..2]->(b:person) RETURN e.date").is_err());
        assert!(bind("MATCH (a:person)-[e:knows*1..2]->(b:person) RETURN length(e)").is_ok());
    }

    #[test]
    fn create_fills_missing_properties_with_null() {
        let bound = bind("CREATE (:person {ID: 32})").unwrap();
        assert!(bound.is_write);
        let BoundUpdate::Create(items) = &bound.parts[0].updates[0] else { panic!() };
        assert_eq!(items[0].values.len(), 3);
        assert!(matches!(
            items[0].values[1],
            Expression::Literal { value: Value::Null }
        ));
    }

    #[test]
    fn with_rescopes_variables() {
        let bound = bind(
            "MATCH (a:person) WITH a.age AS age WHERE age > 30 RETURN age",
        )
        .unwrap();
        assert_eq!(bound.parts.len(), 2);
        assert!(bound.parts[0].projection.as_ref().unwrap().predicate.is_some());
        // The second part references the alias.
        let final_proj = bound.parts[1].projection.as_ref().unwrap();
        assert!(matches!(final_proj.expressions[0], Expression::Alias { .. }));
    }

    #[test]
    fn parameters_are_recorded() {
        let bound = bind("MATCH (a:person) WHERE a.ID = $id RETURN a.age").unwrap();
        assert_eq!(bound.parameter_names, vec!["id".to_string()]);
    }
}
