// Factorization schema tracked during planning. Each group of expressions
// shares one data chunk at execution; the flat flag records whether a
// flatten has been applied by the time the current operator runs. Groups
// are never removed, so slot positions stay stable for the mapper; scope
// tracks what downstream operators may still reference.

use crate::common::LogicalType;
use std::collections::{BTreeSet, HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct FactorGroup {
    pub expressions: Vec<(String, LogicalType)>,
    pub is_flat: bool,
    pub estimated_cardinality: f64,
}

#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub groups: Vec<FactorGroup>,
    positions: HashMap<String, (usize, usize)>,
    in_scope: HashSet<String>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_group(&mut self, is_flat: bool, estimated_cardinality: f64) -> usize {
        self.groups.push(FactorGroup {
            expressions: Vec::new(),
            is_flat,
            estimated_cardinality,
        });
        self.groups.len() - 1
    }

    /// Registers an expression slot in a group and brings it into scope.
    pub fn insert(&mut self, name: &str, data_type: LogicalType, group: usize) -> (usize, usize) {
        if let Some(&pos) = self.positions.get(name) {
            self.in_scope.insert(name.to_string());
            return pos;
        }
        let pos = (group, self.groups[group].expressions.len());
        self.groups[group].expressions.push((name.to_string(), data_type));
        self.positions.insert(name.to_string(), pos);
        self.in_scope.insert(name.to_string());
        pos
    }

    pub fn position(&self, name: &str) -> Option<(usize, usize)> {
        self.positions.get(name).copied()
    }

    pub fn group_of(&self, name: &str) -> Option<usize> {
        self.positions.get(name).map(|&(g, _)| g)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }

    pub fn is_in_scope(&self, name: &str) -> bool {
        self.in_scope.contains(name)
    }

    pub fn set_flat(&mut self, group: usize) {
        self.groups[group].is_flat = true;
    }

    pub fn is_flat(&self, group: usize) -> bool {
        self.groups[group].is_flat
    }

    pub fn estimated_cardinality(&self, group: usize) -> f64 {
        self.groups[group].estimated_cardinality
    }

    pub fn scale_cardinality(&mut self, group: usize, factor: f64) {
        let card = &mut self.groups[group].estimated_cardinality;
        *card = (*card * factor).max(1.0);
    }

    pub fn set_cardinality(&mut self, group: usize, cardinality: f64) {
        self.groups[group].estimated_cardinality = cardinality.max(1.0);
    }

    pub fn scope(&self) -> &HashSet<String> {
        &self.in_scope
    }

    pub fn clear_scope(&mut self) {
        self.in_scope.clear();
    }

    pub fn add_to_scope(&mut self, name: &str) {
        self.in_scope.insert(name.to_string());
    }

    /// Groups holding at least one in-scope expression, ordered.
    pub fn groups_in_scope(&self) -> BTreeSet<usize> {
        self.in_scope
            .iter()
            .filter_map(|name| self.group_of(name))
            .collect()
    }

    /// Unflat groups among the given set.
    pub fn unflat_groups(&self, groups: &BTreeSet<usize>) -> Vec<usize> {
        groups.iter().copied().filter(|&g| !self.is_flat(g)).collect()
    }

    /// In-scope expressions with their types, in slot order.
    pub fn expressions_in_scope(&self) -> Vec<(String, LogicalType)> {
        let mut out = Vec::new();
        for group in &self.groups {
            for (name, data_type) in &group.expressions {
                if self.in_scope.contains(name) {
                    out.push((name.clone(), data_type.clone()));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_are_stable_once_assigned() {
        let mut schema = Schema::new();
        let g0 = schema.create_group(false, 100.0);
        let a = schema.insert("a", LogicalType::Node, g0);
        schema.insert("a.age", LogicalType::Int64, g0);
        // Re-inserting an existing name keeps its slot.
        let a2 = schema.insert("a", LogicalType::Node, g0);
        assert_eq!(a, a2);
        assert_eq!(schema.position("a.age"), Some((0, 1)));
    }

    #[test]
    fn scope_tracking_and_unflat_groups() {
        let mut schema = Schema::new();
        let g0 = schema.create_group(false, 10.0);
        let g1 = schema.create_group(false, 50.0);
        schema.insert("a", LogicalType::Node, g0);
        schema.insert("b", LogicalType::Node, g1);
        schema.set_flat(g0);
        let scoped = schema.groups_in_scope();
        assert_eq!(scoped.len(), 2);
        assert_eq!(schema.unflat_groups(&scoped), vec![g1]);

        schema.clear_scope();
        schema.add_to_scope("b");
        assert_eq!(schema.groups_in_scope().into_iter().collect::<Vec<_>>(), vec![g1]);
    }
}
