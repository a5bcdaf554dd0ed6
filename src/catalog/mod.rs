// # Catalog
//
// Schema registry for node and rel labels. Read-only while queries run;
// DDL goes through the database's writer path. Persisted alongside the data
// files so a reopened database sees the same label and property ids.

use crate::common::{Cardinality, LabelId, LogicalType, PropertyId};
use crate::error::{GraphError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

// Structured property definition: name, type, and the column it occupies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    pub name: String,
    pub property_id: PropertyId,
    pub data_type: LogicalType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeLabelSchema {
    pub label_id: LabelId,
    pub name: String,
    pub properties: Vec<PropertyDefinition>,
    /// Property holding the primary key; backed by the label's hash index.
    pub primary_key: PropertyId,
    pub has_unstructured: bool,
    /// Count of allocated node offsets, including deleted ones.
    pub num_nodes: u64,
}

impl NodeLabelSchema {
    pub fn property(&self, name: &str) -> Option<&PropertyDefinition> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn max_node_offset(&self) -> Option<u64> {
        self.num_nodes.checked_sub(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelLabelSchema {
    pub label_id: LabelId,
    pub name: String,
    pub properties: Vec<PropertyDefinition>,
    pub src_label: LabelId,
    pub dst_label: LabelId,
    pub cardinality: Cardinality,
    pub num_rels: u64,
}

impl RelLabelSchema {
    pub fn property(&self, name: &str) -> Option<&PropertyDefinition> {
        self.properties.iter().find(|p| p.name == name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    node_labels: Vec<NodeLabelSchema>,
    rel_labels: Vec<RelLabelSchema>,
    node_name_map: HashMap<String, LabelId>,
    rel_name_map: HashMap<String, LabelId>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node_label(
        &mut self,
        name: &str,
        properties: Vec<(String, LogicalType)>,
        primary_key: &str,
        has_unstructured: bool,
    ) -> Result<LabelId> {
        if self.node_name_map.contains_key(name) {
            return Err(GraphError::Bind(format!("node label {name} already exists")));
        }
        let properties: Vec<PropertyDefinition> = properties
            .into_iter()
            .enumerate()
            .map(|(i, (name, data_type))| PropertyDefinition {
                name,
                property_id: i as PropertyId,
                data_type,
            })
            .collect();
        let primary_key = properties
            .iter()
            .find(|p| p.name == primary_key)
            .map(|p| p.property_id)
            .ok_or_else(|| {
                GraphError::Bind(format!("primary key {primary_key} is not a property of {name}"))
            })?;
        let label_id = self.node_labels.len() as LabelId;
        self.node_name_map.insert(name.to_string(), label_id);
        self.node_labels.push(NodeLabelSchema {
            label_id,
            name: name.to_string(),
            properties,
            primary_key,
            has_unstructured,
            num_nodes: 0,
        });
        Ok(label_id)
    }

    pub fn add_rel_label(
        &mut self,
        name: &str,
        properties: Vec<(String, LogicalType)>,
        src_label: LabelId,
        dst_label: LabelId,
        cardinality: Cardinality,
    ) -> Result<LabelId> {
        if self.rel_name_map.contains_key(name) {
            return Err(GraphError::Bind(format!("rel label {name} already exists")));
        }
        let properties = properties
            .into_iter()
            .enumerate()
            .map(|(i, (name, data_type))| PropertyDefinition {
                name,
                property_id: i as PropertyId,
                data_type,
            })
            .collect();
        let label_id = self.rel_labels.len() as LabelId;
        self.rel_name_map.insert(name.to_string(), label_id);
        self.rel_labels.push(RelLabelSchema {
            label_id,
            name: name.to_string(),
            properties,
            src_label,
            dst_label,
            cardinality,
            num_rels: 0,
        });
        Ok(label_id)
    }

    pub fn node_labels(&self) -> &[NodeLabelSchema] {
        &self.node_labels
    }

    pub fn rel_labels(&self) -> &[RelLabelSchema] {
        &self.rel_labels
    }

    pub fn node_label(&self, id: LabelId) -> &NodeLabelSchema {
        &self.node_labels[id as usize]
    }

    pub fn node_label_mut(&mut self, id: LabelId) -> &mut NodeLabelSchema {
        &mut self.node_labels[id as usize]
    }

    pub fn rel_label(&self, id: LabelId) -> &RelLabelSchema {
        &self.rel_labels[id as usize]
    }

    pub fn rel_label_mut(&mut self, id: LabelId) -> &mut RelLabelSchema {
        &mut self.rel_labels[id as usize]
    }

    pub fn node_label_by_name(&self, name: &str) -> Option<&NodeLabelSchema> {
        self.node_name_map.get(name).map(|&id| self.node_label(id))
    }

    pub fn rel_label_by_name(&self, name: &str) -> Option<&RelLabelSchema> {
        self.rel_name_map.get(name).map(|&id| self.rel_label(id))
    }

    /// Rel labels that can connect the given node labels in either
    /// orientation, for binding unlabelled rel patterns.
    pub fn rel_labels_between(&self, a: LabelId, b: LabelId) -> Vec<LabelId> {
        self.rel_labels
            .iter()
            .filter(|r| {
                (r.src_label == a && r.dst_label == b) || (r.src_label == b && r.dst_label == a)
            })
            .map(|r| r.label_id)
            .collect()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = bincode::serde::encode_to_vec(self, bincode::config::standard())?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let (catalog, _) = bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?;
        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person_label(catalog: &mut Catalog) -> LabelId {
        catalog
            .add_node_label(
                "person",
                vec![
                    ("ID".to_string(), LogicalType::Int64),
                    ("fName".to_string(), LogicalType::String),
                ],
                "ID",
                false,
            )
            .unwrap()
    }

    #[test]
    fn label_and_property_lookup() {
        let mut catalog = Catalog::new();
        let person = person_label(&mut catalog);
        let schema = catalog.node_label_by_name("person").unwrap();
        assert_eq!(schema.label_id, person);
        assert_eq!(schema.property("fName").unwrap().property_id, 1);
        assert_eq!(schema.primary_key, 0);
        assert!(catalog.node_label_by_name("animal").is_none());
    }

    #[test]
    fn duplicate_label_is_a_bind_error() {
        let mut catalog = Catalog::new();
        person_label(&mut catalog);
        let err = catalog
            .add_node_label("person", vec![("ID".to_string(), LogicalType::Int64)], "ID", false)
            .unwrap_err();
        assert!(matches!(err, GraphError::Bind(_)));
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = Catalog::new();
        let person = person_label(&mut catalog);
        catalog
            .add_rel_label("knows", vec![], person, person, Cardinality::ManyMany)
            .unwrap();
        let path = dir.path().join("catalog.bin");
        catalog.save(&path).unwrap();
        let loaded = Catalog::load(&path).unwrap();
        assert_eq!(loaded.node_labels().len(), 1);
        assert_eq!(loaded.rel_label_by_name("knows").unwrap().cardinality, Cardinality::ManyMany);
    }
}
