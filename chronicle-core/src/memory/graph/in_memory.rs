//! In-process graph store.
//!
//! Nodes and edges keep insertion order, so reads are deterministic: edges
//! come back oldest first.

use super::backend::{EdgeTriple, EntityNode, GraphBackend, GraphError};
use super::token::{Label, RelationType};
use async_trait::async_trait;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
struct Edge {
    source: String,
    relation: RelationType,
    target: String,
}

/// A world graph held entirely in memory for the lifetime of the session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryGraph {
    nodes: IndexMap<String, EntityNode>,
    edges: IndexSet<Edge>,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn ensure_node(&mut self, name: &str) {
        if !self.nodes.contains_key(name) {
            self.nodes.insert(name.to_string(), EntityNode::untyped(name));
        }
    }

    fn triple(&self, edge: &Edge) -> EdgeTriple {
        let label_of = |name: &str| {
            self.nodes
                .get(name)
                .map_or(super::token::DEFAULT_LABEL, |n| n.display_label())
                .to_string()
        };
        EdgeTriple {
            source_type: label_of(&edge.source),
            source: edge.source.clone(),
            relation: edge.relation.to_string(),
            target_type: label_of(&edge.target),
            target: edge.target.clone(),
        }
    }
}

#[async_trait]
impl GraphBackend for InMemoryGraph {
    async fn merge_node(
        &mut self,
        name: &str,
        label: &Label,
        attributes: &BTreeMap<String, String>,
    ) -> Result<(), GraphError> {
        self.ensure_node(name);
        if let Some(node) = self.nodes.get_mut(name) {
            node.label = Some(label.clone());
            node.attributes
                .extend(attributes.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        Ok(())
    }

    async fn merge_edge(
        &mut self,
        source: &str,
        relation: &RelationType,
        target: &str,
    ) -> Result<(), GraphError> {
        self.ensure_node(source);
        self.ensure_node(target);
        self.edges.insert(Edge {
            source: source.to_string(),
            relation: relation.clone(),
            target: target.to_string(),
        });
        Ok(())
    }

    async fn incident_edges(
        &self,
        name: &str,
        limit: usize,
    ) -> Result<Vec<EdgeTriple>, GraphError> {
        Ok(self
            .edges
            .iter()
            .filter(|e| e.source == name || e.target == name)
            .take(limit)
            .map(|e| self.triple(e))
            .collect())
    }

    async fn edges(&self, limit: usize) -> Result<Vec<EdgeTriple>, GraphError> {
        Ok(self.edges.iter().take(limit).map(|e| self.triple(e)).collect())
    }

    async fn node(&self, name: &str) -> Result<Option<EntityNode>, GraphError> {
        Ok(self.nodes.get(name).cloned())
    }

    async fn edge_count(&self) -> Result<usize, GraphError> {
        Ok(self.edges.len())
    }

    async fn clear(&mut self) -> Result<(), GraphError> {
        self.nodes.clear();
        self.edges.clear();
        Ok(())
    }
}
