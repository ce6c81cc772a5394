//! The storage seam under the world graph.

use super::token::{Label, RelationType, DEFAULT_LABEL};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Errors from a graph backing store.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Graph store unavailable: {0}")]
    Unavailable(String),

    #[error("Graph query failed: {0}")]
    Query(String),

    #[error("Unexpected graph response: {0}")]
    Parse(String),

    #[error("Invalid graph configuration: {0}")]
    Config(String),
}

/// One stored entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityNode {
    pub name: String,
    /// `None` for nodes auto-created as relationship endpoints.
    pub label: Option<Label>,
    pub attributes: BTreeMap<String, String>,
}

impl EntityNode {
    pub fn untyped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: None,
            attributes: BTreeMap::new(),
        }
    }

    /// Label used for display; untyped nodes show as `Entity`.
    pub fn display_label(&self) -> &str {
        self.label.as_ref().map_or(DEFAULT_LABEL, |l| l.as_str())
    }
}

/// A directed edge with both endpoint types, ready for rendering.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EdgeTriple {
    pub source_type: String,
    pub source: String,
    pub relation: String,
    pub target_type: String,
    pub target: String,
}

impl fmt::Display for EdgeTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} '{}' {} {} '{}'",
            self.source_type, self.source, self.relation, self.target_type, self.target
        )
    }
}

/// A store that can hold the world graph.
///
/// Writes must be idempotent: merging the same node or the same
/// `(source, relation, target)` edge twice leaves one copy.
#[async_trait]
pub trait GraphBackend: Send + Sync {
    /// Create the node if absent (matched by name only), then set its label
    /// and merge `attributes` over the existing ones.
    async fn merge_node(
        &mut self,
        name: &str,
        label: &Label,
        attributes: &BTreeMap<String, String>,
    ) -> Result<(), GraphError>;

    /// Create missing endpoints untyped, then the edge if absent.
    async fn merge_edge(
        &mut self,
        source: &str,
        relation: &RelationType,
        target: &str,
    ) -> Result<(), GraphError>;

    /// Up to `limit` edges touching `name` in either direction.
    async fn incident_edges(&self, name: &str, limit: usize) -> Result<Vec<EdgeTriple>, GraphError>;

    /// Up to `limit` edges from anywhere in the graph.
    async fn edges(&self, limit: usize) -> Result<Vec<EdgeTriple>, GraphError>;

    async fn node(&self, name: &str) -> Result<Option<EntityNode>, GraphError>;

    async fn edge_count(&self) -> Result<usize, GraphError>;

    /// Delete every node and edge.
    async fn clear(&mut self) -> Result<(), GraphError>;
}
