//! World graph: entities and the relationships between them.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                       WorldGraph                          │
//! │   normalize tokens · upsert · neighborhood · summary      │
//! │                                                           │
//! │  ┌──────────────────────┐   ┌──────────────────────────┐  │
//! │  │ InMemoryGraph        │   │ Neo4jGraph               │  │
//! │  │ (session-local)      │   │ (HTTP Cypher, MERGE)     │  │
//! │  └──────────────────────┘   └──────────────────────────┘  │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! Names are the only identity: two extractions naming the same string are
//! the same node whatever type they claim. Relationship endpoints that do
//! not exist yet are created untyped, so noisy extractions can leave weakly
//! typed nodes behind.
//!
//! Reads degrade to empty results when the store misbehaves; writes report
//! the failure to the caller.

mod backend;
mod in_memory;
mod neo4j;
mod token;

pub use backend::{EdgeTriple, EntityNode, GraphBackend, GraphError};
pub use in_memory::InMemoryGraph;
pub use neo4j::{Neo4jConfig, Neo4jGraph};
pub use token::{normalize_attribute_key, Label, RelationType, DEFAULT_LABEL, DEFAULT_RELATION};

use indexmap::IndexSet;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Mutable entity-relationship model of the story world.
pub struct WorldGraph {
    backend: Box<dyn GraphBackend>,
}

impl WorldGraph {
    pub fn new(backend: Box<dyn GraphBackend>) -> Self {
        Self { backend }
    }

    /// A graph backed by [`InMemoryGraph`].
    pub fn in_memory() -> Self {
        Self::new(Box::new(InMemoryGraph::new()))
    }

    /// Create or update an entity by name.
    ///
    /// The type becomes a [`Label`]; attribute keys are normalized and
    /// merged over existing ones (last write wins). A `name` attribute is
    /// ignored since the name is the identity.
    pub async fn upsert_entity(
        &mut self,
        name: &str,
        entity_type: &str,
        attributes: &BTreeMap<String, String>,
    ) -> Result<(), GraphError> {
        let label = Label::normalize(entity_type);
        let attributes: BTreeMap<String, String> = attributes
            .iter()
            .map(|(k, v)| (normalize_attribute_key(k), v.clone()))
            .filter(|(k, _)| k != "name")
            .collect();

        self.backend.merge_node(name, &label, &attributes).await?;
        debug!(name, label = %label, attributes = attributes.len(), "merged entity");
        Ok(())
    }

    /// Create the directed edge `source -relation-> target` if absent.
    pub async fn upsert_relationship(
        &mut self,
        source: &str,
        relation: &str,
        target: &str,
    ) -> Result<(), GraphError> {
        let relation = RelationType::normalize(relation);
        self.backend.merge_edge(source, &relation, target).await?;
        debug!(source, relation = %relation, target, "merged relationship");
        Ok(())
    }

    /// Edges around each of `names`, at most `limit_per_name` per name.
    ///
    /// Results are concatenated in name order and deduplicated by rendered
    /// text, keeping first occurrences.
    pub async fn neighborhood<S: AsRef<str>>(
        &self,
        names: &[S],
        limit_per_name: usize,
    ) -> Vec<String> {
        let mut lines = IndexSet::new();
        for name in names {
            let name = name.as_ref();
            match self.backend.incident_edges(name, limit_per_name).await {
                Ok(edges) => lines.extend(edges.iter().map(ToString::to_string)),
                Err(e) => warn!(name, error = %e, "graph neighborhood lookup failed"),
            }
        }
        lines.into_iter().collect()
    }

    /// Up to `limit` edges from the whole graph.
    pub async fn global_summary(&self, limit: usize) -> Vec<String> {
        match self.backend.edges(limit).await {
            Ok(edges) => edges.iter().map(ToString::to_string).collect(),
            Err(e) => {
                warn!(error = %e, "graph summary failed");
                Vec::new()
            }
        }
    }

    pub async fn entity(&self, name: &str) -> Result<Option<EntityNode>, GraphError> {
        self.backend.node(name).await
    }

    pub async fn edge_count(&self) -> Result<usize, GraphError> {
        self.backend.edge_count().await
    }

    /// Delete every node and edge.
    pub async fn reset(&mut self) -> Result<(), GraphError> {
        self.backend.clear().await?;
        info!("world graph cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingGraph;

    fn attrs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[tokio::test]
    async fn test_upsert_entity_normalizes() {
        let mut graph = WorldGraph::in_memory();
        graph
            .upsert_entity("Goblin", "NPC", &attrs(&[("hit points", "0"), ("war-cry", "Grak")]))
            .await
            .unwrap();

        let node = graph.entity("Goblin").await.unwrap().unwrap();
        assert_eq!(node.display_label(), "Npc");
        assert_eq!(node.attributes["hit_points"], "0");
        assert_eq!(node.attributes["war_cry"], "Grak");
    }

    #[tokio::test]
    async fn test_upsert_entity_is_idempotent() {
        let mut graph = WorldGraph::in_memory();
        let a = attrs(&[("status", "dead")]);
        graph.upsert_entity("Goblin", "NPC", &a).await.unwrap();
        let once = graph.entity("Goblin").await.unwrap();
        graph.upsert_entity("Goblin", "NPC", &a).await.unwrap();
        let twice = graph.entity("Goblin").await.unwrap();
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn test_upsert_entity_matches_by_name_only() {
        let mut graph = WorldGraph::in_memory();
        graph.upsert_entity("Mira", "NPC", &attrs(&[("mood", "calm")])).await.unwrap();
        graph.upsert_entity("Mira", "Player", &attrs(&[("class", "rogue")])).await.unwrap();

        let node = graph.entity("Mira").await.unwrap().unwrap();
        assert_eq!(node.display_label(), "Player");
        assert_eq!(node.attributes.len(), 2);
    }

    #[tokio::test]
    async fn test_name_attribute_cannot_rename() {
        let mut graph = WorldGraph::in_memory();
        graph.upsert_entity("Goblin", "NPC", &attrs(&[("name", "Bob")])).await.unwrap();
        let node = graph.entity("Goblin").await.unwrap().unwrap();
        assert_eq!(node.name, "Goblin");
        assert!(node.attributes.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_relationship_is_idempotent() {
        let mut graph = WorldGraph::in_memory();
        graph.upsert_relationship("Kael", "carries", "Torch").await.unwrap();
        let before = graph.edge_count().await.unwrap();
        graph.upsert_relationship("Kael", "CARRIES", "Torch").await.unwrap();
        assert_eq!(graph.edge_count().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_neighborhood_dedups_across_names() {
        let mut graph = WorldGraph::in_memory();
        graph.upsert_entity("Kael", "Player", &BTreeMap::new()).await.unwrap();
        graph.upsert_relationship("Kael", "fights", "Goblin").await.unwrap();
        graph.upsert_relationship("Goblin", "guards", "Cave").await.unwrap();

        let lines = graph.neighborhood(&["Kael", "Goblin"], 5).await;
        assert_eq!(
            lines,
            vec![
                "Player 'Kael' FIGHTS Entity 'Goblin'".to_string(),
                "Entity 'Goblin' GUARDS Entity 'Cave'".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_neighborhood_empty_names_skips_backend() {
        let recording = RecordingGraph::new();
        let calls = recording.read_calls();
        let graph = WorldGraph::new(Box::new(recording));

        let names: [&str; 0] = [];
        assert!(graph.neighborhood(&names, 5).await.is_empty());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reads_degrade_on_failure() {
        let graph = WorldGraph::new(Box::new(RecordingGraph::failing()));
        assert!(graph.neighborhood(&["Kael"], 5).await.is_empty());
        assert!(graph.global_summary(50).await.is_empty());
    }

    #[tokio::test]
    async fn test_writes_surface_failure() {
        let mut graph = WorldGraph::new(Box::new(RecordingGraph::failing()));
        assert!(graph.upsert_entity("Kael", "Player", &BTreeMap::new()).await.is_err());
        assert!(graph.upsert_relationship("Kael", "x", "Y").await.is_err());
        assert!(graph.reset().await.is_err());
    }

    #[tokio::test]
    async fn test_global_summary_limit() {
        let mut graph = WorldGraph::in_memory();
        for i in 0..10 {
            graph.upsert_relationship("Kael", "knows", &format!("Npc{i}")).await.unwrap();
        }
        assert_eq!(graph.global_summary(4).await.len(), 4);
        assert_eq!(graph.global_summary(50).await.len(), 10);
    }
}
