//! The context assembler: one turn of memory in, one turn of memory out.
//!
//! Before generation it fuses the recency buffer, the episodic hits that
//! clear the similarity threshold and the graph neighborhood of every
//! entity involved into a single context string. After generation it writes
//! the new turn back into all three stores.

use crate::config::ChronicleConfig;
use crate::extractor::EntityExtractor;
use crate::generator::{GenerationError, TextGenerator};
use crate::memory::episodic::EmbedError;
use crate::memory::{
    ArchiveError, EpisodicArchive, EpisodicHit, GraphError, RecencyBuffer,
    RecordMetadata, Turn, WorldGraph,
};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

/// An external store the assembler could not use.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("embedding model: {0}")]
    Embedding(#[from] EmbedError),

    #[error("graph store: {0}")]
    Graph(#[from] GraphError),
}

/// Errors surfaced by the context assembler.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Adapter unavailable: {0}")]
    AdapterUnavailable(#[from] AdapterError),

    #[error("Generation failed: {0}")]
    Generation(#[from] GenerationError),
}

impl From<EmbedError> for MemoryError {
    fn from(e: EmbedError) -> Self {
        MemoryError::AdapterUnavailable(e.into())
    }
}

impl From<GraphError> for MemoryError {
    fn from(e: GraphError) -> Self {
        MemoryError::AdapterUnavailable(e.into())
    }
}

/// Where the assembler is within a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnPhase {
    #[default]
    Idle,
    BuildingContext,
    Generating,
    UpdatingStores,
}

/// Result of a memory inspection (`/memory`, `/dump`).
#[derive(Debug, Clone, Default)]
pub struct MemoryReport {
    pub episodic: Vec<EpisodicHit>,
    pub graph: Vec<String>,
}

impl MemoryReport {
    /// Render with each episode cut to `preview_len` characters.
    pub fn render(&self, preview_len: usize) -> String {
        let mut out = String::from("=== Graph facts ===\n");
        if self.graph.is_empty() {
            out.push_str("(no facts)\n");
        } else {
            for line in &self.graph {
                out.push_str(line);
                out.push('\n');
            }
        }

        out.push_str("\n=== Episodic hits ===");
        for (i, hit) in self.episodic.iter().enumerate() {
            out.push_str(&format!(
                "\n{}. [{:.4}] {}",
                i + 1,
                hit.score,
                preview(&hit.text, preview_len)
            ));
        }
        out
    }
}

impl fmt::Display for MemoryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(DEFAULT_PREVIEW_LEN))
    }
}

const DEFAULT_PREVIEW_LEN: usize = 300;

fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Owns the three memory stores and the two model adapters.
pub struct ContextAssembler {
    config: ChronicleConfig,
    recency: RecencyBuffer,
    archive: EpisodicArchive,
    graph: WorldGraph,
    extractor: Box<dyn EntityExtractor>,
    generator: Box<dyn TextGenerator>,
    phase: TurnPhase,
}

impl ContextAssembler {
    /// The recency buffer is sized from `config.working_capacity`.
    pub fn new(
        config: ChronicleConfig,
        archive: EpisodicArchive,
        graph: WorldGraph,
        extractor: Box<dyn EntityExtractor>,
        generator: Box<dyn TextGenerator>,
    ) -> Self {
        Self {
            recency: RecencyBuffer::new(config.working_capacity),
            config,
            archive,
            graph,
            extractor,
            generator,
            phase: TurnPhase::Idle,
        }
    }

    pub fn config(&self) -> &ChronicleConfig {
        &self.config
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn recent_turns(&self) -> &RecencyBuffer {
        &self.recency
    }

    pub fn archive(&self) -> &EpisodicArchive {
        &self.archive
    }

    pub fn graph(&self) -> &WorldGraph {
        &self.graph
    }

    /// Build the memory context for `player_input`.
    ///
    /// Never fails: a store that cannot answer contributes nothing.
    pub async fn build_context(&mut self, player_input: &str) -> String {
        self.phase = TurnPhase::BuildingContext;
        let context = self.assemble(player_input).await;
        self.phase = TurnPhase::Idle;
        context
    }

    async fn assemble(&self, player_input: &str) -> String {
        let mut sections = Vec::new();

        if !self.recency.is_empty() {
            let lines: Vec<String> = self.recency.iter().map(Turn::summary_line).collect();
            sections.push(section("Recent actions and DM responses:", &lines));
        }

        let hits = self.relevant_episodes(player_input).await;
        if !hits.is_empty() {
            let lines: Vec<String> = hits
                .iter()
                .map(|h| format!("- {}", h.text.replace('\n', " ")))
                .collect();
            sections.push(section("Recent relevant events:", &lines));
        }

        let names = self.scene_entities(player_input, &hits).await;
        let facts = self
            .graph
            .neighborhood(&names, self.config.neighborhood_limit)
            .await;
        if !facts.is_empty() {
            sections.push(section("Relevant world facts and relationships:", &facts));
        }

        debug!(
            sections = sections.len(),
            episodes = hits.len(),
            entities = names.len(),
            facts = facts.len(),
            "context assembled"
        );
        sections.join("\n\n")
    }

    /// Episodic hits at or above the similarity threshold, at most K.
    async fn relevant_episodes(&self, player_input: &str) -> Vec<EpisodicHit> {
        let k = self.config.episodic_k;
        match self.archive.query(player_input, k).await {
            Ok(hits) => hits
                .into_iter()
                .filter(|h| h.score >= self.config.similarity_threshold)
                .take(k)
                .collect(),
            Err(e) => {
                warn!(error = %e, "episodic search failed; continuing without it");
                Vec::new()
            }
        }
    }

    /// Entities named in the input and retained episodes, plus the anchors.
    async fn scene_entities(&self, player_input: &str, hits: &[EpisodicHit]) -> Vec<String> {
        let mut text = player_input.to_string();
        for hit in hits {
            text.push('\n');
            text.push_str(&hit.text);
        }

        let mut names = self
            .extractor
            .extract(&text)
            .await
            .map(|e| e.entity_names())
            .unwrap_or_default();
        for anchor in &self.config.anchor_entities {
            if !names.contains(anchor) {
                names.push(anchor.clone());
            }
        }
        names
    }

    /// Write a completed turn into every store.
    ///
    /// The episodic record is written first. If a graph write then fails,
    /// merges already made stay applied, the archive keeps the record and
    /// the turn is not added to the recency buffer.
    pub async fn update_after_generation(
        &mut self,
        player_input: &str,
        generated_text: &str,
    ) -> Result<(), MemoryError> {
        self.phase = TurnPhase::UpdatingStores;
        let result = self.write_turn(player_input, generated_text).await;
        self.phase = TurnPhase::Idle;
        result
    }

    async fn write_turn(
        &mut self,
        player_input: &str,
        generated_text: &str,
    ) -> Result<(), MemoryError> {
        let turn = Turn::new(player_input, generated_text);

        match self
            .archive
            .add(turn.episode_text(), RecordMetadata::at(turn.timestamp))
            .await
        {
            Ok(()) => {}
            Err(ArchiveError::Embedding(e)) => return Err(e.into()),
            Err(e @ ArchiveError::Persistence { .. }) => {
                warn!(error = %e, "episode kept in memory only");
            }
        }

        let extraction = self.extractor.extract(generated_text).await.unwrap_or_default();

        for entity in &extraction.entities {
            let Some(name) = entity.name() else { continue };
            self.graph
                .upsert_entity(name, entity.entity_type(), &entity.attributes)
                .await?;
            info!(name, entity_type = entity.entity_type(), "merged entity");
        }

        for rel in &extraction.relationships {
            let (Some(source), Some(target)) = (rel.source(), rel.target()) else {
                continue;
            };
            self.graph
                .upsert_relationship(source, rel.relation(), target)
                .await?;
            info!(source, relation = rel.relation(), target, "merged relation");
        }

        self.recency.push(turn);
        Ok(())
    }

    /// Run one full turn: build context, generate, update memory.
    ///
    /// A generation failure leaves every store untouched.
    pub async fn play_turn(&mut self, player_input: &str) -> Result<String, MemoryError> {
        let context = self.build_context(player_input).await;

        self.phase = TurnPhase::Generating;
        let generated = match self.generator.generate(&context, player_input).await {
            Ok(text) => text,
            Err(e) => {
                self.phase = TurnPhase::Idle;
                return Err(e.into());
            }
        };

        self.update_after_generation(player_input, &generated).await?;
        Ok(generated)
    }

    /// A broad view of memory that needs no extraction call.
    pub async fn general_context(&self) -> String {
        let mut sections = Vec::new();

        if !self.recency.is_empty() {
            let lines: Vec<String> = self.recency.iter().map(Turn::timestamped_line).collect();
            sections.push(section("Recent actions and DM responses:", &lines));
        }

        let facts = self.graph.global_summary(self.config.summary_limit).await;
        if !facts.is_empty() {
            sections.push(section("World facts and relationships:", &facts));
        }

        let recent = self.archive.recent(self.config.recent_episodes);
        if !recent.is_empty() {
            let lines: Vec<String> = recent
                .iter()
                .map(|r| {
                    let text = preview(&r.text, self.config.preview_len).replace('\n', " ");
                    format!("- {text}")
                })
                .collect();
            sections.push(section("Recent episodic memory:", &lines));
        }

        sections.join("\n\n")
    }

    /// Search memory for `query`; `k` defaults to the configured episodic K.
    ///
    /// An empty query returns the whole-graph summary instead of a
    /// neighborhood.
    pub async fn query_memory(
        &self,
        query: &str,
        k: Option<usize>,
    ) -> Result<MemoryReport, MemoryError> {
        let episodic = self.search_archive(query, k.unwrap_or(self.config.episodic_k)).await?;

        let graph = if query.trim().is_empty() {
            self.graph.global_summary(self.config.summary_limit).await
        } else {
            let names = self
                .extractor
                .extract(query)
                .await
                .map(|e| e.entity_names())
                .unwrap_or_default();
            self.graph
                .neighborhood(&names, self.config.neighborhood_limit)
                .await
        };

        Ok(MemoryReport { episodic, graph })
    }

    /// Up to `k` archived episodes plus the whole-graph summary.
    pub async fn dump(&self, k: usize) -> Result<MemoryReport, MemoryError> {
        let episodic = self.search_archive("", k).await?;
        let graph = self.graph.global_summary(self.config.summary_limit).await;
        Ok(MemoryReport { episodic, graph })
    }

    async fn search_archive(&self, query: &str, k: usize) -> Result<Vec<EpisodicHit>, MemoryError> {
        match self.archive.query(query, k).await {
            Ok(hits) => Ok(hits),
            Err(ArchiveError::Embedding(e)) => Err(e.into()),
            Err(e) => {
                warn!(error = %e, "episodic search failed");
                Ok(Vec::new())
            }
        }
    }

    /// Clear the graph, the archive and the recency buffer.
    pub async fn reset(&mut self) -> Result<(), MemoryError> {
        self.graph.reset().await?;
        if let Err(e) = self.archive.reset().await {
            warn!(error = %e, "archive cleared in memory only");
        }
        self.recency.clear();
        info!("all memory stores reset");
        Ok(())
    }

    /// Flush the archive to disk.
    pub async fn persist(&self) {
        if let Err(e) = self.archive.persist().await {
            warn!(error = %e, "final archive flush failed");
        }
    }

    /// Tear down the session: clear the graph and flush the archive.
    pub async fn close(mut self) -> Result<(), MemoryError> {
        let cleared = self.graph.reset().await;
        self.persist().await;
        cleared.map_err(Into::into)
    }
}

fn section(header: &str, lines: &[String]) -> String {
    let mut out = header.to_string();
    for line in lines {
        out.push('\n');
        out.push_str(line);
    }
    out
}
