//! Working memory for an AI Dungeon Master.
//!
//! This crate provides:
//! - A bounded recency buffer of the latest turns
//! - An episodic archive searchable by embedding similarity
//! - A world graph of entities and relationships (in memory or Neo4j)
//! - A context assembler that fuses all three into each turn's prompt
//!
//! # Quick Start
//!
//! ```ignore
//! use chronicle_core::{
//!     ChronicleConfig, ContextAssembler, EpisodicArchive, LlmExtractor, LlmGenerator,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ChronicleConfig::from_env()?;
//!     let chat = chat::Chat::from_env()?;
//!
//!     let embedder = config.build_embedder().await?;
//!     let archive = EpisodicArchive::open(&config.store_path, embedder).await;
//!     let graph = config.build_graph()?;
//!     let mut memory = ContextAssembler::new(
//!         config,
//!         archive,
//!         graph,
//!         Box::new(LlmExtractor::new(chat.clone())),
//!         Box::new(LlmGenerator::new(chat)),
//!     );
//!
//!     let narration = memory.play_turn("start").await?;
//!     println!("{narration}");
//!     Ok(())
//! }
//! ```

pub mod assembler;
pub mod config;
pub mod extractor;
pub mod generator;
pub mod memory;
pub mod testing;

// Primary public API
pub use assembler::{AdapterError, ContextAssembler, MemoryError, MemoryReport, TurnPhase};
pub use config::{ChronicleConfig, ConfigError, EmbeddingProvider, EmbeddingSettings};
pub use extractor::{
    parse_extraction, EntityExtractor, ExtractedEntity, ExtractedRelationship, Extraction,
    LlmExtractor,
};
pub use generator::{GenerationError, LlmGenerator, TextGenerator};
pub use memory::episodic::{ApiEmbedder, EmbedError, Embedder, ModelFiles, OnnxEmbedder};
pub use memory::graph::{GraphBackend, InMemoryGraph, Neo4jConfig, Neo4jGraph};
pub use memory::{
    ArchiveError, EpisodicArchive, EpisodicHit, EpisodicRecord, GraphError, RecencyBuffer,
    RecordMetadata, Turn, WorldGraph,
};
pub use testing::{harness, HashingEmbedder, ScriptedExtractor, ScriptedGenerator, TestHarness};
