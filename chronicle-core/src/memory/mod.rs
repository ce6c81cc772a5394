//! The three memory stores.
//!
//! - [`RecencyBuffer`]: the last few turns, verbatim (working memory)
//! - [`EpisodicArchive`]: every turn, searchable by semantic similarity
//! - [`WorldGraph`]: entities and relationships extracted from the narrative
//!
//! The stores are independent. They describe the same events at different
//! granularities and are only kept consistent on a best-effort basis.

pub mod episodic;
pub mod graph;
mod recency;
mod turn;

pub use episodic::{ArchiveError, EpisodicArchive, EpisodicHit, EpisodicRecord, RecordMetadata};
pub use graph::{GraphError, WorldGraph};
pub use recency::RecencyBuffer;
pub use turn::{episode_text, Turn};
