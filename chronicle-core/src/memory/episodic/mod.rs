//! Episodic memory: every past turn, searchable by meaning.
//!
//! Records are appended with an embedding computed once at insertion. The
//! whole archive is rewritten to a pretty-printed JSON file after every
//! mutation, so a committed turn survives a crash.
//!
//! Search is a linear cosine scan over all records. That is fine for a single
//! play session; it is also the first thing to replace if archives grow to
//! many thousands of episodes.

mod embedder;
mod model;
mod onnx;
mod record;

pub use embedder::{ApiEmbedder, EmbedError, Embedder, DEFAULT_DIMENSIONS};
pub use model::{ModelFiles, MINILM_MODEL_ID};
pub use onnx::{OnnxEmbedder, MINILM_DIMENSIONS};
pub use record::{cosine_similarity, EpisodicHit, EpisodicRecord, RecordMetadata};

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};

/// Errors from episodic archive operations.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbedError),

    #[error("Failed to persist episodic archive to {}: {message}", path.display())]
    Persistence { path: PathBuf, message: String },
}

impl ArchiveError {
    /// Whether the in-memory state is intact and only the disk copy is stale.
    pub fn is_persistence(&self) -> bool {
        matches!(self, ArchiveError::Persistence { .. })
    }
}

/// Append-only store of turn summaries with semantic search.
pub struct EpisodicArchive {
    path: PathBuf,
    records: Vec<EpisodicRecord>,
    embedder: Box<dyn Embedder>,
}

impl EpisodicArchive {
    /// Open the archive at `path`, loading whatever is already there.
    ///
    /// A missing or corrupt file yields an empty archive. Records written by
    /// a different embedding model are dropped.
    pub async fn open(path: impl Into<PathBuf>, embedder: Box<dyn Embedder>) -> Self {
        let path = path.into();
        let records = load_records(&path, embedder.as_ref()).await;
        info!(
            path = %path.display(),
            records = records.len(),
            model = embedder.model_id(),
            "episodic archive opened"
        );
        Self {
            path,
            records,
            embedder,
        }
    }

    /// Embed `text`, append it, and rewrite the file.
    ///
    /// On [`ArchiveError::Persistence`] the record is still held in memory.
    pub async fn add(
        &mut self,
        text: impl Into<String>,
        mut metadata: RecordMetadata,
    ) -> Result<(), ArchiveError> {
        let text = text.into();
        let embedding = self.embedder.encode(&text).await?;
        if embedding.len() != self.embedder.dimensions() {
            return Err(EmbedError::Dimension {
                expected: self.embedder.dimensions(),
                found: embedding.len(),
            }
            .into());
        }

        if metadata.model.is_none() {
            metadata.model = Some(self.embedder.model_id().to_string());
        }

        self.records.push(EpisodicRecord {
            text,
            embedding,
            metadata,
        });
        debug!(records = self.records.len(), "episode archived");
        self.persist().await
    }

    /// Top-`k` records by cosine similarity to `text`, best first.
    ///
    /// Equal scores keep archive order.
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<EpisodicHit>, ArchiveError> {
        if k == 0 || self.records.is_empty() {
            return Ok(Vec::new());
        }

        let query = self.embedder.encode(text).await?;

        let mut scored: Vec<(usize, f32)> = self
            .records
            .iter()
            .enumerate()
            .map(|(i, r)| (i, cosine_similarity(&query, &r.embedding)))
            .collect();
        // sort_by is stable, so ties stay in insertion order
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| {
                let record = &self.records[i];
                EpisodicHit {
                    text: record.text.clone(),
                    score,
                    metadata: record.metadata.clone(),
                }
            })
            .collect())
    }

    /// The last `n` records, oldest first.
    pub fn recent(&self, n: usize) -> &[EpisodicRecord] {
        let start = self.records.len().saturating_sub(n);
        &self.records[start..]
    }

    pub fn records(&self) -> &[EpisodicRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    /// Rewrite the whole archive file.
    pub async fn persist(&self) -> Result<(), ArchiveError> {
        let result = match serde_json::to_string_pretty(&self.records) {
            Ok(content) => fs::write(&self.path, content)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        result.map_err(|message| {
            warn!(
                path = %self.path.display(),
                error = %message,
                "failed to persist episodic archive"
            );
            ArchiveError::Persistence {
                path: self.path.clone(),
                message,
            }
        })
    }

    /// Drop every record and persist the empty archive.
    pub async fn reset(&mut self) -> Result<(), ArchiveError> {
        self.records.clear();
        info!(path = %self.path.display(), "episodic archive reset");
        self.persist().await
    }
}

async fn load_records(path: &Path, embedder: &dyn Embedder) -> Vec<EpisodicRecord> {
    let content = match fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no episodic archive on disk");
            return Vec::new();
        }
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "unreadable episodic archive, starting empty"
            );
            return Vec::new();
        }
    };

    let records: Vec<EpisodicRecord> = match serde_json::from_str(&content) {
        Ok(r) => r,
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "corrupt episodic archive, starting empty"
            );
            return Vec::new();
        }
    };

    let total = records.len();
    let kept: Vec<_> = records
        .into_iter()
        .filter(|r| belongs_to(r, embedder))
        .collect();
    if kept.len() != total {
        warn!(
            dropped = total - kept.len(),
            model = embedder.model_id(),
            "dropped episodic records from a different embedding model"
        );
    }
    kept
}

fn belongs_to(record: &EpisodicRecord, embedder: &dyn Embedder) -> bool {
    record.embedding.len() == embedder.dimensions()
        && record
            .metadata
            .model
            .as_deref()
            .map_or(true, |m| m == embedder.model_id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingEmbedder, HashingEmbedder};
    use tempfile::TempDir;

    async fn open_in(dir: &TempDir) -> EpisodicArchive {
        EpisodicArchive::open(
            dir.path().join("episodic_store.json"),
            Box::new(HashingEmbedder::default()),
        )
        .await
    }

    #[tokio::test]
    async fn test_open_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let archive = open_in(&dir).await;
        assert!(archive.is_empty());
    }

    #[tokio::test]
    async fn test_query_empty_archive() {
        let dir = TempDir::new().unwrap();
        let archive = open_in(&dir).await;
        assert!(archive.query("anything", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_query_zero_k() {
        let dir = TempDir::new().unwrap();
        let mut archive = open_in(&dir).await;
        archive
            .add("Player: go north\nDM: A cave.", RecordMetadata::now())
            .await
            .unwrap();
        assert!(archive.query("go north", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_query_bounded_and_sorted() {
        let dir = TempDir::new().unwrap();
        let mut archive = open_in(&dir).await;
        let texts = [
            "Player: attack the goblin\nDM: The goblin dodges.",
            "Player: open the chest\nDM: It is full of gold.",
            "Player: talk to the goblin\nDM: The goblin snarls.",
            "Player: go north\nDM: You reach a river.",
        ];
        for t in texts {
            archive.add(t, RecordMetadata::now()).await.unwrap();
        }

        for k in 1..=6 {
            let hits = archive.query("the goblin", k).await.unwrap();
            assert!(hits.len() <= k);
            assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
            assert!(hits.iter().all(|h| texts.contains(&h.text.as_str())));
        }

        let best = &archive.query("talk to the goblin", 1).await.unwrap()[0];
        assert!(best.text.contains("talk to the goblin"));
    }

    #[tokio::test]
    async fn test_ties_keep_insertion_order() {
        let dir = TempDir::new().unwrap();
        let mut archive = open_in(&dir).await;
        for i in 0..3 {
            let meta = RecordMetadata::now().with_extra("seq", i);
            archive
                .add("Player: wait\nDM: Nothing happens.", meta)
                .await
                .unwrap();
        }

        let hits = archive.query("wait", 3).await.unwrap();
        let seqs: Vec<_> = hits.iter().map(|h| h.metadata.extra["seq"].clone()).collect();
        assert_eq!(
            seqs,
            vec![serde_json::json!(0), serde_json::json!(1), serde_json::json!(2)]
        );
    }

    #[tokio::test]
    async fn test_persist_and_reload_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut archive = open_in(&dir).await;
        archive
            .add(
                "Player: light torch\nDM: The cave is now lit.",
                RecordMetadata::now().with_extra("turn", 2),
            )
            .await
            .unwrap();
        archive
            .add("Player: go north\nDM: You enter a cave.", RecordMetadata::now())
            .await
            .unwrap();
        let before = archive.records().to_vec();

        let reloaded = open_in(&dir).await;
        assert_eq!(reloaded.len(), 2);
        for (a, b) in before.iter().zip(reloaded.records()) {
            assert_eq!(a.text, b.text);
            assert_eq!(a.metadata, b.metadata);
            assert!(a
                .embedding
                .iter()
                .zip(&b.embedding)
                .all(|(x, y)| (x - y).abs() < 1e-6));
        }
    }

    #[tokio::test]
    async fn test_corrupt_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("episodic_store.json");
        std::fs::write(&path, "[{\"text\": \"truncated").unwrap();

        let archive = EpisodicArchive::open(&path, Box::new(HashingEmbedder::default())).await;
        assert!(archive.is_empty());
    }

    #[tokio::test]
    async fn test_foreign_model_records_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("episodic_store.json");
        {
            let mut archive =
                EpisodicArchive::open(&path, Box::new(HashingEmbedder::new(32))).await;
            archive
                .add("Player: a\nDM: b", RecordMetadata::now())
                .await
                .unwrap();
        }

        let archive = EpisodicArchive::open(&path, Box::new(HashingEmbedder::new(64))).await;
        assert!(archive.is_empty());

        let archive = EpisodicArchive::open(&path, Box::new(HashingEmbedder::new(32))).await;
        assert_eq!(archive.len(), 1);
    }

    #[tokio::test]
    async fn test_persistence_failure_keeps_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing-dir").join("episodic_store.json");
        let mut archive =
            EpisodicArchive::open(&path, Box::new(HashingEmbedder::default())).await;

        let err = archive
            .add("Player: x\nDM: y", RecordMetadata::now())
            .await
            .unwrap_err();
        assert!(err.is_persistence());
        assert_eq!(archive.len(), 1);
    }

    #[tokio::test]
    async fn test_embedding_failure_appends_nothing() {
        let dir = TempDir::new().unwrap();
        let mut archive = EpisodicArchive::open(
            dir.path().join("episodic_store.json"),
            Box::new(FailingEmbedder),
        )
        .await;

        let err = archive
            .add("Player: x\nDM: y", RecordMetadata::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Embedding(_)));
        assert!(archive.is_empty());
    }

    #[tokio::test]
    async fn test_recent_and_reset() {
        let dir = TempDir::new().unwrap();
        let mut archive = open_in(&dir).await;
        for i in 0..5 {
            archive
                .add(format!("Player: {i}\nDM: ok"), RecordMetadata::now())
                .await
                .unwrap();
        }

        let recent: Vec<_> = archive.recent(3).iter().map(|r| r.text.clone()).collect();
        assert_eq!(recent[0], "Player: 2\nDM: ok");
        assert_eq!(recent.len(), 3);
        assert_eq!(archive.recent(10).len(), 5);

        archive.reset().await.unwrap();
        assert!(archive.is_empty());
        assert!(open_in(&dir).await.is_empty());
    }
}
