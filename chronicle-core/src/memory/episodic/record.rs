//! Record shapes stored in and returned by the episodic archive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata attached to an archived episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// When the episode happened.
    pub timestamp: DateTime<Utc>,

    /// Embedding model that produced the stored vector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Free-form extra fields, kept verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl RecordMetadata {
    /// Metadata stamped with the current time.
    pub fn now() -> Self {
        Self::at(Utc::now())
    }

    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            model: None,
            extra: BTreeMap::new(),
        }
    }

    /// Attach an extra field.
    pub fn with_extra(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// One archived episode. Identity is its position in the archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodicRecord {
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: RecordMetadata,
}

/// A record matched by a semantic query.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodicHit {
    pub text: String,
    /// Cosine similarity to the query, in `[-1, 1]`.
    pub score: f32,
    pub metadata: RecordMetadata,
}

/// Cosine similarity of two vectors.
///
/// Returns 0.0 for vectors of different length or with zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
