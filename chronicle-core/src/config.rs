//! Session configuration.
//!
//! Everything has a default, so an empty environment gives a working local
//! setup: all-MiniLM-L6-v2 embeddings on CPU and an in-memory graph. The
//! model is downloaded into `EMBEDDING_DATA_DIR` the first time it is needed.

use crate::memory::episodic::{
    ApiEmbedder, EmbedError, Embedder, ModelFiles, OnnxEmbedder, DEFAULT_DIMENSIONS,
    MINILM_DIMENSIONS,
};
use crate::memory::graph::{GraphError, Neo4jConfig, Neo4jGraph};
use crate::memory::WorldGraph;
use chat::Chat;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors from reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },

    #[error("Missing required setting {0}")]
    Missing(&'static str),

    #[error(transparent)]
    Client(#[from] chat::Error),

    #[error(transparent)]
    Embedding(#[from] EmbedError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Which embedding model the episodic archive uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbeddingProvider {
    /// all-MiniLM-L6-v2 on ONNX Runtime, in-process.
    #[default]
    Onnx,
    /// OpenAI-compatible `/embeddings` endpoint.
    Api,
}

impl FromStr for EmbeddingProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "onnx" | "local" | "minilm" => Ok(Self::Onnx),
            "api" | "openai" => Ok(Self::Api),
            other => Err(format!("unknown embedding provider '{other}'")),
        }
    }
}

/// Embedding model settings.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingProvider,
    /// Model name sent to the API provider.
    pub model: String,
    pub dimensions: usize,
    pub api_base: Option<String>,
    pub api_key: Option<String>,
    /// Where the local model is cached, under `models/`.
    pub data_dir: PathBuf,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Onnx,
            model: "text-embedding-3-small".to_string(),
            dimensions: DEFAULT_DIMENSIONS,
            api_base: None,
            api_key: None,
            data_dir: PathBuf::from(".chronicle"),
        }
    }
}

/// Configuration for the memory manager.
#[derive(Debug, Clone)]
pub struct ChronicleConfig {
    /// Episodic hits requested per turn.
    pub episodic_k: usize,

    /// Turns kept verbatim in the recency buffer.
    pub working_capacity: usize,

    /// Minimum cosine score for an episodic hit to reach the context.
    pub similarity_threshold: f32,

    /// Entities whose neighborhood is always included.
    pub anchor_entities: Vec<String>,

    /// File backing the episodic archive.
    pub store_path: PathBuf,

    /// Edges per entity in the turn context.
    pub neighborhood_limit: usize,

    /// Edges in the whole-graph summary.
    pub summary_limit: usize,

    /// Characters of each episode shown in previews.
    pub preview_len: usize,

    /// Episodes shown by the general context view.
    pub recent_episodes: usize,

    pub embedding: EmbeddingSettings,

    /// `None` keeps the graph in memory.
    pub neo4j: Option<Neo4jConfig>,
}

impl Default for ChronicleConfig {
    fn default() -> Self {
        Self {
            episodic_k: 5,
            working_capacity: 6,
            similarity_threshold: 0.7,
            anchor_entities: vec!["Kael".to_string()],
            store_path: PathBuf::from("episodic_store.json"),
            neighborhood_limit: 5,
            summary_limit: 50,
            preview_len: 300,
            recent_episodes: 3,
            embedding: EmbeddingSettings::default(),
            neo4j: None,
        }
    }
}

impl ChronicleConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_episodic_k(mut self, k: usize) -> Self {
        self.episodic_k = k;
        self
    }

    pub fn with_working_capacity(mut self, capacity: usize) -> Self {
        self.working_capacity = capacity;
        self
    }

    pub fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_anchor_entities<I, S>(mut self, anchors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.anchor_entities = anchors.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = path.into();
        self
    }

    pub fn with_embedding(mut self, embedding: EmbeddingSettings) -> Self {
        self.embedding = embedding;
        self
    }

    pub fn with_neo4j(mut self, neo4j: Neo4jConfig) -> Self {
        self.neo4j = Some(neo4j);
        self
    }

    /// Read configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(k) = parse(&get, "EPISODIC_K")? {
            config.episodic_k = k;
        }
        if let Some(capacity) = parse(&get, "WORKING_CAPACITY")? {
            config.working_capacity = capacity;
        }
        if let Some(threshold) = parse::<f32, _>(&get, "SIMILARITY_THRESHOLD")? {
            if !threshold.is_finite() {
                return Err(ConfigError::Invalid {
                    key: "SIMILARITY_THRESHOLD",
                    message: "must be a finite number".to_string(),
                });
            }
            config.similarity_threshold = threshold;
        }
        if let Some(anchors) = get("ANCHOR_ENTITIES") {
            config.anchor_entities = anchors
                .split(',')
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(path) = get("EPISODIC_STORE_PATH") {
            config.store_path = PathBuf::from(path);
        }

        if let Some(provider) = get("EMBEDDING_PROVIDER") {
            config.embedding.provider = provider
                .parse()
                .map_err(|message| ConfigError::Invalid {
                    key: "EMBEDDING_PROVIDER",
                    message,
                })?;
        }
        if let Some(model) = get("EMBEDDING_MODEL") {
            config.embedding.model = model;
        }
        if let Some(dimensions) = parse::<usize, _>(&get, "EMBEDDING_DIM")? {
            if dimensions == 0 {
                return Err(ConfigError::Invalid {
                    key: "EMBEDDING_DIM",
                    message: "must be positive".to_string(),
                });
            }
            config.embedding.dimensions = dimensions;
        }
        config.embedding.api_base = get("EMBEDDING_API_BASE");
        config.embedding.api_key = get("EMBEDDING_API_KEY");
        if let Some(dir) = get("EMBEDDING_DATA_DIR") {
            config.embedding.data_dir = PathBuf::from(dir);
        }

        if let Some(uri) = get("NEO4J_URI") {
            let user = get("NEO4J_USER").unwrap_or_else(|| "neo4j".to_string());
            let password = get("NEO4J_PASSWORD").ok_or(ConfigError::Missing("NEO4J_PASSWORD"))?;
            let mut neo4j = Neo4jConfig::new(uri, user, password);
            if let Some(database) = get("NEO4J_DATABASE") {
                neo4j = neo4j.with_database(database);
            }
            if let Some(secs) = parse::<u64, _>(&get, "NEO4J_TIMEOUT_SECS")? {
                neo4j = neo4j.with_timeout(Duration::from_secs(secs));
            }
            config.neo4j = Some(neo4j);
        }

        Ok(config)
    }

    /// The embedder selected by [`EmbeddingSettings::provider`].
    ///
    /// The local model is downloaded on first use. The API provider falls
    /// back to the chat client's environment when no dedicated embedding
    /// endpoint or key is configured.
    pub async fn build_embedder(&self) -> Result<Box<dyn Embedder>, ConfigError> {
        let settings = &self.embedding;
        match settings.provider {
            EmbeddingProvider::Onnx => {
                if settings.dimensions != MINILM_DIMENSIONS {
                    return Err(ConfigError::Invalid {
                        key: "EMBEDDING_DIM",
                        message: format!(
                            "the local model produces {MINILM_DIMENSIONS} dimensions, not {}",
                            settings.dimensions
                        ),
                    });
                }
                let files = ModelFiles::new(&settings.data_dir);
                Ok(Box::new(OnnxEmbedder::load(&files).await?))
            }
            EmbeddingProvider::Api => {
                let client = match (&settings.api_key, &settings.api_base) {
                    (Some(key), Some(base)) => Chat::new(key)?.with_api_base(base),
                    (None, Some(base)) => Chat::anonymous(base)?,
                    (Some(key), None) => Chat::new(key)?,
                    (None, None) => Chat::from_env()?,
                };
                Ok(Box::new(ApiEmbedder::new(
                    client,
                    settings.model.clone(),
                    settings.dimensions,
                )))
            }
        }
    }

    /// A world graph on Neo4j when configured, otherwise in memory.
    pub fn build_graph(&self) -> Result<WorldGraph, ConfigError> {
        match &self.neo4j {
            Some(neo4j) => Ok(WorldGraph::new(Box::new(Neo4jGraph::new(neo4j.clone())?))),
            None => Ok(WorldGraph::in_memory()),
        }
    }
}

fn parse<T, G>(get: &G, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|raw| {
            raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                message: format!("'{raw}': {e}"),
            })
        })
        .transpose()
}
