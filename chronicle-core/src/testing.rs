//! Testing utilities for the memory manager.
//!
//! This module provides deterministic stand-ins for every external model or
//! store, so whole turns can run without network access:
//! - `ScriptedGenerator` and `ScriptedExtractor` replay canned model output
//! - `RecordingGraph` counts backend calls and can be told to fail
//! - `HashingEmbedder` is a deterministic bag-of-words embedding model
//! - `FailingEmbedder` is an embedding model that is always down
//! - `TestHarness` wires them into a `ContextAssembler`

use crate::assembler::ContextAssembler;
use crate::config::ChronicleConfig;
use crate::extractor::{parse_extraction, EntityExtractor, Extraction};
use crate::generator::{GenerationError, TextGenerator};
use crate::memory::episodic::{EmbedError, Embedder, DEFAULT_DIMENSIONS};
use crate::memory::graph::{
    EdgeTriple, EntityNode, GraphBackend, GraphError, InMemoryGraph, Label, RelationType,
};
use crate::memory::{EpisodicArchive, WorldGraph};
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Shared log of the texts a scripted adapter was called with.
pub type CallLog = Arc<Mutex<Vec<String>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A generator that returns scripted responses in order.
pub struct ScriptedGenerator {
    responses: Mutex<VecDeque<Option<String>>>,
    contexts: CallLog,
}

impl ScriptedGenerator {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(|r| Some(r.into())).collect()),
            contexts: CallLog::default(),
        }
    }

    /// A generator whose every call fails.
    pub fn failing() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            contexts: CallLog::default(),
        }
        .then_fail()
    }

    /// Queue a failure after the responses already queued.
    pub fn then_fail(self) -> Self {
        lock(&self.responses).push_back(None);
        self
    }

    /// Contexts passed to `generate`, in call order.
    pub fn contexts(&self) -> CallLog {
        Arc::clone(&self.contexts)
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        context: &str,
        _player_input: &str,
    ) -> Result<String, GenerationError> {
        lock(&self.contexts).push(context.to_string());
        let mut responses = lock(&self.responses);
        match responses.pop_front() {
            Some(Some(text)) => Ok(text),
            Some(None) => {
                // Keep failing once a failure is reached.
                responses.push_front(None);
                Err(GenerationError::Unavailable("scripted failure".to_string()))
            }
            None => Ok("The story continues.".to_string()),
        }
    }
}

/// An extractor that replays raw model responses through [`parse_extraction`].
///
/// Once the script runs out every call returns `None`.
pub struct ScriptedExtractor {
    responses: Mutex<VecDeque<String>>,
    texts: CallLog,
}

impl ScriptedExtractor {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            texts: CallLog::default(),
        }
    }

    /// An extractor that never finds anything.
    pub fn empty() -> Self {
        Self::new(Vec::<String>::new())
    }

    /// Texts passed to `extract`, in call order.
    pub fn texts(&self) -> CallLog {
        Arc::clone(&self.texts)
    }
}

#[async_trait]
impl EntityExtractor for ScriptedExtractor {
    async fn extract(&self, text: &str) -> Option<Extraction> {
        lock(&self.texts).push(text.to_string());
        let raw = lock(&self.responses).pop_front()?;
        parse_extraction(&raw)
    }
}

/// Graph backend over [`InMemoryGraph`] that counts calls.
///
/// `failing()` makes every call fail; `fail_writes_after(n)` lets `n` writes
/// through before writes start failing.
pub struct RecordingGraph {
    inner: InMemoryGraph,
    reads: Arc<AtomicUsize>,
    writes: Arc<AtomicUsize>,
    fail_reads: bool,
    write_budget: Option<usize>,
}

impl RecordingGraph {
    pub fn new() -> Self {
        Self {
            inner: InMemoryGraph::new(),
            reads: Arc::new(AtomicUsize::new(0)),
            writes: Arc::new(AtomicUsize::new(0)),
            fail_reads: false,
            write_budget: None,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_reads: true,
            write_budget: Some(0),
            ..Self::new()
        }
    }

    pub fn fail_writes_after(mut self, writes: usize) -> Self {
        self.write_budget = Some(writes);
        self
    }

    /// Counter of read calls that reached the backend.
    pub fn read_calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.reads)
    }

    /// Counter of successful writes.
    pub fn write_calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.writes)
    }

    fn read(&self) -> Result<(), GraphError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads {
            return Err(GraphError::Unavailable("scripted read failure".to_string()));
        }
        Ok(())
    }

    fn write(&self) -> Result<(), GraphError> {
        if let Some(budget) = self.write_budget {
            if self.writes.load(Ordering::SeqCst) >= budget {
                return Err(GraphError::Unavailable("scripted write failure".to_string()));
            }
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Default for RecordingGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphBackend for RecordingGraph {
    async fn merge_node(
        &mut self,
        name: &str,
        label: &Label,
        attributes: &BTreeMap<String, String>,
    ) -> Result<(), GraphError> {
        self.write()?;
        self.inner.merge_node(name, label, attributes).await
    }

    async fn merge_edge(
        &mut self,
        source: &str,
        relation: &RelationType,
        target: &str,
    ) -> Result<(), GraphError> {
        self.write()?;
        self.inner.merge_edge(source, relation, target).await
    }

    async fn incident_edges(
        &self,
        name: &str,
        limit: usize,
    ) -> Result<Vec<EdgeTriple>, GraphError> {
        self.read()?;
        self.inner.incident_edges(name, limit).await
    }

    async fn edges(&self, limit: usize) -> Result<Vec<EdgeTriple>, GraphError> {
        self.read()?;
        self.inner.edges(limit).await
    }

    async fn node(&self, name: &str) -> Result<Option<EntityNode>, GraphError> {
        self.read()?;
        self.inner.node(name).await
    }

    async fn edge_count(&self) -> Result<usize, GraphError> {
        self.read()?;
        self.inner.edge_count().await
    }

    async fn clear(&mut self) -> Result<(), GraphError> {
        self.write()?;
        self.inner.clear().await
    }
}

/// Deterministic bag-of-words embedder using signed feature hashing.
///
/// Word unigrams and bigrams are hashed into `dimensions` buckets and the
/// result is L2-normalized, so texts sharing vocabulary score high under
/// cosine similarity. It knows nothing about meaning; tests that need
/// recall use overlapping wording or a threshold of zero.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
    model_id: String,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        Self {
            dimensions,
            model_id: format!("hashing-{dimensions}"),
        }
    }

    /// Embed without going through the async trait.
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        let lower = text.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        for word in &words {
            self.add_feature(&mut vector, word.as_bytes(), 1.0);
        }
        for pair in words.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            self.add_feature(&mut vector, bigram.as_bytes(), 0.5);
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }

    fn add_feature(&self, vector: &mut [f32], feature: &[u8], weight: f32) {
        let hash = fnv1a(feature);
        let bucket = (hash % self.dimensions as u64) as usize;
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSIONS)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn encode(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        Ok(self.embed(text))
    }
}

/// 64-bit FNV-1a. Stable across platforms and releases, unlike `DefaultHasher`.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// An embedding model that is always unavailable.
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    fn model_id(&self) -> &str {
        "unavailable"
    }

    fn dimensions(&self) -> usize {
        DEFAULT_DIMENSIONS
    }

    async fn encode(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
        Err(EmbedError::Unavailable("scripted embedding failure".to_string()))
    }
}

/// A context assembler plus handles onto its scripted adapters.
pub struct TestHarness {
    pub assembler: ContextAssembler,
    /// Texts sent to the extractor.
    pub extracted: CallLog,
    /// Contexts sent to the generator.
    pub contexts: CallLog,
    pub graph_reads: Arc<AtomicUsize>,
    pub graph_writes: Arc<AtomicUsize>,
}

/// Build a harness with hashing embeddings and a recording in-memory graph.
///
/// The archive lives at `config.store_path`.
pub async fn harness(
    config: ChronicleConfig,
    extractor: ScriptedExtractor,
    generator: ScriptedGenerator,
) -> TestHarness {
    harness_with_graph(config, RecordingGraph::new(), extractor, generator).await
}

/// Like [`harness`] with a caller-configured graph backend.
pub async fn harness_with_graph(
    config: ChronicleConfig,
    graph: RecordingGraph,
    extractor: ScriptedExtractor,
    generator: ScriptedGenerator,
) -> TestHarness {
    let archive = EpisodicArchive::open(
        &config.store_path,
        Box::new(HashingEmbedder::new(config.embedding.dimensions)),
    )
    .await;

    let extracted = extractor.texts();
    let contexts = generator.contexts();
    let graph_reads = graph.read_calls();
    let graph_writes = graph.write_calls();

    let assembler = ContextAssembler::new(
        config,
        archive,
        WorldGraph::new(Box::new(graph)),
        Box::new(extractor),
        Box::new(generator),
    );

    TestHarness {
        assembler,
        extracted,
        contexts,
        graph_reads,
        graph_writes,
    }
}

impl TestHarness {
    /// Play one turn and return the generated text.
    pub async fn turn(&mut self, input: &str) -> Result<String, crate::MemoryError> {
        self.assembler.play_turn(input).await
    }

    /// Snapshot of the extractor call log.
    pub fn extracted_texts(&self) -> Vec<String> {
        lock(&self.extracted).clone()
    }

    /// Snapshot of the generator call log.
    pub fn generator_contexts(&self) -> Vec<String> {
        lock(&self.contexts).clone()
    }

    pub fn graph_reads(&self) -> usize {
        self.graph_reads.load(Ordering::SeqCst)
    }

    pub fn graph_writes(&self) -> usize {
        self.graph_writes.load(Ordering::SeqCst)
    }
}
