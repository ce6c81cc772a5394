//! Local sentence embeddings with all-MiniLM-L6-v2 on ONNX Runtime.
//!
//! Produces 384-dimensional, L2-normalized vectors on CPU. Output matches
//! sentence-transformers: attention-masked mean pooling over the last hidden
//! state.

use super::model::{ModelFiles, MINILM_MODEL_ID};
use super::{EmbedError, Embedder};
use async_trait::async_trait;
use ndarray::Array2;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::Mutex;
use tokenizers::{Tokenizer, TruncationParams};
use tracing::info;

/// Width of every all-MiniLM-L6-v2 embedding.
pub const MINILM_DIMENSIONS: usize = 384;

/// Longest input the model was trained on; longer text is truncated.
const MAX_SEQUENCE_TOKENS: usize = 256;

/// Embedder running all-MiniLM-L6-v2 in-process.
pub struct OnnxEmbedder {
    /// `Session::run` needs `&mut`.
    session: Mutex<Session>,
    tokenizer: Tokenizer,
}

impl OnnxEmbedder {
    /// Load the model, downloading it into `files` on first use.
    pub async fn load(files: &ModelFiles) -> Result<Self, EmbedError> {
        let model_path = files.ensure().await?;
        Self::from_files(&model_path, &files.tokenizer_path())
    }

    /// Load from a model and tokenizer already on disk.
    pub fn from_files(model_path: &Path, tokenizer_path: &Path) -> Result<Self, EmbedError> {
        let mut tokenizer = Tokenizer::from_file(tokenizer_path).map_err(|e| {
            EmbedError::Unavailable(format!(
                "cannot load tokenizer from {}: {e}",
                tokenizer_path.display()
            ))
        })?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_SEQUENCE_TOKENS,
                ..Default::default()
            }))
            .map_err(|e| EmbedError::Unavailable(format!("cannot configure tokenizer: {e}")))?;

        let session = Session::builder()
            .map_err(|e| EmbedError::Unavailable(format!("cannot create ONNX session: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| EmbedError::Unavailable(format!("cannot set optimization level: {e}")))?
            .with_intra_threads(1)
            .map_err(|e| EmbedError::Unavailable(format!("cannot set thread count: {e}")))?
            .commit_from_file(model_path)
            .map_err(|e| {
                EmbedError::Unavailable(format!(
                    "cannot load ONNX model from {}: {e}",
                    model_path.display()
                ))
            })?;

        info!(model = %model_path.display(), "embedding model loaded");
        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
        })
    }

    /// Embed one text synchronously.
    pub fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| EmbedError::Inference(format!("tokenization failed: {e}")))?;

        let to_i64 = |values: &[u32]| values.iter().map(|&v| i64::from(v)).collect::<Vec<_>>();
        let input_ids = to_i64(encoding.get_ids());
        let attention_mask = to_i64(encoding.get_attention_mask());
        let token_type_ids = to_i64(encoding.get_type_ids());
        let seq_len = input_ids.len();

        let input_ids = row(input_ids, seq_len)?;
        let mask = row(attention_mask.clone(), seq_len)?;
        let token_type_ids = row(token_type_ids, seq_len)?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| EmbedError::Inference(format!("ONNX session poisoned: {e}")))?;

        let outputs = session
            .run(ort::inputs![
                "input_ids" => tensor(&input_ids)?,
                "attention_mask" => tensor(&mask)?,
                "token_type_ids" => tensor(&token_type_ids)?
            ])
            .map_err(|e| EmbedError::Inference(format!("ONNX inference failed: {e}")))?;

        // last_hidden_state: [1, seq_len, hidden]
        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedError::Inference(format!("unexpected ONNX output: {e}")))?;
        let hidden = shape.last().copied().unwrap_or(0) as usize;

        let pooled = mean_pool(data, &attention_mask, seq_len, hidden);
        if pooled.len() != MINILM_DIMENSIONS {
            return Err(EmbedError::Dimension {
                expected: MINILM_DIMENSIONS,
                found: pooled.len(),
            });
        }
        Ok(l2_normalize(pooled))
    }
}

fn row(values: Vec<i64>, seq_len: usize) -> Result<Array2<i64>, EmbedError> {
    Array2::from_shape_vec((1, seq_len), values)
        .map_err(|e| EmbedError::Inference(format!("bad input shape: {e}")))
}

fn tensor(array: &Array2<i64>) -> Result<TensorRef<'_, i64>, EmbedError> {
    TensorRef::from_array_view(array)
        .map_err(|e| EmbedError::Inference(format!("cannot build input tensor: {e}")))
}

/// Mean of the token vectors whose attention mask is set.
fn mean_pool(
    embeddings: &[f32],
    attention_mask: &[i64],
    seq_len: usize,
    hidden: usize,
) -> Vec<f32> {
    let mut sum = vec![0.0f32; hidden];
    let mut count = 0.0f32;

    for (token, &mask) in attention_mask.iter().enumerate().take(seq_len) {
        if mask == 0 {
            continue;
        }
        let start = token * hidden;
        let Some(values) = embeddings.get(start..start + hidden) else {
            break;
        };
        for (acc, v) in sum.iter_mut().zip(values) {
            *acc += v;
        }
        count += 1.0;
    }

    if count > 0.0 {
        for v in &mut sum {
            *v /= count;
        }
    }
    sum
}

fn l2_normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

#[async_trait]
impl Embedder for OnnxEmbedder {
    fn model_id(&self) -> &str {
        MINILM_MODEL_ID
    }

    fn dimensions(&self) -> usize {
        MINILM_DIMENSIONS
    }

    async fn encode(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.embed(text)
    }
}
