//! Local copy of the sentence-embedding model.
//!
//! The ONNX export of all-MiniLM-L6-v2 and its tokenizer are fetched from
//! HuggingFace the first time they are needed and reused afterwards.

use super::EmbedError;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

/// Directory name of the model under `<data_dir>/models`.
pub const MINILM_MODEL_ID: &str = "all-MiniLM-L6-v2";

const MODEL_URL: &str =
    "https://huggingface.co/onnx-community/all-MiniLM-L6-v2-ONNX/resolve/main/onnx/model_quantized.onnx";
const TOKENIZER_URL: &str =
    "https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2/resolve/main/tokenizer.json";

/// Resolves, and on first use downloads, the model files under a data directory.
#[derive(Debug, Clone)]
pub struct ModelFiles {
    data_dir: PathBuf,
}

impl ModelFiles {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn model_dir(&self) -> PathBuf {
        self.data_dir.join("models").join(MINILM_MODEL_ID)
    }

    pub fn model_path(&self) -> PathBuf {
        self.model_dir().join("model.onnx")
    }

    pub fn tokenizer_path(&self) -> PathBuf {
        self.model_dir().join("tokenizer.json")
    }

    pub fn is_available(&self) -> bool {
        self.model_path().exists() && self.tokenizer_path().exists()
    }

    /// Path to `model.onnx`, downloading whatever is missing first.
    pub async fn ensure(&self) -> Result<PathBuf, EmbedError> {
        if self.is_available() {
            return Ok(self.model_path());
        }

        let model_dir = self.model_dir();
        info!(dir = %model_dir.display(), "embedding model not found, downloading");
        fs::create_dir_all(&model_dir).await.map_err(|e| {
            EmbedError::Unavailable(format!("cannot create {}: {e}", model_dir.display()))
        })?;

        for (file, url) in [("model.onnx", MODEL_URL), ("tokenizer.json", TOKENIZER_URL)] {
            let dest = model_dir.join(file);
            if dest.exists() {
                continue;
            }
            match download(url, &dest).await {
                Ok(size) => info!(file, bytes = size, "downloaded"),
                Err(e) => {
                    // partial files would look like a finished download next time
                    let _ = fs::remove_file(&dest).await;
                    return Err(e);
                }
            }
        }

        Ok(self.model_path())
    }
}

async fn download(url: &str, dest: &Path) -> Result<usize, EmbedError> {
    let response = reqwest::get(url)
        .await
        .map_err(|e| EmbedError::Unavailable(format!("download of {url} failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(EmbedError::Unavailable(format!(
            "download of {url} failed with status {status}"
        )));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| EmbedError::Unavailable(format!("reading {url} failed: {e}")))?;

    fs::write(dest, &bytes)
        .await
        .map_err(|e| EmbedError::Unavailable(format!("cannot write {}: {e}", dest.display())))?;
    Ok(bytes.len())
}
