//! Trainable sentence encoder on candle.
//!
//! `SentenceEncoder` loads a BERT checkpoint (hub id or local directory) into a
//! `VarMap`, pools token states the way the checkpoint's sentence-transformers
//! config says, and saves back to the same on-disk layout.

use anyhow::Result;
use candle_core::{Device, Tensor, Var};
use std::path::Path;

pub use legalft_core::traits::Embedder;

pub mod device;
pub mod model;
pub mod pool;
pub mod source;
pub mod tokenize;

pub use device::select_device;
pub use model::SentenceEncoder;
pub use pool::{l2_normalize, truncate_dim, Pooling};
pub use source::ModelFiles;

/// Static facts about an encoder, used for the model card.
#[derive(Debug, Clone)]
pub struct EncoderInfo {
    pub base_model: String,
    pub pooling: String,
    pub hidden_size: usize,
    pub max_seq_len: usize,
}

/// An encoder the trainer can optimize.
pub trait TrainableEncoder: Embedder {
    /// Pooled, unnormalized `[B,H]` embeddings with the autograd graph attached.
    fn encode(&self, texts: &[&str]) -> Result<Tensor>;
    /// Trainable parameters by name.
    fn named_vars(&self) -> Result<Vec<(String, Var)>>;
    fn device(&self) -> &Device;
    /// Write weights and side files into `dir`.
    fn save(&self, dir: &Path) -> Result<()>;
    fn info(&self) -> EncoderInfo;
}

/// Deterministic hashed bag-of-words embedder for tests and dry runs.
pub struct FakeEmbedder { dim: usize }

impl FakeEmbedder { pub fn new(dim: usize) -> Self { Self { dim } } }

impl FakeEmbedder {
    /// Empty when the embedder was built with `dim == 0`.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        use std::hash::{Hash, Hasher};
        use twox_hash::XxHash64;
        if self.dim == 0 { return Vec::new(); }
        let mut v = vec![0f32; self.dim];
        for (i, token) in text.split_whitespace().enumerate() {
            let mut hasher = XxHash64::with_seed(0);
            token.to_lowercase().hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h as usize) % self.dim;
            let val = (((h >> 32) as u32) as f32) / (u32::MAX as f32);
            v[idx] += val + (i as f32 % 3.0) * 0.01;
        }
        let norm = (v.iter().map(|x| x * x).sum::<f32>()).sqrt().max(1e-6);
        for x in &mut v { *x /= norm; }
        v
    }
}

impl Embedder for FakeEmbedder {
    fn dim(&self) -> usize { self.dim }
    fn max_len(&self) -> usize { usize::MAX }
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.dim == 0 { anyhow::bail!("fake embedder needs a non-zero dimension"); }
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}
