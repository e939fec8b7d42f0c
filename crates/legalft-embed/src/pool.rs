use anyhow::{anyhow, Result};
use candle_core::{DType, Tensor};
use serde::Deserialize;
use std::path::Path;

/// Pooling applied to the encoder's token states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pooling {
    Cls,
    Mean,
}

#[derive(Deserialize)]
struct PoolingConfig {
    #[serde(default)]
    pooling_mode_cls_token: bool,
    #[serde(default)]
    pooling_mode_mean_tokens: bool,
}

impl Pooling {
    /// Read a sentence-transformers `1_Pooling/config.json`.
    pub fn from_config_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let cfg: PoolingConfig = serde_json::from_str(&raw)?;
        match (cfg.pooling_mode_cls_token, cfg.pooling_mode_mean_tokens) {
            (true, _) => Ok(Pooling::Cls),
            (false, true) => Ok(Pooling::Mean),
            _ => Err(anyhow!("unsupported pooling mode in {}", path.display())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self { Pooling::Cls => "cls", Pooling::Mean => "mean" }
    }

    /// `[B,T,H]` hidden states to `[B,H]` sentence embeddings (not normalized).
    pub fn apply(&self, hidden: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
        match self {
            Pooling::Cls => cls_pool(hidden),
            Pooling::Mean => mean_pool(hidden, attention_mask),
        }
    }
}

pub fn cls_pool(hidden: &Tensor) -> Result<Tensor> {
    hidden.dims3()?;
    Ok(hidden.narrow(1, 0, 1)?.squeeze(1)?)
}

pub fn mean_pool(hidden: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
    let (_, _, hidden_dim) = hidden.dims3()?;

    let mask = attention_mask.to_device(hidden.device())?.to_dtype(hidden.dtype())?;
    let mask_3d = mask.unsqueeze(2)?;
    let mask_broadcast = mask_3d.broadcast_as(hidden.shape()).or_else(|_| mask_3d.repeat((1, 1, hidden_dim)))?;
    let masked = (hidden * &mask_broadcast)?;
    let sum = masked.sum(1)?;
    let lengths = mask.sum(1)?.unsqueeze(1)?.to_dtype(sum.dtype())?;
    Ok(sum.broadcast_div(&lengths)?)
}

/// Row-wise L2 normalization of a `[B,D]` tensor.
pub fn l2_normalize(x: &Tensor) -> Result<Tensor> {
    let eps_val = match x.dtype() { DType::F16 | DType::BF16 => 1e-6f64, _ => 1e-12f64 };
    let norm = x.sqr()?.sum_keepdim(1)?.sqrt()?.affine(1.0, eps_val)?;
    Ok(x.broadcast_div(&norm)?)
}

/// Keep the first `dim` components of each embedding.
pub fn truncate_dim(x: &Tensor, dim: usize) -> Result<Tensor> {
    let width = x.dim(1)?;
    if dim > width { return Err(anyhow!("cannot truncate {}-dim embeddings to {}", width, dim)); }
    Ok(x.narrow(1, 0, dim)?)
}
