use anyhow::{anyhow, Context, Result};
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{VarBuilder, VarMap};
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use serde::Deserialize;
use std::path::Path;
use tokenizers::Tokenizer;
use tracing::info;

use legalft_core::traits::Embedder;

use crate::pool::{l2_normalize, Pooling};
use crate::source::ModelFiles;
use crate::tokenize::{prepare_tokenizer, tokenize_batch};
use crate::{EncoderInfo, TrainableEncoder};

#[derive(Deserialize)]
struct ModelDims {
    hidden_size: usize,
    max_position_embeddings: usize,
    #[serde(default)]
    model_type: Option<String>,
}

#[derive(Deserialize)]
struct SentenceBertConfig {
    max_seq_length: usize,
}

/// A BERT encoder plus pooling whose weights live in a `VarMap`, so every
/// parameter is trainable.
pub struct SentenceEncoder {
    model: BertModel,
    tokenizer: Tokenizer,
    pad_id: u32,
    varmap: VarMap,
    device: Device,
    pooling: Pooling,
    max_seq_len: usize,
    hidden_size: usize,
    model_id: String,
    files: ModelFiles,
}

impl SentenceEncoder {
    /// Resolve `model_id` (local dir or hub id) and load it onto `device`.
    pub fn load(model_id: &str, revision: &str, fallback_max_seq_len: usize, device: Device) -> Result<Self> {
        let files = ModelFiles::resolve(model_id, revision)?;
        Self::from_files(model_id, files, fallback_max_seq_len, device)
    }

    pub fn from_files(model_id: &str, files: ModelFiles, fallback_max_seq_len: usize, device: Device) -> Result<Self> {
        let raw_config = std::fs::read_to_string(&files.config)
            .with_context(|| format!("Failed to read {}", files.config.display()))?;
        let config: BertConfig = serde_json::from_str(&raw_config)?;
        let dims: ModelDims = serde_json::from_str(&raw_config)?;

        let max_seq_len = match files.extra("sentence_bert_config.json") {
            Some(p) => serde_json::from_str::<SentenceBertConfig>(&std::fs::read_to_string(p)?)?.max_seq_length,
            None => fallback_max_seq_len,
        }
        .min(dims.max_position_embeddings);

        let mut tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", files.tokenizer.display(), e))?;
        let pad_id = prepare_tokenizer(&mut tokenizer, max_seq_len)?;

        let pooling = match files.extra("1_Pooling/config.json") {
            Some(p) => Pooling::from_config_file(p)?,
            None => Pooling::Cls,
        };

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = BertModel::load(vb, &config)?;
        load_pretrained(&varmap, &files.weights, dims.model_type.as_deref(), &device)?;
        info!(
            model = model_id,
            hidden = dims.hidden_size,
            max_seq_len,
            pooling = pooling.as_str(),
            "Loaded model"
        );

        Ok(Self {
            model,
            tokenizer,
            pad_id,
            varmap,
            device,
            pooling,
            max_seq_len,
            hidden_size: dims.hidden_size,
            model_id: model_id.to_string(),
            files,
        })
    }

    pub fn pooling(&self) -> Pooling { self.pooling }
}

/// Copy pretrained tensors into the trainable variables. Checkpoints may
/// prefix names with `bert.` or the config's `model_type`.
fn load_pretrained(varmap: &VarMap, weights: &Path, model_type: Option<&str>, device: &Device) -> Result<()> {
    let tensors = candle_core::safetensors::load(weights, device)
        .with_context(|| format!("Failed to read weights from {}", weights.display()))?;
    let data = varmap.data().lock().map_err(|_| anyhow!("variable map lock poisoned"))?;
    for (name, var) in data.iter() {
        let tensor = tensors
            .get(name)
            .or_else(|| tensors.get(&format!("bert.{name}")))
            .or_else(|| model_type.and_then(|p| tensors.get(&format!("{p}.{name}"))))
            .ok_or_else(|| anyhow!("pretrained weights have no tensor for {}", name))?;
        var.set(&tensor.to_dtype(var.dtype())?)
            .with_context(|| format!("shape mismatch for {}", name))?;
    }
    info!("Initialized {} tensors from {}", data.len(), weights.display());
    Ok(())
}

impl TrainableEncoder for SentenceEncoder {
    fn encode(&self, texts: &[&str]) -> Result<Tensor> {
        let (input_ids, attention_mask) = tokenize_batch(&self.tokenizer, texts, self.pad_id, &self.device)?;
        let token_type_ids = input_ids.zeros_like()?;
        let hidden = self.model.forward(&input_ids, &token_type_ids, Some(&attention_mask))?;
        self.pooling.apply(&hidden, &attention_mask)
    }

    fn named_vars(&self) -> Result<Vec<(String, Var)>> {
        let data = self.varmap.data().lock().map_err(|_| anyhow!("variable map lock poisoned"))?;
        let mut vars: Vec<(String, Var)> = data.iter().map(|(n, v)| (n.clone(), v.clone())).collect();
        vars.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(vars)
    }

    fn device(&self) -> &Device { &self.device }

    fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        self.varmap.save(dir.join("model.safetensors"))?;
        std::fs::copy(&self.files.config, dir.join("config.json"))?;
        std::fs::copy(&self.files.tokenizer, dir.join("tokenizer.json"))?;
        for (name, src) in &self.files.extras {
            let dst = dir.join(name);
            if let Some(parent) = dst.parent() { std::fs::create_dir_all(parent)?; }
            std::fs::copy(src, &dst).with_context(|| format!("Failed to copy {}", name))?;
        }
        info!("Saved model to {}", dir.display());
        Ok(())
    }

    fn info(&self) -> EncoderInfo {
        EncoderInfo {
            base_model: self.model_id.clone(),
            pooling: self.pooling.as_str().to_string(),
            hidden_size: self.hidden_size,
            max_seq_len: self.max_seq_len,
        }
    }
}

impl Embedder for SentenceEncoder {
    fn dim(&self) -> usize { self.hidden_size }
    fn max_len(&self) -> usize { self.max_seq_len }
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() { return Ok(vec![]); }
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let emb = l2_normalize(&self.encode(&refs)?)?.detach();
        Ok(emb.to_device(&Device::Cpu)?.to_vec2::<f32>()?)
    }
}
