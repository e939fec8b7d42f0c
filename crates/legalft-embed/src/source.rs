//! Locating model files, either in a local directory or on the hub.

use anyhow::{anyhow, Context, Result};
use hf_hub::api::sync::ApiBuilder;
use hf_hub::{Repo, RepoType};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Sentence-transformers side files copied alongside the weights when present.
pub const SIDE_FILES: &[&str] = &[
    "modules.json",
    "sentence_bert_config.json",
    "config_sentence_transformers.json",
    "1_Pooling/config.json",
    "tokenizer_config.json",
    "special_tokens_map.json",
    "vocab.txt",
];

#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: PathBuf,
    /// `(path relative to the model root, local path)`
    pub extras: Vec<(String, PathBuf)>,
}

impl ModelFiles {
    /// `APP_MODEL_DIR` wins, then `model_id` as a local directory, then the hub.
    pub fn resolve(model_id: &str, revision: &str) -> Result<Self> {
        if let Ok(dir) = std::env::var("APP_MODEL_DIR") {
            let p = PathBuf::from(&dir);
            if p.is_dir() { info!("Using APP_MODEL_DIR: {}", p.display()); return Self::from_dir(&p); }
        }
        let local = Path::new(model_id);
        if local.is_dir() { info!("Using model dir: {}", local.display()); return Self::from_dir(local); }
        Self::from_hub(model_id, revision)
    }

    pub fn from_dir(dir: &Path) -> Result<Self> {
        let required = |name: &str| -> Result<PathBuf> {
            let p = dir.join(name);
            if p.is_file() { Ok(p) } else { Err(anyhow!("{} not found in {}", name, dir.display())) }
        };
        let extras = SIDE_FILES
            .iter()
            .map(|name| (name.to_string(), dir.join(name)))
            .filter(|(_, p)| p.is_file())
            .collect();
        Ok(Self {
            config: required("config.json")?,
            tokenizer: required("tokenizer.json")?,
            weights: required("model.safetensors")?,
            extras,
        })
    }

    pub fn from_hub(model_id: &str, revision: &str) -> Result<Self> {
        let api = ApiBuilder::new().with_progress(true).build().context("Failed to create HuggingFace API")?;
        let repo = api.repo(Repo::with_revision(model_id.to_string(), RepoType::Model, revision.to_string()));

        info!("Downloading model files from {}@{}", model_id, revision);
        let config = repo.get("config.json").context("Failed to get config.json")?;
        let tokenizer = repo.get("tokenizer.json").context("Failed to get tokenizer.json")?;
        let weights = repo.get("model.safetensors").context("Failed to get model.safetensors")?;

        let mut extras = Vec::new();
        for name in SIDE_FILES {
            match repo.get(name) {
                Ok(p) => extras.push((name.to_string(), p)),
                Err(e) => debug!("{} not available for {}: {}", name, model_id, e),
            }
        }
        Ok(Self { config, tokenizer, weights, extras })
    }

    pub fn extra(&self, name: &str) -> Option<&Path> {
        self.extras.iter().find(|(n, _)| n == name).map(|(_, p)| p.as_path())
    }
}
