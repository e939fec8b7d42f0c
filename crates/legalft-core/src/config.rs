//! Configuration loader and path helpers.
//!
//! Uses Figment to merge built-in defaults + `config.toml` + `config.<env>.toml`
//! + `APP_*` env vars (`APP_TRAINING__EPOCHS=3` sets `training.epochs`).
//! Provides helpers to expand `~` and `${VAR}` and to resolve relative paths
//! against a known base directory.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub struct Config {
    figment: Figment,
    env_name: String,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        Ok(Self { figment, env_name })
    }

    /// Wrap an already assembled figment; defaults are layered underneath.
    pub fn from_figment(figment: Figment) -> Self {
        let figment = Figment::from(Serialized::defaults(Settings::default())).merge(figment);
        Self { figment, env_name: "custom".to_string() }
    }

    pub fn env_name(&self) -> &str { &self.env_name }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    /// Extract and validate the typed settings tree.
    pub fn settings(&self) -> Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data: DataSettings,
    pub model: ModelSettings,
    pub training: TrainingSettings,
    pub hub: HubSettings,
}

/// Location of the four pre-split dataset files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    pub dir: String,
    pub training_set: String,
    pub validation_set: String,
    pub test_set: String,
    pub questions: String,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            dir: "data/embed".to_string(),
            training_set: "training-set.json".to_string(),
            validation_set: "validation-set.json".to_string(),
            test_set: "test-set.json".to_string(),
            questions: "questions.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Hub model id or a local directory holding the model files.
    pub id: String,
    pub revision: String,
    /// Used when the model ships no `sentence_bert_config.json`.
    pub max_seq_len: usize,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            id: "Snowflake/snowflake-arctic-embed-l".to_string(),
            revision: "main".to_string(),
            max_seq_len: 512,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    pub batch_size: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub warmup_ratio: f64,
    pub max_grad_norm: f64,
    pub evaluation_steps: usize,
    pub eval_batch_size: usize,
    pub matryoshka_dims: Vec<usize>,
    /// One weight per matryoshka dim; all 1.0 when absent.
    pub matryoshka_weights: Option<Vec<f32>>,
    pub scale: f64,
    pub shuffle: bool,
    pub seed: u64,
    pub output_dir: String,
    pub show_progress_bar: bool,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            epochs: 10,
            learning_rate: 2e-5,
            weight_decay: 0.01,
            warmup_ratio: 0.1,
            max_grad_norm: 1.0,
            evaluation_steps: 50,
            eval_batch_size: 32,
            matryoshka_dims: vec![768, 512, 256, 128, 64],
            matryoshka_weights: None,
            scale: 20.0,
            shuffle: false,
            seed: 42,
            output_dir: "finetuned_arctic_ft".to_string(),
            show_progress_bar: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubSettings {
    pub enabled: bool,
    pub endpoint: String,
    /// Owner of the uploaded repo; the authenticated user when empty.
    pub namespace: String,
    pub repo_prefix: String,
    /// Name of the environment variable holding the access token.
    pub token_env: String,
    pub private: bool,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://huggingface.co".to_string(),
            namespace: "cantemizyurek".to_string(),
            repo_prefix: "legal-ft".to_string(),
            token_env: "HF_TOKEN".to_string(),
            private: false,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        let t = &self.training;
        if t.batch_size == 0 {
            return Err(Error::InvalidConfig("training.batch_size must be > 0".into()));
        }
        if t.epochs == 0 {
            return Err(Error::InvalidConfig("training.epochs must be > 0".into()));
        }
        if t.eval_batch_size == 0 {
            return Err(Error::InvalidConfig("training.eval_batch_size must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&t.warmup_ratio) {
            return Err(Error::InvalidConfig(format!(
                "training.warmup_ratio must be within [0, 1], got {}",
                t.warmup_ratio
            )));
        }
        if t.matryoshka_dims.is_empty() {
            return Err(Error::InvalidConfig("training.matryoshka_dims must not be empty".into()));
        }
        if t.matryoshka_dims.contains(&0) {
            return Err(Error::InvalidConfig("training.matryoshka_dims must be non-zero".into()));
        }
        if t.matryoshka_dims.windows(2).any(|w| w[0] <= w[1]) {
            return Err(Error::InvalidConfig(format!(
                "training.matryoshka_dims must be strictly decreasing, got {:?}",
                t.matryoshka_dims
            )));
        }
        if let Some(weights) = &t.matryoshka_weights {
            if weights.len() != t.matryoshka_dims.len() {
                return Err(Error::InvalidConfig(format!(
                    "training.matryoshka_weights has {} entries for {} dims",
                    weights.len(),
                    t.matryoshka_dims.len()
                )));
            }
        }
        if self.model.max_seq_len == 0 {
            return Err(Error::InvalidConfig("model.max_seq_len must be > 0".into()));
        }
        Ok(())
    }

    pub fn data_dir(&self, base: &Path) -> PathBuf { resolve_with_base(base, &self.data.dir) }

    pub fn output_dir(&self, base: &Path) -> PathBuf { resolve_with_base(base, &self.training.output_dir) }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
