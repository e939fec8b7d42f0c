use anyhow::Result;
use candle_core::backprop::GradStore;
use candle_core::{DType, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};

use legalft_core::config::TrainingSettings;
use legalft_embed::TrainableEncoder;

use crate::batch::BatchSource;
use crate::evaluator::{InformationRetrievalEvaluator, IrMetrics};
use crate::loss::{EmbeddingLoss, MatryoshkaLoss};
use crate::model_card::{self, CardContext};
use crate::schedule::{warmup_steps, WarmupLinear};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerState {
    Idle,
    Training,
    Complete,
}

#[derive(Debug, Error)]
pub enum TrainerError {
    #[error("fit can only run once from Idle (trainer is {0:?})")]
    NotIdle(TrainerState),

    #[error("no training examples")]
    NoExamples,
}

#[derive(Debug, Clone)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub warmup_ratio: f64,
    /// Global gradient-norm clip; `None` disables clipping.
    pub max_grad_norm: Option<f64>,
    /// Evaluate every N steps within an epoch; 0 evaluates at epoch ends only.
    pub evaluation_steps: usize,
    pub output_dir: PathBuf,
    pub show_progress_bar: bool,
}

impl TrainingConfig {
    pub fn from_settings(t: &TrainingSettings, output_dir: PathBuf) -> Self {
        Self {
            epochs: t.epochs,
            learning_rate: t.learning_rate,
            weight_decay: t.weight_decay,
            warmup_ratio: t.warmup_ratio,
            max_grad_norm: (t.max_grad_norm > 0.0).then_some(t.max_grad_norm),
            evaluation_steps: t.evaluation_steps,
            output_dir,
            show_progress_bar: t.show_progress_bar,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub epochs: usize,
    pub batches_per_epoch: usize,
    pub total_steps: usize,
    pub warmup_steps: usize,
    pub final_loss: Option<f32>,
    pub last_metrics: Option<IrMetrics>,
    pub output_dir: PathBuf,
}

/// Runs the fit loop once. Evaluation only observes; the saved model is the
/// state after the last step.
pub struct Trainer {
    config: TrainingConfig,
    state: TrainerState,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> Self { Self { config, state: TrainerState::Idle } }

    pub fn state(&self) -> TrainerState { self.state }

    pub fn config(&self) -> &TrainingConfig { &self.config }

    /// Train `encoder` in place and save it to the output directory.
    ///
    /// On error the trainer stays in `Training`; there is no resume.
    pub fn fit<E, L>(
        &mut self,
        encoder: &E,
        source: &mut BatchSource,
        loss: &MatryoshkaLoss<L>,
        evaluator: Option<&InformationRetrievalEvaluator>,
    ) -> Result<TrainingReport>
    where
        E: TrainableEncoder,
        L: EmbeddingLoss,
    {
        if self.state != TrainerState::Idle { return Err(TrainerError::NotIdle(self.state).into()); }
        if source.is_empty() { return Err(TrainerError::NoExamples.into()); }
        loss.check_width(encoder.dim())?;

        self.state = TrainerState::Training;
        let report = self.run(encoder, source, loss, evaluator)?;
        self.state = TrainerState::Complete;
        Ok(report)
    }

    fn run<E, L>(
        &self,
        encoder: &E,
        source: &mut BatchSource,
        loss: &MatryoshkaLoss<L>,
        evaluator: Option<&InformationRetrievalEvaluator>,
    ) -> Result<TrainingReport>
    where
        E: TrainableEncoder,
        L: EmbeddingLoss,
    {
        let cfg = &self.config;
        let batches_per_epoch = source.len();
        let total_steps = batches_per_epoch * cfg.epochs;
        let warmup = warmup_steps(batches_per_epoch, cfg.epochs, cfg.warmup_ratio);
        let schedule = WarmupLinear::new(cfg.learning_rate, warmup, total_steps);

        let named = encoder.named_vars()?;
        let all_vars: Vec<Var> = named.iter().map(|(_, v)| v.clone()).collect();
        let (decay, plain): (Vec<_>, Vec<_>) = named.into_iter().partition(|(name, _)| !exempt_from_decay(name));
        let decay: Vec<Var> = decay.into_iter().map(|(_, v)| v).collect();
        let plain: Vec<Var> = plain.into_iter().map(|(_, v)| v).collect();
        info!(
            examples = source.num_examples(),
            batch_size = source.batch_size(),
            batches_per_epoch,
            epochs = cfg.epochs,
            total_steps,
            warmup_steps = warmup,
            decayed_params = decay.len(),
            other_params = plain.len(),
            "Starting training"
        );
        let mut opt_decay = AdamW::new(
            decay,
            ParamsAdamW { lr: schedule.lr_at(0), weight_decay: cfg.weight_decay, ..Default::default() },
        )?;
        let mut opt_plain = AdamW::new(
            plain,
            ParamsAdamW { lr: schedule.lr_at(0), weight_decay: 0.0, ..Default::default() },
        )?;

        let pb = if cfg.show_progress_bar { ProgressBar::new(total_steps as u64) } else { ProgressBar::hidden() };
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} steps ({percent}%) {msg}")
                .map(|s| s.progress_chars("#>-"))
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        let mut global_step = 0usize;
        let mut final_loss = None;
        let mut last_metrics = None;
        for epoch in 0..cfg.epochs {
            let mut epoch_step = 0usize;
            for batch in source.epoch() {
                let lr = schedule.lr_at(global_step);
                opt_decay.set_learning_rate(lr);
                opt_plain.set_learning_rate(lr);

                let anchors = encoder.encode(&batch.queries)?;
                let positives = encoder.encode(&batch.passages)?;
                let (loss_value, components) = loss.compute_with_components(&anchors, &positives)?;
                let mut grads = loss_value.backward()?;
                let grad_norm = match cfg.max_grad_norm {
                    Some(max_norm) => Some(clip_grad_norm(&mut grads, &all_vars, max_norm)?),
                    None => None,
                };
                opt_decay.step(&grads)?;
                opt_plain.step(&grads)?;

                global_step += 1;
                epoch_step += 1;
                final_loss = Some(components.total);
                debug!(epoch, step = global_step, lr, loss = components.total, ?grad_norm, per_dim = ?components.per_dim, "step");
                pb.set_position(global_step as u64);
                pb.set_message(format!("epoch {} loss {:.4}", epoch + 1, components.total));

                if cfg.evaluation_steps > 0 && epoch_step % cfg.evaluation_steps == 0 {
                    if let Some(ev) = evaluator {
                        last_metrics = Some(self.evaluate(ev, encoder, epoch, global_step)?);
                    }
                }
            }
            if let Some(ev) = evaluator {
                last_metrics = Some(self.evaluate(ev, encoder, epoch, global_step)?);
            }
        }
        pb.finish_with_message("Training complete");
        info!(steps = global_step, final_loss = ?final_loss, "Training complete");

        encoder.save(&cfg.output_dir)?;
        let report = TrainingReport {
            epochs: cfg.epochs,
            batches_per_epoch,
            total_steps,
            warmup_steps: warmup,
            final_loss,
            last_metrics,
            output_dir: cfg.output_dir.clone(),
        };
        model_card::write(
            &cfg.output_dir,
            &CardContext {
                encoder: encoder.info(),
                loss: loss.describe(),
                matryoshka_dims: loss.dims(),
                learning_rate: cfg.learning_rate,
                batch_size: source.batch_size(),
                num_examples: source.num_examples(),
                report: &report,
            },
        )?;
        Ok(report)
    }

    fn evaluate<E: TrainableEncoder>(
        &self,
        evaluator: &InformationRetrievalEvaluator,
        encoder: &E,
        epoch: usize,
        step: usize,
    ) -> Result<IrMetrics> {
        let metrics = evaluator.evaluate(encoder)?;
        evaluator.record(&self.config.output_dir, epoch, step, &metrics)?;
        Ok(metrics)
    }
}

fn exempt_from_decay(name: &str) -> bool {
    name.ends_with("bias") || name.contains("LayerNorm") || name.contains("layer_norm")
}

/// Scale all gradients so their global L2 norm is at most `max_norm`.
/// Returns the norm before clipping.
fn clip_grad_norm(grads: &mut GradStore, vars: &[Var], max_norm: f64) -> Result<f64> {
    let mut sq = 0f64;
    for var in vars {
        if let Some(g) = grads.get(var.as_tensor()) {
            sq += g.sqr()?.sum_all()?.to_dtype(DType::F64)?.to_scalar::<f64>()?;
        }
    }
    let norm = sq.sqrt();
    if norm > max_norm {
        let factor = max_norm / (norm + 1e-6);
        for var in vars {
            if let Some(g) = grads.remove(var.as_tensor()) {
                grads.insert(var.as_tensor(), g.affine(factor, 0.0)?);
            }
        }
    }
    Ok(norm)
}
