use anyhow::{anyhow, Result};
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{Linear, Module, VarBuilder, VarMap};
use std::path::Path;

use legalft_core::types::{Document, QuestionSet, TrainingExample};
use legalft_core::dataset::build_pairs;
use legalft_embed::{l2_normalize, EncoderInfo, Embedder, FakeEmbedder, TrainableEncoder};
use legalft_train::{
    BatchSource, InformationRetrievalEvaluator, MatryoshkaLoss, MultipleNegativesRankingLoss, Trainer, TrainerError,
    TrainerState, TrainingConfig,
};

/// Linear projection over hashed bag-of-words features.
struct ToyEncoder {
    features: FakeEmbedder,
    varmap: VarMap,
    proj: Linear,
    device: Device,
    dim: usize,
}

impl ToyEncoder {
    fn new(feature_dim: usize, dim: usize) -> Result<Self> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let proj = candle_nn::linear(feature_dim, dim, vb.pp("proj"))?;
        Ok(Self { features: FakeEmbedder::new(feature_dim), varmap, proj, device, dim })
    }

    fn weight_snapshot(&self) -> Vec<f32> {
        let vars = self.named_vars().unwrap();
        let (_, w) = vars.iter().find(|(n, _)| n == "proj.weight").unwrap();
        w.as_tensor().flatten_all().unwrap().to_vec1().unwrap()
    }
}

impl Embedder for ToyEncoder {
    fn dim(&self) -> usize { self.dim }
    fn max_len(&self) -> usize { usize::MAX }
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let refs: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();
        let out = l2_normalize(&self.encode(&refs)?)?.detach();
        Ok(out.to_vec2()?)
    }
}

impl TrainableEncoder for ToyEncoder {
    fn encode(&self, texts: &[&str]) -> Result<Tensor> {
        let n = texts.len();
        let flat: Vec<f32> = texts.iter().flat_map(|t| self.features.embed_text(t)).collect();
        let x = Tensor::from_vec(flat, (n, self.features.dim()), &self.device)?;
        Ok(self.proj.forward(&x)?)
    }

    fn named_vars(&self) -> Result<Vec<(String, Var)>> {
        let data = self.varmap.data().lock().map_err(|_| anyhow!("poisoned"))?;
        let mut vars: Vec<(String, Var)> = data.iter().map(|(n, v)| (n.clone(), v.clone())).collect();
        vars.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(vars)
    }

    fn device(&self) -> &Device { &self.device }

    fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        self.varmap.save(dir.join("model.safetensors"))?;
        Ok(())
    }

    fn info(&self) -> EncoderInfo {
        EncoderInfo { base_model: "toy".into(), pooling: "none".into(), hidden_size: self.dim, max_seq_len: 0 }
    }
}

fn corpus() -> (Vec<Document>, QuestionSet) {
    let docs = vec![
        Document::new("d0", "tenant must pay rent on the first day of each month"),
        Document::new("d1", "the court dismissed the appeal for lack of jurisdiction"),
        Document::new("d2", "copyright protects original works of authorship fixed in a medium"),
    ];
    let questions = QuestionSet::new(vec![
        ("d0".into(), vec!["when is rent due".into(), "who pays the rent".into()]),
        ("d1".into(), vec!["why was the appeal dismissed".into(), "which court heard the appeal".into()]),
        ("d2".into(), vec!["what does copyright protect".into(), "must a work be fixed".into()]),
    ]);
    (docs, questions)
}

fn examples() -> Vec<TrainingExample> {
    let (docs, questions) = corpus();
    build_pairs(&docs, &questions).examples
}

fn config(dir: &Path, epochs: usize, evaluation_steps: usize) -> TrainingConfig {
    TrainingConfig {
        epochs,
        learning_rate: 1e-2,
        weight_decay: 0.01,
        warmup_ratio: 0.1,
        max_grad_norm: Some(1.0),
        evaluation_steps,
        output_dir: dir.to_path_buf(),
        show_progress_bar: false,
    }
}

fn loss(dims: Vec<usize>) -> MatryoshkaLoss<MultipleNegativesRankingLoss> {
    MatryoshkaLoss::new(MultipleNegativesRankingLoss::default(), dims, None).unwrap()
}

fn jsonl_lines(dir: &Path) -> usize {
    std::fs::read_to_string(dir.join("eval").join("ir_results.jsonl")).unwrap().lines().count()
}

#[test]
fn fit_runs_every_step_and_saves() {
    let out = tempfile::tempdir().unwrap();
    let encoder = ToyEncoder::new(64, 16).unwrap();
    let (docs, questions) = corpus();
    let evaluator = InformationRetrievalEvaluator::from_pairs(&build_pairs(&docs, &questions), 8);
    let mut source = BatchSource::new(examples(), 4);
    let before = encoder.weight_snapshot();

    let mut trainer = Trainer::new(config(out.path(), 3, 50));
    let report = trainer.fit(&encoder, &mut source, &loss(vec![16, 8, 4]), Some(&evaluator)).unwrap();

    // 6 examples / batch 4 -> 2 batches per epoch
    assert_eq!(report.batches_per_epoch, 2);
    assert_eq!(report.total_steps, 6);
    assert_eq!(report.warmup_steps, 0);
    assert!(report.final_loss.is_some());
    assert_eq!(report.last_metrics.as_ref().unwrap().num_queries, 6);
    assert_eq!(trainer.state(), TrainerState::Complete);

    assert!(out.path().join("model.safetensors").exists());
    assert!(out.path().join("README.md").exists());
    // fewer steps per epoch than the cadence: epoch-end evaluations only
    assert_eq!(jsonl_lines(out.path()), 3);
    assert_ne!(before, encoder.weight_snapshot());
}

#[test]
fn step_cadence_adds_evaluations() {
    let out = tempfile::tempdir().unwrap();
    let encoder = ToyEncoder::new(32, 8).unwrap();
    let (docs, questions) = corpus();
    let evaluator = InformationRetrievalEvaluator::from_pairs(&build_pairs(&docs, &questions), 8);
    let mut source = BatchSource::new(examples(), 2);

    let mut trainer = Trainer::new(config(out.path(), 2, 1));
    let report = trainer.fit(&encoder, &mut source, &loss(vec![8, 4]), Some(&evaluator)).unwrap();
    assert_eq!(report.total_steps, 6);
    // one per step plus one per epoch end
    assert_eq!(jsonl_lines(out.path()), 6 + 2);
}

#[test]
fn step_cadence_restarts_every_epoch() {
    let out = tempfile::tempdir().unwrap();
    let encoder = ToyEncoder::new(32, 8).unwrap();
    let (docs, questions) = corpus();
    let evaluator = InformationRetrievalEvaluator::from_pairs(&build_pairs(&docs, &questions), 8);
    // 6 examples / batch 2 -> 3 batches per epoch
    let mut source = BatchSource::new(examples(), 2);

    let mut trainer = Trainer::new(config(out.path(), 2, 2));
    let report = trainer.fit(&encoder, &mut source, &loss(vec![8]), Some(&evaluator)).unwrap();
    assert_eq!(report.batches_per_epoch, 3);
    // each epoch: step 2 plus the epoch end; a global counter would also fire at step 4
    assert_eq!(jsonl_lines(out.path()), 4);

    let steps: Vec<u64> = std::fs::read_to_string(out.path().join("eval").join("ir_results.jsonl"))
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["step"].as_u64().unwrap())
        .collect();
    assert_eq!(steps, vec![2, 3, 5, 6]);
}

#[test]
fn fit_runs_once() {
    let out = tempfile::tempdir().unwrap();
    let encoder = ToyEncoder::new(32, 8).unwrap();
    let mut source = BatchSource::new(examples(), 3);
    let mut trainer = Trainer::new(config(out.path(), 1, 50));
    trainer.fit(&encoder, &mut source, &loss(vec![8]), None).unwrap();

    let err = trainer.fit(&encoder, &mut source, &loss(vec![8]), None).unwrap_err();
    assert!(matches!(err.downcast_ref::<TrainerError>(), Some(TrainerError::NotIdle(TrainerState::Complete))));
    assert!(!out.path().join("eval").exists());
}

#[test]
fn empty_dataset_is_rejected() {
    let out = tempfile::tempdir().unwrap();
    let encoder = ToyEncoder::new(32, 8).unwrap();
    let mut source = BatchSource::new(vec![], 10);
    let mut trainer = Trainer::new(config(out.path(), 1, 50));
    let err = trainer.fit(&encoder, &mut source, &loss(vec![8]), None).unwrap_err();
    assert!(matches!(err.downcast_ref::<TrainerError>(), Some(TrainerError::NoExamples)));
    assert_eq!(trainer.state(), TrainerState::Idle);
}

#[test]
fn oversized_matryoshka_dim_fails_before_training() {
    let out = tempfile::tempdir().unwrap();
    let encoder = ToyEncoder::new(32, 8).unwrap();
    let mut source = BatchSource::new(examples(), 3);
    let mut trainer = Trainer::new(config(out.path(), 1, 50));
    assert!(trainer.fit(&encoder, &mut source, &loss(vec![16, 8]), None).is_err());
    assert_eq!(trainer.state(), TrainerState::Idle);
    assert!(!out.path().join("model.safetensors").exists());
}

#[test]
fn evaluator_scores_fake_embedder() {
    let (docs, questions) = corpus();
    let pairs = build_pairs(&docs, &questions);
    let evaluator = InformationRetrievalEvaluator::from_pairs(&pairs, 2);
    assert_eq!(evaluator.num_queries(), 6);
    assert_eq!(evaluator.corpus_size(), 3);

    let metrics = evaluator.evaluate(&FakeEmbedder::new(256)).unwrap();
    assert_eq!(metrics.num_queries, 6);
    // three candidates: every relevant doc is inside the top 3
    assert_eq!(metrics.accuracy_at_k[&3], 1.0);
    assert!(metrics.mrr_at_10 >= 1.0 / 3.0);
}
