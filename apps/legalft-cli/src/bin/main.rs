use std::env;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use legalft_core::config::{Config, Settings};
use legalft_core::dataset::{build_pairs, DatasetLoader, DatasetPaths};
use legalft_core::types::PairSet;
use legalft_embed::{select_device, SentenceEncoder};
use legalft_hub::Publisher;
use legalft_train::{
    BatchSource, InformationRetrievalEvaluator, MatryoshkaLoss, MultipleNegativesRankingLoss, Trainer, TrainingConfig,
};

const USAGE: &str = "Usage: legalft <train|pairs|push <dir>>";

fn parse_args() -> (String, Vec<String>) {
    let mut args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() { eprintln!("{USAGE}"); std::process::exit(1); }
    let cmd = args.remove(0);
    (cmd, args)
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let (cmd, args) = parse_args();
    let config = Config::load().context("loading configuration")?;
    let settings = config.settings()?;
    let base = env::current_dir()?;
    info!(env = config.env_name(), "Configuration loaded");

    match cmd.as_str() {
        "train" => train(&settings, &base),
        "pairs" => {
            let pairs = load_pairs(&settings, &base)?;
            println!("queries:  {}", pairs.queries.len());
            println!("examples: {}", pairs.examples.len());
            println!("corpus:   {} ({} unresolved)", pairs.corpus.len(), pairs.unresolved().len());
            Ok(())
        }
        "push" => {
            let Some(dir) = args.first().map(PathBuf::from) else {
                eprintln!("Usage: legalft push <dir>");
                std::process::exit(1)
            };
            let repo = Publisher::new(settings.hub.clone()).publish(&dir)?;
            println!("{}/{repo}", settings.hub.endpoint.trim_end_matches('/'));
            Ok(())
        }
        _ => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1)
        }
    }
}

fn load_pairs(settings: &Settings, base: &Path) -> anyhow::Result<PairSet> {
    let splits = DatasetLoader::new(DatasetPaths::from_settings(&settings.data, base)).load()?;
    let pairs = build_pairs(&splits.training, &splits.questions);
    let unresolved = pairs.unresolved();
    if !unresolved.is_empty() {
        warn!(count = unresolved.len(), "Questions reference documents missing from the training set");
    }
    Ok(pairs)
}

fn train(settings: &Settings, base: &Path) -> anyhow::Result<()> {
    let t = &settings.training;
    let pairs = load_pairs(settings, base)?;
    let evaluator = InformationRetrievalEvaluator::from_pairs(&pairs, t.eval_batch_size);
    info!(queries = evaluator.num_queries(), corpus = evaluator.corpus_size(), "Evaluator ready");

    let encoder = SentenceEncoder::load(&settings.model.id, &settings.model.revision, settings.model.max_seq_len, select_device())?;
    let loss = MatryoshkaLoss::new(
        MultipleNegativesRankingLoss::new(t.scale),
        t.matryoshka_dims.clone(),
        t.matryoshka_weights.clone(),
    )?;
    let mut source = if t.shuffle {
        BatchSource::shuffled(pairs.examples, t.batch_size, t.seed)
    } else {
        BatchSource::new(pairs.examples, t.batch_size)
    };

    let output_dir = settings.output_dir(base);
    let mut trainer = Trainer::new(TrainingConfig::from_settings(t, output_dir.clone()));
    let report = trainer.fit(&encoder, &mut source, &loss, Some(&evaluator))?;
    if let Some(m) = &report.last_metrics {
        info!("Final evaluation: {}", m.summary());
    }
    info!(dir = %output_dir.display(), "Model saved");

    if settings.hub.enabled {
        let repo = Publisher::new(settings.hub.clone())
            .publish(&output_dir)
            .with_context(|| format!("publishing {} (retry with `legalft push`)", output_dir.display()))?;
        println!("{}/{repo}", settings.hub.endpoint.trim_end_matches('/'));
    } else {
        info!("Hub upload disabled");
    }
    Ok(())
}
