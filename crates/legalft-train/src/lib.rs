//! Contrastive fine-tuning loop for sentence encoders.
//!
//! - [`batch`]: fixed-size batching over (query, passage) examples
//! - [`loss`]: multiple-negatives ranking loss and its matryoshka wrapper
//! - [`evaluator`]: retrieval metrics over the question/corpus maps
//! - [`schedule`]: warmup step count and warmup-linear learning rate
//! - [`trainer`]: the `Idle -> Training -> Complete` fit loop
//! - [`model_card`]: README written next to the saved weights

pub mod batch;
pub mod evaluator;
pub mod loss;
pub mod model_card;
pub mod schedule;
pub mod trainer;

pub use batch::{Batch, BatchSource};
pub use evaluator::{InformationRetrievalEvaluator, IrMetrics};
pub use loss::{EmbeddingLoss, MatryoshkaLoss, MultipleNegativesRankingLoss};
pub use schedule::{warmup_steps, WarmupLinear};
pub use trainer::{Trainer, TrainerError, TrainerState, TrainingConfig, TrainingReport};
