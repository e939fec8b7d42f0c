use anyhow::Result;
use std::fs;
use std::path::Path;

use legalft_embed::EncoderInfo;

use crate::trainer::TrainingReport;

pub struct CardContext<'a> {
    pub encoder: EncoderInfo,
    pub loss: String,
    pub matryoshka_dims: &'a [usize],
    pub learning_rate: f64,
    pub batch_size: usize,
    pub num_examples: usize,
    pub report: &'a TrainingReport,
}

/// Write `README.md` into `dir`, replacing any previous card.
pub fn write(dir: &Path, ctx: &CardContext<'_>) -> Result<()> {
    fs::create_dir_all(dir)?;
    fs::write(dir.join("README.md"), render(ctx))?;
    Ok(())
}

pub fn render(ctx: &CardContext<'_>) -> String {
    let r = ctx.report;
    let dims: Vec<String> = ctx.matryoshka_dims.iter().map(|d| d.to_string()).collect();
    let mut out = format!(
        "---\n\
         base_model: {base}\n\
         library_name: sentence-transformers\n\
         pipeline_tag: sentence-similarity\n\
         tags:\n- sentence-transformers\n- sentence-similarity\n- feature-extraction\n- matryoshka\n\
         ---\n\n\
         # Fine-tuned {base}\n\n\
         Sentence embedding model fine-tuned on {examples} (question, passage) pairs for retrieval.\n\n",
        base = ctx.encoder.base_model,
        examples = ctx.num_examples,
    );

    out.push_str("## Model\n\n");
    out.push_str(&format!("- Base model: `{}`\n", ctx.encoder.base_model));
    out.push_str(&format!("- Embedding size: {}\n", ctx.encoder.hidden_size));
    out.push_str(&format!("- Max sequence length: {}\n", ctx.encoder.max_seq_len));
    out.push_str(&format!("- Pooling: {}\n", ctx.encoder.pooling));
    out.push_str(&format!("- Matryoshka dims: {}\n\n", dims.join(", ")));

    out.push_str("## Training\n\n");
    out.push_str(&format!("- Loss: {}\n", ctx.loss));
    out.push_str(&format!("- Epochs: {}\n", r.epochs));
    out.push_str(&format!("- Batch size: {}\n", ctx.batch_size));
    out.push_str(&format!("- Steps: {} ({} per epoch, {} warmup)\n", r.total_steps, r.batches_per_epoch, r.warmup_steps));
    out.push_str(&format!("- Learning rate: {:e} (warmup-linear)\n", ctx.learning_rate));
    if let Some(loss) = r.final_loss {
        out.push_str(&format!("- Final loss: {loss:.4}\n"));
    }

    if let Some(m) = &r.last_metrics {
        out.push_str("\n## Evaluation\n\n| Metric | Value |\n|---|---|\n");
        let rows = m
            .accuracy_at_k
            .iter()
            .map(|(k, v)| (format!("accuracy@{k}"), *v))
            .chain(m.recall_at_k.iter().map(|(k, v)| (format!("recall@{k}"), *v)))
            .chain([
                ("mrr@10".to_string(), m.mrr_at_10),
                ("ndcg@10".to_string(), m.ndcg_at_10),
                ("map@100".to_string(), m.map_at_100),
            ]);
        for (name, value) in rows {
            out.push_str(&format!("| {name} | {value:.4} |\n"));
        }
    }
    out
}
