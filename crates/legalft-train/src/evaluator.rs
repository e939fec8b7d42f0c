//! Retrieval-quality evaluation over the question/corpus maps.
//!
//! Every query is embedded and the whole corpus is ranked by cosine
//! similarity. Reported metrics follow the usual IR definitions with binary
//! relevance: accuracy/precision/recall@k, MRR@10, NDCG@10 and MAP@100.

use anyhow::{bail, Result};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::info;

use legalft_core::traits::Embedder;
use legalft_core::types::{DocId, PairSet, QueryId};

pub const ACCURACY_AT_K: &[usize] = &[1, 3, 5, 10];
pub const MRR_AT_K: usize = 10;
pub const NDCG_AT_K: usize = 10;
pub const MAP_AT_K: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IrMetrics {
    pub accuracy_at_k: BTreeMap<usize, f32>,
    pub precision_at_k: BTreeMap<usize, f32>,
    pub recall_at_k: BTreeMap<usize, f32>,
    pub mrr_at_10: f32,
    pub ndcg_at_10: f32,
    pub map_at_100: f32,
    pub num_queries: usize,
    pub corpus_size: usize,
}

impl IrMetrics {
    /// The score reported as the evaluator's headline number.
    pub fn primary(&self) -> f32 { self.ndcg_at_10 }

    pub fn summary(&self) -> String {
        let acc = |k| self.accuracy_at_k.get(&k).copied().unwrap_or_default();
        format!(
            "Acc@1={:.4} Acc@3={:.4} Acc@5={:.4} Acc@10={:.4} MRR@10={:.4} NDCG@10={:.4} MAP@100={:.4} (q={}, corpus={})",
            acc(1), acc(3), acc(5), acc(10), self.mrr_at_10, self.ndcg_at_10, self.map_at_100, self.num_queries, self.corpus_size,
        )
    }
}

#[derive(Serialize)]
struct EvalRecord<'a> {
    name: &'a str,
    epoch: usize,
    step: usize,
    #[serde(flatten)]
    metrics: &'a IrMetrics,
}

pub struct InformationRetrievalEvaluator {
    name: String,
    queries: Vec<(QueryId, String)>,
    corpus: Vec<(DocId, String)>,
    relevant: HashMap<QueryId, HashSet<DocId>>,
    batch_size: usize,
}

impl InformationRetrievalEvaluator {
    pub fn new(
        name: impl Into<String>,
        queries: Vec<(QueryId, String)>,
        corpus: Vec<(DocId, String)>,
        relevant: HashMap<QueryId, HashSet<DocId>>,
        batch_size: usize,
    ) -> Self {
        Self { name: name.into(), queries, corpus, relevant, batch_size: batch_size.max(1) }
    }

    /// Queries and relevance from the pair set; unresolved corpus entries
    /// are left out of the candidate pool.
    pub fn from_pairs(pairs: &PairSet, batch_size: usize) -> Self {
        let queries = pairs.queries.iter().map(|q| (q.id.clone(), q.text.clone())).collect();
        let corpus = pairs.resolved_corpus().map(|(id, c)| (id.clone(), c.to_string())).collect();
        let relevant = pairs
            .relevant_docs
            .iter()
            .map(|(q, docs)| (q.clone(), docs.iter().cloned().collect()))
            .collect();
        Self::new("train", queries, corpus, relevant, batch_size)
    }

    pub fn name(&self) -> &str { &self.name }

    pub fn num_queries(&self) -> usize { self.queries.len() }

    pub fn corpus_size(&self) -> usize { self.corpus.len() }

    pub fn evaluate(&self, embedder: &dyn Embedder) -> Result<IrMetrics> {
        if self.corpus.is_empty() { bail!("evaluator '{}' has an empty corpus", self.name); }
        let query_texts: Vec<String> = self.queries.iter().map(|(_, t)| t.clone()).collect();
        let corpus_texts: Vec<String> = self.corpus.iter().map(|(_, t)| t.clone()).collect();
        let query_embs = embed_in_batches(embedder, &query_texts, self.batch_size)?;
        let corpus_embs = embed_in_batches(embedder, &corpus_texts, self.batch_size)?;
        let corpus_ids: Vec<&DocId> = self.corpus.iter().map(|(id, _)| id).collect();

        let empty = HashSet::new();
        let relevant: Vec<&HashSet<DocId>> =
            self.queries.iter().map(|(id, _)| self.relevant.get(id).unwrap_or(&empty)).collect();
        Ok(compute_metrics(&query_embs, &corpus_embs, &corpus_ids, &relevant))
    }

    /// Append one JSON line to `{output_dir}/eval/ir_results.jsonl`.
    pub fn record(&self, output_dir: &Path, epoch: usize, step: usize, metrics: &IrMetrics) -> Result<()> {
        let dir = output_dir.join("eval");
        fs::create_dir_all(&dir)?;
        let mut file = OpenOptions::new().create(true).append(true).open(dir.join("ir_results.jsonl"))?;
        let line = serde_json::to_string(&EvalRecord { name: &self.name, epoch, step, metrics })?;
        writeln!(file, "{line}")?;
        info!(evaluator = %self.name, epoch, step, "{}", metrics.summary());
        Ok(())
    }
}

fn embed_in_batches(embedder: &dyn Embedder, texts: &[String], batch_size: usize) -> Result<Vec<Vec<f32>>> {
    let mut out = Vec::with_capacity(texts.len());
    for chunk in texts.chunks(batch_size) {
        out.extend(embedder.embed_batch(chunk)?);
    }
    Ok(out)
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = na * nb;
    if denom > 1e-12 { dot / denom } else { 0.0 }
}

/// Rank the corpus for every query and average the per-query metrics.
/// `relevant[i]` holds the relevant doc ids of query `i`.
pub fn compute_metrics(
    query_embs: &[Vec<f32>],
    corpus_embs: &[Vec<f32>],
    corpus_ids: &[&DocId],
    relevant: &[&HashSet<DocId>],
) -> IrMetrics {
    let max_k = ACCURACY_AT_K.iter().copied().chain([MRR_AT_K, NDCG_AT_K, MAP_AT_K]).max().unwrap_or(10);
    let mut metrics = IrMetrics { num_queries: query_embs.len(), corpus_size: corpus_embs.len(), ..Default::default() };
    if query_embs.is_empty() { return metrics; }

    let mut acc = vec![0f32; ACCURACY_AT_K.len()];
    let mut prec = vec![0f32; ACCURACY_AT_K.len()];
    let mut rec = vec![0f32; ACCURACY_AT_K.len()];
    let (mut mrr, mut ndcg, mut map) = (0f32, 0f32, 0f32);

    for (q, rel) in query_embs.iter().zip(relevant) {
        let mut scored: Vec<(usize, f32)> = corpus_embs.iter().enumerate().map(|(i, c)| (i, cosine(q, c))).collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(max_k);
        let hits: Vec<bool> = scored.iter().map(|(i, _)| rel.contains(corpus_ids[*i])).collect();
        let n_rel = rel.len();

        for (slot, &k) in ACCURACY_AT_K.iter().enumerate() {
            let correct = hits.iter().take(k).filter(|h| **h).count();
            if correct > 0 { acc[slot] += 1.0; }
            prec[slot] += correct as f32 / k as f32;
            if n_rel > 0 { rec[slot] += correct as f32 / n_rel as f32; }
        }

        if let Some(rank) = hits.iter().take(MRR_AT_K).position(|h| *h) {
            mrr += 1.0 / (rank + 1) as f32;
        }

        let dcg: f32 = hits.iter().take(NDCG_AT_K).enumerate().filter(|(_, h)| **h).map(|(i, _)| 1.0 / ((i + 2) as f32).log2()).sum();
        let idcg: f32 = (0..n_rel.min(NDCG_AT_K)).map(|i| 1.0 / ((i + 2) as f32).log2()).sum();
        if idcg > 0.0 { ndcg += dcg / idcg; }

        let mut correct = 0usize;
        let mut sum_precision = 0f32;
        for (i, hit) in hits.iter().take(MAP_AT_K).enumerate() {
            if *hit {
                correct += 1;
                sum_precision += correct as f32 / (i + 1) as f32;
            }
        }
        let denom = n_rel.min(MAP_AT_K);
        if denom > 0 { map += sum_precision / denom as f32; }
    }

    let n = query_embs.len() as f32;
    for (slot, &k) in ACCURACY_AT_K.iter().enumerate() {
        metrics.accuracy_at_k.insert(k, acc[slot] / n);
        metrics.precision_at_k.insert(k, prec[slot] / n);
        metrics.recall_at_k.insert(k, rec[slot] / n);
    }
    metrics.mrr_at_10 = mrr / n;
    metrics.ndcg_at_10 = ndcg / n;
    metrics.map_at_100 = map / n;
    metrics
}
