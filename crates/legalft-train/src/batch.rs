use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use legalft_core::types::TrainingExample;

/// One batch of aligned queries and positive passages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch<'a> {
    pub queries: Vec<&'a str>,
    pub passages: Vec<&'a str>,
}

impl Batch<'_> {
    pub fn len(&self) -> usize { self.queries.len() }
    pub fn is_empty(&self) -> bool { self.queries.is_empty() }
}

/// Fixed-size batches over the examples. The last batch may be short.
pub struct BatchSource {
    examples: Vec<TrainingExample>,
    order: Vec<usize>,
    batch_size: usize,
    rng: Option<StdRng>,
}

impl BatchSource {
    /// Examples are served in their given order every epoch.
    pub fn new(examples: Vec<TrainingExample>, batch_size: usize) -> Self {
        assert!(batch_size > 0, "batch_size must be > 0");
        let order = (0..examples.len()).collect();
        Self { examples, order, batch_size, rng: None }
    }

    /// Reshuffle before every epoch with a seeded generator.
    pub fn shuffled(examples: Vec<TrainingExample>, batch_size: usize, seed: u64) -> Self {
        let mut source = Self::new(examples, batch_size);
        source.rng = Some(StdRng::seed_from_u64(seed));
        source
    }

    /// Batches per epoch.
    pub fn len(&self) -> usize { self.examples.len().div_ceil(self.batch_size) }

    pub fn is_empty(&self) -> bool { self.examples.is_empty() }

    pub fn batch_size(&self) -> usize { self.batch_size }

    pub fn num_examples(&self) -> usize { self.examples.len() }

    pub fn epoch(&mut self) -> impl Iterator<Item = Batch<'_>> + '_ {
        if let Some(rng) = self.rng.as_mut() { self.order.shuffle(rng); }
        let examples = &self.examples;
        self.order.chunks(self.batch_size).map(move |idx| Batch {
            queries: idx.iter().map(|&i| examples[i].query.as_str()).collect(),
            passages: idx.iter().map(|&i| examples[i].passage.as_str()).collect(),
        })
    }
}
