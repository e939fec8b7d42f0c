//! Contrastive losses over (query, positive passage) embedding batches.
//!
//! Both take unnormalized `[N, D]` anchor and positive embeddings where row
//! `i` of each side belongs to the same pair. Every other row in the batch
//! serves as a negative.

use anyhow::{bail, Result};
use candle_core::Tensor;

use legalft_embed::{l2_normalize, truncate_dim};

pub trait EmbeddingLoss {
    /// Scalar loss tensor, differentiable w.r.t. both inputs.
    fn compute(&self, anchors: &Tensor, positives: &Tensor) -> Result<Tensor>;

    /// Short human-readable description, e.g. for the model card.
    fn describe(&self) -> String;
}

/// In-batch softmax over scaled cosine similarities.
///
/// L = -mean_i log( exp(s·cos(a_i, p_i)) / Σ_j exp(s·cos(a_i, p_j)) )
#[derive(Debug, Clone)]
pub struct MultipleNegativesRankingLoss {
    scale: f64,
}

impl MultipleNegativesRankingLoss {
    pub fn new(scale: f64) -> Self { Self { scale } }

    pub fn scale(&self) -> f64 { self.scale }
}

impl Default for MultipleNegativesRankingLoss {
    fn default() -> Self { Self::new(20.0) }
}

impl EmbeddingLoss for MultipleNegativesRankingLoss {
    fn compute(&self, anchors: &Tensor, positives: &Tensor) -> Result<Tensor> {
        let n = anchors.dim(0)?;
        if n != positives.dim(0)? {
            bail!("anchor batch {} does not match positive batch {}", n, positives.dim(0)?);
        }
        let scores = cosine_matrix(anchors, positives)?.affine(self.scale, 0.0)?;
        let labels = Tensor::arange(0u32, n as u32, anchors.device())?;
        Ok(candle_nn::loss::cross_entropy(&scores, &labels)?)
    }

    fn describe(&self) -> String { format!("MultipleNegativesRankingLoss(scale={}, similarity=cosine)", self.scale) }
}

/// `[N, M]` cosine similarities between rows of `a` and rows of `b`.
pub fn cosine_matrix(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let a = l2_normalize(a)?;
    let b = l2_normalize(b)?;
    Ok(a.matmul(&b.t()?)?)
}

/// Per-dimension loss values for logging.
#[derive(Debug, Clone, Default)]
pub struct MatryoshkaComponents {
    pub per_dim: Vec<(usize, f32)>,
    pub total: f32,
}

/// Runs the inner loss on embeddings truncated to each dim and sums the
/// weighted results.
pub struct MatryoshkaLoss<L> {
    inner: L,
    dims: Vec<usize>,
    weights: Vec<f32>,
}

impl<L: EmbeddingLoss> MatryoshkaLoss<L> {
    pub fn new(inner: L, dims: Vec<usize>, weights: Option<Vec<f32>>) -> Result<Self> {
        if dims.is_empty() { bail!("matryoshka loss needs at least one dim"); }
        let weights = weights.unwrap_or_else(|| vec![1.0; dims.len()]);
        if weights.len() != dims.len() {
            bail!("{} matryoshka weights for {} dims", weights.len(), dims.len());
        }
        Ok(Self { inner, dims, weights })
    }

    pub fn dims(&self) -> &[usize] { &self.dims }

    pub fn weights(&self) -> &[f32] { &self.weights }

    pub fn inner(&self) -> &L { &self.inner }

    /// Every dim must fit in the encoder's output width.
    pub fn check_width(&self, hidden_size: usize) -> Result<()> {
        if let Some(&too_wide) = self.dims.iter().find(|&&d| d > hidden_size) {
            bail!("matryoshka dim {} exceeds the model's embedding size {}", too_wide, hidden_size);
        }
        Ok(())
    }

    pub fn compute_with_components(&self, anchors: &Tensor, positives: &Tensor) -> Result<(Tensor, MatryoshkaComponents)> {
        let mut total: Option<Tensor> = None;
        let mut components = MatryoshkaComponents::default();
        for (&dim, &weight) in self.dims.iter().zip(&self.weights) {
            let a = truncate_dim(anchors, dim)?;
            let p = truncate_dim(positives, dim)?;
            let loss = self.inner.compute(&a, &p)?;
            components.per_dim.push((dim, loss.to_scalar::<f32>()?));
            let weighted = loss.affine(weight as f64, 0.0)?;
            total = Some(match total {
                Some(acc) => (acc + weighted)?,
                None => weighted,
            });
        }
        let Some(total) = total else { bail!("matryoshka loss needs at least one dim") };
        components.total = total.to_scalar::<f32>()?;
        Ok((total, components))
    }
}

impl<L: EmbeddingLoss> EmbeddingLoss for MatryoshkaLoss<L> {
    fn compute(&self, anchors: &Tensor, positives: &Tensor) -> Result<Tensor> {
        Ok(self.compute_with_components(anchors, positives)?.0)
    }

    fn describe(&self) -> String {
        format!("MatryoshkaLoss(dims={:?}, weights={:?}) over {}", self.dims, self.weights, self.inner.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, Var};

    fn make_vecs(n: usize, d: usize, phase: f32) -> Tensor {
        let data: Vec<f32> = (0..n * d).map(|i| ((i as f32) * 0.37 + phase).sin()).collect();
        Tensor::from_slice(&data, (n, d), &Device::Cpu).unwrap()
    }

    fn scalar(t: &Tensor) -> f32 { t.to_scalar::<f32>().unwrap() }

    #[test]
    fn aligned_pairs_score_lower_than_shuffled() {
        let loss_fn = MultipleNegativesRankingLoss::default();
        let a = make_vecs(4, 16, 0.0);
        let aligned = scalar(&loss_fn.compute(&a, &a).unwrap());
        let reversed = Tensor::cat(&[a.narrow(0, 2, 2).unwrap(), a.narrow(0, 0, 2).unwrap()], 0).unwrap();
        let shuffled = scalar(&loss_fn.compute(&a, &reversed).unwrap());
        assert!(aligned < shuffled, "aligned={aligned} shuffled={shuffled}");
        assert!(aligned >= 0.0);
    }

    #[test]
    fn mismatched_batches_are_rejected() {
        let loss_fn = MultipleNegativesRankingLoss::default();
        assert!(loss_fn.compute(&make_vecs(3, 8, 0.0), &make_vecs(2, 8, 0.0)).is_err());
    }

    #[test]
    fn matryoshka_sums_inner_losses() {
        let inner = MultipleNegativesRankingLoss::default();
        let a = make_vecs(5, 32, 0.0);
        let p = make_vecs(5, 32, 0.5);
        let dims = vec![32, 16, 8];
        let loss = MatryoshkaLoss::new(inner.clone(), dims.clone(), None).unwrap();
        let (total, components) = loss.compute_with_components(&a, &p).unwrap();

        let expected: f32 = dims
            .iter()
            .map(|&d| scalar(&inner.compute(&a.narrow(1, 0, d).unwrap(), &p.narrow(1, 0, d).unwrap()).unwrap()))
            .sum();
        assert!((scalar(&total) - expected).abs() < 1e-4);
        assert_eq!(components.per_dim.len(), 3);
        assert_eq!(components.per_dim[1].0, 16);
        assert!((components.total - expected).abs() < 1e-4);
    }

    #[test]
    fn matryoshka_weights_scale_components() {
        let a = make_vecs(4, 8, 0.0);
        let p = make_vecs(4, 8, 1.0);
        let plain = MatryoshkaLoss::new(MultipleNegativesRankingLoss::default(), vec![8], None).unwrap();
        let doubled = MatryoshkaLoss::new(MultipleNegativesRankingLoss::default(), vec![8], Some(vec![2.0])).unwrap();
        let base = scalar(&plain.compute(&a, &p).unwrap());
        let twice = scalar(&doubled.compute(&a, &p).unwrap());
        assert!((twice - 2.0 * base).abs() < 1e-4);
    }

    #[test]
    fn width_check_rejects_oversized_dims() {
        let loss = MatryoshkaLoss::new(MultipleNegativesRankingLoss::default(), vec![768, 512], None).unwrap();
        assert!(loss.check_width(1024).is_ok());
        assert!(loss.check_width(384).is_err());
    }

    #[test]
    fn gradients_reach_the_embeddings() {
        let var = Var::from_tensor(&make_vecs(4, 8, 0.0)).unwrap();
        let p = make_vecs(4, 8, 0.3);
        let loss = MatryoshkaLoss::new(MultipleNegativesRankingLoss::default(), vec![8, 4], None).unwrap();
        let total = loss.compute(var.as_tensor(), &p).unwrap();
        let grads = total.backward().unwrap();
        let g = grads.get(var.as_tensor()).expect("gradient for anchors");
        assert_eq!(g.dims(), &[4, 8]);
    }
}
