/// `floor(batches_per_epoch * epochs * ratio)`, never more than the total step count.
pub fn warmup_steps(batches_per_epoch: usize, epochs: usize, ratio: f64) -> usize {
    let total = batches_per_epoch * epochs;
    ((total as f64 * ratio).floor() as usize).min(total)
}

/// Linear ramp from 0 to `peak` over `warmup` steps, then linear decay to 0
/// at `total` steps. `lr_at(k)` is the rate used for optimizer step `k`.
#[derive(Debug, Clone, Copy)]
pub struct WarmupLinear {
    peak: f64,
    warmup: usize,
    total: usize,
}

impl WarmupLinear {
    pub fn new(peak: f64, warmup: usize, total: usize) -> Self {
        Self { peak, warmup: warmup.min(total), total }
    }

    pub fn warmup(&self) -> usize { self.warmup }

    pub fn total(&self) -> usize { self.total }

    pub fn lr_at(&self, step: usize) -> f64 {
        if step < self.warmup {
            return self.peak * step as f64 / self.warmup.max(1) as f64;
        }
        let remaining = self.total.saturating_sub(step) as f64;
        let span = self.total.saturating_sub(self.warmup).max(1) as f64;
        self.peak * (remaining / span).max(0.0)
    }
}
