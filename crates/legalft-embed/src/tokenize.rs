use anyhow::{anyhow, bail, Result};
use candle_core::{Device, Tensor};
use tokenizers::{Tokenizer, TruncationParams};

/// Truncate at `max_len` inside the tokenizer so special tokens survive,
/// and leave padding to [`tokenize_batch`].
pub fn prepare_tokenizer(tokenizer: &mut Tokenizer, max_len: usize) -> Result<u32> {
    let pad_id = tokenizer
        .get_padding()
        .map(|p| p.pad_id)
        .or_else(|| tokenizer.token_to_id("[PAD]"))
        .unwrap_or(0);
    tokenizer.with_padding(None);
    tokenizer
        .with_truncation(Some(TruncationParams { max_length: max_len, ..Default::default() }))
        .map_err(|e| anyhow!("Failed to configure truncation: {}", e))?;
    Ok(pad_id)
}

/// Encode `texts` and pad to the longest sequence in the batch.
/// Returns `(input_ids [B,T] u32, attention_mask [B,T] u32)`.
pub fn tokenize_batch(tokenizer: &Tokenizer, texts: &[&str], pad_id: u32, device: &Device) -> Result<(Tensor, Tensor)> {
    if texts.is_empty() { bail!("cannot tokenize an empty batch"); }
    let encodings = tokenizer.encode_batch(texts.to_vec(), true).map_err(|e| anyhow!("Tokenization failed: {}", e))?;
    let seq_len = encodings.iter().map(|e| e.get_ids().len()).max().unwrap_or(1).max(1);
    let batch = encodings.len();
    let mut ids = Vec::with_capacity(batch * seq_len);
    let mut mask = Vec::with_capacity(batch * seq_len);
    for enc in &encodings {
        let n = enc.get_ids().len();
        ids.extend_from_slice(enc.get_ids());
        mask.extend_from_slice(enc.get_attention_mask());
        ids.extend(std::iter::repeat(pad_id).take(seq_len - n));
        mask.extend(std::iter::repeat(0u32).take(seq_len - n));
    }
    let input_ids = Tensor::from_vec(ids, (batch, seq_len), device)?;
    let attention_mask = Tensor::from_vec(mask, (batch, seq_len), device)?;
    Ok((input_ids, attention_mask))
}
