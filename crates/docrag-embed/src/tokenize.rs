use anyhow::{anyhow, Result};
use candle_core::{Device, Tensor};
use tokenizers::Tokenizer;

/// XLM-RoBERTa `<pad>` token id.
pub const PAD_TOKEN_ID: u32 = 1;

/// Tokenise a batch, truncating or padding every row to `max_len`.
///
/// Returns `(input_ids, attention_mask)`, both `[B, max_len]`.
pub fn tokenize_batch(tokenizer: &Tokenizer, texts: &[String], max_len: usize, device: &Device) -> Result<(Tensor, Tensor)> {
    let mut all_ids = Vec::with_capacity(texts.len() * max_len);
    let mut all_mask = Vec::with_capacity(texts.len() * max_len);
    for text in texts {
        let enc = tokenizer.encode(text.as_str(), true).map_err(|e| anyhow!("tokenization failed: {e}"))?;
        let (ids, mask) = pad_to(enc.get_ids(), enc.get_attention_mask(), max_len);
        all_ids.extend(ids);
        all_mask.extend(mask);
    }
    let input_ids = Tensor::from_vec(all_ids, (texts.len(), max_len), device)?;
    let attention_mask = Tensor::from_vec(all_mask, (texts.len(), max_len), device)?;
    Ok((input_ids, attention_mask))
}

fn pad_to(ids: &[u32], mask: &[u32], max_len: usize) -> (Vec<u32>, Vec<u32>) {
    let mut ids: Vec<u32> = ids.iter().copied().take(max_len).collect();
    let mut mask: Vec<u32> = mask.iter().copied().take(max_len).collect();
    ids.resize(max_len, PAD_TOKEN_ID);
    mask.resize(max_len, 0);
    (ids, mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_short_and_truncates_long_sequences() {
        let (ids, mask) = pad_to(&[0, 5, 2], &[1, 1, 1], 5);
        assert_eq!(ids, vec![0, 5, 2, PAD_TOKEN_ID, PAD_TOKEN_ID]);
        assert_eq!(mask, vec![1, 1, 1, 0, 0]);

        let (ids, mask) = pad_to(&[0, 5, 6, 7, 2], &[1; 5], 3);
        assert_eq!(ids, vec![0, 5, 6]);
        assert_eq!(mask, vec![1, 1, 1]);
    }
}
