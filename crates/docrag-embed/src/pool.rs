use anyhow::{ensure, Result};
use candle_core::{DType, Tensor};

/// Mean-pool `[B, T, H]` hidden states over unmasked tokens, then L2-normalise each row.
pub fn masked_mean_l2(hidden: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
    let dims = hidden.dims();
    ensure!(dims.len() == 3, "hidden shape must be [B,T,H], got {:?}", dims);
    let (batch, hidden_dim) = (dims[0], dims[2]);

    let mask = attention_mask.to_device(hidden.device())?.to_dtype(hidden.dtype())?;
    let mask_3d = mask.unsqueeze(2)?.broadcast_as(hidden.shape())?;
    let summed = (hidden * &mask_3d)?.sum(1)?;
    // Rows with an all-zero mask divide by one instead of zero.
    let lengths = mask.sum_keepdim(1)?.clamp(1.0, 1e9)?.to_dtype(summed.dtype())?;
    let mean = summed.broadcast_div(&lengths)?;

    let eps = match hidden.dtype() { DType::F16 => 1e-6, _ => 1e-12 };
    let norm = (mean.sqr()?.sum_keepdim(1)?.sqrt()? + eps)?;
    let pooled = mean.broadcast_div(&norm)?;
    ensure!(pooled.dims() == [batch, hidden_dim], "pooled shape {:?}", pooled.dims());
    Ok(pooled)
}
