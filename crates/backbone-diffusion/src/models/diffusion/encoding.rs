//! Sinusoidal positional encodings.
//!
//! Used in three places: per-residue sequence positions, normalized diffusion
//! timesteps, and signed pairwise residue offsets inside the EGNN layers.
use candle_core::{bail, Result, Tensor, D};
use std::f64::consts::PI;

/// Encode a tensor of scalar positions into fixed-frequency sine/cosine
/// features.
///
/// For each `i in 0..embed_dim/2` the inverse frequency is
/// `embed_size^(-2i/embed_dim)`; the output is the sine half followed by the
/// cosine half, concatenated on a new trailing axis of width `embed_dim`.
/// Broadcasts over any leading dims: `[B, N]` in, `[B, N, embed_dim]` out;
/// `[B, N, N]` in, `[B, N, N, embed_dim]` out.
///
/// `embed_dim` must be even; odd widths would leave the sin/cos halves
/// asymmetric and are rejected.
pub fn sinusoidal_positional_encoding(
    x: &Tensor,
    embed_dim: usize,
    embed_size: f64,
) -> Result<Tensor> {
    if embed_dim == 0 || embed_dim % 2 != 0 {
        bail!("positional encoding width must be a positive even number, got {embed_dim}");
    }
    let half_dim = embed_dim / 2;
    let inv_freq: Vec<f32> = (0..half_dim)
        .map(|i| (1.0 / embed_size.powf(2.0 * i as f64 / embed_dim as f64)) as f32)
        .collect();
    let inv_freq = Tensor::from_vec(inv_freq, half_dim, x.device())?;

    // angle = position * pi * f_i, for every frequency at once
    let angles = x
        .unsqueeze(D::Minus1)?
        .broadcast_mul(&(inv_freq * PI)?)?;
    Tensor::cat(&[angles.sin()?, angles.cos()?], D::Minus1)
}
