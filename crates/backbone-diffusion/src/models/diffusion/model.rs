//! The DDPM denoiser: positional embeddings, a stack of EGNN layers, and the
//! closed-form noise extraction.
use super::config::DiffusionConfig;
use super::egnn::EGNNLayer;
use super::encoding::sinusoidal_positional_encoding;
use super::schedule::NoiseSchedule;
use candle_core::{bail, DType, Device, Result, Tensor, D};
use candle_nn::VarBuilder;

/// Frequency base for the timestep encoding, per "Attention is All You Need".
const TIME_EMBED_BASE: f64 = 10000.0;

/// A denoising diffusion model over protein backbone coordinates.
///
/// The layer stack approximates a denoised coordinate estimate; the forward
/// pass converts that estimate into a predicted noise residual using the same
/// schedule values the forward-noising process uses, so training and sampling
/// stay algebraically consistent.
#[derive(Debug, Clone)]
pub struct ProteinDiffusionModel {
    schedule: NoiseSchedule,
    egnn_layers: Vec<EGNNLayer>,
    config: DiffusionConfig,
    device: Device,
}

impl ProteinDiffusionModel {
    pub fn load(vb: VarBuilder, config: &DiffusionConfig) -> Result<Self> {
        if config.hidden_size % 2 != 0 || config.edge_embed_dim % 2 != 0 {
            bail!(
                "hidden_size ({}) and edge_embed_dim ({}) must be even for sin/cos encodings",
                config.hidden_size,
                config.edge_embed_dim
            );
        }
        let schedule = NoiseSchedule::new(
            config.diffusion_steps,
            config.beta_start,
            config.beta_end,
            vb.device(),
        )?;
        let mut egnn_layers = Vec::with_capacity(config.num_egnn_layers);
        for i in 0..config.num_egnn_layers {
            egnn_layers.push(EGNNLayer::load(
                vb.pp("egnn_layers").pp(i),
                config.hidden_size,
                config.hidden_size,
                config.hidden_size,
                config.edge_embed_dim,
                config.max_residues,
            )?);
        }
        Ok(Self {
            schedule,
            egnn_layers,
            config: config.clone(),
            device: vb.device().clone(),
        })
    }

    /// Predict the noise residual present in `coords` at timestep `times`.
    ///
    /// * `coords` — noisy coordinates `[B, N, A, 3]`
    /// * `residue_indices` — position labels `[B, N]`, float
    /// * `times` — per-example timestep `[B]`, `u32`, in `[0, diffusion_steps)`
    /// * `atom_mask` — valid atom slots `[B, N, A]`, 0/1 float
    ///
    /// Returns the predicted noise `[B, N, A, 3]`, zeroed wherever the atom
    /// mask is zero.
    pub fn forward(
        &self,
        coords: &Tensor,
        residue_indices: &Tensor,
        times: &Tensor,
        atom_mask: &Tensor,
    ) -> Result<Tensor> {
        self.check_shapes(coords, residue_indices, times, atom_mask)?;

        // Residue position embedding
        let residue_embedding = sinusoidal_positional_encoding(
            residue_indices,
            self.config.hidden_size,
            self.config.max_residues as f64,
        )?; // [B, N, hidden]

        // Timestep embedding, normalized to [0, 1], broadcast over residues
        let normalized_times =
            (times.to_dtype(DType::F32)? / self.config.diffusion_steps as f64)?;
        let time_embedding = sinusoidal_positional_encoding(
            &normalized_times,
            self.config.hidden_size,
            TIME_EMBED_BASE,
        )?
        .unsqueeze(1)?; // [B, 1, hidden]

        let mut node_features = residue_embedding.broadcast_add(&time_embedding)?;
        let mut curr_coords = coords.clone();
        for layer in self.egnn_layers.iter() {
            (curr_coords, node_features) =
                layer.forward(&curr_coords, &node_features, atom_mask, residue_indices)?;
        }

        // The layer stack estimates x0; invert the forward-noising equation
        // to get the noise residual
        let predicted_noise = self
            .schedule
            .invert_forward_noise(coords, &curr_coords, times)?;
        predicted_noise.broadcast_mul(&atom_mask.unsqueeze(D::Minus1)?)
    }

    fn check_shapes(
        &self,
        coords: &Tensor,
        residue_indices: &Tensor,
        times: &Tensor,
        atom_mask: &Tensor,
    ) -> Result<()> {
        let (batch_size, seq_len, num_atoms, coord_dim) = coords.dims4()?;
        if coord_dim != 3 {
            bail!("coords must end in xyz, got trailing dim {coord_dim}");
        }
        if num_atoms != self.config.num_atoms {
            bail!(
                "coords carry {num_atoms} atom slots, model expects {}",
                self.config.num_atoms
            );
        }
        if residue_indices.dims2()? != (batch_size, seq_len) {
            bail!(
                "residue_indices shape {:?} does not match coords [{batch_size}, {seq_len}]",
                residue_indices.dims()
            );
        }
        if atom_mask.dims3()? != (batch_size, seq_len, num_atoms) {
            bail!(
                "atom_mask shape {:?} does not match coords [{batch_size}, {seq_len}, {num_atoms}]",
                atom_mask.dims()
            );
        }
        if times.dims1()? != batch_size {
            bail!(
                "times shape {:?} does not match batch size {batch_size}",
                times.dims()
            );
        }
        if times.dtype() != DType::U32 {
            bail!("times must be u32 timesteps, got {:?}", times.dtype());
        }
        Ok(())
    }

    pub fn schedule(&self) -> &NoiseSchedule {
        &self.schedule
    }

    pub fn config(&self) -> &DiffusionConfig {
        &self.config
    }

    pub fn get_device(&self) -> &Device {
        &self.device
    }
}
