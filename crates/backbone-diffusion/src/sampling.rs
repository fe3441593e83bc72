//! Reverse-diffusion driver: iterates the learned denoiser from pure noise
//! down to a backbone structure.
use crate::models::diffusion::model::ProteinDiffusionModel;
use crate::models::diffusion::schedule::NoiseSchedule;
use candle_core::{DType, Device, Result, Tensor, D};

/// Atom slots holding the backbone atoms (N, CA, C, O) in the 37-slot layout.
pub const BACKBONE_ATOM_SLOTS: [usize; 4] = [0, 1, 2, 4];

#[derive(Debug, Clone)]
pub struct SampleConfig {
    /// Scale applied to the initial Gaussian coordinates.
    pub init_scale: f64,
    /// Scale applied to the fresh noise injected at each reverse step (t > 0).
    pub noise_scale: f64,
    /// Coordinates are clamped to `[-coord_clamp, coord_clamp]` after every
    /// step for numerical stability.
    pub coord_clamp: f64,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            init_scale: 1.0,
            noise_scale: 1.0,
            coord_clamp: 10.0,
        }
    }
}

/// Static mask selecting the backbone atom slots of every residue.
pub fn backbone_atom_mask(max_residues: usize, num_atoms: usize, device: &Device) -> Result<Tensor> {
    let mut row = vec![0f32; num_atoms];
    for slot in BACKBONE_ATOM_SLOTS {
        if slot < num_atoms {
            row[slot] = 1.0;
        }
    }
    let mask = row.repeat(max_residues);
    Tensor::from_vec(mask, (1, max_residues, num_atoms), device)
}

/// One step of the reverse recursion: the mean estimate for `x_{t-1}` from
/// `x_t` and the predicted noise, plus optional fresh noise, clamped.
///
/// `mean = (sqrt(a_{t-1}) * coords - sqrt(1 - a_{t-1}) * predicted_noise) / sqrt(a_t)`
pub fn reverse_step(
    schedule: &NoiseSchedule,
    coords: &Tensor,
    predicted_noise: &Tensor,
    t: usize,
    noise: Option<&Tensor>,
    coord_clamp: f64,
) -> Result<Tensor> {
    let alpha_t = schedule.alpha_cumprod_at(t)?;
    let alpha_t_prev = schedule.alpha_cumprod_prev_at(t)?;

    let mean = ((coords * alpha_t_prev.sqrt())?
        - (predicted_noise * (1.0 - alpha_t_prev).sqrt())?)?;
    let mean = (mean / alpha_t.sqrt())?;
    let next = match noise {
        Some(z) => (mean + z)?,
        None => mean,
    };
    next.clamp(-coord_clamp, coord_clamp)
}

/// Generate one backbone by running the full reverse chain.
///
/// Returns coordinates of shape `[max_residues, num_atoms, 3]` with
/// non-backbone atom slots at zero.
pub fn sample_protein_backbone(
    model: &ProteinDiffusionModel,
    config: &SampleConfig,
) -> Result<Tensor> {
    let device = model.get_device();
    let max_residues = model.config().max_residues;
    let num_atoms = model.config().num_atoms;
    let diffusion_steps = model.schedule().diffusion_steps();

    let atom_mask = backbone_atom_mask(max_residues, num_atoms, device)?;
    let mask4 = atom_mask.unsqueeze(D::Minus1)?;
    let residue_indices = Tensor::arange(0u32, max_residues as u32, device)?
        .to_dtype(DType::F32)?
        .unsqueeze(0)?;

    let init = Tensor::randn(0f32, 1f32, (1, max_residues, num_atoms, 3), device)?;
    let mut coords = (init * config.init_scale)?.broadcast_mul(&mask4)?;

    for t in (0..diffusion_steps).rev() {
        let times = Tensor::new(&[t as u32], device)?;
        let predicted_noise = model.forward(&coords, &residue_indices, &times, &atom_mask)?;

        // Fresh noise at every step except the last
        let z = if t > 0 {
            Some((coords.randn_like(0.0, 1.0)? * config.noise_scale)?)
        } else {
            None
        };
        coords = reverse_step(
            model.schedule(),
            &coords,
            &predicted_noise,
            t,
            z.as_ref(),
            config.coord_clamp,
        )?;
        // Keep masked slots at zero throughout the chain
        coords = coords.broadcast_mul(&mask4)?;

        if t % 100 == 0 {
            let values = coords.flatten_all()?.to_vec1::<f32>()?;
            let mean = values.iter().sum::<f32>() / values.len() as f32;
            let std = (values.iter().map(|v| (v - mean).powi(2)).sum::<f32>()
                / values.len() as f32)
                .sqrt();
            println!("Step {t}: coords mean={mean:.4}, std={std:.4}");
        }
    }

    coords.squeeze(0)
}
