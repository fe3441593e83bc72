//! The fixed forward-noising schedule and the DDPM algebra built on it.
use candle_core::{bail, Device, IndexOp, Result, Tensor};

/// Linear beta schedule with its derived alpha products.
///
/// Computed once at model construction and immutable afterwards. All four
/// arrays have length `diffusion_steps`; `alpha_cumprod` is strictly
/// decreasing and stays inside (0, 1) as long as `0 < beta_start` and
/// `beta_end < 1`, which construction enforces.
#[derive(Debug, Clone)]
pub struct NoiseSchedule {
    betas: Tensor,
    alphas: Tensor,
    alpha_cumprod: Tensor,
    alpha_cumprod_prev: Tensor,
    diffusion_steps: usize,
}

impl NoiseSchedule {
    pub fn new(
        diffusion_steps: usize,
        beta_start: f64,
        beta_end: f64,
        device: &Device,
    ) -> Result<Self> {
        if diffusion_steps == 0 {
            bail!("noise schedule needs at least one diffusion step");
        }
        if !(beta_start > 0.0 && beta_start <= beta_end && beta_end < 1.0) {
            bail!(
                "invalid beta range [{beta_start}, {beta_end}]: requires 0 < beta_start <= beta_end < 1"
            );
        }

        let mut betas = Vec::with_capacity(diffusion_steps);
        let mut alphas = Vec::with_capacity(diffusion_steps);
        let mut alpha_cumprod = Vec::with_capacity(diffusion_steps);
        let mut alpha_cumprod_prev = Vec::with_capacity(diffusion_steps);
        let mut running = 1.0f64;
        for i in 0..diffusion_steps {
            let frac = if diffusion_steps > 1 {
                i as f64 / (diffusion_steps - 1) as f64
            } else {
                0.0
            };
            let beta = beta_start + (beta_end - beta_start) * frac;
            alpha_cumprod_prev.push(running as f32);
            running *= 1.0 - beta;
            betas.push(beta as f32);
            alphas.push((1.0 - beta) as f32);
            alpha_cumprod.push(running as f32);
        }

        Ok(Self {
            betas: Tensor::from_vec(betas, diffusion_steps, device)?,
            alphas: Tensor::from_vec(alphas, diffusion_steps, device)?,
            alpha_cumprod: Tensor::from_vec(alpha_cumprod, diffusion_steps, device)?,
            alpha_cumprod_prev: Tensor::from_vec(alpha_cumprod_prev, diffusion_steps, device)?,
            diffusion_steps,
        })
    }

    pub fn diffusion_steps(&self) -> usize {
        self.diffusion_steps
    }

    pub fn betas(&self) -> &Tensor {
        &self.betas
    }

    pub fn alphas(&self) -> &Tensor {
        &self.alphas
    }

    pub fn alpha_cumprod(&self) -> &Tensor {
        &self.alpha_cumprod
    }

    pub fn alpha_cumprod_prev(&self) -> &Tensor {
        &self.alpha_cumprod_prev
    }

    /// Cumulative alpha at a single timestep, as a host scalar.
    pub fn alpha_cumprod_at(&self, t: usize) -> Result<f64> {
        self.check_in_range(t as u32)?;
        Ok(self.alpha_cumprod.i(t)?.to_scalar::<f32>()? as f64)
    }

    /// Cumulative alpha of the previous timestep (exactly 1.0 at t = 0).
    pub fn alpha_cumprod_prev_at(&self, t: usize) -> Result<f64> {
        self.check_in_range(t as u32)?;
        Ok(self.alpha_cumprod_prev.i(t)?.to_scalar::<f32>()? as f64)
    }

    /// Gather the cumulative alphas for a batch of timesteps, reshaped to
    /// `[B, 1, 1, 1]` for broadcasting against `[B, N, A, 3]` coordinates.
    ///
    /// `times` must be a `u32` tensor of shape `[B]`; any value outside
    /// `[0, diffusion_steps)` is an error, never a clamp.
    pub fn gather_alpha_cumprod(&self, times: &Tensor) -> Result<Tensor> {
        let batch_size = times.dims1()?;
        for t in times.to_vec1::<u32>()? {
            self.check_in_range(t)?;
        }
        self.alpha_cumprod
            .index_select(times, 0)?
            .reshape((batch_size, 1, 1, 1))
    }

    /// Forward-noising: `sqrt(a_t) * coords + sqrt(1 - a_t) * noise`.
    pub fn forward_noise(&self, coords: &Tensor, times: &Tensor, noise: &Tensor) -> Result<Tensor> {
        let cum_a_t = self.gather_alpha_cumprod(times)?;
        let signal = coords.broadcast_mul(&cum_a_t.sqrt()?)?;
        let corruption = noise.broadcast_mul(&cum_a_t.affine(-1.0, 1.0)?.sqrt()?)?;
        signal + corruption
    }

    /// The closed-form inverse of [`Self::forward_noise`]: recover the noise
    /// residual from a noisy input and an estimate of the clean coordinates,
    /// `(noisy - sqrt(a_t) * x0_hat) / sqrt(1 - a_t)`.
    pub fn invert_forward_noise(
        &self,
        noisy: &Tensor,
        x0_hat: &Tensor,
        times: &Tensor,
    ) -> Result<Tensor> {
        let cum_a_t = self.gather_alpha_cumprod(times)?;
        let signal = x0_hat.broadcast_mul(&cum_a_t.sqrt()?)?;
        (noisy - signal)?.broadcast_div(&cum_a_t.affine(-1.0, 1.0)?.sqrt()?)
    }

    fn check_in_range(&self, t: u32) -> Result<()> {
        if t as usize >= self.diffusion_steps {
            bail!(
                "timestep {t} out of range for a schedule with {} diffusion steps",
                self.diffusion_steps
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(steps: usize) -> Result<NoiseSchedule> {
        NoiseSchedule::new(steps, 1e-4, 0.02, &Device::Cpu)
    }

    #[test]
    fn arrays_have_schedule_length() -> Result<()> {
        let s = schedule(50)?;
        assert_eq!(s.betas().dims1()?, 50);
        assert_eq!(s.alphas().dims1()?, 50);
        assert_eq!(s.alpha_cumprod().dims1()?, 50);
        assert_eq!(s.alpha_cumprod_prev().dims1()?, 50);
        Ok(())
    }

    #[test]
    fn alpha_cumprod_strictly_decreasing() -> Result<()> {
        let s = schedule(100)?;
        let values = s.alpha_cumprod().to_vec1::<f32>()?;
        for pair in values.windows(2) {
            assert!(pair[1] < pair[0], "{} !< {}", pair[1], pair[0]);
        }
        assert!(values[0] > 0.0 && values[values.len() - 1] > 0.0);
        Ok(())
    }

    #[test]
    fn boundary_values() -> Result<()> {
        let s = schedule(10)?;
        let first = s.alpha_cumprod_at(0)?;
        assert!((first - (1.0 - 1e-4)).abs() < 1e-6);
        assert_eq!(s.alpha_cumprod_prev_at(0)?, 1.0);
        Ok(())
    }

    #[test]
    fn rejects_degenerate_beta_ranges() {
        let device = Device::Cpu;
        assert!(NoiseSchedule::new(10, 0.0, 0.02, &device).is_err());
        assert!(NoiseSchedule::new(10, 1e-4, 1.0, &device).is_err());
        assert!(NoiseSchedule::new(10, 0.02, 1e-4, &device).is_err());
        assert!(NoiseSchedule::new(0, 1e-4, 0.02, &device).is_err());
    }

    #[test]
    fn out_of_range_timestep_is_an_error() -> Result<()> {
        let s = schedule(10)?;
        assert!(s.alpha_cumprod_at(10).is_err());
        let times = Tensor::new(&[3u32, 10u32], &Device::Cpu)?;
        assert!(s.gather_alpha_cumprod(&times).is_err());
        Ok(())
    }

    #[test]
    fn noise_round_trip() -> Result<()> {
        let device = Device::Cpu;
        let s = schedule(20)?;
        let coords = Tensor::randn(0f32, 1f32, (2, 3, 4, 3), &device)?;
        let noise = Tensor::randn(0f32, 1f32, (2, 3, 4, 3), &device)?;
        let times = Tensor::new(&[5u32, 17u32], &device)?;

        let noisy = s.forward_noise(&coords, &times, &noise)?;
        let recovered = s.invert_forward_noise(&noisy, &coords, &times)?;

        let diff = (recovered - &noise)?.abs()?.flatten_all()?.to_vec1::<f32>()?;
        for d in diff {
            assert!(d < 1e-4, "noise mismatch: {d}");
        }
        Ok(())
    }
}
