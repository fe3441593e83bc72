//! backbone-diffusion
//!
//! - a DDPM over protein backbone coordinates with an EGNN denoiser.
//! - training loop, reverse-sampling driver, and a CLI around them.
//!
//! ```shell
//! cargo run -- train --help
//! cargo run -- sample --help
//! ```
use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::{Device, Result};

pub mod models;
pub mod sampling;
pub mod training;

pub use models::diffusion::config::DiffusionConfig;
pub use models::diffusion::egnn::EGNNLayer;
pub use models::diffusion::encoding::sinusoidal_positional_encoding;
pub use models::diffusion::model::ProteinDiffusionModel;
pub use models::diffusion::schedule::NoiseSchedule;
pub use sampling::{
    backbone_atom_mask, reverse_step, sample_protein_backbone, SampleConfig, BACKBONE_ATOM_SLOTS,
};
pub use training::{load_model_from_checkpoint, TrainConfig, Trainer, TrainingBatch};

pub fn device(cpu: bool) -> Result<Device> {
    if cpu {
        Ok(Device::Cpu)
    } else if cuda_is_available() {
        Ok(Device::new_cuda(0)?)
    } else if metal_is_available() {
        Ok(Device::new_metal(0)?)
    } else {
        Ok(Device::Cpu)
    }
}
