//! Training loop and checkpoint bookkeeping around the diffusion model.
use crate::models::diffusion::config::DiffusionConfig;
use crate::models::diffusion::model::ProteinDiffusionModel;
use candle_core::{DType, Device, Result, Tensor, D};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub num_epochs: usize,
    pub learning_rate: f64,
    /// Save a checkpoint every `save_every` epochs.
    pub save_every: usize,
    pub checkpoint_path: PathBuf,
    pub resume: bool,
    /// Override the learning rate when resuming from a checkpoint.
    pub resume_lr: Option<f64>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            num_epochs: 300,
            learning_rate: 1e-5,
            save_every: 10,
            checkpoint_path: PathBuf::from("checkpoint.safetensors"),
            resume: false,
            resume_lr: None,
        }
    }
}

/// One minibatch of ground-truth structures. Parsing structure files into
/// these tensors is up to the caller.
#[derive(Debug, Clone)]
pub struct TrainingBatch {
    /// `[B, N, A, 3]`
    pub coords: Tensor,
    /// `[B, N]`, float position labels
    pub residue_indices: Tensor,
    /// `[B, N, A]`, 0/1 float
    pub atom_mask: Tensor,
}

/// Everything needed to resume training, stored as a JSON sidecar next to the
/// safetensors weights.
#[derive(Debug, Serialize, Deserialize)]
struct TrainState {
    epoch: usize,
    train_losses: Vec<f64>,
    learning_rate: f64,
    model_config: DiffusionConfig,
}

pub struct Trainer {
    varmap: VarMap,
    model: ProteinDiffusionModel,
    optimizer: AdamW,
    train_config: TrainConfig,
    device: Device,
    start_epoch: usize,
    train_losses: Vec<f64>,
}

impl Trainer {
    pub fn new(
        model_config: DiffusionConfig,
        train_config: TrainConfig,
        device: &Device,
    ) -> anyhow::Result<Self> {
        let mut varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = ProteinDiffusionModel::load(vb, &model_config)?;
        let mut optimizer = AdamW::new(
            varmap.all_vars(),
            ParamsAdamW {
                lr: train_config.learning_rate,
                weight_decay: 0.0,
                ..Default::default()
            },
        )?;

        let mut start_epoch = 0;
        let mut train_losses = Vec::new();
        if train_config.resume && train_config.checkpoint_path.exists() {
            varmap.load(&train_config.checkpoint_path)?;
            let state = read_train_state(&train_config.checkpoint_path)?;
            start_epoch = state.epoch + 1;
            train_losses = state.train_losses;
            if let Some(lr) = train_config.resume_lr {
                optimizer.set_learning_rate(lr);
                println!("Learning rate updated to {lr:.6}");
            }
            println!("Checkpoint loaded: resuming from epoch {start_epoch}");
        }

        Ok(Self {
            varmap,
            model,
            optimizer,
            train_config,
            device: device.clone(),
            start_epoch,
            train_losses,
        })
    }

    pub fn model(&self) -> &ProteinDiffusionModel {
        &self.model
    }

    pub fn train_losses(&self) -> &[f64] {
        &self.train_losses
    }

    /// One optimizer step on one batch. Returns the summed masked squared
    /// error and the number of valid atoms, so the caller can normalize.
    pub fn train_step(&mut self, batch: &TrainingBatch) -> Result<(f64, f64)> {
        let batch_size = batch.coords.dim(0)?;
        let diffusion_steps = self.model.schedule().diffusion_steps();

        // Per-example random timestep
        let mut rng = rand::thread_rng();
        let sampled: Vec<u32> = (0..batch_size)
            .map(|_| rng.gen_range(0..diffusion_steps as u32))
            .collect();
        let times = Tensor::from_vec(sampled, batch_size, &self.device)?;

        // Forward diffusion, then ask the model for the injected noise back
        let noise = batch.coords.randn_like(0.0, 1.0)?;
        let noisy_coords = self
            .model
            .schedule()
            .forward_noise(&batch.coords, &times, &noise)?;
        let predicted_noise =
            self.model
                .forward(&noisy_coords, &batch.residue_indices, &times, &batch.atom_mask)?;

        let squared_error = (predicted_noise - noise)?.sqr()?;
        let loss = squared_error
            .broadcast_mul(&batch.atom_mask.unsqueeze(D::Minus1)?)?
            .sum_all()?;
        self.optimizer.backward_step(&loss)?;

        let valid_atoms = batch.atom_mask.sum_all()?.to_scalar::<f32>()? as f64;
        Ok((loss.to_scalar::<f32>()? as f64, valid_atoms))
    }

    /// Run the epoch loop over the supplied batches, checkpointing
    /// periodically. Returns the per-epoch loss history.
    pub fn train(&mut self, batches: &[TrainingBatch]) -> anyhow::Result<Vec<f64>> {
        let num_epochs = self.train_config.num_epochs;
        for epoch in self.start_epoch..num_epochs {
            let mut epoch_loss = 0.0;
            let mut total_atoms = 0.0;
            for batch in batches {
                let (loss, valid_atoms) = self.train_step(batch)?;
                epoch_loss += loss;
                total_atoms += valid_atoms;
            }
            let avg_loss = if total_atoms > 0.0 {
                epoch_loss / total_atoms
            } else {
                0.0
            };
            println!(
                "Epoch {}/{num_epochs}, Train Loss: {avg_loss:.4}",
                epoch + 1
            );
            self.train_losses.push(avg_loss);

            if (epoch + 1) % self.train_config.save_every == 0 {
                self.save_checkpoint(epoch)?;
            }
        }
        Ok(self.train_losses.clone())
    }

    /// Write the weights plus a JSON sidecar with the resumable train state.
    pub fn save_checkpoint(&self, epoch: usize) -> anyhow::Result<()> {
        let path = &self.train_config.checkpoint_path;
        self.varmap.save(path)?;
        let state = TrainState {
            epoch,
            train_losses: self.train_losses.clone(),
            learning_rate: self.optimizer.learning_rate(),
            model_config: self.model.config().clone(),
        };
        let sidecar = File::create(sidecar_path(path))?;
        serde_json::to_writer_pretty(sidecar, &state)?;
        println!("Checkpoint saved at {}", path.display());
        Ok(())
    }
}

fn sidecar_path(checkpoint_path: &Path) -> PathBuf {
    checkpoint_path.with_extension("json")
}

fn read_train_state(checkpoint_path: &Path) -> anyhow::Result<TrainState> {
    let file = File::open(sidecar_path(checkpoint_path))?;
    Ok(serde_json::from_reader(file)?)
}

/// Restore a trained model (weights + config) from a checkpoint written by
/// [`Trainer::save_checkpoint`].
pub fn load_model_from_checkpoint(
    checkpoint_path: &Path,
    device: &Device,
) -> anyhow::Result<ProteinDiffusionModel> {
    let state = read_train_state(checkpoint_path)?;
    let mut varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
    let model = ProteinDiffusionModel::load(vb, &state.model_config)?;
    varmap.load(checkpoint_path)?;
    Ok(model)
}
