use crate::cli::TrainArgs;
use backbone_diffusion::{device, DiffusionConfig, TrainConfig, Trainer, TrainingBatch};
use candle_core::{DType, Tensor};
use std::path::PathBuf;

pub fn execute(args: TrainArgs) -> anyhow::Result<()> {
    let device = device(args.cpu)?;

    let model_config = DiffusionConfig {
        max_residues: args.max_residues,
        diffusion_steps: args.diffusion_steps,
        pos_embed_size: args.max_residues,
        hidden_size: args.hidden_size,
        edge_embed_dim: args.edge_embed_dim,
        num_egnn_layers: args.num_egnn_layers,
        num_atoms: args.num_atoms,
        ..DiffusionConfig::backbone()
    };
    let train_config = TrainConfig {
        num_epochs: args.num_epochs,
        learning_rate: args.learning_rate,
        checkpoint_path: PathBuf::from(&args.checkpoint),
        resume: args.resume,
        resume_lr: args.resume_lr,
        ..TrainConfig::default()
    };

    let mut trainer = Trainer::new(model_config.clone(), train_config, &device)?;

    // Structure-file parsing lives outside this crate; until a data pipeline
    // is wired in, train against synthetic batches so the full loop and
    // checkpointing path can be exercised end to end.
    let batches = synthetic_batches(&model_config, 4, 2, &device)?;
    trainer.train(&batches)?;
    Ok(())
}

fn synthetic_batches(
    config: &DiffusionConfig,
    num_batches: usize,
    batch_size: usize,
    device: &candle_core::Device,
) -> anyhow::Result<Vec<TrainingBatch>> {
    let n = config.max_residues;
    let a = config.num_atoms;
    let residue_indices = Tensor::arange(0u32, n as u32, device)?
        .to_dtype(DType::F32)?
        .unsqueeze(0)?
        .expand((batch_size, n))?
        .contiguous()?;
    let atom_mask = Tensor::ones((batch_size, n, a), DType::F32, device)?;
    let mut batches = Vec::with_capacity(num_batches);
    for _ in 0..num_batches {
        batches.push(TrainingBatch {
            coords: Tensor::randn(0f32, 1f32, (batch_size, n, a, 3), device)?,
            residue_indices: residue_indices.clone(),
            atom_mask: atom_mask.clone(),
        });
    }
    Ok(batches)
}
