use anyhow::Result;
use backbone_diffusion::{
    load_model_from_checkpoint, DiffusionConfig, TrainConfig, Trainer, TrainingBatch,
};
use candle_core::{DType, Device, Tensor};

fn synthetic_batch(config: &DiffusionConfig, device: &Device) -> Result<TrainingBatch> {
    let n = config.max_residues;
    let a = config.num_atoms;
    Ok(TrainingBatch {
        coords: Tensor::randn(0f32, 1f32, (2, n, a, 3), device)?,
        residue_indices: Tensor::arange(0u32, n as u32, device)?
            .to_dtype(DType::F32)?
            .unsqueeze(0)?
            .expand((2, n))?
            .contiguous()?,
        atom_mask: Tensor::ones((2, n, a), DType::F32, device)?,
    })
}

#[test]
fn test_train_and_resume_round_trip() -> Result<()> {
    let device = Device::Cpu;
    let model_config = DiffusionConfig::tiny();
    let dir = tempfile::tempdir()?;
    let checkpoint = dir.path().join("checkpoint.safetensors");

    let train_config = TrainConfig {
        num_epochs: 2,
        learning_rate: 1e-4,
        save_every: 1,
        checkpoint_path: checkpoint.clone(),
        resume: false,
        resume_lr: None,
    };
    let mut trainer = Trainer::new(model_config.clone(), train_config.clone(), &device)?;
    let batch = synthetic_batch(&model_config, &device)?;
    let losses = trainer.train(std::slice::from_ref(&batch))?;

    assert_eq!(losses.len(), 2);
    for loss in &losses {
        assert!(loss.is_finite() && *loss >= 0.0);
    }
    assert!(checkpoint.exists());
    assert!(checkpoint.with_extension("json").exists());

    // A fresh trainer resumes where the first one stopped
    let resume_config = TrainConfig {
        num_epochs: 3,
        resume: true,
        resume_lr: Some(1e-5),
        ..train_config
    };
    let mut resumed = Trainer::new(model_config.clone(), resume_config, &device)?;
    assert_eq!(resumed.train_losses().len(), 2);
    let losses = resumed.train(std::slice::from_ref(&batch))?;
    assert_eq!(losses.len(), 3);

    // The checkpoint restores a model with an identical forward contract
    let model = load_model_from_checkpoint(&checkpoint, &device)?;
    let times = Tensor::new(&[0u32, 5u32], &device)?;
    let predicted = model.forward(
        &batch.coords,
        &batch.residue_indices,
        &times,
        &batch.atom_mask,
    )?;
    assert_eq!(predicted.dims(), batch.coords.dims());
    Ok(())
}

#[test]
fn test_masked_atoms_do_not_contribute_to_loss() -> Result<()> {
    let device = Device::Cpu;
    let model_config = DiffusionConfig::tiny();
    let dir = tempfile::tempdir()?;
    let train_config = TrainConfig {
        num_epochs: 1,
        checkpoint_path: dir.path().join("checkpoint.safetensors"),
        ..TrainConfig::default()
    };
    let mut trainer = Trainer::new(model_config.clone(), train_config, &device)?;

    // Every atom masked out: the masked squared error must be exactly zero.
    let mut batch = synthetic_batch(&model_config, &device)?;
    batch.atom_mask = batch.atom_mask.zeros_like()?;
    let (loss, valid_atoms) = trainer.train_step(&batch)?;
    assert_eq!(loss, 0.0);
    assert_eq!(valid_atoms, 0.0);
    Ok(())
}
