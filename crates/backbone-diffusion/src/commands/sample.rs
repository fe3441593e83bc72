use crate::cli::SampleArgs;
use backbone_diffusion::{device, load_model_from_checkpoint, sample_protein_backbone, SampleConfig};
use std::collections::HashMap;
use std::path::Path;

pub fn execute(args: SampleArgs) -> anyhow::Result<()> {
    let device = device(args.cpu)?;
    let model = load_model_from_checkpoint(Path::new(&args.checkpoint), &device)?;

    let sample_config = SampleConfig {
        init_scale: args.init_scale,
        noise_scale: args.noise_scale,
        ..SampleConfig::default()
    };
    let coords = sample_protein_backbone(&model, &sample_config)?;
    println!("Generated backbone shape: {:?}", coords.dims());

    let tensors = HashMap::from([("coords".to_string(), coords)]);
    candle_core::safetensors::save(&tensors, &args.output)?;
    println!("Coordinates written to {}", args.output);
    Ok(())
}
