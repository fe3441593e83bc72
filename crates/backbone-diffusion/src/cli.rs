use super::commands;
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train the diffusion model
    Train(TrainArgs),
    /// Generate a backbone from a trained checkpoint
    Sample(SampleArgs),
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    #[arg(long, default_value_t = 300)]
    pub num_epochs: usize,

    #[arg(long, default_value_t = 1e-5)]
    pub learning_rate: f64,

    #[arg(long, default_value_t = 1000)]
    pub diffusion_steps: usize,

    #[arg(long, default_value_t = 256)]
    pub max_residues: usize,

    #[arg(long, default_value_t = 128)]
    pub hidden_size: usize,

    #[arg(long, default_value_t = 128)]
    pub edge_embed_dim: usize,

    #[arg(long, default_value_t = 4)]
    pub num_egnn_layers: usize,

    #[arg(long, default_value_t = 37)]
    pub num_atoms: usize,

    #[arg(long, default_value = "checkpoint.safetensors")]
    pub checkpoint: String,

    /// Resume from an existing checkpoint
    #[arg(long)]
    pub resume: bool,

    /// Learning rate override when resuming
    #[arg(long)]
    pub resume_lr: Option<f64>,

    /// Force CPU execution
    #[arg(long)]
    pub cpu: bool,
}

#[derive(Args, Debug)]
pub struct SampleArgs {
    #[arg(long, default_value = "checkpoint.safetensors")]
    pub checkpoint: String,

    #[arg(long, default_value = "backbone.safetensors")]
    pub output: String,

    #[arg(long, default_value_t = 1.0)]
    pub init_scale: f64,

    #[arg(long, default_value_t = 1.0)]
    pub noise_scale: f64,

    /// Force CPU execution
    #[arg(long)]
    pub cpu: bool,
}

impl Cli {
    pub fn execute(self) -> anyhow::Result<()> {
        match self.command {
            Commands::Train(args) => commands::train::execute(args),
            Commands::Sample(args) => commands::sample::execute(args),
        }
    }
}
