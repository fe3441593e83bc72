use serde::{Deserialize, Serialize};

/// Hyperparameters for [`ProteinDiffusionModel`](super::model::ProteinDiffusionModel).
///
/// Constructed once and passed by value; the model keeps its own copy so a
/// checkpoint sidecar can restore an identical forward contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffusionConfig {
    /// Maximum residues per sequence; also the frequency base for the
    /// residue-position encoding.
    pub max_residues: usize,
    /// Length of the noise schedule.
    pub diffusion_steps: usize,
    pub pos_embed_size: usize,
    /// Node feature width.
    pub hidden_size: usize,
    /// Width of the pairwise relative-position encoding.
    pub edge_embed_dim: usize,
    pub num_egnn_layers: usize,
    /// Atom slots per residue (37 covers the full heavy-atom layout).
    pub num_atoms: usize,
    pub beta_start: f64,
    pub beta_end: f64,
}

impl DiffusionConfig {
    /// Settings used for backbone generation at full scale.
    pub fn backbone() -> Self {
        Self {
            max_residues: 256,
            diffusion_steps: 1000,
            pos_embed_size: 256,
            hidden_size: 128,
            edge_embed_dim: 128,
            num_egnn_layers: 4,
            num_atoms: 37,
            beta_start: 1e-4,
            beta_end: 0.02,
        }
    }

    /// A small configuration for tests and smoke runs.
    pub fn tiny() -> Self {
        Self {
            max_residues: 4,
            diffusion_steps: 10,
            pos_embed_size: 8,
            hidden_size: 8,
            edge_embed_dim: 8,
            num_egnn_layers: 1,
            num_atoms: 2,
            beta_start: 1e-4,
            beta_end: 0.02,
        }
    }
}

impl Default for DiffusionConfig {
    fn default() -> Self {
        Self::backbone()
    }
}
