//! Equivariant graph message passing over residue nodes and atom coordinates.
use super::encoding::sinusoidal_positional_encoding;
use candle_core::{Module, Result, Tensor, D};
use candle_nn::{layer_norm, linear, LayerNorm, Linear, VarBuilder};

const LAYER_NORM_EPS: f64 = 1e-5;

/// Edge MLP: Linear -> SiLU -> Linear -> SiLU.
#[derive(Debug, Clone)]
struct EdgeMlp {
    w1: Linear,
    w2: Linear,
}

impl EdgeMlp {
    fn load(vb: VarBuilder, dim_in: usize, dim_hidden: usize) -> Result<Self> {
        let w1 = linear(dim_in, dim_hidden, vb.pp("w1"))?;
        let w2 = linear(dim_hidden, dim_hidden, vb.pp("w2"))?;
        Ok(Self { w1, w2 })
    }
}

impl Module for EdgeMlp {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.w1.forward(x)?.silu()?.apply(&self.w2)?.silu()
    }
}

/// Node MLP: Linear -> SiLU -> Linear.
#[derive(Debug, Clone)]
struct NodeMlp {
    w1: Linear,
    w2: Linear,
}

impl NodeMlp {
    fn load(vb: VarBuilder, dim_in: usize, dim_hidden: usize, dim_out: usize) -> Result<Self> {
        let w1 = linear(dim_in, dim_hidden, vb.pp("w1"))?;
        let w2 = linear(dim_hidden, dim_out, vb.pp("w2"))?;
        Ok(Self { w1, w2 })
    }
}

impl Module for NodeMlp {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.w1.forward(x)?.silu()?.apply(&self.w2)
    }
}

/// One round of equivariant message passing.
///
/// Scalar features flow through edge and node MLPs; geometry flows only
/// through the atom-averaged directional vectors between residue pairs, so a
/// global rotation/translation of the inputs moves the coordinate update with
/// it. Learned weights aside, the layer is stateless across calls.
#[derive(Debug, Clone)]
pub struct EGNNLayer {
    edge_mlp: EdgeMlp,
    node_mlp: NodeMlp,
    node_norm: LayerNorm,
    coord_w1: Linear,
    coord_w2: Linear,
    edge_embed_dim: usize,
    max_len: usize,
}

impl EGNNLayer {
    pub fn load(
        vb: VarBuilder,
        input_nf: usize,
        hidden_nf: usize,
        output_nf: usize,
        edge_embed_dim: usize,
        max_len: usize,
    ) -> Result<Self> {
        // +3 for the directional vector appended to each edge feature
        let edge_in = 2 * input_nf + edge_embed_dim + 3;
        let edge_mlp = EdgeMlp::load(vb.pp("edge_mlp"), edge_in, hidden_nf)?;
        let node_mlp = NodeMlp::load(vb.pp("node_mlp"), input_nf + hidden_nf, hidden_nf, output_nf)?;
        let node_norm = layer_norm(output_nf, LAYER_NORM_EPS, vb.pp("node_norm"))?;
        let coord_w1 = linear(hidden_nf, hidden_nf, vb.pp("coord_mlp").pp("w1"))?;
        let coord_w2 = linear(hidden_nf, 1, vb.pp("coord_mlp").pp("w2"))?;
        Ok(Self {
            edge_mlp,
            node_mlp,
            node_norm,
            coord_w1,
            coord_w2,
            edge_embed_dim,
            max_len,
        })
    }

    /// Run one message-passing round.
    ///
    /// * `coords` — `[B, N, A, 3]`
    /// * `node_features` — `[B, N, input_nf]`
    /// * `atom_mask` — `[B, N, A]`, 0/1 float
    /// * `residue_indices` — `[B, N]`, integer labels as floats
    ///
    /// Returns the updated coordinates `[B, N, A, 3]` and node features
    /// `[B, N, output_nf]`. Atom slots masked out receive no coordinate
    /// update.
    pub fn forward(
        &self,
        coords: &Tensor,
        node_features: &Tensor,
        atom_mask: &Tensor,
        residue_indices: &Tensor,
    ) -> Result<(Tensor, Tensor)> {
        let (batch_size, seq_len, _num_atoms, _) = coords.dims4()?;
        let feat_dim = node_features.dim(D::Minus1)?;

        // Signed pairwise residue offsets, encoded per node pair
        let rel_indices = residue_indices
            .unsqueeze(2)?
            .broadcast_sub(&residue_indices.unsqueeze(1)?)?; // [B, N, N]
        let rel_enc =
            sinusoidal_positional_encoding(&rel_indices, self.edge_embed_dim, self.max_len as f64)?;

        // Atom-averaged coordinate difference carries the geometry
        let directional = coords
            .unsqueeze(2)?
            .broadcast_sub(&coords.unsqueeze(1)?)? // [B, N, N, A, 3]
            .mean(3)?; // [B, N, N, 3]

        let h_i = node_features
            .unsqueeze(2)?
            .expand((batch_size, seq_len, seq_len, feat_dim))?
            .contiguous()?;
        let h_j = node_features
            .unsqueeze(1)?
            .expand((batch_size, seq_len, seq_len, feat_dim))?
            .contiguous()?;
        let edge_features = Tensor::cat(&[&h_i, &h_j, &rel_enc, &directional], D::Minus1)?;

        let edge_messages = self.edge_mlp.forward(&edge_features)?; // [B, N, N, hidden_nf]

        // Scalar feature update: aggregate over neighbors, then normalize
        let aggregated = edge_messages.sum(2)?;
        let node_in = Tensor::cat(&[node_features, &aggregated], D::Minus1)?;
        let updated_features = self.node_norm.forward(&self.node_mlp.forward(&node_in)?)?;

        // Coordinate update: a scalar gate per edge times the directional
        // vector, summed over neighbors and broadcast to every atom slot
        let gates = self.coord_w1.forward(&edge_messages)?.silu()?.apply(&self.coord_w2)?;
        let displacement = gates.broadcast_mul(&directional)?.sum(2)?; // [B, N, 3]
        let masked_displacement = displacement
            .unsqueeze(2)?
            .broadcast_mul(&atom_mask.unsqueeze(D::Minus1)?)?;
        let updated_coords = coords.broadcast_add(&masked_displacement)?;

        Ok((updated_coords, updated_features))
    }
}
