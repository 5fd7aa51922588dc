//! Attention and wavelet-mixing transformer blocks.

#[cfg(test)]
use candle_core::DType;
use candle_core::{Module, Result, Tensor};
use candle_nn::{LayerNorm, VarBuilder};

use crate::attention::Attention;
use crate::config::{AcwiConfig, MixingType};
use crate::error::not_implemented;
use crate::init::InitScheme;
use crate::layers::{layer_norm, maybe_layer_scale, DropPath, LayerScale, Mlp};
use crate::mixer::WaveletMixer;

fn scaled(ls: &Option<LayerScale>, x: Tensor) -> Result<Tensor> {
    match ls {
        Some(ls) => ls.forward(&x),
        None => Ok(x),
    }
}

/// Pre-norm self-attention block with optional layer scale.
pub struct AttentionBlock {
    norm1: LayerNorm,
    attn: Attention,
    ls1: Option<LayerScale>,
    drop_path1: DropPath,
    norm2: LayerNorm,
    mlp: Mlp,
    ls2: Option<LayerScale>,
    drop_path2: DropPath,
}

impl AttentionBlock {
    pub fn new(cfg: &AcwiConfig, drop_path: f64, init: &InitScheme, vb: VarBuilder) -> Result<Self> {
        let dim = cfg.embed_dim;
        Ok(Self {
            norm1: layer_norm(dim, vb.pp("norm1"))?,
            attn: Attention::new(
                dim,
                cfg.num_heads,
                cfg.qkv_bias,
                cfg.attn_drop_rate,
                cfg.drop_rate,
                init,
                vb.pp("attn"),
            )?,
            ls1: maybe_layer_scale(dim, cfg.init_values, vb.pp("ls1"))?,
            drop_path1: DropPath::new(drop_path),
            norm2: layer_norm(dim, vb.pp("norm2"))?,
            mlp: Mlp::new(dim, cfg.mlp_hidden(dim), cfg.drop_rate, init, vb.pp("mlp"))?,
            ls2: maybe_layer_scale(dim, cfg.init_values, vb.pp("ls2"))?,
            drop_path2: DropPath::new(drop_path),
        })
    }

    pub fn forward_t(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let h = self.attn.forward_t(&self.norm1.forward(x)?, train)?;
        let x = (x + self.drop_path1.forward_t(&scaled(&self.ls1, h)?, train)?)?;
        let h = self.mlp.forward_t(&self.norm2.forward(&x)?, train)?;
        &x + self.drop_path2.forward_t(&scaled(&self.ls2, h)?, train)?
    }
}

/// Token mixer selected by `mixing_type`.
pub enum TokenMixer {
    Wavelet(WaveletMixer),
}

impl TokenMixer {
    pub fn forward(&self, x: &Tensor, spatial_size: Option<(usize, usize)>) -> Result<Tensor> {
        match self {
            TokenMixer::Wavelet(m) => m.forward(x, spatial_size),
        }
    }
}

/// Pre-norm mixing block with an optional second residual around the mixer.
pub struct MixingBlock {
    norm1: LayerNorm,
    filter: TokenMixer,
    norm2: LayerNorm,
    mlp: Mlp,
    drop_path: DropPath,
    double_skip: bool,
}

impl MixingBlock {
    pub fn new(cfg: &AcwiConfig, drop_path: f64, init: &InitScheme, vb: VarBuilder) -> Result<Self> {
        let dim = cfg.embed_dim_acwi;
        let filter = match cfg.mixing_type.parse::<MixingType>().map_err(not_implemented)? {
            MixingType::Acwi => TokenMixer::Wavelet(WaveletMixer::new(dim, cfg, init, vb.pp("filter"))?),
        };
        Ok(Self {
            norm1: layer_norm(dim, vb.pp("norm1"))?,
            filter,
            norm2: layer_norm(dim, vb.pp("norm2"))?,
            mlp: Mlp::new(dim, cfg.mlp_hidden(dim), cfg.drop_rate, init, vb.pp("mlp"))?,
            drop_path: DropPath::new(drop_path),
            double_skip: cfg.double_skip,
        })
    }

    pub fn double_skip(&self) -> bool {
        self.double_skip
    }

    /// x: (B, N, C) patch tokens laid out on `spatial_size` (square if `None`).
    pub fn forward_t(&self, x: &Tensor, spatial_size: Option<(usize, usize)>, train: bool) -> Result<Tensor> {
        let mut residual = x.clone();
        let mut x = self.filter.forward(&self.norm1.forward(x)?, spatial_size)?;

        if self.double_skip {
            x = (x + &residual)?;
            residual = x.clone();
        }

        let x = self.mlp.forward_t(&self.norm2.forward(&x)?, train)?;
        let x = self.drop_path.forward_t(&x, train)?;
        x + residual
    }
}
