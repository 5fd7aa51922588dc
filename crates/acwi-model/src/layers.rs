//! Transformer building blocks: linear, norm, MLP, layer scale, stochastic
//! depth and the patch embedding.

use candle_core::{Module, Result, Tensor};
#[cfg(test)]
use candle_core::DType;
use candle_nn::{Conv2d, Conv2dConfig, Dropout, LayerNorm, Linear, VarBuilder};

use crate::backbone::ResNetStem;
use crate::config::HybridConfig;
use crate::init::{InitScheme, LinearRole};

/// Linear layer with role-dependent init.
pub fn linear(
    in_f: usize,
    out_f: usize,
    bias: bool,
    role: LinearRole,
    init: &InitScheme,
    vb: VarBuilder,
) -> Result<Linear> {
    let weight = vb.get_with_hints((out_f, in_f), "weight", init.linear_weight(role, in_f, out_f))?;
    let bias = if bias {
        Some(vb.get_with_hints(out_f, "bias", init.linear_bias(role, in_f))?)
    } else {
        None
    };
    Ok(Linear::new(weight, bias))
}

/// LayerNorm with eps 1e-6, weight 1 and bias 0.
pub fn layer_norm(dim: usize, vb: VarBuilder) -> Result<LayerNorm> {
    candle_nn::layer_norm(dim, 1e-6, vb)
}

/// Two-layer feed-forward: fc1 → GELU (erf) → drop → fc2 → drop.
pub struct Mlp {
    fc1: Linear,
    fc2: Linear,
    drop: Dropout,
}

impl Mlp {
    pub fn new(dim: usize, hidden: usize, drop: f64, init: &InitScheme, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            fc1: linear(dim, hidden, true, LinearRole::Mlp, init, vb.pp("fc1"))?,
            fc2: linear(hidden, dim, true, LinearRole::Mlp, init, vb.pp("fc2"))?,
            drop: Dropout::new(drop as f32),
        })
    }

    pub fn forward_t(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let x = self.fc1.forward(x)?.gelu_erf()?;
        let x = self.drop.forward(&x, train)?;
        let x = self.fc2.forward(&x)?;
        self.drop.forward(&x, train)
    }
}

/// Per-channel learned scale on a residual branch.
pub struct LayerScale {
    gamma: Tensor, // [dim]
}

impl LayerScale {
    pub fn new(dim: usize, init_values: f64, vb: VarBuilder) -> Result<Self> {
        let gamma = vb.get_with_hints(dim, "gamma", candle_nn::Init::Const(init_values))?;
        Ok(Self { gamma })
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        x.broadcast_mul(&self.gamma)
    }
}

/// Optional layer scale; identity when `init_values` is `None`.
pub fn maybe_layer_scale(dim: usize, init_values: Option<f64>, vb: VarBuilder) -> Result<Option<LayerScale>> {
    init_values.map(|v| LayerScale::new(dim, v, vb)).transpose()
}

/// Stochastic depth: drops whole samples of a residual branch.
#[derive(Debug, Clone, Copy)]
pub struct DropPath {
    drop_prob: f64,
}

impl DropPath {
    pub fn new(drop_prob: f64) -> Self {
        Self { drop_prob }
    }

    pub fn drop_prob(&self) -> f64 {
        self.drop_prob
    }

    pub fn forward_t(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        if !train || self.drop_prob <= 0.0 {
            return Ok(x.clone());
        }
        let keep_prob = 1.0 - self.drop_prob;
        let mut shape = vec![1usize; x.rank()];
        shape[0] = x.dim(0)?;
        // floor(U[0,1) + keep) is 1 with probability keep.
        let mask = Tensor::rand(0f32, 1f32, shape, x.device())?
            .affine(1.0, keep_prob)?
            .floor()?
            .to_dtype(x.dtype())?;
        x.broadcast_mul(&mask)? / keep_prob
    }
}

/// Image to patch-token embedding, optionally behind a ResNet stem.
pub struct PatchEmbed {
    backbone: Option<ResNetStem>,
    proj: Conv2d,
    img_size: usize,
    grid_size: (usize, usize),
}

impl PatchEmbed {
    pub fn new(
        img_size: usize,
        patch_size: usize,
        in_chans: usize,
        embed_dim: usize,
        hybrid: Option<&HybridConfig>,
        init: &InitScheme,
        vb: VarBuilder,
    ) -> Result<Self> {
        let (backbone, proj_in, stride) = match hybrid {
            Some(h) => {
                let stem = ResNetStem::new(h, in_chans, init, vb.pp("backbone"))?;
                let out = stem.out_channels();
                (Some(stem), out, h.stride())
            }
            None => (None, in_chans, 1),
        };
        let fan_in = proj_in * patch_size * patch_size;
        let vb_proj = vb.pp("proj");
        let weight = vb_proj.get_with_hints(
            (embed_dim, proj_in, patch_size, patch_size),
            "weight",
            init.patch_conv_weight(fan_in),
        )?;
        let bias = vb_proj.get_with_hints(embed_dim, "bias", init.patch_conv_bias(fan_in))?;
        let cfg = Conv2dConfig {
            stride: patch_size,
            ..Default::default()
        };
        let side = img_size / (patch_size * stride);
        Ok(Self {
            backbone,
            proj: Conv2d::new(weight, Some(bias), cfg),
            img_size,
            grid_size: (side, side),
        })
    }

    pub fn grid_size(&self) -> (usize, usize) {
        self.grid_size
    }

    pub fn num_patches(&self) -> usize {
        self.grid_size.0 * self.grid_size.1
    }

    pub fn is_hybrid(&self) -> bool {
        self.backbone.is_some()
    }

    /// (B, C, H, W) → (B, N, D).
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (_b, _c, h, w) = x.dims4()?;
        if h != self.img_size || w != self.img_size {
            candle_core::bail!(
                "input image size ({}*{}) doesn't match model ({}*{})",
                h,
                w,
                self.img_size,
                self.img_size
            );
        }
        let x = match &self.backbone {
            Some(stem) => stem.forward(x)?,
            None => x.clone(),
        };
        self.proj.forward(&x)?.flatten_from(2)?.transpose(1, 2)
    }
}
