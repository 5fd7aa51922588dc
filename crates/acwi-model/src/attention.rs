//! Multi-head self-attention over the full token sequence (no mask).

use candle_core::{Module, Result, Tensor};
#[cfg(test)]
use candle_core::DType;
use candle_nn::{Dropout, Linear, VarBuilder};

use crate::init::{InitScheme, LinearRole};
use crate::layers::linear;

/// ViT attention with a fused qkv projection.
pub struct Attention {
    qkv: Linear,
    proj: Linear,
    attn_drop: Dropout,
    proj_drop: Dropout,
    num_heads: usize,
    head_dim: usize,
    scale: f64,
}

impl Attention {
    pub fn new(
        dim: usize,
        num_heads: usize,
        qkv_bias: bool,
        attn_drop: f64,
        proj_drop: f64,
        init: &InitScheme,
        vb: VarBuilder,
    ) -> Result<Self> {
        if num_heads == 0 || dim % num_heads != 0 {
            candle_core::bail!("dim ({}) should be divisible by num_heads ({})", dim, num_heads);
        }
        let head_dim = dim / num_heads;
        Ok(Self {
            qkv: linear(dim, dim * 3, qkv_bias, LinearRole::Qkv, init, vb.pp("qkv"))?,
            proj: linear(dim, dim, true, LinearRole::Other, init, vb.pp("proj"))?,
            attn_drop: Dropout::new(attn_drop as f32),
            proj_drop: Dropout::new(proj_drop as f32),
            num_heads,
            head_dim,
            scale: (head_dim as f64).powf(-0.5),
        })
    }

    /// x: [batch, tokens, dim]
    pub fn forward_t(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let (b, n, c) = x.dims3()?;
        // [B, N, 3, H, hd] -> [3, B, H, N, hd]
        let qkv = self
            .qkv
            .forward(x)?
            .reshape((b, n, 3, self.num_heads, self.head_dim))?
            .permute((2, 0, 3, 1, 4))?;
        let q = qkv.get(0)?.contiguous()?;
        let k = qkv.get(1)?.contiguous()?;
        let v = qkv.get(2)?.contiguous()?;

        let scores = (q.matmul(&k.t()?.contiguous()?)? * self.scale)?;
        let attn = candle_nn::ops::softmax_last_dim(&scores)?;
        let attn = self.attn_drop.forward(&attn, train)?;

        let out = attn.matmul(&v)?.transpose(1, 2)?.reshape((b, n, c))?;
        let out = self.proj.forward(&out)?;
        self.proj_drop.forward(&out, train)
    }
}
