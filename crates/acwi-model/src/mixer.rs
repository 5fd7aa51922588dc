//! Complex-wavelet token mixer.
//!
//! Tokens are laid back out on their spatial grid and decomposed with a
//! 3-level DTCWT. The low-pass band goes through a dense channel projection;
//! every high-pass level goes through its own two-stage complex block
//! transform; the inverse DTCWT then brings the mixed bands back to tokens.
//!
//! Parameter names (`fcl`, `bias`, `w{level}{stage}`, `b{level}{stage}`)
//! match the reference checkpoints.

use candle_core::{DType, Module, Result, Tensor};
use candle_nn::{Conv1d, Conv1dConfig, Linear, VarBuilder};
use wave_cwt::{Biort, Decomposition, DtcwtForward, DtcwtInverse, QShift};

use crate::config::{AcwiConfig, SecondStageImag};
use crate::error::config_error;
use crate::init::{InitScheme, LinearRole};
use crate::layers::linear;

/// `einsum('...bd,bdk->...bk')`: x (..., nb, bs) times w (nb, bs, bs).
fn block_matmul(x: &Tensor, w: &Tensor) -> Result<Tensor> {
    let dims = x.dims().to_vec();
    let rank = dims.len();
    let (nb, bs) = (dims[rank - 2], dims[rank - 1]);
    let lead: usize = dims[..rank - 2].iter().product();
    x.reshape((lead, nb, bs))?
        .transpose(0, 1)?
        .contiguous()?
        .matmul(w)?
        .transpose(0, 1)?
        .reshape(dims)
}

/// Two stacked complex linear maps applied per channel group.
pub struct ComplexBlockLinear {
    w1: Tensor, // [2, nb, bs, bs], axis 0 = (re, im)
    b1: Tensor, // [2, nb, bs]
    w2: Tensor,
    b2: Tensor,
    second_stage_imag: SecondStageImag,
}

impl ComplexBlockLinear {
    /// Registers `w{level}1`, `b{level}1`, `w{level}2`, `b{level}2`.
    pub fn new(
        level: usize,
        num_blocks: usize,
        block_size: usize,
        second_stage_imag: SecondStageImag,
        init: &InitScheme,
        vb: VarBuilder,
    ) -> Result<Self> {
        let w_shape = (2, num_blocks, block_size, block_size);
        let b_shape = (2, num_blocks, block_size);
        Ok(Self {
            w1: vb.get_with_hints(w_shape, &format!("w{}1", level), init.complex_block())?,
            b1: vb.get_with_hints(b_shape, &format!("b{}1", level), init.complex_block())?,
            w2: vb.get_with_hints(w_shape, &format!("w{}2", level), init.complex_block())?,
            b2: vb.get_with_hints(b_shape, &format!("b{}2", level), init.complex_block())?,
            second_stage_imag,
        })
    }

    /// Build from explicit tensors, checking shapes.
    pub fn from_tensors(
        w1: Tensor,
        b1: Tensor,
        w2: Tensor,
        b2: Tensor,
        second_stage_imag: SecondStageImag,
    ) -> Result<Self> {
        let (two, nb, bs, bs2) = w1.dims4()?;
        if two != 2 || bs != bs2 {
            candle_core::bail!("complex block weight must be (2, nb, bs, bs), got {:?}", w1.dims());
        }
        if w2.dims() != w1.dims() {
            candle_core::bail!("stage weights disagree: {:?} vs {:?}", w1.dims(), w2.dims());
        }
        for b in [&b1, &b2] {
            if b.dims() != [2, nb, bs] {
                candle_core::bail!("complex block bias must be (2, {}, {}), got {:?}", nb, bs, b.dims());
            }
        }
        Ok(Self { w1, b1, w2, b2, second_stage_imag })
    }

    pub fn num_blocks(&self) -> usize {
        self.w1.dims()[1]
    }

    pub fn block_size(&self) -> usize {
        self.w1.dims()[2]
    }

    /// re, im: (..., num_blocks, block_size). Returns the same shapes.
    pub fn forward(&self, re: &Tensor, im: &Tensor) -> Result<(Tensor, Tensor)> {
        let (w1r, w1i) = (self.w1.get(0)?, self.w1.get(1)?);
        let (b1r, b1i) = (self.b1.get(0)?, self.b1.get(1)?);
        let (w2r, w2i) = (self.w2.get(0)?, self.w2.get(1)?);
        let (b2r, b2i) = (self.b2.get(0)?, self.b2.get(1)?);

        let re1 = (block_matmul(re, &w1r)? - block_matmul(im, &w1i)?)?
            .broadcast_add(&b1r)?
            .relu()?;
        let im1 = (block_matmul(re, &w1i)? + block_matmul(im, &w1r)?)?
            .broadcast_add(&b1i)?
            .relu()?;

        let re2 = (block_matmul(&re1, &w2r)? - block_matmul(&im1, &w2i)?)?.broadcast_add(&b2r)?;
        let im2 = match self.second_stage_imag {
            SecondStageImag::MirrorReal => re2.clone(),
            SecondStageImag::Complex => {
                (block_matmul(&re1, &w2i)? + block_matmul(&im1, &w2r)?)?.broadcast_add(&b2i)?
            }
        };
        Ok((re2, im2))
    }
}

/// Frequency-domain token mixer over a (B, N, C) sequence.
pub struct WaveletMixer {
    fcl: Linear,
    bias: Option<Conv1d>,
    bands: Vec<ComplexBlockLinear>,
    cwt: DtcwtForward,
    icwt: DtcwtInverse,
    num_blocks: usize,
    block_size: usize,
}

impl WaveletMixer {
    pub fn new(dim: usize, cfg: &AcwiConfig, init: &InitScheme, vb: VarBuilder) -> Result<Self> {
        let num_blocks = cfg.acwi_blocks;
        if num_blocks == 0 || dim % num_blocks != 0 {
            candle_core::bail!("hidden size {} is not divisible by num_blocks {}", dim, num_blocks);
        }
        let block_size = dim / num_blocks;
        let biort: Biort = cfg.biort().map_err(|e| config_error(e).into_candle())?;
        let qshift: QShift = cfg.qshift().map_err(|e| config_error(e).into_candle())?;

        let bias = if cfg.acwi_bias {
            let vb_bias = vb.pp("bias");
            let weight = vb_bias.get_with_hints((dim, dim, 1), "weight", init.channel_conv(dim))?;
            let b = vb_bias.get_with_hints(dim, "bias", init.channel_conv(dim))?;
            Some(Conv1d::new(weight, Some(b), Conv1dConfig::default()))
        } else {
            None
        };

        let bands = (0..cfg.wavelet_levels)
            .map(|level| {
                ComplexBlockLinear::new(level, num_blocks, block_size, cfg.second_stage_imag, init, vb.clone())
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            fcl: linear(dim, dim, true, LinearRole::Other, init, vb.pp("fcl"))?,
            bias,
            bands,
            cwt: DtcwtForward::new(cfg.wavelet_levels, biort, qshift),
            icwt: DtcwtInverse::new(biort, qshift),
            num_blocks,
            block_size,
        })
    }

    pub fn num_blocks(&self) -> usize {
        self.num_blocks
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn has_bias(&self) -> bool {
        self.bias.is_some()
    }

    /// Grid for `n` tokens: the explicit size, or the square root of `n`.
    fn resolve_grid(n: usize, spatial_size: Option<(usize, usize)>) -> Result<(usize, usize)> {
        let (a, b) = match spatial_size {
            Some(size) => size,
            None => {
                let a = (n as f64).sqrt().round() as usize;
                if a * a != n {
                    candle_core::bail!("{} tokens do not form a square grid; pass an explicit spatial size", n);
                }
                (a, a)
            }
        };
        if a * b != n {
            candle_core::bail!("token count {} does not match spatial size {}x{}", n, a, b);
        }
        Ok((a, b))
    }

    /// x: (B, N, C) → (B, N, C), in the dtype of `x`.
    pub fn forward(&self, x: &Tensor, spatial_size: Option<(usize, usize)>) -> Result<Tensor> {
        let y = self.forward_wavelet_path(x, spatial_size)?;
        match &self.bias {
            Some(conv) => {
                let bias = conv.forward(&x.transpose(1, 2)?.contiguous()?)?.transpose(1, 2)?;
                y + bias
            }
            None => Ok(y),
        }
    }

    /// Mixer output without the bias branch.
    pub fn forward_wavelet_path(&self, x: &Tensor, spatial_size: Option<(usize, usize)>) -> Result<Tensor> {
        let (b, n, c) = x.dims3()?;
        if c != self.num_blocks * self.block_size {
            candle_core::bail!(
                "channel count {} does not match mixer width {}",
                c,
                self.num_blocks * self.block_size
            );
        }
        let (ha, wb) = Self::resolve_grid(n, spatial_size)?;
        let param_dtype = self.fcl.weight().dtype();

        // (B, a, b, C) -> (B, C, a, b), transform in f32
        let grid = x
            .reshape((b, ha, wb, c))?
            .permute((0, 3, 1, 2))?
            .to_dtype(DType::F32)?
            .contiguous()?;
        let d = self.cwt.forward(&grid)?;

        let lowpass = self
            .fcl
            .forward(&d.lowpass.permute((0, 2, 3, 1))?.to_dtype(param_dtype)?.contiguous()?)?
            .permute((0, 3, 1, 2))?
            .to_dtype(DType::F32)?
            .contiguous()?;

        let highpasses = d
            .highpasses
            .iter()
            .zip(&self.bands)
            .map(|(zh, band)| self.mix_band(zh, band, param_dtype))
            .collect::<Result<Vec<_>>>()?;

        let y = self.icwt.inverse(&Decomposition { lowpass, highpasses, input_hw: d.input_hw })?;
        y.permute((0, 2, 3, 1))?.reshape((b, n, c))?.to_dtype(x.dtype())
    }

    /// (B, C, 6, h, w, 2) through one level's complex block transform.
    fn mix_band(&self, zh: &Tensor, band: &ComplexBlockLinear, dtype: DType) -> Result<Tensor> {
        let dims = zh.dims();
        if dims.len() != 6 {
            candle_core::bail!("expected a (B, C, 6, h, w, 2) subband, got {:?}", dims);
        }
        let (bsz, c, orient, h, w) = (dims[0], dims[1], dims[2], dims[3], dims[4]);
        // -> (B, h, w, 6, nb, bs, 2)
        let z = zh
            .permute(vec![0, 3, 4, 2, 1, 5])?
            .reshape(vec![bsz, h, w, orient, self.num_blocks, self.block_size, 2])?
            .to_dtype(dtype)?;
        let (re, im) = band.forward(&z.get_on_dim(6, 0)?, &z.get_on_dim(6, 1)?)?;
        Tensor::stack(&[re, im], 6)?
            .reshape((bsz, h, w, orient, c, 2))?
            .permute(vec![0, 4, 3, 1, 2, 5])?
            .to_dtype(DType::F32)?
            .contiguous()
    }
}
