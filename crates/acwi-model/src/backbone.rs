//! ResNetV2 feature stem for hybrid models.
//!
//! Non-pre-activation bottleneck layout with weight-standardized
//! convolutions, GroupNorm(32) and TF-style "same" padding, as used by the
//! R50+ViT checkpoints. Convolutions carry no bias.

use candle_core::{Module, Result, Tensor};
#[cfg(test)]
use candle_core::DType;
use candle_nn::{GroupNorm, VarBuilder};

use crate::config::HybridConfig;
use crate::init::InitScheme;

const WS_EPS: f64 = 1e-8;
const GN_GROUPS: usize = 32;
const GN_EPS: f64 = 1e-5;

/// Zero-pad so a `k`/`s` window yields `ceil(n / s)` outputs; the odd pixel
/// goes to the bottom/right.
fn pad_same(x: &Tensor, kernel: usize, stride: usize) -> Result<Tensor> {
    let mut x = x.clone();
    for dim in [2, 3] {
        let n = x.dim(dim)?;
        let out = n.div_ceil(stride);
        let total = ((out - 1) * stride + kernel).saturating_sub(n);
        if total > 0 {
            x = x.pad_with_zeros(dim, total / 2, total - total / 2)?;
        }
    }
    Ok(x)
}

/// Zero mean, unit variance per output filter.
pub fn standardize_weight(w: &Tensor, eps: f64) -> Result<Tensor> {
    let (o, i, kh, kw) = w.dims4()?;
    let flat = w.reshape((o, i * kh * kw))?;
    let centered = flat.broadcast_sub(&flat.mean_keepdim(1)?)?;
    let std = (centered.sqr()?.mean_keepdim(1)? + eps)?.sqrt()?;
    centered.broadcast_div(&std)?.reshape((o, i, kh, kw))
}

/// Weight-standardized convolution with "same" padding.
struct StdConv2d {
    weight: Tensor,
    kernel: usize,
    stride: usize,
}

impl StdConv2d {
    fn new(
        in_c: usize,
        out_c: usize,
        kernel: usize,
        stride: usize,
        init: &InitScheme,
        vb: VarBuilder,
    ) -> Result<Self> {
        let hint = init.backbone_conv_weight(in_c * kernel * kernel, out_c * kernel * kernel);
        let weight = vb.get_with_hints((out_c, in_c, kernel, kernel), "weight", hint)?;
        Ok(Self { weight, kernel, stride })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let w = standardize_weight(&self.weight, WS_EPS)?;
        pad_same(x, self.kernel, self.stride)?.conv2d(&w, 0, self.stride, 1, 1)
    }
}

fn group_norm(channels: usize, vb: VarBuilder) -> Result<GroupNorm> {
    candle_nn::group_norm(GN_GROUPS, channels, GN_EPS, vb)
}

/// 1×1 strided projection on the shortcut of a stage's first unit.
struct Downsample {
    conv: StdConv2d,
    norm: GroupNorm,
}

/// conv1 (1×1) → conv2 (3×3, stride) → conv3 (1×1), ReLU after the sum.
struct Bottleneck {
    downsample: Option<Downsample>,
    conv1: StdConv2d,
    norm1: GroupNorm,
    conv2: StdConv2d,
    norm2: GroupNorm,
    conv3: StdConv2d,
    norm3: GroupNorm,
}

impl Bottleneck {
    fn new(in_c: usize, out_c: usize, stride: usize, init: &InitScheme, vb: VarBuilder) -> Result<Self> {
        let mid = out_c / 4;
        let downsample = if in_c != out_c || stride != 1 {
            let vb_ds = vb.pp("downsample");
            Some(Downsample {
                conv: StdConv2d::new(in_c, out_c, 1, stride, init, vb_ds.pp("conv"))?,
                norm: group_norm(out_c, vb_ds.pp("norm"))?,
            })
        } else {
            None
        };
        Ok(Self {
            downsample,
            conv1: StdConv2d::new(in_c, mid, 1, 1, init, vb.pp("conv1"))?,
            norm1: group_norm(mid, vb.pp("norm1"))?,
            conv2: StdConv2d::new(mid, mid, 3, stride, init, vb.pp("conv2"))?,
            norm2: group_norm(mid, vb.pp("norm2"))?,
            conv3: StdConv2d::new(mid, out_c, 1, 1, init, vb.pp("conv3"))?,
            norm3: group_norm(out_c, vb.pp("norm3"))?,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let shortcut = match &self.downsample {
            Some(ds) => ds.norm.forward(&ds.conv.forward(x)?)?,
            None => x.clone(),
        };
        let y = self.norm1.forward(&self.conv1.forward(x)?)?.relu()?;
        let y = self.norm2.forward(&self.conv2.forward(&y)?)?.relu()?;
        let y = self.norm3.forward(&self.conv3.forward(&y)?)?;
        (y + shortcut)?.relu()
    }
}

/// Stem + bottleneck stages, (B, C, H, W) → (B, out_channels, H/s, W/s).
pub struct ResNetStem {
    stem_conv: StdConv2d,
    stem_norm: GroupNorm,
    stages: Vec<Vec<Bottleneck>>,
    out_channels: usize,
}

impl ResNetStem {
    pub fn new(cfg: &HybridConfig, in_chans: usize, init: &InitScheme, vb: VarBuilder) -> Result<Self> {
        let vb_stem = vb.pp("stem");
        let stem_conv = StdConv2d::new(in_chans, cfg.width, 7, 2, init, vb_stem.pp("conv"))?;
        let stem_norm = group_norm(cfg.width, vb_stem.pp("norm"))?;

        let mut in_c = cfg.width;
        let mut stages = Vec::with_capacity(cfg.layers.len());
        for (i, &depth) in cfg.layers.iter().enumerate() {
            let out_c = cfg.width * 4 * (1 << i);
            let stride = if i == 0 { 1 } else { 2 };
            let vb_stage = vb.pp(format!("stages.{}.blocks", i));
            let mut blocks = Vec::with_capacity(depth);
            for j in 0..depth {
                let s = if j == 0 { stride } else { 1 };
                blocks.push(Bottleneck::new(in_c, out_c, s, init, vb_stage.pp(j.to_string()))?);
                in_c = out_c;
            }
            stages.push(blocks);
        }

        Ok(Self { stem_conv, stem_norm, stages, out_channels: in_c })
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x = self.stem_norm.forward(&self.stem_conv.forward(x)?)?.relu()?;
        // Post-ReLU activations are non-negative, so zero padding acts as -inf.
        let mut x = pad_same(&x, 3, 2)?.max_pool2d_with_stride(3, 2)?;
        for stage in &self.stages {
            for block in stage {
                x = block.forward(&x)?;
            }
        }
        Ok(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::VarMap;

    #[test]
    fn test_stem_output_stride_and_channels() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let cfg = HybridConfig { layers: vec![1, 1], width: 32 };
        let stem = ResNetStem::new(&cfg, 3, &InitScheme::default(), vb.pp("backbone"))?;
        assert_eq!(stem.out_channels(), 256);
        assert_eq!(cfg.stride(), 8);

        let x = Tensor::randn(0f32, 1.0, (1, 3, 32, 32), &device)?;
        assert_eq!(stem.forward(&x)?.dims(), &[1, 256, 4, 4]);
        Ok(())
    }

    #[test]
    fn test_stem_parameter_names() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let cfg = HybridConfig { layers: vec![2], width: 32 };
        let _ = ResNetStem::new(&cfg, 3, &InitScheme::default(), vb.pp("backbone"))?;
        let data = varmap.data().lock().unwrap();
        for name in [
            "backbone.stem.conv.weight",
            "backbone.stem.norm.weight",
            "backbone.stages.0.blocks.0.downsample.conv.weight",
            "backbone.stages.0.blocks.0.conv2.weight",
            "backbone.stages.0.blocks.1.norm3.bias",
        ] {
            assert!(data.contains_key(name), "missing {}", name);
        }
        assert!(!data.contains_key("backbone.stages.0.blocks.1.downsample.conv.weight"));
        Ok(())
    }

    #[test]
    fn test_standardized_weight_statistics() -> Result<()> {
        let device = Device::Cpu;
        let w = Tensor::randn(3f32, 2.0, (4, 3, 3, 3), &device)?;
        let s = standardize_weight(&w, WS_EPS)?.reshape((4, 27))?;
        let mean = s.mean_keepdim(1)?.abs()?.max_all()?.to_scalar::<f32>()?;
        let var = s.sqr()?.mean_keepdim(1)?.flatten_all()?.to_vec1::<f32>()?;
        assert!(mean < 1e-5);
        assert!(var.iter().all(|v| (v - 1.0).abs() < 1e-4));
        Ok(())
    }

    #[test]
    fn test_pad_same_sizes() -> Result<()> {
        let device = Device::Cpu;
        let x = Tensor::zeros((1, 1, 224, 224), DType::F32, &device)?;
        // 7x7/2 on 224: total pad 5, split 2/3.
        assert_eq!(pad_same(&x, 7, 2)?.dims(), &[1, 1, 229, 229]);
        let y = Tensor::zeros((1, 1, 56, 56), DType::F32, &device)?;
        assert_eq!(pad_same(&y, 1, 1)?.dims(), &[1, 1, 56, 56]);
        assert_eq!(pad_same(&y, 3, 1)?.dims(), &[1, 1, 58, 58]);
        Ok(())
    }
}
