//! Weight initialization schemes mapped onto candle `Init` hints.
//!
//! Parameters are created through `VarBuilder::get_with_hints`, so each
//! layer asks the scheme for the hint matching its role instead of running
//! a separate init pass over a finished module tree. Truncated normals are
//! approximated by plain normals; at std 0.02 the ±2 cut-off is never hit in
//! practice.

use candle_nn::Init;

use crate::config::WeightInit;

/// What a linear layer is used for; selects its init under some schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinearRole {
    /// Fused query/key/value projection.
    Qkv,
    /// Feed-forward `fc1`/`fc2`.
    Mlp,
    /// Classifier head.
    Head,
    /// Any other projection (attention output, low-pass `fcl`).
    Other,
}

/// Init hints for one network.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InitScheme {
    mode: WeightInit,
    head_bias: f64,
}

fn xavier_uniform(fan_in: usize, fan_out: usize) -> Init {
    let bound = (6.0 / (fan_in + fan_out) as f64).sqrt();
    Init::Uniform { lo: -bound, up: bound }
}

/// PyTorch's default `Linear`/`Conv` init: U(±1/sqrt(fan_in)).
fn torch_default(fan_in: usize) -> Init {
    let bound = 1.0 / (fan_in.max(1) as f64).sqrt();
    Init::Uniform { lo: -bound, up: bound }
}

impl InitScheme {
    pub fn new(mode: WeightInit, num_classes: usize) -> Self {
        let head_bias = if mode == WeightInit::JaxNlhb && num_classes > 0 {
            -(num_classes as f64).ln()
        } else {
            0.0
        };
        Self { mode, head_bias }
    }

    pub fn mode(&self) -> WeightInit {
        self.mode
    }

    pub fn head_bias(&self) -> f64 {
        self.head_bias
    }

    fn jax_like(&self) -> bool {
        matches!(self.mode, WeightInit::Jax | WeightInit::JaxNlhb)
    }

    pub fn linear_weight(&self, role: LinearRole, in_f: usize, out_f: usize) -> Init {
        match self.mode {
            WeightInit::Timm => Init::Randn { mean: 0.0, stdev: 0.02 },
            WeightInit::Jax | WeightInit::JaxNlhb => match role {
                LinearRole::Head => Init::Const(0.0),
                _ => xavier_uniform(in_f, out_f),
            },
            WeightInit::Moco => match role {
                LinearRole::Qkv => {
                    // q, k and v are separate (out/3, in) matrices.
                    let bound = (6.0 / (out_f / 3 + in_f) as f64).sqrt();
                    Init::Uniform { lo: -bound, up: bound }
                }
                _ => xavier_uniform(in_f, out_f),
            },
            WeightInit::Skip => torch_default(in_f),
        }
    }

    pub fn linear_bias(&self, role: LinearRole, in_f: usize) -> Init {
        match self.mode {
            WeightInit::Jax | WeightInit::JaxNlhb => match role {
                LinearRole::Head => Init::Const(self.head_bias),
                LinearRole::Mlp => Init::Randn { mean: 0.0, stdev: 1e-6 },
                _ => Init::Const(0.0),
            },
            WeightInit::Skip => torch_default(in_f),
            WeightInit::Timm | WeightInit::Moco => Init::Const(0.0),
        }
    }

    /// Patch projection weight; `fan_in = in_chans * k * k`.
    pub fn patch_conv_weight(&self, fan_in: usize) -> Init {
        if self.jax_like() {
            Init::Randn { mean: 0.0, stdev: (1.0 / fan_in.max(1) as f64).sqrt() }
        } else {
            torch_default(fan_in)
        }
    }

    pub fn patch_conv_bias(&self, fan_in: usize) -> Init {
        if self.jax_like() {
            Init::Const(0.0)
        } else {
            torch_default(fan_in)
        }
    }

    /// Hybrid stem convolutions: kaiming-normal (fan_out, relu) unless jax.
    pub fn backbone_conv_weight(&self, fan_in: usize, fan_out: usize) -> Init {
        if self.jax_like() {
            Init::Randn { mean: 0.0, stdev: (1.0 / fan_in.max(1) as f64).sqrt() }
        } else {
            Init::Randn { mean: 0.0, stdev: (2.0 / fan_out.max(1) as f64).sqrt() }
        }
    }

    /// 1×1 channel convolution in the mixer bias path (PyTorch default).
    pub fn channel_conv(&self, fan_in: usize) -> Init {
        torch_default(fan_in)
    }

    pub fn pos_embed(&self) -> Init {
        Init::Randn { mean: 0.0, stdev: 0.02 }
    }

    pub fn cls_token(&self) -> Init {
        Init::Randn { mean: 0.0, stdev: 1e-6 }
    }

    /// Complex block weights and biases in the wavelet mixer.
    pub fn complex_block(&self) -> Init {
        Init::Randn { mean: 0.0, stdev: 0.02 }
    }
}

impl Default for InitScheme {
    fn default() -> Self {
        Self::new(WeightInit::Timm, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform_bound(init: Init) -> f64 {
        match init {
            Init::Uniform { lo, up } => {
                assert_eq!(lo, -up);
                up
            }
            other => panic!("expected uniform init, got {:?}", other),
        }
    }

    #[test]
    fn test_nlhb_head_bias() {
        let scheme = InitScheme::new(WeightInit::JaxNlhb, 1000);
        assert!((scheme.head_bias() + 1000f64.ln()).abs() < 1e-12);
        match scheme.linear_bias(LinearRole::Head, 192) {
            Init::Const(v) => assert!((v + 6.907755).abs() < 1e-5),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            scheme.linear_weight(LinearRole::Head, 192, 1000),
            Init::Const(v) if v == 0.0
        ));
        // Plain jax keeps a zero head bias.
        assert_eq!(InitScheme::new(WeightInit::Jax, 1000).head_bias(), 0.0);
    }

    #[test]
    fn test_moco_qkv_bound_splits_output() {
        let scheme = InitScheme::new(WeightInit::Moco, 10);
        let qkv = uniform_bound(scheme.linear_weight(LinearRole::Qkv, 192, 576));
        assert!((qkv - (6.0f64 / 384.0).sqrt()).abs() < 1e-12);
        let proj = uniform_bound(scheme.linear_weight(LinearRole::Other, 192, 192));
        assert!((proj - (6.0f64 / 384.0).sqrt()).abs() < 1e-12);
        let fc1 = uniform_bound(scheme.linear_weight(LinearRole::Mlp, 192, 768));
        assert!((fc1 - (6.0f64 / 960.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_jax_mlp_bias_is_tiny_normal() {
        let scheme = InitScheme::new(WeightInit::Jax, 10);
        assert!(matches!(
            scheme.linear_bias(LinearRole::Mlp, 64),
            Init::Randn { stdev, .. } if stdev == 1e-6
        ));
        assert!(matches!(
            scheme.linear_bias(LinearRole::Qkv, 64),
            Init::Const(v) if v == 0.0
        ));
        assert!(matches!(
            scheme.patch_conv_weight(768),
            Init::Randn { stdev, .. } if (stdev - (1.0f64 / 768.0).sqrt()).abs() < 1e-12
        ));
    }

    #[test]
    fn test_timm_and_skip_defaults() {
        let timm = InitScheme::default();
        assert!(matches!(
            timm.linear_weight(LinearRole::Mlp, 64, 256),
            Init::Randn { stdev, .. } if stdev == 0.02
        ));
        let skip = InitScheme::new(WeightInit::Skip, 10);
        let bound = uniform_bound(skip.linear_weight(LinearRole::Other, 64, 64));
        assert!((bound - 0.125).abs() < 1e-12);
        assert!((uniform_bound(timm.patch_conv_weight(768)) - (1.0f64 / 768.0).sqrt()).abs() < 1e-12);
    }
}
