//! Model configuration for ACWI-Former networks.
//!
//! String-selected options in the reference model (pooling, weight init,
//! drop-path schedule) are closed enums here and are resolved once when the
//! config is deserialized. The mixing operator is kept as a string and
//! resolved by the mixing block so an unknown operator surfaces as
//! "not implemented" at construction.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use wave_cwt::{Biort, QShift};

fn default_img_size() -> usize {
    224
}

fn default_patch_size() -> usize {
    16
}

fn default_in_chans() -> usize {
    3
}

fn default_num_classes() -> usize {
    1000
}

fn default_mlp_ratio() -> f64 {
    4.0
}

fn default_true() -> bool {
    true
}

fn default_mixing_type() -> String {
    "acwi".to_string()
}

fn default_acwi_blocks() -> usize {
    4 // block_size = embed_dim_acwi / 4
}

fn default_biort() -> String {
    Biort::NearSymB.name().to_string()
}

fn default_qshift() -> String {
    QShift::QshiftB.name().to_string()
}

fn default_wavelet_levels() -> usize {
    3
}

/// Classifier pooling over the final token sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GlobalPool {
    /// Class token.
    #[default]
    #[serde(rename = "token")]
    Token,
    /// Mean over patch tokens.
    #[serde(rename = "avg")]
    Avg,
    /// No pooling; the head sees every token.
    #[serde(rename = "", alias = "none")]
    None,
}

/// Parameter initialization scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WeightInit {
    /// Truncated normal (std 0.02) linears, zero biases.
    #[default]
    #[serde(rename = "", alias = "timm")]
    Timm,
    /// Flax ViT: xavier-uniform linears, zero head, lecun-normal patch conv.
    #[serde(rename = "jax")]
    Jax,
    /// As `Jax`, with the head bias set to `-ln(num_classes)`.
    #[serde(rename = "jax_nlhb")]
    JaxNlhb,
    /// MoCo v3: q/k/v treated as three separate xavier-uniform matrices.
    #[serde(rename = "moco")]
    Moco,
    /// Layer defaults only (uniform ±1/sqrt(fan_in)).
    #[serde(rename = "skip")]
    Skip,
}

/// Per-block stochastic depth rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DropPathSchedule {
    /// Every block uses `drop_path_rate`.
    #[serde(rename = "uniform")]
    Uniform,
    /// Linearly from 0 to `drop_path_rate` across the stage.
    #[default]
    #[serde(rename = "linear")]
    Linear,
}

/// Imaginary output of the second complex block stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SecondStageImag {
    /// `im2 = re2`: the reference network computes the imaginary output with
    /// the real-part expression. Suspected defect, kept for weight
    /// compatibility.
    #[default]
    #[serde(rename = "mirror_real")]
    MirrorReal,
    /// `im2 = re1·W2_im + im1·W2_re + b2_im`, the complex product used in
    /// stage 1.
    #[serde(rename = "complex")]
    Complex,
}

/// Token mixer used by the mixing stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixingType {
    Acwi,
}

/// ResNetV2 stem in front of the patch projection (hybrid models).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridConfig {
    /// Bottleneck units per stage.
    pub layers: Vec<usize>,
    /// Stem width; stage `i` outputs `4 * width * 2^i` channels.
    pub width: usize,
}

impl HybridConfig {
    /// ResNet-50 layout truncated after three stages (output stride 16).
    pub fn r50_s16() -> Self {
        Self { layers: vec![3, 4, 9], width: 64 }
    }

    /// Output stride of the stem + stages.
    pub fn stride(&self) -> usize {
        4 * (1 << self.layers.len().saturating_sub(1))
    }

    pub fn out_channels(&self) -> usize {
        self.width * 4 * (1 << self.layers.len().saturating_sub(1))
    }
}

/// Full network configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcwiConfig {
    #[serde(default = "default_img_size")]
    pub img_size: usize,
    #[serde(default = "default_patch_size")]
    pub patch_size: usize,
    #[serde(default = "default_in_chans")]
    pub in_chans: usize,
    #[serde(default = "default_num_classes")]
    pub num_classes: usize,

    // Attention stage
    pub embed_dim: usize,
    pub depth: usize,
    pub num_heads: usize,
    #[serde(default = "default_mlp_ratio")]
    pub mlp_ratio: f64,
    #[serde(default = "default_true")]
    pub qkv_bias: bool,
    /// Layer-scale initial value; `None` disables layer scale.
    #[serde(default)]
    pub init_values: Option<f64>,
    #[serde(default = "default_true")]
    pub class_token: bool,
    /// Add position embedding before prepending the class token.
    #[serde(default)]
    pub no_embed_class: bool,
    #[serde(default)]
    pub global_pool: GlobalPool,
    /// Norm after pooling instead of before; `None` means "iff avg pooling".
    #[serde(default)]
    pub fc_norm: Option<bool>,

    // Regularization
    #[serde(default)]
    pub drop_rate: f64,
    #[serde(default)]
    pub attn_drop_rate: f64,
    #[serde(default)]
    pub drop_path_rate: f64,
    #[serde(default)]
    pub drop_path_schedule: DropPathSchedule,

    // Mixing stage
    pub embed_dim_acwi: usize,
    pub depth_acwi: usize,
    #[serde(default = "default_mixing_type")]
    pub mixing_type: String,
    /// Channel groups for the complex block weights.
    #[serde(default = "default_acwi_blocks")]
    pub acwi_blocks: usize,
    /// 1×1 convolution residual inside the mixer.
    #[serde(default)]
    pub acwi_bias: bool,
    #[serde(default)]
    pub double_skip: bool,
    #[serde(default)]
    pub second_stage_imag: SecondStageImag,
    #[serde(default = "default_biort")]
    pub biort: String,
    #[serde(default = "default_qshift")]
    pub qshift: String,
    #[serde(default = "default_wavelet_levels")]
    pub wavelet_levels: usize,

    #[serde(default)]
    pub weight_init: WeightInit,

    /// Segment the attention stage for activation checkpointing.
    #[serde(default)]
    pub grad_checkpointing: bool,
    /// Segment the mixing stage for activation checkpointing.
    #[serde(default)]
    pub checkpoint_activations: bool,

    #[serde(default)]
    pub hybrid: Option<HybridConfig>,
}

impl AcwiConfig {
    /// DeiT-tiny attention stage followed by four wavelet mixing blocks.
    pub fn deit_tiny_acwi() -> Self {
        Self {
            img_size: 224,
            patch_size: 16,
            in_chans: 3,
            num_classes: 1000,
            embed_dim: 192,
            depth: 12,
            num_heads: 3,
            mlp_ratio: 4.0,
            qkv_bias: true,
            init_values: None,
            class_token: true,
            no_embed_class: false,
            global_pool: GlobalPool::Token,
            fc_norm: None,
            drop_rate: 0.0,
            attn_drop_rate: 0.0,
            drop_path_rate: 0.1,
            drop_path_schedule: DropPathSchedule::Linear,
            embed_dim_acwi: 192,
            depth_acwi: 4,
            mixing_type: default_mixing_type(),
            acwi_blocks: 4,
            acwi_bias: true,
            double_skip: true,
            second_stage_imag: SecondStageImag::MirrorReal,
            biort: default_biort(),
            qshift: default_qshift(),
            wavelet_levels: 3,
            weight_init: WeightInit::Timm,
            grad_checkpointing: false,
            checkpoint_activations: false,
            hybrid: None,
        }
    }

    pub fn deit_small_acwi() -> Self {
        Self {
            embed_dim: 384,
            num_heads: 6,
            embed_dim_acwi: 384,
            ..Self::deit_tiny_acwi()
        }
    }

    pub fn deit_base_acwi() -> Self {
        Self {
            embed_dim: 768,
            num_heads: 12,
            embed_dim_acwi: 768,
            acwi_blocks: 8,
            ..Self::deit_tiny_acwi()
        }
    }

    /// ResNet-50 stem + ViT-base attention stage + mixing stage.
    pub fn hybrid_base_acwi() -> Self {
        Self {
            patch_size: 1,
            hybrid: Some(HybridConfig::r50_s16()),
            ..Self::deit_base_acwi()
        }
    }

    /// Small enough for unit tests on CPU: 32×32 images, 4×4 patch grid.
    pub fn tiny_test() -> Self {
        Self {
            img_size: 32,
            patch_size: 8,
            num_classes: 5,
            embed_dim: 32,
            depth: 1,
            num_heads: 2,
            embed_dim_acwi: 32,
            depth_acwi: 2,
            drop_path_rate: 0.0,
            ..Self::deit_tiny_acwi()
        }
    }

    /// Patch-grid size `(rows, cols)` seen by the transformer.
    pub fn grid_size(&self) -> (usize, usize) {
        let stride = self.patch_size * self.hybrid.as_ref().map_or(1, |h| h.stride());
        let side = self.img_size / stride.max(1);
        (side, side)
    }

    pub fn num_patches(&self) -> usize {
        let (h, w) = self.grid_size();
        h * w
    }

    pub fn num_prefix_tokens(&self) -> usize {
        usize::from(self.class_token)
    }

    /// Length of the learned position embedding.
    pub fn embed_len(&self) -> usize {
        if self.no_embed_class {
            self.num_patches()
        } else {
            self.num_patches() + self.num_prefix_tokens()
        }
    }

    pub fn use_fc_norm(&self) -> bool {
        self.fc_norm.unwrap_or(self.global_pool == GlobalPool::Avg)
    }

    pub fn mlp_hidden(&self, dim: usize) -> usize {
        (dim as f64 * self.mlp_ratio) as usize
    }

    pub fn biort(&self) -> Result<Biort, String> {
        self.biort.parse()
    }

    pub fn qshift(&self) -> Result<QShift, String> {
        self.qshift.parse()
    }

    /// Stochastic depth rate for each attention block.
    pub fn drop_path_rates(&self) -> Vec<f64> {
        schedule(self.drop_path_schedule, self.drop_path_rate, self.depth)
    }

    /// Stochastic depth rate for each mixing block.
    ///
    /// Mixing block `i` shares attention block `i`'s rate; blocks beyond the
    /// attention depth keep the last attention rate.
    pub fn drop_path_rates_acwi(&self) -> Vec<f64> {
        let attn = schedule(self.drop_path_schedule, self.drop_path_rate, self.depth.max(1));
        (0..self.depth_acwi).map(|i| attn[i.min(attn.len() - 1)]).collect()
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if self.img_size == 0 || self.patch_size == 0 {
            errors.push("img_size and patch_size must be greater than 0".to_string());
        } else {
            let stride = self.patch_size * self.hybrid.as_ref().map_or(1, |h| h.stride());
            if self.img_size % stride != 0 {
                errors.push(format!(
                    "img_size ({}) must be divisible by the patch stride ({})",
                    self.img_size, stride
                ));
            }
        }

        if self.in_chans == 0 {
            errors.push("in_chans must be greater than 0".to_string());
        }

        if self.embed_dim == 0 || self.num_heads == 0 {
            errors.push("embed_dim and num_heads must be greater than 0".to_string());
        } else if self.embed_dim % self.num_heads != 0 {
            errors.push(format!(
                "embed_dim ({}) must be divisible by num_heads ({})",
                self.embed_dim, self.num_heads
            ));
        }

        if self.depth_acwi > 0 {
            if self.embed_dim_acwi != self.embed_dim {
                errors.push(format!(
                    "embed_dim_acwi ({}) must equal embed_dim ({}): the mixing stage consumes the attention stage output",
                    self.embed_dim_acwi, self.embed_dim
                ));
            }
            if self.acwi_blocks == 0 {
                errors.push("acwi_blocks must be greater than 0".to_string());
            } else if self.embed_dim_acwi % self.acwi_blocks != 0 {
                errors.push(format!(
                    "embed_dim_acwi ({}) must be divisible by acwi_blocks ({})",
                    self.embed_dim_acwi, self.acwi_blocks
                ));
            }
            if self.wavelet_levels == 0 {
                errors.push("wavelet_levels must be greater than 0".to_string());
            }
            if self.num_patches() < 4 {
                errors.push(format!(
                    "patch grid {:?} too small for the wavelet mixer (need at least 2×2)",
                    self.grid_size()
                ));
            }
        } else {
            warnings.push("depth_acwi is 0: mixing stage disabled".to_string());
        }

        if let Err(e) = self.biort() {
            errors.push(e);
        }
        if let Err(e) = self.qshift() {
            errors.push(e);
        }

        if self.global_pool == GlobalPool::Token && !self.class_token {
            errors.push("global_pool 'token' requires class_token".to_string());
        }

        for (name, p) in [
            ("drop_rate", self.drop_rate),
            ("attn_drop_rate", self.attn_drop_rate),
            ("drop_path_rate", self.drop_path_rate),
        ] {
            if !(0.0..1.0).contains(&p) {
                errors.push(format!("{} must be in [0, 1), got {}", name, p));
            }
        }

        if self.mlp_ratio <= 0.0 {
            errors.push(format!("mlp_ratio must be positive, got {}", self.mlp_ratio));
        }

        if let Some(v) = self.init_values {
            if v <= 0.0 {
                errors.push(format!("init_values must be positive when set, got {}", v));
            }
        }

        if let Some(h) = &self.hybrid {
            if h.layers.is_empty() || h.width == 0 {
                errors.push("hybrid backbone needs at least one stage and a positive width".to_string());
            } else if h.width % 32 != 0 {
                errors.push(format!("hybrid width ({}) must be divisible by 32 (GroupNorm groups)", h.width));
            }
        }

        if self.depth_acwi > self.depth && self.drop_path_rate > 0.0 {
            warnings.push(format!(
                "depth_acwi ({}) exceeds depth ({}): extra mixing blocks reuse the last drop-path rate",
                self.depth_acwi, self.depth
            ));
        }

        if self.num_classes == 0 && self.global_pool == GlobalPool::None {
            warnings.push("num_classes 0 with no pooling: forward returns token features".to_string());
        }

        for w in &warnings {
            tracing::warn!("Config warning: {}", w);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Load from a JSON file.
    pub fn from_json_file(path: &std::path::Path) -> crate::error::AcwiResult<Self> {
        use crate::error::IoResultExt;
        let text = std::fs::read_to_string(path).with_path(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// `torch.linspace(0, rate, n)` or `[rate; n]`.
fn schedule(kind: DropPathSchedule, rate: f64, n: usize) -> Vec<f64> {
    match kind {
        DropPathSchedule::Uniform => vec![rate; n],
        DropPathSchedule::Linear => {
            if n <= 1 {
                return vec![0.0; n];
            }
            (0..n).map(|i| rate * i as f64 / (n - 1) as f64).collect()
        }
    }
}

impl GlobalPool {
    pub fn name(self) -> &'static str {
        match self {
            GlobalPool::Token => "token",
            GlobalPool::Avg => "avg",
            GlobalPool::None => "",
        }
    }
}

impl WeightInit {
    pub fn name(self) -> &'static str {
        match self {
            WeightInit::Timm => "",
            WeightInit::Jax => "jax",
            WeightInit::JaxNlhb => "jax_nlhb",
            WeightInit::Moco => "moco",
            WeightInit::Skip => "skip",
        }
    }
}

impl FromStr for GlobalPool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "token" => Ok(GlobalPool::Token),
            "avg" => Ok(GlobalPool::Avg),
            "" | "none" => Ok(GlobalPool::None),
            other => Err(format!(
                "unknown global_pool '{}'; expected 'token', 'avg', or ''",
                other
            )),
        }
    }
}

impl FromStr for WeightInit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "timm" => Ok(WeightInit::Timm),
            "jax" => Ok(WeightInit::Jax),
            "jax_nlhb" => Ok(WeightInit::JaxNlhb),
            "moco" => Ok(WeightInit::Moco),
            "skip" => Ok(WeightInit::Skip),
            other => Err(format!(
                "unknown weight_init '{}'; expected '', 'jax', 'jax_nlhb', 'moco', or 'skip'",
                other
            )),
        }
    }
}

impl FromStr for DropPathSchedule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uniform" => Ok(DropPathSchedule::Uniform),
            "linear" => Ok(DropPathSchedule::Linear),
            other => Err(format!(
                "unknown drop_path_schedule '{}'; expected 'uniform' or 'linear'",
                other
            )),
        }
    }
}

impl FromStr for MixingType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "acwi" => Ok(MixingType::Acwi),
            other => Err(format!("mixing type '{}'", other)),
        }
    }
}

impl fmt::Display for GlobalPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_validate() {
        for cfg in [
            AcwiConfig::deit_tiny_acwi(),
            AcwiConfig::deit_small_acwi(),
            AcwiConfig::deit_base_acwi(),
            AcwiConfig::hybrid_base_acwi(),
            AcwiConfig::tiny_test(),
        ] {
            assert!(cfg.validate().is_ok(), "{:?}", cfg.validate());
        }
    }

    #[test]
    fn test_token_counts_for_224_patch16() {
        let cfg = AcwiConfig::deit_tiny_acwi();
        assert_eq!(cfg.grid_size(), (14, 14));
        assert_eq!(cfg.num_patches(), 196);
        assert_eq!(cfg.embed_len(), 197);

        let hybrid = AcwiConfig::hybrid_base_acwi();
        assert_eq!(hybrid.grid_size(), (14, 14));
        assert_eq!(hybrid.hybrid.as_ref().map(|h| h.out_channels()), Some(1024));
    }

    #[test]
    fn test_validate_rejects_indivisible_groups() {
        let cfg = AcwiConfig {
            acwi_blocks: 5,
            ..AcwiConfig::deit_tiny_acwi()
        };
        let errors = cfg.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("acwi_blocks")));
    }

    #[test]
    fn test_validate_rejects_stage_width_mismatch() {
        let cfg = AcwiConfig {
            embed_dim_acwi: 96,
            ..AcwiConfig::deit_tiny_acwi()
        };
        let errors = cfg.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("embed_dim_acwi")));
    }

    #[test]
    fn test_validate_rejects_token_pool_without_class_token() {
        let cfg = AcwiConfig {
            class_token: false,
            ..AcwiConfig::tiny_test()
        };
        assert!(cfg.validate().is_err());
        let avg = AcwiConfig {
            class_token: false,
            global_pool: GlobalPool::Avg,
            ..AcwiConfig::tiny_test()
        };
        assert!(avg.validate().is_ok());
    }

    #[test]
    fn test_drop_path_schedules() {
        let cfg = AcwiConfig {
            depth: 5,
            depth_acwi: 3,
            drop_path_rate: 0.2,
            drop_path_schedule: DropPathSchedule::Linear,
            ..AcwiConfig::tiny_test()
        };
        let rates = cfg.drop_path_rates();
        assert_eq!(rates.len(), 5);
        assert_eq!(rates[0], 0.0);
        assert!((rates[4] - 0.2).abs() < 1e-12);
        assert!((rates[2] - 0.1).abs() < 1e-12);
        assert_eq!(cfg.drop_path_rates_acwi(), rates[..3].to_vec());

        let uniform = AcwiConfig {
            drop_path_schedule: DropPathSchedule::Uniform,
            ..cfg
        };
        assert!(uniform.drop_path_rates().iter().all(|&r| r == 0.2));
    }

    #[test]
    fn test_mixing_stage_shares_attention_schedule() {
        let cfg = AcwiConfig::deit_tiny_acwi();
        assert_eq!((cfg.depth, cfg.depth_acwi), (12, 4));
        let rates = cfg.drop_path_rates_acwi();
        let want = [0.0, 0.1 / 11.0, 0.2 / 11.0, 0.3 / 11.0];
        assert_eq!(rates.len(), 4);
        for (r, w) in rates.iter().zip(want) {
            assert!((r - w).abs() < 1e-12, "{} vs {}", r, w);
        }
        assert!((rates[3] - 0.0273).abs() < 1e-4);

        // Deeper mixing stage than attention stage: the tail holds the last rate.
        let deep = AcwiConfig {
            depth: 3,
            depth_acwi: 5,
            drop_path_rate: 0.2,
            ..AcwiConfig::tiny_test()
        };
        assert_eq!(deep.drop_path_rates_acwi(), vec![0.0, 0.1, 0.2, 0.2, 0.2]);
        assert!(deep.validate().is_ok());

        let no_attention = AcwiConfig { depth: 0, depth_acwi: 2, drop_path_rate: 0.2, ..AcwiConfig::tiny_test() };
        assert_eq!(no_attention.drop_path_rates_acwi(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_fc_norm_follows_pooling() {
        let token = AcwiConfig::tiny_test();
        assert!(!token.use_fc_norm());
        let avg = AcwiConfig {
            global_pool: GlobalPool::Avg,
            ..AcwiConfig::tiny_test()
        };
        assert!(avg.use_fc_norm());
        let forced = AcwiConfig {
            fc_norm: Some(true),
            ..AcwiConfig::tiny_test()
        };
        assert!(forced.use_fc_norm());
    }

    #[test]
    fn test_string_options_parse_and_reject() {
        assert_eq!("avg".parse::<GlobalPool>(), Ok(GlobalPool::Avg));
        assert_eq!("".parse::<GlobalPool>(), Ok(GlobalPool::None));
        assert!("max".parse::<GlobalPool>().is_err());
        assert_eq!("jax_nlhb".parse::<WeightInit>(), Ok(WeightInit::JaxNlhb));
        assert!("xavier".parse::<WeightInit>().is_err());
        assert_eq!("uniform".parse::<DropPathSchedule>(), Ok(DropPathSchedule::Uniform));
        assert!("gfnet".parse::<MixingType>().is_err());
    }

    #[test]
    fn test_json_roundtrip_uses_reference_names() {
        let cfg = AcwiConfig {
            weight_init: WeightInit::JaxNlhb,
            global_pool: GlobalPool::Avg,
            ..AcwiConfig::tiny_test()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains("\"jax_nlhb\""));
        assert!(json.contains("\"global_pool\":\"avg\""));
        let back: AcwiConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn test_json_defaults_fill_optional_fields() {
        let json = r#"{"embed_dim": 64, "depth": 2, "num_heads": 4,
                       "embed_dim_acwi": 64, "depth_acwi": 1}"#;
        let cfg: AcwiConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.img_size, 224);
        assert_eq!(cfg.acwi_blocks, 4);
        assert_eq!(cfg.mixing_type, "acwi");
        assert_eq!(cfg.biort, "near_sym_b");
        assert_eq!(cfg.weight_init, WeightInit::Timm);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_unknown_pool_string_is_a_parse_error() {
        let json = r#"{"embed_dim": 64, "depth": 2, "num_heads": 4,
                       "embed_dim_acwi": 64, "depth_acwi": 1, "global_pool": "max"}"#;
        assert!(serde_json::from_str::<AcwiConfig>(json).is_err());
    }
}
