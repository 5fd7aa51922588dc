//! Full network: patch embed → attention blocks → wavelet mixing blocks → head.

#[cfg(test)]
use candle_core::DType;
use candle_core::{Device, Module, Result, Tensor};
use candle_nn::{Dropout, LayerNorm, Linear, VarBuilder, VarMap};

use crate::block::{AttentionBlock, MixingBlock};
use crate::config::{AcwiConfig, GlobalPool};
use crate::error::config_error;
use crate::init::{InitScheme, LinearRole};
use crate::layers::{layer_norm, linear, PatchEmbed};
use crate::logging::{log_model_built, log_segmented_stage, ModelSummary};

/// Segments used when the mixing stage runs with activation checkpointing.
const MIXING_SEGMENTS: usize = 4;

/// Parameter names excluded from weight decay.
pub const NO_WEIGHT_DECAY: [&str; 3] = ["pos_embed", "cls_token", "dist_token"];

/// Coarse parameter grouping for layer-wise learning-rate decay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ParamGroup {
    /// Patch embedding, class token, position embedding.
    Stem,
    /// Attention block `i`.
    Block(usize),
    /// Final norm; ordered after every block.
    Norm,
}

impl ParamGroup {
    /// Group for a parameter name; `None` for parameters outside the
    /// grouped trunk (mixing blocks, fc_norm, head).
    pub fn of(name: &str) -> Option<Self> {
        if name.starts_with("cls_token") || name.starts_with("pos_embed") || name.starts_with("patch_embed") {
            return Some(ParamGroup::Stem);
        }
        if let Some(rest) = name.strip_prefix("blocks.") {
            let idx = rest.split('.').next()?.parse().ok()?;
            return Some(ParamGroup::Block(idx));
        }
        if name.starts_with("norm") {
            return Some(ParamGroup::Norm);
        }
        None
    }
}

/// Trainable tensors split for AdamW-style optimizers.
pub struct ParamGroups {
    /// Matrices and conv kernels.
    pub decay: Vec<Tensor>,
    /// Biases, norm scales, layer-scale gammas, class token, position embedding.
    pub no_decay: Vec<Tensor>,
}

/// ViT attention stage followed by complex-wavelet mixing blocks.
pub struct AcwiFormer {
    config: AcwiConfig,
    varmap: VarMap,
    dtype: candle_core::DType,
    device: Device,
    patch_embed: PatchEmbed,
    cls_token: Option<Tensor>, // [1, 1, D]
    pos_embed: Tensor,         // [1, embed_len, D]
    pos_drop: Dropout,
    blocks: Vec<AttentionBlock>,
    blocks_acwi: Vec<MixingBlock>,
    norm: Option<LayerNorm>,
    fc_norm: Option<LayerNorm>,
    head: Option<Linear>,
    grad_checkpointing: bool,
    checkpoint_activations: bool,
}

impl AcwiFormer {
    /// Build the network, registering every parameter in `varmap`.
    pub fn new(config: &AcwiConfig, varmap: &VarMap, dtype: candle_core::DType, device: &Device) -> Result<Self> {
        if let Err(errors) = config.validate() {
            return Err(config_error(errors.join("; ")).into_candle());
        }
        let vb = VarBuilder::from_varmap(varmap, dtype, device);
        let init = InitScheme::new(config.weight_init, config.num_classes);
        let dim = config.embed_dim;

        let patch_embed = PatchEmbed::new(
            config.img_size,
            config.patch_size,
            config.in_chans,
            dim,
            config.hybrid.as_ref(),
            &init,
            vb.pp("patch_embed_bone"),
        )?;

        let cls_token = if config.class_token {
            Some(vb.get_with_hints((1, 1, dim), "cls_token", init.cls_token())?)
        } else {
            None
        };
        let pos_embed = vb.get_with_hints((1, config.embed_len(), dim), "pos_embed", init.pos_embed())?;

        let dpr = config.drop_path_rates();
        let blocks = dpr
            .iter()
            .enumerate()
            .map(|(i, &rate)| AttentionBlock::new(config, rate, &init, vb.pp(format!("blocks.{}", i))))
            .collect::<Result<Vec<_>>>()?;

        let dpr_acwi = config.drop_path_rates_acwi();
        let blocks_acwi = dpr_acwi
            .iter()
            .enumerate()
            .map(|(i, &rate)| MixingBlock::new(config, rate, &init, vb.pp(format!("blocks_acwi.{}", i))))
            .collect::<Result<Vec<_>>>()?;

        let use_fc_norm = config.use_fc_norm();
        let norm = if use_fc_norm { None } else { Some(layer_norm(dim, vb.pp("norm"))?) };
        let fc_norm = if use_fc_norm { Some(layer_norm(dim, vb.pp("fc_norm"))?) } else { None };
        let head = if config.num_classes > 0 {
            Some(linear(dim, config.num_classes, true, LinearRole::Head, &init, vb.pp("head"))?)
        } else {
            None
        };

        let model = Self {
            config: config.clone(),
            varmap: varmap.clone(),
            dtype,
            device: device.clone(),
            patch_embed,
            cls_token,
            pos_embed,
            pos_drop: Dropout::new(config.drop_rate as f32),
            blocks,
            blocks_acwi,
            norm,
            fc_norm,
            head,
            grad_checkpointing: config.grad_checkpointing,
            checkpoint_activations: config.checkpoint_activations,
        };

        log_model_built(&ModelSummary {
            num_params: model.num_params(),
            attention_blocks: model.blocks.len(),
            mixing_blocks: model.blocks_acwi.len(),
            embed_dim: dim,
            num_patches: model.patch_embed.num_patches(),
            hybrid: model.patch_embed.is_hybrid(),
        });

        Ok(model)
    }

    pub fn config(&self) -> &AcwiConfig {
        &self.config
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn num_classes(&self) -> usize {
        self.config.num_classes
    }

    pub fn global_pool(&self) -> GlobalPool {
        self.config.global_pool
    }

    pub fn grid_size(&self) -> (usize, usize) {
        self.patch_embed.grid_size()
    }

    pub fn num_prefix_tokens(&self) -> usize {
        usize::from(self.cls_token.is_some())
    }

    /// Shape of the live position embedding.
    pub fn pos_embed_shape(&self) -> Vec<usize> {
        self.pos_embed.dims().to_vec()
    }

    /// Total element count of all registered parameters.
    pub fn num_params(&self) -> usize {
        self.varmap.all_vars().iter().map(|v| v.elem_count()).sum()
    }

    pub fn no_weight_decay(&self) -> &'static [&'static str] {
        &NO_WEIGHT_DECAY
    }

    /// Split parameters into decay / no-decay sets (1-D tensors and
    /// [`NO_WEIGHT_DECAY`] names skip decay).
    pub fn param_groups(&self) -> Result<ParamGroups> {
        let data = self
            .varmap
            .data()
            .lock()
            .map_err(|e| candle_core::Error::Msg(format!("varmap lock poisoned: {}", e)))?;
        let mut names: Vec<&String> = data.keys().collect();
        names.sort();
        let mut groups = ParamGroups { decay: Vec::new(), no_decay: Vec::new() };
        for name in names {
            let t = data[name].as_tensor().clone();
            if t.rank() <= 1 || NO_WEIGHT_DECAY.contains(&name.as_str()) {
                groups.no_decay.push(t);
            } else {
                groups.decay.push(t);
            }
        }
        Ok(groups)
    }

    pub fn set_grad_checkpointing(&mut self, enable: bool) {
        self.grad_checkpointing = enable;
    }

    pub fn set_checkpoint_activations(&mut self, enable: bool) {
        self.checkpoint_activations = enable;
    }

    /// Replace the classifier. The old head parameters are dropped from the
    /// var map; new ones follow the configured init scheme.
    pub fn reset_classifier(&mut self, num_classes: usize, global_pool: Option<GlobalPool>) -> Result<()> {
        if let Some(pool) = global_pool {
            if pool == GlobalPool::Token && self.cls_token.is_none() {
                candle_core::bail!("global_pool 'token' requires a class token");
            }
            self.config.global_pool = pool;
        }
        {
            let mut data = self
                .varmap
                .data()
                .lock()
                .map_err(|e| candle_core::Error::Msg(format!("varmap lock poisoned: {}", e)))?;
            data.remove("head.weight");
            data.remove("head.bias");
        }
        self.config.num_classes = num_classes;
        let init = InitScheme::new(self.config.weight_init, num_classes);
        self.head = if num_classes > 0 {
            let vb = VarBuilder::from_varmap(&self.varmap, self.dtype, &self.device);
            Some(linear(self.config.embed_dim, num_classes, true, LinearRole::Head, &init, vb.pp("head"))?)
        } else {
            None
        };
        Ok(())
    }

    fn pos_embed_tokens(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let b = x.dim(0)?;
        let cls = |x: &Tensor| -> Result<Tensor> {
            match &self.cls_token {
                Some(cls) => {
                    let d = cls.dim(2)?;
                    Tensor::cat(&[&cls.broadcast_as((b, 1, d))?.contiguous()?, x], 1)
                }
                None => Ok(x.clone()),
            }
        };
        let x = if self.config.no_embed_class {
            cls(&x.broadcast_add(&self.pos_embed)?)?
        } else {
            cls(x)?.broadcast_add(&self.pos_embed)?
        };
        self.pos_drop.forward(&x, train)
    }

    fn run_attention_stage(&self, mut x: Tensor, train: bool) -> Result<Tensor> {
        if self.grad_checkpointing && !self.blocks.is_empty() {
            log_segmented_stage("attention", self.blocks.len(), self.blocks.len());
        }
        for block in &self.blocks {
            x = block.forward_t(&x, train)?;
        }
        Ok(x)
    }

    fn run_mixing_stage(&self, mut x: Tensor, train: bool) -> Result<Tensor> {
        let grid = Some(self.patch_embed.grid_size());
        let segment_len = if self.checkpoint_activations {
            let segments = MIXING_SEGMENTS.min(self.blocks_acwi.len()).max(1);
            log_segmented_stage("mixing", self.blocks_acwi.len(), segments);
            self.blocks_acwi.len().div_ceil(segments).max(1)
        } else {
            self.blocks_acwi.len().max(1)
        };
        for segment in self.blocks_acwi.chunks(segment_len) {
            for block in segment {
                x = block.forward_t(&x, grid, train)?;
            }
        }
        Ok(x)
    }

    /// Images (B, C, H, W) → normalized tokens (B, prefix + N, D).
    pub fn forward_features(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let x = self.patch_embed.forward(x)?;
        let x = self.pos_embed_tokens(&x, train)?;
        let x = self.run_attention_stage(x, train)?;

        let prefix = self.num_prefix_tokens();
        let n = x.dim(1)?;
        let x = if prefix > 0 {
            let cls = x.narrow(1, 0, prefix)?;
            let tokens = self.run_mixing_stage(x.narrow(1, prefix, n - prefix)?, train)?;
            Tensor::cat(&[&cls, &tokens], 1)?
        } else {
            self.run_mixing_stage(x, train)?
        };

        match &self.norm {
            Some(norm) => norm.forward(&x),
            None => Ok(x),
        }
    }

    /// Pool, fc_norm, and (unless `pre_logits`) the classifier.
    pub fn forward_head(&self, x: &Tensor, pre_logits: bool) -> Result<Tensor> {
        let x = match self.config.global_pool {
            GlobalPool::Avg => {
                let prefix = self.num_prefix_tokens();
                let n = x.dim(1)?;
                x.narrow(1, prefix, n - prefix)?.mean(1)?
            }
            GlobalPool::Token => x.get_on_dim(1, 0)?,
            GlobalPool::None => x.clone(),
        };
        let x = match &self.fc_norm {
            Some(norm) => norm.forward(&x)?,
            None => x,
        };
        match (&self.head, pre_logits) {
            (Some(head), false) => head.forward(&x),
            _ => Ok(x),
        }
    }

    pub fn forward_t(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let features = self.forward_features(x, train)?;
        self.forward_head(&features, false)
    }

    /// Inference forward: images → logits (B, num_classes).
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.forward_t(x, false)
    }
}

impl Module for AcwiFormer {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        self.forward_t(xs, false)
    }
}
