//! Checkpoint save/load and import of external weights.
//!
//! Native checkpoints are a directory with `model.safetensors` and
//! `meta.json`. External weights come either as a flat state dict
//! (`.safetensors`, or a PyTorch pickle optionally nested under `model`) or
//! as a Flax ViT `.npz`. Every import builds the full list of updates and
//! checks it against the live model before a single variable is written.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use candle_nn::VarMap;
use serde::{Deserialize, Serialize};

use crate::config::AcwiConfig;
use crate::error::{checkpoint_error, AcwiError, AcwiResult, IoResultExt};
use crate::logging::{log_checkpoint_skip, log_pos_embed_resized};
use crate::model::AcwiFormer;

/// Metadata stored alongside model weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub config: AcwiConfig,
    pub num_params: usize,
    /// File the weights were imported from, if any.
    #[serde(default)]
    pub source: Option<String>,
}

/// Outcome of an import.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    /// Model parameters written.
    pub loaded: Vec<String>,
    /// Model parameters the source did not provide (left at init).
    pub missing: Vec<String>,
    /// Source entries that were ignored.
    pub skipped: Vec<String>,
}

/// Save model weights and metadata to `dir`.
///
/// Creates:
///   - `<dir>/model.safetensors`: model weights
///   - `<dir>/meta.json`: config and provenance
pub fn save_checkpoint(model: &AcwiFormer, dir: &Path, source: Option<&str>) -> AcwiResult<()> {
    std::fs::create_dir_all(dir).with_path(dir)?;

    let weights_path = dir.join("model.safetensors");
    model
        .varmap()
        .save(&weights_path)
        .map_err(|e| checkpoint_error(e.to_string(), &weights_path))?;

    let meta = CheckpointMeta {
        config: model.config().clone(),
        num_params: model.num_params(),
        source: source.map(str::to_string),
    };
    let meta_path = dir.join("meta.json");
    let json = serde_json::to_string_pretty(&meta)?;
    std::fs::write(&meta_path, json).with_path(&meta_path)?;

    tracing::info!(
        path = %dir.display(),
        num_params = meta.num_params,
        event = "checkpoint_saved",
        "Checkpoint saved"
    );
    Ok(())
}

/// Rebuild a model from a directory written by [`save_checkpoint`].
pub fn load_checkpoint(dir: &Path, device: &Device) -> AcwiResult<(AcwiFormer, CheckpointMeta)> {
    let meta_path = dir.join("meta.json");
    let meta_json = std::fs::read_to_string(&meta_path).with_path(&meta_path)?;
    let meta: CheckpointMeta = serde_json::from_str(&meta_json)?;

    let mut varmap = VarMap::new();
    let model = AcwiFormer::new(&meta.config, &varmap, DType::F32, device)?;
    let weights_path = dir.join("model.safetensors");
    varmap
        .load(&weights_path)
        .map_err(|e| checkpoint_error(e.to_string(), &weights_path))?;

    Ok((model, meta))
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Read a flat state dict from `.safetensors` or a PyTorch pickle.
///
/// Pickles are read under the `model` key first (DeiT-style training
/// checkpoints), then as a bare state dict.
pub fn read_state_dict(path: &Path, device: &Device) -> AcwiResult<HashMap<String, Tensor>> {
    if !path.exists() {
        return Err(AcwiError::Io {
            message: "file not found".to_string(),
            path: path.display().to_string(),
        });
    }
    let entries: Vec<(String, Tensor)> = match extension(path).as_str() {
        "safetensors" => candle_core::safetensors::load(path, device)
            .map_err(|e| checkpoint_error(e.to_string(), path))?
            .into_iter()
            .collect(),
        "pth" | "pt" | "bin" => {
            let nested = candle_core::pickle::read_all_with_key(path, Some("model")).unwrap_or_default();
            let raw = if nested.is_empty() {
                candle_core::pickle::read_all_with_key(path, None)
                    .map_err(|e| checkpoint_error(e.to_string(), path))?
            } else {
                nested
            };
            raw.into_iter()
                .map(|(k, v)| Ok((k, v.to_device(device)?)))
                .collect::<candle_core::Result<Vec<_>>>()?
        }
        other => {
            return Err(checkpoint_error(
                format!("unsupported checkpoint extension '{}'", other),
                path,
            ))
        }
    };

    Ok(entries
        .into_iter()
        .map(|(k, v)| match k.strip_prefix("model.") {
            Some(stripped) => (stripped.to_string(), v),
            None => (k, v),
        })
        .collect())
}

fn square_side(n: usize) -> Option<usize> {
    let side = (n as f64).sqrt().round() as usize;
    (side * side == n).then_some(side)
}

/// Row-stochastic bilinear resampling matrix (`out`, `inp`), matching
/// `F.interpolate(mode="bilinear", align_corners=False)` along one axis.
fn interpolation_matrix(out: usize, inp: usize) -> Vec<f32> {
    let mut m = vec![0f32; out * inp];
    let scale = inp as f64 / out as f64;
    for i in 0..out {
        let src = ((i as f64 + 0.5) * scale - 0.5).max(0.0);
        let i0 = (src.floor() as usize).min(inp - 1);
        let i1 = (i0 + 1).min(inp - 1);
        let frac = src - i0 as f64;
        m[i * inp + i0] += (1.0 - frac) as f32;
        m[i * inp + i1] += frac as f32;
    }
    m
}

/// Resize a (1, prefix + g*g, D) position embedding to `new_grid`,
/// keeping the first `num_prefix_tokens` rows untouched.
pub fn resize_pos_embed(
    posemb: &Tensor,
    new_grid: (usize, usize),
    num_prefix_tokens: usize,
) -> candle_core::Result<Tensor> {
    let (_, len, dim) = posemb.dims3()?;
    if len < num_prefix_tokens {
        candle_core::bail!("position embedding has {} rows, fewer than {} prefix tokens", len, num_prefix_tokens);
    }
    let old_tokens = len - num_prefix_tokens;
    let gs_old = match square_side(old_tokens) {
        Some(s) => s,
        None => candle_core::bail!("position embedding grid of {} tokens is not square", old_tokens),
    };
    let (new_h, new_w) = new_grid;
    log_pos_embed_resized((gs_old, gs_old), new_grid, num_prefix_tokens);

    let dtype = posemb.dtype();
    let device = posemb.device();
    let grid = posemb
        .narrow(1, num_prefix_tokens, old_tokens)?
        .to_dtype(DType::F32)?
        .reshape((gs_old, gs_old * dim))?;
    let ry = Tensor::from_vec(interpolation_matrix(new_h, gs_old), (new_h, gs_old), device)?;
    let rx = Tensor::from_vec(interpolation_matrix(new_w, gs_old), (new_w, gs_old), device)?;

    // rows: (new_h, gs_old, D) -> cols: (new_w, new_h, D)
    let rows = ry.matmul(&grid)?.reshape((new_h, gs_old, dim))?;
    let cols = rows
        .transpose(0, 1)?
        .contiguous()?
        .reshape((gs_old, new_h * dim))?;
    let resized = rx
        .matmul(&cols)?
        .reshape((new_w, new_h, dim))?
        .transpose(0, 1)?
        .contiguous()?
        .reshape((1, new_h * new_w, dim))?
        .to_dtype(dtype)?;

    if num_prefix_tokens == 0 {
        return Ok(resized);
    }
    Tensor::cat(&[&posemb.narrow(1, 0, num_prefix_tokens)?, &resized], 1)
}

/// Adapt a (O, I, kh, kw) RGB-trained conv kernel to `in_chans` inputs.
pub fn adapt_input_conv(in_chans: usize, weight: &Tensor) -> AcwiResult<Tensor> {
    let (o, i, kh, kw) = weight.dims4()?;
    if in_chans == i {
        return Ok(weight.clone());
    }
    if in_chans == 1 {
        if i > 3 {
            if i % 3 != 0 {
                return Err(AcwiError::NotImplemented(format!(
                    "collapsing {} input channels to 1",
                    i
                )));
            }
            return Ok(weight.reshape((o, i / 3, 3, kh, kw))?.sum(2)?);
        }
        return Ok(weight.sum_keepdim(1)?);
    }
    if i != 3 {
        return Err(AcwiError::NotImplemented(
            "weight format not supported by input-channel conversion".to_string(),
        ));
    }
    let repeat = in_chans.div_ceil(3);
    let w = weight.repeat((1, repeat, 1, 1))?.narrow(1, 0, in_chans)?;
    Ok((w * (3.0 / in_chans as f64))?)
}

/// Position-embedding rows that belong to prefix tokens in `model`.
fn pos_embed_prefix(model: &AcwiFormer) -> usize {
    if model.config().no_embed_class {
        0
    } else {
        model.num_prefix_tokens()
    }
}

/// Adjust a state dict to the live model: legacy `patch_embed.` names,
/// linear patch-projection weights, and position-embedding grid size.
pub fn checkpoint_filter(
    state: HashMap<String, Tensor>,
    model: &AcwiFormer,
) -> AcwiResult<HashMap<String, Tensor>> {
    let live = live_shapes(model.varmap())?;
    let mut out = HashMap::with_capacity(state.len());
    for (key, value) in state {
        let key = match key.strip_prefix("patch_embed.") {
            Some(rest) => format!("patch_embed_bone.{}", rest),
            None => key,
        };
        let value = if key == "patch_embed_bone.proj.weight" && value.rank() < 4 {
            // Manual patchify + linear projection from older checkpoints.
            match live.get(&key) {
                Some(shape) if shape.len() == 4 => value.reshape((shape[0], (), shape[2], shape[3]))?,
                _ => value,
            }
        } else if key == "pos_embed" {
            let target = model.pos_embed_shape();
            if value.dims() != target.as_slice() {
                resize_pos_embed(&value, model.grid_size(), pos_embed_prefix(model))?
            } else {
                value
            }
        } else {
            value
        };
        out.insert(key, value);
    }
    Ok(out)
}

fn live_shapes(varmap: &VarMap) -> AcwiResult<HashMap<String, Vec<usize>>> {
    let data = varmap
        .data()
        .lock()
        .map_err(|e| AcwiError::Candle(format!("varmap lock poisoned: {}", e)))?;
    Ok(data
        .iter()
        .map(|(k, v)| (k.clone(), v.as_tensor().dims().to_vec()))
        .collect())
}

/// Validate every update against the live variables, then write them.
fn apply_updates(varmap: &VarMap, updates: Vec<(String, Tensor)>, path: &Path) -> AcwiResult<Vec<String>> {
    let data = varmap
        .data()
        .lock()
        .map_err(|e| AcwiError::Candle(format!("varmap lock poisoned: {}", e)))?;

    let mut staged = Vec::with_capacity(updates.len());
    for (name, value) in updates {
        let var = data.get(&name).ok_or_else(|| AcwiError::MissingParameter {
            name: name.clone(),
            path: path.display().to_string(),
        })?;
        if var.as_tensor().dims() != value.dims() {
            return Err(AcwiError::ShapeMismatch {
                name,
                expected: var.as_tensor().dims().to_vec(),
                found: value.dims().to_vec(),
            });
        }
        let value = value.to_dtype(var.dtype())?.to_device(var.device())?;
        staged.push((name, var.clone(), value));
    }

    let mut loaded = Vec::with_capacity(staged.len());
    for (name, var, value) in staged {
        var.set(&value)?;
        loaded.push(name);
    }
    loaded.sort();
    Ok(loaded)
}

/// Load a filtered state dict into `model`.
///
/// With `strict`, every model parameter must be present. Source entries the
/// model does not have are skipped and logged.
pub fn load_state_dict(
    model: &AcwiFormer,
    state: HashMap<String, Tensor>,
    strict: bool,
    path: &Path,
) -> AcwiResult<LoadReport> {
    let live = live_shapes(model.varmap())?;
    let mut report = LoadReport::default();
    let mut updates = Vec::new();

    for (name, value) in state {
        if live.contains_key(&name) {
            updates.push((name, value));
        } else {
            log_checkpoint_skip(&name, "not a parameter of this model");
            report.skipped.push(name);
        }
    }

    let mut missing: Vec<String> = live
        .keys()
        .filter(|k| !updates.iter().any(|(n, _)| n == *k))
        .cloned()
        .collect();
    missing.sort();
    if strict {
        if let Some(name) = missing.first() {
            return Err(AcwiError::MissingParameter {
                name: name.clone(),
                path: path.display().to_string(),
            });
        }
    }

    report.loaded = apply_updates(model.varmap(), updates, path)?;
    report.missing = missing;
    report.skipped.sort();
    Ok(report)
}

/// `.npz` array to model layout: drop 1×1×1 leading axes of 4-D arrays,
/// then move the Flax trailing feature axes to the front.
fn n2p(w: &Tensor, transpose: bool) -> candle_core::Result<Tensor> {
    let dims = w.dims().to_vec();
    let w = if dims.len() == 4 && dims[0] == 1 && dims[1] == 1 && dims[2] == 1 {
        w.flatten_all()?
    } else {
        w.clone()
    };
    if !transpose {
        return Ok(w);
    }
    match w.rank() {
        4 => w.permute((3, 2, 0, 1))?.contiguous(),
        3 => w.permute((2, 0, 1))?.contiguous(),
        2 => w.t()?.contiguous(),
        _ => Ok(w),
    }
}

/// How source arrays become one model parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transform {
    /// `n2p(w)`
    Kernel,
    /// `n2p(w, transpose = false)`
    Raw,
    /// `adapt_input_conv(in_chans, n2p(w))`
    InputConv,
    /// q, k, v kernels: `cat([n2p(w, false).flatten(1).T])`
    QkvKernel,
    /// q, k, v biases: `cat([n2p(b, false).reshape(-1)])`
    QkvBias,
    /// `n2p(w).flatten(1)`
    OutKernel,
    /// `n2p(w, false)`, resized to the live grid if needed.
    PosEmbed,
}

/// One target parameter and the `.npz` keys it is built from.
struct Mapping {
    target: String,
    sources: Vec<String>,
    transform: Transform,
}

impl Mapping {
    fn new(target: impl Into<String>, source: impl Into<String>, transform: Transform) -> Self {
        Self { target: target.into(), sources: vec![source.into()], transform }
    }
}

fn push_norm(maps: &mut Vec<Mapping>, target: &str, source: &str) {
    maps.push(Mapping::new(format!("{}.weight", target), format!("{}/scale", source), Transform::Kernel));
    maps.push(Mapping::new(format!("{}.bias", target), format!("{}/bias", source), Transform::Kernel));
}

/// Static name mapping from the Flax layout to this model.
fn npz_mappings(model: &AcwiFormer, prefix: &str) -> Vec<Mapping> {
    let cfg = model.config();
    let mut maps = Vec::new();
    let pe = "patch_embed_bone";

    if let Some(hybrid) = &cfg.hybrid {
        let bb = format!("{}.backbone", pe);
        maps.push(Mapping::new(
            format!("{}.stem.conv.weight", bb),
            format!("{}conv_root/kernel", prefix),
            Transform::InputConv,
        ));
        push_norm(&mut maps, &format!("{}.stem.norm", bb), &format!("{}gn_root", prefix));
        for (i, &depth) in hybrid.layers.iter().enumerate() {
            for j in 0..depth {
                let target = format!("{}.stages.{}.blocks.{}", bb, i, j);
                let source = format!("{}block{}/unit{}", prefix, i + 1, j + 1);
                for r in 1..=3 {
                    maps.push(Mapping::new(
                        format!("{}.conv{}.weight", target, r),
                        format!("{}/conv{}/kernel", source, r),
                        Transform::Kernel,
                    ));
                    push_norm(&mut maps, &format!("{}.norm{}", target, r), &format!("{}/gn{}", source, r));
                }
                if j == 0 {
                    maps.push(Mapping::new(
                        format!("{}.downsample.conv.weight", target),
                        format!("{}/conv_proj/kernel", source),
                        Transform::Kernel,
                    ));
                    push_norm(&mut maps, &format!("{}.downsample.norm", target), &format!("{}/gn_proj", source));
                }
            }
        }
        maps.push(Mapping::new(
            format!("{}.proj.weight", pe),
            format!("{}embedding/kernel", prefix),
            Transform::Kernel,
        ));
    } else {
        maps.push(Mapping::new(
            format!("{}.proj.weight", pe),
            format!("{}embedding/kernel", prefix),
            Transform::InputConv,
        ));
    }
    maps.push(Mapping::new(format!("{}.proj.bias", pe), format!("{}embedding/bias", prefix), Transform::Kernel));

    if cfg.class_token {
        maps.push(Mapping::new("cls_token", format!("{}cls", prefix), Transform::Raw));
    }
    maps.push(Mapping::new(
        "pos_embed",
        format!("{}Transformer/posembed_input/pos_embedding", prefix),
        Transform::PosEmbed,
    ));
    let final_norm = if cfg.use_fc_norm() { "fc_norm" } else { "norm" };
    push_norm(&mut maps, final_norm, &format!("{}Transformer/encoder_norm", prefix));

    for i in 0..cfg.depth {
        let target = format!("blocks.{}", i);
        let bp = format!("{}Transformer/encoderblock_{}/", prefix, i);
        let mha = format!("{}MultiHeadDotProductAttention_1/", bp);
        push_norm(&mut maps, &format!("{}.norm1", target), &format!("{}LayerNorm_0", bp));
        maps.push(Mapping {
            target: format!("{}.attn.qkv.weight", target),
            sources: ["query", "key", "value"].iter().map(|n| format!("{}{}/kernel", mha, n)).collect(),
            transform: Transform::QkvKernel,
        });
        if cfg.qkv_bias {
            maps.push(Mapping {
                target: format!("{}.attn.qkv.bias", target),
                sources: ["query", "key", "value"].iter().map(|n| format!("{}{}/bias", mha, n)).collect(),
                transform: Transform::QkvBias,
            });
        }
        maps.push(Mapping::new(format!("{}.attn.proj.weight", target), format!("{}out/kernel", mha), Transform::OutKernel));
        maps.push(Mapping::new(format!("{}.attn.proj.bias", target), format!("{}out/bias", mha), Transform::Kernel));
        for r in 0..2 {
            maps.push(Mapping::new(
                format!("{}.mlp.fc{}.weight", target, r + 1),
                format!("{}MlpBlock_3/Dense_{}/kernel", bp, r),
                Transform::Kernel,
            ));
            maps.push(Mapping::new(
                format!("{}.mlp.fc{}.bias", target, r + 1),
                format!("{}MlpBlock_3/Dense_{}/bias", bp, r),
                Transform::Kernel,
            ));
        }
        push_norm(&mut maps, &format!("{}.norm2", target), &format!("{}LayerNorm_2", bp));
    }
    maps
}

fn apply_transform(
    mapping: &Mapping,
    arrays: &HashMap<String, Tensor>,
    model: &AcwiFormer,
    path: &Path,
) -> AcwiResult<Tensor> {
    let sources = mapping
        .sources
        .iter()
        .map(|k| {
            arrays.get(k).ok_or_else(|| AcwiError::MissingParameter {
                name: k.clone(),
                path: path.display().to_string(),
            })
        })
        .collect::<AcwiResult<Vec<_>>>()?;
    let first = sources[0];

    let value = match mapping.transform {
        Transform::Kernel => n2p(first, true)?,
        Transform::Raw => n2p(first, false)?,
        Transform::InputConv => adapt_input_conv(model.config().in_chans, &n2p(first, true)?)?,
        Transform::OutKernel => n2p(first, true)?.flatten_from(1)?,
        Transform::QkvKernel => {
            let parts = sources
                .iter()
                .map(|w| n2p(w, false)?.flatten_from(1)?.t()?.contiguous())
                .collect::<candle_core::Result<Vec<_>>>()?;
            Tensor::cat(&parts, 0)?
        }
        Transform::QkvBias => {
            let parts = sources
                .iter()
                .map(|b| n2p(b, false)?.flatten_all())
                .collect::<candle_core::Result<Vec<_>>>()?;
            Tensor::cat(&parts, 0)?
        }
        Transform::PosEmbed => {
            let w = n2p(first, false)?;
            if w.dims() != model.pos_embed_shape().as_slice() {
                resize_pos_embed(&w, model.grid_size(), pos_embed_prefix(model))?
            } else {
                w
            }
        }
    };
    Ok(value)
}

/// Load Flax ViT weights from an `.npz` archive.
///
/// `prefix` defaults to `opt/target/` when the archive is an optimizer
/// checkpoint. The classifier is only loaded when its width matches.
pub fn load_npz_weights(model: &AcwiFormer, path: &Path, prefix: &str) -> AcwiResult<LoadReport> {
    let arrays: HashMap<String, Tensor> = Tensor::read_npz(path)
        .map_err(|e| checkpoint_error(e.to_string(), path))?
        .into_iter()
        .map(|(k, v)| Ok((k, v.to_device(model.device())?)))
        .collect::<candle_core::Result<_>>()?;

    let prefix = if prefix.is_empty() && arrays.contains_key("opt/target/embedding/kernel") {
        "opt/target/"
    } else {
        prefix
    };

    let mut maps = npz_mappings(model, prefix);
    let mut report = LoadReport::default();

    let head_bias_key = format!("{}head/bias", prefix);
    let head_kernel_key = format!("{}head/kernel", prefix);
    match arrays.get(&head_bias_key) {
        Some(bias) if model.num_classes() > 0 && bias.dims().last() == Some(&model.num_classes()) => {
            maps.push(Mapping::new("head.weight", head_kernel_key, Transform::Kernel));
            maps.push(Mapping::new("head.bias", head_bias_key, Transform::Kernel));
        }
        Some(_) => {
            log_checkpoint_skip(&head_bias_key, "classifier width differs from model");
            report.skipped.push(head_bias_key);
            report.skipped.push(head_kernel_key);
        }
        None => {}
    }

    let updates = maps
        .iter()
        .map(|m| Ok((m.target.clone(), apply_transform(m, &arrays, model, path)?)))
        .collect::<AcwiResult<Vec<_>>>()?;

    report.loaded = apply_updates(model.varmap(), updates, path)?;
    let live = live_shapes(model.varmap())?;
    let mut missing: Vec<String> = live.into_keys().filter(|k| !report.loaded.contains(k)).collect();
    missing.sort();
    report.missing = missing;

    tracing::info!(
        path = %path.display(),
        loaded = report.loaded.len(),
        left_at_init = report.missing.len(),
        event = "npz_imported",
        "Imported Flax ViT weights"
    );
    Ok(report)
}

/// Import any supported external checkpoint into `model`.
pub fn import_weights(model: &AcwiFormer, path: &Path, strict: bool) -> AcwiResult<LoadReport> {
    if extension(path) == "npz" {
        return load_npz_weights(model, path, "");
    }
    let state = read_state_dict(path, model.device())?;
    let state = checkpoint_filter(state, model)?;
    load_state_dict(model, state, strict, path)
}

/// Default output directory for a converted checkpoint: `<stem>-acwi/`.
pub fn default_output_dir(source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("checkpoint");
    source.with_file_name(format!("{}-acwi", stem))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_model() -> AcwiResult<AcwiFormer> {
        let varmap = VarMap::new();
        Ok(AcwiFormer::new(&AcwiConfig::tiny_test(), &varmap, DType::F32, &Device::Cpu)?)
    }

    fn snapshot(model: &AcwiFormer, name: &str) -> Tensor {
        model.varmap().data().lock().unwrap()[name].as_tensor().copy().unwrap()
    }

    #[test]
    fn test_checkpoint_save_load_roundtrip() -> AcwiResult<()> {
        let model = tiny_model()?;
        let dir = tempfile::tempdir().unwrap();

        save_checkpoint(&model, dir.path(), Some("unit-test"))?;
        assert!(dir.path().join("model.safetensors").exists());
        assert!(dir.path().join("meta.json").exists());

        let (loaded, meta) = load_checkpoint(dir.path(), &Device::Cpu)?;
        assert_eq!(meta.config, AcwiConfig::tiny_test());
        assert_eq!(meta.source.as_deref(), Some("unit-test"));
        assert_eq!(meta.num_params, model.num_params());

        for name in ["pos_embed", "blocks_acwi.1.filter.w21", "head.weight"] {
            let a = snapshot(&model, name);
            let b = snapshot(&loaded, name);
            let diff = (a - b)?.abs()?.max_all()?.to_scalar::<f32>()?;
            assert_eq!(diff, 0.0, "{} differs after reload", name);
        }
        Ok(())
    }

    #[test]
    fn test_load_checkpoint_missing_dir() {
        let err = load_checkpoint(Path::new("/nonexistent/acwi"), &Device::Cpu).err().unwrap();
        assert_eq!(err.path(), Some("/nonexistent/acwi/meta.json"));
    }

    #[test]
    fn test_interpolation_matrix_identity_and_rows() {
        let same = interpolation_matrix(4, 4);
        for i in 0..4 {
            for j in 0..4 {
                assert_eq!(same[i * 4 + j], if i == j { 1.0 } else { 0.0 });
            }
        }
        let up = interpolation_matrix(4, 2);
        // align_corners=False: rows 0.75/0.25 inside, clamped at the ends.
        assert_eq!(&up[0..2], &[1.0, 0.0]);
        assert_eq!(&up[2..4], &[0.75, 0.25]);
        assert_eq!(&up[4..6], &[0.25, 0.75]);
        assert_eq!(&up[6..8], &[0.0, 1.0]);
        for row in interpolation_matrix(5, 3).chunks(3) {
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_resize_pos_embed_keeps_prefix() -> candle_core::Result<()> {
        let device = Device::Cpu;
        let posemb = Tensor::randn(0f32, 1.0, (1, 1 + 4, 3), &device)?;
        let resized = resize_pos_embed(&posemb, (4, 4), 1)?;
        assert_eq!(resized.dims(), &[1, 17, 3]);
        let diff = (resized.narrow(1, 0, 1)? - posemb.narrow(1, 0, 1)?)?.abs()?.max_all()?.to_scalar::<f32>()?;
        assert_eq!(diff, 0.0);

        // A constant grid stays constant.
        let flat = Tensor::ones((1, 9, 2), DType::F32, &device)?;
        let up = resize_pos_embed(&flat, (5, 5), 0)?;
        let err = (up - 1.0)?.abs()?.max_all()?.to_scalar::<f32>()?;
        assert!(err < 1e-6);

        assert!(resize_pos_embed(&Tensor::zeros((1, 7, 2), DType::F32, &device)?, (2, 2), 1).is_err());
        Ok(())
    }

    #[test]
    fn test_resize_pos_embed_orientation() -> candle_core::Result<()> {
        // Grid value = row index; resizing width only must keep rows intact.
        let device = Device::Cpu;
        let rows: Vec<f32> = (0..2).flat_map(|r| [r as f32; 2]).collect();
        let posemb = Tensor::from_vec(rows, (1, 4, 1), &device)?;
        let resized = resize_pos_embed(&posemb, (2, 3), 0)?.reshape((2, 3))?.to_vec2::<f32>()?;
        assert_eq!(resized, vec![vec![0.0; 3], vec![1.0; 3]]);
        Ok(())
    }

    #[test]
    fn test_adapt_input_conv() -> AcwiResult<()> {
        let device = Device::Cpu;
        let w = Tensor::ones((2, 3, 4, 4), DType::F32, &device)?;
        let gray = adapt_input_conv(1, &w)?;
        assert_eq!(gray.dims(), &[2, 1, 4, 4]);
        assert_eq!(gray.flatten_all()?.to_vec1::<f32>()?[0], 3.0);

        let four = adapt_input_conv(4, &w)?;
        assert_eq!(four.dims(), &[2, 4, 4, 4]);
        assert!((four.flatten_all()?.to_vec1::<f32>()?[0] - 0.75).abs() < 1e-6);

        let odd = Tensor::ones((2, 5, 4, 4), DType::F32, &device)?;
        assert!(matches!(adapt_input_conv(4, &odd), Err(AcwiError::NotImplemented(_))));
        Ok(())
    }

    #[test]
    fn test_n2p_layouts() -> candle_core::Result<()> {
        let device = Device::Cpu;
        // Flax conv kernel (kh, kw, in, out) -> (out, in, kh, kw)
        let k = Tensor::zeros((16, 16, 3, 8), DType::F32, &device)?;
        assert_eq!(n2p(&k, true)?.dims(), &[8, 3, 16, 16]);
        let dense = Tensor::zeros((4, 6), DType::F32, &device)?;
        assert_eq!(n2p(&dense, true)?.dims(), &[6, 4]);
        let scale = Tensor::zeros((1, 1, 1, 5), DType::F32, &device)?;
        assert_eq!(n2p(&scale, true)?.dims(), &[5]);
        assert_eq!(n2p(&dense, false)?.dims(), &[4, 6]);
        Ok(())
    }

    #[test]
    fn test_filter_reshapes_linear_patch_weight() -> AcwiResult<()> {
        let model = tiny_model()?;
        let device = Device::Cpu;
        let flat = Tensor::randn(0f32, 1.0, (32, 3 * 8 * 8), &device)?;
        let mut state = HashMap::new();
        state.insert("patch_embed.proj.weight".to_string(), flat.clone());
        let filtered = checkpoint_filter(state, &model)?;
        let w = &filtered["patch_embed_bone.proj.weight"];
        assert_eq!(w.dims(), &[32, 3, 8, 8]);
        let diff = (w.flatten_all()? - flat.flatten_all()?)?.abs()?.max_all()?.to_scalar::<f32>()?;
        assert_eq!(diff, 0.0);
        Ok(())
    }

    #[test]
    fn test_shape_mismatch_writes_nothing() -> AcwiResult<()> {
        let model = tiny_model()?;
        let device = Device::Cpu;
        let before = snapshot(&model, "cls_token");
        let mut state = HashMap::new();
        state.insert("cls_token".to_string(), Tensor::ones((1, 1, 32), DType::F32, &device)?);
        state.insert("head.bias".to_string(), Tensor::ones(9, DType::F32, &device)?);

        let err = load_state_dict(&model, state, false, Path::new("mem")).err().unwrap();
        assert!(matches!(err, AcwiError::ShapeMismatch { ref name, .. } if name == "head.bias"));
        let after = snapshot(&model, "cls_token");
        let diff = (before - after)?.abs()?.max_all()?.to_scalar::<f32>()?;
        assert_eq!(diff, 0.0);
        Ok(())
    }

    #[test]
    fn test_strict_load_reports_missing() -> AcwiResult<()> {
        let model = tiny_model()?;
        let device = Device::Cpu;
        let mut state = HashMap::new();
        state.insert("cls_token".to_string(), Tensor::ones((1, 1, 32), DType::F32, &device)?);
        state.insert("dist_token".to_string(), Tensor::ones((1, 1, 32), DType::F32, &device)?);

        assert!(load_state_dict(&model, state.clone(), true, Path::new("mem"))
            .err()
            .unwrap()
            .is_incompatible_checkpoint());

        let report = load_state_dict(&model, state, false, Path::new("mem"))?;
        assert_eq!(report.loaded, vec!["cls_token".to_string()]);
        assert_eq!(report.skipped, vec!["dist_token".to_string()]);
        assert!(report.missing.contains(&"pos_embed".to_string()));
        Ok(())
    }

    #[test]
    fn test_default_output_dir() {
        assert_eq!(
            default_output_dir(Path::new("/w/deit_tiny.pth")),
            PathBuf::from("/w/deit_tiny-acwi")
        );
    }
}
