//! Command-line front end for ACWI-Former models.
//!
//! Provides subcommands:
//! - info: configuration summary and parameter count
//! - forward: run a random batch and report the logits shape
//! - convert: import an external checkpoint into a native checkpoint dir

use std::path::{Path, PathBuf};
use std::time::Instant;

use acwi_model::checkpoint::{default_output_dir, import_weights, load_checkpoint, save_checkpoint};
use acwi_model::logging::init_console_logging;
use acwi_model::{AcwiConfig, AcwiFormer};
use anyhow::Context;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarMap;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;

#[derive(Parser)]
#[command(name = "acwi")]
#[command(about = "Vision transformer with complex-wavelet token mixing", long_about = None)]
#[command(version)]
struct Cli {
    /// Force CPU even when a GPU is available
    #[arg(long, global = true)]
    cpu: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Preset {
    DeitTiny,
    DeitSmall,
    DeitBase,
    HybridBase,
    Test,
}

impl Preset {
    fn config(self) -> AcwiConfig {
        match self {
            Preset::DeitTiny => AcwiConfig::deit_tiny_acwi(),
            Preset::DeitSmall => AcwiConfig::deit_small_acwi(),
            Preset::DeitBase => AcwiConfig::deit_base_acwi(),
            Preset::HybridBase => AcwiConfig::hybrid_base_acwi(),
            Preset::Test => AcwiConfig::tiny_test(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Display configuration and parameter count
    Info {
        /// Built-in configuration
        #[arg(short, long, value_enum, default_value = "deit-tiny")]
        preset: Preset,

        /// JSON config file (overrides --preset)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Run a forward pass on a random batch
    Forward {
        /// Built-in configuration
        #[arg(short, long, value_enum, default_value = "deit-tiny")]
        preset: Preset,

        /// JSON config file (overrides --preset)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Native checkpoint directory (overrides --preset and --config)
        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// Batch size
        #[arg(short, long, default_value = "2")]
        batch: usize,
    },

    /// Import external weights into a native checkpoint directory
    Convert {
        /// Source weights (.npz, .safetensors, .pth)
        #[arg(short, long)]
        input: PathBuf,

        /// Output directory (default: <input stem>-acwi next to the input)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Built-in configuration
        #[arg(short, long, value_enum, default_value = "deit-tiny")]
        preset: Preset,

        /// JSON config file (overrides --preset)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Fail if any model parameter is absent from the source
        #[arg(long)]
        strict: bool,
    },
}

fn main() -> anyhow::Result<()> {
    init_console_logging();
    let cli = Cli::parse();
    let device = resolve_device(cli.cpu)?;

    match cli.command {
        Commands::Info { preset, config } => show_info(&resolve_config(preset, config.as_deref())?, &device)?,

        Commands::Forward {
            preset,
            config,
            checkpoint,
            batch,
        } => run_forward(preset, config.as_deref(), checkpoint.as_deref(), batch, &device)?,

        Commands::Convert {
            input,
            output,
            preset,
            config,
            strict,
        } => {
            let output = output.unwrap_or_else(|| default_output_dir(&input));
            let config = resolve_config(preset, config.as_deref())?;
            convert(&config, &input, &output, strict, &device)?
        }
    }

    Ok(())
}

fn resolve_device(cpu: bool) -> anyhow::Result<Device> {
    if cpu {
        return Ok(Device::Cpu);
    }
    Ok(Device::cuda_if_available(0)?)
}

fn resolve_config(preset: Preset, path: Option<&Path>) -> anyhow::Result<AcwiConfig> {
    match path {
        Some(path) => Ok(AcwiConfig::from_json_file(path)?),
        None => Ok(preset.config()),
    }
}

fn build_model(config: &AcwiConfig, device: &Device) -> anyhow::Result<AcwiFormer> {
    let varmap = VarMap::new();
    let model = AcwiFormer::new(config, &varmap, DType::F32, device).context("building model")?;
    Ok(model)
}

fn show_info(config: &AcwiConfig, device: &Device) -> anyhow::Result<()> {
    let start = Instant::now();
    let model = build_model(config, device)?;
    let (gh, gw) = config.grid_size();

    println!("{}", "Model Information".bold().cyan());
    println!("{}", "─".repeat(50));
    println!("Attention stage:");
    println!("  Embed dim: {}", config.embed_dim);
    println!("  Blocks: {}", config.depth);
    println!("  Heads: {}", config.num_heads);
    println!("  MLP ratio: {:.1}", config.mlp_ratio);
    println!("Mixing stage:");
    println!("  Type: {}", config.mixing_type);
    println!("  Blocks: {}", config.depth_acwi);
    println!("  Channel blocks: {}", config.acwi_blocks);
    println!("  Wavelet levels: {}", config.wavelet_levels);
    println!("  Filters: {} / {}", config.biort, config.qshift);
    println!("  Bias path: {}", config.acwi_bias);
    println!("  Double skip: {}", config.double_skip);
    println!("Input:");
    println!("  Image: {}x{}x{}", config.in_chans, config.img_size, config.img_size);
    println!("  Patch grid: {}x{}", gh, gw);
    if let Some(hybrid) = &config.hybrid {
        println!("  Hybrid stem: layers={:?}, width={}", hybrid.layers, hybrid.width);
    }
    println!("  Classes: {}", config.num_classes);
    println!("{}", "─".repeat(50));
    println!(
        "{} {} parameters (built in {:.2}s)",
        "✓".green(),
        model.num_params(),
        start.elapsed().as_secs_f32()
    );
    Ok(())
}

fn run_forward(
    preset: Preset,
    config: Option<&Path>,
    checkpoint: Option<&Path>,
    batch: usize,
    device: &Device,
) -> anyhow::Result<()> {
    let model = match checkpoint {
        Some(dir) => {
            let (model, meta) = load_checkpoint(dir, device)?;
            if let Some(source) = &meta.source {
                println!("{} {}", "Weights from:".cyan(), source);
            }
            model
        }
        None => build_model(&resolve_config(preset, config)?, device)?,
    };
    let cfg = model.config();
    let x = Tensor::randn(0f32, 1.0, (batch, cfg.in_chans, cfg.img_size, cfg.img_size), device)?;

    let start = Instant::now();
    let logits = model.forward(&x)?;
    let elapsed = start.elapsed();

    println!(
        "{} logits {:?} in {:.1}ms",
        "✓".green(),
        logits.dims(),
        elapsed.as_secs_f64() * 1000.0
    );
    Ok(())
}

fn convert(config: &AcwiConfig, input: &Path, output: &Path, strict: bool, device: &Device) -> anyhow::Result<()> {
    let model = build_model(config, device)?;
    let report = import_weights(&model, input, strict)
        .with_context(|| format!("importing {}", input.display()))?;

    println!("{} loaded {} tensors", "✓".green(), report.loaded.len());
    if !report.missing.is_empty() {
        println!("{} {} left at init:", "!".yellow(), report.missing.len());
        for name in &report.missing {
            println!("    {}", name.dimmed());
        }
    }
    if !report.skipped.is_empty() {
        println!("{} {} source entries skipped", "!".yellow(), report.skipped.len());
    }

    save_checkpoint(&model, output, input.to_str())?;
    println!("{} wrote {}", "✓".green(), output.display());
    Ok(())
}
