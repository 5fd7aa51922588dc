//! Structured logging with tracing.
//!
//! Construction and checkpoint import emit structured events; the binary
//! picks JSON or pretty console output.

use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize structured logging.
///
/// Reads log level from RUST_LOG environment variable (defaults to "info").
/// Outputs JSON-formatted logs.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,acwi_model=info,wave_cwt=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Structured logging initialized");
}

/// Initialize simple console logging (for the CLI and debugging).
pub fn init_console_logging() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,acwi_model=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().pretty())
        .init();
}

/// Summary of a freshly built network.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSummary {
    pub num_params: usize,
    pub attention_blocks: usize,
    pub mixing_blocks: usize,
    pub embed_dim: usize,
    pub num_patches: usize,
    pub hybrid: bool,
}

/// Log model construction.
pub fn log_model_built(summary: &ModelSummary) {
    info!(
        num_params = summary.num_params,
        attention_blocks = summary.attention_blocks,
        mixing_blocks = summary.mixing_blocks,
        embed_dim = summary.embed_dim,
        num_patches = summary.num_patches,
        hybrid = summary.hybrid,
        event = "model_built",
        "ACWI-Former constructed"
    );
}

/// Log a position embedding interpolated to a new grid on import.
pub fn log_pos_embed_resized(from: (usize, usize), to: (usize, usize), prefix_tokens: usize) {
    info!(
        from_grid = format!("{}x{}", from.0, from.1),
        to_grid = format!("{}x{}", to.0, to.1),
        prefix_tokens = prefix_tokens,
        event = "pos_embed_resized",
        "Resized position embedding"
    );
}

/// Log a checkpoint entry that was not loaded.
pub fn log_checkpoint_skip(name: &str, reason: &str) {
    warn!(
        name = name,
        reason = reason,
        event = "checkpoint_skip",
        "Skipping checkpoint entry"
    );
}

/// Log segmented stage execution.
pub fn log_segmented_stage(stage: &str, blocks: usize, segments: usize) {
    debug!(
        stage = stage,
        blocks = blocks,
        segments = segments,
        event = "segmented_forward",
        "Running stage in checkpoint segments"
    );
}
