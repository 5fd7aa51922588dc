//! ACWI-Former: a ViT whose final blocks mix patch tokens in the
//! dual-tree complex wavelet domain.
//!
//! The attention stage is a standard DeiT/ViT trunk. Its patch tokens then
//! pass through [`block::MixingBlock`]s, each of which transforms the token
//! grid with a DTCWT, applies a learned block-diagonal complex linear map to
//! every highpass band, and reconstructs.

pub mod attention;
pub mod backbone;
pub mod block;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod init;
pub mod layers;
pub mod logging;
pub mod mixer;
pub mod model;

pub use checkpoint::{
    import_weights, load_checkpoint, save_checkpoint, CheckpointMeta, LoadReport,
};
pub use config::{
    AcwiConfig, DropPathSchedule, GlobalPool, HybridConfig, MixingType, SecondStageImag, WeightInit,
};
pub use error::{AcwiError, AcwiResult};
pub use mixer::{ComplexBlockLinear, WaveletMixer};
pub use model::{AcwiFormer, ParamGroup, ParamGroups};
