//! Dual-tree complex wavelet transform (DTCWT).
//!
//! `filters` holds the filter banks, `cpu_dtcwt` a loop-based reference over
//! `Vec` planes, and `candle_dtcwt` the differentiable tensor path used by
//! the model.

pub mod cpu_dtcwt;
pub mod filters;

#[cfg(feature = "candle")]
pub mod candle_dtcwt;

pub use filters::{Biort, QShift};

#[cfg(feature = "candle")]
pub use candle_dtcwt::{Decomposition, DtcwtForward, DtcwtInverse};
