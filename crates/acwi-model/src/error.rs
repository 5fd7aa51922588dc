//! Error types for model construction and checkpoint handling.
//!
//! Tensor-level code returns `candle_core::Result`; anything touching files,
//! configuration or external weight formats returns [`AcwiResult`]. An
//! `AcwiError` raised inside tensor code travels as a wrapped candle error
//! ([`AcwiError::into_candle`]) and is recovered intact by the `From` impl.

use thiserror::Error;

/// Main error type for model-level operations.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum AcwiError {
    /// Errors from the Candle tensor library
    #[error("Candle error: {0}")]
    Candle(String),

    /// Checkpoint save/load/import failures
    #[error("Checkpoint error at '{path}': {message}")]
    Checkpoint { message: String, path: String },

    /// Configuration validation failures
    #[error("Configuration error: {0}")]
    Config(String),

    /// A parameter in an imported checkpoint disagrees with the live model
    #[error("Shape mismatch for '{name}': checkpoint {found:?}, model {expected:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    /// A required parameter is absent from an imported checkpoint
    #[error("Missing parameter '{name}' in '{path}'")]
    MissingParameter { name: String, path: String },

    /// Feature selected by configuration that has no implementation
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// I/O errors with path context
    #[error("IO error at '{path}': {message}")]
    Io { message: String, path: String },

    /// Metadata (de)serialization failures
    #[error("Serialization error: {0}")]
    Serde(String),
}

/// Result type alias for model-level operations
pub type AcwiResult<T> = std::result::Result<T, AcwiError>;

impl AcwiError {
    /// Get the path associated with this error (if any)
    pub fn path(&self) -> Option<&str> {
        match self {
            AcwiError::Checkpoint { path, .. } => Some(path),
            AcwiError::Io { path, .. } => Some(path),
            AcwiError::MissingParameter { path, .. } => Some(path),
            _ => None,
        }
    }

    /// True for errors caused by a checkpoint that does not fit the model.
    pub fn is_incompatible_checkpoint(&self) -> bool {
        matches!(
            self,
            AcwiError::ShapeMismatch { .. } | AcwiError::MissingParameter { .. }
        )
    }

    /// Carry this error through code that returns `candle_core::Result`.
    pub fn into_candle(self) -> candle_core::Error {
        let context = self.to_string();
        candle_core::Error::WrappedContext { wrapped: Box::new(self), context }.bt()
    }
}

/// The `AcwiError` inside a candle error built by [`AcwiError::into_candle`],
/// looking through backtrace and context layers.
fn carried(err: &candle_core::Error) -> Option<&AcwiError> {
    match err {
        candle_core::Error::WrappedContext { wrapped, .. } => (**wrapped).downcast_ref::<AcwiError>(),
        candle_core::Error::WithBacktrace { inner, .. }
        | candle_core::Error::Context { inner, .. }
        | candle_core::Error::WithPath { inner, .. } => carried(inner),
        _ => None,
    }
}

impl From<candle_core::Error> for AcwiError {
    fn from(err: candle_core::Error) -> Self {
        match carried(&err) {
            Some(inner) => inner.clone(),
            None => AcwiError::Candle(err.to_string()),
        }
    }
}

impl From<std::io::Error> for AcwiError {
    fn from(err: std::io::Error) -> Self {
        AcwiError::Io {
            message: err.to_string(),
            path: String::new(),
        }
    }
}

impl From<serde_json::Error> for AcwiError {
    fn from(err: serde_json::Error) -> Self {
        AcwiError::Serde(err.to_string())
    }
}

/// Helper trait for adding path context to IO operations
pub trait IoResultExt<T> {
    fn with_path<P: AsRef<std::path::Path>>(self, path: P) -> AcwiResult<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path<P: AsRef<std::path::Path>>(self, path: P) -> AcwiResult<T> {
        self.map_err(|e| AcwiError::Io {
            message: e.to_string(),
            path: path.as_ref().display().to_string(),
        })
    }
}

/// Helper for creating checkpoint errors
pub fn checkpoint_error<P: AsRef<std::path::Path>>(message: impl Into<String>, path: P) -> AcwiError {
    AcwiError::Checkpoint {
        message: message.into(),
        path: path.as_ref().display().to_string(),
    }
}

/// Helper for creating config errors
pub fn config_error(message: impl Into<String>) -> AcwiError {
    AcwiError::Config(message.into())
}

/// Candle error that converts back to [`AcwiError::NotImplemented`].
pub(crate) fn not_implemented(what: impl std::fmt::Display) -> candle_core::Error {
    AcwiError::NotImplemented(what.to_string()).into_candle()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_extraction() {
        let err = checkpoint_error("failed", "/tmp/checkpoint");
        assert_eq!(err.path(), Some("/tmp/checkpoint"));

        let missing = AcwiError::MissingParameter {
            name: "cls".to_string(),
            path: "/tmp/vit.npz".to_string(),
        };
        assert_eq!(missing.path(), Some("/tmp/vit.npz"));
        assert!(missing.is_incompatible_checkpoint());

        assert_eq!(config_error("bad").path(), None);
    }

    #[test]
    fn test_not_implemented_survives_candle_conversion() {
        let err: AcwiError = not_implemented("mixing type 'gfnet'").into();
        match err {
            AcwiError::NotImplemented(msg) => assert_eq!(msg, "mixing type 'gfnet'"),
            other => panic!("expected NotImplemented, got {:?}", other),
        }
        let plain: AcwiError = candle_core::Error::Msg("boom".to_string()).into();
        assert!(matches!(plain, AcwiError::Candle(_)));
    }

    #[test]
    fn test_message_prefix_is_not_reclassified() {
        let err: AcwiError = candle_core::Error::Msg("not implemented: cuda kernel".to_string()).into();
        match err {
            AcwiError::Candle(msg) => assert!(msg.contains("cuda kernel")),
            other => panic!("expected Candle, got {:?}", other),
        }
    }

    #[test]
    fn test_carried_error_survives_context() {
        let wrapped = config_error("depth must be positive").into_candle().context("building model");
        match AcwiError::from(wrapped) {
            AcwiError::Config(msg) => assert_eq!(msg, "depth must be positive"),
            other => panic!("expected Config, got {:?}", other),
        }
    }

    #[test]
    fn test_shape_mismatch_message() {
        let err = AcwiError::ShapeMismatch {
            name: "pos_embed".to_string(),
            expected: vec![1, 197, 192],
            found: vec![1, 50, 192],
        };
        let msg = err.to_string();
        assert!(msg.contains("pos_embed"));
        assert!(msg.contains("[1, 50, 192]"));
    }

    #[test]
    fn test_io_with_path() {
        let result: std::io::Result<()> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "file not found",
        ));
        match result.with_path("/tmp/missing.json") {
            Err(AcwiError::Io { path, .. }) => assert_eq!(path, "/tmp/missing.json"),
            _ => panic!("Expected IO error with path"),
        }
    }
}
