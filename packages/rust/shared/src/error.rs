//! Error types for evalcard.
//!
//! Library crates use [`EvalCardError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all evalcard operations.
#[derive(Debug, thiserror::Error)]
pub enum EvalCardError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// A repository file name or timestamp could not be parsed.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// A second result file was found while reconciling a single-run repo.
    #[error("config conflict: entry for '{config}' already exists (file {path})")]
    ConfigConflict { config: String, path: String },

    /// Two distinct identifiers map to the same config name.
    #[error("config collision: '{first}' and '{second}' both map to config '{config}'")]
    ConfigCollision {
        config: String,
        first: String,
        second: String,
    },

    /// Dataset hub error (missing repo, bad path, ...).
    #[error("hub error: {0}")]
    Hub(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// JSON/YAML encoding or decoding error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Data validation error (bad run file, empty listing where one is required, ...).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, EvalCardError>;

impl EvalCardError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error only invalidates a single listing entry.
    ///
    /// Parse errors exclude the offending file; everything else aborts
    /// the reconciliation.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Parse { .. })
    }
}

impl From<serde_json::Error> for EvalCardError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = EvalCardError::config("missing results org");
        assert_eq!(err.to_string(), "config error: missing results org");

        let err = EvalCardError::ConfigCollision {
            config: "a_b".into(),
            first: "a|b".into(),
            second: "a:b".into(),
        };
        assert!(err.to_string().contains("'a|b' and 'a:b'"));
    }

    #[test]
    fn only_parse_errors_are_recoverable() {
        assert!(EvalCardError::parse("bad name").is_recoverable());
        assert!(
            !EvalCardError::ConfigConflict {
                config: "results".into(),
                path: "results_x.json".into(),
            }
            .is_recoverable()
        );
    }
}
