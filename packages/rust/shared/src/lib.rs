//! Shared types, error model, and configuration for evalcard.
//!
//! This crate is the foundation depended on by all other evalcard crates.
//! It provides:
//! - [`EvalCardError`]: the unified error type
//! - Domain types ([`RunTimestamp`], [`RepoFile`], [`SplitEntry`], [`DatasetConfig`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CardConfig, DefaultsConfig, PublishConfig, config_dir, config_file_path,
    expand_home, init_config, load_config, load_config_from,
};
pub use error::{EvalCardError, Result};
pub use types::{
    DataConfig, DatasetConfig, FileKind, LATEST_SPLIT, RESULTS_CONFIG, RepoFile, RunTimestamp,
    SplitEntry,
};
