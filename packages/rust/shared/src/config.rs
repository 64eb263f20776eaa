//! Application configuration for evalcard.
//!
//! User config lives at `~/.evalcard/evalcard.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EvalCardError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "evalcard.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".evalcard";

// ---------------------------------------------------------------------------
// Config structs (matching evalcard.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// What gets published after a run.
    #[serde(default)]
    pub publish: PublishConfig,

    /// Dataset card settings.
    #[serde(default)]
    pub card: CardConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Local directory where run files are written.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Root directory of the local dataset hub.
    #[serde(default = "default_hub_root")]
    pub hub_root: String,

    /// Organisation that owns the results, details and scalar repos.
    #[serde(default)]
    pub results_org: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            hub_root: default_hub_root(),
            results_org: String::new(),
        }
    }
}

fn default_output_dir() -> String {
    "./evals".into()
}
fn default_hub_root() -> String {
    "~/.evalcard/hub".into()
}

/// `[publish]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Publish to public repos instead of `private-` / `_private` ones.
    #[serde(default)]
    pub public: bool,

    /// Upload aggregated results to `<org>/results`.
    #[serde(default)]
    pub push_results: bool,

    /// Upload per-task details to `<org>/details_<model>`.
    #[serde(default)]
    pub push_details: bool,

    /// Export metric scalars.
    #[serde(default)]
    pub push_scalars: bool,

    /// Prefix of every exported scalar tag.
    #[serde(default = "default_scalar_prefix")]
    pub scalar_prefix: String,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            public: false,
            push_results: false,
            push_details: false,
            push_scalars: false,
            scalar_prefix: default_scalar_prefix(),
        }
    }
}

fn default_scalar_prefix() -> String {
    "eval".into()
}

/// `[card]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardConfig {
    /// Benchmark families whose subtasks get one merged config (`namespace|task`).
    #[serde(default = "default_special_groups")]
    pub special_groups: Vec<String>,

    /// Org whose repos carry leaderboard links in their cards.
    #[serde(default = "default_leaderboard_org")]
    pub leaderboard_org: String,

    /// Leaderboard page linked from cards of `leaderboard_org` repos.
    #[serde(default = "default_leaderboard_url")]
    pub leaderboard_url: String,

    /// Contact listed in cards of `leaderboard_org` repos.
    #[serde(default)]
    pub point_of_contact: Option<String>,
}

impl Default for CardConfig {
    fn default() -> Self {
        Self {
            special_groups: default_special_groups(),
            leaderboard_org: default_leaderboard_org(),
            leaderboard_url: default_leaderboard_url(),
            point_of_contact: None,
        }
    }
}

fn default_special_groups() -> Vec<String> {
    vec!["lighteval|mmlu".into(), "original|mmlu".into()]
}
fn default_leaderboard_org() -> String {
    "open-llm-leaderboard".into()
}
fn default_leaderboard_url() -> String {
    "https://huggingface.co/spaces/HuggingFaceH4/open_llm_leaderboard".into()
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.evalcard/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| EvalCardError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.evalcard/evalcard.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| EvalCardError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| EvalCardError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| EvalCardError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| EvalCardError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| EvalCardError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("output_dir"));
        assert!(toml_str.contains("lighteval|mmlu"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.publish.scalar_prefix, "eval");
        assert_eq!(parsed.card.special_groups.len(), 2);
        assert!(!parsed.publish.public);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[defaults]
results_org = "my-org"

[publish]
push_details = true

[card]
special_groups = ["custom|bbh"]
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.defaults.results_org, "my-org");
        assert_eq!(config.defaults.output_dir, "./evals");
        assert!(config.publish.push_details);
        assert!(!config.publish.push_results);
        assert_eq!(config.card.special_groups, vec!["custom|bbh".to_string()]);
        assert_eq!(config.card.leaderboard_org, "open-llm-leaderboard");
    }

    #[test]
    fn expand_home_leaves_plain_paths() {
        assert_eq!(expand_home("/tmp/hub"), PathBuf::from("/tmp/hub"));
        assert_eq!(expand_home("relative/hub"), PathBuf::from("relative/hub"));
    }
}
