//! Core domain types for evaluation run repositories.

use chrono::{Local, NaiveDateTime, SubsecRound};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{EvalCardError, Result};

/// Split name aliasing the most recent run of a config.
pub const LATEST_SPLIT: &str = "latest";

/// Config name holding the aggregated results files.
pub const RESULTS_CONFIG: &str = "results";

/// Format used when stamping a new run.
const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Format accepted when reading a run timestamp back.
const ISO_PARSE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Byte offsets of the two colons in an ISO-8601 date-time.
const COLON_OFFSETS: [usize; 2] = [13, 16];

// ---------------------------------------------------------------------------
// RunTimestamp
// ---------------------------------------------------------------------------

/// Timestamp identifying one evaluation run.
///
/// Keeps the ISO-8601 text it was built from so that the path-safe form
/// (`2024-01-01T10-57-04.203304`) and the ISO form
/// (`2024-01-01T10:57:04.203304`) convert into each other without loss.
/// Equality is by ISO text; ordering is by date-time value, then text.
#[derive(Debug, Clone)]
pub struct RunTimestamp {
    value: NaiveDateTime,
    iso: String,
}

impl RunTimestamp {
    /// Stamp a new run with the local wall-clock time.
    pub fn now() -> Self {
        let value = Local::now().naive_local().trunc_subsecs(6);
        Self {
            value,
            iso: value.format(ISO_FORMAT).to_string(),
        }
    }

    /// Parse an ISO-8601 date-time (`YYYY-MM-DDTHH:MM:SS[.ffffff]`).
    pub fn from_iso(iso: &str) -> Result<Self> {
        let value = NaiveDateTime::parse_from_str(iso, ISO_PARSE_FORMAT)
            .map_err(|e| EvalCardError::parse(format!("invalid timestamp '{iso}': {e}")))?;
        Ok(Self {
            value,
            iso: iso.to_string(),
        })
    }

    /// Parse the path-safe form, where both time colons were replaced by `-`.
    pub fn from_sanitized(sanitized: &str) -> Result<Self> {
        let bytes = sanitized.as_bytes();
        let well_formed = sanitized.is_ascii()
            && COLON_OFFSETS
                .iter()
                .all(|&i| bytes.get(i).copied() == Some(b'-'));
        if !well_formed {
            return Err(EvalCardError::parse(format!(
                "'{sanitized}' is not a path-safe timestamp"
            )));
        }

        let mut iso = sanitized.to_string();
        for offset in COLON_OFFSETS {
            iso.replace_range(offset..=offset, ":");
        }
        Self::from_iso(&iso)
    }

    /// ISO-8601 text.
    pub fn iso(&self) -> &str {
        &self.iso
    }

    /// Path-safe form used in file and directory names.
    pub fn sanitized(&self) -> String {
        self.iso.replace(':', "-")
    }

    /// Form used as a split name in dataset configs.
    pub fn split_name(&self) -> String {
        self.iso
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl PartialEq for RunTimestamp {
    fn eq(&self, other: &Self) -> bool {
        self.iso == other.iso
    }
}

impl Eq for RunTimestamp {}

impl PartialOrd for RunTimestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RunTimestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.value
            .cmp(&other.value)
            .then_with(|| self.iso.cmp(&other.iso))
    }
}

impl std::hash::Hash for RunTimestamp {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.iso.hash(state);
    }
}

impl std::fmt::Display for RunTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.iso)
    }
}

// ---------------------------------------------------------------------------
// RepoFile
// ---------------------------------------------------------------------------

/// What a repository file holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// Aggregated results of one run.
    Result,
    /// Per-sample predictions of one task in one run.
    Detail {
        /// Full task identifier, e.g. `lighteval|mmlu:us_history|5`.
        task_id: String,
    },
}

/// A file found in a dataset repository, with the run it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoFile {
    /// Path relative to the repository root.
    pub path: String,
    /// Result or detail file.
    pub kind: FileKind,
    /// Run timestamp encoded in the file name.
    pub timestamp: RunTimestamp,
}

impl RepoFile {
    /// Task identifier for detail files.
    pub fn task_id(&self) -> Option<&str> {
        match &self.kind {
            FileKind::Detail { task_id } => Some(task_id),
            FileKind::Result => None,
        }
    }

    /// Last path component.
    pub fn basename(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

// ---------------------------------------------------------------------------
// Dataset configuration
// ---------------------------------------------------------------------------

/// One split of a dataset config: a run (or `latest`) and the files backing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitEntry {
    /// Split name (a run timestamp in split form, or `latest`).
    pub split: String,
    /// Paths or glob patterns, in insertion order, without duplicates.
    pub path: Vec<String>,
}

/// A named config as listed in the dataset card front matter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataConfig {
    /// Config name.
    pub config_name: String,
    /// Splits in display order.
    pub data_files: Vec<SplitEntry>,
}

/// Full configuration document of a details repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetConfig {
    /// Config name → splits, in display order.
    pub configs: IndexMap<String, Vec<SplitEntry>>,
}

impl DatasetConfig {
    /// Number of configs.
    pub fn len(&self) -> usize {
        self.configs.len()
    }

    /// Whether there are no configs.
    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    /// Splits of a config, if present.
    pub fn get(&self, config_name: &str) -> Option<&[SplitEntry]> {
        self.configs.get(config_name).map(Vec::as_slice)
    }

    /// Paths of one split of one config, if present.
    pub fn split_paths(&self, config_name: &str, split: &str) -> Option<&[String]> {
        self.get(config_name)?
            .iter()
            .find(|entry| entry.split == split)
            .map(|entry| entry.path.as_slice())
    }

    /// Configs in the list form used by dataset card front matter.
    pub fn to_data_configs(&self) -> Vec<DataConfig> {
        self.configs
            .iter()
            .map(|(name, splits)| DataConfig {
                config_name: name.clone(),
                data_files: splits.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitized_timestamp_roundtrip() {
        let ts = RunTimestamp::from_sanitized("2023-09-03T10-57-04.203304").expect("parse");
        assert_eq!(ts.iso(), "2023-09-03T10:57:04.203304");
        assert_eq!(ts.sanitized(), "2023-09-03T10-57-04.203304");
        assert_eq!(ts.split_name(), "2023-09-03T10_57_04_203304");
    }

    #[test]
    fn timestamp_without_fraction() {
        let ts = RunTimestamp::from_sanitized("2024-02-01T00-00-00").expect("parse");
        assert_eq!(ts.split_name(), "2024-02-01T00_00_00");
    }

    #[test]
    fn rejects_malformed_timestamps() {
        assert!(RunTimestamp::from_sanitized("2024-01-01").is_err());
        assert!(RunTimestamp::from_sanitized("2024-13-01T00-00-00").is_err());
        assert!(RunTimestamp::from_sanitized("2024-01-01T00:00:00").is_err());
        assert!(RunTimestamp::from_sanitized("2024-01-01T25-00-00.0").is_err());
    }

    #[test]
    fn now_is_path_safe_and_recoverable() {
        let ts = RunTimestamp::now();
        let sanitized = ts.sanitized();
        assert!(!sanitized.contains(':'));
        let back = RunTimestamp::from_sanitized(&sanitized).expect("recover");
        assert_eq!(back, ts);
        assert_eq!(back.iso(), ts.iso());
    }

    #[test]
    fn ordering_uses_value_then_text() {
        let jan = RunTimestamp::from_iso("2024-01-01T00:00:00").unwrap();
        let feb = RunTimestamp::from_iso("2024-02-01T00:00:00.000000").unwrap();
        assert!(jan < feb);

        let same_instant = RunTimestamp::from_iso("2024-01-01T00:00:00.000").unwrap();
        assert_ne!(jan, same_instant);
        assert!(jan < same_instant);
        assert_ne!(jan.split_name(), same_instant.split_name());
        assert_eq!(jan, RunTimestamp::from_sanitized("2024-01-01T00-00-00").unwrap());
    }

    #[test]
    fn repo_file_accessors() {
        let file = RepoFile {
            path: "2024-01-01T00-00-00/details_a|b|0_2024-01-01T00-00-00.jsonl".into(),
            kind: FileKind::Detail {
                task_id: "a|b|0".into(),
            },
            timestamp: RunTimestamp::from_sanitized("2024-01-01T00-00-00").unwrap(),
        };
        assert_eq!(file.task_id(), Some("a|b|0"));
        assert_eq!(file.basename(), "details_a|b|0_2024-01-01T00-00-00.jsonl");
    }

    #[test]
    fn dataset_config_serializes_as_map() {
        let mut config = DatasetConfig::default();
        config.configs.insert(
            RESULTS_CONFIG.into(),
            vec![SplitEntry {
                split: LATEST_SPLIT.into(),
                path: vec!["results_x.json".into()],
            }],
        );
        let json = serde_json::to_value(&config).expect("serialize");
        assert_eq!(json["results"][0]["split"], "latest");
        assert_eq!(
            config.split_paths(RESULTS_CONFIG, LATEST_SPLIT),
            Some(&["results_x.json".to_string()][..])
        );
        assert_eq!(config.to_data_configs()[0].config_name, "results");
    }
}
