//! Config builder: folds parsed run files into dataset configs.
//!
//! One config per task (named after the slugified task id) plus a
//! `results` config. Each run becomes a split; the latest run of each
//! config is additionally exposed as the `latest` split.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use indexmap::{IndexMap, IndexSet};
use regex::Regex;
use tracing::{debug, instrument};

use evalcard_shared::{
    DatasetConfig, EvalCardError, FileKind, LATEST_SPLIT, RESULTS_CONFIG, RepoFile, Result,
    SplitEntry,
};

use crate::registry::TimestampRegistry;

/// Any character that is not allowed in a config name.
static NON_WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\W").expect("non-word regex"));

/// Split name → paths, in insertion order.
pub(crate) type SplitMap = IndexMap<String, IndexSet<String>>;

/// Options controlling how strict the builder is.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    /// The repository is known to hold a single run; a second results file is
    /// a conflict instead of a new split.
    pub single_result: bool,
}

/// Output of [`build`].
#[derive(Debug, Clone, Default)]
pub struct TaskConfigs {
    /// `results` config first, then one config per task.
    pub config: DatasetConfig,
    /// Config name → the task id it was derived from.
    pub task_ids: BTreeMap<String, String>,
}

/// Replace every non-word character with `_`.
pub fn slugify(task_id: &str) -> String {
    NON_WORD_RE.replace_all(task_id, "_").into_owned()
}

/// Build task and results configs from parsed files.
///
/// `registry` must have been built from the same files. Files are folded in
/// a canonical order, so the output does not depend on the input order.
#[instrument(skip_all, fields(file_count = files.len()))]
pub fn build(
    files: &[RepoFile],
    registry: &TimestampRegistry,
    options: BuildOptions,
) -> Result<TaskConfigs> {
    let mut ordered: Vec<&RepoFile> = files.iter().collect();
    ordered.sort_by(|a, b| {
        (a.task_id(), &a.timestamp, &a.path).cmp(&(b.task_id(), &b.timestamp, &b.path))
    });

    let mut configs: IndexMap<String, SplitMap> = IndexMap::new();
    let mut task_ids: BTreeMap<String, String> = BTreeMap::new();

    for file in ordered {
        let (config_name, path) = match &file.kind {
            FileKind::Result => {
                if options.single_result && configs.contains_key(RESULTS_CONFIG) {
                    return Err(EvalCardError::ConfigConflict {
                        config: RESULTS_CONFIG.to_string(),
                        path: file.path.clone(),
                    });
                }
                (RESULTS_CONFIG.to_string(), file.basename().to_string())
            }
            FileKind::Detail { task_id } => {
                let config_name = claim_config_name(&mut task_ids, task_id)?;
                (config_name, format!("**/{}", file.basename()))
            }
        };

        let split = file.timestamp.split_name();
        let latest = registry.is_latest_file(file);
        debug!(config = %config_name, %split, latest, path = %file.path, "adding run file");

        let splits = configs.entry(config_name).or_default();
        extend_split(splits, &split, std::slice::from_ref(&path));
        if latest {
            extend_split(splits, LATEST_SPLIT, std::slice::from_ref(&path));
        }
    }

    let config = DatasetConfig {
        configs: configs
            .into_iter()
            .map(|(name, splits)| (name, into_entries(splits)))
            .collect(),
    };

    debug!(configs = config.len(), "task configs built");

    Ok(TaskConfigs { config, task_ids })
}

/// Map a task id to its config name, refusing names already taken by a
/// different task or reserved for results.
fn claim_config_name(task_ids: &mut BTreeMap<String, String>, task_id: &str) -> Result<String> {
    let config_name = slugify(task_id);

    if config_name == RESULTS_CONFIG {
        return Err(EvalCardError::ConfigCollision {
            config: config_name,
            first: RESULTS_CONFIG.to_string(),
            second: task_id.to_string(),
        });
    }

    match task_ids.get(&config_name) {
        Some(owner) if owner != task_id => Err(EvalCardError::ConfigCollision {
            config: config_name,
            first: owner.clone(),
            second: task_id.to_string(),
        }),
        Some(_) => Ok(config_name),
        None => {
            task_ids.insert(config_name.clone(), task_id.to_string());
            Ok(config_name)
        }
    }
}

/// Append paths to a split, creating it if needed. Never replaces existing
/// paths and never stores the same path twice.
pub(crate) fn extend_split(splits: &mut SplitMap, split: &str, paths: &[String]) {
    let entry = splits.entry(split.to_string()).or_default();
    for path in paths {
        if !entry.contains(path) {
            entry.insert(path.clone());
        }
    }
}

/// Turn a split map into display entries with `latest` last.
pub(crate) fn into_entries(mut splits: SplitMap) -> Vec<SplitEntry> {
    if let Some(latest) = splits.shift_remove(LATEST_SPLIT) {
        splits.insert(LATEST_SPLIT.to_string(), latest);
    }
    splits
        .into_iter()
        .map(|(split, path)| SplitEntry {
            split,
            path: path.into_iter().collect(),
        })
        .collect()
}
