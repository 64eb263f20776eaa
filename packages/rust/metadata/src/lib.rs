//! Run-history reconciliation for evaluation details repositories.
//!
//! Turns a flat listing of uploaded run files into the dataset configuration
//! browsed on the hub: one config per task, a `results` config, and merged
//! configs for special benchmark families, each with one split per run and a
//! `latest` alias.
//!
//! The pipeline runs in two explicit passes over the parsed listing:
//! 1. [`TimestampRegistry`] records the latest run of every task
//! 2. [`builder::build`] folds the files into configs using the finished registry
//!
//! followed by [`groups::merge`] for the special families.

pub mod builder;
pub mod filename;
pub mod groups;
pub mod registry;

use tracing::{debug, info, instrument, warn};

use evalcard_shared::{DatasetConfig, EvalCardError, FileKind, RepoFile, Result, RunTimestamp};

pub use builder::{BuildOptions, TaskConfigs, slugify};
pub use groups::GroupSpec;
pub use registry::TimestampRegistry;

/// Options for [`reconcile`].
#[derive(Debug, Clone, Default)]
pub struct ReconcileOptions {
    /// The repository is known to hold a single run.
    pub single_result: bool,
    /// Benchmark families that get a merged config.
    pub special_groups: Vec<GroupSpec>,
}

/// A listing entry left out of the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    /// Path as listed.
    pub path: String,
    /// Why it was left out.
    pub reason: String,
}

/// Outcome of a reconciliation.
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    /// The configuration document.
    pub config: DatasetConfig,
    /// Latest run across the whole repository.
    pub latest_run: Option<RunTimestamp>,
    /// Newest run that uploaded a results file. Older than `latest_run`
    /// when the newest run only uploaded details.
    pub latest_results_run: Option<RunTimestamp>,
    /// Results file of `latest_results_run`.
    pub latest_results_file: Option<String>,
    /// Number of results files found.
    pub results_file_count: usize,
    /// Entries that could not be parsed.
    pub skipped: Vec<SkippedFile>,
}

/// Reconcile a repository listing into its dataset configuration.
///
/// Unparsable entries are skipped and reported; conflicts and config name
/// collisions abort the whole reconciliation. An empty listing yields an
/// empty configuration.
#[instrument(skip_all, fields(listing_len = tracing::field::Empty))]
pub fn reconcile<I, S>(listing: I, options: &ReconcileOptions) -> Result<Reconciliation>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut files: Vec<RepoFile> = Vec::new();
    let mut skipped: Vec<SkippedFile> = Vec::new();
    let mut listing_len = 0usize;

    for entry in listing {
        listing_len += 1;
        let path = entry.as_ref();
        match filename::parse(path) {
            Ok(file) => files.push(file),
            Err(e) if e.is_recoverable() => {
                if filename::looks_like_run_file(path) {
                    warn!(path, error = %e, "skipping malformed run file");
                } else {
                    debug!(path, "skipping non-run file");
                }
                skipped.push(SkippedFile {
                    path: path.to_string(),
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        }
    }
    tracing::Span::current().record("listing_len", listing_len);

    // Pass 1: the registry must be complete before any split is assigned.
    let registry = TimestampRegistry::from_files(&files);

    // Pass 2.
    let task_configs = builder::build(
        &files,
        &registry,
        BuildOptions {
            single_result: options.single_result,
        },
    )?;

    let groups = groups::merge(&task_configs, &options.special_groups);

    let mut config = task_configs.config;
    for (group_id, splits) in groups {
        if let Some(task_id) = task_configs.task_ids.get(&group_id) {
            return Err(EvalCardError::ConfigCollision {
                config: group_id.clone(),
                first: task_id.clone(),
                second: format!("special group {group_id}"),
            });
        }
        config.configs.insert(group_id, splits);
    }

    let latest_run = registry.global_max().cloned();
    let latest_results_run = registry.results_max().cloned();
    let latest_results_file = latest_results_run
        .as_ref()
        .and_then(|ts| latest_results_file(&files, ts));
    let results_file_count = files
        .iter()
        .filter(|f| f.kind == FileKind::Result)
        .count();

    info!(
        configs = config.len(),
        parsed = files.len(),
        skipped = skipped.len(),
        latest_run = latest_run.as_ref().map(RunTimestamp::iso),
        "reconciliation complete"
    );

    Ok(Reconciliation {
        config,
        latest_run,
        latest_results_run,
        latest_results_file,
        results_file_count,
        skipped,
    })
}

/// Pick the results file of run `ts`, preferring JSON over other encodings.
fn latest_results_file(files: &[RepoFile], ts: &RunTimestamp) -> Option<String> {
    let mut candidates: Vec<&str> = files
        .iter()
        .filter(|f| f.kind == FileKind::Result && f.timestamp == *ts)
        .map(|f| f.path.as_str())
        .collect();
    candidates.sort_by_key(|p| (!p.ends_with(".json"), *p));
    candidates.first().map(|p| p.to_string())
}
