//! Latest-run registry.
//!
//! Built in a full pass over the parsed listing before any config is
//! assembled, so "is this the latest run?" never depends on the order in
//! which files are visited afterwards.

use std::collections::{BTreeMap, HashMap};

use evalcard_shared::{FileKind, RepoFile, RunTimestamp};

/// Maximum run timestamp per task, for result files, and overall.
#[derive(Debug, Clone, Default)]
pub struct TimestampRegistry {
    tasks: HashMap<String, RunTimestamp>,
    results: Option<RunTimestamp>,
}

impl TimestampRegistry {
    /// Record every file of the listing.
    pub fn from_files<'a>(files: impl IntoIterator<Item = &'a RepoFile>) -> Self {
        let mut registry = Self::default();
        for file in files {
            registry.record(file);
        }
        registry
    }

    fn record(&mut self, file: &RepoFile) {
        match &file.kind {
            FileKind::Result => {
                if self.results.as_ref().is_none_or(|max| file.timestamp > *max) {
                    self.results = Some(file.timestamp.clone());
                }
            }
            FileKind::Detail { task_id } => {
                self.tasks
                    .entry(task_id.clone())
                    .and_modify(|max| {
                        if file.timestamp > *max {
                            *max = file.timestamp.clone();
                        }
                    })
                    .or_insert_with(|| file.timestamp.clone());
            }
        }
    }

    /// Latest run of every task, keyed by task id.
    pub fn max_per_task(&self) -> BTreeMap<&str, &RunTimestamp> {
        self.tasks.iter().map(|(k, v)| (k.as_str(), v)).collect()
    }

    /// Latest run of one task.
    pub fn task_max(&self, task_id: &str) -> Option<&RunTimestamp> {
        self.tasks.get(task_id)
    }

    /// Latest run that produced a results file.
    pub fn results_max(&self) -> Option<&RunTimestamp> {
        self.results.as_ref()
    }

    /// Latest run across every task and results file; `None` for an empty listing.
    pub fn global_max(&self) -> Option<&RunTimestamp> {
        self.tasks.values().chain(self.results.iter()).max()
    }

    /// Whether `ts` is the latest run of `task_id`.
    pub fn is_latest(&self, task_id: &str, ts: &RunTimestamp) -> bool {
        self.tasks.get(task_id) == Some(ts)
    }

    /// Whether `ts` is the latest run with a results file.
    pub fn is_latest_result(&self, ts: &RunTimestamp) -> bool {
        self.results.as_ref() == Some(ts)
    }

    /// Whether a file belongs to the latest run of its own timeline.
    pub fn is_latest_file(&self, file: &RepoFile) -> bool {
        match &file.kind {
            FileKind::Result => self.is_latest_result(&file.timestamp),
            FileKind::Detail { task_id } => self.is_latest(task_id, &file.timestamp),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filename::parse;

    fn files(paths: &[&str]) -> Vec<RepoFile> {
        paths.iter().map(|p| parse(p).expect("parse")).collect()
    }

    #[test]
    fn empty_registry_has_no_global_max() {
        let registry = TimestampRegistry::from_files(std::iter::empty());
        assert!(registry.global_max().is_none());
        assert!(registry.max_per_task().is_empty());
    }

    #[test]
    fn tracks_max_per_task() {
        let listing = files(&[
            "details_a|x|0_2024-02-01T00-00-00.parquet",
            "details_a|x|0_2024-01-01T00-00-00.parquet",
            "details_b|y|0_2024-01-15T00-00-00.parquet",
        ]);
        let registry = TimestampRegistry::from_files(&listing);

        assert_eq!(registry.task_max("a|x|0").unwrap().iso(), "2024-02-01T00:00:00");
        assert_eq!(registry.task_max("b|y|0").unwrap().iso(), "2024-01-15T00:00:00");
        assert_eq!(registry.global_max().unwrap().iso(), "2024-02-01T00:00:00");

        assert!(registry.is_latest_file(&listing[0]));
        assert!(!registry.is_latest_file(&listing[1]));
        assert!(registry.is_latest_file(&listing[2]));
    }

    #[test]
    fn results_count_towards_global_max() {
        let listing = files(&[
            "details_a|x|0_2024-01-01T00-00-00.parquet",
            "results_2024-03-01T00-00-00.json",
        ]);
        let registry = TimestampRegistry::from_files(&listing);
        assert_eq!(registry.global_max().unwrap().iso(), "2024-03-01T00:00:00");
        assert!(registry.is_latest_result(&listing[1].timestamp));
        assert!(!registry.is_latest("results", &listing[1].timestamp));
    }

    #[test]
    fn unknown_task_is_never_latest() {
        let listing = files(&["details_a|x|0_2024-01-01T00-00-00.parquet"]);
        let registry = TimestampRegistry::from_files(&listing);
        assert!(!registry.is_latest("zzz", &listing[0].timestamp));
    }
}
