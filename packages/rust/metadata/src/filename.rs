//! Run file name parser.
//!
//! Two naming conventions are recognised (colons of the ISO timestamp are
//! replaced by `-` so names stay valid on every filesystem):
//! - `results_<timestamp>.<ext>` — aggregated results of one run
//! - `<timestamp>/details_<task_id>_<timestamp>[-NNNNN-of-NNNNN].<ext>` —
//!   per-task predictions, optionally split into shards

use std::sync::LazyLock;

use evalcard_shared::{EvalCardError, FileKind, RepoFile, Result, RunTimestamp};
use regex::Regex;

/// Matches `results_2024-01-01T10-57-04.203304.json`.
static RESULT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^results_(?P<ts>\d{4}-\d{2}-\d{2}T\d{2}-\d{2}-\d{2}(?:\.\d+)?)\.[A-Za-z0-9]+$")
        .expect("result file regex")
});

/// Matches `details_<task_id>_2024-01-01T10-57-04.203304[-00000-of-00002].parquet`.
///
/// The task id is matched lazily so it ends at the first timestamp-looking
/// token; task ids routinely contain `_` themselves.
static DETAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^details_(?P<task>.+?)_(?P<ts>\d{4}-\d{2}-\d{2}T\d{2}-\d{2}-\d{2}(?:\.\d+)?)(?:-\d{5}-of-\d{5})?\.[A-Za-z0-9]+$",
    )
    .expect("detail file regex")
});

/// Parse a repository path into a [`RepoFile`].
///
/// Fails with a parse error when the name follows neither convention or
/// the embedded timestamp is not a valid date-time.
pub fn parse(path: &str) -> Result<RepoFile> {
    let basename = path.rsplit('/').next().unwrap_or(path);

    if let Some(caps) = RESULT_RE.captures(basename) {
        let timestamp = RunTimestamp::from_sanitized(&caps["ts"])?;
        return Ok(RepoFile {
            path: path.to_string(),
            kind: FileKind::Result,
            timestamp,
        });
    }

    if let Some(caps) = DETAIL_RE.captures(basename) {
        let timestamp = RunTimestamp::from_sanitized(&caps["ts"])?;
        return Ok(RepoFile {
            path: path.to_string(),
            kind: FileKind::Detail {
                task_id: caps["task"].to_string(),
            },
            timestamp,
        });
    }

    Err(EvalCardError::parse(format!(
        "'{path}' is neither a results nor a details file"
    )))
}

/// Whether a path is named like a run file, valid or not.
pub(crate) fn looks_like_run_file(path: &str) -> bool {
    let basename = path.rsplit('/').next().unwrap_or(path);
    basename.starts_with("results_") || basename.starts_with("details_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_result_file() {
        let file = parse("results_2024-01-01T00-00-00.000000.json").expect("parse");
        assert_eq!(file.kind, FileKind::Result);
        assert_eq!(file.timestamp.iso(), "2024-01-01T00:00:00.000000");
    }

    #[test]
    fn parses_detail_file_with_structured_task_id() {
        let path = "2023-09-03T10-57-04.203304/details_harness|hendrycksTest-us_foreign_policy|5_2023-09-03T10-57-04.203304.parquet";
        let file = parse(path).expect("parse");
        assert_eq!(
            file.task_id(),
            Some("harness|hendrycksTest-us_foreign_policy|5")
        );
        assert_eq!(file.timestamp.iso(), "2023-09-03T10:57:04.203304");
        assert_eq!(file.path, path);
    }

    #[test]
    fn task_id_keeps_underscores_and_subtasks() {
        let file = parse(
            "2024-02-01T12-00-00.5/details_lighteval|mmlu:us_foreign_policy|5_2024-02-01T12-00-00.5.jsonl",
        )
        .expect("parse");
        assert_eq!(file.task_id(), Some("lighteval|mmlu:us_foreign_policy|5"));

        let file = parse("details_mmlu_us_history_2024-01-15T08-30-00.000000.parquet").expect("parse");
        assert_eq!(file.task_id(), Some("mmlu_us_history"));
    }

    #[test]
    fn parses_sharded_detail_file() {
        let file = parse(
            "2024-01-01T00-00-00/details_lighteval|arc:challenge|25_2024-01-01T00-00-00-00001-of-00002.parquet",
        )
        .expect("parse");
        assert_eq!(file.task_id(), Some("lighteval|arc:challenge|25"));
        assert_eq!(file.timestamp.split_name(), "2024-01-01T00_00_00");
    }

    #[test]
    fn rejects_unrelated_names() {
        for path in ["README.md", ".gitattributes", "results.json", "details_.parquet"] {
            let err = parse(path).unwrap_err();
            assert!(err.is_recoverable(), "{path}");
        }
    }

    #[test]
    fn rejects_invalid_dates() {
        let err = parse("results_2024-02-30T00-00-00.json").unwrap_err();
        assert!(err.to_string().contains("invalid timestamp"));
    }

    #[test]
    fn recognises_run_file_names() {
        assert!(looks_like_run_file("x/details_foo.parquet"));
        assert!(looks_like_run_file("results_oops.json"));
        assert!(!looks_like_run_file("README.md"));
    }
}
