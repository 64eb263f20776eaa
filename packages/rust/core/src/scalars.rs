//! Metric scalar export.
//!
//! Every numeric metric of a run becomes one tagged scalar at the run's
//! training step. Tags follow a fixed layout so dashboards can group them:
//!
//! - `<prefix>/<task>/<metric>` for plain tasks
//! - `<prefix>_<suite>/<task>/<metric>` for suite subtasks (`suite:sub`)
//! - `stderr_<prefix>/<task>/<metric>` for standard errors
//! - `<prefix>/<suite>/<metric>` for the mean over a suite's subtasks

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument};

use evalcard_shared::{EvalCardError, Result};

/// File name used while a sink is open.
const OPEN_FILE_NAME: &str = "scalars.jsonl";

/// One exported value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scalar {
    pub tag: String,
    pub value: f64,
    pub step: u64,
}

/// Destination for scalars.
pub trait ScalarSink {
    fn add_scalar(&mut self, tag: &str, value: f64, step: u64) -> Result<()>;
}

/// Writes scalars as JSON Lines.
///
/// Scalars go to `scalars.jsonl` while the sink is open; [`finish`] renames
/// the file with a zero-padded step prefix so files of successive
/// checkpoints sort in step order.
///
/// [`finish`]: JsonlScalarSink::finish
pub struct JsonlScalarSink {
    dir: PathBuf,
    writer: BufWriter<File>,
    written: usize,
}

impl JsonlScalarSink {
    /// Open a sink writing into `dir`, creating it if needed.
    pub fn create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| EvalCardError::io(dir, e))?;
        let path = dir.join(OPEN_FILE_NAME);
        let file = File::create(&path).map_err(|e| EvalCardError::io(&path, e))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            writer: BufWriter::new(file),
            written: 0,
        })
    }

    /// Flush and rename the file to `<step:07>_scalars.jsonl`.
    pub fn finish(mut self, step: u64) -> Result<PathBuf> {
        let open = self.dir.join(OPEN_FILE_NAME);
        self.writer.flush().map_err(|e| EvalCardError::io(&open, e))?;
        drop(self.writer);

        let target = self.dir.join(format!("{step:07}_{OPEN_FILE_NAME}"));
        std::fs::rename(&open, &target).map_err(|e| EvalCardError::io(&target, e))?;
        debug!(path = %target.display(), scalars = self.written, "scalar file finished");
        Ok(target)
    }
}

impl ScalarSink for JsonlScalarSink {
    fn add_scalar(&mut self, tag: &str, value: f64, step: u64) -> Result<()> {
        let scalar = Scalar {
            tag: tag.to_string(),
            value,
            step,
        };
        let line = serde_json::to_string(&scalar)?;
        writeln!(self.writer, "{line}").map_err(|e| EvalCardError::io(&self.dir, e))?;
        self.written += 1;
        Ok(())
    }
}

/// Tagged values for one run's results, suite averages last.
pub fn compute_scalars(results: &Map<String, Value>, prefix: &str) -> Vec<(String, f64)> {
    let mut scalars = Vec::new();
    let mut suite_values: BTreeMap<String, BTreeMap<String, Vec<f64>>> = BTreeMap::new();

    for (name, metrics) in results {
        let Some(metrics) = metrics.as_object() else {
            continue;
        };
        let task = task_name(name);
        let suite = task.split_once(':').map(|(suite, _)| suite);

        for (metric, value) in metrics {
            let Some(value) = value.as_f64() else {
                continue;
            };
            let tag = if metric.contains("stderr") {
                format!("stderr_{prefix}/{task}/{metric}")
            } else if let Some(suite) = suite {
                suite_values
                    .entry(suite.to_string())
                    .or_default()
                    .entry(metric.clone())
                    .or_default()
                    .push(value);
                format!("{prefix}_{suite}/{task}/{metric}")
            } else {
                format!("{prefix}/{task}/{metric}")
            };
            scalars.push((tag, value));
        }
    }

    for (suite, metrics) in suite_values {
        for (metric, values) in metrics {
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            scalars.push((format!("{prefix}/{suite}/{metric}"), mean));
        }
    }

    scalars
}

/// Write every scalar of `results` to `sink` at `step`.
#[instrument(skip_all, fields(prefix = %prefix, step = step))]
pub fn export(
    results: &Map<String, Value>,
    prefix: &str,
    step: u64,
    sink: &mut dyn ScalarSink,
) -> Result<usize> {
    let scalars = compute_scalars(results, prefix);
    for (tag, value) in &scalars {
        sink.add_scalar(tag, *value, step)?;
    }
    info!(count = scalars.len(), "scalars exported");
    Ok(scalars.len())
}

/// `suite|task|shots` → `task`; anything else is used as is.
fn task_name(name: &str) -> &str {
    match name.split('|').collect::<Vec<_>>().as_slice() {
        [_, task, _] => *task,
        _ => name,
    }
}
