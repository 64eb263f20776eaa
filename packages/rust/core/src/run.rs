//! In-memory evaluation run, as produced by an evaluation pipeline.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Column dropped from every detail row before it is written.
const ID_COLUMN: &str = "id";

/// General run settings. Only the model name is interpreted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Evaluated model, `owner/name`.
    pub model_name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Where a run sits in a training job, for scalar export.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunInfo {
    /// Training step of the evaluated checkpoint.
    #[serde(default)]
    pub step: Option<u64>,
    /// Name grouping scalars of one training run.
    #[serde(default)]
    pub run_name: Option<String>,
}

/// A finished evaluation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRun {
    pub config_general: GeneralConfig,
    /// Task id → metric → value.
    #[serde(default)]
    pub results: Map<String, Value>,
    #[serde(default)]
    pub versions: Map<String, Value>,
    #[serde(default)]
    pub config_tasks: Map<String, Value>,
    #[serde(default)]
    pub summary_tasks: Map<String, Value>,
    #[serde(default)]
    pub summary_general: Map<String, Value>,
    /// Task id → prediction rows.
    #[serde(default)]
    pub details: IndexMap<String, Vec<Map<String, Value>>>,
    #[serde(default)]
    pub run_info: Option<RunInfo>,
}

impl EvaluationRun {
    /// Model name as given in the general config.
    pub fn model_name(&self) -> &str {
        &self.config_general.model_name
    }

    /// The six aggregate sections, keyed by section name.
    pub fn sections(&self) -> Result<Map<String, Value>, serde_json::Error> {
        let mut out = Map::new();
        out.insert("config_general".into(), serde_json::to_value(&self.config_general)?);
        out.insert("results".into(), Value::Object(self.results.clone()));
        out.insert("versions".into(), Value::Object(self.versions.clone()));
        out.insert("config_tasks".into(), Value::Object(self.config_tasks.clone()));
        out.insert("summary_tasks".into(), Value::Object(self.summary_tasks.clone()));
        out.insert("summary_general".into(), Value::Object(self.summary_general.clone()));
        Ok(out)
    }
}

/// Flatten a detail row for the details file: drop `id`, render every value
/// as a string, order columns by name.
pub fn stringify_row(row: &Map<String, Value>) -> BTreeMap<String, String> {
    row.iter()
        .filter(|(column, _)| column.as_str() != ID_COLUMN)
        .map(|(column, value)| {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (column.clone(), text)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_minimal_run() {
        let run: EvaluationRun = serde_json::from_value(json!({
            "config_general": {"model_name": "owner/model", "seed": 1234}
        }))
        .expect("parse");
        assert_eq!(run.model_name(), "owner/model");
        assert_eq!(run.config_general.extra["seed"], json!(1234));
        assert!(run.details.is_empty());
        assert!(run.run_info.is_none());
    }

    #[test]
    fn sections_keep_model_name_inline() {
        let run: EvaluationRun = serde_json::from_value(json!({
            "config_general": {"model_name": "m", "seed": 1},
            "results": {"a|b|0": {"acc": 1.0}}
        }))
        .unwrap();
        let sections = run.sections().unwrap();
        assert_eq!(sections.len(), 6);
        assert_eq!(sections["config_general"], json!({"model_name": "m", "seed": 1}));
        assert_eq!(sections["results"]["a|b|0"]["acc"], json!(1.0));
    }

    #[test]
    fn rows_are_stringified_without_id() {
        let row = json!({"id": 7, "prediction": "B", "gold": ["A"], "score": 0.5})
            .as_object()
            .cloned()
            .unwrap();
        let flat = stringify_row(&row);
        let columns: Vec<&str> = flat.keys().map(String::as_str).collect();
        assert_eq!(columns, vec!["gold", "prediction", "score"]);
        assert_eq!(flat["prediction"], "B");
        assert_eq!(flat["gold"], "[\"A\"]");
        assert_eq!(flat["score"], "0.5");
    }
}
