//! Dataset card renderer.
//!
//! Produces the `README.md` of a details repository: YAML front matter that
//! lists every config and split for the dataset browser, followed by a short
//! Markdown summary of the run history and the latest aggregated results.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use evalcard_shared::{
    DataConfig, DatasetConfig, EvalCardError, LATEST_SPLIT, RESULTS_CONFIG, Result, RunTimestamp,
};

/// Key of the cross-task average in the latest results section.
pub const ALL_KEY: &str = "all";

/// Leaderboard fields added to cards of the leaderboard org.
#[derive(Debug, Clone)]
pub struct LeaderboardLink {
    pub url: String,
    pub point_of_contact: Option<String>,
}

/// Everything needed to render a card.
#[derive(Debug, Clone)]
pub struct CardInput<'a> {
    /// `org/name` of the details repository.
    pub repo_id: &'a str,
    /// Evaluated model, `owner/name`.
    pub model_name: &'a str,
    /// Reconciled configuration document.
    pub config: &'a DatasetConfig,
    /// Run the latest results file belongs to.
    pub latest_run: Option<&'a RunTimestamp>,
    /// Path of the latest results file inside the repository.
    pub latest_results_file: Option<&'a str>,
    /// `results` section of the latest results file.
    pub latest_results: Option<&'a Value>,
    /// Set only for repositories of the leaderboard org.
    pub leaderboard: Option<LeaderboardLink>,
}

/// Front matter of a rendered card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardMetadata {
    pub pretty_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leaderboard_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point_of_contact: Option<String>,
    pub configs: Vec<DataConfig>,
}

/// Render the full `README.md`.
#[instrument(skip_all, fields(repo_id = %input.repo_id, configs = input.config.len()))]
pub fn render_card(input: &CardInput<'_>) -> Result<String> {
    let metadata = CardMetadata {
        pretty_name: format!("Evaluation run of {}", input.model_name),
        leaderboard_url: input.leaderboard.as_ref().map(|l| l.url.clone()),
        point_of_contact: input
            .leaderboard
            .as_ref()
            .and_then(|l| l.point_of_contact.clone()),
        configs: input.config.to_data_configs(),
    };
    let yaml = serde_yaml::to_string(&metadata)
        .map_err(|e| EvalCardError::Serialization(e.to_string()))?;

    let body = render_body(input, &metadata.pretty_name)?;
    debug!(bytes = yaml.len() + body.len(), "card rendered");

    Ok(format!("---\n{yaml}---\n\n{body}"))
}

/// Parse the front matter of a rendered card.
pub fn read_metadata(card: &str) -> Result<CardMetadata> {
    let rest = card
        .strip_prefix("---\n")
        .ok_or_else(|| EvalCardError::parse("card has no front matter"))?;
    let end = rest
        .find("\n---\n")
        .ok_or_else(|| EvalCardError::parse("card front matter is not terminated"))?;
    serde_yaml::from_str(&rest[..=end]).map_err(|e| EvalCardError::Serialization(e.to_string()))
}

// ---------------------------------------------------------------------------
// Body
// ---------------------------------------------------------------------------

fn render_body(input: &CardInput<'_>, title: &str) -> Result<String> {
    let task_configs = input
        .config
        .configs
        .keys()
        .filter(|name| name.as_str() != RESULTS_CONFIG)
        .count();
    let example_config = input
        .config
        .configs
        .keys()
        .find(|name| name.as_str() != RESULTS_CONFIG)
        .map(String::as_str)
        .unwrap_or(RESULTS_CONFIG);

    let mut md = String::new();
    md.push_str(&format!("# Dataset Card for {title}\n\n"));
    md.push_str(&format!(
        "This dataset was created while evaluating [{model}](https://huggingface.co/{model}).\n\n",
        model = input.model_name
    ));
    md.push_str(&format!(
        "It holds {task_configs} configuration(s), one per evaluated task, built from {} run(s). \
         Each run is a split of every configuration it touched, named after the run timestamp; \
         the `{LATEST_SPLIT}` split always points to the most recent run.\n\n",
        run_count(input.config)
    ));
    md.push_str(&format!(
        "The `{RESULTS_CONFIG}` configuration holds the aggregated results of every run.\n\n"
    ));
    md.push_str("To load the details of the latest run:\n\n");
    md.push_str(&format!(
        "```python\nfrom datasets import load_dataset\ndata = load_dataset(\"{}\", \"{example_config}\", split=\"{LATEST_SPLIT}\")\n```\n\n",
        input.repo_id
    ));

    md.push_str("## Latest results\n\n");
    match (input.latest_run, input.latest_results) {
        (Some(run), Some(results)) => {
            match input.latest_results_file {
                Some(file) => md.push_str(&format!(
                    "These are the latest results from run {} ([{file}]({file})).\n\n",
                    run.iso()
                )),
                None => md.push_str(&format!("These are the latest results from run {}.\n\n", run.iso())),
            }
            let json = serde_json::to_string_pretty(&with_average(results))?;
            md.push_str(&format!("```json\n{json}\n```\n"));
        }
        _ => md.push_str("No aggregated results have been uploaded yet.\n"),
    }

    Ok(md)
}

/// Distinct runs across all configs.
fn run_count(config: &DatasetConfig) -> usize {
    config
        .configs
        .values()
        .flatten()
        .map(|entry| entry.split.as_str())
        .filter(|split| *split != LATEST_SPLIT)
        .collect::<BTreeSet<_>>()
        .len()
}

/// Add an `all` entry averaging every numeric metric across tasks, unless
/// the results already carry one.
fn with_average(results: &Value) -> Value {
    let Value::Object(tasks) = results else {
        return results.clone();
    };
    if tasks.contains_key(ALL_KEY) {
        return results.clone();
    }

    let mut sums: Map<String, Value> = Map::new();
    let mut counts: std::collections::BTreeMap<String, u32> = Default::default();
    for metrics in tasks.values().filter_map(Value::as_object) {
        for (metric, value) in metrics {
            let Some(v) = value.as_f64() else { continue };
            let sum = sums.get(metric).and_then(Value::as_f64).unwrap_or(0.0);
            sums.insert(metric.clone(), Value::from(sum + v));
            *counts.entry(metric.clone()).or_default() += 1;
        }
    }
    let average: Map<String, Value> = sums
        .into_iter()
        .map(|(metric, sum)| {
            let n = f64::from(counts.get(&metric).copied().unwrap_or(1));
            let mean = sum.as_f64().unwrap_or(0.0) / n;
            (metric, Value::from(mean))
        })
        .collect();

    let mut out = tasks.clone();
    out.insert(ALL_KEY.to_string(), Value::Object(average));
    Value::Object(out)
}
