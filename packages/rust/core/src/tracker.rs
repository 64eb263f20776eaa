//! Evaluation tracker: saves a finished run locally and publishes it.
//!
//! ```text
//! <output_dir>/
//! ├── results/<model>/results_<ts>.json
//! ├── details/<model>/results_<ts>.json
//! ├── details/<model>/<ts>/details_<task>_<ts>.jsonl
//! └── tb/<run>_<prefix>/<step>_scalars.jsonl
//! ```
//!
//! Results go to `<org>/results` (or `<org>/private-results`), details to
//! `<org>/details_<owner>__<model>` (suffixed `_private` unless public),
//! whose card is rebuilt from the full run history after every push.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use evalcard_card::{CardInput, LeaderboardLink, render_card};
use evalcard_hub::DatasetHub;
use evalcard_metadata::{GroupSpec, ReconcileOptions, Reconciliation, reconcile};
use evalcard_shared::{AppConfig, EvalCardError, Result, RunTimestamp, expand_home};

use crate::run::{EvaluationRun, stringify_row};
use crate::scalars::{self, JsonlScalarSink};

/// Card file name at the root of a details repository.
const CARD_FILE: &str = "README.md";

/// Tracker settings.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Local root for saved runs.
    pub output_dir: PathBuf,
    /// Org receiving pushed repositories.
    pub results_org: String,
    pub public: bool,
    pub push_results: bool,
    pub push_details: bool,
    pub push_scalars: bool,
    pub scalar_prefix: String,
    /// Benchmark families merged in cards (`namespace|task`).
    pub special_groups: Vec<String>,
    pub leaderboard_org: String,
    pub leaderboard_url: String,
    pub point_of_contact: Option<String>,
}

impl From<&AppConfig> for TrackerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            output_dir: expand_home(&config.defaults.output_dir),
            results_org: config.defaults.results_org.clone(),
            public: config.publish.public,
            push_results: config.publish.push_results,
            push_details: config.publish.push_details,
            push_scalars: config.publish.push_scalars,
            scalar_prefix: config.publish.scalar_prefix.clone(),
            special_groups: config.card.special_groups.clone(),
            leaderboard_org: config.card.leaderboard_org.clone(),
            leaderboard_url: config.card.leaderboard_url.clone(),
            point_of_contact: config.card.point_of_contact.clone(),
        }
    }
}

/// What [`EvaluationTracker::save`] produced.
#[derive(Debug, Clone)]
pub struct SaveOutcome {
    pub timestamp: RunTimestamp,
    /// `results/<model>/results_<ts>.json`.
    pub results_path: PathBuf,
    /// `details/<model>/<ts>/`.
    pub details_dir: PathBuf,
    /// Number of per-task details files written.
    pub detail_files: usize,
    /// Repositories pushed to, in push order.
    pub pushed: Vec<String>,
    /// Finished scalar file, when scalars were exported.
    pub scalars_path: Option<PathBuf>,
    pub elapsed: Duration,
}

/// Progress callback for reporting publish status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after a local file is written.
    fn file_written(&self, path: &Path);
    /// Called after a repository received an upload.
    fn pushed(&self, repo_id: &str);
    /// Called when saving completes.
    fn done(&self, outcome: &SaveOutcome);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn file_written(&self, _path: &Path) {}
    fn pushed(&self, _repo_id: &str) {}
    fn done(&self, _outcome: &SaveOutcome) {}
}

/// Saves and publishes evaluation runs.
#[derive(Debug, Clone)]
pub struct EvaluationTracker {
    config: TrackerConfig,
    special_groups: Vec<GroupSpec>,
}

impl EvaluationTracker {
    /// Validate the config and build a tracker.
    pub fn new(config: TrackerConfig) -> Result<Self> {
        let pushes = config.push_results || config.push_details;
        if pushes && config.results_org.trim().is_empty() {
            return Err(EvalCardError::config(
                "pushing results or details requires a results org",
            ));
        }
        let special_groups = GroupSpec::parse_all(config.special_groups.as_slice())?;
        Ok(Self {
            config,
            special_groups,
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Save a run stamped with the current time.
    pub async fn save<H: DatasetHub>(
        &self,
        run: &EvaluationRun,
        hub: &H,
        progress: &dyn ProgressReporter,
    ) -> Result<SaveOutcome> {
        self.save_at(run, RunTimestamp::now(), hub, progress).await
    }

    /// Save a run under the given timestamp, then push as configured.
    #[instrument(skip_all, fields(model = %run.model_name(), ts = %timestamp))]
    pub async fn save_at<H: DatasetHub>(
        &self,
        run: &EvaluationRun,
        timestamp: RunTimestamp,
        hub: &H,
        progress: &dyn ProgressReporter,
    ) -> Result<SaveOutcome> {
        let start = Instant::now();
        let model_name = run.model_name();
        validate_model_name(model_name)?;
        let ts = timestamp.sanitized();
        let results_name = format!("results_{ts}.json");

        info!(model = model_name, "saving evaluation run");

        // --- Local files ---
        progress.phase("Writing results");
        let sections = Value::Object(run.sections()?);
        let content = serde_json::to_string_pretty(&sections)?;

        let results_path = self
            .config
            .output_dir
            .join("results")
            .join(model_name)
            .join(&results_name);
        write_file(&results_path, content.as_bytes()).await?;
        progress.file_written(&results_path);

        let details_root = self.config.output_dir.join("details").join(model_name);
        let details_results_path = details_root.join(&results_name);
        write_file(&details_results_path, content.as_bytes()).await?;
        progress.file_written(&details_results_path);

        progress.phase("Writing details");
        let details_dir = details_root.join(&ts);
        for (task, rows) in &run.details {
            let path = details_dir.join(format!("details_{task}_{ts}.jsonl"));
            let mut lines = String::new();
            for row in rows {
                lines.push_str(&serde_json::to_string(&stringify_row(row))?);
                lines.push('\n');
            }
            write_file(&path, lines.as_bytes()).await?;
            debug!(%task, rows = rows.len(), "details written");
            progress.file_written(&path);
        }

        // --- Publishing ---
        let mut pushed = Vec::new();
        if self.config.push_results {
            progress.phase("Pushing results");
            let repo_id = self.results_repo_id();
            hub.create_repo(&repo_id, !self.config.public, true).await?;
            hub.upload_file(
                &repo_id,
                &results_path,
                &format!("{model_name}/{results_name}"),
                &format!("Updating model {model_name}"),
            )
            .await?;
            progress.pushed(&repo_id);
            pushed.push(repo_id);
        }

        if self.config.push_details {
            progress.phase("Pushing details");
            let repo_id = self
                .details_to_hub(model_name, &details_results_path, &details_dir, &timestamp, hub)
                .await?;
            progress.pushed(&repo_id);
            pushed.push(repo_id);
        }

        let scalars_path = if self.config.push_scalars {
            progress.phase("Exporting scalars");
            Some(self.export_scalars(run).await?)
        } else {
            None
        };

        let outcome = SaveOutcome {
            timestamp,
            results_path,
            details_dir,
            detail_files: run.details.len(),
            pushed,
            scalars_path,
            elapsed: start.elapsed(),
        };

        info!(
            detail_files = outcome.detail_files,
            pushed = outcome.pushed.len(),
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "evaluation run saved"
        );
        progress.done(&outcome);

        Ok(outcome)
    }

    /// Upload one run's details to the model's details repository and
    /// refresh its card. Returns the repository id.
    #[instrument(skip_all, fields(model = model_name))]
    pub async fn details_to_hub<H: DatasetHub>(
        &self,
        model_name: &str,
        results_file: &Path,
        details_dir: &Path,
        timestamp: &RunTimestamp,
        hub: &H,
    ) -> Result<String> {
        let repo_id = self.details_repo_id(model_name);
        let ts = timestamp.sanitized();

        if !hub.repo_exists(&repo_id).await? {
            hub.create_repo(&repo_id, !self.config.public, true).await?;
        }

        hub.upload_file(
            &repo_id,
            results_file,
            &format!("results_{ts}.json"),
            &format!("Upload results of run {ts}"),
        )
        .await?;
        if tokio::fs::try_exists(details_dir)
            .await
            .map_err(|e| EvalCardError::io(details_dir, e))?
        {
            hub.upload_folder(&repo_id, details_dir, &ts, &format!("Upload details of run {ts}"))
                .await?;
        } else {
            warn!(dir = %details_dir.display(), "run has no details to upload");
        }

        self.recreate_card(&repo_id, hub).await?;
        Ok(repo_id)
    }

    /// Rebuild `README.md` of a details repository from its full file listing.
    #[instrument(skip_all, fields(%repo_id))]
    pub async fn recreate_card<H: DatasetHub>(
        &self,
        repo_id: &str,
        hub: &H,
    ) -> Result<Reconciliation> {
        let listing = hub.list_files(repo_id).await?;
        let options = ReconcileOptions {
            single_result: false,
            special_groups: self.special_groups.clone(),
        };
        let reconciliation = reconcile(&listing, &options)?;

        let latest = match &reconciliation.latest_results_file {
            Some(path) => {
                let content = hub.read_file(repo_id, path).await?;
                Some(serde_json::from_str::<Value>(&content)?)
            }
            None => None,
        };

        let model_name = latest
            .as_ref()
            .and_then(|v| v.pointer("/config_general/model_name"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| model_name_from_repo_id(repo_id));

        let org = repo_id.split('/').next().unwrap_or_default();
        let leaderboard = (org == self.config.leaderboard_org).then(|| LeaderboardLink {
            url: self.config.leaderboard_url.clone(),
            point_of_contact: self.config.point_of_contact.clone(),
        });

        let card = render_card(&CardInput {
            repo_id,
            model_name: &model_name,
            config: &reconciliation.config,
            latest_run: reconciliation.latest_results_run.as_ref(),
            latest_results_file: reconciliation.latest_results_file.as_deref(),
            latest_results: latest.as_ref().and_then(|v| v.get("results")),
            leaderboard,
        })?;

        hub.upload_bytes(repo_id, card.as_bytes(), CARD_FILE, "Update dataset card")
            .await?;
        info!(configs = reconciliation.config.len(), "card updated");

        Ok(reconciliation)
    }

    /// `<org>/results`, or `<org>/private-results` unless public.
    pub fn results_repo_id(&self) -> String {
        if self.config.public {
            format!("{}/results", self.config.results_org)
        } else {
            format!("{}/private-results", self.config.results_org)
        }
    }

    /// `<org>/details_<owner>__<model>`, suffixed `_private` unless public.
    pub fn details_repo_id(&self, model_name: &str) -> String {
        let base = format!(
            "{}/details_{}",
            self.config.results_org,
            model_name.replace('/', "__")
        );
        if self.config.public {
            base
        } else {
            format!("{base}_private")
        }
    }

    /// Write the run's scalars on the blocking pool; the sink uses std I/O.
    async fn export_scalars(&self, run: &EvaluationRun) -> Result<PathBuf> {
        let info = run.run_info.clone().unwrap_or_default();
        let step = info.step.unwrap_or(0);
        let prefix = self.config.scalar_prefix.clone();
        let run_dir = match info.run_name {
            Some(run_name) => format!("{run_name}_{prefix}"),
            None => prefix.clone(),
        };

        let dir = self.config.output_dir.join("tb").join(run_dir);
        let results = run.results.clone();
        let task_dir = dir.clone();
        tokio::task::spawn_blocking(move || {
            let mut sink = JsonlScalarSink::create(&task_dir)?;
            scalars::export(&results, &prefix, step, &mut sink)?;
            sink.finish(step)
        })
        .await
        .map_err(|e| EvalCardError::io(dir, std::io::Error::other(e)))?
    }
}

/// The six aggregate sections with `|` replaced by `:` in every entry key.
pub fn generate_final_dict(run: &EvaluationRun) -> Result<Value> {
    let sections = run
        .sections()?
        .into_iter()
        .map(|(section, value)| {
            let value = match value {
                Value::Object(entries) => Value::Object(
                    entries
                        .into_iter()
                        .map(|(key, v)| (key.replace('|', ":"), v))
                        .collect::<Map<String, Value>>(),
                ),
                other => other,
            };
            (section, value)
        })
        .collect();
    Ok(Value::Object(sections))
}

/// `details_owner__model[_private]` → `owner/model`.
fn model_name_from_repo_id(repo_id: &str) -> String {
    let name = repo_id.rsplit('/').next().unwrap_or(repo_id);
    let name = name.strip_prefix("details_").unwrap_or(name);
    let name = name.strip_suffix("_private").unwrap_or(name);
    name.replace("__", "/")
}

fn validate_model_name(model_name: &str) -> Result<()> {
    let valid = !model_name.is_empty()
        && !model_name.starts_with('/')
        && model_name.split('/').all(|s| !s.is_empty() && s != "." && s != "..");
    if valid {
        Ok(())
    } else {
        Err(EvalCardError::validation(format!(
            "invalid model name '{model_name}'"
        )))
    }
}

async fn write_file(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| EvalCardError::io(parent, e))?;
    }
    tokio::fs::write(path, content)
        .await
        .map_err(|e| EvalCardError::io(path, e))
}
