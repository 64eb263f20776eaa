//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use evalcard_core::{
    EvaluationRun, EvaluationTracker, ProgressReporter, SaveOutcome, TrackerConfig,
};
use evalcard_hub::LocalHub;
use evalcard_metadata::{GroupSpec, ReconcileOptions, Reconciliation, reconcile};
use evalcard_shared::{AppConfig, expand_home, init_config, load_config};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::AsyncReadExt;
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// evalcard: publish evaluation runs and keep their dataset cards current.
#[derive(Parser)]
#[command(
    name = "evalcard",
    version,
    about = "Publish evaluation runs and reconcile their run history into dataset configs.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Document format for `reconcile` output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum OutputFormat {
    Yaml,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Rebuild the dataset configuration from a repository file listing.
    Reconcile {
        /// File with one repository path per line (reads stdin when omitted).
        #[arg(long)]
        listing: Option<PathBuf>,

        /// Treat the repository as holding a single run.
        #[arg(long)]
        single_result: bool,

        /// Output format.
        #[arg(long, default_value = "yaml")]
        format: OutputFormat,
    },

    /// Save an evaluation run and publish it as configured.
    Publish {
        /// Run file (JSON) produced by the evaluation pipeline.
        #[arg(long)]
        run: PathBuf,

        /// Publish to public repositories.
        #[arg(long)]
        public: bool,

        /// Push aggregated results.
        #[arg(long)]
        push_results: bool,

        /// Push per-task details and refresh the card.
        #[arg(long)]
        push_details: bool,

        /// Export metric scalars.
        #[arg(long)]
        push_scalars: bool,

        /// Org receiving the repositories (overrides config).
        #[arg(long, env = "EVALCARD_ORG")]
        org: Option<String>,

        /// Local output directory (overrides config).
        #[arg(short, long)]
        out: Option<String>,

        /// Local hub root (overrides config).
        #[arg(long, env = "EVALCARD_HUB")]
        hub: Option<String>,
    },

    /// Rebuild the card of a details repository on the local hub.
    Card {
        /// Repository id, `org/name`.
        #[arg(long)]
        repo: String,

        /// Local hub root (overrides config).
        #[arg(long, env = "EVALCARD_HUB")]
        hub: Option<String>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Workspace crates whose events are shown by default.
const LOG_TARGETS: &[&str] = &[
    "evalcard",
    "evalcard_core",
    "evalcard_metadata",
    "evalcard_hub",
    "evalcard_card",
    "evalcard_shared",
];

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = LOG_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",");

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Reconcile {
            listing,
            single_result,
            format,
        } => cmd_reconcile(listing.as_deref(), single_result, format).await,
        Command::Publish {
            run,
            public,
            push_results,
            push_details,
            push_scalars,
            org,
            out,
            hub,
        } => {
            let overrides = PublishOverrides {
                public,
                push_results,
                push_details,
                push_scalars,
                org,
                out,
                hub,
            };
            cmd_publish(&run, overrides).await
        }
        Command::Card { repo, hub } => cmd_card(&repo, hub.as_deref()).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_reconcile(
    listing: Option<&Path>,
    single_result: bool,
    format: OutputFormat,
) -> Result<()> {
    let config = load_config()?;

    let content = match listing {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("cannot read listing '{}': {e}", path.display()))?,
        None => {
            let mut buf = String::new();
            tokio::io::stdin().read_to_string(&mut buf).await?;
            buf
        }
    };
    let entries = listing_entries(&content);

    let options = ReconcileOptions {
        single_result,
        special_groups: GroupSpec::parse_all(config.card.special_groups.as_slice())?,
    };
    let reconciliation = reconcile(&entries, &options)?;

    println!("{}", render_document(&reconciliation, format)?);
    for skipped in &reconciliation.skipped {
        eprintln!("skipped {}: {}", skipped.path, skipped.reason);
    }
    Ok(())
}

/// Overrides given on the `publish` command line.
struct PublishOverrides {
    public: bool,
    push_results: bool,
    push_details: bool,
    push_scalars: bool,
    org: Option<String>,
    out: Option<String>,
    hub: Option<String>,
}

async fn cmd_publish(run_path: &Path, overrides: PublishOverrides) -> Result<()> {
    let config = load_config()?;
    let tracker_config = publish_config(&config, &overrides);

    let content = tokio::fs::read_to_string(run_path)
        .await
        .map_err(|e| eyre!("cannot read run file '{}': {e}", run_path.display()))?;
    let run: EvaluationRun = serde_json::from_str(&content)
        .map_err(|e| eyre!("invalid run file '{}': {e}", run_path.display()))?;

    let hub = LocalHub::open(hub_root(&config, overrides.hub.as_deref()));
    let tracker = EvaluationTracker::new(tracker_config)?;

    info!(
        model = run.model_name(),
        tasks = run.details.len(),
        hub = %hub.root().display(),
        "publishing evaluation run"
    );

    let reporter = CliProgress::new();
    let outcome = tracker.save(&run, &hub, &reporter).await?;

    println!();
    println!("  Run saved successfully!");
    println!("  Model:    {}", run.model_name());
    println!("  Run:      {}", outcome.timestamp);
    println!("  Results:  {}", outcome.results_path.display());
    println!("  Details:  {} task(s)", outcome.detail_files);
    for repo_id in &outcome.pushed {
        println!("  Pushed:   {repo_id}");
    }
    if let Some(path) = &outcome.scalars_path {
        println!("  Scalars:  {}", path.display());
    }
    println!("  Time:     {:.1}s", outcome.elapsed.as_secs_f64());
    println!();
    Ok(())
}

async fn cmd_card(repo: &str, hub_override: Option<&str>) -> Result<()> {
    let config = load_config()?;
    let mut tracker_config = TrackerConfig::from(&config);
    // Card refresh never pushes run files.
    tracker_config.push_results = false;
    tracker_config.push_details = false;
    tracker_config.push_scalars = false;

    let hub = LocalHub::open(hub_root(&config, hub_override));
    let tracker = EvaluationTracker::new(tracker_config)?;
    let reconciliation = tracker.recreate_card(repo, &hub).await?;

    println!();
    println!("  Card updated for {repo}");
    println!("  Configs:  {}", reconciliation.config.len());
    println!("  Results:  {} file(s)", reconciliation.results_file_count);
    match &reconciliation.latest_run {
        Some(ts) => println!("  Latest:   {ts}"),
        None => println!("  Latest:   (no runs)"),
    }
    if !reconciliation.skipped.is_empty() {
        println!("  Skipped:  {} file(s)", reconciliation.skipped.len());
    }
    println!();
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Non-empty, trimmed lines of a listing.
fn listing_entries(content: &str) -> Vec<&str> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect()
}

/// The configuration document in the dataset-browser layout.
fn render_document(reconciliation: &Reconciliation, format: OutputFormat) -> Result<String> {
    let mut document = serde_json::Map::new();
    document.insert(
        "configs".into(),
        serde_json::to_value(reconciliation.config.to_data_configs())?,
    );
    Ok(match format {
        OutputFormat::Yaml => serde_yaml::to_string(&document)?,
        OutputFormat::Json => serde_json::to_string_pretty(&document)?,
    })
}

/// Tracker config with command-line flags layered over the config file.
fn publish_config(config: &AppConfig, overrides: &PublishOverrides) -> TrackerConfig {
    let mut tracker = TrackerConfig::from(config);
    tracker.public |= overrides.public;
    tracker.push_results |= overrides.push_results;
    tracker.push_details |= overrides.push_details;
    tracker.push_scalars |= overrides.push_scalars;
    if let Some(org) = &overrides.org {
        tracker.results_org = org.clone();
    }
    if let Some(out) = &overrides.out {
        tracker.output_dir = expand_home(out);
    }
    tracker
}

fn hub_root(config: &AppConfig, hub_override: Option<&str>) -> PathBuf {
    expand_home(hub_override.unwrap_or(&config.defaults.hub_root))
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn file_written(&self, path: &Path) {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.spinner.set_message(format!("Wrote {name}"));
    }

    fn pushed(&self, repo_id: &str) {
        self.spinner.println(format!("  pushed to {repo_id}"));
    }

    fn done(&self, _outcome: &SaveOutcome) {
        self.spinner.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overrides() -> PublishOverrides {
        PublishOverrides {
            public: false,
            push_results: false,
            push_details: false,
            push_scalars: false,
            org: None,
            out: None,
            hub: None,
        }
    }

    #[test]
    fn parses_publish_flags() {
        let cli = Cli::try_parse_from([
            "evalcard",
            "-vv",
            "publish",
            "--run",
            "run.json",
            "--push-details",
            "--org",
            "my-org",
        ])
        .expect("parse");
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Publish {
                run,
                push_details,
                push_results,
                org,
                ..
            } => {
                assert_eq!(run, PathBuf::from("run.json"));
                assert!(push_details);
                assert!(!push_results);
                assert_eq!(org.as_deref(), Some("my-org"));
            }
            _ => panic!("expected publish"),
        }
    }

    #[test]
    fn parses_reconcile_format() {
        let cli = Cli::try_parse_from(["evalcard", "reconcile", "--format", "json"]).unwrap();
        match cli.command {
            Command::Reconcile { format, listing, .. } => {
                assert_eq!(format, OutputFormat::Json);
                assert!(listing.is_none());
            }
            _ => panic!("expected reconcile"),
        }
    }

    #[test]
    fn flags_layer_over_config() {
        let mut config = AppConfig::default();
        config.publish.push_results = true;
        config.defaults.results_org = "file-org".into();

        let mut flags = overrides();
        flags.push_details = true;
        flags.org = Some("flag-org".into());
        flags.out = Some("/tmp/evals".into());

        let tracker = publish_config(&config, &flags);
        assert!(tracker.push_results);
        assert!(tracker.push_details);
        assert!(!tracker.public);
        assert_eq!(tracker.results_org, "flag-org");
        assert_eq!(tracker.output_dir, PathBuf::from("/tmp/evals"));
    }

    #[test]
    fn listing_skips_blank_lines() {
        let entries = listing_entries("a.json\n\n  b.parquet  \n");
        assert_eq!(entries, vec!["a.json", "b.parquet"]);
    }

    #[test]
    fn document_formats() {
        let rec = reconcile(
            ["results_2024-01-01T00-00-00.json"],
            &ReconcileOptions::default(),
        )
        .unwrap();

        let yaml = render_document(&rec, OutputFormat::Yaml).unwrap();
        assert!(yaml.starts_with("configs:"));
        assert!(yaml.contains("config_name: results"));

        let json: serde_json::Value =
            serde_json::from_str(&render_document(&rec, OutputFormat::Json).unwrap()).unwrap();
        assert_eq!(json["configs"][0]["data_files"][1]["split"], "latest");
    }
}
