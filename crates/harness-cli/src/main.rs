//! # harness-cli
//!
//! Binary entry point for Captain Harness.
//!
//! This crate provides:
//! - CLI argument parsing using `clap`
//! - Configuration loading and path resolution
//! - `captain-harness run` to execute the scenario registry against the subject
//! - `captain-harness matrix` and `captain-harness list` for inspection

mod report;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use harness_adapters::{SubjectBinary, SubprocessRunner};
use harness_core::{
    EnvironmentMatrixGenerator, FixtureIsolationManager, HarnessConfig, MatrixActivation,
    MatrixLabel, ScenarioDefinition, ScenarioOrchestrator, ScenarioRegistry,
};
use harness_proto::CapturedOutput;
use report::{ScenarioRecord, Status, Summary};
use serde::Serialize;
use std::io::{IsTerminal, stdout};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Color output mode for terminal display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorMode {
    /// Automatically detect if stdout is a TTY
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl ColorMode {
    /// Returns true if colors should be used based on mode and terminal detection.
    fn should_use_colors(self) -> bool {
        match self {
            ColorMode::Always => true,
            ColorMode::Never => false,
            ColorMode::Auto => stdout().is_terminal(),
        }
    }
}

/// Output format for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format for programmatic access
    Json,
}

/// ANSI color codes for terminal output.
mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const RED: &str = "\x1b[31m";
    pub const CYAN: &str = "\x1b[36m";
}

/// Captain Harness - black-box verification of the captain CLI
#[derive(Parser, Debug)]
#[command(name = "captain-harness", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    // ─────────────────────────────────────────────────────────────────────────
    // Global options (available for all subcommands)
    // ─────────────────────────────────────────────────────────────────────────

    /// Path to configuration file
    #[arg(short, long, default_value = "harness.yml", global = true)]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Color output mode (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorMode::Auto, global = true)]
    color: ColorMode,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run scenarios against the subject binary
    Run(RunArgs),

    /// Show which environment matrix entries are active
    Matrix(MatrixArgs),

    /// List registered scenarios
    List(ListArgs),
}

/// Arguments for the run subcommand.
#[derive(Parser, Debug)]
struct RunArgs {
    /// Scenario directory (overrides `scenarios_dir`)
    #[arg(long)]
    scenarios: Option<PathBuf>,

    /// Only run scenarios whose name contains this text
    #[arg(long)]
    filter: Option<String>,

    /// Maximum scenarios running at once (overrides `concurrency`)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
}

/// Arguments for the matrix subcommand.
#[derive(Parser, Debug)]
struct MatrixArgs {
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
}

/// Arguments for the list subcommand.
#[derive(Parser, Debug)]
struct ListArgs {
    /// Scenario directory (overrides `scenarios_dir`)
    #[arg(long)]
    scenarios: Option<PathBuf>,

    /// Only list scenarios whose name contains this text
    #[arg(long)]
    filter: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so JSON reports on stdout stay parseable
    let default_filter = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Run(args) => {
            let success = run_command(config, cli.color, args).await?;
            if !success {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Matrix(args) => matrix_command(&config, cli.color, &args),
        Commands::List(args) => list_command(&config, cli.color, &args),
    }
}

/// Loads the config file (defaults when absent), then applies env overrides.
fn load_config(path: &Path) -> Result<HarnessConfig> {
    let mut config = if path.exists() {
        HarnessConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?
    } else {
        warn!("Config file {:?} not found, using defaults", path);
        HarnessConfig::default()
    };

    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}

/// Paths the run needs, anchored at the subject's working directory.
#[derive(Debug)]
struct Layout {
    working_dir: PathBuf,
    staging_dir: PathBuf,
    scenarios_dir: PathBuf,
}

impl Layout {
    fn resolve(config: &HarnessConfig, scenarios: Option<&Path>) -> Result<Self> {
        let working_dir = config.subject.working_dir.canonicalize().with_context(|| {
            format!("Working directory {:?} is not accessible", config.subject.working_dir)
        })?;
        // Fixture paths are handed to the subject, which runs from working_dir
        let staging_dir = working_dir.join(&config.fixtures.staging_dir);
        let scenarios_dir =
            scenarios.map_or_else(|| working_dir.join(&config.scenarios_dir), Path::to_path_buf);
        Ok(Self {
            working_dir,
            staging_dir,
            scenarios_dir,
        })
    }

    fn load_registry(&self) -> Result<ScenarioRegistry> {
        ScenarioRegistry::load_dir(&self.scenarios_dir).with_context(|| {
            format!("Failed to load scenarios from {:?}", self.scenarios_dir)
        })
    }
}

fn select<'a>(
    registry: &'a ScenarioRegistry,
    filter: Option<&'a str>,
) -> Vec<&'a ScenarioDefinition> {
    match filter {
        Some(needle) => registry.matching(needle).collect(),
        None => registry.scenarios().iter().collect(),
    }
}

#[derive(Serialize)]
struct RunReport<'a> {
    started_at: String,
    finished_at: String,
    duration_ms: u128,
    summary: Summary,
    scenarios: &'a [ScenarioRecord],
}

async fn run_command(config: HarnessConfig, color_mode: ColorMode, args: RunArgs) -> Result<bool> {
    let use_colors = color_mode.should_use_colors();
    let layout = Layout::resolve(&config, args.scenarios.as_deref())?;
    let registry = layout.load_registry()?;
    let selected = select(&registry, args.filter.as_deref());
    if selected.is_empty() {
        warn!("No scenarios matched");
        return Ok(true);
    }

    let subject = SubjectBinary::resolve(&layout.working_dir, &config.subject.binary);
    subject.ensure_present()?;
    debug!(binary = %subject.path().display(), "Using subject binary");

    let runner = SubprocessRunner::new(subject).with_working_dir(&layout.working_dir);
    let orchestrator = ScenarioOrchestrator::new(
        runner,
        FixtureIsolationManager::new(&layout.staging_dir),
        EnvironmentMatrixGenerator::from_process(config.matrix.clone()),
        config.credentials.clone(),
    )
    .with_fixture_root(&layout.working_dir);

    let concurrency = args.concurrency.unwrap_or(config.concurrency);
    info!(scenarios = selected.len(), concurrency, "Running scenarios");

    let started_at = Utc::now();
    let clock = Instant::now();
    let reports = orchestrator.run_all(selected, concurrency).await;
    let records: Vec<ScenarioRecord> = reports.iter().map(ScenarioRecord::from_report).collect();
    let summary = Summary::tally(&records);

    match args.format {
        OutputFormat::Json => {
            let report = RunReport {
                started_at: started_at.to_rfc3339(),
                finished_at: Utc::now().to_rfc3339(),
                duration_ms: clock.elapsed().as_millis(),
                summary,
                scenarios: &records,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Table => print_run_table(&records, summary, use_colors),
    }

    Ok(summary.success())
}

fn status_color(status: Status) -> &'static str {
    match status {
        Status::Passed => colors::GREEN,
        Status::Failed | Status::Error => colors::RED,
        Status::Skipped => colors::YELLOW,
    }
}

fn print_run_table(records: &[ScenarioRecord], summary: Summary, use_colors: bool) {
    use colors::{BOLD, DIM, RESET};

    for record in records {
        let status = record.status.as_str();
        if use_colors {
            let color = status_color(record.status);
            println!("{color}{status:<8}{RESET} {BOLD}{}{RESET}", record.scenario);
        } else {
            println!("{status:<8} {}", record.scenario);
        }

        if let Some(reason) = &record.skip_reason {
            print_detail(&format!("skipped: {reason}"), use_colors);
        }
        if let Some(error) = &record.error {
            print_detail(&format!("setup: {error}"), use_colors);
        }
        for entry in &record.entries {
            if entry.passed() && entry.known_limitations.is_empty() {
                continue;
            }
            if let Some(error) = &entry.error {
                print_detail(&format!("[{}] {error}", entry.label), use_colors);
            }
            if let Some(partial) = entry.partial_output.as_ref().filter(|p| !p.is_empty()) {
                print_partial_output(entry.label, partial, use_colors);
            }
            for mismatch in &entry.mismatches {
                print_detail(&format!("[{}] {mismatch}", entry.label), use_colors);
            }
            for gap in &entry.known_limitations {
                print_detail(&format!("[{}] known limitation: {gap}", entry.label), use_colors);
            }
        }
    }

    let line = format!(
        "{} passed, {} failed, {} skipped, {} errors",
        summary.passed, summary.failed, summary.skipped, summary.errors
    );
    if use_colors {
        let color = if summary.success() { colors::GREEN } else { colors::RED };
        println!("\n{DIM}──{RESET} {color}{line}{RESET}");
    } else {
        println!("\n-- {line}");
    }
}

/// Lines of partial output shown per stream in the table.
const PARTIAL_TAIL_LINES: usize = 5;

fn print_partial_output(label: MatrixLabel, partial: &CapturedOutput, use_colors: bool) {
    let streams = [
        ("stdout", partial.stdout.as_slice()),
        ("stderr", partial.stderr.as_slice()),
        ("combined", partial.combined.as_deref().unwrap_or_default()),
    ];
    for (name, bytes) in streams {
        let text = String::from_utf8_lossy(bytes);
        let lines: Vec<&str> = text.lines().collect();
        if lines.is_empty() {
            continue;
        }
        print_detail(&format!("[{label}] partial {name}:"), use_colors);
        for line in &lines[lines.len().saturating_sub(PARTIAL_TAIL_LINES)..] {
            print_detail(&format!("  {line}"), use_colors);
        }
    }
}

fn print_detail(text: &str, use_colors: bool) {
    if use_colors {
        println!("         {}{text}{}", colors::DIM, colors::RESET);
    } else {
        println!("         {text}");
    }
}

#[derive(Serialize)]
struct MatrixView {
    ci: bool,
    only_inherited: bool,
    skip_inherited: bool,
    entries: Vec<MatrixEntryView>,
}

/// Names only: inherited values may hold credentials.
#[derive(Serialize)]
struct MatrixEntryView {
    label: String,
    variables: Vec<String>,
}

fn matrix_view(generator: &EnvironmentMatrixGenerator, activation: MatrixActivation) -> MatrixView {
    MatrixView {
        ci: activation.ci,
        only_inherited: activation.only_inherited,
        skip_inherited: activation.skip_inherited,
        entries: generator
            .matrix(activation)
            .into_iter()
            .map(|entry| MatrixEntryView {
                label: entry.label.to_string(),
                variables: entry.env.names().map(str::to_string).collect(),
            })
            .collect(),
    }
}

fn matrix_command(config: &HarnessConfig, color_mode: ColorMode, args: &MatrixArgs) -> Result<()> {
    let use_colors = color_mode.should_use_colors();
    let generator = EnvironmentMatrixGenerator::from_process(config.matrix.clone());
    let view = matrix_view(&generator, generator.activation());

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&view)?),
        OutputFormat::Table => {
            println!(
                "ci={} only_inherited={} skip_inherited={}",
                view.ci, view.only_inherited, view.skip_inherited
            );
            if view.entries.is_empty() {
                println!("No active matrix entries; scenarios will not invoke the subject.");
            }
            for entry in &view.entries {
                if use_colors {
                    println!(
                        "{}{}{} ({} variables)",
                        colors::CYAN,
                        entry.label,
                        colors::RESET,
                        entry.variables.len()
                    );
                } else {
                    println!("{} ({} variables)", entry.label, entry.variables.len());
                }
                println!("  {}", entry.variables.join(" "));
            }
        }
    }
    Ok(())
}

fn list_command(config: &HarnessConfig, color_mode: ColorMode, args: &ListArgs) -> Result<()> {
    let use_colors = color_mode.should_use_colors();
    let layout = Layout::resolve(config, args.scenarios.as_deref())?;
    let registry = layout.load_registry()?;

    for scenario in select(&registry, args.filter.as_deref()) {
        let mode = format!("{:?}", scenario.mode).to_lowercase();
        let description = scenario.description.as_deref().unwrap_or("");
        if use_colors {
            println!(
                "{}{:<40}{} {:<5} {}{}{}",
                colors::BOLD,
                scenario.name,
                colors::RESET,
                mode,
                colors::DIM,
                description,
                colors::RESET
            );
        } else {
            println!("{:<40} {:<5} {}", scenario.name, mode, description);
        }
    }
    Ok(())
}
