//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use kubedocs_core::pipeline::{self, ProgressReporter};
use kubedocs_shared::{
    AppConfig, RunReport, SourceOutcome, init_config, load_config, load_config_from,
};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// kubedocs: Kubernetes documentation to Markdown.
#[derive(Parser)]
#[command(
    name = "kubedocs",
    version,
    about = "Scrape the Kubernetes documentation into topic-grouped Markdown files.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.kubedocs/kubedocs.toml, then built-in defaults).
    #[arg(long, global = true, env = "KUBEDOCS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the full scrape (the default when no command is given).
    Run {
        /// Output directory, overriding `[output].dir`.
        #[arg(short, long)]
        out: Option<String>,
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

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "kubedocs=info",
        1 => "kubedocs=debug",
        _ => "kubedocs=trace",
    };

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
    let config_path = cli.config.as_deref();
    match cli.command {
        None => cmd_run(config_path, None).await,
        Some(Command::Run { out }) => cmd_run(config_path, out).await,
        Some(Command::Config { action }) => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

/// Resolve configuration: explicit path, then the user config file, then defaults.
fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    };
    Ok(config)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(config_path: Option<&Path>, out: Option<String>) -> Result<()> {
    let mut config = resolve_config(config_path)?;
    if let Some(out) = out {
        config.output.dir = out;
    }

    info!(
        sources = config.sources.len(),
        out = %config.output.dir,
        "starting scrape"
    );

    let reporter = CliProgress::new();
    let report = pipeline::run(&config, &reporter).await?;
    reporter.finish();

    print_summary(&report);

    if report.is_failure(config.run.failure_tolerance) {
        let failed_sources = report.failed_sources().count();
        let failed_pages = report.page_failures().count();
        return Err(eyre!(
            "run failed: {failed_sources} source(s) skipped, {failed_pages} page(s) failed"
        ));
    }

    Ok(())
}

/// Print the per-source tally and every failed link.
fn print_summary(report: &RunReport) {
    println!();
    println!("  Scrape summary");
    for source in &report.sources {
        match &source.source_error {
            Some(reason) => println!("  {:<24} SKIPPED: {reason}", source.source),
            None => println!(
                "  {:<24} {}/{} ok",
                source.source, source.pages_succeeded, source.pages_discovered
            ),
        }
    }

    let failures: Vec<_> = report.page_failures().collect();
    if !failures.is_empty() {
        println!();
        println!("  Failed links ({}):", failures.len());
        for failure in failures {
            println!("  - [{}] {}: {}", failure.kind, failure.url, failure.message);
        }
    }

    println!();
    println!("  Artifacts:");
    for artifact in &report.artifacts {
        println!("  {:<40} {:>10} bytes", artifact.path, artifact.size_bytes);
    }
    println!();
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    config.validate()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter: one bar, reset for each source.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold} [{bar:30}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> ")
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn source_started(&self, source: &str, pages: usize) {
        self.bar.set_prefix(source.to_string());
        self.bar.set_length(pages as u64);
        self.bar.set_position(0);
    }

    fn page_done(&self, url: &str, _ok: bool) {
        self.bar.set_message(url.to_string());
        self.bar.inc(1);
    }

    fn source_finished(&self, outcome: &SourceOutcome) {
        let line = match &outcome.source_error {
            Some(_) => format!("{}: skipped", outcome.source),
            None => format!(
                "{}: {}/{} pages",
                outcome.source, outcome.pages_succeeded, outcome.pages_discovered
            ),
        };
        self.bar.println(line);
    }
}
