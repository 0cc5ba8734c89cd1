//! CLI binary for certbatch.
//!
//! A thin shim over the library crate: loads a JSON `GeneratorConfig`,
//! wires a [`LocalBackend`] and the discovered identities into a
//! [`Generator`], and renders run events with indicatif.

use anyhow::{bail, Context, Result};
use certbatch::local::LocalBackend;
use certbatch::observer::RunObserver;
use certbatch::state::{LogEntry, LogLevel, StateSnapshot};
use certbatch::{
    normalize, CleanupRules, Generator, GeneratorConfig, IdentityPool, RunStatus,
};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI observer using indicatif ─────────────────────────────────────────────

/// Renders state snapshots as a progress bar and log entries as lines
/// above it. Without a bar, the tracing subscriber prints the log instead.
struct CliObserver {
    bar: ProgressBar,
}

impl CliObserver {
    fn new(show_bar: bool) -> Arc<Self> {
        let bar = if show_bar {
            ProgressBar::new(0)
        } else {
            ProgressBar::hidden()
        };
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>4}/{len} rows  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Idle");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl RunObserver for CliObserver {
    fn on_log(&self, entry: &LogEntry) {
        if self.bar.is_hidden() {
            return;
        }
        let line = match entry.level {
            LogLevel::Success => format!("  {} {}", green("✓"), entry.message),
            LogLevel::Error => format!("  {} {}", red("✗"), red(&entry.message)),
            LogLevel::Warning => format!("  {} {}", yellow("⚠"), entry.message),
            LogLevel::Info => format!("  {} {}", dim("·"), dim(&entry.message)),
        };
        self.bar.println(line);
    }

    fn on_state(&self, snap: &StateSnapshot) {
        self.bar.set_length(snap.total as u64);
        self.bar.set_position(snap.done() as u64);
        self.bar.set_prefix(status_prefix(snap));
        self.bar
            .set_message(snap.current_label.clone().unwrap_or_default());
    }
}

/// Bar prefix for a snapshot. Between watch batches the bar reads "Watching".
fn status_prefix(snap: &StateSnapshot) -> String {
    match snap.status {
        RunStatus::Running if snap.retry_attempt > 0 => {
            format!("Retry {}/{}", snap.retry_attempt, snap.max_retries)
        }
        RunStatus::Running => "Running".to_string(),
        RunStatus::Paused => "Paused".to_string(),
        RunStatus::Completed | RunStatus::Idle if snap.watching => "Watching".to_string(),
        RunStatus::Completed => "Done".to_string(),
        RunStatus::Idle => "Idle".to_string(),
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Write a starter configuration
  certbatch init-config --template templates/cert.txt --destination out --source sheets/list.json

  # Generate every pending certificate once
  certbatch run

  # Keep polling the sheet for new rows (Ctrl-C to stop)
  certbatch watch

  # Inspect the sheet and the template
  certbatch columns
  certbatch detect-variables --save

  # Try the name cleaner
  certbatch clean-name "د. أحمد محمد" "Mr. John Smith"

LAYOUT:
  All references in the configuration are paths relative to --root.
  Sheets are JSON files {"rows": [["Name", "Link"], ["أحمد", ""]]}.
  Worker identities are credential files named saedny-*.json,
  service-account-*.json or sa-*.json in --credentials.

ENVIRONMENT VARIABLES:
  CERTBATCH_CONFIG        Configuration file (default certbatch.json)
  CERTBATCH_ROOT          Backend root directory
  CERTBATCH_CREDENTIALS   Directory holding identity files
  CERTBATCH_PUBLIC_URL    Prefix of generated links
  RUST_LOG                Overrides the log filter
"#;

/// Generate certificates in bulk from spreadsheet rows.
#[derive(Parser, Debug)]
#[command(
    name = "certbatch",
    version,
    about = "Generate certificates in bulk from spreadsheet rows",
    long_about = "Reads recipients from a sheet, cleans their names, fills a template per row, \
exports and uploads the result and writes the link back. Work is spread across every worker \
identity found, each with its own rate limit; failed rows are retried and watch mode picks up \
new rows as they arrive.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// JSON configuration file.
    #[arg(short, long, global = true, env = "CERTBATCH_CONFIG", default_value = "certbatch.json")]
    config: PathBuf,

    /// Root directory all references resolve against.
    #[arg(long, global = true, env = "CERTBATCH_ROOT", default_value = ".")]
    root: PathBuf,

    /// Directory holding worker identity files.
    #[arg(long, global = true, env = "CERTBATCH_CREDENTIALS", default_value = ".")]
    credentials: PathBuf,

    /// Prefix of the links written back to the sheet.
    #[arg(long, global = true, env = "CERTBATCH_PUBLIC_URL",
          default_value = certbatch::local::DEFAULT_PUBLIC_BASE_URL)]
    public_url: String,

    /// Disable progress bar.
    #[arg(long, global = true, env = "CERTBATCH_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "CERTBATCH_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "CERTBATCH_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate all pending certificates once, retrying failures.
    Run,
    /// Poll the sheet and generate certificates for new rows until Ctrl-C.
    Watch {
        /// Seconds between polls (overrides the configuration).
        #[arg(long, env = "CERTBATCH_WATCH_INTERVAL")]
        interval: Option<u64>,
    },
    /// List the source sheet's column headers.
    Columns,
    /// List the template's placeholders and their bindings.
    DetectVariables {
        /// Write the merged bindings back to the configuration file.
        #[arg(long)]
        save: bool,
    },
    /// Print the cleaned form of each name.
    CleanName {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Write a configuration file with every field at its default.
    InitConfig {
        #[arg(long)]
        template: Option<String>,
        #[arg(long)]
        destination: Option<String>,
        #[arg(long)]
        source: Option<String>,
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs; run events are
    // printed by the observer instead.
    let long_running = matches!(cli.command, Command::Run | Command::Watch { .. });
    let show_progress = long_running && !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match &cli.command {
        Command::CleanName { names } => {
            let rules = load_config(&cli.config)
                .map(|c| c.cleanup)
                .unwrap_or_else(|_| CleanupRules::default());
            for name in names {
                println!("{}", normalize::normalize(name, &rules));
            }
            Ok(())
        }
        Command::InitConfig {
            template,
            destination,
            source,
            force,
        } => init_config(&cli.config, template, destination, source, *force),
        Command::Columns => {
            let generator = open_generator(&cli, false).await?;
            let columns = generator.columns().await.context("Failed to read columns")?;
            for col in columns {
                println!("{:>4}  {}", bold(&col.letter), col.name);
            }
            Ok(())
        }
        Command::DetectVariables { save } => {
            let generator = open_generator(&cli, false).await?;
            let variables = generator
                .detect_variables()
                .await
                .context("Failed to read template")?;
            for var in &variables {
                let binding = match var.column_ref() {
                    Some(col) => format!("column {col}"),
                    None if matches!(
                        var.source,
                        certbatch::config::VariableSource::Literal { .. }
                    ) =>
                    {
                        "literal".to_string()
                    }
                    None => dim("unbound"),
                };
                println!("{:<30}  {}", var.token, binding);
            }
            if *save {
                generator.set_variables(variables)?;
                write_config(&cli.config, &generator.config())?;
            }
            Ok(())
        }
        Command::Run => {
            let generator = open_generator(&cli, show_progress).await?;
            let report = generator.run().await.context("Run failed")?;
            if !cli.quiet {
                let snap = generator.snapshot();
                eprintln!(
                    "{}  {} completed  {} failed  {} passes  {:.0}/min",
                    if report.failed == 0 {
                        green("✔")
                    } else {
                        yellow("⚠")
                    },
                    bold(&report.completed.to_string()),
                    red(&report.failed.to_string()),
                    report.passes,
                    snap.rate_per_minute,
                );
            }
            if report.failed > 0 {
                bail!("{} certificates failed", report.failed);
            }
            Ok(())
        }
        Command::Watch { interval } => {
            let generator = open_generator(&cli, show_progress).await?;
            if let Some(secs) = interval {
                let mut config = GeneratorConfig::clone(&generator.config());
                config.watch_interval_secs = *secs;
                generator.save_config(config).await?;
            }
            let handle = generator.set_watch(true);
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            generator.stop();
            if let Some(handle) = handle {
                let _ = handle.await;
            }
            Ok(())
        }
    }
}

fn load_config(path: &Path) -> Result<GeneratorConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config: GeneratorConfig = serde_json::from_str(&text)
        .with_context(|| format!("Malformed config {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

fn write_config(path: &Path, config: &GeneratorConfig) -> Result<()> {
    let json = serde_json::to_string_pretty(config).context("Failed to serialize config")?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

fn init_config(
    path: &Path,
    template: &Option<String>,
    destination: &Option<String>,
    source: &Option<String>,
    force: bool,
) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let mut builder = GeneratorConfig::builder();
    if let Some(t) = template {
        builder = builder.template(t);
    }
    if let Some(d) = destination {
        builder = builder.destination_folder(d);
    }
    if let Some(s) = source {
        builder = builder.source(s);
    }
    write_config(path, &builder.build()?)?;
    eprintln!("{} wrote {}", green("✔"), bold(&path.display().to_string()));
    Ok(())
}

/// Load config and identities, then resolve the config against the backend.
async fn open_generator(cli: &Cli, show_progress: bool) -> Result<Generator> {
    let config = load_config(&cli.config)?;
    let discovery = IdentityPool::discover(&cli.credentials).with_context(|| {
        format!(
            "No usable identity files in {}",
            cli.credentials.display()
        )
    })?;
    let backend = LocalBackend::with_public_base_url(&cli.root, cli.public_url.clone());
    let observer = CliObserver::new(show_progress);
    let generator = Generator::with_observer(
        config.clone(),
        discovery.pool,
        Arc::new(backend),
        observer,
    );
    for skipped in &discovery.skipped {
        generator.state().warning(skipped.to_string());
    }
    generator
        .save_config(config)
        .await
        .context("Invalid configuration")?;
    Ok(generator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use certbatch::state::{RunState, StateChange};
    use certbatch::NoopObserver;

    #[test]
    fn prefix_reads_watching_between_watch_batches() {
        let state = RunState::new(10, Arc::new(NoopObserver));
        assert_eq!(status_prefix(&state.snapshot()), "Idle");

        state.apply(StateChange::Status(RunStatus::Completed));
        assert_eq!(status_prefix(&state.snapshot()), "Done");

        let snap = state.apply(StateChange::Watching(true));
        assert_eq!(status_prefix(&snap), "Watching");
        let snap = state.apply(StateChange::Status(RunStatus::Idle));
        assert_eq!(status_prefix(&snap), "Watching");

        let snap = state.apply(StateChange::Status(RunStatus::Running));
        assert_eq!(status_prefix(&snap), "Running");
    }
}
