//! # layerdiff CLI - print the changes between directory trees
//!
//! ## Usage
//! ```bash
//! # Every entry of a tree as an addition
//! layerdiff changes ./rootfs
//!
//! # Changes turning one tree into another
//! layerdiff changes --base ./base ./rootfs
//!
//! # Changes recorded in an overlay upper directory
//! layerdiff overlay /var/lib/overlay/lower /var/lib/overlay/upper
//!
//! # JSON lines instead of coloured text
//! layerdiff changes --base ./base ./rootfs --json
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::*;
use humantime::format_duration;
use std::path::{Path, PathBuf};
use std::time::Instant;
use layerdiff::{Change, ChangeKind, ChangeSummary, DiffError, DiffSource, Differ, DifferBuilder, EntryInfo};
use tracing_subscriber::EnvFilter;

/// layerdiff CLI - ordered filesystem changes between directory trees
#[derive(Parser)]
#[command(name = "layerdiff")]
#[command(version)]
#[command(about = "Compute apply-ordered changes between directory trees")]
#[command(long_about = None)]
struct Cli {
    /// Emit one JSON object per change
    #[arg(long, global = true)]
    json: bool,

    /// Skip the summary line
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Entries buffered between each walker and the merge loop
    #[arg(long, global = true, default_value_t = layerdiff::differ::DEFAULT_CHANNEL_CAPACITY)]
    channel_capacity: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Diff a tree against an optional base tree
    Changes {
        /// Base tree; without it every entry is an addition
        #[arg(short, long)]
        base: Option<PathBuf>,

        /// Target tree
        target: PathBuf,
    },

    /// Diff a union filesystem upper directory against its lower directory
    Overlay {
        /// Union filesystem that produced the upper directory
        #[arg(short, long, default_value = "overlay")]
        source: String,

        /// Lower (base) directory
        base: PathBuf,

        /// Upper (diff) directory
        diff: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() || cli.json {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli).await {
        eprintln!("{}: {:#}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

/// Main command runner
async fn run(cli: Cli) -> anyhow::Result<()> {
    let differ = DifferBuilder::new()
        .channel_capacity(cli.channel_capacity)
        .build()?;

    // Ctrl-C cancels the walk
    let token = differ.cancellation_token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    let start = Instant::now();
    let mut printer = Printer::new(cli.json);

    match cli.command {
        Commands::Changes { base, target } => {
            cmd_changes(&differ, base.as_deref(), &target, &mut printer).await?
        }
        Commands::Overlay { source, base, diff } => {
            let source: DiffSource = source.parse()?;
            cmd_overlay(&differ, &base, &diff, source, &mut printer).await?
        }
    }

    if !cli.quiet && !cli.json {
        print_summary(&printer.summary, start.elapsed());
    }
    Ok(())
}

/// Diff two trees, or list one
async fn cmd_changes(
    differ: &Differ,
    base: Option<&Path>,
    target: &Path,
    printer: &mut Printer,
) -> anyhow::Result<()> {
    differ
        .changes(base, target, |kind, path, info, err| printer.print(kind, path, info, err))
        .await
        .with_context(|| format!("diffing {}", target.display()))
}

/// Diff an upper directory against its lower directory
async fn cmd_overlay(
    differ: &Differ,
    base: &Path,
    diff: &Path,
    source: DiffSource,
    printer: &mut Printer,
) -> anyhow::Result<()> {
    differ
        .diff_dir_changes(base, diff, source, |kind, path, info, err| printer.print(kind, path, info, err))
        .await
        .with_context(|| format!("diffing {} against {}", diff.display(), base.display()))
}

/// Writes changes to stdout and keeps count
struct Printer {
    json: bool,
    summary: ChangeSummary,
}

impl Printer {
    fn new(json: bool) -> Self {
        Self {
            json,
            summary: ChangeSummary::default(),
        }
    }

    fn print(
        &mut self,
        kind: ChangeKind,
        path: &Path,
        _info: Option<&EntryInfo>,
        err: Option<DiffError>,
    ) -> layerdiff::Result<()> {
        if let Some(err) = err {
            eprintln!("{} {}: {}", "warning:".yellow().bold(), path.display(), err);
        }
        self.summary.record(kind);

        if self.json {
            let line = serde_json::to_string(&Change::new(kind, path))
                .map_err(DiffError::callback)?;
            println!("{}", line);
            return Ok(());
        }

        let shown = path.display().to_string();
        match kind {
            ChangeKind::Add => println!("{} {}", "A".green().bold(), shown.green()),
            ChangeKind::Modify => println!("{} {}", "M".yellow().bold(), shown.yellow()),
            ChangeKind::Delete => println!("{} {}", "D".red().bold(), shown.red()),
            ChangeKind::Unmodified => println!("{} {}", "U".dimmed(), shown.dimmed()),
        }
        Ok(())
    }
}

fn print_summary(summary: &ChangeSummary, elapsed: std::time::Duration) {
    // Drop sub-millisecond noise from the display
    let elapsed = std::time::Duration::from_millis(elapsed.as_millis() as u64);
    println!(
        "\n{} {} added, {} modified, {} deleted, {} unmodified",
        "Summary:".bold(),
        summary.added.to_string().green(),
        summary.modified.to_string().yellow(),
        summary.deleted.to_string().red(),
        summary.unmodified,
    );
    println!("{}", format!("Total time: {}", format_duration(elapsed)).dimmed());
}
