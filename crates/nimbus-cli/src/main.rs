//! Nimbus - synchronize trees of files between object stores
//!
//! `nimbus copy|sync|move SRC DST` with dry-run support, filtering,
//! bandwidth shaping and periodic stats. Remote specs are `remote:path`
//! strings; a bare path is the local filesystem.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use nimbus_accounting::{
    format_rate, format_size, spawn_progress_logger, BandwidthLimiter, BwTimetable, SizeUnit,
    SyncStats, TpsLimiter,
};
use nimbus_filter::Filter;
use nimbus_sync::{CompareOptions, DeleteMode, SyncEngine, SyncOptions, SyncSummary};
use nimbus_types::{BufferSize, Error, WorkerCount};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Nimbus - synchronize trees of files between object stores
#[derive(Parser)]
#[command(
    name = "nimbus",
    version = env!("CARGO_PKG_VERSION"),
    about = "Synchronize trees of files between object stores",
    long_about = "Nimbus synchronizes a tree of files between two object stores.\n\
                  copy adds and updates missing entries on the destination,\n\
                  sync makes the destination identical to the source including\n\
                  deletions, and move copies then removes the source."
)]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true, env = "NIMBUS_DEBUG")]
    debug: bool,

    /// Quiet mode, errors only
    #[arg(short, long, global = true, env = "NIMBUS_QUIET")]
    quiet: bool,

    /// Verbose mode
    #[arg(short, long, global = true, env = "NIMBUS_VERBOSE")]
    verbose: bool,

    /// Interval between stats printouts in seconds, 0 disables them
    #[arg(long, global = true, default_value_t = 60, env = "NIMBUS_STATS")]
    stats: u64,

    /// Unit used in stats output
    #[arg(long, global = true, default_value = "bytes", env = "NIMBUS_STATS_UNIT")]
    stats_unit: StatsUnitArg,

    /// Log level for the periodic stats summary
    #[arg(long, global = true, default_value = "info", env = "NIMBUS_STATS_LOG_LEVEL")]
    stats_log_level: String,

    /// Print the final summary as JSON
    #[arg(long, global = true, env = "NIMBUS_JSON")]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::ValueEnum, Clone, Copy)]
enum StatsUnitArg {
    Bytes,
    Bits,
}

impl From<StatsUnitArg> for SizeUnit {
    fn from(unit: StatsUnitArg) -> Self {
        match unit {
            StatsUnitArg::Bytes => SizeUnit::Bytes,
            StatsUnitArg::Bits => SizeUnit::Bits,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Copy missing and changed objects to the destination
    Copy {
        #[command(flatten)]
        opts: CommonOpts,
    },
    /// Make the destination identical to the source, deleting extras
    Sync {
        #[command(flatten)]
        opts: CommonOpts,

        /// Delete destination-only objects before any transfer
        #[arg(long, conflicts_with_all = ["delete_during", "delete_after"], env = "NIMBUS_DELETE_BEFORE")]
        delete_before: bool,

        /// Delete destination-only objects while transferring
        #[arg(long, conflicts_with = "delete_after", env = "NIMBUS_DELETE_DURING")]
        delete_during: bool,

        /// Delete destination-only objects after all transfers (default)
        #[arg(long, env = "NIMBUS_DELETE_AFTER")]
        delete_after: bool,

        /// Also delete destination objects the filter excludes
        #[arg(long, env = "NIMBUS_DELETE_EXCLUDED")]
        delete_excluded: bool,
    },
    /// Copy everything to the destination, then remove the source
    Move {
        #[command(flatten)]
        opts: CommonOpts,
    },
}

#[derive(Args)]
struct CommonOpts {
    /// Source remote or path
    source: String,

    /// Destination remote or path
    destination: String,

    /// Log actions without performing them
    #[arg(short = 'n', long, env = "NIMBUS_DRY_RUN")]
    dry_run: bool,

    /// Number of comparison workers
    #[arg(long, default_value_t = 8, env = "NIMBUS_CHECKERS")]
    checkers: usize,

    /// Number of transfer workers
    #[arg(long, default_value_t = 4, env = "NIMBUS_TRANSFERS")]
    transfers: usize,

    /// Compare by size only
    #[arg(long, env = "NIMBUS_SIZE_ONLY")]
    size_only: bool,

    /// Compare by size and checksum instead of modification time
    #[arg(long, env = "NIMBUS_CHECKSUM")]
    checksum: bool,

    /// Skip objects whose destination copy is newer
    #[arg(short = 'u', long, env = "NIMBUS_UPDATE")]
    update: bool,

    /// Fail when an existing destination object would change
    #[arg(long, env = "NIMBUS_IMMUTABLE")]
    immutable: bool,

    /// Never replace an existing destination object
    #[arg(long, env = "NIMBUS_IGNORE_EXISTING")]
    ignore_existing: bool,

    /// Always transfer, skipping all comparisons
    #[arg(long, env = "NIMBUS_IGNORE_TIMES")]
    ignore_times: bool,

    /// Ignore size when comparing and verifying
    #[arg(long, env = "NIMBUS_IGNORE_SIZE")]
    ignore_size: bool,

    /// Skip post-transfer checksum verification
    #[arg(long, env = "NIMBUS_IGNORE_CHECKSUM")]
    ignore_checksum: bool,

    /// Never touch destination modification times
    #[arg(long, env = "NIMBUS_NO_UPDATE_MODTIME")]
    no_update_modtime: bool,

    /// Modification time comparison window in seconds
    #[arg(long, env = "NIMBUS_MODIFY_WINDOW")]
    modify_window: Option<f64>,

    /// Detect renamed content and move it server-side instead of copying
    #[arg(long, env = "NIMBUS_TRACK_RENAMES")]
    track_renames: bool,

    /// Move overwritten and deleted destination objects into this directory
    #[arg(long, env = "NIMBUS_BACKUP_DIR")]
    backup_dir: Option<String>,

    /// Suffix for object names moved into the backup directory
    #[arg(long, env = "NIMBUS_SUFFIX")]
    suffix: Option<String>,

    /// Probe destination objects one by one instead of listing
    #[arg(long, env = "NIMBUS_NO_TRAVERSE")]
    no_traverse: bool,

    /// Do not cross filesystem boundaries on local stores
    #[arg(long, env = "NIMBUS_ONE_FILE_SYSTEM")]
    one_file_system: bool,

    /// Use recursive listing when the store supports it
    #[arg(long, env = "NIMBUS_FAST_LIST")]
    fast_list: bool,

    /// Cap on listing depth
    #[arg(long, env = "NIMBUS_MAX_DEPTH")]
    max_depth: Option<usize>,

    /// Include rule, may repeat; evaluated in order with excludes
    #[arg(long, env = "NIMBUS_INCLUDE")]
    include: Vec<String>,

    /// Exclude rule, may repeat; evaluated in order with includes
    #[arg(long, env = "NIMBUS_EXCLUDE")]
    exclude: Vec<String>,

    /// Only consider objects at least this many bytes
    #[arg(long, env = "NIMBUS_MIN_SIZE")]
    min_size: Option<u64>,

    /// Only consider objects at most this many bytes
    #[arg(long, env = "NIMBUS_MAX_SIZE")]
    max_size: Option<u64>,

    /// Only consider objects at least this many seconds old
    #[arg(long, env = "NIMBUS_MIN_AGE")]
    min_age: Option<u64>,

    /// Only consider objects at most this many seconds old
    #[arg(long, env = "NIMBUS_MAX_AGE")]
    max_age: Option<u64>,

    /// File with one path per line to restrict the run to
    #[arg(long, env = "NIMBUS_FILES_FROM")]
    files_from: Option<PathBuf>,

    /// Bandwidth limit: a rate like 512k, or an HH:MM,RATE timetable
    #[arg(long, env = "NIMBUS_BWLIMIT")]
    bwlimit: Option<String>,

    /// Cap on backend transactions per second
    #[arg(long, env = "NIMBUS_TPS_LIMIT")]
    tps_limit: Option<f64>,

    /// Whole-run retries while counted errors remain
    #[arg(long, default_value_t = 3, env = "NIMBUS_RETRIES")]
    retries: u32,

    /// Per-transfer attempts before an error is counted
    #[arg(long, default_value_t = 10, env = "NIMBUS_LOW_LEVEL_RETRIES")]
    low_level_retries: u32,

    /// Bound on a single transfer in seconds, 0 disables it
    #[arg(long, default_value_t = 300, env = "NIMBUS_TIMEOUT")]
    timeout: u64,

    /// Buffer size for streamed transfers in bytes
    #[arg(long, env = "NIMBUS_BUFFER_SIZE")]
    buffer_size: Option<usize>,
}

impl CommonOpts {
    fn sync_options(&self, delete_mode: DeleteMode, delete_excluded: bool) -> Result<SyncOptions, Error> {
        let mut opts = SyncOptions {
            dry_run: self.dry_run,
            checkers: WorkerCount::new(self.checkers).map_err(Error::usage)?,
            transfers: WorkerCount::new(self.transfers).map_err(Error::usage)?,
            delete_mode,
            delete_excluded,
            compare: CompareOptions {
                ignore_existing: self.ignore_existing,
                ignore_times: self.ignore_times,
                size_only: self.size_only,
                checksum: self.checksum,
                update: self.update,
                immutable: self.immutable,
                ignore_size: self.ignore_size,
                ignore_checksum: self.ignore_checksum,
                no_update_modtime: self.no_update_modtime,
                modify_window: self.modify_window.map(Duration::from_secs_f64),
            },
            track_renames: self.track_renames,
            backup_dir: self.backup_dir.clone(),
            suffix: self.suffix.clone(),
            no_traverse: self.no_traverse,
            fast_list: self.fast_list,
            max_depth: self.max_depth,
            ..Default::default()
        };
        opts.retry.run_retries = self.retries;
        opts.retry.low_level_retries = self.low_level_retries;
        opts.timeouts.io_timeout = match self.timeout {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        if let Some(size) = self.buffer_size {
            opts.buffer_size = BufferSize::new(size).map_err(Error::usage)?;
        }
        Ok(opts)
    }

    async fn filter(&self) -> Result<Filter, Error> {
        let mut filter = Filter::new();
        for pattern in &self.include {
            filter.add_include(pattern)?;
        }
        for pattern in &self.exclude {
            filter.add_exclude(pattern)?;
        }
        let mut filter = filter
            .with_min_size(self.min_size)
            .with_max_size(self.max_size)
            .with_min_age(self.min_age.map(Duration::from_secs))
            .with_max_age(self.max_age.map(Duration::from_secs));
        if let Some(path) = &self.files_from {
            let listing = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| Error::usage(format!("cannot read {}: {}", path.display(), e)))?;
            filter = filter.with_files_from(
                listing
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty() && !line.starts_with('#'))
                    .map(str::to_owned),
            );
        }
        Ok(filter)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug, cli.quiet, cli.verbose)?;

    let (operation, opts, delete_mode, delete_excluded) = match &cli.command {
        Commands::Copy { opts } => ("copy", opts, DeleteMode::Off, false),
        Commands::Sync {
            opts,
            delete_before,
            delete_during,
            delete_excluded,
            ..
        } => {
            let mode = if *delete_before {
                DeleteMode::Before
            } else if *delete_during {
                DeleteMode::During
            } else {
                DeleteMode::After
            };
            ("sync", opts, mode, *delete_excluded)
        }
        Commands::Move { opts } => ("move", opts, DeleteMode::Off, false),
    };

    match run(&cli, operation, opts, delete_mode, delete_excluded).await {
        Ok(summary) => {
            print_summary(&cli, &summary);
            Ok(())
        }
        Err(err) => {
            error!("{}", err);
            if !cli.quiet {
                eprintln!("{} {}", style("error:").red().bold(), err);
            }
            std::process::exit(exit_code(&err));
        }
    }
}

async fn run(
    cli: &Cli,
    operation: &str,
    opts: &CommonOpts,
    delete_mode: DeleteMode,
    delete_excluded: bool,
) -> Result<SyncSummary, Error> {
    let resolve_opts = nimbus_fs::ResolveOptions {
        one_file_system: opts.one_file_system,
    };
    let src = nimbus_fs::resolve_with(&opts.source, resolve_opts)?;
    let dst = nimbus_fs::resolve_with(&opts.destination, resolve_opts)?;
    info!(
        src = %src.name(),
        dst = %dst.name(),
        operation,
        "starting"
    );

    let sync_opts = opts.sync_options(delete_mode, delete_excluded)?;
    let filter = opts.filter().await?;

    let bandwidth = match &opts.bwlimit {
        Some(spec) => {
            let timetable = BwTimetable::parse(spec)?;
            if timetable.is_unlimited() {
                None
            } else {
                Some(Arc::new(BandwidthLimiter::new(timetable)))
            }
        }
        None => None,
    };
    let tps = opts.tps_limit.map(|tps| Arc::new(TpsLimiter::new(tps)));

    let stats = Arc::new(SyncStats::new());
    let cancel = CancellationToken::new();

    // A user interrupt cancels every worker; partial destination objects
    // are not cleaned up.
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("interrupted, cancelling workers");
                cancel.cancel();
            }
        });
    }

    let logger = if cli.stats > 0 {
        let level = cli
            .stats_log_level
            .parse()
            .unwrap_or(tracing::Level::INFO);
        Some(spawn_progress_logger(
            Arc::clone(&stats),
            Duration::from_secs(cli.stats),
            level,
            cli.stats_unit.into(),
            cancel.clone(),
        ))
    } else {
        None
    };

    let bar = progress_bar(cli, &stats, cancel.clone());

    let engine = SyncEngine::new(src, dst, sync_opts)
        .with_filter(filter)
        .with_stats(Arc::clone(&stats))
        .with_bandwidth(bandwidth)
        .with_tps(tps)
        .with_cancel(cancel.clone());

    let result = match operation {
        "copy" => engine.copy().await,
        "sync" => engine.sync().await,
        _ => engine.move_dir().await,
    };

    cancel.cancel();
    if let Some(handle) = logger {
        let _ = handle.await;
    }
    if let Some(handle) = bar {
        let _ = handle.await;
    }
    result
}

// A lightweight spinner showing live totals on interactive terminals.
fn progress_bar(
    cli: &Cli,
    stats: &Arc<SyncStats>,
    cancel: CancellationToken,
) -> Option<tokio::task::JoinHandle<()>> {
    if cli.quiet || cli.json || !console::user_attended() {
        return None;
    }
    let unit: SizeUnit = cli.stats_unit.into();
    let stats = Arc::clone(stats);
    Some(tokio::spawn(async move {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        let mut ticker = tokio::time::interval(Duration::from_millis(250));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let snap = stats.snapshot();
                    bar.set_message(format!(
                        "{} / {} transfers, {}, {} errors",
                        format_size(snap.bytes, unit),
                        snap.transfers,
                        format_rate(snap.rate, unit),
                        snap.errors,
                    ));
                    bar.tick();
                }
            }
        }
        bar.finish_and_clear();
    }))
}

fn print_summary(cli: &Cli, summary: &SyncSummary) {
    if cli.json {
        match serde_json::to_string_pretty(summary) {
            Ok(json) => println!("{}", json),
            Err(err) => error!("cannot render summary: {}", err),
        }
        return;
    }
    if cli.quiet {
        return;
    }
    let unit: SizeUnit = cli.stats_unit.into();
    let label = if summary.dry_run { " (dry run)" } else { "" };
    println!(
        "{} {} transferred in {} transfers{}",
        style("done:").green().bold(),
        format_size(summary.bytes, unit),
        summary.transfers,
        label,
    );
    if summary.deletes > 0 || summary.deleted_dirs > 0 {
        println!(
            "  deleted {} objects, pruned {} directories",
            summary.deletes, summary.deleted_dirs
        );
    }
    if summary.renames > 0 {
        println!("  renamed {} objects server-side", summary.renames);
    }
    if summary.retries > 0 {
        println!("  {} low-level retries", summary.retries);
    }
}

fn init_logging(debug: bool, quiet: bool, verbose: bool) -> anyhow::Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else if quiet {
        "error"
    } else {
        "warn"
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("building log filter")?;

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

/// Map an engine error to the documented process exit code
fn exit_code(err: &Error) -> i32 {
    match err {
        Error::Usage { .. } | Error::Config { .. } => 2,
        Error::DirNotFound { .. } => 3,
        Error::NotFound { .. } => 4,
        Error::Io { .. } | Error::Timeout { .. } => 5,
        Error::RunErrors { .. } | Error::NotDeleting => 6,
        Error::ImmutableModified { .. } | Error::OverlappingRemotes { .. } => 7,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_match_documentation() {
        assert_eq!(exit_code(&Error::usage("bad flags")), 2);
        assert_eq!(exit_code(&Error::DirNotFound { path: "x".into() }), 3);
        assert_eq!(exit_code(&Error::not_found("y")), 4);
        assert_eq!(exit_code(&Error::Timeout { seconds: 1 }), 5);
        assert_eq!(exit_code(&Error::RunErrors { count: 2 }), 6);
        assert_eq!(exit_code(&Error::NotDeleting), 6);
        assert_eq!(exit_code(&Error::ImmutableModified { path: "e".into() }), 7);
        assert_eq!(exit_code(&Error::Cancelled), 1);
    }

    #[test]
    fn test_cli_parses_sync_flags() {
        let cli = Cli::try_parse_from([
            "nimbus",
            "sync",
            "src-dir",
            "dst-dir",
            "--checksum",
            "--delete-during",
            "--exclude",
            "*.tmp",
            "--bwlimit",
            "512k",
        ])
        .unwrap();

        match cli.command {
            Commands::Sync {
                opts,
                delete_during,
                ..
            } => {
                assert!(opts.checksum);
                assert!(delete_during);
                assert_eq!(opts.exclude, vec!["*.tmp"]);
                assert_eq!(opts.bwlimit.as_deref(), Some("512k"));
            }
            _ => panic!("expected sync"),
        }
    }

    #[test]
    fn test_cli_rejects_conflicting_delete_modes() {
        assert!(Cli::try_parse_from([
            "nimbus",
            "sync",
            "a",
            "b",
            "--delete-before",
            "--delete-after"
        ])
        .is_err());
    }
}
