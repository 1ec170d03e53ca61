//! # ibi recovery CLI (`ibirecover`)
//!
//! Thin command layer over the `ibi_recovery` library: it gathers paths and
//! options from flags and an optional TOML file, runs the pipeline, and
//! prints summaries. Logs and progress go to stderr; command output to stdout.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ibirecover detect` | Show the database, backup, and storage roots that would be used |
//! | `ibirecover formats` | List the export formats |
//! | `ibirecover audit` | Count resolved and unresolved files, optionally write a JSON report |
//! | `ibirecover export [DIR]` | Write metadata in one or more formats |
//! | `ibirecover extract OUTPUT` | Copy files into an album or type tree |
//!
//! ## Examples
//!
//! ```bash
//! # Everything from a mounted device
//! ibirecover --root /mnt/ibi extract ./recovered --dedup --export
//!
//! # Explicit paths, XMP sidecars and a digiKam CSV only
//! ibirecover --db ./index.db --files-root ./files export ./meta \
//!     --format xmp_sidecar --format digikam_csv
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use ibi_recovery::audit::{self, AuditReport};
use ibi_recovery::config::{self, Config, ExportConfig, ExtractMode};
use ibi_recovery::detect::resolve_layout;
use ibi_recovery::export::{export_all, ExportSummary, FormatCatalog};
use ibi_recovery::extract::{extract, ExtractOptions, REPORT_FILE};
use ibi_recovery::pipeline::{recover, RecoverySet};
use ibi_recovery::progress::{format_bytes, format_number, ProgressMode, ProgressReporter};

/// Recover files and metadata from a WD ibi device.
///
/// Paths can come from `--root` (layout detection), from explicit flags, or
/// from the `[source]` section of a config file. Flags win.
#[derive(Parser)]
#[command(
    name = "ibirecover",
    about = "Recover files and metadata from a WD ibi device database and file store",
    version
)]
struct Cli {
    /// Path to a configuration file (TOML). Optional.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Device root to detect the database and file store under.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Primary database (index.db).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Backup database used to rescue records the primary cannot place.
    #[arg(long, global = true)]
    backup_db: Option<PathBuf>,

    /// Legacy content-addressed file store.
    #[arg(long, global = true)]
    files_root: Option<PathBuf>,

    /// Per-user storage root (`userStorage`).
    #[arg(long, global = true)]
    user_storage_root: Option<PathBuf>,

    /// Progress output on stderr. Defaults to `human` on a terminal, `off` otherwise.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show which database, backup, and storage roots would be used.
    Detect,

    /// List available export formats.
    Formats,

    /// Count resolved and unresolved files by type.
    ///
    /// With `--report-dir`, also writes `audit_report.json` naming every
    /// unresolved record.
    Audit {
        /// Directory for `audit_report.json`.
        #[arg(long)]
        report_dir: Option<PathBuf>,

        /// Also classify files in the store that no record points at.
        #[arg(long)]
        scan_orphans: bool,
    },

    /// Write metadata exports.
    Export {
        /// Output directory. Defaults to `[export].dir`.
        dir: Option<PathBuf>,

        /// Format to write; repeatable. Defaults to `[export].formats`, or all.
        #[arg(long = "format")]
        formats: Vec<String>,
    },

    /// Copy recovered files into an output tree.
    Extract {
        /// Output root.
        output: PathBuf,

        /// `albums`: one directory per album plus an orphan directory.
        /// `type`: images/, videos/, documents/, other/.
        #[arg(long, value_enum)]
        mode: Option<ExtractMode>,

        /// Hardlink (or symlink) repeated content instead of copying it again.
        #[arg(long)]
        dedup: bool,

        /// Re-copy targets that already exist.
        #[arg(long)]
        no_resume: bool,

        /// Plan and count without copying anything.
        #[arg(long)]
        dry_run: bool,

        /// Also write every export format under `<OUTPUT>/<export dir>`.
        #[arg(long)]
        export: bool,
    },
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ibi_recovery=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Config file (if any) with command-line paths layered on top.
fn effective_config(cli: &Cli) -> Result<Config> {
    let mut cfg = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => Config::default(),
    };
    let source = &mut cfg.source;
    for (flag, slot) in [
        (&cli.root, &mut source.root),
        (&cli.db, &mut source.db),
        (&cli.backup_db, &mut source.backup_db),
        (&cli.files_root, &mut source.files_root),
        (&cli.user_storage_root, &mut source.user_storage_root),
    ] {
        if flag.is_some() {
            *slot = flag.clone();
        }
    }
    Ok(cfg)
}

fn load_catalog(export: &ExportConfig) -> Result<FormatCatalog> {
    let mut catalog = FormatCatalog::builtin().context("Built-in format catalog is invalid")?;
    if let Some(path) = &export.formats_file {
        let n = catalog.merge_file(path)?;
        tracing::info!(formats = n, file = %path.display(), "loaded custom formats");
    }
    Ok(catalog)
}

async fn load_set(cfg: &Config, progress: &dyn ProgressReporter) -> Result<RecoverySet> {
    let layout = resolve_layout(&cfg.source)?;
    let set = recover(&layout, progress)
        .await
        .with_context(|| format!("Failed to load {}", layout.db.display()))?;
    Ok(set)
}

fn run_export(
    set: &RecoverySet,
    cfg: &Config,
    names: &[String],
    dir: &Path,
    progress: &dyn ProgressReporter,
) -> Result<ExportSummary> {
    let catalog = load_catalog(&cfg.export)?;
    let names = if names.is_empty() {
        cfg.export.formats.as_slice()
    } else {
        names
    };
    let summary = export_all(&set.records, &catalog, names, dir, progress)?;

    println!("Metadata export: {}", dir.display());
    for f in &summary.exported_formats {
        println!(
            "  {:<24} {:>8} records  {}",
            f.format,
            format_number(f.records as u64),
            f.path.display()
        );
    }
    for f in &summary.failed_formats {
        println!("  {:<24} FAILED: {}", f.format, f.reason);
    }
    Ok(summary)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let cfg = effective_config(&cli)?;
    let progress = cli
        .progress
        .unwrap_or_else(ProgressMode::default_for_tty)
        .reporter();

    match cli.command {
        Commands::Detect => {
            let layout = resolve_layout(&cfg.source)?;
            println!("Database:      {}", layout.db.display());
            match &layout.backup_db {
                Some(b) => println!("Backup:        {}", b.display()),
                None => println!("Backup:        none"),
            }
            println!("Files root:    {}", layout.files_root.display());
            match &layout.user_storage_root {
                Some(u) => println!("User storage:  {}", u.display()),
                None => println!("User storage:  none"),
            }
        }
        Commands::Formats => {
            let catalog = load_catalog(&cfg.export)?;
            for (name, spec) in catalog.iter() {
                println!("{:<24} .{:<5} {}", name, spec.file_extension, spec.description);
            }
        }
        Commands::Audit {
            report_dir,
            scan_orphans,
        } => {
            let set = load_set(&cfg, progress.as_ref()).await?;
            let mut audit_cfg = cfg.audit.clone();
            audit_cfg.scan_orphans |= scan_orphans;
            let report = AuditReport::build(&set, &audit_cfg)?;
            audit::print_summary(&report, &audit_cfg);
            if let Some(dir) = report_dir {
                let path = report.write_report(&dir)?;
                println!();
                println!("Report written to {}", path.display());
            }
        }
        Commands::Export { dir, formats } => {
            let set = load_set(&cfg, progress.as_ref()).await?;
            let dir = dir.unwrap_or_else(|| cfg.export.dir.clone());
            run_export(&set, &cfg, &formats, &dir, progress.as_ref())?;
        }
        Commands::Extract {
            output,
            mode,
            dedup,
            no_resume,
            dry_run,
            export,
        } => {
            let set = load_set(&cfg, progress.as_ref()).await?;
            let mut opts = ExtractOptions::from_config(&cfg.extract);
            if let Some(mode) = mode {
                opts.mode = mode;
            }
            opts.dedup |= dedup;
            opts.resume &= !no_resume;
            opts.dry_run = dry_run;

            let summary = extract(&set.records, &opts, &output, progress.as_ref())?;
            println!("Extraction: {}", output.display());
            println!("  Planned:      {}", format_number(summary.planned as u64));
            println!("  Copied:       {}", format_number(summary.copied as u64));
            println!("  Skipped:      {}", format_number(summary.skipped as u64));
            println!("  Deduplicated: {}", format_number(summary.deduplicated as u64));
            println!("  Failed:       {}", format_number(summary.failed as u64));
            println!("  Unresolved:   {}", format_number(summary.unresolved.len() as u64));
            println!("  Bytes:        {}", format_bytes(summary.bytes_copied));
            for (kind, n) in &summary.errors {
                println!("    {:<22} {}", kind, format_number(*n as u64));
            }
            for f in &summary.failures {
                println!("  FAILED {} -> {}: {}", f.record_id, f.target.display(), f.reason);
            }
            if !summary.dry_run {
                println!("  Report:       {}", output.join(REPORT_FILE).display());
            }

            if export && !dry_run {
                let dir = output.join(&cfg.export.dir);
                println!();
                run_export(&set, &cfg, &[], &dir, progress.as_ref())?;
            }
        }
    }

    Ok(())
}
