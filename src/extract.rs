//! Bulk copy of resolved files into an album- or type-based tree.
//!
//! Planning is pure: every recoverable, resolved record becomes one or more
//! [`CopyJob`]s with a final target path, and collision suffixes are handed
//! out in record order so the same input always yields the same tree.
//!
//! Execution is sequential and resumable. A target that already exists with
//! the source's size is left alone; copies land in `<target>.part` first and
//! are renamed into place, so an interrupted copy never looks finished.
//! A failure on one file is recorded and the run moves on; only an output
//! root that cannot be created, or a transient I/O error that outlasts its
//! retries, stops it.
//!
//! Every run that copies writes `extraction_report.json` into the output
//! root, naming each unresolved record and each failed copy.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, FileTimes};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{ExtractConfig, ExtractMode};
use crate::error::RecoveryError;
use crate::models::FileRecord;
use crate::naming::{safe_file_name, sanitize_dir_name, UniqueNames};
use crate::progress::{should_report, ProgressEvent, ProgressReporter};
use crate::timestamps::to_system_time;

const PROGRESS_STEP: u64 = 100;
const UNNAMED_ALBUM: &str = "Unnamed Album";
pub const REPORT_FILE: &str = "extraction_report.json";

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub mode: ExtractMode,
    /// Link repeated content to its first copy instead of copying it again.
    /// Hard links share one inode, so every linked entry carries the first
    /// copy's timestamps rather than its own record's.
    pub dedup: bool,
    pub resume: bool,
    pub fix_timestamps: bool,
    pub max_retries: u32,
    pub orphan_dir: String,
    pub dry_run: bool,
}

impl ExtractOptions {
    pub fn from_config(config: &ExtractConfig) -> Self {
        Self {
            mode: config.mode,
            dedup: config.dedup,
            resume: config.resume,
            fix_timestamps: config.fix_timestamps,
            max_retries: config.max_retries.max(1),
            orphan_dir: config.orphan_dir.clone(),
            dry_run: false,
        }
    }
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self::from_config(&ExtractConfig::default())
    }
}

/// One file to place in the output tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopyJob {
    pub record_id: String,
    pub content_id: String,
    pub source: PathBuf,
    pub target: PathBuf,
    /// Epoch milliseconds applied to the target's access and modification times.
    pub timestamp: Option<i64>,
}

/// A recoverable record with no physical file to copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedRecord {
    pub id: String,
    pub name: String,
}

impl From<&UnresolvedRecord> for RecoveryError {
    fn from(u: &UnresolvedRecord) -> Self {
        RecoveryError::FileNotFound {
            id: u.id.clone(),
            name: u.name.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Plan {
    pub jobs: Vec<CopyJob>,
    pub unresolved: Vec<UnresolvedRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedCopy {
    pub record_id: String,
    pub target: PathBuf,
    pub reason: String,
}

impl From<&FailedCopy> for RecoveryError {
    fn from(f: &FailedCopy) -> Self {
        RecoveryError::CopyFailure {
            target: f.target.clone(),
            reason: f.reason.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractSummary {
    pub planned: usize,
    pub copied: usize,
    pub skipped: usize,
    pub failed: usize,
    pub deduplicated: usize,
    pub bytes_copied: u64,
    pub dry_run: bool,
    pub unresolved: Vec<UnresolvedRecord>,
    pub failures: Vec<FailedCopy>,
    /// Error kind -> count, over `unresolved` and `failures`.
    pub errors: BTreeMap<&'static str, usize>,
}

#[derive(Serialize)]
struct ExtractionReport<'a> {
    generated_at: String,
    output_root: &'a Path,
    #[serde(flatten)]
    summary: &'a ExtractSummary,
}

impl ExtractSummary {
    fn count_errors(&mut self) {
        let errors = self
            .unresolved
            .iter()
            .map(RecoveryError::from)
            .chain(self.failures.iter().map(RecoveryError::from));
        let mut counts = BTreeMap::new();
        for e in errors {
            *counts.entry(e.kind()).or_default() += 1;
        }
        self.errors = counts;
    }

    /// Write `extraction_report.json` into `dir`.
    pub fn write_report(&self, dir: &Path) -> io::Result<PathBuf> {
        let report = ExtractionReport {
            generated_at: chrono::Utc::now().to_rfc3339(),
            output_root: dir,
            summary: self,
        };
        let path = dir.join(REPORT_FILE);
        let json = serde_json::to_string_pretty(&report).map_err(io::Error::other)?;
        fs::write(&path, json)?;
        Ok(path)
    }
}

/// Work out every target path without touching the filesystem.
pub fn plan(records: &[FileRecord], opts: &ExtractOptions, output_root: &Path) -> Plan {
    let mut out = Plan::default();
    let mut names: HashMap<PathBuf, UniqueNames> = HashMap::new();

    let album_dirs = match opts.mode {
        ExtractMode::Albums => album_directories(records, opts, output_root),
        ExtractMode::Type => BTreeMap::new(),
    };
    let orphan_root = output_root.join(&opts.orphan_dir);

    for rec in records.iter().filter(|r| r.is_recoverable()) {
        let Some(source) = rec.resolved_path() else {
            out.unresolved.push(UnresolvedRecord {
                id: rec.id.clone(),
                name: rec.name.clone(),
            });
            continue;
        };

        let dirs: Vec<PathBuf> = match opts.mode {
            ExtractMode::Type => vec![output_root.join(rec.category().dir_name())],
            ExtractMode::Albums if rec.albums.is_empty() => vec![orphan_root.clone()],
            ExtractMode::Albums => {
                let mut dirs: Vec<PathBuf> = rec
                    .albums
                    .iter()
                    .filter_map(|a| album_dirs.get(&a.id).cloned())
                    .collect();
                dirs.dedup();
                dirs
            }
        };

        let file_name = safe_file_name(&rec.name, &rec.content_id);
        for dir in dirs {
            let claimed = names.entry(dir.clone()).or_default().claim(&file_name);
            out.jobs.push(CopyJob {
                record_id: rec.id.clone(),
                content_id: rec.content_id.clone(),
                source: source.to_path_buf(),
                target: dir.join(claimed),
                timestamp: rec.best_timestamp(),
            });
        }
    }
    out
}

/// Album id -> directory. Albums are named in (name, id) order; the
/// orphan directory's name is reserved first.
fn album_directories(
    records: &[FileRecord],
    opts: &ExtractOptions,
    output_root: &Path,
) -> BTreeMap<String, PathBuf> {
    let mut albums: Vec<(&str, &str)> = records
        .iter()
        .filter(|r| r.is_recoverable())
        .flat_map(|r| r.albums.iter().map(|a| (a.name.as_str(), a.id.as_str())))
        .collect();
    albums.sort();
    albums.dedup_by(|a, b| a.1 == b.1);

    let mut taken = UniqueNames::new();
    taken.claim(&opts.orphan_dir);
    let mut dirs = BTreeMap::new();
    for (name, id) in albums {
        if dirs.contains_key(id) {
            continue;
        }
        let dir = taken.claim(&sanitize_dir_name(name, UNNAMED_ALBUM));
        dirs.insert(id.to_string(), output_root.join(dir));
    }
    dirs
}

/// Copy everything `records` resolves to into `output_root`.
pub fn extract(
    records: &[FileRecord],
    opts: &ExtractOptions,
    output_root: &Path,
    progress: &dyn ProgressReporter,
) -> Result<ExtractSummary, RecoveryError> {
    fs::create_dir_all(output_root).map_err(|source| RecoveryError::OutputRootUnavailable {
        path: output_root.to_path_buf(),
        source,
    })?;

    let plan = plan(records, opts, output_root);
    let mut summary = ExtractSummary {
        planned: plan.jobs.len(),
        dry_run: opts.dry_run,
        unresolved: plan.unresolved,
        ..Default::default()
    };
    if opts.dry_run {
        summary.count_errors();
        info!(jobs = summary.planned, unresolved = summary.unresolved.len(), "dry run, nothing copied");
        return Ok(summary);
    }

    // content_id -> first real file placed for it
    let mut canonical: HashMap<String, PathBuf> = HashMap::new();
    let total = plan.jobs.len() as u64;

    for (i, job) in plan.jobs.iter().enumerate() {
        match place(job, opts, &canonical) {
            Ok(Placed::Skipped) => summary.skipped += 1,
            Ok(Placed::Copied(bytes)) => {
                summary.copied += 1;
                summary.bytes_copied += bytes;
            }
            Ok(Placed::Linked) => summary.deduplicated += 1,
            Err(Failure::Fatal(e)) => return Err(e),
            Err(Failure::File(reason)) => {
                warn!(id = %job.record_id, path = %job.target.display(), %reason, "copy failed");
                summary.failed += 1;
                summary.failures.push(FailedCopy {
                    record_id: job.record_id.clone(),
                    target: job.target.clone(),
                    reason,
                });
            }
        }

        if opts.dedup && !canonical.contains_key(&job.content_id) && is_regular_file(&job.target) {
            canonical.insert(job.content_id.clone(), job.target.clone());
        }

        let n = i as u64 + 1;
        if should_report(n, total, PROGRESS_STEP) {
            progress.report(ProgressEvent::Copying { n, total });
        }
    }

    info!(
        copied = summary.copied,
        skipped = summary.skipped,
        deduplicated = summary.deduplicated,
        failed = summary.failed,
        unresolved = summary.unresolved.len(),
        "extraction finished"
    );

    summary.count_errors();
    summary
        .write_report(output_root)
        .map_err(|source| RecoveryError::OutputRootUnavailable {
            path: output_root.join(REPORT_FILE),
            source,
        })?;
    Ok(summary)
}

enum Placed {
    Skipped,
    Copied(u64),
    Linked,
}

enum Failure {
    Fatal(RecoveryError),
    File(String),
}

fn place(
    job: &CopyJob,
    opts: &ExtractOptions,
    canonical: &HashMap<String, PathBuf>,
) -> Result<Placed, Failure> {
    if let Some(parent) = job.target.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Failure::File(format!("create {}: {}", parent.display(), e)))?;
    }

    if opts.resume && already_done(&job.source, &job.target) {
        debug!(path = %job.target.display(), "already present");
        if opts.fix_timestamps && is_regular_file(&job.target) {
            set_times(&job.target, job.timestamp).map_err(|e| Failure::File(e.to_string()))?;
        }
        return Ok(Placed::Skipped);
    }
    remove_existing(&job.target).map_err(|e| Failure::File(e.to_string()))?;

    if opts.dedup {
        if let Some(original) = canonical.get(&job.content_id) {
            // Either way the entry shares the first copy's times.
            match link(original, &job.target) {
                Ok(kind) => {
                    debug!(path = %job.target.display(), ?kind, "linked to earlier copy");
                    return Ok(Placed::Linked);
                }
                Err(e) => debug!(error = %e, path = %job.target.display(), "linking failed, copying"),
            }
        }
    }

    let bytes = copy_with_retry(&job.source, &job.target, opts.max_retries)?;
    if opts.fix_timestamps {
        set_times(&job.target, job.timestamp).map_err(|e| Failure::File(e.to_string()))?;
    }
    Ok(Placed::Copied(bytes))
}

/// A finished target has the source's size. Sizes that cannot be read
/// count as not done.
fn already_done(source: &Path, target: &Path) -> bool {
    match (fs::metadata(source), fs::metadata(target)) {
        (Ok(s), Ok(t)) => t.is_file() && s.len() == t.len(),
        _ => false,
    }
}

fn is_regular_file(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok_and(|m| m.file_type().is_file())
}

fn remove_existing(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(m) if !m.is_dir() => fs::remove_file(path),
        _ => Ok(()),
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

fn part_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    target.with_file_name(name)
}

fn copy_once(source: &Path, target: &Path) -> io::Result<u64> {
    let part = part_path(target);
    // a leftover from an interrupted run may be read-only
    remove_existing(&part)?;
    let result = fs::copy(source, &part).and_then(|n| fs::rename(&part, target).map(|_| n));
    if result.is_err() {
        let _ = fs::remove_file(&part);
    }
    result
}

fn copy_with_retry(source: &Path, target: &Path, max_retries: u32) -> Result<u64, Failure> {
    retry(target, max_retries, || copy_once(source, target))
}

/// Run `op` until it succeeds, fails for good, or runs out of attempts on
/// transient errors.
fn retry<T>(
    target: &Path,
    max_retries: u32,
    mut op: impl FnMut() -> io::Result<T>,
) -> Result<T, Failure> {
    let attempts = max_retries.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op() {
            Ok(n) => return Ok(n),
            Err(e) if is_transient(&e) => {
                if attempt >= attempts {
                    return Err(Failure::Fatal(RecoveryError::RetriesExhausted {
                        path: target.to_path_buf(),
                        attempts: attempt,
                        source: e,
                    }));
                }
                warn!(path = %target.display(), attempt, error = %e, "transient copy error, retrying");
                std::thread::sleep(Duration::from_millis(100 * u64::from(attempt)));
            }
            Err(e) => return Err(Failure::File(e.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkKind {
    Hard,
    Symbolic,
}

/// Hardlink, or failing that a symlink, to an already placed copy.
fn link(original: &Path, target: &Path) -> io::Result<LinkKind> {
    link_with(original, target, |o, t| fs::hard_link(o, t))
}

fn link_with(
    original: &Path,
    target: &Path,
    hard_link: impl FnOnce(&Path, &Path) -> io::Result<()>,
) -> io::Result<LinkKind> {
    match hard_link(original, target) {
        Ok(()) => Ok(LinkKind::Hard),
        Err(e) => {
            debug!(error = %e, "hardlink failed, trying symlink");
            let absolute = fs::canonicalize(original).unwrap_or_else(|_| original.to_path_buf());
            symlink(&absolute, target).map(|_| LinkKind::Symbolic)
        }
    }
}

#[cfg(unix)]
fn symlink(original: &Path, target: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(original, target)
}

#[cfg(windows)]
fn symlink(original: &Path, target: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(original, target)
}

#[cfg(not(any(unix, windows)))]
fn symlink(_original: &Path, _target: &Path) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "symlinks not supported"))
}

/// Copies keep the source's permission bits, so targets may be read-only.
fn set_times(path: &Path, millis: Option<i64>) -> io::Result<()> {
    let Some(ms) = millis else {
        return Ok(());
    };
    let t = to_system_time(ms);
    let file = open_for_times(path)?;
    file.set_times(FileTimes::new().set_accessed(t).set_modified(t))
}

/// futimens needs ownership of the file, not a writable descriptor.
#[cfg(unix)]
fn open_for_times(path: &Path) -> io::Result<fs::File> {
    fs::File::open(path)
}

/// Windows needs write access on the handle; a read-only file is made
/// writable just long enough to open it.
#[cfg(not(unix))]
fn open_for_times(path: &Path) -> io::Result<fs::File> {
    let perms = fs::metadata(path)?.permissions();
    if !perms.readonly() {
        return fs::File::options().write(true).open(path);
    }
    let mut writable = perms.clone();
    #[allow(clippy::permissions_set_readonly_false)]
    writable.set_readonly(false);
    fs::set_permissions(path, writable)?;
    let file = fs::File::options().write(true).open(path);
    fs::set_permissions(path, perms)?;
    file
}
