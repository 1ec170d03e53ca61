//! Verification report for a recovery run.
//!
//! Counts what was found and what was not, broken down by MIME category,
//! and names every unresolved record so nothing is dropped silently. Optionally scans the legacy file store for files no database
//! row points at and sorts them into likely junk and likely real content.

use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::AuditConfig;
use crate::detect::SourceLayout;
use crate::error::RecoveryError;
use crate::merge::MergeStats;
use crate::models::{FileRecord, MimeCategory, RecordSource, Resolution};
use crate::normalize::NormalizeReport;
use crate::pipeline::{BackupStatus, RecoverySet};
use crate::progress::{format_bytes, format_number};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CategoryStats {
    pub count: usize,
    pub resolved: usize,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedFile {
    pub id: String,
    pub content_id: String,
    pub name: String,
    pub storage_id: String,
    pub source: RecordSource,
}

/// Written to `audit_report.json`.
#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub generated_at: String,
    pub layout: SourceLayout,
    pub backup: BackupStatus,
    /// Recoverable records: organizational rows are not counted.
    pub total: usize,
    pub resolved: usize,
    pub unresolved: usize,
    /// Primary records located through the backup database's entry.
    pub recovered_from_backup: usize,
    pub backup_only: usize,
    pub total_bytes: u64,
    pub by_category: BTreeMap<&'static str, CategoryStats>,
    /// Error kind -> count.
    pub errors: BTreeMap<&'static str, usize>,
    pub normalization: NormalizeReport,
    pub merge: MergeStats,
    pub unresolved_files: Vec<UnresolvedFile>,
    pub orphans: Option<OrphanScan>,
}

impl AuditReport {
    pub fn build(set: &RecoverySet, config: &AuditConfig) -> Result<Self> {
        let files: Vec<&FileRecord> = set.records.iter().filter(|r| r.is_recoverable()).collect();

        let mut by_category: BTreeMap<&'static str, CategoryStats> = MimeCategory::ALL
            .iter()
            .map(|c| (c.dir_name(), CategoryStats::default()))
            .collect();
        let mut resolved = 0;
        let mut recovered_from_backup = 0;
        let mut backup_only = 0;
        let mut total_bytes = 0;
        let mut unresolved_files = Vec::new();
        let mut unresolved = 0;

        for rec in &files {
            let found = rec.resolution().is_some_and(Resolution::is_found);
            let stats = by_category.entry(rec.category().dir_name()).or_default();
            stats.count += 1;
            stats.bytes += rec.size_bytes;
            total_bytes += rec.size_bytes;
            match rec.source {
                RecordSource::BackupPath if found => recovered_from_backup += 1,
                RecordSource::BackupOnly => backup_only += 1,
                _ => {}
            }
            if found {
                resolved += 1;
                stats.resolved += 1;
            } else {
                unresolved += 1;
                unresolved_files.push(UnresolvedFile {
                    id: rec.id.clone(),
                    content_id: rec.content_id.clone(),
                    name: rec.name.clone(),
                    storage_id: rec.storage_id.clone(),
                    source: rec.source,
                });
            }
        }

        let mut errors: BTreeMap<&'static str, usize> = BTreeMap::new();
        let mut per_record: Vec<RecoveryError> = set.not_found_errors();
        per_record.extend(set.normalization.malformed.iter().map(RecoveryError::from));
        if let BackupStatus::Unavailable { path, reason } = &set.backup {
            per_record.push(RecoveryError::BackupUnavailable {
                path: path.clone(),
                reason: reason.clone(),
            });
        }
        for err in &per_record {
            *errors.entry(err.kind()).or_default() += 1;
        }

        let orphans = if config.scan_orphans {
            Some(scan_orphans(&set.layout.files_root, &set.records)?)
        } else {
            None
        };

        let report = Self {
            generated_at: chrono::Utc::now().to_rfc3339(),
            layout: set.layout.clone(),
            backup: set.backup.clone(),
            total: files.len(),
            resolved,
            unresolved,
            recovered_from_backup,
            backup_only,
            total_bytes,
            by_category,
            errors,
            normalization: set.normalization.clone(),
            merge: set.merge.clone(),
            unresolved_files,
            orphans,
        };
        info!(
            total = report.total,
            resolved = report.resolved,
            unresolved = report.unresolved,
            "audit complete"
        );
        Ok(report)
    }

    /// Write `audit_report.json` into `dir`.
    pub fn write_report(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create report directory: {}", dir.display()))?;
        let path = dir.join("audit_report.json");
        std::fs::write(&path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}

/// Human summary on stdout. `config` decides how many unresolved records
/// are listed by name; the JSON report always has all of them.
pub fn print_summary(report: &AuditReport, config: &AuditConfig) {
    println!("ibi Recovery Audit");
    println!("==================");
    println!();
    println!("  Database:    {}", report.layout.db.display());
    match &report.backup {
        BackupStatus::NotConfigured => println!("  Backup:      none"),
        BackupStatus::Loaded { path } => println!("  Backup:      {}", path.display()),
        BackupStatus::Unavailable { path, reason } => {
            println!("  Backup:      {} (unavailable: {})", path.display(), reason)
        }
    }
    println!();
    println!("  Files:       {}", format_number(report.total as u64));
    println!("  Resolved:    {}", format_number(report.resolved as u64));
    println!("  Unresolved:  {}", format_number(report.unresolved as u64));
    println!("  From backup: {}", format_number(report.recovered_from_backup as u64));
    println!("  Backup only: {}", format_number(report.backup_only as u64));
    println!("  Size:        {}", format_bytes(report.total_bytes));
    println!();
    println!("  By type:");
    for (name, stats) in &report.by_category {
        if stats.count == 0 {
            continue;
        }
        println!(
            "    {:<10} {:>8} files  {:>8} resolved  {:>10}",
            name,
            format_number(stats.count as u64),
            format_number(stats.resolved as u64),
            format_bytes(stats.bytes)
        );
    }
    if !report.errors.is_empty() {
        println!();
        println!("  Problems:");
        for (kind, n) in &report.errors {
            println!("    {:<22} {}", kind, format_number(*n as u64));
        }
    }
    if config.unresolved_details && !report.unresolved_files.is_empty() {
        let limit = config.detail_limit.unwrap_or(usize::MAX);
        println!();
        println!("  Unresolved files:");
        for f in report.unresolved_files.iter().take(limit) {
            println!("    {:<16} {}", f.id, f.name);
        }
        let hidden = report.unresolved_files.len().saturating_sub(limit);
        if hidden > 0 {
            println!("    ... and {} more (see audit_report.json)", format_number(hidden as u64));
        }
    }
    if let Some(scan) = &report.orphans {
        println!();
        println!("  Orphans:     {} files, {}", format_number(scan.files as u64), format_bytes(scan.bytes));
        for (class, n) in &scan.by_class {
            println!("    {:<22} {}", class, format_number(*n as u64));
        }
    }
}

/// Why an unreferenced file in the store looks the way it does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanClass {
    ZeroByte,
    SkipExtension,
    ThumbnailLike,
    Tiny,
    ContentDuplicate,
    Legitimate,
}

impl OrphanClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrphanClass::ZeroByte => "zero_byte",
            OrphanClass::SkipExtension => "skip_extension",
            OrphanClass::ThumbnailLike => "thumbnail_like",
            OrphanClass::Tiny => "tiny",
            OrphanClass::ContentDuplicate => "content_duplicate",
            OrphanClass::Legitimate => "legitimate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanFile {
    pub path: PathBuf,
    pub size: u64,
    pub class: OrphanClass,
    /// For content duplicates, the file holding the same bytes.
    pub duplicate_of: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrphanScan {
    pub files: usize,
    pub bytes: u64,
    pub by_class: BTreeMap<&'static str, usize>,
    pub entries: Vec<OrphanFile>,
}

const TINY_BYTES: u64 = 1024;
const FINGERPRINT_CHUNK: u64 = 64 * 1024;
const SKIP_EXTENSIONS: &[&str] = &["tmp", "temp", "cache", "log", "bak", "old", "swp", "swo", "lock"];
const THUMBNAIL_PATTERNS: &[&str] = &[
    "*thumb*",
    "*preview*",
    "*cache*",
    "*_small*",
    "*_[0-9]*x[0-9]*",
];

fn thumbnail_globs() -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in THUMBNAIL_PATTERNS {
        builder.add(GlobBuilder::new(pattern).case_insensitive(true).build()?);
    }
    Ok(builder.build()?)
}

/// Hash of size plus head, middle, and tail chunks. Cheap enough for large
/// stores, and equal for byte-identical files.
pub fn fingerprint(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();
    let mut hasher = Sha256::new();
    hasher.update(size.to_le_bytes());

    let mut offsets = vec![0];
    if size > FINGERPRINT_CHUNK {
        offsets.push(size / 2);
        offsets.push(size.saturating_sub(FINGERPRINT_CHUNK));
    }
    let mut buf = vec![0u8; FINGERPRINT_CHUNK as usize];
    for offset in offsets {
        file.seek(SeekFrom::Start(offset))?;
        let mut filled = 0;
        loop {
            let n = file.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
            if filled == buf.len() {
                break;
            }
        }
        hasher.update(&buf[..filled]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Walk the legacy store and classify every file whose name is not a known
/// content id.
pub fn scan_orphans(files_root: &Path, records: &[FileRecord]) -> Result<OrphanScan> {
    let known: HashSet<&str> = records.iter().map(|r| r.content_id.as_str()).collect();
    let thumbs = thumbnail_globs()?;

    // Sizes of resolved files, so fingerprints are only taken when a
    // duplicate is possible at all.
    let mut by_size: HashMap<u64, Vec<PathBuf>> = HashMap::new();
    for rec in records {
        if let Some(path) = rec.resolved_path() {
            if let Ok(meta) = std::fs::metadata(path) {
                by_size.entry(meta.len()).or_default().push(path.to_path_buf());
            }
        }
    }
    let mut prints: HashMap<PathBuf, String> = HashMap::new();
    let mut print_of = |path: &Path| -> Option<String> {
        if let Some(p) = prints.get(path) {
            return Some(p.clone());
        }
        match fingerprint(path) {
            Ok(p) => {
                prints.insert(path.to_path_buf(), p.clone());
                Some(p)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot fingerprint");
                None
            }
        }
    };

    let mut scan = OrphanScan::default();
    let mut seen_orphans: HashMap<u64, Vec<PathBuf>> = HashMap::new();

    for entry in WalkDir::new(files_root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let name = entry.file_name().to_string_lossy().to_string();
        if known.contains(name.as_str()) {
            continue;
        }
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        let path = entry.path().to_path_buf();
        let ext = Path::new(&name)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let mut duplicate_of = None;
        let class = if size == 0 {
            OrphanClass::ZeroByte
        } else if SKIP_EXTENSIONS.contains(&ext.as_str()) {
            OrphanClass::SkipExtension
        } else if thumbs.is_match(&name) {
            OrphanClass::ThumbnailLike
        } else if size < TINY_BYTES {
            OrphanClass::Tiny
        } else {
            let candidates = by_size
                .get(&size)
                .into_iter()
                .flatten()
                .chain(seen_orphans.get(&size).into_iter().flatten())
                .cloned()
                .collect::<Vec<_>>();
            if !candidates.is_empty() {
                if let Some(mine) = print_of(path.as_path()) {
                    duplicate_of = candidates
                        .into_iter()
                        .find(|c| print_of(c.as_path()).as_deref() == Some(mine.as_str()));
                }
            }
            if duplicate_of.is_some() {
                OrphanClass::ContentDuplicate
            } else {
                seen_orphans.entry(size).or_default().push(path.clone());
                OrphanClass::Legitimate
            }
        };

        scan.files += 1;
        scan.bytes += size;
        *scan.by_class.entry(class.as_str()).or_default() += 1;
        scan.entries.push(OrphanFile {
            path,
            size,
            class,
            duplicate_of,
        });
    }

    info!(orphans = scan.files, root = %files_root.display(), "orphan scan finished");
    Ok(scan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Located;
    use crate::models::StrategyKind;
    use tempfile::TempDir;

    fn layout(root: &Path) -> SourceLayout {
        SourceLayout {
            db: root.join("index.db"),
            files_root: root.join("files"),
            backup_db: Some(root.join("dbBackup/index.db")),
            user_storage_root: None,
        }
    }

    fn rec(id: &str, path: Option<&Path>, source: RecordSource) -> FileRecord {
        let resolution = match path {
            Some(p) => Resolution::Found(Located {
                path: p.to_path_buf(),
                via: StrategyKind::LegacyShard,
            }),
            None => Resolution::NotFound,
        };
        let mut r = FileRecord::new(id, format!("cid{}", id), format!("IMG_{}.jpg", id))
            .with_resolution(resolution);
        r.mime_type = "image/jpeg".into();
        r.size_bytes = 10;
        r.source = source;
        r
    }

    fn set(root: &Path, records: Vec<FileRecord>) -> RecoverySet {
        RecoverySet {
            layout: layout(root),
            records,
            albums: Vec::new(),
            filesystems: Vec::new(),
            normalization: NormalizeReport::default(),
            merge: MergeStats::default(),
            backup: BackupStatus::Loaded {
                path: root.join("dbBackup/index.db"),
            },
        }
    }

    #[test]
    fn counts_backup_rescue() {
        let root = Path::new("/device");
        let p = Path::new("/device/files/x");
        let mut folder = rec("5", None, RecordSource::Primary);
        folder.mime_type = "application/x.wd.dir".into();
        let s = set(
            root,
            vec![
                rec("1", Some(p), RecordSource::Primary),
                rec("2", Some(p), RecordSource::Primary),
                rec("3", Some(p), RecordSource::BackupPath),
                rec("4", None, RecordSource::Primary),
                folder,
            ],
        );
        let report = AuditReport::build(&s, &AuditConfig::default()).unwrap();
        assert_eq!(report.total, 4);
        assert_eq!(report.resolved, 3);
        assert_eq!(report.unresolved, 1);
        assert_eq!(report.recovered_from_backup, 1);
        assert_eq!(report.unresolved_files[0].id, "4");
        assert_eq!(report.errors.get("file_not_found"), Some(&1));
        assert_eq!(report.by_category["images"].count, 4);
        assert_eq!(report.by_category["images"].bytes, 40);
    }

    #[test]
    fn detail_limit_does_not_shorten_the_report() {
        let tmp = TempDir::new().unwrap();
        let records = (0..5)
            .map(|i| rec(&i.to_string(), None, RecordSource::Primary))
            .collect();
        let config = AuditConfig {
            detail_limit: Some(2),
            ..AuditConfig::default()
        };
        let report = AuditReport::build(&set(tmp.path(), records), &config).unwrap();
        assert_eq!(report.unresolved, 5);
        assert_eq!(report.unresolved_files.len(), 5);

        let path = report.write_report(tmp.path()).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        let ids: Vec<&str> = json["unresolved_files"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["0", "1", "2", "3", "4"]);
    }

    #[test]
    fn report_round_trips_through_json() {
        let tmp = TempDir::new().unwrap();
        let s = set(tmp.path(), vec![rec("1", None, RecordSource::BackupOnly)]);
        let report = AuditReport::build(&s, &AuditConfig::default()).unwrap();
        let path = report.write_report(&tmp.path().join("reports")).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(json["backup_only"], 1);
        assert_eq!(json["backup"]["status"], "loaded");
        assert_eq!(json["unresolved_files"][0]["source"], "backup_only");
    }

    #[test]
    fn orphans_are_classified() {
        let tmp = TempDir::new().unwrap();
        let files = tmp.path().join("files");
        std::fs::create_dir_all(files.join("a")).unwrap();
        let real = vec![7u8; 4096];
        std::fs::write(files.join("a/cid1"), &real).unwrap();
        std::fs::write(files.join("a/empty"), b"").unwrap();
        std::fs::write(files.join("a/upload.tmp"), b"partial").unwrap();
        std::fs::write(files.join("a/IMG_Thumb.jpg"), vec![1u8; 2048]).unwrap();
        std::fs::write(files.join("a/note"), b"tiny").unwrap();
        std::fs::write(files.join("a/copy_of_cid1"), &real).unwrap();
        std::fs::write(files.join("a/unknown"), vec![9u8; 4096]).unwrap();

        let known = rec("1", Some(&files.join("a/cid1")), RecordSource::Primary);
        let scan = scan_orphans(&files, &[known]).unwrap();
        let class_of = |name: &str| {
            scan.entries
                .iter()
                .find(|e| e.path.file_name().unwrap() == name)
                .map(|e| e.class)
        };
        assert_eq!(scan.files, 6);
        assert_eq!(class_of("cid1"), None);
        assert_eq!(class_of("empty"), Some(OrphanClass::ZeroByte));
        assert_eq!(class_of("upload.tmp"), Some(OrphanClass::SkipExtension));
        assert_eq!(class_of("IMG_Thumb.jpg"), Some(OrphanClass::ThumbnailLike));
        assert_eq!(class_of("note"), Some(OrphanClass::Tiny));
        assert_eq!(class_of("copy_of_cid1"), Some(OrphanClass::ContentDuplicate));
        assert_eq!(class_of("unknown"), Some(OrphanClass::Legitimate));
    }

    #[test]
    fn fingerprint_sees_the_middle() {
        let tmp = TempDir::new().unwrap();
        let size = (FINGERPRINT_CHUNK * 4) as usize;
        let a = vec![0u8; size];
        let mut b = a.clone();
        b[size / 2 + 10] = 1;
        std::fs::write(tmp.path().join("a"), &a).unwrap();
        std::fs::write(tmp.path().join("b"), &b).unwrap();
        std::fs::write(tmp.path().join("c"), &a).unwrap();
        let fa = fingerprint(&tmp.path().join("a")).unwrap();
        assert_ne!(fa, fingerprint(&tmp.path().join("b")).unwrap());
        assert_eq!(fa, fingerprint(&tmp.path().join("c")).unwrap());
    }
}
