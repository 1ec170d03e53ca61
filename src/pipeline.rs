//! Loading, resolving, and merging: everything up to the point where the
//! exporters and the extractor take over.
//!
//! ```text
//! primary db ──▶ SchemaReader ──▶ Normalizer ──┐
//!                                              ├─▶ PathResolver ──▶ merge ──▶ RecoverySet
//! backup db  ──▶ SchemaReader ──▶ Normalizer ──┘
//! ```
//!
//! Resolution caches live in a [`RecoveryContext`] created per run, so the
//! pipeline can be invoked repeatedly in one process against different data.

use futures::TryStreamExt;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::detect::SourceLayout;
use crate::error::RecoveryError;
use crate::merge::{merge, MergeStats};
use crate::models::{Album, FileRecord, FilesystemMapping, Resolution};
use crate::normalize::{
    normalize_album, normalize_filesystem, MembershipIndex, NormalizeReport, Normalizer,
};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::resolver::PathResolver;
use crate::schema::SchemaReader;

/// One database, normalized.
#[derive(Debug)]
pub struct LoadedDatabase {
    pub records: Vec<FileRecord>,
    pub albums: Vec<Album>,
    pub filesystems: Vec<FilesystemMapping>,
    pub report: NormalizeReport,
}

/// Read every relation once and assemble canonical records.
pub async fn load_database(reader: &SchemaReader) -> sqlx::Result<LoadedDatabase> {
    let mut normalizer = Normalizer::new();
    let mut records = Vec::new();
    let mut files = reader.iterate_files();
    while let Some(raw) = files.try_next().await? {
        if let Some(rec) = normalizer.normalize_row(raw) {
            records.push(rec);
        }
    }
    drop(files);

    let albums: Vec<Album> = reader
        .iterate_albums()
        .try_collect::<Vec<_>>()
        .await?
        .into_iter()
        .filter_map(normalize_album)
        .collect();
    let album_map: HashMap<String, Album> =
        albums.iter().map(|a| (a.id.clone(), a.clone())).collect();

    let ids: HashSet<String> = records.iter().map(|r| r.id.clone()).collect();
    let tags = reader.iterate_tags_for(&ids).try_collect::<Vec<_>>().await?;
    let memberships = reader
        .iterate_album_memberships()
        .try_collect::<Vec<_>>()
        .await?;

    let mut index = MembershipIndex::build(&ids, &album_map, tags, memberships);
    normalizer.add_dangling(index.dangling());
    for rec in &mut records {
        index.attach(rec);
    }

    let filesystems: Vec<FilesystemMapping> = reader
        .iterate_filesystems()
        .try_collect::<Vec<_>>()
        .await?
        .into_iter()
        .filter_map(normalize_filesystem)
        .collect();

    let report = normalizer.finish();
    info!(
        db = %reader.path().display(),
        accepted = report.accepted,
        organizational = report.organizational,
        malformed = report.malformed.len(),
        albums = albums.len(),
        "loaded database"
    );
    if report.organizational > 0 {
        info!(count = report.organizational, "filtered organizational rows");
    }

    Ok(LoadedDatabase {
        records,
        albums,
        filesystems,
        report,
    })
}

async fn open_and_load(path: &Path) -> Result<LoadedDatabase, RecoveryError> {
    let reader = SchemaReader::open(path).await?;
    let loaded = load_database(&reader)
        .await
        .map_err(|e| RecoveryError::DatabaseUnavailable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        });
    reader.close().await;
    loaded
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BackupStatus {
    NotConfigured,
    Loaded { path: PathBuf },
    /// Reduced-recovery mode: the run continued with the primary only.
    Unavailable { path: PathBuf, reason: String },
}

/// Per-run state shared by the resolution step.
pub struct RecoveryContext {
    pub layout: SourceLayout,
    pub resolver: PathResolver,
}

impl RecoveryContext {
    pub fn new(layout: SourceLayout, filesystems: &[FilesystemMapping]) -> Self {
        let resolver = PathResolver::new(
            &layout.files_root,
            layout.user_storage_root.as_deref(),
            filesystems,
        );
        Self { layout, resolver }
    }

    pub fn resolve_all(&self, records: &[FileRecord]) {
        for rec in records {
            self.resolver.resolve_into(rec);
        }
    }
}

/// The merged, resolved view both consumers work from.
#[derive(Debug)]
pub struct RecoverySet {
    pub layout: SourceLayout,
    pub records: Vec<FileRecord>,
    pub albums: Vec<Album>,
    pub filesystems: Vec<FilesystemMapping>,
    pub normalization: NormalizeReport,
    pub merge: MergeStats,
    pub backup: BackupStatus,
}

impl RecoverySet {
    pub fn record(&self, id: &str) -> Option<&FileRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// The album's preview image, if it still exists.
    pub fn album_preview(&self, album: &Album) -> Option<&FileRecord> {
        album.preview_file_id.as_deref().and_then(|id| self.record(id))
    }

    pub fn resolved(&self) -> impl Iterator<Item = &FileRecord> {
        self.records.iter().filter(|r| r.resolved_path().is_some())
    }

    pub fn unresolved(&self) -> impl Iterator<Item = &FileRecord> {
        self.records
            .iter()
            .filter(|r| r.is_recoverable() && !r.resolution().is_some_and(Resolution::is_found))
    }

    /// Per-record errors for everything that could not be located.
    pub fn not_found_errors(&self) -> Vec<RecoveryError> {
        self.unresolved()
            .map(|r| RecoveryError::FileNotFound {
                id: r.id.clone(),
                name: r.name.clone(),
            })
            .collect()
    }
}

/// Load the primary (fatal on failure) and the backup (reduced-recovery on
/// failure), resolve every record, and merge.
pub async fn recover(
    layout: &SourceLayout,
    progress: &dyn ProgressReporter,
) -> Result<RecoverySet, RecoveryError> {
    progress.report(ProgressEvent::Loading {
        database: layout.db.display().to_string(),
    });
    let primary = open_and_load(&layout.db).await?;

    let (backup, backup_status) = match &layout.backup_db {
        None => (None, BackupStatus::NotConfigured),
        Some(path) => {
            progress.report(ProgressEvent::Loading {
                database: path.display().to_string(),
            });
            match open_and_load(path).await {
                Ok(loaded) => (
                    Some(loaded),
                    BackupStatus::Loaded {
                        path: path.clone(),
                    },
                ),
                Err(e) => {
                    let reason = match e {
                        RecoveryError::DatabaseUnavailable { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    let err = RecoveryError::BackupUnavailable {
                        path: path.clone(),
                        reason: reason.clone(),
                    };
                    warn!(error = %err, "continuing with the primary database only");
                    (
                        None,
                        BackupStatus::Unavailable {
                            path: path.clone(),
                            reason,
                        },
                    )
                }
            }
        }
    };

    let mut filesystems = primary.filesystems.clone();
    let mut albums = primary.albums.clone();
    let mut normalization = primary.report.clone();
    if let Some(b) = &backup {
        let known: HashSet<String> = filesystems.iter().map(|f| f.id.clone()).collect();
        filesystems.extend(b.filesystems.iter().filter(|f| !known.contains(&f.id)).cloned());
        let known: HashSet<String> = albums.iter().map(|a| a.id.clone()).collect();
        albums.extend(b.albums.iter().filter(|a| !known.contains(&a.id)).cloned());
        normalization.absorb(&b.report);
    }

    let ctx = RecoveryContext::new(layout.clone(), &filesystems);
    ctx.resolve_all(&primary.records);
    if let Some(b) = &backup {
        ctx.resolve_all(&b.records);
    }

    let outcome = merge(primary.records, backup.map(|b| b.records));
    let set = RecoverySet {
        layout: ctx.layout,
        records: outcome.records,
        albums,
        filesystems,
        normalization,
        merge: outcome.stats,
        backup: backup_status,
    };
    info!(
        records = set.records.len(),
        resolved = set.resolved().count(),
        "recovery set ready"
    );
    Ok(set)
}
