//! Storage layout detection from a device root.
//!
//! Firmware revisions and backup tools leave the database and file store at
//! slightly different depths. The candidates are probed in a fixed order and
//! the first one with both a database and a file store wins.

use anyhow::{bail, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::SourceConfig;

/// Resolved input locations for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceLayout {
    pub db: PathBuf,
    pub files_root: PathBuf,
    pub backup_db: Option<PathBuf>,
    pub user_storage_root: Option<PathBuf>,
}

/// `(database, file store, backup database)` relative to the root.
const CANDIDATES: &[(&str, &str, &str)] = &[
    ("restsdk/data/db/index.db", "restsdk/data/files", "restsdk/data/dbBackup/index.db"),
    ("data/db/index.db", "data/files", "data/dbBackup/index.db"),
    ("db/index.db", "files", "dbBackup/index.db"),
    ("index.db", "files", "dbBackup/index.db"),
];

const USER_STORAGE_DIR: &str = "userStorage";

/// Probe `root` for a known layout.
pub fn detect_layout(root: &Path) -> Option<SourceLayout> {
    for (db, files, backup) in CANDIDATES {
        let db = root.join(db);
        let files = root.join(files);
        debug!(db = %db.display(), files = %files.display(), "probing layout");
        if db.is_file() && files.is_dir() {
            let backup = root.join(backup);
            let user_storage = root.join(USER_STORAGE_DIR);
            return Some(SourceLayout {
                db,
                files_root: files,
                backup_db: backup.is_file().then_some(backup),
                user_storage_root: user_storage.is_dir().then_some(user_storage),
            });
        }
    }
    None
}

/// Combine detection with explicit settings. Explicit paths always win;
/// detection only fills in what was left unset.
pub fn resolve_layout(source: &SourceConfig) -> Result<SourceLayout> {
    let detected = match &source.root {
        Some(root) => {
            if !root.is_dir() {
                bail!("Device root does not exist: {}", root.display());
            }
            let layout = detect_layout(root);
            match &layout {
                Some(l) => info!(
                    db = %l.db.display(),
                    files = %l.files_root.display(),
                    backup = l.backup_db.is_some(),
                    "detected device layout"
                ),
                None => info!(root = %root.display(), "no known layout under device root"),
            }
            layout
        }
        None => None,
    };

    let db = source
        .db
        .clone()
        .or_else(|| detected.as_ref().map(|d| d.db.clone()));
    let files_root = source
        .files_root
        .clone()
        .or_else(|| detected.as_ref().map(|d| d.files_root.clone()));

    let (db, files_root) = match (db, files_root) {
        (Some(db), Some(files)) => (db, files),
        (None, _) => bail!("No database found: pass --db or a --root containing a known layout"),
        (_, None) => {
            bail!("No file store found: pass --files-root or a --root containing a known layout")
        }
    };

    Ok(SourceLayout {
        db,
        files_root,
        backup_db: source
            .backup_db
            .clone()
            .or_else(|| detected.as_ref().and_then(|d| d.backup_db.clone())),
        user_storage_root: source
            .user_storage_root
            .clone()
            .or_else(|| detected.as_ref().and_then(|d| d.user_storage_root.clone())),
    })
}
