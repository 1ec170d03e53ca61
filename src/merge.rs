//! Primary and backup reconciliation.
//!
//! Records are unioned by `id`. The primary's metadata always wins; its path
//! is replaced by the backup's only when the primary entry does not resolve
//! and the backup entry does. Records the primary lost entirely are appended
//! and flagged as backup-only.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

use crate::models::{FileRecord, RecordSource, Resolution};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub primary: usize,
    pub backup: usize,
    /// Ids found in both databases.
    pub overlapping: usize,
    /// Primary records whose path came from the backup entry.
    pub rescued_by_backup: usize,
    pub backup_only: usize,
}

#[derive(Debug)]
pub struct MergeOutcome {
    pub records: Vec<FileRecord>,
    pub stats: MergeStats,
}

fn is_found(record: &FileRecord) -> bool {
    record.resolution().is_some_and(Resolution::is_found)
}

/// Union two resolved record sequences. Output order is primary order,
/// followed by backup-only records in backup order.
pub fn merge(primary: Vec<FileRecord>, backup: Option<Vec<FileRecord>>) -> MergeOutcome {
    let mut stats = MergeStats {
        primary: primary.len(),
        ..Default::default()
    };

    let Some(backup) = backup else {
        return MergeOutcome {
            records: primary,
            stats,
        };
    };
    stats.backup = backup.len();

    let mut backup_by_id: HashMap<String, FileRecord> = HashMap::with_capacity(backup.len());
    let mut backup_order: Vec<String> = Vec::with_capacity(backup.len());
    for rec in backup {
        if !backup_by_id.contains_key(&rec.id) {
            backup_order.push(rec.id.clone());
            backup_by_id.insert(rec.id.clone(), rec);
        }
    }

    let mut seen: HashSet<String> = HashSet::with_capacity(primary.len());
    let mut records = Vec::with_capacity(primary.len() + backup_order.len());

    for rec in primary {
        if !seen.insert(rec.id.clone()) {
            continue;
        }
        let Some(twin) = backup_by_id.remove(&rec.id) else {
            records.push(rec);
            continue;
        };
        stats.overlapping += 1;

        if !is_found(&rec) && is_found(&twin) {
            if let Some(resolution) = twin.resolution().cloned() {
                let mut rescued = rec.with_resolution(resolution);
                rescued.source = RecordSource::BackupPath;
                stats.rescued_by_backup += 1;
                records.push(rescued);
                continue;
            }
        }
        records.push(rec);
    }

    for id in backup_order {
        if let Some(mut rec) = backup_by_id.remove(&id) {
            rec.source = RecordSource::BackupOnly;
            stats.backup_only += 1;
            records.push(rec);
        }
    }

    if stats.backup_only > 0 {
        warn!(
            count = stats.backup_only,
            "including records present only in the backup database"
        );
    }
    info!(
        total = records.len(),
        rescued = stats.rescued_by_backup,
        backup_only = stats.backup_only,
        "merged primary and backup"
    );

    MergeOutcome { records, stats }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Located, StrategyKind};
    use std::path::PathBuf;

    fn rec(id: &str, name: &str, found: Option<&str>) -> FileRecord {
        let mut r = FileRecord::new(id, format!("c{}", id), name);
        r.mime_type = "image/jpeg".into();
        let res = match found {
            Some(p) => Resolution::Found(Located {
                path: PathBuf::from(p),
                via: StrategyKind::LegacyShard,
            }),
            None => Resolution::NotFound,
        };
        r.with_resolution(res)
    }

    #[test]
    fn primary_only_passes_through() {
        let out = merge(vec![rec("1", "a", None)], None);
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.stats.backup, 0);
        assert_eq!(out.records[0].source, RecordSource::Primary);
    }

    #[test]
    fn union_has_no_duplicates_or_losses() {
        let primary = vec![rec("1", "a", Some("/p/1")), rec("2", "b", None)];
        let backup = vec![
            rec("2", "b-old", None),
            rec("3", "c", Some("/b/3")),
            rec("4", "d", None),
        ];
        let out = merge(primary, Some(backup));

        let ids: Vec<&str> = out.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3", "4"]);
        assert_eq!(out.stats.overlapping, 1);
        assert_eq!(out.stats.backup_only, 2);
        assert_eq!(out.records[1].name, "b");
        assert_eq!(out.records[2].source, RecordSource::BackupOnly);
    }

    #[test]
    fn backup_path_rescues_unresolved_primary() {
        let mut primary = rec("1", "primary-name.jpg", None);
        primary.description = "kept".into();
        let backup = rec("1", "backup-name.jpg", Some("/backup/found"));

        let out = merge(vec![primary], Some(vec![backup]));
        let merged = &out.records[0];
        assert_eq!(merged.resolved_path(), Some(PathBuf::from("/backup/found").as_path()));
        assert_eq!(merged.name, "primary-name.jpg");
        assert_eq!(merged.description, "kept");
        assert_eq!(merged.source, RecordSource::BackupPath);
        assert_eq!(out.stats.rescued_by_backup, 1);
    }

    #[test]
    fn resolved_primary_keeps_its_path() {
        let primary = rec("1", "a", Some("/primary"));
        let backup = rec("1", "a", Some("/backup"));
        let out = merge(vec![primary], Some(vec![backup]));
        assert_eq!(
            out.records[0].resolved_path(),
            Some(PathBuf::from("/primary").as_path())
        );
        assert_eq!(out.records[0].source, RecordSource::Primary);
    }
}
