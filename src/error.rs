//! Error taxonomy for the recovery pipeline.
//!
//! Only resource-acquisition failures are fatal: an unopenable primary
//! database, an output root that cannot be created, or a transient I/O error
//! that outlives its retries. Everything else is per-record and ends up as a
//! counted entry in a summary or audit report rather than as an `Err`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecoveryError {
    /// Primary database missing, not SQLite, or without a `Files` table.
    #[error("database unavailable at {path}: {reason}")]
    DatabaseUnavailable { path: PathBuf, reason: String },

    /// Backup database could not be used; recovery continues with the primary only.
    #[error("backup database unavailable at {path}: {reason}")]
    BackupUnavailable { path: PathBuf, reason: String },

    /// Neither storage strategy located the bytes for a record.
    #[error("no physical file found for record {id} ({name})")]
    FileNotFound { id: String, name: String },

    /// Copy, link, or timestamp correction failed for one record.
    #[error("failed to write {target}: {reason}")]
    CopyFailure { target: PathBuf, reason: String },

    /// A source row that could not be turned into a file record.
    #[error("malformed row {id}: {reason}")]
    MalformedRecord { id: String, reason: String },

    #[error("cannot create output directory {path}: {source}")]
    OutputRootUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An export format refers to an attribute, filter, or transform that does not exist.
    #[error("export format '{format}' is invalid: {reason}")]
    FormatSpecInvalid { format: String, reason: String },

    #[error("giving up on {path} after {attempts} attempts: {source}")]
    RetriesExhausted {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },
}

impl RecoveryError {
    /// Whether this error must stop the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RecoveryError::DatabaseUnavailable { .. }
                | RecoveryError::OutputRootUnavailable { .. }
                | RecoveryError::RetriesExhausted { .. }
        )
    }

    /// Short stable label used as a key in summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            RecoveryError::DatabaseUnavailable { .. } => "database_unavailable",
            RecoveryError::BackupUnavailable { .. } => "backup_unavailable",
            RecoveryError::FileNotFound { .. } => "file_not_found",
            RecoveryError::CopyFailure { .. } => "copy_failure",
            RecoveryError::MalformedRecord { .. } => "malformed_record",
            RecoveryError::OutputRootUnavailable { .. } => "output_root_unavailable",
            RecoveryError::FormatSpecInvalid { .. } => "format_spec_invalid",
            RecoveryError::RetriesExhausted { .. } => "retries_exhausted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_resource_failures_are_fatal() {
        let missing = RecoveryError::FileNotFound {
            id: "f1".into(),
            name: "a.jpg".into(),
        };
        assert!(!missing.is_fatal());

        let backup = RecoveryError::BackupUnavailable {
            path: PathBuf::from("/b/index.db"),
            reason: "gone".into(),
        };
        assert!(!backup.is_fatal());

        let root = RecoveryError::OutputRootUnavailable {
            path: PathBuf::from("/out"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(root.is_fatal());
        assert_eq!(root.kind(), "output_root_unavailable");
    }
}
