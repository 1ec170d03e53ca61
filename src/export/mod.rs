//! Metadata export.
//!
//! One interpreter drives every format. A format is a [`FormatSpec`]
//! (JSON data, see `formats.json`), compiled once and then evaluated field by
//! field for each record. Adding a format means adding a format entry, either to the
//! built-in catalog or to a custom `formats_file`.
//!
//! Single-document formats are written to `<dir>/<format>.<ext>`; per-file
//! formats (XMP sidecars, NFO) to `<dir>/<format>/<artifact>`. Existing
//! artifacts are overwritten.

pub mod catalog;
pub mod value;
pub mod writers;

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::RecoveryError;
use crate::models::FileRecord;
use crate::naming::UniqueNames;
use crate::progress::{should_report, ProgressEvent, ProgressReporter};

pub use catalog::{CompiledFormat, FormatCatalog, FormatSpec, OutputSpec};

const PROGRESS_STEP: u64 = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportedFormat {
    pub format: String,
    pub description: String,
    /// The document, or the directory holding per-file artifacts.
    pub path: PathBuf,
    pub records: usize,
    pub artifacts: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedFormat {
    pub format: String,
    pub reason: String,
}

/// Written to `export_summary.json`.
#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    pub total_files: usize,
    pub files_with_tags: usize,
    pub files_with_albums: usize,
    pub unique_tags: usize,
    pub unique_albums: usize,
    pub exported_formats: Vec<ExportedFormat>,
    pub failed_formats: Vec<FailedFormat>,
    pub output_directory: PathBuf,
    pub generated_at: String,
}

/// Run one compiled format over `records` and write its artifact(s).
pub fn export(
    records: &[FileRecord],
    format: &CompiledFormat,
    dir: &Path,
    progress: &dyn ProgressReporter,
) -> Result<ExportedFormat> {
    let selected: Vec<&FileRecord> = records
        .iter()
        .filter(|r| r.is_recoverable() && format.applies(r.category()))
        .collect();
    let total = selected.len() as u64;
    let tick = |n: u64| {
        if should_report(n, total, PROGRESS_STEP) {
            progress.report(ProgressEvent::Exporting {
                format: format.name.clone(),
                n,
                total,
            });
        }
    };

    let (path, artifacts) = match &format.output {
        OutputSpec::Delimited { delimiter } => {
            let delimiter = delimiter.chars().next().unwrap_or(',');
            let mut body = writers::delimited_header(format, delimiter);
            for (i, rec) in selected.iter().enumerate() {
                body.push_str(&writers::delimited_row(format, rec, delimiter));
                tick(i as u64 + 1);
            }
            let path = dir.join(format!("{}.{}", format.name, format.extension));
            std::fs::write(&path, body)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            (path, 1)
        }
        OutputSpec::Json { layout, root_key } => {
            let mut objects = Vec::with_capacity(selected.len());
            for (i, rec) in selected.iter().enumerate() {
                objects.push(writers::json_object(format, rec));
                tick(i as u64 + 1);
            }
            let doc = writers::json_document(*layout, root_key.as_deref(), &selected, objects);
            let path = dir.join(format!("{}.{}", format.name, format.extension));
            let body = serde_json::to_string_pretty(&doc)?;
            std::fs::write(&path, body)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            (path, 1)
        }
        OutputSpec::XmlPerFile {
            dialect,
            root,
            naming,
            namespaces,
        } => {
            let sub = dir.join(&format.name);
            std::fs::create_dir_all(&sub)
                .with_context(|| format!("Failed to create {}", sub.display()))?;
            let mut names = UniqueNames::new();
            for (i, rec) in selected.iter().enumerate() {
                let doc = writers::xml_document(format, *dialect, root.as_deref(), namespaces, rec)?;
                let file = names.claim(&writers::artifact_name(rec, *naming, &format.extension));
                let target = sub.join(file);
                std::fs::write(&target, doc)
                    .with_context(|| format!("Failed to write {}", target.display()))?;
                tick(i as u64 + 1);
            }
            (sub, selected.len())
        }
    };

    info!(format = %format.name, records = selected.len(), path = %path.display(), "exported");
    Ok(ExportedFormat {
        format: format.name.clone(),
        description: format.description.clone(),
        path,
        records: selected.len(),
        artifacts,
    })
}

/// Export every requested format (all of them when `names` is empty).
///
/// A format that is unknown, fails to compile, or fails to write is
/// recorded in `failed_formats`; the others still run. Only an export
/// directory that cannot be created is an error.
pub fn export_all(
    records: &[FileRecord],
    catalog: &FormatCatalog,
    names: &[String],
    dir: &Path,
    progress: &dyn ProgressReporter,
) -> Result<ExportSummary> {
    std::fs::create_dir_all(dir).map_err(|source| RecoveryError::OutputRootUnavailable {
        path: dir.to_path_buf(),
        source,
    })?;

    let wanted: Vec<String> = if names.is_empty() {
        catalog.names().map(str::to_string).collect()
    } else {
        names.to_vec()
    };

    let mut exported = Vec::new();
    let mut failed = Vec::new();
    for name in &wanted {
        let Some(spec) = catalog.get(name) else {
            warn!(format = %name, "unknown export format");
            failed.push(FailedFormat {
                format: name.clone(),
                reason: "unknown format".to_string(),
            });
            continue;
        };
        let compiled = match spec.compile(name) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "skipping export format");
                failed.push(FailedFormat {
                    format: name.clone(),
                    reason: e.to_string(),
                });
                continue;
            }
        };
        match export(records, &compiled, dir, progress) {
            Ok(done) => exported.push(done),
            Err(e) => {
                let reason = format!("{:#}", e);
                warn!(format = %name, error = %reason, "export failed");
                failed.push(FailedFormat {
                    format: name.clone(),
                    reason,
                });
            }
        }
    }

    let summary = summarize(records, dir, exported, failed);
    let path = dir.join("export_summary.json");
    std::fs::write(&path, serde_json::to_string_pretty(&summary)?)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(summary)
}

fn summarize(
    records: &[FileRecord],
    dir: &Path,
    exported_formats: Vec<ExportedFormat>,
    failed_formats: Vec<FailedFormat>,
) -> ExportSummary {
    let files: Vec<&FileRecord> = records.iter().filter(|r| r.is_recoverable()).collect();
    let unique_tags: HashSet<&str> = files
        .iter()
        .flat_map(|r| r.tags.iter().map(|t| t.value.as_str()))
        .collect();
    let unique_albums: HashSet<&str> = files
        .iter()
        .flat_map(|r| r.albums.iter().map(|a| a.id.as_str()))
        .collect();
    ExportSummary {
        total_files: files.len(),
        files_with_tags: files.iter().filter(|r| !r.tags.is_empty()).count(),
        files_with_albums: files.iter().filter(|r| !r.albums.is_empty()).count(),
        unique_tags: unique_tags.len(),
        unique_albums: unique_albums.len(),
        exported_formats,
        failed_formats,
        output_directory: dir.to_path_buf(),
        generated_at: chrono::Utc::now().to_rfc3339(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AlbumRef, Tag};
    use crate::progress::NoProgress;
    use tempfile::TempDir;

    fn records() -> Vec<FileRecord> {
        let mut photo = FileRecord::new("1", "abc", "IMG_1.jpg");
        photo.mime_type = "image/jpeg".into();
        photo.description = "Beach, day one".into();
        photo.image_capture_time = Some(1_609_459_200_000);
        photo.tags.insert(Tag {
            value: "person".into(),
            auto: true,
        });
        photo.tags.insert(Tag {
            value: "custom".into(),
            auto: false,
        });
        photo.albums.push(AlbumRef {
            id: "g1".into(),
            name: "Summer".into(),
        });

        let mut clip = FileRecord::new("2", "def", "clip.mp4");
        clip.mime_type = "video/mp4".into();
        clip.video.duration = Some(12.5);

        let mut folder = FileRecord::new("3", "ghi", "Photos");
        folder.mime_type = "application/x.wd.dir".into();

        vec![photo, clip, folder]
    }

    fn run(name: &str, dir: &Path) -> ExportedFormat {
        let catalog = FormatCatalog::builtin().unwrap();
        let compiled = catalog.get(name).unwrap().compile(name).unwrap();
        export(&records(), &compiled, dir, &NoProgress).unwrap()
    }

    #[test]
    fn lightroom_csv_rows() {
        let tmp = TempDir::new().unwrap();
        let out = run("lightroom_csv", tmp.path());
        assert_eq!(out.records, 2);
        let body = std::fs::read_to_string(&out.path).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines[0], "Filename,Keywords,Caption,Album,GPS");
        assert_eq!(lines[1], "IMG_1.jpg,person,\"Beach, day one\",Summer,");
        assert_eq!(lines[2], "clip.mp4,,,,");
        assert!(!body.contains("Photos"));
    }

    #[test]
    fn video_only_formats_skip_images() {
        let tmp = TempDir::new().unwrap();
        let out = run("iptc_video_csv", tmp.path());
        assert_eq!(out.records, 1);
        let body = std::fs::read_to_string(&out.path).unwrap();
        assert!(body.lines().nth(1).unwrap().starts_with("clip.mp4\tclip\t"));
    }

    #[test]
    fn per_file_xmp_sidecars() {
        let tmp = TempDir::new().unwrap();
        let out = run("xmp_sidecar", tmp.path());
        assert_eq!(out.artifacts, 2);
        let xmp = std::fs::read_to_string(out.path.join("IMG_1.jpg.xmp")).unwrap();
        assert!(xmp.contains("<rdf:li>person</rdf:li>"));
        assert!(xmp.contains("<rdf:li>custom</rdf:li>"));
        assert!(xmp.contains("xmlns:dc=\"http://purl.org/dc/elements/1.1/\""));
        assert!(xmp.contains("<xmp:Label>Summer</xmp:Label>"));
        assert!(!out.path.join("Photos.xmp").exists());
    }

    #[test]
    fn nfo_replaces_extension() {
        let tmp = TempDir::new().unwrap();
        let out = run("jellyfin_nfo", tmp.path());
        assert_eq!(out.artifacts, 1);
        let nfo = std::fs::read_to_string(out.path.join("clip.nfo")).unwrap();
        assert!(nfo.contains("<movie>"));
        assert!(nfo.contains("<title>clip</title>"));
    }

    #[test]
    fn album_structure_groups_files() {
        let tmp = TempDir::new().unwrap();
        let out = run("album_structure_json", tmp.path());
        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&out.path).unwrap()).unwrap();
        assert_eq!(doc["albums"][0]["name"], "Summer");
        assert_eq!(doc["albums"][0]["file_count"], 1);
        assert_eq!(doc["unfiled"][0]["name"], "clip.mp4");
    }

    #[test]
    fn export_all_isolates_broken_formats() {
        let tmp = TempDir::new().unwrap();
        let mut catalog = FormatCatalog::builtin().unwrap();
        let broken: FormatSpec = serde_json::from_value(serde_json::json!({
            "file_extension": "csv",
            "output": {"kind": "delimited"},
            "fields": [{"name": "X", "source": "name", "transform": "no_such_transform"}]
        }))
        .unwrap();
        catalog.insert("broken", broken);

        let names = vec![
            "broken".to_string(),
            "digikam_csv".to_string(),
            "missing".to_string(),
        ];
        let summary = export_all(&records(), &catalog, &names, tmp.path(), &NoProgress).unwrap();
        assert_eq!(summary.exported_formats.len(), 1);
        assert_eq!(summary.failed_formats.len(), 2);
        assert_eq!(summary.total_files, 2);
        assert_eq!(summary.files_with_tags, 1);
        assert_eq!(summary.unique_albums, 1);
        assert!(tmp.path().join("export_summary.json").is_file());
        assert!(tmp.path().join("digikam_csv.csv").is_file());
    }

    #[test]
    fn rerun_overwrites() {
        let tmp = TempDir::new().unwrap();
        let first = std::fs::read_to_string(run("plex_csv", tmp.path()).path).unwrap();
        let second = std::fs::read_to_string(run("plex_csv", tmp.path()).path).unwrap();
        assert_eq!(first, second);
    }
}
