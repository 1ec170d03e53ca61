use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;
use tempfile::TempDir;

fn ibirecover_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("ibirecover");
    path
}

/// A device root in the `restsdk/data` layout with three files, one of
/// them in an album, and a folder row.
async fn setup_device() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("restsdk/data");
    fs::create_dir_all(data.join("db")).unwrap();

    let options = SqliteConnectOptions::from_str(&format!(
        "sqlite:{}",
        data.join("db/index.db").display()
    ))
    .unwrap()
    .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    for stmt in [
        "CREATE TABLE Files (id TEXT PRIMARY KEY, contentID TEXT, name TEXT, mimeType TEXT, size INTEGER, storageID TEXT)",
        "CREATE TABLE FilesTags (fileID TEXT, tag TEXT, auto INTEGER)",
        "CREATE TABLE FileGroups (id TEXT PRIMARY KEY, name TEXT)",
        "CREATE TABLE FileGroupFiles (id TEXT PRIMARY KEY, fileID TEXT, fileGroupID TEXT)",
        "INSERT INTO Files VALUES
            ('f1', 'aa11', 'beach.jpg', 'image/jpeg', 5, 'local'),
            ('f2', 'bb22', 'clip.mp4', 'video/mp4', 4, 'local'),
            ('f3', 'cc33', 'missing.jpg', 'image/jpeg', 9, 'local'),
            ('d1', '', 'Camera Roll', 'application/x.wd.dir', 0, 'local')",
        "INSERT INTO FilesTags VALUES ('f1', 'beach', 1)",
        "INSERT INTO FileGroups VALUES ('g1', 'Holiday: 2020')",
        "INSERT INTO FileGroupFiles VALUES ('m1', 'f1', 'g1')",
    ] {
        sqlx::query(stmt).execute(&pool).await.unwrap();
    }
    pool.close().await;

    for (cid, bytes) in [("aa11", &b"beach"[..]), ("bb22", &b"clip"[..])] {
        let path = data.join("files").join(&cid[..1]).join(cid);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, bytes).unwrap();
    }
    tmp
}

fn run_ibirecover(root: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = ibirecover_binary();
    let output = Command::new(&binary)
        .arg("--root")
        .arg(root)
        .arg("--progress")
        .arg("off")
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run ibirecover binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_formats_lists_builtin_catalog() {
    let tmp = TempDir::new().unwrap();
    let (stdout, stderr, success) = run_ibirecover(tmp.path(), &["formats"]);
    assert!(success, "formats failed: {}", stderr);
    assert_eq!(stdout.lines().count(), 12);
    assert!(stdout.contains("lightroom_csv"));
    assert!(stdout.contains("jellyfin_nfo"));
}

#[tokio::test]
async fn test_detect_finds_layout() {
    let tmp = setup_device().await;
    let (stdout, stderr, success) = run_ibirecover(tmp.path(), &["detect"]);
    assert!(success, "detect failed: {}", stderr);
    assert!(stdout.contains("restsdk/data/db/index.db"));
    assert!(stdout.contains("Backup:        none"));
}

#[tokio::test]
async fn test_audit_writes_report() {
    let tmp = setup_device().await;
    let reports = tmp.path().join("reports");
    let (stdout, stderr, success) = run_ibirecover(
        tmp.path(),
        &["audit", "--report-dir", reports.to_str().unwrap()],
    );
    assert!(success, "audit failed: {}", stderr);
    assert!(stdout.contains("Unresolved:  1"));

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(reports.join("audit_report.json")).unwrap())
            .unwrap();
    assert_eq!(report["total"], 3);
    assert_eq!(report["resolved"], 2);
    assert_eq!(report["unresolved_files"][0]["name"], "missing.jpg");
}

#[tokio::test]
async fn test_extract_with_export() {
    let tmp = setup_device().await;
    let out = tmp.path().join("recovered");
    let (stdout, stderr, success) =
        run_ibirecover(tmp.path(), &["extract", out.to_str().unwrap(), "--export"]);
    assert!(success, "extract failed: {}", stderr);
    assert!(stdout.contains("Copied:       2"));

    assert_eq!(fs::read(out.join("Holiday_ 2020/beach.jpg")).unwrap(), b"beach");
    assert_eq!(fs::read(out.join("Unfiled/clip.mp4")).unwrap(), b"clip");
    assert!(!out.join("Unfiled/Camera Roll").exists());

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out.join("extraction_report.json")).unwrap())
            .unwrap();
    assert_eq!(report["unresolved"][0]["name"], "missing.jpg");

    let summary: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(out.join("metadata_exports/export_summary.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(summary["total_files"], 3);
    assert_eq!(summary["exported_formats"].as_array().unwrap().len(), 12);
    assert!(out.join("metadata_exports/xmp_sidecar/beach.jpg.xmp").is_file());
    assert!(out.join("metadata_exports/jellyfin_nfo/clip.nfo").is_file());

    // second run is a no-op
    let (stdout, _, success) = run_ibirecover(tmp.path(), &["extract", out.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("Copied:       0"));
    assert!(stdout.contains("Skipped:      2"));
}

#[tokio::test]
async fn test_export_selected_formats_type_mode_dir() {
    let tmp = setup_device().await;
    let meta = tmp.path().join("meta");
    let (_, stderr, success) = run_ibirecover(
        tmp.path(),
        &[
            "export",
            meta.to_str().unwrap(),
            "--format",
            "digikam_csv",
            "--format",
            "no_such_format",
        ],
    );
    assert!(success, "export failed: {}", stderr);
    let csv = fs::read_to_string(meta.join("digikam_csv.csv")).unwrap();
    assert!(csv.starts_with("Name,Tags,Album,Date,Latitude,Longitude\n"));
    assert!(csv.contains("beach.jpg,beach,Holiday: 2020,,,"));

    let summary: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(meta.join("export_summary.json")).unwrap())
            .unwrap();
    assert_eq!(summary["failed_formats"][0]["format"], "no_such_format");
}

#[test]
fn test_missing_database_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_ibirecover(tmp.path(), &["audit"]);
    assert!(!success);
    assert!(stderr.contains("No database found"));
}
