//! TOML configuration.
//!
//! Every section is optional; a missing file section falls back to the
//! defaults below and the CLI may override individual values afterwards.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

/// Where the device data lives. Explicit paths win over detected ones.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourceConfig {
    /// Device root used for layout detection.
    pub root: Option<PathBuf>,
    pub db: Option<PathBuf>,
    pub backup_db: Option<PathBuf>,
    pub files_root: Option<PathBuf>,
    pub user_storage_root: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExtractMode {
    /// One directory per album plus an orphan directory.
    #[default]
    Albums,
    /// `images/`, `videos/`, `documents/`, `other/` buckets.
    Type,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractConfig {
    #[serde(default)]
    pub mode: ExtractMode,
    #[serde(default)]
    pub dedup: bool,
    #[serde(default = "default_true")]
    pub resume: bool,
    #[serde(default = "default_true")]
    pub fix_timestamps: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_orphan_dir")]
    pub orphan_dir: String,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            mode: ExtractMode::Albums,
            dedup: false,
            resume: true,
            fix_timestamps: true,
            max_retries: default_max_retries(),
            orphan_dir: default_orphan_dir(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_max_retries() -> u32 {
    3
}
fn default_orphan_dir() -> String {
    "Unfiled".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExportConfig {
    #[serde(default = "default_export_dir")]
    pub dir: PathBuf,
    /// Format names to run; empty means every known format.
    #[serde(default)]
    pub formats: Vec<String>,
    /// JSON catalog of additional or overriding formats.
    #[serde(default)]
    pub formats_file: Option<PathBuf>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            dir: default_export_dir(),
            formats: Vec::new(),
            formats_file: None,
        }
    }
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("metadata_exports")
}

/// The JSON report always names every unresolved record; these settings
/// only shape the console listing.
#[derive(Debug, Deserialize, Clone)]
pub struct AuditConfig {
    /// List unresolved records on the console.
    #[serde(default = "default_true")]
    pub unresolved_details: bool,
    /// Console listing cap. Unset lists all of them.
    #[serde(default)]
    pub detail_limit: Option<usize>,
    #[serde(default)]
    pub scan_orphans: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            unresolved_details: true,
            detail_limit: None,
            scan_orphans: false,
        }
    }
}


pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.extract.max_retries < 1 {
        anyhow::bail!("extract.max_retries must be >= 1");
    }

    let orphan = config.extract.orphan_dir.trim();
    if orphan.is_empty() || orphan.contains(|c| c == '/' || c == '\\') || orphan == "." || orphan == ".." {
        anyhow::bail!(
            "extract.orphan_dir must be a single directory name, got '{}'",
            config.extract.orphan_dir
        );
    }

    if config.export.dir.as_os_str().is_empty() {
        anyhow::bail!("export.dir must not be empty");
    }

    if let Some(name) = config.export.formats.iter().find(|f| f.trim().is_empty()) {
        anyhow::bail!("export.formats contains an empty name: '{}'", name);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn empty_file_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ibi.toml");
        std::fs::write(&path, "").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.extract.mode, ExtractMode::Albums);
        assert!(config.extract.resume);
        assert!(!config.extract.dedup);
        assert_eq!(config.extract.max_retries, 3);
        assert_eq!(config.extract.orphan_dir, "Unfiled");
        assert_eq!(config.export.dir, PathBuf::from("metadata_exports"));
        assert_eq!(config.audit.detail_limit, None);
    }

    #[test]
    fn parses_sections() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ibi.toml");
        std::fs::write(
            &path,
            r#"
[source]
root = "/mnt/ibi"
backup_db = "/mnt/ibi/restsdk/data/dbBackup/index.db"

[extract]
mode = "type"
dedup = true

[export]
formats = ["xmp_sidecar", "lightroom_csv"]
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.source.root, Some(PathBuf::from("/mnt/ibi")));
        assert_eq!(config.extract.mode, ExtractMode::Type);
        assert!(config.extract.dedup);
        assert_eq!(config.export.formats.len(), 2);
    }

    #[test]
    fn detail_limit_is_optional() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ibi.toml");
        std::fs::write(&path, "[audit]\ndetail_limit = 25\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.audit.detail_limit, Some(25));
        assert!(config.audit.unresolved_details);
    }

    #[test]
    fn rejects_zero_retries() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ibi.toml");
        std::fs::write(&path, "[extract]\nmax_retries = 0\n").unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("max_retries"));
    }

    #[test]
    fn rejects_nested_orphan_dir() {
        let mut config = Config::default();
        config.extract.orphan_dir = "a/b".into();
        assert!(validate(&config).is_err());
    }
}
