//! Canonical in-memory records shared by the resolver, the exporters and
//! the extractor.
//!
//! Everything here is a read-only snapshot of the source databases. The only
//! generated state is [`FileRecord::resolution`], set once by the path resolver.

use serde::Serialize;
use std::cell::OnceCell;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// MIME types the device uses for folder and organizational rows.
pub const DIRECTORY_MIME_TYPES: &[&str] = &[
    "application/x.wd.dir",
    "application/x.directory",
    "inode/directory",
];

pub fn is_directory_mime(mime: &str) -> bool {
    DIRECTORY_MIME_TYPES
        .iter()
        .any(|d| d.eq_ignore_ascii_case(mime.trim()))
}

/// A file tag. Automatic tags come from the device's image classifier,
/// manual ones from the user.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Tag {
    pub value: String,
    pub auto: bool,
}

/// Album membership as seen from a file, in membership-time order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AlbumRef {
    pub id: String,
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ImageMeta {
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub aperture: Option<f64>,
    pub exposure_time: Option<f64>,
    pub iso_speed: Option<i64>,
    pub focal_length: Option<f64>,
    pub orientation: Option<i64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct VideoMeta {
    pub codec: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub duration: Option<f64>,
}

/// A complete GPS fix. Partial coordinates never make it into a record.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct GpsFix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Place {
    pub city: Option<String>,
    pub province: Option<String>,
    pub country: Option<String>,
}

/// Which database a merged record came from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordSource {
    #[default]
    Primary,
    /// Primary metadata, physical path located through the backup's entry.
    BackupPath,
    /// Present only in the backup database.
    BackupOnly,
}

/// Which locate strategy found a file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    LegacyShard,
    UserStorage,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Located {
    pub path: PathBuf,
    pub via: StrategyKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    Found(Located),
    NotFound,
}

impl Resolution {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Resolution::Found(located) => Some(&located.path),
            Resolution::NotFound => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Resolution::Found(_))
    }
}

/// Broad MIME bucket used for type-based layout and statistics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MimeCategory {
    Images,
    Videos,
    Documents,
    Other,
}

impl MimeCategory {
    pub const ALL: [MimeCategory; 4] = [
        MimeCategory::Images,
        MimeCategory::Videos,
        MimeCategory::Documents,
        MimeCategory::Other,
    ];

    pub fn from_mime(mime: &str) -> Self {
        let mime = mime.trim().to_ascii_lowercase();
        if mime.starts_with("image/") {
            MimeCategory::Images
        } else if mime.starts_with("video/") {
            MimeCategory::Videos
        } else if mime.starts_with("application/") || mime.starts_with("text/") {
            MimeCategory::Documents
        } else {
            MimeCategory::Other
        }
    }

    /// Bucket directory name in type-based extraction.
    pub fn dir_name(&self) -> &'static str {
        match self {
            MimeCategory::Images => "images",
            MimeCategory::Videos => "videos",
            MimeCategory::Documents => "documents",
            MimeCategory::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        MimeCategory::ALL
            .into_iter()
            .find(|c| c.dir_name().eq_ignore_ascii_case(s.trim()))
    }
}

/// One recoverable file, independent of the source schema revision.
#[derive(Clone, Debug)]
pub struct FileRecord {
    pub id: String,
    pub content_id: String,
    pub name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    /// Epoch milliseconds.
    pub birth_time: Option<i64>,
    pub c_time: Option<i64>,
    pub m_time: Option<i64>,
    pub image_capture_time: Option<i64>,
    pub video_capture_time: Option<i64>,
    pub storage_id: String,
    pub image: ImageMeta,
    pub video: VideoMeta,
    pub gps: Option<GpsFix>,
    pub place: Place,
    pub description: String,
    pub tags: BTreeSet<Tag>,
    pub albums: Vec<AlbumRef>,
    pub source: RecordSource,
    resolution: OnceCell<Resolution>,
}

impl FileRecord {
    pub fn new(id: impl Into<String>, content_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content_id: content_id.into(),
            name: name.into(),
            mime_type: String::new(),
            size_bytes: 0,
            birth_time: None,
            c_time: None,
            m_time: None,
            image_capture_time: None,
            video_capture_time: None,
            storage_id: String::new(),
            image: ImageMeta::default(),
            video: VideoMeta::default(),
            gps: None,
            place: Place::default(),
            description: String::new(),
            tags: BTreeSet::new(),
            albums: Vec::new(),
            source: RecordSource::Primary,
            resolution: OnceCell::new(),
        }
    }

    /// False for rows that describe folders or carry no content key.
    /// Every consumer checks this before touching a record.
    pub fn is_recoverable(&self) -> bool {
        !self.content_id.trim().is_empty() && !is_directory_mime(&self.mime_type)
    }

    /// Legacy sharded addressing applies to local or unset storage.
    pub fn uses_legacy_storage(&self) -> bool {
        let sid = self.storage_id.trim();
        sid.is_empty() || sid.eq_ignore_ascii_case("local")
    }

    pub fn category(&self) -> MimeCategory {
        MimeCategory::from_mime(&self.mime_type)
    }

    /// Capture time (image, then video), then creation, then birth time.
    pub fn best_timestamp(&self) -> Option<i64> {
        self.image_capture_time
            .or(self.video_capture_time)
            .or(self.c_time)
            .or(self.birth_time)
    }

    pub fn resolution(&self) -> Option<&Resolution> {
        self.resolution.get()
    }

    pub fn resolved_path(&self) -> Option<&Path> {
        self.resolution().and_then(Resolution::path)
    }

    /// Record the resolver's answer. The first answer sticks; later calls
    /// return the stored one.
    pub fn set_resolution(&self, resolution: Resolution) -> &Resolution {
        self.resolution.get_or_init(|| resolution)
    }

    /// The same record with a different resolution; used when merging.
    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = OnceCell::from(resolution);
        self
    }

    pub fn auto_tags(&self) -> impl Iterator<Item = &Tag> {
        self.tags.iter().filter(|t| t.auto)
    }

    pub fn manual_tags(&self) -> impl Iterator<Item = &Tag> {
        self.tags.iter().filter(|t| !t.auto)
    }
}

/// An album (device "file group").
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Album {
    pub id: String,
    pub name: String,
    pub description: String,
    pub estimated_count: Option<i64>,
    pub c_time: Option<i64>,
    pub m_time: Option<i64>,
    /// Weak reference; may name a record that no longer exists.
    pub preview_file_id: Option<String>,
}

/// Maps a `storage_id` to the account whose per-user tree holds its files.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FilesystemMapping {
    pub id: String,
    pub name: String,
    pub path: Option<String>,
}
