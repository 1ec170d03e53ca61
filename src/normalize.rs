//! Raw rows to canonical records.
//!
//! The normalizer never fails a batch. Organizational rows (folders, rows
//! without a content key) are filtered and counted; rows it cannot interpret
//! are skipped and named in the report. Tags and album memberships are
//! indexed once per database in [`MembershipIndex`] and attached by lookup,
//! keeping the whole pass linear in the number of rows.

use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, warn};

use crate::error::RecoveryError;
use crate::models::{
    is_directory_mime, Album, AlbumRef, FileRecord, FilesystemMapping, GpsFix, ImageMeta, Place,
    Tag, VideoMeta,
};
use crate::schema::{RawAlbumRow, RawFileRow, RawFilesystemRow, RawMembershipRow, RawTagRow};
use crate::timestamps::normalize_epoch;

/// Columns without which a row cannot become a record.
const CORE_COLUMNS: &[&str] = &["id", "contentID", "name", "mimeType", "size"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MalformedRow {
    pub id: String,
    pub reason: String,
}

impl From<&MalformedRow> for RecoveryError {
    fn from(row: &MalformedRow) -> Self {
        RecoveryError::MalformedRecord {
            id: row.id.clone(),
            reason: row.reason.clone(),
        }
    }
}

/// What the normalizer saw, for logs and the audit report.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NormalizeReport {
    pub rows: usize,
    pub accepted: usize,
    /// Folder and other non-file rows.
    pub organizational: usize,
    pub malformed: Vec<MalformedRow>,
    /// Records whose GPS coordinates were incomplete and therefore dropped.
    pub partial_gps: usize,
    /// Memberships or tags pointing at a file or album that does not exist.
    pub dangling_memberships: usize,
}

impl NormalizeReport {
    pub fn absorb(&mut self, other: &NormalizeReport) {
        self.rows += other.rows;
        self.accepted += other.accepted;
        self.organizational += other.organizational;
        self.malformed.extend(other.malformed.iter().cloned());
        self.partial_gps += other.partial_gps;
        self.dangling_memberships += other.dangling_memberships;
    }
}

#[derive(Debug, Default)]
pub struct Normalizer {
    report: NormalizeReport,
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Turn one raw row into a record, or count why not.
    pub fn normalize_row(&mut self, raw: RawFileRow) -> Option<FileRecord> {
        self.report.rows += 1;

        let id = match non_empty(raw.id.clone()) {
            Some(id) => id,
            None => {
                self.reject(String::new(), "row has no id".to_string());
                return None;
            }
        };

        if let Some(col) = raw.malformed.iter().find(|c| CORE_COLUMNS.contains(*c)) {
            self.reject(id, format!("unreadable value in column {}", col));
            return None;
        }

        let mime_type = raw.mime_type.clone().unwrap_or_default();
        let content_id = match non_empty(raw.content_id.clone()) {
            Some(cid) if !is_directory_mime(&mime_type) => cid,
            _ => {
                self.report.organizational += 1;
                return None;
            }
        };

        let size_bytes = match raw.size {
            None => 0,
            Some(n) if n >= 0 => n as u64,
            Some(n) => {
                self.reject(id, format!("negative size {}", n));
                return None;
            }
        };

        if !raw.malformed.is_empty() {
            debug!(id = %id, columns = ?raw.malformed, "ignoring unreadable optional columns");
        }

        let name = non_empty(raw.name.clone()).unwrap_or_else(|| content_id.clone());
        let gps = self.gps_of(&raw);

        let mut record = FileRecord::new(id, content_id, name);
        record.mime_type = mime_type;
        record.size_bytes = size_bytes;
        record.birth_time = raw.birth_time.and_then(normalize_epoch);
        record.c_time = raw.c_time.and_then(normalize_epoch);
        record.m_time = raw.m_time.and_then(normalize_epoch);
        record.image_capture_time = raw.image_date.and_then(normalize_epoch);
        record.video_capture_time = raw.video_date.and_then(normalize_epoch);
        record.storage_id = raw.storage_id.clone().unwrap_or_default().trim().to_string();
        record.description = raw.description.clone().unwrap_or_default();
        record.image = ImageMeta {
            width: raw.image_width,
            height: raw.image_height,
            camera_make: non_empty(raw.camera_make.clone()),
            camera_model: non_empty(raw.camera_model.clone()),
            aperture: raw.aperture,
            exposure_time: raw.exposure_time,
            iso_speed: raw.iso_speed,
            focal_length: raw.focal_length,
            orientation: raw.orientation,
        };
        record.video = VideoMeta {
            codec: non_empty(raw.video_codec.clone()),
            width: raw.video_width,
            height: raw.video_height,
            duration: raw.video_duration,
        };
        record.gps = gps;
        record.place = Place {
            city: non_empty(raw.image_city.clone()).or_else(|| non_empty(raw.video_city.clone())),
            province: non_empty(raw.image_province.clone())
                .or_else(|| non_empty(raw.video_province.clone())),
            country: non_empty(raw.image_country.clone())
                .or_else(|| non_empty(raw.video_country.clone())),
        };

        self.report.accepted += 1;
        Some(record)
    }

    /// Image coordinates if complete, else video coordinates if complete.
    fn gps_of(&mut self, raw: &RawFileRow) -> Option<GpsFix> {
        let image = (raw.image_latitude, raw.image_longitude, raw.image_altitude);
        let video = (raw.video_latitude, raw.video_longitude, raw.video_altitude);
        for triple in [image, video] {
            if let (Some(latitude), Some(longitude), Some(altitude)) = triple {
                return Some(GpsFix {
                    latitude,
                    longitude,
                    altitude,
                });
            }
        }
        let any = [image, video]
            .iter()
            .any(|(a, b, c)| a.is_some() || b.is_some() || c.is_some());
        if any {
            self.report.partial_gps += 1;
        }
        None
    }

    fn reject(&mut self, id: String, reason: String) {
        warn!(id = %id, reason = %reason, "skipping malformed row");
        self.report.malformed.push(MalformedRow { id, reason });
    }

    pub fn add_dangling(&mut self, n: usize) {
        self.report.dangling_memberships += n;
    }

    pub fn finish(self) -> NormalizeReport {
        self.report
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

pub fn normalize_album(raw: RawAlbumRow) -> Option<Album> {
    Some(Album {
        id: non_empty(raw.id)?,
        name: raw.name.unwrap_or_default(),
        description: raw.description.unwrap_or_default(),
        estimated_count: raw.est_count,
        c_time: raw.c_time.and_then(normalize_epoch),
        m_time: raw.m_time.and_then(normalize_epoch),
        preview_file_id: non_empty(raw.preview_file_id),
    })
}

pub fn normalize_filesystem(raw: RawFilesystemRow) -> Option<FilesystemMapping> {
    Some(FilesystemMapping {
        id: non_empty(raw.id)?.trim().to_string(),
        name: non_empty(raw.name)?,
        path: non_empty(raw.path),
    })
}

/// Tags and album memberships grouped by file id.
#[derive(Debug, Default)]
pub struct MembershipIndex {
    tags: HashMap<String, BTreeSet<Tag>>,
    albums: HashMap<String, Vec<AlbumRef>>,
    dangling: usize,
}

impl MembershipIndex {
    /// Build the index in one pass over each relation. Rows referring to a
    /// file not in `files` or an album not in `albums` are dropped and counted.
    pub fn build(
        files: &HashSet<String>,
        albums: &HashMap<String, Album>,
        tags: impl IntoIterator<Item = RawTagRow>,
        memberships: impl IntoIterator<Item = RawMembershipRow>,
    ) -> Self {
        let mut index = MembershipIndex::default();

        for raw in tags {
            let (Some(file_id), Some(value)) = (raw.file_id, non_empty(raw.tag)) else {
                index.dangling += 1;
                continue;
            };
            if !files.contains(&file_id) {
                index.dangling += 1;
                continue;
            }
            index.tags.entry(file_id).or_default().insert(Tag {
                value: value.trim().to_string(),
                auto: raw.auto.unwrap_or(0) != 0,
            });
        }

        let mut ordered: HashMap<String, Vec<(Option<i64>, String, String)>> = HashMap::new();
        for raw in memberships {
            let (Some(file_id), Some(group_id)) = (raw.file_id, raw.group_id) else {
                index.dangling += 1;
                continue;
            };
            if !files.contains(&file_id) || !albums.contains_key(&group_id) {
                index.dangling += 1;
                continue;
            }
            ordered.entry(file_id).or_default().push((
                raw.c_time,
                raw.id.unwrap_or_default(),
                group_id,
            ));
        }

        for (file_id, mut entries) in ordered {
            entries.sort_by(|a, b| {
                let ka = (a.0.is_none(), a.0, &a.1);
                let kb = (b.0.is_none(), b.0, &b.1);
                ka.cmp(&kb)
            });
            let mut seen = HashSet::new();
            let refs: Vec<AlbumRef> = entries
                .into_iter()
                .filter(|(_, _, gid)| seen.insert(gid.clone()))
                .filter_map(|(_, _, gid)| {
                    albums.get(&gid).map(|a| AlbumRef {
                        id: a.id.clone(),
                        name: a.name.clone(),
                    })
                })
                .collect();
            index.albums.insert(file_id, refs);
        }

        if index.dangling > 0 {
            debug!(count = index.dangling, "dropped dangling tag or album rows");
        }
        index
    }

    pub fn dangling(&self) -> usize {
        self.dangling
    }

    /// Move this file's tags and albums onto the record.
    pub fn attach(&mut self, record: &mut FileRecord) {
        if let Some(tags) = self.tags.remove(&record.id) {
            record.tags = tags;
        }
        if let Some(albums) = self.albums.remove(&record.id) {
            record.albums = albums;
        }
    }
}
