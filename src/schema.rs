//! Typed, restartable row streams over a device database.
//!
//! Column lists are decided once at open time from `PRAGMA table_info`:
//! a column the firmware did not have is selected as `NULL` so the matching
//! field comes out as `None`. Auxiliary tables that are missing entirely
//! produce empty streams. Each `iterate_*` call runs a fresh query, so a
//! stream can be consumed again from the start at any time.
//!
//! Decoding is lenient in the way SQLite's dynamic typing demands: an
//! integer column holding a real or a numeric string is still read, and a
//! value that cannot be interpreted at all is reported in the row's
//! `malformed` list instead of failing the stream.

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::db;
use crate::error::RecoveryError;

const FILES_COLUMNS: &[&str] = &[
    "id",
    "contentID",
    "name",
    "mimeType",
    "size",
    "birthTime",
    "cTime",
    "mTime",
    "storageID",
    "description",
    "imageDate",
    "videoDate",
    "imageWidth",
    "imageHeight",
    "imageCameraMake",
    "imageCameraModel",
    "imageAperture",
    "imageExposureTime",
    "imageISOSpeed",
    "imageFocalLength",
    "imageOrientation",
    "imageLatitude",
    "imageLongitude",
    "imageAltitude",
    "imageCity",
    "imageProvince",
    "imageCountry",
    "videoCodec",
    "videoWidth",
    "videoHeight",
    "videoDuration",
    "videoLatitude",
    "videoLongitude",
    "videoAltitude",
    "videoCity",
    "videoProvince",
    "videoCountry",
];

const TAGS_COLUMNS: &[&str] = &["fileID", "tag", "auto"];
const ALBUM_COLUMNS: &[&str] = &[
    "id",
    "name",
    "description",
    "estCount",
    "cTime",
    "mTime",
    "previewFileID",
];
const MEMBERSHIP_COLUMNS: &[&str] = &["id", "fileID", "fileGroupID", "cTime"];
const FILESYSTEM_COLUMNS: &[&str] = &["id", "name", "path"];

/// A `Files` row as stored, before any interpretation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFileRow {
    pub id: Option<String>,
    pub content_id: Option<String>,
    pub name: Option<String>,
    pub mime_type: Option<String>,
    pub size: Option<i64>,
    pub birth_time: Option<i64>,
    pub c_time: Option<i64>,
    pub m_time: Option<i64>,
    pub storage_id: Option<String>,
    pub description: Option<String>,
    pub image_date: Option<i64>,
    pub video_date: Option<i64>,
    pub image_width: Option<i64>,
    pub image_height: Option<i64>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub aperture: Option<f64>,
    pub exposure_time: Option<f64>,
    pub iso_speed: Option<i64>,
    pub focal_length: Option<f64>,
    pub orientation: Option<i64>,
    pub image_latitude: Option<f64>,
    pub image_longitude: Option<f64>,
    pub image_altitude: Option<f64>,
    pub image_city: Option<String>,
    pub image_province: Option<String>,
    pub image_country: Option<String>,
    pub video_codec: Option<String>,
    pub video_width: Option<i64>,
    pub video_height: Option<i64>,
    pub video_duration: Option<f64>,
    pub video_latitude: Option<f64>,
    pub video_longitude: Option<f64>,
    pub video_altitude: Option<f64>,
    pub video_city: Option<String>,
    pub video_province: Option<String>,
    pub video_country: Option<String>,
    /// Columns whose stored value could not be decoded.
    pub malformed: Vec<&'static str>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTagRow {
    pub file_id: Option<String>,
    pub tag: Option<String>,
    pub auto: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawAlbumRow {
    pub id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub est_count: Option<i64>,
    pub c_time: Option<i64>,
    pub m_time: Option<i64>,
    pub preview_file_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawMembershipRow {
    pub id: Option<String>,
    pub file_id: Option<String>,
    pub group_id: Option<String>,
    pub c_time: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFilesystemRow {
    pub id: Option<String>,
    pub name: Option<String>,
    pub path: Option<String>,
}

pub struct SchemaReader {
    pool: SqlitePool,
    path: PathBuf,
    files_sql: String,
    tags_sql: Option<String>,
    albums_sql: Option<String>,
    memberships_sql: Option<String>,
    filesystems_sql: Option<String>,
}

impl SchemaReader {
    /// Open `path` read-only and plan one query per table.
    pub async fn open(path: &Path) -> Result<Self, RecoveryError> {
        let pool = db::open_readonly(path).await?;
        let unavailable = |e: sqlx::Error| RecoveryError::DatabaseUnavailable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };

        let tables = db::list_tables(&pool).await.map_err(unavailable)?;

        let files_sql = plan_select(&pool, "Files", FILES_COLUMNS)
            .await
            .map_err(unavailable)?;

        let mut aux = Vec::with_capacity(4);
        for (table, columns) in [
            ("FilesTags", TAGS_COLUMNS),
            ("FileGroups", ALBUM_COLUMNS),
            ("FileGroupFiles", MEMBERSHIP_COLUMNS),
            ("Filesystems", FILESYSTEM_COLUMNS),
        ] {
            if tables.contains(table) {
                aux.push(Some(
                    plan_select(&pool, table, columns)
                        .await
                        .map_err(unavailable)?,
                ));
            } else {
                warn!(db = %path.display(), table, "table missing, treating as empty");
                aux.push(None);
            }
        }
        let mut aux = aux.into_iter();

        Ok(Self {
            pool,
            path: path.to_path_buf(),
            files_sql,
            tags_sql: aux.next().flatten(),
            albums_sql: aux.next().flatten(),
            memberships_sql: aux.next().flatten(),
            filesystems_sql: aux.next().flatten(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn iterate_files(&self) -> BoxStream<'_, sqlx::Result<RawFileRow>> {
        sqlx::query(&self.files_sql)
            .fetch(&self.pool)
            .map_ok(|row| RawFileRow::decode(&row))
            .boxed()
    }

    /// Tags of the given files. The whole table is read in one pass and
    /// filtered in memory, so the cost stays linear in the table size no
    /// matter how many ids are asked for.
    pub fn iterate_tags_for<'a>(
        &'a self,
        file_ids: &'a HashSet<String>,
    ) -> BoxStream<'a, sqlx::Result<RawTagRow>> {
        match &self.tags_sql {
            Some(sql) => sqlx::query(sql)
                .fetch(&self.pool)
                .map_ok(|row| RawTagRow::decode(&row))
                .try_filter(move |tag| {
                    let wanted = tag
                        .file_id
                        .as_ref()
                        .is_some_and(|id| file_ids.contains(id));
                    futures::future::ready(wanted)
                })
                .boxed(),
            None => stream::empty().boxed(),
        }
    }

    pub fn iterate_albums(&self) -> BoxStream<'_, sqlx::Result<RawAlbumRow>> {
        match &self.albums_sql {
            Some(sql) => sqlx::query(sql)
                .fetch(&self.pool)
                .map_ok(|row| RawAlbumRow::decode(&row))
                .boxed(),
            None => stream::empty().boxed(),
        }
    }

    pub fn iterate_album_memberships(&self) -> BoxStream<'_, sqlx::Result<RawMembershipRow>> {
        match &self.memberships_sql {
            Some(sql) => sqlx::query(sql)
                .fetch(&self.pool)
                .map_ok(|row| RawMembershipRow::decode(&row))
                .boxed(),
            None => stream::empty().boxed(),
        }
    }

    pub fn iterate_filesystems(&self) -> BoxStream<'_, sqlx::Result<RawFilesystemRow>> {
        match &self.filesystems_sql {
            Some(sql) => sqlx::query(sql)
                .fetch(&self.pool)
                .map_ok(|row| RawFilesystemRow::decode(&row))
                .boxed(),
            None => stream::empty().boxed(),
        }
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

/// `SELECT "a", NULL AS "b", ... FROM "table"` with `NULL` for every
/// column the table lacks.
async fn plan_select(pool: &SqlitePool, table: &str, wanted: &[&str]) -> sqlx::Result<String> {
    let present = db::table_columns(pool, table).await?;
    let mut missing = Vec::new();
    let list: Vec<String> = wanted
        .iter()
        .map(|col| {
            if present.contains(*col) {
                format!("\"{}\"", col)
            } else {
                missing.push(*col);
                format!("NULL AS \"{}\"", col)
            }
        })
        .collect();
    if !missing.is_empty() {
        debug!(table, ?missing, "columns absent, selecting NULL");
    }
    Ok(format!("SELECT {} FROM \"{}\"", list.join(", "), table))
}

fn text(row: &SqliteRow, col: &'static str, bad: &mut Vec<&'static str>) -> Option<String> {
    if let Ok(v) = row.try_get::<Option<String>, _>(col) {
        return v;
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(col) {
        return v.map(|n| n.to_string());
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(col) {
        return v.map(|n| n.to_string());
    }
    bad.push(col);
    None
}

fn integer(row: &SqliteRow, col: &'static str, bad: &mut Vec<&'static str>) -> Option<i64> {
    if let Ok(v) = row.try_get::<Option<i64>, _>(col) {
        return v;
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(col) {
        return v.filter(|f| f.is_finite()).map(|f| f.trunc() as i64);
    }
    match row.try_get::<Option<String>, _>(col) {
        Ok(None) => None,
        Ok(Some(s)) if s.trim().is_empty() => None,
        Ok(Some(s)) => {
            let s = s.trim();
            match s.parse::<i64>() {
                Ok(n) => Some(n),
                Err(_) => match s.parse::<f64>() {
                    Ok(f) if f.is_finite() => Some(f.trunc() as i64),
                    _ => {
                        bad.push(col);
                        None
                    }
                },
            }
        }
        Err(_) => {
            bad.push(col);
            None
        }
    }
}

fn real(row: &SqliteRow, col: &'static str, bad: &mut Vec<&'static str>) -> Option<f64> {
    if let Ok(v) = row.try_get::<Option<f64>, _>(col) {
        return v.filter(|f| f.is_finite());
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(col) {
        return v.map(|n| n as f64);
    }
    match row.try_get::<Option<String>, _>(col) {
        Ok(None) => None,
        Ok(Some(s)) if s.trim().is_empty() => None,
        Ok(Some(s)) => match s.trim().parse::<f64>() {
            Ok(f) if f.is_finite() => Some(f),
            _ => {
                bad.push(col);
                None
            }
        },
        Err(_) => {
            bad.push(col);
            None
        }
    }
}

impl RawFileRow {
    fn decode(row: &SqliteRow) -> Self {
        let mut bad = Vec::new();
        let b = &mut bad;
        let mut out = RawFileRow {
            id: text(row, "id", b),
            content_id: text(row, "contentID", b),
            name: text(row, "name", b),
            mime_type: text(row, "mimeType", b),
            size: integer(row, "size", b),
            birth_time: integer(row, "birthTime", b),
            c_time: integer(row, "cTime", b),
            m_time: integer(row, "mTime", b),
            storage_id: text(row, "storageID", b),
            description: text(row, "description", b),
            image_date: integer(row, "imageDate", b),
            video_date: integer(row, "videoDate", b),
            image_width: integer(row, "imageWidth", b),
            image_height: integer(row, "imageHeight", b),
            camera_make: text(row, "imageCameraMake", b),
            camera_model: text(row, "imageCameraModel", b),
            aperture: real(row, "imageAperture", b),
            exposure_time: real(row, "imageExposureTime", b),
            iso_speed: integer(row, "imageISOSpeed", b),
            focal_length: real(row, "imageFocalLength", b),
            orientation: integer(row, "imageOrientation", b),
            image_latitude: real(row, "imageLatitude", b),
            image_longitude: real(row, "imageLongitude", b),
            image_altitude: real(row, "imageAltitude", b),
            image_city: text(row, "imageCity", b),
            image_province: text(row, "imageProvince", b),
            image_country: text(row, "imageCountry", b),
            video_codec: text(row, "videoCodec", b),
            video_width: integer(row, "videoWidth", b),
            video_height: integer(row, "videoHeight", b),
            video_duration: real(row, "videoDuration", b),
            video_latitude: real(row, "videoLatitude", b),
            video_longitude: real(row, "videoLongitude", b),
            video_altitude: real(row, "videoAltitude", b),
            video_city: text(row, "videoCity", b),
            video_province: text(row, "videoProvince", b),
            video_country: text(row, "videoCountry", b),
            malformed: Vec::new(),
        };
        out.malformed = bad;
        out
    }
}

impl RawTagRow {
    fn decode(row: &SqliteRow) -> Self {
        let mut bad = Vec::new();
        Self {
            file_id: text(row, "fileID", &mut bad),
            tag: text(row, "tag", &mut bad),
            auto: integer(row, "auto", &mut bad),
        }
    }
}

impl RawAlbumRow {
    fn decode(row: &SqliteRow) -> Self {
        let mut bad = Vec::new();
        let b = &mut bad;
        Self {
            id: text(row, "id", b),
            name: text(row, "name", b),
            description: text(row, "description", b),
            est_count: integer(row, "estCount", b),
            c_time: integer(row, "cTime", b),
            m_time: integer(row, "mTime", b),
            preview_file_id: text(row, "previewFileID", b),
        }
    }
}

impl RawMembershipRow {
    fn decode(row: &SqliteRow) -> Self {
        let mut bad = Vec::new();
        let b = &mut bad;
        Self {
            id: text(row, "id", b),
            file_id: text(row, "fileID", b),
            group_id: text(row, "fileGroupID", b),
            c_time: integer(row, "cTime", b),
        }
    }
}

impl RawFilesystemRow {
    fn decode(row: &SqliteRow) -> Self {
        let mut bad = Vec::new();
        let b = &mut bad;
        Self {
            id: text(row, "id", b),
            name: text(row, "name", b),
            path: text(row, "path", b),
        }
    }
}
