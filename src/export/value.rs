//! The interpreter's value model: reading attributes off a record, tag
//! filtering, transforms, and rendering as text or JSON.

use chrono::Datelike;
use serde_json::json;

use crate::models::{AlbumRef, FileRecord, GpsFix, MimeCategory, RecordSource, Tag};
use crate::naming::split_extension;
use crate::progress::format_bytes;
use crate::timestamps::to_datetime;

use super::catalog::{Attribute, CompiledField, TagFilter, Transform};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Epoch milliseconds, rendered as an ISO datetime unless transformed.
    Timestamp(i64),
    Gps(GpsFix),
    Tags(Vec<Tag>),
    Albums(Vec<AlbumRef>),
    List(Vec<Value>),
    Object(Vec<(String, Value)>),
}

impl Value {
    pub fn from_json(v: &serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::Text(s.clone()),
            serde_json::Value::Array(a) => Value::List(a.iter().map(Value::from_json).collect()),
            serde_json::Value::Object(o) => Value::Object(
                o.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Absent for fallback purposes: null, blank text, or an empty collection.
    pub fn is_absent(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.trim().is_empty(),
            Value::Float(f) => !f.is_finite(),
            Value::Tags(t) => t.is_empty(),
            Value::Albums(a) => a.is_empty(),
            Value::List(l) => l.is_empty(),
            Value::Object(o) => o.is_empty(),
            _ => false,
        }
    }

    fn text_opt(s: &Option<String>) -> Value {
        s.clone().map(Value::Text).unwrap_or(Value::Null)
    }

    fn int_opt(n: Option<i64>) -> Value {
        n.map(Value::Int).unwrap_or(Value::Null)
    }

    fn float_opt(n: Option<f64>) -> Value {
        n.map(Value::Float).unwrap_or(Value::Null)
    }

    fn ts_opt(n: Option<i64>) -> Value {
        n.map(Value::Timestamp).unwrap_or(Value::Null)
    }

    /// Read one attribute from a record.
    pub fn read(record: &FileRecord, attr: Attribute) -> Value {
        use Attribute as A;
        match attr {
            A::Id => Value::Text(record.id.clone()),
            A::ContentId => Value::Text(record.content_id.clone()),
            A::Name => Value::Text(record.name.clone()),
            A::Stem => Value::Text(split_extension(&record.name).0.to_string()),
            A::Extension => {
                let ext = split_extension(&record.name).1.trim_start_matches('.');
                if ext.is_empty() {
                    Value::Null
                } else {
                    Value::Text(ext.to_string())
                }
            }
            A::MimeType => Value::Text(record.mime_type.clone()),
            A::Category => Value::Text(record.category().dir_name().to_string()),
            A::Size => Value::Int(record.size_bytes as i64),
            A::Description => Value::Text(record.description.clone()),
            A::ImageDate => Value::ts_opt(record.image_capture_time),
            A::VideoDate => Value::ts_opt(record.video_capture_time),
            A::CTime => Value::ts_opt(record.c_time),
            A::MTime => Value::ts_opt(record.m_time),
            A::BirthTime => Value::ts_opt(record.birth_time),
            A::Date => Value::ts_opt(record.best_timestamp()),
            A::Width => Value::int_opt(record.image.width.or(record.video.width)),
            A::Height => Value::int_opt(record.image.height.or(record.video.height)),
            A::CameraMake => Value::text_opt(&record.image.camera_make),
            A::CameraModel => Value::text_opt(&record.image.camera_model),
            A::Aperture => Value::float_opt(record.image.aperture),
            A::ExposureTime => Value::float_opt(record.image.exposure_time),
            A::Iso => Value::int_opt(record.image.iso_speed),
            A::FocalLength => Value::float_opt(record.image.focal_length),
            A::Orientation => Value::int_opt(record.image.orientation),
            A::VideoCodec => Value::text_opt(&record.video.codec),
            A::Duration => Value::float_opt(record.video.duration),
            A::Latitude => Value::float_opt(record.gps.map(|g| g.latitude)),
            A::Longitude => Value::float_opt(record.gps.map(|g| g.longitude)),
            A::Altitude => Value::float_opt(record.gps.map(|g| g.altitude)),
            A::Gps => record.gps.map(Value::Gps).unwrap_or(Value::Null),
            A::City => Value::text_opt(&record.place.city),
            A::Province => Value::text_opt(&record.place.province),
            A::Country => Value::text_opt(&record.place.country),
            A::Tags => Value::Tags(record.tags.iter().cloned().collect()),
            A::Albums => Value::Albums(record.albums.clone()),
            A::StorageId => Value::Text(record.storage_id.clone()),
            A::Source => Value::Text(
                match record.source {
                    RecordSource::Primary => "primary",
                    RecordSource::BackupPath => "backup_path",
                    RecordSource::BackupOnly => "backup_only",
                }
                .to_string(),
            ),
            A::ResolvedPath => record
                .resolved_path()
                .map(|p| Value::Text(p.display().to_string()))
                .unwrap_or(Value::Null),
        }
    }

    /// Evaluate a field against a record: first present source after the
    /// tag filter, then the transform, then the length cap, then the default.
    pub fn evaluate(record: &FileRecord, field: &CompiledField) -> Value {
        let mut picked = Value::Null;
        for attr in &field.sources {
            let v = match Value::read(record, *attr) {
                Value::Tags(tags) => Value::Tags(filter_tags(tags, field.filter)),
                other => other,
            };
            if !v.is_absent() {
                picked = v;
                break;
            }
        }

        let mut out = match field.transform {
            Some(t) if !picked.is_absent() => apply(t, picked, &field.separator),
            _ => picked,
        };

        if let Some(max) = field.max_length {
            if let Value::Text(s) = &out {
                if s.chars().count() > max {
                    out = Value::Text(s.chars().take(max).collect());
                }
            }
        }

        if out.is_absent() && field.default != Value::Null {
            field.default.clone()
        } else {
            out
        }
    }

    /// Flat text, as used in delimited rows and XML elements.
    pub fn render_text(&self, separator: &str) -> String {
        match self {
            Value::Null => String::new(),
            Value::Text(s) => s.clone(),
            Value::Int(n) => n.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Bool(b) => b.to_string(),
            Value::Timestamp(ms) => format_ts(*ms, "%Y-%m-%dT%H:%M:%S"),
            Value::Gps(g) => format!("{},{}", format_float(g.latitude), format_float(g.longitude)),
            Value::Tags(tags) => unique_values(tags).join(separator),
            Value::Albums(albums) => albums
                .iter()
                .map(|a| a.name.as_str())
                .collect::<Vec<_>>()
                .join(separator),
            Value::List(items) => items
                .iter()
                .map(|v| v.render_text(separator))
                .collect::<Vec<_>>()
                .join(separator),
            Value::Object(_) => self.to_json().to_string(),
        }
    }

    /// Items for list-shaped XML output (`rdf:Bag`, repeated NFO tags).
    pub fn list_items(&self) -> Option<Vec<String>> {
        match self {
            Value::Tags(tags) => Some(unique_values(tags)),
            Value::Albums(albums) => Some(albums.iter().map(|a| a.name.clone()).collect()),
            Value::List(items) => Some(items.iter().map(|v| v.render_text(", ")).collect()),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Text(s) => json!(s),
            Value::Int(n) => json!(n),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Bool(b) => json!(b),
            Value::Timestamp(ms) => json!(format_ts(*ms, "%Y-%m-%dT%H:%M:%SZ")),
            Value::Gps(g) => json!({
                "latitude": g.latitude,
                "longitude": g.longitude,
                "altitude": g.altitude,
            }),
            Value::Tags(tags) => json!(unique_values(tags)),
            Value::Albums(albums) => {
                json!(albums.iter().map(|a| a.name.as_str()).collect::<Vec<_>>())
            }
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

fn filter_tags(tags: Vec<Tag>, filter: TagFilter) -> Vec<Tag> {
    tags.into_iter().filter(|t| filter.keeps(t.auto)).collect()
}

/// Tag values in order, without repeating a value that is both automatic
/// and manual.
fn unique_values(tags: &[Tag]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for t in tags {
        if !out.iter().any(|v| v == &t.value) {
            out.push(t.value.clone());
        }
    }
    out
}

fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{:.1}", f)
    } else {
        f.to_string()
    }
}

fn format_ts(ms: i64, fmt: &str) -> String {
    to_datetime(ms)
        .map(|dt| dt.format(fmt).to_string())
        .unwrap_or_default()
}

fn apply(t: Transform, v: Value, separator: &str) -> Value {
    match (t, v) {
        (Transform::Join, v) => Value::Text(v.render_text(separator)),
        // Tags carry no parent of their own; each is its own path.
        (Transform::HierarchicalTags, Value::Tags(tags)) => {
            Value::Text(unique_values(&tags).join(separator))
        }
        (Transform::FirstAlbumName, Value::Albums(albums)) => albums
            .into_iter()
            .next()
            .map(|a| Value::Text(a.name))
            .unwrap_or(Value::Null),
        (Transform::AlbumNames, Value::Albums(albums)) => {
            Value::List(albums.into_iter().map(|a| Value::Text(a.name)).collect())
        }
        (Transform::TagList, Value::Tags(tags)) => {
            Value::List(unique_values(&tags).into_iter().map(Value::Text).collect())
        }
        (Transform::IsoDate, Value::Timestamp(ms)) => Value::Text(format_ts(ms, "%Y-%m-%d")),
        (Transform::IsoDatetime, Value::Timestamp(ms)) => {
            Value::Text(format_ts(ms, "%Y-%m-%dT%H:%M:%S"))
        }
        (Transform::IptcDate, Value::Timestamp(ms)) => Value::Text(format_ts(ms, "%Y%m%d")),
        (Transform::ExifDatetime, Value::Timestamp(ms)) => {
            Value::Text(format_ts(ms, "%Y:%m:%d %H:%M:%S"))
        }
        (Transform::ExtractYear, Value::Timestamp(ms)) => to_datetime(ms)
            .map(|dt| Value::Int(dt.year() as i64))
            .unwrap_or(Value::Null),
        (Transform::UnixSeconds, Value::Timestamp(ms)) => Value::Int(ms.div_euclid(1000)),
        (Transform::TimestampObject, Value::Timestamp(ms)) => Value::Object(vec![
            (
                "timestamp".to_string(),
                Value::Text(ms.div_euclid(1000).to_string()),
            ),
            (
                "formatted".to_string(),
                Value::Text(format_ts(ms, "%b %-d, %Y, %-I:%M:%S %p UTC")),
            ),
        ]),
        (Transform::GpsPair, Value::Gps(g)) => Value::Text(format!(
            "{}{}{}",
            format_float(g.latitude),
            separator,
            format_float(g.longitude)
        )),
        (Transform::GpsObject, Value::Gps(g)) => Value::Object(vec![
            ("latitude".to_string(), Value::Float(g.latitude)),
            ("longitude".to_string(), Value::Float(g.longitude)),
            ("altitude".to_string(), Value::Float(g.altitude)),
        ]),
        // Length is capped by the caller once max_length is known.
        (Transform::Truncate, v) => Value::Text(v.render_text(separator)),
        (Transform::FormatSize, Value::Int(n)) if n >= 0 => Value::Text(format_bytes(n as u64)),
        (Transform::MimeCategory, Value::Text(mime)) => {
            Value::Text(MimeCategory::from_mime(&mime).dir_name().to_string())
        }
        // A transform that does not fit the value leaves it alone.
        (_, v) => v,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::catalog::FormatSpec;

    fn field(json: serde_json::Value) -> CompiledField {
        let spec: FormatSpec = serde_json::from_value(serde_json::json!({
            "file_extension": "csv",
            "output": {"kind": "delimited"},
            "fields": [json]
        }))
        .unwrap();
        spec.compile("t").unwrap().fields.remove(0)
    }

    fn tagged() -> FileRecord {
        let mut r = FileRecord::new("1", "abc", "IMG_1.jpg");
        r.mime_type = "image/jpeg".into();
        r.tags.insert(Tag {
            value: "person".into(),
            auto: true,
        });
        r.tags.insert(Tag {
            value: "custom".into(),
            auto: false,
        });
        r
    }

    #[test]
    fn auto_only_join_excludes_manual_tags() {
        let f = field(serde_json::json!({
            "name": "Keywords", "source": "tags", "filter": "auto_only",
            "transform": "join", "separator": ";"
        }));
        assert_eq!(Value::evaluate(&tagged(), &f), Value::Text("person".into()));
    }

    #[test]
    fn join_round_trips_to_the_tag_set() {
        let mut r = tagged();
        for t in ["dog", "beach", "sunset"] {
            r.tags.insert(Tag {
                value: t.into(),
                auto: true,
            });
        }
        let f = field(serde_json::json!({
            "name": "Keywords", "source": "tags", "filter": "auto_only",
            "transform": "join", "separator": ";"
        }));
        let text = Value::evaluate(&r, &f).render_text(";");
        let back: std::collections::BTreeSet<&str> = text.split(';').collect();
        let expected: std::collections::BTreeSet<&str> =
            r.auto_tags().map(|t| t.value.as_str()).collect();
        assert_eq!(back, expected);
    }

    #[test]
    fn source_chain_falls_back_then_defaults() {
        let mut r = tagged();
        r.video_capture_time = Some(1_609_459_200_000);
        let f = field(serde_json::json!({
            "name": "Date", "source": ["image_date", "video_date", "c_time"],
            "transform": "iso_date"
        }));
        assert_eq!(Value::evaluate(&r, &f), Value::Text("2021-01-01".into()));

        let f = field(serde_json::json!({
            "name": "Camera", "source": ["camera_model", "camera_make"], "default": "unknown"
        }));
        assert_eq!(Value::evaluate(&r, &f), Value::Text("unknown".into()));
    }

    #[test]
    fn date_encodings() {
        let mut r = tagged();
        // 2021-03-04T05:06:07Z
        r.image_capture_time = Some(1_614_834_367_000);
        let eval = |t: &str| {
            let f = field(serde_json::json!({"name": "D", "source": "image_date", "transform": t}));
            Value::evaluate(&r, &f)
        };
        assert_eq!(eval("iso_date"), Value::Text("2021-03-04".into()));
        assert_eq!(eval("iso_datetime"), Value::Text("2021-03-04T05:06:07".into()));
        assert_eq!(eval("iptc_date"), Value::Text("20210304".into()));
        assert_eq!(eval("exif_datetime"), Value::Text("2021:03:04 05:06:07".into()));
        assert_eq!(eval("extract_year"), Value::Int(2021));
        assert_eq!(eval("unix_seconds"), Value::Int(1_614_834_367));
    }

    #[test]
    fn gps_pair_and_first_album() {
        let mut r = tagged();
        r.gps = Some(GpsFix {
            latitude: 47.6062,
            longitude: -122.3321,
            altitude: 56.0,
        });
        r.albums = vec![
            AlbumRef {
                id: "g1".into(),
                name: "Seattle".into(),
            },
            AlbumRef {
                id: "g2".into(),
                name: "Trips".into(),
            },
        ];
        let gps = field(serde_json::json!({"name": "GPS", "source": "gps", "transform": "gps_pair"}));
        assert_eq!(Value::evaluate(&r, &gps), Value::Text("47.6062,-122.3321".into()));

        let album = field(serde_json::json!({"name": "Album", "source": "albums", "transform": "first_album_name"}));
        assert_eq!(Value::evaluate(&r, &album), Value::Text("Seattle".into()));
    }

    #[test]
    fn hierarchy_and_truncation() {
        let mut r = tagged();
        r.tags.insert(Tag {
            value: "beach".into(),
            auto: true,
        });
        r.tags.insert(Tag {
            value: "sunset".into(),
            auto: false,
        });
        let f = field(serde_json::json!({
            "name": "Tags", "source": "tags", "filter": "auto_only", "transform": "hierarchical_tags"
        }));
        assert_eq!(
            Value::evaluate(&r, &f),
            Value::Text("beach|person".into())
        );

        r.description = "a long caption".into();
        let f = field(serde_json::json!({
            "name": "Caption", "source": "description", "transform": "truncate", "max_length": 6
        }));
        assert_eq!(Value::evaluate(&r, &f), Value::Text("a long".into()));
    }

    #[test]
    fn json_rendering() {
        assert_eq!(Value::Float(f64::NAN).to_json(), serde_json::Value::Null);
        assert_eq!(
            Value::Timestamp(1_609_459_200_000).to_json(),
            serde_json::json!("2021-01-01T00:00:00Z")
        );
        let tags = Value::Tags(tagged().tags.into_iter().collect());
        assert_eq!(tags.to_json(), serde_json::json!(["custom", "person"]));
    }
}
