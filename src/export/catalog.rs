//! Declarative export formats.
//!
//! A format is data: an output kind plus an ordered field list, where each
//! field names its source attributes, an optional tag filter, an optional
//! transform, and a default. [`FormatSpec::compile`] checks every name up
//! front so a broken format fails alone, before anything is written.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::RecoveryError;
use crate::models::MimeCategory;

use super::value::Value;

const BUILTIN_FORMATS: &str = include_str!("formats.json");

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct FormatSpec {
    #[serde(default)]
    pub description: String,
    pub file_extension: String,
    pub output: OutputSpec,
    /// MIME categories this format covers; empty means all.
    #[serde(default)]
    pub applies_to: Vec<String>,
    pub fields: Vec<FieldSpec>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputSpec {
    Delimited {
        #[serde(default = "default_delimiter")]
        delimiter: String,
    },
    Json {
        #[serde(default)]
        layout: JsonLayout,
        #[serde(default)]
        root_key: Option<String>,
    },
    XmlPerFile {
        dialect: XmlDialect,
        #[serde(default)]
        root: Option<String>,
        #[serde(default)]
        naming: Naming,
        /// prefix -> namespace URI, declared on the element holding the fields.
        #[serde(default)]
        namespaces: BTreeMap<String, String>,
    },
}

fn default_delimiter() -> String {
    ",".to_string()
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum JsonLayout {
    #[default]
    Records,
    ByAlbum,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum XmlDialect {
    /// Adobe XMP packet; list values become `rdf:Bag`.
    Xmp,
    /// Media-library NFO; list values repeat their element.
    Nfo,
}

/// How a per-file artifact is named after its record.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Naming {
    /// `IMG_1.jpg` -> `IMG_1.jpg.xmp`
    #[default]
    Append,
    /// `clip.mp4` -> `clip.nfo`
    Replace,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum SourceChain {
    One(String),
    Many(Vec<String>),
}

impl SourceChain {
    fn names(&self) -> Vec<&str> {
        match self {
            SourceChain::One(s) => vec![s.as_str()],
            SourceChain::Many(v) => v.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub source: SourceChain,
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub transform: Option<String>,
    #[serde(default)]
    pub separator: Option<String>,
    #[serde(default)]
    pub max_length: Option<usize>,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
}

/// A record attribute a field can read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    Id,
    ContentId,
    Name,
    Stem,
    Extension,
    MimeType,
    Category,
    Size,
    Description,
    ImageDate,
    VideoDate,
    CTime,
    MTime,
    BirthTime,
    /// Capture, creation, or birth time, whichever comes first.
    Date,
    Width,
    Height,
    CameraMake,
    CameraModel,
    Aperture,
    ExposureTime,
    Iso,
    FocalLength,
    Orientation,
    VideoCodec,
    Duration,
    Latitude,
    Longitude,
    Altitude,
    Gps,
    City,
    Province,
    Country,
    Tags,
    Albums,
    StorageId,
    Source,
    ResolvedPath,
}

impl Attribute {
    pub fn parse(name: &str) -> Option<Self> {
        use Attribute::*;
        Some(match name {
            "id" => Id,
            "content_id" => ContentId,
            "name" => Name,
            "stem" => Stem,
            "extension" => Extension,
            "mime_type" => MimeType,
            "category" => Category,
            "size" => Size,
            "description" => Description,
            "image_date" => ImageDate,
            "video_date" => VideoDate,
            "c_time" => CTime,
            "m_time" => MTime,
            "birth_time" => BirthTime,
            "date" => Date,
            "width" => Width,
            "height" => Height,
            "camera_make" => CameraMake,
            "camera_model" => CameraModel,
            "aperture" => Aperture,
            "exposure_time" => ExposureTime,
            "iso" => Iso,
            "focal_length" => FocalLength,
            "orientation" => Orientation,
            "video_codec" => VideoCodec,
            "duration" => Duration,
            "latitude" => Latitude,
            "longitude" => Longitude,
            "altitude" => Altitude,
            "gps" => Gps,
            "city" => City,
            "province" => Province,
            "country" => Country,
            "tags" => Tags,
            "albums" => Albums,
            "storage_id" => StorageId,
            "source" => Source,
            "resolved_path" => ResolvedPath,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TagFilter {
    #[default]
    All,
    AutoOnly,
    ManualOnly,
}

impl TagFilter {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "all" => Some(TagFilter::All),
            "auto_only" => Some(TagFilter::AutoOnly),
            "manual_only" => Some(TagFilter::ManualOnly),
            _ => None,
        }
    }

    pub fn keeps(&self, auto: bool) -> bool {
        match self {
            TagFilter::All => true,
            TagFilter::AutoOnly => auto,
            TagFilter::ManualOnly => !auto,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Join,
    HierarchicalTags,
    FirstAlbumName,
    AlbumNames,
    TagList,
    IsoDate,
    IsoDatetime,
    IptcDate,
    ExifDatetime,
    ExtractYear,
    UnixSeconds,
    TimestampObject,
    GpsPair,
    GpsObject,
    Truncate,
    FormatSize,
    MimeCategory,
}

impl Transform {
    fn parse(name: &str) -> Option<Self> {
        use Transform::*;
        Some(match name {
            "join" => Join,
            "hierarchical_tags" => HierarchicalTags,
            "first_album_name" => FirstAlbumName,
            "album_names" => AlbumNames,
            "tag_list" => TagList,
            "iso_date" => IsoDate,
            "iso_datetime" => IsoDatetime,
            "iptc_date" => IptcDate,
            "exif_datetime" => ExifDatetime,
            "extract_year" => ExtractYear,
            "unix_seconds" => UnixSeconds,
            "timestamp_object" => TimestampObject,
            "gps_pair" => GpsPair,
            "gps_object" => GpsObject,
            "truncate" => Truncate,
            "format_size" => FormatSize,
            "mime_category" => MimeCategory,
            _ => return None,
        })
    }

    fn default_separator(&self) -> &'static str {
        match self {
            Transform::HierarchicalTags => "|",
            Transform::GpsPair => ",",
            _ => "; ",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompiledField {
    pub name: String,
    pub sources: Vec<Attribute>,
    pub filter: TagFilter,
    pub transform: Option<Transform>,
    pub separator: String,
    pub max_length: Option<usize>,
    pub default: Value,
}

/// A validated format, ready for the interpreter.
#[derive(Debug, Clone)]
pub struct CompiledFormat {
    pub name: String,
    pub description: String,
    pub extension: String,
    pub output: OutputSpec,
    pub applies_to: Vec<MimeCategory>,
    pub fields: Vec<CompiledField>,
}

impl CompiledFormat {
    pub fn applies(&self, category: MimeCategory) -> bool {
        self.applies_to.is_empty() || self.applies_to.contains(&category)
    }

    pub fn is_per_file(&self) -> bool {
        matches!(self.output, OutputSpec::XmlPerFile { .. })
    }
}

impl FormatSpec {
    pub fn compile(&self, name: &str) -> Result<CompiledFormat, RecoveryError> {
        let invalid = |reason: String| RecoveryError::FormatSpecInvalid {
            format: name.to_string(),
            reason,
        };

        if self.fields.is_empty() {
            return Err(invalid("no fields".to_string()));
        }
        let ext = self.file_extension.trim_start_matches('.');
        if ext.is_empty() || ext.contains(|c| c == '/' || c == '\\') {
            return Err(invalid(format!(
                "bad file_extension '{}'",
                self.file_extension
            )));
        }

        match &self.output {
            OutputSpec::Delimited { delimiter } => {
                let mut chars = delimiter.chars();
                let single = matches!((chars.next(), chars.next()), (Some(c), None) if c != '"' && c != '\n');
                if !single {
                    return Err(invalid(format!("delimiter must be one character, got {:?}", delimiter)));
                }
            }
            OutputSpec::XmlPerFile { dialect, root, .. } => {
                if *dialect == XmlDialect::Nfo && root.as_deref().map_or(true, str::is_empty) {
                    return Err(invalid("nfo output needs a root element".to_string()));
                }
            }
            OutputSpec::Json { .. } => {}
        }

        let mut applies_to = Vec::new();
        for cat in &self.applies_to {
            match MimeCategory::parse(cat) {
                Some(c) => applies_to.push(c),
                None => return Err(invalid(format!("unknown category '{}'", cat))),
            }
        }

        let mut fields = Vec::with_capacity(self.fields.len());
        for f in &self.fields {
            if f.name.trim().is_empty() {
                return Err(invalid("field with empty name".to_string()));
            }
            let names = f.source.names();
            if names.is_empty() {
                return Err(invalid(format!("field '{}' has no source", f.name)));
            }
            let mut sources = Vec::with_capacity(names.len());
            for n in names {
                match Attribute::parse(n) {
                    Some(a) => sources.push(a),
                    None => {
                        return Err(invalid(format!(
                            "field '{}' reads unknown attribute '{}'",
                            f.name, n
                        )))
                    }
                }
            }

            let filter = match &f.filter {
                None => TagFilter::All,
                Some(name) => {
                    let filter = TagFilter::parse(name).ok_or_else(|| {
                        invalid(format!("field '{}' uses unknown filter '{}'", f.name, name))
                    })?;
                    if !sources.contains(&Attribute::Tags) {
                        return Err(invalid(format!(
                            "field '{}' filters a source without tags",
                            f.name
                        )));
                    }
                    filter
                }
            };

            let transform = match &f.transform {
                None => None,
                Some(name) => Some(Transform::parse(name).ok_or_else(|| {
                    invalid(format!("field '{}' uses unknown transform '{}'", f.name, name))
                })?),
            };
            if transform == Some(Transform::Truncate) && f.max_length.is_none() {
                return Err(invalid(format!(
                    "field '{}' truncates without max_length",
                    f.name
                )));
            }

            let separator = f.separator.clone().unwrap_or_else(|| {
                transform
                    .map(|t| t.default_separator())
                    .unwrap_or("; ")
                    .to_string()
            });

            fields.push(CompiledField {
                name: f.name.clone(),
                sources,
                filter,
                transform,
                separator,
                max_length: f.max_length,
                default: f.default.as_ref().map(Value::from_json).unwrap_or(Value::Null),
            });
        }

        Ok(CompiledFormat {
            name: name.to_string(),
            description: self.description.clone(),
            extension: ext.to_string(),
            output: self.output.clone(),
            applies_to,
            fields,
        })
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    formats: BTreeMap<String, FormatSpec>,
}

/// Named format specs, built-ins first, then any custom file on top.
#[derive(Debug, Clone)]
pub struct FormatCatalog {
    formats: BTreeMap<String, FormatSpec>,
}

impl FormatCatalog {
    pub fn builtin() -> anyhow::Result<Self> {
        let file: CatalogFile = serde_json::from_str(BUILTIN_FORMATS)?;
        Ok(Self {
            formats: file.formats,
        })
    }

    /// Add or replace formats from a JSON file with a top-level `formats` map.
    pub fn merge_file(&mut self, path: &Path) -> anyhow::Result<usize> {
        use anyhow::Context;
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read formats file: {}", path.display()))?;
        let file: CatalogFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse formats file: {}", path.display()))?;
        let n = file.formats.len();
        self.formats.extend(file.formats);
        Ok(n)
    }

    pub fn insert(&mut self, name: impl Into<String>, spec: FormatSpec) {
        self.formats.insert(name.into(), spec);
    }

    pub fn get(&self, name: &str) -> Option<&FormatSpec> {
        self.formats.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.formats.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FormatSpec)> {
        self.formats.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(fields: serde_json::Value) -> FormatSpec {
        serde_json::from_value(serde_json::json!({
            "file_extension": "csv",
            "output": {"kind": "delimited"},
            "fields": fields
        }))
        .unwrap()
    }

    #[test]
    fn builtin_catalog_compiles() {
        let catalog = FormatCatalog::builtin().unwrap();
        assert_eq!(catalog.names().count(), 12);
        for (name, spec) in catalog.iter() {
            let compiled = spec.compile(name);
            assert!(compiled.is_ok(), "{}: {:?}", name, compiled.err());
        }
    }

    #[test]
    fn unknown_transform_is_invalid() {
        let s = spec(serde_json::json!([
            {"name": "Keywords", "source": "tags", "transform": "rot13"}
        ]));
        let err = s.compile("broken").unwrap_err();
        assert!(matches!(err, RecoveryError::FormatSpecInvalid { ref format, .. } if format == "broken"));
    }

    #[test]
    fn filter_requires_tags_source() {
        let s = spec(serde_json::json!([
            {"name": "Title", "source": "name", "filter": "auto_only"}
        ]));
        assert!(s.compile("x").is_err());

        let s = spec(serde_json::json!([
            {"name": "Keywords", "source": ["tags", "description"], "filter": "auto_only"}
        ]));
        assert!(s.compile("x").is_ok());
    }

    #[test]
    fn unknown_attribute_and_filter_are_invalid() {
        let s = spec(serde_json::json!([{"name": "A", "source": "colour"}]));
        assert!(s.compile("x").is_err());
        let s = spec(serde_json::json!([{"name": "A", "source": "tags", "filter": "some"}]));
        assert!(s.compile("x").is_err());
    }

    #[test]
    fn separators_default_per_transform() {
        let s = spec(serde_json::json!([
            {"name": "A", "source": "tags", "transform": "join"},
            {"name": "B", "source": "tags", "transform": "hierarchical_tags"},
            {"name": "C", "source": "tags", "transform": "join", "separator": ", "}
        ]));
        let c = s.compile("x").unwrap();
        assert_eq!(c.fields[0].separator, "; ");
        assert_eq!(c.fields[1].separator, "|");
        assert_eq!(c.fields[2].separator, ", ");
    }

    #[test]
    fn custom_file_overrides_builtin() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("formats.json");
        std::fs::write(
            &path,
            r#"{"formats": {"lightroom_csv": {"file_extension": "txt", "output": {"kind": "delimited", "delimiter": ";"}, "fields": [{"name": "File", "source": "name"}]},
                            "names_only": {"file_extension": "csv", "output": {"kind": "delimited"}, "fields": [{"name": "File", "source": "name"}]}}}"#,
        )
        .unwrap();
        let mut catalog = FormatCatalog::builtin().unwrap();
        assert_eq!(catalog.merge_file(&path).unwrap(), 2);
        assert_eq!(catalog.names().count(), 13);
        assert_eq!(catalog.get("lightroom_csv").unwrap().file_extension, "txt");
    }
}
