//! Output shapes. None of these know about any particular format; they
//! only lay out the values the interpreter produces.

use anyhow::Result;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde_json::{Map, Value as Json};
use std::collections::BTreeMap;

use crate::models::FileRecord;
use crate::naming::{safe_file_name, split_extension};

use super::catalog::{CompiledFormat, JsonLayout, Naming, XmlDialect};
use super::value::Value;

/// One delimited line, quoting only cells that need it.
pub fn delimited_line(cells: &[String], delimiter: char) -> String {
    let mut line = String::new();
    for (i, cell) in cells.iter().enumerate() {
        if i > 0 {
            line.push(delimiter);
        }
        let needs_quotes = cell.contains(delimiter)
            || cell.contains('"')
            || cell.contains('\n')
            || cell.contains('\r');
        if needs_quotes {
            line.push('"');
            line.push_str(&cell.replace('"', "\"\""));
            line.push('"');
        } else {
            line.push_str(cell);
        }
    }
    line.push('\n');
    line
}

pub fn delimited_header(format: &CompiledFormat, delimiter: char) -> String {
    let names: Vec<String> = format.fields.iter().map(|f| f.name.clone()).collect();
    delimited_line(&names, delimiter)
}

pub fn delimited_row(format: &CompiledFormat, record: &FileRecord, delimiter: char) -> String {
    let cells: Vec<String> = format
        .fields
        .iter()
        .map(|f| Value::evaluate(record, f).render_text(&f.separator))
        .collect();
    delimited_line(&cells, delimiter)
}

/// One record as a JSON object, fields in declaration order.
pub fn json_object(format: &CompiledFormat, record: &FileRecord) -> Map<String, Json> {
    let mut obj = Map::new();
    for f in &format.fields {
        obj.insert(f.name.clone(), Value::evaluate(record, f).to_json());
    }
    obj
}

/// Assemble the final document. `objects[i]` belongs to `records[i]`.
pub fn json_document(
    layout: JsonLayout,
    root_key: Option<&str>,
    records: &[&FileRecord],
    objects: Vec<Map<String, Json>>,
) -> Json {
    let doc = match layout {
        JsonLayout::Records => Json::Array(objects.into_iter().map(Json::Object).collect()),
        JsonLayout::ByAlbum => {
            let mut order: Vec<(String, String)> = Vec::new();
            let mut members: BTreeMap<String, Vec<Json>> = BTreeMap::new();
            let mut unfiled = Vec::new();
            for (rec, obj) in records.iter().zip(objects) {
                if rec.albums.is_empty() {
                    unfiled.push(Json::Object(obj));
                    continue;
                }
                for album in &rec.albums {
                    if !members.contains_key(&album.id) {
                        order.push((album.id.clone(), album.name.clone()));
                    }
                    members
                        .entry(album.id.clone())
                        .or_default()
                        .push(Json::Object(obj.clone()));
                }
            }
            let albums: Vec<Json> = order
                .into_iter()
                .map(|(id, name)| {
                    let files = members.remove(&id).unwrap_or_default();
                    serde_json::json!({
                        "id": id,
                        "name": name,
                        "file_count": files.len(),
                        "files": files,
                    })
                })
                .collect();
            serde_json::json!({
                "albums": albums,
                "unfiled": unfiled,
            })
        }
    };
    match root_key {
        Some(key) => {
            let mut wrapper = Map::new();
            wrapper.insert(key.to_string(), doc);
            Json::Object(wrapper)
        }
        None => doc,
    }
}

/// File name of a per-record artifact.
pub fn artifact_name(record: &FileRecord, naming: Naming, extension: &str) -> String {
    let base = safe_file_name(&record.name, &record.content_id);
    match naming {
        Naming::Append => format!("{}.{}", base, extension),
        Naming::Replace => format!("{}.{}", split_extension(&base).0, extension),
    }
}

const XMP_META_NS: &str = "adobe:ns:meta/";
const RDF_NS: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";

/// A per-record XML document in the given dialect. Absent fields are
/// omitted; list values become an `rdf:Bag` (XMP) or a repeated element (NFO).
pub fn xml_document(
    format: &CompiledFormat,
    dialect: XmlDialect,
    root: Option<&str>,
    namespaces: &BTreeMap<String, String>,
    record: &FileRecord,
) -> Result<Vec<u8>> {
    let mut w = Writer::new_with_indent(Vec::new(), b' ', 2);
    w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;

    let values: Vec<(&str, Value, &str)> = format
        .fields
        .iter()
        .map(|f| (f.name.as_str(), Value::evaluate(record, f), f.separator.as_str()))
        .filter(|(_, v, _)| !v.is_absent())
        .collect();

    match dialect {
        XmlDialect::Xmp => {
            let mut meta = BytesStart::new("x:xmpmeta");
            meta.push_attribute(("xmlns:x", XMP_META_NS));
            w.write_event(Event::Start(meta))?;
            let mut rdf = BytesStart::new("rdf:RDF");
            rdf.push_attribute(("xmlns:rdf", RDF_NS));
            w.write_event(Event::Start(rdf))?;

            let mut desc = BytesStart::new("rdf:Description");
            desc.push_attribute(("rdf:about", ""));
            for (prefix, uri) in namespaces {
                let attr = format!("xmlns:{}", prefix);
                desc.push_attribute((attr.as_str(), uri.as_str()));
            }
            w.write_event(Event::Start(desc))?;

            for (name, value, sep) in &values {
                w.write_event(Event::Start(BytesStart::new(*name)))?;
                match value.list_items() {
                    Some(items) => {
                        w.write_event(Event::Start(BytesStart::new("rdf:Bag")))?;
                        for item in items {
                            text_element(&mut w, "rdf:li", &item)?;
                        }
                        w.write_event(Event::End(BytesEnd::new("rdf:Bag")))?;
                    }
                    None => {
                        w.write_event(Event::Text(BytesText::new(&value.render_text(sep))))?;
                    }
                }
                w.write_event(Event::End(BytesEnd::new(*name)))?;
            }

            w.write_event(Event::End(BytesEnd::new("rdf:Description")))?;
            w.write_event(Event::End(BytesEnd::new("rdf:RDF")))?;
            w.write_event(Event::End(BytesEnd::new("x:xmpmeta")))?;
        }
        XmlDialect::Nfo => {
            let root = root.unwrap_or("item");
            let mut start = BytesStart::new(root);
            for (prefix, uri) in namespaces {
                let attr = format!("xmlns:{}", prefix);
                start.push_attribute((attr.as_str(), uri.as_str()));
            }
            w.write_event(Event::Start(start))?;
            for (name, value, sep) in &values {
                match value.list_items() {
                    Some(items) => {
                        for item in items {
                            text_element(&mut w, name, &item)?;
                        }
                    }
                    None => text_element(&mut w, name, &value.render_text(sep))?,
                }
            }
            w.write_event(Event::End(BytesEnd::new(root)))?;
        }
    }

    let mut out = w.into_inner();
    out.push(b'\n');
    Ok(out)
}

fn text_element(w: &mut Writer<Vec<u8>>, name: &str, text: &str) -> Result<()> {
    w.write_event(Event::Start(BytesStart::new(name)))?;
    w.write_event(Event::Text(BytesText::new(text)))?;
    w.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_is_minimal() {
        let cells = vec![
            "plain".to_string(),
            "a,b".to_string(),
            "say \"hi\"".to_string(),
            "two\nlines".to_string(),
        ];
        assert_eq!(
            delimited_line(&cells, ','),
            "plain,\"a,b\",\"say \"\"hi\"\"\",\"two\nlines\"\n"
        );
        assert_eq!(delimited_line(&cells[..2], '\t'), "plain\ta,b\n");
    }

    #[test]
    fn artifact_naming() {
        let rec = FileRecord::new("1", "cid", "clip.final.mp4");
        assert_eq!(artifact_name(&rec, Naming::Append, "xmp"), "clip.final.mp4.xmp");
        assert_eq!(artifact_name(&rec, Naming::Replace, "nfo"), "clip.final.nfo");
    }
}
