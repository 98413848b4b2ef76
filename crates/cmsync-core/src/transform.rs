//! Pure record transforms: CSV text and GeoJSON feature collections.
//!
//! Records are ordered JSON objects, so "first seen" column order falls
//! out of iteration order. Nothing here performs I/O.

use std::io;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::ser::Formatter;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::{info, warn};

use cmsync_api::Record;

/// GeoJSON geometry types accepted verbatim from a geometry field.
const GEOMETRY_TYPES: &[&str] = &[
    "Point",
    "LineString",
    "Polygon",
    "MultiPoint",
    "MultiLineString",
    "MultiPolygon",
    "GeometryCollection",
];

const LATITUDE_KEYS: &[&str] = &["lat", "latitude"];
const LONGITUDE_KEYS: &[&str] = &["lng", "lon", "longitude"];

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("CSV encoding failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("CSV output is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("GeoJSON encoding failed: {0}")]
    GeoJson(#[from] serde_json::Error),
}

// ── Field rules ──────────────────────────────────────────────────────

/// Drop excluded fields, then rename the rest per `renames`.
pub fn apply_field_mappings(
    record: &Record,
    renames: &IndexMap<String, String>,
    exclude: &[String],
) -> Record {
    record
        .iter()
        .filter(|(key, _)| !exclude.iter().any(|e| e == *key))
        .map(|(key, value)| {
            let key = renames.get(key).unwrap_or(key);
            (key.clone(), value.clone())
        })
        .collect()
}

/// Render a value as a CSV cell.
pub fn flatten_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => nested_json(value),
    }
}

/// Single-line JSON with a space after every `,` and `:`, e.g.
/// `{"k": [1, 2]}`. Non-ASCII text is kept as is.
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

/// Text form of an array or object inside a CSV cell or a GeoJSON
/// property.
fn nested_json(value: &Value) -> String {
    let mut out = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, SpacedFormatter);
    if value.serialize(&mut serializer).is_err() {
        return value.to_string();
    }
    String::from_utf8(out).unwrap_or_else(|_| value.to_string())
}

// ── CSV ──────────────────────────────────────────────────────────────

/// Convert records to CSV. Columns appear in the order field names are
/// first encountered; missing cells are empty. Empty input yields "".
pub fn json_to_csv(
    records: &[Record],
    renames: &IndexMap<String, String>,
    exclude: &[String],
) -> Result<String, TransformError> {
    if records.is_empty() {
        warn!("no records to transform to CSV");
        return Ok(String::new());
    }

    let rows: Vec<IndexMap<String, String>> = records
        .iter()
        .map(|record| {
            apply_field_mappings(record, renames, exclude)
                .iter()
                .map(|(k, v)| (k.clone(), flatten_value(v)))
                .collect()
        })
        .collect();

    let columns: IndexSet<&str> = rows
        .iter()
        .flat_map(|row| row.keys().map(String::as_str))
        .collect();

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&columns)?;
    for row in &rows {
        writer.write_record(
            columns
                .iter()
                .map(|col| row.get(*col).map_or("", String::as_str)),
        )?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))?;

    info!(
        records = rows.len(),
        columns = columns.len(),
        "transformed records to CSV"
    );
    Ok(String::from_utf8(bytes)?)
}

/// Count data rows in CSV text (header excluded). Quoted newlines are
/// handled; ragged rows still count.
pub fn count_csv_rows(text: &str) -> usize {
    if text.trim().is_empty() {
        return 0;
    }
    csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes())
        .records()
        .filter_map(Result::ok)
        .filter(|row| !(row.len() == 1 && row.get(0).is_some_and(str::is_empty)))
        .count()
}

// ── GeoJSON ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "FeatureCollection")]
pub struct FeatureCollection {
    pub features: Vec<Feature>,
    /// Records dropped for lack of a resolvable geometry.
    #[serde(skip)]
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "Feature")]
pub struct Feature {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub geometry: Value,
    pub properties: Map<String, Value>,
}

impl FeatureCollection {
    pub fn to_pretty_json(&self) -> Result<String, TransformError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Resolve a record's geometry.
///
/// In order: a GeoJSON geometry object in the field; an object in the
/// field with lat/lng style keys; lat/lng keys on the record itself.
/// A missing or null field yields `None`.
pub fn extract_geometry(record: &Record, geometry_field: &str) -> Option<Value> {
    let value = record.get(geometry_field).filter(|v| !v.is_null())?;

    if let Value::Object(obj) = value {
        let is_geojson = obj
            .get("type")
            .and_then(Value::as_str)
            .is_some_and(|t| GEOMETRY_TYPES.contains(&t));
        if is_geojson {
            return Some(value.clone());
        }
        if let Some(point) = point_from(obj) {
            return Some(point);
        }
    }

    point_from(record)
}

fn point_from(obj: &Map<String, Value>) -> Option<Value> {
    let lat = coordinate(obj, LATITUDE_KEYS)?;
    let lng = coordinate(obj, LONGITUDE_KEYS)?;
    Some(json!({ "type": "Point", "coordinates": [lng, lat] }))
}

fn coordinate(obj: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| match obj.get(*key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Build a FeatureCollection, or `None` when no record has geometry.
pub fn json_to_geojson(
    records: &[Record],
    geometry_field: &str,
    properties_exclude: &[String],
) -> Option<FeatureCollection> {
    if records.is_empty() {
        warn!("no records to transform to GeoJSON");
        return None;
    }

    let mut features = Vec::new();
    let mut skipped = 0;

    for record in records {
        let Some(geometry) = extract_geometry(record, geometry_field) else {
            skipped += 1;
            continue;
        };

        let properties = record
            .iter()
            .filter(|(key, _)| {
                key.as_str() != geometry_field && !properties_exclude.iter().any(|e| e == *key)
            })
            .map(|(key, value)| {
                let value = match value {
                    Value::Array(_) | Value::Object(_) => Value::String(nested_json(value)),
                    other => other.clone(),
                };
                (key.clone(), value)
            })
            .collect();

        features.push(Feature {
            id: record.get("id").cloned(),
            geometry,
            properties,
        });
    }

    if features.is_empty() {
        warn!(records = records.len(), "no valid geometries found");
        return None;
    }

    info!(
        features = features.len(),
        skipped, "transformed records to GeoJSON"
    );
    Some(FeatureCollection { features, skipped })
}

/// True if at least one record has a resolvable geometry.
pub fn has_geometry_data(records: &[Record], geometry_field: &str) -> bool {
    !geometry_field.is_empty()
        && records
            .iter()
            .any(|r| extract_geometry(r, geometry_field).is_some())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    fn no_rules() -> (IndexMap<String, String>, Vec<String>) {
        (IndexMap::new(), Vec::new())
    }

    // ── CSV ─────────────────────────────────────────────────────────

    #[test]
    fn columns_follow_first_occurrence_order() {
        let records = vec![
            record(json!({ "zeta": 1, "alpha": 2 })),
            record(json!({ "beta": 3, "zeta": 4 })),
        ];
        let (renames, exclude) = no_rules();
        let csv = json_to_csv(&records, &renames, &exclude).unwrap();
        let header = csv.lines().next().unwrap();
        assert_eq!(header, "zeta,alpha,beta");
    }

    #[test]
    fn missing_cells_are_empty() {
        let records = vec![
            record(json!({ "a": "x", "b": "y" })),
            record(json!({ "a": "z" })),
        ];
        let (renames, exclude) = no_rules();
        let csv = json_to_csv(&records, &renames, &exclude).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines, ["a,b", "x,y", "z,"]);
    }

    #[test]
    fn values_are_flattened() {
        let records = vec![record(json!({
            "flag": true,
            "none": null,
            "nested": { "k": [1, 2] },
            "n": 1.5
        }))];
        let (renames, exclude) = no_rules();
        let csv = json_to_csv(&records, &renames, &exclude).unwrap();
        let mut reader = csv::Reader::from_reader(csv.as_bytes());
        let row = reader.records().next().unwrap().unwrap();
        assert_eq!(&row[0], "true");
        assert_eq!(&row[1], "");
        assert_eq!(&row[2], r#"{"k": [1, 2]}"#);
        assert_eq!(&row[3], "1.5");
    }

    #[test]
    fn nested_cells_keep_separator_spacing_and_unicode() {
        let value = json!({ "name": "東京, 港区", "ids": [1, 2, [3]], "empty": {}, "none": [] });
        assert_eq!(
            flatten_value(&value),
            r#"{"name": "東京, 港区", "ids": [1, 2, [3]], "empty": {}, "none": []}"#
        );
        assert_eq!(flatten_value(&json!([])), "[]");
        assert_eq!(flatten_value(&json!(["a"])), r#"["a"]"#);
    }

    #[test]
    fn renames_and_exclusions_apply_before_ordering() {
        let records = vec![record(json!({ "secret": "s", "title": "T", "id": 1 }))];
        let renames = IndexMap::from([("title".to_owned(), "name".to_owned())]);
        let exclude = vec!["secret".to_owned()];
        let csv = json_to_csv(&records, &renames, &exclude).unwrap();
        assert_eq!(csv.lines().next().unwrap(), "name,id");
    }

    #[test]
    fn empty_input_is_empty_text() {
        let (renames, exclude) = no_rules();
        assert_eq!(json_to_csv(&[], &renames, &exclude).unwrap(), "");
    }

    #[test]
    fn row_count_ignores_header_and_handles_quoted_newlines() {
        assert_eq!(count_csv_rows(""), 0);
        assert_eq!(count_csv_rows("id,name\n"), 0);
        assert_eq!(count_csv_rows("id,name\n1,\"two\nlines\"\n2,b\n"), 2);
    }

    // ── GeoJSON ─────────────────────────────────────────────────────

    #[test]
    fn lat_lng_object_becomes_lng_first_point() {
        let r = record(json!({ "loc": { "lat": 35.0, "lng": 139.0 } }));
        assert_eq!(
            extract_geometry(&r, "loc").unwrap(),
            json!({ "type": "Point", "coordinates": [139.0, 35.0] })
        );
    }

    #[test]
    fn geojson_geometry_is_used_verbatim() {
        let polygon = json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]
        });
        let r = record(json!({ "area": polygon.clone() }));
        assert_eq!(extract_geometry(&r, "area").unwrap(), polygon);
    }

    #[test]
    fn alternate_keys_and_numeric_strings_resolve() {
        let r = record(json!({ "loc": { "latitude": "35.5", "longitude": "139.25" } }));
        assert_eq!(
            extract_geometry(&r, "loc").unwrap()["coordinates"],
            json!([139.25, 35.5])
        );
    }

    #[test]
    fn top_level_coordinates_back_up_unresolvable_field() {
        let r = record(json!({ "loc": { "address": "Tokyo" }, "lat": 35.0, "lon": 139.0 }));
        assert_eq!(
            extract_geometry(&r, "loc").unwrap()["coordinates"],
            json!([139.0, 35.0])
        );

        let missing = record(json!({ "lat": 35.0, "lng": 139.0 }));
        assert!(extract_geometry(&missing, "loc").is_none());
    }

    #[test]
    fn features_skip_records_without_geometry() {
        let records = vec![
            record(json!({ "id": "a", "name": "A", "loc": { "lat": 35.0, "lng": 139.0 } })),
            record(json!({ "id": "b", "name": "B", "loc": { "lat": 35.0, "lng": 139.0 } })),
            record(json!({ "id": "c", "name": "C" })),
        ];

        let (renames, exclude) = no_rules();
        let csv = json_to_csv(&records, &renames, &exclude).unwrap();
        assert_eq!(count_csv_rows(&csv), 3);

        let fc = json_to_geojson(&records, "loc", &[]).unwrap();
        assert_eq!(fc.features.len(), 2);
        assert_eq!(fc.skipped, 1);
        assert_eq!(fc.features.len(), records.len() - fc.skipped);
        assert_eq!(fc.features[0].id, Some(json!("a")));
        assert!(!fc.features[0].properties.contains_key("loc"));
    }

    #[test]
    fn properties_stringify_nested_values_and_honor_exclusions() {
        let records = vec![record(json!({
            "loc": { "lat": 1.0, "lng": 2.0 },
            "tags": ["a", "b"],
            "internal": "x",
            "count": 3
        }))];
        let fc = json_to_geojson(&records, "loc", &["internal".to_owned()]).unwrap();
        let props = &fc.features[0].properties;
        assert_eq!(props["tags"], json!(r#"["a", "b"]"#));
        assert_eq!(props["count"], json!(3));
        assert!(!props.contains_key("internal"));
        assert!(fc.features[0].id.is_none());
    }

    #[test]
    fn no_geometry_means_no_collection() {
        let records = vec![record(json!({ "name": "A" }))];
        assert!(json_to_geojson(&records, "loc", &[]).is_none());
        assert!(!has_geometry_data(&records, "loc"));
        assert!(json_to_geojson(&[], "loc", &[]).is_none());
    }

    #[test]
    fn collection_serializes_with_type_tags() {
        let records = vec![record(json!({ "id": 7, "loc": { "lat": 1.0, "lng": 2.0 } }))];
        let fc = json_to_geojson(&records, "loc", &[]).unwrap();
        let value: Value = serde_json::from_str(&fc.to_pretty_json().unwrap()).unwrap();
        assert_eq!(value["type"], "FeatureCollection");
        assert_eq!(value["features"][0]["type"], "Feature");
        assert_eq!(value["features"][0]["id"], 7);
    }
}
