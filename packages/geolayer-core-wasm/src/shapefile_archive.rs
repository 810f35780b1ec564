// Shapefile archives: ZIP inspection and the decoder collaborator.
//
// The archive is only opened here to find its parts. Decoding the binary
// geometry/attribute files is left to a `ShapefileDecoder`.
use std::collections::HashMap;
use std::io::{Cursor, Read};

use geo_types::{Coord, LineString, MultiPolygon, Point, Polygon};
use shapefile::dbase::{self, FieldValue};
use shapefile::{PolygonRing, Shape, ShapeReader};
use thiserror::Error;
use zip::ZipArchive;

use crate::error::{GeoLayerError, Result};
use crate::models::{Feature, FeatureCollection, Geometry, Properties, PropertyValue};
use crate::{console_log, console_warn};

/// The parts of one shapefile pulled out of an archive.
#[derive(Debug, Clone)]
pub struct ShapefileParts {
    pub name: String,
    pub shp: Vec<u8>,
    pub shx: Vec<u8>,
    pub dbf: Vec<u8>,
    pub prj: Option<String>,
}

// What an uploaded archive turned out to carry
#[derive(Debug, Clone)]
pub enum ArchivePayload {
    Shapefile(ShapefileParts),
    Kml { name: String, text: String },
}

// Archive entry with lowercased stem and extension for matching
struct Entry {
    name: String,
    stem: String,
    extension: String,
}

fn is_hidden(name: &str) -> bool {
    name.starts_with("__MACOSX/")
        || name
            .rsplit('/')
            .next()
            .map(|file| file.starts_with("._"))
            .unwrap_or(false)
}

fn split_entry(name: &str) -> Option<Entry> {
    let (stem, extension) = name.rsplit_once('.')?;
    Some(Entry {
        name: name.to_string(),
        stem: stem.to_lowercase(),
        extension: extension.to_lowercase(),
    })
}

// Largest uncompressed archive entry accepted
pub const MAX_ENTRY_BYTES: u64 = 256 * 1024 * 1024;
const PREALLOCATE_LIMIT: u64 = 8 * 1024 * 1024;

fn read_entry(archive: &mut ZipArchive<Cursor<&[u8]>>, name: &str) -> Result<Vec<u8>> {
    let file = archive
        .by_name(name)
        .map_err(|e| GeoLayerError::parse(format!("cannot open '{}' in archive: {}", name, e)))?;
    let declared = file.size();
    read_capped(file, name, declared, MAX_ENTRY_BYTES)
}

// The declared size comes from the archive's central directory and is only a
// capacity hint; the bytes actually read are what counts against `limit`.
fn read_capped<R: Read>(reader: R, name: &str, declared: u64, limit: u64) -> Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(declared.min(limit).min(PREALLOCATE_LIMIT) as usize);
    reader
        .take(limit + 1)
        .read_to_end(&mut buffer)
        .map_err(|e| GeoLayerError::parse(format!("cannot read '{}' in archive: {}", name, e)))?;
    if buffer.len() as u64 > limit {
        return Err(GeoLayerError::parse(format!(
            "'{}' in archive is larger than {} bytes",
            name, limit
        )));
    }
    Ok(buffer)
}

fn read_text_entry(archive: &mut ZipArchive<Cursor<&[u8]>>, name: &str) -> Result<String> {
    let bytes = read_entry(archive, name)?;
    String::from_utf8(bytes)
        .map_err(|_| GeoLayerError::parse(format!("'{}' is not valid UTF-8 text", name)))
}

/// Open a ZIP archive and locate a complete shapefile (`.shp` + `.shx` + `.dbf`),
/// falling back to a `.kml` document when the archive has no `.shp` at all.
pub fn open_archive(bytes: &[u8]) -> Result<ArchivePayload> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| GeoLayerError::unsupported(format!("not a ZIP archive: {}", e)))?;

    let entries: Vec<Entry> = archive
        .file_names()
        .filter(|name| !name.ends_with('/') && !is_hidden(name))
        .filter_map(split_entry)
        .collect();

    let find = |stem: &str, extension: &str| {
        entries
            .iter()
            .find(|e| e.stem == stem && e.extension == extension)
            .map(|e| e.name.clone())
    };

    let Some(shp) = entries.iter().find(|e| e.extension == "shp") else {
        if let Some(kml) = entries.iter().find(|e| e.extension == "kml") {
            let name = kml.name.clone();
            console_log!("Archive has no .shp part, reading '{}' as KML", name);
            let text = read_text_entry(&mut archive, &name)?;
            return Ok(ArchivePayload::Kml { name, text });
        }
        return Err(GeoLayerError::unsupported("archive contains no .shp or .kml part"));
    };

    let shp_name = shp.name.clone();
    let shx_name = find(&shp.stem, "shx").ok_or_else(|| {
        GeoLayerError::unsupported(format!("archive is missing the .shx index for '{}'", shp_name))
    })?;
    let dbf_name = find(&shp.stem, "dbf").ok_or_else(|| {
        GeoLayerError::unsupported(format!("archive is missing the .dbf attributes for '{}'", shp_name))
    })?;
    let prj_name = find(&shp.stem, "prj");

    let prj = match prj_name {
        Some(name) => Some(read_text_entry(&mut archive, &name)?),
        None => None,
    };
    if let Some(wkt) = &prj {
        if !wkt.trim_start().to_uppercase().starts_with("GEOG") {
            console_warn!("Rejecting '{}': .prj is not a geographic coordinate system", shp_name);
            return Err(GeoLayerError::unsupported(format!(
                "'{}' uses a projected coordinate system; reproject it to WGS84 longitude/latitude",
                shp_name
            )));
        }
    }

    Ok(ArchivePayload::Shapefile(ShapefileParts {
        shp: read_entry(&mut archive, &shp_name)?,
        shx: read_entry(&mut archive, &shx_name)?,
        dbf: read_entry(&mut archive, &dbf_name)?,
        prj,
        name: shp_name,
    }))
}

/// Failure reported by a shapefile decoder, with the decoder's own message.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{0}")]
pub struct DecodeError(pub String);

/// External shapefile decoder. Implementations return the normalized model;
/// anything they fail on is reported as a parse failure by the ingestor.
#[allow(async_fn_in_trait)]
pub trait ShapefileDecoder {
    async fn decode(&self, parts: &ShapefileParts) -> std::result::Result<FeatureCollection, DecodeError>;
}

/// Decoder backed by the `shapefile` crate (and its bundled `dbase` reader).
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeShapefileDecoder;

impl ShapefileDecoder for NativeShapefileDecoder {
    async fn decode(&self, parts: &ShapefileParts) -> std::result::Result<FeatureCollection, DecodeError> {
        decode_parts(parts)
    }
}

fn decode_parts(parts: &ShapefileParts) -> std::result::Result<FeatureCollection, DecodeError> {
    let shape_reader = ShapeReader::with_shx(Cursor::new(&parts.shp[..]), Cursor::new(&parts.shx[..]))
        .map_err(|e| DecodeError(e.to_string()))?;
    let dbase_reader =
        dbase::Reader::new(Cursor::new(&parts.dbf[..])).map_err(|e| DecodeError(e.to_string()))?;
    let mut reader = shapefile::Reader::new(shape_reader, dbase_reader);

    let mut features = Vec::new();
    for (index, result) in reader.iter_shapes_and_records().enumerate() {
        let (shape, record) = result.map_err(|e| DecodeError(format!("record {}: {}", index + 1, e)))?;
        let properties = record_properties(record);
        for geometry in shape_geometries(shape).map_err(|e| DecodeError(format!("record {}: {}", index + 1, e)))? {
            features.push(Feature {
                geometry,
                properties: properties.clone(),
            });
        }
    }

    console_log!("Decoded {} features from '{}'", features.len(), parts.name);
    Ok(FeatureCollection::new(features))
}

trait PlanarPoint {
    fn coord(&self) -> Coord<f64>;
}

impl PlanarPoint for shapefile::Point {
    fn coord(&self) -> Coord<f64> {
        Coord { x: self.x, y: self.y }
    }
}

impl PlanarPoint for shapefile::PointM {
    fn coord(&self) -> Coord<f64> {
        Coord { x: self.x, y: self.y }
    }
}

impl PlanarPoint for shapefile::PointZ {
    fn coord(&self) -> Coord<f64> {
        Coord { x: self.x, y: self.y }
    }
}

fn line<P: PlanarPoint>(points: &[P]) -> LineString<f64> {
    LineString::new(points.iter().map(PlanarPoint::coord).collect())
}

// Multi-part shapes are split into one geometry per part; the model has no
// MultiPoint or MultiLineString.
fn points<P: PlanarPoint>(points: &[P]) -> Vec<Geometry> {
    points
        .iter()
        .map(|p| Geometry::Point(Point::from(p.coord())))
        .collect()
}

fn polylines<P: PlanarPoint>(parts: &[Vec<P>]) -> Vec<Geometry> {
    parts
        .iter()
        .filter(|part| part.len() >= 2)
        .map(|part| Geometry::LineString(line(part)))
        .collect()
}

fn polygons<P: PlanarPoint>(rings: &[PolygonRing<P>]) -> std::result::Result<Vec<Geometry>, String> {
    let mut polygons: Vec<Polygon<f64>> = Vec::new();
    for ring in rings {
        match ring {
            PolygonRing::Outer(points) => polygons.push(Polygon::new(line(points), Vec::new())),
            PolygonRing::Inner(points) => {
                let owner = polygons
                    .last_mut()
                    .ok_or_else(|| "inner ring appears before any outer ring".to_string())?;
                owner.interiors_push(line(points));
            }
        }
    }

    Ok(match polygons.len() {
        0 => Vec::new(),
        1 => vec![Geometry::Polygon(polygons.remove(0))],
        _ => vec![Geometry::MultiPolygon(MultiPolygon::new(polygons))],
    })
}

fn shape_geometries(shape: Shape) -> std::result::Result<Vec<Geometry>, String> {
    Ok(match shape {
        Shape::NullShape => Vec::new(),
        Shape::Point(p) => vec![Geometry::Point(Point::from(p.coord()))],
        Shape::PointM(p) => vec![Geometry::Point(Point::from(p.coord()))],
        Shape::PointZ(p) => vec![Geometry::Point(Point::from(p.coord()))],
        Shape::Multipoint(mp) => points(mp.points()),
        Shape::MultipointM(mp) => points(mp.points()),
        Shape::MultipointZ(mp) => points(mp.points()),
        Shape::Polyline(pl) => polylines(pl.parts()),
        Shape::PolylineM(pl) => polylines(pl.parts()),
        Shape::PolylineZ(pl) => polylines(pl.parts()),
        Shape::Polygon(pg) => polygons(pg.rings())?,
        Shape::PolygonM(pg) => polygons(pg.rings())?,
        Shape::PolygonZ(pg) => polygons(pg.rings())?,
        Shape::Multipatch(_) => return Err("Multipatch shapes are not supported".to_string()),
    })
}

fn record_properties(record: dbase::Record) -> Properties {
    HashMap::<String, FieldValue>::from(record)
        .into_iter()
        .map(|(name, value)| (name, field_value(value)))
        .collect()
}

fn field_value(value: FieldValue) -> PropertyValue {
    match value {
        FieldValue::Character(Some(s)) => PropertyValue::String(s.trim_end().to_string()),
        FieldValue::Numeric(Some(n)) => PropertyValue::Number(n),
        FieldValue::Float(Some(f)) => PropertyValue::Number(f as f64),
        FieldValue::Integer(i) => PropertyValue::Number(i as f64),
        FieldValue::Double(d) => PropertyValue::Number(d),
        FieldValue::Logical(Some(b)) => PropertyValue::Bool(b),
        FieldValue::Currency(c) => PropertyValue::Number(c),
        FieldValue::Memo(text) => PropertyValue::String(text),
        FieldValue::Date(Some(date)) => PropertyValue::String(iso_date(&date)),
        FieldValue::DateTime(datetime) => {
            let time = datetime.time();
            PropertyValue::String(format!(
                "{}T{:02}:{:02}:{:02}",
                iso_date(&datetime.date()),
                time.hours(),
                time.minutes(),
                time.seconds()
            ))
        }
        FieldValue::Character(None)
        | FieldValue::Numeric(None)
        | FieldValue::Float(None)
        | FieldValue::Logical(None)
        | FieldValue::Date(None) => PropertyValue::Null,
    }
}

fn iso_date(date: &dbase::Date) -> String {
    format!("{:04}-{:02}-{:02}", date.year(), date.month(), date.day())
}
