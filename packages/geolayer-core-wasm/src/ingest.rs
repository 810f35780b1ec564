// Ingestor: turns uploaded file contents into a normalized FeatureCollection.
// It never touches the map.
use std::str::FromStr;

use js_sys::Uint8Array;
use wasm_bindgen_futures::JsFuture;

use crate::console_log;
use crate::error::{js_error_message, GeoLayerError, Result};
use crate::geojson_features::parse_geojson;
use crate::kml::parse_kml;
use crate::models::FeatureCollection;
use crate::shapefile_archive::{open_archive, ArchivePayload, NativeShapefileDecoder, ShapefileDecoder};

/// Declared kind of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Kml,
    /// Zipped KML; read through the archive path.
    Kmz,
    ShapefileArchive,
    GeoJson,
}

impl FromStr for FileKind {
    type Err = GeoLayerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kml" => Ok(FileKind::Kml),
            "kmz" => Ok(FileKind::Kmz),
            "shapefile-archive" | "shapefile" | "shp" | "zip" => Ok(FileKind::ShapefileArchive),
            "geojson" | "json" => Ok(FileKind::GeoJson),
            other => Err(GeoLayerError::unsupported(format!("unknown file kind '{}'", other))),
        }
    }
}

impl FileKind {
    // Guess the kind from a file name's extension
    pub fn from_file_name(name: &str) -> Option<FileKind> {
        let (_, extension) = name.rsplit_once('.')?;
        extension.parse().ok()
    }
}

/// Host-side file reading collaborator.
#[allow(async_fn_in_trait)]
pub trait FileSource {
    fn file_name(&self) -> String;
    async fn read_bytes(&self) -> Result<Vec<u8>>;
}

// Browser file handle from an <input type="file"> or a drop event
impl FileSource for web_sys::File {
    fn file_name(&self) -> String {
        self.name()
    }

    async fn read_bytes(&self) -> Result<Vec<u8>> {
        let buffer = JsFuture::from(self.array_buffer())
            .await
            .map_err(|e| GeoLayerError::FileRead(js_error_message(&e)))?;
        Ok(Uint8Array::new(&buffer).to_vec())
    }
}

/// File contents already held in memory.
#[derive(Debug, Clone)]
pub struct InMemoryFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl InMemoryFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

impl FileSource for InMemoryFile {
    fn file_name(&self) -> String {
        self.name.clone()
    }

    async fn read_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.bytes.clone())
    }
}

fn utf8_text(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes)
        .map_err(|e| GeoLayerError::parse(format!("file is not valid UTF-8 text: {}", e)))
}

pub struct Ingestor<D = NativeShapefileDecoder> {
    decoder: D,
}

impl Default for Ingestor<NativeShapefileDecoder> {
    fn default() -> Self {
        Self::new(NativeShapefileDecoder)
    }
}

impl<D: ShapefileDecoder> Ingestor<D> {
    pub fn new(decoder: D) -> Self {
        Self { decoder }
    }

    pub async fn ingest_kml(&self, contents: &str) -> Result<FeatureCollection> {
        parse_kml(contents)
    }

    pub async fn ingest_geojson(&self, contents: &str) -> Result<FeatureCollection> {
        parse_geojson(contents)
    }

    /// Decode a zipped shapefile. Archives without a `.shp` part but with a
    /// `.kml` document (KMZ included) are read as KML.
    pub async fn ingest_shapefile_archive(&self, bytes: &[u8]) -> Result<FeatureCollection> {
        match open_archive(bytes)? {
            ArchivePayload::Shapefile(parts) => {
                console_log!("Decoding shapefile '{}'", parts.name);
                let collection = self.decoder.decode(&parts).await.map_err(|e| {
                    GeoLayerError::parse(format!("cannot decode shapefile '{}': {}", parts.name, e))
                })?;
                // no reprojection: a shapefile without a .prj may still be projected
                match collection.bounds() {
                    Some(bounds) if !bounds.is_geographic() => Err(GeoLayerError::unsupported(format!(
                        "coordinates of '{}' are not longitude/latitude (x {}..{}, y {}..{})",
                        parts.name, bounds.west, bounds.east, bounds.south, bounds.north
                    ))),
                    _ => Ok(collection),
                }
            }
            ArchivePayload::Kml { name, text } => {
                console_log!("Reading KML document '{}' from archive", name);
                parse_kml(&text)
            }
        }
    }

    pub async fn ingest_bytes(&self, bytes: &[u8], kind: FileKind) -> Result<FeatureCollection> {
        match kind {
            FileKind::Kml => self.ingest_kml(utf8_text(bytes)?).await,
            FileKind::GeoJson => self.ingest_geojson(utf8_text(bytes)?).await,
            FileKind::ShapefileArchive | FileKind::Kmz => self.ingest_shapefile_archive(bytes).await,
        }
    }

    pub async fn ingest_file<S: FileSource>(&self, source: &S, kind: FileKind) -> Result<FeatureCollection> {
        let bytes = source.read_bytes().await?;
        console_log!(
            "Read {} bytes from '{}' as {:?}",
            bytes.len(),
            source.file_name(),
            kind
        );
        self.ingest_bytes(&bytes, kind).await
    }
}
