// JavaScript surface: the GeoFileViewer class wires file ingestion to a
// Leaflet-backed MapView, plus stateless parse helpers.
use std::cell::RefCell;
use std::rc::Rc;

use js_sys::Promise;
use serde::Serialize;
use serde_wasm_bindgen::Serializer;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::future_to_promise;

use crate::config::ViewerConfig;
use crate::console_log;
use crate::error::{GeoLayerError, Result};
use crate::geojson_features::{feature_collection_to_geojson, parse_geojson};
use crate::ingest::{FileKind, FileSource, Ingestor};
use crate::kml::parse_kml;
use crate::leaflet::LeafletBackend;
use crate::map_view::MapView;
use crate::models::{CollectionSummary, FeatureCollection};

fn to_js<T: Serialize + ?Sized>(value: &T) -> std::result::Result<JsValue, JsValue> {
    value
        .serialize(&Serializer::json_compatible())
        .map_err(|e| JsValue::from_str(&format!("Failed to serialize result: {}", e)))
}

fn resolve_kind(declared: Option<String>, file_name: &str) -> Result<FileKind> {
    match declared {
        Some(kind) => kind.parse(),
        None => FileKind::from_file_name(file_name).ok_or_else(|| {
            GeoLayerError::unsupported(format!("cannot infer the file kind of '{}'", file_name))
        }),
    }
}

struct ViewerState {
    config: ViewerConfig,
    ingestor: Ingestor,
    view: RefCell<MapView<LeafletBackend>>,
    last_summary: RefCell<Option<CollectionSummary>>,
}

impl ViewerState {
    // Only borrowed synchronously, never across an await
    fn show(&self, features: FeatureCollection) -> Result<CollectionSummary> {
        let summary = features.summary();
        let shown = self.view.borrow_mut().display(features);
        // a failed display still removed the previous layer
        *self.last_summary.borrow_mut() = shown.as_ref().ok().map(|_| summary.clone());
        shown.map(|_| summary)
    }
}

#[wasm_bindgen]
pub struct GeoFileViewer {
    state: Rc<ViewerState>,
}

#[wasm_bindgen]
impl GeoFileViewer {
    /// `config` may be undefined, null or a partial ViewerConfig object.
    #[wasm_bindgen(constructor)]
    pub fn new(config: JsValue) -> std::result::Result<GeoFileViewer, JsValue> {
        let config = if config.is_undefined() || config.is_null() {
            ViewerConfig::default()
        } else {
            serde_wasm_bindgen::from_value::<ViewerConfig>(config)
                .map_err(|e| GeoLayerError::InvalidConfig(e.to_string()))?
        };
        config.validate()?;

        Ok(GeoFileViewer {
            state: Rc::new(ViewerState {
                config,
                ingestor: Ingestor::default(),
                view: RefCell::new(MapView::new(LeafletBackend::new())),
                last_summary: RefCell::new(None),
            }),
        })
    }

    pub fn initialize(&self) -> std::result::Result<(), JsValue> {
        let config = &self.state.config;
        self.state.view.borrow_mut().initialize(
            &config.surface_id,
            config.center,
            config.zoom,
            &config.tile_source,
        )?;
        Ok(())
    }

    /// Read, parse and display a browser File. Resolves to the collection
    /// summary; rejects with an Error whose message names the failure.
    #[wasm_bindgen(js_name = loadFile)]
    pub fn load_file(&self, file: web_sys::File, kind: Option<String>) -> Promise {
        let state = Rc::clone(&self.state);
        future_to_promise(async move {
            let kind = resolve_kind(kind, &file.file_name())?;
            let features = state.ingestor.ingest_file(&file, kind).await?;
            let summary = state.show(features)?;
            to_js(&summary)
        })
    }

    #[wasm_bindgen(js_name = loadText)]
    pub fn load_text(&self, text: String, kind: String) -> Promise {
        let state = Rc::clone(&self.state);
        future_to_promise(async move {
            let kind: FileKind = kind.parse()?;
            let features = state.ingestor.ingest_bytes(text.as_bytes(), kind).await?;
            let summary = state.show(features)?;
            to_js(&summary)
        })
    }

    pub fn clear(&self) -> std::result::Result<(), JsValue> {
        self.state.view.borrow_mut().clear()?;
        *self.state.last_summary.borrow_mut() = None;
        console_log!("Map overlay cleared");
        Ok(())
    }

    /// Summary of the displayed collection, or undefined when nothing is shown.
    pub fn summary(&self) -> std::result::Result<JsValue, JsValue> {
        match self.state.last_summary.borrow().as_ref() {
            Some(summary) => to_js(summary),
            None => Ok(JsValue::UNDEFINED),
        }
    }

    #[wasm_bindgen(js_name = hasLayer)]
    pub fn has_layer(&self) -> bool {
        self.state.view.borrow().has_layer()
    }
}

/// Parse KML text into a GeoJSON FeatureCollection object without displaying it.
#[wasm_bindgen(js_name = parseKml)]
pub fn parse_kml_js(text: &str) -> std::result::Result<JsValue, JsValue> {
    let collection = parse_kml(text)?;
    to_js(&feature_collection_to_geojson(&collection))
}

/// Validate GeoJSON text and return it normalized (null geometries dropped,
/// rings closed).
#[wasm_bindgen(js_name = parseGeoJson)]
pub fn parse_geojson_js(text: &str) -> std::result::Result<JsValue, JsValue> {
    let collection = parse_geojson(text)?;
    to_js(&feature_collection_to_geojson(&collection))
}
