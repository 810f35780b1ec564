// Leaflet bindings: the browser implementation of MapBackend. Expects the
// page to load Leaflet so that the global `L` namespace exists.
use serde::Serialize;
use serde_wasm_bindgen::Serializer;
use wasm_bindgen::prelude::*;

use crate::error::{js_error_message, GeoLayerError, Result};
use crate::geojson_features::feature_collection_to_geojson;
use crate::map_view::{LayerStyle, MapBackend, TileSource};
use crate::models::{Bounds, FeatureCollection, LngLat};

#[wasm_bindgen]
extern "C" {
    pub type LeafletMap;

    #[wasm_bindgen(js_namespace = L, js_name = map, catch)]
    fn create_map(element_id: &str) -> std::result::Result<LeafletMap, JsValue>;

    #[wasm_bindgen(method, js_name = setView, catch)]
    fn set_view(this: &LeafletMap, center: &JsValue, zoom: f64) -> std::result::Result<LeafletMap, JsValue>;

    #[wasm_bindgen(method, js_name = removeLayer)]
    fn remove_layer(this: &LeafletMap, layer: &LeafletLayer);

    #[wasm_bindgen(method, js_name = fitBounds)]
    fn fit_bounds(this: &LeafletMap, bounds: &JsValue);

    pub type LeafletLayer;

    #[wasm_bindgen(js_namespace = L, js_name = tileLayer, catch)]
    fn tile_layer(url_template: &str, options: &JsValue) -> std::result::Result<LeafletLayer, JsValue>;

    #[wasm_bindgen(js_namespace = L, js_name = geoJSON, catch)]
    fn geo_json(data: &JsValue, options: &JsValue) -> std::result::Result<LeafletLayer, JsValue>;

    #[wasm_bindgen(method, js_name = addTo, catch)]
    fn add_to(this: &LeafletLayer, map: &LeafletMap) -> std::result::Result<LeafletLayer, JsValue>;

    #[wasm_bindgen(method, js_name = getBounds)]
    fn get_bounds(this: &LeafletLayer) -> LatLngBounds;

    type LatLngBounds;

    #[wasm_bindgen(method, js_name = isValid)]
    fn is_valid(this: &LatLngBounds) -> bool;

    #[wasm_bindgen(method, js_name = getWest)]
    fn get_west(this: &LatLngBounds) -> f64;

    #[wasm_bindgen(method, js_name = getSouth)]
    fn get_south(this: &LatLngBounds) -> f64;

    #[wasm_bindgen(method, js_name = getEast)]
    fn get_east(this: &LatLngBounds) -> f64;

    #[wasm_bindgen(method, js_name = getNorth)]
    fn get_north(this: &LatLngBounds) -> f64;
}

fn surface_error(e: JsValue) -> GeoLayerError {
    GeoLayerError::SurfaceFailure(js_error_message(&e))
}

// serde_json maps must arrive as plain objects, not JS Maps
fn to_js<T: Serialize + ?Sized>(value: &T) -> Result<JsValue> {
    value
        .serialize(&Serializer::json_compatible())
        .map_err(|e| GeoLayerError::SurfaceFailure(format!("cannot convert value for Leaflet: {}", e)))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TileLayerOptions<'a> {
    attribution: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_zoom: Option<u8>,
}

#[derive(Serialize)]
struct GeoJsonOptions<'a> {
    style: &'a LayerStyle,
}

#[derive(Default)]
pub struct LeafletBackend {
    map: Option<LeafletMap>,
}

impl LeafletBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> Result<&LeafletMap> {
        self.map
            .as_ref()
            .ok_or_else(|| GeoLayerError::SurfaceFailure("Leaflet map has not been created".to_string()))
    }
}

impl MapBackend for LeafletBackend {
    type LayerHandle = LeafletLayer;

    fn create_surface(&mut self, surface_id: &str, center: LngLat, zoom: f64) -> Result<()> {
        let map = create_map(surface_id).map_err(surface_error)?;
        // Leaflet takes [lat, lng]
        map.set_view(&to_js(&[center.lat, center.lng])?, zoom)
            .map_err(surface_error)?;
        self.map = Some(map);
        Ok(())
    }

    fn add_tile_source(&mut self, source: &TileSource) -> Result<()> {
        let options = TileLayerOptions {
            attribution: &source.attribution,
            max_zoom: source.max_zoom,
        };
        let layer = tile_layer(&source.url_template, &to_js(&options)?).map_err(surface_error)?;
        layer.add_to(self.map()?).map_err(surface_error)?;
        Ok(())
    }

    fn add_layer(&mut self, features: &FeatureCollection, style: &LayerStyle) -> Result<LeafletLayer> {
        let data = to_js(&feature_collection_to_geojson(features))?;
        let options = to_js(&GeoJsonOptions { style })?;
        let layer = geo_json(&data, &options).map_err(surface_error)?;
        layer.add_to(self.map()?).map_err(surface_error)
    }

    fn remove_layer(&mut self, layer: LeafletLayer) {
        if let Some(map) = &self.map {
            map.remove_layer(&layer);
        }
    }

    fn layer_bounds(&self, layer: &LeafletLayer) -> Option<Bounds> {
        let bounds = layer.get_bounds();
        if !bounds.is_valid() {
            return None;
        }
        Some(Bounds::new(
            bounds.get_west(),
            bounds.get_south(),
            bounds.get_east(),
            bounds.get_north(),
        ))
    }

    fn fit_bounds(&mut self, bounds: Bounds) {
        let Some(map) = &self.map else {
            return;
        };
        let corners = [[bounds.south, bounds.west], [bounds.north, bounds.east]];
        match to_js(&corners) {
            Ok(corners) => map.fit_bounds(&corners),
            Err(e) => crate::console_warn!("Skipping viewport fit: {}", e),
        }
    }
}
