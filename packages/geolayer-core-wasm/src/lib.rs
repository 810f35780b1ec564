use wasm_bindgen::prelude::*;

// Create a console module for logging
pub mod console;
pub mod config;
pub mod error;
// Feature model shared by every reader
pub mod models;
pub mod kml;
pub mod geojson_features;
pub mod shapefile_archive;
pub mod ingest;
pub mod map_view;
// Browser-only pieces: Leaflet bindings and the exported viewer class
pub mod leaflet;
pub mod viewer;

pub use config::ViewerConfig;
pub use error::{GeoLayerError, Result};
pub use ingest::{FileKind, FileSource, InMemoryFile, Ingestor};
pub use map_view::{LayerStyle, MapBackend, MapView, TileSource};
pub use models::{Bounds, Feature, FeatureCollection, Geometry, GeometryType, LngLat, PropertyValue};
pub use viewer::GeoFileViewer;

// Enable better panic messages in console during development
#[cfg(feature = "console_error_panic_hook")]
pub use console_error_panic_hook::set_once as set_panic_hook;

#[macro_export]
macro_rules! console_log {
    ($($t:tt)*) => ($crate::console::log(&format!($($t)*)))
}

#[macro_export]
macro_rules! console_warn {
    ($($t:tt)*) => ($crate::console::warn(&format!($($t)*)))
}

use std::sync::Once;
static INIT: Once = Once::new();

#[wasm_bindgen(start)]
pub fn start() {
    INIT.call_once(|| {
        #[cfg(feature = "console_error_panic_hook")]
        console_error_panic_hook::set_once();

        console_log!("geolayer module initialized");
    });
}
