// MapView: owns at most one overlay layer on a map surface and swaps it on
// every display call.
use serde::{Deserialize, Serialize};

use crate::console_log;
use crate::error::{GeoLayerError, Result};
use crate::models::{Bounds, FeatureCollection, LngLat};

// Smallest viewport edge in degrees (~500 m at the equator). Points and
// straight meridian/parallel lines are padded to this before fitting.
pub const MIN_VIEWPORT_SPAN_DEG: f64 = 0.005;

/// Visual style of the overlay, serialized as Leaflet path options.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerStyle {
    pub color: String,
    pub weight: f64,
    pub fill_color: String,
    pub fill_opacity: f64,
}

impl Default for LayerStyle {
    fn default() -> Self {
        Self {
            color: "#4CAF50".to_string(),
            weight: 2.0,
            fill_color: "#8BC34A".to_string(),
            fill_opacity: 0.3,
        }
    }
}

// Raster basemap added under the overlay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileSource {
    pub url_template: String,
    #[serde(default)]
    pub attribution: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_zoom: Option<u8>,
}

impl Default for TileSource {
    fn default() -> Self {
        Self {
            url_template: "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png".to_string(),
            attribution: "© OpenStreetMap contributors".to_string(),
            max_zoom: Some(19),
        }
    }
}

/// Rendering surface collaborator. MapView only ever calls these six operations.
pub trait MapBackend {
    type LayerHandle;

    fn create_surface(&mut self, surface_id: &str, center: LngLat, zoom: f64) -> Result<()>;
    fn add_tile_source(&mut self, source: &TileSource) -> Result<()>;
    fn add_layer(&mut self, features: &FeatureCollection, style: &LayerStyle) -> Result<Self::LayerHandle>;
    fn remove_layer(&mut self, layer: Self::LayerHandle);
    fn layer_bounds(&self, layer: &Self::LayerHandle) -> Option<Bounds>;
    fn fit_bounds(&mut self, bounds: Bounds);
}

/// A displayed overlay: the backend handle plus the collection and style it renders.
#[derive(Debug)]
pub struct Layer<H> {
    handle: H,
    features: FeatureCollection,
    style: LayerStyle,
}

impl<H> Layer<H> {
    pub fn handle(&self) -> &H {
        &self.handle
    }

    pub fn features(&self) -> &FeatureCollection {
        &self.features
    }

    pub fn style(&self) -> &LayerStyle {
        &self.style
    }
}

enum ViewState<H> {
    Uninitialized,
    Ready { current: Option<Layer<H>> },
}

pub struct MapView<B: MapBackend> {
    backend: B,
    state: ViewState<B::LayerHandle>,
}

impl<B: MapBackend> MapView<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            state: ViewState::Uninitialized,
        }
    }

    /// Create the surface and its basemap. The surface counts as created once the
    /// backend accepted it, even if adding the tile source then fails.
    pub fn initialize(
        &mut self,
        surface_id: &str,
        initial_center: LngLat,
        initial_zoom: f64,
        tile_source: &TileSource,
    ) -> Result<()> {
        if self.is_initialized() {
            return Err(GeoLayerError::AlreadyInitialized);
        }

        self.backend.create_surface(surface_id, initial_center, initial_zoom)?;
        self.state = ViewState::Ready { current: None };
        console_log!("Map surface '{}' created at zoom {}", surface_id, initial_zoom);

        self.backend.add_tile_source(tile_source)
    }

    /// Replace the displayed layer with `features`.
    ///
    /// The previous layer is removed before anything else happens, so a failing
    /// layer add leaves the surface empty rather than showing stale data.
    pub fn display(&mut self, features: FeatureCollection) -> Result<()> {
        let ViewState::Ready { current } = &mut self.state else {
            return Err(GeoLayerError::NotInitialized);
        };

        if let Some(previous) = current.take() {
            self.backend.remove_layer(previous.handle);
        }

        if features.is_empty() {
            console_log!("Empty feature collection, leaving the map without overlay");
            return Ok(());
        }

        let style = LayerStyle::default();
        let handle = self.backend.add_layer(&features, &style)?;

        if let Some(bounds) = self.backend.layer_bounds(&handle).or_else(|| features.bounds()) {
            self.backend.fit_bounds(bounds.padded_to(MIN_VIEWPORT_SPAN_DEG));
        }

        console_log!("Displaying {} features", features.len());
        *current = Some(Layer {
            handle,
            features,
            style,
        });
        Ok(())
    }

    pub fn clear(&mut self) -> Result<()> {
        self.display(FeatureCollection::default())
    }

    pub fn current_layer(&self) -> Option<&Layer<B::LayerHandle>> {
        match &self.state {
            ViewState::Ready { current } => current.as_ref(),
            ViewState::Uninitialized => None,
        }
    }

    pub fn has_layer(&self) -> bool {
        self.current_layer().is_some()
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.state, ViewState::Ready { .. })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}
