use serde::Deserialize;

use crate::error::{GeoLayerError, Result};
use crate::map_view::TileSource;
use crate::models::LngLat;

/// Viewer settings supplied by the host page. Every field is optional and
/// falls back to a view of Spain over OpenStreetMap tiles.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ViewerConfig {
    /// DOM id of the element the map is mounted in
    pub surface_id: String,
    pub center: LngLat,
    pub zoom: f64,
    pub tile_source: TileSource,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            surface_id: "map".to_string(),
            center: LngLat::new(-3.7038, 40.4168),
            zoom: 6.0,
            tile_source: TileSource::default(),
        }
    }
}

impl ViewerConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let config: ViewerConfig =
            serde_json::from_str(text).map_err(|e| GeoLayerError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.surface_id.trim().is_empty() {
            return Err(GeoLayerError::InvalidConfig("surfaceId is empty".to_string()));
        }
        if !(-180.0..=180.0).contains(&self.center.lng) || !(-90.0..=90.0).contains(&self.center.lat) {
            return Err(GeoLayerError::InvalidConfig(format!(
                "center ({}, {}) is not a longitude/latitude pair",
                self.center.lng, self.center.lat
            )));
        }
        if !(0.0..=22.0).contains(&self.zoom) {
            return Err(GeoLayerError::InvalidConfig(format!("zoom {} is outside 0..=22", self.zoom)));
        }
        if self.tile_source.url_template.is_empty() {
            return Err(GeoLayerError::InvalidConfig("tileSource.urlTemplate is empty".to_string()));
        }
        Ok(())
    }
}
