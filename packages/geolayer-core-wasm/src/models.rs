// Normalized feature model shared by the ingestors and the map view
use geo::{BoundingRect, GeodesicArea};
use geo_types::{LineString, MultiPolygon, Point, Polygon};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// Scalar property value attached to a feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Number(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

pub type Properties = BTreeMap<String, PropertyValue>;

// Feature geometry types
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GeometryType {
    Point,
    LineString,
    Polygon,
    MultiPolygon,
}

impl GeometryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeometryType::Point => "Point",
            GeometryType::LineString => "LineString",
            GeometryType::Polygon => "Polygon",
            GeometryType::MultiPolygon => "MultiPolygon",
        }
    }
}

impl fmt::Display for GeometryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Geometry of a single feature. Coordinates are `x = longitude`, `y = latitude`.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point(Point<f64>),
    LineString(LineString<f64>),
    Polygon(Polygon<f64>),
    MultiPolygon(MultiPolygon<f64>),
}

impl Geometry {
    pub fn geometry_type(&self) -> GeometryType {
        match self {
            Geometry::Point(_) => GeometryType::Point,
            Geometry::LineString(_) => GeometryType::LineString,
            Geometry::Polygon(_) => GeometryType::Polygon,
            Geometry::MultiPolygon(_) => GeometryType::MultiPolygon,
        }
    }

    pub fn bounds(&self) -> Option<Bounds> {
        geo_types::Geometry::from(self.clone())
            .bounding_rect()
            .map(Bounds::from)
    }

    // Geodesic area in square meters; zero for points and lines
    pub fn area_m2(&self) -> f64 {
        match self {
            Geometry::Polygon(polygon) => polygon.geodesic_area_unsigned(),
            Geometry::MultiPolygon(multi) => multi.geodesic_area_unsigned(),
            Geometry::Point(_) | Geometry::LineString(_) => 0.0,
        }
    }
}

impl From<Geometry> for geo_types::Geometry<f64> {
    fn from(geometry: Geometry) -> Self {
        match geometry {
            Geometry::Point(p) => geo_types::Geometry::Point(p),
            Geometry::LineString(l) => geo_types::Geometry::LineString(l),
            Geometry::Polygon(p) => geo_types::Geometry::Polygon(p),
            Geometry::MultiPolygon(m) => geo_types::Geometry::MultiPolygon(m),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub geometry: Geometry,
    pub properties: Properties,
}

impl Feature {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            geometry,
            properties: Properties::new(),
        }
    }

    pub fn with_property(mut self, name: &str, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(name.to_string(), value.into());
        self
    }
}

/// Ordered set of features produced by one ingestion. Order is display order only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureCollection {
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        Self { features }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        self.features.iter()
    }

    /// Union of all feature bounds, `None` when the collection is empty.
    pub fn bounds(&self) -> Option<Bounds> {
        self.features
            .iter()
            .filter_map(|feature| feature.geometry.bounds())
            .reduce(|acc, b| acc.union(&b))
    }

    pub fn summary(&self) -> CollectionSummary {
        let mut geometry_counts = BTreeMap::new();
        for feature in &self.features {
            *geometry_counts
                .entry(feature.geometry.geometry_type().as_str().to_string())
                .or_insert(0) += 1;
        }

        let area_m2: f64 = self.features.iter().map(|f| f.geometry.area_m2()).sum();

        CollectionSummary {
            feature_count: self.features.len(),
            geometry_counts,
            bounds: self.bounds(),
            area_hectares: area_m2 / 10_000.0,
        }
    }
}

impl From<Vec<Feature>> for FeatureCollection {
    fn from(features: Vec<Feature>) -> Self {
        Self::new(features)
    }
}

// Axis-aligned longitude/latitude box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl Bounds {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self { west, south, east, north }
    }

    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            west: self.west.min(other.west),
            south: self.south.min(other.south),
            east: self.east.max(other.east),
            north: self.north.max(other.north),
        }
    }

    pub fn width(&self) -> f64 {
        self.east - self.west
    }

    pub fn height(&self) -> f64 {
        self.north - self.south
    }

    pub fn center(&self) -> LngLat {
        LngLat {
            lng: (self.west + self.east) / 2.0,
            lat: (self.south + self.north) / 2.0,
        }
    }

    /// True when the box lies within longitude/latitude range.
    pub fn is_geographic(&self) -> bool {
        (-180.0..=180.0).contains(&self.west)
            && (-180.0..=180.0).contains(&self.east)
            && (-90.0..=90.0).contains(&self.south)
            && (-90.0..=90.0).contains(&self.north)
    }

    /// Grow each axis to at least `min_span` degrees around the center.
    /// A single point or a straight meridian/parallel line has zero extent on some axis
    /// and cannot be fitted by the map widget as-is.
    ///
    /// Latitude is clamped to ±90 before and after padding, so `south <= north`
    /// always holds.
    pub fn padded_to(&self, min_span: f64) -> Bounds {
        let south = self.south.clamp(-90.0, 90.0);
        let north = self.north.clamp(-90.0, 90.0).max(south);
        let center_lng = (self.west + self.east) / 2.0;
        let center_lat = (south + north) / 2.0;
        let half_w = self.width().max(min_span) / 2.0;
        let half_h = (north - south).max(min_span) / 2.0;
        Bounds {
            west: center_lng - half_w,
            south: (center_lat - half_h).max(-90.0),
            east: center_lng + half_w,
            north: (center_lat + half_h).min(90.0),
        }
    }
}

impl From<geo_types::Rect<f64>> for Bounds {
    fn from(rect: geo_types::Rect<f64>) -> Self {
        Bounds::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LngLat {
    pub lng: f64,
    pub lat: f64,
}

impl LngLat {
    pub fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }
}

// Overview of an ingested collection, handed back to JS after a load
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSummary {
    pub feature_count: usize,
    pub geometry_counts: BTreeMap<String, usize>,
    pub bounds: Option<Bounds>,
    pub area_hectares: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::{coord, line_string, polygon};

    fn unit_square() -> Geometry {
        Geometry::Polygon(polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 0.0, y: 1.0),
            (x: 0.0, y: 0.0),
        ])
    }

    #[test]
    fn empty_collection_has_no_bounds() {
        assert_eq!(FeatureCollection::default().bounds(), None);
    }

    #[test]
    fn collection_bounds_cover_every_feature() {
        let collection = FeatureCollection::new(vec![
            Feature::new(unit_square()),
            Feature::new(Geometry::Point(Point::new(-3.0, 40.0))),
            Feature::new(Geometry::LineString(line_string![
                (x: 2.0, y: -1.0),
                (x: 3.0, y: 0.5),
            ])),
        ]);

        let bounds = collection.bounds().expect("bounds");
        assert_eq!(bounds, Bounds::new(-3.0, -1.0, 3.0, 40.0));
    }

    #[test]
    fn point_bounds_are_padded_to_a_usable_box() {
        let bounds = Geometry::Point(Point::from(coord! { x: 10.0, y: 20.0 }))
            .bounds()
            .expect("point bounds");
        assert_eq!(bounds.width(), 0.0);

        let padded = bounds.padded_to(0.01);
        assert!((padded.width() - 0.01).abs() < 1e-12);
        assert!((padded.height() - 0.01).abs() < 1e-12);
        let center = padded.center();
        assert!((center.lng - 10.0).abs() < 1e-12);
        assert!((center.lat - 20.0).abs() < 1e-12);
    }

    #[test]
    fn padding_keeps_larger_extents_and_clamps_latitude() {
        let wide = Bounds::new(0.0, 89.999, 5.0, 89.999).padded_to(0.01);
        assert_eq!(wide.width(), 5.0);
        assert_eq!(wide.north, 90.0);
    }

    #[test]
    fn padding_out_of_range_latitudes_never_inverts_the_box() {
        let utm = Bounds::new(440000.0, 4474000.0, 440000.0, 4474000.0);
        assert!(!utm.is_geographic());

        let padded = utm.padded_to(0.005);
        assert!(padded.south <= padded.north);
        assert_eq!(padded.north, 90.0);
        assert!((padded.south - 89.9975).abs() < 1e-9);

        let below = Bounds::new(0.0, -120.0, 1.0, -95.0).padded_to(0.005);
        assert!(below.south <= below.north);
        assert_eq!(below.south, -90.0);
    }

    #[test]
    fn geographic_range_check() {
        assert!(Bounds::new(-180.0, -90.0, 180.0, 90.0).is_geographic());
        assert!(!Bounds::new(-3.7, 40.4, 181.0, 40.5).is_geographic());
    }

    #[test]
    fn summary_counts_types_and_polygon_area() {
        let collection = FeatureCollection::new(vec![
            Feature::new(unit_square()).with_property("name", "square"),
            Feature::new(Geometry::Point(Point::new(0.5, 0.5))),
        ]);

        let summary = collection.summary();
        assert_eq!(summary.feature_count, 2);
        assert_eq!(summary.geometry_counts.get("Polygon"), Some(&1));
        assert_eq!(summary.geometry_counts.get("Point"), Some(&1));
        // one degree square at the equator is roughly 12,300 km2
        assert!(summary.area_hectares > 1.2e6 && summary.area_hectares < 1.25e6);
    }
}
