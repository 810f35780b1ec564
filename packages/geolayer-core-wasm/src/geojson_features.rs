// GeoJSON boundary: the map widget consumes GeoJSON, and .geojson/.json uploads
// are read through the same conversion. Untyped input is validated here and
// never passed further than this module.
use geo_types::{Coord, LineString, MultiPolygon, Point, Polygon};
use serde_json::{json, Map, Value};

use crate::error::{GeoLayerError, Result};
use crate::models::{Feature, FeatureCollection, Geometry, Properties, PropertyValue};

/// Parse GeoJSON text (FeatureCollection, Feature or bare geometry).
pub fn parse_geojson(text: &str) -> Result<FeatureCollection> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let value: Value = serde_json::from_str(text)
        .map_err(|e| GeoLayerError::parse(format!("invalid GeoJSON: {}", e)))?;
    feature_collection_from_geojson(&value)
}

pub fn feature_collection_from_geojson(value: &Value) -> Result<FeatureCollection> {
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| GeoLayerError::parse("GeoJSON object has no 'type'"))?;

    match kind {
        "FeatureCollection" => {
            let features = value
                .get("features")
                .and_then(Value::as_array)
                .ok_or_else(|| GeoLayerError::parse("FeatureCollection has no 'features' array"))?;
            let mut parsed = Vec::with_capacity(features.len());
            for feature in features {
                if let Some(feature) = parse_feature(feature)? {
                    parsed.push(feature);
                }
            }
            Ok(FeatureCollection::new(parsed))
        }
        "Feature" => Ok(FeatureCollection::new(parse_feature(value)?.into_iter().collect())),
        _ => Ok(FeatureCollection::new(vec![Feature::new(parse_geometry(value)?)])),
    }
}

// Features with a null geometry carry nothing to display and are dropped
fn parse_feature(value: &Value) -> Result<Option<Feature>> {
    if value.get("type").and_then(Value::as_str) != Some("Feature") {
        return Err(GeoLayerError::parse("FeatureCollection member is not a Feature"));
    }

    let geometry = match value.get("geometry") {
        None | Some(Value::Null) => return Ok(None),
        Some(geometry) => parse_geometry(geometry)?,
    };

    let properties = match value.get("properties") {
        None | Some(Value::Null) => Properties::new(),
        Some(Value::Object(map)) => parse_properties(map)?,
        Some(_) => return Err(GeoLayerError::parse("Feature 'properties' is not an object")),
    };

    Ok(Some(Feature { geometry, properties }))
}

fn parse_properties(map: &Map<String, Value>) -> Result<Properties> {
    map.iter()
        .map(|(name, value)| {
            let scalar = match value {
                Value::Null => PropertyValue::Null,
                Value::Bool(b) => PropertyValue::Bool(*b),
                Value::Number(n) => PropertyValue::Number(n.as_f64().unwrap_or(f64::NAN)),
                Value::String(s) => PropertyValue::String(s.clone()),
                Value::Array(_) | Value::Object(_) => {
                    return Err(GeoLayerError::parse(format!(
                        "property '{}' is not a scalar value",
                        name
                    )))
                }
            };
            Ok((name.clone(), scalar))
        })
        .collect()
}

fn parse_geometry(value: &Value) -> Result<Geometry> {
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| GeoLayerError::parse("geometry has no 'type'"))?;
    let coordinates = value
        .get("coordinates")
        .ok_or_else(|| GeoLayerError::parse(format!("{} geometry has no 'coordinates'", kind)))?;

    match kind {
        "Point" => Ok(Geometry::Point(Point::from(parse_position(coordinates)?))),
        "LineString" => {
            let coords = parse_positions(coordinates)?;
            if coords.len() < 2 {
                return Err(GeoLayerError::parse("LineString needs at least two positions"));
            }
            Ok(Geometry::LineString(LineString::new(coords)))
        }
        "Polygon" => Ok(Geometry::Polygon(parse_polygon(coordinates)?)),
        "MultiPolygon" => {
            let polygons = as_array(coordinates)?
                .iter()
                .map(parse_polygon)
                .collect::<Result<Vec<_>>>()?;
            Ok(Geometry::MultiPolygon(MultiPolygon::new(polygons)))
        }
        other => Err(GeoLayerError::parse(format!(
            "unsupported GeoJSON geometry type '{}'",
            other
        ))),
    }
}

fn as_array(value: &Value) -> Result<&Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| GeoLayerError::parse(format!("expected a coordinate array, found {}", value)))
}

fn parse_position(value: &Value) -> Result<Coord<f64>> {
    let position = as_array(value)?;
    match (
        position.first().and_then(Value::as_f64),
        position.get(1).and_then(Value::as_f64),
    ) {
        (Some(x), Some(y)) if (-180.0..=180.0).contains(&x) && (-90.0..=90.0).contains(&y) => {
            Ok(Coord { x, y })
        }
        (Some(_), Some(_)) => Err(GeoLayerError::parse(format!(
            "position {} is outside longitude/latitude range",
            value
        ))),
        _ => Err(GeoLayerError::parse(format!("invalid position {}", value))),
    }
}

fn parse_positions(value: &Value) -> Result<Vec<Coord<f64>>> {
    as_array(value)?.iter().map(parse_position).collect()
}

fn parse_polygon(value: &Value) -> Result<Polygon<f64>> {
    let mut rings = as_array(value)?
        .iter()
        .map(parse_ring)
        .collect::<Result<Vec<_>>>()?
        .into_iter();
    let exterior = rings
        .next()
        .ok_or_else(|| GeoLayerError::parse("Polygon has no exterior ring"))?;
    Ok(Polygon::new(exterior, rings.collect()))
}

fn parse_ring(value: &Value) -> Result<LineString<f64>> {
    let mut coords = parse_positions(value)?;
    let closed = coords.len() > 1 && coords.first() == coords.last();
    let distinct = if closed { coords.len() - 1 } else { coords.len() };
    if distinct < 3 {
        return Err(GeoLayerError::parse(format!(
            "polygon ring needs at least three positions, found {}",
            distinct
        )));
    }
    if !closed {
        coords.push(coords[0]);
    }
    Ok(LineString::new(coords))
}

/// Serialize a collection as a GeoJSON FeatureCollection for the map widget.
pub fn feature_collection_to_geojson(collection: &FeatureCollection) -> Value {
    let features: Vec<Value> = collection
        .iter()
        .map(|feature| {
            json!({
                "type": "Feature",
                "geometry": geometry_to_geojson(&feature.geometry),
                "properties": properties_to_geojson(&feature.properties),
            })
        })
        .collect();

    json!({
        "type": "FeatureCollection",
        "features": features,
    })
}

fn ring_coords(ring: &LineString<f64>) -> Vec<[f64; 2]> {
    ring.coords().map(|c| [c.x, c.y]).collect()
}

fn polygon_coords(polygon: &Polygon<f64>) -> Vec<Vec<[f64; 2]>> {
    std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .map(ring_coords)
        .collect()
}

fn geometry_to_geojson(geometry: &Geometry) -> Value {
    match geometry {
        Geometry::Point(p) => json!({ "type": "Point", "coordinates": [p.x(), p.y()] }),
        Geometry::LineString(l) => json!({ "type": "LineString", "coordinates": ring_coords(l) }),
        Geometry::Polygon(p) => json!({ "type": "Polygon", "coordinates": polygon_coords(p) }),
        Geometry::MultiPolygon(m) => {
            let polygons: Vec<_> = m.iter().map(polygon_coords).collect();
            json!({ "type": "MultiPolygon", "coordinates": polygons })
        }
    }
}

fn properties_to_geojson(properties: &Properties) -> Value {
    let map: Map<String, Value> = properties
        .iter()
        .map(|(name, value)| {
            let json_value = match value {
                PropertyValue::Null => Value::Null,
                PropertyValue::Bool(b) => Value::Bool(*b),
                // NaN and infinities have no JSON representation
                PropertyValue::Number(n) => serde_json::Number::from_f64(*n)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
                PropertyValue::String(s) => Value::String(s.clone()),
            };
            (name.clone(), json_value)
        })
        .collect();
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GeometryType;

    #[test]
    fn reads_feature_collection_with_scalar_properties() {
        let text = r#"{
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "properties": {"name": "finca", "area": 3.5, "irrigated": true, "owner": null},
                 "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]]}},
                {"type": "Feature", "properties": null, "geometry": null},
                {"type": "Feature", "geometry": {"type": "Point", "coordinates": [-3.7, 40.4, 667]}}
            ]
        }"#;

        let collection = parse_geojson(text).expect("valid GeoJSON");
        assert_eq!(collection.len(), 2);
        assert_eq!(collection.features[0].geometry.geometry_type(), GeometryType::Polygon);
        assert_eq!(collection.features[1].geometry.geometry_type(), GeometryType::Point);

        let properties = &collection.features[0].properties;
        assert_eq!(properties.get("name"), Some(&PropertyValue::from("finca")));
        assert_eq!(properties.get("area"), Some(&PropertyValue::Number(3.5)));
        assert_eq!(properties.get("irrigated"), Some(&PropertyValue::Bool(true)));
        assert_eq!(properties.get("owner"), Some(&PropertyValue::Null));
    }

    #[test]
    fn bare_geometry_becomes_a_single_feature() {
        let collection =
            parse_geojson(r#"{"type": "LineString", "coordinates": [[0,0],[2,1]]}"#).expect("valid");
        assert_eq!(collection.len(), 1);
        assert!(collection.features[0].properties.is_empty());
    }

    #[test]
    fn unsupported_geometry_and_nested_properties_are_rejected() {
        let multi_line = r#"{"type": "MultiLineString", "coordinates": [[[0,0],[1,1]]]}"#;
        assert_eq!(
            parse_geojson(multi_line),
            Err(GeoLayerError::parse("unsupported GeoJSON geometry type 'MultiLineString'"))
        );

        let nested = r#"{"type": "Feature", "properties": {"tags": ["a"]},
                         "geometry": {"type": "Point", "coordinates": [0,0]}}"#;
        assert_eq!(
            parse_geojson(nested),
            Err(GeoLayerError::parse("property 'tags' is not a scalar value"))
        );
    }

    #[test]
    fn positions_outside_lon_lat_range_are_rejected() {
        assert_eq!(
            parse_geojson(r#"{"type": "Point", "coordinates": [0, 95]}"#),
            Err(GeoLayerError::parse("position [0,95] is outside longitude/latitude range"))
        );

        let line = r#"{"type": "LineString", "coordinates": [[0, 0], [-180.5, 10]]}"#;
        assert_eq!(
            parse_geojson(line),
            Err(GeoLayerError::parse("position [-180.5,10] is outside longitude/latitude range"))
        );

        let edges = r#"{"type": "LineString", "coordinates": [[-180, -90], [180, 90]]}"#;
        assert!(parse_geojson(edges).is_ok());
    }

    #[test]
    fn output_is_leaflet_ready_geojson() {
        let collection = FeatureCollection::new(vec![Feature::new(Geometry::Point(Point::new(
            -3.7038, 40.4168,
        )))
        .with_property("name", "Madrid")
        .with_property("score", f64::NAN)]);

        let value = feature_collection_to_geojson(&collection);
        assert_eq!(
            value,
            json!({
                "type": "FeatureCollection",
                "features": [{
                    "type": "Feature",
                    "geometry": {"type": "Point", "coordinates": [-3.7038, 40.4168]},
                    "properties": {"name": "Madrid", "score": null}
                }]
            })
        );
    }

    #[test]
    fn written_polygons_read_back_unchanged() {
        let text = r#"{"type": "MultiPolygon", "coordinates": [
            [[[0,0],[4,0],[4,4],[0,4],[0,0]], [[1,1],[2,1],[2,2],[1,1]]],
            [[[10,10],[11,10],[11,11],[10,10]]]
        ]}"#;
        let collection = parse_geojson(text).expect("valid");
        let written = feature_collection_to_geojson(&collection);
        assert_eq!(feature_collection_from_geojson(&written), Ok(collection));
    }
}
