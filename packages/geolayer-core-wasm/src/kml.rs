// KML reader: walks the document for Placemarks and converts their geometry
// into the normalized feature model.
//
// Elements are matched on their local name so kml/2.1, kml/2.2 and prefixed
// documents all read the same way.
use geo_types::{Coord, LineString, MultiPolygon, Point, Polygon};
use roxmltree::{Document, Node};

use crate::console_log;
use crate::error::{GeoLayerError, Result};
use crate::models::{Feature, FeatureCollection, Geometry, Properties, PropertyValue};

// Every KML geometry element. Only some of them are supported, the rest are
// rejected by name instead of being skipped.
const GEOMETRY_ELEMENTS: &[&str] = &[
    "Point",
    "LineString",
    "LinearRing",
    "Polygon",
    "MultiGeometry",
    "Model",
    "Track",
    "MultiTrack",
];

/// Parse KML markup into a feature collection, one feature per Placemark geometry,
/// in document order.
pub fn parse_kml(text: &str) -> Result<FeatureCollection> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let doc = Document::parse(text)
        .map_err(|e| GeoLayerError::parse(format!("malformed KML markup: {}", e)))?;

    let root = doc.root_element();
    if root.tag_name().name() != "kml" {
        return Err(GeoLayerError::parse(format!(
            "root element <{}> is not <kml>",
            root.tag_name().name()
        )));
    }

    let mut features = Vec::new();
    for placemark in root.descendants().filter(|n| is_element(n, "Placemark")) {
        if let Some(feature) = parse_placemark(placemark)? {
            features.push(feature);
        }
    }

    console_log!("Parsed {} features from KML", features.len());
    Ok(FeatureCollection::new(features))
}

fn is_element(node: &Node, name: &str) -> bool {
    node.is_element() && node.tag_name().name() == name
}

fn child_element<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| is_element(n, name))
}

// Concatenated text content (CDATA included), trimmed
fn element_text(node: Node) -> String {
    node.descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect::<String>()
        .trim()
        .to_string()
}

fn error_at(node: Node, message: String) -> GeoLayerError {
    let pos = node.document().text_pos_at(node.range().start);
    GeoLayerError::parse(format!("{} (line {}, column {})", message, pos.row, pos.col))
}

fn parse_placemark(placemark: Node) -> Result<Option<Feature>> {
    let mut geometry_node = None;
    for child in placemark.children().filter(|n| n.is_element()) {
        let name = child.tag_name().name();
        if !GEOMETRY_ELEMENTS.contains(&name) {
            continue;
        }
        if geometry_node.is_some() {
            return Err(error_at(
                child,
                format!("<Placemark> has more than one geometry (extra <{}>)", name),
            ));
        }
        geometry_node = Some(child);
    }

    let Some(node) = geometry_node else {
        console_log!("Skipping Placemark without geometry");
        return Ok(None);
    };

    Ok(Some(Feature {
        geometry: parse_geometry(node)?,
        properties: placemark_properties(placemark),
    }))
}

fn parse_geometry(node: Node) -> Result<Geometry> {
    match node.tag_name().name() {
        "Point" => {
            let coords = read_coordinates(node)?;
            if coords.len() != 1 {
                return Err(error_at(
                    node,
                    format!("<Point> needs exactly one coordinate, found {}", coords.len()),
                ));
            }
            Ok(Geometry::Point(Point::from(coords[0])))
        }
        "LineString" => {
            let coords = read_coordinates(node)?;
            if coords.len() < 2 {
                return Err(error_at(
                    node,
                    format!("<LineString> needs at least two coordinates, found {}", coords.len()),
                ));
            }
            Ok(Geometry::LineString(LineString::new(coords)))
        }
        "Polygon" => parse_polygon(node).map(Geometry::Polygon),
        "MultiGeometry" => parse_multi_geometry(node),
        other => Err(error_at(node, format!("unsupported geometry element <{}>", other))),
    }
}

fn parse_polygon(node: Node) -> Result<Polygon<f64>> {
    let outer = child_element(node, "outerBoundaryIs")
        .ok_or_else(|| error_at(node, "<Polygon> is missing <outerBoundaryIs>".to_string()))?;
    let exterior = parse_boundary_rings(outer)?
        .into_iter()
        .next()
        .ok_or_else(|| error_at(outer, "<outerBoundaryIs> contains no <LinearRing>".to_string()))?;

    let mut interiors = Vec::new();
    for inner in node.children().filter(|n| is_element(n, "innerBoundaryIs")) {
        let rings = parse_boundary_rings(inner)?;
        if rings.is_empty() {
            return Err(error_at(inner, "<innerBoundaryIs> contains no <LinearRing>".to_string()));
        }
        interiors.extend(rings);
    }

    Ok(Polygon::new(exterior, interiors))
}

fn parse_boundary_rings(boundary: Node) -> Result<Vec<LineString<f64>>> {
    boundary
        .children()
        .filter(|n| is_element(n, "LinearRing"))
        .map(parse_linear_ring)
        .collect()
}

fn parse_linear_ring(ring: Node) -> Result<LineString<f64>> {
    let mut coords = read_coordinates(ring)?;
    let closed = coords.len() > 1 && coords.first() == coords.last();
    let distinct = if closed { coords.len() - 1 } else { coords.len() };
    if distinct < 3 {
        return Err(error_at(
            ring,
            format!("<LinearRing> needs at least three positions, found {}", distinct),
        ));
    }
    if !closed {
        coords.push(coords[0]);
    }
    Ok(LineString::new(coords))
}

fn parse_multi_geometry(node: Node) -> Result<Geometry> {
    let mut parts = Vec::new();
    for child in node.children().filter(|n| n.is_element()) {
        if GEOMETRY_ELEMENTS.contains(&child.tag_name().name()) {
            parts.push(parse_geometry(child)?);
        }
    }

    if parts.len() == 1 {
        return Ok(parts.remove(0));
    }
    if parts.is_empty() {
        return Err(error_at(node, "<MultiGeometry> contains no geometry".to_string()));
    }

    let mut polygons = Vec::new();
    for part in parts {
        match part {
            Geometry::Polygon(polygon) => polygons.push(polygon),
            Geometry::MultiPolygon(multi) => polygons.extend(multi.0),
            other => {
                return Err(error_at(
                    node,
                    format!(
                        "<MultiGeometry> mixing {} with other geometries is not supported",
                        other.geometry_type()
                    ),
                ))
            }
        }
    }
    Ok(Geometry::MultiPolygon(MultiPolygon::new(polygons)))
}

// Reads the `<coordinates>` child of a geometry element: whitespace separated
// `lon,lat[,alt]` tuples. Altitude is dropped.
fn read_coordinates(geometry: Node) -> Result<Vec<Coord<f64>>> {
    let element = geometry.tag_name().name();
    let node = child_element(geometry, "coordinates").ok_or_else(|| {
        error_at(geometry, format!("<{}> is missing <coordinates>", element))
    })?;

    let text = element_text(node);
    if text.is_empty() {
        return Err(error_at(node, format!("<coordinates> of <{}> is empty", element)));
    }

    text.split_whitespace()
        .map(|tuple| {
            parse_tuple(tuple).ok_or_else(|| {
                error_at(
                    node,
                    format!("invalid coordinate tuple '{}' in <{}>", tuple, element),
                )
            })
        })
        .collect()
}

fn parse_tuple(tuple: &str) -> Option<Coord<f64>> {
    let mut values = tuple.split(',');
    let lng: f64 = values.next()?.trim().parse().ok()?;
    let lat: f64 = values.next()?.trim().parse().ok()?;
    if let Some(alt) = values.next() {
        alt.trim().parse::<f64>().ok()?;
    }
    if values.next().is_some() {
        return None;
    }
    if !(-180.0..=180.0).contains(&lng) || !(-90.0..=90.0).contains(&lat) {
        return None;
    }
    Some(Coord { x: lng, y: lat })
}

fn placemark_properties(placemark: Node) -> Properties {
    let mut properties = Properties::new();

    for field in ["name", "description"] {
        if let Some(node) = child_element(placemark, field) {
            properties.insert(field.to_string(), PropertyValue::String(element_text(node)));
        }
    }

    if let Some(extended) = child_element(placemark, "ExtendedData") {
        for node in extended.descendants().filter(|n| n.is_element()) {
            let Some(key) = node.attribute("name") else {
                continue;
            };
            let value = match node.tag_name().name() {
                "Data" => child_element(node, "value").map(element_text),
                "SimpleData" => Some(element_text(node)),
                _ => None,
            };
            if let Some(value) = value {
                properties.insert(key.to_string(), PropertyValue::String(value));
            }
        }
    }

    properties
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GeometryType;

    fn kml_document(body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2">
  <Document>
    {}
  </Document>
</kml>"#,
            body
        )
    }

    fn coords_of(ring: &LineString<f64>) -> Vec<(f64, f64)> {
        ring.coords().map(|c| (c.x, c.y)).collect()
    }

    fn expect_parse_failure(text: &str) -> String {
        match parse_kml(text) {
            Err(GeoLayerError::ParseFailure(cause)) => cause,
            other => panic!("expected parse failure, got {:?}", other),
        }
    }

    #[test]
    fn unit_square_polygon_keeps_its_five_positions_in_order() {
        let text = kml_document(
            r#"<Placemark>
                 <Polygon><outerBoundaryIs><LinearRing>
                   <coordinates>0,0 1,0 1,1 0,1 0,0</coordinates>
                 </LinearRing></outerBoundaryIs></Polygon>
               </Placemark>"#,
        );

        let collection = parse_kml(&text).expect("valid KML");
        assert_eq!(collection.len(), 1);

        let Geometry::Polygon(polygon) = &collection.features[0].geometry else {
            panic!("expected a polygon");
        };
        assert_eq!(
            coords_of(polygon.exterior()),
            vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)]
        );
        assert!(polygon.interiors().is_empty());
    }

    #[test]
    fn placemarks_are_collected_in_source_order_across_folders() {
        let text = kml_document(
            r#"<Placemark><name>first</name>
                 <Point><coordinates>-3.7038,40.4168,650</coordinates></Point>
               </Placemark>
               <Folder>
                 <Placemark><name>second</name>
                   <LineString><coordinates>
                     -3.71,40.41 -3.70,40.42
                     -3.69,40.43
                   </coordinates></LineString>
                 </Placemark>
                 <Folder>
                   <Placemark><name>third</name>
                     <Polygon>
                       <outerBoundaryIs><LinearRing><coordinates>0,0 4,0 4,4 0,4 0,0</coordinates></LinearRing></outerBoundaryIs>
                       <innerBoundaryIs><LinearRing><coordinates>1,1 2,1 2,2 1,1</coordinates></LinearRing></innerBoundaryIs>
                     </Polygon>
                   </Placemark>
                 </Folder>
               </Folder>"#,
        );

        let collection = parse_kml(&text).expect("valid KML");
        let types: Vec<GeometryType> = collection
            .iter()
            .map(|f| f.geometry.geometry_type())
            .collect();
        assert_eq!(
            types,
            vec![GeometryType::Point, GeometryType::LineString, GeometryType::Polygon]
        );

        let names: Vec<_> = collection
            .iter()
            .map(|f| f.properties.get("name").cloned())
            .collect();
        assert_eq!(
            names,
            vec![
                Some(PropertyValue::from("first")),
                Some(PropertyValue::from("second")),
                Some(PropertyValue::from("third")),
            ]
        );

        let Geometry::Point(point) = &collection.features[0].geometry else {
            panic!("expected a point");
        };
        assert_eq!((point.x(), point.y()), (-3.7038, 40.4168));

        let Geometry::Polygon(polygon) = &collection.features[2].geometry else {
            panic!("expected a polygon");
        };
        assert_eq!(polygon.interiors().len(), 1);
    }

    #[test]
    fn unclosed_tag_is_a_parse_failure() {
        let text = r#"<kml xmlns="http://www.opengis.net/kml/2.2"><Document><Placemark>
            <Point><coordinates>1,2</coordinates></Point>
          </Document></kml>"#;
        let cause = expect_parse_failure(text);
        assert!(cause.starts_with("malformed KML markup"), "{}", cause);
    }

    #[test]
    fn missing_coordinates_names_the_geometry() {
        let text = kml_document("<Placemark><LineString><tessellate>1</tessellate></LineString></Placemark>");
        let cause = expect_parse_failure(&text);
        assert!(cause.contains("<LineString> is missing <coordinates>"), "{}", cause);
    }

    #[test]
    fn empty_and_garbled_coordinates_are_rejected() {
        let empty = kml_document("<Placemark><Point><coordinates>  </coordinates></Point></Placemark>");
        assert!(expect_parse_failure(&empty).contains("is empty"));

        let garbled = kml_document("<Placemark><Point><coordinates>east,north</coordinates></Point></Placemark>");
        assert!(expect_parse_failure(&garbled).contains("invalid coordinate tuple 'east,north'"));

        let out_of_range = kml_document("<Placemark><Point><coordinates>0,95</coordinates></Point></Placemark>");
        assert!(expect_parse_failure(&out_of_range).contains("invalid coordinate tuple"));
    }

    #[test]
    fn unsupported_geometry_is_named_not_skipped() {
        let text = kml_document(
            r#"<Placemark><Model><Location><longitude>1</longitude></Location></Model></Placemark>"#,
        );
        let cause = expect_parse_failure(&text);
        assert!(cause.contains("unsupported geometry element <Model>"), "{}", cause);
    }

    #[test]
    fn degenerate_ring_is_rejected() {
        let text = kml_document(
            r#"<Placemark><Polygon><outerBoundaryIs><LinearRing>
                 <coordinates>0,0 1,1 0,0</coordinates>
               </LinearRing></outerBoundaryIs></Polygon></Placemark>"#,
        );
        assert!(expect_parse_failure(&text).contains("<LinearRing> needs at least three positions"));
    }

    #[test]
    fn open_ring_is_closed() {
        let text = kml_document(
            r#"<Placemark><Polygon><outerBoundaryIs><LinearRing>
                 <coordinates>0,0 1,0 1,1</coordinates>
               </LinearRing></outerBoundaryIs></Polygon></Placemark>"#,
        );
        let collection = parse_kml(&text).expect("valid KML");
        let Geometry::Polygon(polygon) = &collection.features[0].geometry else {
            panic!("expected a polygon");
        };
        assert_eq!(
            coords_of(polygon.exterior()),
            vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 0.0)]
        );
    }

    #[test]
    fn root_must_be_kml() {
        let cause = expect_parse_failure("<gpx><trk/></gpx>");
        assert!(cause.contains("root element <gpx> is not <kml>"));
    }

    #[test]
    fn multi_geometry_of_polygons_becomes_multipolygon() {
        let ring = "<outerBoundaryIs><LinearRing><coordinates>0,0 1,0 1,1 0,0</coordinates></LinearRing></outerBoundaryIs>";
        let text = kml_document(&format!(
            "<Placemark><MultiGeometry><Polygon>{ring}</Polygon><Polygon>{ring}</Polygon></MultiGeometry></Placemark>"
        ));
        let collection = parse_kml(&text).expect("valid KML");
        let Geometry::MultiPolygon(multi) = &collection.features[0].geometry else {
            panic!("expected a multipolygon");
        };
        assert_eq!(multi.0.len(), 2);

        let mixed = kml_document(&format!(
            "<Placemark><MultiGeometry><Polygon>{ring}</Polygon><Point><coordinates>1,1</coordinates></Point></MultiGeometry></Placemark>"
        ));
        assert!(expect_parse_failure(&mixed).contains("<MultiGeometry> mixing Point"));
    }

    #[test]
    fn extended_data_and_description_become_properties() {
        let text = kml_document(
            r##"<Placemark>
                 <name>Parcela 7</name>
                 <description><![CDATA[<b>olive grove</b>]]></description>
                 <ExtendedData>
                   <Data name="owner"><value>Cooperativa</value></Data>
                   <SchemaData schemaUrl="#parcels"><SimpleData name="area_ha">12.5</SimpleData></SchemaData>
                 </ExtendedData>
                 <Point><coordinates>-4.0,37.8</coordinates></Point>
               </Placemark>
               <Placemark><name>no geometry here</name></Placemark>"##,
        );

        let collection = parse_kml(&text).expect("valid KML");
        assert_eq!(collection.len(), 1);
        let properties = &collection.features[0].properties;
        assert_eq!(properties.get("name"), Some(&PropertyValue::from("Parcela 7")));
        assert_eq!(properties.get("description"), Some(&PropertyValue::from("<b>olive grove</b>")));
        assert_eq!(properties.get("owner"), Some(&PropertyValue::from("Cooperativa")));
        assert_eq!(properties.get("area_ha"), Some(&PropertyValue::from("12.5")));
    }

    #[test]
    fn byte_order_mark_and_empty_document_are_accepted() {
        let collection = parse_kml("\u{feff}<kml><Document/></kml>").expect("valid KML");
        assert!(collection.is_empty());
    }
}
