// GeoJSON FeatureCollection parsing for externally drawn cell and annotation
// polygons. Only the parts of the format the upstream tools emit are
// handled; anything else is a fatal input error.

use flate2::read::GzDecoder;
use geo::geometry::{LineString, MultiPolygon, Polygon};
use json::JsonValue;
use std::fs::File;
use std::io::Read;
use std::path::Path;

pub struct Feature {
    pub properties: JsonValue,
    pub geometry: MultiPolygon<f64>,
}

pub fn read_feature_collection(path: &Path) -> Vec<Feature> {
    let file = File::open(path)
        .unwrap_or_else(|err| panic!("Unable to open '{}': {}", path.display(), err));

    let mut content = String::new();
    let read_result = if path.to_string_lossy().ends_with(".gz") {
        GzDecoder::new(file).read_to_string(&mut content)
    } else {
        let mut file = file;
        file.read_to_string(&mut content)
    };
    read_result.unwrap_or_else(|err| {
        panic!("Unable to read geojson file {}: {}", path.display(), err)
    });

    let data = json::parse(&content)
        .unwrap_or_else(|err| panic!("Unable to parse geojson file {}: {}", path.display(), err));

    let features = &data["features"];
    assert!(
        !features.is_null(),
        "{}: expected a geojson FeatureCollection with a 'features' member",
        path.display()
    );

    features
        .members()
        .map(|feature| Feature {
            properties: feature["properties"].clone(),
            geometry: parse_geometry(&feature["geometry"]),
        })
        .collect()
}

fn parse_geometry(geometry: &JsonValue) -> MultiPolygon<f64> {
    let coordinates = &geometry["coordinates"];
    match geometry["type"].as_str() {
        Some("MultiPolygon") => {
            MultiPolygon::new(coordinates.members().map(parse_polygon).collect())
        }
        Some("Polygon") => MultiPolygon::new(vec![parse_polygon(coordinates)]),
        other => panic!("Unsupported geojson geometry type: {:?}", other),
    }
}

fn parse_polygon(rings: &JsonValue) -> Polygon<f64> {
    let mut rings = rings.members().map(parse_ring);
    let exterior = rings
        .next()
        .unwrap_or_else(|| panic!("geojson polygon with no rings"));
    Polygon::new(exterior, rings.collect())
}

fn parse_ring(ring: &JsonValue) -> LineString<f64> {
    LineString::from(
        ring.members()
            .map(|xy| {
                let x = xy[0].as_f64();
                let y = xy[1].as_f64();
                match (x, y) {
                    (Some(x), Some(y)) => (x, y),
                    _ => panic!("Malformed coordinate in geojson ring: {}", xy),
                }
            })
            .collect::<Vec<(f64, f64)>>(),
    )
}
