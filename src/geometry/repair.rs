// Geometry validity enforcement, the working equivalent of a zero-distance
// buffer: collapse zero-width slivers and duplicate vertices, drop rings
// degenerate beyond rescue, and report an empty result to the caller rather
// than erroring. Callers treat None as "no geometry for this label".

use geo::geometry::{Coord, LineString, MultiPolygon, Polygon};
use geo::Area;

/// Clean every ring of `geom`. A polygon whose exterior degenerates is
/// dropped along with its holes; an entirely empty result is None. A single
/// surviving polygon is still a one-element multipolygon.
pub fn repair(geom: MultiPolygon<f64>) -> Option<MultiPolygon<f64>> {
    let mut polygons = Vec::new();
    for polygon in geom {
        let exterior = match clean_ring(polygon.exterior()) {
            Some(ring) => ring,
            None => continue,
        };
        let interiors: Vec<LineString<f64>> = polygon
            .interiors()
            .iter()
            .filter_map(clean_ring)
            .collect();
        polygons.push(Polygon::new(exterior, interiors));
    }

    if polygons.is_empty() {
        None
    } else {
        Some(MultiPolygon::new(polygons))
    }
}

// Remove consecutive duplicate vertices and zero-width spikes (a vertex
// whose neighbors coincide) until stable, then require at least 3 distinct
// vertices and nonzero area.
fn clean_ring(ring: &LineString<f64>) -> Option<LineString<f64>> {
    let mut coords: Vec<Coord<f64>> = ring.0.clone();
    if coords.len() > 1 && coords.first() == coords.last() {
        coords.pop();
    }

    loop {
        let before = coords.len();

        coords.dedup();
        while coords.len() > 1 && coords.first() == coords.last() {
            coords.pop();
        }

        let mut i = 0;
        while coords.len() >= 3 && i < coords.len() {
            let prev = coords[(i + coords.len() - 1) % coords.len()];
            let next = coords[(i + 1) % coords.len()];
            if prev == next {
                coords.remove(i);
            } else {
                i += 1;
            }
        }

        if coords.len() == before {
            break;
        }
    }

    if coords.len() < 3 {
        return None;
    }

    let first = coords[0];
    coords.push(first);
    let ring = LineString::new(coords);
    if Polygon::new(ring.clone(), Vec::new()).unsigned_area() == 0.0 {
        return None;
    }
    Some(ring)
}

/// Check the postconditions repair is expected to establish. A violation
/// here is a bug in the repair step, not a property of the input data, so
/// it is surfaced loudly instead of being dropped like an ordinary
/// extraction failure.
pub fn assert_valid(geom: &MultiPolygon<f64>, what: &str) {
    assert!(!geom.0.is_empty(), "{}: repaired geometry is empty", what);
    for polygon in &geom.0 {
        for ring in std::iter::once(polygon.exterior()).chain(polygon.interiors().iter()) {
            assert!(
                ring_is_simple(ring),
                "{}: repaired ring still self-intersects",
                what
            );
        }
    }
}

// A ring is simple when no two non-adjacent edges properly cross.
fn ring_is_simple(ring: &LineString<f64>) -> bool {
    let coords = &ring.0;
    let n = coords.len().saturating_sub(1);
    for i in 0..n {
        for j in (i + 1)..n {
            if j == i + 1 || (i == 0 && j == n - 1) {
                continue;
            }
            if segments_cross(coords[i], coords[i + 1], coords[j], coords[j + 1]) {
                return false;
            }
        }
    }
    true
}

fn segments_cross(a: Coord<f64>, b: Coord<f64>, c: Coord<f64>, d: Coord<f64>) -> bool {
    fn orient(p: Coord<f64>, q: Coord<f64>, r: Coord<f64>) -> f64 {
        (q.x - p.x) * (r.y - p.y) - (q.y - p.y) * (r.x - p.x)
    }
    let d1 = orient(a, b, c);
    let d2 = orient(a, b, d);
    let d3 = orient(c, d, a);
    let d4 = orient(c, d, b);
    d1 * d2 < 0.0 && d3 * d4 < 0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Polygon<f64> {
        Polygon::new(
            LineString::from(vec![(0.0, 0.0), (2.0, 0.0), (2.0, 2.0), (0.0, 2.0), (0.0, 0.0)]),
            Vec::new(),
        )
    }

    #[test]
    fn valid_polygon_passes_through() {
        let repaired = repair(MultiPolygon::new(vec![square()])).unwrap();
        assert_eq!(repaired.0.len(), 1);
        assert_eq!(repaired.0[0].exterior().coords().count(), 5);
        assert_valid(&repaired, "test polygon");
    }

    #[test]
    fn collapses_spikes_and_duplicates() {
        let ring = LineString::from(vec![
            (0.0, 0.0),
            (1.0, 0.0),
            (1.0, 0.0),
            (2.0, 0.0),
            (2.0, 5.0), // spike tip
            (2.0, 0.0),
            (2.0, 2.0),
            (0.0, 2.0),
            (0.0, 0.0),
        ]);
        let repaired = repair(MultiPolygon::new(vec![Polygon::new(ring, Vec::new())])).unwrap();
        let coords: Vec<(f64, f64)> = repaired.0[0]
            .exterior()
            .coords()
            .map(|c| (c.x, c.y))
            .collect();
        assert_eq!(
            coords,
            vec![(0.0, 0.0), (1.0, 0.0), (2.0, 0.0), (2.0, 2.0), (0.0, 2.0), (0.0, 0.0)]
        );
        assert_valid(&repaired, "despiked polygon");
    }

    #[test]
    fn degenerate_ring_becomes_none() {
        let sliver = Polygon::new(
            LineString::from(vec![(0.0, 0.0), (1.0, 1.0), (2.0, 2.0), (0.0, 0.0)]),
            Vec::new(),
        );
        assert!(repair(MultiPolygon::new(vec![sliver])).is_none());
    }

    #[test]
    fn degenerate_hole_is_dropped_but_polygon_survives() {
        let hole = LineString::from(vec![(1.0, 1.0), (1.0, 1.0), (1.0, 1.0)]);
        let polygon = Polygon::new(square().exterior().clone(), vec![hole]);
        let repaired = repair(MultiPolygon::new(vec![polygon])).unwrap();
        assert_eq!(repaired.0.len(), 1);
        assert!(repaired.0[0].interiors().is_empty());
    }

    #[test]
    #[should_panic(expected = "self-intersects")]
    fn crossing_ring_fails_validity() {
        let bowtie = Polygon::new(
            LineString::from(vec![(0.0, 0.0), (2.0, 2.0), (2.0, 0.0), (0.0, 2.0), (0.0, 0.0)]),
            Vec::new(),
        );
        assert_valid(&MultiPolygon::new(vec![bowtie]), "bowtie");
    }
}
