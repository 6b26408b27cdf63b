// Vector to raster conversion, the inverse of contour extraction. A pixel is
// filled when its center (x = col, y = row) lies inside the multipolygon
// under the even-odd rule, so holes are left open. Boundary hits resolve
// half-open (left/top inclusive), keeping adjacent polygons from both
// claiming a center.
//
// Overlap between successive polygons is resolved by override: the merge is
// a pure fold where the incoming mask wins every pixel it covers and leaves
// the rest of the accumulator untouched. Later entries in the input sequence
// therefore win over earlier ones.

use geo::geometry::MultiPolygon;
use geo::BoundingRect;
use ndarray::{s, Array2, Zip};

/// Scan-fill `geom` onto a window of the canvas. Window pixel [r, c] is
/// canvas pixel [r + origin.0, c + origin.1]; centers are tested in canvas
/// coordinates, so a windowed fill is bit-identical to the same region of a
/// full-canvas fill.
pub fn rasterize_window(
    geom: &MultiPolygon<f64>,
    origin: (usize, usize),
    shape: (usize, usize),
) -> Array2<bool> {
    let (rows, cols) = shape;
    let (row_origin, col_origin) = origin;
    let mut mask = Array2::from_elem(shape, false);
    let mut crossings: Vec<f64> = Vec::new();

    for r in 0..rows {
        let y = (r + row_origin) as f64;

        crossings.clear();
        for polygon in &geom.0 {
            for ring in std::iter::once(polygon.exterior()).chain(polygon.interiors().iter()) {
                for edge in ring.0.windows(2) {
                    let (p, q) = (edge[0], edge[1]);
                    if (p.y > y) != (q.y > y) {
                        crossings.push(p.x + (y - p.y) * (q.x - p.x) / (q.y - p.y));
                    }
                }
            }
        }
        crossings.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap());

        for pair in crossings.chunks_exact(2) {
            let (x0, x1) = (pair[0], pair[1]);
            let mut c = x0.ceil() as i64 - col_origin as i64;
            if c < 0 {
                c = 0;
            }
            while (c as usize) < cols && ((c + col_origin as i64) as f64) < x1 {
                mask[[r, c as usize]] = true;
                c += 1;
            }
        }
    }
    mask
}

/// Full-canvas fill of `geom` over a (rows, cols) raster.
pub fn rasterize(geom: &MultiPolygon<f64>, shape: (usize, usize)) -> Array2<bool> {
    rasterize_window(geom, (0, 0), shape)
}

/// The bounding-box window of `geom` clamped to the canvas: (origin, shape)
/// covering every pixel center the geometry can reach, or None when the
/// geometry lies entirely outside the canvas (or is empty).
pub fn window(geom: &MultiPolygon<f64>, canvas: (usize, usize)) -> Option<((usize, usize), (usize, usize))> {
    let bounds = geom.bounding_rect()?;
    let (rows, cols) = canvas;

    let r0 = (bounds.min().y.ceil().max(0.0) as usize).min(rows);
    let c0 = (bounds.min().x.ceil().max(0.0) as usize).min(cols);
    let r1 = ((bounds.max().y.floor() + 1.0).max(0.0) as usize).min(rows);
    let c1 = ((bounds.max().x.floor() + 1.0).max(0.0) as usize).min(cols);
    if r0 >= r1 || c0 >= c1 {
        return None;
    }
    Some(((r0, c0), (r1 - r0, c1 - c0)))
}

/// Pure-fold override merge: wherever `mask` is set, the accumulator takes
/// `label`; elsewhere it is left unchanged.
pub fn overlay(
    mut acc: Array2<u32>,
    mask: &Array2<bool>,
    origin: (usize, usize),
    label: u32,
) -> Array2<u32> {
    let (rows, cols) = mask.dim();
    let mut view = acc.slice_mut(s![origin.0..origin.0 + rows, origin.1..origin.1 + cols]);
    Zip::from(&mut view).and(mask).for_each(|value, &hit| {
        if hit {
            *value = label;
        }
    });
    acc
}

/// Rasterize `geom` within its bounding-box window and override-merge it
/// into the accumulator under `label`.
pub fn stamp(acc: Array2<u32>, geom: &MultiPolygon<f64>, label: u32) -> Array2<u32> {
    match window(geom, acc.dim()) {
        Some((origin, shape)) => {
            let mask = rasterize_window(geom, origin, shape);
            overlay(acc, &mask, origin, label)
        }
        None => acc,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::contour::{BoundingBox, ContourBuilder};
    use crate::geometry::repair;
    use geo::geometry::{LineString, Polygon};
    use ndarray::Array2;

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![Polygon::new(
            LineString::from(vec![(x0, y0), (x1, y0), (x1, y1), (x0, y1), (x0, y0)]),
            Vec::new(),
        )])
    }

    #[test]
    fn fills_pixel_centers_inside() {
        let mask = rasterize(&rect(0.5, 0.5, 2.5, 1.5), (4, 4));
        let filled: Vec<(usize, usize)> = mask
            .indexed_iter()
            .filter_map(|(idx, &v)| if v { Some(idx) } else { None })
            .collect();
        assert_eq!(filled, vec![(1, 1), (1, 2)]);
    }

    #[test]
    fn holes_are_left_open() {
        let donut = MultiPolygon::new(vec![Polygon::new(
            LineString::from(vec![(-0.5, -0.5), (4.5, -0.5), (4.5, 4.5), (-0.5, 4.5), (-0.5, -0.5)]),
            vec![LineString::from(vec![
                (1.5, 1.5),
                (2.5, 1.5),
                (2.5, 2.5),
                (1.5, 2.5),
                (1.5, 1.5),
            ])],
        )]);
        let mask = rasterize(&donut, (5, 5));
        assert!(!mask[[2, 2]]);
        assert!(mask[[1, 1]]);
        assert_eq!(mask.iter().filter(|&&v| v).count(), 24);
    }

    #[test]
    fn override_merge_is_order_dependent() {
        let a = rect(-0.5, -0.5, 2.5, 2.5);
        let b = rect(1.5, 1.5, 4.5, 4.5);

        let ab = stamp(stamp(Array2::zeros((5, 5)), &a, 1), &b, 2);
        let ba = stamp(stamp(Array2::zeros((5, 5)), &b, 2), &a, 1);

        // the contested pixel is (2, 2); the later write wins
        assert_eq!(ab[[2, 2]], 2);
        assert_eq!(ba[[2, 2]], 1);
        assert_eq!(ab[[0, 0]], 1);
        assert_eq!(ab[[4, 4]], 2);
        assert_eq!(ba[[0, 0]], 1);
        assert_eq!(ba[[4, 4]], 2);
    }

    #[test]
    fn windowed_merge_matches_full_canvas() {
        let geom = rect(1.25, 0.75, 5.25, 3.75);
        let full = rasterize(&geom, (8, 8));

        let stamped = stamp(Array2::zeros((8, 8)), &geom, 1);
        for (idx, &v) in full.indexed_iter() {
            assert_eq!(stamped[idx] == 1, v, "mismatch at {:?}", idx);
        }
    }

    #[test]
    fn geometry_outside_canvas_is_a_no_op() {
        let acc = stamp(Array2::zeros((4, 4)), &rect(10.0, 10.0, 12.0, 12.0), 3);
        assert!(acc.iter().all(|&v| v == 0));
    }

    // extraction then rasterization lands back on the exact label pixels;
    // the traced polygon area stays within one perimeter's worth of the
    // pixel count
    #[test]
    fn mask_polygon_mask_round_trip() {
        let mut slice = Array2::<u32>::zeros((8, 9));
        for r in 2..6 {
            for c in 3..7 {
                slice[[r, c]] = 11;
            }
        }
        slice[[4, 7]] = 11;
        slice[[2, 3]] = 0;

        let pixel_count = slice.iter().filter(|&&v| v == 11).count();
        let bbox = BoundingBox {
            min_r: 2,
            min_c: 3,
            max_r: 6,
            max_c: 8,
        };
        let geom = ContourBuilder::new()
            .label_polygon(&slice.view(), 11, bbox)
            .and_then(repair::repair)
            .unwrap();

        use geo::Area;
        let perimeter: f64 = geom
            .0
            .iter()
            .flat_map(|p| p.exterior().0.windows(2))
            .map(|e| ((e[1].x - e[0].x).powi(2) + (e[1].y - e[0].y).powi(2)).sqrt())
            .sum();
        assert!((geom.unsigned_area() - pixel_count as f64).abs() < perimeter);

        let round_tripped = stamp(Array2::zeros(slice.dim()), &geom, 11);
        assert_eq!(round_tripped, slice);
    }
}
