// Iso-contour extraction for one label of one z slice.
//
// The slice is cropped to the label's bounding box, padded by one background
// pixel per side so boundary-touching regions close, and the binary indicator
// (pixel == label) is traced at level 0.5 by marching squares. Contour
// vertices sit at midpoints between pixel centers; to avoid failing to line
// up ring endpoints due to numerical imprecision, coordinates are kept
// doubled (midpoints become odd integers) until rings are closed.

use geo::geometry::{LineString, MultiPolygon, Polygon};
use ndarray::ArrayView2;
use std::collections::BTreeMap;

/// Half-open pixel bounding box of one label: rows min_r..max_r, cols min_c..max_c.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub min_r: usize,
    pub min_c: usize,
    pub max_r: usize,
    pub max_c: usize,
}

/// Per-label contour tracer with reusable scratch storage, so a worker can
/// process many labels without reallocating.
pub struct ContourBuilder {
    // directed segments keyed by start point, in doubled padded (row, col)
    segments: BTreeMap<(i64, i64), (i64, i64)>,
    inside: Vec<bool>,
    width: usize,
    height: usize,
}

impl Default for ContourBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContourBuilder {
    pub fn new() -> Self {
        ContourBuilder {
            segments: BTreeMap::new(),
            inside: Vec::new(),
            width: 0,
            height: 0,
        }
    }

    /// Trace the contours of `label` within its bounding box and assemble
    /// them into one multipolygon in slice-global (x, y) pixel coordinates.
    /// Returns None when no geometry can be extracted for this label.
    pub fn label_polygon(
        &mut self,
        slice: &ArrayView2<u32>,
        label: u32,
        bbox: BoundingBox,
    ) -> Option<MultiPolygon<f64>> {
        self.fill_indicator(slice, label, bbox);
        let rings = self.trace_rings();
        if rings.is_empty() {
            return None;
        }

        // doubled padded (row, col) -> slice-global (x, y); the pad
        // contributes one pixel that has to be subtracted back out
        let row_offset = bbox.min_r as f64 - 1.0;
        let col_offset = bbox.min_c as f64 - 1.0;
        let rings: Vec<Vec<(f64, f64)>> = rings
            .iter()
            .map(|ring| {
                ring.iter()
                    .map(|&(r, c)| (c as f64 / 2.0 + col_offset, r as f64 / 2.0 + row_offset))
                    .collect()
            })
            .collect();

        assemble_rings(rings)
    }

    fn fill_indicator(&mut self, slice: &ArrayView2<u32>, label: u32, bbox: BoundingBox) {
        let crop_height = bbox.max_r - bbox.min_r;
        let crop_width = bbox.max_c - bbox.min_c;
        self.height = crop_height + 2;
        self.width = crop_width + 2;
        self.inside.clear();
        self.inside.resize(self.height * self.width, false);

        for r in 0..crop_height {
            for c in 0..crop_width {
                if slice[[bbox.min_r + r, bbox.min_c + c]] == label {
                    self.inside[(r + 1) * self.width + (c + 1)] = true;
                }
            }
        }
    }

    fn at(&self, r: i64, c: i64) -> bool {
        self.inside[r as usize * self.width + c as usize]
    }

    fn push_segment(&mut self, from: (i64, i64), to: (i64, i64)) {
        let prev = self.segments.insert(from, to);
        assert!(prev.is_none(), "duplicate contour segment start at {:?}", from);
    }

    // Closed rings in doubled padded (row, col) coordinates. Each cell of
    // four adjacent pixels contributes directed segments between the
    // midpoints of its level-crossing edges, interior kept on the left of
    // travel; chaining start to end then closes every ring exactly.
    fn trace_rings(&mut self) -> Vec<Vec<(i64, i64)>> {
        self.segments.clear();

        for r in 0..self.height as i64 - 1 {
            for c in 0..self.width as i64 - 1 {
                let tl = self.at(r, c);
                let tr = self.at(r, c + 1);
                let bl = self.at(r + 1, c);
                let br = self.at(r + 1, c + 1);

                let top = (2 * r, 2 * c + 1);
                let bottom = (2 * r + 2, 2 * c + 1);
                let left = (2 * r + 1, 2 * c);
                let right = (2 * r + 1, 2 * c + 2);

                match (tl, tr, bl, br) {
                    (false, false, false, false) | (true, true, true, true) => {}

                    // one interior corner
                    (false, false, false, true) => self.push_segment(right, bottom),
                    (false, false, true, false) => self.push_segment(bottom, left),
                    (true, false, false, false) => self.push_segment(left, top),
                    (false, true, false, false) => self.push_segment(top, right),

                    // one background corner
                    (true, true, true, false) => self.push_segment(bottom, right),
                    (true, true, false, true) => self.push_segment(left, bottom),
                    (false, true, true, true) => self.push_segment(top, left),
                    (true, false, true, true) => self.push_segment(right, top),

                    // split rows / columns
                    (true, true, false, false) => self.push_segment(left, right),
                    (false, false, true, true) => self.push_segment(right, left),
                    (true, false, true, false) => self.push_segment(bottom, top),
                    (false, true, false, true) => self.push_segment(top, bottom),

                    // saddles: diagonal interiors stay disconnected
                    (true, false, false, true) => {
                        self.push_segment(left, top);
                        self.push_segment(right, bottom);
                    }
                    (false, true, true, false) => {
                        self.push_segment(top, right);
                        self.push_segment(bottom, left);
                    }
                }
            }
        }

        let mut rings = Vec::new();
        while let Some((&start, &next)) = self.segments.iter().next() {
            self.segments.remove(&start);
            let mut ring = vec![start];
            let mut current = next;
            while current != start {
                ring.push(current);
                current = self
                    .segments
                    .remove(&current)
                    .expect("contour tracing produced an unterminated ring");
            }
            rings.push(ring);
        }
        rings
    }
}

// Group rings into polygons: even containment depth marks an exterior ring,
// odd depth a hole belonging to the innermost exterior that contains it.
// Rings from a single trace never touch, so a sample vertex decides
// containment.
fn assemble_rings(rings: Vec<Vec<(f64, f64)>>) -> Option<MultiPolygon<f64>> {
    let n = rings.len();
    let mut depth = vec![0usize; n];
    for i in 0..n {
        for j in 0..n {
            if i != j && ring_contains(&rings[j], rings[i][0]) {
                depth[i] += 1;
            }
        }
    }

    let exteriors: Vec<usize> = (0..n).filter(|&i| depth[i] % 2 == 0).collect();
    let mut holes: Vec<Vec<usize>> = vec![Vec::new(); n];
    for i in 0..n {
        if depth[i] % 2 == 0 {
            continue;
        }
        let parent = exteriors
            .iter()
            .copied()
            .filter(|&j| ring_contains(&rings[j], rings[i][0]))
            .max_by_key(|&j| depth[j]);
        if let Some(parent) = parent {
            holes[parent].push(i);
        }
    }

    let polygons: Vec<Polygon<f64>> = exteriors
        .iter()
        .map(|&j| {
            Polygon::new(
                closed_ring(&rings[j]),
                holes[j].iter().map(|&h| closed_ring(&rings[h])).collect(),
            )
        })
        .collect();

    if polygons.is_empty() {
        None
    } else {
        Some(MultiPolygon::new(polygons))
    }
}

fn closed_ring(ring: &[(f64, f64)]) -> LineString<f64> {
    let mut coords: Vec<(f64, f64)> = ring.to_vec();
    coords.push(ring[0]);
    LineString::from(coords)
}

// Even-odd ray cast in the +x direction.
fn ring_contains(ring: &[(f64, f64)], point: (f64, f64)) -> bool {
    let (x, y) = point;
    let mut inside = false;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let (xi, yi) = ring[i];
        let (xj, yj) = ring[j];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Area;
    use ndarray::Array2;

    fn full_bbox(slice: &Array2<u32>) -> BoundingBox {
        BoundingBox {
            min_r: 0,
            min_c: 0,
            max_r: slice.nrows(),
            max_c: slice.ncols(),
        }
    }

    fn bbox_of(slice: &Array2<u32>, label: u32) -> BoundingBox {
        let mut bbox: Option<BoundingBox> = None;
        for ((r, c), &v) in slice.indexed_iter() {
            if v != label {
                continue;
            }
            let bb = bbox.get_or_insert(BoundingBox {
                min_r: r,
                min_c: c,
                max_r: r + 1,
                max_c: c + 1,
            });
            bb.min_r = bb.min_r.min(r);
            bb.min_c = bb.min_c.min(c);
            bb.max_r = bb.max_r.max(r + 1);
            bb.max_c = bb.max_c.max(c + 1);
        }
        bbox.unwrap()
    }

    #[test]
    fn single_pixel_is_a_diamond() {
        let mut slice = Array2::<u32>::zeros((3, 3));
        slice[[1, 1]] = 5;

        let geom = ContourBuilder::new()
            .label_polygon(&slice.view(), 5, bbox_of(&slice, 5))
            .unwrap();

        assert_eq!(geom.0.len(), 1);
        assert_eq!(geom.0[0].exterior().coords().count(), 5);
        assert!((geom.unsigned_area() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn square_block_area() {
        // a w*h block traces to an octagon of area w*h - 0.5
        let mut slice = Array2::<u32>::zeros((6, 6));
        for r in 2..4 {
            for c in 1..4 {
                slice[[r, c]] = 9;
            }
        }

        let geom = ContourBuilder::new()
            .label_polygon(&slice.view(), 9, bbox_of(&slice, 9))
            .unwrap();

        assert_eq!(geom.0.len(), 1);
        assert!((geom.unsigned_area() - 5.5).abs() < 1e-12);
    }

    #[test]
    fn bounding_box_offset_translates_contours() {
        let mut slice = Array2::<u32>::zeros((8, 8));
        slice[[4, 6]] = 2;

        let geom = ContourBuilder::new()
            .label_polygon(&slice.view(), 2, bbox_of(&slice, 2))
            .unwrap();
        let xs: Vec<f64> = geom.0[0].exterior().coords().map(|c| c.x).collect();
        let ys: Vec<f64> = geom.0[0].exterior().coords().map(|c| c.y).collect();

        // diamond centered on the pixel, in slice-global coordinates
        let cx = xs.iter().sum::<f64>() / xs.len() as f64;
        let cy = ys.iter().sum::<f64>() / ys.len() as f64;
        assert!((cx - 6.0).abs() < 1e-12);
        assert!((cy - 4.0).abs() < 1e-12);
    }

    #[test]
    fn donut_has_a_hole() {
        let mut slice = Array2::<u32>::zeros((5, 5));
        for r in 1..4 {
            for c in 1..4 {
                slice[[r, c]] = 3;
            }
        }
        slice[[2, 2]] = 0;

        let geom = ContourBuilder::new()
            .label_polygon(&slice.view(), 3, bbox_of(&slice, 3))
            .unwrap();

        assert_eq!(geom.0.len(), 1);
        assert_eq!(geom.0[0].interiors().len(), 1);
        // outer octagon (9 - 0.5) minus the center diamond (0.5)
        assert!((geom.unsigned_area() - 8.0).abs() < 1e-12);
    }

    #[test]
    fn disjoint_blobs_become_multipolygon_parts() {
        let mut slice = Array2::<u32>::zeros((3, 7));
        slice[[1, 1]] = 4;
        slice[[1, 5]] = 4;

        let geom = ContourBuilder::new()
            .label_polygon(&slice.view(), 4, full_bbox(&slice))
            .unwrap();

        assert_eq!(geom.0.len(), 2);
        assert!((geom.unsigned_area() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn absent_label_yields_no_geometry() {
        let slice = Array2::<u32>::zeros((4, 4));
        let geom = ContourBuilder::new().label_polygon(&slice.view(), 1, full_bbox(&slice));
        assert!(geom.is_none());
    }

    #[test]
    fn diagonal_pixels_stay_disconnected() {
        let mut slice = Array2::<u32>::zeros((4, 4));
        slice[[1, 1]] = 7;
        slice[[2, 2]] = 7;

        let geom = ContourBuilder::new()
            .label_polygon(&slice.view(), 7, bbox_of(&slice, 7))
            .unwrap();
        assert_eq!(geom.0.len(), 2);
    }
}
