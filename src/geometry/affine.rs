// Pixel/micron coordinate mapping. Transforms arrive as 3x3 row-major matrix
// text files holding the micron-to-pixel map generated upstream; the
// pixel-to-micron direction is the derived inverse.

use geo::geometry::{Coord, MultiPolygon};
use geo::MapCoords;
use std::fs;
use std::path::Path;

/// Six-coefficient affine map: x' = a*x + b*y + e, y' = c*x + d*y + f.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl AffineTransform {
    pub fn identity() -> AffineTransform {
        AffineTransform {
            a: 1.0,
            b: 0.0,
            c: 0.0,
            d: 1.0,
            e: 0.0,
            f: 0.0,
        }
    }

    pub fn from_matrix_file(path: &Path) -> AffineTransform {
        let content = fs::read_to_string(path)
            .unwrap_or_else(|err| panic!("Unable to read transform file {}: {}", path.display(), err));
        Self::from_matrix_str(&content)
            .unwrap_or_else(|msg| panic!("Malformed transform file {}: {}", path.display(), msg))
    }

    fn from_matrix_str(content: &str) -> Result<AffineTransform, String> {
        let values: Vec<f64> = content
            .split_whitespace()
            .map(|token| {
                token
                    .parse::<f64>()
                    .map_err(|_| format!("'{}' is not a number", token))
            })
            .collect::<Result<Vec<f64>, String>>()?;

        if values.len() != 9 {
            return Err(format!("expected 9 matrix entries, found {}", values.len()));
        }

        // the bottom row of an affine matrix carries no information, but
        // anything other than (0, 0, 1) means the file is not affine at all
        if values[6].abs() > 1e-9 || values[7].abs() > 1e-9 || (values[8] - 1.0).abs() > 1e-9 {
            return Err(format!(
                "bottom row is ({}, {}, {}), expected (0, 0, 1)",
                values[6], values[7], values[8]
            ));
        }

        Ok(AffineTransform {
            a: values[0],
            b: values[1],
            c: values[3],
            d: values[4],
            e: values[2],
            f: values[5],
        })
    }

    pub fn determinant(&self) -> f64 {
        self.a * self.d - self.b * self.c
    }

    /// Derive the inverse map. A singular linear part is a fatal input error.
    pub fn inverse(&self) -> AffineTransform {
        let det = self.determinant();
        if !det.is_finite() || det == 0.0 {
            panic!("Transform matrix is singular (determinant {}) and cannot be inverted", det);
        }
        AffineTransform {
            a: self.d / det,
            b: -self.b / det,
            c: -self.c / det,
            d: self.a / det,
            e: (self.b * self.f - self.d * self.e) / det,
            f: (self.c * self.e - self.a * self.f) / det,
        }
    }

    pub fn apply(&self, coord: Coord<f64>) -> Coord<f64> {
        Coord {
            x: self.a * coord.x + self.b * coord.y + self.e,
            y: self.c * coord.x + self.d * coord.y + self.f,
        }
    }

    pub fn apply_xy(&self, x: f64, y: f64) -> (f64, f64) {
        let coord = self.apply(Coord { x, y });
        (coord.x, coord.y)
    }

    pub fn transform_multipolygon(&self, geom: &MultiPolygon<f64>) -> MultiPolygon<f64> {
        geom.map_coords(|coord| self.apply(coord))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn parse_matrix() {
        let tfm = AffineTransform::from_matrix_str("2 0 10\n0 4 -3\n0 0 1\n").unwrap();
        assert_eq!(tfm.apply_xy(1.0, 1.0), (12.0, 1.0));
        assert_eq!(tfm.apply_xy(0.0, 0.0), (10.0, -3.0));
    }

    #[test]
    fn parse_rejects_non_affine_bottom_row() {
        assert!(AffineTransform::from_matrix_str("1 0 0\n0 1 0\n0 2 1\n").is_err());
        assert!(AffineTransform::from_matrix_str("1 0 0\n0 1 0\n0 0 1 5\n").is_err());
        assert!(AffineTransform::from_matrix_str("1 0 zero\n0 1 0\n0 0 1\n").is_err());
    }

    #[test]
    fn inverse_round_trip() {
        let mut rng = StdRng::seed_from_u64(1729);
        for _ in 0..100 {
            let tfm = AffineTransform {
                a: rng.random_range(0.5..4.0),
                b: rng.random_range(-1.0..1.0),
                c: rng.random_range(-1.0..1.0),
                d: rng.random_range(0.5..4.0),
                e: rng.random_range(-100.0..100.0),
                f: rng.random_range(-100.0..100.0),
            };
            let inv = tfm.inverse();

            let x = rng.random_range(-1000.0..1000.0);
            let y = rng.random_range(-1000.0..1000.0);
            let (fx, fy) = tfm.apply_xy(x, y);
            let (rx, ry) = inv.apply_xy(fx, fy);
            assert!((rx - x).abs() < 1e-8, "x: {} -> {}", x, rx);
            assert!((ry - y).abs() < 1e-8, "y: {} -> {}", y, ry);
        }
    }

    #[test]
    #[should_panic(expected = "singular")]
    fn singular_matrix_is_fatal() {
        let tfm = AffineTransform::from_matrix_str("1 2 0\n2 4 0\n0 0 1\n").unwrap();
        tfm.inverse();
    }

    #[test]
    fn transforms_geometry() {
        use geo::geometry::{LineString, Polygon};

        let tfm = AffineTransform {
            a: 2.0,
            b: 0.0,
            c: 0.0,
            d: 2.0,
            e: 1.0,
            f: -1.0,
        };
        let square = MultiPolygon::new(vec![Polygon::new(
            LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)]),
            Vec::new(),
        )]);
        let transformed = tfm.transform_multipolygon(&square);
        let coords: Vec<(f64, f64)> = transformed.0[0]
            .exterior()
            .coords()
            .map(|c| (c.x, c.y))
            .collect();
        assert_eq!(coords[0], (1.0, -1.0));
        assert_eq!(coords[2], (3.0, 1.0));
    }
}
