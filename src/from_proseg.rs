// Import proseg-generated cell polygons as a label mask: map the polygons
// from micron to pixel space, drop anything not fully inside the image, and
// scan-fill each cell over a shared canvas in row order. Overlaps resolve by
// override, so a cell later in the file wins any pixel it shares with an
// earlier one.

use clap::Args;
use geo::geometry::MultiPolygon;
use geo::BoundingRect;
use ndarray::{Array2, Axis};
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::geojson::read_feature_collection;
use crate::geometry::affine::AffineTransform;
use crate::geometry::{raster, repair};
use crate::maskio;

struct CellPolygon {
    cell: u32,
    layer: u32,
    geometry: MultiPolygon<f64>,
}

#[derive(Args, Debug)]
pub struct FromProsegArgs {
    /// proseg cell polygon geojson (.geojson or .geojson.gz)
    pub geojson: PathBuf,

    /// Micron-to-pixel transform as a 3x3 row-major matrix text file
    pub transform: PathBuf,

    /// Output label mask (.npy or .zarr)
    #[arg(long, default_value = "masks.npy")]
    pub output: PathBuf,

    /// Mask width in pixels
    #[arg(long)]
    pub x_shape: usize,

    /// Mask height in pixels
    #[arg(long)]
    pub y_shape: usize,

    /// Only rasterize this z layer (default: all layers, stacked)
    #[arg(long)]
    pub z_slice: Option<u32>,
}

pub fn run(args: FromProsegArgs) {
    println!("loading micron to pixel transform from {}", args.transform.display());
    let micron_to_pixel = AffineTransform::from_matrix_file(&args.transform);

    println!("loading proseg-generated cell polygons from {}", args.geojson.display());
    let mut cells: Vec<CellPolygon> = read_feature_collection(&args.geojson)
        .into_iter()
        .map(|feature| CellPolygon {
            cell: feature.properties["cell"]
                .as_u32()
                .unwrap_or_else(|| panic!("cell polygon feature without a numeric 'cell' property")),
            layer: feature.properties["layer"].as_u32().unwrap_or(0),
            geometry: feature.geometry,
        })
        .collect();

    if let Some(z) = args.z_slice {
        cells.retain(|cell| cell.layer == z);
    }

    for cell in &mut cells {
        cell.geometry = micron_to_pixel.transform_multipolygon(&cell.geometry);
    }

    // crop to the size of the image
    let ncells = cells.len();
    cells.retain(|cell| within_image(&cell.geometry, args.x_shape, args.y_shape));
    if cells.len() < ncells {
        println!("dropped {} cells outside the image box", ncells - cells.len());
    }

    let shape = (args.y_shape, args.x_shape);
    if let Some(z) = args.z_slice {
        println!("z={}: computing masks", z);
        let (mask, skipped) = rasterize_layer(cells.iter(), shape);
        if skipped > 0 {
            println!("z={}: {} cells skipped (empty geometry)", z, skipped);
        }
        println!("saving 2D masks file to {}", args.output.display());
        maskio::write_mask(&args.output, mask.view().into_dyn());
    } else {
        let layers: BTreeSet<u32> = cells.iter().map(|cell| cell.layer).collect();
        let mut stack = Vec::new();
        for &layer in &layers {
            println!("z={}: computing masks", layer);
            let (mask, skipped) =
                rasterize_layer(cells.iter().filter(|cell| cell.layer == layer), shape);
            if skipped > 0 {
                println!("z={}: {} cells skipped (empty geometry)", layer, skipped);
            }
            stack.push(mask);
        }

        println!("generating 3D stack from {} detected z-slices", stack.len());
        let views: Vec<_> = stack.iter().map(|mask| mask.view()).collect();
        let mask = ndarray::stack(Axis(0), &views).expect("Unable to stack z slices");
        println!("saving 3D masks file to {}", args.output.display());
        maskio::write_mask(&args.output, mask.view().into_dyn());
    }
}

// Polygons are only kept when they lie entirely inside the image box; for an
// axis-aligned box that is exactly a bounding-rect test.
fn within_image(geometry: &MultiPolygon<f64>, x_shape: usize, y_shape: usize) -> bool {
    match geometry.bounding_rect() {
        Some(bounds) => {
            bounds.min().x >= 0.0
                && bounds.min().y >= 0.0
                && bounds.max().x <= x_shape as f64
                && bounds.max().y <= y_shape as f64
        }
        None => false,
    }
}

fn rasterize_layer<'a>(
    cells: impl Iterator<Item = &'a CellPolygon>,
    shape: (usize, usize),
) -> (Array2<u32>, usize) {
    let mut acc = Array2::zeros(shape);
    let mut skipped = 0;
    for cell in cells {
        match repair::repair(cell.geometry.clone()) {
            Some(geometry) => acc = raster::stamp(acc, &geometry, cell.cell),
            None => skipped += 1,
        }
    }
    (acc, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::geometry::{LineString, Polygon};

    fn cell(id: u32, layer: u32, x0: f64, y0: f64, x1: f64, y1: f64) -> CellPolygon {
        CellPolygon {
            cell: id,
            layer,
            geometry: MultiPolygon::new(vec![Polygon::new(
                LineString::from(vec![(x0, y0), (x1, y0), (x1, y1), (x0, y1), (x0, y0)]),
                Vec::new(),
            )]),
        }
    }

    #[test]
    fn later_cells_override_earlier_ones() {
        let cells = vec![
            cell(5, 0, -0.5, -0.5, 2.5, 2.5),
            cell(9, 0, 1.5, 1.5, 4.5, 4.5),
        ];
        let (mask, skipped) = rasterize_layer(cells.iter(), (6, 6));
        assert_eq!(skipped, 0);
        assert_eq!(mask[[0, 0]], 5);
        assert_eq!(mask[[2, 2]], 9);
        assert_eq!(mask[[4, 4]], 9);
        assert_eq!(mask[[5, 5]], 0);
    }

    #[test]
    fn degenerate_cells_are_skipped_not_fatal() {
        let degenerate = CellPolygon {
            cell: 2,
            layer: 0,
            geometry: MultiPolygon::new(vec![Polygon::new(
                LineString::from(vec![(0.0, 0.0), (3.0, 3.0), (0.0, 0.0)]),
                Vec::new(),
            )]),
        };
        let cells = vec![cell(1, 0, -0.5, -0.5, 1.5, 1.5), degenerate];
        let (mask, skipped) = rasterize_layer(cells.iter(), (4, 4));
        assert_eq!(skipped, 1);
        assert_eq!(mask[[0, 0]], 1);
    }

    #[test]
    fn image_box_cropping() {
        assert!(within_image(&cell(1, 0, 0.0, 0.0, 4.0, 4.0).geometry, 8, 8));
        assert!(!within_image(&cell(1, 0, -1.0, 0.0, 4.0, 4.0).geometry, 8, 8));
        assert!(!within_image(&cell(1, 0, 0.0, 0.0, 9.0, 4.0).geometry, 8, 8));
    }
}
