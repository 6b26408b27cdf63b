// Cell boundary extraction: for every z slice of a label mask, trace each
// label's contours, repair them, map them into micron space, and collect the
// surviving polygons into the boundary table.

use clap::Args;
use geo::geometry::MultiPolygon;
use indicatif::ProgressBar;
use ndarray::ArrayView2;
use rayon::prelude::*;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thread_local::ThreadLocal;

use crate::geometry::affine::AffineTransform;
use crate::geometry::contour::{BoundingBox, ContourBuilder};
use crate::geometry::repair;
use crate::maskio::MaskStore;
use crate::regiontable::{write_boundary_table, BoundaryRow};

#[derive(Args, Debug)]
pub struct BoundaryArgs {
    /// Label mask (.npy or .zarr), [z, y, x] or [y, x]
    pub mask: PathBuf,

    /// Micron-to-pixel transform as a 3x3 row-major matrix text file
    pub transform: PathBuf,

    /// Output boundary table (arrow IPC)
    #[arg(long, default_value = "cell-boundaries.arrow")]
    pub output: PathBuf,

    /// Comma separated subset of z slices to process (default: all)
    #[arg(long, value_delimiter = ',')]
    pub z_subset: Option<Vec<usize>>,
}

pub fn run(args: BoundaryArgs) {
    println!("loading micron to pixel transform from {}", args.transform.display());
    let pixel_to_micron = AffineTransform::from_matrix_file(&args.transform).inverse();

    let mask = MaskStore::open(&args.mask);
    let (nz, _, _) = mask.shape();

    let zs: Vec<usize> = match &args.z_subset {
        Some(zs) => zs.clone(),
        None => (0..nz).collect(),
    };

    let mut rows = Vec::new();
    for &z in &zs {
        println!("z={}: slicing 2D z slice of masks from {}", z, args.mask.display());
        let slice = mask.slice(z);
        rows.extend(slice_boundaries(&slice.view(), z as u32, &pixel_to_micron));
    }

    println!("saving cell table to {}", args.output.display());
    write_boundary_table(&args.output, &rows);
}

/// Boundary polygons for every label on one slice, ascending label order.
/// Labels with no extractable geometry are dropped and summarized; they
/// never abort the run.
pub fn slice_boundaries(
    slice: &ArrayView2<u32>,
    z: u32,
    tfm: &AffineTransform,
) -> Vec<BoundaryRow> {
    println!("z={}: determining region properties", z);
    let props = label_bounding_boxes(slice);

    println!("z={}: determining cell polygons", z);
    let progress = ProgressBar::new(props.len() as u64);
    let scratch: ThreadLocal<RefCell<ContourBuilder>> = ThreadLocal::new();
    let min_len = (props.len() / rayon::current_num_threads().max(1)).max(1);

    let extracted: Vec<(u32, Option<MultiPolygon<f64>>)> = props
        .par_iter()
        .with_min_len(min_len)
        .map(|&(label, bbox)| {
            let builder = scratch.get_or(|| RefCell::new(ContourBuilder::new()));
            let geometry = builder
                .borrow_mut()
                .label_polygon(slice, label, bbox)
                .and_then(repair::repair)
                .map(|geometry| tfm.transform_multipolygon(&geometry))
                .and_then(repair::repair);
            progress.inc(1);
            (label, geometry)
        })
        .collect();
    progress.finish_and_clear();

    let nlabels = extracted.len();
    let mut rows = Vec::new();
    for (label, geometry) in extracted {
        if let Some(geometry) = geometry {
            repair::assert_valid(&geometry, "cell boundary polygon");
            rows.push(BoundaryRow { label, z, geometry });
        }
    }

    let skipped = nlabels - rows.len();
    if skipped > 0 {
        println!("z={}: {} labels skipped (no geometry)", z, skipped);
    }
    rows
}

/// Half-open bounding boxes of every nonzero label on the slice, from a
/// single linear pass, in ascending label order.
pub fn label_bounding_boxes(slice: &ArrayView2<u32>) -> Vec<(u32, BoundingBox)> {
    let mut boxes: BTreeMap<u32, BoundingBox> = BTreeMap::new();
    for ((r, c), &label) in slice.indexed_iter() {
        if label == 0 {
            continue;
        }
        boxes
            .entry(label)
            .and_modify(|bbox| {
                bbox.min_r = bbox.min_r.min(r);
                bbox.min_c = bbox.min_c.min(c);
                bbox.max_r = bbox.max_r.max(r + 1);
                bbox.max_c = bbox.max_c.max(c + 1);
            })
            .or_insert(BoundingBox {
                min_r: r,
                min_c: c,
                max_r: r + 1,
                max_c: c + 1,
            });
    }
    boxes.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Area;
    use ndarray::Array2;

    #[test]
    fn bounding_boxes_cover_labels() {
        let mut slice = Array2::<u32>::zeros((6, 7));
        slice[[1, 2]] = 4;
        slice[[3, 5]] = 4;
        slice[[0, 0]] = 2;

        let boxes = label_bounding_boxes(&slice.view());
        assert_eq!(boxes.len(), 2);
        assert_eq!(
            boxes[0],
            (2, BoundingBox { min_r: 0, min_c: 0, max_r: 1, max_c: 1 })
        );
        assert_eq!(
            boxes[1],
            (4, BoundingBox { min_r: 1, min_c: 2, max_r: 4, max_c: 6 })
        );
    }

    #[test]
    fn extracts_every_label_on_a_slice() {
        let mut slice = Array2::<u32>::zeros((8, 8));
        for r in 1..4 {
            for c in 1..4 {
                slice[[r, c]] = 17;
            }
        }
        for r in 5..7 {
            for c in 4..7 {
                slice[[r, c]] = 3;
            }
        }

        let rows = slice_boundaries(&slice.view(), 2, &AffineTransform::identity());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].label, 3);
        assert_eq!(rows[1].label, 17);
        assert!(rows.iter().all(|row| row.z == 2));
        assert!((rows[0].geometry.unsigned_area() - 5.5).abs() < 1e-9);
        assert!((rows[1].geometry.unsigned_area() - 8.5).abs() < 1e-9);
    }

    #[test]
    fn transform_maps_boundaries_into_micron_space() {
        let mut slice = Array2::<u32>::zeros((4, 4));
        slice[[1, 1]] = 1;
        slice[[1, 2]] = 1;

        // pixel -> micron scaling by 10 on x, 5 on y
        let tfm = AffineTransform {
            a: 10.0,
            b: 0.0,
            c: 0.0,
            d: 5.0,
            e: 0.0,
            f: 0.0,
        };
        let rows = slice_boundaries(&slice.view(), 0, &tfm);
        assert_eq!(rows.len(), 1);
        // 2 pixels - 0.5 boundary rounding, scaled by 10 * 5
        assert!((rows[0].geometry.unsigned_area() - 75.0).abs() < 1e-9);
    }
}
