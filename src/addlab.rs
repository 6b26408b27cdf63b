// Merge hand-drawn label overlays into a label mask. Annotation polygons are
// numbered 1..n by enumeration order and rasterized with the same override
// policy as imported masks, so the most recently drawn region wins any
// overlap. A pre-rasterized .npy mask is taken verbatim, no merge needed.

use clap::Args;
use ndarray::Array2;
use std::path::{Path, PathBuf};

use crate::geojson::read_feature_collection;
use crate::geometry::{raster, repair};
use crate::maskio::{self, MaskStore};

#[derive(Args, Debug)]
pub struct AddLabelsArgs {
    /// Label overlay: annotation polygons (.geojson or .geojson.gz) or a
    /// pre-rasterized label mask (.npy)
    pub labels: PathBuf,

    /// Output label mask (.npy or .zarr)
    #[arg(long, default_value = "labels.npy")]
    pub output: PathBuf,

    /// Existing mask whose shape the overlay must match
    #[arg(long)]
    pub shape_from: Option<PathBuf>,

    /// Mask height in pixels (alternative to --shape-from)
    #[arg(long)]
    pub height: Option<usize>,

    /// Mask width in pixels (alternative to --shape-from)
    #[arg(long)]
    pub width: Option<usize>,
}

pub fn run(args: AddLabelsArgs) {
    let shape = target_shape(&args);
    let name = args.labels.to_string_lossy();

    let labels: Array2<u32> = if name.ends_with(".geojson") || name.ends_with(".geojson.gz") {
        rasterize_annotations(&args.labels, shape)
    } else if name.ends_with(".npy") {
        println!("loading pre-rasterized labels from {}", args.labels.display());
        let store = MaskStore::open(&args.labels);
        let (nz, ny, nx) = store.shape();
        assert!(
            nz == 1 && (ny, nx) == shape,
            "provided label mask shape ({}, {}) does not match target shape ({}, {})",
            ny,
            nx,
            shape.0,
            shape.1
        );
        store.slice(0)
    } else {
        panic!("provided label file {} is not of supported format", name);
    };

    println!("saving labels to {}", args.output.display());
    maskio::write_mask(&args.output, labels.view().into_dyn());
}

fn target_shape(args: &AddLabelsArgs) -> (usize, usize) {
    match (&args.shape_from, args.height, args.width) {
        (Some(path), None, None) => {
            let (_, ny, nx) = MaskStore::open(path).shape();
            (ny, nx)
        }
        (None, Some(height), Some(width)) => (height, width),
        _ => panic!("specify either --shape-from or both --height and --width"),
    }
}

fn rasterize_annotations(path: &Path, shape: (usize, usize)) -> Array2<u32> {
    println!("loading annotation polygons from {}", path.display());
    let features = read_feature_collection(path);
    println!("rasterizing {} annotation regions", features.len());

    let mut labels = Array2::zeros(shape);
    for (i, feature) in features.iter().enumerate() {
        let label = i as u32 + 1;
        match repair::repair(feature.geometry.clone()) {
            Some(geometry) => labels = raster::stamp(labels, &geometry, label),
            None => println!("label {}: empty annotation geometry, skipped", label),
        }
    }
    labels
}
