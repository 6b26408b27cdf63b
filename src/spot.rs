// Synthetic spot-grid assignment, for runs with no usable segmentation:
// square tiles with a small overlap margin cover the bounding box of the
// transcript set and stand in for cell polygons. Tiles are generated y-major
// and the spot id is the generation index; with z partitioning in effect
// the region id becomes "z_index".

use clap::Args;
use geo::geometry::{Coord, Rect};
use itertools::izip;
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::assign::{assign_points, Region, RegionIndex};
use crate::counts::{self, CountMatrix};
use crate::output::{write_counts, write_spot_metadata};
use crate::transcripts::{read_transcripts_csv, TranscriptColumns};

pub const SPOT_OVERLAP_SCALE: f64 = 0.02;

/// Tile the bounding box with squares of side `side`. Tile origins step by
/// `side` from half a tile before the minimum to half a tile past the
/// maximum on each axis; every tile is padded by the overlap margin so
/// transcripts on tile edges always land somewhere.
pub fn spot_grid(bounds: Rect<f64>, side: f64) -> Vec<Rect<f64>> {
    assert!(side > 0.0, "spot side length must be positive");
    let margin = side * (SPOT_OVERLAP_SCALE / 2.0);
    let reach = side * (1.0 + SPOT_OVERLAP_SCALE);

    let mut tiles = Vec::new();
    let mut y = bounds.min().y - side / 2.0;
    while y < bounds.max().y + side / 2.0 {
        let mut x = bounds.min().x - side / 2.0;
        while x < bounds.max().x + side / 2.0 {
            tiles.push(Rect::new(
                Coord {
                    x: x - margin,
                    y: y - margin,
                },
                Coord {
                    x: x + reach,
                    y: y + reach,
                },
            ));
            x += side;
        }
        y += side;
    }
    tiles
}

pub fn point_bounds(points: impl IntoIterator<Item = (f64, f64)>) -> Option<Rect<f64>> {
    let mut bounds: Option<Rect<f64>> = None;
    for (x, y) in points {
        bounds = Some(match bounds {
            None => Rect::new(Coord { x, y }, Coord { x, y }),
            Some(rect) => Rect::new(
                Coord {
                    x: rect.min().x.min(x),
                    y: rect.min().y.min(y),
                },
                Coord {
                    x: rect.max().x.max(x),
                    y: rect.max().y.max(y),
                },
            ),
        });
    }
    bounds
}

#[derive(Args, Debug)]
pub struct SpotArgs {
    /// Detected transcripts table (csv or csv.gz)
    pub transcripts: PathBuf,

    /// Spot tile side length, in microns
    #[arg(long, default_value_t = 50.0)]
    pub spot_side: f64,

    /// Ignore z and flatten all transcripts onto a single 2D grid
    #[arg(long, default_value_t = false)]
    pub flatten: bool,

    /// Micron distance between adjacent z slices, for spot_z metadata
    #[arg(long, default_value_t = 1.5)]
    pub z_micron_distance: f64,

    /// Output count matrix triplet table
    #[arg(long, default_value = "spot-counts.csv.gz")]
    pub output_counts: PathBuf,

    /// Output control-probe count triplet table
    #[arg(long, default_value = "spot-blank-counts.csv.gz")]
    pub output_blank_counts: PathBuf,

    /// Output spot centroid metadata table
    #[arg(long, default_value = "spot-metadata.csv.gz")]
    pub output_spots: PathBuf,

    /// Category name prefix marking control probes
    #[arg(long, default_value = "Blank-")]
    pub blank_prefix: String,

    #[arg(long, default_value = "gene")]
    pub gene_column: String,

    #[arg(long, default_value = "global_x")]
    pub x_column: String,

    #[arg(long, default_value = "global_y")]
    pub y_column: String,

    #[arg(long, default_value = "global_z")]
    pub z_column: String,
}

pub fn run(args: SpotArgs) {
    println!("loading detected transcripts table from {}", args.transcripts.display());
    let table = read_transcripts_csv(
        &args.transcripts,
        &TranscriptColumns {
            gene: &args.gene_column,
            x: &args.x_column,
            y: &args.y_column,
            z: &args.z_column,
        },
    );
    println!("read {} transcripts", table.transcripts.len());

    let bounds = point_bounds(
        table
            .transcripts
            .iter()
            .map(|t| (t.x as f64, t.y as f64)),
    )
    .unwrap_or_else(|| panic!("transcript table {} is empty", args.transcripts.display()));

    let tiles = spot_grid(bounds, args.spot_side);
    let ntiles = tiles.len();
    println!("generated {} grid spots", ntiles);

    let zs: Vec<u32> = if args.flatten {
        Vec::new()
    } else {
        table
            .transcripts
            .iter()
            .map(|t| t.z.round() as u32)
            .collect::<BTreeSet<u32>>()
            .into_iter()
            .collect()
    };

    // flattened: one region per tile; partitioned: one region per (z, tile),
    // so region index i maps to z index i / ntiles and tile i % ntiles
    let mut regions = Vec::new();
    if args.flatten {
        for (s, tile) in tiles.iter().enumerate() {
            let geometry = geo::geometry::MultiPolygon::new(vec![tile.to_polygon()]);
            regions.push(Region::new(s.to_string(), None, geometry).unwrap());
        }
    } else {
        for &z in &zs {
            for (s, tile) in tiles.iter().enumerate() {
                let geometry = geo::geometry::MultiPolygon::new(vec![tile.to_polygon()]);
                regions.push(Region::new(format!("{}_{}", z, s), Some(z), geometry).unwrap());
            }
        }
    }
    let region_names: Vec<String> = regions.iter().map(|r| r.name.clone()).collect();
    let index = RegionIndex::new(regions);

    println!("running spatial join between transcripts and spots");
    let points: Vec<(f64, f64, Option<u32>)> = table
        .transcripts
        .iter()
        .map(|t| {
            let z = if args.flatten { None } else { Some(t.z.round() as u32) };
            (t.x as f64, t.y as f64, z)
        })
        .collect();
    let assignments = assign_points(&index, &points);

    // the grid covers the transcript bounding box, so every transcript must
    // land in some spot
    assert!(
        assignments.iter().all(Option::is_some),
        "bug: not all transcripts were assigned a spot"
    );

    println!("constructing count matrix");
    let mut counts = CountMatrix::<u32>::zeros();
    for (transcript, assignment) in izip!(&table.transcripts, &assignments) {
        if let Some(region) = assignment {
            counts.add(*region, transcript.gene, 1);
        }
    }

    let occupied: Vec<u32> = {
        let mut regions: Vec<u32> = assignments.iter().flatten().copied().collect();
        regions.sort_unstable();
        regions.dedup();
        regions
    };

    let (primary, blanks) = counts::split_by_prefix(counts, &table.gene_names, &args.blank_prefix);
    println!("saving count matrix to {}", args.output_counts.display());
    write_counts(&args.output_counts, &primary, &region_names, &table.gene_names);
    println!("saving control-probe counts to {}", args.output_blank_counts.display());
    write_counts(&args.output_blank_counts, &blanks, &region_names, &table.gene_names);

    println!("saving spot metadata to {}", args.output_spots.display());
    let names: Vec<String> = occupied.iter().map(|&i| region_names[i as usize].clone()).collect();
    let xs: Vec<f64> = occupied.iter().map(|&i| tiles[i as usize % ntiles].center().x).collect();
    let ys: Vec<f64> = occupied.iter().map(|&i| tiles[i as usize % ntiles].center().y).collect();
    let spot_zs: Option<Vec<f64>> = if args.flatten {
        None
    } else {
        Some(
            occupied
                .iter()
                .map(|&i| zs[i as usize / ntiles] as f64 * args.z_micron_distance)
                .collect(),
        )
    };
    write_spot_metadata(&args.output_spots, names, xs, ys, spot_zs);
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Intersects;

    #[test]
    fn grid_covers_its_generating_points() {
        let points = vec![(3.0, -2.0), (110.5, 48.0), (57.0, 33.3), (3.0, 48.0)];
        let bounds = point_bounds(points.iter().copied()).unwrap();
        let tiles = spot_grid(bounds, 25.0);

        for &(x, y) in &points {
            let covered = tiles
                .iter()
                .any(|tile| tile.to_polygon().intersects(&geo::geometry::Point::new(x, y)));
            assert!(covered, "point ({}, {}) not covered by any spot", x, y);
        }
    }

    #[test]
    fn tiles_carry_the_overlap_margin() {
        let bounds = point_bounds(vec![(0.0, 0.0), (10.0, 10.0)]).unwrap();
        let side = 10.0;
        let tiles = spot_grid(bounds, side);

        for tile in &tiles {
            let width = tile.max().x - tile.min().x;
            let height = tile.max().y - tile.min().y;
            assert!((width - side * (1.0 + 1.5 * SPOT_OVERLAP_SCALE)).abs() < 1e-9);
            assert!((height - side * (1.0 + 1.5 * SPOT_OVERLAP_SCALE)).abs() < 1e-9);
        }
    }

    #[test]
    fn generation_order_is_y_major() {
        let bounds = point_bounds(vec![(0.0, 0.0), (19.0, 19.0)]).unwrap();
        let tiles = spot_grid(bounds, 10.0);

        // neighbors along x are consecutive; stepping in y jumps a whole row
        assert!(tiles.len() >= 4);
        assert!((tiles[1].min().x - tiles[0].min().x - 10.0).abs() < 1e-9);
        assert!((tiles[1].min().y - tiles[0].min().y).abs() < 1e-9);
        let row_len = tiles
            .iter()
            .position(|t| (t.min().y - tiles[0].min().y).abs() > 1e-9)
            .unwrap();
        assert!((tiles[row_len].min().y - tiles[0].min().y - 10.0).abs() < 1e-9);
    }
}
