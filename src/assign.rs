// Spatial assignment of detected transcripts to region polygons. Candidate
// regions come from a uniform grid of region bounding boxes; containment is
// boundary inclusive; a point inside several regions goes to the one with
// the nearest centroid, with exact distance ties kept on the earliest region
// in input order so reruns reproduce byte-identical output.

use clap::Args;
use geo::geometry::{MultiPolygon, Point, Rect};
use geo::{BoundingRect, Centroid, EuclideanDistance, Intersects};
use itertools::izip;
use rayon::prelude::*;
use std::path::PathBuf;

use crate::counts::{self, CountMatrix};
use crate::output::{write_assigned_transcripts, write_counts};
use crate::regiontable::read_boundary_table;
use crate::transcripts::{read_transcripts_csv, TranscriptColumns};

pub struct Region {
    pub name: String,
    pub z: Option<u32>,
    pub geometry: MultiPolygon<f64>,
    centroid: Point<f64>,
    bbox: Rect<f64>,
}

impl Region {
    /// None when the geometry is empty (no bounding box or centroid), which
    /// a repaired boundary table never contains.
    pub fn new(name: String, z: Option<u32>, geometry: MultiPolygon<f64>) -> Option<Region> {
        let bbox = geometry.bounding_rect()?;
        let centroid = geometry.centroid()?;
        Some(Region {
            name,
            z,
            geometry,
            centroid,
            bbox,
        })
    }
}

/// Uniform grid of region bounding boxes, sized so a typical region spans
/// about one bin. Bins only prune candidates; containment is always decided
/// on the polygon itself.
pub struct RegionIndex {
    regions: Vec<Region>,
    bins: Vec<Vec<u32>>,
    nx: usize,
    ny: usize,
    x0: f64,
    y0: f64,
    bin_w: f64,
    bin_h: f64,
}

impl RegionIndex {
    pub fn new(regions: Vec<Region>) -> RegionIndex {
        if regions.is_empty() {
            return RegionIndex {
                regions,
                bins: Vec::new(),
                nx: 0,
                ny: 0,
                x0: 0.0,
                y0: 0.0,
                bin_w: 1.0,
                bin_h: 1.0,
            };
        }

        let x0 = regions.iter().map(|r| r.bbox.min().x).fold(f64::INFINITY, f64::min);
        let y0 = regions.iter().map(|r| r.bbox.min().y).fold(f64::INFINITY, f64::min);
        let x1 = regions.iter().map(|r| r.bbox.max().x).fold(f64::NEG_INFINITY, f64::max);
        let y1 = regions.iter().map(|r| r.bbox.max().y).fold(f64::NEG_INFINITY, f64::max);

        let mean_extent = (regions
            .iter()
            .map(|r| r.bbox.width().max(r.bbox.height()))
            .sum::<f64>()
            / regions.len() as f64)
            .max(1e-9);

        let nx = (((x1 - x0) / mean_extent).ceil() as usize).clamp(1, 1024);
        let ny = (((y1 - y0) / mean_extent).ceil() as usize).clamp(1, 1024);
        let bin_w = ((x1 - x0) / nx as f64).max(1e-9);
        let bin_h = ((y1 - y0) / ny as f64).max(1e-9);

        let mut bins: Vec<Vec<u32>> = vec![Vec::new(); nx * ny];
        for (i, region) in regions.iter().enumerate() {
            let bx0 = (((region.bbox.min().x - x0) / bin_w) as usize).min(nx - 1);
            let by0 = (((region.bbox.min().y - y0) / bin_h) as usize).min(ny - 1);
            let bx1 = (((region.bbox.max().x - x0) / bin_w) as usize).min(nx - 1);
            let by1 = (((region.bbox.max().y - y0) / bin_h) as usize).min(ny - 1);
            for by in by0..=by1 {
                for bx in bx0..=bx1 {
                    bins[by * nx + bx].push(i as u32);
                }
            }
        }

        RegionIndex {
            regions,
            bins,
            nx,
            ny,
            x0,
            y0,
            bin_w,
            bin_h,
        }
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn region(&self, i: u32) -> &Region {
        &self.regions[i as usize]
    }

    /// Indices of regions containing (x, y), boundary inclusive, restricted
    /// to the matching partition when the region carries one. Candidates
    /// land in `out` in ascending region order.
    pub fn containing(&self, x: f64, y: f64, z: Option<u32>, out: &mut Vec<u32>) {
        out.clear();
        if self.bins.is_empty() {
            return;
        }

        // everything outside the grid clamps into a border bin, where the
        // bbox test rejects it
        let bx = (((x - self.x0) / self.bin_w) as usize).min(self.nx - 1);
        let by = (((y - self.y0) / self.bin_h) as usize).min(self.ny - 1);

        for &i in &self.bins[by * self.nx + bx] {
            let region = &self.regions[i as usize];
            if region.z.is_some() && region.z != z {
                continue;
            }
            let bbox = &region.bbox;
            if x < bbox.min().x || x > bbox.max().x || y < bbox.min().y || y > bbox.max().y {
                continue;
            }
            if region.geometry.intersects(&Point::new(x, y)) {
                out.push(i);
            }
        }
    }
}

/// One entry per input point: the index of the assigned region, or None for
/// points contained in no region.
pub fn assign_points(index: &RegionIndex, points: &[(f64, f64, Option<u32>)]) -> Vec<Option<u32>> {
    let assignments: Vec<Option<u32>> = points
        .par_iter()
        .map_init(Vec::new, |candidates, &(x, y, z)| {
            index.containing(x, y, z, candidates);
            match candidates.len() {
                0 => None,
                1 => Some(candidates[0]),
                _ => {
                    let point = Point::new(x, y);
                    candidates
                        .iter()
                        .map(|&i| (index.region(i).centroid.euclidean_distance(&point), i))
                        .min_by(|a, b| a.0.partial_cmp(&b.0).unwrap().then(a.1.cmp(&b.1)))
                        .map(|(_, i)| i)
                }
            }
        })
        .collect();

    assert!(
        assignments.len() == points.len(),
        "bug: expected one assignment row per transcript ({} rows for {} transcripts)",
        assignments.len(),
        points.len()
    );
    assignments
}

#[derive(Args, Debug)]
pub struct AssignArgs {
    /// Cell boundary tables from the boundary step (one or more)
    #[arg(required = true)]
    pub boundaries: Vec<PathBuf>,

    /// Detected transcripts table (csv or csv.gz)
    #[arg(long)]
    pub transcripts: PathBuf,

    /// Output transcript table with assigned cell labels
    #[arg(long, default_value = "assigned-transcripts.arrow")]
    pub output_transcripts: PathBuf,

    /// Output count matrix triplet table
    #[arg(long, default_value = "counts.csv.gz")]
    pub output_counts: PathBuf,

    /// Output control-probe count triplet table
    #[arg(long, default_value = "blank-counts.csv.gz")]
    pub output_blank_counts: PathBuf,

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

pub fn run(args: AssignArgs) {
    let mut regions = Vec::new();
    let mut region_labels = Vec::new();
    for path in &args.boundaries {
        println!("loading cell boundary table from {}", path.display());
        for row in read_boundary_table(path) {
            if let Some(region) = Region::new(row.label.to_string(), Some(row.z), row.geometry) {
                regions.push(region);
                region_labels.push(row.label);
            }
        }
    }
    println!("read {} cell polygons", regions.len());
    let region_names: Vec<String> = regions.iter().map(|r| r.name.clone()).collect();

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

    let index = RegionIndex::new(regions);

    println!("running spatial join between cells and transcripts");
    let points: Vec<(f64, f64, Option<u32>)> = table
        .transcripts
        .iter()
        .map(|t| (t.x as f64, t.y as f64, Some(t.z.round() as u32)))
        .collect();
    let assignments = assign_points(&index, &points);

    let nassigned = assignments.iter().flatten().count();
    println!("assigned {} of {} transcripts", nassigned, table.transcripts.len());

    println!("saving assigned transcript table to {}", args.output_transcripts.display());
    let labels: Vec<Option<u32>> = assignments
        .iter()
        .map(|assignment| assignment.map(|i| region_labels[i as usize]))
        .collect();
    write_assigned_transcripts(&args.output_transcripts, &table, &labels);

    println!("constructing count matrix");
    let mut counts = CountMatrix::<u32>::zeros();
    for (transcript, assignment) in izip!(&table.transcripts, &assignments) {
        if let Some(region) = assignment {
            counts.add(*region, transcript.gene, 1);
        }
    }

    let (primary, blanks) = counts::split_by_prefix(counts, &table.gene_names, &args.blank_prefix);
    println!("saving count matrix to {}", args.output_counts.display());
    write_counts(&args.output_counts, &primary, &region_names, &table.gene_names);
    println!("saving control-probe counts to {}", args.output_blank_counts.display());
    write_counts(&args.output_blank_counts, &blanks, &region_names, &table.gene_names);
}
