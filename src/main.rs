use clap::{Parser, Subcommand};

mod addlab;
mod assign;
mod boundary;
mod counts;
mod from_proseg;
mod geojson;
mod geometry;
mod maskio;
mod output;
mod regiontable;
mod schemas;
mod spot;
mod transcripts;

#[derive(Parser, Debug)]
#[command(name = "cellbound", version)]
#[command(about = "Convert label masks to cell polygons and back, and assign detected transcripts to cells or spots.")]
struct Cli {
    /// Number of worker threads (default: one per core)
    #[arg(long, global = true)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Extract cell boundary polygons from a segmentation label mask
    Boundary(boundary::BoundaryArgs),

    /// Assign detected transcripts to cell polygons and build count matrices
    Assign(assign::AssignArgs),

    /// Assign detected transcripts to a synthetic spot grid
    Spot(spot::SpotArgs),

    /// Rasterize proseg cell polygons into a label mask
    FromProseg(from_proseg::FromProsegArgs),

    /// Merge hand-drawn label overlays into a label mask
    AddLabels(addlab::AddLabelsArgs),
}

fn main() {
    let cli = Cli::parse();

    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .expect("Unable to initialize worker thread pool");
    }

    match cli.command {
        Commands::Boundary(args) => boundary::run(args),
        Commands::Assign(args) => assign::run(args),
        Commands::Spot(args) => spot::run(args),
        Commands::FromProseg(args) => from_proseg::run(args),
        Commands::AddLabels(args) => addlab::run(args),
    }
}
