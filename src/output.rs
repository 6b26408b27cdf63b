// Tabular output sinks. Tables are assembled as arrow record batches and
// written as csv, csv.gz, parquet, or arrow IPC depending on the output
// file's suffix.

use arrow::array::{Array, Float32Array, Float64Array, LargeStringArray, RecordBatch, StringArray, UInt32Array, UInt64Array};
use arrow::csv;
use flate2::write::GzEncoder;
use flate2::Compression;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression::ZSTD, ZstdLevel};
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use crate::counts::CountMatrix;
use crate::schemas::{assigned_transcripts_schema, counts_schema, spot_metadata_schema, OutputFormat};
use crate::transcripts::TranscriptTable;

pub fn determine_format(filename: &Path) -> OutputFormat {
    let name = filename.to_string_lossy();
    if name.ends_with(".csv.gz") {
        OutputFormat::CsvGz
    } else if name.ends_with(".csv") {
        OutputFormat::Csv
    } else if name.ends_with(".parquet") {
        OutputFormat::Parquet
    } else if name.ends_with(".arrow") || name.ends_with(".feather") {
        OutputFormat::Arrow
    } else {
        panic!("Unknown file format for: {}", name);
    }
}

pub fn write_table(filename: &Path, batch: RecordBatch) {
    let fmt = determine_format(filename);
    let file = File::create(filename)
        .unwrap_or_else(|err| panic!("Unable to create output file {}: {}", filename.display(), err));

    match fmt {
        OutputFormat::Csv => write_table_csv(file, &batch),
        OutputFormat::CsvGz => write_table_csv(GzEncoder::new(file, Compression::default()), &batch),
        OutputFormat::Parquet => write_table_parquet(file, &batch),
        OutputFormat::Arrow => write_table_arrow(file, &batch),
    }
}

fn write_table_csv<W: std::io::Write>(output: W, batch: &RecordBatch) {
    let mut writer = csv::WriterBuilder::new().with_header(true).build(output);
    writer.write(batch).expect("Error writing csv file");
}

fn write_table_parquet(output: File, batch: &RecordBatch) {
    let props = WriterProperties::builder()
        .set_compression(ZSTD(ZstdLevel::try_new(3).unwrap()))
        .build();
    let mut writer = ArrowWriter::try_new(output, batch.schema(), Some(props))
        .expect("Error writing parquet file");
    writer.write(batch).expect("Error writing parquet file");
    writer.close().expect("Error writing parquet file");
}

fn write_table_arrow(output: File, batch: &RecordBatch) {
    let schema = batch.schema();
    let mut writer = arrow::ipc::writer::FileWriter::try_new(output, schema.as_ref())
        .expect("Error writing arrow file");
    writer.write(batch).expect("Error writing arrow file");
    writer.finish().expect("Error writing arrow file");
}

fn utf8_column(fmt: OutputFormat, values: Vec<String>) -> Arc<dyn Array> {
    match fmt {
        OutputFormat::Parquet => Arc::new(LargeStringArray::from(values)),
        _ => Arc::new(StringArray::from(values)),
    }
}

/// The input transcript table with its resolved region label appended;
/// unassigned transcripts carry a null label.
pub fn write_assigned_transcripts(
    filename: &Path,
    table: &TranscriptTable,
    labels: &[Option<u32>],
) {
    let fmt = determine_format(filename);
    let schema = assigned_transcripts_schema(fmt);

    let genes: Vec<String> = table
        .transcripts
        .iter()
        .map(|t| table.gene_names[t.gene as usize].clone())
        .collect();

    let columns: Vec<Arc<dyn Array>> = vec![
        Arc::new((0..table.transcripts.len() as u64).collect::<UInt64Array>()),
        utf8_column(fmt, genes),
        Arc::new(table.transcripts.iter().map(|t| t.x).collect::<Float32Array>()),
        Arc::new(table.transcripts.iter().map(|t| t.y).collect::<Float32Array>()),
        Arc::new(table.transcripts.iter().map(|t| t.z).collect::<Float32Array>()),
        Arc::new(labels.iter().copied().collect::<UInt32Array>()),
    ];

    let batch = RecordBatch::try_new(Arc::new(schema), columns)
        .expect("Unable to assemble assigned transcript table");
    write_table(filename, batch);
}

/// Sparse triplet serialization of a count matrix: one (region, gene, count)
/// row per nonzero entry.
pub fn write_counts(
    filename: &Path,
    counts: &CountMatrix<u32>,
    region_names: &[String],
    gene_names: &[String],
) {
    let fmt = determine_format(filename);
    let schema = counts_schema(fmt);

    let mut regions = Vec::with_capacity(counts.nnz());
    let mut genes = Vec::with_capacity(counts.nnz());
    let mut values = Vec::with_capacity(counts.nnz());
    for (region, gene, count) in counts.iter() {
        regions.push(region_names[region as usize].clone());
        genes.push(gene_names[gene as usize].clone());
        values.push(count);
    }

    let columns: Vec<Arc<dyn Array>> = vec![
        utf8_column(fmt, regions),
        utf8_column(fmt, genes),
        Arc::new(UInt32Array::from(values)),
    ];

    let batch =
        RecordBatch::try_new(Arc::new(schema), columns).expect("Unable to assemble count table");
    write_table(filename, batch);
}

/// Spot centroid metadata for every region that received at least one
/// transcript.
pub fn write_spot_metadata(
    filename: &Path,
    names: Vec<String>,
    xs: Vec<f64>,
    ys: Vec<f64>,
    zs: Option<Vec<f64>>,
) {
    let fmt = determine_format(filename);
    let schema = spot_metadata_schema(fmt, zs.is_none());

    let mut columns: Vec<Arc<dyn Array>> = vec![
        utf8_column(fmt, names),
        Arc::new(Float64Array::from(xs)),
        Arc::new(Float64Array::from(ys)),
    ];
    if let Some(zs) = zs {
        columns.push(Arc::new(Float64Array::from(zs)));
    }

    let batch = RecordBatch::try_new(Arc::new(schema), columns)
        .expect("Unable to assemble spot metadata table");
    write_table(filename, batch);
}
