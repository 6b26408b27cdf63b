// Table schemas shared between the tool runners and output.rs.

use arrow::datatypes::{DataType, Field, Schema};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum OutputFormat {
    Csv,
    CsvGz,
    Parquet,
    Arrow,
}

pub fn large_utf8_if_parquet(fmt: OutputFormat) -> DataType {
    match fmt {
        OutputFormat::Parquet => DataType::LargeUtf8,
        _ => DataType::Utf8,
    }
}

pub fn assigned_transcripts_schema(fmt: OutputFormat) -> Schema {
    Schema::new(vec![
        Field::new("index_transcript", DataType::UInt64, false),
        Field::new("gene", large_utf8_if_parquet(fmt), false),
        Field::new("x", DataType::Float32, false),
        Field::new("y", DataType::Float32, false),
        Field::new("global_z", DataType::Float32, false),
        Field::new("label", DataType::UInt32, true),
    ])
}

pub fn counts_schema(fmt: OutputFormat) -> Schema {
    Schema::new(vec![
        Field::new("region", large_utf8_if_parquet(fmt), false),
        Field::new("gene", large_utf8_if_parquet(fmt), false),
        Field::new("count", DataType::UInt32, false),
    ])
}

pub fn spot_metadata_schema(fmt: OutputFormat, flatten: bool) -> Schema {
    let mut fields = vec![
        Field::new("region", large_utf8_if_parquet(fmt), false),
        Field::new("spot_x", DataType::Float64, false),
        Field::new("spot_y", DataType::Float64, false),
    ];
    if !flatten {
        fields.push(Field::new("spot_z", DataType::Float64, false));
    }
    Schema::new(fields)
}

pub fn boundary_schema() -> Schema {
    Schema::new(vec![
        Field::new("label", DataType::UInt32, false),
        Field::new("coords", DataType::Binary, false),
        Field::new("global_z", DataType::UInt32, false),
    ])
}

pub fn find_column_index(schema: &Schema, column: &str) -> usize {
    match schema.index_of(column) {
        Ok(index) => index,
        _ => panic!("Column '{}' not found in table", column),
    }
}
