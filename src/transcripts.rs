// Detected transcript table input. The table is read fully up front; gene
// names are interned so downstream aggregation works on dense indices.

use flate2::read::GzDecoder;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

pub type GeneIndex = u32;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Transcript {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub gene: GeneIndex,
}

pub struct TranscriptTable {
    pub gene_names: Vec<String>,
    pub transcripts: Vec<Transcript>,
}

pub struct TranscriptColumns<'a> {
    pub gene: &'a str,
    pub x: &'a str,
    pub y: &'a str,
    pub z: &'a str,
}

pub fn read_transcripts_csv(path: &Path, columns: &TranscriptColumns) -> TranscriptTable {
    let file = File::open(path)
        .unwrap_or_else(|err| panic!("Unable to open '{}': {}", path.display(), err));

    if path.to_string_lossy().ends_with(".gz") {
        read_transcripts(csv::Reader::from_reader(GzDecoder::new(file)), columns)
    } else {
        read_transcripts(csv::Reader::from_reader(file), columns)
    }
}

fn find_column(headers: &csv::StringRecord, column: &str) -> usize {
    let col = headers.iter().position(|x| x == column);
    match col {
        Some(col) => col,
        None => panic!("Column '{}' not found in CSV file", column),
    }
}

fn parse_coordinate(row: &csv::StringRecord, col: usize, column: &str) -> f32 {
    row[col]
        .parse::<f32>()
        .unwrap_or_else(|_| panic!("Malformed value '{}' in column '{}'", &row[col], column))
}

fn read_transcripts<T>(mut rdr: csv::Reader<T>, columns: &TranscriptColumns) -> TranscriptTable
where
    T: Read,
{
    let headers = rdr.headers().expect("Unable to read CSV header.").clone();
    let gene_col = find_column(&headers, columns.gene);
    let x_col = find_column(&headers, columns.x);
    let y_col = find_column(&headers, columns.y);
    let z_col = find_column(&headers, columns.z);

    let mut gene_name_map: HashMap<String, GeneIndex> = HashMap::new();
    let mut gene_names = Vec::new();
    let mut transcripts = Vec::new();

    for result in rdr.records() {
        let row = result.expect("Unable to read CSV record.");

        let gene_name = &row[gene_col];
        let gene = if let Some(&gene) = gene_name_map.get(gene_name) {
            gene
        } else {
            gene_names.push(gene_name.to_string());
            let gene = (gene_names.len() - 1) as GeneIndex;
            gene_name_map.insert(gene_name.to_string(), gene);
            gene
        };

        transcripts.push(Transcript {
            x: parse_coordinate(&row, x_col, columns.x),
            y: parse_coordinate(&row, y_col, columns.y),
            z: parse_coordinate(&row, z_col, columns.z),
            gene,
        });
    }

    TranscriptTable {
        gene_names,
        transcripts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const COLUMNS: TranscriptColumns = TranscriptColumns {
        gene: "gene",
        x: "global_x",
        y: "global_y",
        z: "global_z",
    };

    #[test]
    fn reads_and_interns_genes() {
        let data = "\
gene,global_x,global_y,global_z
Acta2,1.5,2.0,0
Blank-3,4.0,5.5,1
Acta2,7.25,8.0,1
";
        let table = read_transcripts(csv::Reader::from_reader(Cursor::new(data)), &COLUMNS);

        assert_eq!(table.gene_names, vec!["Acta2", "Blank-3"]);
        assert_eq!(table.transcripts.len(), 3);
        assert_eq!(table.transcripts[0].gene, 0);
        assert_eq!(table.transcripts[1].gene, 1);
        assert_eq!(table.transcripts[2].gene, 0);
        assert_eq!(table.transcripts[2].x, 7.25);
        assert_eq!(table.transcripts[1].z, 1.0);
    }

    #[test]
    #[should_panic(expected = "Column 'gene' not found")]
    fn missing_column_is_fatal() {
        let data = "feature,global_x,global_y,global_z\nA,1,2,3\n";
        read_transcripts(csv::Reader::from_reader(Cursor::new(data)), &COLUMNS);
    }

    #[test]
    #[should_panic(expected = "Malformed value")]
    fn malformed_coordinate_is_fatal() {
        let data = "gene,global_x,global_y,global_z\nA,one,2,3\n";
        read_transcripts(csv::Reader::from_reader(Cursor::new(data)), &COLUMNS);
    }
}
