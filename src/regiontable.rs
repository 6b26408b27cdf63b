// Cell boundary table serialization: one row per (label, z slice) that
// yielded valid geometry, with the geometry column holding little-endian WKB
// multipolygons in the transform's target coordinate space. Tables are
// written as arrow IPC files and read back by the assignment tool; several
// tables concatenate into one region set.

use arrow::array::{Array, BinaryArray, RecordBatch, UInt32Array};
use geo::geometry::{Coord, LineString, MultiPolygon, Polygon};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use wkb::writer::{write_multi_polygon, WriteOptions};

use crate::schemas::{boundary_schema, find_column_index};

pub struct BoundaryRow {
    pub label: u32,
    pub z: u32,
    pub geometry: MultiPolygon<f64>,
}

pub fn write_boundary_table(path: &Path, rows: &[BoundaryRow]) {
    let schema = Arc::new(boundary_schema());

    let mut buf = Vec::new();
    let wkb_write_opts = WriteOptions::default();
    let geometry: BinaryArray = rows
        .iter()
        .map(|row| {
            buf.clear();
            write_multi_polygon(&mut buf, &row.geometry, &wkb_write_opts)
                .expect("Unable to encode cell polygon as WKB");
            Some(buf.clone())
        })
        .collect();

    let columns: Vec<Arc<dyn Array>> = vec![
        Arc::new(rows.iter().map(|r| r.label).collect::<UInt32Array>()),
        Arc::new(geometry),
        Arc::new(rows.iter().map(|r| r.z).collect::<UInt32Array>()),
    ];

    let batch = RecordBatch::try_new(schema.clone(), columns)
        .expect("Unable to assemble boundary table");

    let file = File::create(path)
        .unwrap_or_else(|err| panic!("Unable to create boundary table {}: {}", path.display(), err));
    let mut writer = arrow::ipc::writer::FileWriter::try_new(file, schema.as_ref())
        .expect("Unable to write boundary table");
    writer.write(&batch).expect("Unable to write boundary table");
    writer.finish().expect("Unable to write boundary table");
}

pub fn read_boundary_table(path: &Path) -> Vec<BoundaryRow> {
    let file = File::open(path)
        .unwrap_or_else(|err| panic!("Unable to open boundary table {}: {}", path.display(), err));
    let reader = arrow::ipc::reader::FileReader::try_new(file, None)
        .unwrap_or_else(|err| panic!("Unable to read boundary table {}: {}", path.display(), err));

    let schema = reader.schema();
    let label_col = find_column_index(&schema, "label");
    let coords_col = find_column_index(&schema, "coords");
    let z_col = find_column_index(&schema, "global_z");

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch.expect("Unable to read record batch.");
        let labels = batch
            .column(label_col)
            .as_any()
            .downcast_ref::<UInt32Array>()
            .expect("boundary table 'label' column must be uint32");
        let coords = batch
            .column(coords_col)
            .as_any()
            .downcast_ref::<BinaryArray>()
            .expect("boundary table 'coords' column must be binary");
        let zs = batch
            .column(z_col)
            .as_any()
            .downcast_ref::<UInt32Array>()
            .expect("boundary table 'global_z' column must be uint32");

        for i in 0..batch.num_rows() {
            rows.push(BoundaryRow {
                label: labels.value(i),
                z: zs.value(i),
                geometry: decode_wkb_multipolygon(coords.value(i)),
            });
        }
    }
    rows
}

// Minimal WKB decoding for the little-endian multipolygons the writer above
// emits. Plain polygons (type 3) are accepted and promoted to single-part
// multipolygons.

const WKB_POLYGON: u32 = 3;
const WKB_MULTI_POLYGON: u32 = 6;

struct WkbCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WkbCursor<'a> {
    fn take(&mut self, n: usize) -> &'a [u8] {
        assert!(self.pos + n <= self.buf.len(), "truncated WKB geometry");
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        bytes
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take(4).try_into().unwrap())
    }

    fn f64(&mut self) -> f64 {
        f64::from_le_bytes(self.take(8).try_into().unwrap())
    }

    // byte order marker + geometry type
    fn header(&mut self) -> u32 {
        let byte_order = self.take(1)[0];
        assert!(byte_order == 1, "big-endian WKB is not supported");
        self.u32()
    }

    fn ring(&mut self) -> LineString<f64> {
        let npoints = self.u32() as usize;
        let mut coords = Vec::with_capacity(npoints);
        for _ in 0..npoints {
            coords.push(Coord {
                x: self.f64(),
                y: self.f64(),
            });
        }
        LineString::new(coords)
    }

    fn polygon_body(&mut self) -> Polygon<f64> {
        let nrings = self.u32() as usize;
        assert!(nrings > 0, "WKB polygon with no rings");
        let exterior = self.ring();
        let interiors = (1..nrings).map(|_| self.ring()).collect();
        Polygon::new(exterior, interiors)
    }
}

fn decode_wkb_multipolygon(buf: &[u8]) -> MultiPolygon<f64> {
    let mut cursor = WkbCursor { buf, pos: 0 };
    match cursor.header() {
        WKB_MULTI_POLYGON => {
            let npolygons = cursor.u32() as usize;
            let polygons = (0..npolygons)
                .map(|_| {
                    let geom_type = cursor.header();
                    assert!(
                        geom_type == WKB_POLYGON,
                        "expected polygon inside WKB multipolygon, found type {}",
                        geom_type
                    );
                    cursor.polygon_body()
                })
                .collect();
            MultiPolygon::new(polygons)
        }
        WKB_POLYGON => MultiPolygon::new(vec![cursor.polygon_body()]),
        geom_type => panic!("Unsupported WKB geometry type {}", geom_type),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn donut() -> MultiPolygon<f64> {
        MultiPolygon::new(vec![
            Polygon::new(
                LineString::from(vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0), (0.0, 0.0)]),
                vec![LineString::from(vec![
                    (4.0, 4.0),
                    (6.0, 4.0),
                    (6.0, 6.0),
                    (4.0, 6.0),
                    (4.0, 4.0),
                ])],
            ),
            Polygon::new(
                LineString::from(vec![(20.0, 0.5), (21.5, 0.5), (21.5, 2.0), (20.0, 0.5)]),
                Vec::new(),
            ),
        ])
    }

    #[test]
    fn wkb_round_trip() {
        let geom = donut();
        let mut buf = Vec::new();
        write_multi_polygon(&mut buf, &geom, &WriteOptions::default()).unwrap();

        let decoded = decode_wkb_multipolygon(&buf);
        assert_eq!(decoded, geom);
    }

    #[test]
    #[should_panic(expected = "truncated WKB")]
    fn truncated_wkb_is_rejected() {
        let geom = donut();
        let mut buf = Vec::new();
        write_multi_polygon(&mut buf, &geom, &WriteOptions::default()).unwrap();
        decode_wkb_multipolygon(&buf[0..buf.len() - 5]);
    }
}
