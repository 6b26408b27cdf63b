// Label mask storage. Masks are [z, y, x] stacks (or [y, x], treated as a
// single slice) of nonnegative integer labels with 0 as background, stored
// either as dense .npy arrays or as zarr v2 array stores. Both are presented
// through the same get-slice-by-z accessor so the extraction code never
// cares which one it was handed.

use ndarray::{Array2, Array3, ArrayD, ArrayViewD, Axis, Ix2, Ix3};
use ndarray_npy::{ReadNpyExt, WriteNpyExt};
use serde_json::json;
use std::fmt::Display;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use zarrs::array::DataType;
use zarrs::array_subset::ArraySubset;
use zarrs::filesystem::FilesystemStore;
use zarrs::metadata::v2::{ArrayMetadataV2, DataTypeMetadataV2};

pub enum MaskStore {
    Dense(Array3<u32>),
    Zarr {
        array: zarrs::array::Array<FilesystemStore>,
        ndim: usize,
        shape: (usize, usize, usize),
    },
}

impl MaskStore {
    pub fn open(path: &Path) -> MaskStore {
        let name = path.to_string_lossy();
        if name.ends_with(".npy") {
            MaskStore::Dense(read_mask_npy(path))
        } else if name.ends_with(".zarr") {
            open_mask_zarr(path)
        } else {
            panic!(
                "Unsupported label mask format for {}: expected .npy or .zarr",
                name
            );
        }
    }

    /// (nz, ny, nx); 2D masks report nz = 1.
    pub fn shape(&self) -> (usize, usize, usize) {
        match self {
            MaskStore::Dense(array) => {
                let d = array.dim();
                (d.0, d.1, d.2)
            }
            MaskStore::Zarr { shape, .. } => *shape,
        }
    }

    pub fn slice(&self, z: usize) -> Array2<u32> {
        let (nz, ny, nx) = self.shape();
        assert!(z < nz, "z index {} out of range for mask with {} slices", z, nz);
        match self {
            MaskStore::Dense(array) => array.index_axis(Axis(0), z).to_owned(),
            MaskStore::Zarr { array, ndim, .. } => {
                let subset = if *ndim == 2 {
                    ArraySubset::new_with_ranges(&[0..ny as u64, 0..nx as u64])
                } else {
                    ArraySubset::new_with_ranges(&[
                        z as u64..z as u64 + 1,
                        0..ny as u64,
                        0..nx as u64,
                    ])
                };
                let data = retrieve_labels(array, &subset);
                if *ndim == 2 {
                    data.into_dimensionality::<Ix2>().unwrap()
                } else {
                    data.into_dimensionality::<Ix3>()
                        .unwrap()
                        .index_axis_move(Axis(0), 0)
                }
            }
        }
    }
}

fn label_from<T>(value: T) -> u32
where
    T: TryInto<u32> + Display + Copy,
{
    value
        .try_into()
        .unwrap_or_else(|_| panic!("label value {} does not fit in a u32 mask", value))
}

fn read_mask_npy(path: &Path) -> Array3<u32> {
    let open = || {
        File::open(path)
            .unwrap_or_else(|err| panic!("Unable to open label mask {}: {}", path.display(), err))
    };

    let array: ArrayD<u32> = if let Ok(array) = ArrayD::<u32>::read_npy(open()) {
        array
    } else if let Ok(array) = ArrayD::<i64>::read_npy(open()) {
        array.mapv(label_from)
    } else if let Ok(array) = ArrayD::<i32>::read_npy(open()) {
        array.mapv(label_from)
    } else if let Ok(array) = ArrayD::<u64>::read_npy(open()) {
        array.mapv(label_from)
    } else if let Ok(array) = ArrayD::<u16>::read_npy(open()) {
        array.mapv(u32::from)
    } else {
        panic!(
            "Unable to read label mask {}: expected an integer npy array",
            path.display()
        );
    };

    match array.ndim() {
        2 => array
            .into_dimensionality::<Ix2>()
            .unwrap()
            .insert_axis(Axis(0)),
        3 => array.into_dimensionality::<Ix3>().unwrap(),
        ndim => panic!(
            "Label mask {} has {} dimensions, expected 2 or 3",
            path.display(),
            ndim
        ),
    }
}

fn open_mask_zarr(path: &Path) -> MaskStore {
    let store = Arc::new(FilesystemStore::new(path).unwrap_or_else(|err| {
        panic!("Unable to open zarr store {}: {}", path.display(), err)
    }));
    let array = zarrs::array::Array::open(store, "/").unwrap_or_else(|err| {
        panic!("Unable to open zarr array {}: {}", path.display(), err)
    });

    let dims = array.shape().to_vec();
    let (ndim, shape) = match dims.as_slice() {
        [ny, nx] => (2, (1, *ny as usize, *nx as usize)),
        [nz, ny, nx] => (3, (*nz as usize, *ny as usize, *nx as usize)),
        other => panic!(
            "Zarr mask {} has {} dimensions, expected 2 or 3",
            path.display(),
            other.len()
        ),
    };
    MaskStore::Zarr { array, ndim, shape }
}

fn retrieve_labels(
    array: &zarrs::array::Array<FilesystemStore>,
    subset: &ArraySubset,
) -> ArrayD<u32> {
    match array.data_type() {
        DataType::UInt32 => array.retrieve_array_subset_ndarray::<u32>(subset),
        DataType::Int64 => array
            .retrieve_array_subset_ndarray::<i64>(subset)
            .map(|data| data.mapv(label_from)),
        DataType::Int32 => array
            .retrieve_array_subset_ndarray::<i32>(subset)
            .map(|data| data.mapv(label_from)),
        DataType::UInt64 => array
            .retrieve_array_subset_ndarray::<u64>(subset)
            .map(|data| data.mapv(label_from)),
        DataType::UInt16 => array
            .retrieve_array_subset_ndarray::<u16>(subset)
            .map(|data| data.mapv(u32::from)),
        DataType::UInt8 => array
            .retrieve_array_subset_ndarray::<u8>(subset)
            .map(|data| data.mapv(u32::from)),
        DataType::Int16 => array
            .retrieve_array_subset_ndarray::<i16>(subset)
            .map(|data| data.mapv(label_from)),
        dtype => panic!("Unsupported zarr mask data type: {:?}", dtype),
    }
    .expect("Unable to retrieve mask slice from zarr array")
}

/// Write a 2D or 3D label mask, .npy (u32) or zarr v2 (i4, one chunk per z
/// slice) by suffix.
pub fn write_mask(path: &Path, mask: ArrayViewD<u32>) {
    let name = path.to_string_lossy();
    if name.ends_with(".npy") {
        let file = File::create(path).unwrap_or_else(|err| {
            panic!("Unable to create mask file {}: {}", path.display(), err)
        });
        mask.write_npy(file)
            .unwrap_or_else(|err| panic!("Unable to write mask file {}: {}", path.display(), err));
    } else if name.ends_with(".zarr") {
        write_mask_zarr(path, mask);
    } else {
        panic!("Unsupported output mask format for {}: expected .npy or .zarr", name);
    }
}

fn write_mask_zarr(path: &Path, mask: ArrayViewD<u32>) {
    let store = Arc::new(FilesystemStore::new(path).unwrap_or_else(|err| {
        panic!("Unable to create zarr store {}: {}", path.display(), err)
    }));

    let shape: Vec<u64> = mask.shape().iter().map(|&s| s as u64).collect();
    let chunks: Vec<u64> = if mask.ndim() == 3 {
        vec![1, shape[1], shape[2]]
    } else {
        shape.clone()
    };

    let metadata = ArrayMetadataV2::new(
        shape,
        chunks.try_into().expect("mask dimensions must be nonzero"),
        DataTypeMetadataV2::Simple(String::from("<i4")),
        serde_json::from_value(json!(0)).unwrap(),
        None,
        None,
    );
    let array = zarrs::array::Array::new_with_metadata(store, "/", metadata.into())
        .unwrap_or_else(|err| panic!("Unable to create zarr array {}: {}", path.display(), err));
    array
        .store_metadata()
        .unwrap_or_else(|err| panic!("Unable to write zarr metadata {}: {}", path.display(), err));

    let data: ArrayD<i32> = mask.mapv(|value| {
        i32::try_from(value)
            .unwrap_or_else(|_| panic!("label value {} does not fit in an i32 zarr mask", value))
    });
    let origin: Vec<u64> = vec![0; mask.ndim()];
    array
        .store_array_subset_ndarray(&origin, data)
        .unwrap_or_else(|err| panic!("Unable to write zarr array {}: {}", path.display(), err));
}
