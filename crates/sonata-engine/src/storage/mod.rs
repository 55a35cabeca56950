//! The narrow storage contract the record store is built on, plus its two
//! implementations: the single-file container and, with the `hdf5` feature,
//! HDF5 files.

use crate::error::{Result, StoreError};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

pub mod container;
#[cfg(feature = "hdf5")]
pub mod hdf5;

pub use container::ContainerBackend;
#[cfg(feature = "hdf5")]
pub use self::hdf5::Hdf5Backend;

const HDF5_SIGNATURE: [u8; 8] = *b"\x89HDF\r\n\x1a\n";

/// On-disk formats `File::open` recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Container,
    Hdf5,
}

impl FileFormat {
    /// Sniffs the format from the file signature. The HDF5 superblock may sit
    /// after a user block, at offset 0, 512, 1024, 2048 and so on.
    pub fn detect(path: &Path) -> Result<Self> {
        let mut file = fs::File::open(path).map_err(StoreError::io(path))?;
        let len = file.metadata().map_err(StoreError::io(path))?.len();
        let mut offset = 0u64;
        let mut sig = [0u8; 8];
        while offset + 8 <= len {
            file.seek(SeekFrom::Start(offset))
                .and_then(|_| file.read_exact(&mut sig))
                .map_err(StoreError::io(path))?;
            if sig == HDF5_SIGNATURE {
                return Ok(FileFormat::Hdf5);
            }
            offset = if offset == 0 { 512 } else { offset * 2 };
        }
        Ok(FileFormat::Container)
    }
}

/// Element kinds a dataset can store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementKind {
    Int32,
    Float64,
    /// NUL padded strings of `width` bytes.
    FixedString { width: usize },
}

impl ElementKind {
    /// Size in bytes of one scalar component.
    pub fn width(&self) -> usize {
        match self {
            ElementKind::Int32 => 4,
            ElementKind::Float64 => 8,
            ElementKind::FixedString { width } => *width,
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementKind::Int32 => write!(f, "int32"),
            ElementKind::Float64 => write!(f, "float64"),
            ElementKind::FixedString { width } => write!(f, "string[{}]", width),
        }
    }
}

/// Element kind and extent of a dataset. The first dimension is the element
/// count; trailing dimensions make up one row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    pub kind: ElementKind,
    pub shape: Vec<usize>,
}

impl Layout {
    pub fn len(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Scalar components per row, saturating on overflow.
    pub fn row_len(&self) -> usize {
        self.shape
            .iter()
            .skip(1)
            .fold(1usize, |acc, &d| acc.saturating_mul(d))
    }

    pub fn row_bytes(&self) -> usize {
        self.row_len().saturating_mul(self.kind.width())
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:?}", self.kind, self.shape)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Group,
    Dataset,
}

/// What a backend has to offer: child listing, typed-layout lookup, row
/// reads and the small write surface used for auxiliary output.
///
/// Paths are absolute and `/`-separated; the root group is `/`.
pub trait Backend: Send + Sync + fmt::Debug {
    /// Human readable name of the underlying resource.
    fn name(&self) -> String;

    /// Immediate children of a group, in stored order.
    fn list(&self, group: &str) -> Result<Vec<(String, NodeKind)>>;

    fn layout(&self, dataset: &str) -> Result<Layout>;

    /// Raw little-endian bytes of rows `[start, start + count)`.
    fn read_rows(&self, dataset: &str, start: usize, count: usize) -> Result<Vec<u8>>;

    fn attribute(&self, dataset: &str, key: &str) -> Result<Option<String>>;

    /// Creates a group; returns `false` if it already existed.
    fn create_group(&self, group: &str) -> Result<bool>;

    fn create_dataset(&self, dataset: &str, payload: &Payload) -> Result<Layout>;

    fn set_attribute(&self, dataset: &str, key: &str, value: &str) -> Result<()>;
}

pub(crate) fn join_path(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{}{}", parent, name)
    } else {
        format!("{}/{}", parent, name)
    }
}

pub(crate) fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Encoded contents of a dataset about to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub layout: Layout,
    pub bytes: Vec<u8>,
}

/// Conversion of in-memory sequences into a dataset payload; the element
/// kind is inferred from the Rust type.
pub trait IntoPayload {
    fn into_payload(self) -> Result<Payload>;
}

fn numeric<T: Copy>(
    kind: ElementKind,
    shape: Vec<usize>,
    values: impl IntoIterator<Item = T>,
    encode: fn(T) -> Vec<u8>,
) -> Payload {
    let bytes = values.into_iter().flat_map(encode).collect();
    Payload {
        layout: Layout { kind, shape },
        bytes,
    }
}

fn rectangular<T>(rows: &[Vec<T>]) -> Result<usize> {
    let width = rows.first().map(Vec::len).unwrap_or(0);
    if let Some(bad) = rows.iter().position(|r| r.len() != width) {
        return Err(StoreError::structural(format!(
            "rows of a 2-D dataset must have equal length: row {} has {} values, expected {}",
            bad,
            rows[bad].len(),
            width
        )));
    }
    Ok(width)
}

impl IntoPayload for Vec<i32> {
    fn into_payload(self) -> Result<Payload> {
        let n = self.len();
        Ok(numeric(ElementKind::Int32, vec![n], self, |v: i32| {
            v.to_le_bytes().to_vec()
        }))
    }
}

impl IntoPayload for Vec<f64> {
    fn into_payload(self) -> Result<Payload> {
        let n = self.len();
        Ok(numeric(ElementKind::Float64, vec![n], self, |v: f64| {
            v.to_le_bytes().to_vec()
        }))
    }
}

impl IntoPayload for Vec<(i32, i32)> {
    fn into_payload(self) -> Result<Payload> {
        let n = self.len();
        Ok(numeric(
            ElementKind::Int32,
            vec![n, 2],
            self.into_iter().flat_map(|(a, b)| [a, b]),
            |v: i32| v.to_le_bytes().to_vec(),
        ))
    }
}

impl IntoPayload for Vec<Vec<i32>> {
    fn into_payload(self) -> Result<Payload> {
        let width = rectangular(&self)?;
        let n = self.len();
        Ok(numeric(
            ElementKind::Int32,
            vec![n, width],
            self.into_iter().flatten(),
            |v: i32| v.to_le_bytes().to_vec(),
        ))
    }
}

impl IntoPayload for Vec<Vec<f64>> {
    fn into_payload(self) -> Result<Payload> {
        let width = rectangular(&self)?;
        let n = self.len();
        Ok(numeric(
            ElementKind::Float64,
            vec![n, width],
            self.into_iter().flatten(),
            |v: f64| v.to_le_bytes().to_vec(),
        ))
    }
}

impl IntoPayload for Array2<i32> {
    fn into_payload(self) -> Result<Payload> {
        let shape = self.shape().to_vec();
        // iter() walks in logical row-major order regardless of memory layout
        Ok(numeric(ElementKind::Int32, shape, self.iter().copied(), |v: i32| {
            v.to_le_bytes().to_vec()
        }))
    }
}

impl IntoPayload for Array2<f64> {
    fn into_payload(self) -> Result<Payload> {
        let shape = self.shape().to_vec();
        Ok(numeric(ElementKind::Float64, shape, self.iter().copied(), |v: f64| {
            v.to_le_bytes().to_vec()
        }))
    }
}

impl IntoPayload for Vec<String> {
    fn into_payload(self) -> Result<Payload> {
        let width = self.iter().map(String::len).max().unwrap_or(0).max(1);
        let mut bytes = Vec::with_capacity(width * self.len());
        for s in &self {
            if s.as_bytes().contains(&0) {
                return Err(StoreError::structural(format!(
                    "string {:?} contains a NUL byte",
                    s
                )));
            }
            bytes.extend_from_slice(s.as_bytes());
            bytes.resize(bytes.len() + width - s.len(), 0);
        }
        Ok(Payload {
            layout: Layout {
                kind: ElementKind::FixedString { width },
                shape: vec![self.len()],
            },
            bytes,
        })
    }
}

impl IntoPayload for Vec<&str> {
    fn into_payload(self) -> Result<Payload> {
        self.into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>()
            .into_payload()
    }
}

impl IntoPayload for Payload {
    fn into_payload(self) -> Result<Payload> {
        Ok(self)
    }
}
