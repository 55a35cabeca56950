//! HDF5 backend, the on-disk format of SONATA circuits.
//!
//! Like the container backend it holds no open handle: every call opens the
//! file, touches one object and lets the handles drop before returning.
//!
//! Integer datasets of any width are read as `int32` and floats as `float64`,
//! relying on HDF5's type conversion. Fixed and variable length strings both
//! surface as NUL padded fixed-width rows.

use super::{Backend, ElementKind, Layout, NodeKind, Payload};
use crate::error::{Result, StoreError};
use hdf5::types::{FixedAscii, FixedUnicode, TypeDescriptor, VarLenAscii, VarLenUnicode};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Widest fixed-length string we read; HDF5 converts narrower ones up.
const MAX_FIXED_WIDTH: usize = 256;

#[derive(Debug)]
pub struct Hdf5Backend {
    path: PathBuf,
    writable: bool,
}

fn last_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn lossy_rows<S: AsRef<str>>(values: &[S], width: usize) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * width);
    for v in values {
        let raw = v.as_ref().as_bytes();
        let n = raw.len().min(width);
        bytes.extend_from_slice(&raw[..n]);
        bytes.resize(bytes.len() + width - n, 0);
    }
    bytes
}

fn le_bytes<T, const N: usize>(
    values: impl IntoIterator<Item = T>,
    f: fn(T) -> [u8; N],
) -> Vec<u8> {
    values.into_iter().flat_map(f).collect()
}

impl Hdf5Backend {
    /// Opens an existing HDF5 file read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let backend = Self {
            path: path.as_ref().to_path_buf(),
            writable: false,
        };
        backend.file()?;
        debug!(path = %backend.path.display(), "opened hdf5 file");
        Ok(backend)
    }

    /// Creates (or truncates) an HDF5 file and opens it for writing.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let err = hdf5_err(&path);
        hdf5::File::create(&path).map_err(err)?;
        debug!(path = %path.display(), "created hdf5 file");
        Ok(Self {
            path,
            writable: true,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file(&self) -> Result<hdf5::File> {
        let opened = if self.writable {
            hdf5::File::open_rw(&self.path)
        } else {
            hdf5::File::open(&self.path)
        };
        opened.map_err(hdf5_err(&self.path))
    }

    fn dataset(&self, path: &str) -> Result<hdf5::Dataset> {
        let file = self.file()?;
        if !file.link_exists(path) {
            return Err(StoreError::not_found("dataset", path));
        }
        file.dataset(path).map_err(hdf5_err(&self.path))
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(StoreError::Precondition("hdf5 file was opened read-only"))
        }
    }

    fn descriptor(&self, ds: &hdf5::Dataset) -> Result<TypeDescriptor> {
        ds.dtype()
            .and_then(|t| t.to_descriptor())
            .map_err(hdf5_err(&self.path))
    }

    fn format_error(&self, reason: String) -> StoreError {
        StoreError::Format {
            path: self.path.clone(),
            reason,
        }
    }

    /// Reads rows `[start, end)` of a string dataset.
    fn strings(
        &self,
        ds: &hdf5::Dataset,
        desc: &TypeDescriptor,
        start: usize,
        end: usize,
    ) -> Result<Vec<String>> {
        let err = hdf5_err(&self.path);
        let values = match desc {
            TypeDescriptor::VarLenUnicode => ds
                .read_slice_1d::<VarLenUnicode, _>(start..end)
                .map_err(err)?
                .iter()
                .map(|s| s.as_str().to_string())
                .collect(),
            TypeDescriptor::VarLenAscii => ds
                .read_slice_1d::<VarLenAscii, _>(start..end)
                .map_err(err)?
                .iter()
                .map(|s| s.as_str().to_string())
                .collect(),
            TypeDescriptor::FixedAscii(_) => ds
                .read_slice_1d::<FixedAscii<MAX_FIXED_WIDTH>, _>(start..end)
                .map_err(err)?
                .iter()
                .map(|s| s.as_str().to_string())
                .collect(),
            TypeDescriptor::FixedUnicode(_) => ds
                .read_slice_1d::<FixedUnicode<MAX_FIXED_WIDTH>, _>(start..end)
                .map_err(err)?
                .iter()
                .map(|s| s.as_str().to_string())
                .collect(),
            other => {
                return Err(self.format_error(format!("{:?} is not a string type", other)))
            }
        };
        Ok(values)
    }

    fn read_string_attr(&self, attr: &hdf5::Attribute) -> Result<String> {
        let err = hdf5_err(&self.path);
        let desc = attr
            .dtype()
            .and_then(|t| t.to_descriptor())
            .map_err(hdf5_err(&self.path))?;
        let value = match desc {
            TypeDescriptor::VarLenUnicode => {
                attr.read_scalar::<VarLenUnicode>().map_err(err)?.as_str().to_string()
            }
            TypeDescriptor::VarLenAscii => {
                attr.read_scalar::<VarLenAscii>().map_err(err)?.as_str().to_string()
            }
            TypeDescriptor::FixedAscii(_) => attr
                .read_scalar::<FixedAscii<MAX_FIXED_WIDTH>>()
                .map_err(err)?
                .as_str()
                .to_string(),
            TypeDescriptor::FixedUnicode(_) => attr
                .read_scalar::<FixedUnicode<MAX_FIXED_WIDTH>>()
                .map_err(err)?
                .as_str()
                .to_string(),
            other => {
                return Err(self.format_error(format!(
                    "attribute of type {:?} is not a string",
                    other
                )))
            }
        };
        Ok(value)
    }
}

fn hdf5_err(path: &Path) -> impl FnOnce(hdf5::Error) -> StoreError {
    let path = path.to_path_buf();
    move |source| StoreError::Hdf5 { path, source }
}

impl Backend for Hdf5Backend {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn list(&self, group: &str) -> Result<Vec<(String, NodeKind)>> {
        let file = self.file()?;
        let err = || hdf5_err(&self.path);
        let g = file.group(group).map_err(err())?;

        let groups: HashSet<String> = g
            .groups()
            .map_err(err())?
            .iter()
            .map(|c| last_segment(&c.name()).to_string())
            .collect();
        let datasets: HashSet<String> = g
            .datasets()
            .map_err(err())?
            .iter()
            .map(|c| last_segment(&c.name()).to_string())
            .collect();

        // named datatypes and dangling links are neither
        Ok(g.member_names()
            .map_err(err())?
            .into_iter()
            .filter_map(|name| {
                if groups.contains(&name) {
                    Some((name, NodeKind::Group))
                } else if datasets.contains(&name) {
                    Some((name, NodeKind::Dataset))
                } else {
                    None
                }
            })
            .collect())
    }

    fn layout(&self, dataset: &str) -> Result<Layout> {
        let ds = self.dataset(dataset)?;
        let shape = ds.shape();
        let kind = match self.descriptor(&ds)? {
            TypeDescriptor::Integer(_) | TypeDescriptor::Unsigned(_) => ElementKind::Int32,
            TypeDescriptor::Float(_) => ElementKind::Float64,
            TypeDescriptor::FixedAscii(width) | TypeDescriptor::FixedUnicode(width) => {
                if width > MAX_FIXED_WIDTH {
                    return Err(self.format_error(format!(
                        "{}: strings of {} bytes exceed the supported {}",
                        dataset, width, MAX_FIXED_WIDTH
                    )));
                }
                ElementKind::FixedString { width }
            }
            desc @ (TypeDescriptor::VarLenAscii | TypeDescriptor::VarLenUnicode) => {
                let n = shape.first().copied().unwrap_or(0);
                let longest = if n == 0 {
                    0
                } else {
                    self.strings(&ds, &desc, 0, n)?
                        .iter()
                        .map(String::len)
                        .max()
                        .unwrap_or(0)
                };
                ElementKind::FixedString {
                    width: longest.max(1),
                }
            }
            other => {
                return Err(self.format_error(format!(
                    "{}: unsupported element type {:?}",
                    dataset, other
                )))
            }
        };
        let numeric = matches!(kind, ElementKind::Int32 | ElementKind::Float64);
        if shape.len() > 2 || (shape.len() == 2 && !numeric) {
            return Err(self.format_error(format!(
                "{}: unsupported shape {:?} for {}",
                dataset, shape, kind
            )));
        }
        Ok(Layout { kind, shape })
    }

    fn read_rows(&self, dataset: &str, start: usize, count: usize) -> Result<Vec<u8>> {
        let layout = self.layout(dataset)?;
        let end = start
            .checked_add(count)
            .filter(|&end| end <= layout.len())
            .ok_or_else(|| {
                self.format_error(format!(
                    "rows [{}, {}) outside of {} with {} rows",
                    start,
                    start.saturating_add(count),
                    dataset,
                    layout.len()
                ))
            })?;
        if count == 0 {
            return Ok(Vec::new());
        }

        let ds = self.dataset(dataset)?;
        let err = || hdf5_err(&self.path);
        let two_d = layout.shape.len() == 2;
        let bytes = match layout.kind {
            ElementKind::Int32 if two_d => {
                let rows = ds.read_slice_2d::<i32, _>((start..end, ..)).map_err(err())?;
                le_bytes(rows.iter().copied(), i32::to_le_bytes)
            }
            ElementKind::Int32 => {
                let rows = ds.read_slice_1d::<i32, _>(start..end).map_err(err())?;
                le_bytes(rows.iter().copied(), i32::to_le_bytes)
            }
            ElementKind::Float64 if two_d => {
                let rows = ds.read_slice_2d::<f64, _>((start..end, ..)).map_err(err())?;
                le_bytes(rows.iter().copied(), f64::to_le_bytes)
            }
            ElementKind::Float64 => {
                let rows = ds.read_slice_1d::<f64, _>(start..end).map_err(err())?;
                le_bytes(rows.iter().copied(), f64::to_le_bytes)
            }
            ElementKind::FixedString { width } => {
                let desc = self.descriptor(&ds)?;
                lossy_rows(&self.strings(&ds, &desc, start, end)?, width)
            }
        };
        Ok(bytes)
    }

    fn attribute(&self, dataset: &str, key: &str) -> Result<Option<String>> {
        let ds = self.dataset(dataset)?;
        let names = ds.attr_names().map_err(hdf5_err(&self.path))?;
        if !names.iter().any(|n| n == key) {
            return Ok(None);
        }
        let attr = ds.attr(key).map_err(hdf5_err(&self.path))?;
        self.read_string_attr(&attr).map(Some)
    }

    fn create_group(&self, group: &str) -> Result<bool> {
        self.ensure_writable()?;
        let file = self.file()?;
        if file.link_exists(group) {
            if file.group(group).is_ok() {
                return Ok(false);
            }
            return Err(StoreError::structural(format!(
                "cannot create group {}: a dataset of that name exists",
                group
            )));
        }
        file.create_group(group).map_err(hdf5_err(&self.path))?;
        Ok(true)
    }

    fn create_dataset(&self, dataset: &str, payload: &Payload) -> Result<Layout> {
        self.ensure_writable()?;
        let file = self.file()?;
        if file.link_exists(dataset) {
            return Err(StoreError::structural(format!(
                "cannot create dataset {}: name already in use",
                dataset
            )));
        }

        let layout = &payload.layout;
        let err = || hdf5_err(&self.path);
        let width = layout.kind.width();
        let chunks = payload.bytes.chunks_exact(width.max(1));
        match layout.kind {
            ElementKind::Int32 => {
                let values: Vec<i32> = chunks
                    .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                let ds = file
                    .new_dataset::<i32>()
                    .shape(layout.shape.clone())
                    .create(dataset)
                    .map_err(err())?;
                if !values.is_empty() {
                    ds.write_raw(values.as_slice()).map_err(err())?;
                }
            }
            ElementKind::Float64 => {
                let values: Vec<f64> = chunks
                    .map(|c| {
                        let mut a = [0u8; 8];
                        a.copy_from_slice(c);
                        f64::from_le_bytes(a)
                    })
                    .collect();
                let ds = file
                    .new_dataset::<f64>()
                    .shape(layout.shape.clone())
                    .create(dataset)
                    .map_err(err())?;
                if !values.is_empty() {
                    ds.write_raw(values.as_slice()).map_err(err())?;
                }
            }
            ElementKind::FixedString { .. } => {
                let values = chunks
                    .map(|c| {
                        let end = c.iter().position(|&b| b == 0).unwrap_or(c.len());
                        let text = std::str::from_utf8(&c[..end])
                            .map_err(|e| StoreError::structural(format!("{}: {}", dataset, e)))?;
                        VarLenUnicode::from_str(text)
                            .map_err(|e| StoreError::structural(format!("{}: {}", dataset, e)))
                    })
                    .collect::<Result<Vec<_>>>()?;
                let ds = file
                    .new_dataset::<VarLenUnicode>()
                    .shape(layout.shape.clone())
                    .create(dataset)
                    .map_err(err())?;
                if !values.is_empty() {
                    ds.write_raw(values.as_slice()).map_err(err())?;
                }
            }
        }
        Ok(layout.clone())
    }

    fn set_attribute(&self, dataset: &str, key: &str, value: &str) -> Result<()> {
        self.ensure_writable()?;
        let ds = self.dataset(dataset)?;
        let err = || hdf5_err(&self.path);
        if ds.attr_names().map_err(err())?.iter().any(|n| n == key) {
            return Err(StoreError::structural(format!(
                "attribute {} of {} is already set",
                key, dataset
            )));
        }
        let value = VarLenUnicode::from_str(value)
            .map_err(|e| StoreError::structural(format!("attribute {}: {}", key, e)))?;
        ds.new_attr::<VarLenUnicode>()
            .create(key)
            .and_then(|attr| attr.write_scalar(&value))
            .map_err(err())
    }
}
