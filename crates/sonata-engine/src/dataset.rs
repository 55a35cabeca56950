use crate::element::{Element, Scalar};
use crate::error::{Result, Selection, StoreError};
use crate::storage::{Backend, Layout};
use ndarray::Array2;
use std::sync::Arc;

/// Handle to one array-valued dataset.
///
/// Only the layout is kept in memory; every read goes back to the backend,
/// which acquires and releases the underlying resource within the call.
#[derive(Debug, Clone)]
pub struct Dataset {
    backend: Arc<dyn Backend>,
    path: String,
    name: String,
    layout: Layout,
}

impl Dataset {
    pub(crate) fn open(backend: Arc<dyn Backend>, path: String, name: String) -> Result<Self> {
        let layout = backend.layout(&path)?;
        Ok(Self {
            backend,
            path,
            name,
            layout,
        })
    }

    pub(crate) fn from_layout(
        backend: Arc<dyn Backend>,
        path: String,
        name: String,
        layout: Layout,
    ) -> Self {
        Self {
            backend,
            path,
            name,
            layout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Number of elements (first dimension).
    pub fn size(&self) -> usize {
        self.layout.len()
    }

    fn decode_error(&self, selection: Selection, reason: impl Into<String>) -> StoreError {
        StoreError::Decode {
            dataset: self.path.clone(),
            selection,
            reason: reason.into(),
        }
    }

    fn check_type<T: Element>(&self, selection: Selection) -> Result<()> {
        if T::accepts(&self.layout) {
            Ok(())
        } else {
            Err(self.decode_error(
                selection,
                format!("stored as {}, requested {}", self.layout, T::DESCRIPTION),
            ))
        }
    }

    fn fetch<T: Element>(
        &self,
        start: usize,
        count: usize,
        selection: Selection,
    ) -> Result<Vec<T>> {
        let raw = self
            .backend
            .read_rows(&self.path, start, count)
            .map_err(|e| self.decode_error(selection, e.to_string()))?;
        let row_bytes = self.layout.row_bytes();
        let expected = row_bytes.saturating_mul(count);
        if raw.len() != expected {
            return Err(self.decode_error(
                selection,
                format!("backend returned {} bytes, expected {}", raw.len(), expected),
            ));
        }
        if row_bytes == 0 {
            return (0..count)
                .map(|_| T::decode(&[], &self.layout).map_err(|e| self.decode_error(selection, e)))
                .collect();
        }
        raw.chunks_exact(row_bytes)
            .map(|row| T::decode(row, &self.layout).map_err(|e| self.decode_error(selection, e)))
            .collect()
    }

    /// Reads every element.
    pub fn read_all<T: Element>(&self) -> Result<Vec<T>> {
        self.check_type::<T>(Selection::All)?;
        self.fetch(0, self.size(), Selection::All)
    }

    /// Reads element `i`.
    pub fn read_at<T: Element>(&self, i: usize) -> Result<T> {
        let selection = Selection::Index(i);
        self.check_type::<T>(selection)?;
        if i >= self.size() {
            return Err(self.decode_error(
                selection,
                format!("out of range for {} elements", self.size()),
            ));
        }
        let mut values: Vec<T> = self.fetch(i, 1, selection)?;
        values
            .pop()
            .ok_or_else(|| self.decode_error(selection, "no data returned"))
    }

    /// Reads elements `[i, j)`. An empty or inverted range yields no elements.
    pub fn read_range<T: Element>(&self, i: usize, j: usize) -> Result<Vec<T>> {
        let selection = Selection::Range(i, j);
        self.check_type::<T>(selection)?;
        if j <= i {
            return Ok(Vec::new());
        }
        if j > self.size() {
            return Err(self.decode_error(
                selection,
                format!("out of range for {} elements", self.size()),
            ));
        }
        self.fetch(i, j - i, selection)
    }

    /// Reads a 2-D numeric dataset as a matrix.
    pub fn read_matrix<T: Scalar>(&self) -> Result<Array2<T>> {
        let selection = Selection::All;
        if self.layout.kind != T::KIND || self.layout.shape.len() != 2 {
            return Err(self.decode_error(
                selection,
                format!("stored as {}, requested 2-D {}", self.layout, T::KIND),
            ));
        }
        let (rows, cols) = (self.layout.shape[0], self.layout.shape[1]);
        let raw = self
            .backend
            .read_rows(&self.path, 0, rows)
            .map_err(|e| self.decode_error(selection, e.to_string()))?;
        let width = T::KIND.width();
        let values: Vec<T> = raw.chunks_exact(width).map(T::from_le).collect();
        Array2::from_shape_vec((rows, cols), values)
            .map_err(|e| self.decode_error(selection, e.to_string()))
    }

    pub fn attribute(&self, key: &str) -> Result<Option<String>> {
        self.backend.attribute(&self.path, key)
    }

    pub fn set_attribute(&self, key: &str, value: &str) -> Result<()> {
        self.backend.set_attribute(&self.path, key, value)
    }
}
