use crate::error::{Result, StoreError};
use crate::group::Group;
use crate::storage::{Backend, ContainerBackend, FileFormat};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// One physical file and its discovered group tree.
///
/// Every group and dataset below the root shares ownership of the backend,
/// so the resource stays available as long as any derived handle exists.
#[derive(Debug)]
pub struct File {
    name: String,
    backend: Arc<dyn Backend>,
    root: Arc<Group>,
}

impl File {
    /// Opens an existing file read-only and discovers its tree. The backend
    /// is picked from the file signature.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let backend: Arc<dyn Backend> = match FileFormat::detect(path)? {
            FileFormat::Container => Arc::new(ContainerBackend::open(path)?),
            #[cfg(feature = "hdf5")]
            FileFormat::Hdf5 => Arc::new(crate::storage::Hdf5Backend::open(path)?),
            #[cfg(not(feature = "hdf5"))]
            FileFormat::Hdf5 => {
                return Err(StoreError::Format {
                    path: path.to_path_buf(),
                    reason: "HDF5 file, but this build lacks the `hdf5` feature".to_string(),
                })
            }
        };
        Self::with_backend(backend)
    }

    /// Creates an empty container for writing, truncating any existing file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let backend = ContainerBackend::create(path)?;
        Self::with_backend(Arc::new(backend))
    }

    /// Creates an empty HDF5 file for writing, truncating any existing file.
    #[cfg(feature = "hdf5")]
    pub fn create_hdf5(path: impl AsRef<Path>) -> Result<Self> {
        let backend = crate::storage::Hdf5Backend::create(path)?;
        Self::with_backend(Arc::new(backend))
    }

    /// Builds the tree over any backend.
    pub fn with_backend(backend: Arc<dyn Backend>) -> Result<Self> {
        let name = backend.name();
        let root = Group::discover(backend.clone(), "/".to_string(), "/".to_string())?;
        debug!(
            file = %name,
            groups = root.groups().len(),
            datasets = root.datasets().len(),
            "loaded file"
        );
        Ok(Self {
            name,
            backend,
            root: Arc::new(root),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn root(&self) -> &Arc<Group> {
        &self.root
    }

    /// Mutable access to the root for the write path. Only possible while no
    /// view shares the tree.
    pub fn root_mut(&mut self) -> Result<&mut Group> {
        Arc::get_mut(&mut self.root).ok_or(StoreError::Precondition(
            "file tree is shared and can no longer be modified",
        ))
    }
}

impl fmt::Display for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.name)?;
        write!(f, "{}", self.root)
    }
}
