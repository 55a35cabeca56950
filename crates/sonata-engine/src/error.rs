use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The rows a failed read was asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    All,
    Index(usize),
    Range(usize, usize),
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::All => write!(f, "all rows"),
            Selection::Index(i) => write!(f, "index {}", i),
            Selection::Range(i, j) => write!(f, "range [{}, {})", i, j),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// A file or population does not have the node/edge shape we expect.
    #[error("structural error: {0}")]
    Structural(String),

    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    #[error("failed to read dataset `{dataset}` ({selection}): {reason}")]
    Decode {
        dataset: String,
        selection: Selection,
        reason: String,
    },

    /// Programming error: an operation was called out of order.
    #[error("precondition violated: {0}")]
    Precondition(&'static str),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed container {path}: {reason}")]
    Format { path: PathBuf, reason: String },

    #[error("failed to parse {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to read table {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("invalid parameters in {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    #[cfg(feature = "hdf5")]
    #[error("hdf5 error on {path}: {source}")]
    Hdf5 {
        path: PathBuf,
        #[source]
        source: hdf5::Error,
    },
}

impl StoreError {
    pub fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        StoreError::NotFound {
            kind,
            key: key.into(),
        }
    }

    pub fn structural(msg: impl Into<String>) -> Self {
        StoreError::Structural(msg.into())
    }

    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| StoreError::Io { path, source }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
