//! Single-file container backend.
//!
//! Layout on disk:
//!
//! ```text
//! [magic: 8 bytes "SNTAv001"][catalog offset: u64 LE][catalog length: u64 LE]
//! [dataset blobs, row-major little-endian ...]
//! [catalog, bincode]
//! ```
//!
//! The catalog (group tree, dataset layouts, blob offsets and attributes) is
//! loaded once when the container is opened. Row reads open the file, seek to
//! the selected rows and close it again before returning.

use super::{split_path, Backend, Layout, NodeKind, Payload};
use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tracing::debug;

const MAGIC: &[u8; 8] = b"SNTAv001";
const HEADER_LEN: u64 = 24;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct GroupEntry {
    members: Vec<Member>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Member {
    name: String,
    node: Node,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Group(GroupEntry),
    Dataset(DatasetEntry),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DatasetEntry {
    layout: Layout,
    offset: u64,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
}

impl GroupEntry {
    fn member(&self, name: &str) -> Option<&Node> {
        self.members.iter().find(|m| m.name == name).map(|m| &m.node)
    }

    fn member_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.members
            .iter_mut()
            .find(|m| m.name == name)
            .map(|m| &mut m.node)
    }
}

/// Persisted tree of the container.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Catalog {
    root: GroupEntry,
}

impl Catalog {
    fn node(&self, path: &str) -> Option<&Node> {
        let mut parts = split_path(path).peekable();
        let mut group = &self.root;
        while let Some(part) = parts.next() {
            let node = group.member(part)?;
            if parts.peek().is_none() {
                return Some(node);
            }
            match node {
                Node::Group(g) => group = g,
                Node::Dataset(_) => return None,
            }
        }
        None
    }

    fn group(&self, path: &str) -> Option<&GroupEntry> {
        if split_path(path).next().is_none() {
            return Some(&self.root);
        }
        match self.node(path)? {
            Node::Group(g) => Some(g),
            Node::Dataset(_) => None,
        }
    }

    fn group_mut(&mut self, path: &str) -> Option<&mut GroupEntry> {
        let mut group = &mut self.root;
        for part in split_path(path) {
            match group.member_mut(part)? {
                Node::Group(g) => group = g,
                Node::Dataset(_) => return None,
            }
        }
        Some(group)
    }

    fn dataset(&self, path: &str) -> Option<&DatasetEntry> {
        match self.node(path)? {
            Node::Dataset(d) => Some(d),
            Node::Group(_) => None,
        }
    }

    fn dataset_mut(&mut self, path: &str) -> Option<&mut DatasetEntry> {
        let (parent, name) = parent_and_name(path);
        match self.group_mut(parent)?.member_mut(name)? {
            Node::Dataset(d) => Some(d),
            Node::Group(_) => None,
        }
    }
}

fn parent_and_name(path: &str) -> (&str, &str) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(i) => (&trimmed[..i], &trimmed[i + 1..]),
        None => ("", trimmed),
    }
}

fn write_at(file: &mut fs::File, offset: u64, bytes: &[u8]) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(bytes)
}

#[derive(Debug)]
struct State {
    catalog: Catalog,
    /// End of the blob region; the catalog is (re)written from here.
    data_end: u64,
}

/// A container file on disk.
#[derive(Debug)]
pub struct ContainerBackend {
    path: PathBuf,
    writable: bool,
    state: RwLock<State>,
}

impl ContainerBackend {
    /// Opens an existing container read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = fs::File::open(&path).map_err(StoreError::io(&path))?;

        let mut header = [0u8; HEADER_LEN as usize];
        file.read_exact(&mut header).map_err(|_| StoreError::Format {
            path: path.clone(),
            reason: "file too short for a container header".to_string(),
        })?;
        if &header[..8] != MAGIC {
            return Err(StoreError::Format {
                path,
                reason: "bad magic".to_string(),
            });
        }
        let offset = u64::from_le_bytes(header[8..16].try_into().unwrap_or_default());
        let len = u64::from_le_bytes(header[16..24].try_into().unwrap_or_default());

        let file_len = file.metadata().map_err(StoreError::io(&path))?.len();
        let end = offset.checked_add(len);
        if offset < HEADER_LEN || end.map_or(true, |end| end > file_len) {
            return Err(StoreError::Format {
                path,
                reason: format!(
                    "catalog of {} bytes at {} lies outside the {} byte file",
                    len, offset, file_len
                ),
            });
        }

        file.seek(SeekFrom::Start(offset))
            .map_err(StoreError::io(&path))?;
        let mut raw = vec![0u8; len as usize];
        file.read_exact(&mut raw).map_err(|_| StoreError::Format {
            path: path.clone(),
            reason: format!("catalog truncated (expected {} bytes at {})", len, offset),
        })?;
        let catalog: Catalog = bincode::deserialize(&raw).map_err(|e| StoreError::Format {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        debug!(path = %path.display(), catalog_bytes = len, "opened container");
        Ok(Self {
            path,
            writable: false,
            state: RwLock::new(State {
                catalog,
                data_end: offset,
            }),
        })
    }

    /// Creates (or truncates) a container and opens it for writing.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let backend = Self {
            path,
            writable: true,
            state: RwLock::new(State {
                catalog: Catalog::default(),
                data_end: HEADER_LEN,
            }),
        };
        {
            let state = backend.state.read().unwrap_or_else(PoisonError::into_inner);
            let mut file = fs::File::create(&backend.path).map_err(StoreError::io(&backend.path))?;
            backend.write_catalog(&mut file, &state)?;
        }
        debug!(path = %backend.path.display(), "created container");
        Ok(backend)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_catalog(&self, file: &mut fs::File, state: &State) -> Result<()> {
        let raw = bincode::serialize(&state.catalog).map_err(|e| StoreError::Format {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        let mut header = Vec::with_capacity(HEADER_LEN as usize);
        header.extend_from_slice(MAGIC);
        header.extend_from_slice(&state.data_end.to_le_bytes());
        header.extend_from_slice(&(raw.len() as u64).to_le_bytes());

        write_at(file, state.data_end, &raw)
            .and_then(|_| file.set_len(state.data_end + raw.len() as u64))
            .and_then(|_| write_at(file, 0, &header))
            .and_then(|_| file.flush())
            .map_err(StoreError::io(&self.path))
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(StoreError::Precondition("container was opened read-only"))
        }
    }

    fn open_rw(&self) -> Result<fs::File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(StoreError::io(&self.path))
    }
}

impl Backend for ContainerBackend {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn list(&self, group: &str) -> Result<Vec<(String, NodeKind)>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let entry = state
            .catalog
            .group(group)
            .ok_or_else(|| StoreError::not_found("group", group))?;
        Ok(entry
            .members
            .iter()
            .map(|m| {
                let kind = match m.node {
                    Node::Group(_) => NodeKind::Group,
                    Node::Dataset(_) => NodeKind::Dataset,
                };
                (m.name.clone(), kind)
            })
            .collect())
    }

    fn layout(&self, dataset: &str) -> Result<Layout> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .catalog
            .dataset(dataset)
            .map(|d| d.layout.clone())
            .ok_or_else(|| StoreError::not_found("dataset", dataset))
    }

    fn read_rows(&self, dataset: &str, start: usize, count: usize) -> Result<Vec<u8>> {
        let (layout, offset) = {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            let entry = state
                .catalog
                .dataset(dataset)
                .ok_or_else(|| StoreError::not_found("dataset", dataset))?;
            (entry.layout.clone(), entry.offset)
        };
        if start.checked_add(count).map_or(true, |end| end > layout.len()) {
            return Err(StoreError::Format {
                path: self.path.clone(),
                reason: format!(
                    "rows [{}, {}) outside of {} with {} rows",
                    start,
                    start.saturating_add(count),
                    dataset,
                    layout.len()
                ),
            });
        }

        let mut file = fs::File::open(&self.path).map_err(StoreError::io(&self.path))?;
        let file_len = file.metadata().map_err(StoreError::io(&self.path))?.len();
        let row_bytes = layout.row_bytes() as u64;
        let extent = (start as u64)
            .checked_mul(row_bytes)
            .and_then(|skip| offset.checked_add(skip))
            .zip((count as u64).checked_mul(row_bytes))
            .filter(|&(from, bytes)| from.checked_add(bytes).map_or(false, |end| end <= file_len));
        let (from, bytes) = extent.ok_or_else(|| StoreError::Format {
            path: self.path.clone(),
            reason: format!(
                "rows [{}, {}) of {} ({}) run past the end of the file",
                start,
                start + count,
                dataset,
                layout
            ),
        })?;

        file.seek(SeekFrom::Start(from))
            .map_err(StoreError::io(&self.path))?;
        let mut buf = vec![0u8; bytes as usize];
        file.read_exact(&mut buf).map_err(StoreError::io(&self.path))?;
        Ok(buf)
    }

    fn attribute(&self, dataset: &str, key: &str) -> Result<Option<String>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let entry = state
            .catalog
            .dataset(dataset)
            .ok_or_else(|| StoreError::not_found("dataset", dataset))?;
        Ok(entry.attributes.get(key).cloned())
    }

    fn create_group(&self, group: &str) -> Result<bool> {
        self.ensure_writable()?;
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let (parent, name) = parent_and_name(group);
        let parent_entry = state
            .catalog
            .group_mut(parent)
            .ok_or_else(|| StoreError::not_found("group", parent))?;
        match parent_entry.member(name) {
            Some(Node::Group(_)) => return Ok(false),
            Some(Node::Dataset(_)) => {
                return Err(StoreError::structural(format!(
                    "cannot create group {}: a dataset of that name exists",
                    group
                )))
            }
            None => {}
        }
        parent_entry.members.push(Member {
            name: name.to_string(),
            node: Node::Group(GroupEntry::default()),
        });

        let mut file = self.open_rw()?;
        self.write_catalog(&mut file, &state)?;
        Ok(true)
    }

    fn create_dataset(&self, dataset: &str, payload: &Payload) -> Result<Layout> {
        self.ensure_writable()?;
        let expected = payload.layout.len().saturating_mul(payload.layout.row_bytes());
        if payload.bytes.len() != expected {
            return Err(StoreError::structural(format!(
                "payload for {} holds {} bytes, layout {} needs {}",
                dataset,
                payload.bytes.len(),
                payload.layout,
                expected
            )));
        }

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let (parent, name) = parent_and_name(dataset);
        let parent_entry = state
            .catalog
            .group(parent)
            .ok_or_else(|| StoreError::not_found("group", parent))?;
        if parent_entry.member(name).is_some() {
            return Err(StoreError::structural(format!(
                "cannot create dataset {}: name already in use",
                dataset
            )));
        }

        let offset = state.data_end;
        let mut file = self.open_rw()?;
        write_at(&mut file, offset, &payload.bytes).map_err(StoreError::io(&self.path))?;
        state.data_end += payload.bytes.len() as u64;

        if let Some(parent_entry) = state.catalog.group_mut(parent) {
            parent_entry.members.push(Member {
                name: name.to_string(),
                node: Node::Dataset(DatasetEntry {
                    layout: payload.layout.clone(),
                    offset,
                    attributes: BTreeMap::new(),
                }),
            });
        }
        self.write_catalog(&mut file, &state)?;
        Ok(payload.layout.clone())
    }

    fn set_attribute(&self, dataset: &str, key: &str, value: &str) -> Result<()> {
        self.ensure_writable()?;
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state
            .catalog
            .dataset_mut(dataset)
            .ok_or_else(|| StoreError::not_found("dataset", dataset))?
            .attributes
            .insert(key.to_string(), value.to_string());
        let mut file = self.open_rw()?;
        self.write_catalog(&mut file, &state)
    }
}
