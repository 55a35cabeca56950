//! Populations from many files laid out in one global ID space.

use crate::error::{Result, StoreError};
use crate::file::File;
use crate::view::View;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Global element identifier (cell gid or global edge index).
pub type Gid = u32;

/// An element addressed by population and zero-based offset inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocalElement {
    pub pop_name: String,
    pub el_id: u32,
}

impl LocalElement {
    pub fn new(pop_name: impl Into<String>, el_id: u32) -> Self {
        Self {
            pop_name: pop_name.into(),
            el_id,
        }
    }
}

impl fmt::Display for LocalElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.pop_name, self.el_id)
    }
}

/// Node or edge populations aggregated from an ordered list of files.
///
/// Population `k` owns the half-open global range
/// `[partitions[k], partitions[k + 1])`.
#[derive(Debug, Clone)]
pub struct PartitionedRecord {
    // keeps every file alive for as long as the record is
    files: Vec<Arc<File>>,
    pop_names: Vec<String>,
    map: HashMap<String, usize>,
    partitions: Vec<Gid>,
    populations: Vec<View>,
}

const IDENTITY_DATASETS: [&str; 2] = ["node_type_id", "edge_type_id"];

/// Length of the `node_type_id` or `edge_type_id` dataset, which defines a
/// population's size. A population must carry exactly one of them.
fn identity_size(file: &File, pop: &View) -> Result<usize> {
    let mut found = IDENTITY_DATASETS
        .iter()
        .filter_map(|name| pop.dataset_size(name).map(|size| (*name, size)));
    match (found.next(), found.next()) {
        (Some((_, size)), None) => Ok(size),
        (None, _) => Err(StoreError::structural(format!(
            "{}: population {} has no node_type_id or edge_type_id dataset",
            file.name(),
            pop.name()
        ))),
        (Some(_), Some(_)) => Err(StoreError::structural(format!(
            "{}: population {} has both node_type_id and edge_type_id datasets",
            file.name(),
            pop.name()
        ))),
    }
}

impl PartitionedRecord {
    pub fn new(files: Vec<Arc<File>>) -> Result<Self> {
        let mut pop_names = Vec::new();
        let mut map = HashMap::new();
        let mut partitions: Vec<Gid> = vec![0];
        let mut populations = Vec::new();
        let mut total: Gid = 0;

        for file in &files {
            let container = match file.root().groups() {
                [container] => container,
                other => {
                    return Err(StoreError::structural(format!(
                        "{}: expected exactly one top-level group, found {}",
                        file.name(),
                        other.len()
                    )))
                }
            };

            for group in container.groups() {
                let view = View::new(group.clone());
                let name = view.name().to_string();
                if map.contains_key(&name) {
                    return Err(StoreError::structural(format!(
                        "{}: population {} defined more than once",
                        file.name(),
                        name
                    )));
                }
                let size = identity_size(file, &view)?;
                total = Gid::try_from(size)
                    .ok()
                    .and_then(|s| total.checked_add(s))
                    .ok_or_else(|| {
                        StoreError::structural(format!(
                            "population {} overflows the global id space",
                            name
                        ))
                    })?;

                debug!(
                    population = %name,
                    size,
                    first_gid = partitions[partitions.len() - 1],
                    "registered population"
                );
                map.insert(name.clone(), populations.len());
                pop_names.push(name);
                populations.push(view);
                partitions.push(total);
            }
        }

        info!(
            files = files.len(),
            populations = populations.len(),
            elements = total,
            "built partitioned record"
        );
        Ok(Self {
            files,
            pop_names,
            map,
            partitions,
            populations,
        })
    }

    /// Checks that every population is node-shaped.
    pub fn verify_nodes(&self) -> Result<()> {
        for p in &self.populations {
            if p.find_dataset("node_type_id").is_none() {
                return Err(StoreError::structural(format!(
                    "node population {} has no node_type_id dataset",
                    p.name()
                )));
            }
            if p.find_dataset("node_id").is_some() {
                return Err(StoreError::structural(format!(
                    "node population {} has a node_id dataset; \
                     ids are assigned contiguously from 0",
                    p.name()
                )));
            }
        }
        Ok(())
    }

    /// Checks that every population is edge-shaped.
    pub fn verify_edges(&self) -> Result<()> {
        for p in &self.populations {
            if p.find_group("indices").is_none() {
                return Err(StoreError::structural(format!(
                    "edge population {} has no indices group",
                    p.name()
                )));
            }
            if p.find_dataset("edge_type_id").is_none() {
                return Err(StoreError::structural(format!(
                    "edge population {} has no edge_type_id dataset",
                    p.name()
                )));
            }
            if p.find_dataset("edge_id").is_some() {
                return Err(StoreError::structural(format!(
                    "edge population {} has an edge_id dataset; \
                     ids are assigned contiguously from 0",
                    p.name()
                )));
            }
        }
        Ok(())
    }

    /// Index of the population owning `gid`, or `None` past the last element.
    pub fn population_index_of(&self, gid: Gid) -> Option<usize> {
        if gid >= self.num_elements() {
            return None;
        }
        // first boundary strictly above gid, minus one
        let k = self.partitions.partition_point(|&b| b <= gid);
        Some(k - 1)
    }

    /// Population and local offset of `gid`; `None` if out of range.
    pub fn localize(&self, gid: Gid) -> Option<LocalElement> {
        let k = self.population_index_of(gid)?;
        Some(LocalElement {
            pop_name: self.pop_names[k].clone(),
            el_id: gid - self.partitions[k],
        })
    }

    pub fn globalize(&self, el: &LocalElement) -> Result<Gid> {
        let k = *self
            .map
            .get(&el.pop_name)
            .ok_or_else(|| StoreError::not_found("population", el.pop_name.clone()))?;
        let size = self.partitions[k + 1] - self.partitions[k];
        if el.el_id >= size {
            return Err(StoreError::not_found("element", el.to_string()));
        }
        Ok(self.partitions[k] + el.el_id)
    }

    pub fn num_elements(&self) -> Gid {
        self.partitions.last().copied().unwrap_or(0)
    }

    pub fn population(&self, name: &str) -> Result<&View> {
        self.map
            .get(name)
            .map(|&i| &self.populations[i])
            .ok_or_else(|| StoreError::not_found("population", name))
    }

    pub fn population_at(&self, i: usize) -> Result<&View> {
        self.populations
            .get(i)
            .ok_or_else(|| StoreError::not_found("population", format!("#{}", i)))
    }

    pub fn find_population(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    /// Number of elements in population `i`.
    pub fn population_size(&self, i: usize) -> Option<Gid> {
        Some(self.partitions.get(i + 1)? - self.partitions[i])
    }

    pub fn pop_names(&self) -> &[String] {
        &self.pop_names
    }

    pub fn populations(&self) -> &[View] {
        &self.populations
    }

    pub fn partitions(&self) -> &[Gid] {
        &self.partitions
    }

    pub fn map(&self) -> &HashMap<String, usize> {
        &self.map
    }

    pub fn files(&self) -> &[Arc<File>] {
        &self.files
    }
}
