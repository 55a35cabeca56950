//! Simulation and circuit configuration files.
//!
//! Relative paths inside a config file are taken relative to the directory
//! holding that file.

use crate::dynamics::{DynamicsCatalog, DynamicsSource};
use crate::error::{Result, StoreError};
use crate::file::File;
use crate::model::ModelDescription;
use crate::record::PartitionedRecord;
use crate::spikes::SortOrder;
use crate::types::CsvTypeTable;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunParams {
    /// Simulated duration (ms).
    pub tstop: f64,
    pub dt: f64,
    pub spike_threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conditions {
    pub celsius: f64,
    pub v_init: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpikeOutput {
    pub spikes_file: PathBuf,
    #[serde(default)]
    pub spikes_sort_order: SortOrder,
}

/// One entry of the `inputs` block, tagged by `input_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "input_type", rename_all = "snake_case")]
pub enum InputConfig {
    /// Spike trains replayed into the cells of a node set.
    Spikes { input_file: PathBuf, node_set: String },
    CurrentClamp {
        electrode_file: PathBuf,
        input_file: PathBuf,
    },
    /// Input kinds this reader does not drive; skipped.
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSet {
    pub population: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub run: RunParams,
    pub conditions: Conditions,
    /// Circuit config file.
    pub network: PathBuf,
    #[serde(default)]
    pub outputs: Option<SpikeOutput>,
    #[serde(default)]
    pub node_sets_file: Option<PathBuf>,
    #[serde(default)]
    pub inputs: BTreeMap<String, InputConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeFiles {
    pub nodes_file: PathBuf,
    pub node_types_file: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeFiles {
    pub edges_file: PathBuf,
    pub edge_types_file: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkFiles {
    #[serde(default)]
    pub nodes: Vec<NodeFiles>,
    #[serde(default)]
    pub edges: Vec<EdgeFiles>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Components {
    #[serde(default)]
    pub synaptic_models_dir: PathBuf,
    #[serde(default)]
    pub biophysical_neuron_models_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitConfig {
    pub network: NetworkFiles,
    #[serde(default)]
    pub components: Components,
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).map_err(StoreError::io(path))?;
    serde_json::from_str(&text).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn base_dir(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_default()
}

fn resolve(base: &Path, path: &mut PathBuf) {
    if path.is_relative() {
        *path = base.join(&*path);
    }
}

impl SimulationConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config: Self = load_json(path)?;
        let base = base_dir(path);
        resolve(&base, &mut config.network);
        if let Some(out) = config.outputs.as_mut() {
            resolve(&base, &mut out.spikes_file);
        }
        if let Some(node_sets) = config.node_sets_file.as_mut() {
            resolve(&base, node_sets);
        }
        for input in config.inputs.values_mut() {
            match input {
                InputConfig::Spikes { input_file, .. } => resolve(&base, input_file),
                InputConfig::CurrentClamp {
                    electrode_file,
                    input_file,
                } => {
                    resolve(&base, electrode_file);
                    resolve(&base, input_file);
                }
                InputConfig::Unsupported => {}
            }
        }
        config.validate(path)?;
        debug!(
            path = %path.display(),
            inputs = config.inputs.len(),
            "loaded simulation config"
        );
        Ok(config)
    }

    fn validate(&self, path: &Path) -> Result<()> {
        let bad = |reason: &str| StoreError::Config {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };
        if !(self.run.dt > 0.0) {
            return Err(bad("run.dt must be positive"));
        }
        if !(self.run.tstop >= 0.0) {
            return Err(bad("run.tstop must not be negative"));
        }
        let wants_node_sets = self
            .inputs
            .values()
            .any(|i| matches!(i, InputConfig::Spikes { .. }));
        if wants_node_sets && self.node_sets_file.is_none() {
            return Err(bad("spike inputs need a node_sets_file"));
        }
        Ok(())
    }

    /// Named node sets from `node_sets_file`; empty when there is none.
    pub fn node_sets(&self) -> Result<BTreeMap<String, NodeSet>> {
        match &self.node_sets_file {
            Some(path) => load_json(path),
            None => Ok(BTreeMap::new()),
        }
    }

    /// Number of time steps to cover `tstop`.
    pub fn num_steps(&self) -> u64 {
        (self.run.tstop / self.run.dt).ceil() as u64
    }

    pub fn circuit(&self) -> Result<CircuitConfig> {
        CircuitConfig::load(&self.network)
    }
}

impl CircuitConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config: Self = load_json(path)?;
        let base = base_dir(path);
        for n in &mut config.network.nodes {
            resolve(&base, &mut n.nodes_file);
            resolve(&base, &mut n.node_types_file);
        }
        for e in &mut config.network.edges {
            resolve(&base, &mut e.edges_file);
            resolve(&base, &mut e.edge_types_file);
        }
        resolve(&base, &mut config.components.synaptic_models_dir);
        resolve(&base, &mut config.components.biophysical_neuron_models_dir);
        debug!(
            path = %path.display(),
            node_files = config.network.nodes.len(),
            edge_files = config.network.edges.len(),
            "loaded circuit config"
        );
        Ok(config)
    }

    pub fn dynamics_catalog(&self) -> DynamicsCatalog {
        DynamicsCatalog::new(
            &self.components.synaptic_models_dir,
            &self.components.biophysical_neuron_models_dir,
        )
    }
}

/// Paths in first-mention order, each once.
fn distinct<'a>(paths: impl Iterator<Item = &'a PathBuf>) -> Vec<&'a PathBuf> {
    let mut seen = Vec::new();
    for p in paths {
        if !seen.contains(&p) {
            seen.push(p);
        }
    }
    seen
}

/// The opened network: node and edge records with their type tables.
#[derive(Debug)]
pub struct NetworkParams {
    pub nodes: PartitionedRecord,
    pub edges: PartitionedRecord,
    pub node_types: CsvTypeTable,
    pub edge_types: CsvTypeTable,
}

impl NetworkParams {
    /// Opens every distinct file named by `circuit` once.
    pub fn open(circuit: &CircuitConfig) -> Result<Self> {
        let open_all = |paths: Vec<&PathBuf>| -> Result<Vec<Arc<File>>> {
            paths.into_iter().map(|p| File::open(p).map(Arc::new)).collect()
        };
        let net = &circuit.network;

        let node_files = distinct(net.nodes.iter().map(|n| &n.nodes_file));
        let nodes = PartitionedRecord::new(open_all(node_files)?)?;
        nodes.verify_nodes()?;
        let edge_files = distinct(net.edges.iter().map(|e| &e.edges_file));
        let edges = PartitionedRecord::new(open_all(edge_files)?)?;
        edges.verify_edges()?;

        let node_tables = distinct(net.nodes.iter().map(|n| &n.node_types_file));
        let node_types = CsvTypeTable::open("node_type_id", &node_tables)?;
        let edge_tables = distinct(net.edges.iter().map(|e| &e.edge_types_file));
        let edge_types = CsvTypeTable::open("edge_type_id", &edge_tables)?;

        info!(
            cells = nodes.num_elements(),
            edges = edges.num_elements(),
            node_types = node_types.len(),
            edge_types = edge_types.len(),
            "opened network"
        );
        Ok(Self {
            nodes,
            edges,
            node_types,
            edge_types,
        })
    }

    pub fn into_model(self, dynamics: Arc<dyn DynamicsSource>) -> Result<ModelDescription> {
        ModelDescription::new(
            self.nodes,
            self.edges,
            Arc::new(self.node_types),
            Arc::new(self.edge_types),
            dynamics,
        )
    }
}
