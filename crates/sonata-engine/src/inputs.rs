//! Stimuli named by the simulation config's `inputs` block.
//!
//! Spike inputs replay recorded trains into the cells of one node set. The
//! input file holds a `spikes` group with parallel `node_ids` (or `gids`)
//! and `timestamps` datasets, optionally nested one level deeper under the
//! population name. Node ids are local to the node set's population.
//!
//! Current clamps pair two space-delimited tables: an electrode table
//! (`electrode_id node_id population sec_id seg_x`) placing electrodes on
//! cells, and an input table (`electrode_id amp delay duration`) driving
//! them.

use crate::config::{InputConfig, SimulationConfig};
use crate::error::{Result, StoreError};
use crate::file::File;
use crate::model::Location;
use crate::record::{Gid, LocalElement, PartitionedRecord};
use crate::types::{CsvTypeTable, TypeRow, TypeTable};
use crate::view::View;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Step current injected at one location.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentClamp {
    pub location: Location,
    /// Onset (ms).
    pub delay: f64,
    /// Length of the step (ms).
    pub duration: f64,
    /// Amplitude (nA).
    pub amplitude: f64,
}

/// Spike times of one input file, keyed by local node id.
#[derive(Debug, Clone, PartialEq)]
pub struct SpikeInput {
    pub population: String,
    pub node_ids: Vec<u32>,
    pub timestamps: Vec<f64>,
}

impl SpikeInput {
    pub fn read(path: impl AsRef<Path>, population: &str) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let root = View::new(file.root().clone());
        let spikes = root.group("spikes")?;
        let trains = match spikes.find_group(population) {
            Some(i) => spikes.member(i)?,
            None => spikes,
        };

        let ids_name = if trains.find_dataset("node_ids").is_some() {
            "node_ids"
        } else {
            "gids"
        };
        let node_ids = trains
            .read_all::<i32>(ids_name)?
            .into_iter()
            .map(|id| {
                u32::try_from(id).map_err(|_| {
                    StoreError::structural(format!("negative node id {} in {}", id, file))
                })
            })
            .collect::<Result<Vec<u32>>>()?;
        let timestamps = trains.read_all::<f64>("timestamps")?;
        if node_ids.len() != timestamps.len() {
            return Err(StoreError::structural(format!(
                "{} has {} node ids but {} timestamps",
                file,
                node_ids.len(),
                timestamps.len()
            )));
        }

        debug!(%file, population, spikes = node_ids.len(), "read spike input");
        Ok(Self {
            population: population.to_string(),
            node_ids,
            timestamps,
        })
    }
}

fn required(row: &TypeRow, key: &str) -> Result<f64> {
    row.float(key)?.ok_or_else(|| StoreError::Config {
        path: row.source().to_path_buf(),
        reason: format!("row {} has no {}", row.type_id(), key),
    })
}

fn location(row: &TypeRow) -> Result<Location> {
    let section = match row.integer("sec_id")? {
        None => Location::SOMA_CENTER.section,
        Some(s) => u32::try_from(s).map_err(|_| StoreError::Config {
            path: row.source().to_path_buf(),
            reason: format!("electrode {}: bad sec_id {}", row.type_id(), s),
        })?,
    };
    let pos = row.float("seg_x")?.unwrap_or(Location::SOMA_CENTER.pos);
    Ok(Location { section, pos })
}

/// Clamps of one electrode/input table pair, resolved to gids.
pub fn read_current_clamps(
    electrode_file: &Path,
    input_file: &Path,
    nodes: &PartitionedRecord,
) -> Result<Vec<(Gid, CurrentClamp)>> {
    let electrodes = CsvTypeTable::open("electrode_id", &[electrode_file])?;
    let pulses = CsvTypeTable::open("electrode_id", &[input_file])?;

    let mut clamps = Vec::with_capacity(pulses.len());
    for pulse in pulses.rows() {
        let electrode = electrodes.require(pulse.type_id())?;
        let node_id = electrode.integer("node_id")?.ok_or_else(|| StoreError::Config {
            path: electrode_file.to_path_buf(),
            reason: format!("electrode {} has no node_id", pulse.type_id()),
        })?;
        let population = electrode.text("population").ok_or_else(|| StoreError::Config {
            path: electrode_file.to_path_buf(),
            reason: format!("electrode {} has no population", pulse.type_id()),
        })?;
        let el_id = u32::try_from(node_id).map_err(|_| StoreError::Config {
            path: electrode_file.to_path_buf(),
            reason: format!("electrode {}: bad node_id {}", pulse.type_id(), node_id),
        })?;
        let gid = nodes.globalize(&LocalElement::new(population, el_id))?;

        clamps.push((
            gid,
            CurrentClamp {
                location: location(electrode)?,
                delay: required(pulse, "delay")?,
                duration: required(pulse, "duration")?,
                amplitude: required(pulse, "amp")?,
            },
        ));
    }
    Ok(clamps)
}

/// Per-cell stimuli gathered from every supported input.
#[derive(Debug, Clone, Default)]
pub struct IoDescription {
    spikes: HashMap<Gid, Vec<f64>>,
    clamps: HashMap<Gid, Vec<CurrentClamp>>,
}

impl IoDescription {
    /// Reads every input of `sim`; node ids are placed via `nodes`.
    pub fn open(sim: &SimulationConfig, nodes: &PartitionedRecord) -> Result<Self> {
        let node_sets = sim.node_sets()?;
        let mut io = Self::default();

        for (name, input) in &sim.inputs {
            match input {
                InputConfig::Spikes {
                    input_file,
                    node_set,
                } => {
                    let set = node_sets
                        .get(node_set)
                        .ok_or_else(|| StoreError::not_found("node set", node_set.clone()))?;
                    io.add_spikes(nodes, &SpikeInput::read(input_file, &set.population)?)?;
                }
                InputConfig::CurrentClamp {
                    electrode_file,
                    input_file,
                } => {
                    for (gid, clamp) in read_current_clamps(electrode_file, input_file, nodes)? {
                        io.clamps.entry(gid).or_default().push(clamp);
                    }
                }
                InputConfig::Unsupported => {
                    debug!(input = %name, "skipping unsupported input");
                }
            }
        }

        info!(
            spike_sources = io.spikes.len(),
            clamped_cells = io.clamps.len(),
            "loaded inputs"
        );
        Ok(io)
    }

    /// Adds the trains of `input`, keeping each cell's times sorted.
    pub fn add_spikes(&mut self, nodes: &PartitionedRecord, input: &SpikeInput) -> Result<()> {
        for (&id, &t) in input.node_ids.iter().zip(&input.timestamps) {
            let gid = nodes.globalize(&LocalElement::new(input.population.as_str(), id))?;
            self.spikes.entry(gid).or_default().push(t);
        }
        for times in self.spikes.values_mut() {
            times.sort_by(f64::total_cmp);
        }
        Ok(())
    }

    /// Ascending input spike times for `gid`.
    pub fn get_spikes(&self, gid: Gid) -> &[f64] {
        self.spikes.get(&gid).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get_current_clamps(&self, gid: Gid) -> &[CurrentClamp] {
        self.clamps.get(&gid).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn num_spike_sources(&self) -> usize {
        self.spikes.len()
    }

    pub fn num_clamped_cells(&self) -> usize {
        self.clamps.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Arc;

    fn one_population(dir: &Path, name: &str, size: usize) -> PartitionedRecord {
        let path = dir.join(format!("{}.sonata", name));
        {
            let mut file = File::create(&path).unwrap();
            file.root_mut()
                .unwrap()
                .add_group("nodes")
                .unwrap()
                .add_group(name)
                .unwrap()
                .add_dataset("node_type_id", vec![1; size])
                .unwrap();
        }
        PartitionedRecord::new(vec![Arc::new(File::open(&path).unwrap())]).unwrap()
    }

    #[test]
    fn trains_nested_under_the_population_are_found() {
        let dir = tempfile::tempdir().unwrap();
        let nodes = one_population(dir.path(), "ext", 3);
        let path = dir.path().join("spikes.sonata");
        {
            let mut file = File::create(&path).unwrap();
            let pop = file
                .root_mut()
                .unwrap()
                .add_group("spikes")
                .unwrap()
                .add_group("ext")
                .unwrap();
            pop.add_dataset("node_ids", vec![2, 0, 2]).unwrap();
            pop.add_dataset("timestamps", vec![9.0, 4.0, 1.5]).unwrap();
        }

        let input = SpikeInput::read(&path, "ext").unwrap();
        let mut io = IoDescription::default();
        io.add_spikes(&nodes, &input).unwrap();
        assert_eq!(io.get_spikes(2), &[1.5, 9.0]);
        assert_eq!(io.get_spikes(0), &[4.0]);
        assert!(io.get_spikes(1).is_empty());
    }

    #[test]
    fn spike_for_a_missing_node_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let nodes = one_population(dir.path(), "ext", 1);
        let input = SpikeInput {
            population: "ext".to_string(),
            node_ids: vec![4],
            timestamps: vec![1.0],
        };
        let mut io = IoDescription::default();
        assert!(matches!(
            io.add_spikes(&nodes, &input),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn mismatched_trains_are_structural() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spikes.sonata");
        {
            let mut file = File::create(&path).unwrap();
            let spikes = file.root_mut().unwrap().add_group("spikes").unwrap();
            spikes.add_dataset("gids", vec![0, 0]).unwrap();
            spikes.add_dataset("timestamps", vec![1.0]).unwrap();
        }
        assert!(matches!(
            SpikeInput::read(&path, "ext"),
            Err(StoreError::Structural(_))
        ));
    }

    #[test]
    fn clamp_without_amplitude_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let nodes = one_population(dir.path(), "cells", 2);
        let electrodes = dir.path().join("electrodes.csv");
        let amps = dir.path().join("amps.csv");
        fs::write(&electrodes, "electrode_id node_id population\n0 1 cells\n").unwrap();
        fs::write(&amps, "electrode_id delay duration\n0 10 50\n").unwrap();

        assert!(matches!(
            read_current_clamps(&electrodes, &amps, &nodes),
            Err(StoreError::Config { .. })
        ));

        fs::write(&amps, "electrode_id amp delay duration\n0 0.2 10 50\n").unwrap();
        let clamps = read_current_clamps(&electrodes, &amps, &nodes).unwrap();
        assert_eq!(clamps.len(), 1);
        assert_eq!(clamps[0].0, 1);
        assert_eq!(clamps[0].1.location, Location::SOMA_CENTER);
        assert_eq!(clamps[0].1.amplitude, 0.2);
    }
}
