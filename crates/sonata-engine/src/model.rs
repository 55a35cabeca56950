//! Connectivity resolution over node and edge records.
//!
//! Cells are addressed by gid in the node record's global id space. Edge
//! populations name their source and target node populations through the
//! `node_population` attribute of `source_node_id` / `target_node_id`, and
//! are navigated through their `indices/source_to_target` and
//! `indices/target_to_source` range indices.

use crate::dynamics::{resolve_density, DensityMechs, DynamicsSource, MechanismDesc};
use crate::error::{Result, StoreError};
use crate::range_index::RangeIndex;
use crate::record::{Gid, LocalElement, PartitionedRecord};
use crate::types::{TypeRow, TypeTable};
use crate::view::View;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

pub const SOURCE_TO_TARGET: &str = "source_to_target";
pub const TARGET_TO_SOURCE: &str = "target_to_source";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellKind {
    Cable,
    /// Replays externally supplied spikes; has no morphology.
    SpikeSource,
}

/// A point on a cell: section index and relative position along it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub section: u32,
    pub pos: f64,
}

impl Location {
    pub const SOMA_CENTER: Location = Location {
        section: 0,
        pos: 0.5,
    };
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.section, self.pos)
    }
}

/// A synapse placed on a cell.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetSite {
    pub location: Location,
    pub synapse: MechanismDesc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub source: Gid,
    pub source_tag: String,
    pub target: Gid,
    pub target_tag: String,
    pub weight: f64,
    pub delay: f64,
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{} (weight {}, delay {})",
            self.source, self.source_tag, self.target, self.target_tag, self.weight, self.delay
        )
    }
}

pub fn source_tag(i: usize) -> String {
    format!("detector@{}", i)
}

pub fn target_tag(i: usize) -> String {
    format!("synapse@{}", i)
}

/// Spike detectors and synapses of one cell. Detector `k` is tagged
/// `detector@k`, synapse `k` is tagged `synapse@k`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourcesAndTargets {
    pub sources: Vec<Location>,
    pub targets: Vec<TargetSite>,
}

#[derive(Debug, Clone)]
struct CellPlacement {
    placement: SourcesAndTargets,
    connections: Vec<Connection>,
}

/// Immutable result of one map build.
#[derive(Debug, Default)]
struct PlacementMaps {
    cells: HashMap<Gid, CellPlacement>,
}

/// Node populations an edge population connects, as node record indices.
#[derive(Debug, Clone, Copy)]
struct Endpoints {
    source: usize,
    target: usize,
}

/// The attribute group (`<prefix>_group_id`) and row (`<prefix>_group_index`)
/// holding per-element data for element `i`, if the population has any.
fn attribute_row<'v>(pop: &'v View, prefix: &str, i: usize) -> Result<Option<(&'v View, usize)>> {
    let id_name = format!("{}_group_id", prefix);
    let index_name = format!("{}_group_index", prefix);
    if pop.find_dataset(&id_name).is_none() || pop.find_dataset(&index_name).is_none() {
        return Ok(None);
    }
    let group_id: i32 = pop.read_at(&id_name, i)?;
    let row: i32 = pop.read_at(&index_name, i)?;
    let row = usize::try_from(row).map_err(|_| {
        StoreError::structural(format!("{}[{}]: negative {} {}", pop.name(), i, index_name, row))
    })?;
    Ok(Some((pop.group(&group_id.to_string())?, row)))
}

fn optional_f64(row: Option<(&View, usize)>, name: &str) -> Result<Option<f64>> {
    match row {
        Some((group, i)) if group.find_dataset(name).is_some() => Ok(Some(group.read_at(name, i)?)),
        _ => Ok(None),
    }
}

/// `<side>_section_id` / `<side>_section_pos` of an edge; the soma center
/// when the population stores neither.
fn edge_location(row: Option<(&View, usize)>, side: &str) -> Result<Location> {
    let (group, i) = match row {
        Some(row) => row,
        None => return Ok(Location::SOMA_CENTER),
    };
    let id_name = format!("{}_section_id", side);
    let pos_name = format!("{}_section_pos", side);

    let section = match group.find_dataset(&id_name) {
        Some(_) => {
            let raw: i32 = group.read_at(&id_name, i)?;
            u32::try_from(raw).map_err(|_| {
                StoreError::structural(format!(
                    "{}[{}]: negative {} {}",
                    group.name(),
                    i,
                    id_name,
                    raw
                ))
            })?
        }
        None => Location::SOMA_CENTER.section,
    };
    let pos = optional_f64(Some((group, i)), &pos_name)?.unwrap_or(Location::SOMA_CENTER.pos);
    Ok(Location { section, pos })
}

/// Resolves cells, placements and connections of a network.
pub struct ModelDescription {
    nodes: PartitionedRecord,
    edges: PartitionedRecord,
    node_types: Arc<dyn TypeTable>,
    edge_types: Arc<dyn TypeTable>,
    dynamics: Arc<dyn DynamicsSource>,
    endpoints: Vec<Endpoints>,
    maps: Mutex<Option<Arc<PlacementMaps>>>,
}

impl fmt::Debug for ModelDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDescription")
            .field("node_populations", &self.nodes.pop_names())
            .field("edge_populations", &self.edges.pop_names())
            .finish()
    }
}

impl ModelDescription {
    pub fn new(
        nodes: PartitionedRecord,
        edges: PartitionedRecord,
        node_types: Arc<dyn TypeTable>,
        edge_types: Arc<dyn TypeTable>,
        dynamics: Arc<dyn DynamicsSource>,
    ) -> Result<Self> {
        nodes.verify_nodes()?;
        edges.verify_edges()?;

        let mut endpoints = Vec::with_capacity(edges.populations().len());
        for (k, pop) in edges.populations().iter().enumerate() {
            let ends = Endpoints {
                source: Self::endpoint(&nodes, pop, "source_node_id")?,
                target: Self::endpoint(&nodes, pop, "target_node_id")?,
            };
            let num_edges = edges.population_size(k).unwrap_or(0) as usize;
            let indices = pop.group("indices")?;
            let directions = [(SOURCE_TO_TARGET, ends.source), (TARGET_TO_SOURCE, ends.target)];
            for (name, node_pop) in directions {
                let index = RangeIndex::new(indices.group(name)?)?;
                let num_nodes = nodes.population_size(node_pop).unwrap_or(0) as usize;
                if index.num_nodes() != num_nodes {
                    return Err(StoreError::structural(format!(
                        "{}/indices/{} covers {} nodes, population {} has {}",
                        pop.name(),
                        name,
                        index.num_nodes(),
                        nodes.pop_names()[node_pop],
                        num_nodes
                    )));
                }
                index.validate(num_edges)?;
            }
            debug!(
                population = %pop.name(),
                source = %nodes.pop_names()[ends.source],
                target = %nodes.pop_names()[ends.target],
                edges = num_edges,
                "resolved edge population"
            );
            endpoints.push(ends);
        }

        info!(
            cells = nodes.num_elements(),
            node_populations = nodes.populations().len(),
            edges = edges.num_elements(),
            edge_populations = edges.populations().len(),
            "model description ready"
        );
        Ok(Self {
            nodes,
            edges,
            node_types,
            edge_types,
            dynamics,
            endpoints,
            maps: Mutex::new(None),
        })
    }

    fn endpoint(nodes: &PartitionedRecord, pop: &View, dataset: &str) -> Result<usize> {
        let name = pop.dataset(dataset)?.attribute("node_population")?.ok_or_else(|| {
            StoreError::structural(format!(
                "{}/{} has no node_population attribute",
                pop.name(),
                dataset
            ))
        })?;
        nodes
            .map()
            .get(&name)
            .copied()
            .ok_or_else(|| StoreError::not_found("population", name))
    }

    pub fn num_cells(&self) -> Gid {
        self.nodes.num_elements()
    }

    pub fn pop_partitions(&self) -> &[Gid] {
        self.nodes.partitions()
    }

    pub fn pop_names(&self) -> &[String] {
        self.nodes.pop_names()
    }

    pub fn nodes(&self) -> &PartitionedRecord {
        &self.nodes
    }

    pub fn edges(&self) -> &PartitionedRecord {
        &self.edges
    }

    /// Node population index and local id of `gid`.
    fn locate(&self, gid: Gid) -> Result<(usize, u32)> {
        let k = self
            .nodes
            .population_index_of(gid)
            .ok_or_else(|| StoreError::not_found("cell", gid.to_string()))?;
        Ok((k, gid - self.nodes.partitions()[k]))
    }

    pub fn population_of(&self, gid: Gid) -> Result<&str> {
        let (k, _) = self.locate(gid)?;
        Ok(&self.nodes.pop_names()[k])
    }

    /// Local id of `gid` inside its population.
    pub fn population_id_of(&self, gid: Gid) -> Result<u32> {
        Ok(self.locate(gid)?.1)
    }

    fn node_type(&self, gid: Gid) -> Result<&TypeRow> {
        let (k, local) = self.locate(gid)?;
        let type_id: i32 = self.nodes.populations()[k].read_at("node_type_id", local as usize)?;
        self.node_types.require(type_id)
    }

    pub fn get_cell_kind(&self, gid: Gid) -> Result<CellKind> {
        match self.node_type(gid)?.text("model_type") {
            Some("virtual") => Ok(CellKind::SpikeSource),
            _ => Ok(CellKind::Cable),
        }
    }

    /// Morphology file named by the cell's node type, if any.
    pub fn morphology_of(&self, gid: Gid) -> Result<Option<String>> {
        Ok(self.node_type(gid)?.text("morphology").map(str::to_string))
    }

    /// Density mechanisms per section kind. The node type names the base
    /// file; a `dynamics_params` string in the node's attribute group names
    /// an override file.
    pub fn get_density_mechs(&self, gid: Gid) -> Result<DensityMechs> {
        let row = self.node_type(gid)?;
        if row.text("model_type") == Some("virtual") {
            return Ok(DensityMechs::new());
        }
        let base = match row.text("dynamics_params") {
            Some(file) => self.dynamics.density_base(file)?,
            None => return Ok(DensityMechs::new()),
        };

        let (k, local) = self.locate(gid)?;
        let pop = &self.nodes.populations()[k];
        let overrides = match attribute_row(pop, "node", local as usize)? {
            Some((group, i)) if group.find_dataset("dynamics_params").is_some() => {
                let file: String = group.read_at("dynamics_params", i)?;
                if file.is_empty() {
                    None
                } else {
                    Some(self.dynamics.density_override(&file)?)
                }
            }
            _ => None,
        };
        resolve_density(&base, overrides.as_deref())
    }

    /// Synapse of edge `edge` in edge population `k`: the edge type's
    /// mechanism with the edge's own `dynamics_params` values applied.
    fn synapse(&self, k: usize, edge: usize, row: Option<(&View, usize)>) -> Result<MechanismDesc> {
        let pop = &self.edges.populations()[k];
        let type_id: i32 = pop.read_at("edge_type_id", edge)?;
        let edge_type = self.edge_types.require(type_id)?;

        let params_file = edge_type.text("dynamics_params");
        let mut synapse = match (params_file, edge_type.text("model_template")) {
            (Some(file), _) => (*self.dynamics.point_mechanism(file)?).clone(),
            (None, Some(template)) => MechanismDesc::new(template),
            (None, None) => {
                return Err(StoreError::not_found(
                    "synapse model",
                    format!("edge type {}", type_id),
                ))
            }
        };

        if let Some((group, i)) = row {
            if group.find_group("dynamics_params").is_some() {
                for dataset in group.group("dynamics_params")?.group_ref().datasets() {
                    synapse.set(dataset.name(), dataset.read_at::<f64>(i)?);
                }
            }
        }
        Ok(synapse)
    }

    /// Per-edge value of `name`, falling back to the edge type's.
    fn edge_param(
        &self,
        k: usize,
        edge: usize,
        row: Option<(&View, usize)>,
        name: &str,
    ) -> Result<f64> {
        if let Some(v) = optional_f64(row, name)? {
            return Ok(v);
        }
        let pop = &self.edges.populations()[k];
        let type_id: i32 = pop.read_at("edge_type_id", edge)?;
        self.edge_types
            .require(type_id)?
            .float(name)?
            .ok_or_else(|| {
                let key = format!("{}[{}].{}", pop.name(), edge, name);
                StoreError::not_found("edge parameter", key)
            })
    }

    fn index(&self, k: usize, name: &str) -> Result<RangeIndex<'_>> {
        RangeIndex::new(self.edges.populations()[k].group("indices")?.group(name)?)
    }

    /// Distinct efferent locations of a cell's outgoing edges.
    fn sources_of(&self, gid: Gid) -> Result<Vec<Location>> {
        let (node_pop, local) = self.locate(gid)?;
        let mut sources: Vec<Location> = Vec::new();
        for (k, ends) in self.endpoints.iter().enumerate() {
            if ends.source != node_pop {
                continue;
            }
            let pop = &self.edges.populations()[k];
            for edge in self.index(k, SOURCE_TO_TARGET)?.edges(local)? {
                let loc = edge_location(attribute_row(pop, "edge", edge)?, "efferent")?;
                if !sources.contains(&loc) {
                    sources.push(loc);
                }
            }
        }
        Ok(sources)
    }

    fn build_cell(
        &self,
        gid: Gid,
        detectors: &mut HashMap<Gid, Option<Vec<Location>>>,
    ) -> Result<CellPlacement> {
        let (node_pop, local) = self.locate(gid)?;
        let mut placement = SourcesAndTargets::default();
        let mut connections = Vec::new();

        if self.get_cell_kind(gid)? == CellKind::Cable {
            placement.sources = self.sources_of(gid)?;
        }

        for (k, ends) in self.endpoints.iter().enumerate() {
            if ends.target != node_pop {
                continue;
            }
            let pop = &self.edges.populations()[k];
            let source_pop = &self.nodes.pop_names()[ends.source];
            for edge in self.index(k, TARGET_TO_SOURCE)?.edges(local)? {
                let row = attribute_row(pop, "edge", edge)?;
                let source_local: i32 = pop.read_at("source_node_id", edge)?;
                let source_local = u32::try_from(source_local).map_err(|_| {
                    StoreError::structural(format!(
                        "{}[{}]: negative source_node_id",
                        pop.name(),
                        edge
                    ))
                })?;
                let source = self
                    .nodes
                    .globalize(&LocalElement::new(source_pop.as_str(), source_local))?;

                // spike sources have a single detector
                if !detectors.contains_key(&source) {
                    let found = match self.get_cell_kind(source)? {
                        CellKind::SpikeSource => None,
                        CellKind::Cable => Some(self.sources_of(source)?),
                    };
                    detectors.insert(source, found);
                }
                let detector = match detectors.get(&source) {
                    Some(Some(locations)) => {
                        let loc = edge_location(row, "efferent")?;
                        locations.iter().position(|l| *l == loc).ok_or_else(|| {
                            StoreError::not_found("detector", format!("{} at {}", source, loc))
                        })?
                    }
                    _ => 0,
                };

                let synapse_index = placement.targets.len();
                placement.targets.push(TargetSite {
                    location: edge_location(row, "afferent")?,
                    synapse: self.synapse(k, edge, row)?,
                });
                connections.push(Connection {
                    source,
                    source_tag: source_tag(detector),
                    target: gid,
                    target_tag: target_tag(synapse_index),
                    weight: self.edge_param(k, edge, row, "syn_weight")?,
                    delay: self.edge_param(k, edge, row, "delay")?,
                });
            }
        }
        Ok(CellPlacement {
            placement,
            connections,
        })
    }

    /// Resolves sources, targets and incoming connections of `gids` and
    /// publishes them for the query methods. Replaces any earlier build.
    pub fn build_source_and_target_maps(&self, gids: &[Gid]) -> Result<()> {
        let mut guard = self.maps.lock().unwrap_or_else(PoisonError::into_inner);
        let mut detectors = HashMap::new();
        let mut maps = PlacementMaps::default();
        for &gid in gids {
            let cell = self.build_cell(gid, &mut detectors)?;
            maps.cells.insert(gid, cell);
        }
        info!(cells = maps.cells.len(), "built source and target maps");
        *guard = Some(Arc::new(maps));
        Ok(())
    }

    fn snapshot(&self) -> Result<Arc<PlacementMaps>> {
        self.maps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(StoreError::Precondition(
                "build_source_and_target_maps must be called before querying the placement maps",
            ))
    }

    fn with_cell<T>(&self, gid: Gid, f: impl FnOnce(&CellPlacement) -> T) -> Result<T> {
        let maps = self.snapshot()?;
        maps.cells
            .get(&gid)
            .map(f)
            .ok_or_else(|| StoreError::not_found("cell in source and target maps", gid.to_string()))
    }

    pub fn get_sources_and_targets(&self, gid: Gid) -> Result<SourcesAndTargets> {
        self.with_cell(gid, |cell| cell.placement.clone())
    }

    /// Incoming connections of `gid`, in synapse order.
    pub fn get_connections(&self, gid: Gid) -> Result<Vec<Connection>> {
        self.with_cell(gid, |cell| cell.connections.clone())
    }
}
