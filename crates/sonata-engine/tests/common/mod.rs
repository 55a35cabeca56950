#![allow(dead_code)]

//! Reference network used by the integration tests.
//!
//! ```text
//! pop_ext         n5
//!           ______|_______
//!          |       _______|________
//!          |      |       |        |
//!          v      |       v        v
//!  pop_e:  n0     n1      n2       n3
//!          |      ^       |
//!          |      |       |
//!  pop_i:  |____> n4 <____|
//! ```

use sonata_core::{
    CircuitConfig, File, Group, ModelDescription, NetworkParams, PartitionedRecord, Result,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub struct Network {
    pub dir: TempDir,
    pub node_files: Vec<PathBuf>,
    pub edge_files: Vec<PathBuf>,
    pub circuit_config: PathBuf,
    pub simulation_config: PathBuf,
}

impl Network {
    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }
}

/// Creates `path` holding `container/pop` and lets `fill` write the population.
pub fn write_population(
    path: &Path,
    container: &str,
    pop: &str,
    fill: impl FnOnce(&mut Group) -> Result<()>,
) -> Result<()> {
    let mut file = File::create(path)?;
    let group = file.root_mut()?.add_group(container)?.add_group(pop)?;
    fill(group)
}

pub fn write_index(
    pop: &mut Group,
    name: &str,
    node_id_to_ranges: Vec<(i32, i32)>,
    range_to_edge_id: Vec<(i32, i32)>,
) -> Result<()> {
    let index = pop.add_group("indices")?.add_group(name)?;
    index.add_dataset("node_id_to_ranges", node_id_to_ranges)?;
    index.add_dataset("range_to_edge_id", range_to_edge_id)?;
    Ok(())
}

pub fn write_endpoints(
    pop: &mut Group,
    source_pop: &str,
    sources: Vec<i32>,
    target_pop: &str,
    targets: Vec<i32>,
) -> Result<()> {
    pop.add_dataset("source_node_id", sources)?
        .set_attribute("node_population", source_pop)?;
    pop.add_dataset("target_node_id", targets)?
        .set_attribute("node_population", target_pop)?;
    Ok(())
}

/// Per-edge section locations of an edge attribute group.
pub fn write_locations(
    group: &mut Group,
    side: &str,
    sections: Vec<i32>,
    positions: Vec<f64>,
) -> Result<()> {
    group.add_dataset(&format!("{}_section_id", side), sections)?;
    group.add_dataset(&format!("{}_section_pos", side), positions)?;
    Ok(())
}

fn write_nodes(dir: &Path) -> Result<Vec<PathBuf>> {
    let files = vec![
        dir.join("network/nodes_0.sonata"),
        dir.join("network/nodes_1.sonata"),
        dir.join("network/nodes_2.sonata"),
    ];

    write_population(&files[0], "nodes", "pop_e", |pop| {
        pop.add_dataset("node_type_id", vec![100, 100, 100, 100])?;
        pop.add_dataset("node_group_id", vec![0, 0, 0, 0])?;
        pop.add_dataset("node_group_index", vec![0, 1, 2, 3])?;
        pop.add_group("0")?
            .add_dataset("dynamics_params", vec!["override_e.json"; 4])?;
        Ok(())
    })?;

    write_population(&files[1], "nodes", "pop_i", |pop| {
        pop.add_dataset("node_type_id", vec![101])?;
        pop.add_dataset("node_group_id", vec![0])?;
        pop.add_dataset("node_group_index", vec![0])?;
        pop.add_group("0")?
            .add_dataset("dynamics_params", vec!["pas_hh.json"])?;
        Ok(())
    })?;

    write_population(&files[2], "nodes", "pop_ext", |pop| {
        pop.add_dataset("node_type_id", vec![102])?;
        Ok(())
    })?;

    Ok(files)
}

fn write_edges(dir: &Path) -> Result<Vec<PathBuf>> {
    let files = vec![
        dir.join("network/edges_0.sonata"),
        dir.join("network/edges_1.sonata"),
        dir.join("network/edges_2.sonata"),
        dir.join("network/edges_3.sonata"),
    ];

    // n0 -> n4, n2 -> n4
    write_population(&files[0], "edges", "pop_e_i", |pop| {
        write_endpoints(pop, "pop_e", vec![0, 2], "pop_i", vec![0, 0])?;
        pop.add_dataset("edge_type_id", vec![103, 103])?;
        pop.add_dataset("edge_group_id", vec![0, 1])?;
        pop.add_dataset("edge_group_index", vec![0, 0])?;
        {
            let g0 = pop.add_group("0")?;
            write_locations(g0, "afferent", vec![0], vec![0.4])?;
            write_locations(g0, "efferent", vec![1], vec![0.3])?;
            g0.add_dataset("syn_weight", vec![0.0235])?;
        }
        {
            let g1 = pop.add_group("1")?;
            write_locations(g1, "afferent", vec![2], vec![0.1])?;
            write_locations(g1, "efferent", vec![3], vec![0.2])?;
            g1.add_dataset("syn_weight", vec![0.04])?;
        }
        write_index(
            pop,
            "source_to_target",
            vec![(0, 1), (1, 1), (1, 2), (2, 2)],
            vec![(0, 1), (1, 2)],
        )?;
        write_index(pop, "target_to_source", vec![(0, 1)], vec![(0, 2)])
    })?;

    // n4 -> n1
    write_population(&files[1], "edges", "pop_i_e", |pop| {
        write_endpoints(pop, "pop_i", vec![0], "pop_e", vec![1])?;
        pop.add_dataset("edge_type_id", vec![104])?;
        pop.add_dataset("edge_group_id", vec![0])?;
        pop.add_dataset("edge_group_index", vec![0])?;
        {
            let g0 = pop.add_group("0")?;
            write_locations(g0, "afferent", vec![0], vec![0.5])?;
            write_locations(g0, "efferent", vec![0], vec![0.9])?;
            g0.add_group("dynamics_params")?
                .add_dataset("e", vec![0.51])?;
        }
        write_index(pop, "source_to_target", vec![(0, 1)], vec![(0, 1)])?;
        write_index(
            pop,
            "target_to_source",
            vec![(0, 0), (0, 1), (1, 1), (1, 1)],
            vec![(0, 1)],
        )
    })?;

    // n1 -> n3
    write_population(&files[2], "edges", "pop_e_e", |pop| {
        write_endpoints(pop, "pop_e", vec![1], "pop_e", vec![3])?;
        pop.add_dataset("edge_type_id", vec![105])?;
        pop.add_dataset("edge_group_id", vec![0])?;
        pop.add_dataset("edge_group_index", vec![0])?;
        {
            let g0 = pop.add_group("0")?;
            write_locations(g0, "afferent", vec![5], vec![0.6])?;
            write_locations(g0, "efferent", vec![1], vec![0.2])?;
            g0.add_dataset("syn_weight", vec![0.05])?;
        }
        write_index(
            pop,
            "source_to_target",
            vec![(0, 0), (0, 1), (1, 1), (1, 1)],
            vec![(0, 1)],
        )?;
        write_index(
            pop,
            "target_to_source",
            vec![(0, 0), (0, 0), (0, 0), (0, 1)],
            vec![(0, 1)],
        )
    })?;

    // n5 -> n0, n5 -> n2
    write_population(&files[3], "edges", "pop_ext_e", |pop| {
        write_endpoints(pop, "pop_ext", vec![0, 0], "pop_e", vec![0, 2])?;
        pop.add_dataset("edge_type_id", vec![106, 106])?;
        pop.add_dataset("edge_group_id", vec![0, 0])?;
        pop.add_dataset("edge_group_index", vec![0, 1])?;
        write_locations(pop.add_group("0")?, "afferent", vec![0, 0], vec![0.0, 0.0])?;
        write_index(pop, "source_to_target", vec![(0, 1)], vec![(0, 2)])?;
        write_index(
            pop,
            "target_to_source",
            vec![(0, 1), (1, 1), (1, 2), (2, 2)],
            vec![(0, 1), (1, 2)],
        )
    })?;

    Ok(files)
}

fn write_text(path: PathBuf, text: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, text).unwrap();
}

fn write_tables_and_dynamics(dir: &Path) {
    write_text(
        dir.join("network/node_types.csv"),
        "node_type_id model_type dynamics_params morphology\n\
         100 biophysical set_pas.json cell_e.swc\n\
         101 biophysical set_pas.json cell_i.swc\n\
         102 virtual NULL NULL\n",
    );
    write_text(
        dir.join("network/edge_types.csv"),
        "edge_type_id model_template dynamics_params syn_weight delay\n\
         103 exp2syn exp2syn.json NULL 0.3\n\
         104 expsyn expsyn.json -0.02 0.1\n\
         105 expsyn expsyn.json NULL 0.2\n\
         106 expsyn NULL 0.01 0.1\n",
    );

    write_text(
        dir.join("components/synaptic_models/expsyn.json"),
        r#"{"expsyn": {"e": 0, "tau": 2}}"#,
    );
    write_text(
        dir.join("components/synaptic_models/exp2syn.json"),
        r#"{"exp2syn": {"e": 0.1, "tau1": 0.5, "tau2": 0.6}}"#,
    );
    write_text(
        dir.join("components/biophysical_neuron_models/set_pas.json"),
        r#"{
            "pas_0": [
                {"e_pas": -70},
                {"g_pas": 0.002},
                {"soma": {"section": "soma", "mech": "pas", "e": -65, "g": 0}},
                {"dend": {"section": "dend", "mech": "pas", "g": 0.001, "e": "e_pas"}}
            ],
            "hh_0": [
                {"el_hh": -54},
                {"gl_hh": 0.002},
                {"soma": {"section": "soma", "mech": "hh", "el": "el_hh", "gl": "gl_hh"}}
            ]
        }"#,
    );
    write_text(
        dir.join("components/biophysical_neuron_models/override_e.json"),
        r#"{"pas_0": {"e_pas": -65.1}, "hh_0": {"gl_hh": 0.0003, "el_hh": -54.3}}"#,
    );
    write_text(
        dir.join("components/biophysical_neuron_models/pas_hh.json"),
        r#"{"pas_0": {"g_pas": 0.001, "e_pas": -65}, "hh_0": {"gl_hh": 0.003}}"#,
    );
}

fn write_configs(dir: &Path) -> (PathBuf, PathBuf) {
    let circuit = dir.join("circuit_config.json");
    write_text(
        circuit.clone(),
        r#"{
            "network": {
                "nodes": [
                    {"nodes_file": "network/nodes_0.sonata",
                     "node_types_file": "network/node_types.csv"},
                    {"nodes_file": "network/nodes_1.sonata",
                     "node_types_file": "network/node_types.csv"},
                    {"nodes_file": "network/nodes_2.sonata",
                     "node_types_file": "network/node_types.csv"}
                ],
                "edges": [
                    {"edges_file": "network/edges_0.sonata",
                     "edge_types_file": "network/edge_types.csv"},
                    {"edges_file": "network/edges_1.sonata",
                     "edge_types_file": "network/edge_types.csv"},
                    {"edges_file": "network/edges_2.sonata",
                     "edge_types_file": "network/edge_types.csv"},
                    {"edges_file": "network/edges_3.sonata",
                     "edge_types_file": "network/edge_types.csv"},
                    {"edges_file": "network/edges_0.sonata",
                     "edge_types_file": "network/edge_types.csv"}
                ]
            },
            "components": {
                "synaptic_models_dir": "components/synaptic_models",
                "biophysical_neuron_models_dir": "components/biophysical_neuron_models"
            }
        }"#,
    );

    let simulation = dir.join("simulation_config.json");
    write_text(
        simulation.clone(),
        r#"{
            "run": {"tstop": 100.0, "dt": 0.025, "spike_threshold": -15.0},
            "conditions": {"celsius": 34.0, "v_init": -80.0},
            "network": "circuit_config.json",
            "outputs": {"spikes_file": "output/spikes.sonata", "spikes_sort_order": "id"},
            "node_sets_file": "node_sets.json",
            "inputs": {
                "ext_spikes": {
                    "input_type": "spikes",
                    "node_set": "external",
                    "input_file": "inputs/ext_spikes.sonata"
                },
                "iclamp": {
                    "input_type": "current_clamp",
                    "electrode_file": "inputs/electrodes.csv",
                    "input_file": "inputs/clamps.csv"
                }
            }
        }"#,
    );
    (circuit, simulation)
}

/// Spike trains for n5 and two clamps, on n1 and n4.
fn write_inputs(dir: &Path) -> Result<()> {
    write_text(
        dir.join("node_sets.json"),
        r#"{"external": {"population": "pop_ext"}, "inhibitory": {"population": "pop_i"}}"#,
    );
    write_text(
        dir.join("inputs/electrodes.csv"),
        "electrode_id node_id population sec_id seg_x\n\
         0 1 pop_e 2 0.25\n\
         1 0 pop_i NULL NULL\n",
    );
    write_text(
        dir.join("inputs/clamps.csv"),
        "electrode_id amp delay duration\n\
         0 0.15 10.0 40.0\n\
         1 -0.05 0.0 100.0\n",
    );

    let mut file = File::create(dir.join("inputs/ext_spikes.sonata"))?;
    let spikes = file.root_mut()?.add_group("spikes")?;
    spikes.add_dataset("node_ids", vec![0, 0, 0])?;
    spikes.add_dataset("timestamps", vec![5.5, 1.0, 3.0])?;
    Ok(())
}

pub fn build_network() -> Network {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("network")).unwrap();
    fs::create_dir_all(dir.path().join("output")).unwrap();

    let node_files = write_nodes(dir.path()).unwrap();
    let edge_files = write_edges(dir.path()).unwrap();
    write_tables_and_dynamics(dir.path());
    let (circuit_config, simulation_config) = write_configs(dir.path());
    write_inputs(dir.path()).unwrap();

    Network {
        dir,
        node_files,
        edge_files,
        circuit_config,
        simulation_config,
    }
}

pub fn open_record(files: &[PathBuf]) -> PartitionedRecord {
    let files = files
        .iter()
        .map(|p| File::open(p).map(Arc::new))
        .collect::<Result<Vec<_>>>()
        .unwrap();
    PartitionedRecord::new(files).unwrap()
}

pub fn open_model(net: &Network) -> ModelDescription {
    let circuit = CircuitConfig::load(&net.circuit_config).unwrap();
    let dynamics = Arc::new(circuit.dynamics_catalog());
    NetworkParams::open(&circuit)
        .unwrap()
        .into_model(dynamics)
        .unwrap()
}
