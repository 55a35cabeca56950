mod common;

use common::{build_network, open_model};
use sonata_core::{
    CellKind, CurrentClamp, InputConfig, IoDescription, Location, SimulationConfig, StoreError,
};
use std::fs;

#[test]
fn test_spike_input_reaches_the_virtual_cell() {
    let net = build_network();
    let sim = SimulationConfig::load(&net.simulation_config).unwrap();
    let model = open_model(&net);
    let io = IoDescription::open(&sim, model.nodes()).unwrap();

    assert_eq!(model.get_cell_kind(5).unwrap(), CellKind::SpikeSource);
    assert_eq!(io.get_spikes(5), &[1.0, 3.0, 5.5]);
    assert_eq!(io.num_spike_sources(), 1);
    for gid in 0..5 {
        assert!(io.get_spikes(gid).is_empty(), "gid {}", gid);
    }
}

#[test]
fn test_current_clamps_land_on_their_cells() {
    let net = build_network();
    let sim = SimulationConfig::load(&net.simulation_config).unwrap();
    let model = open_model(&net);
    let io = IoDescription::open(&sim, model.nodes()).unwrap();

    assert_eq!(
        io.get_current_clamps(1),
        &[CurrentClamp {
            location: Location {
                section: 2,
                pos: 0.25
            },
            delay: 10.0,
            duration: 40.0,
            amplitude: 0.15,
        }]
    );
    assert_eq!(
        io.get_current_clamps(4),
        &[CurrentClamp {
            location: Location::SOMA_CENTER,
            delay: 0.0,
            duration: 100.0,
            amplitude: -0.05,
        }]
    );
    assert!(io.get_current_clamps(0).is_empty());
    assert_eq!(io.num_clamped_cells(), 2);
}

#[test]
fn test_inputs_resolve_against_the_config_directory() {
    let net = build_network();
    let sim = SimulationConfig::load(&net.simulation_config).unwrap();

    assert_eq!(sim.node_sets_file, Some(net.path("node_sets.json")));
    assert_eq!(
        sim.inputs["ext_spikes"],
        InputConfig::Spikes {
            input_file: net.path("inputs/ext_spikes.sonata"),
            node_set: "external".to_string(),
        }
    );
    assert_eq!(sim.node_sets().unwrap()["inhibitory"].population, "pop_i");
}

#[test]
fn test_unknown_node_set_is_not_found() {
    let net = build_network();
    fs::write(
        net.path("node_sets.json"),
        r#"{"inhibitory": {"population": "pop_i"}}"#,
    )
    .unwrap();
    let sim = SimulationConfig::load(&net.simulation_config).unwrap();
    let model = open_model(&net);

    assert!(matches!(
        IoDescription::open(&sim, model.nodes()),
        Err(StoreError::NotFound { .. })
    ));
}

#[test]
fn test_clamp_on_a_missing_population_is_not_found() {
    let net = build_network();
    fs::write(
        net.path("inputs/electrodes.csv"),
        "electrode_id node_id population\n0 1 pop_x\n1 0 pop_i\n",
    )
    .unwrap();
    let sim = SimulationConfig::load(&net.simulation_config).unwrap();
    let model = open_model(&net);

    assert!(matches!(
        IoDescription::open(&sim, model.nodes()),
        Err(StoreError::NotFound { .. })
    ));
}
