use anyhow::{bail, Context, Result};
use sonata_core::{
    CellKind, Gid, IoDescription, ModelDescription, NetworkParams, SimulationConfig,
};
use std::env;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn print_summary(
    sim: &SimulationConfig,
    model: &ModelDescription,
    io: &IoDescription,
) -> Result<()> {
    println!(
        "run: tstop {} ms, dt {} ms ({} steps), threshold {} mV, {} degC, v_init {} mV",
        sim.run.tstop,
        sim.run.dt,
        sim.num_steps(),
        sim.run.spike_threshold,
        sim.conditions.celsius,
        sim.conditions.v_init
    );

    let bounds = model.pop_partitions();
    for (k, name) in model.pop_names().iter().enumerate() {
        println!("population {}: gids [{}, {})", name, bounds[k], bounds[k + 1]);
    }

    for gid in 0..model.num_cells() {
        let kind = model.get_cell_kind(gid)?;
        let placement = model.get_sources_and_targets(gid)?;
        let connections = model.get_connections(gid)?;
        println!(
            "cell {} ({}[{}]): {:?}, {} sources, {} targets",
            gid,
            model.population_of(gid)?,
            model.population_id_of(gid)?,
            kind,
            placement.sources.len(),
            placement.targets.len()
        );
        if kind == CellKind::Cable {
            for (section, mechs) in model.get_density_mechs(gid)? {
                let names: Vec<String> = mechs.iter().map(|m| m.to_string()).collect();
                println!("  {}: {}", section, names.join(" "));
            }
        }
        for c in connections {
            println!("  {}", c);
        }
        let spikes = io.get_spikes(gid);
        if !spikes.is_empty() {
            println!("  {} input spikes from {} ms", spikes.len(), spikes[0]);
        }
        for clamp in io.get_current_clamps(gid) {
            println!(
                "  clamp at {}: {} nA from {} ms for {} ms",
                clamp.location, clamp.amplitude, clamp.delay, clamp.duration
            );
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let config_path = match args.get(1) {
        Some(p) => p,
        None => bail!(
            "usage: {} <simulation_config.json>",
            args.first().map(String::as_str).unwrap_or("sonata")
        ),
    };

    let sim = SimulationConfig::load(config_path)
        .with_context(|| format!("loading simulation config {}", config_path))?;
    let circuit = sim
        .circuit()
        .with_context(|| format!("loading circuit config {}", sim.network.display()))?;
    let dynamics = Arc::new(circuit.dynamics_catalog());
    let model = NetworkParams::open(&circuit)
        .and_then(|net| net.into_model(dynamics))
        .context("opening network")?;

    let gids: Vec<Gid> = (0..model.num_cells()).collect();
    model
        .build_source_and_target_maps(&gids)
        .context("building source and target maps")?;
    let io = IoDescription::open(&sim, model.nodes()).context("reading inputs")?;
    print_summary(&sim, &model, &io)
}
