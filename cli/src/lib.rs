//! Library for concerns and functions specific to the simulator's CLI, rather
//! than the core library
//!
//! This is kept separate to "dogfood" the core interface by making the CLI use
//! it, to prevent overly tight coupling of the CLI and the main lib, and to
//! keep CLI concerns totally out of the core public interface.

use std::time::{Duration, Instant};

use anyhow::{bail, Error, Result};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use rand::SeedableRng;

use coalsim_core::cfg::SimulationConfig;
use coalsim_core::mutgen::MutationGenerator;
use coalsim_core::recomb_map::RecombinationMap;
use coalsim_core::sim::{SimRng, Simulator};

use cfg::{CliCommand, CliOutputConfig, ReproduceConfig, SimulateConfig};
use io::{extract_sim_config_from_path, load_recombination_map, outputter_group_for_cli};

mod cfg;
mod io;

pub use cfg::CliConfig;

/// Run the CLI as specified by some `CliConfig`
pub fn run_cli_config(cfg: CliConfig) {
    match cfg.command {
        CliCommand::Simulate(simulate_cfg) => run_simulate_command(&simulate_cfg),
        CliCommand::Reproduce(reproduce_cfg) => reproduce_simulations(&reproduce_cfg),
    }
}

/// Resolve the recombination map and core config, then run with display
fn run_simulate_command(simulate_cfg: &SimulateConfig) {
    let result = resolve_sim_config(simulate_cfg)
        .and_then(|sim_cfg| run_simulations_inner(&simulate_cfg.output_cfg, sim_cfg));
    if let Err(e) = result {
        report_failure("failed to run simulations", &e);
    }
}

/// Build the core configuration from the command line flags
fn resolve_sim_config(simulate_cfg: &SimulateConfig) -> Result<SimulationConfig> {
    let map = match &simulate_cfg.sim_cfg.map_file {
        Some(path) => load_recombination_map(path)?,
        None => RecombinationMap::uniform(
            simulate_cfg.sim_cfg.length,
            simulate_cfg.sim_cfg.recombination_rate,
        )?,
    };
    simulate_cfg.sim_cfg.to_simulation_config(map)
}

/// Reproduce simulation results by extracting settings and handing off to the
/// normal simulation path
fn reproduce_simulations(cfg: &ReproduceConfig) {
    match extract_sim_config_from_path(&cfg.input_path) {
        Ok(sim_cfg) => {
            if sim_cfg.random_seed.is_none() {
                eprintln!(
                    "Note: The simulations were previously run without a seed. \
                       Simulations will be run with the same settings but results will not be identical."
                );
            }

            if let Err(e) = run_simulations_inner(&cfg.output_cfg, sim_cfg) {
                report_failure("failed to run simulations", &e);
            }
        }
        Err(e) => {
            report_failure("failed to read simulation options for reproduction", &e);
        }
    }
}

/// Offset mixed into the simulation seed so the mutation stream is independent
/// of the genealogy stream but still reproducible
const MUTATION_SEED_OFFSET: u64 = 0x9e3779b97f4a7c15;

/// Run the simulations with command line display and pass error results up
fn run_simulations_inner(output_cfg: &CliOutputConfig, sim_cfg: SimulationConfig) -> Result<()> {
    let mut progress = ReplicateProgress::new(sim_cfg.num_replicates);

    let mutation_generator = mutation_generator_for(output_cfg)?;
    let mut mutation_rng = match sim_cfg.random_seed {
        Some(seed) => SimRng::seed_from_u64(seed.wrapping_add(MUTATION_SEED_OFFSET)),
        None => SimRng::from_entropy(),
    };

    // Objects which manage the underlying simulations and the outputting of results
    let mut output_handler = outputter_group_for_cli(output_cfg, &sim_cfg)?;
    let mut simulator = Simulator::new(sim_cfg)?;

    while let Some(result) = simulator.next_replicate() {
        let replicate = simulator.replicates_completed();
        let tree_sequence = result?;

        output_handler.record_tree_sequence(replicate, &tree_sequence)?;

        if let Some(generator) = &mutation_generator {
            let mutations = generator.generate(&tree_sequence, &mut mutation_rng);
            output_handler.record_mutations(replicate, &mutations)?;
        }

        progress.replicate_done(replicate);
    }

    Ok(())
}

/// Build the optional mutation generator the output configuration asks for
fn mutation_generator_for(output_cfg: &CliOutputConfig) -> Result<Option<MutationGenerator>> {
    if !output_cfg.should_generate_mutations() {
        return Ok(None);
    }
    match output_cfg.mutation_rate {
        Some(rate) if rate.is_finite() && rate >= 0.0 => Ok(Some(MutationGenerator::new(rate))),
        Some(rate) => bail!("invalid mutation rate {}", rate),
        None => bail!("--mutations-output requires --mutation-rate"),
    }
}

/// Print a failure and its cause chain to stderr
fn report_failure(context: &str, error: &Error) {
    eprintln!("Error: {}.", context);
    eprintln!("{:#}", error);
}

/// Replicate counter drawn to stderr while a batch runs
///
/// A replicate can finish in microseconds, so redraws are throttled; the bar
/// steps one tick per finished tree sequence and clears itself when the batch
/// is done or panics.
struct ReplicateProgress {
    bar: ProgressBar,
    redraw_interval: Duration,
    last_redraw: Instant,
}

impl ReplicateProgress {
    /// Bar spanning `num_replicates` ticks, drawing to stderr
    fn new(num_replicates: u32) -> Self {
        let bar = ProgressBar::with_draw_target(
            u64::from(num_replicates),
            ProgressDrawTarget::stderr_nohz(),
        )
        .with_style(ProgressStyle::default_bar().template("Replicate: {wide_bar} [{pos}/{len}]"));

        // A bar handle survives into the panic hook so an in-flight bar can
        // step aside before the panic message prints
        let hook_handle = bar.clone();
        let previous_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            hook_handle.abandon();
            previous_hook(info);
        }));

        bar.set_position(0);
        Self {
            bar,
            redraw_interval: Duration::from_millis(500),
            last_redraw: Instant::now(),
        }
    }

    /// Note that `completed` replicates have finished, redrawing if due
    fn replicate_done(&mut self, completed: u32) {
        if self.last_redraw.elapsed() >= self.redraw_interval {
            self.bar.set_position(u64::from(completed));
            self.last_redraw = Instant::now();
        }
    }
}

impl Drop for ReplicateProgress {
    fn drop(&mut self) {
        self.bar.finish_and_clear();
    }
}
