//! Scenario tests driving the full engine through the public interface

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use coalsim_core::cfg::{
    DemographicEvent, PopulationConfiguration, SimulationConfig, SimulationConfigBuilder,
};
use coalsim_core::demography::DemographyDebugger;
use coalsim_core::recomb_map::RecombinationMap;
use coalsim_core::sim::{SimulationError, Simulator};
use coalsim_core::treeseq::TreeSequence;

/// Walk every tree of `ts` and assert what must hold for any finished
/// simulation: trees tile the genome, every leaf sits at time 0 in every
/// tree, times strictly increase toward a shared root.
fn assert_valid_genealogies(ts: &TreeSequence) {
    let n = ts.sample_size();
    let mut cursor = ts.trees();
    let mut previous_right = 0.0;
    let mut saw_tree = false;

    while let Some(tree) = cursor.next_tree() {
        let (left, right) = tree.interval();
        assert_eq!(left, previous_right, "trees must tile without gaps");
        assert!(right > left);
        previous_right = right;
        saw_tree = true;

        let root = tree.root_of(0);
        assert!(ts.node_time(root) > 0.0);
        for leaf in 0..n {
            assert_eq!(ts.node_time(leaf), 0.0, "leaves are sampled at time 0");
            let mut node = leaf;
            let mut time = 0.0;
            while let Some(parent) = tree.parent(node) {
                let parent_time = ts.node_time(parent);
                assert!(
                    parent_time > time,
                    "times must strictly increase toward the root"
                );
                time = parent_time;
                node = parent;
            }
            assert_eq!(node, root, "every leaf joins the same root");
        }
    }

    assert!(saw_tree);
    assert_eq!(previous_right, ts.sequence_length());
}

fn pair_config(seed: u64) -> SimulationConfig {
    SimulationConfigBuilder::default()
        .sample_size(Some(2))
        .random_seed(Some(seed))
        .build()
        .unwrap()
}

#[test]
fn single_pair_single_locus_emits_one_record() {
    let mut simulator = Simulator::new(pair_config(1)).unwrap();
    let ts = simulator.next_replicate().unwrap().unwrap();

    assert_eq!(ts.num_records(), 1);
    let record = &ts.records()[0];
    assert_eq!(record.left, 0.0);
    assert_eq!(record.right, 1.0);
    assert_eq!(record.parent, 2);
    assert_eq!(record.children, vec![0, 1]);
    assert!(record.time > 0.0);
    assert_eq!(record.population, 0);
    assert_eq!(ts.num_nodes(), 3);
    assert!(ts.breakpoints().is_empty());
    assert_valid_genealogies(&ts);

    assert!(simulator.next_replicate().is_none());
    assert!(simulator.is_finished());
}

#[test]
fn record_stream_is_deterministic_for_a_seed() {
    let config = SimulationConfigBuilder::default()
        .sample_size(Some(5))
        .recombination_map(RecombinationMap::uniform(1.0, 5.0).unwrap())
        .random_seed(Some(1234))
        .num_replicates(3)
        .build()
        .unwrap();

    let first: Vec<TreeSequence> = Simulator::new(config.clone()).unwrap().run_all().unwrap();
    let second: Vec<TreeSequence> = Simulator::new(config).unwrap().run_all().unwrap();

    assert_eq!(first.len(), 3);
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.records(), b.records());
        assert_eq!(a.breakpoints(), b.breakpoints());
        assert_eq!(a.num_nodes(), b.num_nodes());
    }
}

#[test]
fn heavy_recombination_stays_in_bounds_and_tiles() {
    // High enough that dozens of breakpoints survive into the genealogy while
    // the ancestral graph stays small enough for a quick test
    let config = SimulationConfigBuilder::default()
        .sample_size(Some(2))
        .recombination_map(RecombinationMap::uniform(1.0, 100.0).unwrap())
        .random_seed(Some(7))
        .build()
        .unwrap();

    let ts = Simulator::new(config)
        .unwrap()
        .next_replicate()
        .unwrap()
        .unwrap();

    assert!(ts.num_records() > 1, "this rate must force recombination");
    assert!(ts.breakpoints().len() > 5);
    for record in ts.records() {
        assert!(record.left >= 0.0);
        assert!(record.left < record.right);
        assert!(record.right <= 1.0);
    }
    assert_valid_genealogies(&ts);
}

#[test]
fn bottleneck_pulls_tmrca_down() {
    let replicates = 300;
    let config = SimulationConfigBuilder::default()
        .sample_size(Some(3))
        .Ne(10_000.0)
        .demographic_events(vec![DemographicEvent::PopulationParametersChange {
            time: 100.0,
            population: None,
            initial_size: Some(1.0),
            growth_rate: None,
        }])
        .random_seed(Some(99))
        .num_replicates(replicates)
        .build()
        .unwrap();

    let mut simulator = Simulator::new(config).unwrap();
    let mut total = 0.0;
    while let Some(result) = simulator.next_replicate() {
        let ts = result.unwrap();
        total += ts.node_time((ts.num_nodes() - 1) as u32);
    }
    let mean_tmrca = total / f64::from(replicates);

    // Without the bottleneck the expectation is 4 * 10_000 * (1 - 1/3), far
    // above anything a size-1 population at t=100 allows
    assert!(mean_tmrca > 10.0);
    assert!(mean_tmrca < 1_000.0);
}

#[test]
fn isolated_demes_stall_with_an_error() {
    let config = SimulationConfigBuilder::default()
        .population_configurations(Some(vec![
            PopulationConfiguration::new(1),
            PopulationConfiguration::new(1),
        ]))
        .random_seed(Some(3))
        .build()
        .unwrap();

    let error = Simulator::new(config)
        .unwrap()
        .next_replicate()
        .unwrap()
        .unwrap_err();
    assert!(matches!(
        error,
        SimulationError::Stalled { lineages: 2, .. }
    ));
}

#[test]
fn mass_migration_rescues_isolated_demes() {
    let config = SimulationConfigBuilder::default()
        .population_configurations(Some(vec![
            PopulationConfiguration::new(1),
            PopulationConfiguration::new(1),
        ]))
        .demographic_events(vec![DemographicEvent::MassMigration {
            time: 5.0,
            source: 1,
            destination: 0,
            proportion: 1.0,
        }])
        .random_seed(Some(4))
        .build()
        .unwrap();

    let ts = Simulator::new(config)
        .unwrap()
        .next_replicate()
        .unwrap()
        .unwrap();

    // The lineages cannot meet before the rescue event fires
    assert!(ts.records()[0].time > 5.0);
    assert_eq!(ts.records()[0].population, 0);
    assert_valid_genealogies(&ts);
}

#[test]
fn step_budget_bounds_the_event_loop() {
    let config = SimulationConfigBuilder::default()
        .sample_size(Some(20))
        .recombination_map(RecombinationMap::uniform(1.0, 10.0).unwrap())
        .max_steps(Some(3))
        .random_seed(Some(5))
        .build()
        .unwrap();

    let error = Simulator::new(config)
        .unwrap()
        .next_replicate()
        .unwrap()
        .unwrap_err();
    assert_eq!(error, SimulationError::StepBudgetExhausted { max_steps: 3 });
}

#[test]
fn cancellation_aborts_the_replicate() {
    let mut simulator = Simulator::new(pair_config(6)).unwrap();
    let flag = Arc::new(AtomicBool::new(true));
    simulator.set_cancel_flag(Arc::clone(&flag));

    let error = simulator.next_replicate().unwrap().unwrap_err();
    assert_eq!(error, SimulationError::Cancelled);

    // Lowering the flag lets the next replicate run
    flag.store(false, Ordering::Relaxed);
    assert!(simulator.next_replicate().is_none());
}

#[test]
fn segment_cap_exhaustion_is_out_of_memory() {
    let mut config = pair_config(8);
    config.max_segments = Some(1);
    let error = Simulator::new(config)
        .unwrap()
        .next_replicate()
        .unwrap()
        .unwrap_err();
    assert_eq!(error, SimulationError::OutOfMemory);
}

/// Three-population schedule in the shape of the classic out-of-Africa models:
/// two derived populations split off backward in time by mass migrations, with
/// migration-rate and size changes at the same epochs
fn out_of_africa_style_config() -> SimulationConfig {
    let mut ancestral = PopulationConfiguration::new(2);
    ancestral.initial_size = Some(12_000.0);
    let mut european = PopulationConfiguration::new(2);
    european.initial_size = Some(30_000.0);
    european.growth_rate = 0.004;
    let mut asian = PopulationConfiguration::new(2);
    asian.initial_size = Some(45_000.0);
    asian.growth_rate = 0.0055;

    let migration = 2.5e-5;
    SimulationConfigBuilder::default()
        .population_configurations(Some(vec![ancestral, european, asian]))
        .migration_matrix(Some(vec![
            vec![0.0, migration, migration],
            vec![migration, 0.0, migration],
            vec![migration, migration, 0.0],
        ]))
        .demographic_events(vec![
            // Derived populations merge backward in time
            DemographicEvent::MassMigration {
                time: 848.0,
                source: 2,
                destination: 1,
                proportion: 1.0,
            },
            DemographicEvent::MigrationRateChange {
                time: 848.0,
                rate: 0.0,
                matrix_index: None,
            },
            DemographicEvent::PopulationParametersChange {
                time: 848.0,
                population: Some(1),
                initial_size: Some(2_000.0),
                growth_rate: Some(0.0),
            },
            DemographicEvent::MassMigration {
                time: 5_600.0,
                source: 1,
                destination: 0,
                proportion: 1.0,
            },
            DemographicEvent::PopulationParametersChange {
                time: 8_800.0,
                population: Some(0),
                initial_size: Some(7_300.0),
                growth_rate: None,
            },
        ])
        .random_seed(Some(2024))
        .build()
        .unwrap()
}

#[test]
fn out_of_africa_style_schedule_runs_to_completion() {
    let config = out_of_africa_style_config();

    let debugger = DemographyDebugger::new(&config).unwrap();
    assert_eq!(debugger.epoch_boundaries(), vec![848.0, 5_600.0, 8_800.0]);
    assert_eq!(debugger.epochs().len(), 4);
    // The printed table exists and names every epoch
    let printed = debugger.to_string();
    assert!(printed.contains("Epoch 3"));

    let ts = Simulator::new(config)
        .unwrap()
        .next_replicate()
        .unwrap()
        .unwrap();
    assert_eq!(ts.sample_size(), 6);
    assert_valid_genealogies(&ts);
}

#[test]
fn structured_model_with_recombination_keeps_invariants() {
    let config = SimulationConfigBuilder::default()
        .population_configurations(Some(vec![
            PopulationConfiguration::new(4),
            PopulationConfiguration::new(4),
        ]))
        .migration_matrix(Some(vec![vec![0.0, 0.5], vec![0.5, 0.0]]))
        .recombination_map(
            RecombinationMap::new(vec![0.0, 40.0, 60.0, 100.0], vec![0.02, 0.0, 0.05]).unwrap(),
        )
        .random_seed(Some(11))
        .num_replicates(5)
        .build()
        .unwrap();

    let mut simulator = Simulator::new(config).unwrap();
    while let Some(result) = simulator.next_replicate() {
        let ts = result.unwrap();
        assert_valid_genealogies(&ts);
        // The flat interval of the map can never host a breakpoint
        for breakpoint in ts.breakpoints() {
            assert!(!(breakpoint > 40.0 && breakpoint < 60.0));
        }
    }
}
