//! Configuration options specifically for the CLI portion of the simulator
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Result;
use clap::{AppSettings, Parser, Subcommand};

use coalsim_core::cfg::{
    DemographicEvent, PopulationConfiguration, SimulationConfig, SimulationConfigBuilder,
    SummaryOutputConfig,
};
use coalsim_core::recomb_map::RecombinationMap;

/// Configuration options for the command line app subcommands
#[derive(Parser)]
#[clap(version, about = "Coalescent simulator with recombination and structured demography")]
pub struct CliConfig {
    /// Subcommands of the simulator
    #[clap(subcommand)]
    pub command: CliCommand,
}

/// Subcommand definitions
#[derive(Subcommand)]
#[clap(setting = AppSettings::DeriveDisplayOrder)]
pub enum CliCommand {
    /// Run simulations
    Simulate(SimulateConfig),
    /// Reproduce results from a previous simulation run  
    Reproduce(ReproduceConfig),
}

/// Run coalescent simulations
#[derive(Parser)]
#[clap(version, setting = AppSettings::DeriveDisplayOrder)]
pub struct SimulateConfig {
    /// Output options for the CLI
    #[clap(flatten)]
    pub output_cfg: CliOutputConfig,

    /// Simulation options
    #[clap(flatten)]
    pub sim_cfg: CliSimConfig,
}

/// Reproduce results of a previous run of the simulator
#[derive(Parser)]
#[clap(version, setting = AppSettings::DeriveDisplayOrder)]
pub struct ReproduceConfig {
    /// Path of the input file, which came from a previous run and contains the information needed
    /// to reproduce the results
    pub input_path: PathBuf,

    /// Output options for the CLI
    #[clap(flatten)]
    pub output_cfg: CliOutputConfig,
}

/// Command line inputs needed to output results
#[derive(Parser)]
#[clap(setting = AppSettings::DeriveDisplayOrder)]
pub struct CliOutputConfig {
    /// Path to output the coalescence record table (as CSV), one row per record
    /// per replicate
    #[clap(short = 'o', long = "records-output")]
    pub records_output_path: Option<PathBuf>,

    /// Path to output the surviving recombination breakpoints (as CSV)
    #[clap(long = "breakpoints-output")]
    pub breakpoints_output_path: Option<PathBuf>,

    /// Path to output per-replicate tree-sequence summary statistics (as CSV)
    #[clap(short = 's', long = "summary-output")]
    pub summary_output_path: Option<PathBuf>,

    /// Path to output infinite-sites mutations (as ndjson); requires --mutation-rate
    #[clap(long = "mutations-output")]
    pub mutations_output_path: Option<PathBuf>,

    /// Mutation rate per base per generation used to decorate finished tree sequences
    #[clap(short = 'u', long)]
    pub mutation_rate: Option<f64>,

    /// Options for the summary output
    #[clap(flatten)]
    pub summary_cfg: SummaryOutputConfig,
}

impl CliOutputConfig {
    /// Should mutations be generated?
    pub fn should_generate_mutations(&self) -> bool {
        self.mutations_output_path.is_some()
    }
}

/// Simulation options, mirroring the programmatic configuration builder
#[derive(Parser)]
#[clap(setting = AppSettings::DeriveDisplayOrder)]
pub struct CliSimConfig {
    /// Number of chromosomes to sample (ignored when --deme-samples is given)
    #[clap(short = 'n', long, default_value = "2")]
    pub sample_size: u32,
    /// Number of replicates to perform
    #[clap(short = 'r', long, default_value = "1")]
    pub replicates: u32,
    /// Default population size
    #[clap(long = "Ne", default_value = "1.0")]
    pub effective_size: f64,
    /// Physical genome length (ignored when --map-file is given)
    #[clap(short = 'L', long, default_value = "1.0")]
    pub length: f64,
    /// Uniform per-base per-generation recombination rate (ignored when --map-file is given)
    #[clap(short = 'c', long, default_value = "0.0")]
    pub recombination_rate: f64,
    /// Two-column recombination map file: "position rate" per line, last rate ignored
    #[clap(long = "map-file")]
    pub map_file: Option<PathBuf>,
    /// Sample counts per deme; repeat the flag once per deme
    #[clap(long = "deme-samples")]
    pub deme_samples: Vec<u32>,
    /// Per-lineage per-generation migration rate to each other deme
    #[clap(short = 'm', long, default_value = "0.0")]
    pub migration_rate: f64,
    /// Exponential growth rate applied to every deme
    #[clap(short = 'g', long, default_value = "0.0")]
    pub growth_rate: f64,
    /// Seed for the RNG
    #[clap(long)]
    pub seed: Option<u64>,
    /// Abort a replicate after this many event-loop iterations
    #[clap(long)]
    pub max_steps: Option<u64>,
    /// Size/growth change events as TIME:POP:SIZE (POP may be '*')
    #[clap(long = "size-change")]
    pub size_changes: Vec<SizeChangeSpec>,
    /// Growth rate change events as TIME:POP:RATE (POP may be '*')
    #[clap(long = "growth-change")]
    pub growth_changes: Vec<GrowthChangeSpec>,
    /// Migration rate change events as TIME:RATE or TIME:RATE:SRC:DST
    #[clap(long = "migration-change")]
    pub migration_changes: Vec<MigrationChangeSpec>,
    /// Mass migration events as TIME:SRC:DST:PROPORTION
    #[clap(long = "mass-migration")]
    pub mass_migrations: Vec<MassMigrationSpec>,
}

impl CliSimConfig {
    /// Build the core configuration this command line describes
    ///
    /// `map` is resolved by the caller (uniform, or loaded from --map-file).
    pub fn to_simulation_config(&self, map: RecombinationMap) -> Result<SimulationConfig> {
        let populations: Vec<PopulationConfiguration> = if self.deme_samples.is_empty() {
            vec![PopulationConfiguration {
                sample_size: self.sample_size,
                initial_size: None,
                growth_rate: self.growth_rate,
            }]
        } else {
            self.deme_samples
                .iter()
                .map(|samples| PopulationConfiguration {
                    sample_size: *samples,
                    initial_size: None,
                    growth_rate: self.growth_rate,
                })
                .collect()
        };

        let num_demes = populations.len();
        let migration_matrix = (num_demes > 1).then(|| {
            let mut matrix = vec![vec![self.migration_rate; num_demes]; num_demes];
            for (i, row) in matrix.iter_mut().enumerate() {
                row[i] = 0.0;
            }
            matrix
        });

        let config = SimulationConfigBuilder::default()
            .Ne(self.effective_size)
            .recombination_map(map)
            .population_configurations(Some(populations))
            .migration_matrix(migration_matrix)
            .demographic_events(self.demographic_events())
            .random_seed(self.seed)
            .num_replicates(self.replicates)
            .max_steps(self.max_steps)
            .build()?;
        Ok(config)
    }

    /// Merge the per-flag event specs into one time-ordered schedule
    fn demographic_events(&self) -> Vec<DemographicEvent> {
        let mut events: Vec<DemographicEvent> = Vec::new();
        events.extend(self.size_changes.iter().map(|s| s.0.clone()));
        events.extend(self.growth_changes.iter().map(|s| s.0.clone()));
        events.extend(self.migration_changes.iter().map(|s| s.0.clone()));
        events.extend(self.mass_migrations.iter().map(|s| s.0.clone()));
        // Stable: simultaneous events keep their flag-category order
        events.sort_by(|a, b| a.time().total_cmp(&b.time()));
        events
    }
}

/// Split a colon-separated spec into exactly `n` fields
fn split_fields(s: &str, n: usize, usage: &str) -> Result<Vec<String>, String> {
    let fields: Vec<String> = s.split(':').map(str::to_string).collect();
    if fields.len() == n {
        Ok(fields)
    } else {
        Err(format!("expected {}", usage))
    }
}

fn parse_field<T: FromStr>(field: &str, what: &str) -> Result<T, String> {
    field
        .parse()
        .map_err(|_| format!("could not parse {} from {:?}", what, field))
}

/// Target population field: an index, or '*' for all populations
fn parse_population(field: &str) -> Result<Option<usize>, String> {
    if field == "*" {
        Ok(None)
    } else {
        parse_field(field, "population index").map(Some)
    }
}

/// A TIME:POP:SIZE population size change
#[derive(Clone, Debug)]
pub struct SizeChangeSpec(pub DemographicEvent);

impl FromStr for SizeChangeSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields = split_fields(s, 3, "TIME:POP:SIZE")?;
        Ok(Self(DemographicEvent::PopulationParametersChange {
            time: parse_field(&fields[0], "time")?,
            population: parse_population(&fields[1])?,
            initial_size: Some(parse_field(&fields[2], "size")?),
            growth_rate: None,
        }))
    }
}

/// A TIME:POP:RATE growth rate change
#[derive(Clone, Debug)]
pub struct GrowthChangeSpec(pub DemographicEvent);

impl FromStr for GrowthChangeSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields = split_fields(s, 3, "TIME:POP:RATE")?;
        Ok(Self(DemographicEvent::PopulationParametersChange {
            time: parse_field(&fields[0], "time")?,
            population: parse_population(&fields[1])?,
            initial_size: None,
            growth_rate: Some(parse_field(&fields[2], "growth rate")?),
        }))
    }
}

/// A TIME:RATE or TIME:RATE:SRC:DST migration rate change
#[derive(Clone, Debug)]
pub struct MigrationChangeSpec(pub DemographicEvent);

impl FromStr for MigrationChangeSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<String> = s.split(':').map(str::to_string).collect();
        let matrix_index = match fields.len() {
            2 => None,
            4 => Some((
                parse_field(&fields[2], "source population")?,
                parse_field(&fields[3], "destination population")?,
            )),
            _ => return Err("expected TIME:RATE or TIME:RATE:SRC:DST".to_string()),
        };
        Ok(Self(DemographicEvent::MigrationRateChange {
            time: parse_field(&fields[0], "time")?,
            rate: parse_field(&fields[1], "rate")?,
            matrix_index,
        }))
    }
}

/// A TIME:SRC:DST:PROPORTION mass migration
#[derive(Clone, Debug)]
pub struct MassMigrationSpec(pub DemographicEvent);

impl FromStr for MassMigrationSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields = split_fields(s, 4, "TIME:SRC:DST:PROPORTION")?;
        Ok(Self(DemographicEvent::MassMigration {
            time: parse_field(&fields[0], "time")?,
            source: parse_field(&fields[1], "source population")?,
            destination: parse_field(&fields[2], "destination population")?,
            proportion: parse_field(&fields[3], "proportion")?,
        }))
    }
}
