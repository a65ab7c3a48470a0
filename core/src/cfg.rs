//! Configuration options for the simulations and output, with validation performed
//! before any simulation begins

// The default population scaler is conventionally written "Ne" in the population
// genetics literature, which does not match the normal Rust snake-case guidelines
#![allow(non_snake_case)]

use clap::{AppSettings, Parser};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::recomb_map::{RecombinationMap, RecombinationMapError};

/// Options for summary output statistics
#[derive(Clone, Parser)]
#[clap(setting = AppSettings::DeriveDisplayOrder)]
pub struct SummaryOutputConfig {
    /// Output the number of distinct trees along the genome
    #[clap(skip = true)]
    pub num_trees: bool,
    /// Output the number of coalescence records
    #[clap(long)]
    pub num_records: bool,
    /// Output the number of genealogy nodes
    #[clap(long)]
    pub num_nodes: bool,
    /// Output the number of distinct recombination breakpoints
    #[clap(long)]
    pub num_breakpoints: bool,
    /// Output the oldest root time across the genome
    #[clap(long)]
    pub max_root_time: bool,
    /// Output the mean root time over trees
    #[clap(long)]
    pub mean_root_time: bool,
    /// Output the genome-integrated total branch length
    #[clap(long)]
    pub total_branch_length: bool,
}

/// Sampling and demographic parameters of one population
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PopulationConfiguration {
    /// Number of chromosomes sampled from this population at time 0
    pub sample_size: u32,
    /// Size at time 0; defaults to the configuration's `Ne` when omitted
    pub initial_size: Option<f64>,
    /// Exponential growth rate per generation, forward in time
    pub growth_rate: f64,
}

impl PopulationConfiguration {
    /// Population of default size and no growth sampling `sample_size` chromosomes
    pub fn new(sample_size: u32) -> Self {
        Self {
            sample_size,
            initial_size: None,
            growth_rate: 0.0,
        }
    }
}

/// A scheduled change to the demographic model
///
/// Events execute when the simulation clock reaches their time; events sharing
/// a time execute in the order they were submitted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum DemographicEvent {
    /// Change the size and/or growth rate of one population (or all of them)
    PopulationParametersChange {
        /// Time the change takes effect
        time: f64,
        /// Target population, or `None` for every population
        population: Option<usize>,
        /// New size at `time`; omitted keeps the current effective size
        initial_size: Option<f64>,
        /// New growth rate; omitted keeps the previous rate
        growth_rate: Option<f64>,
    },
    /// Change one migration-matrix entry, or every off-diagonal entry
    MigrationRateChange {
        /// Time the change takes effect
        time: f64,
        /// New per-lineage per-generation rate
        rate: f64,
        /// `(source, destination)` entry to set, or `None` for all off-diagonal
        matrix_index: Option<(usize, usize)>,
    },
    /// Move each lineage in `source` to `destination` with probability `proportion`
    MassMigration {
        /// Time the movement happens
        time: f64,
        /// Population lineages move out of (backward in time)
        source: usize,
        /// Population lineages move into
        destination: usize,
        /// Independent per-lineage movement probability
        proportion: f64,
    },
}

impl DemographicEvent {
    /// Time this event is scheduled for
    pub fn time(&self) -> f64 {
        match self {
            Self::PopulationParametersChange { time, .. }
            | Self::MigrationRateChange { time, .. }
            | Self::MassMigration { time, .. } => *time,
        }
    }
}

impl std::fmt::Display for DemographicEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PopulationParametersChange {
                time, population, ..
            } => match population {
                Some(p) => write!(f, "population parameters change at t={} (population {})", time, p),
                None => write!(f, "population parameters change at t={} (all populations)", time),
            },
            Self::MigrationRateChange {
                time, matrix_index, ..
            } => match matrix_index {
                Some((i, j)) => write!(f, "migration rate change at t={} (entry {} -> {})", time, i, j),
                None => write!(f, "migration rate change at t={} (all entries)", time),
            },
            Self::MassMigration {
                time,
                source,
                destination,
                proportion,
            } => write!(
                f,
                "mass migration at t={} ({} -> {}, proportion {})",
                time, source, destination, proportion
            ),
        }
    }
}

/// Full description of one simulation run
///
/// Construct directly or through [`SimulationConfigBuilder`]; either way
/// [`SimulationConfig::validate`] runs before any simulation starts.
#[allow(missing_docs)] // Builder will not have doc comment
#[derive(Clone, Debug, Builder, Serialize, Deserialize)]
#[builder(pattern = "owned")]
pub struct SimulationConfig {
    /// Number of chromosomes to sample from a single default population
    ///
    /// Mutually exclusive with `population_configurations`.
    #[builder(default)]
    pub sample_size: Option<u32>,
    /// Default population size used wherever an initial size is omitted
    #[builder(default = "1.0")]
    pub Ne: f64,
    /// Map from physical position to genetic distance; also fixes the genome length
    #[builder(default)]
    pub recombination_map: RecombinationMap,
    /// Per-population sampling and demography; defines the population count
    #[builder(default)]
    pub population_configurations: Option<Vec<PopulationConfiguration>>,
    /// Backward migration rates, `migration_matrix[i][j]` = rate of moving from
    /// `i` to `j`; zero matrix when omitted
    #[builder(default)]
    pub migration_matrix: Option<Vec<Vec<f64>>>,
    /// Scheduled demographic events, non-decreasing in time
    #[builder(default)]
    pub demographic_events: Vec<DemographicEvent>,
    /// Seed for the PRNG; entropy-seeded when omitted
    #[builder(default)]
    pub random_seed: Option<u64>,
    /// Number of independent replicates to simulate
    #[builder(default = "1")]
    pub num_replicates: u32,
    /// Abort a replicate after this many event-loop iterations
    #[builder(default)]
    pub max_steps: Option<u64>,
    /// Hard cap on live ancestral segments; exceeding it is an out-of-memory error
    #[builder(default)]
    pub max_segments: Option<usize>,
}

/// An error in the simulation configuration, reported before simulation begins
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Neither a sample size nor population configurations were given
    #[error("no samples configured: set sample_size or population_configurations")]
    NoSamples,
    /// Both a flat sample size and per-population configurations were given
    #[error("sample_size and population_configurations are mutually exclusive")]
    AmbiguousSampleConfiguration,
    /// Fewer than two chromosomes leaves nothing to coalesce
    #[error("total sample size must be at least 2, found {total}")]
    SampleSizeTooSmall {
        /// Total configured sample count
        total: u32,
    },
    /// `Ne` must be positive and finite
    #[error("default population size Ne must be positive and finite, found {size}")]
    InvalidEffectiveSize {
        /// Offending value
        size: f64,
    },
    /// A population's initial size must be positive and finite
    #[error("initial size of population {population} must be positive and finite, found {size}")]
    InvalidPopulationSize {
        /// Offending population index
        population: usize,
        /// Offending value
        size: f64,
    },
    /// A growth rate must be finite
    #[error("growth rate of population {population} is not finite")]
    NonFiniteGrowthRate {
        /// Offending population index
        population: usize,
    },
    /// The migration matrix must be square with one row per population
    #[error("migration matrix must be {expected}x{expected}")]
    MigrationMatrixShape {
        /// Expected dimension
        expected: usize,
    },
    /// The diagonal of the migration matrix must be zero
    #[error("migration matrix diagonal entry {index} must be zero")]
    MigrationMatrixDiagonal {
        /// Offending diagonal index
        index: usize,
    },
    /// Migration rates must be non-negative and finite
    #[error("migration rate from {from} to {to} is negative or not finite")]
    InvalidMigrationRate {
        /// Source population
        from: usize,
        /// Destination population
        to: usize,
    },
    /// Demographic events must be submitted in non-decreasing time order
    #[error("demographic event {index} is scheduled before its predecessor")]
    NonMonotoneEventTimes {
        /// Index of the offending event
        index: usize,
    },
    /// Event times must be finite and non-negative
    #[error("demographic event {index} has an invalid time")]
    InvalidEventTime {
        /// Index of the offending event
        index: usize,
    },
    /// An event referenced a population that does not exist
    #[error("demographic event {index} references population {population}, but only {populations} exist")]
    EventPopulationOutOfRange {
        /// Index of the offending event
        index: usize,
        /// Referenced population
        population: usize,
        /// Number of configured populations
        populations: usize,
    },
    /// An event carried a negative or non-finite rate or size
    #[error("demographic event {index} carries a negative or non-finite parameter")]
    InvalidEventParameter {
        /// Index of the offending event
        index: usize,
    },
    /// A mass migration proportion must lie in [0, 1]
    #[error("mass migration event {index} has proportion {proportion} outside [0, 1]")]
    InvalidProportion {
        /// Index of the offending event
        index: usize,
        /// Offending proportion
        proportion: f64,
    },
    /// A mass migration must move lineages between distinct populations
    #[error("mass migration event {index} has identical source and destination")]
    MassMigrationSamePopulation {
        /// Index of the offending event
        index: usize,
    },
    /// The recombination map was malformed
    #[error(transparent)]
    RecombinationMap(#[from] RecombinationMapError),
}

impl SimulationConfig {
    /// Check every constraint of the configuration
    ///
    /// Runs before simulation begins; a configuration that validates cleanly
    /// cannot fail for configuration reasons mid-run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.Ne.is_finite() || self.Ne <= 0.0 {
            return Err(ConfigError::InvalidEffectiveSize { size: self.Ne });
        }

        match (&self.sample_size, &self.population_configurations) {
            (Some(_), Some(_)) => return Err(ConfigError::AmbiguousSampleConfiguration),
            (None, None) => return Err(ConfigError::NoSamples),
            _ => {}
        }
        let total = self.total_sample_size();
        if total < 2 {
            return Err(ConfigError::SampleSizeTooSmall { total });
        }

        let num_populations = self.num_populations();
        if let Some(populations) = &self.population_configurations {
            for (index, pop) in populations.iter().enumerate() {
                if let Some(size) = pop.initial_size {
                    if !size.is_finite() || size <= 0.0 {
                        return Err(ConfigError::InvalidPopulationSize {
                            population: index,
                            size,
                        });
                    }
                }
                if !pop.growth_rate.is_finite() {
                    return Err(ConfigError::NonFiniteGrowthRate { population: index });
                }
            }
        }

        if let Some(matrix) = &self.migration_matrix {
            if matrix.len() != num_populations {
                return Err(ConfigError::MigrationMatrixShape {
                    expected: num_populations,
                });
            }
            for (i, row) in matrix.iter().enumerate() {
                if row.len() != num_populations {
                    return Err(ConfigError::MigrationMatrixShape {
                        expected: num_populations,
                    });
                }
                for (j, rate) in row.iter().enumerate() {
                    if i == j && *rate != 0.0 {
                        return Err(ConfigError::MigrationMatrixDiagonal { index: i });
                    }
                    if !rate.is_finite() || *rate < 0.0 {
                        return Err(ConfigError::InvalidMigrationRate { from: i, to: j });
                    }
                }
            }
        }

        self.validate_events(num_populations)
    }

    fn validate_events(&self, num_populations: usize) -> Result<(), ConfigError> {
        let mut previous_time = 0.0;
        for (index, event) in self.demographic_events.iter().enumerate() {
            let time = event.time();
            if !time.is_finite() || time < 0.0 {
                return Err(ConfigError::InvalidEventTime { index });
            }
            if time < previous_time {
                return Err(ConfigError::NonMonotoneEventTimes { index });
            }
            previous_time = time;

            let check_population = |population: usize| {
                if population >= num_populations {
                    Err(ConfigError::EventPopulationOutOfRange {
                        index,
                        population,
                        populations: num_populations,
                    })
                } else {
                    Ok(())
                }
            };

            match event {
                DemographicEvent::PopulationParametersChange {
                    population,
                    initial_size,
                    growth_rate,
                    ..
                } => {
                    if let Some(population) = population {
                        check_population(*population)?;
                    }
                    if let Some(size) = initial_size {
                        if !size.is_finite() || *size <= 0.0 {
                            return Err(ConfigError::InvalidEventParameter { index });
                        }
                    }
                    if let Some(growth_rate) = growth_rate {
                        if !growth_rate.is_finite() {
                            return Err(ConfigError::InvalidEventParameter { index });
                        }
                    }
                }
                DemographicEvent::MigrationRateChange {
                    rate, matrix_index, ..
                } => {
                    if !rate.is_finite() || *rate < 0.0 {
                        return Err(ConfigError::InvalidEventParameter { index });
                    }
                    if let Some((i, j)) = matrix_index {
                        check_population(*i)?;
                        check_population(*j)?;
                        if i == j {
                            return Err(ConfigError::MigrationMatrixDiagonal { index: *i });
                        }
                    }
                }
                DemographicEvent::MassMigration {
                    source,
                    destination,
                    proportion,
                    ..
                } => {
                    check_population(*source)?;
                    check_population(*destination)?;
                    if source == destination {
                        return Err(ConfigError::MassMigrationSamePopulation { index });
                    }
                    if !proportion.is_finite() || *proportion < 0.0 || *proportion > 1.0 {
                        return Err(ConfigError::InvalidProportion {
                            index,
                            proportion: *proportion,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Number of populations in the model
    pub fn num_populations(&self) -> usize {
        self.population_configurations
            .as_ref()
            .map_or(1, Vec::len)
            .max(1)
    }

    /// Total number of sampled chromosomes across populations
    pub fn total_sample_size(&self) -> u32 {
        match &self.population_configurations {
            Some(populations) => populations.iter().map(|p| p.sample_size).sum(),
            None => self.sample_size.unwrap_or(0),
        }
    }

    /// Physical length of the simulated genome
    pub fn sequence_length(&self) -> f64 {
        self.recombination_map.sequence_length()
    }

    /// Population of each sample, in node-id order
    pub(crate) fn sample_populations(&self) -> Vec<u32> {
        match &self.population_configurations {
            Some(populations) => populations
                .iter()
                .enumerate()
                .flat_map(|(index, p)| std::iter::repeat(index as u32).take(p.sample_size as usize))
                .collect(),
            None => vec![0; self.sample_size.unwrap_or(0) as usize],
        }
    }

    /// Initial size and growth rate per population, with `Ne` filled in
    pub(crate) fn population_parameters(&self) -> Vec<(f64, f64)> {
        match &self.population_configurations {
            Some(populations) => populations
                .iter()
                .map(|p| (p.initial_size.unwrap_or(self.Ne), p.growth_rate))
                .collect(),
            None => vec![(self.Ne, 0.0)],
        }
    }

    /// Migration matrix with the zero default applied
    pub(crate) fn effective_migration_matrix(&self) -> Vec<Vec<f64>> {
        let d = self.num_populations();
        match &self.migration_matrix {
            Some(matrix) => matrix.clone(),
            None => vec![vec![0.0; d]; d],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ConfigError, DemographicEvent, PopulationConfiguration, SimulationConfig,
        SimulationConfigBuilder,
    };

    fn two_deme_config() -> SimulationConfig {
        SimulationConfigBuilder::default()
            .population_configurations(Some(vec![
                PopulationConfiguration::new(1),
                PopulationConfiguration::new(1),
            ]))
            .migration_matrix(Some(vec![vec![0.0, 0.5], vec![0.5, 0.0]]))
            .build()
            .unwrap()
    }

    #[test]
    fn builder_defaults_validate() {
        let cfg = SimulationConfigBuilder::default()
            .sample_size(Some(2))
            .build()
            .unwrap();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.num_populations(), 1);
        assert_eq!(cfg.total_sample_size(), 2);
        assert_eq!(cfg.sample_populations(), vec![0, 0]);
    }

    #[test]
    fn rejects_conflicting_sample_sources() {
        let mut cfg = two_deme_config();
        cfg.sample_size = Some(2);
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::AmbiguousSampleConfiguration)
        );
    }

    #[test]
    fn rejects_undersized_samples() {
        let cfg = SimulationConfigBuilder::default()
            .sample_size(Some(1))
            .build()
            .unwrap();
        assert_eq!(cfg.validate(), Err(ConfigError::SampleSizeTooSmall { total: 1 }));
    }

    #[test]
    fn rejects_bad_migration_matrices() {
        let mut cfg = two_deme_config();
        cfg.migration_matrix = Some(vec![vec![0.0, 1.0]]);
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::MigrationMatrixShape { expected: 2 })
        );

        let mut cfg = two_deme_config();
        cfg.migration_matrix = Some(vec![vec![0.5, 1.0], vec![1.0, 0.0]]);
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::MigrationMatrixDiagonal { index: 0 })
        );

        let mut cfg = two_deme_config();
        cfg.migration_matrix = Some(vec![vec![0.0, -1.0], vec![1.0, 0.0]]);
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::InvalidMigrationRate { from: 0, to: 1 })
        );
    }

    #[test]
    fn rejects_non_monotone_events() {
        let mut cfg = two_deme_config();
        cfg.demographic_events = vec![
            DemographicEvent::MigrationRateChange {
                time: 10.0,
                rate: 1.0,
                matrix_index: None,
            },
            DemographicEvent::MassMigration {
                time: 5.0,
                source: 0,
                destination: 1,
                proportion: 1.0,
            },
        ];
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::NonMonotoneEventTimes { index: 1 })
        );
    }

    #[test]
    fn rejects_out_of_range_event_populations() {
        let mut cfg = two_deme_config();
        cfg.demographic_events = vec![DemographicEvent::MassMigration {
            time: 1.0,
            source: 0,
            destination: 7,
            proportion: 0.5,
        }];
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::EventPopulationOutOfRange {
                index: 0,
                population: 7,
                populations: 2
            })
        );
    }

    #[test]
    fn rejects_bad_proportions() {
        let mut cfg = two_deme_config();
        cfg.demographic_events = vec![DemographicEvent::MassMigration {
            time: 1.0,
            source: 0,
            destination: 1,
            proportion: 1.5,
        }];
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::InvalidProportion {
                index: 0,
                proportion: 1.5
            })
        );
    }

    #[test]
    fn sample_populations_follow_configuration_order() {
        let cfg = SimulationConfigBuilder::default()
            .population_configurations(Some(vec![
                PopulationConfiguration::new(2),
                PopulationConfiguration::new(3),
            ]))
            .build()
            .unwrap();
        assert_eq!(cfg.sample_populations(), vec![0, 0, 1, 1, 1]);
    }

    #[test]
    fn Ne_fills_in_omitted_population_sizes() {
        let mut populations = vec![PopulationConfiguration::new(2), PopulationConfiguration::new(2)];
        populations[1].initial_size = Some(250.0);
        let cfg = SimulationConfigBuilder::default()
            .Ne(1000.0)
            .population_configurations(Some(populations))
            .build()
            .unwrap();
        assert_eq!(cfg.population_parameters(), vec![(1000.0, 0.0), (250.0, 0.0)]);
    }
}
