//! Inspection of a demographic model before simulating it
//!
//! The debugger replays the scheduled events on a copy of the population
//! parameters and splits time into epochs at the distinct event times, so a
//! model can be checked by eye (or by test) without running the engine.

use std::fmt;

use crate::cfg::{ConfigError, DemographicEvent, SimulationConfig};

/// Population parameters in force during one epoch
#[derive(Clone, Debug, PartialEq)]
pub struct EpochPopulation {
    /// Size at the epoch's start time
    pub start_size: f64,
    /// Size at the epoch's end time (equal to `start_size` without growth)
    pub end_size: f64,
    /// Growth rate in force during the epoch
    pub growth_rate: f64,
}

/// One maximal stretch of time with constant demographic parameters
#[derive(Clone, Debug, PartialEq)]
pub struct Epoch {
    /// Epoch start time in generations
    pub start_time: f64,
    /// Epoch end time, `f64::INFINITY` for the final epoch
    pub end_time: f64,
    /// Per-population parameters during the epoch
    pub populations: Vec<EpochPopulation>,
    /// Migration matrix in force during the epoch
    pub migration_matrix: Vec<Vec<f64>>,
}

/// Epoch-by-epoch view of a configuration's demographic model
#[derive(Clone, Debug)]
pub struct DemographyDebugger {
    epochs: Vec<Epoch>,
}

/// Size and growth anchored at a reference time; mirrors how the engine
/// re-anchors population parameters when an event fires
#[derive(Clone, Copy)]
struct AnchoredPopulation {
    size: f64,
    growth_rate: f64,
    start_time: f64,
}

impl AnchoredPopulation {
    fn size_at(&self, t: f64) -> f64 {
        self.size * (-self.growth_rate * (t - self.start_time)).exp()
    }
}

impl DemographyDebugger {
    /// Build the epoch table for `cfg`
    ///
    /// Validates the configuration first, so the debugger can be used as a
    /// pre-flight check.
    pub fn new(cfg: &SimulationConfig) -> Result<Self, ConfigError> {
        cfg.validate()?;

        let mut populations: Vec<AnchoredPopulation> = cfg
            .population_parameters()
            .into_iter()
            .map(|(size, growth_rate)| AnchoredPopulation {
                size,
                growth_rate,
                start_time: 0.0,
            })
            .collect();
        let mut migration_matrix = cfg.effective_migration_matrix();

        let mut boundaries: Vec<f64> = cfg
            .demographic_events
            .iter()
            .map(DemographicEvent::time)
            .collect();
        boundaries.dedup();

        let mut epochs = Vec::with_capacity(boundaries.len() + 1);
        let mut event_iter = cfg.demographic_events.iter().peekable();
        let mut start_time = 0.0;

        for boundary in boundaries.into_iter().chain(std::iter::once(f64::INFINITY)) {
            if boundary > start_time {
                epochs.push(Self::epoch(
                    start_time,
                    boundary,
                    &populations,
                    &migration_matrix,
                ));
                start_time = boundary;
            }
            while let Some(event) = event_iter.peek() {
                if event.time() > boundary {
                    break;
                }
                Self::apply(event_iter.next().expect("peeked"), &mut populations, &mut migration_matrix);
            }
        }

        Ok(Self { epochs })
    }

    /// The computed epochs, earliest first
    pub fn epochs(&self) -> &[Epoch] {
        &self.epochs
    }

    /// The epoch boundary times: every distinct scheduled event time
    pub fn epoch_boundaries(&self) -> Vec<f64> {
        self.epochs[1..].iter().map(|e| e.start_time).collect()
    }

    fn epoch(
        start_time: f64,
        end_time: f64,
        populations: &[AnchoredPopulation],
        migration_matrix: &[Vec<f64>],
    ) -> Epoch {
        Epoch {
            start_time,
            end_time,
            populations: populations
                .iter()
                .map(|p| EpochPopulation {
                    start_size: p.size_at(start_time),
                    end_size: if end_time.is_finite() {
                        p.size_at(end_time)
                    } else if p.growth_rate == 0.0 {
                        p.size_at(start_time)
                    } else if p.growth_rate > 0.0 {
                        0.0
                    } else {
                        f64::INFINITY
                    },
                    growth_rate: p.growth_rate,
                })
                .collect(),
            migration_matrix: migration_matrix.to_vec(),
        }
    }

    fn apply(
        event: &DemographicEvent,
        populations: &mut [AnchoredPopulation],
        migration_matrix: &mut [Vec<f64>],
    ) {
        match event {
            DemographicEvent::PopulationParametersChange {
                time,
                population,
                initial_size,
                growth_rate,
            } => {
                let targets: Vec<usize> = match population {
                    Some(p) => vec![*p],
                    None => (0..populations.len()).collect(),
                };
                for target in targets {
                    let p = &mut populations[target];
                    p.size = initial_size.unwrap_or_else(|| p.size_at(*time));
                    if let Some(growth_rate) = growth_rate {
                        p.growth_rate = *growth_rate;
                    }
                    p.start_time = *time;
                }
            }
            DemographicEvent::MigrationRateChange {
                rate, matrix_index, ..
            } => match matrix_index {
                Some((i, j)) => migration_matrix[*i][*j] = *rate,
                None => {
                    for i in 0..migration_matrix.len() {
                        for j in 0..migration_matrix.len() {
                            if i != j {
                                migration_matrix[i][j] = *rate;
                            }
                        }
                    }
                }
            },
            // Mass migrations move lineages, not parameters; they still mark
            // an epoch boundary
            DemographicEvent::MassMigration { .. } => {}
        }
    }
}

impl fmt::Display for DemographyDebugger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, epoch) in self.epochs.iter().enumerate() {
            writeln!(
                f,
                "Epoch {}: [{} .. {}) generations",
                index, epoch.start_time, epoch.end_time
            )?;
            writeln!(f, "  population  start_size    end_size  growth_rate")?;
            for (p, pop) in epoch.populations.iter().enumerate() {
                writeln!(
                    f,
                    "  {:>10}  {:>10.4}  {:>10.4}  {:>11.3e}",
                    p, pop.start_size, pop.end_size, pop.growth_rate
                )?;
            }
            writeln!(f, "  migration matrix:")?;
            for row in &epoch.migration_matrix {
                write!(f, "   ")?;
                for rate in row {
                    write!(f, " {:>8.4}", rate)?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::cfg::{DemographicEvent, PopulationConfiguration, SimulationConfigBuilder};

    use super::DemographyDebugger;

    #[test]
    fn single_population_has_one_epoch() {
        let cfg = SimulationConfigBuilder::default()
            .sample_size(Some(2))
            .Ne(500.0)
            .build()
            .unwrap();
        let debugger = DemographyDebugger::new(&cfg).unwrap();
        assert_eq!(debugger.epochs().len(), 1);
        assert!(debugger.epoch_boundaries().is_empty());
        let epoch = &debugger.epochs()[0];
        assert_eq!(epoch.start_time, 0.0);
        assert!(epoch.end_time.is_infinite());
        assert_eq!(epoch.populations[0].start_size, 500.0);
    }

    #[test]
    fn boundaries_match_scheduled_event_times() {
        let cfg = SimulationConfigBuilder::default()
            .population_configurations(Some(vec![
                PopulationConfiguration::new(1),
                PopulationConfiguration::new(1),
            ]))
            .migration_matrix(Some(vec![vec![0.0, 0.1], vec![0.1, 0.0]]))
            .demographic_events(vec![
                DemographicEvent::PopulationParametersChange {
                    time: 50.0,
                    population: Some(0),
                    initial_size: Some(10.0),
                    growth_rate: None,
                },
                DemographicEvent::MigrationRateChange {
                    time: 50.0,
                    rate: 0.0,
                    matrix_index: None,
                },
                DemographicEvent::MassMigration {
                    time: 120.0,
                    source: 1,
                    destination: 0,
                    proportion: 1.0,
                },
            ])
            .build()
            .unwrap();

        let debugger = DemographyDebugger::new(&cfg).unwrap();
        assert_eq!(debugger.epoch_boundaries(), vec![50.0, 120.0]);
        assert_eq!(debugger.epochs().len(), 3);

        // Both t=50 events are folded into the second epoch's parameters
        let second = &debugger.epochs()[1];
        assert_eq!(second.populations[0].start_size, 10.0);
        assert_eq!(second.migration_matrix[0][1], 0.0);
        assert_eq!(second.migration_matrix[1][0], 0.0);
    }

    #[test]
    fn growth_shrinks_sizes_across_an_epoch() {
        let mut population = PopulationConfiguration::new(2);
        population.initial_size = Some(1000.0);
        population.growth_rate = 0.01;
        let cfg = SimulationConfigBuilder::default()
            .population_configurations(Some(vec![population]))
            .demographic_events(vec![DemographicEvent::PopulationParametersChange {
                time: 100.0,
                population: Some(0),
                initial_size: None,
                growth_rate: Some(0.0),
            }])
            .build()
            .unwrap();

        let debugger = DemographyDebugger::new(&cfg).unwrap();
        let first = &debugger.epochs()[0];
        assert_eq!(first.populations[0].start_size, 1000.0);
        assert!(first.populations[0].end_size < 1000.0);

        // Growth stops at t=100; the last epoch is flat at the carried size
        let last = &debugger.epochs()[1];
        assert_eq!(last.populations[0].growth_rate, 0.0);
        assert_eq!(last.populations[0].start_size, last.populations[0].end_size);
        assert!((last.populations[0].start_size - first.populations[0].end_size).abs() < 1e-9);
    }
}
