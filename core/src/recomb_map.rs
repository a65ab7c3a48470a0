//! Piecewise-constant map between physical and genetic coordinates
//!
//! The map is defined by strictly increasing `positions[0..=k]` starting at 0
//! and per-base crossover rates `rates[0..k]`, one per interval. Genetic
//! distance accumulates linearly inside each interval, so both directions of
//! the lookup are a binary search plus a linear interpolation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An error raised while building a recombination map
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecombinationMapError {
    /// The map was given no intervals at all
    #[error("recombination map must contain at least one interval")]
    Empty,
    /// The first position must anchor the map at the origin
    #[error("recombination map must start at position 0, found {found}")]
    DoesNotStartAtZero {
        /// First position actually supplied
        found: f64,
    },
    /// Positions must strictly increase
    #[error("recombination map positions must be strictly increasing at index {index}")]
    NotIncreasing {
        /// Index of the offending position
        index: usize,
    },
    /// One rate per interval (a trailing sentinel rate is tolerated)
    #[error("expected {expected} interval rates, found {found}")]
    RateCountMismatch {
        /// Number of rates the positions imply
        expected: usize,
        /// Number of rates supplied
        found: usize,
    },
    /// Rates must be finite and non-negative
    #[error("recombination rate at index {index} is negative or not finite")]
    InvalidRate {
        /// Index of the offending rate
        index: usize,
    },
    /// A zero-length genome cannot be simulated
    #[error("recombination map covers a zero-length genome")]
    ZeroLengthGenome,
}

/// Serialized form of a map: just the two defining columns
#[derive(Serialize, Deserialize)]
struct MapColumns {
    positions: Vec<f64>,
    rates: Vec<f64>,
}

/// Map from physical position to cumulative genetic distance and back
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MapColumns", into = "MapColumns")]
pub struct RecombinationMap {
    positions: Vec<f64>,
    rates: Vec<f64>,
    /// Cumulative genetic distance at each position, same length as `positions`
    cumulative: Vec<f64>,
}

impl RecombinationMap {
    /// Build a map from interval boundaries and per-interval rates
    ///
    /// `positions` must start at 0 and strictly increase; `rates` must hold one
    /// entry per interval. A trailing sentinel rate (one extra entry) is
    /// accepted and ignored.
    pub fn new(positions: Vec<f64>, mut rates: Vec<f64>) -> Result<Self, RecombinationMapError> {
        if positions.len() < 2 {
            return Err(RecombinationMapError::Empty);
        }
        if positions[0] != 0.0 {
            return Err(RecombinationMapError::DoesNotStartAtZero {
                found: positions[0],
            });
        }
        for (index, pair) in positions.windows(2).enumerate() {
            if !(pair[1] > pair[0]) || !pair[1].is_finite() {
                return Err(RecombinationMapError::NotIncreasing { index: index + 1 });
            }
        }

        let num_intervals = positions.len() - 1;
        if rates.len() == num_intervals + 1 {
            rates.pop();
        }
        if rates.len() != num_intervals {
            return Err(RecombinationMapError::RateCountMismatch {
                expected: num_intervals,
                found: rates.len(),
            });
        }
        for (index, rate) in rates.iter().enumerate() {
            if !rate.is_finite() || *rate < 0.0 {
                return Err(RecombinationMapError::InvalidRate { index });
            }
        }

        let mut cumulative = Vec::with_capacity(positions.len());
        cumulative.push(0.0);
        for (i, rate) in rates.iter().enumerate() {
            let span = positions[i + 1] - positions[i];
            cumulative.push(cumulative[i] + span * rate);
        }

        Ok(Self {
            positions,
            rates,
            cumulative,
        })
    }

    /// Uniform map: a single interval `[0, length)` at `rate` per base
    pub fn uniform(length: f64, rate: f64) -> Result<Self, RecombinationMapError> {
        if !(length > 0.0) || !length.is_finite() {
            return Err(RecombinationMapError::ZeroLengthGenome);
        }
        Self::new(vec![0.0, length], vec![rate])
    }

    /// Physical length of the mapped genome
    pub fn sequence_length(&self) -> f64 {
        *self.positions.last().expect("validated map")
    }

    /// Genetic length of the whole genome
    pub fn total_genetic_length(&self) -> f64 {
        *self.cumulative.last().expect("validated map")
    }

    /// Number of constant-rate intervals
    pub fn num_intervals(&self) -> usize {
        self.rates.len()
    }

    /// Interval boundaries defining the map
    pub fn positions(&self) -> &[f64] {
        &self.positions
    }

    /// Per-base rate within each interval
    pub fn rates(&self) -> &[f64] {
        &self.rates
    }

    /// Cumulative genetic distance at physical position `x`
    ///
    /// Monotone non-decreasing; `x` must lie in `[0, sequence_length()]`.
    pub fn physical_to_genetic(&self, x: f64) -> f64 {
        assert!(
            x >= 0.0 && x <= self.sequence_length(),
            "physical position outside the mapped genome"
        );
        let bin = self.positions.partition_point(|p| *p <= x).max(1) - 1;
        let bin = bin.min(self.rates.len() - 1);
        self.cumulative[bin] + (x - self.positions[bin]) * self.rates[bin]
    }

    /// Physical position at cumulative genetic distance `g`
    ///
    /// Inverse of [`Self::physical_to_genetic`]; `g` must lie in
    /// `[0, total_genetic_length()]` and the map must have positive total
    /// genetic length.
    pub fn genetic_to_physical(&self, g: f64) -> f64 {
        assert!(
            self.total_genetic_length() > 0.0,
            "inverse lookup on a genetically empty map"
        );
        assert!(
            g >= 0.0 && g <= self.total_genetic_length(),
            "genetic position outside the mapped genome"
        );
        if g == 0.0 {
            return self.positions[0];
        }
        // First boundary at or past g; the bin before it gained mass, so its
        // rate is positive
        let bound = self.cumulative.partition_point(|c| *c < g);
        let bin = bound.max(1) - 1;
        self.positions[bin] + (g - self.cumulative[bin]) / self.rates[bin]
    }
}

impl Default for RecombinationMap {
    /// Unit-length genome with no recombination
    fn default() -> Self {
        Self::uniform(1.0, 0.0).expect("unit map is valid")
    }
}

impl TryFrom<MapColumns> for RecombinationMap {
    type Error = RecombinationMapError;

    fn try_from(columns: MapColumns) -> Result<Self, Self::Error> {
        Self::new(columns.positions, columns.rates)
    }
}

impl From<RecombinationMap> for MapColumns {
    fn from(map: RecombinationMap) -> Self {
        Self {
            positions: map.positions,
            rates: map.rates,
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    use super::{RecombinationMap, RecombinationMapError};

    fn variable_map() -> RecombinationMap {
        RecombinationMap::new(
            vec![0.0, 10.0, 20.0, 35.0, 50.0],
            vec![0.5, 0.0, 2.0, 0.25],
        )
        .unwrap()
    }

    #[test]
    fn rejects_malformed_maps() {
        assert_eq!(
            RecombinationMap::new(vec![0.0], vec![]),
            Err(RecombinationMapError::Empty)
        );
        assert_eq!(
            RecombinationMap::new(vec![1.0, 2.0], vec![0.1]),
            Err(RecombinationMapError::DoesNotStartAtZero { found: 1.0 })
        );
        assert_eq!(
            RecombinationMap::new(vec![0.0, 2.0, 2.0], vec![0.1, 0.1]),
            Err(RecombinationMapError::NotIncreasing { index: 2 })
        );
        assert_eq!(
            RecombinationMap::new(vec![0.0, 1.0, 2.0], vec![0.1]),
            Err(RecombinationMapError::RateCountMismatch {
                expected: 2,
                found: 1
            })
        );
        assert_eq!(
            RecombinationMap::new(vec![0.0, 1.0], vec![-0.5]),
            Err(RecombinationMapError::InvalidRate { index: 0 })
        );
        assert_eq!(
            RecombinationMap::uniform(0.0, 1.0),
            Err(RecombinationMapError::ZeroLengthGenome)
        );
    }

    #[test]
    fn trailing_sentinel_rate_is_ignored() {
        let map = RecombinationMap::new(vec![0.0, 5.0, 10.0], vec![1.0, 2.0, 0.0]).unwrap();
        assert_eq!(map.num_intervals(), 2);
        assert_relative_eq!(map.total_genetic_length(), 15.0);
    }

    #[test]
    fn uniform_map_matches_closed_form() {
        let rate = 0.3;
        let map = RecombinationMap::uniform(100.0, rate).unwrap();
        for x in [0.0, 1.0, 17.25, 50.0, 99.999, 100.0] {
            assert_relative_eq!(map.physical_to_genetic(x), rate * x, max_relative = 1e-12);
        }
        for g in [0.0, 3.0, 12.5, 29.9999, 30.0] {
            assert_relative_eq!(map.genetic_to_physical(g), g / rate, max_relative = 1e-12);
        }
    }

    #[test]
    fn forward_lookup_accumulates_per_interval() {
        let map = variable_map();
        assert_relative_eq!(map.physical_to_genetic(0.0), 0.0);
        assert_relative_eq!(map.physical_to_genetic(10.0), 5.0);
        // Flat interval adds nothing
        assert_relative_eq!(map.physical_to_genetic(15.0), 5.0);
        assert_relative_eq!(map.physical_to_genetic(20.0), 5.0);
        assert_relative_eq!(map.physical_to_genetic(30.0), 25.0);
        assert_relative_eq!(map.total_genetic_length(), 5.0 + 30.0 + 3.75);
    }

    #[test]
    fn round_trip_within_positive_rate_intervals() {
        let map = variable_map();
        let total = map.total_genetic_length();
        for i in 1..200 {
            let g = total * (i as f64) / 200.0;
            let x = map.genetic_to_physical(g);
            assert!(x >= 0.0 && x <= map.sequence_length());
            assert_abs_diff_eq!(map.physical_to_genetic(x), g, epsilon = 1e-9);
        }
    }

    #[test]
    fn inverse_lookup_skips_flat_intervals() {
        let map = variable_map();
        // Genetic mass 5.0 is reached at position 10 and holds through the flat
        // interval; the inverse must not land inside it for any g > 5
        let x = map.genetic_to_physical(5.0 + 1e-9);
        assert!(x >= 20.0);
    }

    #[test]
    fn survives_serde_round_trip() {
        let map = variable_map();
        let encoded = serde_json::to_string(&map).unwrap();
        let decoded: RecombinationMap = serde_json::from_str(&encoded).unwrap();
        assert_eq!(map, decoded);
    }
}
