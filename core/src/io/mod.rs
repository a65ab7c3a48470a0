//! Types to handle the output of simulation data and retrieval of encoded metadata and configuration
//! settings

use serde::{Deserialize, Serialize};

mod input_parsing;
mod output;

pub use input_parsing::{extract_sim_config, ReproductionError};
pub use output::{
    BreakpointsOutputter, MutationsOutputter, OutputterGroup, OutputterGroupBuilder,
    RecordsOutputter, SequencingOutputter, SummaryOutputter, TreeSequenceOutputter,
};

/// Type of output to produce
#[derive(Serialize, Deserialize, Copy, Clone)]
enum OutputMode {
    /// Full coalescence-record table per replicate, as CSV
    Records,
    /// Surviving recombination breakpoints per replicate, as CSV
    Breakpoints,
    /// Per-replicate tree-sequence summary statistics, as CSV
    Summary,
    /// Infinite-sites mutations per replicate, as ndjson
    Mutations,
}

/// Tool name stamped into every output header and checked on reproduction
const TOOL_NAME: &str = "coalsim";

/// Information used to mark output files as having been created by a specific
/// version of the simulator
#[derive(Serialize, Deserialize)]
struct Metadata {
    name: String,
    version: String,
    description: String,
    output_mode: OutputMode,
}

impl Metadata {
    /// Construct a new `Metadata` instance based on the current version of the code and the desired
    /// `OutputMode`
    fn new(output_mode: OutputMode) -> Self {
        Self {
            name: TOOL_NAME.to_string(),
            version: get_current_version_str().to_string(),
            description: "coalsim simulation of the coalescent with recombination".to_string(),
            output_mode,
        }
    }
}

/// Get the current version as defined in Cargo.toml
fn get_current_version_str() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
