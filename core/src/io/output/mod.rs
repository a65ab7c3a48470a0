//! Output tools for finished tree sequences

use std::io::Write;

use anyhow::Result;
use derive_builder::Builder;

use crate::cfg::SimulationConfig;
use crate::mutgen::Mutation;
use crate::treeseq::TreeSequence;

use crate::io::{Metadata, OutputMode};

mod outputter_impls;

pub use outputter_impls::{
    BreakpointsOutputter, RecordsOutputter, SequencingOutputter, SummaryOutputter,
};

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
// OutputterGroup
////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// A handler which broadcasts recording functions to a group of underlying outputters
#[allow(missing_docs)] // Builder will not have doc comment
#[derive(Builder)]
#[builder(pattern = "owned")]
pub struct OutputterGroup {
    /// Outputters consuming each replicate's tree sequence
    #[builder(setter(each(name = "tree_sequence_outputter")), default)]
    tree_sequence_outputters: Vec<Box<dyn TreeSequenceOutputter>>,
    /// Outputters consuming each replicate's generated mutations
    #[builder(setter(each(name = "mutation_outputter")), default)]
    mutations_outputters: Vec<Box<dyn MutationsOutputter>>,
}

impl OutputterGroup {
    /// Record a finished replicate's tree sequence in all of the managed
    /// `TreeSequenceOutputter`s
    pub fn record_tree_sequence(&mut self, replicate: u32, ts: &TreeSequence) -> Result<()> {
        for outputter in &mut self.tree_sequence_outputters {
            outputter.record_tree_sequence(replicate, ts)?;
        }
        Ok(())
    }

    /// Record a replicate's generated mutations in all of the managed
    /// `MutationsOutputter`s
    pub fn record_mutations(&mut self, replicate: u32, mutations: &[Mutation]) -> Result<()> {
        for outputter in &mut self.mutations_outputters {
            outputter.record_mutations(replicate, mutations)?;
        }
        Ok(())
    }

    /// Whether any managed outputter consumes mutations
    pub fn wants_mutations(&self) -> bool {
        !self.mutations_outputters.is_empty()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
// Traits
////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// An outputter that can record a finished tree sequence
pub trait TreeSequenceOutputter {
    /// Record the data in `ts` for a specific replicate
    fn record_tree_sequence(&mut self, replicate: u32, ts: &TreeSequence) -> Result<()>;
}

/// An outputter that can record generated mutations
pub trait MutationsOutputter {
    /// Record `mutations` for a specific replicate
    fn record_mutations(&mut self, replicate: u32, mutations: &[Mutation]) -> Result<()>;
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
// Utils
////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// Output `Metadata` and `SimulationConfig` options into a header using provided `writer`
///
/// Allow an optional prefix for lines of the header (e.g. for comments)
fn initialize_output<W: Write>(
    writer: &mut W,
    sim_cfg: &SimulationConfig,
    output_mode: OutputMode,
    header_prefix: &'static str,
) -> Result<()> {
    // Write the metadata to the file with optional comment character
    write!(writer, "{}", header_prefix)?;
    let metadata = Metadata::new(output_mode);
    serde_json::to_writer(writer.by_ref(), &metadata)?;
    writeln!(writer)?;

    // Write the simulation configuration to the file with optional comment character
    write!(writer, "{}", header_prefix)?;
    serde_json::to_writer(writer.by_ref(), sim_cfg)?;
    writeln!(writer)?;

    Ok(())
}

/// Header-writing helper for the reproduction round-trip tests
#[cfg(test)]
pub(crate) fn initialize_output_for_test<W: Write>(
    writer: &mut W,
    sim_cfg: &SimulationConfig,
) -> Result<()> {
    initialize_output(writer, sim_cfg, OutputMode::Records, "# ")
}

/// Manually moving onto the next record in the `csv` crate requires writing an empty record
const EMPTY_CSV_RECORD: [&[u8]; 0] = [];

/// Buffer capacity to use for CSV writer
///
/// Set at 128 KB
const CSV_BUFFER_CAPACITY: usize = 128 * (1 << 10);

/// Initialize a `writer` as described in `initialize_output` and get a `csv::Writer` over the
/// underlying `writer`
fn initialize_output_as_csv<W: Write>(
    mut writer: W,
    sim_cfg: &SimulationConfig,
    output_mode: OutputMode,
) -> Result<csv::Writer<W>> {
    initialize_output(&mut writer, sim_cfg, output_mode, "# ")?;

    Ok(csv::WriterBuilder::new()
        .buffer_capacity(CSV_BUFFER_CAPACITY)
        .from_writer(writer))
}
