//! Implementations of the individual outputters

use std::io::Write;

use anyhow::Result;
use itertools::Itertools;
use serde_tuple::Serialize_tuple;

use crate::cfg::{SimulationConfig, SummaryOutputConfig};
use crate::mutgen::Mutation;
use crate::sim::summarize;
use crate::treeseq::TreeSequence;

use crate::io::OutputMode;

use crate::io::output::{
    initialize_output, initialize_output_as_csv, MutationsOutputter, TreeSequenceOutputter,
    EMPTY_CSV_RECORD,
};

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
// SummaryOutputter
////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// Type which outputs data for the `Summary` `OutputMode`
pub struct SummaryOutputter<W: Write> {
    /// Buffered csv file writer to write data into
    writer: csv::Writer<W>,
    /// What summary stats to output
    cfg: SummaryOutputConfig,
}

/// Create helper methods to get rid of repetitive typing of operations on stats in the
/// SummaryOutputter methods
///
/// Using this as a single macro with functions rather than separate macros ensures the order of the
/// stats is consistent, which we need it to be
macro_rules! summary_outputter_create_stats_helpers {
    ($($stat:ident),+ $(,)?) => {
        impl<W: Write> SummaryOutputter<W> {
            /// Push labels for enabled stats to the end of headers in proper order
            fn push_enabled_stat_headers(cfg: &SummaryOutputConfig, headers: &mut Vec<&str>) {
                $(
                    if cfg.$stat {
                        headers.push(stringify!($stat));
                    }
                )+
            }

            /// Write the CSV fields for enabled stats in proper order
            fn write_enabled_stat_fields(&mut self, ts: &TreeSequence) -> Result<()> {
                $(
                    if self.cfg.$stat {
                        self.writer.write_field(format!("{}", summarize::$stat(ts)))?;
                    }
                )+

                Ok(())
            }
        }

        // Verify that all available statistics are accounted for in the macro invocation
        // Struct isn't actually used for anything but all fields must be supplied
        const _: () = {
            SummaryOutputConfig {
                $($stat: false),+
            };
        };
    }
}

summary_outputter_create_stats_helpers! {
    num_trees,
    num_records,
    num_nodes,
    num_breakpoints,
    max_root_time,
    mean_root_time,
    total_branch_length,
}

impl<W: Write> SummaryOutputter<W> {
    /// Create a new `SummaryOutputter` from options in a `SummaryOutputConfig` and `SimulationConfig`
    ///
    /// Writes header data to the underlying `writer`
    pub fn new(
        writer: W,
        summary_cfg: SummaryOutputConfig,
        sim_cfg: &SimulationConfig,
    ) -> Result<Self> {
        let mut writer = initialize_output_as_csv(writer, sim_cfg, OutputMode::Summary)?;

        // Header must be done manually for how we handle the output
        let mut header = vec!["replicate"];
        Self::push_enabled_stat_headers(&summary_cfg, &mut header);
        writer.write_record(header)?;

        Ok(Self {
            writer,
            cfg: summary_cfg,
        })
    }

    /// Consume the outputter and get back the underlying `writer`
    ///
    /// Will not necessarily flush the writer
    pub fn into_inner(self) -> Result<W, csv::IntoInnerError<csv::Writer<W>>> {
        self.writer.into_inner()
    }
}

impl<W: Write> TreeSequenceOutputter for SummaryOutputter<W> {
    fn record_tree_sequence(&mut self, replicate: u32, ts: &TreeSequence) -> Result<()> {
        self.writer.write_field(replicate.to_string())?;
        self.write_enabled_stat_fields(ts)?;
        self.writer.write_record(EMPTY_CSV_RECORD)?;

        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
// RecordsOutputter
////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// Type which outputs data for the `Records` `OutputMode`: the full coalescence
/// record table of every replicate
pub struct RecordsOutputter<W: Write> {
    /// CSV writer to write data into
    writer: csv::Writer<W>,
}

impl<W: Write> RecordsOutputter<W> {
    /// Create a new `RecordsOutputter` from a `SimulationConfig`
    ///
    /// Writes header data to the underlying `writer`
    pub fn new(writer: W, sim_cfg: &SimulationConfig) -> Result<Self> {
        let mut writer = initialize_output_as_csv(writer, sim_cfg, OutputMode::Records)?;

        let header = vec![
            "replicate",
            "left",
            "right",
            "parent",
            "children",
            "time",
            "population",
        ];
        writer.write_record(header)?;

        Ok(Self { writer })
    }

    /// Consume the outputter and get back the underlying `writer`
    ///
    /// Will not necessarily flush the writer
    pub fn into_inner(self) -> Result<W, csv::IntoInnerError<csv::Writer<W>>> {
        self.writer.into_inner()
    }
}

impl<W: Write> TreeSequenceOutputter for RecordsOutputter<W> {
    fn record_tree_sequence(&mut self, replicate: u32, ts: &TreeSequence) -> Result<()> {
        for record in ts.records() {
            self.writer.serialize((
                replicate,
                record.left,
                record.right,
                record.parent,
                record.children.iter().join(";"),
                record.time,
                record.population,
            ))?;
        }

        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
// BreakpointsOutputter
////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// Type which outputs data for the `Breakpoints` `OutputMode`: the surviving
/// recombination breakpoints of every replicate
pub struct BreakpointsOutputter<W: Write> {
    /// CSV writer to write data into
    writer: csv::Writer<W>,
}

impl<W: Write> BreakpointsOutputter<W> {
    /// Create a new `BreakpointsOutputter` from a `SimulationConfig`
    ///
    /// Writes header data to the underlying `writer`
    pub fn new(writer: W, sim_cfg: &SimulationConfig) -> Result<Self> {
        let mut writer = initialize_output_as_csv(writer, sim_cfg, OutputMode::Breakpoints)?;
        writer.write_record(vec!["replicate", "position"])?;

        Ok(Self { writer })
    }

    /// Consume the outputter and get back the underlying `writer`
    ///
    /// Will not necessarily flush the writer
    pub fn into_inner(self) -> Result<W, csv::IntoInnerError<csv::Writer<W>>> {
        self.writer.into_inner()
    }
}

impl<W: Write> TreeSequenceOutputter for BreakpointsOutputter<W> {
    fn record_tree_sequence(&mut self, replicate: u32, ts: &TreeSequence) -> Result<()> {
        for position in ts.breakpoints() {
            self.writer.serialize((replicate, position))?;
        }

        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
// SequencingOutputter
////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// Type which outputs data for the `Mutations` `OutputMode`: every generated
/// infinite-sites mutation, as ndjson
pub struct SequencingOutputter<W: Write> {
    /// Buffered file writer to write data into
    writer: W,
}

impl<W: Write> SequencingOutputter<W> {
    /// Create a new `SequencingOutputter` from a `SimulationConfig`
    ///
    /// Writes header data to the underlying `writer`
    pub fn new(mut writer: W, sim_cfg: &SimulationConfig) -> Result<Self> {
        initialize_output(&mut writer, sim_cfg, OutputMode::Mutations, "")?;

        Ok(Self { writer })
    }

    /// Consume the outputter and get back the underlying `writer`
    ///
    /// Will not necessarily flush the writer
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> MutationsOutputter for SequencingOutputter<W> {
    fn record_mutations(&mut self, replicate: u32, mutations: &[Mutation]) -> Result<()> {
        for mutation in mutations {
            let row = SequencingOutputterRecord {
                r: replicate,
                position: mutation.position,
                node: mutation.node,
            };
            serde_json::to_writer(&mut self.writer, &row)?;
            // Separate from next record to be written
            writeln!(&mut self.writer)?;
        }

        Ok(())
    }
}

/// Record used by `SequencingOutputter` for serialization
#[derive(Serialize_tuple)]
struct SequencingOutputterRecord {
    /// Replicate
    r: u32,
    /// Mutation position
    position: f64,
    /// Node under the mutated branch
    node: u32,
}
