//! IO helpers specifically for the CLI portion of the simulator

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter};
use std::path::Path;

use anyhow::{bail, Context, Result};

use coalsim_core::cfg::SimulationConfig;
use coalsim_core::io::{
    extract_sim_config, BreakpointsOutputter, OutputterGroup, OutputterGroupBuilder,
    RecordsOutputter, SequencingOutputter, SummaryOutputter,
};
use coalsim_core::recomb_map::RecombinationMap;

use crate::cfg::CliOutputConfig;

/// Get an `OutputterGroup` to generate output corresponding to the provided configs
pub fn outputter_group_for_cli(
    output_cfg: &CliOutputConfig,
    sim_cfg: &SimulationConfig,
) -> Result<OutputterGroup> {
    let mut builder = OutputterGroupBuilder::default();

    if let Some(path) = &output_cfg.records_output_path {
        builder = builder.tree_sequence_outputter(Box::new(RecordsOutputter::new(
            create_buffered_file(path)?,
            sim_cfg,
        )?));
    }

    if let Some(path) = &output_cfg.breakpoints_output_path {
        builder = builder.tree_sequence_outputter(Box::new(BreakpointsOutputter::new(
            create_buffered_file(path)?,
            sim_cfg,
        )?));
    }

    if let Some(path) = &output_cfg.summary_output_path {
        builder = builder.tree_sequence_outputter(Box::new(SummaryOutputter::new(
            create_buffered_file(path)?,
            output_cfg.summary_cfg.clone(),
            sim_cfg,
        )?));
    }

    if let Some(path) = &output_cfg.mutations_output_path {
        builder = builder.mutation_outputter(Box::new(SequencingOutputter::new(
            create_buffered_file(path)?,
            sim_cfg,
        )?));
    }

    Ok(builder.build()?)
}

/// Buffer capacity to use for files
/// Set at 8 MB
const FILE_BUFFER_CAPACITY: usize = 8 * (1 << 20);

/// Create a buffered `File` to use
fn create_buffered_file<P: AsRef<Path>>(path: P) -> std::io::Result<BufWriter<File>> {
    Ok(BufWriter::with_capacity(
        FILE_BUFFER_CAPACITY,
        File::create(path)?,
    ))
}

/// Extract a `SimulationConfig` stored from a previous run from the file at a given path
pub fn extract_sim_config_from_path<P: AsRef<Path>>(path: P) -> Result<SimulationConfig> {
    File::open(path)
        .map_err(anyhow::Error::from)
        .and_then(extract_sim_config)
}

/// Load a recombination map from a two-column "position rate" text file
///
/// Rates apply from their own line's position to the next line's; the final
/// line's rate is a sentinel and is ignored. A map not anchored at position 0
/// gets a zero-rate leading interval. A single `#`-prefixed or unparseable
/// header line is tolerated.
pub fn load_recombination_map<P: AsRef<Path>>(path: P) -> Result<RecombinationMap> {
    let reader = BufReader::new(
        File::open(&path).with_context(|| format!("opening map file {:?}", path.as_ref()))?,
    );

    let mut positions = Vec::new();
    let mut rates = Vec::new();
    for (line_number, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let mut fields = trimmed.split_whitespace();
        let parsed = (|| -> Option<(f64, f64)> {
            let position = fields.next()?.parse().ok()?;
            let rate = fields.next()?.parse().ok()?;
            Some((position, rate))
        })();

        match parsed {
            Some((position, rate)) => {
                positions.push(position);
                rates.push(rate);
            }
            // Tolerate one header line at the top of the file
            None if positions.is_empty() && line_number == 0 => continue,
            None => bail!("malformed map file line {}: {:?}", line_number + 1, trimmed),
        }
    }

    if positions.is_empty() {
        bail!("map file {:?} contains no intervals", path.as_ref());
    }
    if positions[0] > 0.0 {
        positions.insert(0, 0.0);
        rates.insert(0, 0.0);
    }

    Ok(RecombinationMap::new(positions, rates)?)
}
