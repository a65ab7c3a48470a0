//! Recovery of simulation settings embedded in previous outputs
//!
//! Every output file begins with a short header carrying the tool metadata
//! and the full `SimulationConfig` as JSON, one line each. Reading those
//! lines back is what lets a finished run be reproduced exactly, seed and
//! all, so the recovered configuration is held to the same standard as a
//! fresh one: wrong tool, wrong version, or a config that no longer passes
//! validation all refuse reproduction up front.

use std::io::{BufRead, BufReader, Read};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::cfg::{ConfigError, SimulationConfig};

use crate::io::{get_current_version_str, Metadata, TOOL_NAME};

/// Leading lines that may hold header material before recovery gives up
///
/// Two JSON lines (metadata, then configuration) plus slack for blank lines.
const MAX_HEADER_LINES: usize = 4;

/// An error raised while recovering a configuration from a previous output
#[derive(Error, Debug)]
pub enum ReproductionError {
    /// The file does not begin with the expected header lines
    #[error("input is missing the simulation header lines")]
    MissingHeaders,
    /// The file was produced by some other tool
    #[error("input was produced by {name:?}, not by this simulator")]
    ForeignOutput {
        /// Tool name found in the header
        name: String,
    },
    /// The file was produced by an incompatible simulator version
    #[error("input is from incompatible simulator version {version}")]
    IncompatibleVersion {
        /// Version found in the header
        version: String,
    },
    /// The embedded configuration no longer passes validation
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Recover the `SimulationConfig` a previous output was produced with
///
/// Accepts the header of any output mode: the `# ` comment prefix the CSV
/// outputs carry is stripped, the bare JSON lines of the ndjson outputs pass
/// through as-is. The embedded configuration is re-validated before it is
/// handed back, so a recovered run can only fail for runtime reasons, exactly
/// like a fresh one.
pub fn extract_sim_config<R: Read>(source: R) -> Result<SimulationConfig> {
    let reader = BufReader::new(source);
    let mut lines = reader
        .lines()
        .take(MAX_HEADER_LINES)
        .filter(|line| !matches!(line, Ok(line) if line.trim().is_empty()));

    let metadata: Metadata =
        parse_header_line(&mut lines).context("reading the metadata header")?;
    if metadata.name != TOOL_NAME {
        return Err(ReproductionError::ForeignOutput {
            name: metadata.name,
        }
        .into());
    }
    if metadata.version != get_current_version_str() {
        return Err(ReproductionError::IncompatibleVersion {
            version: metadata.version,
        }
        .into());
    }

    let config: SimulationConfig =
        parse_header_line(&mut lines).context("reading the configuration header")?;
    config.validate().map_err(ReproductionError::from)?;
    Ok(config)
}

/// Parse the next header line as JSON, tolerating a `# ` comment prefix
fn parse_header_line<T, I>(lines: &mut I) -> Result<T>
where
    T: DeserializeOwned,
    I: Iterator<Item = std::io::Result<String>>,
{
    let line = lines.next().ok_or(ReproductionError::MissingHeaders)??;
    let payload = line.strip_prefix("# ").unwrap_or(&line);
    Ok(serde_json::from_str(payload)?)
}
