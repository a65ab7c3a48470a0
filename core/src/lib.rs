//! A coalescent simulator with recombination and structured, time-varying demography
//!
//! Simulates the ancestry of a sample of chromosomes backward in time, producing a
//! tree sequence: the ordered list of genealogies that apply to successive intervals
//! of the simulated genome. Infinite-sites mutations can then be dropped onto the
//! finished genealogies.

#![warn(missing_docs)]
#![deny(clippy::wildcard_imports)]

pub mod cfg;
pub mod demography;
pub mod io;
pub mod mutgen;
pub mod recomb_map;
pub mod sim;
pub mod treeseq;
