use clap::Parser;

use coalsim_cli::{run_cli_config, CliConfig};

/// Gather the configuration options and run the CLI
fn main() {
    run_cli_config(CliConfig::parse());
}
