//! CLI handler for showing the effective configuration.

use anyhow::{Context, Result};

use super::args::ConfigCliArgs;
use crate::config::Config;
use crate::global;

pub fn handle_config_command(args: ConfigCliArgs, config: &Config) -> Result<()> {
    if args.path {
        println!("{}", global::config_file()?.display());
        return Ok(());
    }

    let rendered = toml::to_string_pretty(config).context("Failed to serialize config")?;
    println!("{}", rendered);

    if let Err(e) = config.validate() {
        println!("# warning: {}", e);
    }
    Ok(())
}
