pub mod args;
pub mod config;
pub mod consent;
pub mod convert;
pub mod inspect;
pub mod sessions;

use anyhow::Result;
use std::path::Path;

pub use args::{Cli, CliCommand};
pub use config::handle_config_command;
pub use consent::handle_consent_command;
pub use convert::handle_convert_command;
pub use inspect::handle_inspect_command;
pub use sessions::{handle_prune_command, handle_sessions_command};

/// Loads `path` if given, otherwise the default config file.
pub fn load_config(path: Option<&Path>) -> Result<crate::config::Config> {
    match path {
        Some(path) => crate::config::Config::load_from(path),
        None => crate::config::Config::load(),
    }
}
