use anyhow::{anyhow, Context, Result};
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, TimeZone};
use std::fmt::{Display, Write};
use std::path::PathBuf;

const APP_DIR: &str = "voxkeep";

/// Fallback used when a configured timestamp format cannot be rendered.
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H.%M.%S";

pub fn config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR))
        .context("Unable to determine config directory")
}

pub fn config_file() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

pub fn data_dir() -> Result<PathBuf> {
    if let Some(dir) = dirs::data_dir() {
        return Ok(dir.join(APP_DIR));
    }
    if let Some(home) = dirs::home_dir() {
        return Ok(home.join(".local").join("share").join(APP_DIR));
    }
    Err(anyhow!("Unable to determine data directory"))
}

pub fn recordings_dir() -> Result<PathBuf> {
    Ok(data_dir()?.join("recordings"))
}

/// Whether `format` is a strftime pattern chrono can render.
pub fn is_valid_timestamp_format(format: &str) -> bool {
    !format.is_empty() && !StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
}

/// Renders `time` with `format`, falling back to `DEFAULT_TIMESTAMP_FORMAT`
/// instead of panicking on an invalid pattern.
pub fn format_timestamp<Tz>(time: &DateTime<Tz>, format: &str) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let mut rendered = String::new();
    if is_valid_timestamp_format(format) && write!(rendered, "{}", time.format(format)).is_ok() {
        return rendered;
    }
    time.format(DEFAULT_TIMESTAMP_FORMAT).to_string()
}
