// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{CellConfig, RawCellConfig};
use crate::errors::Result;

/// Load a layout file from a given path and return the raw `RawCellConfig`.
///
/// This only performs TOML deserialization; it does **not** check the tier
/// graph. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawCellConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    debug!(path = %path.display(), "loaded cell config");

    let config: RawCellConfig = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a layout file from path and validate it.
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks for:
///   - unknown or self-referencing `source`s,
///   - tiers feeding more than one consumer,
///   - cycles in the tier graph,
///   - zero `batch_size` / `concurrency`.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<CellConfig> {
    let raw_config = load_from_path(&path)?;
    let config = CellConfig::try_from(raw_config)?;
    Ok(config)
}

/// Validate a layout held in memory.
pub fn parse_and_validate(text: &str) -> Result<CellConfig> {
    let raw_config: RawCellConfig = toml::from_str(text)?;
    CellConfig::try_from(raw_config)
}

/// Default layout file: `Cellulario.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Cellulario.toml")
}
