// src/config/mod.rs

//! TOML description of a cell layout.
//!
//! [`RawCellConfig`] is what `toml` hands back; converting it into a
//! [`CellConfig`] (via `TryFrom`) checks the tier graph and fixes the
//! layout order. [`Cell::from_config`](crate::engine::Cell::from_config)
//! then pairs the named tiers with caller-built [`Tier`](crate::tier::Tier)s.

pub mod loader;
pub mod model;
mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, parse_and_validate};
pub use model::{CellConfig, CellSection, RawCellConfig, TierSection};
