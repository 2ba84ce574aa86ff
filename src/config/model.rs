// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::engine::{CellOptions, DEFAULT_BATCH_SIZE};
use crate::types::{FailurePolicy, StrategyKind};

/// `[cell]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CellSection {
    pub strategy: StrategyKind,
    pub buffering: bool,
    pub batch_size: usize,
    pub gathering: bool,
    pub failure_policy: FailurePolicy,
}

impl Default for CellSection {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::default(),
            buffering: false,
            batch_size: DEFAULT_BATCH_SIZE,
            gathering: false,
            failure_policy: FailurePolicy::default(),
        }
    }
}

/// `[tier.<name>]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TierSection {
    /// Tier whose outputs feed this one.
    pub source: Option<String>,
    pub concurrency: Option<usize>,
}

/// The file as deserialized, before any semantic checks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawCellConfig {
    pub cell: CellSection,
    pub tier: BTreeMap<String, TierSection>,
}

/// A validated layout: the tier graph is a set of acyclic chains with
/// known sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellConfig {
    cell: CellSection,
    tiers: BTreeMap<String, TierSection>,
    order: Vec<String>,
}

impl CellConfig {
    /// Build without validating. `order` must list every tier with each
    /// source ahead of its consumer.
    pub fn new_unchecked(
        cell: CellSection,
        tiers: BTreeMap<String, TierSection>,
        order: Vec<String>,
    ) -> Self {
        Self { cell, tiers, order }
    }

    pub fn cell(&self) -> &CellSection {
        &self.cell
    }

    pub fn options(&self) -> CellOptions {
        CellOptions {
            strategy: self.cell.strategy,
            buffering: self.cell.buffering,
            batch_size: self.cell.batch_size,
            gathering: self.cell.gathering,
            failure_policy: self.cell.failure_policy,
        }
    }

    /// Tier names in layout order: roots by name, each followed by its chain.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn tier(&self, name: &str) -> Option<&TierSection> {
        self.tiers.get(name)
    }

    pub fn tiers(&self) -> impl Iterator<Item = (&str, &TierSection)> {
        self.tiers.iter().map(|(name, tier)| (name.as_str(), tier))
    }
}
