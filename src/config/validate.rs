// src/config/validate.rs

use std::collections::BTreeMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{CellConfig, RawCellConfig};
use crate::errors::{CellError, Result};

impl TryFrom<RawCellConfig> for CellConfig {
    type Error = CellError;

    fn try_from(raw: RawCellConfig) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        let order = layout_order(&raw);
        Ok(CellConfig::new_unchecked(raw.cell, raw.tier, order))
    }
}

fn validate_raw_config(cfg: &RawCellConfig) -> Result<()> {
    ensure_has_tiers(cfg)?;
    validate_cell_section(cfg)?;
    validate_tier_sources(cfg)?;
    validate_tier_graph(cfg)?;
    Ok(())
}

fn ensure_has_tiers(cfg: &RawCellConfig) -> Result<()> {
    if cfg.tier.is_empty() {
        return Err(CellError::ConfigError(
            "config must contain at least one [tier.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_cell_section(cfg: &RawCellConfig) -> Result<()> {
    // strategy and failure_policy are typed and checked during deserialization.
    if cfg.cell.batch_size == 0 {
        return Err(CellError::ConfigError(
            "[cell].batch_size must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_tier_sources(cfg: &RawCellConfig) -> Result<()> {
    let mut consumers: BTreeMap<&str, &str> = BTreeMap::new();

    for (name, tier) in cfg.tier.iter() {
        if tier.concurrency == Some(0) {
            return Err(CellError::ConfigError(format!(
                "tier '{}' has concurrency 0; it must be >= 1",
                name
            )));
        }

        let Some(source) = tier.source.as_deref() else {
            continue;
        };
        if source == name {
            return Err(CellError::ConfigError(format!(
                "tier '{}' cannot use itself as `source`",
                name
            )));
        }
        if !cfg.tier.contains_key(source) {
            return Err(CellError::ConfigError(format!(
                "tier '{}' has unknown `source` '{}'",
                name, source
            )));
        }
        if let Some(existing) = consumers.insert(source, name.as_str()) {
            return Err(CellError::TierLayout(format!(
                "tier '{}' feeds both '{}' and '{}'; a tier may have only one consumer",
                source, existing, name
            )));
        }
    }
    Ok(())
}

fn validate_tier_graph(cfg: &RawCellConfig) -> Result<()> {
    // Edge direction: source -> consumer.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.tier.keys() {
        graph.add_node(name.as_str());
    }
    for (name, tier) in cfg.tier.iter() {
        if let Some(source) = tier.source.as_deref() {
            graph.add_edge(source, name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(CellError::TierCycle(format!(
            "cycle detected in tier graph involving tier '{}'",
            cycle.node_id()
        ))),
    }
}

/// Roots sorted by name, each followed by its chain of consumers.
///
/// Only called on a validated config, where every tier sits on exactly one
/// chain that starts at a root.
fn layout_order(cfg: &RawCellConfig) -> Vec<String> {
    let consumer_of: BTreeMap<&str, &str> = cfg
        .tier
        .iter()
        .filter_map(|(name, tier)| tier.source.as_deref().map(|src| (src, name.as_str())))
        .collect();

    let mut order = Vec::with_capacity(cfg.tier.len());
    for (root, _) in cfg.tier.iter().filter(|(_, tier)| tier.source.is_none()) {
        let mut current = Some(root.as_str());
        while let Some(name) = current {
            order.push(name.to_string());
            current = consumer_of.get(name).copied();
        }
    }
    order
}
