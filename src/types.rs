use std::str::FromStr;

use serde::Deserialize;

/// Stock dispatch-ordering strategies.
///
/// - `Fifo`: strict submission order.
/// - `Latency`: oldest work first.
/// - `Bandwidth`: largest batch of requests sharing a target first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Fifo,
    Latency,
    Bandwidth,
}

impl Default for StrategyKind {
    fn default() -> Self {
        StrategyKind::Fifo
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fifo" => Ok(StrategyKind::Fifo),
            "latency" => Ok(StrategyKind::Latency),
            "bandwidth" => Ok(StrategyKind::Bandwidth),
            other => Err(format!(
                "invalid strategy: {other} (expected \"fifo\", \"latency\" or \"bandwidth\")"
            )),
        }
    }
}

/// What the cell does when a tier runs out of successful tasks.
///
/// - `FailSoft`: record the failures, let the rest of the pipeline drain and
///   report an aggregate error at the end (default).
/// - `FailFast`: abort the whole cell as soon as one tier is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    FailSoft,
    FailFast,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        FailurePolicy::FailSoft
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fail-soft" | "soft" => Ok(FailurePolicy::FailSoft),
            "fail-fast" | "fast" => Ok(FailurePolicy::FailFast),
            other => Err(format!(
                "invalid failure_policy: {other} (expected \"fail-soft\" or \"fail-fast\")"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_kind_parses_case_insensitively() {
        assert_eq!(" Latency ".parse::<StrategyKind>(), Ok(StrategyKind::Latency));
        assert_eq!("BANDWIDTH".parse::<StrategyKind>(), Ok(StrategyKind::Bandwidth));
        assert!("lifo".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn failure_policy_accepts_short_forms() {
        assert_eq!("fast".parse::<FailurePolicy>(), Ok(FailurePolicy::FailFast));
        assert_eq!("fail-soft".parse::<FailurePolicy>(), Ok(FailurePolicy::FailSoft));
        assert_eq!(FailurePolicy::default(), FailurePolicy::FailSoft);
    }
}
