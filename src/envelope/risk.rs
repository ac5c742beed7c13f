//! Risk aggregation: derive a single risk level from a list of risk-bearing
//! items, by a module-declared rule.

use super::types::RiskLevel;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `meta_config.risk_rule` from the module manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskRule {
    MaxChangesRisk,
    MaxIssuesRisk,
    Explicit,
}

impl Default for RiskRule {
    fn default() -> Self {
        RiskRule::MaxChangesRisk
    }
}

/// Aggregates a list of already-resolved risk levels into a single level:
/// the maximum across the list, or `Medium` if the list is empty (an empty
/// or unreadable risk signal is treated as medium, never none).
pub fn aggregate(levels: &[RiskLevel]) -> RiskLevel {
    levels.iter().copied().max().unwrap_or(RiskLevel::Medium)
}

/// Reads a `risk` field (string) off each item in `field` under `key` and
/// aggregates. Items missing the field, or carrying an unrecognized risk
/// string, count as `Medium` rather than being dropped silently.
pub fn aggregate_from_items(items: &[Value], key: &str) -> RiskLevel {
    if items.is_empty() {
        return RiskLevel::Medium;
    }
    let levels: Vec<RiskLevel> = items
        .iter()
        .map(|item| {
            item.get(key)
                .and_then(Value::as_str)
                .and_then(RiskLevel::parse)
                .unwrap_or(RiskLevel::Medium)
        })
        .collect();
    aggregate(&levels)
}

/// Applies `rule` over `changes` and `issues` arrays (each item expected to
/// carry a `risk` string field), as `max_changes_risk`/`max_issues_risk`
/// name which array is authoritative; `explicit` instead trusts a top-level
/// `risk` value supplied by the caller and falls back to `Medium` when none
/// is given.
pub fn aggregate_by_rule(
    rule: RiskRule,
    changes: &[Value],
    issues: &[Value],
    explicit: Option<RiskLevel>,
) -> RiskLevel {
    match rule {
        RiskRule::MaxChangesRisk => aggregate_from_items(changes, "risk"),
        RiskRule::MaxIssuesRisk => aggregate_from_items(issues, "risk"),
        RiskRule::Explicit => explicit.unwrap_or(RiskLevel::Medium),
    }
}
