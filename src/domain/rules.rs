//! Decision-policy rules: candidates, active rules, and versioned rule sets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::condition_parser;
use super::error::TradeloopError;

pub const MIN_PRIORITY: i32 = 1;
pub const MAX_PRIORITY: i32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    Entry,
    Exit,
    PositionSizing,
    RiskManagement,
    MarketTiming,
}

impl RuleCategory {
    pub const ALL: [RuleCategory; 5] = [
        RuleCategory::Entry,
        RuleCategory::Exit,
        RuleCategory::PositionSizing,
        RuleCategory::RiskManagement,
        RuleCategory::MarketTiming,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleCategory::Entry => "entry",
            RuleCategory::Exit => "exit",
            RuleCategory::PositionSizing => "position_sizing",
            RuleCategory::RiskManagement => "risk_management",
            RuleCategory::MarketTiming => "market_timing",
        }
    }

    pub fn parse(s: &str) -> Option<RuleCategory> {
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }
}

/// A rule proposed by the oracle. Fields arrive loosely typed and are checked
/// by [`validate_candidate`] before they can become a [`Rule`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RuleCandidate {
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub condition: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub deprecates: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub category: RuleCategory,
    pub text: String,
    pub condition: String,
    pub action: String,
    pub priority: i32,
    pub rationale: String,
}

/// A candidate that passed schema validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptedCandidate {
    pub rule: Rule,
    pub deprecates: Vec<String>,
    /// Metric names the condition reads, sorted.
    #[serde(default)]
    pub metrics: Vec<String>,
}

/// Failure patterns returned by the oracle's diagnosis. Opaque to the core.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PatternSet {
    pub patterns: Vec<String>,
    #[serde(default)]
    pub notes: serde_json::Value,
}

impl PatternSet {
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionOrigin {
    Genesis,
    Learning,
    Rollback { from: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSetVersion {
    pub id: u64,
    pub rules: Vec<Rule>,
    pub previous: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub origin: VersionOrigin,
}

impl RuleSetVersion {
    pub fn genesis() -> Self {
        RuleSetVersion {
            id: 1,
            rules: Vec::new(),
            previous: None,
            created_at: Utc::now(),
            origin: VersionOrigin::Genesis,
        }
    }

    pub fn rules_in(&self, category: RuleCategory) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(move |r| r.category == category)
    }

    /// Rule count per category, skipping empty categories.
    pub fn category_counts(&self) -> Vec<(RuleCategory, usize)> {
        RuleCategory::ALL
            .into_iter()
            .map(|c| (c, self.rules_in(c).count()))
            .filter(|(_, n)| *n > 0)
            .collect()
    }
}

fn require(field: &str, value: &str) -> Result<(), TradeloopError> {
    if value.trim().is_empty() {
        return Err(TradeloopError::RuleSchema {
            reason: format!("missing required field '{}'", field),
        });
    }
    Ok(())
}

/// Schema check: required fields present, category from the fixed set,
/// priority in bounds, condition parses.
pub fn validate_candidate(candidate: &RuleCandidate) -> Result<AcceptedCandidate, TradeloopError> {
    require("category", &candidate.category)?;
    require("text", &candidate.text)?;
    require("condition", &candidate.condition)?;
    require("action", &candidate.action)?;
    require("rationale", &candidate.rationale)?;

    let category =
        RuleCategory::parse(candidate.category.trim()).ok_or_else(|| TradeloopError::RuleSchema {
            reason: format!("unknown category '{}'", candidate.category),
        })?;

    if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&candidate.priority) {
        return Err(TradeloopError::RuleSchema {
            reason: format!(
                "priority {} outside {}..={}",
                candidate.priority, MIN_PRIORITY, MAX_PRIORITY
            ),
        });
    }

    let condition =
        condition_parser::parse(candidate.condition.trim()).map_err(|e| TradeloopError::RuleSchema {
            reason: format!("bad condition: {}", e),
        })?;

    Ok(AcceptedCandidate {
        rule: Rule {
            category,
            text: candidate.text.trim().to_string(),
            condition: candidate.condition.trim().to_string(),
            action: candidate.action.trim().to_string(),
            priority: candidate.priority,
            rationale: candidate.rationale.trim().to_string(),
        },
        deprecates: candidate
            .deprecates
            .iter()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .collect(),
        metrics: condition.referenced_metrics().into_iter().collect(),
    })
}

/// Merge accepted candidates into the current rules.
///
/// Deprecated texts are removed first, then each candidate replaces any rule
/// with the same text or is appended. The result is ordered by priority
/// descending; ties keep their merge order.
pub fn merge_rules(current: &[Rule], accepted: &[AcceptedCandidate]) -> Vec<Rule> {
    let deprecated: Vec<&str> = accepted
        .iter()
        .flat_map(|c| c.deprecates.iter().map(String::as_str))
        .collect();

    let mut merged: Vec<Rule> = current
        .iter()
        .filter(|r| !deprecated.contains(&r.text.as_str()))
        .cloned()
        .collect();

    for candidate in accepted {
        match merged.iter_mut().find(|r| r.text == candidate.rule.text) {
            Some(existing) => *existing = candidate.rule.clone(),
            None => merged.push(candidate.rule.clone()),
        }
    }

    merged.sort_by(|a, b| b.priority.cmp(&a.priority));
    merged
}
