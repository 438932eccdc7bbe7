//! Scripted decision oracle.
//!
//! Serves plans, diagnoses and rule proposals from a JSON script in order.
//! Once a list runs out the oracle answers conservatively: an empty plan,
//! no patterns, no candidates.
//!
//! ```json
//! {
//!   "plans": [{"actions": [...], "justification": "...", "confidence": 0.6}],
//!   "patterns": [{"patterns": ["..."], "notes": {}}],
//!   "candidates": [[{"category": "exit", "text": "...", ...}]]
//! }
//! ```

use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::error::TradeloopError;
use crate::domain::market::{MarketAnalysis, PortfolioSnapshot, TradePlan};
use crate::domain::performance::RankedTrade;
use crate::domain::rules::{PatternSet, RuleCandidate, RuleSetVersion};
use crate::ports::oracle_port::DecisionOracle;

#[derive(Debug, Default, Deserialize)]
pub struct OracleScript {
    #[serde(default)]
    pub plans: VecDeque<TradePlan>,
    #[serde(default)]
    pub patterns: VecDeque<PatternSet>,
    #[serde(default)]
    pub candidates: VecDeque<Vec<RuleCandidate>>,
}

pub struct ReplayOracle {
    script: Mutex<OracleScript>,
}

impl ReplayOracle {
    pub fn new(script: OracleScript) -> Self {
        Self {
            script: Mutex::new(script),
        }
    }

    /// An oracle that never trades and never proposes anything.
    pub fn idle() -> Self {
        Self::new(OracleScript::default())
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, TradeloopError> {
        let raw = fs::read_to_string(path.as_ref())?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, TradeloopError> {
        let script: OracleScript = serde_json::from_str(raw)?;
        Ok(Self::new(script))
    }
}

#[async_trait]
impl DecisionOracle for ReplayOracle {
    async fn generate_plan(
        &self,
        _portfolio: &PortfolioSnapshot,
        _analysis: &MarketAnalysis,
        ruleset: &RuleSetVersion,
    ) -> Result<TradePlan, TradeloopError> {
        let next = self.script.lock().await.plans.pop_front();
        debug!(version = ruleset.id, scripted = next.is_some(), "replay oracle plan");
        Ok(next.unwrap_or_else(|| TradePlan {
            actions: Vec::new(),
            justification: "no scripted plan; holding".to_string(),
            confidence: 0.0,
        }))
    }

    async fn diagnose_failures(
        &self,
        worst_trades: &[RankedTrade],
        _stats: &serde_json::Value,
    ) -> Result<PatternSet, TradeloopError> {
        debug!(worst = worst_trades.len(), "replay oracle diagnosis");
        Ok(self
            .script
            .lock()
            .await
            .patterns
            .pop_front()
            .unwrap_or_default())
    }

    async fn propose_rules(
        &self,
        _patterns: &PatternSet,
    ) -> Result<Vec<RuleCandidate>, TradeloopError> {
        Ok(self
            .script
            .lock()
            .await
            .candidates
            .pop_front()
            .unwrap_or_default())
    }
}
