// =============================================================================
// Decision record — auditable output of every (trader, cycle) evaluation
// =============================================================================
//
// One record per cycle, persisted verbatim to the day-partitioned decision
// log and merged into the trader's memory snapshot. `decisions` always holds
// exactly one sub-decision; the field stays a list on the wire for
// compatibility with the web layer.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::features::context::Candidate;
use crate::types::{ActionKind, DecisionSource};

/// A holding row, shared between the portfolio state, the memory snapshot
/// and the decision record's `positions` view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub symbol: String,
    pub shares: f64,
    pub avg_cost: f64,
    pub mark_price: f64,
}

impl Holding {
    pub fn market_value(&self) -> f64 {
        self.shares * self.mark_price
    }

    pub fn unrealized_pnl(&self) -> f64 {
        (self.mark_price - self.avg_cost) * self.shares
    }
}

/// Cash + holdings the fill simulation mutates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortfolioState {
    pub cash: f64,
    pub holdings: Vec<Holding>,
}

impl PortfolioState {
    pub fn new(cash: f64) -> Self {
        Self {
            cash,
            holdings: Vec::new(),
        }
    }

    pub fn holding(&self, symbol: &str) -> Option<&Holding> {
        self.holdings.iter().find(|h| h.symbol == symbol)
    }

    pub fn holding_shares(&self, symbol: &str) -> f64 {
        self.holding(symbol).map(|h| h.shares).unwrap_or(0.0)
    }

    pub fn positions_value(&self) -> f64 {
        self.holdings.iter().map(Holding::market_value).sum()
    }

    pub fn total_balance(&self) -> f64 {
        self.cash + self.positions_value()
    }

    pub fn total_unrealized(&self) -> f64 {
        self.holdings.iter().map(Holding::unrealized_pnl).sum()
    }

    /// Re-mark a held symbol to the latest trade price.
    pub fn mark(&mut self, symbol: &str, price: f64) {
        if price <= 0.0 {
            return;
        }
        if let Some(h) = self.holdings.iter_mut().find(|h| h.symbol == symbol) {
            h.mark_price = price;
        }
    }
}

/// Account header of a decision record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountState {
    pub total_balance: f64,
    pub available_balance: f64,
    pub total_unrealized_profit: f64,
    pub position_count: usize,
    /// Fraction of equity deployed into positions (no margin is simulated,
    /// so this is simply invested value / total balance).
    pub margin_used_pct: f64,
}

impl AccountState {
    pub fn of(portfolio: &PortfolioState) -> Self {
        let total = portfolio.total_balance();
        Self {
            total_balance: total,
            available_balance: portfolio.cash,
            total_unrealized_profit: portfolio.total_unrealized(),
            position_count: portfolio.holdings.len(),
            margin_used_pct: if total > 0.0 {
                portfolio.positions_value() / total
            } else {
                0.0
            },
        }
    }
}

/// The single executed (or refused) action inside a decision record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubDecision {
    pub action: ActionKind,
    pub symbol: String,
    pub quantity: f64,
    pub requested_quantity: f64,
    pub executed: bool,
    pub filled_quantity: f64,
    pub filled_notional: f64,
    pub fee_paid: f64,
    pub realized_pnl: f64,
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<f64>,
    pub confidence: f64,
    pub reasoning: String,
    pub order_id: String,
    pub timestamp: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Complete auditable record of one cycle for one trader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub timestamp: String,
    pub cycle_number: u64,
    pub system_prompt: String,
    pub input_prompt: String,
    pub cot_trace: String,
    pub decision_json: serde_json::Value,
    pub decision_source: DecisionSource,
    pub account_state: AccountState,
    pub positions: Vec<Holding>,
    #[serde(default)]
    pub candidate_coins: Vec<Candidate>,
    pub decisions: Vec<SubDecision>,
    #[serde(default)]
    pub execution_log: Vec<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// 2–4 short Chinese lines summarizing data status, features, action.
    pub reasoning_steps_cn: Vec<String>,
}

impl DecisionRecord {
    pub fn primary(&self) -> Option<&SubDecision> {
        self.decisions.first()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn portfolio_accounting() {
        let mut p = PortfolioState::new(10_000.0);
        p.holdings.push(Holding {
            symbol: "600519".to_string(),
            shares: 100.0,
            avg_cost: 90.0,
            mark_price: 95.0,
        });
        assert!((p.positions_value() - 9_500.0).abs() < 1e-9);
        assert!((p.total_balance() - 19_500.0).abs() < 1e-9);
        assert!((p.total_unrealized() - 500.0).abs() < 1e-9);
        assert!((p.holding_shares("600519") - 100.0).abs() < f64::EPSILON);
        assert_eq!(p.holding_shares("000001"), 0.0);

        p.mark("600519", 100.0);
        assert!((p.positions_value() - 10_000.0).abs() < 1e-9);
        // Non-positive marks ignored.
        p.mark("600519", 0.0);
        assert!((p.positions_value() - 10_000.0).abs() < 1e-9);
    }

    #[test]
    fn account_state_margin_fraction() {
        let mut p = PortfolioState::new(50_000.0);
        p.holdings.push(Holding {
            symbol: "600519".to_string(),
            shares: 500.0,
            avg_cost: 100.0,
            mark_price: 100.0,
        });
        let acct = AccountState::of(&p);
        assert!((acct.total_balance - 100_000.0).abs() < 1e-9);
        assert!((acct.margin_used_pct - 0.5).abs() < 1e-9);
        assert_eq!(acct.position_count, 1);
    }

    #[test]
    fn sub_decision_omits_absent_levels() {
        let sub = SubDecision {
            action: ActionKind::Hold,
            symbol: "600519".to_string(),
            quantity: 0.0,
            requested_quantity: 0.0,
            executed: false,
            filled_quantity: 0.0,
            filled_notional: 0.0,
            fee_paid: 0.0,
            realized_pnl: 0.0,
            price: 100.0,
            stop_loss: None,
            take_profit: None,
            confidence: 0.51,
            reasoning: String::new(),
            order_id: "x".to_string(),
            timestamp: "t".to_string(),
            success: true,
            error: None,
        };
        let json = serde_json::to_value(&sub).unwrap();
        assert!(json.get("stop_loss").is_none());
        assert!(json.get("take_profit").is_none());
        assert_eq!(json["action"], "hold");
    }
}
