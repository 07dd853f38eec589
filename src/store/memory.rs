// =============================================================================
// Agent memory store — per-trader agent.memory.v2 snapshots
// =============================================================================
//
// One JSON file per trader under `data/agent-memory/<trader_id>.json`,
// replaced atomically after every decision. The snapshot carries the full
// working state of a trader: equity stats, holdings, trade events, recent
// actions and a sampled equity curve. Ring caps keep files bounded:
//
//   trade_events    200 (oldest evicted)
//   recent_actions   50 (latest first)
//   equity_curve  2 880 (oldest evicted)
// =============================================================================

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::engine::record::{DecisionRecord, Holding, PortfolioState};
use crate::store::fsio::{atomic_write_json, read_json};
use crate::types::{ActionKind, DecisionSource};

pub const MEMORY_SCHEMA_VERSION: &str = "agent.memory.v2";

const TRADE_EVENTS_CAP: usize = 200;
const RECENT_ACTIONS_CAP: usize = 50;
const EQUITY_CURVE_CAP: usize = 2_880;

// -----------------------------------------------------------------------------
// Snapshot schema
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryMeta {
    pub run_id: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryConfig {
    pub initial_balance: f64,
    pub decision_every_bars: u64,
    pub llm_model: String,
    pub commission_rate: f64,
}

/// Where the trader sits on the replay tape (live mode leaves the cursor
/// fields at their defaults).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplayPosition {
    pub trading_day: String,
    pub day_index: usize,
    pub bar_cursor: usize,
    pub is_day_start: bool,
    pub is_day_end: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStats {
    pub return_rate_pct: f64,
    pub decisions: u64,
    pub wins: u64,
    pub losses: u64,
    pub holds: u64,
    pub latest_total_balance: f64,
    pub latest_available_balance: f64,
    pub latest_unrealized_profit: f64,
    pub initial_balance: f64,
    pub sell_trades: u64,
    pub buy_trades: u64,
    /// Consecutive cycles with an empty book; feeds the anti-stall nudges.
    #[serde(default)]
    pub flat_cycles: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyJournalEntry {
    pub trading_day: String,
    pub decisions: u64,
    pub wins: u64,
    pub losses: u64,
    pub holds: u64,
    pub realized_pnl: f64,
    pub end_total_balance: f64,
}

/// A lot opened by a buy, consumed FIFO by closes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenLot {
    pub symbol: String,
    pub shares: f64,
    pub price: f64,
    pub opened_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedPosition {
    pub symbol: String,
    pub shares: f64,
    pub avg_cost: f64,
    pub exit_price: f64,
    pub realized_pnl: f64,
    pub closed_at: String,
}

/// One executed trade with the post-trade account snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeEvent {
    pub timestamp: String,
    pub cycle_number: u64,
    pub side: ActionKind,
    pub symbol: String,
    pub shares: f64,
    pub price: f64,
    pub notional: f64,
    pub fee: f64,
    pub realized_pnl: f64,
    pub total_balance_after: f64,
    pub available_balance_after: f64,
    pub position_shares_after: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentAction {
    pub timestamp: String,
    pub cycle_number: u64,
    pub action: ActionKind,
    pub symbol: String,
    pub quantity: f64,
    pub price: f64,
    pub confidence: f64,
    pub source: DecisionSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityPoint {
    pub ts_ms: i64,
    pub total_balance: f64,
    pub available_balance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMemory {
    pub schema_version: String,
    pub meta: MemoryMeta,
    pub config: MemoryConfig,
    #[serde(default)]
    pub replay: ReplayPosition,
    #[serde(default)]
    pub stats: MemoryStats,
    #[serde(default)]
    pub daily_journal: Vec<DailyJournalEntry>,
    #[serde(default)]
    pub holdings: Vec<Holding>,
    #[serde(default)]
    pub open_lots: Vec<OpenLot>,
    #[serde(default)]
    pub closed_positions: Vec<ClosedPosition>,
    #[serde(default)]
    pub trade_events: Vec<TradeEvent>,
    /// Latest first.
    #[serde(default)]
    pub recent_actions: Vec<RecentAction>,
    #[serde(default)]
    pub equity_curve: Vec<EquityPoint>,
}

impl AgentMemory {
    pub fn new(run_id: &str, config: MemoryConfig) -> Self {
        let now = Utc::now().to_rfc3339();
        let initial = config.initial_balance;
        Self {
            schema_version: MEMORY_SCHEMA_VERSION.to_string(),
            meta: MemoryMeta {
                run_id: run_id.to_string(),
                created_at: now.clone(),
                updated_at: now,
            },
            config,
            replay: ReplayPosition::default(),
            stats: MemoryStats {
                latest_total_balance: initial,
                latest_available_balance: initial,
                initial_balance: initial,
                ..Default::default()
            },
            daily_journal: Vec::new(),
            holdings: Vec::new(),
            open_lots: Vec::new(),
            closed_positions: Vec::new(),
            trade_events: Vec::new(),
            recent_actions: Vec::new(),
            equity_curve: Vec::new(),
        }
    }

    /// The portfolio the decision engine operates on.
    pub fn portfolio(&self) -> PortfolioState {
        PortfolioState {
            cash: self.stats.latest_available_balance,
            holdings: self.holdings.clone(),
        }
    }

    /// Merge one decision and its resulting portfolio into the snapshot.
    pub fn record_decision(
        &mut self,
        record: &DecisionRecord,
        portfolio: &PortfolioState,
        replay: Option<ReplayPosition>,
        trading_day: &str,
        now_ms: i64,
    ) {
        let Some(sub) = record.primary() else {
            return;
        };

        self.holdings = portfolio.holdings.clone();
        self.stats.latest_available_balance = portfolio.cash;
        self.stats.latest_total_balance = portfolio.total_balance();
        self.stats.latest_unrealized_profit = portfolio.total_unrealized();
        self.stats.decisions += 1;
        if self.stats.initial_balance > 0.0 {
            self.stats.return_rate_pct = (self.stats.latest_total_balance
                / self.stats.initial_balance
                - 1.0)
                * 100.0;
        }

        let mut realized_delta = 0.0;
        let mut win_delta = 0u64;
        let mut loss_delta = 0u64;
        let mut hold_delta = 0u64;
        match sub.action {
            ActionKind::Hold => {
                self.stats.holds += 1;
                hold_delta = 1;
            }
            ActionKind::Buy if sub.executed => {
                self.stats.buy_trades += 1;
                self.open_lots.push(OpenLot {
                    symbol: sub.symbol.clone(),
                    shares: sub.filled_quantity,
                    price: sub.price,
                    opened_at: sub.timestamp.clone(),
                });
            }
            ActionKind::Sell if sub.executed => {
                self.stats.sell_trades += 1;
                realized_delta = sub.realized_pnl;
                if sub.realized_pnl > 0.0 {
                    self.stats.wins += 1;
                    win_delta = 1;
                } else if sub.realized_pnl < 0.0 {
                    self.stats.losses += 1;
                    loss_delta = 1;
                }
                self.consume_lots(&sub.symbol, sub.filled_quantity);
                self.closed_positions.push(ClosedPosition {
                    symbol: sub.symbol.clone(),
                    shares: sub.filled_quantity,
                    avg_cost: sub.price - (sub.realized_pnl + sub.fee_paid) / sub.filled_quantity,
                    exit_price: sub.price,
                    realized_pnl: sub.realized_pnl,
                    closed_at: sub.timestamp.clone(),
                });
            }
            _ => {}
        }

        if self.holdings.is_empty() {
            self.stats.flat_cycles += 1;
        } else {
            self.stats.flat_cycles = 0;
        }

        if sub.executed {
            self.trade_events.push(TradeEvent {
                timestamp: sub.timestamp.clone(),
                cycle_number: record.cycle_number,
                side: sub.action,
                symbol: sub.symbol.clone(),
                shares: sub.filled_quantity,
                price: sub.price,
                notional: sub.filled_notional,
                fee: sub.fee_paid,
                realized_pnl: sub.realized_pnl,
                total_balance_after: self.stats.latest_total_balance,
                available_balance_after: self.stats.latest_available_balance,
                position_shares_after: portfolio.holding_shares(&sub.symbol),
            });
            while self.trade_events.len() > TRADE_EVENTS_CAP {
                self.trade_events.remove(0);
            }
        }

        self.recent_actions.insert(
            0,
            RecentAction {
                timestamp: record.timestamp.clone(),
                cycle_number: record.cycle_number,
                action: sub.action,
                symbol: sub.symbol.clone(),
                quantity: sub.filled_quantity,
                price: sub.price,
                confidence: sub.confidence,
                source: record.decision_source,
            },
        );
        self.recent_actions.truncate(RECENT_ACTIONS_CAP);

        self.equity_curve.push(EquityPoint {
            ts_ms: now_ms,
            total_balance: self.stats.latest_total_balance,
            available_balance: self.stats.latest_available_balance,
        });
        while self.equity_curve.len() > EQUITY_CURVE_CAP {
            self.equity_curve.remove(0);
        }

        self.roll_journal(
            trading_day,
            win_delta,
            loss_delta,
            hold_delta,
            realized_delta,
        );

        if let Some(replay) = replay {
            self.replay = replay;
        }
        self.meta.updated_at = Utc::now().to_rfc3339();
    }

    fn roll_journal(
        &mut self,
        trading_day: &str,
        wins: u64,
        losses: u64,
        holds: u64,
        realized_pnl: f64,
    ) {
        let total = self.stats.latest_total_balance;
        match self
            .daily_journal
            .iter_mut()
            .find(|e| e.trading_day == trading_day)
        {
            Some(entry) => {
                entry.decisions += 1;
                entry.wins += wins;
                entry.losses += losses;
                entry.holds += holds;
                entry.realized_pnl += realized_pnl;
                entry.end_total_balance = total;
            }
            None => self.daily_journal.push(DailyJournalEntry {
                trading_day: trading_day.to_string(),
                decisions: 1,
                wins,
                losses,
                holds,
                realized_pnl,
                end_total_balance: total,
            }),
        }
    }

    /// Consume open lots FIFO for a sell.
    fn consume_lots(&mut self, symbol: &str, mut shares: f64) {
        for lot in self.open_lots.iter_mut() {
            if lot.symbol != symbol || shares <= 0.0 {
                continue;
            }
            let take = lot.shares.min(shares);
            lot.shares -= take;
            shares -= take;
        }
        self.open_lots.retain(|l| l.shares > 0.0);
    }
}

// -----------------------------------------------------------------------------
// Store
// -----------------------------------------------------------------------------

pub struct MemoryStore {
    dir: PathBuf,
    cache: RwLock<HashMap<String, AgentMemory>>,
}

impl MemoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn path_for(&self, trader_id: &str) -> PathBuf {
        self.dir.join(format!("{trader_id}.json"))
    }

    /// Hydrate a trader's memory from disk, or initialize a fresh snapshot.
    pub fn load_or_init(
        &self,
        trader_id: &str,
        run_id: &str,
        config: MemoryConfig,
    ) -> AgentMemory {
        if let Some(cached) = self.cache.read().get(trader_id) {
            return cached.clone();
        }
        let memory = match read_json::<AgentMemory>(self.path_for(trader_id)) {
            Ok(Some(m)) if m.schema_version == MEMORY_SCHEMA_VERSION => m,
            Ok(Some(m)) => {
                warn!(
                    trader_id,
                    found = %m.schema_version,
                    "memory snapshot schema mismatch, reinitializing"
                );
                AgentMemory::new(run_id, config)
            }
            Ok(None) => AgentMemory::new(run_id, config),
            Err(e) => {
                warn!(trader_id, error = %e, "memory snapshot unreadable, reinitializing");
                AgentMemory::new(run_id, config)
            }
        };
        self.cache
            .write()
            .insert(trader_id.to_string(), memory.clone());
        memory
    }

    /// Persist an updated snapshot (atomic replace) and refresh the cache.
    /// Write failures are logged and swallowed: the trading loop must not
    /// stop because one snapshot missed a flush.
    pub fn save(&self, trader_id: &str, memory: &AgentMemory) {
        self.cache
            .write()
            .insert(trader_id.to_string(), memory.clone());
        if let Err(e) = atomic_write_json(self.path_for(trader_id), memory) {
            warn!(trader_id, error = %e, "memory snapshot write failed");
        }
    }

    pub fn get(&self, trader_id: &str) -> Option<AgentMemory> {
        if let Some(m) = self.cache.read().get(trader_id) {
            return Some(m.clone());
        }
        read_json::<AgentMemory>(self.path_for(trader_id)).ok().flatten()
    }

    /// Delete every persisted snapshot (RESET_AGENT_MEMORY_ON_BOOT).
    pub fn reset_all(&self) -> Result<usize> {
        self.cache.write().clear();
        let mut removed = 0;
        if !self.dir.is_dir() {
            return Ok(0);
        }
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                std::fs::remove_file(&path)?;
                removed += 1;
            }
        }
        info!(removed, dir = %self.dir.display(), "agent memory reset");
        Ok(removed)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::record::{AccountState, SubDecision};

    fn mem_config() -> MemoryConfig {
        MemoryConfig {
            initial_balance: 100_000.0,
            decision_every_bars: 5,
            llm_model: "gpt-4o-mini".to_string(),
            commission_rate: 0.0003,
        }
    }

    fn record_with(sub: SubDecision, portfolio: &PortfolioState) -> DecisionRecord {
        DecisionRecord {
            timestamp: "2025-06-02T02:00:00Z".to_string(),
            cycle_number: 1,
            system_prompt: String::new(),
            input_prompt: String::new(),
            cot_trace: String::new(),
            decision_json: serde_json::Value::Null,
            decision_source: DecisionSource::RuleHeuristic,
            account_state: AccountState::of(portfolio),
            positions: portfolio.holdings.clone(),
            candidate_coins: Vec::new(),
            decisions: vec![sub],
            execution_log: Vec::new(),
            success: true,
            error_message: None,
            reasoning_steps_cn: vec!["一".to_string(), "二".to_string()],
        }
    }

    fn buy_sub(symbol: &str, shares: f64, price: f64) -> SubDecision {
        SubDecision {
            action: ActionKind::Buy,
            symbol: symbol.to_string(),
            quantity: shares,
            requested_quantity: shares,
            executed: true,
            filled_quantity: shares,
            filled_notional: shares * price,
            fee_paid: 1.0,
            realized_pnl: 0.0,
            price,
            stop_loss: None,
            take_profit: None,
            confidence: 0.6,
            reasoning: String::new(),
            order_id: "o".to_string(),
            timestamp: "2025-06-02T02:00:00Z".to_string(),
            success: true,
            error: None,
        }
    }

    #[test]
    fn snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(dir.path());
        let memory = store.load_or_init("trader_one", "run-1", mem_config());
        store.save("trader_one", &memory);

        // Fresh store: forces a disk read.
        let store2 = MemoryStore::new(dir.path());
        let loaded = store2.load_or_init("trader_one", "run-2", mem_config());
        assert_eq!(loaded.schema_version, MEMORY_SCHEMA_VERSION);
        // Existing snapshot wins over the new run's initializer.
        assert_eq!(loaded.meta.run_id, "run-1");
        assert!((loaded.stats.initial_balance - 100_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn record_buy_updates_stats_events_and_journal() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(dir.path());
        let mut memory = store.load_or_init("trader_one", "run-1", mem_config());

        let mut portfolio = memory.portfolio();
        portfolio.cash -= 10_001.0;
        portfolio.holdings.push(Holding {
            symbol: "600519".to_string(),
            shares: 100.0,
            avg_cost: 100.0,
            mark_price: 100.0,
        });
        let record = record_with(buy_sub("600519", 100.0, 100.0), &portfolio);
        memory.record_decision(&record, &portfolio, None, "2025-06-02", 1_000);

        assert_eq!(memory.stats.decisions, 1);
        assert_eq!(memory.stats.buy_trades, 1);
        assert_eq!(memory.stats.flat_cycles, 0);
        assert_eq!(memory.trade_events.len(), 1);
        assert_eq!(memory.open_lots.len(), 1);
        assert_eq!(memory.recent_actions.len(), 1);
        assert_eq!(memory.recent_actions[0].cycle_number, 1);
        assert_eq!(memory.equity_curve.len(), 1);
        assert_eq!(memory.daily_journal.len(), 1);
        assert_eq!(memory.daily_journal[0].trading_day, "2025-06-02");
        assert_eq!(memory.daily_journal[0].decisions, 1);
        assert!((memory.stats.latest_total_balance - 99_999.0).abs() < 1e-9);
    }

    #[test]
    fn hold_increments_flat_cycles_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(dir.path());
        let mut memory = store.load_or_init("trader_one", "run-1", mem_config());
        let portfolio = memory.portfolio();

        let mut sub = buy_sub("600519", 0.0, 100.0);
        sub.action = ActionKind::Hold;
        sub.executed = false;
        sub.filled_quantity = 0.0;
        sub.filled_notional = 0.0;
        sub.fee_paid = 0.0;
        let record = record_with(sub, &portfolio);

        memory.record_decision(&record, &portfolio, None, "2025-06-02", 1_000);
        memory.record_decision(&record, &portfolio, None, "2025-06-02", 2_000);
        assert_eq!(memory.stats.holds, 2);
        assert_eq!(memory.stats.flat_cycles, 2);
        assert!(memory.trade_events.is_empty());
        assert_eq!(memory.daily_journal[0].holds, 2);
    }

    #[test]
    fn sell_win_loss_accounting_and_lot_consumption() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(dir.path());
        let mut memory = store.load_or_init("trader_one", "run-1", mem_config());
        memory.open_lots.push(OpenLot {
            symbol: "600519".to_string(),
            shares: 200.0,
            price: 100.0,
            opened_at: "t".to_string(),
        });

        let portfolio = PortfolioState {
            cash: 120_000.0,
            holdings: vec![Holding {
                symbol: "600519".to_string(),
                shares: 100.0,
                avg_cost: 100.0,
                mark_price: 105.0,
            }],
        };
        let mut sub = buy_sub("600519", 100.0, 105.0);
        sub.action = ActionKind::Sell;
        sub.realized_pnl = 495.0;
        let record = record_with(sub, &portfolio);
        memory.record_decision(&record, &portfolio, None, "2025-06-02", 1_000);

        assert_eq!(memory.stats.sell_trades, 1);
        assert_eq!(memory.stats.wins, 1);
        assert_eq!(memory.stats.losses, 0);
        assert_eq!(memory.closed_positions.len(), 1);
        // FIFO consumption trimmed the open lot.
        assert_eq!(memory.open_lots.len(), 1);
        assert!((memory.open_lots[0].shares - 100.0).abs() < 1e-9);
        assert!((memory.daily_journal[0].realized_pnl - 495.0).abs() < 1e-9);
    }

    #[test]
    fn recent_actions_capped_latest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(dir.path());
        let mut memory = store.load_or_init("trader_one", "run-1", mem_config());
        let portfolio = memory.portfolio();

        for cycle in 1..=60u64 {
            let mut sub = buy_sub("600519", 0.0, 100.0);
            sub.action = ActionKind::Hold;
            sub.executed = false;
            let mut record = record_with(sub, &portfolio);
            record.cycle_number = cycle;
            memory.record_decision(&record, &portfolio, None, "2025-06-02", cycle as i64);
        }
        assert_eq!(memory.recent_actions.len(), 50);
        assert_eq!(memory.recent_actions[0].cycle_number, 60);
        assert_eq!(memory.recent_actions[49].cycle_number, 11);
    }

    #[test]
    fn reset_all_removes_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(dir.path());
        let memory = store.load_or_init("trader_one", "run-1", mem_config());
        store.save("trader_one", &memory);
        store.save("trader_two", &memory);

        let removed = store.reset_all().unwrap();
        assert_eq!(removed, 2);
        assert!(store.get("trader_one").is_none());
    }
}
