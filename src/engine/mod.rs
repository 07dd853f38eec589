// =============================================================================
// Decision Engine — heuristic baseline, guardrails, and fill simulation
// =============================================================================
//
// Produces exactly one deterministic decision record per (trader, cycle).
// Pipeline order is contractual:
//
//   readiness gate -> baseline (LLM or heuristic) -> long-only guard ->
//   anti-stall entries -> opening-phase cap -> turnover throttle ->
//   position-count cap -> concentration cap -> cash reserve floor ->
//   fill simulation -> stop/take levels -> record assembly
//
// Failure semantics: insufficient cash/shares coerce to hold and are
// recorded as `error` on the sub-decision; the record itself still counts
// as a success (a hold needs no execution).
// =============================================================================

pub mod heuristic;
pub mod record;

use chrono::Utc;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::config::GuardrailConfig;
use crate::features::context::AgentContext;
use crate::types::{ActionKind, DecisionSource, RiskProfile, TradingStyle};

use self::heuristic::HeuristicDecision;
use self::record::{AccountState, DecisionRecord, Holding, PortfolioState, SubDecision};

/// CN-A minimum tradeable quantity.
pub const LOT_SIZE: u64 = 100;

/// Stop-loss distance for buys (mirrored for sells).
const STOP_LOSS_PCT: f64 = 0.015;
/// Take-profit distance for buys (mirrored for sells).
const TAKE_PROFIT_PCT: f64 = 0.02;

/// Record-level confidence bounds.
const CONF_MIN: f64 = 0.51;
const CONF_MAX: f64 = 0.95;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub lot_size: u64,
    pub fee_rate: f64,
    pub guardrails: GuardrailConfig,
}

impl EngineConfig {
    pub fn new(fee_rate: f64, guardrails: GuardrailConfig) -> Self {
        Self {
            lot_size: LOT_SIZE,
            fee_rate,
            guardrails,
        }
    }
}

/// A decision arriving from outside the rules: a normalized LLM answer, or
/// the readiness gate's forced hold.
#[derive(Debug, Clone, Serialize)]
pub struct ExternalDecision {
    pub source: DecisionSource,
    pub action: ActionKind,
    pub symbol: String,
    pub quantity: f64,
    pub confidence: f64,
    pub reasoning: String,
    pub raw_json: serde_json::Value,
    pub system_prompt: String,
    pub input_prompt: String,
    pub cot_trace: String,
    /// Populated on the readiness-gate path.
    pub readiness_reasons: Vec<String>,
}

impl ExternalDecision {
    /// The forced hold emitted when readiness is ERROR.
    pub fn readiness_gate(symbol: &str, reasons: Vec<String>) -> Self {
        Self {
            source: DecisionSource::ReadinessGate,
            action: ActionKind::Hold,
            symbol: symbol.to_string(),
            quantity: 0.0,
            confidence: CONF_MIN,
            reasoning: format!("readiness gate: {}", reasons.join(", ")),
            raw_json: serde_json::Value::Null,
            system_prompt: String::new(),
            input_prompt: String::new(),
            cot_trace: String::new(),
            readiness_reasons: reasons,
        }
    }
}

pub struct DecisionInput<'a> {
    pub ctx: &'a AgentContext,
    pub style: TradingStyle,
    pub risk: RiskProfile,
    /// Consecutive cycles this trader has been flat (no holdings).
    pub flat_cycles: u64,
    pub portfolio: &'a PortfolioState,
    pub external: Option<ExternalDecision>,
}

pub struct DecisionOutcome {
    pub record: DecisionRecord,
    pub portfolio: PortfolioState,
}

pub struct DecisionEngine {
    config: EngineConfig,
}

impl DecisionEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Run the full pipeline for one evaluation.
    pub fn decide(&self, input: DecisionInput<'_>) -> DecisionOutcome {
        let ctx = input.ctx;
        let mut portfolio = input.portfolio.clone();
        let price = ctx.latest_price;
        let lot = self.config.lot_size as f64;
        let g = &self.config.guardrails;

        let mut notes: Vec<String> = Vec::new();
        let mut error: Option<String> = None;

        // --- Readiness gate override -------------------------------------
        if let Some(ext) = &input.external {
            if ext.source == DecisionSource::ReadinessGate {
                let record = self.assemble(
                    ctx,
                    &portfolio,
                    DecisionSource::ReadinessGate,
                    ActionKind::Hold,
                    0.0,
                    0.0,
                    FillResult::none(price),
                    CONF_MIN,
                    ext.reasoning.clone(),
                    ext.readiness_reasons.clone(),
                    None,
                    input.external.as_ref(),
                );
                return DecisionOutcome { record, portfolio };
            }
        }

        // --- Baseline -----------------------------------------------------
        let held = portfolio.holding_shares(&ctx.symbol);
        let (source, mut action, mut confidence, mut requested, base_reasoning) =
            match &input.external {
                Some(ext) => (
                    ext.source,
                    ext.action,
                    ext.confidence,
                    ext.quantity,
                    ext.reasoning.clone(),
                ),
                None => {
                    let h: HeuristicDecision =
                        heuristic::evaluate(ctx, input.style, input.risk, held);
                    let qty = h.lots as f64 * lot;
                    (
                        DecisionSource::RuleHeuristic,
                        h.action,
                        h.confidence,
                        qty,
                        format!(
                            "{} baseline ({})",
                            input.style, input.risk
                        ),
                    )
                }
            };
        let requested_quantity = requested;

        // --- Long-only guard ----------------------------------------------
        if action == ActionKind::Sell && held <= 0.0 {
            action = ActionKind::Hold;
            requested = 0.0;
            notes.push("long_only: no shares to sell, coerced to hold".to_string());
        }

        // --- Anti-stall entries (flat + hold only) ------------------------
        if action == ActionKind::Hold && portfolio.holdings.is_empty() {
            let rsi = ctx.features.daily.rsi_14.unwrap_or(50.0);
            let not_bearish = ctx.trend != crate::features::context::TrendState::Bearish;

            if input.flat_cycles >= g.flat_entry_min_cycles
                && not_bearish
                && rsi <= g.flat_entry_max_rsi
            {
                action = ActionKind::Buy;
                requested = g.flat_entry_lots as f64 * lot;
                notes.push(format!(
                    "flat_entry: {} cycles flat, entering {} lot(s)",
                    input.flat_cycles, g.flat_entry_lots
                ));
            } else if input.style == TradingStyle::MeanReversion
                && input.risk == RiskProfile::Conservative
                && input.flat_cycles >= g.conservative_probe_min_cycles
                && not_bearish
                && rsi <= g.conservative_probe_max_rsi
            {
                let ret_5 = ctx.features.intraday.ret_5.unwrap_or(0.0);
                let ret_20 = ctx.features.intraday.ret_20.unwrap_or(0.0);
                if ret_5 <= g.conservative_probe_max_ret || ret_20 <= g.conservative_probe_max_ret {
                    action = ActionKind::Buy;
                    requested = g.conservative_probe_lots as f64 * lot;
                    notes.push(format!(
                        "conservative_probe: {} cycles flat, probing {} lot(s)",
                        input.flat_cycles, g.conservative_probe_lots
                    ));
                }
            }
        }

        // --- Opening-phase cap --------------------------------------------
        if ctx.opening_phase_active && action != ActionKind::Hold {
            let cap = g.opening_phase_max_lots as f64 * lot;
            if requested > cap {
                requested = cap;
                notes.push("opening_phase: quantity capped".to_string());
            }
            if confidence > g.opening_phase_max_confidence {
                confidence = g.opening_phase_max_confidence;
                notes.push("opening_phase: confidence capped".to_string());
            }
        }

        // --- Buy-side guardrails ------------------------------------------
        if action == ActionKind::Buy && price > 0.0 {
            let total_balance = portfolio.total_balance();

            // Turnover throttle (1.0 = disabled).
            if g.turnover_throttle_pct < 1.0 {
                let max_notional = total_balance * g.turnover_throttle_pct;
                let cap = lot_floor(max_notional / price, lot);
                if requested > cap {
                    requested = cap;
                    notes.push("turnover_throttle: quantity clipped".to_string());
                }
            }

            // Position-count cap for new symbols.
            if held <= 0.0 && portfolio.holdings.len() >= g.max_position_count {
                action = ActionKind::Hold;
                requested = 0.0;
                notes.push(format!(
                    "position_cap: already holding {} symbols",
                    portfolio.holdings.len()
                ));
            }

            // Symbol concentration cap (1.0 = disabled).
            if action == ActionKind::Buy && g.max_symbol_concentration_pct < 1.0 {
                let current_value = portfolio
                    .holding(&ctx.symbol)
                    .map(Holding::market_value)
                    .unwrap_or(0.0);
                let allowed_notional =
                    total_balance * g.max_symbol_concentration_pct - current_value;
                let cap = lot_floor((allowed_notional / price).max(0.0), lot);
                if requested > cap {
                    requested = cap;
                    notes.push("concentration_cap: quantity clipped".to_string());
                }
                if requested <= 0.0 {
                    action = ActionKind::Hold;
                    notes.push("concentration_cap: no room left on symbol".to_string());
                }
            }

            // Cash reserve floor (0.0 = disabled).
            if action == ActionKind::Buy && g.min_cash_reserve_pct > 0.0 {
                let reserve = total_balance * g.min_cash_reserve_pct;
                let budget = portfolio.cash - reserve;
                let cap = lot_floor(
                    (budget / (price * (1.0 + self.config.fee_rate))).max(0.0),
                    lot,
                );
                if requested > cap {
                    requested = cap;
                    notes.push("cash_reserve: quantity clipped".to_string());
                }
                if requested < lot {
                    action = ActionKind::Hold;
                    requested = 0.0;
                    notes.push("cash_reserve: cannot fill one lot above reserve".to_string());
                }
            }
        }

        // --- Fill simulation ----------------------------------------------
        let fill = match action {
            ActionKind::Buy => {
                let fill = self.fill_buy(&mut portfolio, &ctx.symbol, price, requested);
                if fill.filled_quantity <= 0.0 {
                    action = ActionKind::Hold;
                    error = Some("insufficient_cash".to_string());
                    notes.push("fill: insufficient cash, coerced to hold".to_string());
                }
                fill
            }
            ActionKind::Sell => {
                let fill = self.fill_sell(&mut portfolio, &ctx.symbol, price, requested);
                if fill.filled_quantity <= 0.0 {
                    action = ActionKind::Hold;
                    error = Some("insufficient_shares".to_string());
                    notes.push("fill: insufficient shares, coerced to hold".to_string());
                }
                fill
            }
            ActionKind::Hold => FillResult::none(price),
        };

        debug!(
            trader_id = %ctx.trader_id,
            cycle = ctx.cycle_number,
            symbol = %ctx.symbol,
            action = %action,
            requested = requested_quantity,
            filled = fill.filled_quantity,
            source = %source,
            "decision evaluated"
        );

        let record = self.assemble(
            ctx,
            &portfolio,
            source,
            action,
            requested,
            requested_quantity,
            fill,
            confidence,
            join_reasoning(&base_reasoning, &notes),
            notes,
            error,
            input.external.as_ref(),
        );
        DecisionOutcome { record, portfolio }
    }

    // -------------------------------------------------------------------------
    // Fill simulation
    // -------------------------------------------------------------------------

    fn fill_buy(
        &self,
        portfolio: &mut PortfolioState,
        symbol: &str,
        price: f64,
        requested: f64,
    ) -> FillResult {
        if price <= 0.0 || requested <= 0.0 {
            return FillResult::none(price);
        }
        let lot = self.config.lot_size as f64;
        let affordable = lot_floor(
            (portfolio.cash / (price * (1.0 + self.config.fee_rate))).floor(),
            lot,
        );
        let filled = lot_floor(requested, lot).min(affordable);
        if filled <= 0.0 {
            return FillResult::none(price);
        }

        let notional = filled * price;
        let fee = round2(notional * self.config.fee_rate);
        portfolio.cash -= notional + fee;

        match portfolio.holdings.iter_mut().find(|h| h.symbol == symbol) {
            Some(h) => {
                let total_shares = h.shares + filled;
                h.avg_cost = (h.avg_cost * h.shares + notional) / total_shares;
                h.shares = total_shares;
                h.mark_price = price;
            }
            None => portfolio.holdings.push(Holding {
                symbol: symbol.to_string(),
                shares: filled,
                avg_cost: price,
                mark_price: price,
            }),
        }

        FillResult {
            filled_quantity: filled,
            filled_notional: notional,
            fee_paid: fee,
            realized_pnl: 0.0,
            price,
        }
    }

    fn fill_sell(
        &self,
        portfolio: &mut PortfolioState,
        symbol: &str,
        price: f64,
        requested: f64,
    ) -> FillResult {
        if price <= 0.0 || requested <= 0.0 {
            return FillResult::none(price);
        }
        let lot = self.config.lot_size as f64;
        let held = portfolio.holding_shares(symbol);
        let sellable = lot_floor(held, lot);
        let filled = lot_floor(requested, lot).min(sellable);
        if filled <= 0.0 {
            return FillResult::none(price);
        }

        let avg_cost = portfolio
            .holding(symbol)
            .map(|h| h.avg_cost)
            .unwrap_or(price);
        let notional = filled * price;
        let fee = round2(notional * self.config.fee_rate);
        let realized = round2((price - avg_cost) * filled - fee);

        portfolio.cash += notional - fee;
        if let Some(h) = portfolio.holdings.iter_mut().find(|h| h.symbol == symbol) {
            h.shares -= filled;
            h.mark_price = price;
        }
        portfolio.holdings.retain(|h| h.shares > 0.0);

        FillResult {
            filled_quantity: filled,
            filled_notional: notional,
            fee_paid: fee,
            realized_pnl: realized,
            price,
        }
    }

    // -------------------------------------------------------------------------
    // Record assembly
    // -------------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        &self,
        ctx: &AgentContext,
        portfolio: &PortfolioState,
        source: DecisionSource,
        action: ActionKind,
        quantity: f64,
        requested_quantity: f64,
        fill: FillResult,
        confidence: f64,
        reasoning: String,
        execution_log: Vec<String>,
        error: Option<String>,
        external: Option<&ExternalDecision>,
    ) -> DecisionRecord {
        let now = Utc::now().to_rfc3339();
        let executed = action != ActionKind::Hold && fill.filled_quantity > 0.0;
        let confidence = confidence.clamp(CONF_MIN, CONF_MAX);

        let (stop_loss, take_profit) = match action {
            ActionKind::Buy if executed => (
                Some(round2(fill.price * (1.0 - STOP_LOSS_PCT))),
                Some(round2(fill.price * (1.0 + TAKE_PROFIT_PCT))),
            ),
            ActionKind::Sell if executed => (
                Some(round2(fill.price * (1.0 + STOP_LOSS_PCT))),
                Some(round2(fill.price * (1.0 - TAKE_PROFIT_PCT))),
            ),
            _ => (None, None),
        };

        let sub = SubDecision {
            action,
            symbol: ctx.symbol.clone(),
            quantity,
            requested_quantity,
            executed,
            filled_quantity: fill.filled_quantity,
            filled_notional: round2(fill.filled_notional),
            fee_paid: fill.fee_paid,
            realized_pnl: fill.realized_pnl,
            price: fill.price,
            stop_loss,
            take_profit,
            confidence,
            reasoning: truncate(&reasoning, 320),
            order_id: Uuid::new_v4().to_string(),
            timestamp: now.clone(),
            success: true,
            error,
        };

        let reasoning_steps_cn = reasoning_steps(ctx, source, &sub);

        DecisionRecord {
            timestamp: now,
            cycle_number: ctx.cycle_number,
            system_prompt: external.map(|e| e.system_prompt.clone()).unwrap_or_default(),
            input_prompt: external.map(|e| e.input_prompt.clone()).unwrap_or_default(),
            cot_trace: external.map(|e| e.cot_trace.clone()).unwrap_or_default(),
            decision_json: external
                .map(|e| e.raw_json.clone())
                .unwrap_or(serde_json::Value::Null),
            decision_source: source,
            account_state: AccountState::of(portfolio),
            positions: portfolio.holdings.clone(),
            candidate_coins: ctx.candidates.clone(),
            decisions: vec![sub],
            execution_log,
            success: true,
            error_message: None,
            reasoning_steps_cn,
        }
    }
}

// -----------------------------------------------------------------------------
// Helpers
// -----------------------------------------------------------------------------

struct FillResult {
    filled_quantity: f64,
    filled_notional: f64,
    fee_paid: f64,
    realized_pnl: f64,
    price: f64,
}

impl FillResult {
    fn none(price: f64) -> Self {
        Self {
            filled_quantity: 0.0,
            filled_notional: 0.0,
            fee_paid: 0.0,
            realized_pnl: 0.0,
            price,
        }
    }
}

pub fn lot_floor(shares: f64, lot: f64) -> f64 {
    if lot <= 0.0 || shares <= 0.0 {
        return 0.0;
    }
    (shares / lot).floor() * lot
}

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.chars().take(max_chars).collect()
}

fn join_reasoning(base: &str, notes: &[String]) -> String {
    if notes.is_empty() {
        return base.to_string();
    }
    format!("{base}; {}", notes.join("; "))
}

/// 2–4 short Chinese lines: data status, optional market overview, feature
/// snapshot, final action.
fn reasoning_steps(ctx: &AgentContext, source: DecisionSource, sub: &SubDecision) -> Vec<String> {
    let mut steps = Vec::with_capacity(4);

    match source {
        DecisionSource::ReadinessGate => steps.push("数据状态:不完整,触发保护性观望".to_string()),
        _ => steps.push("数据状态:行情与特征就绪".to_string()),
    }

    if source != DecisionSource::ReadinessGate {
        if let Some(note) = ctx.narratives.first() {
            steps.push(format!("市场回顾:{note}"));
        }
        let ret5 = ctx
            .features
            .intraday
            .ret_5
            .map(|v| format!("{:+.2}%", v * 100.0))
            .unwrap_or_else(|| "--".to_string());
        let rsi = ctx
            .features
            .daily
            .rsi_14
            .map(|v| format!("{v:.0}"))
            .unwrap_or_else(|| "--".to_string());
        steps.push(format!("特征:5分钟动量{ret5}, RSI {rsi}"));
    }

    let action_cn = match sub.action {
        ActionKind::Buy => "买入",
        ActionKind::Sell => "卖出",
        ActionKind::Hold => "观望",
    };
    if sub.action == ActionKind::Hold {
        steps.push(format!("决定:{action_cn} {}", sub.symbol));
    } else {
        steps.push(format!(
            "决定:{action_cn} {} {}股 @ {:.2}",
            sub.symbol, sub.filled_quantity, sub.price
        ));
    }

    steps.truncate(4);
    steps
}

// =============================================================================
// Tests
// =============================================================================
