// =============================================================================
// Heuristic baseline — per-style rule decisions used when no LLM answer lands
// =============================================================================
//
// Four playbooks mirror the style prompts given to the model, so the
// fallback behaves like a cautious version of the persona it replaces.
// Missing opening-flexible features degrade to neutral values rather than
// blocking (the readiness gate has already vouched for the core set).
// =============================================================================

use crate::features::context::{AgentContext, TrendState};
use crate::types::{ActionKind, RiskProfile, TradingStyle};

/// Confidence bounds for rule decisions. The LLM path may go to 0.95; the
/// heuristic stays a notch humbler.
pub const HEURISTIC_CONF_MIN: f64 = 0.51;
pub const HEURISTIC_CONF_MAX: f64 = 0.92;

/// Baseline produced by the rules: an action, a confidence and a size in
/// lots (before guardrails).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeuristicDecision {
    pub action: ActionKind,
    pub confidence: f64,
    pub lots: u64,
}

/// Evaluate the style playbook for one context.
pub fn evaluate(
    ctx: &AgentContext,
    style: TradingStyle,
    risk: RiskProfile,
    held_shares: f64,
) -> HeuristicDecision {
    let ret_5 = ctx.features.intraday.ret_5.unwrap_or(0.0);
    let ret_20 = ctx.features.intraday.ret_20.unwrap_or(0.0);
    let rsi = ctx.features.daily.rsi_14.unwrap_or(50.0);
    let vol_ratio = ctx.features.intraday.vol_ratio_20.unwrap_or(1.0);
    let trend = ctx.trend;

    let action = match style {
        TradingStyle::MomentumTrend => momentum_trend(ret_5, ret_20, rsi, trend),
        TradingStyle::MeanReversion => mean_reversion(ret_5, rsi, trend),
        TradingStyle::EventDriven => event_driven(ret_5, vol_ratio, trend),
        TradingStyle::MacroSwing => macro_swing(ret_20, rsi, trend),
    };

    // Selling nothing is a hold; the engine's long-only guard would coerce
    // anyway, but the baseline should not manufacture phantom sells.
    let action = if action == ActionKind::Sell && held_shares <= 0.0 {
        ActionKind::Hold
    } else {
        action
    };

    let confidence = confidence_for(action, ret_5, rsi, vol_ratio, style, risk);
    let lots = lots_for(action, confidence, style, risk);

    HeuristicDecision {
        action,
        confidence,
        lots,
    }
}

// -----------------------------------------------------------------------------
// Style playbooks
// -----------------------------------------------------------------------------

fn momentum_trend(ret_5: f64, ret_20: f64, rsi: f64, trend: TrendState) -> ActionKind {
    if ret_5 <= -0.0014 || ret_20 <= -0.003 || rsi >= 72.0 || trend == TrendState::Bearish {
        return ActionKind::Sell;
    }
    if (ret_5 >= 0.0012 || ret_20 >= 0.003) && trend == TrendState::Bullish && rsi <= 72.0 {
        return ActionKind::Buy;
    }
    ActionKind::Hold
}

fn mean_reversion(ret_5: f64, rsi: f64, trend: TrendState) -> ActionKind {
    if rsi >= 72.0 || (ret_5 >= 0.006 && trend != TrendState::Bullish) {
        return ActionKind::Sell;
    }
    if ret_5 <= -0.0035 && rsi <= 47.0 && trend != TrendState::Bearish {
        return ActionKind::Buy;
    }
    ActionKind::Hold
}

fn event_driven(ret_5: f64, vol_ratio: f64, trend: TrendState) -> ActionKind {
    if vol_ratio >= 1.35 && (ret_5 < 0.0 || trend == TrendState::Bearish) {
        return ActionKind::Sell;
    }
    if vol_ratio >= 1.2 && ret_5 > 0.0 && trend != TrendState::Bearish {
        return ActionKind::Buy;
    }
    ActionKind::Hold
}

fn macro_swing(ret_20: f64, rsi: f64, trend: TrendState) -> ActionKind {
    if trend == TrendState::Bearish || rsi >= 75.0 || ret_20 <= -0.006 {
        return ActionKind::Sell;
    }
    if trend == TrendState::Bullish && (44.0..=70.0).contains(&rsi) && ret_20 >= -0.002 {
        return ActionKind::Buy;
    }
    ActionKind::Hold
}

// -----------------------------------------------------------------------------
// Sizing & confidence
// -----------------------------------------------------------------------------

fn confidence_for(
    action: ActionKind,
    ret_5: f64,
    rsi: f64,
    vol_ratio: f64,
    style: TradingStyle,
    risk: RiskProfile,
) -> f64 {
    if action == ActionKind::Hold {
        return 0.55;
    }

    let momentum_edge = (ret_5.abs() * 25.0).min(0.12);
    let rsi_edge = ((rsi - 50.0).abs() / 50.0) * 0.08;
    let style_edge = match style {
        TradingStyle::EventDriven if vol_ratio >= 1.5 => 0.02,
        _ => 0.0,
    };
    let risk_edge = match risk {
        RiskProfile::Aggressive => 0.03,
        RiskProfile::Balanced => 0.0,
        RiskProfile::Conservative => -0.02,
    };

    (0.58 + momentum_edge + rsi_edge + style_edge + risk_edge)
        .clamp(HEURISTIC_CONF_MIN, HEURISTIC_CONF_MAX)
}

fn lots_for(action: ActionKind, confidence: f64, style: TradingStyle, risk: RiskProfile) -> u64 {
    if action == ActionKind::Hold {
        return 0;
    }
    let mut lots: u64 = match risk {
        RiskProfile::Conservative => 1,
        RiskProfile::Balanced => 1,
        RiskProfile::Aggressive => 2,
    };
    if confidence >= 0.82 && risk != RiskProfile::Conservative {
        lots += 1;
    }
    // Macro swing scales in slowly unless the profile is aggressive.
    if style == TradingStyle::MacroSwing && risk != RiskProfile::Aggressive {
        lots = lots.min(1);
    }
    lots
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::context::{DailyFeatures, FeatureSet, IntradayFeatures};

    fn ctx_with(
        ret_5: f64,
        ret_20: f64,
        rsi: f64,
        vol_ratio: f64,
        trend: TrendState,
    ) -> AgentContext {
        AgentContext {
            trader_id: "t".to_string(),
            cycle_number: 1,
            symbol: "600519".to_string(),
            as_of_ts_ms: 0,
            latest_price: 100.0,
            features: FeatureSet {
                intraday: IntradayFeatures {
                    ret_5: Some(ret_5),
                    ret_20: Some(ret_20),
                    atr_14: Some(0.5),
                    vol_ratio_20: Some(vol_ratio),
                },
                daily: DailyFeatures {
                    sma_20: Some(100.0),
                    sma_60: Some(100.0),
                    rsi_14: Some(rsi),
                    atr_14: Some(1.0),
                    range_20d_pct: Some(0.05),
                },
            },
            trend,
            narratives: Vec::new(),
            candidates: Vec::new(),
            intraday_len: 180,
            daily_len: 90,
            opening_phase_active: false,
        }
    }

    #[test]
    fn momentum_buys_with_trend() {
        let ctx = ctx_with(0.002, 0.004, 55.0, 1.0, TrendState::Bullish);
        let d = evaluate(&ctx, TradingStyle::MomentumTrend, RiskProfile::Balanced, 0.0);
        assert_eq!(d.action, ActionKind::Buy);
        assert!(d.lots >= 1);
        assert!((HEURISTIC_CONF_MIN..=HEURISTIC_CONF_MAX).contains(&d.confidence));
    }

    #[test]
    fn momentum_sells_on_overbought_when_holding() {
        let ctx = ctx_with(0.0, 0.0, 80.0, 1.0, TrendState::Bullish);
        let d = evaluate(&ctx, TradingStyle::MomentumTrend, RiskProfile::Balanced, 300.0);
        assert_eq!(d.action, ActionKind::Sell);
    }

    #[test]
    fn sell_signal_without_holdings_becomes_hold() {
        let ctx = ctx_with(0.0, 0.0, 80.0, 1.0, TrendState::Bullish);
        let d = evaluate(&ctx, TradingStyle::MomentumTrend, RiskProfile::Balanced, 0.0);
        assert_eq!(d.action, ActionKind::Hold);
        assert_eq!(d.lots, 0);
    }

    #[test]
    fn mean_reversion_buys_pullback() {
        let ctx = ctx_with(-0.005, 0.0, 40.0, 1.0, TrendState::Sideways);
        let d = evaluate(&ctx, TradingStyle::MeanReversion, RiskProfile::Balanced, 0.0);
        assert_eq!(d.action, ActionKind::Buy);
    }

    #[test]
    fn mean_reversion_avoids_bearish_knife() {
        let ctx = ctx_with(-0.005, 0.0, 40.0, 1.0, TrendState::Bearish);
        let d = evaluate(&ctx, TradingStyle::MeanReversion, RiskProfile::Balanced, 0.0);
        assert_eq!(d.action, ActionKind::Hold);
    }

    #[test]
    fn event_driven_needs_volume() {
        let quiet = ctx_with(0.003, 0.0, 50.0, 1.0, TrendState::Bullish);
        let d = evaluate(&quiet, TradingStyle::EventDriven, RiskProfile::Balanced, 0.0);
        assert_eq!(d.action, ActionKind::Hold);

        let busy = ctx_with(0.003, 0.0, 50.0, 1.4, TrendState::Bullish);
        let d = evaluate(&busy, TradingStyle::EventDriven, RiskProfile::Balanced, 0.0);
        assert_eq!(d.action, ActionKind::Buy);
    }

    #[test]
    fn macro_swing_band() {
        let ctx = ctx_with(0.0, 0.001, 55.0, 1.0, TrendState::Bullish);
        let d = evaluate(&ctx, TradingStyle::MacroSwing, RiskProfile::Balanced, 0.0);
        assert_eq!(d.action, ActionKind::Buy);
        // Non-aggressive macro swing is capped at one lot.
        assert_eq!(d.lots, 1);

        let weak = ctx_with(0.0, -0.01, 55.0, 1.0, TrendState::Bullish);
        let d = evaluate(&weak, TradingStyle::MacroSwing, RiskProfile::Balanced, 200.0);
        assert_eq!(d.action, ActionKind::Sell);
    }

    #[test]
    fn aggressive_sizes_bigger() {
        let ctx = ctx_with(0.004, 0.005, 55.0, 1.0, TrendState::Bullish);
        let balanced = evaluate(&ctx, TradingStyle::MomentumTrend, RiskProfile::Balanced, 0.0);
        let aggressive = evaluate(&ctx, TradingStyle::MomentumTrend, RiskProfile::Aggressive, 0.0);
        assert!(aggressive.lots > balanced.lots);
        assert!(aggressive.confidence > balanced.confidence);
    }

    #[test]
    fn hold_has_neutral_confidence_and_zero_lots() {
        let ctx = ctx_with(0.0, 0.0, 50.0, 1.0, TrendState::Sideways);
        let d = evaluate(&ctx, TradingStyle::MomentumTrend, RiskProfile::Balanced, 0.0);
        assert_eq!(d.action, ActionKind::Hold);
        assert_eq!(d.lots, 0);
        assert!((d.confidence - 0.55).abs() < 1e-9);
    }
}
