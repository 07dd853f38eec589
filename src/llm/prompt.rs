// =============================================================================
// Prompt builders — universal instruction, style playbooks, context digest
// =============================================================================
//
// The system prompt stacks three layers: the universal trading contract,
// the style+risk playbook, and the trader's own persona fields from its
// manifest. The user payload is a compact JSON digest of the context; the
// token-saver variant shortens keys and truncates narrative text.
// =============================================================================

use crate::features::context::AgentContext;
use crate::store::registry::AgentManifest;
use crate::types::{RiskProfile, TradingStyle};

/// Contract every persona receives verbatim.
const UNIVERSAL_INSTRUCTION: &str = "\
You are an autonomous A-share trading agent in a simulated market. \
Objectives in priority order: maximize total return, then minimize drawdown, \
then maximize Sharpe. Shares trade in lots of 100; quantity_shares must be \
0 for hold and a positive multiple of 100 otherwise. HOLD is always a valid \
answer. Choose symbols only from the provided candidate list. Respond with \
JSON only, no prose.";

/// Style playbook text keyed by (trading_style, risk_profile).
pub fn style_playbook(style: TradingStyle, risk: RiskProfile) -> String {
    let style_text = match style {
        TradingStyle::MomentumTrend => {
            "Playbook momentum_trend: follow strong directional moves. Add on \
             sustained positive 5m/20m momentum with a bullish daily trend and \
             RSI below 72. Cut quickly when short momentum turns negative, the \
             trend flips bearish, or RSI runs past 72."
        }
        TradingStyle::MeanReversion => {
            "Playbook mean_reversion: fade stretched moves back to the mean. \
             Buy controlled pullbacks with RSI at or below 47 while the daily \
             trend is not bearish. Take profits into strength and exit when \
             RSI reaches 72 or a spike lacks trend support."
        }
        TradingStyle::EventDriven => {
            "Playbook event_driven: trade only when volume confirms an event. \
             Require vol_ratio_20 of at least 1.2 with positive momentum to \
             buy, and at least 1.35 with bearish confirmation to sell. Stand \
             aside on quiet tape."
        }
        TradingStyle::MacroSwing => {
            "Playbook macro_swing: position with the multi-week trend. Buy \
             bullish daily structure with RSI between 44 and 70 and 20m \
             momentum no worse than -0.2%. Reduce when the trend weakens, RSI \
             reaches 75, or 20m momentum breaks below -0.6%."
        }
    };
    let risk_text = match risk {
        RiskProfile::Conservative => {
            "Risk profile conservative: single-lot entries, prefer HOLD on \
             ambiguity, keep confidence modest."
        }
        RiskProfile::Balanced => {
            "Risk profile balanced: one to two lots on conviction, scale out \
             rather than reverse."
        }
        RiskProfile::Aggressive => {
            "Risk profile aggressive: up to two lots baseline and add one on \
             high conviction, but never fight the readiness gate."
        }
    };
    format!("{style_text}\n{risk_text}")
}

/// Full system prompt for one trader.
pub fn build_system_prompt(manifest: &AgentManifest) -> String {
    let style = manifest.trading_style.unwrap_or_default();
    let risk = manifest.risk_profile.unwrap_or_default();

    let mut prompt = String::with_capacity(1024);
    prompt.push_str(UNIVERSAL_INSTRUCTION);
    prompt.push_str("\n\n");
    prompt.push_str(&style_playbook(style, risk));

    if let Some(strategy) = &manifest.strategy_name {
        prompt.push_str(&format!("\nStrategy: {strategy}."));
    }
    if let Some(personality) = &manifest.personality {
        prompt.push_str(&format!("\nPersonality: {personality}"));
    }
    if let Some(style_cn) = &manifest.style_prompt_cn {
        prompt.push_str(&format!("\n交易风格提示: {style_cn}"));
    }
    prompt
}

/// Compact JSON digest of the context. `token_saver` shortens keys and
/// clips narrative text to keep the payload small in development.
pub fn build_user_prompt(ctx: &AgentContext, token_saver: bool) -> String {
    let f = &ctx.features;
    let narratives: Vec<String> = if token_saver {
        ctx.narratives
            .iter()
            .take(2)
            .map(|n| truncate(n, 48))
            .collect()
    } else {
        ctx.narratives.clone()
    };

    let candidates: Vec<serde_json::Value> = ctx
        .candidates
        .iter()
        .map(|c| {
            if token_saver {
                serde_json::json!({
                    "s": c.symbol,
                    "px": c.latest_price,
                    "r5": c.ret_5,
                    "r20": c.ret_20,
                    "vr": c.vol_ratio_20,
                    "rsi": c.rsi_14,
                    "pos": c.position_shares,
                })
            } else {
                serde_json::json!({
                    "symbol": c.symbol,
                    "latest_price": c.latest_price,
                    "ret_5": c.ret_5,
                    "ret_20": c.ret_20,
                    "vol_ratio_20": c.vol_ratio_20,
                    "rsi_14": c.rsi_14,
                    "rank_score": c.rank_score,
                    "position_shares": c.position_shares,
                })
            }
        })
        .collect();

    let payload = if token_saver {
        serde_json::json!({
            "cyc": ctx.cycle_number,
            "sym": ctx.symbol,
            "px": ctx.latest_price,
            "f": {
                "r5": f.intraday.ret_5,
                "r20": f.intraday.ret_20,
                "vr": f.intraday.vol_ratio_20,
                "s20": f.daily.sma_20,
                "s60": f.daily.sma_60,
                "rsi": f.daily.rsi_14,
                "atr": f.daily.atr_14,
            },
            "trend": ctx.trend,
            "news": narratives,
            "cands": candidates,
        })
    } else {
        serde_json::json!({
            "cycle_number": ctx.cycle_number,
            "symbol": ctx.symbol,
            "latest_price": ctx.latest_price,
            "features": {
                "intraday": {
                    "ret_5": f.intraday.ret_5,
                    "ret_20": f.intraday.ret_20,
                    "atr_14": f.intraday.atr_14,
                    "vol_ratio_20": f.intraday.vol_ratio_20,
                },
                "daily": {
                    "sma_20": f.daily.sma_20,
                    "sma_60": f.daily.sma_60,
                    "rsi_14": f.daily.rsi_14,
                    "atr_14": f.daily.atr_14,
                    "range_20d_pct": f.daily.range_20d_pct,
                },
            },
            "trend": ctx.trend,
            "narratives": narratives,
            "candidates": candidates,
        })
    };
    payload.to_string()
}

/// Maximum reasoning length accepted back from the model.
pub fn reasoning_limit(token_saver: bool) -> usize {
    if token_saver {
        160
    } else {
        320
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.chars().take(max_chars).collect()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::context::{Candidate, FeatureSet, TrendState};

    fn manifest() -> AgentManifest {
        AgentManifest {
            agent_id: "trader_one".to_string(),
            agent_name: "Trader One".to_string(),
            ai_model: "gpt-4o-mini".to_string(),
            exchange_id: "cn-a".to_string(),
            strategy_name: Some("steady_momentum".to_string()),
            trading_style: Some(TradingStyle::MeanReversion),
            risk_profile: Some(RiskProfile::Conservative),
            personality: Some("patient and contrarian".to_string()),
            style_prompt_cn: Some("逢低吸纳，快进快出".to_string()),
            avatar: None,
            stock_pool: vec!["600519".to_string()],
        }
    }

    fn ctx() -> AgentContext {
        AgentContext {
            trader_id: "trader_one".to_string(),
            cycle_number: 9,
            symbol: "600519".to_string(),
            as_of_ts_ms: 0,
            latest_price: 1510.2,
            features: FeatureSet::default(),
            trend: TrendState::Sideways,
            narratives: vec![
                "past 126d: price +12.0%, volume -3.0% vs prior window".to_string(),
                "past 21d: price -1.0%, volume +8.0% vs prior window".to_string(),
                "past 5d: price +0.5%, volume +1.0% vs prior window".to_string(),
            ],
            candidates: vec![Candidate {
                symbol: "600519".to_string(),
                latest_price: 1510.2,
                ret_5: Some(0.001),
                ret_20: Some(-0.002),
                vol_ratio_20: Some(1.3),
                rsi_14: Some(48.0),
                rank_score: -1.0,
                position_shares: 0.0,
            }],
            intraday_len: 180,
            daily_len: 90,
            opening_phase_active: false,
        }
    }

    #[test]
    fn system_prompt_stacks_all_layers() {
        let prompt = build_system_prompt(&manifest());
        assert!(prompt.contains("lots of 100"));
        assert!(prompt.contains("mean_reversion"));
        assert!(prompt.contains("conservative"));
        assert!(prompt.contains("steady_momentum"));
        assert!(prompt.contains("patient and contrarian"));
        assert!(prompt.contains("逢低吸纳"));
    }

    #[test]
    fn playbooks_differ_by_style() {
        let a = style_playbook(TradingStyle::MomentumTrend, RiskProfile::Balanced);
        let b = style_playbook(TradingStyle::EventDriven, RiskProfile::Balanced);
        assert_ne!(a, b);
        assert!(b.contains("vol_ratio_20"));
    }

    #[test]
    fn user_prompt_is_valid_json_with_candidates() {
        let prompt = build_user_prompt(&ctx(), false);
        let parsed: serde_json::Value = serde_json::from_str(&prompt).unwrap();
        assert_eq!(parsed["symbol"], "600519");
        assert_eq!(parsed["candidates"][0]["symbol"], "600519");
        assert_eq!(parsed["cycle_number"], 9);
    }

    #[test]
    fn token_saver_is_smaller() {
        let full = build_user_prompt(&ctx(), false);
        let compact = build_user_prompt(&ctx(), true);
        assert!(compact.len() < full.len());
        let parsed: serde_json::Value = serde_json::from_str(&compact).unwrap();
        assert_eq!(parsed["sym"], "600519");
        // Narratives truncated to two clipped entries.
        assert_eq!(parsed["news"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn reasoning_limits() {
        assert_eq!(reasoning_limit(false), 320);
        assert_eq!(reasoning_limit(true), 160);
    }
}
