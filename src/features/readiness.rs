// =============================================================================
// Data readiness — classifies context completeness as OK / WARN / ERROR
// =============================================================================
//
// Levels only ever move up (OK < WARN < ERROR). ERROR force-holds the cycle
// downstream; WARN trades with caution notes. The opening-phase softening
// lets the first minutes of a session through with a shallow intraday tape,
// provided nothing fatal is wrong.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::features::context::AgentContext;

/// OK < WARN < ERROR; ordering is load-bearing for the monotone bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReadinessLevel {
    Ok,
    Warn,
    Error,
}

impl std::fmt::Display for ReadinessLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::Warn => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadinessMetrics {
    pub intraday_len: usize,
    pub daily_len: usize,
    pub age_ms: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadinessReport {
    pub level: ReadinessLevel,
    pub reasons: Vec<String>,
    pub opening_phase_active: bool,
    pub metrics: ReadinessMetrics,
}

#[derive(Debug, Clone)]
pub struct ReadinessConfig {
    pub min_intraday: usize,
    pub min_daily: usize,
    pub freshness_warn_ms: i64,
    pub freshness_error_ms: i64,
    pub opening_phase_enabled: bool,
    pub opening_phase_min_intraday: usize,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            min_intraday: 21,
            min_daily: 61,
            freshness_warn_ms: 150_000,
            freshness_error_ms: 330_000,
            opening_phase_enabled: true,
            opening_phase_min_intraday: 3,
        }
    }
}

/// Core features whose absence is always fatal.
const CORE_FEATURES: [&str; 4] = [
    "intraday.ret_5",
    "daily.sma_20",
    "daily.sma_60",
    "daily.rsi_14",
];

/// Features the opening-phase softening downgrades to pending.
const OPENING_FLEXIBLE_FEATURES: [&str; 3] =
    ["intraday.ret_20", "intraday.atr_14", "intraday.vol_ratio_20"];

struct Finding {
    reason: String,
    level: ReadinessLevel,
}

/// Evaluate readiness of a built context at instant `now_ms`.
pub fn evaluate(ctx: &AgentContext, config: &ReadinessConfig, now_ms: i64) -> ReadinessReport {
    let mut findings: Vec<Finding> = Vec::new();

    if ctx.intraday_len < config.min_intraday {
        findings.push(Finding {
            reason: "intraday_frames_insufficient".to_string(),
            level: ReadinessLevel::Error,
        });
    }
    if ctx.daily_len < config.min_daily {
        findings.push(Finding {
            reason: "daily_frames_insufficient".to_string(),
            level: ReadinessLevel::Error,
        });
    }

    for name in CORE_FEATURES {
        if feature_value(ctx, name).is_none() {
            findings.push(Finding {
                reason: format!("feature_missing:{name}"),
                level: ReadinessLevel::Error,
            });
        }
    }
    for name in OPENING_FLEXIBLE_FEATURES {
        if feature_value(ctx, name).is_none() {
            findings.push(Finding {
                reason: format!("feature_missing:{name}"),
                level: ReadinessLevel::Error,
            });
        }
    }

    let age_ms = now_ms - ctx.as_of_ts_ms;
    if age_ms > config.freshness_error_ms {
        findings.push(Finding {
            reason: "data_too_stale".to_string(),
            level: ReadinessLevel::Error,
        });
    } else if age_ms > config.freshness_warn_ms {
        findings.push(Finding {
            reason: "data_stale".to_string(),
            level: ReadinessLevel::Warn,
        });
    }

    // --- Opening-phase softening --------------------------------------------
    let mut opening_phase_active = false;
    let in_opening_window = config.opening_phase_enabled
        && ctx.intraday_len >= config.opening_phase_min_intraday
        && ctx.intraday_len < config.min_intraday;
    if in_opening_window && !has_fatal_finding(&findings) {
        opening_phase_active = true;
        findings.retain(|f| f.reason != "intraday_frames_insufficient");
        for f in &mut findings {
            if let Some(name) = f.reason.strip_prefix("feature_missing:") {
                if OPENING_FLEXIBLE_FEATURES.contains(&name) {
                    f.reason = format!("feature_pending:{name}");
                    f.level = ReadinessLevel::Warn;
                }
            }
        }
        findings.insert(
            0,
            Finding {
                reason: "opening_phase_limited_intraday_history".to_string(),
                level: ReadinessLevel::Warn,
            },
        );
    }

    let level = findings
        .iter()
        .map(|f| f.level)
        .max()
        .unwrap_or(ReadinessLevel::Ok);

    ReadinessReport {
        level,
        reasons: findings.into_iter().map(|f| f.reason).collect(),
        opening_phase_active,
        metrics: ReadinessMetrics {
            intraday_len: ctx.intraday_len,
            daily_len: ctx.daily_len,
            age_ms,
        },
    }
}

/// A finding that blocks the opening-phase softening: anything fatal beyond
/// the shallow intraday tape itself.
fn has_fatal_finding(findings: &[Finding]) -> bool {
    findings.iter().any(|f| {
        if f.reason == "daily_frames_insufficient" || f.reason == "data_too_stale" {
            return true;
        }
        if let Some(name) = f.reason.strip_prefix("feature_missing:") {
            return CORE_FEATURES.contains(&name);
        }
        false
    })
}

fn feature_value(ctx: &AgentContext, name: &str) -> Option<f64> {
    match name {
        "intraday.ret_5" => ctx.features.intraday.ret_5,
        "intraday.ret_20" => ctx.features.intraday.ret_20,
        "intraday.atr_14" => ctx.features.intraday.atr_14,
        "intraday.vol_ratio_20" => ctx.features.intraday.vol_ratio_20,
        "daily.sma_20" => ctx.features.daily.sma_20,
        "daily.sma_60" => ctx.features.daily.sma_60,
        "daily.rsi_14" => ctx.features.daily.rsi_14,
        _ => None,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::context::{
        DailyFeatures, FeatureSet, IntradayFeatures, TrendState,
    };

    fn full_features() -> FeatureSet {
        FeatureSet {
            intraday: IntradayFeatures {
                ret_5: Some(0.001),
                ret_20: Some(0.002),
                atr_14: Some(0.5),
                vol_ratio_20: Some(1.1),
            },
            daily: DailyFeatures {
                sma_20: Some(100.0),
                sma_60: Some(98.0),
                rsi_14: Some(55.0),
                atr_14: Some(2.0),
                range_20d_pct: Some(0.08),
            },
        }
    }

    fn ctx(intraday_len: usize, daily_len: usize, features: FeatureSet) -> AgentContext {
        AgentContext {
            trader_id: "trader_one".to_string(),
            cycle_number: 1,
            symbol: "600519".to_string(),
            as_of_ts_ms: 1_000_000,
            latest_price: 100.0,
            features,
            trend: TrendState::Sideways,
            narratives: Vec::new(),
            candidates: Vec::new(),
            intraday_len,
            daily_len,
            opening_phase_active: false,
        }
    }

    fn fresh_now(ctx: &AgentContext) -> i64 {
        ctx.as_of_ts_ms + 1_000
    }

    #[test]
    fn complete_context_is_ok() {
        let c = ctx(180, 90, full_features());
        let report = evaluate(&c, &ReadinessConfig::default(), fresh_now(&c));
        assert_eq!(report.level, ReadinessLevel::Ok);
        assert!(report.reasons.is_empty());
        assert!(!report.opening_phase_active);
    }

    #[test]
    fn one_below_min_intraday_is_error_without_opening_phase() {
        let config = ReadinessConfig {
            opening_phase_enabled: false,
            ..Default::default()
        };
        let c = ctx(config.min_intraday - 1, 90, full_features());
        let report = evaluate(&c, &config, fresh_now(&c));
        assert_eq!(report.level, ReadinessLevel::Error);
        assert!(report
            .reasons
            .contains(&"intraday_frames_insufficient".to_string()));
    }

    #[test]
    fn missing_core_feature_is_error() {
        let mut features = full_features();
        features.daily.rsi_14 = None;
        let c = ctx(180, 90, features);
        let report = evaluate(&c, &ReadinessConfig::default(), fresh_now(&c));
        assert_eq!(report.level, ReadinessLevel::Error);
        assert!(report
            .reasons
            .contains(&"feature_missing:daily.rsi_14".to_string()));
    }

    #[test]
    fn freshness_warn_then_error() {
        let config = ReadinessConfig::default();
        let c = ctx(180, 90, full_features());
        let warn = evaluate(&c, &config, c.as_of_ts_ms + config.freshness_warn_ms + 1);
        assert_eq!(warn.level, ReadinessLevel::Warn);
        assert!(warn.reasons.contains(&"data_stale".to_string()));

        let error = evaluate(&c, &config, c.as_of_ts_ms + config.freshness_error_ms + 1);
        assert_eq!(error.level, ReadinessLevel::Error);
        assert!(error.reasons.contains(&"data_too_stale".to_string()));
    }

    #[test]
    fn opening_phase_softens_shallow_intraday() {
        // Three 1m bars: ret_5 present would be false normally, so feed a
        // feature set where the core intraday feature exists but flexible
        // ones are missing.
        let mut features = full_features();
        features.intraday.ret_20 = None;
        features.intraday.vol_ratio_20 = None;
        let config = ReadinessConfig {
            opening_phase_min_intraday: 2,
            ..Default::default()
        };
        let c = ctx(3, 90, features);
        let report = evaluate(&c, &config, fresh_now(&c));

        assert_eq!(report.level, ReadinessLevel::Warn);
        assert!(report.opening_phase_active);
        assert_eq!(
            report.reasons[0],
            "opening_phase_limited_intraday_history"
        );
        assert!(report
            .reasons
            .contains(&"feature_pending:intraday.ret_20".to_string()));
        assert!(report
            .reasons
            .contains(&"feature_pending:intraday.vol_ratio_20".to_string()));
        assert!(!report
            .reasons
            .iter()
            .any(|r| r == "intraday_frames_insufficient"));
    }

    #[test]
    fn opening_phase_blocked_by_fatal_reason() {
        let mut features = full_features();
        features.intraday.ret_20 = None;
        let config = ReadinessConfig {
            opening_phase_min_intraday: 2,
            ..Default::default()
        };
        // Daily history also short: fatal, no softening.
        let c = ctx(3, 10, features);
        let report = evaluate(&c, &config, fresh_now(&c));
        assert_eq!(report.level, ReadinessLevel::Error);
        assert!(!report.opening_phase_active);
        assert!(report
            .reasons
            .contains(&"daily_frames_insufficient".to_string()));
        assert!(report
            .reasons
            .contains(&"feature_missing:intraday.ret_20".to_string()));
    }

    #[test]
    fn below_opening_floor_stays_error() {
        let config = ReadinessConfig {
            opening_phase_min_intraday: 3,
            ..Default::default()
        };
        let c = ctx(2, 90, full_features());
        let report = evaluate(&c, &config, fresh_now(&c));
        assert_eq!(report.level, ReadinessLevel::Error);
        assert!(!report.opening_phase_active);
    }

    #[test]
    fn level_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&ReadinessLevel::Warn).unwrap(),
            "\"WARN\""
        );
    }
}
