// =============================================================================
// Context builder — assembles the per-(trader, cycle) decision context
// =============================================================================
//
// One evaluation picks a symbol from the trader's pool by deterministic
// rotation, pulls intraday (1m, last 180) and daily (1d, last 90) frames,
// computes the feature set, renders the price/volume narratives and ranks
// the candidate pool.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::features::{atr, range_pct, ret_k, sma, vol_ratio, wilder_rsi};
use crate::market::frame::BarFrame;
use crate::market::generator::stable_hash64;
use crate::market::live_file::LiveFileProvider;
use crate::market::{FrameQuery, MarketDataError, MarketDataService};
use crate::types::DataMode;

pub const INTRADAY_LOOKBACK: usize = 180;
pub const DAILY_LOOKBACK: usize = 90;

/// Narrative horizons in trading days (the 1-day entry compares the last
/// session against the one before it).
const NARRATIVE_HORIZONS: [usize; 4] = [126, 21, 5, 1];

// -----------------------------------------------------------------------------
// Errors
// -----------------------------------------------------------------------------

/// Failures that abort one trader's cycle (counted as failed, isolated from
/// the rest of the fleet).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    /// The trader has no usable symbol universe.
    NoLiveSymbolPool,
    /// Strict live mode and the live snapshot has gone stale.
    LiveFileStale,
    /// Strict live mode and the live snapshot is erroring.
    LiveFileError(String),
    /// The market data service refused the query.
    Market(MarketDataError),
}

impl std::fmt::Display for ContextError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoLiveSymbolPool => write!(f, "no_live_symbol_pool"),
            Self::LiveFileStale => write!(f, "live_file_stale"),
            Self::LiveFileError(e) => write!(f, "live_file_error: {e}"),
            Self::Market(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ContextError {}

// -----------------------------------------------------------------------------
// Feature payloads
// -----------------------------------------------------------------------------

/// Intraday (1m) feature block.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IntradayFeatures {
    pub ret_5: Option<f64>,
    pub ret_20: Option<f64>,
    pub atr_14: Option<f64>,
    pub vol_ratio_20: Option<f64>,
}

/// Daily (1d) feature block.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DailyFeatures {
    pub sma_20: Option<f64>,
    pub sma_60: Option<f64>,
    pub rsi_14: Option<f64>,
    pub atr_14: Option<f64>,
    pub range_20d_pct: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FeatureSet {
    pub intraday: IntradayFeatures,
    pub daily: DailyFeatures,
}

/// Daily-trend classification used by the heuristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendState {
    Bullish,
    Bearish,
    Sideways,
}

impl Default for TrendState {
    fn default() -> Self {
        Self::Sideways
    }
}

/// One entry of the candidate set offered to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub symbol: String,
    pub latest_price: f64,
    pub ret_5: Option<f64>,
    pub ret_20: Option<f64>,
    pub vol_ratio_20: Option<f64>,
    pub rsi_14: Option<f64>,
    pub rank_score: f64,
    pub position_shares: f64,
}

/// Everything the decision pipeline needs for one (trader, cycle).
#[derive(Debug, Clone, Serialize)]
pub struct AgentContext {
    pub trader_id: String,
    pub cycle_number: u64,
    pub symbol: String,
    pub as_of_ts_ms: i64,
    pub latest_price: f64,
    pub features: FeatureSet,
    pub trend: TrendState,
    pub narratives: Vec<String>,
    pub candidates: Vec<Candidate>,
    #[serde(skip)]
    pub intraday_len: usize,
    #[serde(skip)]
    pub daily_len: usize,
    /// Set by the readiness evaluator when the opening-phase softening is
    /// active; the engine caps sizing accordingly.
    pub opening_phase_active: bool,
}

// -----------------------------------------------------------------------------
// Deterministic selection helpers
// -----------------------------------------------------------------------------

/// Rotation index into the pool: `|hash(trader_id) + cycle| mod len(pool)`.
pub fn pick_symbol_index(trader_id: &str, cycle: u64, pool_len: usize) -> usize {
    if pool_len == 0 {
        return 0;
    }
    (stable_hash64(trader_id).wrapping_add(cycle) % pool_len as u64) as usize
}

/// Candidate ordering score, lower = better: momentum magnitude plus excess
/// volume activity, negated. Ties are broken lexicographically by symbol so
/// the ordering is a total order.
pub fn rank_score(ret_5: Option<f64>, ret_20: Option<f64>, vol_ratio_20: Option<f64>) -> f64 {
    let r5 = ret_5.unwrap_or(0.0).abs() * 400.0;
    let r20 = ret_20.unwrap_or(0.0).abs() * 100.0;
    let excess_vol = (vol_ratio_20.unwrap_or(1.0) - 1.0).max(0.0);
    -(r5 + r20 + excess_vol)
}

// -----------------------------------------------------------------------------
// Builder
// -----------------------------------------------------------------------------

pub struct ContextBuilder {
    market: Arc<MarketDataService>,
    /// Present in live_file mode; consulted for strict-mode staleness.
    live: Option<Arc<LiveFileProvider>>,
    data_mode: DataMode,
    strict_live: bool,
}

impl ContextBuilder {
    pub fn new(
        market: Arc<MarketDataService>,
        live: Option<Arc<LiveFileProvider>>,
        data_mode: DataMode,
        strict_live: bool,
    ) -> Self {
        Self {
            market,
            live,
            data_mode,
            strict_live,
        }
    }

    /// Build the context for one trader evaluation.
    ///
    /// `holdings` maps symbol -> shares and feeds `position_shares` on each
    /// candidate.
    pub async fn build(
        &self,
        trader_id: &str,
        cycle: u64,
        stock_pool: &[String],
        holdings: &HashMap<String, f64>,
    ) -> Result<AgentContext, ContextError> {
        if self.strict_live && self.data_mode == DataMode::LiveFile {
            if let Some(live) = &self.live {
                let status = live.status();
                if let Some(err) = status.last_error.clone() {
                    if !status.has_last_good {
                        return Err(ContextError::LiveFileError(err));
                    }
                }
                if status.stale {
                    return Err(ContextError::LiveFileStale);
                }
            }
        }

        let pool: Vec<String> = if stock_pool.is_empty() {
            self.market.symbols()
        } else {
            stock_pool.to_vec()
        };
        if pool.is_empty() {
            return Err(ContextError::NoLiveSymbolPool);
        }

        let symbol = pool[pick_symbol_index(trader_id, cycle, pool.len())].clone();

        let intraday = self
            .fetch(&symbol, "1m", INTRADAY_LOOKBACK)
            .await
            .map_err(ContextError::Market)?;
        let daily = self
            .fetch(&symbol, "1d", DAILY_LOOKBACK)
            .await
            .map_err(ContextError::Market)?;

        let features = compute_features(&intraday, &daily);
        let trend = classify_trend(&features.daily, last_close(&daily));
        let narratives = build_narratives(&daily);

        let latest_price = last_close(&intraday)
            .or_else(|| last_close(&daily))
            .unwrap_or(0.0);
        let as_of_ts_ms = intraday
            .last()
            .map(|f| f.window.end_ts_ms)
            .unwrap_or_else(|| Utc::now().timestamp_millis());

        let candidates = self
            .rank_candidates(&symbol, &pool, holdings, &intraday, &daily, &features)
            .await;

        debug!(
            trader_id,
            cycle,
            symbol = %symbol,
            intraday = intraday.len(),
            daily = daily.len(),
            "context assembled"
        );

        Ok(AgentContext {
            trader_id: trader_id.to_string(),
            cycle_number: cycle,
            symbol,
            as_of_ts_ms,
            latest_price,
            features,
            trend,
            narratives,
            candidates,
            intraday_len: intraday.len(),
            daily_len: daily.len(),
            opening_phase_active: false,
        })
    }

    async fn fetch(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<BarFrame>, MarketDataError> {
        let batch = self
            .market
            .frames(&FrameQuery {
                symbol: symbol.to_string(),
                interval: interval.to_string(),
                limit,
            })
            .await?;
        Ok(batch.frames)
    }

    /// Assemble the candidate set: the selected symbol first, the remaining
    /// pool ordered by ascending rank_score (lower = better), symbol
    /// lexicographic tie-break.
    async fn rank_candidates(
        &self,
        selected: &str,
        pool: &[String],
        holdings: &HashMap<String, f64>,
        selected_intraday: &[BarFrame],
        selected_daily: &[BarFrame],
        selected_features: &FeatureSet,
    ) -> Vec<Candidate> {
        let mut rest: Vec<Candidate> = Vec::new();
        let mut first: Option<Candidate> = None;

        for symbol in pool {
            let candidate = if symbol == selected {
                candidate_from_features(
                    symbol,
                    selected_features,
                    last_close(selected_intraday).or_else(|| last_close(selected_daily)),
                    holdings,
                )
            } else {
                // Shallow pull for the rest of the pool: enough history for
                // the candidate features without the full lookback cost.
                let intraday = self.fetch(symbol, "1m", 30).await.unwrap_or_default();
                let daily = self.fetch(symbol, "1d", 20).await.unwrap_or_default();
                let features = compute_features(&intraday, &daily);
                candidate_from_features(
                    symbol,
                    &features,
                    last_close(&intraday).or_else(|| last_close(&daily)),
                    holdings,
                )
            };
            if symbol == selected {
                first = Some(candidate);
            } else {
                rest.push(candidate);
            }
        }

        rest.sort_by(|a, b| {
            a.rank_score
                .partial_cmp(&b.rank_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });

        let mut out = Vec::with_capacity(rest.len() + 1);
        if let Some(c) = first {
            out.push(c);
        }
        out.extend(rest);
        out
    }
}

// -----------------------------------------------------------------------------
// Pure assembly helpers
// -----------------------------------------------------------------------------

fn last_close(frames: &[BarFrame]) -> Option<f64> {
    frames.last().map(|f| f.close)
}

pub fn compute_features(intraday: &[BarFrame], daily: &[BarFrame]) -> FeatureSet {
    let intraday_closes: Vec<f64> = intraday.iter().map(|f| f.close).collect();
    let intraday_volumes: Vec<f64> = intraday.iter().map(|f| f.volume_shares).collect();
    let daily_closes: Vec<f64> = daily.iter().map(|f| f.close).collect();

    FeatureSet {
        intraday: IntradayFeatures {
            ret_5: ret_k(&intraday_closes, 5),
            ret_20: ret_k(&intraday_closes, 20),
            atr_14: atr(intraday, 14),
            vol_ratio_20: vol_ratio(&intraday_volumes, 20),
        },
        daily: DailyFeatures {
            sma_20: sma(&daily_closes, 20),
            sma_60: sma(&daily_closes, 60),
            rsi_14: wilder_rsi(&daily_closes, 14),
            atr_14: atr(daily, 14),
            range_20d_pct: range_pct(daily, 20),
        },
    }
}

/// Bullish when the short average leads the long one and price holds above
/// it; bearish in the mirrored case; sideways otherwise or without data.
pub fn classify_trend(daily: &DailyFeatures, last_close: Option<f64>) -> TrendState {
    match (daily.sma_20, daily.sma_60, last_close) {
        (Some(s20), Some(s60), Some(close)) => {
            if s20 > s60 && close > s20 {
                TrendState::Bullish
            } else if s20 < s60 && close < s20 {
                TrendState::Bearish
            } else {
                TrendState::Sideways
            }
        }
        _ => TrendState::Sideways,
    }
}

/// "past <H>: price ΔX%, volume ΔY% vs prior window" for each horizon with
/// enough history (two adjacent windows of H sessions each).
pub fn build_narratives(daily: &[BarFrame]) -> Vec<String> {
    let closes: Vec<f64> = daily.iter().map(|f| f.close).collect();
    let volumes: Vec<f64> = daily.iter().map(|f| f.volume_shares).collect();
    let mut out = Vec::new();

    for &h in &NARRATIVE_HORIZONS {
        if closes.len() < 2 * h {
            continue;
        }
        let n = closes.len();
        let recent_close = closes[n - 1];
        let prior_close = closes[n - 1 - h];
        if prior_close == 0.0 {
            continue;
        }
        let price_chg = (recent_close / prior_close - 1.0) * 100.0;

        let recent_vol: f64 = volumes[n - h..].iter().sum::<f64>() / h as f64;
        let prior_vol: f64 = volumes[n - 2 * h..n - h].iter().sum::<f64>() / h as f64;
        let vol_chg = if prior_vol > 0.0 {
            (recent_vol / prior_vol - 1.0) * 100.0
        } else {
            0.0
        };

        out.push(format!(
            "past {h}d: price {price_chg:+.1}%, volume {vol_chg:+.1}% vs prior window"
        ));
    }
    out
}

fn candidate_from_features(
    symbol: &str,
    features: &FeatureSet,
    latest_price: Option<f64>,
    holdings: &HashMap<String, f64>,
) -> Candidate {
    Candidate {
        symbol: symbol.to_string(),
        latest_price: latest_price.unwrap_or(0.0),
        ret_5: features.intraday.ret_5,
        ret_20: features.intraday.ret_20,
        vol_ratio_20: features.intraday.vol_ratio_20,
        rsi_14: features.daily.rsi_14,
        rank_score: rank_score(
            features.intraday.ret_5,
            features.intraday.ret_20,
            features.intraday.vol_ratio_20,
        ),
        position_shares: holdings.get(symbol).copied().unwrap_or(0.0),
    }
}

// =============================================================================
// Tests
// =============================================================================
