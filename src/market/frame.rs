// =============================================================================
// Market frame payloads — market.bar.v1 / market.frames.v1
// =============================================================================
//
// These structs are wire contracts: field names must serialize exactly as the
// collector writes them and the web layer reads them. Frames are immutable
// once written; batches are replaced atomically (tmp + rename) by producers,
// and readers keep the last successfully parsed batch on any failure.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::market::session::SessionPhase;

pub const BAR_SCHEMA_VERSION: &str = "market.bar.v1";
pub const BATCH_SCHEMA_VERSION: &str = "market.frames.v1";

/// Identity of the traded instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub exchange: String,
    pub timezone: String,
    pub currency: String,
}

impl Instrument {
    /// A-share instrument with the CN-A defaults.
    pub fn cn_a(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            exchange: "CN-A".to_string(),
            timezone: "Asia/Shanghai".to_string(),
            currency: "CNY".to_string(),
        }
    }
}

/// Time window covered by one bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarWindow {
    pub start_ts_ms: i64,
    pub end_ts_ms: i64,
    /// Calendar date (YYYY-MM-DD) in the exchange timezone.
    pub trading_day: String,
}

/// One OHLCV bar for a symbol at a given interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarFrame {
    pub schema_version: String,
    pub instrument: Instrument,
    /// "1m" | "5m" | ... | "1d"
    pub interval: String,
    pub window: BarWindow,
    pub session_phase: SessionPhase,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume_shares: f64,
    pub turnover_cny: f64,
    pub vwap: f64,
    /// "real" | "mock"
    pub mode: String,
    pub provider: String,
}

impl BarFrame {
    pub fn symbol(&self) -> &str {
        &self.instrument.symbol
    }

    pub fn start_ts_ms(&self) -> i64 {
        self.window.start_ts_ms
    }

    /// OHLC sanity: `low ≤ open, close ≤ high` and a forward-moving window.
    pub fn is_well_formed(&self) -> bool {
        self.low <= self.open
            && self.low <= self.close
            && self.open <= self.high
            && self.close <= self.high
            && self.low <= self.high
            && self.window.start_ts_ms < self.window.end_ts_ms
    }
}

/// A batch of frames as persisted on disk or sent over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameBatch {
    pub schema_version: String,
    pub market: String,
    pub mode: String,
    pub provider: String,
    #[serde(default)]
    pub frames: Vec<BarFrame>,
}

impl FrameBatch {
    pub fn new(market: impl Into<String>, mode: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            schema_version: BATCH_SCHEMA_VERSION.to_string(),
            market: market.into(),
            mode: mode.into(),
            provider: provider.into(),
            frames: Vec::new(),
        }
    }

    /// Schema gate applied by every reader before a batch replaces a cache.
    pub fn is_valid_schema(&self) -> bool {
        self.schema_version == BATCH_SCHEMA_VERSION
    }
}

/// Sort frames by `(start_ts_ms, symbol)` and drop duplicates of the same
/// `(symbol, start_ts_ms)` pair, keeping the first occurrence. The symbol
/// tie-break keeps the ordering deterministic when two instruments share a
/// window start.
pub fn sort_and_dedup(mut frames: Vec<BarFrame>) -> Vec<BarFrame> {
    frames.sort_by(|a, b| {
        a.window
            .start_ts_ms
            .cmp(&b.window.start_ts_ms)
            .then_with(|| a.instrument.symbol.cmp(&b.instrument.symbol))
    });
    frames.dedup_by(|next, prev| {
        next.window.start_ts_ms == prev.window.start_ts_ms
            && next.instrument.symbol == prev.instrument.symbol
    });
    frames
}

// =============================================================================
// Tests
// =============================================================================
