// =============================================================================
// Market Data Service — one frame/kline API over replay, live file, history
// and the synthetic generator
// =============================================================================
//
// Resolution precedence for a query:
//   1. interval "1m"  -> the registered frame provider (replay engine in
//      replay mode, live-file provider in live mode); non-empty wins.
//   2. interval "1d"  -> the static daily history archive.
//   3. otherwise      -> upstream proxy (real provider + configured URL),
//      else the deterministic generator.
//   4. strict live mode refuses the synthetic fallback for 1m frames and
//      surfaces `live_frames_unavailable` instead.
// =============================================================================

pub mod archive;
pub mod frame;
pub mod generator;
pub mod live_file;
pub mod replay;
pub mod session;

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::market::archive::FrameArchive;
use crate::market::frame::{BarFrame, FrameBatch};
use crate::market::live_file::LiveFileProvider;
use crate::market::replay::ReplayEngine;
use crate::types::{DataMode, MarketProvider};

/// Capability set of the active 1m frame source. Constructed once at boot:
/// either the replay engine or the live-file provider.
pub trait FrameProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;
    /// Last `limit` frames for a symbol at `interval` (empty when the
    /// source does not carry that interval).
    fn frames(&self, symbol: &str, interval: &str, limit: usize) -> Vec<BarFrame>;
    /// Sorted unique symbols carried by this source.
    fn symbols(&self) -> Vec<String>;
    /// Mode-specific status payload for the control API.
    fn status_json(&self) -> serde_json::Value;
}

impl FrameProvider for ReplayEngine {
    fn provider_name(&self) -> &'static str {
        "replay"
    }

    fn frames(&self, symbol: &str, interval: &str, limit: usize) -> Vec<BarFrame> {
        if interval != "1m" {
            return Vec::new();
        }
        self.visible_frames(symbol, limit)
    }

    fn symbols(&self) -> Vec<String> {
        ReplayEngine::symbols(self)
    }

    fn status_json(&self) -> serde_json::Value {
        serde_json::to_value(self.status()).unwrap_or_default()
    }
}

impl FrameProvider for LiveFileProvider {
    fn provider_name(&self) -> &'static str {
        "live_file"
    }

    fn frames(&self, symbol: &str, interval: &str, limit: usize) -> Vec<BarFrame> {
        LiveFileProvider::frames(self, symbol, interval, limit)
    }

    fn symbols(&self) -> Vec<String> {
        LiveFileProvider::symbols(self, "1m")
    }

    fn status_json(&self) -> serde_json::Value {
        serde_json::to_value(self.status()).unwrap_or_default()
    }
}

// -----------------------------------------------------------------------------
// Errors
// -----------------------------------------------------------------------------

/// Failures the service surfaces to callers instead of degrading silently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarketDataError {
    /// Strict live mode and the 1m feed has nothing for the symbol.
    LiveFramesUnavailable,
    /// The upstream proxy failed and no fallback is permitted.
    Upstream(String),
}

impl std::fmt::Display for MarketDataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LiveFramesUnavailable => write!(f, "live_frames_unavailable"),
            Self::Upstream(msg) => write!(f, "market_upstream_error: {msg}"),
        }
    }
}

impl std::error::Error for MarketDataError {}

// -----------------------------------------------------------------------------
// Query / kline types
// -----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FrameQuery {
    pub symbol: String,
    pub interval: String,
    pub limit: usize,
}

/// Compact kline row for chart-style consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Kline {
    pub ts_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

// -----------------------------------------------------------------------------
// Service
// -----------------------------------------------------------------------------

pub struct MarketDataService {
    provider: Arc<dyn FrameProvider>,
    history: Arc<FrameArchive>,
    data_mode: DataMode,
    market_provider: MarketProvider,
    strict_live: bool,
    upstream_url: Option<String>,
    upstream_api_key: Option<String>,
    http: reqwest::Client,
}

impl MarketDataService {
    pub fn new(
        provider: Arc<dyn FrameProvider>,
        history: Arc<FrameArchive>,
        data_mode: DataMode,
        market_provider: MarketProvider,
        strict_live: bool,
        upstream_url: Option<String>,
        upstream_api_key: Option<String>,
    ) -> Self {
        Self {
            provider,
            history,
            data_mode,
            market_provider,
            strict_live,
            upstream_url,
            upstream_api_key,
            http: reqwest::Client::new(),
        }
    }

    fn batch_mode(&self) -> &'static str {
        match self.market_provider {
            MarketProvider::Real => "real",
            MarketProvider::Mock => "mock",
        }
    }

    fn wrap(&self, provider: &str, frames: Vec<BarFrame>) -> FrameBatch {
        let mut batch = FrameBatch::new("cn-a", self.batch_mode(), provider);
        batch.frames = frames;
        batch
    }

    /// Resolve one frame query through the precedence chain.
    pub async fn frames(&self, query: &FrameQuery) -> Result<FrameBatch, MarketDataError> {
        if query.limit == 0 {
            return Ok(self.wrap(self.provider.provider_name(), Vec::new()));
        }

        // 1. Canonical 1m feed.
        if query.interval == "1m" {
            let frames = self
                .provider
                .frames(&query.symbol, &query.interval, query.limit);
            if !frames.is_empty() {
                return Ok(self.wrap(self.provider.provider_name(), frames));
            }
            if self.strict_live && self.data_mode == DataMode::LiveFile {
                return Err(MarketDataError::LiveFramesUnavailable);
            }
        }

        // 2. Daily history archive.
        if query.interval == "1d" {
            let frames = self.history.daily_for_symbol(&query.symbol, query.limit);
            if !frames.is_empty() {
                return Ok(self.wrap("history", frames));
            }
        }

        // 3. Upstream proxy.
        if self.market_provider == MarketProvider::Real {
            if let Some(url) = &self.upstream_url {
                match self.fetch_upstream(url, query).await {
                    Ok(batch) => return Ok(batch),
                    Err(e) => {
                        warn!(error = %e, symbol = %query.symbol, "market upstream failed");
                        if self.strict_live {
                            return Err(MarketDataError::Upstream(e.to_string()));
                        }
                    }
                }
            }
        }

        // 4. Synthetic fallback, never in strict live mode.
        if self.strict_live {
            if query.interval == "1m" {
                return Err(MarketDataError::LiveFramesUnavailable);
            }
            return Ok(self.wrap("none", Vec::new()));
        }
        let now_ms = Utc::now().timestamp_millis();
        debug!(symbol = %query.symbol, interval = %query.interval, "serving generated frames");
        Ok(self.wrap(
            "generator",
            generator::generate(&query.symbol, &query.interval, query.limit, now_ms),
        ))
    }

    /// Same resolution chain, projected to chart klines.
    pub async fn klines(&self, query: &FrameQuery) -> Result<Vec<Kline>, MarketDataError> {
        let batch = self.frames(query).await?;
        Ok(batch
            .frames
            .iter()
            .map(|f| Kline {
                ts_ms: f.window.start_ts_ms,
                open: f.open,
                high: f.high,
                low: f.low,
                close: f.close,
                volume: f.volume_shares,
            })
            .collect())
    }

    /// Symbols carried by the active provider, falling back to the daily
    /// archive universe when the feed is empty.
    pub fn symbols(&self) -> Vec<String> {
        let from_provider = self.provider.symbols();
        if !from_provider.is_empty() {
            return from_provider;
        }
        self.history.daily_symbols()
    }

    pub fn provider_status(&self) -> serde_json::Value {
        serde_json::json!({
            "data_mode": self.data_mode.to_string(),
            "market_provider": self.market_provider.to_string(),
            "strict_live": self.strict_live,
            "provider": self.provider.provider_name(),
            "status": self.provider.status_json(),
        })
    }

    async fn fetch_upstream(
        &self,
        url: &str,
        query: &FrameQuery,
    ) -> anyhow::Result<FrameBatch> {
        let params = [
            ("symbol", query.symbol.clone()),
            ("interval", query.interval.clone()),
            ("limit", query.limit.to_string()),
        ];
        let mut req = self.http.get(url).query(&params);
        if let Some(key) = &self.upstream_api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("upstream status {status}");
        }
        let batch: FrameBatch = resp.json().await?;
        if !batch.is_valid_schema() {
            anyhow::bail!("upstream schema_version {:?}", batch.schema_version);
        }
        Ok(batch)
    }
}

// =============================================================================
// Tests
// =============================================================================
