// =============================================================================
// Live-file frame provider — polls an atomically written 1m snapshot
// =============================================================================
//
// The collector rewrites the snapshot with tmp + rename, so the file is
// either the previous batch or the next one, never a torn write. The
// provider polls at most once per `refresh_ms`, reloads only when the file
// mtime moves, and keeps the last successfully parsed batch across any read
// or parse failure. Consumers see that last-good cache plus a staleness
// verdict; they decide whether stale data is acceptable.
// =============================================================================

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};

use crate::market::archive::tail_for_symbol;
use crate::market::frame::{sort_and_dedup, BarFrame, FrameBatch};

/// The snapshot's canonical interval. Other intervals are answered upstream.
pub const LIVE_INTERVAL: &str = "1m";

/// Operational status of the provider, served verbatim by the control API.
#[derive(Debug, Clone, Serialize)]
pub struct LiveFileStatus {
    pub file_path: String,
    pub refresh_ms: u64,
    pub stale_after_ms: u64,
    pub last_load_ts_ms: Option<i64>,
    pub last_attempt_ts_ms: Option<i64>,
    pub last_mtime_ms: Option<i64>,
    pub last_error: Option<String>,
    pub last_error_ts_ms: Option<i64>,
    pub frame_count: usize,
    pub stale: bool,
    pub has_last_good: bool,
}

#[derive(Default)]
struct State {
    frames: Vec<BarFrame>,
    by_symbol: HashMap<String, Vec<BarFrame>>,
    last_load_ts_ms: Option<i64>,
    last_attempt_ts_ms: Option<i64>,
    last_mtime_ms: Option<i64>,
    last_error: Option<String>,
    last_error_ts_ms: Option<i64>,
    has_last_good: bool,
}

pub struct LiveFileProvider {
    path: PathBuf,
    refresh_ms: u64,
    stale_after_ms: u64,
    state: RwLock<State>,
}

impl LiveFileProvider {
    pub fn new(path: impl Into<PathBuf>, refresh_ms: u64, stale_after_ms: u64) -> Self {
        Self {
            path: path.into(),
            refresh_ms,
            stale_after_ms,
            state: RwLock::new(State::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn refresh_ms(&self) -> u64 {
        self.refresh_ms
    }

    // -------------------------------------------------------------------------
    // Refresh
    // -------------------------------------------------------------------------

    /// Poll-loop entry point using wall-clock now.
    pub fn refresh(&self, force: bool) {
        self.refresh_at(Utc::now().timestamp_millis(), force);
    }

    /// Attempt a refresh at instant `now_ms`. Rate-limited by `refresh_ms`
    /// and skipped when the file mtime has not moved, unless `force`.
    pub fn refresh_at(&self, now_ms: i64, force: bool) {
        {
            let state = self.state.read();
            if !force {
                if let Some(last) = state.last_attempt_ts_ms {
                    if now_ms - last < self.refresh_ms as i64 {
                        return;
                    }
                }
            }
        }

        let mut state = self.state.write();
        state.last_attempt_ts_ms = Some(now_ms);

        let mtime_ms = match file_mtime_ms(&self.path) {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "live snapshot stat failed");
                state.last_error = Some(format!("stat: {e}"));
                state.last_error_ts_ms = Some(now_ms);
                return;
            }
        };

        if !force && state.last_mtime_ms == Some(mtime_ms) {
            // Unchanged file: nothing to do, not an error.
            return;
        }

        match read_snapshot(&self.path) {
            Ok(batch) => {
                let frames = sort_and_dedup(batch.frames);
                let mut by_symbol: HashMap<String, Vec<BarFrame>> = HashMap::new();
                for frame in &frames {
                    by_symbol
                        .entry(frame.instrument.symbol.clone())
                        .or_default()
                        .push(frame.clone());
                }
                debug!(
                    path = %self.path.display(),
                    frames = frames.len(),
                    symbols = by_symbol.len(),
                    "live snapshot reloaded"
                );
                state.frames = frames;
                state.by_symbol = by_symbol;
                state.last_load_ts_ms = Some(now_ms);
                state.last_mtime_ms = Some(mtime_ms);
                state.last_error = None;
                state.has_last_good = true;
            }
            Err(e) => {
                // Keep serving the last-good cache.
                warn!(path = %self.path.display(), error = %e, "live snapshot reload failed, keeping last-good");
                state.last_error = Some(e.to_string());
                state.last_error_ts_ms = Some(now_ms);
                state.last_mtime_ms = Some(mtime_ms);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Last `limit` frames for `symbol`. Only the canonical 1m feed is
    /// served here; other intervals fall through to the market service.
    pub fn frames(&self, symbol: &str, interval: &str, limit: usize) -> Vec<BarFrame> {
        if interval != LIVE_INTERVAL || limit == 0 {
            return Vec::new();
        }
        let state = self.state.read();
        match state.by_symbol.get(symbol) {
            Some(frames) => tail_for_symbol(frames, symbol, limit),
            None => Vec::new(),
        }
    }

    /// Sorted unique symbols available on the 1m feed.
    pub fn symbols(&self, interval: &str) -> Vec<String> {
        if interval != LIVE_INTERVAL {
            return Vec::new();
        }
        let state = self.state.read();
        let mut syms: Vec<String> = state.by_symbol.keys().cloned().collect();
        syms.sort();
        syms
    }

    /// Staleness predicate: never loaded, or the last load is older than
    /// `stale_after_ms`.
    pub fn is_stale_at(&self, now_ms: i64) -> bool {
        match self.state.read().last_load_ts_ms {
            Some(loaded) => now_ms - loaded > self.stale_after_ms as i64,
            None => true,
        }
    }

    pub fn is_stale(&self) -> bool {
        self.is_stale_at(Utc::now().timestamp_millis())
    }

    pub fn frame_count(&self) -> usize {
        self.state.read().frames.len()
    }

    pub fn status_at(&self, now_ms: i64) -> LiveFileStatus {
        let state = self.state.read();
        LiveFileStatus {
            file_path: self.path.display().to_string(),
            refresh_ms: self.refresh_ms,
            stale_after_ms: self.stale_after_ms,
            last_load_ts_ms: state.last_load_ts_ms,
            last_attempt_ts_ms: state.last_attempt_ts_ms,
            last_mtime_ms: state.last_mtime_ms,
            last_error: state.last_error.clone(),
            last_error_ts_ms: state.last_error_ts_ms,
            frame_count: state.frames.len(),
            stale: match state.last_load_ts_ms {
                Some(loaded) => now_ms - loaded > self.stale_after_ms as i64,
                None => true,
            },
            has_last_good: state.has_last_good,
        }
    }

    pub fn status(&self) -> LiveFileStatus {
        self.status_at(Utc::now().timestamp_millis())
    }
}

fn file_mtime_ms(path: &Path) -> anyhow::Result<i64> {
    let meta = std::fs::metadata(path)?;
    let modified = meta.modified()?;
    Ok(modified.duration_since(UNIX_EPOCH)?.as_millis() as i64)
}

fn read_snapshot(path: &Path) -> anyhow::Result<FrameBatch> {
    let content = std::fs::read_to_string(path)?;
    let mut batch: FrameBatch = serde_json::from_str(&content)?;
    if !batch.is_valid_schema() {
        anyhow::bail!("unexpected schema_version {:?}", batch.schema_version);
    }
    batch.frames.retain(BarFrame::is_well_formed);
    Ok(batch)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::frame::{BarWindow, Instrument, BAR_SCHEMA_VERSION};
    use crate::market::session::SessionPhase;

    fn bar(symbol: &str, start_ts_ms: i64, close: f64) -> BarFrame {
        BarFrame {
            schema_version: BAR_SCHEMA_VERSION.to_string(),
            instrument: Instrument::cn_a(symbol),
            interval: "1m".to_string(),
            window: BarWindow {
                start_ts_ms,
                end_ts_ms: start_ts_ms + 60_000,
                trading_day: "2025-06-02".to_string(),
            },
            session_phase: SessionPhase::ContinuousAm,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume_shares: 100.0,
            turnover_cny: close * 100.0,
            vwap: close,
            mode: "real".to_string(),
            provider: "akshare".to_string(),
        }
    }

    fn write_snapshot(path: &Path, frames: Vec<BarFrame>) {
        let mut batch = FrameBatch::new("cn-a", "real", "akshare");
        batch.frames = frames;
        std::fs::write(path, serde_json::to_string(&batch).unwrap()).unwrap();
    }

    #[test]
    fn loads_snapshot_and_serves_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames.1m.json");
        write_snapshot(
            &path,
            vec![
                bar("600519", 1_000, 10.0),
                bar("600519", 61_000, 11.0),
                bar("000001", 1_000, 5.0),
            ],
        );

        let provider = LiveFileProvider::new(&path, 1_000, 180_000);
        provider.refresh_at(10_000, true);

        let frames = provider.frames("600519", "1m", 1);
        assert_eq!(frames.len(), 1);
        assert!((frames[0].close - 11.0).abs() < f64::EPSILON);
        assert_eq!(provider.symbols("1m"), vec!["000001", "600519"]);
        assert_eq!(provider.frame_count(), 3);
    }

    #[test]
    fn non_canonical_interval_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames.1m.json");
        write_snapshot(&path, vec![bar("600519", 1_000, 10.0)]);
        let provider = LiveFileProvider::new(&path, 1_000, 180_000);
        provider.refresh_at(10_000, true);
        assert!(provider.frames("600519", "1d", 10).is_empty());
        assert!(provider.symbols("1d").is_empty());
    }

    #[test]
    fn parse_failure_keeps_last_good() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames.1m.json");
        write_snapshot(&path, vec![bar("600519", 1_000, 10.0)]);

        let provider = LiveFileProvider::new(&path, 1_000, 180_000);
        provider.refresh_at(10_000, true);
        assert_eq!(provider.frame_count(), 1);

        std::fs::write(&path, "{ not json").unwrap();
        provider.refresh_at(20_000, true);

        let status = provider.status_at(20_000);
        assert!(status.has_last_good);
        assert!(status.last_error.is_some());
        assert_eq!(status.last_error_ts_ms, Some(20_000));
        assert_eq!(provider.frame_count(), 1);
        assert_eq!(provider.frames("600519", "1m", 5).len(), 1);
    }

    #[test]
    fn refresh_rate_limited_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames.1m.json");
        write_snapshot(&path, vec![bar("600519", 1_000, 10.0)]);

        let provider = LiveFileProvider::new(&path, 5_000, 180_000);
        provider.refresh_at(10_000, false);
        assert_eq!(provider.frame_count(), 1);

        write_snapshot(&path, vec![bar("600519", 1_000, 10.0), bar("600519", 61_000, 11.0)]);
        // Within the refresh window: skipped.
        provider.refresh_at(12_000, false);
        assert_eq!(provider.frame_count(), 1);
        // Forced: reloads regardless.
        provider.refresh_at(12_500, true);
        assert_eq!(provider.frame_count(), 2);
    }

    #[test]
    fn staleness_transition() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames.1m.json");
        write_snapshot(&path, vec![bar("600519", 1_000, 10.0)]);

        let provider = LiveFileProvider::new(&path, 1_000, 180_000);
        assert!(provider.is_stale_at(0));
        provider.refresh_at(100_000, true);
        assert!(!provider.is_stale_at(100_000 + 180_000));
        // now − last_load > stale_after_ms
        assert!(provider.is_stale_at(100_000 + 200_000));
        assert!(provider.status_at(100_000 + 200_000).stale);
    }

    #[test]
    fn missing_file_records_error_and_stays_stale() {
        let dir = tempfile::tempdir().unwrap();
        let provider =
            LiveFileProvider::new(dir.path().join("absent.json"), 1_000, 180_000);
        provider.refresh_at(1_000, true);
        let status = provider.status_at(1_000);
        assert!(!status.has_last_good);
        assert!(status.stale);
        assert!(status.last_error.as_deref().unwrap_or("").contains("stat"));
    }
}
