// =============================================================================
// Frame archive loader — pre-materialized replay + daily history batches
// =============================================================================
//
// The collector publishes batches under the web mirror:
//   onlytrade-web/public/replay/cn-a/latest/frames.1m.json
//   onlytrade-web/public/replay/cn-a/history/frames.1d.<days>.json
//
// The loader reads them once at boot. Malformed frames are dropped (counted,
// logged), the remainder is sorted and deduplicated per the timeline
// contract. When several history files exist the deepest one wins.
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::market::frame::{sort_and_dedup, BarFrame, FrameBatch};

/// In-memory archive of replayable 1m frames and static daily history.
pub struct FrameArchive {
    /// Sorted, deduplicated intraday frames (the replay timeline source).
    pub intraday: Vec<BarFrame>,
    /// Sorted, deduplicated daily bars across the whole universe.
    pub daily: Vec<BarFrame>,
}

impl FrameArchive {
    /// Load the archive rooted at `replay_dir` (the `.../replay/cn-a`
    /// directory). A missing history directory yields an empty daily set; a
    /// missing latest batch is an error because replay mode cannot run
    /// without a timeline.
    pub fn load(replay_dir: impl AsRef<Path>) -> Result<Self> {
        let replay_dir = replay_dir.as_ref();

        let latest_path = replay_dir.join("latest").join("frames.1m.json");
        let latest = load_batch(&latest_path)
            .with_context(|| format!("loading replay archive {}", latest_path.display()))?;
        let intraday = sort_and_dedup(latest.frames);

        let daily = match deepest_history_file(&replay_dir.join("history"))? {
            Some(path) => {
                let batch = load_batch(&path)
                    .with_context(|| format!("loading daily history {}", path.display()))?;
                sort_and_dedup(batch.frames)
            }
            None => {
                warn!(dir = %replay_dir.display(), "no daily history file found");
                Vec::new()
            }
        };

        info!(
            intraday_frames = intraday.len(),
            daily_frames = daily.len(),
            "frame archive loaded"
        );

        Ok(Self { intraday, daily })
    }

    /// Construct directly from frame lists (tests, generator seeding).
    pub fn from_frames(intraday: Vec<BarFrame>, daily: Vec<BarFrame>) -> Self {
        Self {
            intraday: sort_and_dedup(intraday),
            daily: sort_and_dedup(daily),
        }
    }

    /// Last `limit` daily bars for a symbol, oldest first.
    pub fn daily_for_symbol(&self, symbol: &str, limit: usize) -> Vec<BarFrame> {
        tail_for_symbol(&self.daily, symbol, limit)
    }

    /// Sorted unique symbols present in the daily history.
    pub fn daily_symbols(&self) -> Vec<String> {
        let mut syms: Vec<String> = self
            .daily
            .iter()
            .map(|f| f.instrument.symbol.clone())
            .collect();
        syms.sort();
        syms.dedup();
        syms
    }
}

/// Last `limit` frames of `symbol` in an already-sorted slice, oldest first.
pub fn tail_for_symbol(frames: &[BarFrame], symbol: &str, limit: usize) -> Vec<BarFrame> {
    if limit == 0 {
        return Vec::new();
    }
    let matching: Vec<&BarFrame> = frames
        .iter()
        .filter(|f| f.instrument.symbol == symbol)
        .collect();
    let start = matching.len().saturating_sub(limit);
    matching[start..].iter().map(|f| (*f).clone()).collect()
}

/// Read and schema-validate one frame batch from disk, dropping frames that
/// fail the OHLC sanity check.
pub fn load_batch(path: &Path) -> Result<FrameBatch> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading frame batch {}", path.display()))?;
    let mut batch: FrameBatch = serde_json::from_str(&content)
        .with_context(|| format!("parsing frame batch {}", path.display()))?;
    if !batch.is_valid_schema() {
        anyhow::bail!(
            "unexpected schema_version {:?} in {}",
            batch.schema_version,
            path.display()
        );
    }

    let before = batch.frames.len();
    batch.frames.retain(BarFrame::is_well_formed);
    let dropped = before - batch.frames.len();
    if dropped > 0 {
        warn!(path = %path.display(), dropped, "dropped malformed frames from batch");
    }
    Ok(batch)
}

/// Pick the history file with the deepest day coverage: among files named
/// `frames.1d.<days>.json`, the one with the largest `<days>`.
fn deepest_history_file(history_dir: &Path) -> Result<Option<PathBuf>> {
    if !history_dir.is_dir() {
        return Ok(None);
    }
    let mut best: Option<(u64, PathBuf)> = None;
    for entry in std::fs::read_dir(history_dir)
        .with_context(|| format!("listing history dir {}", history_dir.display()))?
    {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(days) = parse_history_days(&name) else {
            continue;
        };
        if best.as_ref().map_or(true, |(d, _)| days > *d) {
            best = Some((days, entry.path()));
        }
    }
    Ok(best.map(|(_, p)| p))
}

fn parse_history_days(file_name: &str) -> Option<u64> {
    let rest = file_name.strip_prefix("frames.1d.")?;
    let digits = rest.strip_suffix(".json")?;
    digits.parse().ok()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::frame::{BarWindow, Instrument, BAR_SCHEMA_VERSION};
    use crate::market::session::SessionPhase;

    fn bar(symbol: &str, interval: &str, start_ts_ms: i64, close: f64) -> BarFrame {
        BarFrame {
            schema_version: BAR_SCHEMA_VERSION.to_string(),
            instrument: Instrument::cn_a(symbol),
            interval: interval.to_string(),
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
            volume_shares: 1_000.0,
            turnover_cny: close * 1_000.0,
            vwap: close,
            mode: "mock".to_string(),
            provider: "test".to_string(),
        }
    }

    fn write_batch(path: &Path, frames: Vec<BarFrame>) {
        let mut batch = FrameBatch::new("cn-a", "mock", "test");
        batch.frames = frames;
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, serde_json::to_string(&batch).unwrap()).unwrap();
    }

    #[test]
    fn history_days_parse() {
        assert_eq!(parse_history_days("frames.1d.90.json"), Some(90));
        assert_eq!(parse_history_days("frames.1d.365.json"), Some(365));
        assert_eq!(parse_history_days("frames.1m.json"), None);
        assert_eq!(parse_history_days("frames.1d.x.json"), None);
    }

    #[test]
    fn load_picks_deepest_history() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_batch(
            &root.join("latest/frames.1m.json"),
            vec![bar("600519", "1m", 1_000, 10.0)],
        );
        write_batch(
            &root.join("history/frames.1d.30.json"),
            vec![bar("600519", "1d", 1_000, 10.0)],
        );
        write_batch(
            &root.join("history/frames.1d.90.json"),
            vec![
                bar("600519", "1d", 1_000, 10.0),
                bar("600519", "1d", 2_000, 11.0),
            ],
        );

        let archive = FrameArchive::load(root).unwrap();
        assert_eq!(archive.intraday.len(), 1);
        assert_eq!(archive.daily.len(), 2);
    }

    #[test]
    fn load_drops_malformed_frames() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let mut bad = bar("600519", "1m", 2_000, 10.0);
        bad.low = bad.high + 5.0;
        write_batch(
            &root.join("latest/frames.1m.json"),
            vec![bar("600519", "1m", 1_000, 10.0), bad],
        );
        let archive = FrameArchive::load(root).unwrap();
        assert_eq!(archive.intraday.len(), 1);
    }

    #[test]
    fn load_missing_latest_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FrameArchive::load(dir.path()).is_err());
    }

    #[test]
    fn tail_for_symbol_limits() {
        let frames = sort_and_dedup(vec![
            bar("600519", "1d", 1_000, 10.0),
            bar("600519", "1d", 2_000, 11.0),
            bar("000001", "1d", 2_000, 5.0),
            bar("600519", "1d", 3_000, 12.0),
        ]);
        let tail = tail_for_symbol(&frames, "600519", 2);
        assert_eq!(tail.len(), 2);
        assert!((tail[0].close - 11.0).abs() < f64::EPSILON);
        assert!((tail[1].close - 12.0).abs() < f64::EPSILON);
        assert!(tail_for_symbol(&frames, "600519", 0).is_empty());
    }

    #[test]
    fn daily_symbols_sorted_unique() {
        let archive = FrameArchive::from_frames(
            Vec::new(),
            vec![
                bar("600941", "1d", 1_000, 1.0),
                bar("000001", "1d", 1_000, 1.0),
                bar("600941", "1d", 2_000, 1.0),
            ],
        );
        assert_eq!(archive.daily_symbols(), vec!["000001", "600941"]);
    }
}
