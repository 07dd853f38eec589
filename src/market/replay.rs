// =============================================================================
// Replay Engine — deterministic cursor over a pre-materialized bar timeline
// =============================================================================
//
// The timeline is every archive frame sorted by window start (symbol
// lexicographic tie-break). A fractional accumulator converts elapsed wall
// time × speed into whole-bar advances, so `speed = 60` replays one bar
// minute per real second. The cursor starts at `warmup_bars − 1` so agents
// see a feature-worthy history before the first advance.
//
// Thread-safety: one RwLock around the whole state; the ticker task writes,
// API/status readers read.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use crate::market::frame::{sort_and_dedup, BarFrame};

/// One bar-minute of timeline progress per 60 000 ms of scaled time.
const MS_PER_BAR: f64 = 60_000.0;

/// Serialisable snapshot of the replay position.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayStatus {
    pub running: bool,
    pub speed: f64,
    #[serde(rename = "loop")]
    pub loop_enabled: bool,
    pub completed: bool,
    pub cursor_index: usize,
    pub timeline_length: usize,
    pub current_ts_ms: i64,
    pub trading_day: String,
    pub day_index: usize,
    pub day_count: usize,
    pub day_bar_index: usize,
    pub day_bar_count: usize,
    pub warmup_bars: usize,
}

/// `[start, end)` timeline range of one trading day.
struct DayRange {
    trading_day: String,
    start: usize,
    end: usize,
}

struct Inner {
    cursor_index: usize,
    /// Fractional bar progress carried between ticks.
    accumulator: f64,
    running: bool,
    speed: f64,
    loop_enabled: bool,
    completed: bool,
}

pub struct ReplayEngine {
    timeline: Vec<BarFrame>,
    /// Timeline indexes per symbol, in timeline order (monotone in ts).
    by_symbol: HashMap<String, Vec<usize>>,
    day_ranges: Vec<DayRange>,
    warmup_bars: usize,
    inner: RwLock<Inner>,
}

impl ReplayEngine {
    pub fn new(frames: Vec<BarFrame>, warmup_bars: usize, speed: f64, loop_enabled: bool) -> Self {
        let timeline = sort_and_dedup(frames);

        let mut by_symbol: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, frame) in timeline.iter().enumerate() {
            by_symbol
                .entry(frame.instrument.symbol.clone())
                .or_default()
                .push(idx);
        }

        let mut day_ranges: Vec<DayRange> = Vec::new();
        for (idx, frame) in timeline.iter().enumerate() {
            match day_ranges.last_mut() {
                Some(range) if range.trading_day == frame.window.trading_day => range.end = idx + 1,
                _ => day_ranges.push(DayRange {
                    trading_day: frame.window.trading_day.clone(),
                    start: idx,
                    end: idx + 1,
                }),
            }
        }

        let cursor_index = if timeline.is_empty() {
            0
        } else {
            warmup_bars.saturating_sub(1).min(timeline.len() - 1)
        };

        info!(
            timeline_length = timeline.len(),
            symbols = by_symbol.len(),
            days = day_ranges.len(),
            warmup_bars,
            speed,
            loop_enabled,
            "replay engine built"
        );

        Self {
            timeline,
            by_symbol,
            day_ranges,
            warmup_bars,
            inner: RwLock::new(Inner {
                cursor_index,
                accumulator: 0.0,
                running: true,
                speed: if speed > 0.0 { speed } else { 1.0 },
                loop_enabled,
                completed: false,
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Ticking
    // -------------------------------------------------------------------------

    /// Advance by elapsed wall time. Returns the bars the cursor moved over.
    pub fn tick(&self, elapsed_ms: u64) -> Vec<BarFrame> {
        let mut inner = self.inner.write();
        if !inner.running || inner.completed || self.timeline.is_empty() {
            return Vec::new();
        }
        inner.accumulator += elapsed_ms as f64 * inner.speed / MS_PER_BAR;

        let mut advanced = Vec::new();
        while inner.accumulator >= 1.0 && !inner.completed {
            inner.accumulator -= 1.0;
            self.advance_one(&mut inner, &mut advanced);
        }
        advanced
    }

    /// Advance `n` bars immediately, ignoring speed.
    pub fn step(&self, n: usize) -> Vec<BarFrame> {
        let mut inner = self.inner.write();
        let mut advanced = Vec::new();
        for _ in 0..n {
            if inner.completed || self.timeline.is_empty() {
                break;
            }
            self.advance_one(&mut inner, &mut advanced);
        }
        advanced
    }

    fn advance_one(&self, inner: &mut Inner, advanced: &mut Vec<BarFrame>) {
        if inner.cursor_index + 1 < self.timeline.len() {
            inner.cursor_index += 1;
            advanced.push(self.timeline[inner.cursor_index].clone());
        } else if inner.loop_enabled {
            // End of tape: wrap back to the warmup boundary.
            let wrapped = self.warmup_bars.min(self.timeline.len() - 1);
            debug!(wrapped, "replay wrapped to warmup boundary");
            inner.cursor_index = wrapped;
            inner.completed = false;
            advanced.push(self.timeline[inner.cursor_index].clone());
        } else {
            inner.completed = true;
        }
    }

    // -------------------------------------------------------------------------
    // Controls
    // -------------------------------------------------------------------------

    pub fn set_cursor(&self, index: usize) {
        let mut inner = self.inner.write();
        inner.cursor_index = if self.timeline.is_empty() {
            0
        } else {
            index.min(self.timeline.len() - 1)
        };
        inner.accumulator = 0.0;
        inner.completed = false;
    }

    pub fn set_speed(&self, speed: f64) {
        if speed > 0.0 && speed.is_finite() {
            self.inner.write().speed = speed;
        }
    }

    pub fn set_loop(&self, enabled: bool) {
        self.inner.write().loop_enabled = enabled;
    }

    pub fn pause(&self) {
        self.inner.write().running = false;
    }

    pub fn resume(&self) {
        self.inner.write().running = true;
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Last `limit` frames of `symbol` whose window start is at or before the
    /// cursor frame's window start, oldest first. Repeated calls without a
    /// cursor advance return the identical sequence.
    pub fn visible_frames(&self, symbol: &str, limit: usize) -> Vec<BarFrame> {
        if limit == 0 || self.timeline.is_empty() {
            return Vec::new();
        }
        let cursor = self.inner.read().cursor_index;
        let cutoff_ts = self.timeline[cursor].window.start_ts_ms;

        let Some(indexes) = self.by_symbol.get(symbol) else {
            return Vec::new();
        };
        // Per-symbol index lists are monotone in ts, so a partition point
        // finds the visible prefix.
        let visible_len = indexes
            .partition_point(|&idx| self.timeline[idx].window.start_ts_ms <= cutoff_ts);
        let start = visible_len.saturating_sub(limit);
        indexes[start..visible_len]
            .iter()
            .map(|&idx| self.timeline[idx].clone())
            .collect()
    }

    /// Sorted unique symbols on the timeline.
    pub fn symbols(&self) -> Vec<String> {
        let mut syms: Vec<String> = self.by_symbol.keys().cloned().collect();
        syms.sort();
        syms
    }

    pub fn status(&self) -> ReplayStatus {
        let inner = self.inner.read();
        let cursor = inner.cursor_index;
        let (current_ts_ms, trading_day) = self
            .timeline
            .get(cursor)
            .map(|f| (f.window.start_ts_ms, f.window.trading_day.clone()))
            .unwrap_or((0, String::new()));

        let (day_index, day_bar_index, day_bar_count) = self
            .day_ranges
            .iter()
            .position(|r| cursor >= r.start && cursor < r.end)
            .map(|i| {
                let r = &self.day_ranges[i];
                (i, cursor - r.start, r.end - r.start)
            })
            .unwrap_or((0, 0, 0));

        ReplayStatus {
            running: inner.running,
            speed: inner.speed,
            loop_enabled: inner.loop_enabled,
            completed: inner.completed,
            cursor_index: cursor,
            timeline_length: self.timeline.len(),
            current_ts_ms,
            trading_day,
            day_index,
            day_count: self.day_ranges.len(),
            day_bar_index,
            day_bar_count,
            warmup_bars: self.warmup_bars,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
