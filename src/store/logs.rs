// =============================================================================
// Decision & audit logs — day-partitioned JSONL, append-only
// =============================================================================
//
// Layout (paths are contracts):
//   data/decisions/<trader_id>/<YYYY-MM-DD>.jsonl
//   data/audit/decision_audit/<trader_id>/<YYYY-MM-DD>.jsonl
//
// Day buckets follow the Asia/Shanghai calendar date of the record
// timestamp. Reads stream with a bounded ring (never a full slurp) and walk
// day files newest-first until the requested count is filled.
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::engine::record::DecisionRecord;
use crate::features::readiness::ReadinessLevel;
use crate::market::session::trading_day_of;
use crate::store::fsio::{append_jsonl, tail_jsonl};
use crate::types::{ActionKind, DecisionSource};

/// One line per evaluation in the audit log, including readiness-gated
/// holds that never reached the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: String,
    pub trader_id: String,
    pub cycle_number: u64,
    pub readiness_level: ReadinessLevel,
    pub readiness_reasons: Vec<String>,
    pub opening_phase_active: bool,
    pub decision_source: DecisionSource,
    pub action: ActionKind,
    pub symbol: String,
    pub executed: bool,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Shanghai-calendar day bucket for an RFC 3339 timestamp; falls back to
/// today when the timestamp does not parse.
fn day_bucket(timestamp: &str) -> String {
    match DateTime::parse_from_rfc3339(timestamp) {
        Ok(dt) => trading_day_of(dt.timestamp_millis()),
        Err(_) => trading_day_of(Utc::now().timestamp_millis()),
    }
}

// -----------------------------------------------------------------------------
// Generic day-partitioned trader log
// -----------------------------------------------------------------------------

struct DayPartitionedLog {
    root: PathBuf,
}

impl DayPartitionedLog {
    fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn day_path(&self, trader_id: &str, day: &str) -> PathBuf {
        self.root.join(trader_id).join(format!("{day}.jsonl"))
    }

    fn append<T: Serialize>(&self, trader_id: &str, timestamp: &str, record: &T) {
        let day = day_bucket(timestamp);
        let path = self.day_path(trader_id, &day);
        // A failed append is logged and swallowed: log persistence must
        // never break the trading loop.
        if let Err(e) = append_jsonl(&path, record) {
            warn!(trader_id, path = %path.display(), error = %e, "log append failed");
        }
    }

    /// Latest `n` records across day files, newest first.
    fn latest<T: DeserializeOwned>(&self, trader_id: &str, n: usize) -> Result<Vec<T>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let trader_dir = self.root.join(trader_id);
        let mut days = list_day_files(&trader_dir)?;
        days.sort();
        days.reverse();

        let mut out: Vec<T> = Vec::with_capacity(n);
        for day_file in days {
            if out.len() >= n {
                break;
            }
            let needed = n - out.len();
            let chunk: Vec<T> = tail_jsonl(&day_file, needed)?;
            out.extend(chunk);
        }
        Ok(out)
    }
}

fn list_day_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
            files.push(path);
        }
    }
    Ok(files)
}

// -----------------------------------------------------------------------------
// Typed stores
// -----------------------------------------------------------------------------

pub struct DecisionLogStore {
    log: DayPartitionedLog,
}

impl DecisionLogStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            log: DayPartitionedLog::new(root),
        }
    }

    pub fn append(&self, trader_id: &str, record: &DecisionRecord) {
        self.log.append(trader_id, &record.timestamp, record);
    }

    pub fn latest(&self, trader_id: &str, n: usize) -> Result<Vec<DecisionRecord>> {
        self.log.latest(trader_id, n)
    }
}

pub struct AuditLogStore {
    log: DayPartitionedLog,
}

impl AuditLogStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            log: DayPartitionedLog::new(root),
        }
    }

    pub fn append(&self, record: &AuditRecord) {
        self.log
            .append(&record.trader_id, &record.timestamp, record);
    }

    pub fn latest(&self, trader_id: &str, n: usize) -> Result<Vec<AuditRecord>> {
        self.log.latest(trader_id, n)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::record::{AccountState, PortfolioState, SubDecision};

    fn record(cycle: u64, timestamp: &str) -> DecisionRecord {
        let portfolio = PortfolioState::new(1_000.0);
        DecisionRecord {
            timestamp: timestamp.to_string(),
            cycle_number: cycle,
            system_prompt: String::new(),
            input_prompt: String::new(),
            cot_trace: String::new(),
            decision_json: serde_json::Value::Null,
            decision_source: DecisionSource::RuleHeuristic,
            account_state: AccountState::of(&portfolio),
            positions: Vec::new(),
            candidate_coins: Vec::new(),
            decisions: vec![SubDecision {
                action: ActionKind::Hold,
                symbol: "600519".to_string(),
                quantity: 0.0,
                requested_quantity: 0.0,
                executed: false,
                filled_quantity: 0.0,
                filled_notional: 0.0,
                fee_paid: 0.0,
                realized_pnl: 0.0,
                price: 100.0,
                stop_loss: None,
                take_profit: None,
                confidence: 0.55,
                reasoning: String::new(),
                order_id: "o".to_string(),
                timestamp: timestamp.to_string(),
                success: true,
                error: None,
            }],
            execution_log: Vec::new(),
            success: true,
            error_message: None,
            reasoning_steps_cn: vec!["一".to_string(), "二".to_string()],
        }
    }

    #[test]
    fn append_then_latest_returns_record_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = DecisionLogStore::new(dir.path());
        store.append("trader_one", &record(1, "2025-06-02T02:00:00Z"));
        store.append("trader_one", &record(2, "2025-06-02T02:05:00Z"));

        let latest = store.latest("trader_one", 1).unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].cycle_number, 2);
    }

    #[test]
    fn day_bucket_uses_shanghai_calendar() {
        let dir = tempfile::tempdir().unwrap();
        let store = DecisionLogStore::new(dir.path());
        // 2025-06-01T17:00:00Z is 2025-06-02 01:00 in Shanghai.
        store.append("trader_one", &record(1, "2025-06-01T17:00:00+00:00"));
        let expected = dir
            .path()
            .join("trader_one")
            .join("2025-06-02.jsonl");
        assert!(expected.exists());
    }

    #[test]
    fn latest_spans_multiple_days_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = DecisionLogStore::new(dir.path());
        store.append("trader_one", &record(1, "2025-06-02T02:00:00Z"));
        store.append("trader_one", &record(2, "2025-06-03T02:00:00Z"));
        store.append("trader_one", &record(3, "2025-06-03T02:05:00Z"));

        let latest = store.latest("trader_one", 3).unwrap();
        assert_eq!(
            latest.iter().map(|r| r.cycle_number).collect::<Vec<_>>(),
            vec![3, 2, 1]
        );
    }

    #[test]
    fn missing_trader_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = DecisionLogStore::new(dir.path());
        assert!(store.latest("ghost", 10).unwrap().is_empty());
    }

    #[test]
    fn audit_append_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = AuditLogStore::new(dir.path());
        let rec = AuditRecord {
            timestamp: "2025-06-02T02:00:00Z".to_string(),
            trader_id: "trader_one".to_string(),
            cycle_number: 4,
            readiness_level: ReadinessLevel::Error,
            readiness_reasons: vec!["intraday_frames_insufficient".to_string()],
            opening_phase_active: false,
            decision_source: DecisionSource::ReadinessGate,
            action: ActionKind::Hold,
            symbol: "600519".to_string(),
            executed: false,
            success: true,
            error: None,
        };
        store.append(&rec);
        let latest = store.latest("trader_one", 5).unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].cycle_number, 4);
        assert_eq!(latest[0].readiness_level, ReadinessLevel::Error);
    }
}
