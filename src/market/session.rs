// =============================================================================
// CN-A trading session math (Asia/Shanghai, fixed UTC+8)
// =============================================================================
//
// Minute-of-day phase table:
//   555..=569  pre_open        (09:15 - 09:29)
//   570..=689  continuous_am   (09:30 - 11:29)
//   690..=779  lunch_break     (11:30 - 12:59)
//   780..=899  continuous_pm   (13:00 - 14:59)
//   900..=914  close_auction   (15:00 - 15:14)
//   otherwise  closed
//
// Mainland China has no daylight saving, so a fixed offset is exact.
// =============================================================================

use chrono::{FixedOffset, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Phase of the CN-A trading day a timestamp falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    PreOpen,
    ContinuousAm,
    LunchBreak,
    ContinuousPm,
    CloseAuction,
    Closed,
}

impl SessionPhase {
    /// Whether market data is being produced in this phase. The lunch break
    /// counts as outside the session: the tape is silent and the session
    /// guard auto-pauses across it.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::PreOpen | Self::ContinuousAm | Self::ContinuousPm | Self::CloseAuction
        )
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PreOpen => "pre_open",
            Self::ContinuousAm => "continuous_am",
            Self::LunchBreak => "lunch_break",
            Self::ContinuousPm => "continuous_pm",
            Self::CloseAuction => "close_auction",
            Self::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

/// Asia/Shanghai offset (UTC+8, no DST).
pub fn cn_offset() -> FixedOffset {
    FixedOffset::east_opt(8 * 3600).expect("UTC+8 is a valid offset")
}

/// Map a minute-of-day (0..=1439, Shanghai local) to its session phase.
pub fn phase_for_minute(minute_of_day: u32) -> SessionPhase {
    match minute_of_day {
        555..=569 => SessionPhase::PreOpen,
        570..=689 => SessionPhase::ContinuousAm,
        690..=779 => SessionPhase::LunchBreak,
        780..=899 => SessionPhase::ContinuousPm,
        900..=914 => SessionPhase::CloseAuction,
        _ => SessionPhase::Closed,
    }
}

/// Session phase at an epoch-millisecond instant.
pub fn phase_at(ts_ms: i64) -> SessionPhase {
    let local = cn_offset().timestamp_millis_opt(ts_ms).single();
    match local {
        Some(dt) => phase_for_minute(dt.hour() * 60 + dt.minute()),
        None => SessionPhase::Closed,
    }
}

/// Session phase right now.
pub fn phase_now() -> SessionPhase {
    phase_at(Utc::now().timestamp_millis())
}

/// Calendar date (YYYY-MM-DD) of an epoch-millisecond instant in the
/// exchange timezone. Used for trading-day tagging and log day-bucketing.
pub fn trading_day_of(ts_ms: i64) -> String {
    match cn_offset().timestamp_millis_opt(ts_ms).single() {
        Some(dt) => dt.format("%Y-%m-%d").to_string(),
        None => "1970-01-01".to_string(),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Epoch ms for a Shanghai-local wall-clock time on 2025-06-02.
    fn sh_ts(hour: u32, minute: u32) -> i64 {
        cn_offset()
            .with_ymd_and_hms(2025, 6, 2, hour, minute, 0)
            .unwrap()
            .timestamp_millis()
    }

    #[test]
    fn phase_boundaries() {
        assert_eq!(phase_for_minute(554), SessionPhase::Closed);
        assert_eq!(phase_for_minute(555), SessionPhase::PreOpen);
        assert_eq!(phase_for_minute(569), SessionPhase::PreOpen);
        assert_eq!(phase_for_minute(570), SessionPhase::ContinuousAm);
        assert_eq!(phase_for_minute(689), SessionPhase::ContinuousAm);
        assert_eq!(phase_for_minute(690), SessionPhase::LunchBreak);
        assert_eq!(phase_for_minute(779), SessionPhase::LunchBreak);
        assert_eq!(phase_for_minute(780), SessionPhase::ContinuousPm);
        assert_eq!(phase_for_minute(899), SessionPhase::ContinuousPm);
        assert_eq!(phase_for_minute(900), SessionPhase::CloseAuction);
        assert_eq!(phase_for_minute(914), SessionPhase::CloseAuction);
        assert_eq!(phase_for_minute(915), SessionPhase::Closed);
        assert_eq!(phase_for_minute(0), SessionPhase::Closed);
    }

    #[test]
    fn phase_at_wall_clock() {
        assert_eq!(phase_at(sh_ts(9, 20)), SessionPhase::PreOpen);
        assert_eq!(phase_at(sh_ts(10, 0)), SessionPhase::ContinuousAm);
        assert_eq!(phase_at(sh_ts(12, 0)), SessionPhase::LunchBreak);
        assert_eq!(phase_at(sh_ts(14, 30)), SessionPhase::ContinuousPm);
        assert_eq!(phase_at(sh_ts(15, 5)), SessionPhase::CloseAuction);
        assert_eq!(phase_at(sh_ts(20, 0)), SessionPhase::Closed);
    }

    #[test]
    fn active_phases() {
        assert!(SessionPhase::ContinuousAm.is_active());
        assert!(SessionPhase::CloseAuction.is_active());
        assert!(!SessionPhase::LunchBreak.is_active());
        assert!(!SessionPhase::Closed.is_active());
    }

    #[test]
    fn trading_day_uses_shanghai_calendar() {
        // 2025-06-02 00:30 Shanghai is 2025-06-01 16:30 UTC.
        let ts = sh_ts(0, 30);
        assert_eq!(trading_day_of(ts), "2025-06-02");
    }

    #[test]
    fn phase_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&SessionPhase::CloseAuction).unwrap(),
            "\"close_auction\""
        );
    }
}
