// =============================================================================
// Market-session guard — auto-pause outside CN-A trading hours (live mode)
// =============================================================================
//
// Every `check_ms` the guard samples the session phase. Outside an active
// phase it auto-pauses the scheduler; back inside it resumes only when the
// pause was its own doing (manual pauses are never overridden), auto-resume
// is enabled, and (when required) the live snapshot is fresh and non-empty.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::market::live_file::LiveFileProvider;
use crate::market::session::{phase_now, SessionPhase};
use crate::scheduler::AgentScheduler;

#[derive(Debug, Clone)]
pub struct SessionGuardConfig {
    pub enabled: bool,
    pub auto_resume: bool,
    pub check_ms: u64,
    pub require_fresh_live_data: bool,
}

/// What the guard should do for one observation. Split out pure so the
/// policy is testable without a clock or a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardAction {
    None,
    AutoPause,
    AutoResume,
}

pub fn decide_action(
    phase: SessionPhase,
    scheduler_running: bool,
    auto_paused: bool,
    auto_resume: bool,
    live_data_ok: bool,
) -> GuardAction {
    if !phase.is_active() {
        if scheduler_running {
            return GuardAction::AutoPause;
        }
        return GuardAction::None;
    }
    // In session: only undo our own pause, and only with usable data.
    if auto_resume && auto_paused && !scheduler_running && live_data_ok {
        return GuardAction::AutoResume;
    }
    GuardAction::None
}

/// Periodic guard loop. `live` is the live-file provider when the deployment
/// requires fresh data before resuming.
pub async fn run_session_guard(
    scheduler: Arc<AgentScheduler>,
    live: Option<Arc<LiveFileProvider>>,
    config: SessionGuardConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    if !config.enabled {
        info!("session guard disabled");
        return;
    }
    let mut interval = tokio::time::interval(Duration::from_millis(config.check_ms.max(1_000)));
    info!(check_ms = config.check_ms, "session guard started");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let phase = phase_now();
                let live_data_ok = if config.require_fresh_live_data {
                    live.as_ref()
                        .map(|p| !p.is_stale() && p.frame_count() > 0)
                        .unwrap_or(false)
                } else {
                    true
                };
                let action = decide_action(
                    phase,
                    scheduler.is_running(),
                    scheduler.is_auto_paused(),
                    config.auto_resume,
                    live_data_ok,
                );
                match action {
                    GuardAction::AutoPause => scheduler.auto_pause(),
                    GuardAction::AutoResume => {
                        // A kill-switch refusal here is expected; the guard
                        // retries on the next tick once it clears.
                        if let Err(e) = scheduler.resume() {
                            debug!(error = %e, "session guard resume refused");
                        }
                    }
                    GuardAction::None => {}
                }
            }
            _ = shutdown.changed() => {
                info!("session guard stopped");
                return;
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pauses_when_session_closes() {
        assert_eq!(
            decide_action(SessionPhase::Closed, true, false, true, true),
            GuardAction::AutoPause
        );
        assert_eq!(
            decide_action(SessionPhase::LunchBreak, true, false, true, true),
            GuardAction::AutoPause
        );
    }

    #[test]
    fn no_double_pause() {
        assert_eq!(
            decide_action(SessionPhase::Closed, false, true, true, true),
            GuardAction::None
        );
    }

    #[test]
    fn resumes_only_own_pauses() {
        // Auto-paused earlier: resume in session.
        assert_eq!(
            decide_action(SessionPhase::ContinuousAm, false, true, true, true),
            GuardAction::AutoResume
        );
        // Manually paused (auto_paused = false): never overridden.
        assert_eq!(
            decide_action(SessionPhase::ContinuousAm, false, false, true, true),
            GuardAction::None
        );
    }

    #[test]
    fn auto_resume_opt_out() {
        assert_eq!(
            decide_action(SessionPhase::ContinuousAm, false, true, false, true),
            GuardAction::None
        );
    }

    #[test]
    fn stale_live_data_blocks_resume() {
        assert_eq!(
            decide_action(SessionPhase::ContinuousPm, false, true, true, false),
            GuardAction::None
        );
        // Fresh data clears the hold.
        assert_eq!(
            decide_action(SessionPhase::ContinuousPm, false, true, true, true),
            GuardAction::AutoResume
        );
    }

    #[test]
    fn running_in_session_is_noop() {
        assert_eq!(
            decide_action(SessionPhase::ContinuousAm, true, false, true, true),
            GuardAction::None
        );
    }
}
