// =============================================================================
// Agent scheduler — cadence controller and single-flight cycle dispatcher
// =============================================================================
//
// Two cadences share one dispatcher:
//   * replay mode: the replay ticker reports advanced bars; every
//     `decision_every_bars` bars adds one pending step.
//   * live_file mode: a periodic timer adds one pending step per `cycle_ms`.
//
// The dispatcher drains pending steps strictly one cycle at a time (the
// single-flight guard); overlapping triggers only grow the pending counter.
// Kill-switch activation pauses the scheduler, zeroes pending work, and
// makes resume/step refuse with `kill_switch_active` until deactivated.
// =============================================================================

pub mod session_guard;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::RuntimeConfig;
use crate::engine::record::DecisionRecord;
use crate::engine::{DecisionEngine, DecisionInput, ExternalDecision};
use crate::features::context::ContextBuilder;
use crate::features::readiness::{self, ReadinessConfig, ReadinessLevel, ReadinessReport};
use crate::llm::LlmDecisionClient;
use crate::market::replay::ReplayEngine;
use crate::market::session::trading_day_of;
use crate::store::kill_switch::KillSwitch;
use crate::store::logs::{AuditLogStore, AuditRecord, DecisionLogStore};
use crate::store::memory::{MemoryConfig, MemoryStore, ReplayPosition};
use crate::store::registry::AgentRegistry;
use crate::types::DataMode;

// -----------------------------------------------------------------------------
// Errors & status
// -----------------------------------------------------------------------------

/// Control operations refused while the kill-switch is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlError {
    KillSwitchActive,
}

impl std::fmt::Display for ControlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KillSwitchActive => write!(f, "kill_switch_active"),
        }
    }
}

impl std::error::Error for ControlError {}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleCounters {
    /// Dispatcher cycles started.
    pub total_cycles: u64,
    /// Per-trader evaluations that produced a decision.
    pub successful_cycles: u64,
    /// Per-trader evaluations that failed (isolated, cycle continues).
    pub failed_cycles: u64,
    /// Decisions produced per trader; a decision's cycle_number is this
    /// trader's 1-indexed call sequence.
    pub call_count: HashMap<String, u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub mode: DataMode,
    pub running: bool,
    pub auto_paused: bool,
    pub pending_steps: u64,
    pub in_flight: bool,
    pub bars_since_decision: u64,
    pub decision_every_bars: u64,
    pub counters: CycleCounters,
}

#[derive(Debug, Default)]
struct SchedState {
    running: bool,
    auto_paused: bool,
    pending_steps: u64,
    in_flight: bool,
    bars_since_decision: u64,
}

// -----------------------------------------------------------------------------
// Scheduler
// -----------------------------------------------------------------------------

/// Everything one cycle needs, owned as shared handles.
pub struct SchedulerDeps {
    pub registry: Arc<AgentRegistry>,
    pub context_builder: Arc<ContextBuilder>,
    pub engine: Arc<DecisionEngine>,
    pub llm: Arc<LlmDecisionClient>,
    pub memory: Arc<MemoryStore>,
    pub decision_log: Arc<DecisionLogStore>,
    pub audit_log: Arc<AuditLogStore>,
    pub kill_switch: Arc<KillSwitch>,
    /// Present in replay mode; feeds the memory snapshot's tape position.
    pub replay: Option<Arc<ReplayEngine>>,
}

pub struct AgentScheduler {
    deps: SchedulerDeps,
    mode: DataMode,
    run_id: String,
    decision_every_bars: u64,
    readiness_config: ReadinessConfig,
    memory_config_template: MemoryConfig,
    sched: Mutex<SchedState>,
    counters: Mutex<CycleCounters>,
}

impl AgentScheduler {
    pub fn new(deps: SchedulerDeps, config: &RuntimeConfig, run_id: impl Into<String>) -> Self {
        // A kill-switch left active from a previous run re-pauses the
        // system at boot.
        let start_paused = deps.kill_switch.is_active();
        Self {
            deps,
            mode: config.data_mode,
            run_id: run_id.into(),
            decision_every_bars: config.decision_every_bars,
            readiness_config: ReadinessConfig::default(),
            memory_config_template: MemoryConfig {
                initial_balance: config.initial_balance,
                decision_every_bars: config.decision_every_bars,
                llm_model: config.openai_model.clone(),
                commission_rate: config.commission_rate,
            },
            sched: Mutex::new(SchedState {
                running: !start_paused,
                ..Default::default()
            }),
            counters: Mutex::new(CycleCounters::default()),
        }
    }

    // -------------------------------------------------------------------------
    // Cadence inputs
    // -------------------------------------------------------------------------

    /// Replay ticker callback: `n` bars advanced since the last wake-up.
    pub fn on_bars_advanced(self: &Arc<Self>, n: u64) {
        if n == 0 {
            return;
        }
        {
            let mut sched = self.sched.lock();
            sched.bars_since_decision += n;
            let quotient = sched.bars_since_decision / self.decision_every_bars;
            if quotient > 0 {
                sched.pending_steps += quotient;
                sched.bars_since_decision %= self.decision_every_bars;
            }
        }
        self.spawn_drain();
    }

    /// Timer cadence (live_file mode): one cycle per tick.
    pub fn request_cycles(self: &Arc<Self>, n: u64) {
        if n == 0 {
            return;
        }
        self.sched.lock().pending_steps += n;
        self.spawn_drain();
    }

    // -------------------------------------------------------------------------
    // Controls
    // -------------------------------------------------------------------------

    pub fn pause(&self) {
        let mut sched = self.sched.lock();
        sched.running = false;
        sched.auto_paused = false;
        info!("scheduler paused");
    }

    /// Pause driven by the session guard; distinguishable so that a later
    /// auto-resume never overrides a manual pause.
    pub fn auto_pause(&self) {
        let mut sched = self.sched.lock();
        if sched.running {
            sched.running = false;
            sched.auto_paused = true;
            info!("scheduler auto-paused (market session closed)");
        }
    }

    pub fn resume(self: &Arc<Self>) -> Result<(), ControlError> {
        if self.deps.kill_switch.is_active() {
            return Err(ControlError::KillSwitchActive);
        }
        {
            let mut sched = self.sched.lock();
            sched.running = true;
            sched.auto_paused = false;
        }
        info!("scheduler resumed");
        self.spawn_drain();
        Ok(())
    }

    pub fn is_auto_paused(&self) -> bool {
        self.sched.lock().auto_paused
    }

    pub fn is_running(&self) -> bool {
        self.sched.lock().running
    }

    /// Manual step: advance `n` bars (replay) or run `n` cycles (live).
    pub fn step(self: &Arc<Self>, n: u64) -> Result<(), ControlError> {
        if self.deps.kill_switch.is_active() {
            return Err(ControlError::KillSwitchActive);
        }
        match &self.deps.replay {
            Some(replay) => {
                let advanced = replay.step(n as usize);
                self.on_bars_advanced(advanced.len() as u64);
            }
            None => self.request_cycles(n),
        }
        Ok(())
    }

    /// Kill-switch activation hook: halt, drop pending work, clear the
    /// in-flight marker. Dropped bars are never retroactively processed.
    pub fn on_kill_switch_activated(&self) {
        let mut sched = self.sched.lock();
        sched.running = false;
        sched.auto_paused = false;
        sched.pending_steps = 0;
        sched.in_flight = false;
        sched.bars_since_decision = 0;
        warn!("scheduler halted by kill-switch");
    }

    pub fn status(&self) -> SchedulerStatus {
        let sched = self.sched.lock();
        SchedulerStatus {
            mode: self.mode,
            running: sched.running,
            auto_paused: sched.auto_paused,
            pending_steps: sched.pending_steps,
            in_flight: sched.in_flight,
            bars_since_decision: sched.bars_since_decision,
            decision_every_bars: self.decision_every_bars,
            counters: self.counters.lock().clone(),
        }
    }

    // -------------------------------------------------------------------------
    // Dispatcher
    // -------------------------------------------------------------------------

    /// Launch the drain task if one is not already in flight. The pending
    /// counter coalesces every trigger that lands while a cycle runs.
    fn spawn_drain(self: &Arc<Self>) {
        let scheduler = self.clone();
        tokio::spawn(async move { scheduler.drain().await });
    }

    async fn drain(self: Arc<Self>) {
        loop {
            if self.deps.kill_switch.is_active() {
                self.on_kill_switch_activated();
                return;
            }
            {
                let mut sched = self.sched.lock();
                if sched.in_flight || !sched.running || sched.pending_steps == 0 {
                    return;
                }
                sched.in_flight = true;
                sched.pending_steps -= 1;
            }

            self.run_cycle_once().await;

            self.sched.lock().in_flight = false;
        }
    }

    /// One full cycle over the running trader set. The set is snapshotted
    /// at cycle start; registry mutations land in the next cycle.
    pub async fn run_cycle_once(&self) {
        self.counters.lock().total_cycles += 1;
        let traders = self.deps.registry.running_traders();
        if traders.is_empty() {
            debug!("cycle skipped: no running traders");
            return;
        }

        for trader_id in traders {
            if self.deps.kill_switch.is_active() {
                warn!("cycle interrupted by kill-switch");
                return;
            }
            match self.evaluate_trader(&trader_id).await {
                Ok(()) => self.counters.lock().successful_cycles += 1,
                Err(e) => {
                    self.counters.lock().failed_cycles += 1;
                    warn!(trader_id = %trader_id, error = %e, "trader evaluation failed");
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Per-trader evaluation
    // -------------------------------------------------------------------------

    async fn evaluate_trader(&self, trader_id: &str) -> anyhow::Result<()> {
        let manifest = self.deps.registry.manifest(trader_id)?;

        let mut memory = self.deps.memory.load_or_init(
            trader_id,
            &self.run_id,
            self.memory_config_template.clone(),
        );
        let portfolio = memory.portfolio();
        let holdings: HashMap<String, f64> = portfolio
            .holdings
            .iter()
            .map(|h| (h.symbol.clone(), h.shares))
            .collect();

        let cycle_number = self
            .counters
            .lock()
            .call_count
            .get(trader_id)
            .copied()
            .unwrap_or(0)
            + 1;

        let mut ctx = self
            .deps
            .context_builder
            .build(trader_id, cycle_number, &manifest.stock_pool, &holdings)
            .await?;

        let now_ms = Utc::now().timestamp_millis();
        let readiness = readiness::evaluate(&ctx, &self.readiness_config, now_ms);
        ctx.opening_phase_active = readiness.opening_phase_active;

        let external = self.resolve_external(&ctx, &manifest, &readiness).await;

        let style = manifest.trading_style.unwrap_or_default();
        let risk = manifest.risk_profile.unwrap_or_default();
        let outcome = self.deps.engine.decide(DecisionInput {
            ctx: &ctx,
            style,
            risk,
            flat_cycles: memory.stats.flat_cycles,
            portfolio: &portfolio,
            external,
        });

        self.persist(trader_id, &outcome.record, &readiness);

        let trading_day = trading_day_of(now_ms);
        let replay_position = self.replay_position();
        memory.record_decision(
            &outcome.record,
            &outcome.portfolio,
            replay_position,
            &trading_day,
            now_ms,
        );
        self.deps.memory.save(trader_id, &memory);

        *self
            .counters
            .lock()
            .call_count
            .entry(trader_id.to_string())
            .or_insert(0) += 1;
        Ok(())
    }

    /// Decide what overrides the heuristic: the readiness gate at ERROR,
    /// else the model when enabled and the kill-switch is clear.
    async fn resolve_external(
        &self,
        ctx: &crate::features::context::AgentContext,
        manifest: &crate::store::registry::AgentManifest,
        readiness: &ReadinessReport,
    ) -> Option<ExternalDecision> {
        if readiness.level == ReadinessLevel::Error {
            return Some(ExternalDecision::readiness_gate(
                &ctx.symbol,
                readiness.reasons.clone(),
            ));
        }
        if self.deps.kill_switch.is_active() {
            return None;
        }
        self.deps.llm.decide(ctx, manifest).await
    }

    fn persist(&self, trader_id: &str, record: &DecisionRecord, readiness: &ReadinessReport) {
        self.deps.decision_log.append(trader_id, record);

        if let Some(sub) = record.primary() {
            self.deps.audit_log.append(&AuditRecord {
                timestamp: record.timestamp.clone(),
                trader_id: trader_id.to_string(),
                cycle_number: record.cycle_number,
                readiness_level: readiness.level,
                readiness_reasons: readiness.reasons.clone(),
                opening_phase_active: readiness.opening_phase_active,
                decision_source: record.decision_source,
                action: sub.action,
                symbol: sub.symbol.clone(),
                executed: sub.executed,
                success: record.success,
                error: sub.error.clone(),
            });
        }
    }

    fn replay_position(&self) -> Option<ReplayPosition> {
        let replay = self.deps.replay.as_ref()?;
        let status = replay.status();
        Some(ReplayPosition {
            trading_day: status.trading_day,
            day_index: status.day_index,
            bar_cursor: status.cursor_index,
            is_day_start: status.day_bar_index == 0,
            is_day_end: status.day_bar_count > 0
                && status.day_bar_index + 1 == status.day_bar_count,
        })
    }
}

// -----------------------------------------------------------------------------
// Background loops
// -----------------------------------------------------------------------------

/// Replay ticker: wakes the replay engine on a fixed wall-clock interval
/// and reports advanced bars to the scheduler.
pub async fn run_replay_ticker(
    replay: Arc<ReplayEngine>,
    scheduler: Arc<AgentScheduler>,
    tick_ms: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(Duration::from_millis(tick_ms.max(50)));
    info!(tick_ms, "replay ticker started");
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let advanced = replay.tick(tick_ms);
                if !advanced.is_empty() {
                    scheduler.on_bars_advanced(advanced.len() as u64);
                }
            }
            _ = shutdown.changed() => {
                info!("replay ticker stopped");
                return;
            }
        }
    }
}

/// Timer cadence for live_file mode: one pending cycle per `cycle_ms`.
pub async fn run_timer_cadence(
    scheduler: Arc<AgentScheduler>,
    cycle_ms: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(Duration::from_millis(cycle_ms.max(500)));
    // The first tick fires immediately; skip it so boot settles first.
    interval.tick().await;
    info!(cycle_ms, "timer cadence started");
    loop {
        tokio::select! {
            _ = interval.tick() => {
                scheduler.request_cycles(1);
            }
            _ = shutdown.changed() => {
                info!("timer cadence stopped");
                return;
            }
        }
    }
}

/// Live-file poll loop.
pub async fn run_live_file_poller(
    provider: Arc<crate::market::live_file::LiveFileProvider>,
    mut shutdown: watch::Receiver<bool>,
) {
    let refresh = provider.refresh_ms().max(250);
    let mut interval = tokio::time::interval(Duration::from_millis(refresh));
    info!(refresh_ms = refresh, "live-file poller started");
    loop {
        tokio::select! {
            _ = interval.tick() => {
                provider.refresh(false);
            }
            _ = shutdown.changed() => {
                info!("live-file poller stopped");
                return;
            }
        }
    }
}

/// Surface an async task failure without killing the process.
pub fn log_task_result(name: &'static str, result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        error!(task = name, error = %e, "background task aborted");
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GuardrailConfig;
    use crate::engine::EngineConfig;
    use crate::llm::{LlmConfig, LlmDecisionClient};
    use crate::market::archive::FrameArchive;
    use crate::market::frame::{BarFrame, BarWindow, Instrument, BAR_SCHEMA_VERSION};
    use crate::market::session::SessionPhase;
    use crate::market::MarketDataService;
    use crate::types::MarketProvider;
    use std::path::Path;

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
            high: close + 0.5,
            low: close - 0.5,
            close,
            volume_shares: 10_000.0,
            turnover_cny: close * 10_000.0,
            vwap: close,
            mode: "mock".to_string(),
            provider: "test".to_string(),
        }
    }

    fn write_manifest(agents_dir: &Path, id: &str) {
        let dir = agents_dir.join(id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("agent.json"),
            serde_json::json!({
                "agent_id": id,
                "agent_name": id,
                "ai_model": "gpt-4o-mini",
                "exchange_id": "cn-a",
                "trading_style": "momentum_trend",
                "risk_profile": "balanced",
                "stock_pool": ["600519"],
            })
            .to_string(),
        )
        .unwrap();
    }

    fn test_config() -> RuntimeConfig {
        RuntimeConfig {
            decision_every_bars: 5,
            ..Default::default()
        }
    }

    fn build_scheduler(root: &Path) -> Arc<AgentScheduler> {
        // A replay tape deep enough for warmup plus stepping.
        let mut frames = Vec::new();
        for i in 0..240 {
            frames.push(bar("600519", "1m", 1_000_000 + i * 60_000, 100.0 + i as f64 * 0.01));
        }
        let replay = Arc::new(ReplayEngine::new(frames, 30, 60.0, false));
        let market = Arc::new(MarketDataService::new(
            replay.clone(),
            Arc::new(FrameArchive::from_frames(Vec::new(), Vec::new())),
            DataMode::Replay,
            MarketProvider::Mock,
            false,
            None,
            None,
        ));

        let agents_dir = root.join("agents");
        write_manifest(&agents_dir, "trader_one");
        let registry = Arc::new(AgentRegistry::open(
            &agents_dir,
            root.join("data/agents/registry.json"),
        ));
        registry.register("trader_one").unwrap();
        registry.start("trader_one").unwrap();

        let config = test_config();
        let deps = SchedulerDeps {
            registry,
            context_builder: Arc::new(ContextBuilder::new(
                market,
                None,
                DataMode::Replay,
                false,
            )),
            engine: Arc::new(DecisionEngine::new(EngineConfig::new(
                0.0003,
                GuardrailConfig::default(),
            ))),
            llm: Arc::new(LlmDecisionClient::new(LlmConfig::from_runtime(&config))),
            memory: Arc::new(MemoryStore::new(root.join("data/agent-memory"))),
            decision_log: Arc::new(DecisionLogStore::new(root.join("data/decisions"))),
            audit_log: Arc::new(AuditLogStore::new(root.join("data/audit/decision_audit"))),
            kill_switch: Arc::new(KillSwitch::open(root.join("data/runtime/kill-switch.json"))),
            replay: Some(replay),
        };
        Arc::new(AgentScheduler::new(deps, &config, "run-test"))
    }

    #[tokio::test]
    async fn cycle_produces_decision_audit_and_memory() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = build_scheduler(dir.path());

        scheduler.run_cycle_once().await;

        let status = scheduler.status();
        assert_eq!(status.counters.total_cycles, 1);
        assert_eq!(status.counters.successful_cycles, 1);
        assert_eq!(status.counters.failed_cycles, 0);
        assert_eq!(status.counters.call_count.get("trader_one"), Some(&1));

        let decisions = scheduler
            .deps
            .decision_log
            .latest("trader_one", 5)
            .unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].cycle_number, 1);
        assert_eq!(decisions[0].decisions.len(), 1);

        let audits = scheduler.deps.audit_log.latest("trader_one", 5).unwrap();
        assert_eq!(audits.len(), 1);

        let memory = scheduler.deps.memory.get("trader_one").unwrap();
        assert_eq!(memory.stats.decisions, 1);
        // Replay position captured from the tape.
        assert_eq!(memory.replay.trading_day, "2025-06-02");
    }

    #[tokio::test]
    async fn cycle_numbers_are_sequential_per_trader() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = build_scheduler(dir.path());

        scheduler.run_cycle_once().await;
        scheduler.run_cycle_once().await;
        scheduler.run_cycle_once().await;

        let decisions = scheduler
            .deps
            .decision_log
            .latest("trader_one", 10)
            .unwrap();
        let cycles: Vec<u64> = decisions.iter().map(|d| d.cycle_number).collect();
        assert_eq!(cycles, vec![3, 2, 1]);
    }

    #[test]
    fn bars_accumulate_into_pending_steps() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let _guard = rt.enter();
        let dir = tempfile::tempdir().unwrap();
        let scheduler = build_scheduler(dir.path());
        // Pause so the drain task leaves pending counts observable.
        scheduler.pause();

        scheduler.on_bars_advanced(3);
        assert_eq!(scheduler.status().pending_steps, 0);
        assert_eq!(scheduler.status().bars_since_decision, 3);

        scheduler.on_bars_advanced(8); // 11 total -> 2 steps, remainder 1
        let status = scheduler.status();
        assert_eq!(status.pending_steps, 2);
        assert_eq!(status.bars_since_decision, 1);
    }

    #[test]
    fn kill_switch_blocks_resume_and_step_and_clears_pending() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let _guard = rt.enter();
        let dir = tempfile::tempdir().unwrap();
        let scheduler = build_scheduler(dir.path());
        scheduler.pause();
        scheduler.on_bars_advanced(15); // 3 pending steps
        assert_eq!(scheduler.status().pending_steps, 3);

        let calls_before = scheduler.status().counters.call_count.clone();

        scheduler.deps.kill_switch.activate("test halt", "tester");
        scheduler.on_kill_switch_activated();

        let status = scheduler.status();
        assert!(!status.running);
        assert_eq!(status.pending_steps, 0);
        assert!(!status.in_flight);

        assert_eq!(
            scheduler.resume().unwrap_err(),
            ControlError::KillSwitchActive
        );
        assert_eq!(scheduler.step(1).unwrap_err(), ControlError::KillSwitchActive);
        // No decisions were made while halted.
        assert_eq!(scheduler.status().counters.call_count, calls_before);

        scheduler.deps.kill_switch.deactivate("tester");
        scheduler.resume().unwrap();
        // Pending starts from zero after a halt; dropped bars stay dropped.
        assert_eq!(scheduler.status().pending_steps, 0);
        assert!(scheduler.status().running);
    }

    #[tokio::test]
    async fn drain_respects_single_flight_and_coalesces() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = build_scheduler(dir.path());

        // Queue several steps while paused, then resume and drain.
        scheduler.pause();
        scheduler.on_bars_advanced(25); // 5 steps pending
        assert_eq!(scheduler.status().pending_steps, 5);
        scheduler.resume().unwrap();

        // Wait for the drain task to finish all pending cycles.
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let status = scheduler.status();
            if status.pending_steps == 0 && !status.in_flight {
                break;
            }
        }
        let status = scheduler.status();
        assert_eq!(status.pending_steps, 0);
        assert!(!status.in_flight);
        assert_eq!(status.counters.call_count.get("trader_one"), Some(&5));
    }

    #[tokio::test]
    async fn auto_pause_never_overrides_manual_resume_state() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = build_scheduler(dir.path());
        scheduler.pause();
        assert!(!scheduler.is_auto_paused());
        // Auto-pause on an already manually paused scheduler is a no-op.
        scheduler.auto_pause();
        assert!(!scheduler.is_auto_paused());

        scheduler.resume().unwrap();
        scheduler.auto_pause();
        assert!(scheduler.is_auto_paused());
        assert!(!scheduler.is_running());
    }
}
