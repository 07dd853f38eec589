// =============================================================================
// Central Application State — onlytrade runtime
// =============================================================================
//
// The single struct owning every subsystem handle. Built once at boot from
// the resolved configuration; all background tasks and the control API hold
// `Arc` references into it. No module-level globals.
// =============================================================================

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::RuntimeConfig;
use crate::market::archive::FrameArchive;
use crate::market::live_file::LiveFileProvider;
use crate::market::replay::ReplayEngine;
use crate::market::{FrameProvider, MarketDataService};
use crate::store::chat::ChatStore;
use crate::store::kill_switch::KillSwitch;
use crate::store::logs::{AuditLogStore, DecisionLogStore};
use crate::store::memory::MemoryStore;
use crate::store::registry::AgentRegistry;
use crate::types::DataMode;

/// Persisted layout roots (paths are contracts).
pub const AGENTS_DIR: &str = "agents";
pub const REGISTRY_PATH: &str = "data/agents/registry.json";
pub const MEMORY_DIR: &str = "data/agent-memory";
pub const DECISIONS_DIR: &str = "data/decisions";
pub const AUDIT_DIR: &str = "data/audit/decision_audit";
pub const CHAT_DIR: &str = "data/chat/rooms";
pub const KILL_SWITCH_PATH: &str = "data/runtime/kill-switch.json";
pub const REPLAY_ARCHIVE_DIR: &str = "onlytrade-web/public/replay/cn-a";

pub struct AppState {
    pub config: RuntimeConfig,
    pub run_id: String,

    // ── Market data ─────────────────────────────────────────────────────
    pub market: Arc<MarketDataService>,
    pub replay: Option<Arc<ReplayEngine>>,
    pub live: Option<Arc<LiveFileProvider>>,

    // ── Durable state ───────────────────────────────────────────────────
    pub registry: Arc<AgentRegistry>,
    pub memory: Arc<MemoryStore>,
    pub decision_log: Arc<DecisionLogStore>,
    pub audit_log: Arc<AuditLogStore>,
    pub chat: Arc<ChatStore>,
    pub kill_switch: Arc<KillSwitch>,

    // ── Timing ──────────────────────────────────────────────────────────
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Construct every subsystem under `root` (the process working
    /// directory in production; a temp dir in tests).
    pub fn build(config: RuntimeConfig, run_id: String, root: &Path) -> Result<Arc<Self>> {
        let archive_dir = root.join(REPLAY_ARCHIVE_DIR);

        let (provider, replay, live, history): (
            Arc<dyn FrameProvider>,
            Option<Arc<ReplayEngine>>,
            Option<Arc<LiveFileProvider>>,
            Arc<FrameArchive>,
        ) = match config.data_mode {
            DataMode::Replay => {
                // Replay cannot run without a tape.
                let archive = FrameArchive::load(&archive_dir)
                    .context("replay mode requires the pre-materialized frame archive")?;
                let daily = archive.daily.clone();
                let engine = Arc::new(ReplayEngine::new(
                    archive.intraday,
                    config.replay_warmup_bars,
                    config.replay_speed,
                    config.replay_loop,
                ));
                (
                    engine.clone(),
                    Some(engine),
                    None,
                    Arc::new(FrameArchive::from_frames(Vec::new(), daily)),
                )
            }
            DataMode::LiveFile => {
                let live = Arc::new(LiveFileProvider::new(
                    root.join(&config.live_frames_path),
                    config.live_file_refresh_ms,
                    config.live_file_stale_ms,
                ));
                live.refresh(true);
                // Daily history is best-effort in live mode.
                let history = match FrameArchive::load(&archive_dir) {
                    Ok(a) => Arc::new(FrameArchive::from_frames(Vec::new(), a.daily)),
                    Err(e) => {
                        warn!(error = %e, "daily history archive unavailable");
                        Arc::new(FrameArchive::from_frames(Vec::new(), Vec::new()))
                    }
                };
                (live.clone(), None, Some(live), history)
            }
        };

        let market = Arc::new(MarketDataService::new(
            provider,
            history,
            config.data_mode,
            config.market_provider,
            config.strict_live,
            config.market_upstream_url.clone(),
            config.market_upstream_api_key.clone(),
        ));

        let registry = Arc::new(AgentRegistry::open(
            root.join(AGENTS_DIR),
            root.join(REGISTRY_PATH),
        ));
        let removed = registry.reconcile();
        if !removed.is_empty() {
            warn!(removed = ?removed, "boot reconcile removed registry entries");
        }

        let memory = Arc::new(MemoryStore::new(root.join(MEMORY_DIR)));
        if config.reset_agent_memory_on_boot {
            match memory.reset_all() {
                Ok(n) => info!(removed = n, "agent memory reset on boot"),
                Err(e) => warn!(error = %e, "agent memory reset failed"),
            }
        }

        let state = Arc::new(Self {
            market,
            replay,
            live,
            registry,
            memory,
            decision_log: Arc::new(DecisionLogStore::new(root.join(DECISIONS_DIR))),
            audit_log: Arc::new(AuditLogStore::new(root.join(AUDIT_DIR))),
            chat: Arc::new(ChatStore::new(root.join(CHAT_DIR))),
            kill_switch: Arc::new(KillSwitch::open(root.join(KILL_SWITCH_PATH))),
            start_time: std::time::Instant::now(),
            config,
            run_id,
        });

        info!(
            mode = %state.config.data_mode,
            provider = %state.config.market_provider,
            strict_live = state.config.strict_live,
            run_id = %state.run_id,
            "application state built"
        );
        Ok(state)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

// =============================================================================
// Tests
// =============================================================================
