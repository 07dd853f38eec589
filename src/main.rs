// =============================================================================
// onlytrade runtime — Main Entry Point
// =============================================================================
//
// Control-plane runtime for the multi-agent virtual A-share trading
// simulator. Boot order: environment → shared state → mode-specific
// background loops (replay ticker or live-file poller + timer cadence +
// session guard) → control API → signal wait → graceful shutdown.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod config;
mod engine;
mod features;
mod llm;
mod market;
mod scheduler;
mod store;
mod types;

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::api::rest::{self, ApiContext};
use crate::app_state::AppState;
use crate::config::RuntimeConfig;
use crate::engine::{DecisionEngine, EngineConfig};
use crate::features::context::ContextBuilder;
use crate::llm::{LlmConfig, LlmDecisionClient};
use crate::scheduler::session_guard::{run_session_guard, SessionGuardConfig};
use crate::scheduler::{
    run_live_file_poller, run_replay_ticker, run_timer_cadence, AgentScheduler, SchedulerDeps,
};
use crate::types::DataMode;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        onlytrade runtime — Starting Up                  ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    // Boot-time fatal errors (e.g. the strict-live precondition) exit
    // non-zero here.
    let config = RuntimeConfig::from_env()?;
    let run_id = Uuid::new_v4().to_string();
    let root = std::env::current_dir()?;

    info!(
        mode = %config.data_mode,
        provider = %config.market_provider,
        strict_live = config.strict_live,
        llm_enabled = config.llm_enabled,
        run_id = %run_id,
        "configuration resolved"
    );

    // ── 2. Build shared state ────────────────────────────────────────────
    let state = AppState::build(config.clone(), run_id.clone(), &root)?;

    // ── 3. Decision pipeline ─────────────────────────────────────────────
    let engine = Arc::new(DecisionEngine::new(EngineConfig::new(
        config.commission_rate,
        config.guardrails.clone(),
    )));
    let llm = Arc::new(LlmDecisionClient::new(LlmConfig::from_runtime(&config)));
    let context_builder = Arc::new(ContextBuilder::new(
        state.market.clone(),
        state.live.clone(),
        config.data_mode,
        config.strict_live,
    ));

    let scheduler = Arc::new(AgentScheduler::new(
        SchedulerDeps {
            registry: state.registry.clone(),
            context_builder,
            engine,
            llm,
            memory: state.memory.clone(),
            decision_log: state.decision_log.clone(),
            audit_log: state.audit_log.clone(),
            kill_switch: state.kill_switch.clone(),
            replay: state.replay.clone(),
        },
        &config,
        run_id.clone(),
    ));

    if state.kill_switch.is_active() {
        warn!("kill-switch active from previous run — starting paused");
        if let Some(replay) = &state.replay {
            replay.pause();
        }
    }

    // ── 4. Background loops ──────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    match config.data_mode {
        DataMode::Replay => {
            let replay = state
                .replay
                .clone()
                .expect("replay mode always builds a replay engine");
            tokio::spawn(run_replay_ticker(
                replay,
                scheduler.clone(),
                config.replay_tick_ms,
                shutdown_rx.clone(),
            ));
        }
        DataMode::LiveFile => {
            let live = state
                .live
                .clone()
                .expect("live_file mode always builds a live provider");
            tokio::spawn(run_live_file_poller(live.clone(), shutdown_rx.clone()));
            tokio::spawn(run_timer_cadence(
                scheduler.clone(),
                config.cycle_ms,
                shutdown_rx.clone(),
            ));
            tokio::spawn(run_session_guard(
                scheduler.clone(),
                Some(live),
                SessionGuardConfig {
                    enabled: config.session_guard_enabled,
                    auto_resume: config.session_guard_auto_resume,
                    check_ms: config.session_guard_check_ms,
                    require_fresh_live_data: config.session_guard_require_fresh_live_data,
                },
                shutdown_rx.clone(),
            ));
        }
    }

    // ── 5. Control API ───────────────────────────────────────────────────
    let bind_addr =
        std::env::var("ONLYTRADE_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());
    let app = rest::router(ApiContext {
        app: state.clone(),
        scheduler: scheduler.clone(),
    });
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "control API listening");

    let mut api_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = api_shutdown.changed().await;
            })
            .await
    });

    info!("all subsystems running — SIGINT/SIGTERM to stop");

    // ── 6. Graceful shutdown ─────────────────────────────────────────────
    wait_for_signal().await;
    warn!("shutdown signal received — stopping background loops");
    let _ = shutdown_tx.send(true);

    scheduler.pause();
    if let Some(replay) = &state.replay {
        replay.pause();
    }
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "API server exited with error"),
        Err(e) => warn!(error = %e, "API server task join failed"),
    }

    info!("onlytrade runtime shut down complete");
    Ok(())
}

/// Block until SIGINT (Ctrl+C) or SIGTERM arrives.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable, falling back to Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
