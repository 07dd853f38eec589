// =============================================================================
// Control API — thin HTTP wrappers over the runtime core
// =============================================================================
//
// Every endpoint wraps its payload in `{success, data}` except
// `GET /api/health` and `GET /api/symbols`, which answer bare (legacy
// convention preserved per endpoint). Mutating endpoints require the
// CONTROL_API_TOKEN bearer; a kill-switch refusal answers 423 LOCKED.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::api::auth::ControlBearer;
use crate::app_state::AppState;
use crate::market::{FrameQuery, MarketDataError};
use crate::scheduler::{AgentScheduler, ControlError};
use crate::store::registry::RegistryError;

#[derive(Clone)]
pub struct ApiContext {
    pub app: Arc<AppState>,
    pub scheduler: Arc<AgentScheduler>,
}

pub fn router(ctx: ApiContext) -> Router {
    Router::new()
        // Bare endpoints (legacy convention).
        .route("/api/health", get(health))
        .route("/api/symbols", get(symbols))
        // Wrapped read endpoints.
        .route("/api/runtime/status", get(runtime_status))
        .route("/api/replay/status", get(replay_status))
        .route("/api/kill-switch", get(kill_switch_state))
        .route("/api/agents", get(agents))
        .route("/api/market/klines", get(klines))
        .route("/api/decisions/:trader_id", get(decisions))
        .route("/api/audit/:trader_id", get(audit))
        .route("/api/chat/:room_id", get(chat_history))
        // Control endpoints (bearer token).
        .route("/api/runtime/pause", post(pause))
        .route("/api/runtime/resume", post(resume))
        .route("/api/runtime/step", post(step))
        .route("/api/kill-switch", post(kill_switch_set))
        .route("/api/agents/:agent_id/register", post(agent_register))
        .route("/api/agents/:agent_id/unregister", post(agent_unregister))
        .route("/api/agents/:agent_id/start", post(agent_start))
        .route("/api/agents/:agent_id/stop", post(agent_stop))
        .route("/api/replay/speed", post(replay_speed))
        .route("/api/replay/cursor", post(replay_cursor))
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

// -----------------------------------------------------------------------------
// Response helpers
// -----------------------------------------------------------------------------

fn ok(data: serde_json::Value) -> Response {
    Json(json!({"success": true, "data": data})).into_response()
}

fn fail(status: StatusCode, error: impl std::fmt::Display) -> Response {
    (
        status,
        Json(json!({"success": false, "error": error.to_string()})),
    )
        .into_response()
}

fn control_error(e: ControlError) -> Response {
    match e {
        ControlError::KillSwitchActive => fail(StatusCode::LOCKED, e),
    }
}

fn registry_error(e: RegistryError) -> Response {
    let status = match e {
        RegistryError::InvalidAgentId => StatusCode::BAD_REQUEST,
        RegistryError::AgentManifestNotFound | RegistryError::AgentNotRegistered => {
            StatusCode::NOT_FOUND
        }
        RegistryError::AgentAlreadyRegistered => StatusCode::CONFLICT,
    };
    fail(status, e)
}

// -----------------------------------------------------------------------------
// Read endpoints
// -----------------------------------------------------------------------------

async fn health(State(ctx): State<ApiContext>) -> Response {
    Json(json!({
        "status": "ok",
        "uptime_s": ctx.app.uptime_secs(),
        "run_id": ctx.app.run_id,
    }))
    .into_response()
}

async fn symbols(State(ctx): State<ApiContext>) -> Response {
    // Bare list, not wrapped.
    Json(ctx.app.market.symbols()).into_response()
}

async fn runtime_status(State(ctx): State<ApiContext>) -> Response {
    let scheduler = serde_json::to_value(ctx.scheduler.status()).unwrap_or_default();
    ok(json!({
        "scheduler": scheduler,
        "kill_switch": ctx.app.kill_switch.state(),
        "market": ctx.app.market.provider_status(),
        "uptime_s": ctx.app.uptime_secs(),
    }))
}

async fn replay_status(State(ctx): State<ApiContext>) -> Response {
    match &ctx.app.replay {
        Some(replay) => ok(serde_json::to_value(replay.status()).unwrap_or_default()),
        None => fail(StatusCode::NOT_FOUND, "replay engine not active"),
    }
}

async fn kill_switch_state(State(ctx): State<ApiContext>) -> Response {
    ok(serde_json::to_value(ctx.app.kill_switch.state()).unwrap_or_default())
}

async fn agents(State(ctx): State<ApiContext>) -> Response {
    let lobby = ctx.app.registry.lobby();
    let list: Vec<serde_json::Value> = ctx
        .app
        .registry
        .available()
        .into_iter()
        .map(|manifest| {
            let entry = ctx.app.registry.entry(&manifest.agent_id);
            json!({
                "manifest": manifest,
                "registry": entry,
                "in_lobby": lobby.contains(&manifest.agent_id),
            })
        })
        .collect();
    ok(json!({"agents": list, "running": ctx.app.registry.running_traders()}))
}

#[derive(Deserialize)]
struct KlineParams {
    symbol: String,
    #[serde(default = "default_interval")]
    interval: String,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_interval() -> String {
    "1m".to_string()
}

fn default_limit() -> usize {
    120
}

async fn klines(State(ctx): State<ApiContext>, Query(params): Query<KlineParams>) -> Response {
    let query = FrameQuery {
        symbol: params.symbol,
        interval: params.interval,
        limit: params.limit,
    };
    match ctx.app.market.klines(&query).await {
        Ok(klines) => ok(serde_json::to_value(klines).unwrap_or_default()),
        Err(MarketDataError::LiveFramesUnavailable) => {
            fail(StatusCode::SERVICE_UNAVAILABLE, MarketDataError::LiveFramesUnavailable)
        }
        Err(e) => fail(StatusCode::BAD_GATEWAY, e),
    }
}

#[derive(Deserialize)]
struct LimitParams {
    #[serde(default = "default_limit")]
    limit: usize,
}

async fn decisions(
    State(ctx): State<ApiContext>,
    Path(trader_id): Path<String>,
    Query(params): Query<LimitParams>,
) -> Response {
    match ctx.app.decision_log.latest(&trader_id, params.limit) {
        Ok(records) => ok(serde_json::to_value(records).unwrap_or_default()),
        Err(e) => fail(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn audit(
    State(ctx): State<ApiContext>,
    Path(trader_id): Path<String>,
    Query(params): Query<LimitParams>,
) -> Response {
    match ctx.app.audit_log.latest(&trader_id, params.limit) {
        Ok(records) => ok(serde_json::to_value(records).unwrap_or_default()),
        Err(e) => fail(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn chat_history(
    State(ctx): State<ApiContext>,
    Path(room_id): Path<String>,
    Query(params): Query<LimitParams>,
) -> Response {
    match ctx.app.chat.latest_public(&room_id, params.limit) {
        Ok(messages) => ok(serde_json::to_value(messages).unwrap_or_default()),
        Err(e) => fail(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

// -----------------------------------------------------------------------------
// Control endpoints
// -----------------------------------------------------------------------------

async fn pause(State(ctx): State<ApiContext>, _auth: ControlBearer) -> Response {
    ctx.scheduler.pause();
    if let Some(replay) = &ctx.app.replay {
        replay.pause();
    }
    ok(json!({"running": false}))
}

async fn resume(State(ctx): State<ApiContext>, _auth: ControlBearer) -> Response {
    match ctx.scheduler.resume() {
        Ok(()) => {
            if let Some(replay) = &ctx.app.replay {
                replay.resume();
            }
            ok(json!({"running": true}))
        }
        Err(e) => control_error(e),
    }
}

#[derive(Deserialize)]
struct StepBody {
    #[serde(default = "default_steps")]
    steps: u64,
}

fn default_steps() -> u64 {
    1
}

async fn step(
    State(ctx): State<ApiContext>,
    _auth: ControlBearer,
    Json(body): Json<StepBody>,
) -> Response {
    match ctx.scheduler.step(body.steps) {
        Ok(()) => ok(json!({"stepped": body.steps})),
        Err(e) => control_error(e),
    }
}

#[derive(Deserialize)]
struct KillSwitchBody {
    active: bool,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    operator: Option<String>,
}

async fn kill_switch_set(
    State(ctx): State<ApiContext>,
    _auth: ControlBearer,
    Json(body): Json<KillSwitchBody>,
) -> Response {
    let operator = body.operator.as_deref().unwrap_or("api");
    let state = if body.active {
        let state = ctx
            .app
            .kill_switch
            .activate(body.reason.as_deref().unwrap_or("manual"), operator);
        ctx.scheduler.on_kill_switch_activated();
        if let Some(replay) = &ctx.app.replay {
            replay.pause();
        }
        state
    } else {
        ctx.app.kill_switch.deactivate(operator)
    };
    ok(serde_json::to_value(state).unwrap_or_default())
}

async fn agent_register(
    State(ctx): State<ApiContext>,
    _auth: ControlBearer,
    Path(agent_id): Path<String>,
) -> Response {
    match ctx.app.registry.register(&agent_id) {
        Ok(()) => ok(json!({"agent_id": agent_id, "registered": true})),
        Err(e) => registry_error(e),
    }
}

async fn agent_unregister(
    State(ctx): State<ApiContext>,
    _auth: ControlBearer,
    Path(agent_id): Path<String>,
) -> Response {
    match ctx.app.registry.unregister(&agent_id) {
        Ok(()) => ok(json!({"agent_id": agent_id, "registered": false})),
        Err(e) => registry_error(e),
    }
}

async fn agent_start(
    State(ctx): State<ApiContext>,
    _auth: ControlBearer,
    Path(agent_id): Path<String>,
) -> Response {
    match ctx.app.registry.start(&agent_id) {
        Ok(()) => ok(json!({"agent_id": agent_id, "status": "running"})),
        Err(e) => registry_error(e),
    }
}

async fn agent_stop(
    State(ctx): State<ApiContext>,
    _auth: ControlBearer,
    Path(agent_id): Path<String>,
) -> Response {
    match ctx.app.registry.stop(&agent_id) {
        Ok(()) => ok(json!({"agent_id": agent_id, "status": "stopped"})),
        Err(e) => registry_error(e),
    }
}

#[derive(Deserialize)]
struct SpeedBody {
    speed: f64,
}

async fn replay_speed(
    State(ctx): State<ApiContext>,
    _auth: ControlBearer,
    Json(body): Json<SpeedBody>,
) -> Response {
    match &ctx.app.replay {
        Some(replay) => {
            replay.set_speed(body.speed);
            ok(serde_json::to_value(replay.status()).unwrap_or_default())
        }
        None => fail(StatusCode::NOT_FOUND, "replay engine not active"),
    }
}

#[derive(Deserialize)]
struct CursorBody {
    cursor: usize,
}

async fn replay_cursor(
    State(ctx): State<ApiContext>,
    _auth: ControlBearer,
    Json(body): Json<CursorBody>,
) -> Response {
    match &ctx.app.replay {
        Some(replay) => {
            replay.set_cursor(body.cursor);
            ok(serde_json::to_value(replay.status()).unwrap_or_default())
        }
        None => fail(StatusCode::NOT_FOUND, "replay engine not active"),
    }
}
