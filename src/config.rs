// =============================================================================
// Runtime Configuration — environment-driven engine settings
// =============================================================================
//
// Every recognized environment variable maps to one field here. Parsing is
// lenient: a missing or malformed value falls back to the field default and
// logs a warning, so a typo in deployment never prevents boot. The single
// hard boot check is the strict-live precondition, which fails fast with a
// non-zero exit.
// =============================================================================

use anyhow::{bail, Result};
use serde::Serialize;
use tracing::warn;

use crate::types::{DataMode, MarketProvider};

// =============================================================================
// Default-value constants
// =============================================================================

const DEFAULT_LIVE_FRAMES_PATH: &str = "data/live/onlytrade/frames.1m.json";
const DEFAULT_LIVE_FILE_REFRESH_MS: u64 = 5_000;
const DEFAULT_LIVE_FILE_STALE_MS: u64 = 180_000;
const DEFAULT_REPLAY_SPEED: f64 = 60.0;
const DEFAULT_REPLAY_WARMUP_BARS: usize = 30;
const DEFAULT_REPLAY_TICK_MS: u64 = 250;
const DEFAULT_CYCLE_MS: u64 = 60_000;
const DEFAULT_DECISION_EVERY_BARS: u64 = 5;
const DEFAULT_SESSION_GUARD_CHECK_MS: u64 = 30_000;
const DEFAULT_LLM_TIMEOUT_MS: u64 = 7_000;
const DEFAULT_LLM_MAX_OUTPUT_TOKENS: u32 = 512;
const DEFAULT_COMMISSION_RATE: f64 = 0.0003;
const DEFAULT_INITIAL_BALANCE: f64 = 1_000_000.0;

// =============================================================================
// Guardrail knobs
// =============================================================================

/// Tunable limits applied by the decision engine after the heuristic / LLM
/// step. All percentages are fractions (0.45 = 45 %).
#[derive(Debug, Clone, Serialize)]
pub struct GuardrailConfig {
    /// Requested notional per decision capped at `total_balance × pct`.
    /// 1.0 disables the throttle.
    pub turnover_throttle_pct: f64,
    /// Opening a position in a new symbol is refused at this holding count.
    pub max_position_count: usize,
    /// Per-symbol value capped at `total_balance × pct`. 1.0 disables the
    /// cap.
    pub max_symbol_concentration_pct: f64,
    /// Buys must leave at least `total_balance × pct` in cash. 0.0 disables
    /// the floor.
    pub min_cash_reserve_pct: f64,
    /// Quantity cap (in lots) while the opening-phase readiness softening
    /// is active.
    pub opening_phase_max_lots: u64,
    /// Confidence cap while the opening-phase softening is active.
    pub opening_phase_max_confidence: f64,
    /// Cycles spent flat before the flat-entry nudge may fire.
    pub flat_entry_min_cycles: u64,
    /// Flat-entry only fires at or below this RSI.
    pub flat_entry_max_rsi: f64,
    /// Lots bought by the flat-entry nudge.
    pub flat_entry_lots: u64,
    /// Cycles spent flat before the conservative probe may fire.
    pub conservative_probe_min_cycles: u64,
    /// Conservative probe only fires at or below this RSI.
    pub conservative_probe_max_rsi: f64,
    /// Conservative probe requires ret_5 or ret_20 at or below this value.
    pub conservative_probe_max_ret: f64,
    /// Lots bought by the conservative probe.
    pub conservative_probe_lots: u64,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            turnover_throttle_pct: 1.0,
            max_position_count: 4,
            max_symbol_concentration_pct: 1.0,
            min_cash_reserve_pct: 0.0,
            opening_phase_max_lots: 1,
            opening_phase_max_confidence: 0.60,
            flat_entry_min_cycles: 6,
            flat_entry_max_rsi: 60.0,
            flat_entry_lots: 1,
            conservative_probe_min_cycles: 10,
            conservative_probe_max_rsi: 52.0,
            conservative_probe_max_ret: -0.002,
            conservative_probe_lots: 1,
        }
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration, resolved once at boot from the process
/// environment.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeConfig {
    // --- Mode selection ------------------------------------------------------
    pub data_mode: DataMode,
    /// Refuse synthetic fallback for 1m frames; requires live_file + real.
    pub strict_live: bool,

    // --- Live-file provider --------------------------------------------------
    pub live_frames_path: String,
    pub live_file_refresh_ms: u64,
    pub live_file_stale_ms: u64,

    // --- Market upstream -----------------------------------------------------
    pub market_provider: MarketProvider,
    pub market_upstream_url: Option<String>,
    pub market_upstream_api_key: Option<String>,

    // --- Replay engine -------------------------------------------------------
    pub replay_speed: f64,
    pub replay_warmup_bars: usize,
    pub replay_tick_ms: u64,
    pub replay_loop: bool,

    // --- Scheduler cadence ---------------------------------------------------
    pub cycle_ms: u64,
    pub decision_every_bars: u64,

    // --- Session guard -------------------------------------------------------
    pub session_guard_enabled: bool,
    pub session_guard_auto_resume: bool,
    pub session_guard_check_ms: u64,
    pub session_guard_require_fresh_live_data: bool,

    // --- LLM -----------------------------------------------------------------
    pub llm_enabled: bool,
    pub llm_timeout_ms: u64,
    pub llm_token_saver: bool,
    pub llm_max_output_tokens: u32,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: String,
    /// "json_schema" (strict) or "json_object" for models that cannot bind
    /// a response schema.
    pub openai_response_format: String,

    // --- Accounting ----------------------------------------------------------
    pub commission_rate: f64,
    pub initial_balance: f64,

    // --- Ops -----------------------------------------------------------------
    pub reset_agent_memory_on_boot: bool,

    // --- Guardrails ----------------------------------------------------------
    pub guardrails: GuardrailConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            data_mode: DataMode::Replay,
            strict_live: false,
            live_frames_path: DEFAULT_LIVE_FRAMES_PATH.to_string(),
            live_file_refresh_ms: DEFAULT_LIVE_FILE_REFRESH_MS,
            live_file_stale_ms: DEFAULT_LIVE_FILE_STALE_MS,
            market_provider: MarketProvider::Mock,
            market_upstream_url: None,
            market_upstream_api_key: None,
            replay_speed: DEFAULT_REPLAY_SPEED,
            replay_warmup_bars: DEFAULT_REPLAY_WARMUP_BARS,
            replay_tick_ms: DEFAULT_REPLAY_TICK_MS,
            replay_loop: false,
            cycle_ms: DEFAULT_CYCLE_MS,
            decision_every_bars: DEFAULT_DECISION_EVERY_BARS,
            session_guard_enabled: true,
            session_guard_auto_resume: true,
            session_guard_check_ms: DEFAULT_SESSION_GUARD_CHECK_MS,
            session_guard_require_fresh_live_data: false,
            llm_enabled: false,
            llm_timeout_ms: DEFAULT_LLM_TIMEOUT_MS,
            llm_token_saver: false,
            llm_max_output_tokens: DEFAULT_LLM_MAX_OUTPUT_TOKENS,
            openai_api_key: None,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            openai_model: "gpt-4o-mini".to_string(),
            openai_response_format: "json_schema".to_string(),
            commission_rate: DEFAULT_COMMISSION_RATE,
            initial_balance: DEFAULT_INITIAL_BALANCE,
            reset_agent_memory_on_boot: false,
            guardrails: GuardrailConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Resolve configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Resolve configuration from an arbitrary variable lookup. Split out of
    /// [`from_env`] so tests can inject variables without touching the
    /// process environment.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(raw) = lookup("RUNTIME_DATA_MODE") {
            match raw.trim().to_ascii_lowercase().as_str() {
                "replay" => cfg.data_mode = DataMode::Replay,
                "live_file" => cfg.data_mode = DataMode::LiveFile,
                other => warn!(value = %other, "unrecognized RUNTIME_DATA_MODE, keeping replay"),
            }
        }
        cfg.strict_live = parse_bool(&lookup, "STRICT_LIVE_MODE", cfg.strict_live);

        if let Some(path) = lookup("LIVE_FRAMES_PATH") {
            if !path.trim().is_empty() {
                cfg.live_frames_path = path.trim().to_string();
            }
        }
        cfg.live_file_refresh_ms =
            parse_num(&lookup, "LIVE_FILE_REFRESH_MS", cfg.live_file_refresh_ms);
        cfg.live_file_stale_ms = parse_num(&lookup, "LIVE_FILE_STALE_MS", cfg.live_file_stale_ms);

        if let Some(raw) = lookup("MARKET_PROVIDER") {
            match raw.trim().to_ascii_lowercase().as_str() {
                "mock" => cfg.market_provider = MarketProvider::Mock,
                "real" => cfg.market_provider = MarketProvider::Real,
                other => warn!(value = %other, "unrecognized MARKET_PROVIDER, keeping mock"),
            }
        }
        cfg.market_upstream_url = lookup("MARKET_UPSTREAM_URL").filter(|s| !s.trim().is_empty());
        cfg.market_upstream_api_key =
            lookup("MARKET_UPSTREAM_API_KEY").filter(|s| !s.trim().is_empty());

        cfg.replay_speed = parse_num(&lookup, "REPLAY_SPEED", cfg.replay_speed);
        cfg.replay_warmup_bars = parse_num(&lookup, "REPLAY_WARMUP_BARS", cfg.replay_warmup_bars);
        cfg.replay_tick_ms = parse_num(&lookup, "REPLAY_TICK_MS", cfg.replay_tick_ms);
        cfg.replay_loop = parse_bool(&lookup, "REPLAY_LOOP", cfg.replay_loop);

        cfg.cycle_ms = parse_num(&lookup, "AGENT_RUNTIME_CYCLE_MS", cfg.cycle_ms);
        cfg.decision_every_bars =
            parse_num(&lookup, "AGENT_DECISION_EVERY_BARS", cfg.decision_every_bars).max(1);

        cfg.session_guard_enabled = parse_bool(
            &lookup,
            "AGENT_SESSION_GUARD_ENABLED",
            cfg.session_guard_enabled,
        );
        cfg.session_guard_auto_resume = parse_bool(
            &lookup,
            "AGENT_SESSION_GUARD_AUTO_RESUME",
            cfg.session_guard_auto_resume,
        );
        cfg.session_guard_check_ms = parse_num(
            &lookup,
            "AGENT_SESSION_GUARD_CHECK_MS",
            cfg.session_guard_check_ms,
        );
        cfg.session_guard_require_fresh_live_data = parse_bool(
            &lookup,
            "AGENT_SESSION_GUARD_REQUIRE_FRESH_LIVE_DATA",
            cfg.session_guard_require_fresh_live_data,
        );

        cfg.llm_enabled = parse_bool(&lookup, "AGENT_LLM_ENABLED", cfg.llm_enabled);
        cfg.llm_timeout_ms = parse_num(&lookup, "AGENT_LLM_TIMEOUT_MS", cfg.llm_timeout_ms);
        cfg.llm_token_saver =
            parse_bool(&lookup, "AGENT_LLM_DEV_TOKEN_SAVER", cfg.llm_token_saver);
        cfg.llm_max_output_tokens = parse_num(
            &lookup,
            "AGENT_LLM_MAX_OUTPUT_TOKENS",
            cfg.llm_max_output_tokens,
        );
        cfg.openai_api_key = lookup("OPENAI_API_KEY").filter(|s| !s.trim().is_empty());
        if let Some(url) = lookup("OPENAI_BASE_URL").filter(|s| !s.trim().is_empty()) {
            cfg.openai_base_url = url.trim().trim_end_matches('/').to_string();
        }
        if let Some(model) = lookup("OPENAI_MODEL").filter(|s| !s.trim().is_empty()) {
            cfg.openai_model = model.trim().to_string();
        }
        if let Some(fmt) = lookup("OPENAI_RESPONSE_FORMAT") {
            match fmt.trim().to_ascii_lowercase().as_str() {
                "json_schema" | "json_object" => {
                    cfg.openai_response_format = fmt.trim().to_ascii_lowercase()
                }
                other => warn!(value = %other, "unrecognized OPENAI_RESPONSE_FORMAT, keeping json_schema"),
            }
        }

        cfg.commission_rate = parse_num(&lookup, "AGENT_COMMISSION_RATE", cfg.commission_rate);
        cfg.initial_balance = parse_num(&lookup, "AGENT_INITIAL_BALANCE", cfg.initial_balance);
        cfg.reset_agent_memory_on_boot = parse_bool(
            &lookup,
            "RESET_AGENT_MEMORY_ON_BOOT",
            cfg.reset_agent_memory_on_boot,
        );

        let g = &mut cfg.guardrails;
        g.turnover_throttle_pct =
            parse_num(&lookup, "AGENT_TURNOVER_THROTTLE_PCT", g.turnover_throttle_pct);
        g.max_position_count =
            parse_num(&lookup, "AGENT_MAX_POSITION_COUNT", g.max_position_count);
        g.max_symbol_concentration_pct = parse_num(
            &lookup,
            "AGENT_MAX_SYMBOL_CONCENTRATION_PCT",
            g.max_symbol_concentration_pct,
        );
        g.min_cash_reserve_pct =
            parse_num(&lookup, "AGENT_MIN_CASH_RESERVE_PCT", g.min_cash_reserve_pct);
        g.flat_entry_min_cycles =
            parse_num(&lookup, "AGENT_FLAT_ENTRY_MIN_CYCLES", g.flat_entry_min_cycles);
        g.flat_entry_max_rsi = parse_num(&lookup, "AGENT_FLAT_ENTRY_MAX_RSI", g.flat_entry_max_rsi);
        g.flat_entry_lots = parse_num(&lookup, "AGENT_FLAT_ENTRY_LOTS", g.flat_entry_lots);
        g.conservative_probe_min_cycles = parse_num(
            &lookup,
            "AGENT_CONSERVATIVE_PROBE_MIN_CYCLES",
            g.conservative_probe_min_cycles,
        );
        g.conservative_probe_max_rsi = parse_num(
            &lookup,
            "AGENT_CONSERVATIVE_PROBE_MAX_RSI",
            g.conservative_probe_max_rsi,
        );
        g.conservative_probe_max_ret = parse_num(
            &lookup,
            "AGENT_CONSERVATIVE_PROBE_MAX_RET",
            g.conservative_probe_max_ret,
        );
        g.conservative_probe_lots = parse_num(
            &lookup,
            "AGENT_CONSERVATIVE_PROBE_LOTS",
            g.conservative_probe_lots,
        );

        // The one precondition that must stop boot: strict live mode over
        // anything but the real live-file feed would silently trade on
        // synthetic data.
        if cfg.strict_live {
            if cfg.data_mode != DataMode::LiveFile {
                bail!("strict_live_mode_requires_runtime_data_mode_live_file");
            }
            if cfg.market_provider != MarketProvider::Real {
                bail!("strict_live_mode_requires_market_provider_real");
            }
        }

        Ok(cfg)
    }
}

// =============================================================================
// Parsing helpers
// =============================================================================

fn parse_bool(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    match lookup(key) {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            other => {
                warn!(key, value = %other, "unrecognized boolean, keeping default");
                default
            }
        },
        None => default,
    }
}

fn parse_num<T: std::str::FromStr + Copy>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    match lookup(key) {
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                warn!(key, value = %raw, "unparseable numeric value, keeping default");
                default
            }
        },
        None => default,
    }
}

// =============================================================================
// Tests
// =============================================================================
