// =============================================================================
// Shared types used across the onlytrade runtime
// =============================================================================

use serde::{Deserialize, Serialize};

/// Where market frames come from at runtime: a pre-materialized replay
/// archive, or a live snapshot file maintained by the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataMode {
    Replay,
    LiveFile,
}

impl Default for DataMode {
    fn default() -> Self {
        Self::Replay
    }
}

impl std::fmt::Display for DataMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Replay => write!(f, "replay"),
            Self::LiveFile => write!(f, "live_file"),
        }
    }
}

/// Which upstream market provider the service proxies when a 1m feed and the
/// daily archive cannot answer a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketProvider {
    Mock,
    Real,
}

impl Default for MarketProvider {
    fn default() -> Self {
        Self::Mock
    }
}

impl std::fmt::Display for MarketProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mock => write!(f, "mock"),
            Self::Real => write!(f, "real"),
        }
    }
}

/// Trading personality assigned to an agent via its manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingStyle {
    MomentumTrend,
    MeanReversion,
    EventDriven,
    MacroSwing,
}

impl Default for TradingStyle {
    fn default() -> Self {
        Self::MomentumTrend
    }
}

impl std::fmt::Display for TradingStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MomentumTrend => write!(f, "momentum_trend"),
            Self::MeanReversion => write!(f, "mean_reversion"),
            Self::EventDriven => write!(f, "event_driven"),
            Self::MacroSwing => write!(f, "macro_swing"),
        }
    }
}

/// Risk appetite assigned to an agent via its manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskProfile {
    Conservative,
    Balanced,
    Aggressive,
}

impl Default for RiskProfile {
    fn default() -> Self {
        Self::Balanced
    }
}

impl std::fmt::Display for RiskProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Conservative => write!(f, "conservative"),
            Self::Balanced => write!(f, "balanced"),
            Self::Aggressive => write!(f, "aggressive"),
        }
    }
}

/// The single executed action of a decision cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Buy,
    Sell,
    Hold,
}

impl Default for ActionKind {
    fn default() -> Self {
        Self::Hold
    }
}

impl ActionKind {
    /// Lenient parse used when normalizing model output. Unknown strings
    /// default to `Hold`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" => Self::Buy,
            "sell" => Self::Sell,
            _ => Self::Hold,
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
            Self::Hold => write!(f, "hold"),
        }
    }
}

/// Which path produced the final decision of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionSource {
    #[serde(rename = "llm.openai")]
    LlmOpenai,
    #[serde(rename = "rule.heuristic")]
    RuleHeuristic,
    #[serde(rename = "readiness_gate")]
    ReadinessGate,
}

impl std::fmt::Display for DecisionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LlmOpenai => write!(f, "llm.openai"),
            Self::RuleHeuristic => write!(f, "rule.heuristic"),
            Self::ReadinessGate => write!(f, "readiness_gate"),
        }
    }
}

/// Registry lifecycle state of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Running,
    Stopped,
}

impl Default for AgentStatus {
    fn default() -> Self {
        Self::Stopped
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
