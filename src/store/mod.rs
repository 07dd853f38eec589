// =============================================================================
// Durable state — atomic snapshots and append-only JSONL stores
// =============================================================================

pub mod chat;
pub mod fsio;
pub mod kill_switch;
pub mod logs;
pub mod memory;
pub mod registry;
