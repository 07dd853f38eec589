// =============================================================================
// HTTP surface — thin wrappers over the core (the core stays HTTP-agnostic)
// =============================================================================

pub mod auth;
pub mod rest;
