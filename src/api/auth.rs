// =============================================================================
// Bearer Token Authentication — Axum Extractor
// =============================================================================
//
// Control endpoints (pause/resume/step, kill-switch, agent lifecycle) demand
// `Authorization: Bearer <CONTROL_API_TOKEN>`. Comparison is constant time
// so token probing cannot use response latency as an oracle. Read-only
// status endpoints skip the extractor entirely.
// =============================================================================

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::warn;

// =============================================================================
// Constant-time comparison
// =============================================================================

/// Compare two byte slices in constant time. Every byte of equal-length
/// inputs is examined even after a mismatch is found.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        // A length mismatch is observable anyway; the attacker does not
        // control the expected token length.
        return false;
    }
    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

// =============================================================================
// Extractor
// =============================================================================

/// Validates `Authorization: Bearer <token>` against `CONTROL_API_TOKEN`.
/// Yields the raw token for downstream audit logging.
pub struct ControlBearer(pub String);

pub struct AuthRejection {
    status: StatusCode,
    message: &'static str,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "success": false,
            "error": self.message,
        });
        (self.status, axum::Json(body)).into_response()
    }
}

impl<S> FromRequestParts<S> for ControlBearer
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Read on every request so rotation does not require a restart.
        let expected = std::env::var("CONTROL_API_TOKEN").unwrap_or_default();

        if expected.is_empty() {
            warn!("CONTROL_API_TOKEN is not set — control endpoints are locked out");
            return Err(AuthRejection {
                status: StatusCode::FORBIDDEN,
                message: "control authentication not configured",
            });
        }

        let auth_header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());

        let token = match auth_header {
            Some(value) if value.starts_with("Bearer ") => &value[7..],
            _ => {
                warn!("missing or malformed Authorization header");
                return Err(AuthRejection {
                    status: StatusCode::FORBIDDEN,
                    message: "missing or invalid authorization token",
                });
            }
        };

        if !constant_time_eq(token.as_bytes(), expected.as_bytes()) {
            warn!("invalid control token presented");
            return Err(AuthRejection {
                status: StatusCode::FORBIDDEN,
                message: "invalid authorization token",
            });
        }

        Ok(ControlBearer(token.to_string()))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_identical() {
        assert!(constant_time_eq(b"secret-token", b"secret-token"));
    }

    #[test]
    fn constant_time_eq_different() {
        assert!(!constant_time_eq(b"secret-token", b"other-token!"));
    }

    #[test]
    fn constant_time_eq_different_lengths() {
        assert!(!constant_time_eq(b"short", b"a-longer-token"));
    }

    #[test]
    fn constant_time_eq_empty() {
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn constant_time_eq_single_bit_diff() {
        assert!(!constant_time_eq(b"\x00", b"\x01"));
    }
}
