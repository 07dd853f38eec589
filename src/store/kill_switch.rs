// =============================================================================
// Kill-switch — persisted global halt flag
// =============================================================================
//
// `data/runtime/kill-switch.json`, replaced atomically on every transition.
// The scheduler consults the in-memory copy on its hot path; the file exists
// so a restart comes back up paused when the switch was left active.
// =============================================================================

use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::store::fsio::{atomic_write_json, read_json};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KillSwitchState {
    #[serde(default)]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activated_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deactivated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deactivated_by: Option<String>,
}

pub struct KillSwitch {
    path: PathBuf,
    state: RwLock<KillSwitchState>,
}

impl KillSwitch {
    /// Load the persisted flag; a missing or unreadable file means inactive.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match read_json::<KillSwitchState>(&path) {
            Ok(Some(s)) => s,
            Ok(None) => KillSwitchState::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "kill-switch file unreadable, assuming inactive");
                KillSwitchState::default()
            }
        };
        if state.active {
            warn!(reason = ?state.reason, "kill-switch is ACTIVE from a previous run");
        }
        Self {
            path,
            state: RwLock::new(state),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.read().active
    }

    pub fn state(&self) -> KillSwitchState {
        self.state.read().clone()
    }

    pub fn activate(&self, reason: &str, by: &str) -> KillSwitchState {
        let snapshot = {
            let mut state = self.state.write();
            state.active = true;
            state.reason = Some(reason.to_string());
            state.activated_at = Some(Utc::now().to_rfc3339());
            state.activated_by = Some(by.to_string());
            state.clone()
        };
        self.persist(&snapshot);
        info!(reason, by, "kill-switch activated");
        snapshot
    }

    pub fn deactivate(&self, by: &str) -> KillSwitchState {
        let snapshot = {
            let mut state = self.state.write();
            state.active = false;
            state.deactivated_at = Some(Utc::now().to_rfc3339());
            state.deactivated_by = Some(by.to_string());
            state.clone()
        };
        self.persist(&snapshot);
        info!(by, "kill-switch deactivated");
        snapshot
    }

    fn persist(&self, state: &KillSwitchState) {
        if let Err(e) = atomic_write_json(&self.path, state) {
            warn!(path = %self.path.display(), error = %e, "kill-switch write failed");
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_inactive_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let ks = KillSwitch::open(dir.path().join("kill-switch.json"));
        assert!(!ks.is_active());
    }

    #[test]
    fn activate_persists_and_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runtime/kill-switch.json");
        {
            let ks = KillSwitch::open(&path);
            let state = ks.activate("manual halt", "operator");
            assert!(state.active);
            assert_eq!(state.reason.as_deref(), Some("manual halt"));
            assert!(state.activated_at.is_some());
        }
        let ks = KillSwitch::open(&path);
        assert!(ks.is_active());

        let state = ks.deactivate("operator");
        assert!(!state.active);
        assert!(state.deactivated_at.is_some());
        // Activation history is retained after deactivation.
        assert_eq!(state.activated_by.as_deref(), Some("operator"));

        let ks2 = KillSwitch::open(&path);
        assert!(!ks2.is_active());
    }
}
