// =============================================================================
// Agent registry — manifest discovery and agent.registry.v1 lifecycle ops
// =============================================================================
//
// Two sources of truth:
//   * `agents/<agent_id>/agent.json` — human-created manifests. A folder is
//     available when its name matches the manifest's agent_id and the
//     manifest validates.
//   * `data/agents/registry.json` — runtime lifecycle state, mutated only
//     through register / unregister / start / stop, persisted atomically.
//
// Invariants: registered ⊆ available (after reconcile); the runtime-loop
// set is the registered traders with status running, ordered by
// registration time.
// =============================================================================

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::store::fsio::{atomic_write_json, read_json};
use crate::types::{AgentStatus, RiskProfile, TradingStyle};

pub const REGISTRY_SCHEMA_VERSION: &str = "agent.registry.v1";

// -----------------------------------------------------------------------------
// Manifest
// -----------------------------------------------------------------------------

/// `agents/<agent_id>/agent.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentManifest {
    pub agent_id: String,
    pub agent_name: String,
    pub ai_model: String,
    pub exchange_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trading_style: Option<TradingStyle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_profile: Option<RiskProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style_prompt_cn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<serde_json::Value>,
    #[serde(default)]
    pub stock_pool: Vec<String>,
}

/// `^[a-z][a-z0-9_]{1,63}$` without pulling in a regex engine.
pub fn is_valid_agent_id(id: &str) -> bool {
    let bytes = id.as_bytes();
    if !(2..=64).contains(&bytes.len()) {
        return false;
    }
    if !bytes[0].is_ascii_lowercase() {
        return false;
    }
    bytes[1..]
        .iter()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'_')
}

// -----------------------------------------------------------------------------
// Registry file
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub registered_at: String,
    #[serde(default)]
    pub status: AgentStatus,
    #[serde(default = "default_show_in_lobby")]
    pub show_in_lobby: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_stopped_at: Option<String>,
}

fn default_show_in_lobby() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegistryFile {
    schema_version: String,
    #[serde(default)]
    agents: BTreeMap<String, RegistryEntry>,
}

impl Default for RegistryFile {
    fn default() -> Self {
        Self {
            schema_version: REGISTRY_SCHEMA_VERSION.to_string(),
            agents: BTreeMap::new(),
        }
    }
}

// -----------------------------------------------------------------------------
// Errors
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    InvalidAgentId,
    AgentManifestNotFound,
    AgentNotRegistered,
    AgentAlreadyRegistered,
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidAgentId => write!(f, "invalid_agent_id"),
            Self::AgentManifestNotFound => write!(f, "agent_manifest_not_found"),
            Self::AgentNotRegistered => write!(f, "agent_not_registered"),
            Self::AgentAlreadyRegistered => write!(f, "agent_already_registered"),
        }
    }
}

impl std::error::Error for RegistryError {}

// -----------------------------------------------------------------------------
// Registry
// -----------------------------------------------------------------------------

pub struct AgentRegistry {
    agents_dir: PathBuf,
    registry_path: PathBuf,
    state: RwLock<RegistryFile>,
}

impl AgentRegistry {
    /// Open (or initialize) the registry. A missing or unreadable registry
    /// file starts empty rather than failing boot.
    pub fn open(agents_dir: impl Into<PathBuf>, registry_path: impl Into<PathBuf>) -> Self {
        let agents_dir = agents_dir.into();
        let registry_path = registry_path.into();
        let file = match read_json::<RegistryFile>(&registry_path) {
            Ok(Some(f)) if f.schema_version == REGISTRY_SCHEMA_VERSION => f,
            Ok(Some(f)) => {
                warn!(
                    found = %f.schema_version,
                    "registry schema mismatch, starting empty"
                );
                RegistryFile::default()
            }
            Ok(None) => RegistryFile::default(),
            Err(e) => {
                warn!(error = %e, "registry unreadable, starting empty");
                RegistryFile::default()
            }
        };
        info!(
            registered = file.agents.len(),
            path = %registry_path.display(),
            "agent registry opened"
        );
        Self {
            agents_dir,
            registry_path,
            state: RwLock::new(file),
        }
    }

    // -------------------------------------------------------------------------
    // Discovery (read path)
    // -------------------------------------------------------------------------

    /// Load and validate the manifest for one agent id.
    pub fn manifest(&self, agent_id: &str) -> Result<AgentManifest, RegistryError> {
        if !is_valid_agent_id(agent_id) {
            return Err(RegistryError::InvalidAgentId);
        }
        let path = self.agents_dir.join(agent_id).join("agent.json");
        let manifest: AgentManifest = match read_json(&path) {
            Ok(Some(m)) => m,
            _ => return Err(RegistryError::AgentManifestNotFound),
        };
        // Folder invariant: directory name equals the manifest agent_id.
        if manifest.agent_id != agent_id {
            return Err(RegistryError::AgentManifestNotFound);
        }
        Ok(manifest)
    }

    /// Every agent with a valid manifest on disk, sorted by id.
    pub fn available(&self) -> Vec<AgentManifest> {
        let mut manifests = Vec::new();
        let Ok(entries) = std::fs::read_dir(&self.agents_dir) else {
            return manifests;
        };
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().to_string();
            match self.manifest(&id) {
                Ok(m) => manifests.push(m),
                Err(e) => {
                    warn!(agent_id = %id, error = %e, "skipping agent folder");
                }
            }
        }
        manifests.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        manifests
    }

    // -------------------------------------------------------------------------
    // Lifecycle (write path)
    // -------------------------------------------------------------------------

    pub fn register(&self, agent_id: &str) -> Result<(), RegistryError> {
        self.manifest(agent_id)?;
        {
            let mut state = self.state.write();
            if state.agents.contains_key(agent_id) {
                return Err(RegistryError::AgentAlreadyRegistered);
            }
            state.agents.insert(
                agent_id.to_string(),
                RegistryEntry {
                    registered_at: Utc::now().to_rfc3339(),
                    status: AgentStatus::Stopped,
                    show_in_lobby: true,
                    last_started_at: None,
                    last_stopped_at: None,
                },
            );
        }
        self.persist();
        info!(agent_id, "agent registered");
        Ok(())
    }

    pub fn unregister(&self, agent_id: &str) -> Result<(), RegistryError> {
        {
            let mut state = self.state.write();
            if state.agents.remove(agent_id).is_none() {
                return Err(RegistryError::AgentNotRegistered);
            }
        }
        self.persist();
        info!(agent_id, "agent unregistered");
        Ok(())
    }

    pub fn start(&self, agent_id: &str) -> Result<(), RegistryError> {
        self.set_status(agent_id, AgentStatus::Running)
    }

    pub fn stop(&self, agent_id: &str) -> Result<(), RegistryError> {
        self.set_status(agent_id, AgentStatus::Stopped)
    }

    fn set_status(&self, agent_id: &str, status: AgentStatus) -> Result<(), RegistryError> {
        {
            let mut state = self.state.write();
            let entry = state
                .agents
                .get_mut(agent_id)
                .ok_or(RegistryError::AgentNotRegistered)?;
            entry.status = status;
            let now = Utc::now().to_rfc3339();
            match status {
                AgentStatus::Running => entry.last_started_at = Some(now),
                AgentStatus::Stopped => entry.last_stopped_at = Some(now),
            }
        }
        self.persist();
        info!(agent_id, status = %status, "agent status changed");
        Ok(())
    }

    /// Drop registry entries whose manifest disappeared. Returns the removed
    /// ids.
    pub fn reconcile(&self) -> Vec<String> {
        let removed: Vec<String> = {
            let mut state = self.state.write();
            let gone: Vec<String> = state
                .agents
                .keys()
                .filter(|id| self.manifest(id).is_err())
                .cloned()
                .collect();
            for id in &gone {
                state.agents.remove(id);
            }
            gone
        };
        if !removed.is_empty() {
            warn!(removed = ?removed, "reconcile removed orphan registry entries");
            self.persist();
        }
        removed
    }

    // -------------------------------------------------------------------------
    // Views
    // -------------------------------------------------------------------------

    pub fn entry(&self, agent_id: &str) -> Option<RegistryEntry> {
        self.state.read().agents.get(agent_id).cloned()
    }

    pub fn registered(&self) -> Vec<String> {
        self.ordered_ids(|_| true)
    }

    /// The runtime-loop set: registered with status running, in
    /// registration order.
    pub fn running_traders(&self) -> Vec<String> {
        self.ordered_ids(|e| e.status == AgentStatus::Running)
    }

    /// Lobby view: registered with show_in_lobby.
    pub fn lobby(&self) -> Vec<String> {
        self.ordered_ids(|e| e.show_in_lobby)
    }

    fn ordered_ids(&self, keep: impl Fn(&RegistryEntry) -> bool) -> Vec<String> {
        let state = self.state.read();
        let mut ids: Vec<(&String, &RegistryEntry)> =
            state.agents.iter().filter(|(_, e)| keep(e)).collect();
        ids.sort_by(|a, b| {
            a.1.registered_at
                .cmp(&b.1.registered_at)
                .then_with(|| a.0.cmp(b.0))
        });
        ids.into_iter().map(|(id, _)| id.clone()).collect()
    }

    fn persist(&self) {
        let state = self.state.read();
        if let Err(e) = atomic_write_json(&self.registry_path, &*state) {
            warn!(path = %self.registry_path.display(), error = %e, "registry write failed");
        }
    }

    pub fn registry_path(&self) -> &Path {
        &self.registry_path
    }
}

// =============================================================================
// Tests
// =============================================================================
