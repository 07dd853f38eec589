// =============================================================================
// Chat store — room-scoped append-only JSONL
// =============================================================================
//
// Layout:
//   data/chat/rooms/<room_id>/public.jsonl
//   data/chat/rooms/<room_id>/dm/<user_session_id>.jsonl
//
// Same idiom as the decision logs: newline-atomic appends, ring-buffered
// tail reads that skip malformed lines.
// =============================================================================

use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::fsio::{append_jsonl, tail_jsonl};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub sender_name: String,
    /// "agent" | "user" | "system"
    pub role: String,
    pub content: String,
    pub created_at: String,
}

impl ChatMessage {
    pub fn new(
        room_id: impl Into<String>,
        sender_id: impl Into<String>,
        sender_name: impl Into<String>,
        role: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            room_id: room_id.into(),
            sender_id: sender_id.into(),
            sender_name: sender_name.into(),
            role: role.into(),
            content: content.into(),
            created_at: Utc::now().to_rfc3339(),
        }
    }
}

pub struct ChatStore {
    root: PathBuf,
}

impl ChatStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn public_path(&self, room_id: &str) -> PathBuf {
        self.root.join(room_id).join("public.jsonl")
    }

    fn dm_path(&self, room_id: &str, user_session_id: &str) -> PathBuf {
        self.root
            .join(room_id)
            .join("dm")
            .join(format!("{user_session_id}.jsonl"))
    }

    pub fn append_public(&self, message: &ChatMessage) -> Result<()> {
        append_jsonl(self.public_path(&message.room_id), message)
    }

    pub fn append_dm(&self, user_session_id: &str, message: &ChatMessage) -> Result<()> {
        append_jsonl(self.dm_path(&message.room_id, user_session_id), message)
    }

    /// Latest `n` public messages, newest first.
    pub fn latest_public(&self, room_id: &str, n: usize) -> Result<Vec<ChatMessage>> {
        tail_jsonl(self.public_path(room_id), n)
    }

    /// Latest `n` direct messages for one user session, newest first.
    pub fn latest_dm(
        &self,
        room_id: &str,
        user_session_id: &str,
        n: usize,
    ) -> Result<Vec<ChatMessage>> {
        tail_jsonl(self.dm_path(room_id, user_session_id), n)
    }
}

// =============================================================================
// Tests
// =============================================================================
