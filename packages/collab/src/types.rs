// ABOUTME: Shared types for collaboration sessions, roles, and presence events
// ABOUTME: Sessions are the persisted record shape as well as the in-memory state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Role a participant holds inside a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Editor,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Editor => "editor",
            Role::Viewer => "viewer",
        }
    }
}

/// Action a role may be permitted to perform on the shared environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Read,
    Write,
    Admin,
    Terminal,
    Share,
}

/// Cursor location inside a document, broadcast to other participants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub path: String,
    pub line: u32,
    pub column: u32,
}

/// A user attached to a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: String,
    pub role: Role,
    /// Permission set derived from the session policy at join time
    pub permissions: Vec<Action>,
    pub joined_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub cursor: Option<CursorPosition>,
}

/// Per-session configuration supplied at creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub max_users: usize,
    /// Capability map from role to permitted actions
    pub policy: HashMap<Role, Vec<Action>>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_users: 8,
            policy: default_policy(),
        }
    }
}

/// Default capability policy: owners administer, editors build and run,
/// viewers watch.
pub fn default_policy() -> HashMap<Role, Vec<Action>> {
    HashMap::from([
        (
            Role::Owner,
            vec![
                Action::Read,
                Action::Write,
                Action::Admin,
                Action::Terminal,
                Action::Share,
            ],
        ),
        (
            Role::Editor,
            vec![Action::Read, Action::Write, Action::Terminal],
        ),
        (Role::Viewer, vec![Action::Read]),
    ])
}

/// A collaboration session tying participants to one shared environment.
///
/// The environment is referenced, never owned: the session stays valid while
/// the backing environment is restarted and gets a new id written back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub project_id: String,
    pub environment_id: String,
    pub max_users: usize,
    pub policy: HashMap<Role, Vec<Action>>,
    /// Ordered by join time
    pub participants: Vec<Participant>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn participant(&self, user_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }

    pub fn user_count(&self) -> usize {
        self.participants.len()
    }
}

/// What happened to a participant, pushed to presence subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceKind {
    Joined,
    Left,
    CursorMoved,
}

/// Presence notification broadcast to everyone watching a session
#[derive(Debug, Clone, Serialize)]
pub struct PresenceEvent {
    pub session_id: String,
    pub user_id: String,
    pub kind: PresenceKind,
    pub cursor: Option<CursorPosition>,
    pub at: DateTime<Utc>,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session {session_id} is full ({max_users} participants)")]
    SessionFull { session_id: String, max_users: usize },

    #[error("User {user_id} is not a participant of session {session_id}")]
    NotParticipant { session_id: String, user_id: String },

    #[error("Storage error: {0}")]
    Storage(#[from] codedock_storage::StorageError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
