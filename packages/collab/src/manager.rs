// ABOUTME: Session manager coordinating multiple users on one shared environment
// ABOUTME: Handles join/leave, cursor presence, permission lookups, and idle cleanup

use crate::types::{
    default_policy, Action, CursorPosition, Participant, PresenceEvent, PresenceKind, Result,
    Role, Session, SessionConfig, SessionError,
};
use chrono::Utc;
use codedock_storage::{RecordStore, SESSIONS};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::time;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Manager-level configuration (per-session limits live in [`SessionConfig`])
#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    /// Participants inactive longer than this are dropped by the sweep
    pub participant_idle_timeout: Duration,
    /// How often the cleanup sweep runs
    pub sweep_interval: Duration,
    /// Capacity of the presence broadcast channel
    pub presence_capacity: usize,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            participant_idle_timeout: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(60),
            presence_capacity: 256,
        }
    }
}

/// Outcome of one cleanup sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub participants_removed: usize,
    pub sessions_deleted: usize,
}

type SessionMap = Arc<RwLock<HashMap<String, Arc<Mutex<Session>>>>>;

/// Coordinates concurrent access to collaboration sessions.
///
/// The map of sessions sits behind a read-write lock; every session entry has
/// its own mutex so join/leave/cursor traffic on one session never blocks
/// another. Session records are persisted on every mutation so a restarted
/// process can recover them.
pub struct SessionManager {
    store: Arc<dyn RecordStore>,
    sessions: SessionMap,
    presence: broadcast::Sender<PresenceEvent>,
    config: SessionManagerConfig,
    sweeping: Arc<RwLock<bool>>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn RecordStore>, config: SessionManagerConfig) -> Self {
        let (presence, _) = broadcast::channel(config.presence_capacity);
        Self {
            store,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            presence,
            config,
            sweeping: Arc::new(RwLock::new(false)),
        }
    }

    /// Create a manager and reload persisted sessions from the store, so
    /// collaborators can reattach after a process restart.
    pub async fn with_recovery(
        store: Arc<dyn RecordStore>,
        config: SessionManagerConfig,
    ) -> Result<Self> {
        let manager = Self::new(store, config);

        let records = manager.store.list(SESSIONS).await?;
        let mut sessions = manager.sessions.write().await;
        for record in records {
            match serde_json::from_value::<Session>(record) {
                Ok(session) => {
                    sessions.insert(session.id.clone(), Arc::new(Mutex::new(session)));
                }
                Err(e) => warn!("Skipping unreadable session record: {}", e),
            }
        }
        let recovered = sessions.len();
        drop(sessions);

        if recovered > 0 {
            info!("Recovered {} collaboration sessions", recovered);
        }
        Ok(manager)
    }

    /// Subscribe to presence notifications for all sessions.
    pub fn subscribe_presence(&self) -> broadcast::Receiver<PresenceEvent> {
        self.presence.subscribe()
    }

    /// Allocate a new session bound to a project's running environment.
    pub async fn create_session(
        &self,
        project_id: &str,
        environment_id: &str,
        config: SessionConfig,
    ) -> Result<Session> {
        let mut policy = config.policy;
        if policy.is_empty() {
            policy = default_policy();
        }

        let session = Session {
            id: format!("ses_{}", Uuid::new_v4().simple()),
            project_id: project_id.to_string(),
            environment_id: environment_id.to_string(),
            max_users: config.max_users,
            policy,
            participants: Vec::new(),
            created_at: Utc::now(),
        };

        self.store
            .upsert(SESSIONS, &session.id, serde_json::to_value(&session)?)
            .await?;

        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id.clone(), Arc::new(Mutex::new(session.clone())));
        drop(sessions);

        info!(
            "Created session {} for project {} on environment {}",
            session.id, project_id, environment_id
        );
        Ok(session)
    }

    async fn entry(&self, session_id: &str) -> Result<Arc<Mutex<Session>>> {
        let sessions = self.sessions.read().await;
        sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))
    }

    /// Attach a user to a session. Re-joining refreshes the existing entry
    /// instead of consuming another slot, which gives dropped connections a
    /// graceful path back in.
    pub async fn join(&self, session_id: &str, user_id: &str, role: Role) -> Result<Participant> {
        let entry = self.entry(session_id).await?;
        let mut session = entry.lock().await;

        if let Some(existing) = session
            .participants
            .iter_mut()
            .find(|p| p.user_id == user_id)
        {
            existing.last_activity_at = Utc::now();
            let participant = existing.clone();
            self.persist(&session).await?;
            return Ok(participant);
        }

        if session.participants.len() >= session.max_users {
            return Err(SessionError::SessionFull {
                session_id: session_id.to_string(),
                max_users: session.max_users,
            });
        }

        let now = Utc::now();
        let participant = Participant {
            user_id: user_id.to_string(),
            role,
            permissions: session.policy.get(&role).cloned().unwrap_or_default(),
            joined_at: now,
            last_activity_at: now,
            cursor: None,
        };
        session.participants.push(participant.clone());
        self.persist(&session).await?;
        drop(session);

        debug!("User {} joined session {} as {}", user_id, session_id, role.as_str());
        self.broadcast(session_id, user_id, PresenceKind::Joined, None);
        Ok(participant)
    }

    /// Detach a user. An emptied session is left in place for the cleanup
    /// sweep rather than deleted inline, so a reconnect shortly after the
    /// last leave still finds it.
    pub async fn leave(&self, session_id: &str, user_id: &str) -> Result<()> {
        let entry = self.entry(session_id).await?;
        let mut session = entry.lock().await;

        let before = session.participants.len();
        session.participants.retain(|p| p.user_id != user_id);
        if session.participants.len() == before {
            return Err(SessionError::NotParticipant {
                session_id: session_id.to_string(),
                user_id: user_id.to_string(),
            });
        }

        self.persist(&session).await?;
        drop(session);

        debug!("User {} left session {}", user_id, session_id);
        self.broadcast(session_id, user_id, PresenceKind::Left, None);
        Ok(())
    }

    /// Move a participant's cursor and notify everyone else watching.
    pub async fn update_cursor(
        &self,
        session_id: &str,
        user_id: &str,
        cursor: CursorPosition,
    ) -> Result<()> {
        let entry = self.entry(session_id).await?;
        let mut session = entry.lock().await;

        let participant = session
            .participants
            .iter_mut()
            .find(|p| p.user_id == user_id)
            .ok_or_else(|| SessionError::NotParticipant {
                session_id: session_id.to_string(),
                user_id: user_id.to_string(),
            })?;

        participant.cursor = Some(cursor.clone());
        participant.last_activity_at = Utc::now();
        self.persist(&session).await?;
        drop(session);

        self.broadcast(session_id, user_id, PresenceKind::CursorMoved, Some(cursor));
        Ok(())
    }

    /// Whether `user_id` may perform `action` within this session.
    /// Non-participants simply get `false`.
    pub async fn has_permission(
        &self,
        session_id: &str,
        user_id: &str,
        action: Action,
    ) -> Result<bool> {
        let entry = self.entry(session_id).await?;
        let session = entry.lock().await;
        Ok(session
            .participant(user_id)
            .map(|p| p.permissions.contains(&action))
            .unwrap_or(false))
    }

    /// Whether `user_id` holds `action` in any session attached to the
    /// project. Used as the authorization gate for runtime operations.
    pub async fn has_project_permission(
        &self,
        project_id: &str,
        user_id: &str,
        action: Action,
    ) -> bool {
        let entries: Vec<Arc<Mutex<Session>>> =
            { self.sessions.read().await.values().cloned().collect() };

        for entry in entries {
            let session = entry.lock().await;
            if session.project_id == project_id
                && session
                    .participant(user_id)
                    .map(|p| p.permissions.contains(&action))
                    .unwrap_or(false)
            {
                return true;
            }
        }
        false
    }

    /// Snapshot of a session's current state.
    pub async fn get_session(&self, session_id: &str) -> Result<Session> {
        let entry = self.entry(session_id).await?;
        let session = entry.lock().await;
        Ok(session.clone())
    }

    /// All sessions currently attached to a project.
    pub async fn sessions_for_project(&self, project_id: &str) -> Vec<Session> {
        let entries: Vec<Arc<Mutex<Session>>> =
            { self.sessions.read().await.values().cloned().collect() };

        let mut result = Vec::new();
        for entry in entries {
            let session = entry.lock().await;
            if session.project_id == project_id {
                result.push(session.clone());
            }
        }
        result
    }

    async fn persist(&self, session: &Session) -> Result<()> {
        self.store
            .upsert(SESSIONS, &session.id, serde_json::to_value(session)?)
            .await?;
        Ok(())
    }

    fn broadcast(
        &self,
        session_id: &str,
        user_id: &str,
        kind: PresenceKind,
        cursor: Option<CursorPosition>,
    ) {
        // Send only fails when nobody is subscribed, which is fine
        let _ = self.presence.send(PresenceEvent {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            kind,
            cursor,
            at: Utc::now(),
        });
    }

    /// Start the periodic cleanup sweep.
    pub async fn start_sweeper(&self) {
        let mut sweeping = self.sweeping.write().await;
        if *sweeping {
            return;
        }
        *sweeping = true;
        drop(sweeping);

        let sessions = self.sessions.clone();
        let store = self.store.clone();
        let presence = self.presence.clone();
        let config = self.config.clone();
        let sweeping_flag = self.sweeping.clone();

        tokio::spawn(async move {
            info!("Session cleanup sweep started");
            loop {
                time::sleep(config.sweep_interval).await;
                if !*sweeping_flag.read().await {
                    info!("Session cleanup sweep stopped");
                    break;
                }

                let report =
                    Self::sweep(&sessions, store.as_ref(), &presence, &config).await;
                if report != SweepReport::default() {
                    info!(
                        "Session sweep removed {} idle participants, deleted {} empty sessions",
                        report.participants_removed, report.sessions_deleted
                    );
                }
            }
        });
    }

    /// Stop the periodic cleanup sweep.
    pub async fn stop_sweeper(&self) {
        let mut sweeping = self.sweeping.write().await;
        *sweeping = false;
    }

    /// Run one cleanup pass immediately. Exposed so embedding code and tests
    /// can sweep without waiting out the interval.
    pub async fn sweep_now(&self) -> SweepReport {
        Self::sweep(&self.sessions, self.store.as_ref(), &self.presence, &self.config).await
    }

    async fn sweep(
        sessions: &SessionMap,
        store: &dyn RecordStore,
        presence: &broadcast::Sender<PresenceEvent>,
        config: &SessionManagerConfig,
    ) -> SweepReport {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(config.participant_idle_timeout)
                .unwrap_or_else(|_| chrono::Duration::minutes(30));
        let mut report = SweepReport::default();

        let entries: Vec<(String, Arc<Mutex<Session>>)> = {
            sessions
                .read()
                .await
                .iter()
                .map(|(id, entry)| (id.clone(), entry.clone()))
                .collect()
        };

        let mut empty_ids = Vec::new();
        for (session_id, entry) in entries {
            let mut session = entry.lock().await;

            let idle: Vec<String> = session
                .participants
                .iter()
                .filter(|p| p.last_activity_at < cutoff)
                .map(|p| p.user_id.clone())
                .collect();

            if !idle.is_empty() {
                session.participants.retain(|p| p.last_activity_at >= cutoff);
                report.participants_removed += idle.len();

                if let Ok(value) = serde_json::to_value(&*session) {
                    if let Err(e) = store.upsert(SESSIONS, &session.id, value).await {
                        warn!("Failed to persist swept session {}: {}", session.id, e);
                    }
                }
                for user_id in idle {
                    debug!("Dropped idle participant {} from session {}", user_id, session_id);
                    let _ = presence.send(PresenceEvent {
                        session_id: session_id.clone(),
                        user_id,
                        kind: PresenceKind::Left,
                        cursor: None,
                        at: Utc::now(),
                    });
                }
            }

            if session.participants.is_empty() {
                empty_ids.push(session_id);
            }
        }

        if !empty_ids.is_empty() {
            let mut map = sessions.write().await;
            for session_id in empty_ids {
                // Re-check under the map write lock: a participant may have
                // joined since the emptiness snapshot
                let still_empty = match map.get(&session_id) {
                    Some(entry) => entry.lock().await.participants.is_empty(),
                    None => false,
                };
                if !still_empty {
                    continue;
                }
                map.remove(&session_id);
                if let Err(e) = store.delete(SESSIONS, &session_id).await {
                    warn!("Failed to delete session record {}: {}", session_id, e);
                }
                report.sessions_deleted += 1;
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codedock_storage::MemoryStore;

    fn test_manager() -> SessionManager {
        SessionManager::new(Arc::new(MemoryStore::new()), SessionManagerConfig::default())
    }

    #[tokio::test]
    async fn test_join_respects_max_users() {
        let manager = test_manager();
        let session = manager
            .create_session(
                "project-1",
                "env-1",
                SessionConfig {
                    max_users: 2,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        manager.join(&session.id, "alice", Role::Owner).await.unwrap();
        manager.join(&session.id, "bob", Role::Editor).await.unwrap();

        let result = manager.join(&session.id, "carol", Role::Viewer).await;
        assert!(matches!(result, Err(SessionError::SessionFull { .. })));
    }

    #[tokio::test]
    async fn test_rejoin_does_not_consume_a_slot() {
        let manager = test_manager();
        let session = manager
            .create_session(
                "project-1",
                "env-1",
                SessionConfig {
                    max_users: 1,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        manager.join(&session.id, "alice", Role::Owner).await.unwrap();
        manager.join(&session.id, "alice", Role::Owner).await.unwrap();

        let snapshot = manager.get_session(&session.id).await.unwrap();
        assert_eq!(snapshot.user_count(), 1);
    }

    #[tokio::test]
    async fn test_join_unknown_session() {
        let manager = test_manager();
        let result = manager.join("ses_missing", "alice", Role::Viewer).await;
        assert!(matches!(result, Err(SessionError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_permission_matrix() {
        let manager = test_manager();
        let session = manager
            .create_session("project-1", "env-1", SessionConfig::default())
            .await
            .unwrap();

        manager.join(&session.id, "owner", Role::Owner).await.unwrap();
        manager.join(&session.id, "editor", Role::Editor).await.unwrap();
        manager.join(&session.id, "viewer", Role::Viewer).await.unwrap();

        assert!(manager.has_permission(&session.id, "owner", Action::Write).await.unwrap());
        assert!(manager.has_permission(&session.id, "editor", Action::Write).await.unwrap());
        assert!(!manager.has_permission(&session.id, "viewer", Action::Write).await.unwrap());

        assert!(manager.has_permission(&session.id, "owner", Action::Admin).await.unwrap());
        assert!(!manager.has_permission(&session.id, "editor", Action::Admin).await.unwrap());

        // Unknown users hold nothing
        assert!(!manager.has_permission(&session.id, "mallory", Action::Read).await.unwrap());
    }

    #[tokio::test]
    async fn test_cursor_update_broadcasts_presence() {
        let manager = test_manager();
        let session = manager
            .create_session("project-1", "env-1", SessionConfig::default())
            .await
            .unwrap();
        manager.join(&session.id, "alice", Role::Editor).await.unwrap();

        let mut presence = manager.subscribe_presence();
        let cursor = CursorPosition {
            path: "src/main.rs".to_string(),
            line: 42,
            column: 7,
        };
        manager
            .update_cursor(&session.id, "alice", cursor.clone())
            .await
            .unwrap();

        let event = presence.recv().await.unwrap();
        assert_eq!(event.kind, PresenceKind::CursorMoved);
        assert_eq!(event.user_id, "alice");
        assert_eq!(event.cursor, Some(cursor));
    }

    #[tokio::test]
    async fn test_cursor_update_requires_membership() {
        let manager = test_manager();
        let session = manager
            .create_session("project-1", "env-1", SessionConfig::default())
            .await
            .unwrap();

        let result = manager
            .update_cursor(
                &session.id,
                "ghost",
                CursorPosition {
                    path: "a.txt".to_string(),
                    line: 1,
                    column: 1,
                },
            )
            .await;
        assert!(matches!(result, Err(SessionError::NotParticipant { .. })));
    }

    #[tokio::test]
    async fn test_sweep_deletes_only_empty_sessions() {
        let store = Arc::new(MemoryStore::new());
        let manager = SessionManager::new(
            store.clone(),
            SessionManagerConfig {
                participant_idle_timeout: Duration::from_secs(0),
                ..Default::default()
            },
        );

        let occupied = manager
            .create_session("project-1", "env-1", SessionConfig::default())
            .await
            .unwrap();
        let empty = manager
            .create_session("project-2", "env-2", SessionConfig::default())
            .await
            .unwrap();
        manager.join(&occupied.id, "alice", Role::Owner).await.unwrap();

        // Zero idle timeout: alice is immediately idle, both sessions empty out
        let report = manager.sweep_now().await;
        assert_eq!(report.participants_removed, 1);
        assert_eq!(report.sessions_deleted, 2);

        assert!(manager.get_session(&occupied.id).await.is_err());
        assert!(store
            .get(SESSIONS, &empty.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_recovery_reloads_persisted_sessions() {
        let store = Arc::new(MemoryStore::new());
        let manager = SessionManager::new(store.clone(), SessionManagerConfig::default());
        let session = manager
            .create_session("project-1", "env-1", SessionConfig::default())
            .await
            .unwrap();
        manager.join(&session.id, "alice", Role::Owner).await.unwrap();

        let recovered =
            SessionManager::with_recovery(store, SessionManagerConfig::default())
                .await
                .unwrap();
        let snapshot = recovered.get_session(&session.id).await.unwrap();
        assert_eq!(snapshot.user_count(), 1);
        assert_eq!(snapshot.project_id, "project-1");
    }
}
