// ABOUTME: Authorization gate consulted before every orchestrator operation
// ABOUTME: Combines project ownership with collaboration-session permissions

use async_trait::async_trait;
use codedock_collab::{Action, SessionManager};
use std::sync::Arc;

/// Resolves who owns a project. The relational schema backing this lives
/// outside the runtime core, so it stays a collaborator interface.
#[async_trait]
pub trait ProjectDirectory: Send + Sync {
    async fn owner_of(&self, project_id: &str) -> Option<String>;
}

/// Decides whether a caller may perform an action on a project's runtime.
#[async_trait]
pub trait AccessPolicy: Send + Sync {
    async fn allows(&self, project_id: &str, user_id: &str, action: Action) -> bool;
}

/// Production policy: the project owner may do anything; everyone else needs
/// a live collaboration-session permission covering the action.
pub struct SessionAccessPolicy {
    directory: Arc<dyn ProjectDirectory>,
    sessions: Arc<SessionManager>,
}

impl SessionAccessPolicy {
    pub fn new(directory: Arc<dyn ProjectDirectory>, sessions: Arc<SessionManager>) -> Self {
        Self { directory, sessions }
    }
}

#[async_trait]
impl AccessPolicy for SessionAccessPolicy {
    async fn allows(&self, project_id: &str, user_id: &str, action: Action) -> bool {
        if self.directory.owner_of(project_id).await.as_deref() == Some(user_id) {
            return true;
        }
        self.sessions
            .has_project_permission(project_id, user_id, action)
            .await
    }
}
