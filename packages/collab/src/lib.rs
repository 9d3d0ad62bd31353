// ABOUTME: Collaboration session layer letting several users share one running environment
// ABOUTME: Role-based permissions, cursor presence broadcast, and idle-session cleanup

pub mod manager;
pub mod types;

pub use manager::{SessionManager, SessionManagerConfig, SweepReport};
pub use types::{
    Action, CursorPosition, Participant, PresenceEvent, PresenceKind, Role, Session,
    SessionConfig, SessionError,
};
