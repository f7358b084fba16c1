//! Persistence and authentication boundary.
//!
//! Boards, users and tickets live in an external service. The engine only
//! needs the handful of operations below and calls them without holding any
//! session lock.

use async_trait::async_trait;
use huddle_protocol::{Role, WorkItem};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by the persistence collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The backend could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Any other backend failure.
    #[error("Store error: {0}")]
    Backend(String),
}

/// An authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Storage identifier of the user.
    pub user_id: u64,
    /// Email, used as the identity key inside a session.
    pub email: String,
}

/// A board member as seen by a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Storage identifier of the user.
    pub id: u64,
    /// Email address.
    pub email: String,
    /// Role on the board.
    pub role: Role,
}

/// Everything the engine needs to know about a session row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Session row identifier.
    pub session_id: u64,
    /// Board being estimated.
    pub board_id: u64,
    /// Board members.
    pub participants: Vec<Participant>,
    /// Email of the board's moderator.
    pub moderator: String,
    /// Countdown length in seconds.
    pub timer_seconds: u32,
    /// Whether the session can still be joined.
    pub is_active: bool,
}

impl SessionRecord {
    /// Look up a participant by email.
    #[must_use]
    pub fn participant(&self, email: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.email == email)
    }
}

/// One participant's vote on a finished work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EstimationRecord {
    /// Storage identifier of the voter.
    pub participant_id: u64,
    /// The estimated work item.
    pub work_item_id: u64,
    /// The vote.
    pub estimate: u32,
}

/// Resolves bearer tokens to users.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Resolve a token.
    ///
    /// Returns `Ok(None)` for unknown tokens and inactive users.
    async fn authenticate(&self, token: &str) -> Result<Option<Identity>, StoreError>;
}

/// Session, work-item and estimation persistence.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session with its roster, moderator and timer.
    ///
    /// Fails with [`StoreError::NotFound`] for an unknown id.
    async fn resolve_session(&self, session_id: u64) -> Result<SessionRecord, StoreError>;

    /// Whether `email` is a member of the session's board.
    async fn is_participant(&self, session_id: u64, email: &str) -> Result<bool, StoreError> {
        Ok(self
            .resolve_session(session_id)
            .await?
            .participant(email)
            .is_some())
    }

    /// Unestimated work items of a board, in board order.
    async fn load_pending_work_items(&self, board_id: u64) -> Result<Vec<WorkItem>, StoreError>;

    /// Mark a work item estimated with its final value.
    async fn persist_final_estimation(&self, work_item_id: u64, value: u32)
        -> Result<(), StoreError>;

    /// Store the individual votes for a finished work item.
    async fn bulk_persist_estimations(
        &self,
        estimations: Vec<EstimationRecord>,
    ) -> Result<(), StoreError>;

    /// Mark a session as no longer active.
    async fn mark_session_inactive(&self, session_id: u64) -> Result<(), StoreError>;
}
