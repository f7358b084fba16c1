//! Live session state.
//!
//! All mutable state of a session sits behind one async mutex. Every vote,
//! queue change, countdown tick and broadcast for the session happens while
//! holding it, which gives a single serial order per session. The lock is
//! never held across a call to the persistence collaborator.

use crate::audience::{outbox, AudienceKind, Audiences, Broadcast, ConnectionId, Inbox};
use crate::countdown::{self, Countdown};
use crate::queue::WorkQueue;
use crate::store::SessionRecord;
use crate::vote::VoteBoard;
use huddle_protocol::Role;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session has ended and accepts no new connections.
    #[error("Session ended: {0}")]
    Ended(SessionKey),
}

/// Stable key of a live session, derived from board and session ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(String);

impl SessionKey {
    /// Build the key for a board's session.
    #[must_use]
    pub fn new(board_id: u64, session_id: u64) -> Self {
        Self(format!("board{board_id}:session{session_id}"))
    }

    /// Get the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&SessionRecord> for SessionKey {
    fn from(record: &SessionRecord) -> Self {
        Self::new(record.board_id, record.session_id)
    }
}

/// An admitted participant on one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// The connection.
    pub connection: ConnectionId,
    /// Identity key.
    pub email: String,
    /// Storage id of the user.
    pub participant_id: u64,
    /// Board role.
    pub role: Role,
    /// Whether this identity moderates the session.
    pub is_moderator: bool,
}

/// Mutable state of a session.
#[derive(Debug)]
pub struct SessionState {
    pub(crate) votes: VoteBoard,
    pub(crate) queue: WorkQueue,
    pub(crate) countdown: Countdown,
    pub(crate) audiences: Audiences,
    pub(crate) ended: bool,
}

impl SessionState {
    /// Votes for the active item.
    #[must_use]
    pub fn votes(&self) -> &VoteBoard {
        &self.votes
    }

    /// The work queue.
    #[must_use]
    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// The countdown.
    #[must_use]
    pub fn countdown(&self) -> &Countdown {
        &self.countdown
    }

    /// The broadcast audiences.
    #[must_use]
    pub fn audiences(&self) -> &Audiences {
        &self.audiences
    }

    /// Whether the session has ended.
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.ended
    }
}

/// A live estimation session.
#[derive(Debug)]
pub struct Session {
    key: SessionKey,
    record: SessionRecord,
    state: Mutex<SessionState>,
}

impl Session {
    /// Create a session from its stored record.
    #[must_use]
    pub fn new(record: SessionRecord) -> Self {
        let state = SessionState {
            votes: VoteBoard::new(&record.participants),
            queue: WorkQueue::new(),
            countdown: Countdown::new(record.timer_seconds),
            audiences: Audiences::default(),
            ended: false,
        };
        Self {
            key: SessionKey::from(&record),
            record,
            state: Mutex::new(state),
        }
    }

    /// The session key.
    #[must_use]
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// The record the session was created from.
    #[must_use]
    pub fn record(&self) -> &SessionRecord {
        &self.record
    }

    /// Session row id.
    #[must_use]
    pub fn session_id(&self) -> u64 {
        self.record.session_id
    }

    /// Board id.
    #[must_use]
    pub fn board_id(&self) -> u64 {
        self.record.board_id
    }

    /// Whether `email` moderates this session.
    #[must_use]
    pub fn is_moderator(&self, email: &str) -> bool {
        self.record.moderator == email
    }

    /// Lock the session state.
    pub async fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().await
    }

    /// Register a member's connection into its audiences.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Ended`] if the session has already ended.
    pub async fn attach(&self, member: &Member) -> Result<Inbox, SessionError> {
        let mut state = self.lock().await;
        if state.ended {
            return Err(SessionError::Ended(self.key.clone()));
        }
        let (tx, rx) = outbox();
        state
            .audiences
            .join(&member.connection, &tx, member.is_moderator);
        debug!(
            session = %self.key,
            connection = %member.connection,
            email = %member.email,
            moderator = member.is_moderator,
            connections = state.audiences.connection_count(),
            "Member attached"
        );
        Ok(rx)
    }

    /// Remove a connection from both audiences. Votes are kept.
    pub async fn detach(&self, connection: &ConnectionId) {
        let mut state = self.lock().await;
        state.audiences.leave(connection);
        debug!(
            session = %self.key,
            connection = %connection,
            connections = state.audiences.connection_count(),
            "Member detached"
        );
    }

    /// Restart the countdown at the session's configured length.
    pub async fn start_countdown(self: &Arc<Self>) {
        let mut state = self.lock().await;
        if state.ended {
            return;
        }
        let generation = state.countdown.restart(self.record.timer_seconds);
        let task = tokio::spawn(countdown::run(Arc::clone(self), generation));
        state.countdown.attach(task);
        debug!(
            session = %self.key,
            seconds = self.record.timer_seconds,
            generation,
            "Countdown started"
        );
    }

    /// End the session: stop the countdown and tell every connection to
    /// disconnect.
    ///
    /// Returns `false` if the session had already ended.
    pub async fn end(&self) -> bool {
        let mut state = self.lock().await;
        if state.ended {
            return false;
        }
        state.ended = true;
        state.countdown.cancel();
        state
            .audiences
            .publish(AudienceKind::Moderator, Broadcast::Disconnect);
        state
            .audiences
            .publish(AudienceKind::Everyone, Broadcast::Disconnect);
        info!(session = %self.key, "Session ended");
        true
    }
}
