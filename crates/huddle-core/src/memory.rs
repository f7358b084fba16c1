//! In-memory store loaded from a TOML fixture file.
//!
//! Used by the server for local runs and by the tests. It is not a
//! persistence layer: everything is lost on restart.
//!
//! ```toml
//! [[users]]
//! id = 1
//! email = "mod@example.com"
//! token = "secret-1"
//!
//! [[boards]]
//! id = 10
//! moderator = "mod@example.com"
//! members = [{ email = "mod@example.com", role = "player" }]
//!
//! [[sessions]]
//! id = 7
//! board = 10
//! timer_seconds = 30
//!
//! [[tickets]]
//! id = 100
//! board_id = 10
//! key = "PROJ-1"
//! ```

use crate::store::{
    Authenticator, EstimationRecord, Identity, Participant, SessionRecord, SessionStore,
    StoreError,
};
use async_trait::async_trait;
use dashmap::DashMap;
use huddle_protocol::{Role, WorkItem};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

/// Default countdown length for sessions that do not set one.
pub const DEFAULT_TIMER_SECONDS: u32 = 30;

/// A user fixture.
#[derive(Debug, Clone, Deserialize)]
pub struct UserFixture {
    /// User id.
    pub id: u64,
    /// Email address.
    pub email: String,
    /// Bearer token.
    pub token: String,
    /// Inactive users cannot authenticate.
    #[serde(default = "default_true")]
    pub active: bool,
}

/// A board member fixture.
#[derive(Debug, Clone, Deserialize)]
pub struct MemberFixture {
    /// Member email.
    pub email: String,
    /// Member role.
    pub role: Role,
}

/// A board fixture.
#[derive(Debug, Clone, Deserialize)]
pub struct BoardFixture {
    /// Board id.
    pub id: u64,
    /// Moderator email.
    pub moderator: String,
    /// Members with roles.
    #[serde(default)]
    pub members: Vec<MemberFixture>,
}

/// A session fixture.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionFixture {
    /// Session id.
    pub id: u64,
    /// Board id.
    pub board: u64,
    /// Countdown length in seconds.
    #[serde(default = "default_timer")]
    pub timer_seconds: u32,
    /// Whether the session is joinable.
    #[serde(default = "default_true")]
    pub active: bool,
}

/// Contents of a fixture file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Fixtures {
    /// Users.
    #[serde(default)]
    pub users: Vec<UserFixture>,
    /// Boards.
    #[serde(default)]
    pub boards: Vec<BoardFixture>,
    /// Sessions.
    #[serde(default)]
    pub sessions: Vec<SessionFixture>,
    /// Tickets.
    #[serde(default)]
    pub tickets: Vec<WorkItem>,
}

fn default_true() -> bool {
    true
}

fn default_timer() -> u32 {
    DEFAULT_TIMER_SECONDS
}

/// Errors loading a fixture file.
#[derive(Debug, thiserror::Error)]
pub enum FixtureError {
    /// The file could not be read.
    #[error("Failed to read fixtures: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid fixture TOML.
    #[error("Failed to parse fixtures: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Fixture-backed implementation of [`SessionStore`] and [`Authenticator`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: DashMap<String, UserFixture>,
    boards: DashMap<u64, BoardFixture>,
    sessions: DashMap<u64, SessionFixture>,
    /// Tickets keyed by id; `order` keeps board order.
    tickets: DashMap<u64, WorkItem>,
    order: DashMap<u64, Vec<u64>>,
    /// Votes keyed by (work item, participant).
    estimations: DashMap<(u64, u64), u32>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from parsed fixtures.
    #[must_use]
    pub fn from_fixtures(fixtures: Fixtures) -> Self {
        let store = Self::new();
        for user in fixtures.users {
            store.users.insert(user.token.clone(), user);
        }
        for board in fixtures.boards {
            store.boards.insert(board.id, board);
        }
        for session in fixtures.sessions {
            store.sessions.insert(session.id, session);
        }
        for ticket in fixtures.tickets {
            store.insert_ticket(ticket);
        }
        store
    }

    /// Parse fixtures from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid fixture TOML.
    pub fn from_toml_str(text: &str) -> Result<Self, FixtureError> {
        let fixtures: Fixtures = toml::from_str(text)?;
        Ok(Self::from_fixtures(fixtures))
    }

    /// Load fixtures from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FixtureError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let store = Self::from_toml_str(&text)?;
        info!(
            path = %path.display(),
            users = store.users.len(),
            sessions = store.sessions.len(),
            tickets = store.tickets.len(),
            "Loaded fixtures"
        );
        Ok(store)
    }

    fn insert_ticket(&self, ticket: WorkItem) {
        self.order.entry(ticket.board_id).or_default().push(ticket.id);
        self.tickets.insert(ticket.id, ticket);
    }

    /// Get a ticket by id.
    #[must_use]
    pub fn work_item(&self, id: u64) -> Option<WorkItem> {
        self.tickets.get(&id).map(|t| t.clone())
    }

    /// Votes stored for a work item, sorted by participant id.
    #[must_use]
    pub fn estimations_for(&self, work_item_id: u64) -> Vec<EstimationRecord> {
        let mut records: Vec<EstimationRecord> = self
            .estimations
            .iter()
            .filter(|e| e.key().0 == work_item_id)
            .map(|e| EstimationRecord {
                participant_id: e.key().1,
                work_item_id,
                estimate: *e.value(),
            })
            .collect();
        records.sort_by_key(|r| r.participant_id);
        records
    }

    /// Whether a session is still active.
    #[must_use]
    pub fn is_session_active(&self, session_id: u64) -> Option<bool> {
        self.sessions.get(&session_id).map(|s| s.active)
    }

    fn user_id(&self, email: &str) -> Option<u64> {
        self.users
            .iter()
            .find(|u| u.email == email)
            .map(|u| u.id)
    }
}

#[async_trait]
impl Authenticator for MemoryStore {
    async fn authenticate(&self, token: &str) -> Result<Option<Identity>, StoreError> {
        Ok(self.users.get(token).and_then(|user| {
            user.active.then(|| Identity {
                user_id: user.id,
                email: user.email.clone(),
            })
        }))
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn resolve_session(&self, session_id: u64) -> Result<SessionRecord, StoreError> {
        let session = self
            .sessions
            .get(&session_id)
            .map(|s| s.clone())
            .ok_or_else(|| StoreError::NotFound(format!("session {session_id}")))?;
        let board = self
            .boards
            .get(&session.board)
            .map(|b| b.clone())
            .ok_or_else(|| StoreError::NotFound(format!("board {}", session.board)))?;

        let participants = board
            .members
            .iter()
            .filter_map(|m| {
                self.user_id(&m.email).map(|id| Participant {
                    id,
                    email: m.email.clone(),
                    role: m.role,
                })
            })
            .collect();

        Ok(SessionRecord {
            session_id,
            board_id: board.id,
            participants,
            moderator: board.moderator,
            timer_seconds: session.timer_seconds,
            is_active: session.active,
        })
    }

    async fn load_pending_work_items(&self, board_id: u64) -> Result<Vec<WorkItem>, StoreError> {
        let ids = self.order.get(&board_id).map(|o| o.clone()).unwrap_or_default();
        Ok(ids
            .into_iter()
            .filter_map(|id| self.work_item(id))
            .filter(|t| !t.is_estimated)
            .collect())
    }

    async fn persist_final_estimation(
        &self,
        work_item_id: u64,
        value: u32,
    ) -> Result<(), StoreError> {
        let mut ticket = self
            .tickets
            .get_mut(&work_item_id)
            .ok_or_else(|| StoreError::NotFound(format!("work item {work_item_id}")))?;
        ticket.is_estimated = true;
        ticket.final_estimation = Some(value);
        debug!(work_item = work_item_id, value, "Persisted final estimation");
        Ok(())
    }

    async fn bulk_persist_estimations(
        &self,
        estimations: Vec<EstimationRecord>,
    ) -> Result<(), StoreError> {
        let count = estimations.len();
        for e in estimations {
            self.estimations
                .insert((e.work_item_id, e.participant_id), e.estimate);
        }
        debug!(count, "Persisted participant estimations");
        Ok(())
    }

    async fn mark_session_inactive(&self, session_id: u64) -> Result<(), StoreError> {
        let mut session = self
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| StoreError::NotFound(format!("session {session_id}")))?;
        session.active = false;
        debug!(session = session_id, "Marked session inactive");
        Ok(())
    }
}
