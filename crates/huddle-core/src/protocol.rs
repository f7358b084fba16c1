//! Session protocol: admission and inbound event handling.
//!
//! A connection is admitted once (token, session lookup, membership) and
//! then feeds every decoded [`ClientEvent`] through
//! [`SessionProtocol::dispatch`]. Dispatch returns a typed result; whether a
//! rejection is reported to the client is up to the caller.

use crate::audience::{AudienceKind, Broadcast, ConnectionId};
use crate::registry::{RegistryError, SessionRegistry};
use crate::session::{Member, Session};
use crate::store::{Authenticator, SessionStore, StoreError};
use huddle_protocol::{CardSelection, ClientEvent, Estimate, FinalEstimate, Role, ServerFrame};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a connection was refused.
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// Missing, unknown or inactive token.
    #[error("Unauthenticated")]
    Unauthenticated,

    /// The user is not a member of the session's board.
    #[error("Not a participant of session {0}")]
    NotParticipant(u64),

    /// The session has been closed.
    #[error("Session {0} is no longer active")]
    SessionInactive(u64),

    /// Too many live sessions.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The store failed or the session does not exist.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AdmissionError {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            AdmissionError::Unauthenticated => "unauthenticated",
            AdmissionError::NotParticipant(_) => "not_participant",
            AdmissionError::SessionInactive(_) => "inactive",
            AdmissionError::Registry(_) => "capacity",
            AdmissionError::Store(StoreError::NotFound(_)) => "not_found",
            AdmissionError::Store(_) => "store",
        }
    }
}

/// An admitted connection, ready to attach to its session.
#[derive(Debug, Clone)]
pub struct Admission {
    /// The live session.
    pub session: Arc<Session>,
    /// The connection's member record.
    pub member: Member,
}

/// Why an inbound event was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The frame could not be decoded as a known event.
    Malformed,
    /// Moderator-only event from someone else.
    NotModerator,
    /// Vote from a non-player.
    NotPlayer,
    /// Finalize with nothing in the queue.
    EmptyQueue,
    /// The session already ended.
    SessionEnded,
}

impl Rejection {
    /// Numeric code used in `error` frames.
    #[must_use]
    pub fn code(self) -> u16 {
        match self {
            Rejection::Malformed => 4000,
            Rejection::NotModerator => 4003,
            Rejection::NotPlayer => 4004,
            Rejection::EmptyQueue => 4009,
            Rejection::SessionEnded => 4010,
        }
    }

    /// Short label for logs, metrics and `error` frames.
    #[must_use]
    pub fn reason(self) -> &'static str {
        match self {
            Rejection::Malformed => "malformed",
            Rejection::NotModerator => "not_moderator",
            Rejection::NotPlayer => "not_player",
            Rejection::EmptyQueue => "empty_queue",
            Rejection::SessionEnded => "session_ended",
        }
    }

    /// The `error` frame for this rejection.
    #[must_use]
    pub fn to_frame(self) -> ServerFrame {
        ServerFrame::error(self.code(), self.reason())
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

/// Event handling errors.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The event was refused; the connection stays open.
    #[error("Rejected: {0}")]
    Rejected(Rejection),

    /// The store failed while applying the event.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<Rejection> for DispatchError {
    fn from(rejection: Rejection) -> Self {
        DispatchError::Rejected(rejection)
    }
}

/// What an applied event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// State changed and/or broadcasts went out.
    Applied,
    /// The session ended; every connection has been told to disconnect.
    SessionEnded,
}

/// Connects the registry with the external collaborators.
#[derive(Clone)]
pub struct SessionProtocol {
    registry: Arc<SessionRegistry>,
    store: Arc<dyn SessionStore>,
    auth: Arc<dyn Authenticator>,
}

impl SessionProtocol {
    /// Create a protocol handler.
    #[must_use]
    pub fn new(
        registry: Arc<SessionRegistry>,
        store: Arc<dyn SessionStore>,
        auth: Arc<dyn Authenticator>,
    ) -> Self {
        Self {
            registry,
            store,
            auth,
        }
    }

    /// The session registry.
    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Authenticate a connection and resolve its session and role.
    ///
    /// # Errors
    ///
    /// Returns an [`AdmissionError`] if the connection must be closed.
    pub async fn admit(
        &self,
        session_id: u64,
        token: Option<&str>,
        connection: ConnectionId,
    ) -> Result<Admission, AdmissionError> {
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or(AdmissionError::Unauthenticated)?;
        let identity = self
            .auth
            .authenticate(token)
            .await?
            .ok_or(AdmissionError::Unauthenticated)?;

        let record = self.store.resolve_session(session_id).await?;
        if !record.is_active {
            return Err(AdmissionError::SessionInactive(session_id));
        }
        if !self.store.is_participant(session_id, &identity.email).await? {
            return Err(AdmissionError::NotParticipant(session_id));
        }
        let participant = record
            .participant(&identity.email)
            .cloned()
            .ok_or(AdmissionError::NotParticipant(session_id))?;

        let session = self.registry.get_or_create(&record)?;
        if session.lock().await.is_ended() {
            return Err(AdmissionError::SessionInactive(session_id));
        }
        let member = Member {
            connection,
            is_moderator: session.is_moderator(&identity.email),
            email: identity.email,
            participant_id: participant.id,
            role: participant.role,
        };

        info!(
            session = %session.key(),
            connection = %member.connection,
            email = %member.email,
            role = ?member.role,
            moderator = member.is_moderator,
            "Connection admitted"
        );

        Ok(Admission { session, member })
    }

    /// Apply one inbound event from `member`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Rejected`] if the event was not applied and
    /// [`DispatchError::Store`] if persistence failed.
    pub async fn dispatch(
        &self,
        session: &Arc<Session>,
        member: &Member,
        event: ClientEvent,
    ) -> Result<Outcome, DispatchError> {
        if event.is_moderator_only() && !member.is_moderator {
            return Err(Rejection::NotModerator.into());
        }

        debug!(
            session = %session.key(),
            connection = %member.connection,
            event = event.name(),
            "Dispatching event"
        );

        match event {
            ClientEvent::StartTimer => {
                session.start_countdown().await;
                Ok(Outcome::Applied)
            }
            ClientEvent::SkipTicket => {
                let mut state = session.lock().await;
                state.queue.skip();
                state.votes.reset();
                Ok(Outcome::Applied)
            }
            ClientEvent::UsersEstimation => {
                let state = session.lock().await;
                let snapshot = state.votes.snapshot();
                state
                    .audiences
                    .publish_frame(AudienceKind::Everyone, ServerFrame::UsersEstimation(snapshot));
                Ok(Outcome::Applied)
            }
            ClientEvent::TicketAnalysis => {
                let state = session.lock().await;
                let stats = state.votes.statistics();
                state
                    .audiences
                    .publish_frame(AudienceKind::Everyone, ServerFrame::TicketAnalysis(stats));
                Ok(Outcome::Applied)
            }
            ClientEvent::FinalEstimation { estimation } => {
                self.finalize(session, member, estimation).await
            }
            ClientEvent::EndGame => self.end_session(session).await,
            ClientEvent::FetchTickets => {
                let items = self.store.load_pending_work_items(session.board_id()).await?;
                let mut state = session.lock().await;
                debug!(session = %session.key(), items = items.len(), "Loaded work queue");
                state.queue.load(items);
                Ok(Outcome::Applied)
            }
            ClientEvent::GetCurrentTicket => {
                {
                    let state = session.lock().await;
                    if let Some(item) = state.queue.current() {
                        let frame = ServerFrame::CurrentTicket(item.clone());
                        state.audiences.publish_frame(AudienceKind::Everyone, frame);
                        return Ok(Outcome::Applied);
                    }
                }
                debug!(session = %session.key(), "Work queue empty");
                self.end_session(session).await
            }
            ClientEvent::CardSelected { card } => {
                if member.role != Role::Player {
                    return Err(Rejection::NotPlayer.into());
                }
                let mut state = session.lock().await;
                if state.ended {
                    return Err(Rejection::SessionEnded.into());
                }
                state.votes.record_vote(&member.email, card.value());

                let selection = CardSelection {
                    email: member.email.clone(),
                    card,
                };
                state.audiences.publish(
                    AudienceKind::Everyone,
                    Broadcast::CardSelected {
                        origin: member.connection.clone(),
                        selection: selection.clone(),
                    },
                );
                state.audiences.publish_frame(
                    AudienceKind::Moderator,
                    ServerFrame::CardSelectedForModerator(selection),
                );
                Ok(Outcome::Applied)
            }
        }
    }

    /// Commit the moderator's estimate for the active item.
    ///
    /// The item and votes are persisted first; the queue and vote map only
    /// change once both writes succeeded.
    async fn finalize(
        &self,
        session: &Arc<Session>,
        member: &Member,
        estimation: Estimate,
    ) -> Result<Outcome, DispatchError> {
        let (item_id, records) = {
            let state = session.lock().await;
            let item_id = state.queue.current().ok_or(Rejection::EmptyQueue)?.id;
            (item_id, state.votes.finalize(item_id))
        };

        self.store
            .persist_final_estimation(item_id, estimation.value())
            .await?;
        let votes = records.len();
        self.store.bulk_persist_estimations(records).await?;

        info!(
            session = %session.key(),
            work_item = item_id,
            estimation = estimation.value(),
            votes,
            "Work item estimated"
        );

        let mut state = session.lock().await;
        if state.queue.current().map(|item| item.id) == Some(item_id) {
            state.queue.pop_front();
            state.votes.reset();
        } else {
            warn!(
                session = %session.key(),
                work_item = item_id,
                "Work queue changed during finalize"
            );
        }
        state.audiences.publish_frame(
            AudienceKind::Everyone,
            ServerFrame::FinalEstimation(FinalEstimate {
                email: member.email.clone(),
                work_item_id: item_id,
                estimation,
            }),
        );
        Ok(Outcome::Applied)
    }

    /// Mark the session inactive and disconnect everyone.
    ///
    /// The ended session stays in the registry so late admissions resolve to
    /// it and are refused.
    async fn end_session(&self, session: &Arc<Session>) -> Result<Outcome, DispatchError> {
        if session.lock().await.ended {
            return Ok(Outcome::SessionEnded);
        }
        self.store.mark_session_inactive(session.session_id()).await?;
        if !session.end().await {
            debug!(session = %session.key(), "Session ended concurrently");
        }
        Ok(Outcome::SessionEnded)
    }
}
