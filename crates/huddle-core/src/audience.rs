//! Broadcast audiences.
//!
//! Every session has two audiences: everyone connected, and the moderator
//! only. A connection registers its outbox into one or both and receives
//! [`Broadcast`]s through it. Each connection has a single outbox, so
//! broadcasts reach it in the order they were published.

use huddle_protocol::{CardSelection, ServerFrame};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Atomic counter for ensuring unique IDs even within the same nanosecond.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a connection ID from a string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a unique connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}_{:x}", timestamp, counter))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Something published to an audience.
///
/// Most broadcasts render to the same frame for every recipient. A card
/// selection renders differently for the voter and for everybody else.
#[derive(Debug, Clone, PartialEq)]
pub enum Broadcast {
    /// Deliver this frame as is.
    Frame(ServerFrame),

    /// A vote was cast on connection `origin`.
    CardSelected {
        /// Connection that cast the vote.
        origin: ConnectionId,
        /// The selection.
        selection: CardSelection,
    },

    /// The session ended; recipients close their connection.
    Disconnect,
}

impl Broadcast {
    /// Render this broadcast for the connection `me`.
    ///
    /// Returns `None` for [`Broadcast::Disconnect`].
    #[must_use]
    pub fn render(&self, me: &ConnectionId) -> Option<ServerFrame> {
        match self {
            Broadcast::Frame(frame) => Some(frame.clone()),
            Broadcast::CardSelected { origin, selection } if origin == me => {
                Some(ServerFrame::CardSelected(selection.clone()))
            }
            Broadcast::CardSelected { selection, .. } => Some(ServerFrame::CardSelectedByPlayer {
                email: selection.email.clone(),
            }),
            Broadcast::Disconnect => None,
        }
    }
}

/// Sending half of a connection's outbox.
pub type Outbox = mpsc::UnboundedSender<Arc<Broadcast>>;

/// Receiving half of a connection's outbox.
pub type Inbox = mpsc::UnboundedReceiver<Arc<Broadcast>>;

/// Create a connection outbox.
#[must_use]
pub fn outbox() -> (Outbox, Inbox) {
    mpsc::unbounded_channel()
}

/// Which audience a broadcast targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudienceKind {
    /// Every connected participant, moderator included.
    Everyone,
    /// The moderator's connections only.
    Moderator,
}

impl fmt::Display for AudienceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudienceKind::Everyone => write!(f, "everyone"),
            AudienceKind::Moderator => write!(f, "moderator"),
        }
    }
}

/// A named group of connection outboxes.
#[derive(Debug)]
pub struct Audience {
    kind: AudienceKind,
    members: HashMap<ConnectionId, Outbox>,
}

impl Audience {
    /// Create an empty audience.
    #[must_use]
    pub fn new(kind: AudienceKind) -> Self {
        Self {
            kind,
            members: HashMap::new(),
        }
    }

    /// The audience kind.
    #[must_use]
    pub fn kind(&self) -> AudienceKind {
        self.kind
    }

    /// Get the number of members.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Check if a connection is a member.
    #[must_use]
    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.members.contains_key(connection_id)
    }

    /// Check if the audience is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Register a connection's outbox.
    pub fn join(&mut self, connection_id: ConnectionId, outbox: Outbox) {
        debug!(audience = %self.kind, connection = %connection_id, "Connection joined audience");
        self.members.insert(connection_id, outbox);
    }

    /// Remove a connection.
    ///
    /// Returns `true` if the connection was a member.
    pub fn leave(&mut self, connection_id: &ConnectionId) -> bool {
        let removed = self.members.remove(connection_id).is_some();
        if removed {
            debug!(audience = %self.kind, connection = %connection_id, "Connection left audience");
        }
        removed
    }

    /// Publish to every member.
    ///
    /// Returns the number of outboxes that accepted the broadcast.
    pub fn publish(&self, broadcast: Arc<Broadcast>) -> usize {
        let delivered = self
            .members
            .values()
            .filter(|outbox| outbox.send(Arc::clone(&broadcast)).is_ok())
            .count();
        trace!(audience = %self.kind, recipients = delivered, "Published broadcast");
        delivered
    }
}

/// The pair of audiences owned by a session.
#[derive(Debug)]
pub struct Audiences {
    everyone: Audience,
    moderator: Audience,
}

impl Default for Audiences {
    fn default() -> Self {
        Self {
            everyone: Audience::new(AudienceKind::Everyone),
            moderator: Audience::new(AudienceKind::Moderator),
        }
    }
}

impl Audiences {
    /// Get an audience.
    #[must_use]
    pub fn get(&self, kind: AudienceKind) -> &Audience {
        match kind {
            AudienceKind::Everyone => &self.everyone,
            AudienceKind::Moderator => &self.moderator,
        }
    }

    /// Register a connection into `Everyone`, and `Moderator` when asked.
    pub fn join(&mut self, connection_id: &ConnectionId, outbox: &Outbox, moderator: bool) {
        self.everyone.join(connection_id.clone(), outbox.clone());
        if moderator {
            self.moderator.join(connection_id.clone(), outbox.clone());
        }
    }

    /// Remove a connection from both audiences.
    pub fn leave(&mut self, connection_id: &ConnectionId) {
        self.everyone.leave(connection_id);
        self.moderator.leave(connection_id);
    }

    /// Publish to one audience.
    pub fn publish(&self, kind: AudienceKind, broadcast: Broadcast) -> usize {
        self.get(kind).publish(Arc::new(broadcast))
    }

    /// Publish a frame to one audience.
    pub fn publish_frame(&self, kind: AudienceKind, frame: ServerFrame) -> usize {
        self.publish(kind, Broadcast::Frame(frame))
    }

    /// Number of distinct connected connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.everyone.member_count()
    }
}
