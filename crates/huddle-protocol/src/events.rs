//! Inbound client events.
//!
//! Every message a client sends carries an `event` tag plus event-specific
//! fields. The sender's identity is never read from the payload; the server
//! attaches it from the authenticated connection.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An estimate in story points.
///
/// Browsers send card values as strings (`"5"`), while moderators send the
/// final estimate as a number, so both forms are accepted on input. Output is
/// always a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawEstimate", into = "u32")]
pub struct Estimate(pub u32);

impl Estimate {
    /// Get the numeric value.
    #[must_use]
    pub fn value(self) -> u32 {
        self.0
    }
}

impl From<Estimate> for u32 {
    fn from(estimate: Estimate) -> u32 {
        estimate.0
    }
}

impl From<u32> for Estimate {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for Estimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawEstimate {
    Number(u32),
    Text(String),
}

impl TryFrom<RawEstimate> for Estimate {
    type Error = String;

    fn try_from(raw: RawEstimate) -> Result<Self, Self::Error> {
        match raw {
            RawEstimate::Number(n) => Ok(Self(n)),
            RawEstimate::Text(s) => s
                .trim()
                .parse::<u32>()
                .map(Self)
                .map_err(|_| format!("invalid estimate: {s:?}")),
        }
    }
}

/// An event sent by a client over an established session connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Reload the work queue from storage.
    FetchTickets,

    /// Broadcast the item currently up for estimation.
    GetCurrentTicket,

    /// (Re)start the countdown. Moderator only.
    StartTimer,

    /// Move the current item to the back of the queue. Moderator only.
    SkipTicket,

    /// Reveal every participant's vote. Moderator only.
    UsersEstimation,

    /// Commit the final estimate for the current item. Moderator only.
    FinalEstimation {
        /// The agreed estimate.
        estimation: Estimate,
    },

    /// End the session for everyone. Moderator only.
    EndGame,

    /// Broadcast min/max/mean over the current votes. Moderator only.
    TicketAnalysis,

    /// Cast or replace a vote. Players only.
    CardSelected {
        /// The selected card.
        card: Estimate,
    },
}

impl ClientEvent {
    /// The wire name of this event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::FetchTickets => "fetch_tickets",
            ClientEvent::GetCurrentTicket => "get_current_ticket",
            ClientEvent::StartTimer => "start_timer",
            ClientEvent::SkipTicket => "skip_ticket",
            ClientEvent::UsersEstimation => "users_estimation",
            ClientEvent::FinalEstimation { .. } => "final_estimation",
            ClientEvent::EndGame => "end_game",
            ClientEvent::TicketAnalysis => "ticket_analysis",
            ClientEvent::CardSelected { .. } => "card_selected",
        }
    }

    /// Whether only the session moderator may send this event.
    #[must_use]
    pub fn is_moderator_only(&self) -> bool {
        matches!(
            self,
            ClientEvent::StartTimer
                | ClientEvent::SkipTicket
                | ClientEvent::UsersEstimation
                | ClientEvent::FinalEstimation { .. }
                | ClientEvent::EndGame
                | ClientEvent::TicketAnalysis
        )
    }
}
