//! Outbound frames for the Huddle protocol.
//!
//! Every frame the server sends is an object with a `type` tag and a `data`
//! payload, e.g. `{"type": "timer", "data": 12}`.

use crate::events::Estimate;
use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Wire value used for a participant who has not voted yet.
pub const NOT_VOTED: &str = "not estimated";

/// A participant's role on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// May cast votes.
    Player,
    /// Watches the round without voting.
    Spectator,
}

/// Vote state for one participant on the active work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VoteState {
    /// No card selected yet.
    #[default]
    NotVoted,
    /// Selected card value.
    Voted(u32),
}

impl VoteState {
    /// The numeric value, if a vote was cast.
    #[must_use]
    pub fn value(self) -> Option<u32> {
        match self {
            VoteState::NotVoted => None,
            VoteState::Voted(v) => Some(v),
        }
    }
}

impl Serialize for VoteState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            VoteState::NotVoted => serializer.serialize_str(NOT_VOTED),
            VoteState::Voted(v) => serializer.serialize_u32(*v),
        }
    }
}

impl<'de> Deserialize<'de> for VoteState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct VoteVisitor;

        impl<'de> Visitor<'de> for VoteVisitor {
            type Value = VoteState;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a vote value or {NOT_VOTED:?}")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<VoteState, E> {
                u32::try_from(v)
                    .map(VoteState::Voted)
                    .map_err(|_| E::custom("vote out of range"))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<VoteState, E> {
                u32::try_from(v)
                    .map(VoteState::Voted)
                    .map_err(|_| E::custom("vote out of range"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<VoteState, E> {
                if v == NOT_VOTED {
                    Ok(VoteState::NotVoted)
                } else {
                    Err(E::invalid_value(de::Unexpected::Str(v), &self))
                }
            }
        }

        deserializer.deserialize_any(VoteVisitor)
    }
}

/// An estimable unit of work queued in a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Storage identifier.
    pub id: u64,
    /// Board the item belongs to.
    pub board_id: u64,
    /// External ticket key, e.g. `PROJ-42`.
    pub key: String,
    /// One-line summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether a final estimate has been committed.
    #[serde(default)]
    pub is_estimated: bool,
    /// The committed estimate.
    #[serde(default)]
    pub final_estimation: Option<u32>,
}

/// A card selection as echoed back to the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardSelection {
    /// Who selected the card.
    pub email: String,
    /// The selected value.
    pub card: Estimate,
}

/// The moderator's committed estimate for a work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalEstimate {
    /// Moderator who committed the estimate.
    pub email: String,
    /// The estimated work item.
    pub work_item_id: u64,
    /// The committed value.
    pub estimation: Estimate,
}

/// Summary statistics over the numeric votes of a round.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    /// Lowest vote.
    pub min: u32,
    /// Highest vote.
    pub max: u32,
    /// Arithmetic mean.
    pub mean: f64,
}

/// A frame sent from the server to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Role acknowledgment sent once after joining.
    Role(Role),

    /// Countdown tick.
    Timer(u32),

    /// The receiver's own selection.
    CardSelected(CardSelection),

    /// Someone else selected a card; the value is withheld.
    CardSelectedByPlayer {
        /// Who selected a card.
        email: String,
    },

    /// A selection with its value, for the moderator.
    #[serde(rename = "card_selected_by_player_for_manager")]
    CardSelectedForModerator(CardSelection),

    /// Every participant's current vote.
    UsersEstimation(BTreeMap<String, VoteState>),

    /// The committed estimate for the item just finished.
    FinalEstimation(FinalEstimate),

    /// The item currently up for estimation.
    #[serde(rename = "get_current_ticket")]
    CurrentTicket(WorkItem),

    /// Vote statistics; `null` when nobody has voted.
    ///
    /// Older clients received the string `TICKET IS NOT ESTIMATED BY ANYONE`
    /// in place of `null`.
    TicketAnalysis(Option<Statistics>),

    /// An event was rejected.
    Error {
        /// Numeric reason code.
        code: u16,
        /// Human-readable reason.
        reason: String,
    },
}

impl ServerFrame {
    /// The wire `type` tag of this frame.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ServerFrame::Role(_) => "role",
            ServerFrame::Timer(_) => "timer",
            ServerFrame::CardSelected(_) => "card_selected",
            ServerFrame::CardSelectedByPlayer { .. } => "card_selected_by_player",
            ServerFrame::CardSelectedForModerator(_) => "card_selected_by_player_for_manager",
            ServerFrame::UsersEstimation(_) => "users_estimation",
            ServerFrame::FinalEstimation(_) => "final_estimation",
            ServerFrame::CurrentTicket(_) => "get_current_ticket",
            ServerFrame::TicketAnalysis(_) => "ticket_analysis",
            ServerFrame::Error { .. } => "error",
        }
    }

    /// Create a new Error frame.
    #[must_use]
    pub fn error(code: u16, reason: impl Into<String>) -> Self {
        ServerFrame::Error {
            code,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_shape() {
        let frame = ServerFrame::Timer(12);
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"type": "timer", "data": 12})
        );
        assert_eq!(frame.kind(), "timer");

        let frame = ServerFrame::Role(Role::Player);
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"type": "role", "data": "player"})
        );
    }

    #[test]
    fn test_selection_frames() {
        let frame = ServerFrame::CardSelectedByPlayer {
            email: "ana@example.com".into(),
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"type": "card_selected_by_player", "data": {"email": "ana@example.com"}})
        );

        let frame = ServerFrame::CardSelectedForModerator(CardSelection {
            email: "ana@example.com".into(),
            card: Estimate(3),
        });
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({
                "type": "card_selected_by_player_for_manager",
                "data": {"email": "ana@example.com", "card": 3}
            })
        );
    }

    #[test]
    fn test_users_estimation_uses_sentinel() {
        let mut votes = BTreeMap::new();
        votes.insert("a@example.com".to_string(), VoteState::Voted(3));
        votes.insert("b@example.com".to_string(), VoteState::NotVoted);

        let value = serde_json::to_value(ServerFrame::UsersEstimation(votes.clone())).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "users_estimation",
                "data": {"a@example.com": 3, "b@example.com": "not estimated"}
            })
        );

        let back: ServerFrame = serde_json::from_value(value).unwrap();
        assert_eq!(back, ServerFrame::UsersEstimation(votes));
    }

    #[test]
    fn test_ticket_analysis_without_votes_is_null() {
        assert_eq!(
            serde_json::to_value(ServerFrame::TicketAnalysis(None)).unwrap(),
            json!({"type": "ticket_analysis", "data": null})
        );
    }

    #[test]
    fn test_vote_state_rejects_other_strings() {
        assert!(serde_json::from_str::<VoteState>(r#""maybe""#).is_err());
        assert_eq!(
            serde_json::from_str::<VoteState>("8").unwrap(),
            VoteState::Voted(8)
        );
    }
}
