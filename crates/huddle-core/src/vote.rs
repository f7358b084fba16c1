//! Vote collection and statistics for the active work item.

use crate::store::{EstimationRecord, Participant};
use huddle_protocol::{Statistics, VoteState};
use std::collections::{BTreeMap, HashMap};
use tracing::trace;

/// Per-session vote map.
///
/// Keys are fixed by the roster the session was created with. Votes from
/// identities outside the roster are ignored.
#[derive(Debug, Clone, Default)]
pub struct VoteBoard {
    /// Email -> vote for the active item.
    votes: BTreeMap<String, VoteState>,
    /// Email -> storage id, used when persisting votes.
    participant_ids: HashMap<String, u64>,
}

impl VoteBoard {
    /// Create a board with every participant in the `NotVoted` state.
    #[must_use]
    pub fn new(roster: &[Participant]) -> Self {
        let mut board = Self::default();
        for participant in roster {
            board
                .votes
                .insert(participant.email.clone(), VoteState::NotVoted);
            board
                .participant_ids
                .insert(participant.email.clone(), participant.id);
        }
        board
    }

    /// Number of participants on the board.
    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.votes.len()
    }

    /// Whether `email` is on the roster.
    #[must_use]
    pub fn is_participant(&self, email: &str) -> bool {
        self.votes.contains_key(email)
    }

    /// Record or replace a vote.
    ///
    /// Returns `false` and changes nothing if `email` is not on the roster.
    pub fn record_vote(&mut self, email: &str, value: u32) -> bool {
        match self.votes.get_mut(email) {
            Some(state) => {
                *state = VoteState::Voted(value);
                trace!(email, value, "Vote recorded");
                true
            }
            None => false,
        }
    }

    /// Current vote of a participant.
    #[must_use]
    pub fn vote(&self, email: &str) -> Option<VoteState> {
        self.votes.get(email).copied()
    }

    /// Current votes for broadcast.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, VoteState> {
        self.votes.clone()
    }

    /// Turn the cast votes into records for `work_item_id`.
    ///
    /// Participants who have not voted are left out. The vote map is not
    /// cleared.
    #[must_use]
    pub fn finalize(&self, work_item_id: u64) -> Vec<EstimationRecord> {
        self.votes
            .iter()
            .filter_map(|(email, state)| {
                let estimate = state.value()?;
                let participant_id = *self.participant_ids.get(email)?;
                Some(EstimationRecord {
                    participant_id,
                    work_item_id,
                    estimate,
                })
            })
            .collect()
    }

    /// Min, max and mean over cast votes, or `None` if nobody voted.
    ///
    /// The mean is a plain `f64` division with no rounding.
    #[must_use]
    pub fn statistics(&self) -> Option<Statistics> {
        let values: Vec<u32> = self.votes.values().filter_map(|v| v.value()).collect();
        let min = *values.iter().min()?;
        let max = *values.iter().max()?;
        let sum: u64 = values.iter().map(|&v| u64::from(v)).sum();
        Some(Statistics {
            min,
            max,
            mean: sum as f64 / values.len() as f64,
        })
    }

    /// Put every participant back to `NotVoted`.
    pub fn reset(&mut self) {
        for state in self.votes.values_mut() {
            *state = VoteState::NotVoted;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_protocol::Role;

    fn roster() -> Vec<Participant> {
        ["a@example.com", "b@example.com", "c@example.com"]
            .iter()
            .enumerate()
            .map(|(i, email)| Participant {
                id: i as u64 + 1,
                email: (*email).to_string(),
                role: Role::Player,
            })
            .collect()
    }

    #[test]
    fn test_new_board_has_nobody_voted() {
        let board = VoteBoard::new(&roster());
        assert_eq!(board.participant_count(), 3);
        assert!(board
            .snapshot()
            .values()
            .all(|v| *v == VoteState::NotVoted));
        assert_eq!(board.statistics(), None);
    }

    #[test]
    fn test_last_vote_wins() {
        let mut board = VoteBoard::new(&roster());

        assert!(board.record_vote("a@example.com", 1));
        assert!(board.record_vote("a@example.com", 8));
        assert!(board.record_vote("b@example.com", 2));
        assert!(board.record_vote("a@example.com", 5));

        let snapshot = board.snapshot();
        assert_eq!(snapshot["a@example.com"], VoteState::Voted(5));
        assert_eq!(snapshot["b@example.com"], VoteState::Voted(2));
        assert_eq!(snapshot["c@example.com"], VoteState::NotVoted);
    }

    #[test]
    fn test_unknown_voter_ignored() {
        let mut board = VoteBoard::new(&roster());
        assert!(!board.record_vote("intruder@example.com", 13));
        assert!(!board.is_participant("intruder@example.com"));
        assert_eq!(board.participant_count(), 3);
    }

    #[test]
    fn test_statistics() {
        let mut board = VoteBoard::new(&roster());
        board.record_vote("a@example.com", 3);
        board.record_vote("b@example.com", 5);

        let stats = board.statistics().unwrap();
        assert_eq!(stats.min, 3);
        assert_eq!(stats.max, 5);
        assert!((stats.mean - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_statistics_mean_not_rounded() {
        let mut board = VoteBoard::new(&roster());
        board.record_vote("a@example.com", 1);
        board.record_vote("b@example.com", 2);
        board.record_vote("c@example.com", 2);

        let stats = board.statistics().unwrap();
        assert!((stats.mean - 5.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_finalize_skips_missing_votes() {
        let mut board = VoteBoard::new(&roster());
        board.record_vote("a@example.com", 5);

        let records = board.finalize(100);
        assert_eq!(
            records,
            vec![EstimationRecord {
                participant_id: 1,
                work_item_id: 100,
                estimate: 5,
            }]
        );
        // finalize leaves the map alone
        assert_eq!(board.vote("a@example.com"), Some(VoteState::Voted(5)));
    }

    #[test]
    fn test_reset() {
        let mut board = VoteBoard::new(&roster());
        board.record_vote("a@example.com", 5);
        board.reset();
        assert_eq!(board.vote("a@example.com"), Some(VoteState::NotVoted));
        assert!(board.finalize(1).is_empty());
    }
}
