//! Vote state machine for public translations

use serde::Serialize;

use crate::core::models::VoteType;

/// Result of applying a vote request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VoteOutcome {
    /// The caller's vote after the request
    pub state: Option<VoteType>,
    /// Change to the translation's upvote count
    pub delta: i64,
}

fn weight(vote: VoteType) -> i64 {
    match vote {
        VoteType::Up => 1,
        VoteType::Down => -1,
    }
}

/// Repeating a vote removes it; the opposite vote swings the count by two.
pub fn apply_vote(existing: Option<VoteType>, requested: VoteType) -> VoteOutcome {
    match existing {
        None => VoteOutcome {
            state: Some(requested),
            delta: weight(requested),
        },
        Some(current) if current == requested => VoteOutcome {
            state: None,
            delta: -weight(current),
        },
        Some(current) => VoteOutcome {
            state: Some(requested),
            delta: weight(requested) - weight(current),
        },
    }
}
