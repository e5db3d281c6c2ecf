//! Pairwise match state and resolution

use std::collections::HashMap;

use crate::ws::protocol::Choice;

use super::{PlayerId, TournamentError};

pub type MatchId = u64;

/// Match phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    /// Zero or one hand submitted in the current round
    Pending,
    /// Winner determined; the match is about to be discarded
    Resolved,
}

/// What happened after a hand was recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Still waiting for the other hand
    Waiting,
    /// Equal hands; both were cleared for a re-vote
    Tie {
        players: [PlayerId; 2],
        choice: Choice,
    },
    Decided {
        winner: PlayerId,
        loser: PlayerId,
        winner_choice: Choice,
        loser_choice: Choice,
    },
}

/// One live contest between two participants
#[derive(Debug, Clone)]
pub struct Match {
    id: MatchId,
    players: [PlayerId; 2],
    choices: HashMap<PlayerId, Choice>,
    phase: MatchPhase,
    ties: u32,
}

impl Match {
    pub fn new(id: MatchId, first: PlayerId, second: PlayerId) -> Self {
        Self {
            id,
            players: [first, second],
            choices: HashMap::with_capacity(2),
            phase: MatchPhase::Pending,
            ties: 0,
        }
    }

    pub fn id(&self) -> MatchId {
        self.id
    }

    pub fn players(&self) -> [PlayerId; 2] {
        self.players
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    /// Number of tie rounds played so far
    pub fn ties(&self) -> u32 {
        self.ties
    }

    pub fn contains(&self, player: PlayerId) -> bool {
        self.players.contains(&player)
    }

    pub fn opponent_of(&self, player: PlayerId) -> Option<PlayerId> {
        match self.players {
            [a, b] if a == player => Some(b),
            [a, b] if b == player => Some(a),
            _ => None,
        }
    }

    pub fn choice_of(&self, player: PlayerId) -> Option<Choice> {
        self.choices.get(&player).copied()
    }

    pub fn submitted(&self) -> usize {
        self.choices.len()
    }

    /// Record a hand and resolve the round once both are in
    pub fn submit(&mut self, player: PlayerId, choice: Choice) -> Result<Resolution, TournamentError> {
        if !self.contains(player) {
            return Err(TournamentError::NotInMatch);
        }
        if self.phase == MatchPhase::Resolved {
            return Err(TournamentError::GameNotFound);
        }
        if self.choices.contains_key(&player) {
            return Err(TournamentError::AlreadyChosen);
        }
        self.choices.insert(player, choice);
        Ok(self.resolve())
    }

    fn resolve(&mut self) -> Resolution {
        let [first, second] = self.players;
        let (Some(a), Some(b)) = (self.choice_of(first), self.choice_of(second)) else {
            return Resolution::Waiting;
        };

        if a == b {
            self.choices.clear();
            self.ties += 1;
            return Resolution::Tie {
                players: self.players,
                choice: a,
            };
        }

        self.phase = MatchPhase::Resolved;
        if a.beats(b) {
            Resolution::Decided {
                winner: first,
                loser: second,
                winner_choice: a,
                loser_choice: b,
            }
        } else {
            Resolution::Decided {
                winner: second,
                loser: first,
                winner_choice: b,
                loser_choice: a,
            }
        }
    }
}
