//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tournament::PlayerId;

/// Note attached to a result awarded because the opponent left
pub const OPPONENT_DISCONNECTED: &str = "opponent_disconnected";

/// A hand in rock-paper-scissors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Choice {
    Rock,
    Paper,
    Scissors,
}

impl Choice {
    pub const ALL: [Choice; 3] = [Choice::Rock, Choice::Paper, Choice::Scissors];

    /// Whether this hand defeats `other` (rock > scissors > paper > rock)
    pub fn beats(self, other: Choice) -> bool {
        matches!(
            (self, other),
            (Choice::Rock, Choice::Scissors)
                | (Choice::Scissors, Choice::Paper)
                | (Choice::Paper, Choice::Rock)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Choice::Rock => "rock",
            Choice::Paper => "paper",
            Choice::Scissors => "scissors",
        }
    }
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Choice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rock" => Ok(Choice::Rock),
            "paper" => Ok(Choice::Paper),
            "scissors" => Ok(Choice::Scissors),
            other => Err(format!("unknown choice: {other}")),
        }
    }
}

/// Personal outcome of a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchOutcome {
    Win,
    Lose,
}

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMsg {
    /// Register for the next tournament
    Join,

    /// Submit a hand for the current match
    Choice { choice: Choice },
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMsg {
    /// Number of registered players changed
    PlayerCount { count: usize },

    /// Tournament is starting; players listed in seeded order
    TournamentStart { players: Vec<PlayerId> },

    /// A match against `opponent_id` has started
    #[serde(rename_all = "camelCase")]
    MatchStart { opponent_id: PlayerId },

    /// No opponent this round, the player advances automatically
    MatchBye { message: String },

    /// Both hands were equal; choose again
    #[serde(rename_all = "camelCase")]
    TieBreak { opponent_choice: Choice },

    /// Match resolved by play
    #[serde(rename_all = "camelCase")]
    MatchResult {
        result: MatchOutcome,
        your_choice: Choice,
        opponent_choice: Choice,
    },

    /// Match resolved by forfeit (opponent disconnected)
    #[serde(rename_all = "camelCase")]
    GameResult {
        result: MatchOutcome,
        your_choice: Option<Choice>,
        opponent_choice: Option<Choice>,
        note: String,
    },

    /// Tournament is over
    #[serde(rename_all = "camelCase")]
    TournamentEnd {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        champion_id: Option<PlayerId>,
    },

    /// Error message
    Error { message: String },
}

impl ServerMsg {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn bye() -> Self {
        Self::MatchBye {
            message: "You received a bye and advance to next round.".to_string(),
        }
    }
}
