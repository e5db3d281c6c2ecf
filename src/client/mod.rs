//! Client-side session: renders server messages and decides when to play

use rand::seq::SliceRandom;
use rand::Rng;

use crate::tournament::PlayerId;
use crate::ws::protocol::{Choice, MatchOutcome, ServerMsg};

/// What the client should do after a server message
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Reaction {
    /// Lines to show the user
    pub lines: Vec<String>,
    /// A hand is now expected from this client
    pub choose: bool,
}

/// Tracks whether the client is currently in a match
#[derive(Debug, Default)]
pub struct ClientSession {
    opponent: Option<PlayerId>,
}

impl ClientSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_match(&self) -> bool {
        self.opponent.is_some()
    }

    #[cfg(test)]
    pub(crate) fn opponent(&self) -> Option<PlayerId> {
        self.opponent
    }

    pub fn handle(&mut self, msg: &ServerMsg) -> Reaction {
        let mut reaction = Reaction::default();
        let lines = &mut reaction.lines;

        match msg {
            ServerMsg::PlayerCount { count } => lines.push(format!("Players connected: {count}")),
            ServerMsg::TournamentStart { players } => {
                lines.push(format!("Tournament starting with players: {players:?}"))
            }
            ServerMsg::MatchStart { opponent_id } => {
                self.opponent = Some(*opponent_id);
                lines.push(format!("Match started against player {opponent_id}"));
                reaction.choose = true;
            }
            ServerMsg::MatchBye { message } => lines.push(message.clone()),
            ServerMsg::TieBreak { opponent_choice } => {
                lines.push(format!("Tie! Opponent chose {opponent_choice}. Choose again."));
                reaction.choose = self.in_match();
            }
            ServerMsg::MatchResult {
                result,
                your_choice,
                opponent_choice,
            } => {
                self.opponent = None;
                lines.push(format!("Match result: {}", outcome_label(*result)));
                lines.push(format!("Your choice: {your_choice} | Opponent: {opponent_choice}"));
            }
            ServerMsg::GameResult {
                result,
                your_choice,
                opponent_choice,
                note,
            } => {
                self.opponent = None;
                lines.push(format!("Game result: {}", outcome_label(*result)));
                lines.push(format!(
                    "Your choice: {} | Opponent: {}",
                    choice_label(*your_choice),
                    choice_label(*opponent_choice)
                ));
                lines.push(format!("Note: {note}"));
            }
            ServerMsg::TournamentEnd {
                message,
                champion_id,
            } => {
                self.opponent = None;
                if let Some(message) = message {
                    lines.push(message.clone());
                }
                if let Some(champion_id) = champion_id {
                    lines.push(format!("Tournament champion: {champion_id}"));
                }
            }
            ServerMsg::Error { message } => lines.push(format!("Server error: {message}")),
        }

        reaction
    }
}

/// Uniformly random hand for non-interactive play
pub fn random_choice<R: Rng + ?Sized>(rng: &mut R) -> Choice {
    *Choice::ALL.choose(rng).unwrap_or(&Choice::Rock)
}

fn outcome_label(outcome: MatchOutcome) -> &'static str {
    match outcome {
        MatchOutcome::Win => "WIN",
        MatchOutcome::Lose => "LOSE",
    }
}

fn choice_label(choice: Option<Choice>) -> &'static str {
    choice.map(Choice::as_str).unwrap_or("none")
}
