//! Tournament coordination: registry, matches, bracket and the orchestrator

pub mod bracket;
pub mod r#match;
pub mod orchestrator;
pub mod registry;
pub mod service;

pub use bracket::Bracket;
pub use orchestrator::{Departure, Tournament, TournamentOutcome, TournamentStatus};
pub use r#match::{Match, MatchId, Resolution};
pub use registry::{DeliveryError, Outbound, OutboundQueue, PlayerLink, PlayerRegistry};
pub use service::{ServiceError, TournamentCommand, TournamentHandle, TournamentService};

/// Participant identity, assigned monotonically at join
pub type PlayerId = u64;

/// Participant-facing errors. The display string is what the sender is told.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TournamentError {
    #[error("Tournament is already in progress.")]
    TournamentInProgress,

    #[error("You are not in a match.")]
    NotInMatch,

    #[error("You have already made your choice.")]
    AlreadyChosen,

    #[error("Game not found.")]
    GameNotFound,
}
