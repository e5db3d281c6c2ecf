//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::tournament::TournamentHandle;

use super::sessions::SessionTracker;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub tournament: TournamentHandle,
    pub sessions: SessionTracker,
}

impl AppState {
    pub fn new(config: Config, tournament: TournamentHandle) -> Self {
        Self {
            config: Arc::new(config),
            tournament,
            sessions: SessionTracker::new(),
        }
    }
}
