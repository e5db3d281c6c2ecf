//! Tournament service - the single task that owns tournament state

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::TournamentSettings;
use crate::ws::protocol::{Choice, ServerMsg};

use super::orchestrator::{Tournament, TournamentOutcome, TournamentStatus};
use super::registry::PlayerLink;
use super::{PlayerId, TournamentError};

/// Inbound queue depth for the service
const COMMAND_QUEUE: usize = 256;

/// Actions delivered to the tournament service
#[derive(Debug)]
pub enum TournamentCommand {
    Join {
        link: PlayerLink,
        reply: oneshot::Sender<Result<PlayerId, TournamentError>>,
    },
    Choice {
        player: PlayerId,
        choice: Choice,
    },
    Leave {
        player: PlayerId,
    },
    StartTimerElapsed {
        generation: u64,
    },
    Status {
        reply: oneshot::Sender<TournamentStatus>,
    },
}

/// Errors seen by callers of [`TournamentHandle`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Rejected(#[from] TournamentError),

    #[error("tournament service has stopped")]
    Stopped,
}

/// Cloneable sender side used by connection handlers
#[derive(Debug, Clone)]
pub struct TournamentHandle {
    tx: mpsc::Sender<TournamentCommand>,
}

impl TournamentHandle {
    pub async fn join(&self, link: PlayerLink) -> Result<PlayerId, ServiceError> {
        let (reply, rx) = oneshot::channel();
        self.send(TournamentCommand::Join { link, reply }).await?;
        Ok(rx.await.map_err(|_| ServiceError::Stopped)??)
    }

    pub async fn choice(&self, player: PlayerId, choice: Choice) -> Result<(), ServiceError> {
        self.send(TournamentCommand::Choice { player, choice }).await
    }

    pub async fn leave(&self, player: PlayerId) -> Result<(), ServiceError> {
        self.send(TournamentCommand::Leave { player }).await
    }

    pub async fn status(&self) -> Result<TournamentStatus, ServiceError> {
        let (reply, rx) = oneshot::channel();
        self.send(TournamentCommand::Status { reply }).await?;
        rx.await.map_err(|_| ServiceError::Stopped)
    }

    async fn send(&self, cmd: TournamentCommand) -> Result<(), ServiceError> {
        self.tx.send(cmd).await.map_err(|_| ServiceError::Stopped)
    }
}

/// Cancellable countdown before a tournament begins. Every re-arm bumps the
/// generation so a late wake-up from a replaced countdown is ignored.
#[derive(Debug)]
struct StartTimer {
    delay: Duration,
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl StartTimer {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            generation: 0,
            task: None,
        }
    }

    fn cancel(&mut self) {
        self.generation += 1;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn arm(&mut self, tx: mpsc::WeakSender<TournamentCommand>) {
        self.cancel();
        let generation = self.generation;
        let delay = self.delay;
        self.task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(TournamentCommand::StartTimerElapsed { generation }).await;
            }
        }));
    }

    fn is_current(&self, generation: u64) -> bool {
        self.task.is_some() && self.generation == generation
    }
}

impl Drop for StartTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Owns the [`Tournament`] and applies commands one at a time
pub struct TournamentService {
    tournament: Tournament,
    rx: mpsc::Receiver<TournamentCommand>,
    /// Weak so the service still stops once every handle is dropped
    timer_tx: mpsc::WeakSender<TournamentCommand>,
    timer: StartTimer,
    shutdown_on_finish: bool,
}

impl TournamentService {
    pub fn new(settings: &TournamentSettings) -> (Self, TournamentHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        let service = Self {
            tournament: Tournament::new(settings.min_players),
            rx,
            timer_tx: tx.downgrade(),
            timer: StartTimer::new(settings.start_delay),
            shutdown_on_finish: settings.shutdown_on_finish,
        };
        (service, TournamentHandle { tx })
    }

    /// Process commands until every handle is dropped, or until a champion
    /// is declared when configured to shut down after one tournament.
    pub async fn run(mut self) -> Option<TournamentOutcome> {
        info!("Tournament service started");

        while let Some(cmd) = self.rx.recv().await {
            let Some(outcome) = self.apply(cmd) else {
                continue;
            };

            self.timer.cancel();
            match outcome {
                TournamentOutcome::Champion(champion_id) => {
                    info!(champion_id, "Champion declared");
                    if self.shutdown_on_finish {
                        return Some(outcome);
                    }
                }
                TournamentOutcome::Abandoned => {
                    info!("Tournament abandoned");
                }
            }
            info!("Accepting players for the next tournament");
        }

        info!("Tournament service stopped");
        None
    }

    fn apply(&mut self, cmd: TournamentCommand) -> Option<TournamentOutcome> {
        match cmd {
            TournamentCommand::Join { link, reply } => {
                let result = self.tournament.join(link);
                if result.is_ok() {
                    self.reset_timer();
                }
                let _ = reply.send(result);
                None
            }
            TournamentCommand::Choice { player, choice } => {
                match self.tournament.submit_choice(player, choice) {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        debug!(player_id = player, error = %e, "Choice rejected");
                        self.tournament.notify(player, ServerMsg::error(e.to_string()));
                        None
                    }
                }
            }
            TournamentCommand::Leave { player } => {
                let Some(departure) = self.tournament.leave(player) else {
                    debug!(player_id = player, "Leave for unknown player ignored");
                    return None;
                };
                self.reset_timer();
                departure.outcome
            }
            TournamentCommand::StartTimerElapsed { generation } => {
                if !self.timer.is_current(generation) {
                    debug!(generation, "Stale start timer ignored");
                    return None;
                }
                self.timer.cancel();
                if !self.tournament.can_start() {
                    warn!(players = self.tournament.player_count(), "Start timer elapsed but cannot start");
                    return None;
                }
                self.tournament.start(&mut rand::thread_rng())
            }
            TournamentCommand::Status { reply } => {
                let _ = reply.send(self.tournament.status());
                None
            }
        }
    }

    /// Restart the quiet period, or stop it when a start is impossible
    fn reset_timer(&mut self) {
        if self.tournament.can_start() {
            debug!(players = self.tournament.player_count(), "Start timer reset");
            self.timer.arm(self.timer_tx.clone());
        } else {
            self.timer.cancel();
        }
    }
}
