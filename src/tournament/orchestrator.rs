//! Tournament state machine: joins, bracket, live matches and advancement
//!
//! Every method is a bounded, synchronous transition. The owner (see
//! [`super::service`]) serializes calls so no two transitions interleave.

use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::ws::protocol::{Choice, MatchOutcome, ServerMsg, OPPONENT_DISCONNECTED};

use super::bracket::Bracket;
use super::r#match::{Match, MatchId, Resolution};
use super::registry::{PlayerLink, PlayerRegistry};
use super::{PlayerId, TournamentError};

const CHAMPION_MESSAGE: &str = "You are the tournament champion!";

/// How a tournament finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TournamentOutcome {
    Champion(PlayerId),
    /// Every participant left before a champion emerged
    Abandoned,
}

/// A registered participant was removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Departure {
    /// Set when the departure ended the tournament
    pub outcome: Option<TournamentOutcome>,
}

/// Point-in-time summary for health reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TournamentStatus {
    pub players: usize,
    pub live_matches: usize,
    pub in_progress: bool,
}

/// Process-wide tournament state
#[derive(Debug)]
pub struct Tournament {
    registry: PlayerRegistry,
    bracket: Option<Bracket>,
    matches: HashMap<MatchId, Match>,
    /// Map of player -> current match
    player_matches: HashMap<PlayerId, MatchId>,
    next_match_id: MatchId,
    in_progress: bool,
    min_players: usize,
}

impl Tournament {
    pub fn new(min_players: usize) -> Self {
        Self {
            registry: PlayerRegistry::new(),
            bracket: None,
            matches: HashMap::new(),
            player_matches: HashMap::new(),
            next_match_id: 1,
            in_progress: false,
            min_players: min_players.max(2),
        }
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress
    }

    pub fn player_count(&self) -> usize {
        self.registry.len()
    }

    #[cfg(test)]
    pub(crate) fn bracket(&self) -> Option<&Bracket> {
        self.bracket.as_ref()
    }

    pub fn current_match(&self, player: PlayerId) -> Option<&Match> {
        self.player_matches
            .get(&player)
            .and_then(|id| self.matches.get(id))
    }

    /// Deliver a message to one participant, e.g. an error for their last action
    pub fn notify(&self, player: PlayerId, msg: ServerMsg) -> bool {
        self.registry.notify(player, msg)
    }

    /// Whether an elapsed start timer should begin a tournament now
    pub fn can_start(&self) -> bool {
        !self.in_progress && self.registry.len() >= self.min_players
    }

    pub fn status(&self) -> TournamentStatus {
        TournamentStatus {
            players: self.registry.len(),
            live_matches: self.matches.len(),
            in_progress: self.in_progress,
        }
    }

    /// Register a new participant. Rejected while a tournament is running;
    /// the caller is then expected to close the connection.
    pub fn join(&mut self, link: PlayerLink) -> Result<PlayerId, TournamentError> {
        if self.in_progress {
            return Err(TournamentError::TournamentInProgress);
        }
        let id = self.registry.register(link);
        info!(player_id = id, players = self.registry.len(), "Player joined");
        self.registry.broadcast_count();
        Ok(id)
    }

    /// Remove a participant. A live match is forfeited to the opponent,
    /// who advances through the bracket. `None` if the identity was not
    /// registered, in which case nothing changed.
    pub fn leave(&mut self, player: PlayerId) -> Option<Departure> {
        self.registry.remove(player)?;
        info!(player_id = player, players = self.registry.len(), "Player left");
        self.registry.broadcast_count();

        if !self.in_progress {
            return Some(Departure::default());
        }

        if let Some(game) = self.take_match(player) {
            if let Some(opponent) = game.opponent_of(player) {
                self.registry.notify(
                    opponent,
                    ServerMsg::GameResult {
                        result: MatchOutcome::Win,
                        your_choice: game.choice_of(opponent),
                        opponent_choice: None,
                        note: OPPONENT_DISCONNECTED.to_string(),
                    },
                );
                info!(
                    match_id = game.id(),
                    winner = opponent,
                    loser = player,
                    "Match forfeited by disconnect"
                );
                self.advance(opponent, player);
            }
        }

        Some(Departure {
            outcome: self.progress(),
        })
    }

    /// Record a hand for the sender's current match
    pub fn submit_choice(
        &mut self,
        player: PlayerId,
        choice: Choice,
    ) -> Result<Option<TournamentOutcome>, TournamentError> {
        let match_id = *self
            .player_matches
            .get(&player)
            .ok_or(TournamentError::NotInMatch)?;
        let game = self
            .matches
            .get_mut(&match_id)
            .ok_or(TournamentError::GameNotFound)?;

        match game.submit(player, choice)? {
            Resolution::Waiting => {
                debug!(match_id, player_id = player, "Choice recorded, waiting for opponent");
                Ok(None)
            }
            Resolution::Tie {
                players: [a, b],
                choice,
            } => {
                debug!(match_id, choice = %choice, ties = game.ties(), "Tie, asking for a re-vote");
                self.registry
                    .notify(a, ServerMsg::TieBreak { opponent_choice: choice });
                self.registry
                    .notify(b, ServerMsg::TieBreak { opponent_choice: choice });
                Ok(None)
            }
            Resolution::Decided {
                winner,
                loser,
                winner_choice,
                loser_choice,
            } => {
                self.take_match(player);
                info!(match_id, winner, loser, "Match resolved");
                self.registry.notify(
                    winner,
                    ServerMsg::MatchResult {
                        result: MatchOutcome::Win,
                        your_choice: winner_choice,
                        opponent_choice: loser_choice,
                    },
                );
                self.registry.notify(
                    loser,
                    ServerMsg::MatchResult {
                        result: MatchOutcome::Lose,
                        your_choice: loser_choice,
                        opponent_choice: winner_choice,
                    },
                );
                self.advance(winner, loser);
                Ok(self.progress())
            }
        }
    }

    /// Shuffle the registered participants and begin
    pub fn start<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<TournamentOutcome> {
        let mut order = self.registry.ids();
        order.shuffle(rng);
        self.begin(order)
    }

    /// Begin a tournament with an already seeded order
    pub fn begin(&mut self, order: Vec<PlayerId>) -> Option<TournamentOutcome> {
        if self.in_progress {
            warn!("Start requested while a tournament is running");
            return None;
        }
        if order.len() < self.min_players {
            warn!(players = order.len(), "Not enough players to start");
            return None;
        }

        info!(players = ?order, "Starting tournament");
        self.bracket = Bracket::build(&order);
        self.in_progress = true;
        self.registry
            .broadcast(&ServerMsg::TournamentStart { players: order });

        let outcome = self.progress();
        if outcome.is_none() {
            self.notify_first_round_byes();
        }
        outcome
    }

    /// Tell every seated player without a first-round match that they have
    /// a bye. Everyone seated is registered at this point, so `progress`
    /// cannot have issued a walkover and nobody hears `matchBye` twice.
    fn notify_first_round_byes(&self) {
        let Some(bracket) = &self.bracket else {
            return;
        };
        for id in bracket.leaves() {
            if !self.player_matches.contains_key(&id) {
                debug!(player_id = id, "First-round bye");
                self.registry.notify(id, ServerMsg::bye());
            }
        }
    }

    /// Start every ready pairing; declare a champion once the bracket collapses
    fn progress(&mut self) -> Option<TournamentOutcome> {
        loop {
            if self.registry.is_empty() {
                return Some(self.abandon());
            }
            let bracket = self.bracket.as_ref()?;
            if let Some(champion) = bracket.champion() {
                return Some(self.finish(champion));
            }

            let player_matches = &self.player_matches;
            let (a, b) = bracket.find_next_ready_match(|id| player_matches.contains_key(&id))?;

            match (self.registry.contains(a), self.registry.contains(b)) {
                (true, true) => self.start_match(a, b),
                (true, false) => self.walkover(a, b),
                (false, true) => self.walkover(b, a),
                (false, false) => self.advance(a, b),
            }
        }
    }

    fn start_match(&mut self, a: PlayerId, b: PlayerId) {
        let id = self.next_match_id;
        self.next_match_id += 1;
        self.matches.insert(id, Match::new(id, a, b));
        self.player_matches.insert(a, id);
        self.player_matches.insert(b, id);
        info!(match_id = id, player_a = a, player_b = b, "Match started");

        self.registry.notify(a, ServerMsg::MatchStart { opponent_id: b });
        self.registry.notify(b, ServerMsg::MatchStart { opponent_id: a });
    }

    /// Opponent left before the pairing could be played
    fn walkover(&mut self, present: PlayerId, absent: PlayerId) {
        info!(winner = present, loser = absent, "Walkover, opponent already gone");
        self.registry.notify(present, ServerMsg::bye());
        self.advance(present, absent);
    }

    fn advance(&mut self, winner: PlayerId, loser: PlayerId) {
        if let Some(bracket) = self.bracket.take() {
            self.bracket = Some(bracket.advance(winner, loser));
        }
    }

    fn take_match(&mut self, player: PlayerId) -> Option<Match> {
        let id = self.player_matches.remove(&player)?;
        let game = self.matches.remove(&id)?;
        for p in game.players() {
            self.player_matches.remove(&p);
        }
        Some(game)
    }

    fn finish(&mut self, champion: PlayerId) -> TournamentOutcome {
        info!(champion_id = champion, "Tournament finished");
        self.registry.notify(
            champion,
            ServerMsg::TournamentEnd {
                message: Some(CHAMPION_MESSAGE.to_string()),
                champion_id: None,
            },
        );
        self.registry.broadcast(&ServerMsg::TournamentEnd {
            message: None,
            champion_id: Some(champion),
        });
        self.reset();
        TournamentOutcome::Champion(champion)
    }

    fn abandon(&mut self) -> TournamentOutcome {
        info!("Tournament abandoned, no players left");
        self.reset();
        TournamentOutcome::Abandoned
    }

    fn reset(&mut self) {
        self.registry.close_all();
        self.bracket = None;
        self.matches.clear();
        self.player_matches.clear();
        self.in_progress = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tournament::registry::{Outbound, OutboundQueue};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tokio_test::{assert_err, assert_ok};

    struct Seat {
        id: PlayerId,
        rx: OutboundQueue,
    }

    impl Seat {
        /// Everything delivered since the last drain
        fn drain(&mut self) -> Vec<Outbound> {
            let mut out = Vec::new();
            while let Some(item) = self.rx.try_recv() {
                out.push(item);
            }
            out
        }

        fn messages(&mut self) -> Vec<ServerMsg> {
            self.drain()
                .into_iter()
                .filter_map(|o| match o {
                    Outbound::Message(m) => Some(m),
                    Outbound::Close => None,
                })
                .collect()
        }
    }

    fn left(outcome: Option<TournamentOutcome>) -> Option<Departure> {
        Some(Departure { outcome })
    }

    fn seat(t: &mut Tournament) -> Seat {
        let (link, rx) = PlayerLink::channel(64);
        let id = assert_ok!(t.join(link));
        Seat { id, rx }
    }

    fn seats(t: &mut Tournament, n: usize) -> Vec<Seat> {
        let mut seats: Vec<Seat> = (0..n).map(|_| seat(t)).collect();
        for s in &mut seats {
            s.drain();
        }
        seats
    }

    fn win(mine: Choice, theirs: Choice) -> ServerMsg {
        ServerMsg::MatchResult {
            result: MatchOutcome::Win,
            your_choice: mine,
            opponent_choice: theirs,
        }
    }

    fn lose(mine: Choice, theirs: Choice) -> ServerMsg {
        ServerMsg::MatchResult {
            result: MatchOutcome::Lose,
            your_choice: mine,
            opponent_choice: theirs,
        }
    }

    #[test]
    fn join_broadcasts_count() {
        let mut t = Tournament::new(2);
        let mut first = seat(&mut t);
        let _second = seat(&mut t);

        assert_eq!(
            first.messages(),
            vec![
                ServerMsg::PlayerCount { count: 1 },
                ServerMsg::PlayerCount { count: 2 }
            ]
        );
        assert!(t.can_start());
    }

    #[test]
    fn join_rejected_while_running() {
        let mut t = Tournament::new(2);
        let s = seats(&mut t, 2);
        t.begin(vec![s[0].id, s[1].id]);

        let (link, _rx) = PlayerLink::channel(4);
        assert_eq!(t.join(link), Err(TournamentError::TournamentInProgress));
        assert_eq!(t.player_count(), 2);
    }

    #[test]
    fn begin_needs_minimum_players() {
        let mut t = Tournament::new(2);
        let s = seats(&mut t, 1);
        assert!(!t.can_start());
        assert_eq!(t.begin(vec![s[0].id]), None);
        assert!(!t.is_in_progress());
    }

    #[test]
    fn three_player_scenario_with_bye() {
        let mut t = Tournament::new(2);
        let mut s = seats(&mut t, 3);
        let (p1, p2, p3) = (s[0].id, s[1].id, s[2].id);

        assert_eq!(t.begin(vec![p1, p2, p3]), None);

        let start = ServerMsg::TournamentStart {
            players: vec![p1, p2, p3],
        };
        assert_eq!(s[0].messages(), vec![start.clone(), ServerMsg::bye()]);
        assert_eq!(
            s[1].messages(),
            vec![start.clone(), ServerMsg::MatchStart { opponent_id: p3 }]
        );
        assert_eq!(
            s[2].messages(),
            vec![start, ServerMsg::MatchStart { opponent_id: p2 }]
        );

        assert_eq!(
            t.submit_choice(p1, Choice::Rock),
            Err(TournamentError::NotInMatch)
        );
        assert_eq!(t.submit_choice(p2, Choice::Rock), Ok(None));
        assert_eq!(t.submit_choice(p3, Choice::Scissors), Ok(None));

        assert_eq!(
            s[1].messages(),
            vec![
                win(Choice::Rock, Choice::Scissors),
                ServerMsg::MatchStart { opponent_id: p1 }
            ]
        );
        assert_eq!(s[2].messages(), vec![lose(Choice::Scissors, Choice::Rock)]);
        assert_eq!(
            s[0].messages(),
            vec![ServerMsg::MatchStart { opponent_id: p2 }]
        );

        assert_ok!(t.submit_choice(p1, Choice::Paper));
        let outcome = assert_ok!(t.submit_choice(p2, Choice::Scissors));
        assert_eq!(outcome, Some(TournamentOutcome::Champion(p2)));

        let end = ServerMsg::TournamentEnd {
            message: None,
            champion_id: Some(p2),
        };
        assert_eq!(
            s[1].drain(),
            vec![
                Outbound::Message(win(Choice::Scissors, Choice::Paper)),
                Outbound::Message(ServerMsg::TournamentEnd {
                    message: Some(CHAMPION_MESSAGE.to_string()),
                    champion_id: None,
                }),
                Outbound::Message(end.clone()),
                Outbound::Close,
            ]
        );
        assert_eq!(
            s[0].drain(),
            vec![
                Outbound::Message(lose(Choice::Paper, Choice::Scissors)),
                Outbound::Message(end.clone()),
                Outbound::Close,
            ]
        );
        assert_eq!(s[2].drain(), vec![Outbound::Message(end), Outbound::Close]);

        assert!(!t.is_in_progress());
        assert_eq!(t.player_count(), 0);
    }

    #[test]
    fn tie_break_then_resolution() {
        let mut t = Tournament::new(2);
        let mut s = seats(&mut t, 2);
        let (p1, p2) = (s[0].id, s[1].id);
        t.begin(vec![p1, p2]);
        s[0].drain();
        s[1].drain();

        assert_ok!(t.submit_choice(p1, Choice::Paper));
        assert_eq!(t.submit_choice(p2, Choice::Paper), Ok(None));
        let tie = ServerMsg::TieBreak {
            opponent_choice: Choice::Paper,
        };
        assert_eq!(s[0].messages(), vec![tie.clone()]);
        assert_eq!(s[1].messages(), vec![tie]);
        assert_eq!(t.current_match(p1).map(|m| m.submitted()), Some(0));

        assert_ok!(t.submit_choice(p1, Choice::Rock));
        assert_eq!(
            t.submit_choice(p1, Choice::Paper),
            Err(TournamentError::AlreadyChosen)
        );
        let outcome = assert_ok!(t.submit_choice(p2, Choice::Scissors));
        assert_eq!(outcome, Some(TournamentOutcome::Champion(p1)));
        assert_eq!(s[0].messages()[0], win(Choice::Rock, Choice::Scissors));
        assert_eq!(s[1].messages()[0], lose(Choice::Scissors, Choice::Rock));
    }

    #[test]
    fn disconnect_forfeits_and_advances_once() {
        let mut t = Tournament::new(2);
        let mut s = seats(&mut t, 4);
        let ids: Vec<PlayerId> = s.iter().map(|x| x.id).collect();
        t.begin(ids.clone());
        for x in &mut s {
            x.drain();
        }
        assert_eq!(t.status().live_matches, 2);

        assert_ok!(t.submit_choice(ids[0], Choice::Rock));
        assert_eq!(t.leave(ids[1]), left(None));

        let forfeits: Vec<ServerMsg> = s[0]
            .messages()
            .into_iter()
            .filter(|m| matches!(m, ServerMsg::GameResult { .. }))
            .collect();
        assert_eq!(
            forfeits,
            vec![ServerMsg::GameResult {
                result: MatchOutcome::Win,
                your_choice: Some(Choice::Rock),
                opponent_choice: None,
                note: OPPONENT_DISCONNECTED.to_string(),
            }]
        );
        assert!(t.current_match(ids[0]).is_none());
        assert_eq!(t.status().live_matches, 1);
        assert!(!t.bracket().unwrap().contains(ids[1]));

        // The other semifinal decides the final pairing
        assert_ok!(t.submit_choice(ids[2], Choice::Paper));
        assert_ok!(t.submit_choice(ids[3], Choice::Rock));
        assert_eq!(
            t.current_match(ids[0]).map(|m| m.opponent_of(ids[0])),
            Some(Some(ids[2]))
        );
    }

    #[test]
    fn forfeit_in_final_crowns_survivor() {
        let mut t = Tournament::new(2);
        let mut s = seats(&mut t, 2);
        let (p1, p2) = (s[0].id, s[1].id);
        t.begin(vec![p1, p2]);
        s[0].drain();

        assert_eq!(t.leave(p2), left(Some(TournamentOutcome::Champion(p1))));
        let msgs = s[0].messages();
        assert_eq!(msgs[0], ServerMsg::PlayerCount { count: 1 });
        assert!(matches!(msgs[1], ServerMsg::GameResult { your_choice: None, .. }));
        assert_eq!(
            msgs.last(),
            Some(&ServerMsg::TournamentEnd {
                message: None,
                champion_id: Some(p1)
            })
        );
    }

    #[test]
    fn departed_bye_player_gives_walkover() {
        let mut t = Tournament::new(2);
        let mut s = seats(&mut t, 3);
        let (p1, p2, p3) = (s[0].id, s[1].id, s[2].id);
        t.begin(vec![p1, p2, p3]);
        s[1].drain();

        assert_eq!(t.leave(p1), left(None));
        assert_ok!(t.submit_choice(p2, Choice::Scissors));
        let outcome = assert_ok!(t.submit_choice(p3, Choice::Paper));
        assert_eq!(outcome, Some(TournamentOutcome::Champion(p2)));

        let msgs = s[1].messages();
        assert_eq!(msgs[0], ServerMsg::PlayerCount { count: 2 });
        assert_eq!(msgs[1], win(Choice::Scissors, Choice::Paper));
        assert_eq!(msgs[2], ServerMsg::bye());
    }

    #[test]
    fn departures_crown_last_player_and_reopen() {
        let mut t = Tournament::new(2);
        let s = seats(&mut t, 2);
        t.begin(vec![s[0].id, s[1].id]);

        // First leave crowns the survivor and closes every connection
        assert_eq!(t.leave(s[0].id), left(Some(TournamentOutcome::Champion(s[1].id))));
        assert!(!t.is_in_progress());

        let mut t = Tournament::new(2);
        let s = seats(&mut t, 4);
        t.begin(s.iter().map(|x| x.id).collect());
        assert_eq!(t.leave(s[0].id), left(None));
        assert_eq!(t.leave(s[2].id), left(None));
        // Both forfeits paired the survivors; this departure settles the final
        assert_eq!(t.leave(s[1].id), left(Some(TournamentOutcome::Champion(s[3].id))));
        assert!(!t.is_in_progress());
        let (link, _rx) = PlayerLink::channel(4);
        assert_ok!(t.join(link));
    }

    #[test]
    fn each_unpaired_player_gets_one_bye() {
        let mut t = Tournament::new(2);
        let mut s = seats(&mut t, 6);
        let order: Vec<PlayerId> = s.iter().map(|x| x.id).collect();
        assert_eq!(t.begin(order), None);

        let byes: Vec<usize> = s
            .iter_mut()
            .map(|x| {
                x.messages()
                    .iter()
                    .filter(|m| **m == ServerMsg::bye())
                    .count()
            })
            .collect();
        // halves of three put the first of each half out on a bye
        assert_eq!(byes, vec![1, 0, 0, 1, 0, 0]);
        assert_eq!(t.status().live_matches, 2);
    }

    #[test]
    fn unknown_leave_is_ignored() {
        let mut t = Tournament::new(2);
        let mut s = seat(&mut t);
        s.drain();

        assert_eq!(t.leave(42), None);
        assert!(s.drain().is_empty());
        assert_err!(t.submit_choice(42, Choice::Rock));

        assert_eq!(t.leave(s.id), left(None));
        assert_eq!(t.leave(s.id), None);
    }

    #[test]
    fn random_start_seats_everyone() {
        let mut t = Tournament::new(2);
        let s = seats(&mut t, 5);
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(t.start(&mut rng), None);

        let mut leaves = t.bracket().unwrap().leaves();
        leaves.sort_unstable();
        assert_eq!(leaves, s.iter().map(|x| x.id).collect::<Vec<_>>());
        assert_eq!(t.status().live_matches, 2);
    }
}
