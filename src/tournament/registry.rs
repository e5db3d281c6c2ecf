//! Connected participants and their outbound links

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tracing::debug;

use crate::ws::protocol::ServerMsg;

use super::PlayerId;

/// Item delivered to a participant's connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Message(ServerMsg),
    /// Close the underlying connection after flushing earlier messages
    Close,
}

/// Recipient could not be reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("outbound queue is full")]
    QueueFull,

    #[error("connection is closed")]
    Closed,
}

impl<T> From<TrySendError<T>> for DeliveryError {
    fn from(err: TrySendError<T>) -> Self {
        match err {
            TrySendError::Full(_) => DeliveryError::QueueFull,
            TrySendError::Closed(_) => DeliveryError::Closed,
        }
    }
}

/// Fire-and-forget handle to a participant's connection.
///
/// Messages go through a bounded queue and are dropped when it is full.
/// Closing is a separate flag, so a backed-up queue can never swallow it.
#[derive(Debug, Clone)]
pub struct PlayerLink {
    tx: mpsc::Sender<ServerMsg>,
    close_tx: Arc<watch::Sender<bool>>,
}

impl PlayerLink {
    /// Create a link together with the receiving end the transport drains
    pub fn channel(capacity: usize) -> (Self, OutboundQueue) {
        let (tx, rx) = mpsc::channel(capacity);
        let (close_tx, close_rx) = watch::channel(false);
        let link = Self {
            tx,
            close_tx: Arc::new(close_tx),
        };
        let queue = OutboundQueue {
            rx,
            close_rx,
            done: false,
        };
        (link, queue)
    }

    pub fn send(&self, msg: ServerMsg) -> Result<(), DeliveryError> {
        self.tx.try_send(msg)?;
        Ok(())
    }

    /// Request a close. Messages already queued are still written first.
    pub fn close(&self) -> Result<(), DeliveryError> {
        if self.tx.is_closed() {
            return Err(DeliveryError::Closed);
        }
        self.close_tx.send_replace(true);
        Ok(())
    }
}

/// Receiving end of a [`PlayerLink`], drained by the connection writer
#[derive(Debug)]
pub struct OutboundQueue {
    rx: mpsc::Receiver<ServerMsg>,
    close_rx: watch::Receiver<bool>,
    done: bool,
}

impl OutboundQueue {
    /// Next item to write. Yields [`Outbound::Close`] once, after every
    /// message queued before the close request. `None` when finished or
    /// when every link is gone without a close request.
    pub async fn recv(&mut self) -> Option<Outbound> {
        loop {
            if self.done {
                return None;
            }
            if *self.close_rx.borrow() {
                return self.try_recv();
            }

            tokio::select! {
                biased;
                msg = self.rx.recv() => match msg {
                    Some(msg) => return Some(Outbound::Message(msg)),
                    None if *self.close_rx.borrow() => {}
                    None => {
                        self.done = true;
                        return None;
                    }
                },
                changed = self.close_rx.changed() => {
                    if changed.is_err() {
                        // every link dropped, only queued messages remain
                        return self.rx.recv().await.map(Outbound::Message);
                    }
                }
            }
        }
    }

    /// Non-blocking variant of [`OutboundQueue::recv`]
    pub fn try_recv(&mut self) -> Option<Outbound> {
        if self.done {
            return None;
        }
        if let Ok(msg) = self.rx.try_recv() {
            return Some(Outbound::Message(msg));
        }
        if *self.close_rx.borrow() {
            self.done = true;
            self.rx.close();
            return Some(Outbound::Close);
        }
        None
    }
}

/// Registered participants, ordered by identity
#[derive(Debug)]
pub struct PlayerRegistry {
    players: BTreeMap<PlayerId, PlayerLink>,
    next_id: PlayerId,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self {
            players: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Allocate the next identity and register the link under it.
    /// Identities are never handed out twice by the same registry.
    pub fn register(&mut self, link: PlayerLink) -> PlayerId {
        let id = self.next_id;
        self.next_id += 1;
        self.players.insert(id, link);
        id
    }

    pub fn remove(&mut self, id: PlayerId) -> Option<PlayerLink> {
        self.players.remove(&id)
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.players.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn ids(&self) -> Vec<PlayerId> {
        self.players.keys().copied().collect()
    }

    /// Deliver to one participant. Failures are logged and reported as `false`.
    pub fn notify(&self, id: PlayerId, msg: ServerMsg) -> bool {
        let Some(link) = self.players.get(&id) else {
            debug!(player_id = id, "Notify skipped, player not registered");
            return false;
        };
        match link.send(msg) {
            Ok(()) => true,
            Err(e) => {
                debug!(player_id = id, error = %e, "Delivery failed");
                false
            }
        }
    }

    /// Deliver to every participant; one failed recipient never stops the rest
    pub fn broadcast(&self, msg: &ServerMsg) {
        for id in self.players.keys() {
            self.notify(*id, msg.clone());
        }
    }

    pub fn broadcast_count(&self) {
        self.broadcast(&ServerMsg::PlayerCount {
            count: self.players.len(),
        });
    }

    /// Ask every connection to close and forget all participants
    pub fn close_all(&mut self) {
        for (id, link) in std::mem::take(&mut self.players) {
            if let Err(e) = link.close() {
                debug!(player_id = id, error = %e, "Close request not delivered");
            }
        }
    }
}

impl Default for PlayerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
