//! Waiting queue, peer map and the pairing state machine
//!
//! All pairing decisions run under one lock around the lobby, so no
//! transition ever observes a half-written pair. Transitions never perform
//! I/O: they return the [`Delivery`] list the caller must send.

use parking_lot::Mutex;
use roulette_protocol::{PeerId, ServerEvent};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, info, warn};

/// Answers whether a session still has an open, registered connection.
pub trait Presence {
    /// True if `id` is registered and its connection is open.
    fn is_live(&self, id: &PeerId) -> bool;
}

/// An event the engine wants sent to one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Recipient
    pub to: PeerId,
    /// Event to send
    pub event: ServerEvent,
}

impl Delivery {
    fn new(to: PeerId, event: ServerEvent) -> Self {
        Self { to, event }
    }
}

/// Lifecycle position of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, not looking for a partner
    Idle,
    /// In the waiting queue
    Waiting,
    /// Has a partner
    Paired,
    /// No longer connected
    Closed,
}

/// FIFO of sessions looking for a partner; never holds an id twice
#[derive(Debug, Default)]
pub struct WaitingQueue {
    order: VecDeque<PeerId>,
    members: HashSet<PeerId>,
}

impl WaitingQueue {
    /// Append `id` unless it is already queued. Returns true if appended.
    pub fn enqueue(&mut self, id: PeerId) -> bool {
        if !self.members.insert(id) {
            return false;
        }
        self.order.push_back(id);
        true
    }

    /// Put `id` back at the head, keeping its seniority.
    pub fn requeue_front(&mut self, id: PeerId) -> bool {
        if !self.members.insert(id) {
            return false;
        }
        self.order.push_front(id);
        true
    }

    /// Pop the session that has waited longest.
    pub fn dequeue_oldest(&mut self) -> Option<PeerId> {
        let id = self.order.pop_front()?;
        self.members.remove(&id);
        Some(id)
    }

    /// Remove `id` wherever it sits. Returns true if it was queued.
    pub fn remove_if_present(&mut self, id: &PeerId) -> bool {
        if !self.members.remove(id) {
            return false;
        }
        self.order.retain(|queued| queued != id);
        true
    }

    /// Whether `id` is queued.
    pub fn contains(&self, id: &PeerId) -> bool {
        self.members.contains(id)
    }

    /// Number of queued sessions.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Queued ids, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &PeerId> {
        self.order.iter()
    }
}

/// Symmetric partner relation: `a -> b` implies `b -> a`
#[derive(Debug, Default)]
pub struct PeerMap {
    partners: HashMap<PeerId, PeerId>,
}

impl PeerMap {
    /// Record `a` and `b` as partners.
    pub fn pair(&mut self, a: PeerId, b: PeerId) {
        self.partners.insert(a, b);
        self.partners.insert(b, a);
    }

    /// Current partner of `id`.
    pub fn partner(&self, id: &PeerId) -> Option<PeerId> {
        self.partners.get(id).copied()
    }

    /// Whether `id` has a partner.
    pub fn contains(&self, id: &PeerId) -> bool {
        self.partners.contains_key(id)
    }

    /// Dissolve the pair containing `id`, returning the former partner.
    pub fn unpair(&mut self, id: &PeerId) -> Option<PeerId> {
        let partner = self.partners.remove(id)?;
        if self.partners.get(&partner) == Some(id) {
            self.partners.remove(&partner);
        }
        Some(partner)
    }

    /// Number of sessions that have a partner (twice the pair count).
    pub fn len(&self) -> usize {
        self.partners.len()
    }

    /// Whether nobody is paired.
    pub fn is_empty(&self) -> bool {
        self.partners.is_empty()
    }
}

/// Queue and peer map, guarded together
#[derive(Debug, Default)]
struct Lobby {
    queue: WaitingQueue,
    peers: PeerMap,
}

impl Lobby {
    fn request_pairing<P: Presence + ?Sized>(
        &mut self,
        presence: &P,
        requester: PeerId,
    ) -> Vec<Delivery> {
        if self.peers.contains(&requester) {
            debug!(peer = %requester, "already paired, ignoring pairing request");
            return Vec::new();
        }

        loop {
            let Some(candidate) = self.queue.dequeue_oldest() else {
                if self.queue.enqueue(requester) {
                    debug!(peer = %requester, "no partner available, waiting");
                }
                return Vec::new();
            };

            if candidate == requester {
                self.queue.requeue_front(requester);
                return Vec::new();
            }

            if !presence.is_live(&candidate) {
                debug!(peer = %candidate, "discarding stale waiting entry");
                continue;
            }

            if !presence.is_live(&requester) {
                warn!(peer = %requester, "requester disconnected before pairing");
                self.queue.requeue_front(candidate);
                self.queue.remove_if_present(&requester);
                return Vec::new();
            }

            self.queue.remove_if_present(&requester);
            self.peers.pair(candidate, requester);
            info!(initiator = %candidate, responder = %requester, "paired sessions");

            // the side that waited longer makes the offer
            return vec![
                Delivery::new(candidate, ServerEvent::InitiateOffer),
                Delivery::new(requester, ServerEvent::WaitForOffer),
            ];
        }
    }

    fn release<P: Presence + ?Sized>(
        &mut self,
        presence: &P,
        id: PeerId,
        requeue_partner: bool,
    ) -> Vec<Delivery> {
        self.queue.remove_if_present(&id);

        let Some(partner) = self.peers.unpair(&id) else {
            return Vec::new();
        };
        info!(peer = %id, partner = %partner, "pair dissolved");

        if !presence.is_live(&partner) {
            return Vec::new();
        }

        let mut deliveries = vec![Delivery::new(partner, ServerEvent::partner_left())];
        if requeue_partner {
            deliveries.extend(self.request_pairing(presence, partner));
        }
        deliveries
    }

    #[cfg(test)]
    fn assert_invariants(&self) {
        for (a, b) in &self.peers.partners {
            assert_eq!(self.peers.partner(b), Some(*a), "peer map is not symmetric");
            assert!(!self.queue.contains(a), "{a} both waiting and paired");
        }
        let unique: HashSet<_> = self.queue.order.iter().collect();
        assert_eq!(unique.len(), self.queue.order.len(), "duplicate queue entry");
        assert_eq!(self.queue.members.len(), self.queue.order.len());
    }
}

/// Lobby counters for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LobbyStats {
    /// Sessions in the waiting queue
    pub waiting: usize,
    /// Active pairs
    pub pairs: usize,
}

/// The matchmaking state machine
///
/// Owns the waiting queue and peer map behind the single matchmaking lock.
/// Liveness is asked through [`Presence`] so the engine knows nothing about
/// the transport.
#[derive(Debug)]
pub struct Matchmaker {
    lobby: Mutex<Lobby>,
    requeue_partner: bool,
}

impl Matchmaker {
    /// Create an engine. With `requeue_partner` set, a session whose partner
    /// leaves goes straight back to looking for a new one.
    pub fn new(requeue_partner: bool) -> Self {
        Self {
            lobby: Mutex::new(Lobby::default()),
            requeue_partner,
        }
    }

    /// The `pairing-request` transition.
    pub fn request_pairing<P: Presence + ?Sized>(
        &self,
        presence: &P,
        requester: PeerId,
    ) -> Vec<Delivery> {
        self.lobby.lock().request_pairing(presence, requester)
    }

    /// The `leave` / disconnect transition: take `id` out of the queue and
    /// its pair, telling the partner.
    pub fn release<P: Presence + ?Sized>(&self, presence: &P, id: PeerId) -> Vec<Delivery> {
        self.lobby
            .lock()
            .release(presence, id, self.requeue_partner)
    }

    /// Current partner of `id`.
    pub fn partner_of(&self, id: &PeerId) -> Option<PeerId> {
        self.lobby.lock().peers.partner(id)
    }

    /// Where `id` is in its lifecycle.
    pub fn state_of<P: Presence + ?Sized>(&self, presence: &P, id: &PeerId) -> SessionState {
        let lobby = self.lobby.lock();
        if lobby.peers.contains(id) {
            SessionState::Paired
        } else if lobby.queue.contains(id) {
            SessionState::Waiting
        } else if presence.is_live(id) {
            SessionState::Idle
        } else {
            SessionState::Closed
        }
    }

    /// Waiting ids, oldest first.
    pub fn waiting(&self) -> Vec<PeerId> {
        self.lobby.lock().queue.iter().copied().collect()
    }

    /// Queue and pair counts.
    pub fn stats(&self) -> LobbyStats {
        let lobby = self.lobby.lock();
        LobbyStats {
            waiting: lobby.queue.len(),
            pairs: lobby.peers.len() / 2,
        }
    }

    #[cfg(test)]
    pub(crate) fn assert_invariants(&self) {
        self.lobby.lock().assert_invariants();
    }
}
