//! Server state management for the signaling server
//!
//! [`ServerState`] is built once at startup and cloned into every transport
//! callback. It ties the session registry, the matchmaking engine and the
//! dispatcher together and exposes one entry point per connection event.

use crate::connection::{ConnectionHandle, FrameSink};
use crate::dispatcher::{Dispatcher, DrainOutcome};
use crate::error::SignalingError;
use crate::matchmaking::{Delivery, LobbyStats, Matchmaker, Presence, SessionState};
use crate::registry::SessionRegistry;
use roulette_protocol::{PeerId, ServerEvent};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Tuning for the engine and its worker pool
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Re-enqueue a session whose partner left
    pub requeue_partner: bool,
    /// Upper bound on in-flight dispatcher tasks
    pub max_pending_tasks: usize,
    /// How long shutdown waits for in-flight tasks
    pub drain_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            requeue_partner: true,
            max_pending_tasks: crate::dispatcher::DEFAULT_MAX_PENDING_TASKS,
            drain_timeout: crate::dispatcher::DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

struct Inner {
    registry: SessionRegistry,
    matchmaker: Matchmaker,
    dispatcher: Dispatcher,
}

/// Shared matchmaking and relay state
#[derive(Clone)]
pub struct ServerState {
    inner: Arc<Inner>,
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new(EngineOptions::default())
    }
}

impl ServerState {
    /// Create the state object.
    pub fn new(options: EngineOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: SessionRegistry::new(),
                matchmaker: Matchmaker::new(options.requeue_partner),
                dispatcher: Dispatcher::new(options.max_pending_tasks, options.drain_timeout),
            }),
        }
    }

    /// Connection-open: register a new session around `sink`.
    pub fn connect(
        &self,
        sink: impl FrameSink + 'static,
    ) -> Result<Arc<ConnectionHandle>, SignalingError> {
        if self.inner.dispatcher.is_shutting_down() {
            return Err(SignalingError::ShuttingDown);
        }
        let handle = Arc::new(ConnectionHandle::new(sink));
        self.inner.registry.add(Arc::clone(&handle));
        info!(peer = %handle.id(), "session opened");
        Ok(handle)
    }

    /// Connection-close: purge `id` from the registry, the queue and its pair.
    /// Idempotent.
    pub fn disconnect(&self, id: PeerId) {
        if let Some(handle) = self.inner.registry.remove(&id) {
            handle.mark_closed();
            info!(peer = %id, "session closed");
        }
        let deliveries = self.inner.matchmaker.release(&self.inner.registry, id);
        self.deliver(deliveries);
    }

    /// `pairing-request` from `id`.
    pub fn request_pairing(&self, id: PeerId) {
        let deliveries = self
            .inner
            .matchmaker
            .request_pairing(&self.inner.registry, id);
        self.deliver(deliveries);
    }

    /// `leave` from `id`: drop its partner and queue slot, keep the connection.
    pub fn leave(&self, id: PeerId) {
        let deliveries = self.inner.matchmaker.release(&self.inner.registry, id);
        self.deliver(deliveries);
    }

    /// Hand engine output to the dispatcher.
    pub fn deliver(&self, deliveries: Vec<Delivery>) {
        for delivery in deliveries {
            self.notify(delivery.to, &delivery.event);
        }
    }

    /// Send one server event to `to`.
    pub fn notify(&self, to: PeerId, event: &ServerEvent) {
        self.send_text(to, Arc::from(event.to_string()));
    }

    /// Queue `frame` for `to`, preserving order per destination.
    pub fn send_text(&self, to: PeerId, frame: Arc<str>) {
        let Some(handle) = self.inner.registry.lookup(&to) else {
            debug!(peer = %to, "dropping frame for unknown session");
            return;
        };
        if !handle.is_open() {
            debug!(peer = %to, "dropping frame for closed session");
            return;
        }
        if !handle.push(frame) {
            return;
        }

        let state = self.clone();
        let target = Arc::clone(&handle);
        if !self
            .inner
            .dispatcher
            .spawn("drain", async move { state.drain(target).await })
        {
            handle.abandon_drain();
        }
    }

    /// Write queued frames until the mailbox is empty. A failed write means
    /// the connection is dead: it is cleaned up at once and never retried.
    async fn drain(&self, handle: Arc<ConnectionHandle>) {
        while let Some(frame) = handle.next_frame() {
            if let Err(e) = handle.send(&frame).await {
                if matches!(e, SignalingError::ConnectionClosed) {
                    handle.clear_mailbox();
                    return;
                }
                warn!(peer = %handle.id(), error = %e, "send failed, dropping session");
                let dropped = handle.clear_mailbox();
                if dropped > 0 {
                    debug!(peer = %handle.id(), dropped, "discarded queued frames");
                }
                handle.mark_closed();
                handle.close().await;
                self.disconnect(handle.id());
                return;
            }
        }
    }

    /// Partner of `id`, if paired.
    pub fn partner_of(&self, id: &PeerId) -> Option<PeerId> {
        self.inner.matchmaker.partner_of(id)
    }

    /// Whether `id` has an open, registered connection.
    pub fn is_live(&self, id: &PeerId) -> bool {
        self.inner.registry.is_live(id)
    }

    /// Lifecycle position of `id`.
    pub fn session_state(&self, id: &PeerId) -> SessionState {
        self.inner.matchmaker.state_of(&self.inner.registry, id)
    }

    /// Waiting ids, oldest first.
    pub fn waiting(&self) -> Vec<PeerId> {
        self.inner.matchmaker.waiting()
    }

    /// Queue and pair counts.
    pub fn lobby_stats(&self) -> LobbyStats {
        self.inner.matchmaker.stats()
    }

    /// Number of registered connections.
    pub fn active_connections(&self) -> usize {
        self.inner.registry.len()
    }

    /// Whether the server stopped admitting work.
    pub fn is_shutting_down(&self) -> bool {
        self.inner.dispatcher.is_shutting_down()
    }

    /// Stop admitting work and drain in-flight sends.
    pub async fn shutdown(&self) -> DrainOutcome {
        info!(
            connections = self.active_connections(),
            "signaling shutting down"
        );
        self.inner.dispatcher.shutdown().await
    }

    #[cfg(test)]
    pub(crate) fn matchmaker(&self) -> &Matchmaker {
        &self.inner.matchmaker
    }
}
