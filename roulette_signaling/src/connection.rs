//! One client connection as seen by the engine
//!
//! A [`ConnectionHandle`] owns the write half of a transport connection.
//! Frames for a connection are queued in its mailbox in routing order and
//! written by a single drain task at a time, so two relays aimed at the same
//! client can never interleave or overtake each other.

use crate::error::SignalingError;
use async_trait::async_trait;
use parking_lot::Mutex;
use roulette_protocol::PeerId;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// Write half of a text-frame transport
#[async_trait]
pub trait FrameSink: Send {
    /// Write one text frame.
    async fn send_text(&mut self, text: &str) -> Result<(), SignalingError>;

    /// Close the transport, ignoring failures.
    async fn close(&mut self) {}
}

/// In-memory sink that forwards frames to a channel
///
/// Used when the transport is driven from the same process, and by tests.
pub struct ChannelSink(pub mpsc::UnboundedSender<String>);

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send_text(&mut self, text: &str) -> Result<(), SignalingError> {
        self.0
            .send(text.to_string())
            .map_err(|_| SignalingError::SendError("receiver dropped".to_string()))
    }
}

#[derive(Default)]
struct Mailbox {
    frames: VecDeque<Arc<str>>,
    draining: bool,
}

/// Handle to one open client connection
pub struct ConnectionHandle {
    id: PeerId,
    open: AtomicBool,
    mailbox: Mutex<Mailbox>,
    sink: tokio::sync::Mutex<Box<dyn FrameSink>>,
}

impl ConnectionHandle {
    /// Wrap a sink under a freshly generated id.
    pub fn new(sink: impl FrameSink + 'static) -> Self {
        Self::with_id(PeerId::new(), sink)
    }

    /// Wrap a sink under a caller-chosen id.
    pub fn with_id(id: PeerId, sink: impl FrameSink + 'static) -> Self {
        Self {
            id,
            open: AtomicBool::new(true),
            mailbox: Mutex::new(Mailbox::default()),
            sink: tokio::sync::Mutex::new(Box::new(sink)),
        }
    }

    /// Stable identifier of this connection.
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// False once the transport closed or a write failed.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Mark the connection dead. Returns true the first time.
    pub fn mark_closed(&self) -> bool {
        self.open.swap(false, Ordering::AcqRel)
    }

    /// Write one frame, holding the connection's writer lock for the duration.
    pub async fn send(&self, text: &str) -> Result<(), SignalingError> {
        if !self.is_open() {
            return Err(SignalingError::ConnectionClosed);
        }
        let mut sink = self.sink.lock().await;
        sink.send_text(text).await
    }

    /// Close the underlying transport.
    pub async fn close(&self) {
        self.sink.lock().await.close().await;
    }

    /// Queue a frame. Returns true when the caller must schedule a drain.
    pub(crate) fn push(&self, frame: Arc<str>) -> bool {
        let mut mailbox = self.mailbox.lock();
        mailbox.frames.push_back(frame);
        if mailbox.draining {
            false
        } else {
            mailbox.draining = true;
            true
        }
    }

    /// Next queued frame; ends the drain when the mailbox is empty.
    pub(crate) fn next_frame(&self) -> Option<Arc<str>> {
        let mut mailbox = self.mailbox.lock();
        let frame = mailbox.frames.pop_front();
        if frame.is_none() {
            mailbox.draining = false;
        }
        frame
    }

    /// Give up a drain that could not be scheduled. Queued frames stay and
    /// go out with the next successful schedule.
    pub(crate) fn abandon_drain(&self) {
        self.mailbox.lock().draining = false;
    }

    /// Drop all queued frames.
    pub(crate) fn clear_mailbox(&self) -> usize {
        let mut mailbox = self.mailbox.lock();
        let dropped = mailbox.frames.len();
        mailbox.frames.clear();
        dropped
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (ConnectionHandle, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle::new(ChannelSink(tx)), rx)
    }

    #[tokio::test]
    async fn send_writes_to_sink() {
        let (conn, mut rx) = handle();
        conn.send("hello").await.unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn send_after_close_is_rejected() {
        let (conn, mut rx) = handle();
        assert!(conn.mark_closed());
        assert!(!conn.mark_closed());
        assert!(matches!(
            conn.send("late").await,
            Err(SignalingError::ConnectionClosed)
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_to_dropped_receiver_fails() {
        let (conn, rx) = handle();
        drop(rx);
        assert!(matches!(
            conn.send("x").await,
            Err(SignalingError::SendError(_))
        ));
    }

    #[test]
    fn only_first_push_schedules_a_drain() {
        let (conn, _rx) = handle();
        assert!(conn.push(Arc::from("a")));
        assert!(!conn.push(Arc::from("b")));
        assert_eq!(conn.next_frame().as_deref(), Some("a"));
        assert_eq!(conn.next_frame().as_deref(), Some("b"));
        assert_eq!(conn.next_frame(), None);
        // drain ended, the next push schedules again
        assert!(conn.push(Arc::from("c")));
    }

    #[test]
    fn abandoned_drain_keeps_frames() {
        let (conn, _rx) = handle();
        assert!(conn.push(Arc::from("a")));
        conn.abandon_drain();
        assert!(conn.push(Arc::from("b")));
        assert_eq!(conn.next_frame().as_deref(), Some("a"));
        assert_eq!(conn.clear_mailbox(), 1);
    }
}
