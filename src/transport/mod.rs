//! The seam between the connection layer and whatever moves the bytes.
//!
//! A transport negotiates one peer-to-peer channel per `open` call and reports
//! everything that happens to it as [`TransportEvent`]s through an
//! [`EventSink`]. Events from every connection land on one queue, which the
//! registry drains in order.

pub mod memory;
pub mod rtc;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::Result;
use crate::registry::ConnectionId;
use crate::signal::SignalPayload;

pub use self::memory::MemoryTransport;
pub use self::rtc::WebRtcTransport;

/// Which half of the exchange a connection plays. Fixed for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
  Initiator,
  Responder,
}

#[derive(Debug, Clone)]
pub enum TransportEvent {
  /// Local offer/answer ready, ICE gathering finished
  Signal(SignalPayload),
  /// Data channel usable
  Open,
  Message(Bytes),
  Closed,
  /// Unrecoverable negotiation or channel failure
  Failed(String),
}

pub type EventQueue = mpsc::UnboundedSender<(ConnectionId, TransportEvent)>;

/// Per-connection handle a transport uses to report events.
#[derive(Clone)]
pub struct EventSink {
  id: ConnectionId,
  tx: EventQueue,
}

impl EventSink {
  pub fn new(id: ConnectionId, tx: EventQueue) -> Self {
    Self { id, tx }
  }

  pub fn connection_id(&self) -> &ConnectionId {
    &self.id
  }

  pub fn emit(&self, event: TransportEvent) {
    if self.tx.send((self.id.clone(), event)).is_err() {
      trace!(connection = %self.id, "event queue closed, dropping transport event");
    }
  }
}

#[async_trait]
pub trait Transport: Send + Sync {
  /// Starts negotiating a channel.
  ///
  /// An initiator gets no remote payload and emits its offer as
  /// `TransportEvent::Signal`. A responder is handed the decoded offer and
  /// emits its answer the same way. Returns as soon as negotiation has started.
  async fn open(&self, role: Role, remote: Option<SignalPayload>, events: EventSink) -> Result<Arc<dyn Channel>>;
}

#[async_trait]
pub trait Channel: Send + Sync {
  /// Feeds the responder's answer into an initiator's negotiation.
  async fn apply_answer(&self, answer: SignalPayload) -> Result<()>;

  /// Queues one message for reliable, ordered delivery.
  async fn send(&self, data: Bytes) -> Result<()>;

  /// Waits until queued messages have left the local buffer.
  async fn drain(&self) {}

  /// Releases the transport. Safe to call more than once.
  async fn close(&self);
}
