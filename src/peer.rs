//! Per-connection lifecycle on top of a transport channel.
//!
//! ```text
//! NEW ──open──► NEGOTIATING ──Open──► CONNECTED ──Closed/close()──► CLOSED
//!                    │                    │
//!                    └──────Failed────────┴──► ERRORED
//! ```
//!
//! Raw transport events are filtered through [`PeerConnection::observe`],
//! which enforces the lifecycle guarantees: at most one `Signal`, one
//! `Connected`, one `Closed` (always last), and `Data` only while connected.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::registry::ConnectionId;
use crate::signal::SignalPayload;
use crate::transport::{Channel, EventSink, Role, Transport, TransportEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
  New,
  Negotiating,
  Connected,
  Closed,
  Errored,
}

impl PeerState {
  pub fn is_terminal(self) -> bool {
    matches!(self, PeerState::Closed | PeerState::Errored)
  }
}

/// Lifecycle events after filtering.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
  Signal(SignalPayload),
  Connected,
  Data(Bytes),
  Error(String),
  Closed,
}

struct PeerShared {
  state: PeerState,
  channel: Option<Arc<dyn Channel>>,
  signalled: bool,
}

/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct PeerConnection {
  id: ConnectionId,
  role: Role,
  shared: Arc<Mutex<PeerShared>>,
}

impl PeerConnection {
  pub fn new(id: ConnectionId, role: Role) -> Self {
    Self {
      id,
      role,
      shared: Arc::new(Mutex::new(PeerShared {
        state: PeerState::New,
        channel: None,
        signalled: false,
      })),
    }
  }

  pub fn id(&self) -> &ConnectionId {
    &self.id
  }

  pub fn role(&self) -> Role {
    self.role
  }

  pub fn state(&self) -> PeerState {
    self.shared.lock().state
  }

  /// Starts negotiation. A responder must pass the initiator's offer.
  ///
  /// If the connection was closed while the transport was opening, the fresh
  /// channel is released straight away and `Ok` is still returned.
  pub async fn open(&self, transport: &dyn Transport, remote: Option<SignalPayload>, events: EventSink) -> Result<()> {
    let channel = transport.open(self.role, remote, events).await?;
    let orphaned = {
      let mut shared = self.shared.lock();
      if shared.state.is_terminal() {
        true
      } else {
        if shared.state == PeerState::New {
          shared.state = PeerState::Negotiating;
        }
        shared.channel = Some(channel.clone());
        false
      }
    };
    if orphaned {
      channel.close().await;
    }
    Ok(())
  }

  /// Applies one transport event and returns what should be reported upward.
  pub fn observe(&self, event: TransportEvent) -> Vec<PeerEvent> {
    let mut shared = self.shared.lock();
    if shared.state.is_terminal() {
      return Vec::new();
    }
    match event {
      TransportEvent::Signal(payload) => {
        if shared.signalled || shared.state == PeerState::Connected {
          return Vec::new();
        }
        shared.signalled = true;
        vec![PeerEvent::Signal(payload)]
      }
      TransportEvent::Open => {
        if shared.state == PeerState::Connected {
          return Vec::new();
        }
        shared.state = PeerState::Connected;
        vec![PeerEvent::Connected]
      }
      TransportEvent::Message(data) => {
        if shared.state != PeerState::Connected {
          return Vec::new();
        }
        vec![PeerEvent::Data(data)]
      }
      TransportEvent::Closed => {
        shared.state = PeerState::Closed;
        vec![PeerEvent::Closed]
      }
      TransportEvent::Failed(reason) => {
        shared.state = PeerState::Errored;
        vec![PeerEvent::Error(reason), PeerEvent::Closed]
      }
    }
  }

  pub async fn apply_answer(&self, answer: SignalPayload) -> Result<()> {
    let channel = {
      let shared = self.shared.lock();
      match (&shared.channel, shared.state) {
        (Some(channel), PeerState::Negotiating) if self.role == Role::Initiator => channel.clone(),
        _ => return Err(Error::Transport(format!("connection {} is not waiting for an answer", self.id))),
      }
    };
    channel.apply_answer(answer).await
  }

  /// Sends one message. Fails unless connected.
  pub async fn send(&self, data: Bytes) -> Result<()> {
    let channel = self.connected_channel()?;
    channel.send(data).await
  }

  pub async fn drain(&self) {
    let channel = self.shared.lock().channel.clone();
    if let Some(channel) = channel {
      channel.drain().await;
    }
  }

  /// Moves to `Closed` and releases the transport.
  ///
  /// Returns `true` only for the call that ended a live connection. Later
  /// calls, and calls after an error, are no-ops apart from releasing a
  /// channel nobody has released yet.
  pub async fn close(&self) -> bool {
    let (ended, channel) = {
      let mut shared = self.shared.lock();
      let ended = !shared.state.is_terminal();
      if ended {
        shared.state = PeerState::Closed;
      }
      (ended, shared.channel.take())
    };
    if let Some(channel) = channel {
      channel.close().await;
    }
    ended
  }

  fn connected_channel(&self) -> Result<Arc<dyn Channel>> {
    let shared = self.shared.lock();
    match (&shared.channel, shared.state) {
      (Some(channel), PeerState::Connected) => Ok(channel.clone()),
      _ => Err(Error::NotConnected(self.id.clone())),
    }
  }
}
