//! In-process transport. Both peers share one hub; "session descriptions" are
//! endpoint tokens. Used by the test suite to drive full create/join/share
//! flows without a network.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use uuid::Uuid;

use super::{Channel, EventSink, Role, Transport, TransportEvent};
use crate::error::{Error, Result};
use crate::signal::{SdpKind, SignalPayload};

const TOKEN_PREFIX: &str = "memory:";

#[derive(Clone, Default)]
pub struct MemoryTransport {
  hub: Arc<Mutex<HashMap<String, Endpoint>>>,
}

struct Endpoint {
  events: EventSink,
  peer: Option<String>,
  open: bool,
}

impl MemoryTransport {
  pub fn new() -> Self {
    Self::default()
  }

  /// Fails every live endpoint, as if the network had dropped out.
  pub fn fail_all(&self, reason: &str) {
    let hub = self.hub.lock();
    for endpoint in hub.values() {
      endpoint.events.emit(TransportEvent::Failed(reason.to_string()));
    }
  }

  /// Number of endpoints that have not been closed.
  pub fn live_endpoints(&self) -> usize {
    self.hub.lock().len()
  }
}

fn parse_token(payload: &SignalPayload) -> Result<String> {
  payload
    .sdp()
    .strip_prefix(TOKEN_PREFIX)
    .filter(|token| !token.is_empty())
    .map(str::to_string)
    .ok_or_else(|| Error::MalformedSignal("not an in-memory session description".to_string()))
}

#[async_trait]
impl Transport for MemoryTransport {
  async fn open(&self, role: Role, remote: Option<SignalPayload>, events: EventSink) -> Result<Arc<dyn Channel>> {
    let token = Uuid::new_v4().simple().to_string();
    let mut hub = self.hub.lock();
    let (peer, kind) = match role {
      Role::Initiator => (None, SdpKind::Offer),
      Role::Responder => {
        let offer = remote.ok_or_else(|| Error::MalformedSignal("a responder needs the initiator's offer".to_string()))?;
        let initiator = parse_token(&offer)?;
        match hub.get(&initiator) {
          Some(endpoint) if endpoint.peer.is_none() => {}
          _ => return Err(Error::Transport("offer is no longer pending".to_string())),
        }
        (Some(initiator), SdpKind::Answer)
      }
    };
    hub.insert(
      token.clone(),
      Endpoint {
        events: events.clone(),
        peer,
        open: false,
      },
    );
    drop(hub);

    events.emit(TransportEvent::Signal(SignalPayload::new(kind, format!("{TOKEN_PREFIX}{token}"))));
    Ok(Arc::new(MemoryChannel {
      token,
      hub: self.hub.clone(),
    }))
  }
}

struct MemoryChannel {
  token: String,
  hub: Arc<Mutex<HashMap<String, Endpoint>>>,
}

#[async_trait]
impl Channel for MemoryChannel {
  async fn apply_answer(&self, answer: SignalPayload) -> Result<()> {
    let responder = parse_token(&answer)?;
    let mut hub = self.hub.lock();
    match hub.get(&responder) {
      Some(endpoint) if endpoint.peer.as_deref() == Some(self.token.as_str()) => {}
      _ => return Err(Error::Transport("answer does not belong to this offer".to_string())),
    }
    let local = hub
      .get_mut(&self.token)
      .ok_or_else(|| Error::Transport("channel closed".to_string()))?;
    local.peer = Some(responder.clone());
    local.open = true;
    local.events.emit(TransportEvent::Open);
    if let Some(remote) = hub.get_mut(&responder) {
      remote.open = true;
      remote.events.emit(TransportEvent::Open);
    }
    Ok(())
  }

  async fn send(&self, data: Bytes) -> Result<()> {
    let hub = self.hub.lock();
    let remote = hub
      .get(&self.token)
      .filter(|local| local.open)
      .and_then(|local| local.peer.as_ref())
      .and_then(|peer| hub.get(peer))
      .ok_or_else(|| Error::Transport("channel is not open".to_string()))?;
    remote.events.emit(TransportEvent::Message(data));
    Ok(())
  }

  async fn close(&self) {
    let mut hub = self.hub.lock();
    let Some(local) = hub.remove(&self.token) else {
      return;
    };
    local.events.emit(TransportEvent::Closed);
    if let Some(remote) = local.peer.and_then(|peer| hub.remove(&peer)) {
      remote.events.emit(TransportEvent::Closed);
    }
  }
}
