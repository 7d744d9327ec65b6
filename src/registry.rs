//! The connection registry: owns every live peer connection and routes their
//! events to the application.
//!
//! Transport events from all connections are queued on one channel and
//! applied in order by a single pump task, so no two events ever mutate the
//! registry at the same time. Handlers run on that task with no locks held,
//! so they may call back into the registry.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::ShareConfig;
use crate::error::{Error, Result};
use crate::link::Link;
use crate::peer::{PeerConnection, PeerEvent, PeerState};
use crate::protocol;
use crate::signal::{self, SdpKind, SignalPayload};
use crate::transport::{EventQueue, EventSink, Role, Transport, TransportEvent, WebRtcTransport};

const ID_LEN: usize = 12;

/// Locally generated connection identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
  fn generate() -> Self {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(ID_LEN);
    Self(id)
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for ConnectionId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for ConnectionId {
  fn from(value: &str) -> Self {
    Self(value.to_string())
  }
}

impl From<String> for ConnectionId {
  fn from(value: String) -> Self {
    Self(value)
  }
}

/// Read-only view of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
  pub id: ConnectionId,
  pub state: PeerState,
  pub connected: bool,
  pub is_initiator: bool,
  pub remote_id: Option<String>,
  /// Local signaling code (offer for initiators, answer for responders) once produced
  pub code: Option<String>,
}

pub type LinkHandler = Arc<dyn Fn(Link) + Send + Sync>;
pub type StatusHandler = Arc<dyn Fn(&ConnectionId, bool) + Send + Sync>;

struct Entry {
  peer: PeerConnection,
  remote_id: Option<String>,
  code: Option<String>,
}

impl Entry {
  fn info(&self) -> ConnectionInfo {
    let state = self.peer.state();
    ConnectionInfo {
      id: self.peer.id().clone(),
      state,
      connected: state == PeerState::Connected,
      is_initiator: self.peer.role() == Role::Initiator,
      remote_id: self.remote_id.clone(),
      code: self.code.clone(),
    }
  }
}

#[derive(Default)]
struct Handlers {
  link: Option<LinkHandler>,
  status: Option<StatusHandler>,
}

struct Shared {
  transport: Arc<dyn Transport>,
  config: ShareConfig,
  queue: EventQueue,
  /// Insertion ordered
  entries: Mutex<Vec<Entry>>,
  handlers: Mutex<Handlers>,
}

pub struct ConnectionRegistry {
  shared: Arc<Shared>,
  pump: JoinHandle<()>,
}

impl ConnectionRegistry {
  /// Creates a registry and starts its event pump. Must be called inside a
  /// tokio runtime.
  pub fn new(transport: Arc<dyn Transport>, config: ShareConfig) -> Self {
    let (queue, rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
      transport,
      config,
      queue,
      entries: Mutex::new(Vec::new()),
      handlers: Mutex::new(Handlers::default()),
    });
    let pump = tokio::spawn(run_pump(shared.clone(), rx));
    Self { shared, pump }
  }

  /// Registry backed by WebRTC with the given STUN configuration.
  pub fn with_webrtc(config: ShareConfig) -> Self {
    let transport = Arc::new(WebRtcTransport::new(config.clone()));
    Self::new(transport, config)
  }

  /// Opens a connection as initiator. Returns once negotiation has started;
  /// the offer code becomes available through [`Self::connection_code`].
  pub async fn create_connection(&self) -> Result<ConnectionInfo> {
    let peer = self.shared.insert(Role::Initiator, None);
    self.start(peer, None).await
  }

  /// Joins the connection described by an initiator's offer code. Nothing is
  /// stored if the code does not decode.
  pub async fn join_connection(&self, code: &str) -> Result<ConnectionInfo> {
    let offer = signal::decode_expecting(code, SdpKind::Offer)?;
    let peer = self.shared.insert(Role::Responder, offer.origin().map(str::to_string));
    self.start(peer, Some(offer)).await
  }

  async fn start(&self, peer: PeerConnection, remote: Option<SignalPayload>) -> Result<ConnectionInfo> {
    let id = peer.id().clone();
    let events = EventSink::new(id.clone(), self.shared.queue.clone());
    if let Err(err) = peer.open(self.shared.transport.as_ref(), remote, events).await {
      warn!(connection = %id, error = %err, "failed to open connection");
      self.shared.remove(&id);
      return Err(err);
    }
    debug!(connection = %id, role = ?peer.role(), "negotiating");
    if let Some(timeout) = self.shared.config.negotiation_timeout {
      tokio::spawn(expire_negotiation(Arc::downgrade(&self.shared), id.clone(), timeout));
    }
    self
      .shared
      .info(&id)
      .ok_or_else(|| Error::UnknownConnection(id))
  }

  /// Completes an initiator's negotiation with the responder's answer code.
  pub async fn accept_answer(&self, id: &ConnectionId, code: &str) -> Result<()> {
    let answer = signal::decode_expecting(code, SdpKind::Answer)?;
    let peer = self.shared.peer(id).ok_or_else(|| Error::UnknownConnection(id.clone()))?;
    let origin = answer.origin().map(str::to_string);
    peer.apply_answer(answer).await?;
    if let Some(origin) = origin {
      self.shared.update(id, |entry| entry.remote_id = Some(origin));
    }
    debug!(connection = %id, "answer applied");
    Ok(())
  }

  /// Shares a link with the peer on `id`. `false` if the id is unknown, the
  /// connection is not connected, or the transport refused the message.
  pub async fn share_link(&self, id: &ConnectionId, link: &Link) -> bool {
    match self.try_share_link(id, link).await {
      Ok(()) => true,
      Err(err) => {
        debug!(connection = %id, error = %err, "link not shared");
        false
      }
    }
  }

  pub async fn try_share_link(&self, id: &ConnectionId, link: &Link) -> Result<()> {
    let peer = self.shared.peer(id).ok_or_else(|| Error::UnknownConnection(id.clone()))?;
    if peer.state() != PeerState::Connected {
      return Err(Error::NotConnected(id.clone()));
    }
    let message = protocol::serialize(link)?;
    peer.send(message).await?;
    debug!(connection = %id, link = %link.id, "link shared");
    Ok(())
  }

  /// Offer code of an initiator connection, once its transport produced one.
  /// Always `None` for responders.
  pub fn connection_code(&self, id: &ConnectionId) -> Option<String> {
    self.shared.code(id, Role::Initiator)
  }

  /// Answer code of a responder connection, for the user to send back.
  pub fn answer_code(&self, id: &ConnectionId) -> Option<String> {
    self.shared.code(id, Role::Responder)
  }

  /// Closes and forgets a connection. Unknown ids are ignored.
  pub async fn close_connection(&self, id: &ConnectionId) {
    self.shared.close(id).await;
  }

  /// Waits until messages queued on `id` have been handed to the network.
  pub async fn drain(&self, id: &ConnectionId) {
    if let Some(peer) = self.shared.peer(id) {
      peer.drain().await;
    }
  }

  pub fn connection(&self, id: &ConnectionId) -> Option<ConnectionInfo> {
    self.shared.info(id)
  }

  pub fn list_connections(&self) -> Vec<ConnectionInfo> {
    self.shared.entries.lock().iter().map(Entry::info).collect()
  }

  /// Replaces the link handler.
  pub fn on_link_received<F>(&self, handler: F)
  where
    F: Fn(Link) + Send + Sync + 'static,
  {
    self.shared.handlers.lock().link = Some(Arc::new(handler));
  }

  /// Replaces the connection status handler.
  pub fn on_connection_status_change<F>(&self, handler: F)
  where
    F: Fn(&ConnectionId, bool) + Send + Sync + 'static,
  {
    self.shared.handlers.lock().status = Some(Arc::new(handler));
  }

  /// Closes every connection and drops both handlers. No status callbacks
  /// fire for connections closed here.
  pub async fn destroy(&self) {
    *self.shared.handlers.lock() = Handlers::default();
    let entries = std::mem::take(&mut *self.shared.entries.lock());
    for entry in entries {
      entry.peer.close().await;
    }
    info!("connection registry destroyed");
  }
}

impl Drop for ConnectionRegistry {
  /// Stops the pump and releases whatever `destroy` did not, without callbacks.
  fn drop(&mut self) {
    self.pump.abort();
    let entries = std::mem::take(&mut *self.shared.entries.lock());
    if entries.is_empty() {
      return;
    }
    match tokio::runtime::Handle::try_current() {
      Ok(runtime) => {
        debug!(count = entries.len(), "closing connections left on a dropped registry");
        runtime.spawn(async move {
          for entry in entries {
            entry.peer.close().await;
          }
        });
      }
      Err(_) => warn!(count = entries.len(), "registry dropped outside a runtime, connections left open"),
    }
  }
}

impl Shared {
  fn insert(&self, role: Role, remote_id: Option<String>) -> PeerConnection {
    let mut entries = self.entries.lock();
    let id = loop {
      let id = ConnectionId::generate();
      if entries.iter().all(|entry| entry.peer.id() != &id) {
        break id;
      }
    };
    let peer = PeerConnection::new(id, role);
    entries.push(Entry {
      peer: peer.clone(),
      remote_id,
      code: None,
    });
    peer
  }

  fn remove(&self, id: &ConnectionId) -> Option<Entry> {
    let mut entries = self.entries.lock();
    let index = entries.iter().position(|entry| entry.peer.id() == id)?;
    Some(entries.remove(index))
  }

  fn update(&self, id: &ConnectionId, apply: impl FnOnce(&mut Entry)) {
    if let Some(entry) = self.entries.lock().iter_mut().find(|entry| entry.peer.id() == id) {
      apply(entry);
    }
  }

  fn peer(&self, id: &ConnectionId) -> Option<PeerConnection> {
    self
      .entries
      .lock()
      .iter()
      .find(|entry| entry.peer.id() == id)
      .map(|entry| entry.peer.clone())
  }

  fn info(&self, id: &ConnectionId) -> Option<ConnectionInfo> {
    self.entries.lock().iter().find(|entry| entry.peer.id() == id).map(Entry::info)
  }

  fn code(&self, id: &ConnectionId, role: Role) -> Option<String> {
    self
      .entries
      .lock()
      .iter()
      .find(|entry| entry.peer.id() == id && entry.peer.role() == role)
      .and_then(|entry| entry.code.clone())
  }

  async fn close(&self, id: &ConnectionId) {
    let Some(entry) = self.remove(id) else {
      trace!(connection = %id, "close of unknown connection ignored");
      return;
    };
    entry.peer.close().await;
    info!(connection = %id, "connection closed");
    self.notify_status(id, false);
  }

  fn notify_status(&self, id: &ConnectionId, connected: bool) {
    let handler = self.handlers.lock().status.clone();
    if let Some(handler) = handler {
      handler(id, connected);
    }
  }

  fn notify_link(&self, link: Link) {
    let handler = self.handlers.lock().link.clone();
    if let Some(handler) = handler {
      handler(link);
    }
  }

  fn handle(&self, id: ConnectionId, event: TransportEvent) {
    let Some(peer) = self.peer(&id) else {
      trace!(connection = %id, "event for unknown connection dropped");
      return;
    };
    for event in peer.observe(event) {
      match event {
        PeerEvent::Signal(payload) => {
          let code = signal::encode(&payload.with_origin(id.as_str()));
          self.update(&id, |entry| entry.code = Some(code));
          debug!(connection = %id, "signaling code ready");
        }
        PeerEvent::Connected => {
          info!(connection = %id, "connected");
          self.notify_status(&id, true);
        }
        PeerEvent::Data(data) => match protocol::deserialize(&data) {
          Ok(link) => {
            debug!(connection = %id, link = %link.id, "link received");
            self.notify_link(link);
          }
          Err(err) => warn!(connection = %id, error = %err, "dropping malformed envelope"),
        },
        PeerEvent::Error(reason) => {
          warn!(connection = %id, reason = %reason, "transport error");
        }
        PeerEvent::Closed => {
          if self.remove(&id).is_some() {
            info!(connection = %id, "connection closed by transport");
            self.notify_status(&id, false);
            // Released off the pump; transport teardown may block.
            let peer = peer.clone();
            tokio::spawn(async move {
              peer.close().await;
            });
          }
        }
      }
    }
  }
}

async fn run_pump(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<(ConnectionId, TransportEvent)>) {
  while let Some((id, event)) = rx.recv().await {
    shared.handle(id, event);
  }
}

async fn expire_negotiation(shared: Weak<Shared>, id: ConnectionId, timeout: std::time::Duration) {
  tokio::time::sleep(timeout).await;
  let Some(shared) = shared.upgrade() else {
    return;
  };
  let pending = shared
    .peer(&id)
    .is_some_and(|peer| matches!(peer.state(), PeerState::New | PeerState::Negotiating));
  if pending {
    warn!(connection = %id, ?timeout, "negotiation timed out");
    shared.close(&id).await;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::transport::{Channel, MemoryTransport};
  use async_trait::async_trait;
  use bytes::Bytes;
  use std::time::Duration;
  use tokio::time::timeout;

  const WAIT: Duration = Duration::from_secs(2);

  /// Transport that emits nothing on its own; tests push events through the
  /// captured sinks.
  #[derive(Default)]
  struct ManualTransport {
    sinks: Mutex<Vec<EventSink>>,
    hang_on_close: bool,
  }

  impl ManualTransport {
    fn sink(&self, index: usize) -> EventSink {
      self.sinks.lock()[index].clone()
    }
  }

  struct ManualChannel {
    hang_on_close: bool,
  }

  #[async_trait]
  impl Transport for ManualTransport {
    async fn open(&self, _role: Role, _remote: Option<SignalPayload>, events: EventSink) -> Result<Arc<dyn Channel>> {
      self.sinks.lock().push(events);
      Ok(Arc::new(ManualChannel {
        hang_on_close: self.hang_on_close,
      }))
    }
  }

  #[async_trait]
  impl Channel for ManualChannel {
    async fn apply_answer(&self, _answer: SignalPayload) -> Result<()> {
      Ok(())
    }

    async fn send(&self, _data: Bytes) -> Result<()> {
      Ok(())
    }

    async fn close(&self) {
      if self.hang_on_close {
        std::future::pending::<()>().await;
      }
    }
  }

  fn status_events(registry: &ConnectionRegistry) -> mpsc::UnboundedReceiver<(ConnectionId, bool)> {
    let (tx, rx) = mpsc::unbounded_channel();
    registry.on_connection_status_change(move |id, connected| {
      let _ = tx.send((id.clone(), connected));
    });
    rx
  }

  fn registry(transport: &MemoryTransport) -> ConnectionRegistry {
    ConnectionRegistry::new(Arc::new(transport.clone()), ShareConfig::default())
  }

  async fn wait_for_code(registry: &ConnectionRegistry, id: &ConnectionId) -> String {
    timeout(WAIT, async {
      loop {
        if let Some(code) = registry.connection(id).and_then(|info| info.code) {
          return code;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
      }
    })
    .await
    .expect("signaling code")
  }

  #[test]
  fn generated_ids_are_short_hex() {
    let id = ConnectionId::generate();
    assert_eq!(id.as_str().len(), ID_LEN);
    assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    assert_ne!(id, ConnectionId::generate());
  }

  #[tokio::test]
  async fn initiator_code_appears_after_signal() {
    let transport = MemoryTransport::new();
    let registry = registry(&transport);
    let info = registry.create_connection().await.unwrap();
    assert!(info.is_initiator);
    assert!(!info.connected);

    let code = wait_for_code(&registry, &info.id).await;
    assert_eq!(registry.connection_code(&info.id), Some(code.clone()));
    assert_eq!(registry.answer_code(&info.id), None);

    let payload = signal::decode(&code).unwrap();
    assert_eq!(payload.kind(), SdpKind::Offer);
    assert_eq!(payload.origin(), Some(info.id.as_str()));
  }

  #[tokio::test]
  async fn no_connection_code_until_the_transport_signals() {
    let transport = Arc::new(ManualTransport::default());
    let registry = ConnectionRegistry::new(transport.clone(), ShareConfig::default());
    let info = registry.create_connection().await.unwrap();
    assert_eq!(info.state, PeerState::Negotiating);
    assert_eq!(info.code, None);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(registry.connection_code(&info.id), None);

    transport.sink(0).emit(TransportEvent::Signal(SignalPayload::new(SdpKind::Offer, "v=0")));
    let code = wait_for_code(&registry, &info.id).await;
    assert_eq!(registry.connection_code(&info.id), Some(code));
  }

  #[tokio::test]
  async fn closing_mid_negotiation_abandons_it() {
    let transport = MemoryTransport::new();
    let x = registry(&transport);
    let y = registry(&transport);
    let mut x_status = status_events(&x);

    let created = x.create_connection().await.unwrap();
    let offer = wait_for_code(&x, &created.id).await;
    let joined = y.join_connection(&offer).await.unwrap();
    let answer = wait_for_code(&y, &joined.id).await;

    x.close_connection(&created.id).await;
    assert!(matches!(
      x.accept_answer(&created.id, &answer).await,
      Err(Error::UnknownConnection(_))
    ));
    assert_eq!(timeout(WAIT, x_status.recv()).await.unwrap(), Some((created.id.clone(), false)));
    assert!(timeout(Duration::from_millis(100), x_status.recv()).await.is_err());
    assert!(x.list_connections().is_empty());
  }

  #[tokio::test]
  async fn slow_teardown_does_not_stall_other_connections() {
    let transport = Arc::new(ManualTransport {
      hang_on_close: true,
      ..ManualTransport::default()
    });
    let registry = ConnectionRegistry::new(transport.clone(), ShareConfig::default());
    let mut status = status_events(&registry);
    let first = registry.create_connection().await.unwrap();
    let second = registry.create_connection().await.unwrap();

    transport.sink(0).emit(TransportEvent::Closed);
    assert_eq!(timeout(WAIT, status.recv()).await.unwrap(), Some((first.id, false)));

    let sink = transport.sink(1);
    sink.emit(TransportEvent::Signal(SignalPayload::new(SdpKind::Offer, "v=0")));
    sink.emit(TransportEvent::Open);
    assert_eq!(timeout(WAIT, status.recv()).await.unwrap(), Some((second.id.clone(), true)));
    assert!(registry.connection(&second.id).unwrap().connected);
  }

  #[tokio::test]
  async fn responders_never_publish_a_connection_code() {
    let transport = MemoryTransport::new();
    let x = registry(&transport);
    let y = registry(&transport);
    let offerer = x.create_connection().await.unwrap();
    let offer = wait_for_code(&x, &offerer.id).await;

    let joined = y.join_connection(&offer).await.unwrap();
    assert!(!joined.is_initiator);
    assert_eq!(joined.remote_id.as_deref(), Some(offerer.id.as_str()));
    let answer = wait_for_code(&y, &joined.id).await;
    assert_eq!(y.connection_code(&joined.id), None);
    assert_eq!(y.answer_code(&joined.id), Some(answer));
  }

  #[tokio::test]
  async fn join_rejects_answers_and_garbage() {
    let transport = MemoryTransport::new();
    let registry = registry(&transport);
    let answer = signal::encode(&SignalPayload::new(SdpKind::Answer, "memory:abc"));
    for code in ["not json", "{\"type\":\"offer\"}", answer.as_str()] {
      assert!(matches!(registry.join_connection(code).await, Err(Error::MalformedSignal(_))));
    }
    assert!(registry.list_connections().is_empty());
  }

  #[tokio::test]
  async fn failed_open_stores_nothing() {
    let transport = MemoryTransport::new();
    let registry = registry(&transport);
    let stale = signal::encode(&SignalPayload::new(SdpKind::Offer, "memory:gone"));
    assert!(matches!(registry.join_connection(&stale).await, Err(Error::Transport(_))));
    assert!(registry.list_connections().is_empty());
  }

  #[tokio::test]
  async fn list_keeps_insertion_order() {
    let transport = MemoryTransport::new();
    let registry = registry(&transport);
    let first = registry.create_connection().await.unwrap();
    let second = registry.create_connection().await.unwrap();
    let third = registry.create_connection().await.unwrap();

    let ids: Vec<_> = registry.list_connections().into_iter().map(|info| info.id).collect();
    assert_eq!(ids, vec![first.id.clone(), second.id.clone(), third.id.clone()]);

    registry.close_connection(&second.id).await;
    let ids: Vec<_> = registry.list_connections().into_iter().map(|info| info.id).collect();
    assert_eq!(ids, vec![first.id, third.id]);
  }

  #[tokio::test]
  async fn close_is_idempotent_and_ignores_unknown_ids() {
    let transport = MemoryTransport::new();
    let registry = registry(&transport);
    let info = registry.create_connection().await.unwrap();

    registry.close_connection(&info.id).await;
    registry.close_connection(&info.id).await;
    registry.close_connection(&ConnectionId::from("missing")).await;
    assert!(registry.list_connections().is_empty());
    assert_eq!(transport.live_endpoints(), 0);
  }

  #[tokio::test]
  async fn share_on_unknown_or_negotiating_connection_is_refused() {
    let transport = MemoryTransport::new();
    let registry = registry(&transport);
    let url = url::Url::parse("https://example.com").unwrap();
    let link = Link::new(&url, "ex", "Example", chrono::Duration::hours(1)).unwrap();

    let unknown = ConnectionId::from("missing");
    assert!(!registry.share_link(&unknown, &link).await);
    assert!(matches!(
      registry.try_share_link(&unknown, &link).await,
      Err(Error::UnknownConnection(_))
    ));

    let info = registry.create_connection().await.unwrap();
    assert!(!registry.share_link(&info.id, &link).await);
    assert!(matches!(
      registry.try_share_link(&info.id, &link).await,
      Err(Error::NotConnected(_))
    ));
  }

  #[tokio::test]
  async fn accept_answer_validates_target() {
    let transport = MemoryTransport::new();
    let registry = registry(&transport);
    let answer = signal::encode(&SignalPayload::new(SdpKind::Answer, "memory:abc"));

    assert!(matches!(
      registry.accept_answer(&ConnectionId::from("missing"), &answer).await,
      Err(Error::UnknownConnection(_))
    ));
    let info = registry.create_connection().await.unwrap();
    assert!(matches!(
      registry.accept_answer(&info.id, "garbage").await,
      Err(Error::MalformedSignal(_))
    ));
    assert!(matches!(
      registry.accept_answer(&info.id, &answer).await,
      Err(Error::Transport(_))
    ));
    assert_eq!(registry.list_connections().len(), 1);
  }

  #[tokio::test]
  async fn negotiation_timeout_closes_pending_connections() {
    let transport = MemoryTransport::new();
    let config = ShareConfig {
      negotiation_timeout: Some(Duration::from_millis(50)),
      ..ShareConfig::default()
    };
    let registry = ConnectionRegistry::new(Arc::new(transport.clone()), config);
    let (tx, mut rx) = mpsc::unbounded_channel();
    registry.on_connection_status_change(move |id, connected| {
      let _ = tx.send((id.clone(), connected));
    });

    let info = registry.create_connection().await.unwrap();
    let (id, connected) = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(id, info.id);
    assert!(!connected);
    assert!(registry.list_connections().is_empty());
  }

  #[tokio::test]
  async fn destroy_closes_everything() {
    let transport = MemoryTransport::new();
    let registry = registry(&transport);
    registry.create_connection().await.unwrap();
    registry.create_connection().await.unwrap();
    assert_eq!(transport.live_endpoints(), 2);

    registry.destroy().await;
    assert!(registry.list_connections().is_empty());
    assert_eq!(transport.live_endpoints(), 0);
  }

  #[tokio::test]
  async fn dropping_without_destroy_still_releases_connections() {
    let transport = MemoryTransport::new();
    let registry = registry(&transport);
    registry.create_connection().await.unwrap();
    registry.create_connection().await.unwrap();
    assert_eq!(transport.live_endpoints(), 2);

    drop(registry);
    timeout(WAIT, async {
      while transport.live_endpoints() > 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
      }
    })
    .await
    .expect("endpoints released");
  }
}
