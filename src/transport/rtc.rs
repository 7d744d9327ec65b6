//! WebRTC transport: one peer connection with a single ordered data channel.
//!
//! Negotiation is single-shot. Each side waits for ICE gathering to finish
//! before publishing its session description, so the description carries every
//! candidate and no trickle exchange is needed.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use super::{Channel, EventSink, Role, Transport, TransportEvent};
use crate::config::ShareConfig;
use crate::error::{Error, Result};
use crate::signal::{SdpKind, SignalPayload};

const DRAIN_POLL: Duration = Duration::from_millis(10);
const DRAIN_ATTEMPTS: usize = 500;

pub struct WebRtcTransport {
  config: ShareConfig,
}

impl WebRtcTransport {
  pub fn new(config: ShareConfig) -> Self {
    Self { config }
  }
}

#[async_trait]
impl Transport for WebRtcTransport {
  async fn open(&self, role: Role, remote: Option<SignalPayload>, events: EventSink) -> Result<Arc<dyn Channel>> {
    let pc = create_peer_connection(&self.config).await?;
    let channel = Arc::new(WebRtcChannel {
      pc: pc.clone(),
      data: Arc::new(Mutex::new(None)),
    });
    watch_connection_state(&pc, events.clone());

    let started = match role {
      Role::Initiator => start_initiator(&pc, &channel, &self.config.channel_label, events.clone()).await,
      Role::Responder => start_responder(&pc, &channel, remote, events.clone()).await,
    };
    if let Err(err) = started {
      let _ = pc.close().await;
      return Err(err);
    }

    let kind = match role {
      Role::Initiator => SdpKind::Offer,
      Role::Responder => SdpKind::Answer,
    };
    tokio::spawn(async move {
      if let Err(err) = publish_local_description(&pc, kind, &events).await {
        warn!(connection = %events.connection_id(), error = %err, "negotiation failed");
        events.emit(TransportEvent::Failed(err.to_string()));
      }
    });
    Ok(channel)
  }
}

async fn create_peer_connection(config: &ShareConfig) -> Result<Arc<RTCPeerConnection>> {
  let mut media_engine = MediaEngine::default();
  media_engine.register_default_codecs()?;

  let mut registry = Registry::new();
  registry = register_default_interceptors(registry, &mut media_engine)?;

  let api = APIBuilder::new()
    .with_media_engine(media_engine)
    .with_interceptor_registry(registry)
    .build();

  let ice_servers = if config.stun_servers.is_empty() {
    Vec::new()
  } else {
    vec![RTCIceServer {
      urls: config.stun_servers.clone(),
      ..Default::default()
    }]
  };
  let rtc_config = RTCConfiguration {
    ice_servers,
    ..Default::default()
  };

  let pc = api.new_peer_connection(rtc_config).await?;
  Ok(Arc::new(pc))
}

async fn start_initiator(
  pc: &Arc<RTCPeerConnection>,
  channel: &WebRtcChannel,
  label: &str,
  events: EventSink,
) -> Result<()> {
  let dc = pc
    .create_data_channel(
      label,
      Some(RTCDataChannelInit {
        ordered: Some(true),
        ..Default::default()
      }),
    )
    .await?;
  wire_data_channel(&dc, events);
  *channel.data.lock() = Some(dc);
  Ok(())
}

async fn start_responder(
  pc: &Arc<RTCPeerConnection>,
  channel: &WebRtcChannel,
  remote: Option<SignalPayload>,
  events: EventSink,
) -> Result<()> {
  let offer = remote.ok_or_else(|| Error::MalformedSignal("a responder needs the initiator's offer".to_string()))?;
  let desc = RTCSessionDescription::offer(offer.sdp().to_string())
    .map_err(|err| Error::MalformedSignal(format!("unusable offer: {err}")))?;

  let slot = channel.data.clone();
  pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
    let slot = slot.clone();
    let events = events.clone();
    Box::pin(async move {
      debug!(connection = %events.connection_id(), label = dc.label(), "remote data channel");
      wire_data_channel(&dc, events);
      *slot.lock() = Some(dc);
    })
  }));

  pc.set_remote_description(desc)
    .await
    .map_err(|err| Error::MalformedSignal(format!("offer rejected: {err}")))?;
  Ok(())
}

async fn publish_local_description(pc: &RTCPeerConnection, kind: SdpKind, events: &EventSink) -> Result<()> {
  let desc = match kind {
    SdpKind::Offer => pc.create_offer(None).await?,
    SdpKind::Answer => pc.create_answer(None).await?,
  };
  let mut gather_complete = pc.gathering_complete_promise().await;
  pc.set_local_description(desc).await?;
  let _ = gather_complete.recv().await;

  let local = pc
    .local_description()
    .await
    .ok_or_else(|| Error::Transport("no local description after ICE gathering".to_string()))?;
  debug!(connection = %events.connection_id(), ?kind, "local description ready");
  events.emit(TransportEvent::Signal(SignalPayload::new(kind, local.sdp)));
  Ok(())
}

fn watch_connection_state(pc: &RTCPeerConnection, events: EventSink) {
  pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
    let events = events.clone();
    Box::pin(async move {
      debug!(connection = %events.connection_id(), ?state, "peer connection state");
      match state {
        RTCPeerConnectionState::Failed => events.emit(TransportEvent::Failed("ICE negotiation failed".to_string())),
        RTCPeerConnectionState::Closed => events.emit(TransportEvent::Closed),
        _ => {}
      }
    })
  }));
}

fn wire_data_channel(dc: &RTCDataChannel, events: EventSink) {
  let open_events = events.clone();
  dc.on_open(Box::new(move || {
    open_events.emit(TransportEvent::Open);
    Box::pin(async {})
  }));

  let message_events = events.clone();
  dc.on_message(Box::new(move |msg: DataChannelMessage| {
    message_events.emit(TransportEvent::Message(msg.data));
    Box::pin(async {})
  }));

  let error_events = events.clone();
  dc.on_error(Box::new(move |err: webrtc::Error| {
    error_events.emit(TransportEvent::Failed(err.to_string()));
    Box::pin(async {})
  }));

  dc.on_close(Box::new(move || {
    events.emit(TransportEvent::Closed);
    Box::pin(async {})
  }));
}

struct WebRtcChannel {
  pc: Arc<RTCPeerConnection>,
  data: Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
}

impl WebRtcChannel {
  fn open_data_channel(&self) -> Result<Arc<RTCDataChannel>> {
    let dc = self.data.lock().clone();
    match dc {
      Some(dc) if dc.ready_state() == RTCDataChannelState::Open => Ok(dc),
      _ => Err(Error::Transport("data channel is not open".to_string())),
    }
  }
}

#[async_trait]
impl Channel for WebRtcChannel {
  async fn apply_answer(&self, answer: SignalPayload) -> Result<()> {
    let desc = RTCSessionDescription::answer(answer.sdp().to_string())
      .map_err(|err| Error::MalformedSignal(format!("unusable answer: {err}")))?;
    self.pc.set_remote_description(desc).await?;
    Ok(())
  }

  async fn send(&self, data: Bytes) -> Result<()> {
    let dc = self.open_data_channel()?;
    dc.send(&data).await?;
    Ok(())
  }

  async fn drain(&self) {
    let Some(dc) = self.data.lock().clone() else {
      return;
    };
    for _ in 0..DRAIN_ATTEMPTS {
      if dc.ready_state() != RTCDataChannelState::Open {
        break;
      }
      if dc.buffered_amount().await == 0 {
        break;
      }
      sleep(DRAIN_POLL).await;
    }
  }

  async fn close(&self) {
    if let Err(err) = self.pc.close().await {
      debug!(error = %err, "closing peer connection");
    }
  }
}
