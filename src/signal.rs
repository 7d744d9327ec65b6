//! Signaling codes: the one-shot offer/answer payload users copy between peers.
//!
//! ICE gathering finishes before a code is produced, so the session
//! description already lists every candidate and one paste is enough.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
  Offer,
  Answer,
}

/// Negotiation payload produced by one side's transport and consumed by the other's.
///
/// Only transports look inside; everything else treats it as opaque.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalPayload {
  #[serde(rename = "type")]
  kind: SdpKind,
  sdp: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  origin: Option<String>,
}

impl SignalPayload {
  pub fn new(kind: SdpKind, sdp: impl Into<String>) -> Self {
    Self { kind, sdp: sdp.into(), origin: None }
  }

  /// Stamps the sender's connection id so the receiver can record its remote id.
  pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
    self.origin = Some(origin.into());
    self
  }

  pub fn kind(&self) -> SdpKind {
    self.kind
  }

  pub fn sdp(&self) -> &str {
    &self.sdp
  }

  pub fn origin(&self) -> Option<&str> {
    self.origin.as_deref()
  }
}

pub fn encode(payload: &SignalPayload) -> String {
  // A struct of strings always serializes.
  serde_json::to_string(payload).unwrap_or_default()
}

pub fn decode(code: &str) -> Result<SignalPayload> {
  let payload: SignalPayload =
    serde_json::from_str(code.trim()).map_err(|err| Error::MalformedSignal(err.to_string()))?;
  if payload.sdp.trim().is_empty() {
    return Err(Error::MalformedSignal("session description is empty".to_string()));
  }
  Ok(payload)
}

/// Decodes a code and checks it is the half of the exchange the caller expects.
pub fn decode_expecting(code: &str, kind: SdpKind) -> Result<SignalPayload> {
  let payload = decode(code)?;
  if payload.kind != kind {
    return Err(Error::MalformedSignal(format!(
      "expected an {} code, got an {} code",
      kind_name(kind),
      kind_name(payload.kind)
    )));
  }
  Ok(payload)
}

fn kind_name(kind: SdpKind) -> &'static str {
  match kind {
    SdpKind::Offer => "offer",
    SdpKind::Answer => "answer",
  }
}
