//! Error types for the link-share layer.
//!
//! Decode failures (`MalformedSignal`, `Protocol`) are recovered where they
//! happen. `Transport` only ever takes down the connection it came from.
//! `NotConnected` and `UnknownConnection` surface from the registry's
//! `try_*` calls; the plain calls fold them into `false` / `None`.

use thiserror::Error;

use crate::registry::ConnectionId;

/// Result type alias for link-share operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
  /// A pasted signaling code was not a usable negotiation payload
  #[error("Malformed signaling code: {0}")]
  MalformedSignal(String),

  /// A message received over the data channel was not a valid envelope
  #[error("Protocol error: {0}")]
  Protocol(String),

  /// Negotiation, ICE or data channel failure
  #[error("Transport error: {0}")]
  Transport(String),

  /// Operation needs a connected channel
  #[error("Connection {0} is not connected")]
  NotConnected(ConnectionId),

  /// No live connection has this id
  #[error("Unknown connection: {0}")]
  UnknownConnection(ConnectionId),

  /// A link record could not be built from the given fields
  #[error("Invalid link: {0}")]
  InvalidLink(String),
}

impl From<webrtc::Error> for Error {
  fn from(err: webrtc::Error) -> Self {
    Error::Transport(err.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn messages_name_the_connection() {
    let id = ConnectionId::from("abc123");
    assert_eq!(
      Error::NotConnected(id.clone()).to_string(),
      "Connection abc123 is not connected"
    );
    assert_eq!(Error::UnknownConnection(id).to_string(), "Unknown connection: abc123");
  }

  #[test]
  fn webrtc_errors_become_transport_errors() {
    let err: Error = webrtc::Error::ErrConnectionClosed.into();
    assert!(matches!(err, Error::Transport(_)));
  }
}
