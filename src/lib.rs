//! Peer-to-peer sharing of expiring short links.
//!
//! Two users connect their sessions directly over a WebRTC data channel. The
//! initiator's offer and the responder's answer are exchanged by hand as
//! copy-paste signaling codes; no signaling server is involved. Once
//! connected, either side can push [`Link`] records to the other.
//!
//! ```text
//!   X: create_connection() ──offer code──►  Y: join_connection(code)
//!   X: accept_answer(code) ◄──answer code── Y
//!   X: share_link(id, link) ═══data channel═══► Y: on_link_received(link)
//! ```

pub mod config;
pub mod error;
pub mod link;
pub mod peer;
pub mod protocol;
pub mod registry;
pub mod signal;
pub mod transport;

pub use config::ShareConfig;
pub use error::{Error, Result};
pub use link::Link;
pub use peer::PeerState;
pub use registry::{ConnectionId, ConnectionInfo, ConnectionRegistry};
