//! Application messages carried over an established data channel.
//!
//! Wire format, one message per share:
//!
//! ```text
//! {"type":"link-share","link":{"id":..,"originalUrl":..,"shortUrl":..,"title":..,
//!   "expiresAt":"2030-01-01T00:00:00.000Z","createdAt":"..","clicks":0}}
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::link::Link;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
  #[serde(rename = "link-share")]
  LinkShare { link: Link },
}

pub fn serialize(link: &Link) -> Result<Bytes> {
  let envelope = Envelope::LinkShare { link: link.clone() };
  serde_json::to_vec(&envelope)
    .map(Bytes::from)
    .map_err(|err| Error::Protocol(format!("encode envelope: {err}")))
}

pub fn deserialize(data: &[u8]) -> Result<Link> {
  let text = std::str::from_utf8(data).map_err(|_| Error::Protocol("envelope is not UTF-8".to_string()))?;
  match serde_json::from_str::<Envelope>(text) {
    Ok(Envelope::LinkShare { link }) => Ok(link),
    Err(err) => Err(Error::Protocol(err.to_string())),
  }
}
