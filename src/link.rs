use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::error::{Error, Result};

/// An expiring short link, the unit two peers exchange.
///
/// Timestamps travel as ISO-8601 strings with millisecond precision and are
/// revived into `DateTime<Utc>` on receipt. A record whose timestamp does not
/// parse is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
  pub id: String,
  pub original_url: String,
  pub short_url: String,
  pub title: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(with = "iso_millis")]
  pub expires_at: DateTime<Utc>,
  #[serde(with = "iso_millis")]
  pub created_at: DateTime<Utc>,
  #[serde(default)]
  pub clicks: u64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub shared_by: Option<String>,
}

impl Link {
  pub fn new(original_url: &Url, short_code: &str, title: &str, ttl: Duration) -> Result<Self> {
    match original_url.scheme() {
      "http" | "https" => {}
      other => return Err(Error::InvalidLink(format!("unsupported URL scheme: {other}"))),
    }
    let short_code = short_code.trim();
    if short_code.is_empty() {
      return Err(Error::InvalidLink("short code is required".to_string()));
    }
    if ttl <= Duration::zero() {
      return Err(Error::InvalidLink("expiry must be in the future".to_string()));
    }
    let created_at = now_millis();
    let expires_at = created_at
      .checked_add_signed(ttl)
      .filter(iso_millis::representable)
      .ok_or_else(|| Error::InvalidLink("expiry is too far in the future".to_string()))?;
    let title = title.trim();
    Ok(Self {
      id: Uuid::new_v4().to_string(),
      original_url: original_url.to_string(),
      short_url: short_code.to_string(),
      title: if title.is_empty() { short_code.to_string() } else { title.to_string() },
      description: None,
      expires_at,
      created_at,
      clicks: 0,
      shared_by: None,
    })
  }

  pub fn with_description(mut self, description: impl Into<String>) -> Self {
    self.description = Some(description.into());
    self
  }

  /// Tags the record with who shared it.
  pub fn with_shared_by(mut self, origin: impl Into<String>) -> Self {
    self.shared_by = Some(origin.into());
    self
  }

  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    now >= self.expires_at
  }
}

/// Current time truncated to whole milliseconds, the precision of the wire format.
pub fn now_millis() -> DateTime<Utc> {
  let now = Utc::now();
  DateTime::<Utc>::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

pub(crate) mod iso_millis {
  use chrono::{DateTime, Datelike, SecondsFormat, Utc};
  use serde::{de, ser, Deserialize, Deserializer, Serializer};

  /// RFC 3339 only has four-digit years.
  pub fn representable(value: &DateTime<Utc>) -> bool {
    (0..=9999).contains(&value.year())
  }

  pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    if !representable(value) {
      return Err(ser::Error::custom(format!("timestamp {value} is outside years 0000-9999")));
    }
    serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    DateTime::parse_from_rfc3339(&raw)
      .map(|value| value.with_timezone(&Utc))
      .map_err(|err| de::Error::custom(format!("invalid timestamp {raw:?}: {err}")))
  }
}
