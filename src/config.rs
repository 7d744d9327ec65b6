use std::env;
use std::time::Duration;

use tracing::warn;

const DEFAULT_STUN_SERVERS: &[&str] = &[
  "stun:stun.l.google.com:19302",
  "stun:stun1.l.google.com:19302",
  "stun:stun.cloudflare.com:3478",
];

pub const STUN_ENV: &str = "LINKSHARE_STUN_SERVERS";
pub const TIMEOUT_ENV: &str = "LINKSHARE_NEGOTIATION_TIMEOUT_SECS";

/// Settings shared by every connection a registry opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareConfig {
  /// STUN rendezvous servers used for ICE gathering
  pub stun_servers: Vec<String>,
  /// Label of the ordered data channel the initiator opens
  pub channel_label: String,
  /// Close connections still negotiating after this long. `None` waits forever.
  pub negotiation_timeout: Option<Duration>,
}

impl Default for ShareConfig {
  fn default() -> Self {
    Self {
      stun_servers: DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
      channel_label: "linkshare".to_string(),
      negotiation_timeout: None,
    }
  }
}

impl ShareConfig {
  /// Defaults overlaid with `LINKSHARE_STUN_SERVERS` and
  /// `LINKSHARE_NEGOTIATION_TIMEOUT_SECS`.
  pub fn from_env() -> Self {
    Self::default().with_overrides(env::var(STUN_ENV).ok().as_deref(), env::var(TIMEOUT_ENV).ok().as_deref())
  }

  fn with_overrides(mut self, stun: Option<&str>, timeout_secs: Option<&str>) -> Self {
    if let Some(list) = stun {
      let servers = parse_server_list(list);
      if !servers.is_empty() {
        self.stun_servers = servers;
      }
    }
    if let Some(raw) = timeout_secs {
      match raw.trim().parse::<u64>() {
        Ok(0) => self.negotiation_timeout = None,
        Ok(secs) => self.negotiation_timeout = Some(Duration::from_secs(secs)),
        Err(_) => warn!(value = raw, "ignoring invalid {TIMEOUT_ENV}"),
      }
    }
    self
  }
}

fn parse_server_list(value: &str) -> Vec<String> {
  value
    .split(',')
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(str::to_string)
    .collect()
}
