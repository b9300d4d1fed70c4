//! Gateway configuration.

use std::collections::HashSet;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{GatewayError, Result};

/// Summary gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bearer token required on the events endpoint (None = no auth).
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Client IPs allowed to subscribe (None = all).
    #[serde(default)]
    pub ip_allowlist: Option<Vec<String>>,
    /// User-Agent substrings allowed to subscribe (None = all).
    #[serde(default)]
    pub ua_allowlist: Option<Vec<String>>,
    /// Per-IP connection rate, `"N/W"` = N connections per W seconds
    /// (None = unlimited).
    #[serde(default)]
    pub rate_spec: Option<String>,
    /// Maximum concurrent streaming connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Per-connection event budget; burst capacity is twice this
    /// (0 = unlimited).
    #[serde(default = "default_events_per_sec")]
    pub events_per_sec: f64,
    /// Serialized payloads above this many bytes are replaced by a
    /// `truncated` event (0 = unlimited).
    #[serde(default = "default_max_event_bytes")]
    pub max_event_bytes: usize,
    /// Idle sleep between log polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// CORS allow-origin value, `"*"` or an exact origin (None = no
    /// CORS headers).
    #[serde(default)]
    pub allow_origin: Option<String>,
    /// Retry-After value sent with 429 rejections.
    #[serde(default = "default_retry_after_secs")]
    pub retry_after_secs: u64,
}

fn default_port() -> u16 {
    8080
}

fn default_max_connections() -> usize {
    50
}

fn default_events_per_sec() -> f64 {
    100.0
}

fn default_max_event_bytes() -> usize {
    65536
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_retry_after_secs() -> u64 {
    5
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            auth_token: None,
            ip_allowlist: None,
            ua_allowlist: None,
            rate_spec: None,
            max_connections: default_max_connections(),
            events_per_sec: default_events_per_sec(),
            max_event_bytes: default_max_event_bytes(),
            poll_interval_ms: default_poll_interval_ms(),
            allow_origin: None,
            retry_after_secs: default_retry_after_secs(),
        }
    }
}

impl GatewayConfig {
    /// Parsed per-IP rate limit, if configured.
    pub fn rate_limit(&self) -> Result<Option<RateSpec>> {
        match &self.rate_spec {
            Some(spec) => Ok(Some(spec.parse()?)),
            None => Ok(None),
        }
    }

    /// Parsed IP allow-list. Unparseable entries are skipped with a
    /// warning rather than rejecting the whole config.
    pub fn parsed_ip_allowlist(&self) -> Option<HashSet<IpAddr>> {
        self.ip_allowlist.as_ref().map(|entries| {
            entries
                .iter()
                .filter_map(|raw| {
                    let trimmed = raw.trim();
                    match trimmed.parse::<IpAddr>() {
                        Ok(ip) => Some(ip),
                        Err(_) => {
                            warn!(entry = %trimmed, "Ignoring unparseable IP allow-list entry");
                            None
                        }
                    }
                })
                .collect()
        })
    }
}

/// Parsed `"N/W"` rate spec: N connections per W seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateSpec {
    pub max_connections: u32,
    pub window_secs: u64,
}

impl FromStr for RateSpec {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || GatewayError::InvalidRateSpec(s.to_string());
        let (count, window) = s.split_once('/').ok_or_else(invalid)?;
        let max_connections: u32 = count.trim().parse().map_err(|_| invalid())?;
        let window_secs: u64 = window.trim().parse().map_err(|_| invalid())?;
        if max_connections == 0 || window_secs == 0 {
            return Err(invalid());
        }
        Ok(Self {
            max_connections,
            window_secs,
        })
    }
}
