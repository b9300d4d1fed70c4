//! Connection admission for the event stream.
//!
//! Checks run in a fixed order: bearer token, IP allow-list,
//! User-Agent allow-list, per-IP rate window, then the global
//! connection cap. The first failing check decides the response.

use std::collections::{HashSet, VecDeque};
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;

use crate::config::{GatewayConfig, RateSpec};
use crate::error::Result;

type RateWindow = DashMap<IpAddr, VecDeque<Instant>>;

/// Limits the number of concurrent streaming connections.
#[derive(Debug)]
pub struct ConnectionLimiter {
    current: AtomicUsize,
    max: usize,
}

impl ConnectionLimiter {
    pub fn new(max: usize) -> Self {
        Self {
            current: AtomicUsize::new(0),
            max,
        }
    }

    /// Try to claim a connection slot. Returns None when the cap is
    /// reached; the returned guard releases the slot on drop.
    pub fn try_acquire(limiter: &Arc<Self>) -> Option<ConnectionGuard> {
        loop {
            let current = limiter.current.load(Ordering::Acquire);
            if current >= limiter.max {
                return None;
            }
            if limiter
                .current
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(ConnectionGuard {
                    limiter: Arc::clone(limiter),
                });
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }
}

/// RAII guard for an acquired connection slot.
#[derive(Debug)]
pub struct ConnectionGuard {
    limiter: Arc<ConnectionLimiter>,
}

impl ConnectionGuard {
    /// Active connections, including the one holding this guard.
    pub fn active_peers(&self) -> usize {
        self.limiter.active_count()
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.limiter.current.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Why a connection attempt was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    BadToken,
    IpNotAllowed,
    UaNotAllowed,
    RateLimited,
    AtCapacity,
}

impl Rejection {
    /// Short label used in logs and rejection counters.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::BadToken => "token",
            Self::IpNotAllowed => "ip",
            Self::UaNotAllowed => "user_agent",
            Self::RateLimited => "rate",
            Self::AtCapacity => "capacity",
        }
    }

    /// HTTP response for this rejection. Rate and capacity rejections
    /// carry a Retry-After header.
    pub fn response(&self, retry_after_secs: u64) -> Response {
        let (status, body) = match self {
            Self::BadToken => (StatusCode::UNAUTHORIZED, "Unauthorized"),
            Self::IpNotAllowed | Self::UaNotAllowed => (StatusCode::FORBIDDEN, "Forbidden"),
            Self::RateLimited | Self::AtCapacity => {
                (StatusCode::TOO_MANY_REQUESTS, "Too Many Requests")
            }
        };
        let mut response = (status, body).into_response();
        if matches!(self, Self::RateLimited | Self::AtCapacity) {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response
    }
}

/// Reservation in the per-IP rate window. Dropping it returns the
/// slot so a closed connection does not keep burning the budget.
#[derive(Debug)]
pub struct WindowSlot {
    window: Arc<RateWindow>,
    ip: IpAddr,
    stamp: Instant,
}

impl Drop for WindowSlot {
    fn drop(&mut self) {
        let mut emptied = false;
        if let Some(mut stamps) = self.window.get_mut(&self.ip) {
            // The stamp may have been pruned by age already.
            if let Some(pos) = stamps.iter().position(|t| *t == self.stamp) {
                stamps.remove(pos);
            }
            emptied = stamps.is_empty();
        }
        if emptied {
            self.window.remove_if(&self.ip, |_, stamps| stamps.is_empty());
        }
    }
}

/// Handle for an admitted connection. Holds the rate-window slot and
/// the connection slot until dropped.
#[derive(Debug)]
pub struct Admitted {
    #[allow(dead_code)]
    slot: Option<WindowSlot>,
    guard: ConnectionGuard,
}

impl Admitted {
    /// Active connections, including this one.
    pub fn active_peers(&self) -> usize {
        self.guard.active_peers()
    }
}

/// Gate applied to every streaming connection attempt.
pub struct AdmissionControl {
    token: Option<String>,
    ip_allowlist: Option<HashSet<IpAddr>>,
    ua_allowlist: Option<Vec<String>>,
    rate: Option<RateSpec>,
    window: Arc<RateWindow>,
    limiter: Arc<ConnectionLimiter>,
}

impl AdmissionControl {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        Ok(Self {
            token: config.auth_token.clone(),
            ip_allowlist: config.parsed_ip_allowlist(),
            ua_allowlist: config.ua_allowlist.clone(),
            rate: config.rate_limit()?,
            window: Arc::new(DashMap::new()),
            limiter: Arc::new(ConnectionLimiter::new(config.max_connections)),
        })
    }

    /// Run the admission checks for one connection attempt.
    pub fn admit(
        &self,
        remote_ip: IpAddr,
        token: Option<&str>,
        user_agent: Option<&str>,
    ) -> std::result::Result<Admitted, Rejection> {
        if let Some(expected) = &self.token {
            if token != Some(expected.as_str()) {
                return Err(Rejection::BadToken);
            }
        }
        if let Some(allowed) = &self.ip_allowlist {
            if !allowed.contains(&remote_ip) {
                return Err(Rejection::IpNotAllowed);
            }
        }
        if let Some(patterns) = &self.ua_allowlist {
            let matched = user_agent
                .map(|ua| patterns.iter().any(|p| ua.contains(p.as_str())))
                .unwrap_or(false);
            if !matched {
                return Err(Rejection::UaNotAllowed);
            }
        }
        // The window slot is reserved before the cap check; a capacity
        // rejection hands the slot straight back via Drop.
        let slot = match &self.rate {
            Some(spec) => Some(self.try_reserve_window(remote_ip, *spec)?),
            None => None,
        };
        let guard = ConnectionLimiter::try_acquire(&self.limiter).ok_or(Rejection::AtCapacity)?;
        Ok(Admitted { slot, guard })
    }

    pub fn active_count(&self) -> usize {
        self.limiter.active_count()
    }

    fn try_reserve_window(
        &self,
        ip: IpAddr,
        spec: RateSpec,
    ) -> std::result::Result<WindowSlot, Rejection> {
        let now = Instant::now();
        let window = Duration::from_secs(spec.window_secs);
        let mut stamps = self.window.entry(ip).or_default();
        while let Some(front) = stamps.front() {
            if now.duration_since(*front) >= window {
                stamps.pop_front();
            } else {
                break;
            }
        }
        if stamps.len() >= spec.max_connections as usize {
            return Err(Rejection::RateLimited);
        }
        stamps.push_back(now);
        Ok(WindowSlot {
            window: Arc::clone(&self.window),
            ip,
            stamp: now,
        })
    }
}
