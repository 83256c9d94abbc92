//! Per-source-address admission control.
//!
//! Sliding one-minute window per originating IP: the (N+1)th request inside
//! the window is rejected regardless of which callback URL it targets. This
//! is gate 1; the per-context request ceiling (gate 2) lives with the
//! context record and is enforced by the orchestrator.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Idle-entry cleanup kicks in once the address map grows past this.
const PRUNE_THRESHOLD: usize = 1024;

/// Sliding-window rate limiter keyed by source address.
pub struct SourceRateLimiter {
    max_per_window: u32,
    window: Duration,
    windows: Mutex<HashMap<IpAddr, VecDeque<Instant>>>,
}

impl SourceRateLimiter {
    /// Create a limiter admitting `requests_per_minute` per address.
    pub fn new(requests_per_minute: u32) -> Self {
        Self::with_window(requests_per_minute, Duration::from_secs(60))
    }

    /// Create a limiter with a custom window length.
    pub fn with_window(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Admit or reject a request from `addr`, recording it when admitted.
    pub async fn check(&self, addr: IpAddr) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;

        if windows.len() > PRUNE_THRESHOLD {
            let window = self.window;
            windows.retain(|_, hits| {
                while hits.front().is_some_and(|&t| now - t >= window) {
                    hits.pop_front();
                }
                !hits.is_empty()
            });
        }

        let hits = windows.entry(addr).or_default();
        while hits.front().is_some_and(|&t| now - t >= self.window) {
            hits.pop_front();
        }

        if hits.len() >= self.max_per_window as usize {
            debug!(addr = %addr, hits = hits.len(), "Source rate limit hit");
            return false;
        }

        hits.push_back(now);
        true
    }

    /// Configured admissions per window.
    pub fn max_per_window(&self) -> u32 {
        self.max_per_window
    }
}
