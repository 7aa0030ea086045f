//! Label-keyed throttling for outbound calls.
//!
//! Callers that have no network address to key on (a browser tab, a CLI, a
//! background job) throttle themselves per endpoint label instead.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;

use super::clock::{Clock, SystemClock};
use super::counter::retry_after_secs;
use super::limiter::{RateLimitConfig, RateLimitInfo, RateLimiter};
use crate::error::{Result, WindowgateError};

/// Default number of calls per label per window.
pub const CLIENT_MAX_REQUESTS: u32 = 60;
/// Default client window (one minute).
pub const CLIENT_WINDOW_MS: u64 = 60_000;

/// A fixed-window limiter keyed by caller-chosen labels.
#[derive(Debug)]
pub struct ClientRateLimiter {
    inner: RateLimiter<String>,
}

impl ClientRateLimiter {
    /// 60 calls per label per minute.
    pub fn new() -> Self {
        Self::with_limits(CLIENT_MAX_REQUESTS, CLIENT_WINDOW_MS)
    }

    pub fn with_limits(max_requests: u32, window_ms: u64) -> Self {
        Self::with_clock(
            RateLimitConfig::new(max_requests, window_ms),
            Arc::new(SystemClock),
        )
    }

    /// Build from a full policy on a custom clock. Any key generator on
    /// `config` is ignored; labels are used verbatim.
    pub fn with_clock(config: RateLimitConfig<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: RateLimiter::from_parts(config, Arc::new(|label: &String| label.clone()), clock),
        }
    }

    /// Check and count one call under `label`.
    pub fn check(&self, label: &str) -> RateLimitInfo {
        self.inner.check_key(label)
    }

    /// Consume one call under `label`, returning whether it was admitted.
    pub fn can_make_request(&self, label: &str) -> bool {
        self.check(label).allowed
    }

    /// Quota left under `label` without consuming any.
    pub fn remaining(&self, label: &str) -> u32 {
        let limit = self.inner.config().max_requests;
        let now = self.inner.now();

        match self.inner.entry(label) {
            Some(entry) if !entry.is_expired(now) => entry.remaining(limit),
            _ => limit,
        }
    }

    /// When the current window for `label` ends, if one is open.
    pub fn reset_time(&self, label: &str) -> Option<DateTime<Utc>> {
        let now = self.inner.now();
        self.inner
            .entry(label)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.window_reset_at)
    }

    pub fn reset(&self, label: &str) {
        self.inner.reset_key(label);
    }

    pub fn clear(&self) {
        self.inner.clear();
    }

    /// Run `call` if `label` still has quota.
    ///
    /// A denied call is never polled.
    pub async fn throttle<F, T>(&self, label: &str, call: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        let info = self.check(label);
        if !info.allowed {
            return Err(WindowgateError::RateLimited {
                key: info.key,
                retry_after_secs: retry_after_secs(info.reset_time, self.inner.now()),
            });
        }
        Ok(call.await)
    }

    /// The underlying limiter, e.g. to sweep it.
    pub fn limiter(&self) -> &RateLimiter<String> {
        &self.inner
    }
}

impl Default for ClientRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
