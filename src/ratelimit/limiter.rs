//! Core fixed-window rate limiter implementation.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::clock::{Clock, SystemClock};
use super::counter::RateLimitEntry;
use super::key::{client_addr_key, ClientAddr, KeyGenerator};

/// Default window length (15 minutes).
pub const DEFAULT_WINDOW_MS: u64 = 900_000;
/// Default number of admitted requests per window.
pub const DEFAULT_MAX_REQUESTS: u32 = 100;

/// Callback invoked with the key of every denied call.
pub type LimitCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Policy for a single limiter instance.
pub struct RateLimitConfig<R> {
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Maximum admitted requests per key per window
    pub max_requests: u32,
    /// Maps a request to its key; defaults to the client address
    pub key_generator: Option<KeyGenerator<R>>,
    /// Invoked once for each denied call
    pub on_limit_reached: Option<LimitCallback>,
    /// Refund admitted calls whose guarded operation succeeded
    pub skip_successful_requests: bool,
    /// Refund admitted calls whose guarded operation failed
    pub skip_failed_requests: bool,
}

impl<R> RateLimitConfig<R> {
    /// Create a policy admitting `max_requests` per `window_ms` milliseconds.
    pub fn new(max_requests: u32, window_ms: u64) -> Self {
        Self {
            window_ms,
            max_requests,
            key_generator: None,
            on_limit_reached: None,
            skip_successful_requests: false,
            skip_failed_requests: false,
        }
    }

    pub fn with_key_generator<F>(mut self, key_generator: F) -> Self
    where
        F: Fn(&R) -> String + Send + Sync + 'static,
    {
        self.key_generator = Some(Arc::new(key_generator));
        self
    }

    pub fn on_limit_reached<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_limit_reached = Some(Arc::new(callback));
        self
    }

    pub fn skip_successful_requests(mut self, skip: bool) -> Self {
        self.skip_successful_requests = skip;
        self
    }

    pub fn skip_failed_requests(mut self, skip: bool) -> Self {
        self.skip_failed_requests = skip;
        self
    }

    /// The window length as a [`Duration`].
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl<R> Default for RateLimitConfig<R> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW_MS)
    }
}

impl<R> Clone for RateLimitConfig<R> {
    fn clone(&self) -> Self {
        Self {
            window_ms: self.window_ms,
            max_requests: self.max_requests,
            key_generator: self.key_generator.clone(),
            on_limit_reached: self.on_limit_reached.clone(),
            skip_successful_requests: self.skip_successful_requests,
            skip_failed_requests: self.skip_failed_requests,
        }
    }
}

impl<R> fmt::Debug for RateLimitConfig<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitConfig")
            .field("window_ms", &self.window_ms)
            .field("max_requests", &self.max_requests)
            .field("key_generator", &self.key_generator.is_some())
            .field("on_limit_reached", &self.on_limit_reached.is_some())
            .field("skip_successful_requests", &self.skip_successful_requests)
            .field("skip_failed_requests", &self.skip_failed_requests)
            .finish()
    }
}

/// The decision for one checked call, with quota metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitInfo {
    /// The key the call was counted under
    pub key: String,
    /// Whether the call is admitted
    pub allowed: bool,
    /// Configured maximum per window
    pub limit: u32,
    /// Quota left in the current window
    pub remaining: u32,
    /// When the current window ends
    pub reset_time: DateTime<Utc>,
}

/// Eventual result of the operation a limiter guarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// A fixed-window rate limiter with independent per-key counters.
///
/// Each entry is updated under its map shard lock, so a single instance
/// can be shared across tasks and threads.
pub struct RateLimiter<R> {
    /// Window state indexed by key
    entries: DashMap<String, RateLimitEntry>,
    config: RateLimitConfig<R>,
    key_generator: KeyGenerator<R>,
    clock: Arc<dyn Clock>,
}

impl<R: ClientAddr + 'static> RateLimiter<R> {
    /// Create a limiter on the system clock.
    pub fn new(config: RateLimitConfig<R>) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a limiter on a custom clock.
    pub fn with_clock(config: RateLimitConfig<R>, clock: Arc<dyn Clock>) -> Self {
        let key_generator: KeyGenerator<R> = match config.key_generator.clone() {
            Some(key_generator) => key_generator,
            None => Arc::new(|request: &R| client_addr_key(request)),
        };
        Self::from_parts(config, key_generator, clock)
    }
}

impl<R> RateLimiter<R> {
    /// Create a limiter with an explicit key generator.
    ///
    /// The generator overrides any set on `config`.
    pub fn from_parts(
        config: RateLimitConfig<R>,
        key_generator: KeyGenerator<R>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        debug!(
            max_requests = config.max_requests,
            window_ms = config.window_ms,
            "Creating rate limiter"
        );
        Self {
            entries: DashMap::new(),
            config,
            key_generator,
            clock,
        }
    }

    /// The key a request is counted under.
    pub fn key_for(&self, request: &R) -> String {
        (self.key_generator)(request)
    }

    /// Check and count one call for `request`.
    pub fn check_limit(&self, request: &R) -> RateLimitInfo {
        let key = self.key_for(request);
        self.check_key(&key)
    }

    /// Check and count one call for an already-derived key.
    pub fn check_key(&self, key: &str) -> RateLimitInfo {
        let now = self.clock.now();
        let window = self.config.window();
        let limit = self.config.max_requests;

        let (allowed, remaining, reset_time) = {
            let mut entry = self
                .entries
                .entry(key.to_string())
                .or_insert_with(|| RateLimitEntry::new(now, window));

            if entry.roll_over_if_expired(now, window) {
                trace!(key = %key, "Window expired, starting a new one");
            }

            let allowed = entry.try_admit(limit);
            (allowed, entry.remaining(limit), entry.window_reset_at)
        };

        trace!(
            key = %key,
            allowed = allowed,
            remaining = remaining,
            "Checked rate limit"
        );

        // The shard lock is released before running caller code.
        if !allowed {
            debug!(key = %key, limit = limit, "Rate limit exceeded");
            if let Some(callback) = &self.config.on_limit_reached {
                callback(key);
            }
        }

        RateLimitInfo {
            key: key.to_string(),
            allowed,
            limit,
            remaining,
            reset_time,
        }
    }

    /// Forget the window for `request`, restoring its full quota.
    pub fn reset(&self, request: &R) {
        let key = self.key_for(request);
        self.reset_key(&key);
    }

    /// Forget the window for `key`.
    pub fn reset_key(&self, key: &str) {
        if self.entries.remove(key).is_some() {
            debug!(key = %key, "Rate limit reset");
        }
    }

    /// Report how the operation behind an admitted call ended.
    ///
    /// With `skip_successful_requests` or `skip_failed_requests` set, the
    /// matching outcome gives the attempt back, provided the key is still in
    /// the window the call was counted in.
    ///
    /// Returns the quota left for the key once the outcome is applied.
    pub fn record_outcome(&self, info: &RateLimitInfo, outcome: Outcome) -> u32 {
        if !info.allowed {
            return info.remaining;
        }

        let skip = match outcome {
            Outcome::Success => self.config.skip_successful_requests,
            Outcome::Failure => self.config.skip_failed_requests,
        };
        if !skip {
            return info.remaining;
        }

        match self.entries.get_mut(&info.key) {
            Some(mut entry) if entry.window_reset_at == info.reset_time => {
                entry.refund();
                trace!(key = %info.key, outcome = ?outcome, "Refunded attempt");
                entry.remaining(info.limit)
            }
            _ => info.remaining,
        }
    }

    /// Evict every entry whose window has ended. Returns the number evicted.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut evicted = 0;

        self.entries.retain(|_, entry| {
            let keep = !entry.is_expired(now);
            if !keep {
                evicted += 1;
            }
            keep
        });

        if evicted > 0 {
            debug!(evicted = evicted, remaining = self.entries.len(), "Swept expired windows");
        }
        evicted
    }

    /// Snapshot of the stored window for `key`, expired or not.
    pub fn entry(&self, key: &str) -> Option<RateLimitEntry> {
        self.entries.get(key).map(|entry| entry.clone())
    }

    /// Current time on this limiter's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Whether a window is stored for `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of stored windows.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all stored windows.
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn config(&self) -> &RateLimitConfig<R> {
        &self.config
    }
}

impl<R: ClientAddr + 'static> Default for RateLimiter<R> {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

impl<R> fmt::Debug for RateLimiter<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("entries", &self.entries.len())
            .finish()
    }
}
