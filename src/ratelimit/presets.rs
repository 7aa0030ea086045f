//! Named limiter policies and the set of limiters a server runs with.

use axum::extract::Request;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::client::ClientRateLimiter;
use super::clock::{Clock, SystemClock};
use super::counter::window_end;
use super::limiter::{RateLimitConfig, RateLimiter};
use super::sweeper::{spawn_sweeper, SweepHandle};
use crate::config::{PresetLimits, RateLimitingConfig};

/// Limiter type guarding HTTP routes.
pub type HttpRateLimiter = RateLimiter<Request>;

/// A named policy for a class of endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// Login, signup and password flows
    Auth,
    /// General API traffic
    Api,
    /// File uploads
    Upload,
    /// Search queries
    Search,
    /// Label-keyed throttling on the calling side
    Client,
}

impl Preset {
    /// Every server-side preset, in routing order.
    pub const SERVER: [Preset; 4] = [Preset::Auth, Preset::Api, Preset::Upload, Preset::Search];

    pub fn name(&self) -> &'static str {
        match self {
            Preset::Auth => "auth",
            Preset::Api => "api",
            Preset::Upload => "upload",
            Preset::Search => "search",
            Preset::Client => "client",
        }
    }

    /// Built-in maximum requests per window.
    pub fn max_requests(&self) -> u32 {
        match self {
            Preset::Auth => 5,
            Preset::Api => 1000,
            Preset::Upload => 50,
            Preset::Search => 60,
            Preset::Client => 60,
        }
    }

    /// Built-in window length in milliseconds.
    pub fn window_ms(&self) -> u64 {
        match self {
            Preset::Auth => 15 * 60 * 1000,
            Preset::Api => 15 * 60 * 1000,
            Preset::Upload => 60 * 60 * 1000,
            Preset::Search => 60 * 1000,
            Preset::Client => 60 * 1000,
        }
    }

    /// Window length after applying `limits`.
    pub fn window_with(&self, limits: Option<&PresetLimits>) -> Duration {
        Duration::from_millis(
            limits
                .and_then(|l| l.window_ms)
                .unwrap_or_else(|| self.window_ms()),
        )
    }

    /// The policy for this preset, with optional overrides applied.
    ///
    /// Denials are logged. The auth preset also flags the key in `suspicious`.
    pub fn config<R>(
        &self,
        limits: Option<&PresetLimits>,
        suspicious: &Arc<SuspiciousClients>,
    ) -> RateLimitConfig<R> {
        let max_requests = limits
            .and_then(|l| l.max_requests)
            .unwrap_or_else(|| self.max_requests());
        let window_ms = limits
            .and_then(|l| l.window_ms)
            .unwrap_or_else(|| self.window_ms());

        let preset = *self;
        let suspicious = suspicious.clone();
        RateLimitConfig::new(max_requests, window_ms)
            .skip_successful_requests(limits.is_some_and(|l| l.skip_successful_requests))
            .skip_failed_requests(limits.is_some_and(|l| l.skip_failed_requests))
            .on_limit_reached(move |key| {
                warn!(preset = preset.name(), key = %key, "Rate limit reached");
                if preset == Preset::Auth {
                    suspicious.flag(key);
                }
            })
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A key that has hit the auth limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuspiciousClient {
    pub key: String,
    pub first_flagged_at: DateTime<Utc>,
    pub last_flagged_at: DateTime<Utc>,
    /// Denied auth attempts seen for this key
    pub hits: u64,
}

/// Registry of keys that tripped the auth limiter.
///
/// A key is forgotten once `retention` has passed since its last denial.
pub struct SuspiciousClients {
    clients: DashMap<String, SuspiciousClient>,
    retention: Duration,
    clock: Arc<dyn Clock>,
}

impl SuspiciousClients {
    /// Keep flags for one built-in auth window, on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Preset::Auth.window_with(None), Arc::new(SystemClock))
    }

    pub fn with_clock(retention: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            clients: DashMap::new(),
            retention,
            clock,
        }
    }

    /// Record a denied attempt for `key`.
    pub fn flag(&self, key: &str) {
        let now = self.clock.now();
        self.clients
            .entry(key.to_string())
            .and_modify(|client| {
                client.hits += 1;
                client.last_flagged_at = now;
            })
            .or_insert_with(|| {
                info!(key = %key, "Flagging client as suspicious");
                SuspiciousClient {
                    key: key.to_string(),
                    first_flagged_at: now,
                    last_flagged_at: now,
                    hits: 1,
                }
            });
    }

    pub fn is_flagged(&self, key: &str) -> bool {
        self.clients.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<SuspiciousClient> {
        self.clients.get(key).map(|client| client.clone())
    }

    /// All flagged clients, ordered by key.
    pub fn list(&self) -> Vec<SuspiciousClient> {
        let mut clients: Vec<SuspiciousClient> =
            self.clients.iter().map(|client| client.value().clone()).collect();
        clients.sort_by(|a, b| a.key.cmp(&b.key));
        clients
    }

    pub fn clear(&self, key: &str) -> bool {
        self.clients.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Forget keys not flagged within the retention period. Returns the
    /// number forgotten.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let retention = self.retention;
        let mut evicted = 0;

        self.clients.retain(|_, client| {
            let keep = window_end(client.last_flagged_at, retention) > now;
            if !keep {
                evicted += 1;
            }
            keep
        });

        if evicted > 0 {
            debug!(evicted = evicted, remaining = self.clients.len(), "Swept suspicious clients");
        }
        evicted
    }

    /// Start forgetting stale flags every `every`.
    pub fn start_sweeper(self: &Arc<Self>, every: Duration) -> SweepHandle {
        spawn_sweeper(self, every, "suspicious clients", Self::sweep)
    }
}

impl Default for SuspiciousClients {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SuspiciousClients {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuspiciousClients")
            .field("clients", &self.clients.len())
            .field("retention", &self.retention)
            .finish()
    }
}

/// The limiters a server is composed with, one per server-side preset.
#[derive(Debug, Clone)]
pub struct LimiterSet {
    pub auth: Arc<HttpRateLimiter>,
    pub api: Arc<HttpRateLimiter>,
    pub upload: Arc<HttpRateLimiter>,
    pub search: Arc<HttpRateLimiter>,
    pub suspicious: Arc<SuspiciousClients>,
}

impl LimiterSet {
    /// Build every preset with its built-in limits.
    pub fn new() -> Self {
        Self::from_config(&RateLimitingConfig::default())
    }

    pub fn from_config(config: &RateLimitingConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build every preset on `clock`. Suspicious flags are kept for one
    /// auth window.
    pub fn with_clock(config: &RateLimitingConfig, clock: Arc<dyn Clock>) -> Self {
        let retention = Preset::Auth.window_with(config.presets.get(Preset::Auth));
        let suspicious = Arc::new(SuspiciousClients::with_clock(retention, clock.clone()));
        let build = |preset: Preset| {
            let policy: RateLimitConfig<Request> =
                preset.config(config.presets.get(preset), &suspicious);
            info!(
                preset = preset.name(),
                max_requests = policy.max_requests,
                window_ms = policy.window_ms,
                "Configured rate limit preset"
            );
            Arc::new(HttpRateLimiter::with_clock(policy, clock.clone()))
        };

        Self {
            auth: build(Preset::Auth),
            api: build(Preset::Api),
            upload: build(Preset::Upload),
            search: build(Preset::Search),
            suspicious: suspicious.clone(),
        }
    }

    /// The limiter for a server-side preset.
    pub fn get(&self, preset: Preset) -> Option<&Arc<HttpRateLimiter>> {
        match preset {
            Preset::Auth => Some(&self.auth),
            Preset::Api => Some(&self.api),
            Preset::Upload => Some(&self.upload),
            Preset::Search => Some(&self.search),
            Preset::Client => None,
        }
    }

    /// Start a sweeper for every limiter in the set and one for the
    /// suspicious-client registry.
    pub fn start_sweepers(&self, every: Duration) -> SweeperGroup {
        let mut handles: Vec<(&'static str, SweepHandle)> = Preset::SERVER
            .iter()
            .filter_map(|&preset| {
                self.get(preset)
                    .map(|limiter| (preset.name(), limiter.start_sweeper(every)))
            })
            .collect();
        handles.push(("suspicious", self.suspicious.start_sweeper(every)));
        SweeperGroup { handles }
    }
}

impl Default for LimiterSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the label-keyed client limiter from configuration.
pub fn client_limiter(config: &RateLimitingConfig) -> ClientRateLimiter {
    let limits = config.presets.get(Preset::Client);
    ClientRateLimiter::with_limits(
        limits
            .and_then(|l| l.max_requests)
            .unwrap_or_else(|| Preset::Client.max_requests()),
        limits
            .and_then(|l| l.window_ms)
            .unwrap_or_else(|| Preset::Client.window_ms()),
    )
}

/// Sweep tasks owned together, stopped together.
#[derive(Debug)]
pub struct SweeperGroup {
    handles: Vec<(&'static str, SweepHandle)>,
}

impl SweeperGroup {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Stop every sweeper and wait for them to finish.
    pub async fn stop_all(self) {
        for (name, handle) in self.handles {
            handle.stop().await;
            info!(sweeper = name, "Sweeper stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use axum::body::Body;
    use axum::extract::ConnectInfo;
    use std::net::SocketAddr;

    fn request_from(addr: &str) -> Request {
        let mut request = Request::new(Body::empty());
        let addr: SocketAddr = addr.parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        request
    }

    #[test]
    fn test_builtin_limits() {
        assert_eq!((Preset::Auth.max_requests(), Preset::Auth.window_ms()), (5, 900_000));
        assert_eq!((Preset::Api.max_requests(), Preset::Api.window_ms()), (1000, 900_000));
        assert_eq!((Preset::Upload.max_requests(), Preset::Upload.window_ms()), (50, 3_600_000));
        assert_eq!((Preset::Search.max_requests(), Preset::Search.window_ms()), (60, 60_000));
        assert_eq!((Preset::Client.max_requests(), Preset::Client.window_ms()), (60, 60_000));
    }

    #[test]
    fn test_override_replaces_numbers() {
        let suspicious = Arc::new(SuspiciousClients::new());
        let limits = PresetLimits {
            max_requests: Some(7),
            skip_failed_requests: true,
            ..Default::default()
        };

        let config: RateLimitConfig<Request> = Preset::Search.config(Some(&limits), &suspicious);
        assert_eq!(config.max_requests, 7);
        assert_eq!(config.window_ms, 60_000);
        assert!(config.skip_failed_requests);
        assert!(!config.skip_successful_requests);
        assert!(config.on_limit_reached.is_some());
    }

    #[test]
    fn test_auth_preset_five_then_denied() {
        let set = LimiterSet::with_clock(
            &RateLimitingConfig::default(),
            Arc::new(ManualClock::default()),
        );
        let request = request_from("1.2.3.4:5555");

        for _ in 0..5 {
            assert!(set.auth.check_limit(&request).allowed);
        }
        let info = set.auth.check_limit(&request);
        assert!(!info.allowed);
        assert_eq!(info.limit, 5);
    }

    #[test]
    fn test_auth_denial_flags_client() {
        let set = LimiterSet::with_clock(
            &RateLimitingConfig::default(),
            Arc::new(ManualClock::default()),
        );
        let request = request_from("9.9.9.9:1");

        for _ in 0..7 {
            set.auth.check_limit(&request);
        }

        let client = set.suspicious.get("9.9.9.9").unwrap();
        assert_eq!(client.hits, 2);
        assert_eq!(set.suspicious.len(), 1);
    }

    #[test]
    fn test_other_presets_do_not_flag() {
        let mut config = RateLimitingConfig::default();
        config.presets.search = Some(PresetLimits {
            max_requests: Some(1),
            ..Default::default()
        });
        let set = LimiterSet::with_clock(&config, Arc::new(ManualClock::default()));
        let request = request_from("9.9.9.9:1");

        set.search.check_limit(&request);
        assert!(!set.search.check_limit(&request).allowed);
        assert!(set.suspicious.is_empty());
    }

    #[test]
    fn test_limiters_are_separate_instances() {
        let set = LimiterSet::new();
        let request = request_from("1.2.3.4:1");

        for _ in 0..6 {
            set.auth.check_limit(&request);
        }
        assert!(set.api.check_limit(&request).allowed);
        assert!(set.get(Preset::Client).is_none());
    }

    #[test]
    fn test_suspicious_list_sorted_and_clear() {
        let suspicious = SuspiciousClients::new();
        suspicious.flag("b");
        suspicious.flag("a");
        suspicious.flag("b");

        let keys: Vec<String> = suspicious.list().into_iter().map(|c| c.key).collect();
        assert_eq!(keys, vec!["a", "b"]);

        assert!(suspicious.clear("a"));
        assert!(!suspicious.is_flagged("a"));
        assert!(!suspicious.clear("a"));
    }

    #[test]
    fn test_client_limiter_from_config() {
        let mut config = RateLimitingConfig::default();
        config.presets.client = Some(PresetLimits {
            max_requests: Some(2),
            window_ms: Some(1_000),
            ..Default::default()
        });

        let client = client_limiter(&config);
        assert_eq!(client.limiter().config().max_requests, 2);
        assert_eq!(client.limiter().config().window_ms, 1_000);
    }

    #[test]
    fn test_flag_times_follow_clock() {
        let clock = Arc::new(ManualClock::default());
        let suspicious = SuspiciousClients::with_clock(Duration::from_secs(60), clock.clone());
        let first = clock.now();

        suspicious.flag("a");
        clock.advance_ms(5_000);
        suspicious.flag("a");

        let client = suspicious.get("a").unwrap();
        assert_eq!(client.first_flagged_at, first);
        assert_eq!(client.last_flagged_at, first + chrono::TimeDelta::seconds(5));
        assert_eq!(client.hits, 2);
    }

    #[test]
    fn test_stale_flags_are_swept() {
        let clock = Arc::new(ManualClock::default());
        let suspicious = SuspiciousClients::with_clock(Duration::from_secs(60), clock.clone());

        suspicious.flag("old");
        clock.advance_ms(30_000);
        suspicious.flag("recent");
        assert_eq!(suspicious.sweep(), 0);

        clock.advance_ms(30_000);
        assert_eq!(suspicious.sweep(), 1);
        assert!(!suspicious.is_flagged("old"));
        assert!(suspicious.is_flagged("recent"));

        // A fresh denial keeps a key around
        suspicious.flag("recent");
        clock.advance_ms(45_000);
        assert_eq!(suspicious.sweep(), 0);
    }

    #[test]
    fn test_rotating_callers_do_not_accumulate() {
        let clock = Arc::new(ManualClock::default());
        let set = LimiterSet::with_clock(&RateLimitingConfig::default(), clock.clone());

        for i in 0..100 {
            let request = request_from(&format!("10.0.{}.{}:1", i / 256, i % 256));
            for _ in 0..6 {
                set.auth.check_limit(&request);
            }
        }
        assert_eq!(set.suspicious.len(), 100);
        assert_eq!(set.suspicious.retention(), Duration::from_millis(900_000));

        clock.advance_ms(900_000);
        assert_eq!(set.auth.sweep(), 100);
        assert_eq!(set.suspicious.sweep(), 100);
        assert!(set.suspicious.is_empty());
    }

    #[test]
    fn test_retention_follows_auth_window_override() {
        let mut config = RateLimitingConfig::default();
        config.presets.auth = Some(PresetLimits {
            window_ms: Some(10_000),
            ..Default::default()
        });
        let set = LimiterSet::with_clock(&config, Arc::new(ManualClock::default()));

        assert_eq!(set.suspicious.retention(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_sweeper_group_covers_presets_and_registry() {
        let set = LimiterSet::new();
        let group = set.start_sweepers(Duration::from_secs(60));

        assert_eq!(group.len(), 5);
        group.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_group_forgets_stale_flags() {
        let clock = Arc::new(ManualClock::default());
        let set = LimiterSet::with_clock(&RateLimitingConfig::default(), clock.clone());
        let group = set.start_sweepers(Duration::from_secs(1));

        let request = request_from("9.9.9.9:1");
        for _ in 0..6 {
            set.auth.check_limit(&request);
        }
        assert!(set.suspicious.is_flagged("9.9.9.9"));

        clock.advance_ms(900_000);
        tokio::time::sleep(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;

        assert!(set.suspicious.is_empty());
        assert!(set.auth.is_empty());
        group.stop_all().await;
    }
}
