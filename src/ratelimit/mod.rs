//! Rate limiting logic and state management.

mod client;
pub mod clock;
mod counter;
mod key;
mod limiter;
mod presets;
mod sweeper;

pub use client::{ClientRateLimiter, CLIENT_MAX_REQUESTS, CLIENT_WINDOW_MS};
pub use clock::{Clock, ManualClock, SystemClock};
pub use counter::{retry_after_secs, RateLimitEntry};
pub use key::{client_addr_key, ClientAddr, KeyGenerator, UNKNOWN_KEY};
pub use limiter::{
    LimitCallback, Outcome, RateLimitConfig, RateLimitInfo, RateLimiter, DEFAULT_MAX_REQUESTS,
    DEFAULT_WINDOW_MS,
};
pub use presets::{
    client_limiter, HttpRateLimiter, LimiterSet, Preset, SuspiciousClient, SuspiciousClients,
    SweeperGroup,
};
pub use sweeper::{SweepHandle, DEFAULT_SWEEP_INTERVAL};
