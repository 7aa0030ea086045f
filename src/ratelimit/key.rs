//! Key derivation for incoming requests.

use axum::extract::ConnectInfo;
use axum::http::Request;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

/// Key shared by every request that carries no client address.
pub const UNKNOWN_KEY: &str = "unknown";

/// A strategy that maps a request to the key its quota is counted under.
pub type KeyGenerator<R> = Arc<dyn Fn(&R) -> String + Send + Sync>;

/// Anything that may know the network address of the caller.
pub trait ClientAddr {
    /// The caller's address, if the value carries one.
    fn client_addr(&self) -> Option<IpAddr>;
}

impl<B> ClientAddr for Request<B> {
    fn client_addr(&self) -> Option<IpAddr> {
        self.extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    }
}

impl ClientAddr for SocketAddr {
    fn client_addr(&self) -> Option<IpAddr> {
        Some(self.ip())
    }
}

impl ClientAddr for IpAddr {
    fn client_addr(&self) -> Option<IpAddr> {
        Some(*self)
    }
}

impl ClientAddr for Option<IpAddr> {
    fn client_addr(&self) -> Option<IpAddr> {
        *self
    }
}

/// Derive the default key: the caller's address, or [`UNKNOWN_KEY`].
///
/// All callers without an address share a single counter.
pub fn client_addr_key<R: ClientAddr + ?Sized>(request: &R) -> String {
    request
        .client_addr()
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| UNKNOWN_KEY.to_string())
}
