//! The connect pipeline (§4.E): a deterministic state machine driven per
//! inbound connection, from picking a destination candidate through
//! pool reuse or a fresh dial to handing off a connected server socket.

pub mod error;
pub mod pipeline;
pub mod state;

use std::future::Future;
use std::net::IpAddr;
use std::time::Duration;

pub use error::ConnectError;
pub use pipeline::{ConnectOutput, ConnectSession};
pub use state::{AccessMode, ConnectState};

/// Tunables for one connect pipeline run (§4.E, §9 AMBIENT Configuration:
/// plain `Copy` config struct, no file/CLI parsing in this crate).
#[derive(Debug, Clone, Copy)]
pub struct ConnectConfig {
    pub destination_connect_timeout: Duration,
    pub access_mode: AccessMode,
    /// §4.D "stash(conn, owner_id, delay)": how long a stashed connection
    /// stays exclusively reserved for its owner before others may steal it.
    pub stash_steal_delay: Duration,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            destination_connect_timeout: Duration::from_secs(5),
            access_mode: AccessMode::Auto,
            stash_steal_delay: Duration::from_millis(0),
        }
    }
}

/// DNS resolution seam the `Resolve` state calls through (§4.E state
/// `Resolve`, §6: the core "calls only" a handful of operations on its
/// collaborators — name resolution is one of them).
pub trait Resolver: Send + Sync {
    fn resolve(&self, host: &str) -> impl Future<Output = std::io::Result<Vec<IpAddr>>> + Send;
}

/// The default resolver, backed by the standard async DNS lookup tokio
/// exposes over the platform resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioResolver;

impl Resolver for TokioResolver {
    async fn resolve(&self, host: &str) -> std::io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, 0)).await?;
        Ok(addrs.map(|a| a.ip()).collect())
    }
}
