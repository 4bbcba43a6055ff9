pub mod conn;
pub mod dial;
pub mod incoming;

#[cfg(target_family = "unix")]
use std::os::unix::net::SocketAddr as StdUnixSocketAddr;
use std::{fmt, hash::Hash, net::SocketAddr};

pub use incoming::{DefaultIncoming, MakeIncoming};
#[cfg(target_family = "unix")]
use tokio::net::unix::SocketAddr as TokioUnixSocketAddr;

/// A resolved dial target: either a TCP socket address or, on Unix, a
/// domain-socket path. This is what the connect pipeline's `Resolve` state
/// produces from a [`crate::model::Endpoint`] and what the acceptor listens
/// on.
#[derive(Clone, Debug)]
pub enum Address {
    Ip(SocketAddr),
    #[cfg(target_family = "unix")]
    Unix(StdUnixSocketAddr),
}

impl Address {
    pub const fn is_ip(&self) -> bool {
        matches!(self, Self::Ip(_))
    }

    #[cfg(target_family = "unix")]
    pub const fn is_unix(&self) -> bool {
        matches!(self, Self::Unix(_))
    }

    pub const fn ip_addr(&self) -> Option<&SocketAddr> {
        match self {
            Self::Ip(ip) => Some(ip),
            #[cfg(target_family = "unix")]
            Self::Unix(_) => None,
        }
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Ip(self_ip), Self::Ip(other_ip)) => self_ip == other_ip,
            #[cfg(target_family = "unix")]
            (Self::Unix(self_uds), Self::Unix(other_uds)) => {
                match (self_uds.as_pathname(), other_uds.as_pathname()) {
                    (Some(self_pathname), Some(other_pathname)) => self_pathname == other_pathname,
                    (None, None) => true,
                    _ => false,
                }
            }
            #[cfg(target_family = "unix")]
            _ => false,
        }
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            Self::Ip(ip) => {
                state.write_u8(0);
                Hash::hash(ip, state);
            }
            #[cfg(target_family = "unix")]
            Self::Unix(uds) => {
                if let Some(pathname) = uds.as_pathname() {
                    state.write_u8(2);
                    Hash::hash(pathname, state);
                } else {
                    state.write_u8(3);
                }
            }
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip(addr) => write!(f, "{addr}"),
            #[cfg(target_family = "unix")]
            Self::Unix(addr) => {
                if let Some(pathname) = addr.as_pathname() {
                    write!(f, "{}", pathname.to_string_lossy())
                } else {
                    f.write_str("(unnamed)")
                }
            }
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Address::Ip(addr)
    }
}

#[cfg(target_family = "unix")]
impl From<StdUnixSocketAddr> for Address {
    fn from(value: StdUnixSocketAddr) -> Self {
        Address::Unix(value)
    }
}

#[cfg(target_family = "unix")]
impl From<TokioUnixSocketAddr> for Address {
    fn from(value: TokioUnixSocketAddr) -> Self {
        // SAFETY: both types have the same layout; tokio's UDS address is a
        // thin wrapper around the std one.
        Address::Unix(unsafe {
            std::mem::transmute::<tokio::net::unix::SocketAddr, std::os::unix::net::SocketAddr>(
                value,
            )
        })
    }
}

/// A stable string key for an [`Address`], used as the pool/stash index key
/// (§3: "both keyed by endpoint string").
pub fn address_key(addr: &Address) -> String {
    addr.to_string()
}
