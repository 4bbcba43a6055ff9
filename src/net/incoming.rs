use std::{
    fmt,
    future::Future,
    io,
    task::{Context, Poll},
};

use futures::Stream;
use pin_project::pin_project;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
#[cfg(target_family = "unix")]
use tokio::net::UnixListener;
#[cfg(target_family = "unix")]
use tokio_stream::wrappers::UnixListenerStream;
use tokio_stream::{wrappers::TcpListenerStream, StreamExt};

use super::{conn::Conn, Address};

/// Listener backlog for newly bound sockets (§6: "listens with backlog 256").
const LISTEN_BACKLOG: i32 = 256;

#[pin_project(project = IncomingProj)]
#[derive(Debug)]
pub enum DefaultIncoming {
    Tcp(#[pin] TcpListenerStream),
    #[cfg(target_family = "unix")]
    Unix(#[pin] UnixListenerStream),
}

impl From<TcpListener> for DefaultIncoming {
    fn from(l: TcpListener) -> Self {
        DefaultIncoming::Tcp(TcpListenerStream::new(l))
    }
}

#[cfg(target_family = "unix")]
impl From<UnixListener> for DefaultIncoming {
    fn from(l: UnixListener) -> Self {
        DefaultIncoming::Unix(UnixListenerStream::new(l))
    }
}

pub trait Incoming: fmt::Debug + Send + 'static {
    fn accept(&mut self) -> impl Future<Output = io::Result<Option<Conn>>> + Send;
}

impl Incoming for DefaultIncoming {
    async fn accept(&mut self) -> io::Result<Option<Conn>> {
        if let Some(conn) = self.try_next().await? {
            tracing::trace!("accepted a connection from: {:?}", conn.info.peer_addr);
            Ok(Some(conn))
        } else {
            Ok(None)
        }
    }
}

pub trait MakeIncoming {
    type Incoming: Incoming;

    fn make_incoming(self) -> impl Future<Output = io::Result<Self::Incoming>> + Send;
}

impl MakeIncoming for Address {
    type Incoming = DefaultIncoming;

    /// Binds a listener for this address. TCP listeners are bound with
    /// `SO_REUSEADDR` and the fixed §6 backlog; on a platform without Unix
    /// sockets, `Address::Unix` cannot be constructed in the first place.
    async fn make_incoming(self) -> io::Result<Self::Incoming> {
        match self {
            Address::Ip(addr) => {
                let domain = if addr.is_ipv4() {
                    Domain::IPV4
                } else {
                    Domain::IPV6
                };
                let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
                socket.set_reuse_address(true)?;
                socket.set_nonblocking(true)?;
                socket.bind(&addr.into())?;
                socket.listen(LISTEN_BACKLOG)?;
                let listener = TcpListener::from_std(socket.into())?;
                Ok(DefaultIncoming::from(listener))
            }
            #[cfg(target_family = "unix")]
            Address::Unix(addr) => {
                let path = addr.as_pathname().ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::AddrNotAvailable,
                        "cannot bind an unnamed unix socket",
                    )
                })?;
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
                let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
                socket.set_nonblocking(true)?;
                socket.bind(&socket2::SockAddr::unix(path)?)?;
                socket.listen(LISTEN_BACKLOG)?;
                let listener = UnixListener::from_std(socket.into())?;
                Ok(DefaultIncoming::from(listener))
            }
        }
    }
}

impl Stream for DefaultIncoming {
    type Item = io::Result<Conn>;

    fn poll_next(self: std::pin::Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.project() {
            IncomingProj::Tcp(s) => s.poll_next(cx).map_ok(Conn::from),
            #[cfg(target_family = "unix")]
            IncomingProj::Unix(s) => s.poll_next(cx).map_ok(Conn::from),
        }
    }
}
