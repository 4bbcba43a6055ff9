use std::{io, time::Duration};

use socket2::{Domain, Protocol, Socket, Type};
#[cfg(target_family = "unix")]
use tokio::net::UnixStream;
use tokio::{net::TcpSocket, time::timeout};

use super::{conn::ConnStream, Address};

/// Dial-time tunables. `connect_timeout` backs §4.E `destination_connect_timeout`.
#[derive(Default, Debug, Clone, Copy)]
pub struct DialConfig {
    pub connect_timeout: Option<Duration>,
}

impl DialConfig {
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Opens a non-blocking socket to `addr`, enabling `TCP_NODELAY` for TCP
/// targets (§4.E state `Connect`: "create a non-blocking socket, set
/// TCP_NODELAY, call connect()"). A `connect_timeout` turns a stuck
/// `EINPROGRESS` connect into `io::ErrorKind::TimedOut`.
pub async fn dial(addr: &Address, cfg: DialConfig) -> io::Result<ConnStream> {
    match addr {
        Address::Ip(addr) => {
            let stream = {
                let domain = Domain::for_address(*addr);
                let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
                socket.set_nonblocking(true)?;

                #[cfg(unix)]
                let socket = unsafe {
                    use std::os::unix::io::{FromRawFd, IntoRawFd};
                    TcpSocket::from_raw_fd(socket.into_raw_fd())
                };
                #[cfg(windows)]
                let socket = unsafe {
                    use std::os::windows::io::{FromRawSocket, IntoRawSocket};
                    TcpSocket::from_raw_socket(socket.into_raw_socket())
                };

                let connect = socket.connect(*addr);
                if let Some(connect_timeout) = cfg.connect_timeout {
                    timeout(connect_timeout, connect)
                        .await
                        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??
                } else {
                    connect.await?
                }
            };
            stream.set_nodelay(true)?;
            Ok(ConnStream::from(stream))
        }
        #[cfg(target_family = "unix")]
        Address::Unix(addr) => {
            let path = addr.as_pathname().ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "unix socket has no pathname")
            })?;
            let connect = UnixStream::connect(path);
            let stream = if let Some(connect_timeout) = cfg.connect_timeout {
                timeout(connect_timeout, connect)
                    .await
                    .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??
            } else {
                connect.await?
            };
            Ok(ConnStream::from(stream))
        }
    }
}
