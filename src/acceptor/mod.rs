//! The acceptor and its session container (§4.G): owns a listening socket,
//! spawns a session per accepted connection, and tracks them for graceful
//! shutdown. Wired to a destination manager's [`crate::destination::AcceptorControl`]
//! callback so the router can pause/resume accepting when the candidate set
//! empties and refills (§5 "Backpressure").

pub mod container;

use std::future::Future;
use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

pub use container::{SessionContainer, SessionGuard};

use crate::destination::AcceptorControl;
use crate::net::conn::Conn;
use crate::net::incoming::{Incoming, MakeIncoming};
use crate::net::Address;

/// Handles one accepted connection end to end. `guard` is held for the
/// lifetime of the session and dropped (deregistering from the container)
/// when `handle` returns.
pub trait SessionHandler: Send + Sync + 'static {
    fn handle(&self, conn: Conn, guard: SessionGuard) -> impl Future<Output = ()> + Send;
}

struct Inner<H> {
    address: Address,
    handler: Arc<H>,
    container: Arc<SessionContainer>,
    stop_signal: Notify,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// A single route's listener (§4.G, §6 "Listeners": "each configured route
/// has exactly one listener").
pub struct Acceptor<H> {
    inner: Arc<Inner<H>>,
}

impl<H> Clone for Acceptor<H> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<H: SessionHandler> Acceptor<H> {
    pub fn new(address: Address, handler: Arc<H>, container: Arc<SessionContainer>) -> Self {
        Self {
            inner: Arc::new(Inner {
                address,
                handler,
                container,
                stop_signal: Notify::new(),
                task: Mutex::new(None),
            }),
        }
    }

    pub fn container(&self) -> &Arc<SessionContainer> {
        &self.inner.container
    }

    /// Binds and starts accepting in the background, replacing any
    /// previously running accept loop. Bind failures are logged as
    /// `binding to <dest> failed: <errno>` (§6) and leave the acceptor
    /// stopped; callers that need to observe the failure should call
    /// [`Self::start_and_wait_bound`] instead.
    pub fn start(&self) {
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = Inner::run(inner).await {
                tracing::error!(error = %e, "acceptor stopped after bind failure");
            }
        });
        *self.inner.task.lock() = Some(handle);
    }

    /// Like [`Self::start`], but resolves once the listening socket is
    /// bound (or failed to bind), so the caller can report the error
    /// synchronously instead of only seeing it in the log.
    pub async fn start_and_wait_bound(&self) -> io::Result<()> {
        let incoming = self.inner.address.clone().make_incoming().await;
        let incoming = match incoming {
            Ok(incoming) => incoming,
            Err(e) => {
                tracing::error!(address = %self.inner.address, error = %e, "binding to {} failed: {e}", self.inner.address);
                return Err(e);
            }
        };
        let inner = self.inner.clone();
        let handle = tokio::spawn(Inner::accept_loop(inner, incoming));
        *self.inner.task.lock() = Some(handle);
        Ok(())
    }

    /// Signals the accept loop to stop and closes the listening socket;
    /// does not wait for in-flight sessions to finish (use
    /// [`SessionContainer::wait_until_empty`] on [`Self::container`] for
    /// that).
    pub fn stop(&self) {
        self.inner.stop_signal.notify_waiters();
    }

    /// Waits for the accept loop task itself to finish (not the sessions it
    /// spawned).
    pub async fn wait_stopped(&self) {
        let task = self.inner.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl<H: SessionHandler> Inner<H> {
    async fn run(inner: Arc<Self>) -> io::Result<()> {
        let incoming = inner.address.clone().make_incoming().await.map_err(|e| {
            tracing::error!(address = %inner.address, error = %e, "binding to {} failed: {e}", inner.address);
            e
        })?;
        Self::accept_loop(inner, incoming).await;
        Ok(())
    }

    async fn accept_loop(inner: Arc<Self>, mut incoming: impl Incoming) {
        loop {
            tokio::select! {
                biased;
                _ = inner.stop_signal.notified() => {
                    tracing::debug!(address = %inner.address, "acceptor stopping");
                    return;
                }
                accepted = incoming.accept() => {
                    match accepted {
                        Ok(Some(conn)) => {
                            let guard = inner.container.register();
                            let handler = inner.handler.clone();
                            tokio::spawn(async move {
                                handler.handle(conn, guard).await;
                            });
                        }
                        Ok(None) => {
                            tracing::debug!(address = %inner.address, "listener closed");
                            return;
                        }
                        Err(e) => {
                            tracing::warn!(address = %inner.address, error = %e, "accept failed");
                        }
                    }
                }
            }
        }
    }
}

impl<H: SessionHandler> AcceptorControl for Acceptor<H> {
    fn stop(&self) {
        Acceptor::stop(self);
    }

    fn start(&self) {
        Acceptor::start(self);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingHandler {
        count: Arc<AtomicUsize>,
    }

    impl SessionHandler for CountingHandler {
        async fn handle(&self, _conn: Conn, _guard: SessionGuard) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn start_and_stop_bind_a_real_tcp_listener() {
        let count = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(CountingHandler { count: count.clone() });
        let container = SessionContainer::new();
        let address = Address::Ip("127.0.0.1:0".parse().unwrap());
        let acceptor = Acceptor::new(address, handler, container);
        acceptor.start_and_wait_bound().await.unwrap();
        acceptor.stop();
        acceptor.wait_stopped().await;
    }

    #[tokio::test]
    async fn second_bind_to_the_same_address_fails() {
        let handler = || {
            Arc::new(CountingHandler {
                count: Arc::new(AtomicUsize::new(0)),
            })
        };
        let address: Address = Address::Ip("127.0.0.1:58432".parse().unwrap());
        let first = Acceptor::new(address.clone(), handler(), SessionContainer::new());
        first.start_and_wait_bound().await.unwrap();

        let second = Acceptor::new(address, handler(), SessionContainer::new());
        assert!(second.start_and_wait_bound().await.is_err());

        first.stop();
        first.wait_stopped().await;
    }
}
