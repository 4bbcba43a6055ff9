use std::time::Duration;

use tokio::io::Interest;
use tokio::sync::oneshot;

use crate::model::CapabilitySet;
use crate::net::conn::Conn;

/// Transport facts carried alongside a pooled connection's capability
/// bitset, consulted by [`crate::model::TransportConstraint`] (§4.D).
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportState {
    pub is_tls: bool,
    pub has_client_cert: bool,
    pub is_secure_transport: bool,
}

/// A server connection parked in the pool, plus the handshake facts the
/// capability-matching predicate needs (§3 "Pooled connection").
pub struct PooledConnection {
    pub capabilities: CapabilitySet,
    pub transport: TransportState,
    take_tx: Option<oneshot::Sender<oneshot::Sender<Option<Conn>>>>,
}

/// Spawns the watchdog task and returns the handle stored in the pool
/// index. `on_remove` is invoked by the watchdog itself when it decides to
/// evict the entry (idle timeout or peer EOF) — it is the pool's job to
/// actually drop the index entry, since the watchdog has no reference back
/// into the index (§4.D "Per-pooled-connection watchdog").
///
/// Invariant upheld here: exactly one of {idle timeout, peer-closed,
/// take-from-pool} wins, because both the watchdog loop and `take()`
/// consult the same `oneshot` handshake — whichever reaches it first gets
/// the connection, the other finds the channel already spent.
pub fn spawn_watchdog(
    conn: Conn,
    capabilities: CapabilitySet,
    transport: TransportState,
    idle_timeout: Duration,
    on_remove: impl FnOnce() + Send + 'static,
) -> PooledConnection {
    let (take_tx, take_rx) = oneshot::channel::<oneshot::Sender<Option<Conn>>>();

    tokio::spawn(async move {
        let mut conn = conn;
        let mut take_rx = take_rx;
        let mut buf = [0u8; 256];
        loop {
            tokio::select! {
                biased;

                reply_to = &mut take_rx => {
                    if let Ok(reply_to) = reply_to {
                        let _ = reply_to.send(Some(conn));
                    }
                    return;
                }

                ready = conn.stream.ready(Interest::READABLE) => {
                    match ready {
                        Ok(r) if r.is_readable() => {
                            match conn.stream.try_read(&mut buf) {
                                Ok(0) => {
                                    on_remove();
                                    return;
                                }
                                Ok(_n) => {
                                    // data on an idle pooled connection: discard and
                                    // keep watching, the connection is still alive.
                                    continue;
                                }
                                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                                Err(_) => {
                                    on_remove();
                                    return;
                                }
                            }
                        }
                        Ok(_) => continue,
                        Err(_) => {
                            on_remove();
                            return;
                        }
                    }
                }

                _ = tokio::time::sleep(idle_timeout) => {
                    on_remove();
                    return;
                }
            }
        }
    });

    PooledConnection {
        capabilities,
        transport,
        take_tx: Some(take_tx),
    }
}

impl PooledConnection {
    /// Cancels the watchdog and reclaims the underlying connection. Returns
    /// `None` if the watchdog already fired (lost the race to an idle
    /// timeout or peer close) — the caller must then treat this entry as
    /// gone.
    pub async fn take(mut self) -> Option<Conn> {
        let take_tx = self.take_tx.take()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        if take_tx.send(reply_tx).is_err() {
            return None;
        }
        reply_rx.await.ok().flatten()
    }
}
