//! The connection pool and its per-entry watchdog (§3 "Connection Pool",
//! §4.D).

pub mod close;
pub mod error;
pub mod pooled;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::model::CapabilitySet;
use crate::net::conn::Conn;

pub use close::{NoQuit, QuitSender};
pub use error::PoolError;
pub use pooled::{PooledConnection, TransportState};

type Id = u64;
type Entries = Mutex<Vec<(Id, PooledConnection)>>;

struct StashEntry {
    id: Id,
    conn: Conn,
    capabilities: CapabilitySet,
    transport: TransportState,
    owner_id: u64,
    stealable_at: Instant,
}

/// A predicate over a pooled connection's capabilities and transport
/// state, built from the client's handshake (§4.D "Taking from the pool
/// during connect").
pub type CapabilityPredicate<'a> = dyn Fn(&CapabilitySet, &TransportState) -> bool + Send + Sync + 'a;

pub struct ConnectionPool {
    pool: Arc<DashMap<String, Entries>>,
    stash: DashMap<String, Mutex<Vec<StashEntry>>>,
    max_pooled: usize,
    idle_timeout: Duration,
    next_id: AtomicU64,
    reused_connections: AtomicU64,
    close_tx: mpsc::UnboundedSender<Conn>,
    close_rx: Mutex<Option<mpsc::UnboundedReceiver<Conn>>>,
    quit_sender: Arc<dyn QuitSender>,
}

impl ConnectionPool {
    pub fn new(max_pooled: usize, idle_timeout: Duration) -> Self {
        let (close_tx, close_rx) = mpsc::unbounded_channel();
        Self {
            pool: Arc::new(DashMap::new()),
            stash: DashMap::new(),
            max_pooled,
            idle_timeout,
            next_id: AtomicU64::new(0),
            reused_connections: AtomicU64::new(0),
            close_tx,
            close_rx: Mutex::new(Some(close_rx)),
            quit_sender: Arc::new(NoQuit),
        }
    }

    /// Registers the embedder's [`QuitSender`], used by the close loop to
    /// write a quit payload before dropping each socket (§9 SUPPLEMENT #4).
    pub fn with_quit_sender(mut self, quit_sender: Arc<dyn QuitSender>) -> Self {
        self.quit_sender = quit_sender;
        self
    }

    pub fn reused_connections(&self) -> u64 {
        self.reused_connections.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.pool.iter().map(|e| e.value().lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn next_id(&self) -> Id {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Drives the background close queue fed by [`Self::async_close_connection`],
    /// writing the registered [`QuitSender`]'s payload to each connection
    /// before dropping it (§9 SUPPLEMENT #4). Spawn this once per pool
    /// instance; it runs until the pool (and its sender) is dropped.
    pub fn spawn_close_loop(&self) {
        let Some(mut rx) = self.close_rx.lock().take() else {
            return;
        };
        let quit_sender = self.quit_sender.clone();
        tokio::spawn(async move {
            while let Some(conn) = rx.recv().await {
                tracing::trace!(peer = ?conn.info.peer_addr, "closing pooled connection");
                close::quit_then_close(quit_sender.as_ref(), conn).await;
            }
        });
    }

    /// `add(conn)`: inserts if under capacity, otherwise closes the
    /// connection asynchronously (§4.D).
    pub fn add(&self, endpoint_key: &str, conn: Conn, capabilities: CapabilitySet, transport: TransportState) {
        if let Some(rejected) = self.add_if_not_full(endpoint_key, conn, capabilities, transport) {
            let _ = self.close_tx.send(rejected);
        }
    }

    pub fn add_if_not_full(
        &self,
        endpoint_key: &str,
        conn: Conn,
        capabilities: CapabilitySet,
        transport: TransportState,
    ) -> Option<Conn> {
        if self.len() >= self.max_pooled {
            return Some(conn);
        }
        let id = self.next_id();
        let pool = self.pool.clone();
        let key = endpoint_key.to_string();
        let pooled = pooled::spawn_watchdog(conn, capabilities, transport, self.idle_timeout, move || {
            if let Some(entries) = pool.get(&key) {
                entries.value().lock().retain(|(eid, _)| *eid != id);
            }
        });
        self.pool
            .entry(endpoint_key.to_string())
            .or_insert_with(|| Mutex::new(Vec::new()))
            .lock()
            .push((id, pooled));
        None
    }

    /// `pop_if(endpoint, predicate)`: returns and erases the first entry at
    /// `endpoint` whose capabilities satisfy `predicate` (§4.D).
    pub async fn pop_if(&self, endpoint_key: &str, predicate: &CapabilityPredicate<'_>) -> Option<Conn> {
        loop {
            let candidate = {
                let Some(entries) = self.pool.get(endpoint_key) else {
                    return None;
                };
                let mut guard = entries.value().lock();
                let pos = guard
                    .iter()
                    .position(|(_, p)| predicate(&p.capabilities, &p.transport))?;
                guard.remove(pos)
            };
            let (_, pooled) = candidate;
            if let Some(conn) = pooled.take().await {
                self.reused_connections.fetch_add(1, Ordering::Relaxed);
                return Some(conn);
            }
            // Lost the race to the watchdog; try again for another match.
        }
    }

    /// `stash(conn, owner_id, delay)` (§4.D). No watchdog is installed:
    /// the owning session is live and responsible for the socket.
    pub fn stash(
        &self,
        endpoint_key: &str,
        conn: Conn,
        capabilities: CapabilitySet,
        transport: TransportState,
        owner_id: u64,
        delay: Duration,
    ) {
        let entry = StashEntry {
            id: self.next_id(),
            conn,
            capabilities,
            transport,
            owner_id,
            stealable_at: Instant::now() + delay,
        };
        self.stash
            .entry(endpoint_key.to_string())
            .or_insert_with(|| Mutex::new(Vec::new()))
            .lock()
            .push(entry);
    }

    /// `unstash_mine(endpoint, owner_id)` (§4.D).
    pub fn unstash_mine(&self, endpoint_key: &str, owner_id: u64) -> Option<(Conn, CapabilitySet, TransportState)> {
        let entries = self.stash.get(endpoint_key)?;
        let mut guard = entries.value().lock();
        let pos = guard.iter().position(|e| e.owner_id == owner_id)?;
        let e = guard.remove(pos);
        Some((e.conn, e.capabilities, e.transport))
    }

    /// `unstash_if(endpoint, predicate, ignore_sharing_delay)` (§4.D).
    pub fn unstash_if(
        &self,
        endpoint_key: &str,
        predicate: &CapabilityPredicate<'_>,
        ignore_sharing_delay: bool,
    ) -> Option<(Conn, CapabilitySet, TransportState)> {
        let entries = self.stash.get(endpoint_key)?;
        let mut guard = entries.value().lock();
        let now = Instant::now();
        let pos = guard.iter().position(|e| {
            (ignore_sharing_delay || e.stealable_at <= now) && predicate(&e.capabilities, &e.transport)
        })?;
        let e = guard.remove(pos);
        Some((e.conn, e.capabilities, e.transport))
    }

    /// `discard_all_stashed(owner_id)`: moves every stash entry owned by
    /// `owner_id` back into the pool (arming watchdogs), or closes it if
    /// the pool is already full (§4.D).
    pub fn discard_all_stashed(&self, owner_id: u64) {
        for mut kv in self.stash.iter_mut() {
            let key = kv.key().clone();
            let mut guard = kv.value_mut().lock();
            let mine: Vec<StashEntry> = {
                let (mine, rest): (Vec<_>, Vec<_>) =
                    std::mem::take(&mut *guard).into_iter().partition(|e| e.owner_id == owner_id);
                *guard = rest;
                mine
            };
            drop(guard);
            for e in mine {
                self.add(&key, e.conn, e.capabilities, e.transport);
            }
        }
    }

    /// Drains every pooled connection immediately (§7 `ResourceExhausted`:
    /// "EMFILE/ENFILE triggers a pool-wide flush"). Stashed connections are
    /// left alone — they belong to a live session, not an idle pool.
    pub async fn flush_all(&self) {
        let keys: Vec<String> = self.pool.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            let entries = {
                let Some(entries) = self.pool.get(&key) else {
                    continue;
                };
                std::mem::take(&mut *entries.value().lock())
            };
            for (_, pooled) in entries {
                drop(pooled.take().await);
            }
        }
    }

    /// `async_close_connection(conn)`: enqueues `conn` onto the internal
    /// close list without blocking the caller; the background task spawned
    /// by [`Self::spawn_close_loop`] performs the actual quit-then-close
    /// (§4.D; §9 SUPPLEMENT #4).
    pub fn async_close_connection(&self, conn: Conn) -> Result<(), PoolError> {
        self.close_tx.send(conn).map_err(|_| PoolError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_pool_is_empty() {
        let pool = ConnectionPool::new(4, Duration::from_secs(60));
        assert_eq!(pool.len(), 0);
        assert!(pool.is_empty());
    }
}
