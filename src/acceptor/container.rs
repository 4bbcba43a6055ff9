//! Tracks live sessions for graceful shutdown (§4.G).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Holds one "slot" per live session, the way the reference acceptor's
/// container holds a `unique_ptr<Session>` per accepted connection.
/// Sessions deregister themselves (by dropping their [`SessionGuard`]) and
/// the container wakes anyone waiting in [`Self::wait_until_empty`].
#[derive(Debug, Default)]
pub struct SessionContainer {
    count: AtomicU64,
    empty: Notify,
}

impl SessionContainer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn len(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registers one new session, returning a guard that deregisters it on
    /// drop.
    pub fn register(self: &Arc<Self>) -> SessionGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        SessionGuard { container: self.clone() }
    }

    /// Waits until every registered session has deregistered (§4.G "plugin
    /// shutdown can `wait_until_empty`"). The `Notify` future is created
    /// before the emptiness check so a deregistration racing with the check
    /// is never missed.
    pub async fn wait_until_empty(&self) {
        loop {
            let notified = self.empty.notified();
            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

/// RAII handle for one registered session; dropping it deregisters.
#[derive(Debug)]
pub struct SessionGuard {
    container: Arc<SessionContainer>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.container.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.container.empty.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_until_empty_returns_immediately_when_already_empty() {
        let container = SessionContainer::new();
        container.wait_until_empty().await;
    }

    #[tokio::test]
    async fn wait_until_empty_unblocks_after_last_guard_drops() {
        let container = SessionContainer::new();
        let guard = container.register();
        assert_eq!(container.len(), 1);
        let waiter = {
            let container = container.clone();
            tokio::spawn(async move {
                container.wait_until_empty().await;
            })
        };
        tokio::task::yield_now().await;
        drop(guard);
        waiter.await.unwrap();
        assert!(container.is_empty());
    }
}
