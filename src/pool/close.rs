//! Quit-then-close graceful drain (§6 "a quit-then-close helper is
//! required for graceful pool drains"; §9 SUPPLEMENT #4).
//!
//! The core has no wire-protocol knowledge of its own (§1 Non-goals);
//! an embedder injects the opaque quit payload (a MySQL `COM_QUIT`
//! packet, in practice) through [`QuitSender`], and this module drives
//! the best-effort write before the socket is dropped.

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::time::timeout;

use crate::net::conn::Conn;

/// How long `quit_then_close` waits for the quit payload to flush
/// before giving up and dropping the connection anyway.
const QUIT_WRITE_TIMEOUT: Duration = Duration::from_millis(200);

/// Supplies the opaque "quit" payload written to a pooled connection
/// before it is closed. The core never parses or constructs wire
/// frames itself; it only calls through this seam (§6, §9 SUPPLEMENT #4).
pub trait QuitSender: Send + Sync {
    /// Bytes to write to the socket before dropping it, or `None` to
    /// skip straight to a bare close.
    fn quit_payload(&self) -> Option<Vec<u8>>;
}

/// No-op [`QuitSender`]: closes the socket without writing anything.
/// The default for a pool with no embedder-supplied sender.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoQuit;

impl QuitSender for NoQuit {
    fn quit_payload(&self) -> Option<Vec<u8>> {
        None
    }
}

/// Writes `sender`'s quit payload to `conn`, then drops it regardless
/// of the write's outcome — the connection is being discarded either
/// way, so a failed or timed-out write is not an error (§4.D).
pub async fn quit_then_close(sender: &dyn QuitSender, mut conn: Conn) {
    if let Some(payload) = sender.quit_payload() {
        match timeout(QUIT_WRITE_TIMEOUT, conn.write_all(&payload)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::trace!(peer = ?conn.info.peer_addr, %err, "quit write failed");
            }
            Err(_) => {
                tracing::trace!(peer = ?conn.info.peer_addr, "quit write timed out");
            }
        }
    }
    drop(conn);
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::net::conn::Conn;

    struct RecordingQuitSender {
        payload: Vec<u8>,
        sends: AtomicUsize,
    }

    impl QuitSender for RecordingQuitSender {
        fn quit_payload(&self) -> Option<Vec<u8>> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            Some(self.payload.clone())
        }
    }

    async fn loopback_conn() -> Conn {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (accepted, connected) = tokio::join!(listener.accept(), tokio::net::TcpStream::connect(addr));
        let (accepted, _) = accepted.unwrap();
        // Keep the accepting side alive for the duration of the write.
        std::mem::forget(accepted);
        Conn::from(connected.unwrap())
    }

    #[tokio::test]
    async fn sends_quit_payload_before_dropping() {
        let sender = Arc::new(RecordingQuitSender {
            payload: vec![0x01],
            sends: AtomicUsize::new(0),
        });
        let conn = loopback_conn().await;
        quit_then_close(sender.as_ref(), conn).await;
        assert_eq!(sender.sends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_quit_closes_without_writing() {
        let conn = loopback_conn().await;
        quit_then_close(&NoQuit, conn).await;
    }
}
