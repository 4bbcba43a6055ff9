use thiserror::Error;

/// Error *kinds* surfaced by the connect pipeline (§7). Per-destination
/// failures accumulate into [`ConnectError::GiveUp`]'s diagnostic; only the
/// final give-up crosses back out to the client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("no destinations configured")]
    NoDestinations,

    #[error("destination is quarantined")]
    Quarantined,

    #[error("candidate ignored by the access-mode filter")]
    Ignored,

    #[error("resolve failed: {0}")]
    ResolveFailed(String),

    #[error("connect({hostname} /* hostname */) failed after {duration_ms}ms: {message}")]
    ConnectFailed {
        hostname: String,
        duration_ms: u64,
        message: String,
    },

    #[error("connect timed out")]
    TimedOut,

    #[error("sticky reconnect requires the same endpoint as the previous connection")]
    StickyMismatch,

    #[error("too many open files (EMFILE/ENFILE)")]
    ResourceExhausted,

    #[error("session was asked to disconnect mid-connect")]
    Canceled,

    #[error("Can't connect to remote MySQL server")]
    GiveUp { diagnostic: String },
}

impl ConnectError {
    /// The MySQL error the client actually sees (§4.E state `Error`, §7):
    /// code `2003`, sqlstate `HY000`, fixed message text; the accumulated
    /// per-stage diagnostic goes to the log, not to the wire.
    pub fn client_error_code(&self) -> (u16, &'static str, &'static str) {
        (2003, "HY000", "Can't connect to remote MySQL server")
    }

    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, ConnectError::ResourceExhausted)
    }

    /// Whether `NextDestination` should attempt a `refresh_destinations`
    /// retry after exhausting candidates (§4.E state `NextDestination`:
    /// "if the last error was not `timed_out`/`no-such-destination`").
    pub fn allows_refresh(&self) -> bool {
        !matches!(self, ConnectError::TimedOut | ConnectError::NoDestinations)
    }

    /// Whether `err` is `EMFILE`/`ENFILE` (§7 `ResourceExhausted`: "triggers
    /// a pool-wide flush"). Checked by raw errno rather than `ErrorKind`
    /// since std has no stable kind for either.
    pub fn is_fd_exhaustion(err: &std::io::Error) -> bool {
        const EMFILE: i32 = 24;
        const ENFILE: i32 = 23;
        matches!(err.raw_os_error(), Some(EMFILE) | Some(ENFILE))
    }
}
