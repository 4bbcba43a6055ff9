use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DestinationError {
    #[error("no destinations configured")]
    NoDestinations,

    #[error("destination manager was not initialized for this session")]
    NotInitialized,
}

/// The kind of failure reported via `connect_status` (§4.C, §4.E
/// `NextDestination`: "if the last error was not `timed_out`/
/// `no-such-destination` ... retry once").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectErrorKind {
    TimedOut,
    NoSuchDestination,
    Other,
}

/// The outcome of the last connect attempt against a destination, reported
/// back to the manager via `connect_status` (§4.C).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Success,
    Failed(ConnectErrorKind),
}

impl ConnectOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ConnectOutcome::Success)
    }

    /// Whether `NextDestination` should attempt `refresh_destinations`
    /// after exhausting candidates (§4.E).
    pub fn allows_refresh(&self) -> bool {
        !matches!(
            self,
            ConnectOutcome::Failed(ConnectErrorKind::TimedOut)
                | ConnectOutcome::Failed(ConnectErrorKind::NoSuchDestination)
        )
    }
}
