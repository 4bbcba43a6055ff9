/// The connect pipeline's state enum (§4.E). Each state's handler in
/// [`super::pipeline`] runs to completion (possibly `.await`ing an I/O
/// operation) and returns the next state, mirroring the reference router's
/// `process()` dispatcher contract: no state suspends twice without
/// re-entering its handler (§9 DESIGN NOTES).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectState {
    InitDestination,
    Resolve,
    InitEndpoint,
    InitConnect,
    FromPool,
    Connect,
    ConnectFinish,
    NextEndpoint,
    NextDestination,
    Connected,
    Error,
    Done,
}

impl ConnectState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::InitDestination => "InitDestination",
            Self::Resolve => "Resolve",
            Self::InitEndpoint => "InitEndpoint",
            Self::InitConnect => "InitConnect",
            Self::FromPool => "FromPool",
            Self::Connect => "Connect",
            Self::ConnectFinish => "ConnectFinish",
            Self::NextEndpoint => "NextEndpoint",
            Self::NextDestination => "NextDestination",
            Self::Connected => "Connected",
            Self::Error => "Error",
            Self::Done => "Done",
        }
    }
}

/// How the pipeline picks a server mode when a route has both read-write
/// and read-only candidates (§4.E "Access-mode 'auto' server-mode
/// selection").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Auto,
    ReadWrite,
    ReadOnly,
}
