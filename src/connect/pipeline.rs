use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::Interest;
use tracing::Instrument;

use crate::destination::{ConnectErrorKind, ConnectOutcome, DestinationManager};
use crate::model::{CapabilitySet, Destination, Endpoint, RouterInfo, ServerMode, SessionInfo, TransportConstraint};
use crate::net::conn::Conn;
use crate::net::dial::{dial, DialConfig};
use crate::net::Address;
use crate::pool::ConnectionPool;
use crate::quarantine::Quarantine;

use super::error::ConnectError;
use super::state::{AccessMode, ConnectState};
use super::{ConnectConfig, Resolver};

/// The client's handshake facts needed for pool capability matching (§4.D
/// "Taking from the pool during connect"). `None` until the client
/// greeting has been received, which gates whether `FromPool` runs at all
/// (§4.E state `FromPool`: "if the client greeting is not yet received,
/// skip pool").
#[derive(Debug, Clone, Copy)]
pub struct ClientHandshake {
    pub capabilities: CapabilitySet,
    pub transport: TransportConstraint,
}

/// What a successful pipeline run hands off to steady-state (§4.E state
/// `Connected`: "hand off to steady-state").
#[derive(Debug)]
pub struct ConnectOutput {
    pub conn: Conn,
    pub destination: Destination,
    pub resolved_endpoint: Address,
    pub from_pool: bool,
}

enum Step {
    Next(ConnectState),
    Done(Result<ConnectOutput, ConnectError>),
}

/// Per-attempt working state, reset at the start of every [`ConnectSession::connect`]
/// call; the long-lived identity (session, sticky endpoint, client
/// handshake) lives directly on [`ConnectSession`].
struct Attempt {
    state: ConnectState,
    initialized: bool,
    candidate: Option<Destination>,
    endpoints: Vec<Address>,
    endpoint_idx: usize,
    conn: Option<Conn>,
    from_pool: bool,
    current_server_mode: ServerMode,
    errors: Vec<(&'static str, String)>,
    last_error: Option<ConnectError>,
    refreshed_once: bool,
    downgraded_to_rw: bool,
}

impl Attempt {
    fn new(wanted: ServerMode) -> Self {
        Self {
            state: ConnectState::InitDestination,
            initialized: false,
            candidate: None,
            endpoints: Vec::new(),
            endpoint_idx: 0,
            conn: None,
            from_pool: false,
            current_server_mode: wanted,
            errors: Vec::new(),
            last_error: None,
            refreshed_once: false,
            downgraded_to_rw: false,
        }
    }

    fn record(&mut self, stage: &'static str, err: ConnectError) {
        self.errors.push((stage, err.to_string()));
        self.last_error = Some(err);
    }
}

/// The connect pipeline for one inbound connection (§4.E). Generic over the
/// destination manager and resolver so the static and metadata-driven
/// managers (and a test fake resolver) can all drive the same state
/// machine, the way the teacher parametrizes its load-balancing service
/// over `Discover`/`LoadBalance` rather than boxing them.
pub struct ConnectSession<M, R> {
    pub session: SessionInfo,
    pub router: RouterInfo,
    manager: Arc<M>,
    pool: Arc<ConnectionPool>,
    quarantine: Arc<Quarantine>,
    resolver: Arc<R>,
    config: ConnectConfig,
    owner_id: u64,
    disconnect_request: Arc<AtomicBool>,
    client_handshake: Option<ClientHandshake>,
    sticky_endpoint: Option<Endpoint>,
}

impl<M, R> ConnectSession<M, R>
where
    M: DestinationManager,
    R: Resolver,
{
    pub fn new(
        session: SessionInfo,
        router: RouterInfo,
        manager: Arc<M>,
        pool: Arc<ConnectionPool>,
        quarantine: Arc<Quarantine>,
        resolver: Arc<R>,
        config: ConnectConfig,
    ) -> Self {
        let owner_id = session.id;
        Self {
            session,
            router,
            manager,
            pool,
            quarantine,
            resolver,
            config,
            owner_id,
            disconnect_request: Arc::new(AtomicBool::new(false)),
            client_handshake: None,
            sticky_endpoint: None,
        }
    }

    /// A handle the embedder can flip to cancel an in-flight connect (§4.E
    /// "Cancellation").
    pub fn disconnect_handle(&self) -> Arc<AtomicBool> {
        self.disconnect_request.clone()
    }

    /// Records the client's handshake capabilities and the transport
    /// constraint a pool candidate must satisfy, once the greeting has
    /// been received. Leaving this unset keeps `FromPool` skipped (§4.E).
    pub fn set_client_handshake(&mut self, handshake: ClientHandshake) {
        self.client_handshake = Some(handshake);
    }

    /// Pins this session to the endpoint of its previous successful
    /// connect, rejecting any other candidate during `Resolve` (§4.E step
    /// 2 "sticky reconnect", §9 SUPPLEMENT 5).
    pub fn set_sticky_endpoint(&mut self, endpoint: Endpoint) {
        self.sticky_endpoint = Some(endpoint);
    }

    /// Drives the pipeline to completion: either a connected server socket
    /// or a final [`ConnectError`] (§4.E).
    pub async fn connect(&mut self) -> Result<ConnectOutput, ConnectError> {
        let mut attempt = Attempt::new(self.config.access_mode_default_mode());
        let span = tracing::info_span!("mysql/from_pool_or_connect");
        self.run(&mut attempt).instrument(span).await
    }

    async fn run(&mut self, attempt: &mut Attempt) -> Result<ConnectOutput, ConnectError> {
        loop {
            if self.disconnect_request.load(Ordering::Relaxed) && attempt.state != ConnectState::Connected {
                attempt.conn = None;
                return Err(ConnectError::Canceled);
            }
            tracing::trace!(state = attempt.state.name(), "connect pipeline state");
            let step = match attempt.state {
                ConnectState::InitDestination => self.step_init_destination(attempt).await,
                ConnectState::Resolve => self.step_resolve(attempt).await,
                ConnectState::InitEndpoint => self.step_init_endpoint(attempt),
                ConnectState::InitConnect => self.step_init_connect(attempt),
                ConnectState::FromPool => self.step_from_pool(attempt).await,
                ConnectState::Connect => self.step_connect(attempt).await,
                ConnectState::NextEndpoint => self.step_next_endpoint(attempt),
                ConnectState::NextDestination => self.step_next_destination(attempt).await,
                ConnectState::Connected => self.step_connected(attempt),
                ConnectState::Error | ConnectState::ConnectFinish | ConnectState::Done => {
                    unreachable!("pipeline never transitions into {:?}", attempt.state)
                }
            };
            match step {
                Step::Next(s) => attempt.state = s,
                Step::Done(result) => return result,
            }
        }
    }

    async fn step_init_destination(&self, attempt: &mut Attempt) -> Step {
        if !attempt.initialized {
            if let Err(e) = self.manager.init_destinations(&self.session).await {
                attempt.record("InitDestination", ConnectError::NoDestinations);
                let _ = e;
                return Step::Done(Err(self.give_up(attempt)));
            }
            attempt.initialized = true;
        }
        let candidate = self.manager.get_next_destination(&self.session).await;
        let Some(candidate) = candidate else {
            if attempt.errors.is_empty() {
                attempt.record("InitDestination", ConnectError::NoDestinations);
                return Step::Done(Err(ConnectError::NoDestinations));
            }
            return Step::Next(ConnectState::NextDestination);
        };

        if !self.server_mode_acceptable(attempt, &candidate) {
            attempt.record("InitDestination", ConnectError::Ignored);
            return Step::Next(ConnectState::InitDestination);
        }
        if self.quarantine.is_quarantined(&candidate.endpoint) {
            attempt.record("InitDestination", ConnectError::Quarantined);
            return Step::Next(ConnectState::InitDestination);
        }
        attempt.candidate = Some(candidate);
        Step::Next(ConnectState::Resolve)
    }

    /// §4.E "Access-mode 'auto' server-mode selection": with only RW nodes
    /// force RW, with only RO nodes force RO, with both honor the session's
    /// current target and filter mismatches. A static destination list
    /// carries no per-member role (its mode lives in `has_read_write`/
    /// `has_read_only` at the manager level instead), so a candidate with no
    /// reported role is accepted unconditionally.
    fn server_mode_acceptable(&self, attempt: &mut Attempt, candidate: &Destination) -> bool {
        let Some(role) = candidate.server_info.member_role else {
            return true;
        };
        let candidate_mode = role.server_mode();
        if self.config.access_mode != AccessMode::Auto {
            return candidate_mode == self.config.access_mode_to_server_mode();
        }
        let has_rw = self.manager.has_read_write();
        let has_ro = self.manager.has_read_only();
        let wanted = if has_rw && !has_ro {
            ServerMode::ReadWrite
        } else if has_ro && !has_rw {
            ServerMode::ReadOnly
        } else {
            attempt.current_server_mode
        };
        attempt.current_server_mode = wanted;
        candidate_mode == wanted
    }

    async fn step_resolve(&self, attempt: &mut Attempt) -> Step {
        let candidate = attempt.candidate.as_ref().expect("candidate set before Resolve");
        if let Some(sticky) = &self.sticky_endpoint {
            if *sticky != candidate.endpoint {
                attempt.record("Resolve", ConnectError::StickyMismatch);
                return Step::Next(ConnectState::InitDestination);
            }
        }
        match &candidate.endpoint {
            Endpoint::Tcp { host, port } => match self.resolver.resolve(host).await {
                Ok(ips) => {
                    attempt.endpoints = ips.into_iter().map(|ip| Address::Ip(SocketAddr::new(ip, *port))).collect();
                    if attempt.endpoints.is_empty() {
                        attempt.record("Resolve", ConnectError::ResolveFailed("no addresses returned".into()));
                        self.quarantine.update(&candidate.endpoint, false);
                        return Step::Next(ConnectState::NextDestination);
                    }
                    Step::Next(ConnectState::InitEndpoint)
                }
                Err(e) => {
                    attempt.record("Resolve", ConnectError::ResolveFailed(e.to_string()));
                    self.quarantine.update(&candidate.endpoint, false);
                    Step::Next(ConnectState::NextDestination)
                }
            },
            Endpoint::Local { path } => {
                #[cfg(target_family = "unix")]
                {
                    match std::os::unix::net::SocketAddr::from_pathname(path.as_str()) {
                        Ok(addr) => {
                            attempt.endpoints = vec![Address::Unix(addr)];
                            Step::Next(ConnectState::InitEndpoint)
                        }
                        Err(e) => {
                            attempt.record("Resolve", ConnectError::ResolveFailed(e.to_string()));
                            Step::Next(ConnectState::NextDestination)
                        }
                    }
                }
                #[cfg(not(target_family = "unix"))]
                {
                    attempt.record("Resolve", ConnectError::ResolveFailed("local sockets unsupported on this platform".into()));
                    Step::Next(ConnectState::NextDestination)
                }
            }
        }
    }

    fn step_init_endpoint(&self, attempt: &mut Attempt) -> Step {
        attempt.endpoint_idx = 0;
        Step::Next(ConnectState::InitConnect)
    }

    fn step_init_connect(&self, attempt: &mut Attempt) -> Step {
        attempt.conn = None;
        attempt.last_error = None;
        Step::Next(ConnectState::FromPool)
    }

    async fn step_from_pool(&self, attempt: &mut Attempt) -> Step {
        let Some(handshake) = &self.client_handshake else {
            return Step::Next(ConnectState::Connect);
        };
        let candidate = attempt.candidate.as_ref().expect("candidate set");
        let key = candidate.endpoint.key();
        let client_caps = handshake.capabilities;
        let constraint = handshake.transport;
        let predicate = move |caps: &CapabilitySet, transport: &crate::pool::TransportState| {
            caps.matches_for_pooling(&client_caps)
                && constraint.is_satisfied_by(transport.is_tls, transport.has_client_cert, transport.is_secure_transport)
        };
        let ignore_sharing_delay = attempt.last_error.is_some();

        loop {
            let found = if let Some((conn, _, _)) = self.pool.unstash_mine(&key, self.owner_id) {
                Some(conn)
            } else if let Some(conn) = self.pool.pop_if(&key, &predicate).await {
                Some(conn)
            } else {
                self.pool
                    .unstash_if(&key, &predicate, ignore_sharing_delay)
                    .map(|(conn, _, _)| conn)
            };

            let Some(conn) = found else {
                return Step::Next(ConnectState::Connect);
            };

            match tokio::time::timeout(Duration::ZERO, conn.stream.ready(Interest::READABLE)).await {
                Ok(Ok(ready)) if ready.is_readable() => {
                    // Peer already sent something (or closed): dead candidate, discard and try the next.
                    drop(conn);
                    continue;
                }
                _ => {
                    attempt.conn = Some(conn);
                    attempt.from_pool = true;
                    tracing::trace!(endpoint = %key, "served from pool");
                    return Step::Next(ConnectState::Connected);
                }
            }
        }
    }

    async fn step_connect(&self, attempt: &mut Attempt) -> Step {
        let addr = attempt.endpoints[attempt.endpoint_idx].clone();
        let start = Instant::now();
        let cfg = DialConfig::default().with_connect_timeout(Some(self.config.destination_connect_timeout));
        let span = tracing::info_span!("mysql/connect", "net.peer.name" = %addr);
        let result = dial(&addr, cfg).instrument(span).await;
        match result {
            Ok(stream) => {
                attempt.conn = Some(Conn::from(stream));
                attempt.from_pool = false;
                Step::Next(ConnectState::Connected)
            }
            Err(e) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                if ConnectError::is_fd_exhaustion(&e) {
                    attempt.record("Connect", ConnectError::ResourceExhausted);
                    self.pool.flush_all().await;
                    return Step::Done(Err(ConnectError::ResourceExhausted));
                }
                if e.kind() == std::io::ErrorKind::TimedOut {
                    attempt.record("Connect", ConnectError::TimedOut);
                } else {
                    attempt.record(
                        "Connect",
                        ConnectError::ConnectFailed {
                            hostname: addr.to_string(),
                            duration_ms,
                            message: e.to_string(),
                        },
                    );
                }
                Step::Next(ConnectState::NextEndpoint)
            }
        }
    }

    fn step_next_endpoint(&self, attempt: &mut Attempt) -> Step {
        attempt.endpoint_idx += 1;
        if attempt.endpoint_idx < attempt.endpoints.len() {
            return Step::Next(ConnectState::InitConnect);
        }
        let kind = match attempt.last_error {
            Some(ConnectError::TimedOut) => ConnectErrorKind::TimedOut,
            _ => ConnectErrorKind::Other,
        };
        self.manager.connect_status(ConnectOutcome::Failed(kind));
        if let Some(candidate) = &attempt.candidate {
            self.quarantine.update(&candidate.endpoint, false);
        }
        Step::Next(ConnectState::NextDestination)
    }

    async fn step_next_destination(&self, attempt: &mut Attempt) -> Step {
        if attempt.errors.is_empty() {
            attempt.record("NextDestination", ConnectError::NoDestinations);
            return Step::Done(Err(ConnectError::NoDestinations));
        }
        let allows_refresh = attempt.last_error.as_ref().map(|e| e.allows_refresh()).unwrap_or(true);
        if allows_refresh && !attempt.refreshed_once {
            attempt.refreshed_once = true;
            if self.manager.refresh_destinations(&self.session).await {
                return Step::Next(ConnectState::InitDestination);
            }
        }
        if self.config.access_mode == AccessMode::Auto
            && attempt.current_server_mode == ServerMode::ReadOnly
            && !self.manager.has_read_only()
            && !attempt.downgraded_to_rw
        {
            attempt.downgraded_to_rw = true;
            attempt.current_server_mode = ServerMode::ReadWrite;
            return Step::Next(ConnectState::InitDestination);
        }
        Step::Done(Err(self.give_up(attempt)))
    }

    fn step_connected(&self, attempt: &mut Attempt) -> Step {
        let candidate = attempt.candidate.clone().expect("candidate set before Connected");
        self.quarantine.update(&candidate.endpoint, true);
        self.manager.connect_status(ConnectOutcome::Success);

        if self.disconnect_request.load(Ordering::Relaxed) {
            attempt.conn = None;
            return Step::Done(Err(ConnectError::Canceled));
        }

        let conn = attempt.conn.take().expect("conn set before Connected");
        let resolved_endpoint = attempt
            .endpoints
            .get(attempt.endpoint_idx)
            .cloned()
            .unwrap_or_else(|| Address::Ip(SocketAddr::new(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 0)));
        Step::Done(Ok(ConnectOutput {
            conn,
            destination: candidate,
            resolved_endpoint,
            from_pool: attempt.from_pool,
        }))
    }

    /// §4.E state `Error`: concatenate every recorded `(stage, message)`
    /// into one diagnostic for the log; the client only ever sees the
    /// fixed 2003 HY000 message (§7).
    fn give_up(&self, attempt: &Attempt) -> ConnectError {
        let diagnostic = attempt
            .errors
            .iter()
            .map(|(stage, msg)| format!("{stage}: {msg}"))
            .collect::<Vec<_>>()
            .join("; ");
        tracing::warn!(diagnostic = %diagnostic, "giving up on connect");
        ConnectError::GiveUp { diagnostic }
    }
}

impl ConnectConfig {
    fn access_mode_default_mode(&self) -> ServerMode {
        match self.access_mode {
            AccessMode::ReadWrite => ServerMode::ReadWrite,
            AccessMode::ReadOnly => ServerMode::ReadOnly,
            AccessMode::Auto => ServerMode::ReadWrite,
        }
    }

    fn access_mode_to_server_mode(&self) -> ServerMode {
        match self.access_mode {
            AccessMode::ReadWrite => ServerMode::ReadWrite,
            AccessMode::ReadOnly => ServerMode::ReadOnly,
            AccessMode::Auto => unreachable!("Auto is handled by server_mode_acceptable directly"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::destination::{StaticDestinationManager, StaticMode, Strategy};

    struct FakeResolver;
    impl Resolver for FakeResolver {
        async fn resolve(&self, _host: &str) -> std::io::Result<Vec<IpAddr>> {
            Ok(vec![IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))])
        }
    }

    struct UnreachableResolver;
    impl Resolver for UnreachableResolver {
        async fn resolve(&self, _host: &str) -> std::io::Result<Vec<IpAddr>> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no such host"))
        }
    }

    fn session() -> SessionInfo {
        SessionInfo::new(1, 0.25)
    }

    #[tokio::test]
    async fn no_destinations_gives_up_immediately() {
        let manager = Arc::new(StaticDestinationManager::new(vec![], Strategy::FirstAvailable, StaticMode::ReadWrite, "r"));
        let mut s = ConnectSession::new(
            session(),
            RouterInfo::default(),
            manager,
            Arc::new(ConnectionPool::new(4, Duration::from_secs(60))),
            Arc::new(Quarantine::new()),
            Arc::new(FakeResolver),
            ConnectConfig::default(),
        );
        let err = s.connect().await.unwrap_err();
        assert_eq!(err, ConnectError::NoDestinations);
    }

    #[tokio::test]
    async fn resolve_failure_quarantines_and_gives_up_on_single_destination() {
        let manager = Arc::new(StaticDestinationManager::new(
            vec![Endpoint::tcp("bogus.invalid", 3306)],
            Strategy::FirstAvailable,
            StaticMode::ReadWrite,
            "r",
        ));
        let quarantine = Arc::new(Quarantine::new());
        let mut s = ConnectSession::new(
            session(),
            RouterInfo::default(),
            manager,
            Arc::new(ConnectionPool::new(4, Duration::from_secs(60))),
            quarantine.clone(),
            Arc::new(UnreachableResolver),
            ConnectConfig::default(),
        );
        let err = s.connect().await.unwrap_err();
        assert!(matches!(err, ConnectError::GiveUp { .. }));
        assert!(quarantine.is_quarantined(&Endpoint::tcp("bogus.invalid", 3306)));
    }

    #[tokio::test]
    async fn cancellation_before_connect_aborts() {
        let manager = Arc::new(StaticDestinationManager::new(
            vec![Endpoint::tcp("127.0.0.1", 1)],
            Strategy::FirstAvailable,
            StaticMode::ReadWrite,
            "r",
        ));
        let mut s = ConnectSession::new(
            session(),
            RouterInfo::default(),
            manager,
            Arc::new(ConnectionPool::new(4, Duration::from_secs(60))),
            Arc::new(Quarantine::new()),
            Arc::new(FakeResolver),
            ConnectConfig::default(),
        );
        s.disconnect_handle().store(true, Ordering::Relaxed);
        let err = s.connect().await.unwrap_err();
        assert_eq!(err, ConnectError::Canceled);
    }
}
