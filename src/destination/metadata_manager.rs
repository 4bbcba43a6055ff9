//! The metadata-driven destination manager (§4.C.2): resolves destination
//! candidates from a topology snapshot published by an external metadata
//! cache, arbitrated through the routing guidelines engine.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::guidelines::GuidelinesEngine;
use crate::model::{ClusterTopology, Destination, Endpoint, RouteInfo, RouterInfo, ServerMode, SessionInfo};

use super::error::{ConnectOutcome, DestinationError};
use super::manager::DestinationManager;
use super::strategy::{Cursor, Strategy};

/// The `role=` query parameter of a `metadata-cache://` URI (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleFilter {
    Primary,
    Secondary,
    PrimaryAndSecondary,
}

/// External collaborator (§6 "Metadata cache"): publishes topology
/// snapshots and can be asked to wait for a primary failover. Mirrors the
/// shape of an immutable-snapshot-plus-await-change source, same pattern
/// the teacher uses for `Discover` (subscribe/poll a topology, never block
/// the caller longer than asked).
pub trait MetadataCache: Send + Sync {
    /// The current topology snapshot. Cheap: implementations hold this
    /// behind an `arc_swap::ArcSwap` or equivalent.
    fn topology(&self) -> Arc<ClusterTopology>;

    /// Waits (bounded by `timeout`) for a new primary to appear whose uuid
    /// differs from `last_known_primary`. Returns whether one showed up
    /// (§4.C.2 point 4, §9 Open Questions: default 10s).
    fn wait_primary_failover(
        &self,
        last_known_primary: &str,
        timeout: Duration,
    ) -> impl Future<Output = bool> + Send;
}

/// The default wait-for-primary-failover timeout (§9 Open Questions:
/// "implementers should surface it as a configurable value but default to
/// this [10s]").
pub const DEFAULT_WAIT_PRIMARY_FAILOVER_TIMEOUT: Duration = Duration::from_secs(10);

/// Notified when the set of endpoints a live connection may stay on
/// changes (§4.C.2 "Disconnect-on-promoted-to-primary" /
/// "-on-metadata-unavailable").
pub trait AllowedNodesListener: Send + Sync {
    fn on_allowed_nodes_changed(
        &self,
        new_nodes: &[Endpoint],
        existing_nodes: &[Endpoint],
        disconnect: bool,
        reason: &str,
    );
}

/// Backpressure callback into the acceptor (§4.C.2 "Acceptor control").
pub trait AcceptorControl: Send + Sync {
    fn stop(&self);
    fn start(&self);
}

struct ResolvedGroup {
    strategy: Strategy,
    priority: u64,
    members: Vec<Destination>,
    has_read_write: bool,
    has_read_only: bool,
}

struct State {
    route_name: String,
    connection_sharing_allowed: bool,
    groups: Vec<ResolvedGroup>,
    cursors: Vec<Cursor>,
    current_group: usize,
    last_peek: Option<(usize, usize)>,
    last_used: Option<Destination>,
    last_known_primary_uuid: String,
    candidates_empty_was_signaled: bool,
}

impl State {
    fn empty() -> Self {
        Self {
            route_name: String::new(),
            connection_sharing_allowed: false,
            groups: Vec::new(),
            cursors: Vec::new(),
            current_group: 0,
            last_peek: None,
            last_used: None,
            last_known_primary_uuid: String::new(),
            candidates_empty_was_signaled: false,
        }
    }
}

/// The metadata-driven destination manager (§4.C.2).
pub struct MetadataDestinationManager<C> {
    metadata_cache: Arc<C>,
    guidelines: Arc<GuidelinesEngine>,
    router: RouterInfo,
    role: RoleFilter,
    disconnect_on_promoted_to_primary: bool,
    disconnect_on_metadata_unavailable: bool,
    wait_primary_failover_timeout: Duration,
    state: Mutex<State>,
    allowed_nodes_listeners: Mutex<Vec<Arc<dyn AllowedNodesListener>>>,
    acceptor_control: Mutex<Option<Arc<dyn AcceptorControl>>>,
    sharing_disabled_logged: AtomicBool,
}

impl<C: MetadataCache> MetadataDestinationManager<C> {
    pub fn new(
        metadata_cache: Arc<C>,
        guidelines: Arc<GuidelinesEngine>,
        router: RouterInfo,
        role: RoleFilter,
        disconnect_on_promoted_to_primary: bool,
        disconnect_on_metadata_unavailable: bool,
    ) -> Self {
        Self {
            metadata_cache,
            guidelines,
            router,
            role,
            disconnect_on_promoted_to_primary,
            disconnect_on_metadata_unavailable,
            wait_primary_failover_timeout: DEFAULT_WAIT_PRIMARY_FAILOVER_TIMEOUT,
            state: Mutex::new(State::empty()),
            allowed_nodes_listeners: Mutex::new(Vec::new()),
            acceptor_control: Mutex::new(None),
            sharing_disabled_logged: AtomicBool::new(false),
        }
    }

    pub fn with_wait_primary_failover_timeout(mut self, timeout: Duration) -> Self {
        self.wait_primary_failover_timeout = timeout;
        self
    }

    pub fn register_allowed_nodes_listener(&self, listener: Arc<dyn AllowedNodesListener>) {
        self.allowed_nodes_listeners.lock().push(listener);
    }

    pub fn set_acceptor_control(&self, control: Arc<dyn AcceptorControl>) {
        *self.acceptor_control.lock() = Some(control);
    }

    /// §4.C.2 steps 1–2: classify the session to find the winning route's
    /// destination groups, then for each group resolve which topology
    /// members belong to it by classifying every member as a server and
    /// checking for class overlap.
    fn resolve(&self, session: &SessionInfo) -> Result<State, DestinationError> {
        let classification = self
            .guidelines
            .classify(session, &self.router, None)
            .result
            .ok_or(DestinationError::NoDestinations)?;

        let topology = self.metadata_cache.topology();
        let mut groups = Vec::with_capacity(classification.destination_groups.len());

        for group in &classification.destination_groups {
            let mut members = Vec::new();
            let mut has_read_write = false;
            let mut has_read_only = false;
            for (cluster, member) in topology.members() {
                if member.hidden {
                    continue;
                }
                let server_info = member.to_server_info(cluster);
                let classes = self.guidelines.classify_server(&server_info, &self.router).result.unwrap_or_default();
                if !group.classes.iter().any(|c| classes.contains(c)) {
                    continue;
                }
                if !self.role_allows(member.mode) {
                    continue;
                }
                match member.mode {
                    ServerMode::ReadWrite => has_read_write = true,
                    ServerMode::ReadOnly => has_read_only = true,
                    ServerMode::Unavailable => continue,
                }
                members.push(Destination::new(
                    Endpoint::tcp(member.host.clone(), member.port),
                    server_info,
                    RouteInfo {
                        route_name: classification.route_name.clone().into(),
                        connection_sharing_allowed: Some(
                            classification.connection_sharing_allowed && self.sharing_context_allows(),
                        ),
                    },
                ));
            }
            groups.push(ResolvedGroup {
                strategy: group.strategy,
                priority: group.priority,
                members,
                has_read_write,
                has_read_only,
            });
        }

        let cursors = groups.iter().map(|g| Cursor::new(g.strategy)).collect();
        let last_known_primary_uuid = topology
            .members()
            .find(|(_, m)| m.mode == ServerMode::ReadWrite)
            .map(|(_, m)| m.uuid.to_string())
            .unwrap_or_default();

        Ok(State {
            route_name: classification.route_name,
            connection_sharing_allowed: classification.connection_sharing_allowed,
            groups,
            cursors,
            current_group: 0,
            last_peek: None,
            last_used: None,
            last_known_primary_uuid,
            candidates_empty_was_signaled: false,
        })
    }

    fn role_allows(&self, mode: ServerMode) -> bool {
        match self.role {
            RoleFilter::Primary => mode == ServerMode::ReadWrite,
            RoleFilter::Secondary => mode == ServerMode::ReadOnly,
            RoleFilter::PrimaryAndSecondary => matches!(mode, ServerMode::ReadWrite | ServerMode::ReadOnly),
        }
    }

    /// §4.C.2 "Connection sharing gating": a placeholder hook for transport
    /// context (client_ssl_mode = PASSTHROUGH, or PREFERRED + dest_ssl_mode
    /// = AS_CLIENT, or x-protocol) that the connect pipeline consults when
    /// it knows the live session's transport mode. The manager itself has
    /// no transport context, so it defaults to "allowed"; callers that need
    /// the gating call [`Destination::disable_connection_sharing`]
    /// directly and then [`Self::log_sharing_disabled_once`].
    fn sharing_context_allows(&self) -> bool {
        true
    }

    /// Logs the "sharing disabled" condition for the active route at most
    /// once (§4.C.2 bullet, §9 SUPPLEMENT 6).
    pub fn log_sharing_disabled_once(&self, route_name: &str) {
        if !self.sharing_disabled_logged.swap(true, Ordering::Relaxed) {
            tracing::warn!(route = route_name, "connection sharing disabled for this route");
        }
    }

    /// Notifies registered listeners that the candidate endpoint set has
    /// changed, for the disconnect-on-promoted-to-primary /
    /// disconnect-on-metadata-unavailable flows (§4.C.2).
    fn broadcast_allowed_nodes(&self, new: &[Endpoint], existing: &[Endpoint], disconnect: bool, reason: &str) {
        for listener in self.allowed_nodes_listeners.lock().iter() {
            listener.on_allowed_nodes_changed(new, existing, disconnect, reason);
        }
    }

    fn control_acceptor(&self, candidates_now_empty: bool, state: &mut State) {
        if candidates_now_empty == state.candidates_empty_was_signaled {
            return;
        }
        state.candidates_empty_was_signaled = candidates_now_empty;
        if let Some(control) = self.acceptor_control.lock().as_ref() {
            if candidates_now_empty {
                control.stop();
            } else {
                control.start();
            }
        }
    }

    /// Called by the embedder when the metadata cache signals
    /// `notify_instances_changed` (§6). `reachable = false` triggers the
    /// metadata-unavailable broadcast when the flag is set (§4.C.2,
    /// scenario S5); `reachable = true` diffs the newly resolved candidate
    /// set against the previous one and, if
    /// `disconnect_on_promoted_to_primary` is set and membership shrank,
    /// broadcasts the new allowed set.
    pub fn notify_instances_changed(&self, reachable: bool, session: &SessionInfo) {
        if !reachable {
            if self.disconnect_on_metadata_unavailable {
                let existing = self.get_destination_candidates();
                self.broadcast_allowed_nodes(&[], &existing, true, "metadata unavailable");
            }
            return;
        }
        let previous = self.get_destination_candidates();
        let Ok(next_state) = self.resolve(session) else {
            return;
        };
        let next: Vec<Endpoint> = next_state.groups.iter().flat_map(|g| g.members.iter().map(|d| d.endpoint.clone())).collect();
        let shrank = self.disconnect_on_promoted_to_primary && previous.iter().any(|e| !next.contains(e));
        {
            let mut guard = self.state.lock();
            self.control_acceptor(next.is_empty(), &mut guard);
            *guard = next_state;
        }
        if shrank {
            self.broadcast_allowed_nodes(&next, &previous, true, "node promoted to primary");
        }
    }
}

impl<C: MetadataCache> DestinationManager for MetadataDestinationManager<C> {
    async fn init_destinations(&self, session: &SessionInfo) -> Result<(), DestinationError> {
        let next = self.resolve(session)?;
        let empty = next.groups.iter().all(|g| g.members.is_empty());
        let mut guard = self.state.lock();
        self.control_acceptor(empty, &mut guard);
        *guard = next;
        Ok(())
    }

    async fn get_next_destination(&self, _session: &SessionInfo) -> Option<Destination> {
        let mut guard = self.state.lock();
        let n_groups = guard.groups.len();
        if n_groups == 0 {
            return None;
        }
        for _ in 0..n_groups {
            let g_idx = guard.current_group;
            let len = guard.groups[g_idx].members.len();
            if let Some(idx) = guard.cursors[g_idx].peek(len) {
                let dest = guard.groups[g_idx].members[idx].clone();
                guard.last_peek = Some((g_idx, idx));
                guard.last_used = Some(dest.clone());
                return Some(dest);
            }
            guard.current_group = (guard.current_group + 1) % n_groups;
        }
        None
    }

    fn get_last_used_destination(&self) -> Option<Destination> {
        self.state.lock().last_used.clone()
    }

    async fn refresh_destinations(&self, session: &SessionInfo) -> bool {
        if !matches!(self.role, RoleFilter::Primary) {
            return false;
        }
        let last_known_primary = self.state.lock().last_known_primary_uuid.clone();
        let found = self
            .metadata_cache
            .wait_primary_failover(&last_known_primary, self.wait_primary_failover_timeout)
            .await;
        if !found {
            return false;
        }
        match self.resolve(session) {
            Ok(next) => {
                let empty = next.groups.iter().all(|g| g.members.is_empty());
                let mut guard = self.state.lock();
                self.control_acceptor(empty, &mut guard);
                *guard = next;
                true
            }
            Err(_) => false,
        }
    }

    fn connect_status(&self, outcome: ConnectOutcome) {
        let mut guard = self.state.lock();
        let Some((g_idx, idx)) = guard.last_peek else {
            return;
        };
        let success = outcome.is_success();
        guard.cursors[g_idx].report(idx, success);
        if success {
            // §4.C.2 scenario S4: "Later calls after [a success] reset
            // cursor to group 0" — prefer the highest-priority group again
            // for the *next* fresh resolution, without disturbing the
            // round-robin position within any individual group.
            guard.current_group = 0;
        }
    }

    fn has_read_write(&self) -> bool {
        self.state.lock().groups.iter().any(|g| g.has_read_write)
    }

    fn has_read_only(&self) -> bool {
        self.state.lock().groups.iter().any(|g| g.has_read_only)
    }

    fn get_destination_candidates(&self) -> Vec<Endpoint> {
        self.state
            .lock()
            .groups
            .iter()
            .flat_map(|g| g.members.iter().map(|d| d.endpoint.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::guidelines::{GuidelineVersion, GuidelinesEngine};
    use crate::model::{ClusterInfo, TopologyMember};

    struct FakeCache {
        topology: Arc<ClusterTopology>,
    }

    impl MetadataCache for FakeCache {
        fn topology(&self) -> Arc<ClusterTopology> {
            self.topology.clone()
        }

        async fn wait_primary_failover(&self, _last_known_primary: &str, _timeout: Duration) -> bool {
            false
        }
    }

    fn member(uuid: &str, mode: ServerMode) -> TopologyMember {
        TopologyMember {
            uuid: uuid.into(),
            host: uuid.into(),
            port: 3306,
            xport: 33060,
            mode,
            kind: "GR".into(),
            tags: HashMap::new(),
            hidden: false,
            disconnect_existing_sessions_when_hidden: false,
            label: uuid.into(),
            version: "8.0.34".into(),
        }
    }

    fn doc() -> String {
        r#"{"version":"1.0","destinations":[
            {"name":"primary","match":"$.server.memberRole = 'PRIMARY'"},
            {"name":"secondary","match":"$.server.memberRole = 'SECONDARY'"}
        ],"routes":[{"name":"rw","match":"TRUE","destinations":[
            {"classes":["primary"],"strategy":"round-robin","priority":0},
            {"classes":["secondary"],"strategy":"round-robin","priority":1}
        ]}]}"#
            .to_string()
    }

    fn engine() -> Arc<GuidelinesEngine> {
        let e = GuidelinesEngine::new(GuidelineVersion::new(1, 0));
        e.load(&doc()).unwrap();
        Arc::new(e)
    }

    fn topology_with(members: Vec<TopologyMember>) -> Arc<ClusterTopology> {
        Arc::new(ClusterTopology {
            clusters: vec![ClusterInfo {
                name: "mycluster".into(),
                cluster_set_name: "".into(),
                is_primary: true,
                is_invalidated: false,
                members,
            }],
        })
    }

    #[tokio::test]
    async fn prefers_primary_group_then_falls_back_to_secondary() {
        let topo = topology_with(vec![
            member("p1", ServerMode::ReadWrite),
            member("s1", ServerMode::ReadOnly),
        ]);
        let mgr = MetadataDestinationManager::new(
            Arc::new(FakeCache { topology: topo }),
            engine(),
            RouterInfo::default(),
            RoleFilter::PrimaryAndSecondary,
            false,
            false,
        );
        let session = SessionInfo::new(1, 0.5);
        mgr.init_destinations(&session).await.unwrap();
        let d1 = mgr.get_next_destination(&session).await.unwrap();
        assert_eq!(d1.endpoint, Endpoint::tcp("p1", 3306));
        mgr.connect_status(ConnectOutcome::Failed(super::super::error::ConnectErrorKind::Other));
        // primary group now exhausted (single member, failed) -> falls to secondary
        let d2 = mgr.get_next_destination(&session).await.unwrap();
        assert_eq!(d2.endpoint, Endpoint::tcp("s1", 3306));
    }

    #[tokio::test]
    async fn has_read_write_and_read_only_reflect_topology() {
        let topo = topology_with(vec![
            member("p1", ServerMode::ReadWrite),
            member("s1", ServerMode::ReadOnly),
        ]);
        let mgr = MetadataDestinationManager::new(
            Arc::new(FakeCache { topology: topo }),
            engine(),
            RouterInfo::default(),
            RoleFilter::PrimaryAndSecondary,
            false,
            false,
        );
        let session = SessionInfo::new(1, 0.5);
        mgr.init_destinations(&session).await.unwrap();
        assert!(mgr.has_read_write());
        assert!(mgr.has_read_only());
    }

    #[tokio::test]
    async fn role_filter_excludes_non_matching_members() {
        let topo = topology_with(vec![
            member("p1", ServerMode::ReadWrite),
            member("s1", ServerMode::ReadOnly),
        ]);
        let mgr = MetadataDestinationManager::new(
            Arc::new(FakeCache { topology: topo }),
            engine(),
            RouterInfo::default(),
            RoleFilter::Secondary,
            false,
            false,
        );
        let session = SessionInfo::new(1, 0.5);
        mgr.init_destinations(&session).await.unwrap();
        assert!(!mgr.has_read_write());
        assert!(mgr.has_read_only());
    }

    struct RecordingListener {
        calls: Mutex<Vec<(Vec<Endpoint>, bool, String)>>,
    }

    impl AllowedNodesListener for RecordingListener {
        fn on_allowed_nodes_changed(&self, new: &[Endpoint], _existing: &[Endpoint], disconnect: bool, reason: &str) {
            self.calls.lock().push((new.to_vec(), disconnect, reason.to_string()));
        }
    }

    #[tokio::test]
    async fn metadata_unavailable_broadcasts_empty_set_when_flag_set() {
        let topo = topology_with(vec![member("p1", ServerMode::ReadWrite)]);
        let mgr = MetadataDestinationManager::new(
            Arc::new(FakeCache { topology: topo }),
            engine(),
            RouterInfo::default(),
            RoleFilter::PrimaryAndSecondary,
            false,
            true,
        );
        let session = SessionInfo::new(1, 0.5);
        mgr.init_destinations(&session).await.unwrap();
        let listener = Arc::new(RecordingListener { calls: Mutex::new(Vec::new()) });
        mgr.register_allowed_nodes_listener(listener.clone());
        mgr.notify_instances_changed(false, &session);
        let calls = listener.calls.lock();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].0.is_empty());
        assert!(calls[0].1);
        assert_eq!(calls[0].2, "metadata unavailable");
    }
}
