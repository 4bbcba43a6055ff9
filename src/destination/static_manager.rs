use parking_lot::Mutex;

use crate::model::{Destination, Endpoint, RouteInfo, ServerInfo, SessionInfo};

use super::error::{ConnectOutcome, DestinationError};
use super::manager::DestinationManager;
use super::strategy::{Cursor, Strategy};

/// Whether a statically configured destination list is this route's
/// read-write or read-only side. A static list carries no per-member role
/// metadata (that's the metadata-driven manager's job, §4.C.2), so the
/// route declares its mode up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticMode {
    ReadWrite,
    ReadOnly,
}

/// `Static manager` (§4.C.1): an ordered endpoint list plus one of the
/// three cursor strategies.
pub struct StaticDestinationManager {
    endpoints: Vec<Endpoint>,
    mode: StaticMode,
    route_name: String,
    cursor: Mutex<Cursor>,
    last_used: Mutex<Option<Destination>>,
}

impl StaticDestinationManager {
    pub fn new(endpoints: Vec<Endpoint>, strategy: Strategy, mode: StaticMode, route_name: impl Into<String>) -> Self {
        Self {
            endpoints,
            mode,
            route_name: route_name.into(),
            cursor: Mutex::new(Cursor::new(strategy)),
            last_used: Mutex::new(None),
        }
    }

    fn destination_at(&self, idx: usize) -> Destination {
        Destination::new(
            self.endpoints[idx].clone(),
            ServerInfo::default(),
            RouteInfo {
                route_name: self.route_name.clone().into(),
                connection_sharing_allowed: None,
            },
        )
    }
}

impl DestinationManager for StaticDestinationManager {
    async fn init_destinations(&self, _session: &SessionInfo) -> Result<(), DestinationError> {
        if self.endpoints.is_empty() {
            return Err(DestinationError::NoDestinations);
        }
        self.cursor.lock().reset();
        Ok(())
    }

    async fn get_next_destination(&self, _session: &SessionInfo) -> Option<Destination> {
        let idx = self.cursor.lock().peek(self.endpoints.len())?;
        let dest = self.destination_at(idx);
        *self.last_used.lock() = Some(dest.clone());
        Some(dest)
    }

    fn get_last_used_destination(&self) -> Option<Destination> {
        self.last_used.lock().clone()
    }

    async fn refresh_destinations(&self, _session: &SessionInfo) -> bool {
        // A static list has no external topology to refresh against.
        false
    }

    fn connect_status(&self, outcome: ConnectOutcome) {
        // The cursor doesn't retain which index it last handed out across
        // the await boundary in get_next_destination, so recompute it from
        // last_used instead.
        let Some(last) = self.last_used.lock().clone() else {
            return;
        };
        let Some(idx) = self.endpoints.iter().position(|e| *e == last.endpoint) else {
            return;
        };
        self.cursor.lock().report(idx, outcome.is_success());
    }

    fn has_read_write(&self) -> bool {
        matches!(self.mode, StaticMode::ReadWrite)
    }

    fn has_read_only(&self) -> bool {
        matches!(self.mode, StaticMode::ReadOnly)
    }

    fn get_destination_candidates(&self) -> Vec<Endpoint> {
        self.endpoints.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> SessionInfo {
        SessionInfo::new(1, 0.5)
    }

    #[tokio::test]
    async fn first_available_prefers_earliest_on_success() {
        let mgr = StaticDestinationManager::new(
            vec![Endpoint::tcp("a", 3306), Endpoint::tcp("b", 3306)],
            Strategy::FirstAvailable,
            StaticMode::ReadWrite,
            "default",
        );
        mgr.init_destinations(&session()).await.unwrap();
        let d1 = mgr.get_next_destination(&session()).await.unwrap();
        assert_eq!(d1.endpoint, Endpoint::tcp("a", 3306));
        mgr.connect_status(ConnectOutcome::Success);
        let d2 = mgr.get_next_destination(&session()).await.unwrap();
        assert_eq!(d2.endpoint, Endpoint::tcp("a", 3306));
    }

    #[tokio::test]
    async fn failure_advances_to_next_endpoint() {
        let mgr = StaticDestinationManager::new(
            vec![Endpoint::tcp("a", 3306), Endpoint::tcp("b", 3306)],
            Strategy::FirstAvailable,
            StaticMode::ReadWrite,
            "default",
        );
        mgr.init_destinations(&session()).await.unwrap();
        let d1 = mgr.get_next_destination(&session()).await.unwrap();
        assert_eq!(d1.endpoint, Endpoint::tcp("a", 3306));
        mgr.connect_status(ConnectOutcome::Failed(super::super::error::ConnectErrorKind::Other));
        let d2 = mgr.get_next_destination(&session()).await.unwrap();
        assert_eq!(d2.endpoint, Endpoint::tcp("b", 3306));
    }

    #[tokio::test]
    async fn empty_list_fails_init() {
        let mgr = StaticDestinationManager::new(vec![], Strategy::FirstAvailable, StaticMode::ReadWrite, "default");
        assert!(mgr.init_destinations(&session()).await.is_err());
    }
}
