use std::future::Future;

use crate::model::{Destination, Endpoint, SessionInfo};

use super::error::{ConnectOutcome, DestinationError};

/// The interface shared by the static and metadata-driven destination
/// managers (§4.C).
pub trait DestinationManager: Send + Sync {
    fn init_destinations(
        &self,
        session: &SessionInfo,
    ) -> impl Future<Output = Result<(), DestinationError>> + Send;

    fn get_next_destination(
        &self,
        session: &SessionInfo,
    ) -> impl Future<Output = Option<Destination>> + Send;

    fn get_last_used_destination(&self) -> Option<Destination>;

    fn refresh_destinations(&self, session: &SessionInfo) -> impl Future<Output = bool> + Send;

    fn connect_status(&self, outcome: ConnectOutcome);

    fn has_read_write(&self) -> bool;

    fn has_read_only(&self) -> bool;

    fn get_destination_candidates(&self) -> Vec<Endpoint>;
}
