//! Destination management: turning a route's configuration (static list or
//! guideline-classified topology) into an ordered sequence of connect
//! candidates (§3 "Destination Manager", §4.C).

pub mod error;
pub mod manager;
pub mod metadata_manager;
pub mod static_manager;
pub mod strategy;
pub mod uri;

pub use error::{ConnectErrorKind, ConnectOutcome, DestinationError};
pub use manager::DestinationManager;
pub use metadata_manager::{
    AcceptorControl, AllowedNodesListener, MetadataCache, MetadataDestinationManager, RoleFilter,
};
pub use static_manager::{StaticDestinationManager, StaticMode};
pub use strategy::{Cursor, Strategy};
pub use uri::{parse as parse_metadata_cache_uri, MetadataCacheUri, UriError};
