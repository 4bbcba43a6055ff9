//! The core data model shared by every subsystem (§3).

pub mod capability;
pub mod destination;
pub mod endpoint;
pub mod router;
pub mod server;
pub mod session;
pub mod sql;
pub mod topology;

pub use capability::{CapabilitySet, TransportConstraint};
pub use destination::{Destination, RouteInfo};
pub use endpoint::Endpoint;
pub use router::RouterInfo;
pub use server::{ClusterRole, MemberRole, ServerInfo, ServerMode};
pub use session::SessionInfo;
pub use sql::SqlInfo;
pub use topology::{ClusterInfo, ClusterTopology, TopologyMember};
