use faststr::FastStr;

use super::{endpoint::Endpoint, server::ServerInfo};

/// Route metadata attached to a destination by the guidelines engine (§3).
#[derive(Debug, Clone, Default)]
pub struct RouteInfo {
    pub route_name: FastStr,
    pub connection_sharing_allowed: Option<bool>,
}

/// A concrete back-end candidate produced by a destination manager (§3).
#[derive(Debug, Clone)]
pub struct Destination {
    pub endpoint: Endpoint,
    pub server_info: ServerInfo,
    pub route_info: RouteInfo,
}

impl Destination {
    pub fn new(endpoint: Endpoint, server_info: ServerInfo, route_info: RouteInfo) -> Self {
        Self {
            endpoint,
            server_info,
            route_info,
        }
    }

    pub fn server_mode(&self) -> super::server::ServerMode {
        self.server_info.server_mode()
    }

    /// `true` once something upstream (guideline evaluation, transport mode,
    /// protocol) has vetoed sharing for this destination (§4.C "Connection
    /// sharing gating").
    pub fn connection_sharing_allowed(&self) -> bool {
        self.route_info.connection_sharing_allowed.unwrap_or(false)
    }

    pub fn disable_connection_sharing(&mut self) {
        self.route_info.connection_sharing_allowed = Some(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::server::MemberRole;

    #[test]
    fn disabling_sharing_is_sticky() {
        let mut d = Destination::new(
            Endpoint::tcp("db1", 3306),
            ServerInfo {
                member_role: Some(MemberRole::Primary),
                ..Default::default()
            },
            RouteInfo {
                route_name: "default".into(),
                connection_sharing_allowed: Some(true),
            },
        );
        assert!(d.connection_sharing_allowed());
        d.disable_connection_sharing();
        assert!(!d.connection_sharing_allowed());
    }
}
