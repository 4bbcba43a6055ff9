use std::collections::HashMap;

use faststr::FastStr;
use serde::{Deserialize, Serialize};

/// A cluster member's role as reported by the metadata cache (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberRole {
    Primary,
    Secondary,
    ReadReplica,
    Undefined,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "PRIMARY",
            Self::Secondary => "SECONDARY",
            Self::ReadReplica => "READ_REPLICA",
            Self::Undefined => "UNDEFINED",
        }
    }
}

/// A cluster's role within a cluster-set (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClusterRole {
    Primary,
    Replica,
    Undefined,
}

impl ClusterRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "PRIMARY",
            Self::Replica => "REPLICA",
            Self::Undefined => "UNDEFINED",
        }
    }
}

/// Server mode derived from member-role (§3: "Derived `server_mode`").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerMode {
    ReadWrite,
    ReadOnly,
    Unavailable,
}

impl MemberRole {
    pub fn server_mode(&self) -> ServerMode {
        match self {
            MemberRole::Primary => ServerMode::ReadWrite,
            MemberRole::Secondary | MemberRole::ReadReplica => ServerMode::ReadOnly,
            MemberRole::Undefined => ServerMode::Unavailable,
        }
    }
}

/// Server metadata attached to a [`crate::model::Destination`] (§3).
#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    pub label: FastStr,
    pub address: FastStr,
    pub port: u16,
    pub port_x: u16,
    pub uuid: FastStr,
    pub version: FastStr,
    pub member_role: Option<MemberRole>,
    pub cluster_role: Option<ClusterRole>,
    pub cluster_name: FastStr,
    pub cluster_set_name: FastStr,
    pub cluster_is_invalidated: bool,
    pub tags: HashMap<String, String>,
}

impl Default for MemberRole {
    fn default() -> Self {
        Self::Undefined
    }
}

impl Default for ClusterRole {
    fn default() -> Self {
        Self::Undefined
    }
}

impl ServerInfo {
    pub fn server_mode(&self) -> ServerMode {
        self.member_role.unwrap_or_default().server_mode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_is_read_write() {
        assert_eq!(MemberRole::Primary.server_mode(), ServerMode::ReadWrite);
    }

    #[test]
    fn secondary_and_read_replica_are_read_only() {
        assert_eq!(MemberRole::Secondary.server_mode(), ServerMode::ReadOnly);
        assert_eq!(MemberRole::ReadReplica.server_mode(), ServerMode::ReadOnly);
    }

    #[test]
    fn undefined_is_unavailable() {
        assert_eq!(MemberRole::Undefined.server_mode(), ServerMode::Unavailable);
    }
}
