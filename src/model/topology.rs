use std::collections::HashMap;

use faststr::FastStr;

use super::server::{ClusterRole, MemberRole, ServerInfo, ServerMode};

/// One cluster member as published by the external metadata cache (§6
/// "Metadata cache": "members `{uuid, host, port, xport, mode, type, tags,
/// hidden, disconnect_existing_sessions_when_hidden, label, version}`").
#[derive(Debug, Clone)]
pub struct TopologyMember {
    pub uuid: FastStr,
    pub host: FastStr,
    pub port: u16,
    pub xport: u16,
    pub mode: ServerMode,
    pub kind: FastStr,
    pub tags: HashMap<String, String>,
    pub hidden: bool,
    pub disconnect_existing_sessions_when_hidden: bool,
    pub label: FastStr,
    pub version: FastStr,
}

impl TopologyMember {
    /// The member-role a guideline match expression reasons about is derived
    /// from the mode the metadata cache actually reports, the same
    /// direction as (but inverse of) [`MemberRole::server_mode`] (§3
    /// "Derived `server_mode`").
    pub fn member_role(&self) -> MemberRole {
        match self.mode {
            ServerMode::ReadWrite => MemberRole::Primary,
            ServerMode::ReadOnly => MemberRole::Secondary,
            ServerMode::Unavailable => MemberRole::Undefined,
        }
    }

    /// Builds the [`ServerInfo`] a [`crate::guidelines::GuidelinesEngine`]
    /// classifies this member against (§4.C.2 step 2).
    pub fn to_server_info(&self, cluster: &ClusterInfo) -> ServerInfo {
        ServerInfo {
            label: self.label.clone(),
            address: self.host.clone(),
            port: self.port,
            port_x: self.xport,
            uuid: self.uuid.clone(),
            version: self.version.clone(),
            member_role: Some(self.member_role()),
            cluster_role: Some(if cluster.is_primary {
                ClusterRole::Primary
            } else {
                ClusterRole::Replica
            }),
            cluster_name: cluster.name.clone(),
            cluster_set_name: cluster.cluster_set_name.clone(),
            cluster_is_invalidated: cluster.is_invalidated,
            tags: self.tags.clone(),
        }
    }
}

/// One cluster within a topology snapshot (§6).
#[derive(Debug, Clone, Default)]
pub struct ClusterInfo {
    pub name: FastStr,
    pub cluster_set_name: FastStr,
    pub is_primary: bool,
    pub is_invalidated: bool,
    pub members: Vec<TopologyMember>,
}

/// The full snapshot the metadata cache publishes (§6 "`ClusterTopology` =
/// list of clusters"). Instances of this type are immutable; the metadata
/// cache collaborator swaps in a new one wholesale when the topology
/// changes.
#[derive(Debug, Clone, Default)]
pub struct ClusterTopology {
    pub clusters: Vec<ClusterInfo>,
}

impl ClusterTopology {
    pub fn is_empty(&self) -> bool {
        self.clusters.iter().all(|c| c.members.is_empty())
    }

    pub fn members(&self) -> impl Iterator<Item = (&ClusterInfo, &TopologyMember)> {
        self.clusters.iter().flat_map(|c| c.members.iter().map(move |m| (c, m)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_role_follows_reported_mode() {
        let m = TopologyMember {
            uuid: "u1".into(),
            host: "db1".into(),
            port: 3306,
            xport: 33060,
            mode: ServerMode::ReadWrite,
            kind: "GR".into(),
            tags: HashMap::new(),
            hidden: false,
            disconnect_existing_sessions_when_hidden: false,
            label: "db1".into(),
            version: "8.0.34".into(),
        };
        assert_eq!(m.member_role(), MemberRole::Primary);
    }

    #[test]
    fn topology_is_empty_when_every_cluster_has_no_members() {
        let topo = ClusterTopology {
            clusters: vec![ClusterInfo::default()],
        };
        assert!(topo.is_empty());
    }
}
