use std::collections::HashMap;

use faststr::FastStr;

/// Static router identity and listening configuration (§3).
#[derive(Debug, Clone, Default)]
pub struct RouterInfo {
    pub port_ro: Option<u16>,
    pub port_rw: Option<u16>,
    pub port_rw_split: Option<u16>,
    pub local_cluster: FastStr,
    pub hostname: FastStr,
    pub bind_address: FastStr,
    pub tags: HashMap<String, String>,
    pub route_name: FastStr,
    pub name: FastStr,
}
