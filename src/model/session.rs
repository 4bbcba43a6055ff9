use std::collections::HashMap;
use std::net::IpAddr;

use faststr::FastStr;

/// Per-connection session facts visible to the routing-guidelines engine
/// (§3, `$.session.*` scope).
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub target_ip: Option<IpAddr>,
    pub target_port: u16,
    pub source_ip: Option<IpAddr>,
    pub user: FastStr,
    pub schema: FastStr,
    pub connect_attrs: HashMap<String, String>,
    pub id: u64,
    /// Uniform random draw in `[0, 1)`, fixed for the lifetime of the
    /// session so that randomized guideline expressions are stable across
    /// repeated evaluation within one connect attempt.
    pub random_value: f64,
}

impl SessionInfo {
    pub fn new(id: u64, random_value: f64) -> Self {
        debug_assert!((0.0..1.0).contains(&random_value));
        Self {
            target_ip: None,
            target_port: 0,
            source_ip: None,
            user: FastStr::empty(),
            schema: FastStr::empty(),
            connect_attrs: HashMap::new(),
            id,
            random_value,
        }
    }
}
