use std::collections::HashMap;
use std::net::IpAddr;

/// `hostname → ip-address` snapshot consulted by `RESOLVE_V4`/`RESOLVE_V6`
/// (§3 "Resolve cache"). Guideline reloads swap in a fresh instance behind
/// an `ArcSwap` (see `guidelines::resolve`); the engine itself only reads.
#[derive(Debug, Default, Clone)]
pub struct ResolveCache {
    entries: HashMap<String, IpAddr>,
}

impl ResolveCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, hostname: impl Into<String>, addr: IpAddr) {
        self.entries.insert(hostname.into(), addr);
    }

    pub fn get(&self, hostname: &str) -> Option<IpAddr> {
        self.entries.get(hostname).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
