//! A process-wide endpoint blocklist (§4.F).

use dashmap::DashMap;

use crate::model::Endpoint;

/// Tracks which endpoints are currently believed unreachable. There is no
/// TTL: a successful connect is the only way out of quarantine (§4.F "No
/// TTL — success is the only exit condition"). Shared (via `Arc`) across
/// every route in a context, same as the reference router's per-context
/// quarantine set.
#[derive(Debug, Default)]
pub struct Quarantine {
    unreachable: DashMap<String, ()>,
}

impl Quarantine {
    pub fn new() -> Self {
        Self::default()
    }

    /// `reachable = false` quarantines the endpoint; `true` clears it.
    pub fn update(&self, endpoint: &Endpoint, reachable: bool) {
        let key = endpoint.key();
        if reachable {
            self.unreachable.remove(&key);
        } else {
            self.unreachable.insert(key, ());
        }
    }

    pub fn is_quarantined(&self, endpoint: &Endpoint) -> bool {
        self.unreachable.contains_key(&endpoint.key())
    }

    pub fn len(&self) -> usize {
        self.unreachable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.unreachable.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_then_clear() {
        let q = Quarantine::new();
        let e = Endpoint::tcp("db1", 3306);
        assert!(!q.is_quarantined(&e));
        q.update(&e, false);
        assert!(q.is_quarantined(&e));
        q.update(&e, true);
        assert!(!q.is_quarantined(&e));
    }

    #[test]
    fn distinct_endpoints_are_independent() {
        let q = Quarantine::new();
        let a = Endpoint::tcp("db1", 3306);
        let b = Endpoint::tcp("db2", 3306);
        q.update(&a, false);
        assert!(q.is_quarantined(&a));
        assert!(!q.is_quarantined(&b));
    }
}
