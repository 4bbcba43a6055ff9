/// Which ordering policy a destination group iterates its members with
/// (§4.C.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    FirstAvailable,
    NextAvailable,
    RoundRobin,
}

/// Cursor state for one destination list under one [`Strategy`] (§4.C.1).
/// Kept separate from the list itself so a round-robin group can persist
/// its position across a topology refresh (§4.C.2 point 3: "persist the
/// last-used position across group changes").
#[derive(Debug, Clone, Copy)]
pub struct Cursor {
    strategy: Strategy,
    pos: usize,
    first_failure: Option<usize>,
}

impl Cursor {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            pos: 0,
            first_failure: None,
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Returns the index to try next, or `None` if the list is empty or
    /// (round-robin only) the cursor has wrapped back to the first
    /// unresolved failure without an intervening success.
    pub fn peek(&mut self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        match self.strategy {
            Strategy::FirstAvailable | Strategy::NextAvailable => {
                if self.pos >= len {
                    None
                } else {
                    Some(self.pos)
                }
            }
            Strategy::RoundRobin => {
                let idx = self.pos % len;
                if self.first_failure == Some(idx) {
                    return None;
                }
                self.pos = (self.pos + 1) % len;
                Some(idx)
            }
        }
    }

    /// Reports the outcome of trying the index last returned by [`Self::peek`].
    pub fn report(&mut self, idx: usize, success: bool) {
        match self.strategy {
            Strategy::FirstAvailable => {
                if success {
                    self.pos = 0;
                } else {
                    self.pos += 1;
                }
            }
            Strategy::NextAvailable => {
                if !success {
                    self.pos += 1;
                }
            }
            Strategy::RoundRobin => {
                if success {
                    self.first_failure = None;
                } else if self.first_failure.is_none() {
                    self.first_failure = Some(idx);
                }
            }
        }
    }

    pub fn reset(&mut self) {
        self.pos = 0;
        self.first_failure = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_available_resets_on_success() {
        let mut c = Cursor::new(Strategy::FirstAvailable);
        assert_eq!(c.peek(3), Some(0));
        c.report(0, false);
        assert_eq!(c.peek(3), Some(1));
        c.report(1, true);
        assert_eq!(c.peek(3), Some(0));
    }

    #[test]
    fn next_available_never_resets() {
        let mut c = Cursor::new(Strategy::NextAvailable);
        assert_eq!(c.peek(3), Some(0));
        c.report(0, false);
        assert_eq!(c.peek(3), Some(1));
        c.report(1, true);
        assert_eq!(c.peek(3), Some(1));
    }

    #[test]
    fn round_robin_stops_on_full_failed_loop() {
        let mut c = Cursor::new(Strategy::RoundRobin);
        let first = c.peek(3).unwrap();
        c.report(first, false);
        let second = c.peek(3).unwrap();
        c.report(second, false);
        let third = c.peek(3).unwrap();
        c.report(third, false);
        // Wrapped back to `first` with no intervening success.
        assert_eq!(c.peek(3), None);
    }

    #[test]
    fn round_robin_success_clears_failure_marker() {
        let mut c = Cursor::new(Strategy::RoundRobin);
        let first = c.peek(3).unwrap();
        c.report(first, false);
        let second = c.peek(3).unwrap();
        c.report(second, true);
        // failure marker cleared; the loop keeps going indefinitely.
        assert!(c.peek(3).is_some());
        assert!(c.peek(3).is_some());
    }
}
