/// Cursor over DISPATCH frames, sent with every heartbeat and used as the RESUME cursor.
///
/// A server-supplied `s` is preferred over the local count, but a stale or replayed `s` never
/// moves the cursor backwards. Frames without one advance the cursor by exactly one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceTracker {
    current: u64,
    observed: bool,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one DISPATCH frame and return the new cursor.
    pub fn observe(&mut self, server_sequence: Option<u64>) -> u64 {
        self.current = match server_sequence {
            Some(sequence) => self.current.max(sequence),
            None => self.current.saturating_add(1),
        };
        self.observed = true;
        self.current
    }

    pub fn current(&self) -> u64 {
        self.current
    }

    /// Value for the heartbeat payload: `None` until a dispatch has been seen.
    pub fn last(&self) -> Option<u64> {
        self.observed.then_some(self.current)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
