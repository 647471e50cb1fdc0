use std::time::{Duration, Instant};

/// Liveness bookkeeping for one connection.
///
/// `record_sent` is driven by the heartbeat timer and `record_ack` by HEARTBEAT_ACK frames;
/// latency is the gap between the most recent send and the ack that follows it.
#[derive(Debug, Clone)]
pub struct HeartbeatTracker {
    interval: Duration,
    last_sent: Option<Instant>,
    latency: Option<Duration>,
    awaiting_ack: bool,
}

impl HeartbeatTracker {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: None,
            latency: None,
            awaiting_ack: false,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn record_sent(&mut self, now: Instant) {
        self.last_sent = Some(now);
        self.awaiting_ack = true;
    }

    /// Returns the measured round trip, or `None` for an ack with no heartbeat outstanding.
    pub fn record_ack(&mut self, now: Instant) -> Option<Duration> {
        if !self.awaiting_ack {
            return None;
        }
        self.awaiting_ack = false;
        let rtt = self
            .last_sent
            .map(|sent| now.saturating_duration_since(sent))?;
        self.latency = Some(rtt);
        Some(rtt)
    }

    /// True while a heartbeat has gone out and no ack has arrived yet.
    pub fn is_awaiting_ack(&self) -> bool {
        self.awaiting_ack
    }

    pub fn latency(&self) -> Option<Duration> {
        self.latency
    }
}
