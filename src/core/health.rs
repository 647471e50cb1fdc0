use hdrhistogram::Histogram;
use std::time::{Duration, Instant};

use super::types::{GatewayStats, GatewayStatus};

const MAX_ERROR_TEXT_BYTES: usize = 1024;

fn truncate_string(s: &str) -> String {
    if s.len() <= MAX_ERROR_TEXT_BYTES {
        return s.to_string();
    }

    let mut end = MAX_ERROR_TEXT_BYTES;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Counters and heartbeat latency distribution for one gateway client.
///
/// Owned by the gateway actor; survives reconnects so totals cover the client's whole life.
#[derive(Debug)]
pub struct GatewayHealthMonitor {
    started: Instant,
    last_frame_received: Instant,
    frames: u64,
    dispatches: u64,
    errors: u64,
    reconnects: u64,
    last_error: Option<String>,
    latency_histogram: Histogram<u64>,
}

impl GatewayHealthMonitor {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            started: now,
            last_frame_received: now,
            frames: 0,
            dispatches: 0,
            errors: 0,
            reconnects: 0,
            last_error: None,
            latency_histogram: Histogram::new_with_bounds(1, 60_000_000, 3)
                .expect("histogram bounds are valid"),
        }
    }

    pub fn record_frame(&mut self) {
        self.last_frame_received = Instant::now();
        self.frames = self.frames.saturating_add(1);
    }

    pub fn record_dispatch(&mut self) {
        self.dispatches = self.dispatches.saturating_add(1);
    }

    pub fn record_error(&mut self, context: &str, error: &str) {
        self.errors = self.errors.saturating_add(1);
        self.last_error = Some(truncate_string(&format!("{context}: {error}")));
    }

    pub fn record_latency(&mut self, latency: Duration) {
        let micros = latency.as_micros().min(u64::MAX as u128) as u64;
        let _ = self.latency_histogram.record(micros.max(1));
    }

    pub fn increment_reconnect(&mut self) {
        self.reconnects = self.reconnects.saturating_add(1);
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn last_frame_age(&self) -> Duration {
        self.last_frame_received.elapsed()
    }

    pub fn snapshot(
        &self,
        status: GatewayStatus,
        sequence: u64,
        latency: Option<Duration>,
    ) -> GatewayStats {
        let latency_samples = self.latency_histogram.len();
        let (p50, p99) = if latency_samples == 0 {
            (0, 0)
        } else {
            (
                self.latency_histogram.value_at_percentile(50.0),
                self.latency_histogram.value_at_percentile(99.0),
            )
        };

        GatewayStats {
            status,
            uptime: self.started.elapsed(),
            frames: self.frames,
            dispatches: self.dispatches,
            errors: self.errors,
            reconnects: self.reconnects,
            sequence,
            latency,
            p50_latency_us: p50,
            p99_latency_us: p99,
            latency_samples,
        }
    }
}

impl Default for GatewayHealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_latency_percentiles() {
        let mut monitor = GatewayHealthMonitor::new();
        monitor.record_latency(Duration::from_micros(100));
        monitor.record_latency(Duration::from_micros(200));
        monitor.record_latency(Duration::from_micros(300));

        let stats = monitor.snapshot(GatewayStatus::Ready, 7, Some(Duration::from_micros(300)));
        assert_eq!(stats.latency_samples, 3);
        assert_eq!(stats.p50_latency_us, 200);
        assert_eq!(stats.p99_latency_us, 300);
        assert_eq!(stats.sequence, 7);
    }

    #[test]
    fn counts_frames_dispatches_and_reconnects() {
        let mut monitor = GatewayHealthMonitor::new();
        monitor.record_frame();
        monitor.record_frame();
        monitor.record_dispatch();
        monitor.increment_reconnect();

        let stats = monitor.snapshot(GatewayStatus::Connecting, 0, None);
        assert_eq!(stats.frames, 2);
        assert_eq!(stats.dispatches, 1);
        assert_eq!(stats.reconnects, 1);
        assert_eq!(stats.latency_samples, 0);
        assert_eq!(stats.p99_latency_us, 0);
    }

    #[test]
    fn caps_error_text() {
        let mut monitor = GatewayHealthMonitor::new();
        let huge = "x".repeat(MAX_ERROR_TEXT_BYTES + 10);
        monitor.record_error("decode", &huge);
        assert_eq!(monitor.last_error().map(str::len), Some(MAX_ERROR_TEXT_BYTES));
        assert_eq!(monitor.snapshot(GatewayStatus::Ready, 0, None).errors, 1);
    }
}
