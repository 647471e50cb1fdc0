use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

/// Drive `beat` every `interval` until shutdown is signalled or `beat` returns `false`.
///
/// The first beat fires one full interval after the call, not immediately. Ticks missed while
/// a beat is in flight are delayed rather than burst.
pub async fn run_heartbeat_loop<F, Fut>(
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut beat: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    if interval.is_zero() || *shutdown.borrow_and_update() {
        return;
    }

    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow_and_update() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if !beat().await {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_loop(
        interval: Duration,
    ) -> (
        Arc<AtomicUsize>,
        watch::Sender<bool>,
        tokio::task::JoinHandle<()>,
    ) {
        let beats = Arc::new(AtomicUsize::new(0));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let counter = Arc::clone(&beats);
        let handle = tokio::spawn(run_heartbeat_loop(interval, shutdown_rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { true }
        }));
        (beats, shutdown_tx, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn first_beat_waits_one_interval() {
        let interval = Duration::from_millis(41_250);
        let (beats, _shutdown, _handle) = counting_loop(interval);

        tokio::time::sleep(interval - Duration::from_millis(1)).await;
        assert_eq!(beats.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(beats.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn beat_count_tracks_elapsed_intervals() {
        let interval = Duration::from_secs(5);
        let (beats, _shutdown, _handle) = counting_loop(interval);

        let run = Duration::from_secs(62);
        tokio::time::sleep(run).await;
        let expected = (run.as_secs() / interval.as_secs()) as usize;
        let observed = beats.load(Ordering::SeqCst);
        assert!(observed.abs_diff(expected) <= 1, "observed {observed}");
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_the_loop_within_one_interval() {
        let interval = Duration::from_secs(10);
        let (beats, shutdown, handle) = counting_loop(interval);

        tokio::time::sleep(Duration::from_secs(15)).await;
        shutdown.send(true).unwrap();
        tokio::time::timeout(interval, handle)
            .await
            .expect("loop should stop")
            .unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(beats.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_beat_ends_the_loop() {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let beats = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&beats);
        run_heartbeat_loop(Duration::from_secs(1), shutdown_rx, move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move { n < 2 }
        })
        .await;
        assert_eq!(beats.load(Ordering::SeqCst), 3);
    }
}
