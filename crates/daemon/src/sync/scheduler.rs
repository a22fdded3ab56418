//! Periodic refresh driver
//!
//! A single long-lived task runs a cycle at startup, then one cycle per
//! jittered interval. Explicit requests arrive over a flume channel through
//! the cloneable [`SyncDispatcher`].

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch::Receiver as WatchReceiver;
use tokio::task::JoinHandle;

use super::synchronizer::{CycleOutcome, CycleRequest, Synchronizer};

/// An explicit refresh request
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncRequest {
    pub fresh: bool,
}

/// Handle for requesting refreshes; clone freely.
#[derive(Debug, Clone)]
pub struct SyncDispatcher {
    tx: flume::Sender<SyncRequest>,
}

impl SyncDispatcher {
    /// Create a dispatcher and the receiver for the scheduler task.
    pub fn new() -> (Self, SyncReceiver) {
        let (tx, rx) = flume::unbounded();
        (Self { tx }, SyncReceiver { rx })
    }

    /// Queue a refresh. Fails once the scheduler has stopped.
    pub fn request(&self, fresh: bool) -> anyhow::Result<()> {
        self.tx
            .send(SyncRequest { fresh })
            .map_err(|_| anyhow::anyhow!("sync scheduler has stopped"))
    }
}

#[derive(Debug)]
pub struct SyncReceiver {
    rx: flume::Receiver<SyncRequest>,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    /// Upper bound of the random delay added to each interval
    pub jitter: Duration,
    /// Whether the startup cycle clears stored records first
    pub fresh_start: bool,
}

impl SchedulerConfig {
    fn next_delay(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.interval;
        }
        self.interval + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }
}

/// Spawn the scheduler task. It stops when `shutdown_rx` fires.
pub fn spawn_scheduler(
    sync: Arc<Synchronizer>,
    receiver: SyncReceiver,
    config: SchedulerConfig,
    mut shutdown_rx: WatchReceiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        run_logged(
            &sync,
            CycleRequest {
                fresh: config.fresh_start,
            },
        )
        .await;

        let mut requests_open = true;
        loop {
            let delay = config.next_delay();
            tracing::debug!(delay_secs = delay.as_secs(), "next refresh scheduled");

            tokio::select! {
                _ = shutdown_rx.changed() => {
                    tracing::info!("sync scheduler shutting down");
                    break;
                }
                _ = tokio::time::sleep(delay) => {
                    run_logged(&sync, CycleRequest::default()).await;
                }
                request = receiver.rx.recv_async(), if requests_open => match request {
                    Ok(request) => {
                        run_logged(&sync, CycleRequest { fresh: request.fresh }).await;
                    }
                    Err(_) => {
                        tracing::debug!("all sync dispatchers dropped");
                        requests_open = false;
                    }
                },
            }
        }
    })
}

async fn run_logged(sync: &Synchronizer, request: CycleRequest) {
    match sync.run_cycle(request).await {
        CycleOutcome::Completed(report) if !report.is_success() => {
            tracing::warn!(
                failures = report.failures.len(),
                "refresh finished with failures, retrying next cycle"
            );
        }
        CycleOutcome::Completed(_) => {}
        CycleOutcome::Skipped => tracing::debug!("refresh skipped, a cycle is already running"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_within_jitter() {
        let config = SchedulerConfig {
            interval: Duration::from_secs(300),
            jitter: Duration::from_secs(60),
            fresh_start: true,
        };
        for _ in 0..100 {
            let delay = config.next_delay();
            assert!(delay >= Duration::from_secs(300));
            assert!(delay <= Duration::from_secs(360));
        }

        let fixed = SchedulerConfig {
            interval: Duration::from_secs(300),
            jitter: Duration::ZERO,
            fresh_start: false,
        };
        assert_eq!(fixed.next_delay(), Duration::from_secs(300));
    }

    #[test]
    fn test_dispatcher_fails_after_receiver_drop() {
        let (dispatcher, receiver) = SyncDispatcher::new();
        assert!(dispatcher.request(false).is_ok());
        drop(receiver);
        assert!(dispatcher.request(true).is_err());
    }
}
