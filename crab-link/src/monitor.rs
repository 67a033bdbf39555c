//! Link liveness monitor
//!
//! Some transports never report a drop (a sleeping radio, a socket behind
//! a NAT that silently expired). A periodic tick asks every connected
//! printer whether its link is still there; coming back to the foreground
//! triggers an extra, debounced check.

use async_trait::async_trait;
use std::sync::Weak;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Whether the owning context is in the foreground
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
}

/// Whatever owns the links being watched
#[async_trait]
pub trait LivenessTarget: Send + Sync + 'static {
    /// Check every connected link; returns how many were found dead
    async fn check_links(&self) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Tick,
    Visibility,
}

/// Spawn the monitor loop
///
/// The loop ends on `shutdown` or once the target is dropped.
pub fn spawn_monitor<T: LivenessTarget>(
    target: Weak<T>,
    interval: Duration,
    debounce: Duration,
    nudge: std::sync::Arc<Notify>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_check: Option<Instant> = None;

        info!(interval_ms = interval.as_millis() as u64, "Liveness monitor started");

        loop {
            let trigger = tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => Trigger::Tick,
                _ = nudge.notified() => {
                    if last_check.is_some_and(|at| at.elapsed() < debounce) {
                        debug!("Visibility check debounced");
                        continue;
                    }
                    Trigger::Visibility
                }
            };

            let Some(target) = target.upgrade() else {
                break;
            };
            let dead = target.check_links().await;
            drop(target);
            last_check = Some(Instant::now());

            if trigger == Trigger::Visibility {
                ticker.reset();
            }
            if dead > 0 {
                info!(dead, ?trigger, "Liveness check found dropped links");
            } else {
                debug!(?trigger, "Liveness check passed");
            }
        }

        info!("Liveness monitor stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    #[async_trait]
    impl LivenessTarget for Counter {
        async fn check_links(&self) -> usize {
            self.0.fetch_add(1, Ordering::SeqCst);
            0
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_runs_check() {
        let target = Arc::new(Counter(AtomicUsize::new(0)));
        let shutdown = CancellationToken::new();
        let handle = spawn_monitor(
            Arc::downgrade(&target),
            Duration::from_secs(30),
            Duration::from_secs(2),
            Arc::new(Notify::new()),
            shutdown.clone(),
        );

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(target.0.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(target.0.load(Ordering::SeqCst), 1);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_nudges_are_debounced() {
        let target = Arc::new(Counter(AtomicUsize::new(0)));
        let nudge = Arc::new(Notify::new());
        let shutdown = CancellationToken::new();
        let _handle = spawn_monitor(
            Arc::downgrade(&target),
            Duration::from_secs(30),
            Duration::from_secs(2),
            nudge.clone(),
            shutdown.clone(),
        );

        nudge.notify_one();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(target.0.load(Ordering::SeqCst), 1);

        nudge.notify_one();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(target.0.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(3)).await;
        nudge.notify_one();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(target.0.load(Ordering::SeqCst), 2);

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_stops_when_target_dropped() {
        let target = Arc::new(Counter(AtomicUsize::new(0)));
        let nudge = Arc::new(Notify::new());
        let handle = spawn_monitor(
            Arc::downgrade(&target),
            Duration::from_secs(30),
            Duration::ZERO,
            nudge.clone(),
            CancellationToken::new(),
        );

        drop(target);
        nudge.notify_one();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
