//! Per-source refresh loops.
//!
//! Each source task gets its own timer so a slow or failing source never
//! delays the others. Collect errors are surfaced here and logged; the
//! next tick retries naturally, so the tasks themselves carry no retry
//! policy.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::task::SourceTask;

/// Drive one source task on a fixed cadence until cancellation.
pub fn spawn_source_loop(
    task: Arc<dyn SourceTask>,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("{} refresh loop stopping", task.name());
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = task.collect(&cancel).await {
                        warn!("{} collect failed: {}", task.name(), e);
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTask {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SourceTask for CountingTask {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn collect(&self, _cancel: &CancellationToken) -> crate::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_ticks_and_stops_on_cancel() {
        let task = Arc::new(CountingTask {
            calls: AtomicUsize::new(0),
        });
        let cancel = CancellationToken::new();

        let handle = spawn_source_loop(
            Arc::clone(&task) as Arc<dyn SourceTask>,
            Duration::from_secs(10),
            cancel.clone(),
        );

        // First tick fires immediately, then once per interval.
        tokio::time::sleep(Duration::from_secs(25)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert!(task.calls.load(Ordering::SeqCst) >= 3);
    }
}
