//! Fixed-delay background task
//!
//! Each tick runs to completion before the next delay starts, so ticks never
//! overlap and a slow tick pushes the schedule back. A tick that returns an
//! error or panics is logged and the schedule carries on.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub struct ScheduledTask {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl ScheduledTask {
    /// Start running `tick` every `delay`, first run one `delay` from now
    ///
    /// `tick` returns `None` once whatever it works on is gone, which ends the
    /// schedule.
    pub fn spawn<F, Fut>(name: &'static str, delay: Duration, tick: F) -> Self
    where
        F: Fn() -> Option<Fut> + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let (shutdown, mut stop) = watch::channel(false);

        let handle = tokio::spawn(async move {
            debug!(task = name, delay_ms = delay.as_millis() as u64, "Scheduled task started");

            loop {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    // Fires on an explicit stop and when the sender is dropped
                    _ = stop.changed() => break,
                }

                let Some(run) = tick() else {
                    break;
                };

                // Run on its own task so a panic is contained
                match tokio::spawn(run).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!(task = name, error = %e, "Scheduled task failed");
                    }
                    Err(e) if e.is_panic() => {
                        warn!(task = name, "Scheduled task panicked");
                    }
                    Err(e) => {
                        warn!(task = name, error = %e, "Scheduled task was cancelled");
                    }
                }
            }

            debug!(task = name, "Scheduled task stopped");
        });

        Self {
            name,
            shutdown,
            handle: Some(handle),
        }
    }

    /// Stop the schedule, waiting for a tick in progress to finish
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(task = self.name, error = %e, "Scheduled task ended abnormally");
            }
        }
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
