//! Timer-driven background jobs.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, Semaphore};
use tokio::time::MissedTickBehavior;

/// Runs a job once immediately and then every `period`, until stopped.
///
/// Each tick's job runs in its own task. A tick that fires while the
/// previous run is still going is skipped. Stopping only disarms the
/// timer; a run already in flight finishes on its own and does not hold
/// up the immediate run of the next `start`.
pub struct PeriodicTask {
    name: &'static str,
    period: Duration,
    stop: Mutex<Option<broadcast::Sender<()>>>,
}

impl PeriodicTask {
    pub fn new(name: &'static str, period: Duration) -> Self {
        Self {
            name,
            period,
            stop: Mutex::new(None),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Arm the timer. Returns false (and does nothing) if already running.
    pub async fn start<F, Fut>(&self, job: F) -> bool
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut stop = self.stop.lock().await;
        if stop.is_some() {
            return false;
        }

        let (tx, stop_rx) = broadcast::channel(1);
        *stop = Some(tx);

        // Fresh guard per arming; runs from an earlier start are not counted.
        let busy = Arc::new(Semaphore::new(1));
        tokio::spawn(run_loop(self.name, self.period, busy, stop_rx, job));
        true
    }

    /// Disarm the timer. Returns false if it was not running.
    pub async fn stop(&self) -> bool {
        let mut stop = self.stop.lock().await;
        match stop.take() {
            Some(tx) => {
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    pub async fn is_running(&self) -> bool {
        self.stop.lock().await.is_some()
    }
}

async fn run_loop<F, Fut>(
    name: &'static str,
    period: Duration,
    busy: Arc<Semaphore>,
    mut stop_rx: broadcast::Receiver<()>,
    job: F,
) where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,
            _ = interval.tick() => {
                let permit = match busy.clone().try_acquire_owned() {
                    Ok(p) => p,
                    Err(_) => {
                        tracing::warn!("{}: previous run still in flight, skipping tick", name);
                        continue;
                    }
                };

                let run = job();
                tokio::spawn(async move {
                    let _permit = permit; // Hold permit until done
                    run.await;
                });
            }
        }
    }

    tracing::debug!("{}: timer disarmed", name);
}
