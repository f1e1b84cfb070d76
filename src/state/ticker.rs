use std::{future::Future, time::Duration};

use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tracing::debug;

// `interval` rejects a zero period.
const MIN_PERIOD: Duration = Duration::from_millis(10);

/// Periodic task invoking a callback once per period until stopped or dropped.
pub struct Ticker {
    stop: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    /// Spawn a ticker calling `on_tick` with the tick counter every `period`.
    ///
    /// The first tick fires one full period after start. Ticks missed while a callback runs late
    /// are skipped rather than bunched up.
    pub fn start<F, Fut>(period: Duration, mut on_tick: F) -> Self
    where
        F: FnMut(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (stop, mut stopped) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut timer = interval(period.max(MIN_PERIOD));
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            timer.tick().await;

            let mut count = 0u64;
            loop {
                tokio::select! {
                    _ = stopped.changed() => break,
                    _ = timer.tick() => {
                        count += 1;
                        on_tick(count).await;
                    }
                }
            }
            debug!(ticks = count, "ticker stopped");
        });

        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Whether the ticker task is still alive.
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the ticker and wait for the in-progress callback, if any, to finish.
    pub async fn stop(mut self) {
        let _ = self.stop.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
