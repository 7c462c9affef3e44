use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::app::{FlowError, Result};

/// One unit of periodic background work.
#[async_trait]
pub trait Cycle: Send + Sync {
    /// `cancel` flips to `true` when the owner is stopping; long cycles
    /// should abandon in-flight work when it does.
    async fn run_cycle(&self, cancel: watch::Receiver<bool>);
}

/// Runs a [`Cycle`] immediately and then once per interval until stopped.
pub struct PeriodicRunner {
    name: &'static str,
    interval: Duration,
    running: Option<(watch::Sender<bool>, JoinHandle<()>)>,
}

impl PeriodicRunner {
    pub fn new(name: &'static str, interval: Duration) -> Self {
        Self {
            name,
            interval: interval.max(Duration::from_millis(1)),
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn start(&mut self, cycle: Arc<dyn Cycle>) {
        if self.running.is_some() {
            tracing::warn!(worker = self.name, "Already running");
            return;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(self.name, self.interval, cycle, stop_rx));
        self.running = Some((stop_tx, handle));

        tracing::info!(
            worker = self.name,
            interval = %crate::config::format_interval(self.interval),
            "Background worker started"
        );
    }

    /// Signals the loop and waits for it, including any cycle in progress.
    pub async fn stop(&mut self) {
        let Some((stop_tx, handle)) = self.running.take() else {
            return;
        };

        let _ = stop_tx.send(true);
        if let Err(e) = handle.await {
            tracing::error!(worker = self.name, error = %e, "Background worker panicked");
        }

        tracing::info!(worker = self.name, "Background worker stopped");
    }
}

async fn run_loop(
    name: &'static str,
    interval: Duration,
    cycle: Arc<dyn Cycle>,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancelled(&mut stop) => break,
            _ = ticker.tick() => {}
        }

        tracing::debug!(worker = name, "Cycle starting");
        cycle.run_cycle(stop.clone()).await;

        if *stop.borrow() {
            break;
        }
    }
}

/// Resolves once `true` is observed. A dropped sender means nobody can
/// cancel any more, so this then never resolves.
pub(crate) async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// The instant `age` before now, or a config error when that falls outside
/// the representable date range.
pub(crate) fn cutoff(age: Duration) -> Result<DateTime<Utc>> {
    TimeDelta::from_std(age)
        .ok()
        .and_then(|age| Utc::now().checked_sub_signed(age))
        .ok_or_else(|| FlowError::Config(format!("duration {age:?} is out of range")))
}
