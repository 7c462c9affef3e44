use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinError, JoinSet};

use crate::app::{FlowError, Result};
use crate::config::SchedulerConfig;
use crate::ingest::lifecycle::{cancelled, cutoff};
use crate::ingest::{Cycle, IngestOutcome, IngestionWorker, PeriodicRunner};
use crate::store::Store;

/// Tally of one dispatch cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub due: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub new_items: usize,
    /// False when the cycle was cut short by its deadline or a stop.
    pub completed: bool,
}

impl CycleReport {
    fn record(&mut self, joined: std::result::Result<(i64, Result<IngestOutcome>), JoinError>) {
        match joined {
            Ok((_, Ok(outcome))) => {
                self.succeeded += 1;
                self.new_items += outcome.new_items;
            }
            Ok((source_id, Err(e))) => {
                self.failed += 1;
                tracing::warn!(source_id, error = %e, "Ingestion failed");
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                self.failed += 1;
                tracing::error!(error = %e, "Ingestion task panicked");
            }
        }
    }
}

struct IngestCycle<S> {
    worker: IngestionWorker<S>,
    config: SchedulerConfig,
}

impl<S: Store + Send + Sync + 'static> IngestCycle<S> {
    async fn dispatch(&self, mut cancel: watch::Receiver<bool>) -> Result<CycleReport> {
        let due = self
            .worker
            .store()
            .list_due(cutoff(self.config.stale_after)?, self.config.batch_size)?;

        let mut report = CycleReport {
            due: due.len(),
            ..CycleReport::default()
        };
        if due.is_empty() {
            report.completed = true;
            return Ok(report);
        }

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        let drained = tokio::select! {
            drained = async {
                for source in due {
                    let permit = semaphore
                        .clone()
                        .acquire_owned()
                        .await
                        .map_err(|e| FlowError::Other(e.to_string()))?;
                    let worker = self.worker.clone();
                    tasks.spawn(async move {
                        let _permit = permit;
                        (source.id, worker.run(source.id).await)
                    });

                    while let Some(joined) = tasks.try_join_next() {
                        report.record(joined);
                    }
                }
                while let Some(joined) = tasks.join_next().await {
                    report.record(joined);
                }
                Ok::<_, FlowError>(true)
            } => drained?,
            _ = cancelled(&mut cancel) => {
                tracing::info!("Stop requested; abandoning in-flight sources");
                false
            }
            _ = tokio::time::sleep(self.config.cycle_timeout) => {
                tracing::warn!(timeout = ?self.config.cycle_timeout, "Ingestion cycle hit its deadline");
                false
            }
        };

        if !drained {
            tasks.shutdown().await;
        }
        report.completed = drained;

        Ok(report)
    }
}

#[async_trait]
impl<S: Store + Send + Sync + 'static> Cycle for IngestCycle<S> {
    async fn run_cycle(&self, cancel: watch::Receiver<bool>) {
        match self.dispatch(cancel).await {
            Ok(report) if report.due > 0 => tracing::info!(
                due = report.due,
                succeeded = report.succeeded,
                failed = report.failed,
                new_items = report.new_items,
                "Ingestion cycle finished"
            ),
            Ok(_) => tracing::debug!("No sources due"),
            Err(e) => tracing::error!(error = %e, "Ingestion cycle failed"),
        }
    }
}

/// Periodically dispatches workers for every due source, at most
/// `concurrency` at a time.
pub struct IngestionScheduler<S> {
    cycle: Arc<IngestCycle<S>>,
    runner: PeriodicRunner,
}

impl<S: Store + Send + Sync + 'static> IngestionScheduler<S> {
    pub fn new(worker: IngestionWorker<S>, config: SchedulerConfig) -> Self {
        let runner = PeriodicRunner::new("ingestion", config.interval);
        Self {
            cycle: Arc::new(IngestCycle { worker, config }),
            runner,
        }
    }

    /// Runs a cycle now, then once per interval.
    pub fn start(&mut self) {
        self.runner.start(self.cycle.clone());
    }

    /// Aborts in-flight runs and waits for the loop to exit.
    pub async fn stop(&mut self) {
        self.runner.stop().await;
    }

    pub fn is_running(&self) -> bool {
        self.runner.is_running()
    }

    /// One cycle outside the timer, bounded only by the cycle deadline.
    pub async fn run_once(&self) -> Result<CycleReport> {
        let (_never, cancel) = watch::channel(false);
        self.cycle.dispatch(cancel).await
    }
}
