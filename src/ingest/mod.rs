pub mod lifecycle;
pub mod notifier;
pub mod retention;
pub mod scheduler;
pub mod worker;

pub use lifecycle::{Cycle, PeriodicRunner};
pub use notifier::{Notifier, NullNotifier};
pub use retention::RetentionSweeper;
pub use scheduler::{CycleReport, IngestionScheduler};
pub use worker::{IngestOutcome, IngestionWorker};
