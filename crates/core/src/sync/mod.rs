mod scheduler;

pub use scheduler::{RefreshReport, SyncScheduler, Timing};
