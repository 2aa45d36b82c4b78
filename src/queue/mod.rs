//! Priority command queue with a single-flight processing loop

mod history;
mod item;
mod priority;
mod scheduler;
mod status;

pub use item::QueueItem;
pub use scheduler::{CommandScheduler, QueueConfig};
pub use status::StatusReporter;
