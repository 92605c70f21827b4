mod pipeline;
pub mod retry;
pub mod scheduler;

pub use scheduler::{Scheduler, SchedulerConfig, SchedulerError, SubmitRequest};
