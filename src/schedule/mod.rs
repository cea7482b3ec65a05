pub mod callback;
pub mod effects;
pub mod scheduler;
pub mod types;

#[cfg(test)]
mod tests;

pub use callback::{EventCallback, HttpCallback, JobCallback, JobEvent};
pub use effects::{AudioEffect, EffectRegistry};
pub use scheduler::{JobManager, JobScheduler, JobWorker, WorkerConfig};
pub use types::{EffectChain, Job, JobStatus, JobStatusView, JobSubmission, OutputFormat};
