//! Core domain types: the entities and state machines the rest of the
//! scheduler operates on.

mod artifact;
mod capability;
mod job;
mod plan;
mod usage;
mod user;
mod worker;

pub use artifact::Artifact;
pub use capability::Capability;
pub use job::{Job, JobError, JobStatus};
pub use plan::Plan;
pub use usage::UsageDaily;
pub use user::User;
pub use worker::{WorkerRecord, WorkerStatus};
