//! Stateful managers owned by the engine

pub mod job;
pub mod session;

pub use job::{Attempt, DispatchJob, JobSnapshot};
pub use session::{SessionManager, AUDIT_TRAIL_CAPACITY};
