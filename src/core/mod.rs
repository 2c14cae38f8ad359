//! Core types for jobforge.
//!
//! This module contains the job record, its status machine and the task
//! records the executor reads and marks.

pub mod job;
pub mod job_state;
pub mod task;

pub use job::{Job, Priority, DEFAULT_MAX_ATTEMPTS};
pub use job_state::JobStatus;
pub use task::{TaskKind, TaskRecord, TaskStatus, TaskUpdate};
