//! Data models for guitarless-server
//!
//! Jobs live in memory only; nothing here is persisted across restarts.

pub mod job;
pub mod stems;

pub use job::{Artifacts, Job, JobInput, JobStatus, StatusTransition};
pub use stems::StemSet;
