//! Types shared between the job tracker and its worker/client peers.
//!
//! The tracker hands these across its RPC boundary, persists some of them in
//! checkpoints, and expects the worker side to echo them back verbatim.

use std::collections::HashMap;

pub mod job;
pub mod status;

pub use job::{InputFormat, JobDescriptor, JobPriority, JobState, JobType};
pub use status::{Status, TaskState, TaskStatistics};

/// User counters reported by a finished attempt, keyed by counter name.
pub type CounterMap = HashMap<String, i64>;
