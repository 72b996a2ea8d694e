//! Checkpointing: what a restarted master needs to resume one job.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use common::{CounterMap, JobDescriptor, JobState};

use crate::ledger::AllocRecord;
use crate::pool::ResourceItem;

/// A self-contained snapshot of one job.
///
/// Pool statuses are not stored directly; they are replayed from `history`
/// over the dumped map resources on load, which keeps the two consistent
/// even if the snapshot was taken between an assignment and its commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCheckpoint {
    pub job_id: String,
    pub state: JobState,
    pub descriptor: JobDescriptor,
    pub start_time: i64,
    pub finish_time: i64,
    pub history: Vec<AllocRecord>,
    pub map_resources: Vec<ResourceItem>,
    pub counters: CounterMap,
}

/// Persistent metadata store the master saves checkpoints into.
#[async_trait]
pub trait Store: Send + Sync {
    async fn save_job(&self, checkpoint: &JobCheckpoint) -> anyhow::Result<()>;

    async fn load_job(&self, job_id: &str) -> anyhow::Result<Option<JobCheckpoint>>;
}
