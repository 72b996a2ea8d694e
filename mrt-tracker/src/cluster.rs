//! Interfaces to the cluster provider, the workers and the owning master.

use async_trait::async_trait;

use common::{JobPriority, JobState, Status, TaskState};

/// Drives the worker deployment of one phase under the cluster provider.
///
/// One deployer is bound to one phase of one job; the tracker starts the map
/// deployer when the job starts and the reduce deployer once enough map
/// output exists.
#[async_trait]
pub trait Deployer: Send + Sync {
    async fn start(&self) -> Status;

    /// Adjusts priority and/or worker count of a running deployment.
    async fn update(&self, priority: Option<JobPriority>, capacity: Option<u32>) -> Status;

    async fn stop(&self) -> Status;
}

/// What a worker reports about the attempt it is currently running.
#[derive(Debug, Clone)]
pub struct TaskOverview {
    pub job_id: String,
    pub task_id: u32,
    pub attempt_id: u32,
    pub state: TaskState,
}

/// Control channel to individual workers, addressed by endpoint.
#[async_trait]
pub trait MinionStub: Send + Sync {
    async fn query(&self, endpoint: &str) -> anyhow::Result<TaskOverview>;

    async fn cancel_task(
        &self,
        endpoint: &str,
        job_id: &str,
        task_id: u32,
        attempt_id: u32,
    ) -> anyhow::Result<()>;
}

/// Narrow callback into the master owning this job, used to retract the job
/// when it reaches a terminal state.
#[async_trait]
pub trait JobHost: Send + Sync {
    async fn retract(&self, job_id: &str, end_state: JobState);
}
