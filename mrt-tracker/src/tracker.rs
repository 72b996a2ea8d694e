//! The per-job coordination state machine.
//!
//! Two mutual-exclusion domains protect a tracker: the `core` lock (job
//! state, descriptor, deployer handles, monitor flags, ignore-failure slots,
//! counters, dismissal sets, end-game thresholds) and the `alloc` lock (the
//! allocation ledger with its indices, heap and slugs, plus per-task failure
//! bookkeeping and the minion stub). Neither lock is ever held across an RPC
//! or DFS call: each path decides under a lock, snapshots what it needs,
//! releases, performs the I/O and re-acquires to commit.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::Local;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use common::{
    CounterMap, JobDescriptor, JobPriority, JobState, JobType, Status, TaskState, TaskStatistics,
};

use crate::cluster::{Deployer, JobHost, MinionStub};
use crate::config::TrackerConfig;
use crate::counters::CounterAggregator;
use crate::dfs::Dfs;
use crate::ledger::AllocationLedger;
use crate::monitor::MonitorTimer;
use crate::partition::build_map_splits;
use crate::pool::{IdItem, MapSplit, ResourceItem, TaskItem, TaskPool, TaskStatus};
use crate::store::JobCheckpoint;

/// Remote collaborators one tracker drives.
pub struct TrackerContext {
    pub host: Arc<dyn JobHost>,
    pub dfs: Arc<dyn Dfs>,
    pub minions: Arc<dyn MinionStub>,
    pub map_deployer: Arc<dyn Deployer>,
    /// Unused for map-only jobs.
    pub reduce_deployer: Option<Arc<dyn Deployer>>,
}

struct JobCore {
    state: JobState,
    descriptor: JobDescriptor,
    error_msg: String,
    start_time: i64,
    finish_time: i64,
    /// Deployments currently up on the cluster provider.
    map_gru: Option<Arc<dyn Deployer>>,
    reduce_gru: Option<Arc<dyn Deployer>>,
    map_monitoring: bool,
    reduce_monitoring: bool,
    map_end_game_begin: u32,
    /// Map-done count at which the reduce phase is pulled up.
    reduce_begin: u32,
    reduce_end_game_begin: u32,
    ignore_failure_mappers: HashSet<u32>,
    ignore_failure_reducers: HashSet<u32>,
    ignored_map_failures: u32,
    ignored_reduce_failures: u32,
    counters: CounterAggregator,
    map_dismissed: HashSet<String>,
    reduce_dismissed: HashSet<String>,
}

struct AllocDomain {
    ledger: AllocationLedger,
    /// Distinct failing hosts per task id of the current phase.
    failed_count: Vec<u32>,
    failed_nodes: HashMap<u32, HashSet<String>>,
    map_failed: u32,
    map_killed: u32,
    reduce_failed: u32,
    reduce_killed: u32,
    stub: Option<Arc<dyn MinionStub>>,
}

pub struct JobTracker {
    job_id: String,
    config: TrackerConfig,
    self_weak: Weak<JobTracker>,
    host: Arc<dyn JobHost>,
    dfs: Arc<dyn Dfs>,
    minions: Arc<dyn MinionStub>,
    map_deployer: Arc<dyn Deployer>,
    reduce_deployer: Option<Arc<dyn Deployer>>,
    map_allow_duplicates: bool,
    reduce_allow_duplicates: bool,
    map_pool: Mutex<Option<TaskPool<MapSplit>>>,
    reduce_pool: Mutex<Option<TaskPool<()>>>,
    core: Mutex<JobCore>,
    alloc: Mutex<AllocDomain>,
    monitor: MonitorTimer,
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

fn generate_job_id() -> String {
    format!(
        "job_{}_{}",
        Local::now().format("%Y%m%d_%H%M%S"),
        rand::random::<u32>()
    )
}

fn normalize_descriptor(descriptor: &mut JobDescriptor, config: &TrackerConfig) {
    if descriptor.map_retry.is_none() {
        descriptor.map_retry = Some(config.retry_bound);
    }
    if descriptor.reduce_retry.is_none() {
        descriptor.reduce_retry = Some(config.retry_bound);
    }
    if descriptor.reduce_total > 0 && descriptor.reduce_capacity > descriptor.reduce_total * 2 {
        descriptor.reduce_capacity = (descriptor.reduce_total * 2).max(60);
    }
}

fn build_end_game_counters(config: &TrackerConfig, core: &mut JobCore) {
    let map_total = core.descriptor.map_total;
    let percent = config.replica_begin_percent;
    let by_count = map_total.saturating_sub(config.replica_begin);
    let by_percent = map_total - map_total * percent / 100;
    core.map_end_game_begin = by_count.min(by_percent);
    if core.descriptor.job_type != JobType::MapReduce {
        return;
    }
    core.reduce_begin = map_total - map_total * percent / 100;
    let reduce_total = core.descriptor.reduce_total;
    let by_count = reduce_total.saturating_sub(config.replica_begin);
    let by_percent = reduce_total * percent / 100;
    core.reduce_end_game_begin = by_count.max(by_percent);
}

/// Reapplies checkpointed history to a freshly reset id table: running
/// attempts re-allocate their id unless it is already done, completions pin
/// it done, terminal failures only restore the attempt generation.
fn replay<T>(history: &[crate::ledger::AllocRecord], table: &mut [TaskItem<T>], is_map: bool) {
    for (no, slot) in table.iter_mut().enumerate() {
        slot.no = no as u32;
        slot.attempt = 0;
        slot.status = TaskStatus::Pending;
        slot.allocated = 0;
    }
    for rec in history {
        if rec.is_map != is_map || rec.no as usize >= table.len() {
            continue;
        }
        let slot = &mut table[rec.no as usize];
        slot.attempt = rec.attempt;
        match rec.state {
            TaskState::Running => {
                if slot.status != TaskStatus::Done {
                    slot.status = TaskStatus::Allocated;
                    slot.allocated += 1;
                }
            }
            TaskState::Completed => {
                slot.status = TaskStatus::Done;
                slot.allocated = 0;
            }
            _ => {}
        }
    }
}

impl JobTracker {
    pub fn new(
        mut descriptor: JobDescriptor,
        context: TrackerContext,
        config: TrackerConfig,
    ) -> Arc<Self> {
        normalize_descriptor(&mut descriptor, &config);
        let map_allow_duplicates = descriptor.map_allow_duplicates;
        let reduce_allow_duplicates = descriptor.reduce_allow_duplicates;
        let max_counters = config.max_counters_per_job;
        Arc::new_cyclic(|self_weak| JobTracker {
            job_id: generate_job_id(),
            config,
            self_weak: self_weak.clone(),
            host: context.host,
            dfs: context.dfs,
            minions: context.minions,
            map_deployer: context.map_deployer,
            reduce_deployer: context.reduce_deployer,
            map_allow_duplicates,
            reduce_allow_duplicates,
            map_pool: Mutex::new(None),
            reduce_pool: Mutex::new(None),
            core: Mutex::new(JobCore {
                state: JobState::Pending,
                descriptor,
                error_msg: String::new(),
                start_time: 0,
                finish_time: 0,
                map_gru: None,
                reduce_gru: None,
                map_monitoring: false,
                reduce_monitoring: false,
                map_end_game_begin: 0,
                reduce_begin: 0,
                reduce_end_game_begin: 0,
                ignore_failure_mappers: HashSet::new(),
                ignore_failure_reducers: HashSet::new(),
                ignored_map_failures: 0,
                ignored_reduce_failures: 0,
                counters: CounterAggregator::new(max_counters),
                map_dismissed: HashSet::new(),
                reduce_dismissed: HashSet::new(),
            }),
            alloc: Mutex::new(AllocDomain {
                ledger: AllocationLedger::new(),
                failed_count: Vec::new(),
                failed_nodes: HashMap::new(),
                map_failed: 0,
                map_killed: 0,
                reduce_failed: 0,
                reduce_killed: 0,
                stub: None,
            }),
            monitor: MonitorTimer::new(),
        })
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub async fn state(&self) -> JobState {
        self.core.lock().await.state
    }

    pub async fn descriptor(&self) -> JobDescriptor {
        self.core.lock().await.descriptor.clone()
    }

    pub async fn error_message(&self) -> String {
        self.core.lock().await.error_msg.clone()
    }

    pub async fn counters(&self) -> CounterMap {
        self.core.lock().await.counters.snapshot()
    }

    /// Validates the output, partitions the input and launches the map
    /// deployment.
    pub async fn start(&self) -> Status {
        let (output, inputs, input_format, split_size, job_type) = {
            let mut core = self.core.lock().await;
            core.start_time = now_secs();
            (
                core.descriptor.output.clone(),
                core.descriptor.inputs.clone(),
                core.descriptor.input_format,
                core.descriptor.split_size,
                core.descriptor.job_type,
            )
        };

        let exists = match self.dfs.exist(&output).await {
            Ok(exists) => exists,
            Err(err) => {
                warn!("output pre-check failed: {}: {:#}", self.job_id, err);
                true
            }
        };
        if exists {
            info!("output exists, failed: {}", self.job_id);
            let mut core = self.core.lock().await;
            core.descriptor.map_total = 0;
            core.descriptor.reduce_total = 0;
            core.state = JobState::Failed;
            return Status::WriteFileFail;
        }

        let block_size = if split_size == 0 {
            self.config.input_block_size
        } else {
            split_size
        };
        let splits = match build_map_splits(self.dfs.as_ref(), &inputs, input_format, block_size)
            .await
        {
            Ok(splits) => splits,
            Err(err) => {
                warn!("input listing failed: {}: {:#}", self.job_id, err);
                Vec::new()
            }
        };
        if splits.is_empty() {
            info!("map input may not exist, failed: {}", self.job_id);
            let mut core = self.core.lock().await;
            core.descriptor.reduce_total = 0;
            core.state = JobState::Failed;
            return Status::OpenFileFail;
        }

        let map_total = splits.len() as u32;
        {
            let mut pool = self.map_pool.lock().await;
            *pool = Some(TaskPool::with_payloads(splits, self.config.parallel_attempts));
        }
        let reduce_total = {
            let mut core = self.core.lock().await;
            core.descriptor.map_total = map_total;
            build_end_game_counters(&self.config, &mut core);
            core.descriptor.reduce_total
        };
        if job_type == JobType::MapReduce {
            let mut pool = self.reduce_pool.lock().await;
            *pool = Some(TaskPool::ids(reduce_total, self.config.parallel_attempts));
        }
        {
            let mut alloc = self.alloc.lock().await;
            alloc.failed_count = vec![0; map_total as usize];
            alloc.stub = Some(self.minions.clone());
        }

        let deployer = self.map_deployer.clone();
        if deployer.start().await == Status::Ok {
            let mut core = self.core.lock().await;
            core.map_gru = Some(deployer);
            info!(
                "start a new map reduce job: {} -> {}",
                core.descriptor.name, self.job_id
            );
            Status::Ok
        } else {
            warn!("galaxy reported an error deploying minions: {}", self.job_id);
            Status::GalaxyError
        }
    }

    fn schedule_monitor(&self, epoch: u64, map_now: bool, delay: Duration) {
        let weak = self.self_weak.clone();
        self.monitor.schedule(epoch, map_now, delay, move || async move {
            if let Some(tracker) = weak.upgrade() {
                tracker.keep_monitoring(map_now).await;
            }
        });
    }

    /// Hands a map task to a polling worker.
    pub async fn assign_map(&self, endpoint: &str) -> (Option<ResourceItem>, Status) {
        let end_game_begin = {
            let mut core = self.core.lock().await;
            match core.state {
                JobState::Pending => core.state = JobState::Running,
                JobState::Running => {}
                _ => {
                    debug!("assign map: job is over: {}", self.job_id);
                    return (None, Status::NoMore);
                }
            }
            core.map_end_game_begin
        };

        let fresh = {
            let mut pool = self.map_pool.lock().await;
            match pool.as_mut() {
                Some(pool) => pool.next(),
                None => return (None, Status::NoMore),
            }
        };
        let item = match fresh {
            Some(item) => {
                if self.map_allow_duplicates && item.no >= end_game_begin {
                    let mut alloc = self.alloc.lock().await;
                    for _ in 0..self.config.replica_num {
                        alloc.ledger.map_slug.push_back(item.no);
                    }
                }
                item
            }
            None => match self.take_map_slug_item().await {
                Some(item) => {
                    info!("hand out a queued duplicate: map_{}", item.no);
                    item
                }
                None => return (None, self.can_map_dismiss(endpoint).await),
            },
        };

        if item.no >= end_game_begin {
            let mut core = self.core.lock().await;
            if !core.map_monitoring {
                core.map_monitoring = true;
                self.schedule_monitor(self.monitor.epoch(), true, Duration::ZERO);
            }
        }

        {
            let mut alloc = self.alloc.lock().await;
            alloc
                .ledger
                .push_attempt(endpoint, item.no, item.attempt, true, now_secs());
        }
        info!(
            "assign map: <no {}, attempt {}> to {}: {}",
            item.no, item.attempt, endpoint, self.job_id
        );
        (Some(item), Status::Ok)
    }

    /// Hands a reduce task to a polling worker.
    pub async fn assign_reduce(&self, endpoint: &str) -> (Option<IdItem>, Status) {
        let end_game_begin = {
            let mut core = self.core.lock().await;
            match core.state {
                JobState::Pending => core.state = JobState::Running,
                JobState::Running => {}
                _ => {
                    debug!("assign reduce: job is over: {}", self.job_id);
                    return (None, Status::NoMore);
                }
            }
            core.reduce_end_game_begin
        };

        let fresh = {
            let mut pool = self.reduce_pool.lock().await;
            match pool.as_mut() {
                Some(pool) => pool.next(),
                None => return (None, Status::NoMore),
            }
        };
        let item = match fresh {
            Some(item) => {
                if self.reduce_allow_duplicates && item.no >= end_game_begin {
                    let mut alloc = self.alloc.lock().await;
                    for _ in 0..self.config.replica_num {
                        alloc.ledger.reduce_slug.push_back(item.no);
                    }
                }
                item
            }
            None => match self.take_reduce_slug_item().await {
                Some(item) => {
                    info!("hand out a queued duplicate: reduce_{}", item.no);
                    item
                }
                None => return (None, self.can_reduce_dismiss(endpoint).await),
            },
        };

        if item.no >= end_game_begin {
            let mut core = self.core.lock().await;
            if !core.reduce_monitoring {
                core.reduce_monitoring = true;
                self.schedule_monitor(self.monitor.epoch(), false, Duration::ZERO);
            }
        }

        {
            let mut alloc = self.alloc.lock().await;
            alloc
                .ledger
                .push_attempt(endpoint, item.no, item.attempt, false, now_secs());
        }
        info!(
            "assign reduce: <no {}, attempt {}> to {}: {}",
            item.no, item.attempt, endpoint, self.job_id
        );
        (Some(item), Status::Ok)
    }

    /// Pops the next still-allocated id off the map slug and re-hands it out.
    async fn take_map_slug_item(&self) -> Option<ResourceItem> {
        let mut alloc = self.alloc.lock().await;
        let mut pool = self.map_pool.lock().await;
        let pool = pool.as_mut()?;
        while let Some(&head) = alloc.ledger.map_slug.front() {
            if pool.is_allocated(head) {
                break;
            }
            info!("map_slug pop: map_{}", head);
            alloc.ledger.map_slug.pop_front();
        }
        let no = alloc.ledger.map_slug.pop_front()?;
        pool.take(no)
    }

    async fn take_reduce_slug_item(&self) -> Option<IdItem> {
        let mut alloc = self.alloc.lock().await;
        let mut pool = self.reduce_pool.lock().await;
        let pool = pool.as_mut()?;
        while let Some(&head) = alloc.ledger.reduce_slug.front() {
            if pool.is_allocated(head) {
                break;
            }
            alloc.ledger.reduce_slug.pop_front();
        }
        let no = alloc.ledger.reduce_slug.pop_front()?;
        pool.take(no)
    }

    /// Decides whether a worker with nothing to do should park or exit.
    ///
    /// The boundary is exact: once `dismissed` workers reach the budget the
    /// rest are parked, below it each caller is recorded and dismissed.
    async fn can_map_dismiss(&self, endpoint: &str) -> Status {
        let completed = {
            let pool = self.map_pool.lock().await;
            pool.as_ref().map_or(0, |pool| pool.done())
        };
        let mut core = self.core.lock().await;
        let capacity = core.descriptor.map_capacity as i64;
        let not_done = core.descriptor.map_total as i64 - completed as i64;
        let keep = (not_done.max(5) as f64 * self.config.left_percent as f64 / 100.0).ceil() as i64;
        let dismiss_budget = capacity - keep;
        if capacity > not_done {
            if core.map_dismissed.len() as i64 >= dismiss_budget {
                debug!("assign map: suspend: {}", self.job_id);
                Status::Suspend
            } else {
                core.map_dismissed.insert(endpoint.to_string());
                info!("assign map: no more: {}, {}", self.job_id, endpoint);
                Status::NoMore
            }
        } else {
            Status::Suspend
        }
    }

    async fn can_reduce_dismiss(&self, endpoint: &str) -> Status {
        let completed = {
            let pool = self.reduce_pool.lock().await;
            pool.as_ref().map_or(0, |pool| pool.done())
        };
        let mut core = self.core.lock().await;
        let capacity = core.descriptor.reduce_capacity as i64;
        let not_done = core.descriptor.reduce_total as i64 - completed as i64;
        let keep = (not_done.max(5) as f64 * self.config.left_percent as f64 / 100.0).ceil() as i64;
        let dismiss_budget = capacity - keep;
        if capacity > not_done {
            if core.reduce_dismissed.len() as i64 >= dismiss_budget {
                debug!("assign reduce: suspend: {}", self.job_id);
                Status::Suspend
            } else {
                core.reduce_dismissed.insert(endpoint.to_string());
                info!("assign reduce: no more: {}, {}", self.job_id, endpoint);
                Status::NoMore
            }
        } else {
            Status::Suspend
        }
    }

    async fn write_empty_file(&self, path: &str) -> anyhow::Result<()> {
        let writer = self.dfs.open_write(path).await?;
        writer.close().await
    }

    async fn retract(&self, end_state: JobState) {
        self.host.retract(&self.job_id, end_state).await;
        let mut core = self.core.lock().await;
        core.state = end_state;
    }

    /// Takes a worker's terminal report for a map attempt.
    pub async fn finish_map(
        &self,
        no: u32,
        attempt: u32,
        state: TaskState,
        err_msg: &str,
        counters: &CounterMap,
    ) -> Status {
        let found = {
            let alloc = self.alloc.lock().await;
            alloc
                .ledger
                .running(no, attempt, true)
                .map(|id| (id, alloc.ledger.record(id).endpoint.clone()))
        };
        let Some((rec_id, endpoint)) = found else {
            warn!(
                "try to finish an inexistent map task: <no {}, attempt {}>: {}",
                no, attempt, self.job_id
            );
            return Status::NoMore;
        };
        info!(
            "finish a map task: <no {}, attempt {}>, state {:?}: {}",
            no, attempt, state, self.job_id
        );

        let mut state = state;
        if state == TaskState::MoveOutputFailed {
            let done = {
                let pool = self.map_pool.lock().await;
                pool.as_ref().map_or(false, |pool| pool.is_done(no))
            };
            state = if done { TaskState::Canceled } else { TaskState::Failed };
        }
        let node = endpoint.split(':').next().unwrap_or_default().to_string();

        // A task that exhausted its retries may hold an ignore-failure slot:
        // its failure is converted into a completion backed by an empty
        // shuffle file so downstream reducers read nothing for it.
        if state == TaskState::Failed {
            let fake_complete = {
                let core = self.core.lock().await;
                core.ignore_failure_mappers
                    .contains(&no)
                    .then(|| (core.descriptor.job_type, core.descriptor.output.clone()))
            };
            if let Some((job_type, output)) = fake_complete {
                warn!("make map_{} of {} fake-completed", no, self.job_id);
                state = TaskState::Completed;
                if job_type != JobType::MapOnly {
                    let sort_file =
                        format!("{}/_temporary/shuffle/map_{}/0.sort", output, no);
                    warn!("make an empty sort file: {}", sort_file);
                    if let Err(err) = self.write_empty_file(&sort_file).await {
                        warn!("empty sort file write failed: {:#}", err);
                        state = TaskState::Failed;
                    }
                }
            }
        }

        let mut finished = false;
        match state {
            TaskState::Completed => {
                let (won, completed, sum) = {
                    let mut pool = self.map_pool.lock().await;
                    match pool.as_mut() {
                        Some(pool) => {
                            let won = pool.finish(no);
                            (won, pool.done(), pool.sum_of_items())
                        }
                        None => (false, 0, 0),
                    }
                };
                if !won {
                    warn!("ignore finish map request: {}, {}", self.job_id, no);
                    state = TaskState::Canceled;
                } else {
                    info!(
                        "complete a map task ({}/{}): {}",
                        completed, sum, self.job_id
                    );
                    let (job_type, output, map_total, reduce_total, reduce_begin) = {
                        let mut core = self.core.lock().await;
                        if !core.counters.accumulate(counters) {
                            warn!("too many counters, some were dropped: {}", self.job_id);
                        }
                        (
                            core.descriptor.job_type,
                            core.descriptor.output.clone(),
                            core.descriptor.map_total,
                            core.descriptor.reduce_total,
                            core.reduce_begin,
                        )
                    };
                    if job_type == JobType::MapReduce && completed == reduce_begin {
                        info!(
                            "map phase nearly ends, pull up reduce tasks: {}",
                            self.job_id
                        );
                        finished = self.start_reduce_deployment().await;
                    }
                    if !finished && completed == map_total {
                        if job_type == JobType::MapOnly {
                            info!("map-only job finished: {}", self.job_id);
                            let scratch = format!("{}/_temporary", output);
                            if let Err(err) = self.dfs.remove(&scratch).await {
                                warn!("remove temp failed: {:#}", err);
                            }
                            self.retract(JobState::Completed).await;
                            finished = true;
                        } else {
                            self.enter_reduce_phase(reduce_total).await;
                        }
                    }
                }
            }
            TaskState::Failed => {
                {
                    let mut pool = self.map_pool.lock().await;
                    if let Some(pool) = pool.as_mut() {
                        pool.return_back(no);
                    }
                }
                let failures = {
                    let mut alloc = self.alloc.lock().await;
                    if alloc.failed_nodes.entry(no).or_default().insert(node.clone()) {
                        if let Some(count) = alloc.failed_count.get_mut(no as usize) {
                            *count += 1;
                        }
                        warn!(
                            "failed map task: job: {}, no: {}, attempt: {}, node: {}",
                            self.job_id, no, attempt, node
                        );
                    }
                    alloc.map_failed += 1;
                    alloc.failed_count.get(no as usize).copied().unwrap_or(0)
                };
                let retry_bound = {
                    let core = self.core.lock().await;
                    core.descriptor.map_retry.unwrap_or(self.config.retry_bound)
                };
                if failures >= retry_bound {
                    let absorbed = {
                        let mut core = self.core.lock().await;
                        if core.ignored_map_failures < core.descriptor.ignore_map_failures {
                            core.ignore_failure_mappers.insert(no);
                            core.ignored_map_failures += 1;
                            warn!("ignore failures of {}, map_{}", self.job_id, no);
                            true
                        } else {
                            false
                        }
                    };
                    if !absorbed {
                        info!("map failed, kill job: {}", self.job_id);
                        warn!("minion error message: {}", err_msg);
                        {
                            let mut core = self.core.lock().await;
                            core.error_msg = err_msg.to_string();
                        }
                        self.retract(JobState::Failed).await;
                        finished = true;
                    }
                }
            }
            TaskState::Killed => {
                {
                    let mut pool = self.map_pool.lock().await;
                    if let Some(pool) = pool.as_mut() {
                        pool.return_back(no);
                    }
                }
                let mut alloc = self.alloc.lock().await;
                alloc.map_killed += 1;
            }
            TaskState::Canceled => {
                let mut pool = self.map_pool.lock().await;
                if let Some(pool) = pool.as_mut() {
                    if !pool.is_done(no) {
                        pool.return_back(no);
                    }
                }
            }
            TaskState::Running | TaskState::MoveOutputFailed => {
                warn!("unfamiliar task finish state: {:?}: {}", state, self.job_id);
                return Status::NoMore;
            }
        }

        {
            let mut alloc = self.alloc.lock().await;
            alloc.ledger.commit(rec_id, state, now_secs());
            if self.map_allow_duplicates
                && matches!(state, TaskState::Killed | TaskState::Failed)
            {
                alloc.ledger.map_slug.push_back(no);
            }
        }

        if state != TaskState::Completed || !self.map_allow_duplicates {
            return Status::Ok;
        }
        self.cancel_other_attempts(no, attempt, true).await;
        if finished {
            let mut alloc = self.alloc.lock().await;
            alloc.stub = None;
        }
        Status::Ok
    }

    /// Starts the reduce deployment; returns true when the job had to be
    /// retracted because the cluster refused it.
    async fn start_reduce_deployment(&self) -> bool {
        let deployer = self.reduce_deployer.clone();
        let started = match &deployer {
            Some(deployer) => deployer.start().await == Status::Ok,
            None => false,
        };
        if started {
            let mut core = self.core.lock().await;
            core.reduce_gru = deployer;
            return false;
        }
        warn!("reduce failed due to galaxy issue: {}", self.job_id);
        {
            let mut core = self.core.lock().await;
            core.error_msg = "failed to deploy reduce minions".to_string();
        }
        self.retract(JobState::Failed).await;
        true
    }

    /// Hands the monitor over to the reduce phase once the last map is done:
    /// failure bookkeeping restarts for reduce ids, the in-flight monitor
    /// pass is drained before map entries leave the heap, and the map
    /// deployment is released.
    async fn enter_reduce_phase(&self, reduce_total: u32) {
        info!("map phase ends now: {}", self.job_id);
        {
            let mut alloc = self.alloc.lock().await;
            alloc.failed_count = vec![0; reduce_total as usize];
            alloc.failed_nodes.clear();
        }
        let epoch = self.monitor.drain().await;
        {
            let mut alloc = self.alloc.lock().await;
            alloc.ledger.purge_map_from_heap();
        }
        let resume_reduce = {
            let core = self.core.lock().await;
            core.reduce_monitoring
        };
        if resume_reduce {
            self.schedule_monitor(epoch, false, Duration::ZERO);
        }
        let deployer = {
            let mut core = self.core.lock().await;
            core.map_gru.take()
        };
        if let Some(deployer) = deployer {
            info!("map minions finished, kill: {}", self.job_id);
            if deployer.stop().await != Status::Ok {
                warn!("galaxy error while stopping map minions: {}", self.job_id);
            }
        }
    }

    /// Takes a worker's terminal report for a reduce attempt.
    pub async fn finish_reduce(
        &self,
        no: u32,
        attempt: u32,
        state: TaskState,
        err_msg: &str,
        counters: &CounterMap,
    ) -> Status {
        // Reduce completions are refused until every map task is done;
        // early reducers are told to wait.
        let map_unfinished = {
            let pool = self.map_pool.lock().await;
            let map_done = pool.as_ref().map(|pool| (pool.done(), pool.sum_of_items()));
            map_done.map_or(false, |(done, sum)| done < sum)
        };
        if map_unfinished && state != TaskState::Killed {
            warn!("reduce finished too early, wait a moment: {}", self.job_id);
            return Status::Suspend;
        }

        let found = {
            let alloc = self.alloc.lock().await;
            alloc
                .ledger
                .running(no, attempt, false)
                .map(|id| (id, alloc.ledger.record(id).endpoint.clone()))
        };
        let Some((rec_id, endpoint)) = found else {
            warn!(
                "try to finish an inexistent reduce task: <no {}, attempt {}>: {}",
                no, attempt, self.job_id
            );
            return Status::NoMore;
        };
        info!(
            "finish a reduce task: <no {}, attempt {}>, state {:?}: {}",
            no, attempt, state, self.job_id
        );

        let mut state = state;
        if state == TaskState::MoveOutputFailed {
            let done = {
                let pool = self.reduce_pool.lock().await;
                pool.as_ref().map_or(false, |pool| pool.is_done(no))
            };
            state = if done { TaskState::Canceled } else { TaskState::Failed };
        }
        let node = endpoint.split(':').next().unwrap_or_default().to_string();

        if state == TaskState::Failed {
            let fake_complete = {
                let core = self.core.lock().await;
                core.ignore_failure_reducers.contains(&no)
            };
            if fake_complete {
                warn!("make reduce_{} of {} fake-completed", no, self.job_id);
                state = TaskState::Completed;
            }
        }

        let mut finished = false;
        match state {
            TaskState::Completed => {
                let (won, completed, sum) = {
                    let mut pool = self.reduce_pool.lock().await;
                    match pool.as_mut() {
                        Some(pool) => {
                            let won = pool.finish(no);
                            (won, pool.done(), pool.sum_of_items())
                        }
                        None => (false, 0, 0),
                    }
                };
                if !won {
                    warn!("ignore finish reduce request: {}, {}", self.job_id, no);
                    state = TaskState::Canceled;
                } else {
                    info!(
                        "complete a reduce task ({}/{}): {}",
                        completed, sum, self.job_id
                    );
                    {
                        let mut core = self.core.lock().await;
                        if !core.counters.accumulate(counters) {
                            warn!("too many counters, some were dropped: {}", self.job_id);
                        }
                    }
                    if completed == sum {
                        info!("map-reduce job finished: {}", self.job_id);
                        let output = {
                            let core = self.core.lock().await;
                            core.descriptor.output.clone()
                        };
                        let scratch = format!("{}/_temporary", output);
                        info!("remove temp work directory: {}", scratch);
                        if let Err(err) = self.dfs.remove(&scratch).await {
                            warn!("remove temp failed: {:#}", err);
                        }
                        self.retract(JobState::Completed).await;
                        finished = true;
                    }
                }
            }
            TaskState::Failed => {
                {
                    let mut pool = self.reduce_pool.lock().await;
                    if let Some(pool) = pool.as_mut() {
                        pool.return_back(no);
                    }
                }
                let failures = {
                    let mut alloc = self.alloc.lock().await;
                    if alloc.failed_nodes.entry(no).or_default().insert(node.clone()) {
                        if let Some(count) = alloc.failed_count.get_mut(no as usize) {
                            *count += 1;
                        }
                        warn!(
                            "failed reduce task: job: {}, no: {}, attempt: {}, node: {}",
                            self.job_id, no, attempt, node
                        );
                    }
                    alloc.reduce_failed += 1;
                    alloc.failed_count.get(no as usize).copied().unwrap_or(0)
                };
                let retry_bound = {
                    let core = self.core.lock().await;
                    core.descriptor
                        .reduce_retry
                        .unwrap_or(self.config.retry_bound)
                };
                if failures >= retry_bound {
                    let absorbed = {
                        let mut core = self.core.lock().await;
                        if core.ignored_reduce_failures < core.descriptor.ignore_reduce_failures
                        {
                            core.ignore_failure_reducers.insert(no);
                            core.ignored_reduce_failures += 1;
                            warn!("ignore failures of {}, reduce_{}", self.job_id, no);
                            true
                        } else {
                            false
                        }
                    };
                    if !absorbed {
                        info!("reduce failed, kill job: {}", self.job_id);
                        warn!("minion error message: {}", err_msg);
                        {
                            let mut core = self.core.lock().await;
                            core.error_msg = err_msg.to_string();
                        }
                        self.retract(JobState::Failed).await;
                        finished = true;
                    }
                }
            }
            TaskState::Killed => {
                {
                    let mut pool = self.reduce_pool.lock().await;
                    if let Some(pool) = pool.as_mut() {
                        pool.return_back(no);
                    }
                }
                let mut alloc = self.alloc.lock().await;
                alloc.reduce_killed += 1;
            }
            TaskState::Canceled => {
                let mut pool = self.reduce_pool.lock().await;
                if let Some(pool) = pool.as_mut() {
                    if !pool.is_done(no) {
                        pool.return_back(no);
                    }
                }
            }
            TaskState::Running | TaskState::MoveOutputFailed => {
                warn!("unfamiliar task finish state: {:?}: {}", state, self.job_id);
                return Status::NoMore;
            }
        }

        {
            let mut alloc = self.alloc.lock().await;
            alloc.ledger.commit(rec_id, state, now_secs());
            if self.reduce_allow_duplicates
                && matches!(state, TaskState::Killed | TaskState::Failed)
            {
                alloc.ledger.reduce_slug.push_back(no);
            }
        }

        if state != TaskState::Completed || !self.reduce_allow_duplicates {
            return Status::Ok;
        }
        self.cancel_other_attempts(no, attempt, false).await;
        if finished {
            let mut alloc = self.alloc.lock().await;
            alloc.stub = None;
        }
        Status::Ok
    }

    /// Marks every losing attempt of a completed task canceled and fires a
    /// best-effort cancel to each losing worker.
    async fn cancel_other_attempts(&self, no: u32, attempt: u32, is_map: bool) {
        let (stub, losers) = {
            let mut alloc = self.alloc.lock().await;
            let Some(stub) = alloc.stub.clone() else {
                return;
            };
            (stub, alloc.ledger.cancel_losers(no, attempt, is_map, now_secs()))
        };
        for (endpoint, loser_no, loser_attempt) in losers {
            info!(
                "cancel {} task: job: {}, task: {}, attempt: {}",
                if is_map { "map" } else { "reduce" },
                self.job_id,
                loser_no,
                loser_attempt
            );
            let stub = stub.clone();
            let job_id = self.job_id.clone();
            tokio::spawn(async move {
                if let Err(err) = stub
                    .cancel_task(&endpoint, &job_id, loser_no, loser_attempt)
                    .await
                {
                    warn!("fail to cancel task on {}: {:#}", endpoint, err);
                }
            });
        }
    }

    /// Forwards a priority/capacity change to the active deployments and
    /// commits it onto the descriptor.
    pub async fn update(
        &self,
        priority: Option<JobPriority>,
        map_capacity: Option<u32>,
        reduce_capacity: Option<u32>,
    ) -> Status {
        let deployer = {
            let core = self.core.lock().await;
            core.map_gru.clone()
        };
        if let Some(deployer) = deployer {
            if deployer.update(priority, map_capacity).await != Status::Ok {
                return Status::GalaxyError;
            }
            let mut core = self.core.lock().await;
            if let Some(capacity) = map_capacity {
                core.descriptor.map_capacity = capacity;
            }
            if let Some(priority) = priority {
                core.descriptor.priority = priority;
            }
        }
        let deployer = {
            let core = self.core.lock().await;
            core.reduce_gru.clone()
        };
        if let Some(deployer) = deployer {
            if deployer.update(priority, reduce_capacity).await != Status::Ok {
                return Status::GalaxyError;
            }
            let mut core = self.core.lock().await;
            if let Some(capacity) = reduce_capacity {
                core.descriptor.reduce_capacity = capacity;
            }
            if let Some(priority) = priority {
                core.descriptor.priority = priority;
            }
        }
        Status::Ok
    }

    /// Tears the job down into `end_state`: deployments are stopped, the
    /// monitor is drained, every running attempt is marked killed and the
    /// worker channel is released. Later assigns answer `NoMore`, later
    /// finishes are ignored.
    pub async fn kill(&self, end_state: JobState) -> Status {
        let (map_deployer, reduce_deployer) = {
            let mut core = self.core.lock().await;
            core.state = end_state;
            (core.map_gru.take(), core.reduce_gru.take())
        };
        if let Some(deployer) = map_deployer {
            info!("map minions finished, kill: {}", self.job_id);
            if deployer.stop().await != Status::Ok {
                warn!("galaxy error while stopping map minions: {}", self.job_id);
            }
        }
        if let Some(deployer) = reduce_deployer {
            info!("reduce minions finished, kill: {}", self.job_id);
            if deployer.stop().await != Status::Ok {
                warn!("galaxy error while stopping reduce minions: {}", self.job_id);
            }
        }
        self.monitor.drain().await;
        {
            let mut alloc = self.alloc.lock().await;
            let (map_killed, reduce_killed) = alloc.ledger.kill_running(now_secs());
            alloc.map_killed += map_killed;
            alloc.reduce_killed += reduce_killed;
            alloc.stub = None;
        }
        let mut core = self.core.lock().await;
        core.finish_time = now_secs();
        Status::Ok
    }

    pub async fn map_statistics(&self) -> TaskStatistics {
        let (pending, running, completed) = {
            let pool = self.map_pool.lock().await;
            pool.as_ref()
                .map_or((0, 0, 0), |pool| (pool.pending(), pool.allocated(), pool.done()))
        };
        let (failed, killed) = {
            let alloc = self.alloc.lock().await;
            (alloc.map_failed, alloc.map_killed)
        };
        let total = self.core.lock().await.descriptor.map_total;
        TaskStatistics {
            total,
            pending,
            running,
            completed,
            failed,
            killed,
        }
    }

    pub async fn reduce_statistics(&self) -> TaskStatistics {
        let (pending, running, completed) = {
            let pool = self.reduce_pool.lock().await;
            pool.as_ref()
                .map_or((0, 0, 0), |pool| (pool.pending(), pool.allocated(), pool.done()))
        };
        let (failed, killed) = {
            let alloc = self.alloc.lock().await;
            (alloc.reduce_failed, alloc.reduce_killed)
        };
        let total = self.core.lock().await.descriptor.reduce_total;
        TaskStatistics {
            total,
            pending,
            running,
            completed,
            failed,
            killed,
        }
    }

    /// Snapshots everything a restarted master needs to resume this job.
    pub async fn dump(&self) -> JobCheckpoint {
        let history = {
            let alloc = self.alloc.lock().await;
            alloc.ledger.history()
        };
        let map_resources = {
            let pool = self.map_pool.lock().await;
            pool.as_ref().map(|pool| pool.dump()).unwrap_or_default()
        };
        let core = self.core.lock().await;
        JobCheckpoint {
            job_id: self.job_id.clone(),
            state: core.state,
            descriptor: core.descriptor.clone(),
            start_time: core.start_time,
            finish_time: core.finish_time,
            history,
            map_resources,
            counters: core.counters.snapshot(),
        }
    }

    /// Rebuilds a tracker from a checkpoint: pools are replayed from the
    /// allocation history, running attempts re-enter the monitor's heap and
    /// a running job resumes monitoring of its unfinished phase.
    pub async fn from_checkpoint(
        checkpoint: JobCheckpoint,
        context: TrackerContext,
        config: TrackerConfig,
    ) -> anyhow::Result<Arc<Self>> {
        let JobCheckpoint {
            job_id,
            state,
            mut descriptor,
            start_time,
            finish_time,
            history,
            map_resources,
            counters,
        } = checkpoint;
        info!("reload job: {}, history: {}", job_id, history.len());
        normalize_descriptor(&mut descriptor, &config);

        let map_pool = if descriptor.map_total != 0 {
            if map_resources.len() != descriptor.map_total as usize {
                anyhow::bail!(
                    "resource reload failed: {} entries for {} map tasks",
                    map_resources.len(),
                    descriptor.map_total
                );
            }
            let mut items = map_resources;
            replay(&history, &mut items, true);
            Some(TaskPool::from_items(items, config.parallel_attempts))
        } else {
            None
        };
        let reduce_pool = if descriptor.job_type == JobType::MapReduce
            && descriptor.reduce_total != 0
        {
            let mut items = TaskPool::ids(descriptor.reduce_total, config.parallel_attempts).dump();
            replay(&history, &mut items, false);
            Some(TaskPool::from_items(items, config.parallel_attempts))
        } else {
            None
        };

        let map_phase_done = map_pool
            .as_ref()
            .map_or(false, |pool| pool.done() == descriptor.map_total);
        let failed_len = if map_phase_done {
            descriptor.reduce_total
        } else {
            descriptor.map_total
        };
        let (ledger, tallies) = AllocationLedger::from_history(history);

        let running = state == JobState::Running;
        let keep_stub = matches!(state, JobState::Running | JobState::Pending);
        let map_allow_duplicates = descriptor.map_allow_duplicates;
        let reduce_allow_duplicates = descriptor.reduce_allow_duplicates;
        let max_counters = config.max_counters_per_job;
        let minions = context.minions.clone();

        let tracker = Arc::new_cyclic(|self_weak| JobTracker {
            job_id,
            config,
            self_weak: self_weak.clone(),
            host: context.host,
            dfs: context.dfs,
            minions: context.minions,
            map_deployer: context.map_deployer,
            reduce_deployer: context.reduce_deployer,
            map_allow_duplicates,
            reduce_allow_duplicates,
            map_pool: Mutex::new(map_pool),
            reduce_pool: Mutex::new(reduce_pool),
            core: Mutex::new(JobCore {
                state,
                descriptor,
                error_msg: String::new(),
                start_time,
                finish_time,
                map_gru: None,
                reduce_gru: None,
                map_monitoring: running && !map_phase_done,
                reduce_monitoring: running && map_phase_done,
                map_end_game_begin: 0,
                reduce_begin: 0,
                reduce_end_game_begin: 0,
                ignore_failure_mappers: HashSet::new(),
                ignore_failure_reducers: HashSet::new(),
                ignored_map_failures: 0,
                ignored_reduce_failures: 0,
                counters: CounterAggregator::restore(counters, max_counters),
                map_dismissed: HashSet::new(),
                reduce_dismissed: HashSet::new(),
            }),
            alloc: Mutex::new(AllocDomain {
                ledger,
                failed_count: vec![0; failed_len as usize],
                failed_nodes: HashMap::new(),
                map_failed: tallies.map_failed,
                map_killed: tallies.map_killed,
                reduce_failed: tallies.reduce_failed,
                reduce_killed: tallies.reduce_killed,
                stub: keep_stub.then_some(minions),
            }),
            monitor: MonitorTimer::new(),
        });
        {
            let mut core = tracker.core.lock().await;
            build_end_game_counters(&tracker.config, &mut core);
        }
        if running {
            tracker.schedule_monitor(tracker.monitor.epoch(), !map_phase_done, Duration::ZERO);
        }
        Ok(tracker)
    }

    /// One monitor pass: derive the straggler timeout from completed-attempt
    /// statistics, inspect the oldest running attempts, query suspects, kill
    /// the unresponsive and queue their task ids for re-handout.
    async fn keep_monitoring(&self, map_now: bool) {
        let epoch = self.monitor.epoch();
        info!(
            "[monitor] {} monitor starts to check timeout: {}",
            if map_now { "map" } else { "reduce" },
            self.job_id
        );
        let (mut time_used, stub) = {
            let alloc = self.alloc.lock().await;
            (alloc.ledger.completed_periods(map_now), alloc.stub.clone())
        };
        let need_random_query = rand::random::<f64>() < 0.3;
        let timeout = if !time_used.is_empty() {
            time_used.sort_unstable();
            let median = time_used[time_used.len() / 2];
            let timeout = median + median / 5;
            info!("[monitor] calc timeout bound, {}: {}", timeout, self.job_id);
            timeout
        } else if need_random_query {
            0
        } else {
            self.schedule_monitor(epoch, map_now, self.config.first_sleep_time);
            info!(
                "[monitor] will now rest for {:?}: {}",
                self.config.first_sleep_time, self.job_id
            );
            return;
        };
        let not_allow_duplicates = if map_now {
            !self.map_allow_duplicates
        } else {
            !self.reduce_allow_duplicates
        };
        let sleep_time = (self.config.time_tolerance.as_secs() as i64).min(timeout);

        let mut budget = 10i32;
        let mut set_aside = Vec::new();
        let mut alloc = self.alloc.lock().await;
        let now = now_secs();
        loop {
            if budget == 0 {
                break;
            }
            budget -= 1;
            let Some((alloc_time, id)) = alloc.ledger.peek_heap() else {
                break;
            };
            if now - alloc_time < sleep_time {
                break;
            }
            alloc.ledger.pop_heap();
            let (state, is_map, no, attempt, endpoint) = {
                let rec = alloc.ledger.record(id);
                (rec.state, rec.is_map, rec.no, rec.attempt, rec.endpoint.clone())
            };
            if state != TaskState::Running {
                budget += 1;
                continue;
            }
            if is_map != map_now {
                budget += 1;
                set_aside.push(id);
                continue;
            }

            if not_allow_duplicates || now - alloc_time < timeout || need_random_query {
                // Query the suspect with the ledger lock released.
                drop(alloc);
                info!(
                    "[monitor] query {} with <{}, {}>: {}",
                    endpoint, no, attempt, self.job_id
                );
                let response = match &stub {
                    Some(stub) => stub.query(&endpoint).await,
                    None => Err(anyhow::anyhow!("minion stub released")),
                };
                alloc = self.alloc.lock().await;
                match response {
                    Ok(overview)
                        if overview.job_id == self.job_id
                            && overview.task_id == no
                            && overview.attempt_id == attempt =>
                    {
                        // Alive and on the right attempt.
                        budget += 1;
                        set_aside.push(id);
                        continue;
                    }
                    response => {
                        let confirmed = response.is_ok();
                        let orphaned = confirmed && {
                            if map_now {
                                let pool = self.map_pool.lock().await;
                                pool.as_ref().map_or(false, |pool| !pool.is_allocated(no))
                            } else {
                                let pool = self.reduce_pool.lock().await;
                                pool.as_ref().map_or(false, |pool| !pool.is_allocated(no))
                            }
                        };
                        if alloc.ledger.record(id).state == TaskState::Running {
                            alloc.ledger.commit(id, TaskState::Killed, now_secs());
                            if map_now {
                                alloc.map_killed += 1;
                            } else {
                                alloc.reduce_killed += 1;
                            }
                        }
                        if orphaned {
                            // The pool no longer carries the id as allocated;
                            // nothing to re-hand-out.
                            budget += 1;
                            continue;
                        }
                        info!(
                            "[monitor] query {} <{}, {}>: {}",
                            if confirmed { "mismatched" } else { "failed" },
                            no,
                            attempt,
                            self.job_id
                        );
                    }
                }
            }

            let state = alloc.ledger.record(id).state;
            if attempt >= self.config.parallel_attempts.saturating_sub(1)
                && state == TaskState::Running
            {
                budget += 1;
                set_aside.push(id);
                let (slug_len, index_len) = if map_now {
                    (alloc.ledger.map_slug.len(), alloc.ledger.map_index_len())
                } else {
                    (alloc.ledger.reduce_slug.len(), alloc.ledger.reduce_index_len())
                };
                if slug_len > index_len {
                    continue;
                }
            }
            if state == TaskState::Killed {
                if map_now {
                    let mut pool = self.map_pool.lock().await;
                    if let Some(pool) = pool.as_mut() {
                        pool.return_back(no);
                    }
                } else {
                    let mut pool = self.reduce_pool.lock().await;
                    if let Some(pool) = pool.as_mut() {
                        pool.return_back(no);
                    }
                }
            }
            if map_now {
                alloc.ledger.map_slug.push_back(no);
            } else {
                alloc.ledger.reduce_slug.push_back(no);
            }
            info!(
                "reallocate a long no-response task: <no {}, attempt {}>: {}",
                no, attempt, self.job_id
            );
        }
        for id in set_aside {
            alloc.ledger.push_heap_entry(id);
        }
        drop(alloc);

        self.schedule_monitor(
            epoch,
            map_now,
            Duration::from_secs(sleep_time.max(0) as u64),
        );
        info!(
            "[monitor] will now rest for {}s: {}",
            sleep_time, self.job_id
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use bytes::Bytes;

    use common::InputFormat;

    use crate::cluster::TaskOverview;
    use crate::dfs::{DfsWriter, FileInfo};

    use super::*;

    struct ListingDfs {
        files: Vec<(String, u64)>,
    }

    #[async_trait]
    impl Dfs for ListingDfs {
        async fn exist(&self, _path: &str) -> anyhow::Result<bool> {
            Ok(false)
        }

        async fn remove(&self, _path: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn list(&self, path: &str) -> anyhow::Result<Vec<FileInfo>> {
            Ok(self
                .files
                .iter()
                .filter(|(name, _)| name.starts_with(path))
                .map(|(name, size)| FileInfo {
                    path: name.clone(),
                    size: *size,
                    is_dir: false,
                })
                .collect())
        }

        async fn glob(&self, _pattern: &str) -> anyhow::Result<Vec<FileInfo>> {
            Ok(Vec::new())
        }

        async fn read(&self, path: &str) -> anyhow::Result<Bytes> {
            anyhow::bail!("unexpected read of {}", path)
        }

        async fn open_write(&self, path: &str) -> anyhow::Result<Box<dyn DfsWriter>> {
            anyhow::bail!("unexpected write of {}", path)
        }
    }

    struct NoopDeployer;

    #[async_trait]
    impl Deployer for NoopDeployer {
        async fn start(&self) -> Status {
            Status::Ok
        }

        async fn update(
            &self,
            _priority: Option<JobPriority>,
            _capacity: Option<u32>,
        ) -> Status {
            Status::Ok
        }

        async fn stop(&self) -> Status {
            Status::Ok
        }
    }

    /// A worker channel that never answers queries.
    struct DeadMinion;

    #[async_trait]
    impl MinionStub for DeadMinion {
        async fn query(&self, endpoint: &str) -> anyhow::Result<TaskOverview> {
            anyhow::bail!("no route to {}", endpoint)
        }

        async fn cancel_task(
            &self,
            _endpoint: &str,
            _job_id: &str,
            _task_id: u32,
            _attempt_id: u32,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct SilentHost {
        retracted: StdMutex<Vec<JobState>>,
    }

    #[async_trait]
    impl JobHost for SilentHost {
        async fn retract(&self, _job_id: &str, end_state: JobState) {
            self.retracted.lock().unwrap().push(end_state);
        }
    }

    fn quiet_config() -> TrackerConfig {
        TrackerConfig {
            // End-game thresholds land at the phase totals, so no monitor is
            // armed and no duplicates are queued unless a test wants them.
            replica_begin: 0,
            replica_begin_percent: 0,
            ..TrackerConfig::default()
        }
    }

    fn map_only_descriptor(files: usize) -> JobDescriptor {
        JobDescriptor {
            name: "grep".to_string(),
            job_type: JobType::MapOnly,
            priority: JobPriority::Normal,
            inputs: (0..files).map(|i| format!("/in/part-{}", i)).collect(),
            output: "/out/grep".to_string(),
            input_format: InputFormat::TextInput,
            split_size: u64::MAX,
            map_capacity: 10,
            reduce_capacity: 0,
            map_total: 0,
            reduce_total: 0,
            map_retry: None,
            reduce_retry: None,
            map_allow_duplicates: true,
            reduce_allow_duplicates: true,
            ignore_map_failures: 0,
            ignore_reduce_failures: 0,
        }
    }

    fn context(files: usize) -> TrackerContext {
        TrackerContext {
            host: Arc::new(SilentHost::default()),
            dfs: Arc::new(ListingDfs {
                files: (0..files).map(|i| (format!("/in/part-{}", i), 10)).collect(),
            }),
            minions: Arc::new(DeadMinion),
            map_deployer: Arc::new(NoopDeployer),
            reduce_deployer: None,
        }
    }

    #[tokio::test]
    async fn monitor_kills_the_unresponsive_attempt_and_requeues_its_task() {
        let mut descriptor = map_only_descriptor(2);
        descriptor.map_allow_duplicates = false;
        let tracker = JobTracker::new(descriptor, context(2), quiet_config());
        assert_eq!(tracker.start().await, Status::Ok);

        let (fast, status) = tracker.assign_map("w1:7700").await;
        assert_eq!(status, Status::Ok);
        let fast = fast.expect("first split");
        assert_eq!(
            tracker
                .finish_map(fast.no, fast.attempt, TaskState::Completed, "", &CounterMap::new())
                .await,
            Status::Ok
        );
        let (slow, _) = tracker.assign_map("w2:7700").await;
        let slow = slow.expect("second split");

        tracker.keep_monitoring(true).await;
        tracker.monitor.drain().await;

        let stats = tracker.map_statistics().await;
        assert_eq!(stats.killed, 1);
        assert_eq!(stats.completed, 1);

        // The killed task id is handed out again with a fresh attempt.
        let (retry, status) = tracker.assign_map("w3:7700").await;
        assert_eq!(status, Status::Ok);
        let retry = retry.expect("requeued split");
        assert_eq!(retry.no, slow.no);
        assert_eq!(retry.attempt, slow.attempt + 1);
    }

    #[tokio::test]
    async fn dismissal_records_surplus_workers_until_the_budget_then_parks() {
        let tracker = JobTracker::new(map_only_descriptor(1), context(1), quiet_config());
        assert_eq!(tracker.start().await, Status::Ok);

        let (item, _) = tracker.assign_map("w0:7700").await;
        assert!(item.is_some());

        // capacity 10, one task still out: budget = 10 - ceil(5 * 1.2) = 4.
        for i in 1..=4 {
            let (item, status) = tracker.assign_map(&format!("w{}:7700", i)).await;
            assert!(item.is_none());
            assert_eq!(status, Status::NoMore, "dismissal {}", i);
        }
        let (_, status) = tracker.assign_map("w5:7700").await;
        assert_eq!(status, Status::Suspend);
        let (_, status) = tracker.assign_map("w6:7700").await;
        assert_eq!(status, Status::Suspend);
    }

    #[tokio::test]
    async fn kill_terminates_running_attempts_and_refuses_new_work() {
        let tracker = JobTracker::new(map_only_descriptor(2), context(2), quiet_config());
        assert_eq!(tracker.start().await, Status::Ok);

        let (item, _) = tracker.assign_map("w1:7700").await;
        let item = item.expect("split");
        assert_eq!(tracker.kill(JobState::Killed).await, Status::Ok);
        assert_eq!(tracker.state().await, JobState::Killed);

        let stats = tracker.map_statistics().await;
        assert_eq!(stats.killed, 1);

        let (none, status) = tracker.assign_map("w2:7700").await;
        assert!(none.is_none());
        assert_eq!(status, Status::NoMore);
        assert_eq!(
            tracker
                .finish_map(item.no, item.attempt, TaskState::Completed, "", &CounterMap::new())
                .await,
            Status::NoMore
        );
    }
}
