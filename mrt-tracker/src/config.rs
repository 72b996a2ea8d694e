use std::time::Duration;

/// Tunables governing one tracker; the master's flag layer fills this in.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Remaining-task count at which a phase enters the end-game.
    pub replica_begin: u32,
    /// Remaining-task percentage at which a phase enters the end-game.
    pub replica_begin_percent: u32,
    /// Duplicates queued per end-game assignment.
    pub replica_num: u32,
    /// Percentage of the remaining work kept parked (`Suspend`) instead of
    /// dismissed (`NoMore`) once capacity exceeds what is left.
    pub left_percent: u32,
    /// Monitor back-off while no attempt of the phase has completed yet.
    pub first_sleep_time: Duration,
    /// Upper bound on the monitor's sleep between passes.
    pub time_tolerance: Duration,
    /// Default distinct-host failure budget per task when the descriptor
    /// leaves it unset.
    pub retry_bound: u32,
    /// Cap on simultaneous handouts of one task id.
    pub parallel_attempts: u32,
    /// Cap on distinct user counter names per job.
    pub max_counters_per_job: usize,
    /// Default map split size when the descriptor does not set one.
    pub input_block_size: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            replica_begin: 100,
            replica_begin_percent: 10,
            replica_num: 3,
            left_percent: 120,
            first_sleep_time: Duration::from_secs(10),
            time_tolerance: Duration::from_secs(120),
            retry_bound: 3,
            parallel_attempts: 5,
            max_counters_per_job: 128,
            input_block_size: 500 << 20,
        }
    }
}
