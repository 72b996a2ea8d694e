use serde::{Deserialize, Serialize};

/// Lifecycle of a job.
///
/// Transitions form a DAG: `Pending -> Running -> {Completed, Failed}`, with
/// `Killed` reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// Submitted, no task handed out yet.
    Pending,
    /// At least one task has been assigned.
    Running,
    /// Every task of the final phase is done.
    Completed,
    /// Retries exhausted, or the cluster refused the job.
    Failed,
    /// Externally killed.
    Killed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Killed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobType {
    MapOnly,
    MapReduce,
}

/// How the input is cut into map tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputFormat {
    /// Fixed-size byte ranges of each input file.
    #[default]
    TextInput,
    /// One map task per input line.
    NLineInput,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JobPriority {
    VeryHigh,
    High,
    #[default]
    Normal,
    Low,
}

impl JobPriority {
    /// Maps the client-facing priority labels onto a priority level. Unknown
    /// labels mean `Normal`.
    pub fn from_label(label: &str) -> JobPriority {
        match label {
            "monitor" => JobPriority::VeryHigh,
            "online" => JobPriority::High,
            "offline" => JobPriority::Normal,
            "best-effort" => JobPriority::Low,
            _ => JobPriority::Normal,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Everything a client submits about one job, plus the totals the tracker
/// computes while partitioning.
///
/// Immutable after `start()` except `priority`, `map_capacity` and
/// `reduce_capacity` (changed by `update()`) and `map_total` (computed from
/// the input partition).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub name: String,
    pub job_type: JobType,
    #[serde(default)]
    pub priority: JobPriority,
    /// Input files or patterns; `*` components are expanded on the DFS.
    pub inputs: Vec<String>,
    /// Output directory; must not exist when the job starts.
    pub output: String,
    #[serde(default)]
    pub input_format: InputFormat,
    /// Bytes per map split. Zero picks the tracker's default block size.
    #[serde(default)]
    pub split_size: u64,
    /// Worker processes requested for the map phase.
    pub map_capacity: u32,
    /// Worker processes requested for the reduce phase.
    pub reduce_capacity: u32,
    /// Number of map tasks; filled in by input partitioning.
    #[serde(default)]
    pub map_total: u32,
    /// Number of reduce tasks; fixed at submission.
    #[serde(default)]
    pub reduce_total: u32,
    /// Distinct-host failures tolerated per map task before escalation.
    /// Unset means the tracker default.
    #[serde(default)]
    pub map_retry: Option<u32>,
    #[serde(default)]
    pub reduce_retry: Option<u32>,
    #[serde(default = "default_true")]
    pub map_allow_duplicates: bool,
    #[serde(default = "default_true")]
    pub reduce_allow_duplicates: bool,
    /// How many map tasks may be declared fake-completed after exhausting
    /// their retries.
    #[serde(default)]
    pub ignore_map_failures: u32,
    #[serde(default)]
    pub ignore_reduce_failures: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_labels_map_to_levels() {
        assert_eq!(JobPriority::from_label("monitor"), JobPriority::VeryHigh);
        assert_eq!(JobPriority::from_label("online"), JobPriority::High);
        assert_eq!(JobPriority::from_label("offline"), JobPriority::Normal);
        assert_eq!(JobPriority::from_label("best-effort"), JobPriority::Low);
        assert_eq!(JobPriority::from_label("whatever"), JobPriority::Normal);
    }

    #[test]
    fn descriptor_defaults_apply_on_deserialize() {
        let raw = r#"{
            "name": "wordcount",
            "job_type": "MapReduce",
            "inputs": ["hdfs://nn:9000/data/part-*"],
            "output": "hdfs://nn:9000/out",
            "map_capacity": 100,
            "reduce_capacity": 20,
            "reduce_total": 10
        }"#;
        let desc: JobDescriptor = serde_json::from_str(raw).expect("descriptor");
        assert_eq!(desc.priority, JobPriority::Normal);
        assert_eq!(desc.input_format, InputFormat::TextInput);
        assert!(desc.map_allow_duplicates);
        assert!(desc.reduce_allow_duplicates);
        assert_eq!(desc.map_retry, None);
        assert_eq!(desc.ignore_map_failures, 0);
    }

    #[test]
    fn job_state_terminality() {
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Killed.is_terminal());
    }
}
