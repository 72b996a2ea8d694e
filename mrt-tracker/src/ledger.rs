//! The allocation ledger: an append-only record of every attempt ever handed
//! out, with the indices the tracker and its monitor scan.
//!
//! Records are owned by the table; the per-phase `(no, attempt)` indices and
//! the time-ordered heap hold entry ids into it. The slug FIFOs carry task
//! ids the tracker has decided to re-hand-out on upcoming assignments.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use common::TaskState;

/// A single handout of a task id to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocRecord {
    /// Worker address the attempt went to.
    pub endpoint: String,
    pub no: u32,
    pub attempt: u32,
    pub is_map: bool,
    pub state: TaskState,
    /// Unix seconds at assignment.
    pub alloc_time: i64,
    /// Elapsed seconds at the terminal transition.
    pub period: Option<i64>,
}

/// Per-phase failure/kill counts recovered from a checkpoint replay.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct ReplayTallies {
    pub map_failed: u32,
    pub map_killed: u32,
    pub reduce_failed: u32,
    pub reduce_killed: u32,
}

#[derive(Debug, Default)]
pub(crate) struct AllocationLedger {
    table: Vec<AllocRecord>,
    map_index: HashMap<u32, BTreeMap<u32, usize>>,
    reduce_index: HashMap<u32, BTreeMap<u32, usize>>,
    time_heap: BinaryHeap<Reverse<(i64, usize)>>,
    pub map_slug: VecDeque<u32>,
    pub reduce_slug: VecDeque<u32>,
}

impl AllocationLedger {
    pub fn new() -> Self {
        AllocationLedger::default()
    }

    /// Appends a fresh running attempt, indexes it and queues it for the
    /// monitor. Returns the entry id.
    pub fn push_attempt(
        &mut self,
        endpoint: &str,
        no: u32,
        attempt: u32,
        is_map: bool,
        alloc_time: i64,
    ) -> usize {
        let id = self.table.len();
        self.table.push(AllocRecord {
            endpoint: endpoint.to_string(),
            no,
            attempt,
            is_map,
            state: TaskState::Running,
            alloc_time,
            period: None,
        });
        let index = if is_map {
            &mut self.map_index
        } else {
            &mut self.reduce_index
        };
        index.entry(no).or_default().insert(attempt, id);
        self.time_heap.push(Reverse((alloc_time, id)));
        id
    }

    /// Looks up a still-running attempt by `(no, attempt)`.
    pub fn running(&self, no: u32, attempt: u32, is_map: bool) -> Option<usize> {
        let index = if is_map { &self.map_index } else { &self.reduce_index };
        let id = *index.get(&no)?.get(&attempt)?;
        (self.table[id].state == TaskState::Running).then_some(id)
    }

    pub fn record(&self, id: usize) -> &AllocRecord {
        &self.table[id]
    }

    /// Commits a terminal state and stamps the attempt's elapsed period.
    pub fn commit(&mut self, id: usize, state: TaskState, now: i64) {
        let rec = &mut self.table[id];
        rec.state = state;
        rec.period = Some(now - rec.alloc_time);
    }

    /// Periods of every completed attempt of one phase, for the monitor's
    /// timeout statistics.
    pub fn completed_periods(&self, is_map: bool) -> Vec<i64> {
        self.table
            .iter()
            .filter(|rec| rec.is_map == is_map && rec.state == TaskState::Completed)
            .filter_map(|rec| rec.period)
            .collect()
    }

    /// Marks every attempt of `no` except the winning one canceled and
    /// returns `(endpoint, no, attempt)` of each loser for the cancel RPCs.
    pub fn cancel_losers(
        &mut self,
        no: u32,
        attempt: u32,
        is_map: bool,
        now: i64,
    ) -> Vec<(String, u32, u32)> {
        let index = if is_map { &self.map_index } else { &self.reduce_index };
        let Some(attempts) = index.get(&no) else {
            return Vec::new();
        };
        let ids: Vec<usize> = attempts
            .iter()
            .filter(|(other, _)| **other != attempt)
            .map(|(_, id)| *id)
            .collect();
        let mut losers = Vec::with_capacity(ids.len());
        for id in ids {
            let rec = &mut self.table[id];
            rec.state = TaskState::Canceled;
            rec.period = Some(now - rec.alloc_time);
            losers.push((rec.endpoint.clone(), rec.no, rec.attempt));
        }
        losers
    }

    pub fn peek_heap(&self) -> Option<(i64, usize)> {
        self.time_heap.peek().map(|Reverse(top)| *top)
    }

    pub fn pop_heap(&mut self) {
        self.time_heap.pop();
    }

    /// Puts an entry back with its original allocation time.
    pub fn push_heap_entry(&mut self, id: usize) {
        let alloc_time = self.table[id].alloc_time;
        self.time_heap.push(Reverse((alloc_time, id)));
    }

    /// Drops every map entry from the heap once the map phase is over.
    pub fn purge_map_from_heap(&mut self) {
        let table = &self.table;
        let kept: BinaryHeap<Reverse<(i64, usize)>> = self
            .time_heap
            .drain()
            .filter(|Reverse((_, id))| !table[*id].is_map)
            .collect();
        self.time_heap = kept;
    }

    /// Kills every still-running attempt; returns per-phase kill counts.
    pub fn kill_running(&mut self, now: i64) -> (u32, u32) {
        let mut map_killed = 0;
        let mut reduce_killed = 0;
        for rec in &mut self.table {
            if rec.state == TaskState::Running {
                rec.state = TaskState::Killed;
                rec.period = Some(now - rec.alloc_time);
                if rec.is_map {
                    map_killed += 1;
                } else {
                    reduce_killed += 1;
                }
            }
        }
        (map_killed, reduce_killed)
    }

    pub fn history(&self) -> Vec<AllocRecord> {
        self.table.clone()
    }

    pub fn map_index_len(&self) -> usize {
        self.map_index.len()
    }

    pub fn reduce_index_len(&self) -> usize {
        self.reduce_index.len()
    }

    /// Rebuilds a ledger from checkpointed history: running attempts re-enter
    /// the heap, terminal failures re-feed the statistics.
    pub fn from_history(history: Vec<AllocRecord>) -> (Self, ReplayTallies) {
        let mut ledger = AllocationLedger::new();
        let mut tallies = ReplayTallies::default();
        for rec in history {
            let id = ledger.table.len();
            let index = if rec.is_map {
                &mut ledger.map_index
            } else {
                &mut ledger.reduce_index
            };
            index.entry(rec.no).or_default().insert(rec.attempt, id);
            match rec.state {
                TaskState::Running => ledger.time_heap.push(Reverse((rec.alloc_time, id))),
                TaskState::Failed => {
                    if rec.is_map {
                        tallies.map_failed += 1;
                    } else {
                        tallies.reduce_failed += 1;
                    }
                }
                TaskState::Killed => {
                    if rec.is_map {
                        tallies.map_killed += 1;
                    } else {
                        tallies.reduce_killed += 1;
                    }
                }
                _ => {}
            }
            ledger.table.push(rec);
        }
        (ledger, tallies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempts_are_indexed_per_phase() {
        let mut ledger = AllocationLedger::new();
        let id = ledger.push_attempt("w1:80", 3, 1, true, 100);
        ledger.push_attempt("w2:80", 3, 1, false, 101);
        assert_eq!(ledger.running(3, 1, true), Some(id));
        assert_eq!(ledger.running(3, 2, true), None);
        ledger.commit(id, TaskState::Completed, 130);
        assert_eq!(ledger.running(3, 1, true), None);
        assert_eq!(ledger.record(id).period, Some(30));
        assert_eq!(ledger.completed_periods(true), vec![30]);
        assert!(ledger.completed_periods(false).is_empty());
    }

    #[test]
    fn heap_yields_oldest_first() {
        let mut ledger = AllocationLedger::new();
        let late = ledger.push_attempt("w1:80", 0, 1, true, 200);
        let early = ledger.push_attempt("w2:80", 1, 1, true, 50);
        assert_eq!(ledger.peek_heap(), Some((50, early)));
        ledger.pop_heap();
        assert_eq!(ledger.peek_heap(), Some((200, late)));
        ledger.pop_heap();
        ledger.push_heap_entry(early);
        assert_eq!(ledger.peek_heap(), Some((50, early)));
    }

    #[test]
    fn cancel_losers_spares_the_winner() {
        let mut ledger = AllocationLedger::new();
        ledger.push_attempt("w1:80", 4, 1, true, 10);
        let winner = ledger.push_attempt("w2:80", 4, 2, true, 11);
        ledger.push_attempt("w3:80", 4, 3, true, 12);
        let losers = ledger.cancel_losers(4, 2, true, 20);
        let endpoints: Vec<&str> = losers.iter().map(|(e, _, _)| e.as_str()).collect();
        assert_eq!(endpoints, vec!["w1:80", "w3:80"]);
        assert_eq!(ledger.record(winner).state, TaskState::Running);
        assert_eq!(ledger.running(4, 1, true), None);
        assert_eq!(ledger.running(4, 3, true), None);
    }

    #[test]
    fn purge_keeps_only_reduce_entries() {
        let mut ledger = AllocationLedger::new();
        ledger.push_attempt("w1:80", 0, 1, true, 10);
        let reduce = ledger.push_attempt("w2:80", 0, 1, false, 20);
        ledger.purge_map_from_heap();
        assert_eq!(ledger.peek_heap(), Some((20, reduce)));
        ledger.pop_heap();
        assert_eq!(ledger.peek_heap(), None);
    }

    #[test]
    fn kill_running_stamps_periods_and_counts_phases() {
        let mut ledger = AllocationLedger::new();
        let a = ledger.push_attempt("w1:80", 0, 1, true, 10);
        let b = ledger.push_attempt("w2:80", 0, 1, false, 10);
        let c = ledger.push_attempt("w3:80", 1, 1, true, 10);
        ledger.commit(c, TaskState::Completed, 15);
        let (map_killed, reduce_killed) = ledger.kill_running(30);
        assert_eq!((map_killed, reduce_killed), (1, 1));
        assert_eq!(ledger.record(a).state, TaskState::Killed);
        assert_eq!(ledger.record(b).period, Some(20));
        assert_eq!(ledger.record(c).state, TaskState::Completed);
    }

    #[test]
    fn replay_rebuilds_heap_and_tallies() {
        let mut ledger = AllocationLedger::new();
        let running = ledger.push_attempt("w1:80", 0, 1, true, 10);
        let failed = ledger.push_attempt("w2:80", 1, 1, true, 11);
        let killed = ledger.push_attempt("w3:80", 0, 1, false, 12);
        ledger.commit(failed, TaskState::Failed, 20);
        ledger.commit(killed, TaskState::Killed, 21);

        let (reloaded, tallies) = AllocationLedger::from_history(ledger.history());
        assert_eq!(tallies.map_failed, 1);
        assert_eq!(tallies.reduce_killed, 1);
        assert_eq!(reloaded.peek_heap(), Some((10, running)));
        assert_eq!(reloaded.running(0, 1, true), Some(running));
        assert_eq!(reloaded.history(), ledger.history());
    }
}
