//! Task pools: the bag of task ids one phase hands out to polling workers.
//!
//! A pool tracks, per task id, the current generation (`attempt`), the number
//! of live handouts and whether the id is pending, allocated or done. The map
//! pool carries a byte-range payload per id; the reduce pool carries none.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Lifecycle of one task id inside a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Allocated,
    Done,
}

/// One pool entry, together with its phase-specific payload.
///
/// `attempt` is bumped on every handout of the id, speculative duplicates
/// included, so attempts of one id number 1, 2, 3, ...
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskItem<T> {
    pub no: u32,
    pub attempt: u32,
    pub status: TaskStatus,
    /// Live handouts of this id.
    pub allocated: u32,
    pub payload: T,
}

/// A map input split: a byte range of one input file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapSplit {
    pub input_path: String,
    pub offset: u64,
    pub length: u64,
}

pub type ResourceItem = TaskItem<MapSplit>;
pub type IdItem = TaskItem<()>;

#[derive(Debug)]
pub struct TaskPool<T> {
    slots: Vec<TaskItem<T>>,
    pending_queue: VecDeque<u32>,
    pending: u32,
    allocated: u32,
    done: u32,
    parallel_attempts: u32,
}

impl TaskPool<()> {
    /// A pool of bare ids `0..n`, as used by the reduce phase.
    pub fn ids(n: u32, parallel_attempts: u32) -> Self {
        TaskPool::with_payloads(vec![(); n as usize], parallel_attempts)
    }
}

impl<T: Clone> TaskPool<T> {
    pub fn with_payloads(payloads: Vec<T>, parallel_attempts: u32) -> Self {
        let slots: Vec<TaskItem<T>> = payloads
            .into_iter()
            .enumerate()
            .map(|(no, payload)| TaskItem {
                no: no as u32,
                attempt: 0,
                status: TaskStatus::Pending,
                allocated: 0,
                payload,
            })
            .collect();
        let mut pool = TaskPool {
            slots,
            pending_queue: VecDeque::new(),
            pending: 0,
            allocated: 0,
            done: 0,
            parallel_attempts,
        };
        pool.rebuild_counts();
        pool
    }

    /// Rebuilds a pool from a dumped or replayed id table.
    pub fn from_items(items: Vec<TaskItem<T>>, parallel_attempts: u32) -> Self {
        let mut pool = TaskPool {
            slots: items,
            pending_queue: VecDeque::new(),
            pending: 0,
            allocated: 0,
            done: 0,
            parallel_attempts,
        };
        pool.rebuild_counts();
        pool
    }

    fn rebuild_counts(&mut self) {
        self.pending = 0;
        self.allocated = 0;
        self.done = 0;
        self.pending_queue.clear();
        for slot in &self.slots {
            match slot.status {
                TaskStatus::Pending => {
                    self.pending += 1;
                    self.pending_queue.push_back(slot.no);
                }
                TaskStatus::Allocated => self.allocated += 1,
                TaskStatus::Done => self.done += 1,
            }
        }
    }

    /// Hands out the next pending id, lowest first.
    pub fn next(&mut self) -> Option<TaskItem<T>> {
        // The queue may hold stale entries for ids that were re-allocated
        // through `take` since they were returned.
        while matches!(self.pending_queue.front(),
                Some(&no) if self.slots[no as usize].status != TaskStatus::Pending)
        {
            self.pending_queue.pop_front();
        }
        let no = self.pending_queue.pop_front()?;
        let slot = &mut self.slots[no as usize];
        slot.attempt += 1;
        slot.status = TaskStatus::Allocated;
        slot.allocated += 1;
        self.pending -= 1;
        self.allocated += 1;
        Some(slot.clone())
    }

    /// Hands out a specific id again as a speculative duplicate.
    ///
    /// Refuses ids that are done, unknown, or already handed out
    /// `parallel_attempts` times.
    pub fn take(&mut self, no: u32) -> Option<TaskItem<T>> {
        let Some(slot) = self.slots.get_mut(no as usize) else {
            warn!("task is not valid for duplication: {}", no);
            return None;
        };
        if slot.allocated > self.parallel_attempts {
            info!("task distribution has reached its limit: {}", no);
            return None;
        }
        if slot.status == TaskStatus::Pending {
            slot.status = TaskStatus::Allocated;
            self.pending -= 1;
            self.allocated += 1;
        }
        if slot.status == TaskStatus::Allocated {
            slot.attempt += 1;
            slot.allocated += 1;
            return Some(slot.clone());
        }
        info!("task has already been done: {}", no);
        None
    }

    /// Gives an attempt back; the id becomes pending again once its last
    /// live handout is returned.
    pub fn return_back(&mut self, no: u32) {
        let Some(slot) = self.slots.get_mut(no as usize) else {
            warn!("task is not valid for returning: {}", no);
            return;
        };
        if slot.status != TaskStatus::Allocated {
            warn!("returned task is not allocated: {}", no);
            return;
        }
        slot.allocated = slot.allocated.saturating_sub(1);
        if slot.allocated == 0 {
            slot.status = TaskStatus::Pending;
            self.pending_queue.push_front(no);
            self.allocated -= 1;
            self.pending += 1;
        }
    }

    /// Marks an id done. Returns true iff this call caused the transition;
    /// the first completion wins, later ones are reported false.
    pub fn finish(&mut self, no: u32) -> bool {
        let Some(slot) = self.slots.get_mut(no as usize) else {
            warn!("task is not valid for finishing: {}", no);
            return false;
        };
        if slot.status != TaskStatus::Allocated {
            warn!("task may have been finished: {}", no);
            return false;
        }
        slot.status = TaskStatus::Done;
        slot.allocated = 0;
        self.allocated -= 1;
        self.done += 1;
        true
    }

    pub fn is_allocated(&self, no: u32) -> bool {
        self.slots
            .get(no as usize)
            .map_or(false, |slot| slot.status == TaskStatus::Allocated)
    }

    pub fn is_done(&self, no: u32) -> bool {
        self.slots
            .get(no as usize)
            .map_or(false, |slot| slot.status == TaskStatus::Done)
    }

    pub fn sum_of_items(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn pending(&self) -> u32 {
        self.pending
    }

    pub fn allocated(&self) -> u32 {
        self.allocated
    }

    pub fn done(&self) -> u32 {
        self.done
    }

    /// Snapshots the whole id table for checkpointing.
    pub fn dump(&self) -> Vec<TaskItem<T>> {
        self.slots.clone()
    }

    /// Overwrites the id table from a snapshot of the same size.
    pub fn load(&mut self, items: Vec<TaskItem<T>>) {
        debug_assert_eq!(items.len(), self.slots.len());
        self.slots = items;
        self.rebuild_counts();
    }
}
