//! Task graph and queue.
//!
//! A min-heap ordered by (priority, insertion sequence) feeds the dispatch
//! engine; a completed-id set gives O(1) dependency checks; a blocked map
//! parks tasks whose preconditions failed, tagged with the cause. Scanning
//! the completed-task *list* for dependency checks is exactly the O(n³)
//! behaviour this layout exists to avoid.

use crate::{BlockCause, Counters, Quantity, ResourceId, SlotRef, Task, TaskId, TaskStatus};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct HeapEntry {
    priority: u32,
    seq: u64,
    id: TaskId,
}

// Reversed comparisons turn std's max-heap into the min-heap we want.
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskQueue {
    heap: BinaryHeap<HeapEntry>,
    /// Queued, blocked, and active tasks. Completed tasks are removed here
    /// and archived by the engine's bounded completed-task log.
    tasks: HashMap<TaskId, Task>,
    blocked: HashMap<TaskId, BlockCause>,
    /// BTreeSet so per-tick iteration over active tasks is deterministic.
    active: BTreeSet<TaskId>,
    completed_ids: HashSet<TaskId>,
    completions_by_output: HashMap<ResourceId, u32>,
    queued_count: usize,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            tasks: HashMap::new(),
            blocked: HashMap::new(),
            active: BTreeSet::new(),
            completed_ids: HashSet::new(),
            completions_by_output: HashMap::new(),
            queued_count: 0,
        }
    }

    /// Allocate the next task id: monotonic counter plus output name.
    pub fn next_task_id(counters: &mut Counters, output_name: &str) -> TaskId {
        let id = TaskId(format!("task_{:05}_{}", counters.next_task_id, output_name));
        counters.next_task_id += 1;
        id
    }

    pub fn enqueue(&mut self, mut task: Task, counters: &mut Counters) {
        task.status = TaskStatus::Queued;
        let seq = counters.next_queue_seq;
        counters.next_queue_seq += 1;
        self.heap.push(HeapEntry {
            priority: task.priority,
            seq,
            id: task.id.clone(),
        });
        self.queued_count += 1;
        self.tasks.insert(task.id.clone(), task);
    }

    /// Pop heap entries until a task with all dependencies completed appears.
    /// Tasks popped with open dependencies are parked as BlockedDependencies.
    /// Returns `None` when the heap runs dry.
    pub fn pop_ready(&mut self) -> Option<TaskId> {
        while let Some(entry) = self.heap.pop() {
            let Some(task) = self.tasks.get_mut(&entry.id) else {
                continue; // stale entry
            };
            if task.status != TaskStatus::Queued {
                continue; // stale entry
            }
            self.queued_count -= 1;

            let ready = task
                .dependencies
                .iter()
                .all(|dep| self.completed_ids.contains(dep));
            if ready {
                return Some(entry.id);
            }
            task.status = TaskStatus::Blocked(BlockCause::Dependencies);
            self.blocked.insert(entry.id, BlockCause::Dependencies);
        }
        None
    }

    /// Park a popped task with the given blocking cause.
    pub fn block(&mut self, id: &TaskId, cause: BlockCause) {
        if let Some(task) = self.tasks.get_mut(id) {
            task.status = TaskStatus::Blocked(cause);
            self.blocked.insert(id.clone(), cause);
        }
    }

    /// Transition a popped task to Active with its slot reservation and
    /// computed production parameters.
    #[allow(clippy::too_many_arguments)]
    pub fn activate(
        &mut self,
        id: &TaskId,
        slot: SlotRef,
        duration_hours: f64,
        energy_kwh_total: f64,
        expected_output: Quantity,
        now_hours: f64,
    ) {
        let task = self.tasks.get_mut(id).expect("activating unknown task");
        task.status = TaskStatus::Active;
        task.assigned = Some(slot);
        task.duration_hours = duration_hours;
        task.remaining_hours = duration_hours;
        task.energy_kwh_total = energy_kwh_total;
        task.expected_output = expected_output;
        task.started_at_hours = Some(now_hours);
        self.active.insert(id.clone());
    }

    /// Mark a task completed: id joins the completed set, the task itself is
    /// removed and handed back for archiving.
    pub fn complete(&mut self, id: &TaskId, now_hours: f64) -> Task {
        let mut task = self.tasks.remove(id).expect("completing unknown task");
        task.status = TaskStatus::Completed;
        task.completed_at_hours = Some(now_hours);
        task.assigned = None;
        self.active.remove(id);
        self.completed_ids.insert(id.clone());
        *self.completions_by_output.entry(task.output).or_insert(0) += 1;
        task
    }

    /// Return a blocked or active task to the queue at its original priority
    /// (new insertion sequence). Used by rescan and by module-failure recovery.
    pub fn requeue(&mut self, id: &TaskId, counters: &mut Counters) {
        let Some(task) = self.tasks.get_mut(id) else {
            return;
        };
        self.blocked.remove(id);
        self.active.remove(id);
        task.assigned = None;
        task.status = TaskStatus::Queued;
        let seq = counters.next_queue_seq;
        counters.next_queue_seq += 1;
        self.heap.push(HeapEntry {
            priority: task.priority,
            seq,
            id: id.clone(),
        });
        self.queued_count += 1;
    }

    /// Re-evaluate every blocked task. Dependency blocks clear on the O(1)
    /// completed-set check; for the other causes the caller-supplied check
    /// decides whether the cause may have lifted. Cleared tasks re-enter the
    /// heap at their original priority. Returns the requeued ids.
    pub fn rescan_blocked(
        &mut self,
        counters: &mut Counters,
        mut cause_cleared: impl FnMut(&Task, BlockCause) -> bool,
    ) -> Vec<TaskId> {
        // Sorted for deterministic requeue order.
        let mut blocked_ids: Vec<TaskId> = self.blocked.keys().cloned().collect();
        blocked_ids.sort();

        let mut requeued = Vec::new();
        for id in blocked_ids {
            let cause = self.blocked[&id];
            let task = &self.tasks[&id];
            let clear = match cause {
                BlockCause::Dependencies => task
                    .dependencies
                    .iter()
                    .all(|dep| self.completed_ids.contains(dep)),
                other => cause_cleared(task, other),
            };
            if clear {
                self.requeue(&id, counters);
                requeued.push(id);
            }
        }
        requeued
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn get_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(id)
    }

    pub fn is_completed(&self, id: &TaskId) -> bool {
        self.completed_ids.contains(id)
    }

    pub fn completions_of(&self, resource: ResourceId) -> u32 {
        self.completions_by_output
            .get(&resource)
            .copied()
            .unwrap_or(0)
    }

    pub fn queued_count(&self) -> usize {
        self.queued_count
    }

    pub fn blocked_count(&self) -> usize {
        self.blocked.len()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn completed_count(&self) -> usize {
        self.completed_ids.len()
    }

    /// Active task ids in deterministic (lexicographic) order.
    pub fn active_ids(&self) -> Vec<TaskId> {
        self.active.iter().cloned().collect()
    }

    pub fn blocked_cause(&self, id: &TaskId) -> Option<BlockCause> {
        self.blocked.get(id).copied()
    }

    /// Blocked-task tally by cause, for metrics.
    pub fn blocked_by_cause(&self) -> HashMap<BlockCause, usize> {
        let mut counts = HashMap::new();
        for cause in self.blocked.values() {
            *counts.entry(*cause).or_insert(0) += 1;
        }
        counts
    }

    /// Partition check backing the task-conservation invariant: every live
    /// task is in exactly one of queue/blocked/active, and no live id is
    /// also completed.
    pub fn partition_is_consistent(&self) -> bool {
        let mut queued = 0usize;
        for task in self.tasks.values() {
            match task.status {
                TaskStatus::Queued => queued += 1,
                TaskStatus::Blocked(_) => {
                    if !self.blocked.contains_key(&task.id) {
                        return false;
                    }
                }
                TaskStatus::Active => {
                    if !self.active.contains(&task.id) {
                        return false;
                    }
                }
                TaskStatus::Completed => return false, // completed tasks are removed
            }
            if self.completed_ids.contains(&task.id) {
                return false;
            }
        }
        queued == self.queued_count
            && self.blocked.len() + self.active.len() + queued == self.tasks.len()
    }
}
