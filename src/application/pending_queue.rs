//! Priority queue of not-yet-running tasks.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::application::loader_task::ImageLoaderTask;
use crate::domain::entities::Priority;

#[derive(Default)]
struct Lanes {
    high: VecDeque<Arc<ImageLoaderTask>>,
    normal: VecDeque<Arc<ImageLoaderTask>>,
    low: VecDeque<Arc<ImageLoaderTask>>,
}

impl Lanes {
    fn lane_mut(&mut self, priority: Priority) -> &mut VecDeque<Arc<ImageLoaderTask>> {
        match priority {
            Priority::High => &mut self.high,
            Priority::Normal => &mut self.normal,
            Priority::Low => &mut self.low,
        }
    }
}

/// Priority queue with FIFO tie-break on insertion order.
///
/// High dequeues before Normal before Low; within one priority, first in is
/// first out. All mutating operations are serialized under a single lock,
/// which is a leaf lock: no long-running work and no other component's lock
/// is ever taken while holding it.
#[derive(Default)]
pub struct PendingTasksQueue {
    lanes: Mutex<Lanes>,
}

impl std::fmt::Debug for PendingTasksQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingTasksQueue")
            .field("len", &self.len())
            .finish()
    }
}

impl PendingTasksQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a task to its priority lane.
    pub fn enqueue(&self, task: Arc<ImageLoaderTask>) {
        let priority = task.priority();
        self.lanes.lock().lane_mut(priority).push_back(task);
    }

    /// Removes and returns the highest-priority, oldest task.
    #[must_use]
    pub fn dequeue(&self) -> Option<Arc<ImageLoaderTask>> {
        let mut lanes = self.lanes.lock();
        if let Some(task) = lanes.high.pop_front() {
            return Some(task);
        }
        if let Some(task) = lanes.normal.pop_front() {
            return Some(task);
        }
        lanes.low.pop_front()
    }

    /// Removes a specific task by identity. Returns true when it was
    /// queued.
    pub fn remove(&self, task: &Arc<ImageLoaderTask>) -> bool {
        let mut lanes = self.lanes.lock();
        let lane = lanes.lane_mut(task.priority());
        let before = lane.len();
        lane.retain(|queued| !Arc::ptr_eq(queued, task));
        before != lane.len()
    }

    /// Cancels every queued task whose delivery destination matches the
    /// new task's destination - the last request for a destination wins.
    /// Returns the number of tasks cancelled.
    pub fn cancel_when_same_destination(&self, task: &Arc<ImageLoaderTask>) -> usize {
        let Some(destination) = task.destination_id() else {
            return 0;
        };
        let stale: Vec<Arc<ImageLoaderTask>> = {
            let mut lanes = self.lanes.lock();
            let lanes = &mut *lanes;
            let mut stale = Vec::new();
            for lane in [&mut lanes.high, &mut lanes.normal, &mut lanes.low] {
                lane.retain(|queued| {
                    let matches = !Arc::ptr_eq(queued, task)
                        && queued.destination_id() == Some(destination);
                    if matches {
                        stale.push(queued.clone());
                    }
                    !matches
                });
            }
            stale
        };
        // Cancellation fires callbacks; keep that outside the queue lock.
        for queued in &stale {
            debug!(destination = destination, "cancelling stale task for reused destination");
            queued.cancel();
        }
        stale.len()
    }

    /// Removes every queued task and returns them.
    #[must_use]
    pub fn drain(&self) -> Vec<Arc<ImageLoaderTask>> {
        let mut lanes = self.lanes.lock();
        let mut drained =
            Vec::with_capacity(lanes.high.len() + lanes.normal.len() + lanes.low.len());
        drained.extend(lanes.high.drain(..));
        drained.extend(lanes.normal.drain(..));
        drained.extend(lanes.low.drain(..));
        drained
    }

    /// Number of queued tasks across all lanes.
    #[must_use]
    pub fn len(&self) -> usize {
        let lanes = self.lanes.lock();
        lanes.high.len() + lanes.normal.len() + lanes.low.len()
    }

    /// True when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
