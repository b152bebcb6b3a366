//! Least-loaded worker selection for one scheduling pass.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use flowgrid_state::Worker;

/// Min-heap of workers ordered by `running_stream_count`. Ties go to the
/// worker pushed earliest.
#[derive(Debug, Default)]
pub struct WorkerHeap {
    heap: BinaryHeap<Reverse<(u32, u64, usize)>>,
    slots: Vec<Option<Worker>>,
    pushes: u64,
}

impl WorkerHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, worker: Worker) {
        let slot = self.slots.len();
        self.heap
            .push(Reverse((worker.running_stream_count, self.pushes, slot)));
        self.slots.push(Some(worker));
        self.pushes += 1;
    }

    /// Remove and return the least-loaded worker.
    pub fn pop(&mut self) -> Option<Worker> {
        let Reverse((_, _, slot)) = self.heap.pop()?;
        self.slots.get_mut(slot).and_then(Option::take)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl FromIterator<Worker> for WorkerHeap {
    fn from_iter<I: IntoIterator<Item = Worker>>(iter: I) -> Self {
        let mut heap = WorkerHeap::new();
        for worker in iter {
            heap.push(worker);
        }
        heap
    }
}
