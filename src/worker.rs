use std::sync::{atomic::Ordering, Arc};

use crate::{pool::Shared, task::Task};

/// A worker thread which belongs to a thread pool and executes tasks.
///
/// The worker is either running (taking and executing tasks, or sleeping
/// until one arrives) or exited. It exits only once the pool is shutting down
/// and the task stack is empty, so every task accepted before shutdown is run
/// by some worker.
pub(crate) struct Worker {
    shared: Arc<Shared>,
}

impl Worker {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Main worker loop.
    pub(crate) fn run(self) {
        log::trace!("worker started");

        while let Some(task) = self.next_task() {
            // Tasks always run outside of the state lock.
            let completed = task.run();

            if !completed {
                log::warn!("task panicked in thread pool worker");
            }

            self.shared.on_task_completed(!completed);
        }

        log::trace!("worker exiting");
    }

    /// Take the next task off the stack, sleeping while there is none.
    ///
    /// Returns `None` once the pool is shutting down and nothing is left to
    /// run. In that case the worker has already been removed from the running
    /// count.
    fn next_task(&self) -> Option<Task> {
        let mut state = self.shared.lock();

        loop {
            if state.shutting_down && state.queue.is_empty() {
                state.running -= 1;
                drop(state);

                self.shared.shutdown_cvar.notify_all();

                return None;
            }

            if let Some(task) = state.queue.pop() {
                self.shared
                    .running_tasks_count
                    .fetch_add(1, Ordering::Relaxed);

                return Some(task);
            }

            state = self.shared.wait_for_work(state);
        }
    }
}
