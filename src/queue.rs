//! The pending task stack.

use crate::task::Task;

/// A last-in, first-out collection of pending tasks.
///
/// Not synchronized on its own; it lives inside the pool state and is only
/// touched while the pool state lock is held.
#[derive(Debug, Default)]
pub(crate) struct TaskStack {
    tasks: Vec<Task>,
}

impl TaskStack {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Place a task on top of the stack.
    pub(crate) fn push(&mut self, task: Task) {
        self.tasks.push(task);
    }

    /// Take the most recently pushed task, if any.
    pub(crate) fn pop(&mut self) -> Option<Task> {
        self.tasks.pop()
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
