use std::{
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
};

/// A single unit of deferred work submitted to a thread pool.
///
/// The closure owns everything it needs to run. Ownership moves from the
/// submitter into the queue, and from the queue into whichever worker pops it.
pub(crate) struct Task {
    closure: Box<dyn FnOnce() + Send + 'static>,
}

impl Task {
    pub(crate) fn new<F>(closure: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            closure: Box::new(closure),
        }
    }

    /// Run the task to completion on the current thread.
    ///
    /// Returns `false` if the closure panicked. The panic is contained here so
    /// that the calling worker survives and can keep draining the queue.
    pub(crate) fn run(self) -> bool {
        catch_unwind(AssertUnwindSafe(self.closure)).is_ok()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Task(..)")
    }
}
