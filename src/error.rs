use std::{error::Error, fmt};

/// An error returned when a task could not be executed because the thread
/// pool has begun shutting down.
///
/// Contains the original closure that failed to be submitted, so you can run
/// it somewhere else or simply drop it.
pub struct ShutdownError<T>(pub(crate) T);

impl<T> ShutdownError<T> {
    /// Extracts the inner closure that could not be executed.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Error for ShutdownError<T> {}

impl<T> fmt::Debug for ShutdownError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ShutdownError(..)")
    }
}

impl<T> fmt::Display for ShutdownError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("thread pool is shut down")
    }
}
