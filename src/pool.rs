//! Implementation of the thread pool itself.

use std::{
    fmt,
    io,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
        Condvar,
        Mutex,
        MutexGuard,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use once_cell::sync::Lazy;

use crate::{error::ShutdownError, queue::TaskStack, task::Task, worker::Worker};

#[cfg(target_has_atomic = "64")]
type AtomicCounter = std::sync::atomic::AtomicU64;

#[cfg(not(target_has_atomic = "64"))]
type AtomicCounter = std::sync::atomic::AtomicU32;

/// A value describing how many worker threads a pool should have.
///
/// Any size can be wrapped in [`PerCore`] to be made relative to the number of
/// available CPU cores on the current system.
///
/// See [`Builder::size`] for details.
pub trait PoolSize {
    /// Get the number of worker threads to spawn.
    fn threads(&self) -> usize;
}

impl PoolSize for usize {
    fn threads(&self) -> usize {
        *self
    }
}

/// Modifies a pool size to be per available CPU core.
///
/// # Examples
///
/// ```
/// # use stackpool::PerCore;
/// // one thread per core
/// let size = PerCore(1);
///
/// // four threads per core
/// let size = PerCore(4);
/// ```
#[derive(Clone, Copy, Debug)]
pub struct PerCore<T>(pub T);

static CORE_COUNT: Lazy<usize> = Lazy::new(|| num_cpus::get().max(1));

impl<T> From<T> for PerCore<T> {
    fn from(size: T) -> Self {
        Self(size)
    }
}

impl<T: PoolSize> PoolSize for PerCore<T> {
    fn threads(&self) -> usize {
        *CORE_COUNT * self.0.threads()
    }
}

/// A builder for constructing a customized [`ThreadPool`].
///
/// # Examples
///
/// ```
/// let custom_pool = stackpool::builder()
///     .name("my-pool")
///     .size(2)
///     .build();
/// # custom_pool.join();
/// ```
#[derive(Debug, Default)]
pub struct Builder {
    name: Option<String>,
    size: Option<usize>,
    stack_size: Option<usize>,
}

impl Builder {
    /// Set a custom thread name for threads spawned by this thread pool.
    ///
    /// # Panics
    ///
    /// Panics if the name contains null bytes (`\0`).
    ///
    /// # Examples
    ///
    /// ```
    /// let pool = stackpool::builder().name("my-pool").build();
    /// # pool.join();
    /// ```
    pub fn name<T: Into<String>>(mut self, name: T) -> Self {
        let name = name.into();

        if name.as_bytes().contains(&0) {
            panic!("thread pool name must not contain null bytes");
        }

        self.name = Some(name);
        self
    }

    /// Set the number of worker threads in this thread pool.
    ///
    /// The pool spawns exactly this many threads when it is built and keeps
    /// them until it is shut down. If not set, one thread per available CPU
    /// core is used.
    ///
    /// # Examples
    ///
    /// ```
    /// // Create a thread pool with exactly 2 threads.
    /// let pool = stackpool::builder().size(2).build();
    /// # pool.join();
    /// ```
    ///
    /// ```
    /// use stackpool::PerCore;
    ///
    /// // Create a thread pool with two threads per core.
    /// let pool = stackpool::builder().size(PerCore(2)).build();
    /// # pool.join();
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if the size is zero.
    pub fn size<S: PoolSize>(mut self, size: S) -> Self {
        let threads = size.threads();

        if threads == 0 {
            panic!("thread pool size must be non-zero");
        }

        self.size = Some(threads);
        self
    }

    /// Set the size of the stack (in bytes) for threads in this thread pool.
    ///
    /// The actual stack size may be greater than this value if the platform
    /// enforces a larger minimum stack size.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    /// Create a thread pool according to the configuration set with this
    /// builder.
    ///
    /// # Panics
    ///
    /// Panics if the operating system fails to spawn a worker thread. Use
    /// [`Builder::try_build`] to handle that case instead.
    pub fn build(self) -> ThreadPool {
        match self.try_build() {
            Ok(pool) => pool,
            Err(e) => panic!("failed to spawn thread pool worker: {}", e),
        }
    }

    /// Create a thread pool according to the configuration set with this
    /// builder, returning an error if a worker thread could not be spawned.
    ///
    /// Any workers spawned before the failure are not joined here. The partly
    /// built pool is dropped, which begins shutdown; those workers find the
    /// task stack empty and exit on their own, detached.
    pub fn try_build(self) -> io::Result<ThreadPool> {
        let size = self.size.unwrap_or_else(|| PerCore(1).threads());

        let mut pool = ThreadPool {
            shared: Arc::new(Shared::new()),
            workers: Vec::with_capacity(size),
        };

        for _ in 0..size {
            if let Err(e) = pool.spawn_worker(self.name.as_deref(), self.stack_size) {
                log::warn!(
                    "failed to spawn worker {} of {}, shutting pool down: {}",
                    pool.workers.len() + 1,
                    size,
                    e
                );
                return Err(e);
            }
        }

        log::debug!("thread pool started with {} workers", size);

        Ok(pool)
    }
}

/// A fixed-size thread pool for running fire-and-forget tasks.
///
/// Submitting a task with [`execute`](ThreadPool::execute) never blocks beyond
/// a brief lock hold. Shutting the pool down with [`join`](ThreadPool::join)
/// blocks until every task accepted before shutdown has run to completion and
/// every worker thread has exited.
///
/// Dropping the thread pool without joining it begins shutdown and detaches
/// the worker threads, which still drain any pending tasks before exiting.
///
/// # Task order
///
/// Pending tasks are kept on a stack and taken **last-in, first-out**: the most
/// recently submitted task that no worker has picked up yet runs next. Callers
/// must not rely on tasks starting in submission order.
///
/// # Panics
///
/// A panic inside a task is contained by the worker running it and counted in
/// [`panicked_tasks`](ThreadPool::panicked_tasks); the worker keeps going.
///
/// If the internal state lock is ever found poisoned, the pool treats it as
/// unrecoverable and every operation that touches the lock panics with
/// `thread pool state lock poisoned`.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl Default for ThreadPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadPool {
    /// Create a new thread pool with one worker per available CPU core.
    ///
    /// If you'd like to customize the thread pool's behavior then use
    /// [`ThreadPool::builder`].
    #[inline]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a new thread pool with exactly `threads` workers.
    ///
    /// # Panics
    ///
    /// Panics if `threads` is zero.
    #[inline]
    pub fn with_size(threads: usize) -> Self {
        Self::builder().size(threads).build()
    }

    /// Get a builder for creating a customized thread pool.
    #[inline]
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Get the number of worker threads that have not exited yet.
    pub fn threads(&self) -> usize {
        self.shared.lock().running
    }

    /// Get the number of tasks queued for execution, but not yet started.
    ///
    /// Note that the number returned may become immediately outdated after
    /// invocation.
    pub fn queued_tasks(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Get the number of tasks currently running.
    ///
    /// Note that the number returned may become immediately outdated after
    /// invocation.
    #[inline]
    pub fn running_tasks(&self) -> usize {
        self.shared.running_tasks_count.load(Ordering::Relaxed)
    }

    /// Get the number of tasks completed (successfully or otherwise) by this
    /// pool since it was created.
    ///
    /// # Examples
    ///
    /// ```
    /// let pool = stackpool::ThreadPool::with_size(2);
    ///
    /// for _ in 0..10 {
    ///     pool.execute(|| {}).unwrap();
    /// }
    ///
    /// let counts = pool.spawner();
    /// pool.join();
    ///
    /// assert_eq!(counts.completed_tasks(), 10);
    /// ```
    #[inline]
    pub fn completed_tasks(&self) -> u64 {
        self.shared.completed_tasks()
    }

    /// Get the number of tasks that have panicked since the pool was created.
    #[inline]
    pub fn panicked_tasks(&self) -> u64 {
        self.shared.panicked_tasks()
    }

    /// Returns `true` once shutdown has begun and new tasks are rejected.
    pub fn is_shutdown(&self) -> bool {
        self.shared.lock().shutting_down
    }

    /// Get a handle for submitting tasks to this pool from elsewhere.
    ///
    /// Spawners can be cloned and sent to other threads, or moved into tasks
    /// running on the pool itself. They do not keep the pool alive: once the
    /// pool begins shutting down, tasks submitted through a spawner are
    /// rejected as well.
    pub fn spawner(&self) -> Spawner {
        Spawner {
            shared: self.shared.clone(),
        }
    }

    /// Submit a closure to be executed by the thread pool.
    ///
    /// The closure is pushed onto the pending task stack and picked up by the
    /// next idle worker. This call does not wait for the task to run.
    ///
    /// If the pool has begun shutting down the task is rejected, and the
    /// original closure can be extracted from the returned error.
    ///
    /// # Examples
    ///
    /// ```
    /// let pool = stackpool::ThreadPool::with_size(1);
    ///
    /// assert!(pool.execute(|| println!("hello from the pool")).is_ok());
    ///
    /// pool.shutdown();
    ///
    /// // Run the rejected closure ourselves instead.
    /// pool.execute(|| println!("too late"))
    ///     .unwrap_or_else(|error| error.into_inner()());
    /// # pool.join();
    /// ```
    pub fn execute<F>(&self, closure: F) -> Result<(), ShutdownError<F>>
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.submit(closure)
    }

    /// Begin shutting down this thread pool without waiting.
    ///
    /// New tasks are rejected from this point on. Tasks already queued keep
    /// running, and workers exit once the queue is empty. Calling this more
    /// than once has no further effect.
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }

    /// Shut down this thread pool and block until all queued tasks have
    /// completed and threads have stopped.
    pub fn join(mut self) {
        self.join_internal(None);
    }

    /// Shut down this thread pool and block until all queued tasks have
    /// completed and threads have stopped, or until the given timeout passes.
    ///
    /// Returns `true` if the thread pool shut down fully before the timeout.
    /// Otherwise the remaining workers are detached and keep draining.
    pub fn join_timeout(self, timeout: Duration) -> bool {
        self.join_deadline(Instant::now() + timeout)
    }

    /// Shut down this thread pool and block until all queued tasks have
    /// completed and threads have stopped, or the given deadline passes.
    ///
    /// Returns `true` if the thread pool shut down fully before the deadline.
    pub fn join_deadline(mut self, deadline: Instant) -> bool {
        self.join_internal(Some(deadline))
    }

    fn join_internal(&mut self, deadline: Option<Instant>) -> bool {
        self.shared.shutdown();

        let mut state = self.shared.lock();

        while state.running > 0 {
            // If a deadline is set, figure out how much time is remaining and
            // wait for that amount.
            if let Some(deadline) = deadline {
                if let Some(timeout) = deadline.checked_duration_since(Instant::now()) {
                    state = self
                        .shared
                        .shutdown_cvar
                        .wait_timeout(state, timeout)
                        .unwrap_or_else(|_| lock_poisoned())
                        .0;
                } else {
                    log::debug!(
                        "join deadline passed with {} workers still running",
                        state.running
                    );
                    return false;
                }
            }
            // If a deadline is not set, wait forever.
            else {
                state = self
                    .shared
                    .shutdown_cvar
                    .wait(state)
                    .unwrap_or_else(|_| lock_poisoned());
            }
        }

        drop(state);

        // Every worker has left its loop, so these joins only wait for the
        // threads to finish unwinding their stacks.
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::warn!("worker thread terminated abnormally");
            }
        }

        log::debug!("thread pool shut down");

        true
    }

    /// Spawn one more worker thread into the pool.
    fn spawn_worker(&mut self, name: Option<&str>, stack_size: Option<usize>) -> io::Result<()> {
        // Configure the thread based on the thread pool configuration.
        let mut builder = thread::Builder::new();

        if let Some(name) = name {
            builder = builder.name(name.to_owned());
        }

        if let Some(size) = stack_size {
            builder = builder.stack_size(size);
        }

        // Count the worker before it starts so that it is never observed
        // exiting before it was counted.
        self.shared.lock().running += 1;

        let worker = Worker::new(self.shared.clone());

        match builder.spawn(move || worker.run()) {
            Ok(handle) => {
                self.workers.push(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.lock().running -= 1;
                self.shared.shutdown_cvar.notify_all();
                Err(e)
            }
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("threads", &self.threads())
            .field("queued_tasks", &self.queued_tasks())
            .field("running_tasks", &self.running_tasks())
            .field("completed_tasks", &self.completed_tasks())
            .finish()
    }
}

/// A cloneable handle for submitting tasks to a [`ThreadPool`].
///
/// # Examples
///
/// Tasks can submit follow-up work to their own pool:
///
/// ```
/// use std::sync::mpsc;
///
/// let pool = stackpool::ThreadPool::with_size(2);
/// let spawner = pool.spawner();
/// let (tx, rx) = mpsc::channel();
///
/// pool.execute(move || {
///     spawner
///         .execute(move || tx.send("hello from a nested task").unwrap())
///         .unwrap();
/// })
/// .unwrap();
///
/// assert_eq!(rx.recv().unwrap(), "hello from a nested task");
/// pool.join();
/// ```
#[derive(Clone)]
pub struct Spawner {
    shared: Arc<Shared>,
}

impl Spawner {
    /// Submit a closure to be executed by the pool this spawner belongs to.
    ///
    /// Behaves exactly like [`ThreadPool::execute`].
    pub fn execute<F>(&self, closure: F) -> Result<(), ShutdownError<F>>
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.submit(closure)
    }

    /// Returns `true` once the pool has begun shutting down.
    pub fn is_shutdown(&self) -> bool {
        self.shared.lock().shutting_down
    }

    /// Get the number of tasks completed by the pool so far.
    pub fn completed_tasks(&self) -> u64 {
        self.shared.completed_tasks()
    }
}

impl fmt::Debug for Spawner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spawner")
            .field("is_shutdown", &self.is_shutdown())
            .finish()
    }
}

/// Everything guarded by the pool state lock.
pub(crate) struct State {
    /// Tasks waiting for a worker.
    pub(crate) queue: TaskStack,

    /// Number of workers that have not yet exited their loop.
    pub(crate) running: usize,

    pub(crate) shutting_down: bool,
}

/// Thread pool state shared by the owner, spawners and the worker threads.
pub(crate) struct Shared {
    state: Mutex<State>,

    /// Signaled when a task is pushed or shutdown begins.
    work_available: Condvar,

    /// Signaled whenever a worker exits.
    pub(crate) shutdown_cvar: Condvar,

    pub(crate) running_tasks_count: AtomicUsize,
    completed_tasks_count: AtomicCounter,
    panicked_tasks_count: AtomicCounter,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(State {
                queue: TaskStack::new(),
                running: 0,
                shutting_down: false,
            }),
            work_available: Condvar::new(),
            shutdown_cvar: Condvar::new(),
            running_tasks_count: Default::default(),
            completed_tasks_count: Default::default(),
            panicked_tasks_count: Default::default(),
        }
    }

    /// Acquire the pool state lock.
    ///
    /// A poisoned lock means pool state was left half-updated; there is no
    /// way to continue safely, so this panics.
    pub(crate) fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|_| lock_poisoned())
    }

    /// Block until there may be work to do, releasing the lock meanwhile.
    pub(crate) fn wait_for_work<'a>(&self, state: MutexGuard<'a, State>) -> MutexGuard<'a, State> {
        self.work_available
            .wait(state)
            .unwrap_or_else(|_| lock_poisoned())
    }

    fn submit<F>(&self, closure: F) -> Result<(), ShutdownError<F>>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.lock();

        if state.shutting_down {
            drop(state);
            log::trace!("rejecting task submitted after shutdown");
            return Err(ShutdownError(closure));
        }

        state.queue.push(Task::new(closure));
        drop(state);

        self.work_available.notify_one();

        Ok(())
    }

    fn shutdown(&self) {
        let mut state = self.lock();

        if !state.shutting_down {
            state.shutting_down = true;
            log::debug!(
                "thread pool shutting down with {} queued tasks",
                state.queue.len()
            );
        }

        drop(state);

        // Wake every idle worker so it can observe the flag.
        self.work_available.notify_all();
    }

    pub(crate) fn on_task_completed(&self, panicked: bool) {
        self.running_tasks_count.fetch_sub(1, Ordering::Relaxed);

        if panicked {
            self.panicked_tasks_count.fetch_add(1, Ordering::Relaxed);
        }

        // Published last: a reader that observes the new completed count also
        // observes the running and panicked updates above.
        self.completed_tasks_count.fetch_add(1, Ordering::Release);
    }

    #[allow(clippy::useless_conversion)]
    fn completed_tasks(&self) -> u64 {
        self.completed_tasks_count.load(Ordering::Acquire).into()
    }

    #[allow(clippy::useless_conversion)]
    fn panicked_tasks(&self) -> u64 {
        self.panicked_tasks_count.load(Ordering::Relaxed).into()
    }
}

#[cold]
fn lock_poisoned() -> ! {
    panic!("thread pool state lock poisoned")
}
