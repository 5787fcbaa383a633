use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
        Mutex,
    },
    thread,
    time::Duration,
};

use crossbeam_channel::{bounded, Receiver, Sender};
use stackpool::{PerCore, ThreadPool};

fn single_thread() -> ThreadPool {
    ThreadPool::with_size(1)
}

/// Occupy the pool's only worker until the returned sender is used or dropped.
///
/// Returns once the blocking task is running, so anything submitted afterwards
/// stays queued until the gate opens.
fn block_worker(pool: &ThreadPool) -> Sender<()> {
    let (started_tx, started_rx) = bounded(0);
    let (release_tx, release_rx): (Sender<()>, Receiver<()>) = bounded(0);

    pool.execute(move || {
        started_tx.send(()).unwrap();
        let _ = release_rx.recv();
    })
    .unwrap();

    started_rx.recv().unwrap();

    release_tx
}

fn counting_task(counter: &Arc<AtomicUsize>) -> impl FnOnce() + Send + 'static {
    let counter = counter.clone();

    move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
#[should_panic(expected = "thread pool name must not contain null bytes")]
fn name_with_null_bytes_panics() {
    ThreadPool::builder().name("uh\0oh").build();
}

#[test]
#[should_panic(expected = "thread pool size must be non-zero")]
fn invalid_size_zero_panics() {
    ThreadPool::builder().size(0);
}

#[test]
#[should_panic(expected = "thread pool size must be non-zero")]
fn invalid_per_core_size_zero_panics() {
    ThreadPool::builder().size(PerCore(0));
}

#[test]
fn execute() {
    let pool = single_thread();
    let (tx, rx) = bounded(1);

    pool.execute(move || tx.send(2 + 2).unwrap()).unwrap();

    assert_eq!(rx.recv().unwrap(), 4);
    pool.join();
}

#[test]
fn counter_incremented_by_single_worker() {
    let pool = single_thread();
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..100 {
        pool.execute(counting_task(&counter)).unwrap();
    }

    pool.join();

    assert_eq!(counter.load(Ordering::SeqCst), 100);
}

#[test]
fn join_drains_many_noop_tasks() {
    let pool = ThreadPool::with_size(8);
    let spawner = pool.spawner();
    let counter = Arc::new(AtomicUsize::new(0));

    assert_eq!(pool.threads(), 8);

    for _ in 0..5000 {
        assert!(pool.execute(counting_task(&counter)).is_ok());
    }

    pool.shutdown();

    // Workers only exit once the stack is empty and their last task returned.
    while pool.threads() > 0 {
        thread::sleep(Duration::from_millis(1));
    }

    assert_eq!(counter.load(Ordering::SeqCst), 5000);
    assert_eq!(pool.queued_tasks(), 0);

    pool.join();

    assert_eq!(spawner.completed_tasks(), 5000);
}

#[test]
fn slow_task_accepted_before_join_runs_before_join_returns() {
    let pool = single_thread();
    let counter = Arc::new(AtomicUsize::new(0));
    let task = counting_task(&counter);

    pool.execute(move || {
        thread::sleep(Duration::from_millis(200));
        task();
    })
    .unwrap();

    pool.join();

    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn threads_reach_zero_after_shutdown() {
    let pool = ThreadPool::with_size(4);
    assert_eq!(pool.threads(), 4);

    pool.shutdown();

    while pool.threads() > 0 {
        thread::sleep(Duration::from_millis(1));
    }

    assert!(pool.join_timeout(Duration::from_secs(5)));
}

#[test]
fn tasks_run_in_reverse_submission_order() {
    let pool = single_thread();
    let order = Arc::new(Mutex::new(Vec::new()));

    let gate = block_worker(&pool);

    for name in vec!["a", "b", "c"] {
        let order = order.clone();
        pool.execute(move || order.lock().unwrap().push(name))
            .unwrap();
    }

    assert_eq!(pool.queued_tasks(), 3);

    drop(gate);
    pool.join();

    assert_eq!(*order.lock().unwrap(), vec!["c", "b", "a"]);
}

#[test]
fn execute_after_shutdown_is_rejected() {
    let pool = single_thread();
    let counter = Arc::new(AtomicUsize::new(0));

    pool.shutdown();
    assert!(pool.is_shutdown());

    let error = pool.execute(counting_task(&counter)).unwrap_err();
    assert_eq!(error.to_string(), "thread pool is shut down");

    // The rejected closure is handed back intact.
    error.into_inner()();
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    pool.join();

    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn tasks_queued_before_shutdown_still_run() {
    let pool = single_thread();
    let counter = Arc::new(AtomicUsize::new(0));

    let gate = block_worker(&pool);

    for _ in 0..10 {
        pool.execute(counting_task(&counter)).unwrap();
    }

    pool.shutdown();

    assert!(pool.execute(counting_task(&counter)).is_err());
    assert_eq!(pool.queued_tasks(), 10);
    assert_eq!(counter.load(Ordering::SeqCst), 0);

    drop(gate);
    pool.join();

    assert_eq!(counter.load(Ordering::SeqCst), 10);
}

#[test]
fn spawner_rejects_after_join() {
    let pool = single_thread();
    let spawner = pool.spawner();

    assert!(!spawner.is_shutdown());
    assert!(spawner.execute(|| {}).is_ok());

    pool.join();

    assert!(spawner.is_shutdown());
    assert!(spawner.execute(|| {}).is_err());
}

#[test]
fn concurrent_submitters_never_lose_tasks() {
    let pool = ThreadPool::with_size(4);
    let counter = Arc::new(AtomicUsize::new(0));
    let accepted = Arc::new(AtomicUsize::new(0));

    let submitters = (0..4)
        .map(|_| {
            let spawner = pool.spawner();
            let counter = counter.clone();
            let accepted = accepted.clone();

            thread::spawn(move || {
                for _ in 0..1000 {
                    if spawner.execute(counting_task(&counter)).is_ok() {
                        accepted.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
        })
        .collect::<Vec<_>>();

    for submitter in submitters {
        submitter.join().unwrap();
    }

    pool.join();

    assert_eq!(accepted.load(Ordering::SeqCst), 4000);
    assert_eq!(counter.load(Ordering::SeqCst), 4000);
}

#[test]
fn submitting_while_shutting_down_runs_each_accepted_task_once() {
    let pool = ThreadPool::with_size(2);
    let spawner = pool.spawner();
    let counter = Arc::new(AtomicUsize::new(0));
    let accepted = Arc::new(AtomicUsize::new(0));

    let submitter = {
        let counter = counter.clone();
        let accepted = accepted.clone();

        thread::spawn(move || {
            while spawner.execute(counting_task(&counter)).is_ok() {
                accepted.fetch_add(1, Ordering::SeqCst);
            }
        })
    };

    thread::sleep(Duration::from_millis(5));
    pool.join();
    submitter.join().unwrap();

    assert_eq!(
        counter.load(Ordering::SeqCst),
        accepted.load(Ordering::SeqCst)
    );
}

#[test]
fn name() {
    let pool = ThreadPool::builder().name("foo").size(1).build();
    let (tx, rx) = bounded(1);

    pool.execute(move || {
        tx.send(thread::current().name().unwrap().to_owned())
            .unwrap()
    })
    .unwrap();

    assert_eq!(rx.recv().unwrap(), "foo");
    pool.join();
}

#[test]
fn panic_count() {
    let pool = single_thread();
    let counter = Arc::new(AtomicUsize::new(0));
    assert_eq!(pool.panicked_tasks(), 0);

    pool.execute(|| panic!("oh no!")).unwrap();
    pool.execute(counting_task(&counter)).unwrap();

    let spawner = pool.spawner();
    pool.join();

    // The worker survived the panic and ran the other task.
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(spawner.completed_tasks(), 2);
}

#[test]
fn panicked_tasks_counted() {
    let pool = single_thread();

    pool.execute(|| panic!("oh no!")).unwrap();

    while pool.completed_tasks() < 1 {
        thread::sleep(Duration::from_millis(1));
    }

    assert_eq!(pool.panicked_tasks(), 1);
    assert_eq!(pool.threads(), 1);
    pool.join();
}

#[test]
fn running_tasks() {
    let pool = single_thread();
    assert_eq!(pool.running_tasks(), 0);

    let gate = block_worker(&pool);
    assert_eq!(pool.running_tasks(), 1);

    drop(gate);

    while pool.completed_tasks() < 1 {
        thread::sleep(Duration::from_millis(1));
    }

    assert_eq!(pool.running_tasks(), 0);
    pool.join();
}

#[test]
fn default_size_is_one_per_core() {
    let pool = ThreadPool::default();

    assert_eq!(pool.threads(), num_cpus::get().max(1));
    pool.join();
}

#[test]
fn join() {
    // Just a dumb test to make sure join doesn't do anything strange.
    ThreadPool::default().join();
}

#[test]
fn join_timeout_expiring() {
    let pool = single_thread();

    // Keep the only thread busy longer than our join timeout.
    let gate = block_worker(&pool);

    assert!(!pool.join_timeout(Duration::from_millis(10)));

    drop(gate);
}

#[test]
fn join_timeout_completes() {
    let pool = ThreadPool::with_size(2);

    pool.execute(|| thread::sleep(Duration::from_millis(10)))
        .unwrap();

    assert!(pool.join_timeout(Duration::from_secs(5)));
}

#[test]
fn dropped_pool_still_drains() {
    let pool = single_thread();
    let counter = Arc::new(AtomicUsize::new(0));
    let (done_tx, done_rx) = bounded(1);

    for _ in 0..10 {
        pool.execute(counting_task(&counter)).unwrap();
    }

    pool.execute(move || done_tx.send(()).unwrap()).unwrap();

    drop(pool);

    // Last in, first out: the marker task runs first, so wait for the counter.
    done_rx.recv().unwrap();
    while counter.load(Ordering::SeqCst) < 10 {
        thread::sleep(Duration::from_millis(1));
    }
}
