//! Cooperative executor abstraction and the worker-pool implementation.
//!
//! Tasks run to completion on executor threads; there are no suspension
//! primitives. Re-entrant `submit` calls from inside the pool are executed
//! inline when every worker is busy, so nested fan-out cannot deadlock.

use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use tracing::error;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Minimal executor surface consumed by the scheduler and the per-chunk
/// iteration driver.
pub trait Executor: Send + Sync {
    fn submit(&self, job: Job);
    fn concurrency(&self) -> usize;
}

/// Counting barrier: `wait` returns once `count_down` has been called the
/// configured number of times.
pub struct CountDownLatch {
    count: Mutex<usize>,
    cv: Condvar,
}

impl CountDownLatch {
    pub fn new(count: usize) -> Self {
        Self {
            count: Mutex::new(count),
            cv: Condvar::new(),
        }
    }

    pub fn count_down(&self) {
        let mut count = self.count.lock();
        debug_assert!(*count > 0);
        *count -= 1;
        if *count == 0 {
            self.cv.notify_all();
        }
    }

    pub fn wait(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.cv.wait(&mut count);
        }
    }
}

struct PoolShared {
    queue: Mutex<(VecDeque<Job>, bool)>, // (jobs, stop)
    cv: Condvar,
    busy: AtomicUsize,
    workers: usize,
}

thread_local! {
    static IN_POOL: Cell<bool> = const { Cell::new(false) };
    static DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Fixed worker pool behind the [`Executor`] trait.
pub struct ThreadPoolExecutor {
    shared: Arc<PoolShared>,
    handles: Vec<JoinHandle<()>>,
}

impl ThreadPoolExecutor {
    /// Pool with one worker per available core minus one (the frame thread
    /// also takes work).
    pub fn new() -> Self {
        let n = std::thread::available_parallelism()
            .map(|n| n.get().saturating_sub(1))
            .unwrap_or(1)
            .max(1);
        Self::with_threads(n)
    }

    pub fn with_threads(n: usize) -> Self {
        let n = n.max(1);
        let shared = Arc::new(PoolShared {
            queue: Mutex::new((VecDeque::new(), false)),
            cv: Condvar::new(),
            busy: AtomicUsize::new(0),
            workers: n,
        });

        let mut handles = Vec::with_capacity(n);
        for _ in 0..n {
            let shared = Arc::clone(&shared);
            handles.push(std::thread::spawn(move || {
                IN_POOL.with(|f| f.set(true));
                loop {
                    let job = {
                        let mut guard = shared.queue.lock();
                        loop {
                            if let Some(job) = guard.0.pop_front() {
                                break job;
                            }
                            if guard.1 {
                                return;
                            }
                            shared.cv.wait(&mut guard);
                        }
                    };

                    shared.busy.fetch_add(1, Ordering::Relaxed);
                    DEPTH.with(|d| d.set(d.get() + 1));
                    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)).is_err() {
                        error!("executor job panicked");
                    }
                    DEPTH.with(|d| d.set(d.get() - 1));
                    shared.busy.fetch_sub(1, Ordering::Relaxed);
                }
            }));
        }

        Self { shared, handles }
    }
}

impl Default for ThreadPoolExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for ThreadPoolExecutor {
    fn submit(&self, job: Job) {
        // Nested submit while every worker is busy: run inline instead of
        // queueing behind ourselves.
        let nested = IN_POOL.with(|f| f.get()) && DEPTH.with(|d| d.get()) > 0;
        if nested && self.shared.busy.load(Ordering::Relaxed) >= self.shared.workers {
            DEPTH.with(|d| d.set(d.get() + 1));
            job();
            DEPTH.with(|d| d.set(d.get() - 1));
            return;
        }

        self.shared.queue.lock().0.push_back(job);
        self.shared.cv.notify_one();
    }

    fn concurrency(&self) -> usize {
        self.shared.workers
    }
}

impl Drop for ThreadPoolExecutor {
    fn drop(&mut self) {
        self.shared.queue.lock().1 = true;
        self.cv_notify_all();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl ThreadPoolExecutor {
    fn cv_notify_all(&self) {
        self.shared.cv.notify_all();
    }
}

/// Rayon-backed executor for applications already running a rayon pool.
#[cfg(feature = "parallel")]
pub struct RayonExecutor {
    pool: rayon::ThreadPool,
}

#[cfg(feature = "parallel")]
impl RayonExecutor {
    pub fn new(threads: usize) -> Self {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .expect("failed to build rayon pool");
        Self { pool }
    }
}

#[cfg(feature = "parallel")]
impl Executor for RayonExecutor {
    fn submit(&self, job: Job) {
        self.pool.spawn(job);
    }

    fn concurrency(&self) -> usize {
        self.pool.current_num_threads()
    }
}

struct CountGuard(Arc<CountDownLatch>);

impl Drop for CountGuard {
    fn drop(&mut self) {
        self.0.count_down();
    }
}

/// Run `f(i)` for every `i in 0..n`, split into `tasks` contiguous blocks.
/// Blocks past the first are submitted to the executor (or to scoped threads
/// without one); the calling thread takes the first block and the call only
/// returns once every block has finished.
pub fn run_indexed<'env>(
    executor: Option<&dyn Executor>,
    n: usize,
    tasks: usize,
    f: &(dyn Fn(usize) + Sync + 'env),
) {
    if n == 0 {
        return;
    }
    let tasks = tasks.clamp(1, n);
    let block = n.div_ceil(tasks);

    let Some(executor) = executor else {
        // Thread-owned fallback when no executor is injected.
        std::thread::scope(|scope| {
            for t in 1..tasks {
                let begin = t * block;
                if begin >= n {
                    break;
                }
                let end = (begin + block).min(n);
                scope.spawn(move || {
                    for i in begin..end {
                        f(i);
                    }
                });
            }
            for i in 0..block.min(n) {
                f(i);
            }
        });
        return;
    };

    let latch = Arc::new(CountDownLatch::new(tasks - 1));
    // SAFETY: the latch is waited on before this function returns, so every
    // submitted job finishes while `f` is still live.
    let f_static: &'static (dyn Fn(usize) + Sync) = unsafe { std::mem::transmute(f) };

    for t in 1..tasks {
        let begin = t * block;
        let end = (begin + block).min(n);
        let guard = CountGuard(Arc::clone(&latch));
        if begin >= n {
            drop(guard);
            continue;
        }
        executor.submit(Box::new(move || {
            let _guard = guard;
            for i in begin..end {
                f_static(i);
            }
        }));
    }

    for i in 0..block.min(n) {
        f(i);
    }
    latch.wait();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn pool_runs_submitted_jobs() {
        let pool = ThreadPoolExecutor::with_threads(2);
        let counter = Arc::new(AtomicU32::new(0));
        let latch = Arc::new(CountDownLatch::new(8));
        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            let latch = Arc::clone(&latch);
            pool.submit(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                latch.count_down();
            }));
        }
        latch.wait();
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn nested_submit_does_not_deadlock() {
        let pool = Arc::new(ThreadPoolExecutor::with_threads(1));
        let latch = Arc::new(CountDownLatch::new(2));

        let inner_pool = Arc::clone(&pool);
        let inner_latch = Arc::clone(&latch);
        pool.submit(Box::new(move || {
            // The only worker is busy here; the nested job must run inline.
            let latch = Arc::clone(&inner_latch);
            inner_pool.submit(Box::new(move || latch.count_down()));
            inner_latch.count_down();
        }));
        latch.wait();
    }

    #[test]
    fn run_indexed_covers_every_index() {
        let pool = ThreadPoolExecutor::with_threads(3);
        let hits: Vec<AtomicU32> = (0..100).map(|_| AtomicU32::new(0)).collect();
        run_indexed(Some(&pool), 100, 7, &|i| {
            hits[i].fetch_add(1, Ordering::SeqCst);
        });
        assert!(hits.iter().all(|h| h.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn run_indexed_without_executor_uses_fallback_threads() {
        let hits: Vec<AtomicU32> = (0..37).map(|_| AtomicU32::new(0)).collect();
        run_indexed(None, 37, 4, &|i| {
            hits[i].fetch_add(1, Ordering::SeqCst);
        });
        assert!(hits.iter().all(|h| h.load(Ordering::SeqCst) == 1));
    }
}
