//! #### Schedule Subsystem
//! A fixed-size, work-stealing thread pool. Every worker owns a FIFO deque, jobs
//! submitted from outside of the pool go through a shared injector, and idle
//! workers steal from their siblings before going to sleep.
//!
//! Task execution contexts are taken from this pool instead of spawning one
//! thread per task, which bounds the number of live threads no matter how
//! degenerate the partitions of a sort turn out to be.

pub mod latch;
pub mod unwind;

mod scheduler;

use std::any::Any;
use std::cell::Cell;
use std::ptr;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::errors::Result;
use crate::settings::PoolParams;

use self::latch::{Latch, LockLatch};
use self::scheduler::{Scheduler, WorkerThread};

/// The type for a panic handling closure. Note that this same closure
/// may be invoked multiple times in parallel.
pub type PanicHandler = dyn Fn(Box<dyn Any + Send>) + Send + Sync;

/// Returns true if the current thread is a worker of any `ThreadPool`.
#[inline]
pub fn is_worker_thread() -> bool {
    !WorkerThread::current().is_null()
}

pub struct ThreadPool {
    scheduler: Arc<Scheduler>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadPool {
    /// Creates a new thread pool. This blocks the thread until all workers are ready.
    pub fn new(params: &PoolParams) -> Result<Self> {
        ThreadPool::new_with(params, None)
    }

    /// Creates a new thread pool which hands panics escaping from jobs to `handler`
    /// instead of aborting the process.
    pub fn with_panic_handler(params: &PoolParams, handler: Box<PanicHandler>) -> Result<Self> {
        ThreadPool::new_with(params, Some(handler))
    }

    fn new_with(params: &PoolParams, handler: Option<Box<PanicHandler>>) -> Result<Self> {
        let (scheduler, threads) = Scheduler::new(params.num_threads, params.stack_size, handler)?;
        info!("Thread pool with {} workers is ready.", scheduler.len());

        Ok(ThreadPool {
            scheduler,
            threads: Mutex::new(threads),
        })
    }

    /// Returns the number of workers.
    #[inline]
    pub fn len(&self) -> usize {
        self.scheduler.len()
    }

    /// Spawns an asynchronous job in this pool. The returned handle could be used
    /// to wait for the job to finish.
    pub fn spawn<F>(&self, func: F) -> Result<JobHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        let done = Arc::new(LockLatch::new());
        let signal = done.clone();

        self.scheduler.spawn(Box::new(move || {
            let result = {
                let _current = CurrentJob::enter(&signal);
                unwind::halt_unwinding(func)
            };

            signal.set();

            if let Err(err) = result {
                unwind::resume_unwinding(err);
            }
        }))?;

        Ok(JobHandle { done })
    }

    /// Signals that this pool should be terminated. Blocks current thread until all
    /// the workers finished their jobs gracefully. Further submissions are refused.
    ///
    /// Called from one of the workers of this pool, which happens when a job drops
    /// the last reference to it, this only signals the termination. The workers
    /// exit on their own once the calling job has returned.
    pub fn terminate(&self) {
        self.scheduler.terminate();

        let threads: Vec<_> = {
            let mut threads = self.threads.lock().unwrap_or_else(PoisonError::into_inner);
            threads.drain(..).collect()
        };

        if self.scheduler.is_current_worker() {
            // Every sibling keeps running until the current job is done.
            debug!("Thread pool is terminated from its own worker, leaves workers detached.");
            return;
        }

        for handle in threads {
            if handle.join().is_err() {
                warn!("Worker thread exits abnormally.");
            }
        }
    }

    #[inline]
    pub fn is_terminated(&self) -> bool {
        self.scheduler.is_terminated()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.terminate();
    }
}

thread_local! {
    static CURRENT_JOB: Cell<*const LockLatch> = Cell::new(ptr::null());
}

/// Marks the job owning `latch` as the one running on the current thread.
struct CurrentJob(*const LockLatch);

impl CurrentJob {
    fn enter(latch: &Arc<LockLatch>) -> Self {
        let prev = CURRENT_JOB.with(|v| v.replace(Arc::as_ptr(latch)));
        CurrentJob(prev)
    }
}

impl Drop for CurrentJob {
    fn drop(&mut self) {
        CURRENT_JOB.with(|v| v.set(self.0));
    }
}

/// Handle of a job submitted to `ThreadPool`.
#[derive(Debug, Clone)]
pub struct JobHandle {
    done: Arc<LockLatch>,
}

impl JobHandle {
    /// Returns true if this is the job running on the current thread. Waiting for
    /// it from here would never return.
    #[inline]
    pub fn is_current(&self) -> bool {
        CURRENT_JOB.with(|v| ptr::eq(v.get(), Arc::as_ptr(&self.done)))
    }

    /// Returns true if the job has finished executing.
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.done.is_set()
    }

    /// Blocks until the job has finished executing.
    #[inline]
    pub fn wait(&self) {
        self.done.wait()
    }

    /// Blocks until the job has finished executing or `timeout` elapsed. Returns
    /// true if the job has finished.
    #[inline]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.done.wait_timeout(timeout)
    }
}
