use std::any::Any;
use std::cell::Cell;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_deque::{Injector, Steal, Stealer, Worker};

use crate::errors::{Error, Result};

use super::latch::{CountLatch, Latch, LockLatch};
use super::unwind::{self, AbortIfPanic};
use super::PanicHandler;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct Scheduler {
    terminator: CountLatch,
    terminated: AtomicBool,
    watcher: Watcher,
    threads: Vec<ThreadInfo>,
    injector: Injector<Job>,
    panic_handler: Option<Box<PanicHandler>>,
}

impl Scheduler {
    /// Spawns `num` worker threads. This blocks the current thread until every
    /// worker is up and running.
    pub fn new(
        num: usize,
        stack_size: Option<usize>,
        panic_handler: Option<Box<PanicHandler>>,
    ) -> Result<(Arc<Self>, Vec<JoinHandle<()>>)> {
        let workers: Vec<Worker<Job>> = (0..num.max(1)).map(|_| Worker::new_fifo()).collect();

        let threads = workers
            .iter()
            .map(|w| ThreadInfo {
                stealer: w.stealer(),
                primed: LockLatch::new(),
            })
            .collect();

        let scheduler = Arc::new(Scheduler {
            terminator: CountLatch::new(),
            terminated: AtomicBool::new(false),
            watcher: Watcher(Mutex::new(()), Condvar::new()),
            threads,
            injector: Injector::new(),
            panic_handler,
        });

        let mut handles = Vec::with_capacity(workers.len());
        for (i, w) in workers.into_iter().enumerate() {
            let sc = scheduler.clone();
            let mut b = thread::Builder::new().name(format!("sort-worker-{}", i));

            if let Some(stack_size) = stack_size {
                b = b.stack_size(stack_size);
            }

            match b.spawn(move || Scheduler::main_loop(sc, i, w)) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    // Release the workers that did start before giving up.
                    scheduler.terminate();
                    for handle in handles {
                        let _ = handle.join();
                    }

                    return Err(err.into());
                }
            }
        }

        for v in &scheduler.threads {
            v.primed.wait();
        }

        Ok((scheduler, handles))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.threads.len()
    }

    #[inline]
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Submits a job. Jobs submitted from one of our own workers go onto that
    /// worker's local deque, everything else goes through the injector.
    pub fn spawn(&self, job: Job) -> Result<()> {
        if self.is_terminated() {
            return Err(Error::PoolTerminated);
        }

        // Ensure that scheduler cannot terminate until this job has executed. This
        // ref is decremented at the (*) in `WorkerThread::execute`.
        self.terminator.increment();
        self.inject_or_push(job);
        Ok(())
    }

    /// Push a job into this scheduler. If we are running on a worker thread of
    /// this scheduler, this will push onto the local deque. Else, it will inject
    /// from the outside (which is slower).
    fn inject_or_push(&self, job: Job) {
        if self.is_current_worker() {
            unsafe {
                (*WorkerThread::current()).worker.push(job);
            }
        } else {
            self.injector.push(job);
        }

        self.watcher.notify_one();
    }

    /// Returns true if the current thread is one of the workers of this scheduler.
    pub fn is_current_worker(&self) -> bool {
        let worker_thread = WorkerThread::current();
        !worker_thread.is_null() && unsafe { ptr::eq(&*(*worker_thread).scheduler, self) }
    }

    /// Handles panic.
    pub fn handle_panic(&self, err: Box<dyn Any + Send>) {
        match self.panic_handler {
            Some(ref handler) => {
                // If the customizable panic handler itself panics,
                // then we abort.
                let abort_guard = AbortIfPanic;
                handler(err);
                mem::forget(abort_guard);
            }
            None => {
                error!(
                    "Job panicked with '{}' and no panic handler is installed.",
                    unwind::payload_message(&*err)
                );

                // Default panic handler aborts.
                let _ = AbortIfPanic; // let this drop.
            }
        }
    }

    /// Signals that the owner of this scheduler has been dropped. Workers exit as
    /// soon as every submitted job has been executed.
    pub fn terminate(&self) {
        if !self.terminated.swap(true, Ordering::SeqCst) {
            self.terminator.set();
        }

        self.watcher.notify_all();
    }

    fn main_loop(scheduler: Arc<Scheduler>, index: usize, worker: Worker<Job>) {
        let worker_thread = WorkerThread {
            scheduler,
            index,
            worker,
            rand: XorShift64Star::new(),
        };

        unsafe {
            WorkerThread::set_current(&worker_thread);
        }

        worker_thread.scheduler.threads[index].primed.set();

        let abort_guard = AbortIfPanic;
        worker_thread.wait_until(&worker_thread.scheduler.terminator);
        mem::forget(abort_guard);

        unsafe {
            WorkerThread::set_current(ptr::null());
        }
    }
}

struct Watcher(Mutex<()>, Condvar);

impl Watcher {
    #[inline]
    fn wait_timeout(&self, ms: u64) {
        let duration = Duration::from_millis(ms);
        let v = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = self.1.wait_timeout(v, duration);
    }

    #[inline]
    fn notify_one(&self) {
        self.1.notify_one()
    }

    #[inline]
    fn notify_all(&self) {
        self.1.notify_all()
    }
}

struct ThreadInfo {
    stealer: Stealer<Job>,
    primed: LockLatch,
}

pub struct WorkerThread {
    scheduler: Arc<Scheduler>,
    index: usize,
    worker: Worker<Job>,
    rand: XorShift64Star,
}

// The WorkerThread is allocated on the stack of the worker on entry and stored into
// this thread local variable. So it will remain valid at least until the worker is
// fully unwound, and it is cleared before `main_loop` returns.
thread_local! {
    static WORKER_THREAD_STATE: Cell<*const WorkerThread> = Cell::new(ptr::null());
}

impl WorkerThread {
    /// Gets the `WorkerThread` for the current thread; returns NULL if this is
    /// not a worker thread. This pointer is valid anywhere on the current thread.
    #[inline]
    pub fn current() -> *const WorkerThread {
        WORKER_THREAD_STATE.with(|t| t.get())
    }

    unsafe fn set_current(thread: *const WorkerThread) {
        WORKER_THREAD_STATE.with(|t| {
            debug_assert!(t.get().is_null() || thread.is_null());
            t.set(thread);
        });
    }

    fn wait_until<L: Latch>(&self, latch: &L) {
        let mut ms = 1;

        while !latch.is_set() {
            if let Some(job) = self.find_work() {
                self.execute(job);
                ms = 1;
            } else {
                self.scheduler.watcher.wait_timeout(ms);
                ms = (ms * 2).min(48);
            }
        }

        trace!("Worker {} leaves its main loop.", self.index);
    }

    fn execute(&self, job: Job) {
        if let Err(err) = unwind::halt_unwinding(move || job()) {
            self.scheduler.handle_panic(err);
        }

        self.scheduler.terminator.set(); // (*) permit scheduler to terminate now
    }

    fn find_work(&self) -> Option<Job> {
        self.worker
            .pop()
            .or_else(|| self.steal())
            .or_else(|| steal_from(|| self.scheduler.injector.steal_batch_and_pop(&self.worker)))
    }

    /// Try to steal a single job from one of our siblings and return it.
    fn steal(&self) -> Option<Job> {
        let num_threads = self.scheduler.threads.len();
        if num_threads <= 1 {
            return None;
        }

        let start = self.rand.next_usize(num_threads);
        (start..num_threads)
            .chain(0..start)
            .filter(|&i| i != self.index)
            .find_map(|i| steal_from(|| self.scheduler.threads[i].stealer.steal()))
    }
}

fn steal_from<F>(func: F) -> Option<Job>
where
    F: Fn() -> Steal<Job>,
{
    loop {
        match func() {
            Steal::Success(job) => return Some(job),
            Steal::Empty => return None,
            Steal::Retry => {}
        }
    }
}

/// [xorshift*] is a fast pseudorandom number generator which will even tolerate
/// weak seeding, as long as it's not zero.
///
/// [xorshift*]: https://en.wikipedia.org/wiki/Xorshift#xorshift*
struct XorShift64Star {
    state: Cell<u64>,
}

impl XorShift64Star {
    fn new() -> Self {
        // Any non-zero seed will do -- this uses the hash of a global counter.
        let mut seed = 0;
        while seed == 0 {
            static COUNTER: AtomicUsize = AtomicUsize::new(0);
            let mut hasher = DefaultHasher::new();
            COUNTER.fetch_add(1, Ordering::Relaxed).hash(&mut hasher);
            seed = hasher.finish();
        }

        XorShift64Star {
            state: Cell::new(seed),
        }
    }

    fn next(&self) -> u64 {
        let mut x = self.state.get();
        debug_assert_ne!(x, 0);
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state.set(x);
        x.wrapping_mul(0x2545_f491_4f6c_dd1d)
    }

    /// Return a value from `0..n`.
    fn next_usize(&self, n: usize) -> usize {
        (self.next() % n as u64) as usize
    }
}
