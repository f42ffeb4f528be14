use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use crate::errors::{Error, Result};
use crate::sched::{unwind, JobHandle, ThreadPool};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Creates the execution contexts which tasks run in.
pub trait Launcher: Send + Sync {
    /// Starts executing `job` somewhere else than the current thread.
    fn launch(&self, job: Job) -> Result<ExecHandle>;
}

/// The execution context of a started task. It must be reclaimed from another
/// context than the one it represents.
#[derive(Debug)]
pub enum ExecHandle {
    /// The task ran on the thread that started it, nothing to reclaim.
    Inline,
    Thread(JoinHandle<()>),
    Pooled(JobHandle),
}

impl ExecHandle {
    /// Returns true if the context has finished running.
    pub fn is_finished(&self) -> bool {
        match *self {
            ExecHandle::Inline => true,
            ExecHandle::Thread(ref handle) => handle.is_finished(),
            ExecHandle::Pooled(ref handle) => handle.is_finished(),
        }
    }

    /// Returns false if joining this context from the current thread would wait
    /// for the current context itself.
    pub fn joinable_from_current(&self) -> bool {
        match *self {
            ExecHandle::Inline => true,
            ExecHandle::Thread(ref handle) => handle.thread().id() != thread::current().id(),
            ExecHandle::Pooled(ref handle) => !handle.is_current(),
        }
    }

    /// Blocks until the context has finished and releases it.
    pub fn join(self) -> Result<()> {
        match self {
            ExecHandle::Inline => Ok(()),
            ExecHandle::Thread(handle) => handle
                .join()
                .map_err(|err| Error::Join(unwind::payload_message(&*err))),
            ExecHandle::Pooled(handle) => {
                handle.wait();
                Ok(())
            }
        }
    }
}

/// Spawns a dedicated thread for every task. The number of live threads is not
/// bounded, so deep trees of tasks could exhaust the thread limit of the system.
#[derive(Debug, Default)]
pub struct ThreadLauncher {
    stack_size: Option<usize>,
    spawned: AtomicUsize,
}

impl ThreadLauncher {
    pub fn new(stack_size: Option<usize>) -> Self {
        ThreadLauncher {
            stack_size,
            spawned: AtomicUsize::new(0),
        }
    }

    /// Returns the number of threads spawned so far.
    #[inline]
    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }
}

impl Launcher for ThreadLauncher {
    fn launch(&self, job: Job) -> Result<ExecHandle> {
        let index = self.spawned.fetch_add(1, Ordering::SeqCst);
        let mut b = thread::Builder::new().name(format!("sort-task-{}", index));

        if let Some(stack_size) = self.stack_size {
            b = b.stack_size(stack_size);
        }

        Ok(ExecHandle::Thread(b.spawn(job)?))
    }
}

impl Launcher for ThreadPool {
    fn launch(&self, job: Job) -> Result<ExecHandle> {
        Ok(ExecHandle::Pooled(self.spawn(job)?))
    }
}
