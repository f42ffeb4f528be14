//! # threaded-sort
//!
//! An in-place quick sort which offloads its deeper partitions to concurrently
//! running tasks.
//!
//! The interesting part is the bookkeeping of those tasks. Every partition step
//! beyond the configured recursion depth becomes a `Task` which registers itself
//! into a `Registry` before it is started. The registry tracks which tasks are
//! still running, keeps the first error any of them reported, reclaims the
//! execution contexts of the finished ones, and lets the caller block until the
//! whole tree of tasks, including the tasks spawned by other tasks, is done.
//!
//! Tasks run either on a fixed-size work-stealing `ThreadPool` (the default) or
//! on a dedicated thread each.
//!
//! ```rust
//! use threaded_sort::prelude::*;
//!
//! let mut v = vec![5, 4, 3, 2, 1];
//! quick_sort(&mut v).unwrap();
//! assert_eq!(v, [1, 2, 3, 4, 5]);
//! ```

#[macro_use]
extern crate log;

pub mod errors;
pub mod prelude;
pub mod sched;
pub mod settings;
pub mod sort;
pub mod task;
