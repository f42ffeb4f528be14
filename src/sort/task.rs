use crate::errors::Result;
use crate::task::{TaskBody, TaskContext};

use super::partition::partition;
use super::slice::RawSlice;

/// Sorts one range of the sequence. Partitions nested up to `max_recursion_depth`
/// levels are sorted by recursive calls on the current thread, deeper ones are
/// handed off to new tasks.
pub(crate) struct SortTask<T> {
    data: RawSlice<T>,
    offset: usize,
    max_recursion_depth: usize,
}

impl<T> SortTask<T>
where
    T: Ord + Send + 'static,
{
    /// `offset` is the index of the first element of `data` in the whole sequence.
    pub fn new(data: RawSlice<T>, offset: usize, max_recursion_depth: usize) -> Self {
        SortTask {
            data,
            offset,
            max_recursion_depth,
        }
    }

    fn quick_sort(&self, ctx: &TaskContext, v: &mut [T], offset: usize, level: usize) -> Result<()> {
        let level = level + 1;

        if ctx.is_error_occurred() {
            return Ok(());
        }

        let (lo_end, hi_start) = partition(v);
        let (lo, rest) = v.split_at_mut(lo_end);
        let hi = &mut rest[hi_start - lo_end..];

        if lo.len() > 1 {
            self.recurse_or_spawn(ctx, lo, offset, level)?;
        }

        if hi.len() > 1 {
            self.recurse_or_spawn(ctx, hi, offset + hi_start, level)?;
        }

        Ok(())
    }

    fn recurse_or_spawn(&self, ctx: &TaskContext, v: &mut [T], offset: usize, level: usize) -> Result<()> {
        if level <= self.max_recursion_depth {
            self.quick_sort(ctx, v, offset, level)
        } else {
            let task = SortTask::new(RawSlice::new(v), offset, self.max_recursion_depth);
            ctx.spawn(task).map(|_| ())
        }
    }
}

impl<T> TaskBody for SortTask<T>
where
    T: Ord + Send + 'static,
{
    fn run_body(&self, ctx: &TaskContext) -> Result<()> {
        // The range was split off for this task alone, and the sort waits for
        // every task before its borrow of the sequence ends.
        let v = unsafe { self.data.as_mut_slice() };
        if v.len() < 2 {
            return Ok(());
        }

        self.quick_sort(ctx, v, self.offset, 0)
    }

    fn describe(&self) -> String {
        format!(
            "sort [{}, {}]",
            self.offset,
            (self.offset + self.data.len()).saturating_sub(1)
        )
    }
}
