use std::marker::PhantomData;
use std::slice;

/// A view over a contiguous range of elements which could be sent to another
/// thread. Every `RawSlice` handed to a task is created from a sub-slice which
/// is disjoint from the ranges of all other live tasks, so no two tasks ever
/// touch the same element.
pub(crate) struct RawSlice<T> {
    ptr: *mut T,
    len: usize,
    marker: PhantomData<T>,
}

// Only the task owning the range dereferences the pointer.
unsafe impl<T: Send> Send for RawSlice<T> {}
unsafe impl<T: Send> Sync for RawSlice<T> {}

impl<T> RawSlice<T> {
    pub fn new(v: &mut [T]) -> Self {
        RawSlice {
            ptr: v.as_mut_ptr(),
            len: v.len(),
            marker: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Reconstructs the mutable slice.
    ///
    /// # Safety
    ///
    /// The elements must outlive the returned slice, and nothing else may access
    /// them while it is alive.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_mut_slice(&self) -> &mut [T] {
        slice::from_raw_parts_mut(self.ptr, self.len)
    }
}
