/// Rearranges `v` around the element in the middle with the classic two-pointer
/// scheme. Returns `(lo_end, hi_start)` such that every element of
/// `v[..lo_end]` is not greater than the pivot, every element of `v[hi_start..]`
/// is not less than it, and everything in between equals the pivot.
///
/// Only `<` and swaps are used. The pivot is followed by index as it is swapped
/// around, so elements don't need to be `Clone`. Both sub-ranges are strictly
/// shorter than `v`.
pub fn partition<T: Ord>(v: &mut [T]) -> (usize, usize) {
    debug_assert!(v.len() > 1);

    let right = v.len() - 1;
    let mut p = right / 2;
    let mut i = 0;
    let mut j = right;

    loop {
        while i < right && v[i] < v[p] {
            i += 1;
        }

        while j > 0 && v[p] < v[j] {
            j -= 1;
        }

        if i <= j {
            v.swap(i, j);

            if p == i {
                p = j;
            } else if p == j {
                p = i;
            }

            i += 1;
            j = match j.checked_sub(1) {
                Some(j) => j,
                // Nothing is left on the lower side.
                None => return (0, i),
            };
        }

        if i > j {
            return (j + 1, i);
        }
    }
}
