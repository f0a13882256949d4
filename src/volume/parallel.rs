//! Slice-parallel visitation: the join-barrier primitives every other
//! pass in this crate (smoothing, gradient, warp, demons) builds on.

use rayon::prelude::*;

use super::{Volume, VoxelScalar};

impl<T: VoxelScalar> Volume<T> {
    /// Submits one independent task per slice and returns only once every
    /// slice has been processed. `f` is given the slice index and a
    /// mutable view of exactly that slice's `(row, col, channel)` data —
    /// the borrow checker, not a runtime check, rules out concurrent
    /// mutation of another slice.
    ///
    /// The call to `par_chunks_mut` consuming the iterator (driven by
    /// `for_each`) *is* the join barrier: this function does not return
    /// until every slice task has completed.
    pub fn parallel_visit_slices<F>(&mut self, f: F)
    where
        F: Fn(usize, &mut [T]) + Sync,
    {
        let slice_len = self.n_rows * self.n_cols * self.n_channels;
        self.data
            .par_chunks_mut(slice_len)
            .enumerate()
            .for_each(|(s, chunk)| f(s, chunk));
    }

    /// Two-phase barrier variant: computes every even-indexed slice to
    /// completion, then every odd-indexed slice. `f` is given a slice
    /// index and a read-only view of the volume *as it stood before this
    /// phase began* (so it may read neighboring slices, including ones
    /// already updated in phase one of an odd pass) and returns that
    /// slice's replacement data.
    ///
    /// No pass in this crate currently needs in-place neighbor reads —
    /// Z-axis smoothing ping-pongs into a separate scratch buffer instead
    /// — so this is retained for API completeness rather than exercised
    /// by `gaussian_smooth`/`convolve_separable`.
    pub fn parallel_even_odd_slices<F>(&mut self, f: F)
    where
        F: Fn(usize, &Volume<T>) -> Vec<T> + Sync,
    {
        let slice_len = self.n_rows * self.n_cols * self.n_channels;
        for parity in [0usize, 1usize] {
            let indices: Vec<usize> = (parity..self.n_slices).step_by(2).collect();
            let updates: Vec<(usize, Vec<T>)> = indices
                .par_iter()
                .map(|&s| (s, f(s, self)))
                .collect();
            for (s, slice_data) in updates {
                debug_assert_eq!(slice_data.len(), slice_len);
                let start = s * slice_len;
                self.data[start..start + slice_len].copy_from_slice(&slice_data);
            }
        }
    }
}
