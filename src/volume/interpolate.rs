//! Trilinear (and, for single-slice volumes, bilinear) sampling.
//!
//! Both the field warper and compositional demons integration funnel
//! through [`Volume::trilinear_interpolate`] so that out-of-bounds and
//! edge-clamping behavior lives in exactly one place.

use crate::geometry::Vec3;

use super::{Volume, VoxelScalar};

impl<T: VoxelScalar> Volume<T> {
    /// Samples `channel` at world position `pos`, returning `oob` if the
    /// fractional position falls outside `[-0.5, N - 0.5]` on any axis.
    ///
    /// Fractional coordinates are the displacement of `pos` from the
    /// center of voxel (0,0,0), projected onto `row_unit`/`col_unit`/
    /// `ortho_unit` and divided by the matching spacing; the source this
    /// crate is grounded on computes this `-0.5`-biased fractional
    /// coordinate twice under two different names before using only one —
    /// that duplication is not reproduced here.
    pub fn trilinear_interpolate(&self, pos: Vec3, channel: usize, oob: T) -> T {
        let g = self.geometry;
        let base = g.anchor + self.slice_offsets[0];
        let diff = pos - base;

        let fc = diff.dot(g.row_unit) / g.pxl_dx - 0.5;
        let fr = diff.dot(g.col_unit) / g.pxl_dy - 0.5;
        if fc < -0.5 || fc > self.n_cols as f64 - 0.5 || fr < -0.5 || fr > self.n_rows as f64 - 0.5
        {
            return oob;
        }

        if self.n_slices == 1 {
            return T::from_f64(self.bilinear_at(0, fr, fc, channel));
        }

        let ortho = g.ortho_unit();
        let fs = diff.dot(ortho) / g.pxl_dz;
        if fs < -0.5 || fs > self.n_slices as f64 - 0.5 {
            return oob;
        }

        let s0_raw = fs.floor();
        let ts = (fs - s0_raw).clamp(0.0, 1.0);
        let s0 = clamp_index(s0_raw, self.n_slices);
        let s1 = clamp_index(s0_raw + 1.0, self.n_slices);

        let lo = self.bilinear_at(s0, fr, fc, channel);
        let hi = self.bilinear_at(s1, fr, fc, channel);
        T::from_f64(lo * (1.0 - ts) + hi * ts)
    }

    /// Bilinear sample within a single slice, both neighbor indices
    /// clamped independently to the slice's edges.
    fn bilinear_at(&self, s: usize, fr: f64, fc: f64, channel: usize) -> f64 {
        let r0_raw = fr.floor();
        let c0_raw = fc.floor();
        let tr = (fr - r0_raw).clamp(0.0, 1.0);
        let tc = (fc - c0_raw).clamp(0.0, 1.0);
        let r0 = clamp_index(r0_raw, self.n_rows);
        let r1 = clamp_index(r0_raw + 1.0, self.n_rows);
        let c0 = clamp_index(c0_raw, self.n_cols);
        let c1 = clamp_index(c0_raw + 1.0, self.n_cols);

        let v00 = self.value_unchecked(s, r0, c0, channel).to_f64();
        let v01 = self.value_unchecked(s, r0, c1, channel).to_f64();
        let v10 = self.value_unchecked(s, r1, c0, channel).to_f64();
        let v11 = self.value_unchecked(s, r1, c1, channel).to_f64();

        let top = v00 * (1.0 - tc) + v01 * tc;
        let bottom = v10 * (1.0 - tc) + v11 * tc;
        top * (1.0 - tr) + bottom * tr
    }
}

fn clamp_index(raw: f64, extent: usize) -> usize {
    raw.clamp(0.0, extent as f64 - 1.0) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::Geometry;

    fn ramp_2d(n_rows: usize, n_cols: usize) -> Volume<f32> {
        let mut vol = Volume::<f32>::new(1, n_rows, n_cols, 1, Geometry::default()).unwrap();
        vol.visit_all(|_, r, c, _, _| (r + c) as f32);
        vol
    }

    mod bounds {
        use super::*;

        #[test]
        fn grid_node_round_trips_exactly() {
            let vol = ramp_2d(4, 4);
            for r in 0..4usize {
                for c in 0..4usize {
                    let pos = vol.position(0, r, c);
                    let sampled = vol.trilinear_interpolate(pos, 0, f32::NAN);
                    assert!(
                        (sampled - (r + c) as f32).abs() < 1e-5,
                        "mismatch at ({r},{c}): {sampled}"
                    );
                }
            }
        }

        #[test]
        fn far_outside_returns_oob_sentinel() {
            let vol = ramp_2d(4, 4);
            let pos = Vec3::new(1000.0, 1000.0, 0.0);
            let sampled = vol.trilinear_interpolate(pos, 0, -1.0_f32);
            assert_eq!(sampled, -1.0);
        }

        #[test]
        fn single_slice_degenerates_to_bilinear() {
            let vol = ramp_2d(3, 3);
            let pos = vol.position(0, 1, 1).add(Vec3::new(0.0, 0.0, 100.0));
            // ortho displacement is irrelevant for a single-slice volume.
            let sampled = vol.trilinear_interpolate(pos, 0, f32::NAN);
            assert!((sampled - 2.0).abs() < 1e-5);
        }
    }

    mod half_pixel_shift {
        use super::*;

        #[test]
        fn half_pixel_x_shift_averages_neighbors() {
            let vol = ramp_2d(5, 5);
            let base = vol.position(0, 2, 2);
            let shifted = base.add(Vec3::new(0.5, 0.0, 0.0));
            let sampled = vol.trilinear_interpolate(shifted, 0, f32::NAN);
            assert!((sampled - 4.5).abs() < 1e-5, "got {sampled}");
        }
    }

    mod nonzero_slice_offset {
        use super::*;

        // Mirrors the §6 adapter path, where `Geometry::offset` stays zero
        // but `slice_offsets[0]` carries each source slice's real,
        // generally nonzero, in-plane offset.
        #[test]
        fn grid_node_round_trips_with_nonzero_in_plane_slice_offset() {
            let mut vol = Volume::<f32>::with_slice_offsets(
                4,
                4,
                1,
                Geometry::default(),
                vec![Vec3::new(5.0, -3.0, 0.0)],
            )
            .unwrap();
            vol.visit_all(|_, r, c, _, _| (r + c) as f32);

            for r in 0..4usize {
                for c in 0..4usize {
                    let pos = vol.position(0, r, c);
                    let sampled = vol.trilinear_interpolate(pos, 0, f32::NAN);
                    assert!(
                        (sampled - (r + c) as f32).abs() < 1e-5,
                        "mismatch at ({r},{c}): {sampled}"
                    );
                }
            }
        }

        #[test]
        fn slice_node_round_trips_with_nonzero_slice_offset_along_z() {
            let mut vol = Volume::<f32>::with_slice_offsets(
                2,
                2,
                1,
                Geometry::default(),
                vec![Vec3::new(0.0, 0.0, 7.0), Vec3::new(0.0, 0.0, 8.0)],
            )
            .unwrap();
            vol.visit_all(|s, _, _, _, _| s as f32);

            for s in 0..2usize {
                let pos = vol.position(s, 0, 0);
                let sampled = vol.trilinear_interpolate(pos, 0, f32::NAN);
                assert!(
                    (sampled - s as f32).abs() < 1e-5,
                    "mismatch at slice {s}: {sampled}"
                );
            }
        }
    }
}
