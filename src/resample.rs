//! Component D: the grid resampler.

use crate::error::Result;
use crate::volume::Volume;

/// Samples `moving` onto `reference`'s grid: for each reference voxel
/// position `p`, `out(v) = moving.trilinear_interpolate(p, 0, NaN)`.
///
/// NaN propagates as "no data" — every downstream computation in this
/// crate treats non-finite voxels as absent rather than erroring.
pub fn resample_to(moving: &Volume<f32>, reference: &Volume<f32>) -> Result<Volume<f32>> {
    let mut out = Volume::<f32>::with_slice_offsets(
        reference.n_rows(),
        reference.n_cols(),
        1,
        *reference.geometry(),
        reference.slice_offsets().to_vec(),
    )?;
    let (n_rows, n_cols) = (reference.n_rows(), reference.n_cols());

    out.parallel_visit_slices(|s, chunk| {
        for r in 0..n_rows {
            for c in 0..n_cols {
                let p = reference.position(s, r, c);
                chunk[r * n_cols + c] = moving.trilinear_interpolate(p, 0, f32::NAN);
            }
        }
    });

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::Geometry;

    mod identical_grids {
        use super::*;

        #[test]
        fn same_geometry_round_trips_values() {
            let mut moving = Volume::<f32>::new(1, 4, 4, 1, Geometry::default()).unwrap();
            moving.visit_all(|_, r, c, _, _| (r * 4 + c) as f32);
            let reference = Volume::<f32>::new(1, 4, 4, 1, Geometry::default()).unwrap();

            let out = resample_to(&moving, &reference).unwrap();
            for r in 0..4 {
                for c in 0..4 {
                    assert_eq!(out.value(0, r, c, 0).unwrap(), moving.value(0, r, c, 0).unwrap());
                }
            }
        }
    }

    mod out_of_range {
        use super::*;

        #[test]
        fn reference_voxels_outside_moving_become_nan() {
            let moving = Volume::<f32>::new(1, 2, 2, 1, Geometry::default()).unwrap();
            let reference = Volume::<f32>::new(1, 8, 8, 1, Geometry::default()).unwrap();

            let out = resample_to(&moving, &reference).unwrap();
            assert!(out.value(0, 7, 7, 0).unwrap().is_nan());
        }

        #[test]
        fn output_shape_matches_reference_not_moving() {
            let moving = Volume::<f32>::new(1, 2, 2, 1, Geometry::default()).unwrap();
            let reference = Volume::<f32>::new(1, 6, 5, 1, Geometry::default()).unwrap();
            let out = resample_to(&moving, &reference).unwrap();
            assert_eq!((out.n_rows(), out.n_cols()), (6, 5));
        }
    }
}
