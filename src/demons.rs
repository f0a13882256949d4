//! Component F: the Demons registration driver.

use crate::error::{RegistrationError, Result as RegResult};
use crate::geometry::Vec3;
use crate::gradient::gradient;
use crate::histogram::histogram_match;
use crate::resample::resample_to;
use crate::volume::Volume;
use crate::warp::warp;

/// Registration parameters. `Default` gives the literal defaults this
/// crate inherited from its source algorithm.
#[derive(Debug, Clone, Copy)]
pub struct DemonsParams {
    pub max_iterations: u32,
    pub convergence_threshold: f64,
    pub field_smoothing_sigma: f64,
    pub update_smoothing_sigma: f64,
    pub use_diffeomorphic: bool,
    pub use_histogram_matching: bool,
    pub histogram_bins: u32,
    pub histogram_outlier_fraction: f64,
    pub normalization_factor: f64,
    pub max_update_magnitude: f64,
    pub verbosity: u8,
}

impl Default for DemonsParams {
    fn default() -> Self {
        DemonsParams {
            max_iterations: 100,
            convergence_threshold: 1e-3,
            field_smoothing_sigma: 1.0,
            update_smoothing_sigma: 0.5,
            use_diffeomorphic: false,
            use_histogram_matching: false,
            histogram_bins: 256,
            histogram_outlier_fraction: 0.01,
            normalization_factor: 1.0,
            max_update_magnitude: 2.0,
            verbosity: 1,
        }
    }
}

const DEMONS_EPSILON: f64 = 1e-10;

/// Runs the iterative Demons registration loop. Returns `None` (after
/// logging the cause) for empty inputs or any fatal internal error;
/// individual non-finite voxels are never fatal.
///
/// This is the crate's "Option-like" public boundary: every internal
/// routine signals with `Result<_, RegistrationError>`, and this
/// function is the one place those results collapse to `Option`.
pub fn register(
    params: &DemonsParams,
    moving_in: &Volume<f32>,
    fixed: &Volume<f32>,
) -> Option<Volume<f64>> {
    if moving_in.n_slices() == 0 || fixed.n_slices() == 0 {
        tracing::warn!("register: empty moving or fixed input");
        return None;
    }

    match run(params, moving_in, fixed) {
        Ok(field) => Some(field),
        Err(err) => {
            tracing::warn!("Demons registration failed: {err}");
            None
        }
    }
}

fn run(
    params: &DemonsParams,
    moving_in: &Volume<f32>,
    fixed: &Volume<f32>,
) -> RegResult<Volume<f64>> {
    // Step 1: resample moving onto the fixed grid.
    let mut moving = resample_to(moving_in, fixed)?;

    // Step 2: optional histogram matching.
    if params.use_histogram_matching {
        moving = histogram_match(
            &moving,
            fixed,
            params.histogram_bins,
            params.histogram_outlier_fraction,
        )?;
    }

    // Step 4: gradient of fixed, computed once.
    let grad = gradient(fixed)?;

    // Step 5: zero-filled displacement field on the fixed grid.
    let mut field = Volume::<f64>::with_slice_offsets(
        fixed.n_rows(),
        fixed.n_cols(),
        3,
        *fixed.geometry(),
        fixed.slice_offsets().to_vec(),
    )?;

    // Step 6: identity warp (zero field).
    let mut warped = moving.clone();

    let mut prev_mse = f64::INFINITY;

    for iter in 0..params.max_iterations {
        let (update, mse) = compute_update(params, fixed, &warped, &grad)?;

        if iter > 0 && (prev_mse - mse).abs() < params.convergence_threshold {
            break;
        }
        prev_mse = mse;
        if params.verbosity >= 1 {
            tracing::info!(iter, mse, "demons iteration");
        }

        let mut update = update;
        if params.use_diffeomorphic && params.update_smoothing_sigma > 0.0 {
            update.gaussian_smooth(
                params.update_smoothing_sigma,
                params.update_smoothing_sigma,
                params.update_smoothing_sigma,
            )?;
        }

        integrate(&mut field, &update, params.use_diffeomorphic)?;

        if params.field_smoothing_sigma > 0.0 {
            field.gaussian_smooth(
                params.field_smoothing_sigma,
                params.field_smoothing_sigma,
                params.field_smoothing_sigma,
            )?;
        }

        // Re-warp from the original resampled moving image, never from
        // the previous `warped`, to prevent interpolation-error
        // accumulation.
        warped = warp(&moving, &field, f32::NAN)?;
    }

    Ok(field)
}

/// Computes the per-voxel Demons update field and the current MSE
/// between `fixed` and `warped`. Non-finite voxel pairs contribute a
/// zero update and are excluded from the MSE accumulation; an entirely
/// non-overlapping pair of images reports MSE 0 rather than erroring.
fn compute_update(
    params: &DemonsParams,
    fixed: &Volume<f32>,
    warped: &Volume<f32>,
    grad: &Volume<f64>,
) -> RegResult<(Volume<f64>, f64)> {
    let mut update = Volume::<f64>::with_slice_offsets(
        fixed.n_rows(),
        fixed.n_cols(),
        3,
        *fixed.geometry(),
        fixed.slice_offsets().to_vec(),
    )?;

    let (n_rows, n_cols) = (fixed.n_rows(), fixed.n_cols());
    let mut sum_sq = 0.0_f64;
    let mut count = 0u64;

    for s in 0..fixed.n_slices() {
        for r in 0..n_rows {
            for c in 0..n_cols {
                let f_val = fixed.value_unchecked(s, r, c, 0).to_f64();
                let w_val = warped.value_unchecked(s, r, c, 0).to_f64();
                if !f_val.is_finite() || !w_val.is_finite() {
                    continue;
                }
                let diff = f_val - w_val;
                sum_sq += diff * diff;
                count += 1;

                let g = Vec3::new(
                    grad.value_unchecked(s, r, c, 0),
                    grad.value_unchecked(s, r, c, 1),
                    grad.value_unchecked(s, r, c, 2),
                );
                let mag_sq = g.dot(g);
                let denom = mag_sq + diff * diff / (params.normalization_factor + DEMONS_EPSILON);
                if denom > DEMONS_EPSILON {
                    let mut u = g.scale(diff / denom);
                    let mag = u.length();
                    if mag > params.max_update_magnitude {
                        u = u.scale(params.max_update_magnitude / mag);
                    }
                    update.set_unchecked(s, r, c, 0, u.x);
                    update.set_unchecked(s, r, c, 1, u.y);
                    update.set_unchecked(s, r, c, 2, u.z);
                }
            }
        }
    }

    let mse = match require_finite_overlap(count) {
        Ok(()) => sum_sq / count as f64,
        Err(err) => {
            tracing::warn!("{err}");
            0.0
        }
    };

    Ok((update, mse))
}

/// Classifies "no finite voxel overlap between fixed and warped" as the
/// §7 `NoUsableSamples` error; the caller recovers by reporting MSE 0.
fn require_finite_overlap(count: u64) -> RegResult<()> {
    if count == 0 {
        return Err(RegistrationError::NoUsableSamples(
            "no finite voxel overlap between fixed and warped".into(),
        ));
    }
    Ok(())
}

/// Integrates `update` into `field`, either by simple addition or, for
/// the diffeomorphic variant, by sampling `update` at each voxel's
/// already-deformed position and composing.
fn integrate(
    field: &mut Volume<f64>,
    update: &Volume<f64>,
    use_diffeomorphic: bool,
) -> RegResult<()> {
    if !use_diffeomorphic {
        return field.add_assign(update);
    }

    let (n_rows, n_cols) = (field.n_rows(), field.n_cols());
    let mut new_field = field.clone();
    for s in 0..field.n_slices() {
        for r in 0..n_rows {
            for c in 0..n_cols {
                let p = field.position(s, r, c);
                let d = Vec3::new(
                    field.value_unchecked(s, r, c, 0),
                    field.value_unchecked(s, r, c, 1),
                    field.value_unchecked(s, r, c, 2),
                );
                let deformed = Vec3::new(p.x + d.x, p.y + d.y, p.z + d.z);
                let ux = update.trilinear_interpolate(deformed, 0, 0.0);
                let uy = update.trilinear_interpolate(deformed, 1, 0.0);
                let uz = update.trilinear_interpolate(deformed, 2, 0.0);
                new_field.set_unchecked(s, r, c, 0, d.x + ux);
                new_field.set_unchecked(s, r, c, 1, d.y + uy);
                new_field.set_unchecked(s, r, c, 2, d.z + uz);
            }
        }
    }
    *field = new_field;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::Geometry;

    fn image_from(values: &[f32], n_rows: usize, n_cols: usize) -> Volume<f32> {
        let mut vol = Volume::<f32>::new(1, n_rows, n_cols, 1, Geometry::default()).unwrap();
        for (v, dst) in values.iter().zip(vol.data_mut().iter_mut()) {
            *dst = *v;
        }
        vol
    }

    fn ramp(n_rows: usize, n_cols: usize) -> Volume<f32> {
        let mut vol = Volume::<f32>::new(1, n_rows, n_cols, 1, Geometry::default()).unwrap();
        vol.visit_all(|_, r, c, _, _| (r + c) as f32);
        vol
    }

    fn mse(a: &Volume<f32>, b: &Volume<f32>) -> f64 {
        let mut sum = 0.0;
        let mut count = 0u64;
        for (x, y) in a.data().iter().zip(b.data().iter()) {
            let (x, y) = (x.to_f64(), y.to_f64());
            if x.is_finite() && y.is_finite() {
                sum += (x - y) * (x - y);
                count += 1;
            }
        }
        if count > 0 { sum / count as f64 } else { 0.0 }
    }

    mod preconditions {
        use super::*;

        #[test]
        fn well_formed_inputs_register_successfully() {
            // Volume::new rejects zero-slice construction outright, so the
            // driver's own empty-input check is only reachable from a
            // non-public path; this exercises the success path it guards.
            let fixed = ramp(5, 5);
            let params = DemonsParams::default();
            assert!(register(&params, &fixed, &fixed).is_some());
        }
    }

    mod scenario_1_identity {
        use super::*;

        #[test]
        fn identity_registration_produces_near_zero_field() {
            let image = ramp(5, 5);
            let params = DemonsParams {
                max_iterations: 3,
                field_smoothing_sigma: 0.0,
                update_smoothing_sigma: 0.0,
                ..Default::default()
            };
            let field = register(&params, &image, &image).unwrap();
            let max_abs = field
                .data()
                .iter()
                .cloned()
                .fold(0.0_f64, |acc, v| acc.max(v.abs()));
            assert!(max_abs < 1e-6, "max |field| = {max_abs}");
        }
    }

    mod scenario_2_one_pixel_shift {
        use super::*;

        #[test]
        fn recovers_a_one_pixel_shift_better_than_no_warp() {
            let n = 5;
            let fixed = image_from(
                &(0..n * n)
                    .map(|i| (i % n) as f32)
                    .collect::<Vec<_>>(),
                n,
                n,
            );
            let moving = image_from(
                &(0..n * n)
                    .map(|i| ((i % n).min(n - 2) + 1) as f32)
                    .collect::<Vec<_>>(),
                n,
                n,
            );
            let params = DemonsParams {
                max_iterations: 15,
                field_smoothing_sigma: 0.0,
                update_smoothing_sigma: 0.0,
                max_update_magnitude: 1.0,
                ..Default::default()
            };
            let pre_mse = mse(&fixed, &moving);
            let field = register(&params, &moving, &fixed).unwrap();
            let warped = warp(&moving, &field, f32::NAN).unwrap();
            let post_mse = mse(&fixed, &warped);
            assert!(post_mse < pre_mse, "post {post_mse} vs pre {pre_mse}");
        }
    }

    mod scenario_6_convergence_guard {
        use super::*;

        #[test]
        fn convergence_threshold_can_stop_before_max_iterations() {
            let n = 5;
            let fixed = image_from(
                &(0..n * n).map(|i| (i % n) as f32).collect::<Vec<_>>(),
                n,
                n,
            );
            let moving = image_from(
                &(0..n * n)
                    .map(|i| ((i % n).min(n - 2) + 1) as f32)
                    .collect::<Vec<_>>(),
                n,
                n,
            );
            let params = DemonsParams {
                max_iterations: 10_000,
                convergence_threshold: 1e-3,
                field_smoothing_sigma: 0.0,
                update_smoothing_sigma: 0.0,
                max_update_magnitude: 1.0,
                ..Default::default()
            };
            let pre_mse = mse(&fixed, &moving);
            let field = register(&params, &moving, &fixed).unwrap();
            let warped = warp(&moving, &field, f32::NAN).unwrap();
            let post_mse = mse(&fixed, &warped);
            assert!(post_mse <= 0.5 * pre_mse, "post {post_mse} vs pre {pre_mse}");
        }
    }

    mod diffeomorphic_variant {
        use super::*;

        #[test]
        fn diffeomorphic_integration_also_reduces_mse() {
            let n = 20;
            let blob = |r: usize, c: usize, shift: usize| {
                let rr = r as f64 - 10.0;
                let cc = c as f64 - 10.0 - shift as f64;
                (100.0 * (-(rr * rr + cc * cc) / 8.0).exp()) as f32
            };
            let fixed = {
                let mut vol = Volume::<f32>::new(1, n, n, 1, Geometry::default()).unwrap();
                vol.visit_all(|_, r, c, _, _| blob(r, c, 0));
                vol
            };
            let moving = {
                let mut vol = Volume::<f32>::new(1, n, n, 1, Geometry::default()).unwrap();
                vol.visit_all(|_, r, c, _, _| blob(r, c, 2));
                vol
            };
            let params = DemonsParams {
                max_iterations: 200,
                use_diffeomorphic: true,
                field_smoothing_sigma: 1.0,
                update_smoothing_sigma: 0.5,
                max_update_magnitude: 2.0,
                ..Default::default()
            };
            let pre_mse = mse(&fixed, &moving);
            let field = register(&params, &moving, &fixed).unwrap();
            let warped = warp(&moving, &field, f32::NAN).unwrap();
            let post_mse = mse(&fixed, &warped);
            assert!(
                post_mse <= 0.1 * pre_mse,
                "post {post_mse} vs pre {pre_mse}"
            );
        }
    }
}
