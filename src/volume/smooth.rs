//! Separable convolution (Gaussian and user-supplied kernels) with
//! NaN-aware renormalization.

use crate::error::{RegistrationError, Result};

use super::{Volume, VoxelScalar};

#[derive(Clone, Copy)]
enum Axis {
    X,
    Y,
    Z,
}

impl<T: VoxelScalar> Volume<T> {
    /// In-place 3-pass separable Gaussian smoothing. Sigmas are given in
    /// world (mm) units; a sigma `<= 0.0` skips that axis's pass
    /// entirely. Passes run X -> Y -> Z, each reading the previous pass's
    /// fully-written output from a scratch buffer (ping-pong), so none of
    /// the three passes needs even/odd partitioning.
    pub fn gaussian_smooth(&mut self, sigma_x: f64, sigma_y: f64, sigma_z: f64) -> Result<()> {
        let kx = gaussian_kernel(sigma_x, self.geometry.pxl_dx)?;
        let ky = gaussian_kernel(sigma_y, self.geometry.pxl_dy)?;
        let kz = gaussian_kernel(sigma_z, self.geometry.pxl_dz)?;
        self.convolve_separable(&kx, &ky, &kz)
    }

    /// As [`Volume::gaussian_smooth`] but with user-supplied 1D kernels,
    /// each centered on its middle element. An empty kernel skips that
    /// axis (straight copy-through).
    pub fn convolve_separable(&mut self, kx: &[f64], ky: &[f64], kz: &[f64]) -> Result<()> {
        let mut scratch = self.clone();
        convolve_axis(self, &mut scratch, kx, Axis::X);
        std::mem::swap(&mut self.data, &mut scratch.data);

        convolve_axis(self, &mut scratch, ky, Axis::Y);
        std::mem::swap(&mut self.data, &mut scratch.data);

        convolve_axis(self, &mut scratch, kz, Axis::Z);
        std::mem::swap(&mut self.data, &mut scratch.data);
        Ok(())
    }
}

/// Builds a 1D Gaussian kernel sampled at integer offsets, normalized to
/// sum 1. Returns an empty kernel (meaning "skip this axis") when
/// `sigma_mm <= 0.0`.
fn gaussian_kernel(sigma_mm: f64, spacing: f64) -> Result<Vec<f64>> {
    if !sigma_mm.is_finite() || !spacing.is_finite() {
        return Err(RegistrationError::InvalidParameter(
            "sigma and spacing must be finite".into(),
        ));
    }
    if sigma_mm <= 0.0 {
        return Ok(Vec::new());
    }
    let sigma_pixels = sigma_mm / spacing;
    let radius = (3.0 * sigma_pixels).floor().max(1.0) as i64;
    let two_sigma_sq = 2.0 * sigma_pixels * sigma_pixels;
    let mut kernel: Vec<f64> = (-radius..=radius)
        .map(|i| (-(i as f64) * (i as f64) / two_sigma_sq).exp())
        .collect();
    let sum: f64 = kernel.iter().sum();
    if sum > 0.0 {
        for w in &mut kernel {
            *w /= sum;
        }
    }
    Ok(kernel)
}

/// Runs one separable pass along `axis`: reads `src`, writes `dst`. An
/// empty kernel copies `src` into `dst` unchanged.
fn convolve_axis<T: VoxelScalar>(src: &Volume<T>, dst: &mut Volume<T>, kernel: &[f64], axis: Axis) {
    if kernel.is_empty() {
        dst.data.copy_from_slice(&src.data);
        return;
    }
    let half = (kernel.len() / 2) as i64;
    let (n_slices, n_rows, n_cols, n_channels) = src.shape();

    dst.parallel_visit_slices(move |s, chunk| {
        for r in 0..n_rows {
            for c in 0..n_cols {
                for k in 0..n_channels {
                    let mut sum = 0.0_f64;
                    let mut wsum = 0.0_f64;
                    for (i, &w) in kernel.iter().enumerate() {
                        let offset = i as i64 - half;
                        let (ss, rr, cc) = match axis {
                            Axis::X => (s as i64, r as i64, c as i64 + offset),
                            Axis::Y => (s as i64, r as i64 + offset, c as i64),
                            Axis::Z => (s as i64 + offset, r as i64, c as i64),
                        };
                        if ss < 0
                            || rr < 0
                            || cc < 0
                            || ss as usize >= n_slices
                            || rr as usize >= n_rows
                            || cc as usize >= n_cols
                        {
                            continue;
                        }
                        let val = src
                            .value_unchecked(ss as usize, rr as usize, cc as usize, k)
                            .to_f64();
                        if val.is_finite() {
                            sum += w * val;
                            wsum += w;
                        }
                    }
                    let out = if wsum > 0.0 {
                        sum / wsum
                    } else {
                        src.value_unchecked(s, r, c, k).to_f64()
                    };
                    let local = (r * n_cols + c) * n_channels + k;
                    chunk[local] = T::from_f64(out);
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::Geometry;

    mod kernel {
        use super::*;

        #[test]
        fn non_positive_sigma_skips_axis() {
            let kernel = gaussian_kernel(0.0, 1.0).unwrap();
            assert!(kernel.is_empty());
        }

        #[test]
        fn kernel_sums_to_one() {
            let kernel = gaussian_kernel(1.0, 1.0).unwrap();
            let sum: f64 = kernel.iter().sum();
            assert!((sum - 1.0).abs() < 1e-9);
        }

        #[test]
        fn kernel_is_symmetric() {
            let kernel = gaussian_kernel(2.0, 1.0).unwrap();
            let n = kernel.len();
            for i in 0..n / 2 {
                assert!((kernel[i] - kernel[n - 1 - i]).abs() < 1e-12);
            }
        }

        #[test]
        fn rejects_non_finite_sigma() {
            assert!(gaussian_kernel(f64::NAN, 1.0).is_err());
        }
    }

    mod smoothing {
        use super::*;

        #[test]
        fn uniform_volume_is_a_fixpoint() {
            let mut vol = Volume::<f64>::new(3, 3, 3, 1, Geometry::default()).unwrap();
            vol.visit_all(|_, _, _, _, _| 7.0);
            vol.gaussian_smooth(1.0, 1.0, 1.0).unwrap();
            assert!(vol.data().iter().all(|&v| (v - 7.0).abs() < 1e-9));
        }

        #[test]
        fn spike_is_attenuated_but_remains_maximum() {
            let mut vol = Volume::<f64>::new(5, 5, 5, 1, Geometry::default()).unwrap();
            *vol.reference(2, 2, 2, 0).unwrap() = 100.0;
            vol.gaussian_smooth(1.0, 1.0, 1.0).unwrap();
            let center = vol.value(2, 2, 2, 0).unwrap();
            assert!(center < 100.0 && center > 0.0);
            let max = vol.data().iter().cloned().fold(f64::MIN, f64::max);
            assert!((center - max).abs() < 1e-9);
        }

        #[test]
        fn zero_sigma_on_all_axes_is_identity() {
            let mut vol = Volume::<f64>::new(2, 2, 2, 1, Geometry::default()).unwrap();
            vol.visit_all(|s, r, c, _, _| (s + r + c) as f64);
            let before = vol.data().to_vec();
            vol.gaussian_smooth(0.0, 0.0, 0.0).unwrap();
            assert_eq!(vol.data(), before.as_slice());
        }

        #[test]
        fn nan_taps_are_excluded_from_renormalization() {
            let mut vol = Volume::<f64>::new(1, 1, 5, 1, Geometry::default()).unwrap();
            vol.visit_all(|_, _, c, _, _| if c == 2 { 10.0 } else { f64::NAN });
            vol.gaussian_smooth(0.0, 0.0, 0.0).unwrap();
            // sigma 0 on every axis is a no-op copy, so values survive untouched.
            assert_eq!(vol.value(0, 0, 2, 0).unwrap(), 10.0);

            let mut vol2 = Volume::<f64>::new(1, 1, 5, 1, Geometry::default()).unwrap();
            vol2.visit_all(|_, _, c, _, _| if c == 2 { 10.0 } else { f64::NAN });
            vol2.gaussian_smooth(1.0, 1.0, 1.0).unwrap();
            // With only one finite tap in range, renormalization falls back to it.
            assert!(vol2.value(0, 0, 2, 0).unwrap().is_finite());
        }
    }

    mod convolve_separable {
        use super::*;

        #[test]
        fn empty_kernel_is_copy_through() {
            let mut vol = Volume::<f64>::new(2, 2, 2, 1, Geometry::default()).unwrap();
            vol.visit_all(|s, r, c, _, _| (s * 4 + r * 2 + c) as f64);
            let before = vol.data().to_vec();
            vol.convolve_separable(&[], &[], &[]).unwrap();
            assert_eq!(vol.data(), before.as_slice());
        }
    }
}
