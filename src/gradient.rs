//! Component B: the centered-difference gradient operator.

use crate::error::{RegistrationError, Result};
use crate::volume::{Geometry, Volume};

/// Computes `(dI/dx, dI/dy, dI/dz)` of a scalar image, returning a
/// 3-channel `Volume<f64>` sharing the source's geometry.
///
/// Centered differences are used on interior voxels; one-sided
/// forward/backward differences cover the boundary. An axis with extent
/// 1 contributes a zero gradient component. Any component touching a
/// non-finite sample is set to zero rather than propagating NaN.
pub fn gradient(image: &Volume<f32>) -> Result<Volume<f64>> {
    if image.n_channels() != 1 {
        return Err(RegistrationError::ShapeMismatch(format!(
            "gradient expects a scalar (1-channel) volume, got {} channels",
            image.n_channels()
        )));
    }
    let geometry: Geometry = *image.geometry();
    let mut out = Volume::<f64>::with_slice_offsets(
        image.n_rows(),
        image.n_cols(),
        3,
        geometry,
        image.slice_offsets().to_vec(),
    )?;

    let n_slices = image.n_slices();
    let n_rows = image.n_rows();
    let n_cols = image.n_cols();
    let pxl_dx = geometry.pxl_dx;
    let pxl_dy = geometry.pxl_dy;
    let pxl_dz = geometry.pxl_dz;

    out.parallel_visit_slices(|s, chunk| {
        for r in 0..n_rows {
            for c in 0..n_cols {
                let gx = axis_component(
                    n_cols,
                    c,
                    pxl_dx,
                    |c2| image.value_unchecked(s, r, c2, 0).to_f64(),
                );
                let gy = axis_component(
                    n_rows,
                    r,
                    pxl_dy,
                    |r2| image.value_unchecked(s, r2, c, 0).to_f64(),
                );
                let gz = axis_component(n_slices, s, pxl_dz, |s2| {
                    image.value_unchecked(s2, r, c, 0).to_f64()
                });

                let local = (r * n_cols + c) * 3;
                chunk[local] = gx;
                chunk[local + 1] = gy;
                chunk[local + 2] = gz;
            }
        }
    });

    Ok(out)
}

/// One gradient component along a single axis: central difference on the
/// interior, one-sided at the boundary, zero when the axis has extent 1
/// or either participating sample is non-finite.
fn axis_component(extent: usize, index: usize, spacing: f64, sample: impl Fn(usize) -> f64) -> f64 {
    if extent <= 1 {
        return 0.0;
    }
    if index == 0 {
        let (a, b) = (sample(0), sample(1));
        if a.is_finite() && b.is_finite() {
            (b - a) / spacing
        } else {
            0.0
        }
    } else if index == extent - 1 {
        let (a, b) = (sample(extent - 2), sample(extent - 1));
        if a.is_finite() && b.is_finite() {
            (b - a) / spacing
        } else {
            0.0
        }
    } else {
        let (a, b) = (sample(index - 1), sample(index + 1));
        if a.is_finite() && b.is_finite() {
            (b - a) / (2.0 * spacing)
        } else {
            0.0
        }
    }
}
