//! Component C: the field-based image warper.

use crate::error::{RegistrationError, Result};
use crate::volume::Volume;

/// Warps a scalar image through a 3-channel displacement field, sampling
/// `image` at `p + d(p)` for every output voxel's world position `p`.
///
/// The lookup is two-step: `field` is sampled first (defaulting to zero
/// displacement outside its domain, since the field may not cover the
/// whole world), then `image` is sampled at the deformed position using
/// `oob` as its own out-of-bounds sentinel.
pub fn warp(image: &Volume<f32>, field: &Volume<f64>, oob: f32) -> Result<Volume<f32>> {
    if field.n_channels() != 3 {
        return Err(RegistrationError::ShapeMismatch(format!(
            "displacement field must have 3 channels, got {}",
            field.n_channels()
        )));
    }
    let mut warped = image.clone();
    let (n_rows, n_cols) = (image.n_rows(), image.n_cols());

    warped.parallel_visit_slices(|s, chunk| {
        for r in 0..n_rows {
            for c in 0..n_cols {
                let p = image.position(s, r, c);
                let dx = field.trilinear_interpolate(p, 0, 0.0);
                let dy = field.trilinear_interpolate(p, 1, 0.0);
                let dz = field.trilinear_interpolate(p, 2, 0.0);
                let deformed = crate::geometry::Vec3::new(p.x + dx, p.y + dy, p.z + dz);
                let value = image.trilinear_interpolate(deformed, 0, oob);
                chunk[r * n_cols + c] = value;
            }
        }
    });

    Ok(warped)
}
