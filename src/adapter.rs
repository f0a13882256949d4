//! Component-external narrow adapter (§6): this crate owns no file
//! format, CLI, or wire protocol. Hosts that do own a per-slice image
//! container implement [`SliceSource`]/[`SliceSink`] to marshal data in
//! and out of a [`Volume`].

use crate::error::{RegistrationError, Result};
use crate::geometry::Vec3;
use crate::volume::{Geometry, Volume, VoxelScalar};

/// One slice's scalar data plus the geometry this crate needs, as
/// exposed by an external per-slice image container.
pub trait SliceImage {
    fn rows(&self) -> usize;
    fn columns(&self) -> usize;
    fn channels(&self) -> usize;
    fn pxl_dx(&self) -> f64;
    fn pxl_dy(&self) -> f64;
    fn pxl_dz(&self) -> f64;
    fn anchor(&self) -> Vec3;
    fn offset(&self) -> Vec3;
    fn row_unit(&self) -> Vec3;
    fn col_unit(&self) -> Vec3;
    /// World-space center of this slice, used to sort slices along
    /// `ortho_unit` ascending before building a [`Volume`].
    fn center(&self) -> Vec3;
    fn value(&self, r: usize, c: usize, k: usize) -> f32;
}

/// An external, ordered collection of per-slice images.
pub trait SliceSource {
    type Image: SliceImage;

    fn slices(&self) -> &[Self::Image];
}

/// Sink for writing a [`Volume`] back out slice-by-slice. Implementors
/// decide how (or whether) to preserve per-slice metadata across the
/// round trip; this crate neither requires nor interprets it.
pub trait SliceSink {
    fn write_slice(&mut self, index: usize, rows: usize, cols: usize, channels: usize, data: &[f32]) -> Result<()>;
}

/// Builds a `Volume<f32>` from an external adapter, sorting slices by
/// world center along the derived `ortho_unit` ascending.
pub fn from_adapter<S: SliceSource>(source: &S) -> Result<Volume<f32>> {
    let slices = source.slices();
    if slices.is_empty() {
        return Err(RegistrationError::EmptyInput(
            "adapter exposed zero slices".into(),
        ));
    }

    let first = &slices[0];
    let geometry = Geometry {
        pxl_dx: first.pxl_dx(),
        pxl_dy: first.pxl_dy(),
        pxl_dz: first.pxl_dz(),
        anchor: first.anchor(),
        offset: Vec3::ZERO,
        row_unit: first.row_unit(),
        col_unit: first.col_unit(),
    };
    let ortho = geometry.ortho_unit();
    let (n_rows, n_cols, n_channels) = (first.rows(), first.columns(), first.channels());

    let mut order: Vec<usize> = (0..slices.len()).collect();
    order.sort_by(|&a, &b| {
        slices[a]
            .center()
            .dot(ortho)
            .partial_cmp(&slices[b].center().dot(ortho))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut slice_offsets = Vec::with_capacity(slices.len());
    let mut data = Vec::with_capacity(slices.len() * n_rows * n_cols * n_channels);
    for &idx in &order {
        let image = &slices[idx];
        if image.rows() != n_rows || image.columns() != n_cols || image.channels() != n_channels
        {
            return Err(RegistrationError::ShapeMismatch(format!(
                "slice {idx} has shape ({}, {}, {}), expected ({n_rows}, {n_cols}, {n_channels})",
                image.rows(),
                image.columns(),
                image.channels()
            )));
        }
        slice_offsets.push(image.offset());
        for r in 0..n_rows {
            for c in 0..n_cols {
                for k in 0..n_channels {
                    data.push(image.value(r, c, k));
                }
            }
        }
    }

    Volume::from_data(
        slices.len(),
        n_rows,
        n_cols,
        n_channels,
        geometry,
        slice_offsets,
        data,
    )
}

/// Writes a `Volume`'s data back out through an external sink, one slice
/// at a time. A shape mismatch between `volume` and what the sink
/// expects is fatal, per §6.
pub fn to_adapter<T: VoxelScalar, K: SliceSink>(volume: &Volume<T>, sink: &mut K) -> Result<()> {
    let (n_slices, n_rows, n_cols, n_channels) = volume.shape();
    let mut scratch = vec![0.0_f32; n_rows * n_cols * n_channels];
    for s in 0..n_slices {
        for r in 0..n_rows {
            for c in 0..n_cols {
                for k in 0..n_channels {
                    scratch[(r * n_cols + c) * n_channels + k] =
                        volume.value_unchecked(s, r, c, k).to_f64() as f32;
                }
            }
        }
        sink.write_slice(s, n_rows, n_cols, n_channels, &scratch)?;
    }
    Ok(())
}
