//! Component A: the voxel buffer.
//!
//! [`Volume<T>`] owns one contiguous, row-major 3D (optionally
//! multi-channel) array plus the spatial metadata needed to map a voxel
//! index to a world position and back. Every other component in this
//! crate (gradient, warp, resample, histogram, demons) operates on
//! `Volume` values rather than touching raw slices directly.

mod interpolate;
mod parallel;
mod smooth;

use crate::error::{RegistrationError, Result};
use crate::geometry::Vec3;

/// Scalar types storable in a [`Volume`]. Implemented for `f32`
/// (intensities) and `f64` (displacements, gradients, kernels).
pub trait VoxelScalar: Copy + Send + Sync + PartialEq + 'static {
    fn to_f64(self) -> f64;
    fn from_f64(v: f64) -> Self;
    fn is_finite(self) -> bool;
    fn nan() -> Self;
    fn zero() -> Self;
}

impl VoxelScalar for f32 {
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn from_f64(v: f64) -> Self {
        v as f32
    }
    fn is_finite(self) -> bool {
        f32::is_finite(self)
    }
    fn nan() -> Self {
        f32::NAN
    }
    fn zero() -> Self {
        0.0
    }
}

impl VoxelScalar for f64 {
    fn to_f64(self) -> f64 {
        self
    }
    fn from_f64(v: f64) -> Self {
        v
    }
    fn is_finite(self) -> bool {
        f64::is_finite(self)
    }
    fn nan() -> Self {
        f64::NAN
    }
    fn zero() -> Self {
        0.0
    }
}

/// The rectilinear-grid spatial metadata shared by every voxel in a
/// [`Volume`].
#[derive(Debug, Clone, Copy)]
pub struct Geometry {
    pub pxl_dx: f64,
    pub pxl_dy: f64,
    pub pxl_dz: f64,
    pub anchor: Vec3,
    pub offset: Vec3,
    pub row_unit: Vec3,
    pub col_unit: Vec3,
}

impl Geometry {
    /// `ortho_unit = row_unit x col_unit`, unit length. Derived, never
    /// stored, so it can never drift out of sync with the basis vectors.
    pub fn ortho_unit(&self) -> Vec3 {
        self.row_unit.cross(self.col_unit).unit()
    }

    fn validate(&self) -> Result<()> {
        if !(self.pxl_dx > 0.0 && self.pxl_dy > 0.0 && self.pxl_dz > 0.0) {
            return Err(RegistrationError::InvalidGeometry(
                "pixel spacings must all be positive".into(),
            ));
        }
        let row_len = self.row_unit.length();
        let col_len = self.col_unit.length();
        if row_len <= f64::EPSILON || col_len <= f64::EPSILON {
            return Err(RegistrationError::InvalidGeometry(
                "row_unit/col_unit must be non-degenerate".into(),
            ));
        }
        let cosine = self.row_unit.unit().dot(self.col_unit.unit());
        if cosine.abs() > 1e-6 {
            return Err(RegistrationError::InvalidGeometry(format!(
                "row_unit and col_unit are not orthogonal (cosine = {cosine})"
            )));
        }
        Ok(())
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Geometry {
            pxl_dx: 1.0,
            pxl_dy: 1.0,
            pxl_dz: 1.0,
            anchor: Vec3::ZERO,
            offset: Vec3::ZERO,
            row_unit: Vec3::new(1.0, 0.0, 0.0),
            col_unit: Vec3::new(0.0, 1.0, 0.0),
        }
    }
}

/// A contiguous, spatially-aware, channel-aware 3D voxel buffer.
///
/// Storage is dense row-major in order `(slice, row, col, channel)`, with
/// channel innermost so a whole per-voxel vector (e.g. a displacement
/// triple) loads as one contiguous run.
#[derive(Debug, Clone)]
pub struct Volume<T: VoxelScalar> {
    n_slices: usize,
    n_rows: usize,
    n_cols: usize,
    n_channels: usize,
    geometry: Geometry,
    slice_offsets: Vec<Vec3>,
    data: Vec<T>,
}

impl<T: VoxelScalar> Volume<T> {
    /// Allocates a zero-filled volume with uniform slice spacing along
    /// `ortho_unit`: `slice_offsets[s] = offset + ortho_unit * (s * pxl_dz)`.
    pub fn new(
        n_slices: usize,
        n_rows: usize,
        n_cols: usize,
        n_channels: usize,
        geometry: Geometry,
    ) -> Result<Self> {
        geometry.validate()?;
        if n_slices == 0 || n_rows == 0 || n_cols == 0 || n_channels == 0 {
            return Err(RegistrationError::EmptyInput(format!(
                "volume shape ({n_slices}, {n_rows}, {n_cols}, {n_channels}) has a zero dimension"
            )));
        }
        let ortho = geometry.ortho_unit();
        let slice_offsets = (0..n_slices)
            .map(|s| geometry.offset + ortho.scale(s as f64 * geometry.pxl_dz))
            .collect();
        Ok(Volume {
            n_slices,
            n_rows,
            n_cols,
            n_channels,
            geometry,
            slice_offsets,
            data: vec![T::zero(); n_slices * n_rows * n_cols * n_channels],
        })
    }

    /// Allocates a zero-filled volume with explicit per-slice offsets, for
    /// grids whose slice spacing is not uniform (but still rectilinear).
    pub fn with_slice_offsets(
        n_rows: usize,
        n_cols: usize,
        n_channels: usize,
        geometry: Geometry,
        slice_offsets: Vec<Vec3>,
    ) -> Result<Self> {
        geometry.validate()?;
        let n_slices = slice_offsets.len();
        if n_slices == 0 || n_rows == 0 || n_cols == 0 || n_channels == 0 {
            return Err(RegistrationError::EmptyInput(format!(
                "volume shape ({n_slices}, {n_rows}, {n_cols}, {n_channels}) has a zero dimension"
            )));
        }
        Ok(Volume {
            n_slices,
            n_rows,
            n_cols,
            n_channels,
            geometry,
            slice_offsets,
            data: vec![T::zero(); n_slices * n_rows * n_cols * n_channels],
        })
    }

    /// Builds a volume from already-packed data, validating that its
    /// length matches the declared shape. Used by the adapter
    /// marshalling code and by tests that want literal fixtures.
    pub fn from_data(
        n_slices: usize,
        n_rows: usize,
        n_cols: usize,
        n_channels: usize,
        geometry: Geometry,
        slice_offsets: Vec<Vec3>,
        data: Vec<T>,
    ) -> Result<Self> {
        geometry.validate()?;
        if slice_offsets.len() != n_slices {
            return Err(RegistrationError::ShapeMismatch(format!(
                "slice_offsets.len() ({}) != n_slices ({n_slices})",
                slice_offsets.len()
            )));
        }
        let expected = n_slices * n_rows * n_cols * n_channels;
        if data.len() != expected {
            return Err(RegistrationError::ShapeMismatch(format!(
                "data.len() ({}) != n_slices*n_rows*n_cols*n_channels ({expected})",
                data.len()
            )));
        }
        Ok(Volume {
            n_slices,
            n_rows,
            n_cols,
            n_channels,
            geometry,
            slice_offsets,
            data,
        })
    }

    pub fn n_slices(&self) -> usize {
        self.n_slices
    }
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }
    pub fn n_cols(&self) -> usize {
        self.n_cols
    }
    pub fn n_channels(&self) -> usize {
        self.n_channels
    }
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }
    pub fn slice_offsets(&self) -> &[Vec3] {
        &self.slice_offsets
    }
    pub fn data(&self) -> &[T] {
        &self.data
    }
    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn shape(&self) -> (usize, usize, usize, usize) {
        (self.n_slices, self.n_rows, self.n_cols, self.n_channels)
    }

    /// Pure bounds predicate over voxel (not channel) coordinates.
    pub fn in_bounds(&self, s: i64, r: i64, c: i64) -> bool {
        s >= 0
            && r >= 0
            && c >= 0
            && (s as usize) < self.n_slices
            && (r as usize) < self.n_rows
            && (c as usize) < self.n_cols
    }

    fn out_of_bounds_err(&self, s: i64, r: i64, c: i64, k: i64) -> RegistrationError {
        RegistrationError::OutOfBounds {
            slice: s,
            row: r,
            col: c,
            channel: k,
            n_slices: self.n_slices as i64,
            n_rows: self.n_rows as i64,
            n_cols: self.n_cols as i64,
            n_channels: self.n_channels as i64,
        }
    }

    /// O(1) linear index for (slice, row, col, channel). Returns
    /// `OutOfBounds` for any coordinate outside the buffer.
    pub fn index(&self, s: i64, r: i64, c: i64, k: i64) -> Result<usize> {
        if !self.in_bounds(s, r, c) || k < 0 || (k as usize) >= self.n_channels {
            return Err(self.out_of_bounds_err(s, r, c, k));
        }
        Ok(self.index_unchecked(s as usize, r as usize, c as usize, k as usize))
    }

    /// Unchecked flat-index computation for hot loops that have already
    /// established bounds (e.g. by construction from `0..n_slices`).
    #[inline]
    pub fn index_unchecked(&self, s: usize, r: usize, c: usize, k: usize) -> usize {
        ((s * self.n_rows + r) * self.n_cols + c) * self.n_channels + k
    }

    /// Reads channel `k` (default 0) at (s, r, c).
    pub fn value(&self, s: i64, r: i64, c: i64, k: i64) -> Result<T> {
        Ok(self.data[self.index(s, r, c, k)?])
    }

    /// Writes channel `k` (default 0) at (s, r, c).
    pub fn reference(&mut self, s: i64, r: i64, c: i64, k: i64) -> Result<&mut T> {
        let idx = self.index(s, r, c, k)?;
        Ok(&mut self.data[idx])
    }

    #[inline]
    pub fn value_unchecked(&self, s: usize, r: usize, c: usize, k: usize) -> T {
        self.data[self.index_unchecked(s, r, c, k)]
    }

    #[inline]
    pub fn set_unchecked(&mut self, s: usize, r: usize, c: usize, k: usize, v: T) {
        let idx = self.index_unchecked(s, r, c, k);
        self.data[idx] = v;
    }

    /// World position of a voxel's center:
    /// `anchor + slice_offsets[s] + row_unit*(pxl_dx*(col+0.5)) + col_unit*(pxl_dy*(row+0.5))`.
    pub fn position(&self, s: usize, r: usize, c: usize) -> Vec3 {
        self.geometry.anchor
            + self.slice_offsets[s]
            + self.geometry.row_unit.scale(self.geometry.pxl_dx * (c as f64 + 0.5))
            + self.geometry.col_unit.scale(self.geometry.pxl_dy * (r as f64 + 0.5))
    }

    /// Sequential visitation in (slice, row, col) order. `f` receives the
    /// coordinates and the current value and returns the new value.
    pub fn visit_all(&mut self, mut f: impl FnMut(usize, usize, usize, usize, T) -> T) {
        for s in 0..self.n_slices {
            for r in 0..self.n_rows {
                for c in 0..self.n_cols {
                    for k in 0..self.n_channels {
                        let idx = self.index_unchecked(s, r, c, k);
                        self.data[idx] = f(s, r, c, k, self.data[idx]);
                    }
                }
            }
        }
    }

    /// Sequential visitation of a single slice, in (row, col) order.
    pub fn visit_slice_xy(
        &mut self,
        s: usize,
        mut f: impl FnMut(usize, usize, usize, T) -> T,
    ) {
        for r in 0..self.n_rows {
            for c in 0..self.n_cols {
                for k in 0..self.n_channels {
                    let idx = self.index_unchecked(s, r, c, k);
                    self.data[idx] = f(r, c, k, self.data[idx]);
                }
            }
        }
    }

    /// Elementwise addition used by additive demons integration:
    /// `self := self + other`.
    pub fn add_assign(&mut self, other: &Volume<T>) -> Result<()> {
        if self.shape() != other.shape() {
            return Err(RegistrationError::ShapeMismatch(format!(
                "add_assign shape mismatch: {:?} vs {:?}",
                self.shape(),
                other.shape()
            )));
        }
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a = T::from_f64(a.to_f64() + b.to_f64());
        }
        Ok(())
    }
}
