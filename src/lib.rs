//! # demons-registration
//!
//! A 3D deformable (Demons) image-registration engine: voxel buffers,
//! trilinear sampling, separable Gaussian convolution, and an iterative
//! nonrigid registration driver.
//!
//! ## Features
//!
//! - A channel-innermost [`Volume`] buffer over a rectilinear grid
//! - Trilinear/bilinear interpolation with out-of-bounds sentinels
//! - Separable Gaussian smoothing, NaN- and range-aware
//! - Central-difference gradients and displacement-field warping
//! - Grid resampling and percentile-clipped histogram matching
//! - The additive and diffeomorphic Demons iteration in [`demons::register`]
//! - A narrow [`adapter`] seam for hosts that own their own per-slice
//!   image container
//!
//! ## Usage
//!
//! ```no_run
//! use demons_registration::{register, DemonsParams, Volume, Geometry};
//!
//! let fixed = Volume::<f32>::new(4, 16, 16, 1, Geometry::default()).unwrap();
//! let moving = fixed.clone();
//! let field = register(&DemonsParams::default(), &moving, &fixed);
//! ```

pub mod adapter;
pub mod demons;
pub mod error;
pub mod geometry;
pub mod gradient;
pub mod histogram;
pub mod resample;
pub mod volume;
pub mod warp;

pub use demons::{register, DemonsParams};
pub use error::{RegistrationError, Result};
pub use geometry::Vec3;
pub use gradient::gradient;
pub use histogram::histogram_match;
pub use resample::resample_to;
pub use volume::{Geometry, Volume, VoxelScalar};
pub use warp::warp;
