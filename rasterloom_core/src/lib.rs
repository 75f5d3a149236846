//! Core value types of the rasterloom workspace.
//!
//! Contains the affine raster [`Footprint`] and its grid algebra, the closed
//! set of raster [`RasterDtype`]s and the [`RasterArray`] container, band
//! schemas, interpolation kernels, the remapping engine and chunk streams.

pub mod error;
pub use error::*;
pub mod remap;
pub use remap::*;
pub mod types;
pub use types::*;
