//! Raster and vector source types.
//!
//! A *source* is anything registered in a data source container: file-backed
//! rasters leasing native driver handles from the [`ActivationPool`],
//! in-memory array wrappers, vectors, and (in `rasterloom_recipe`) computed
//! rasters. All variants implement [`RasterSource`] or [`VectorSource`].

pub mod activation;
pub use activation::*;
pub mod drivers;
pub use drivers::*;
pub mod raster;
pub use raster::*;
pub mod sr;
pub use sr::*;
pub mod traits;
pub use traits::*;
pub mod vector;
pub use vector::*;
