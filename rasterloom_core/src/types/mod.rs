//! Core data types: footprints, dtypes, arrays, band schemas, interpolation
//! kernels, chunk streams and the byte-budget cache.

mod band_schema;
mod byte_cache;
mod chunk_stream;
mod concat;
mod dtype;
mod footprint;
mod interpolation;
mod raster_array;

pub use band_schema::*;
pub use byte_cache::*;
pub use chunk_stream::*;
pub use concat::*;
pub use dtype::*;
pub use footprint::*;
pub use interpolation::*;
pub use raster_array::*;
