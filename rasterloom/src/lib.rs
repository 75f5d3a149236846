//! Rasterloom: a geospatial raster/vector orchestration library.
//!
//! Register sources (files, in-memory arrays, computed rasters) in a
//! [`DataSource`] and query rectangular windows in one working coordinate
//! frame. The heart of the library is the cached raster recipe engine: see
//! [`DataSource::create_cached_raster_recipe`] and the `rasterloom_recipe`
//! crate.

pub mod config;
pub use config::*;
pub mod datasource;
pub use datasource::*;
pub mod drivers;
pub use drivers::*;
pub mod recipe_options;
pub use recipe_options::*;

pub use rasterloom_core::{
	BandFields, BandSchema, BoundaryEffect, ByteCache, Chunk, ChunkStream, ErrorKind, Footprint, Interpolation,
	MaskKind, MaskMode, RasterArray, RasterDtype, concat_chunks, remap,
};
pub use rasterloom_recipe::{
	CachedRecipeRaster, DebugObserver, PoolSpec, PrimitiveArray, QueryAdmitEvent, TaskEvent, TaskKind, TileSpec,
	TileState, TileStateEvent, WorkerPool,
};
pub use rasterloom_source::{
	Activatable, Feature, FileRaster, FileVector, FootprintConverter, MemoryRaster, MemoryVector, OpenMode,
	RasterDriver, RasterDriverInfo, RasterSource, SharedRasterSource, SharedVectorSource, SrRule, VectorDriver,
	VectorSource,
};
