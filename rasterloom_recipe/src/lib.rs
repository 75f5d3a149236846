//! The cached raster recipe engine.
//!
//! A *recipe* defines a raster whose pixels are computed on demand from zero
//! or more upstream rasters (its *primitives*). Queries are decomposed into
//! aligned cache tiles; missing tiles are produced once (even across
//! concurrent, overlapping queries), persisted atomically, and read back to
//! assemble each query's output. The [`Scheduler`] actor owns all graph
//! state; [`WorkerPool`]s carry the compute, merge, I/O and resampling work.

pub mod cache_index;
pub use cache_index::*;
pub mod fingerprint;
pub use fingerprint::*;
pub mod observer;
pub use observer::*;
pub mod pools;
pub use pools::*;
pub mod recipe;
pub use recipe::*;
pub mod scheduler;
pub use scheduler::*;
pub mod tile_file;
pub use tile_file::*;
