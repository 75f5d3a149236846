//! The driver registry: driver names to allocator factories.
//!
//! Native format drivers are external collaborators; the registry only maps
//! a driver name (as passed to `open_raster` and friends) to a factory that
//! builds allocator closures for the activation pool. The built-in
//! `loomgrid` driver reads and writes the workspace's own single-file
//! formats and doubles as the reference implementation of the seam.

mod loomgrid;

pub use loomgrid::{LOOMGRID, LoomgridDriver};

use anyhow::Result;
use rasterloom_core::{BandSchema, Footprint, RasterDtype};
use rasterloom_source::{DriverAllocator, OpenMode};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Everything needed to create a new raster dataset.
pub struct RasterCreation<'a> {
	pub path: &'a Path,
	pub fp: Footprint,
	pub dtype: RasterDtype,
	pub band_count: usize,
	pub band_schema: BandSchema,
	pub sr: Option<&'a str>,
	pub options: &'a [String],
}

/// A named driver: builds allocators for opening and creating datasets.
pub trait DriverFactory: Send + Sync {
	fn name(&self) -> &str;

	/// Allocator re-opening an existing raster dataset; invoked by the
	/// activation pool on every (re-)activation.
	fn open_raster(&self, path: &Path, options: &[String], mode: OpenMode) -> Result<DriverAllocator>;

	/// Creates the raster dataset on storage, then returns an allocator
	/// opening it writable.
	fn create_raster(&self, creation: &RasterCreation) -> Result<DriverAllocator>;

	/// Allocator re-opening an existing vector dataset.
	fn open_vector(&self, path: &Path, options: &[String], mode: OpenMode) -> Result<DriverAllocator>;

	/// Creates an empty vector dataset, then returns a writable allocator.
	fn create_vector(&self, path: &Path, sr: Option<&str>, options: &[String]) -> Result<DriverAllocator>;
}

/// Driver-name lookup used by the construction dispatch.
pub struct DriverRegistry {
	factories: HashMap<String, Arc<dyn DriverFactory>>,
}

impl DriverRegistry {
	/// A registry holding the built-in `loomgrid` driver.
	#[must_use]
	pub fn with_builtins() -> DriverRegistry {
		let mut registry = DriverRegistry {
			factories: HashMap::new(),
		};
		registry.register(Arc::new(LoomgridDriver));
		registry
	}

	/// Registers (or replaces) a driver under its name.
	pub fn register(&mut self, factory: Arc<dyn DriverFactory>) {
		self.factories.insert(factory.name().to_string(), factory);
	}

	pub fn get(&self, name: &str) -> Result<&Arc<dyn DriverFactory>> {
		self.factories.get(name).ok_or_else(|| {
			rasterloom_core::ErrorKind::BadArgument(format!("unknown driver '{name}'")).into()
		})
	}
}

impl std::fmt::Debug for DriverRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let names: Vec<&String> = self.factories.keys().collect();
		f.debug_struct("DriverRegistry").field("drivers", &names).finish()
	}
}
