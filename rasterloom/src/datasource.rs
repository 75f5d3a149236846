//! The `DataSource` container: source registry and construction dispatch.
//!
//! A `DataSource` stores references to sources (rasters and vectors, file
//! backed, in-memory or computed) under unique keys, and owns the shared
//! machinery they run on: the spatial-reference frame, the driver activation
//! pool, the worker pool registry and the recipe scheduler. Closing the
//! container cascades over everything in a fixed order: scheduler drain,
//! pool join, source close.

use crate::{DataSourceConfig, DriverFactory, DriverRegistry, RasterCreation, RecipeOptions};
use anyhow::{Result, ensure};
use rasterloom_core::{BandSchema, ErrorKind, Footprint, RasterArray, RasterDtype};
use rasterloom_derive::context;
use rasterloom_recipe::{
	CachedRecipeRaster, ObserverSet, PoolRegistry, PrimitiveArray, RecipeParams, RecipeStorage, SchedulerHandle,
	WorkerPool, create_recipe,
};
use rasterloom_source::{
	Activatable, ActivationPool, Feature, FileRaster, FileVector, MemoryRaster, MemoryVector, OpenMode, RasterSource,
	SharedRasterSource, SharedVectorSource, SrFrame, SrRule, VectorSource,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};

enum SourceEntry {
	Raster(SharedRasterSource),
	Vector(SharedVectorSource),
}

#[derive(Default)]
struct RegistryState {
	closed: bool,
	keyed: HashMap<String, SourceEntry>,
	all_rasters: Vec<SharedRasterSource>,
	all_vectors: Vec<SharedVectorSource>,
	activatables: Vec<Arc<dyn Activatable>>,
}

struct Inner {
	sr_frame: SrFrame,
	allow_none_geometry: bool,
	allow_interpolation: bool,
	max_active: Option<usize>,
	activation: Arc<ActivationPool>,
	pools: PoolRegistry,
	drivers: parking_lot::RwLock<DriverRegistry>,
	scheduler: OnceLock<SchedulerHandle>,
	observers: ObserverSet,
	state: parking_lot::Mutex<RegistryState>,
}

/// The shared container of raster and vector sources.
///
/// # Example
/// ```no_run
/// use rasterloom::{DataSource, DataSourceConfig};
/// use rasterloom_source::{OpenMode, RasterSource};
///
/// # async fn example() -> anyhow::Result<()> {
/// let ds = DataSource::new(DataSourceConfig::default())?;
/// let dem = ds
///     .open_raster("dem", "/data/dem.loomgrid".as_ref(), "loomgrid", &[], OpenMode::Read)
///     .await?;
/// let array = dem.get_data(None, None, None, None).await?;
/// ds.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DataSource {
	inner: Arc<Inner>,
}

impl DataSource {
	/// Builds a container from its configuration.
	///
	/// # Errors
	/// `BadSrMode` for an illegal `sr_*` combination, `BadArgument` for
	/// `max_active = Some(0)`.
	#[context("creating data source")]
	pub fn new(config: DataSourceConfig) -> Result<DataSource> {
		let rule = SrRule::derive(config.sr_work, config.sr_fallback, config.sr_forced)?;
		let activation = ActivationPool::new(config.max_active)?;
		Ok(DataSource {
			inner: Arc::new(Inner {
				sr_frame: SrFrame {
					rule,
					converter: config.footprint_converter,
					analyse_transformation: config.analyse_transformation,
					significant_digits: config.significant_digits,
				},
				allow_none_geometry: config.allow_none_geometry,
				allow_interpolation: config.allow_interpolation,
				max_active: config.max_active,
				activation,
				pools: PoolRegistry::new(),
				drivers: parking_lot::RwLock::new(DriverRegistry::with_builtins()),
				scheduler: OnceLock::new(),
				observers: ObserverSet::new(config.debug_observers),
				state: parking_lot::Mutex::new(RegistryState::default()),
			}),
		})
	}

	fn check_open(&self) -> Result<()> {
		ensure!(!self.inner.state.lock().closed, ErrorKind::Closed);
		Ok(())
	}

	fn scheduler(&self) -> &SchedulerHandle {
		self.inner.scheduler.get_or_init(SchedulerHandle::spawn)
	}

	fn driver(&self, name: &str) -> Result<Arc<dyn DriverFactory>> {
		let drivers = self.inner.drivers.read();
		Ok(Arc::clone(drivers.get(name)?))
	}

	/// Makes an additional driver available to `open_*`/`create_*`.
	pub fn register_driver(&self, factory: Arc<dyn DriverFactory>) -> Result<()> {
		self.check_open()?;
		self.inner.drivers.write().register(factory);
		Ok(())
	}

	/// Makes a user worker pool available to recipes under its name.
	pub fn register_pool(&self, pool: Arc<WorkerPool>) -> Result<()> {
		self.check_open()?;
		self.inner.pools.register(pool)
	}

	// -------------------------------------------------------------------------
	// Registry
	// -------------------------------------------------------------------------

	fn validate_keys(state: &RegistryState, keys: &[&str]) -> Result<()> {
		for key in keys {
			ensure!(
				!key.is_empty(),
				ErrorKind::BadArgument("source keys must be non-empty".to_string())
			);
			ensure!(!state.keyed.contains_key(*key), ErrorKind::DuplicateKey((*key).to_string()));
		}
		Ok(())
	}

	/// Registers a raster source under zero or more keys (zero keys =
	/// anonymous; the source is still part of the close cascade).
	#[context("registering raster under {keys:?}")]
	pub fn register_raster(&self, keys: &[&str], source: SharedRasterSource) -> Result<()> {
		let mut state = self.inner.state.lock();
		ensure!(!state.closed, ErrorKind::Closed);
		Self::validate_keys(&state, keys)?;
		for key in keys {
			state.keyed.insert((*key).to_string(), SourceEntry::Raster(Arc::clone(&source)));
		}
		state.all_rasters.push(source);
		Ok(())
	}

	/// Registers a vector source under zero or more keys.
	#[context("registering vector under {keys:?}")]
	pub fn register_vector(&self, keys: &[&str], source: SharedVectorSource) -> Result<()> {
		let mut state = self.inner.state.lock();
		ensure!(!state.closed, ErrorKind::Closed);
		Self::validate_keys(&state, keys)?;
		for key in keys {
			state.keyed.insert((*key).to_string(), SourceEntry::Vector(Arc::clone(&source)));
		}
		state.all_vectors.push(source);
		Ok(())
	}

	/// Looks up a raster source by key.
	pub fn get_raster(&self, key: &str) -> Result<SharedRasterSource> {
		let state = self.inner.state.lock();
		ensure!(!state.closed, ErrorKind::Closed);
		match state.keyed.get(key) {
			Some(SourceEntry::Raster(source)) => Ok(Arc::clone(source)),
			Some(SourceEntry::Vector(_)) => {
				Err(ErrorKind::BadArgument(format!("'{key}' names a vector source")).into())
			}
			None => Err(ErrorKind::UnknownKey(key.to_string()).into()),
		}
	}

	/// Looks up a vector source by key.
	pub fn get_vector(&self, key: &str) -> Result<SharedVectorSource> {
		let state = self.inner.state.lock();
		ensure!(!state.closed, ErrorKind::Closed);
		match state.keyed.get(key) {
			Some(SourceEntry::Vector(source)) => Ok(Arc::clone(source)),
			Some(SourceEntry::Raster(_)) => {
				Err(ErrorKind::BadArgument(format!("'{key}' names a raster source")).into())
			}
			None => Err(ErrorKind::UnknownKey(key.to_string()).into()),
		}
	}

	#[must_use]
	pub fn contains_key(&self, key: &str) -> bool {
		self.inner.state.lock().keyed.contains_key(key)
	}

	/// Whether this exact source handle is registered (keyed or anonymous).
	#[must_use]
	pub fn contains_raster(&self, source: &SharedRasterSource) -> bool {
		let probe = Arc::as_ptr(source).cast::<()>();
		self
			.inner
			.state
			.lock()
			.all_rasters
			.iter()
			.any(|s| std::ptr::eq(Arc::as_ptr(s).cast::<()>(), probe))
	}

	/// Registered keys, unordered.
	#[must_use]
	pub fn keys(&self) -> Vec<String> {
		self.inner.state.lock().keyed.keys().cloned().collect()
	}

	/// Number of keyed sources.
	#[must_use]
	pub fn len(&self) -> usize {
		self.inner.state.lock().keyed.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Keyed raster sources, unordered.
	#[must_use]
	pub fn iter_rasters(&self) -> Vec<(String, SharedRasterSource)> {
		self
			.inner
			.state
			.lock()
			.keyed
			.iter()
			.filter_map(|(key, entry)| match entry {
				SourceEntry::Raster(source) => Some((key.clone(), Arc::clone(source))),
				SourceEntry::Vector(_) => None,
			})
			.collect()
	}

	// -------------------------------------------------------------------------
	// Raster construction dispatch
	// -------------------------------------------------------------------------

	async fn open_raster_impl(
		&self,
		path: &Path,
		driver: &str,
		options: &[String],
		mode: OpenMode,
	) -> Result<Arc<FileRaster>> {
		self.check_open()?;
		let factory = self.driver(driver)?;
		let allocator = factory.open_raster(path, options, mode)?;
		let raster = FileRaster::open(
			Arc::clone(&self.inner.activation),
			allocator,
			path,
			mode,
			&self.inner.sr_frame,
			self.inner.allow_interpolation,
		)
		.await?;
		self.inner.observers.object_allocated("file raster");
		Ok(Arc::new(raster))
	}

	fn finish_raster<S: RasterSource + Activatable + Clone + 'static>(
		&self,
		keys: &[&str],
		source: &Arc<S>,
	) -> Result<()> {
		self.register_raster(keys, Arc::clone(source) as SharedRasterSource)?;
		self.inner.state.lock().activatables.push(Arc::new((**source).clone()));
		Ok(())
	}

	/// Opens a raster file under `key`; only metadata stays in memory.
	pub async fn open_raster(
		&self,
		key: &str,
		path: &Path,
		driver: &str,
		options: &[String],
		mode: OpenMode,
	) -> Result<Arc<FileRaster>> {
		let raster = self.open_raster_impl(path, driver, options, mode).await?;
		self.finish_raster(&[key], &raster)?;
		Ok(raster)
	}

	/// Opens a raster file anonymously.
	pub async fn aopen_raster(
		&self,
		path: &Path,
		driver: &str,
		options: &[String],
		mode: OpenMode,
	) -> Result<Arc<FileRaster>> {
		let raster = self.open_raster_impl(path, driver, options, mode).await?;
		self.finish_raster(&[], &raster)?;
		Ok(raster)
	}

	#[allow(clippy::too_many_arguments)]
	async fn create_raster_impl(
		&self,
		path: &Path,
		fp: Footprint,
		dtype: RasterDtype,
		band_count: usize,
		band_schema: Option<BandSchema>,
		driver: &str,
		options: &[String],
		sr: Option<&str>,
	) -> Result<Arc<FileRaster>> {
		self.check_open()?;
		let band_schema = BandSchema::resolve(band_schema, band_count)?;
		let factory = self.driver(driver)?;
		// the footprint argument lives in the working frame; the file stores
		// its own frame
		let stored_fp = self.inner.sr_frame.from_work(&fp, sr)?;
		let allocator = factory.create_raster(&RasterCreation {
			path,
			fp: stored_fp,
			dtype,
			band_count,
			band_schema,
			sr,
			options,
		})?;
		let raster = FileRaster::open(
			Arc::clone(&self.inner.activation),
			allocator,
			path,
			OpenMode::Write,
			&self.inner.sr_frame,
			self.inner.allow_interpolation,
		)
		.await?;
		self.inner.observers.object_allocated("file raster");
		Ok(Arc::new(raster))
	}

	/// Creates a raster file and registers it under `key`.
	#[allow(clippy::too_many_arguments)]
	pub async fn create_raster(
		&self,
		key: &str,
		path: &Path,
		fp: Footprint,
		dtype: RasterDtype,
		band_count: usize,
		band_schema: Option<BandSchema>,
		driver: &str,
		options: &[String],
		sr: Option<&str>,
	) -> Result<Arc<FileRaster>> {
		let raster = self
			.create_raster_impl(path, fp, dtype, band_count, band_schema, driver, options, sr)
			.await?;
		self.finish_raster(&[key], &raster)?;
		Ok(raster)
	}

	/// Creates a raster file anonymously.
	#[allow(clippy::too_many_arguments)]
	pub async fn acreate_raster(
		&self,
		path: &Path,
		fp: Footprint,
		dtype: RasterDtype,
		band_count: usize,
		band_schema: Option<BandSchema>,
		driver: &str,
		options: &[String],
		sr: Option<&str>,
	) -> Result<Arc<FileRaster>> {
		let raster = self
			.create_raster_impl(path, fp, dtype, band_count, band_schema, driver, options, sr)
			.await?;
		self.finish_raster(&[], &raster)?;
		Ok(raster)
	}

	/// Wraps an in-memory array as a raster under `key`.
	pub fn wrap_array_raster(
		&self,
		key: &str,
		fp: Footprint,
		array: RasterArray,
		band_schema: Option<BandSchema>,
		sr: Option<String>,
		mode: OpenMode,
	) -> Result<Arc<MemoryRaster>> {
		self.check_open()?;
		let fp_work = self.inner.sr_frame.to_work(&fp, sr.as_deref())?;
		let raster = Arc::new(MemoryRaster::wrap(
			fp_work,
			array,
			band_schema,
			sr,
			mode,
			self.inner.allow_interpolation,
		)?);
		self.register_raster(&[key], Arc::clone(&raster) as SharedRasterSource)?;
		self.inner.observers.object_allocated("memory raster");
		Ok(raster)
	}

	/// Wraps an in-memory array anonymously.
	pub fn awrap_array_raster(
		&self,
		fp: Footprint,
		array: RasterArray,
		band_schema: Option<BandSchema>,
		sr: Option<String>,
		mode: OpenMode,
	) -> Result<Arc<MemoryRaster>> {
		self.check_open()?;
		let fp_work = self.inner.sr_frame.to_work(&fp, sr.as_deref())?;
		let raster = Arc::new(MemoryRaster::wrap(
			fp_work,
			array,
			band_schema,
			sr,
			mode,
			self.inner.allow_interpolation,
		)?);
		self.register_raster(&[], Arc::clone(&raster) as SharedRasterSource)?;
		Ok(raster)
	}

	// -------------------------------------------------------------------------
	// Vector construction dispatch
	// -------------------------------------------------------------------------

	async fn open_vector_impl(
		&self,
		path: &Path,
		driver: &str,
		options: &[String],
		mode: OpenMode,
	) -> Result<Arc<FileVector>> {
		self.check_open()?;
		let factory = self.driver(driver)?;
		let allocator = factory.open_vector(path, options, mode)?;
		let vector = FileVector::open(
			Arc::clone(&self.inner.activation),
			allocator,
			path,
			mode,
			self.inner.allow_none_geometry,
		)
		.await?;
		self.inner.observers.object_allocated("file vector");
		Ok(Arc::new(vector))
	}

	fn finish_vector(&self, keys: &[&str], vector: &Arc<FileVector>) -> Result<()> {
		self.register_vector(keys, Arc::clone(vector) as SharedVectorSource)?;
		self.inner.state.lock().activatables.push(Arc::new((**vector).clone()));
		Ok(())
	}

	/// Opens a vector file under `key`.
	pub async fn open_vector(
		&self,
		key: &str,
		path: &Path,
		driver: &str,
		options: &[String],
		mode: OpenMode,
	) -> Result<Arc<FileVector>> {
		let vector = self.open_vector_impl(path, driver, options, mode).await?;
		self.finish_vector(&[key], &vector)?;
		Ok(vector)
	}

	/// Opens a vector file anonymously.
	pub async fn aopen_vector(
		&self,
		path: &Path,
		driver: &str,
		options: &[String],
		mode: OpenMode,
	) -> Result<Arc<FileVector>> {
		let vector = self.open_vector_impl(path, driver, options, mode).await?;
		self.finish_vector(&[], &vector)?;
		Ok(vector)
	}

	async fn create_vector_impl(
		&self,
		path: &Path,
		driver: &str,
		options: &[String],
		sr: Option<&str>,
	) -> Result<Arc<FileVector>> {
		self.check_open()?;
		let factory = self.driver(driver)?;
		let allocator = factory.create_vector(path, sr, options)?;
		let vector = FileVector::open(
			Arc::clone(&self.inner.activation),
			allocator,
			path,
			OpenMode::Write,
			self.inner.allow_none_geometry,
		)
		.await?;
		self.inner.observers.object_allocated("file vector");
		Ok(Arc::new(vector))
	}

	/// Creates a vector file and registers it under `key`.
	pub async fn create_vector(
		&self,
		key: &str,
		path: &Path,
		driver: &str,
		options: &[String],
		sr: Option<&str>,
	) -> Result<Arc<FileVector>> {
		let vector = self.create_vector_impl(path, driver, options, sr).await?;
		self.finish_vector(&[key], &vector)?;
		Ok(vector)
	}

	/// Creates a vector file anonymously.
	pub async fn acreate_vector(
		&self,
		path: &Path,
		driver: &str,
		options: &[String],
		sr: Option<&str>,
	) -> Result<Arc<FileVector>> {
		let vector = self.create_vector_impl(path, driver, options, sr).await?;
		self.finish_vector(&[], &vector)?;
		Ok(vector)
	}

	/// Wraps a feature list as an in-memory vector under `key`.
	pub fn wrap_features(&self, key: &str, features: Vec<Feature>, sr: Option<String>) -> Result<Arc<MemoryVector>> {
		self.check_open()?;
		let vector = Arc::new(MemoryVector::new(features, sr, self.inner.allow_none_geometry));
		self.register_vector(&[key], Arc::clone(&vector) as SharedVectorSource)?;
		Ok(vector)
	}

	// -------------------------------------------------------------------------
	// Recipes
	// -------------------------------------------------------------------------

	async fn build_recipe(
		&self,
		fp: Footprint,
		dtype: RasterDtype,
		band_count: usize,
		options: RecipeOptions,
		compute_array: rasterloom_recipe::ComputeArrayFn,
		storage: RecipeStorage,
		compute_id: Option<String>,
	) -> Result<Arc<CachedRecipeRaster>> {
		let mut params = RecipeParams::new(fp, dtype, band_count, compute_array);
		params.band_schema = options.band_schema;
		params.sr = options.sr;
		params.compute_id = compute_id;
		params.merge_arrays = options.merge_arrays;
		params.primitives = options.primitives;
		params.queue_data_per_primitive = options.queue_data_per_primitive;
		params.convert_footprint_per_primitive = options.convert_footprint_per_primitive;
		params.computation_pool = self.inner.pools.resolve(&options.computation_pool)?;
		params.merge_pool = self.inner.pools.resolve(&options.merge_pool)?;
		params.io_pool = self.inner.pools.resolve(&options.io_pool)?;
		params.resample_pool = self.inner.pools.resolve(&options.resample_pool)?;
		params.cache_tiles = options.cache_tiles;
		params.computation_tiles = options.computation_tiles;
		params.max_resampling_size = options.max_resampling_size;
		params.observers = self.inner.observers.merged_with(&options.debug_observers);
		params.allow_interpolation = self.inner.allow_interpolation;

		let recipe = create_recipe(self.scheduler(), params, storage).await?;
		Ok(Arc::new(recipe))
	}

	/// Creates a cached raster recipe under `key`: a computed raster whose
	/// tiles are produced on demand and persisted to `cache_dir`.
	#[allow(clippy::too_many_arguments)]
	pub async fn create_cached_raster_recipe<F>(
		&self,
		key: &str,
		fp: Footprint,
		dtype: RasterDtype,
		band_count: usize,
		cache_dir: &Path,
		options: RecipeOptions,
		compute_array: F,
	) -> Result<Arc<CachedRecipeRaster>>
	where
		F: Fn(&Footprint, &[PrimitiveArray]) -> Result<RasterArray> + Send + Sync + 'static,
	{
		self.check_open()?;
		ensure!(!self.contains_key(key), ErrorKind::DuplicateKey(key.to_string()));
		let compute_id = Some(
			options
				.compute_id
				.clone()
				.unwrap_or_else(|| std::any::type_name::<F>().to_string()),
		);
		let storage = RecipeStorage::Disk {
			cache_dir: cache_dir.to_path_buf(),
			overwrite: options.overwrite,
		};
		let recipe = self
			.build_recipe(fp, dtype, band_count, options, Arc::new(compute_array), storage, compute_id)
			.await?;
		self.register_raster(&[key], Arc::clone(&recipe) as SharedRasterSource)?;
		Ok(recipe)
	}

	/// Creates a cached raster recipe anonymously.
	#[allow(clippy::too_many_arguments)]
	pub async fn acreate_cached_raster_recipe<F>(
		&self,
		fp: Footprint,
		dtype: RasterDtype,
		band_count: usize,
		cache_dir: &Path,
		options: RecipeOptions,
		compute_array: F,
	) -> Result<Arc<CachedRecipeRaster>>
	where
		F: Fn(&Footprint, &[PrimitiveArray]) -> Result<RasterArray> + Send + Sync + 'static,
	{
		self.check_open()?;
		let compute_id = Some(
			options
				.compute_id
				.clone()
				.unwrap_or_else(|| std::any::type_name::<F>().to_string()),
		);
		let storage = RecipeStorage::Disk {
			cache_dir: cache_dir.to_path_buf(),
			overwrite: options.overwrite,
		};
		let recipe = self
			.build_recipe(fp, dtype, band_count, options, Arc::new(compute_array), storage, compute_id)
			.await?;
		self.register_raster(&[], Arc::clone(&recipe) as SharedRasterSource)?;
		Ok(recipe)
	}

	/// Creates a non-cached raster recipe under `key`: same engine, but
	/// computed tiles live in a byte-budget in-memory LRU instead of a cache
	/// directory.
	pub async fn create_raster_recipe<F>(
		&self,
		key: &str,
		fp: Footprint,
		dtype: RasterDtype,
		band_count: usize,
		options: RecipeOptions,
		compute_array: F,
	) -> Result<Arc<CachedRecipeRaster>>
	where
		F: Fn(&Footprint, &[PrimitiveArray]) -> Result<RasterArray> + Send + Sync + 'static,
	{
		self.check_open()?;
		ensure!(!self.contains_key(key), ErrorKind::DuplicateKey(key.to_string()));
		let storage = RecipeStorage::Memory {
			byte_budget: options.memory_budget,
		};
		let recipe = self
			.build_recipe(fp, dtype, band_count, options, Arc::new(compute_array), storage, None)
			.await?;
		self.register_raster(&[key], Arc::clone(&recipe) as SharedRasterSource)?;
		Ok(recipe)
	}

	// -------------------------------------------------------------------------
	// Activation
	// -------------------------------------------------------------------------

	/// Activates every activatable source; on return all of them are live.
	///
	/// # Errors
	/// `TooMany` when the container holds more activatable sources than
	/// `max_active`.
	pub async fn activate_all(&self) -> Result<()> {
		self.check_open()?;
		let activatables: Vec<Arc<dyn Activatable>> = self.inner.state.lock().activatables.clone();
		if let Some(max) = self.inner.max_active {
			ensure!(
				activatables.len() <= max,
				ErrorKind::TooMany {
					requested: activatables.len(),
					max_active: max,
				}
			);
		}
		for source in activatables {
			source.activate().await?;
		}
		Ok(())
	}

	/// Deactivates every live driver, waiting for outstanding leases.
	pub async fn deactivate_all(&self) {
		self.inner.activation.deactivate_all().await;
	}

	/// Number of live native drivers.
	#[must_use]
	pub fn active_count(&self) -> usize {
		self.inner.activation.active_count()
	}

	// -------------------------------------------------------------------------
	// Close
	// -------------------------------------------------------------------------

	/// Closes the container: drains the scheduler, joins the worker pools,
	/// then closes every registered source (keyed and anonymous).
	///
	/// Every subsequent operation, including a second `close`, fails with
	/// [`ErrorKind::Closed`].
	#[context("closing data source")]
	pub async fn close(&self) -> Result<()> {
		let (rasters, vectors) = {
			let mut state = self.inner.state.lock();
			ensure!(!state.closed, ErrorKind::Closed);
			state.closed = true;
			state.keyed.clear();
			state.activatables.clear();
			(
				std::mem::take(&mut state.all_rasters),
				std::mem::take(&mut state.all_vectors),
			)
		};

		if let Some(scheduler) = self.inner.scheduler.get() {
			scheduler.close().await;
		}
		self.inner.pools.join_all().await;

		for raster in rasters {
			if let Err(err) = raster.close().await {
				log::warn!("closing raster source failed: {err:#}");
			}
		}
		for vector in vectors {
			if let Err(err) = vector.close().await {
				log::warn!("closing vector source failed: {err:#}");
			}
		}
		self.inner.activation.deactivate_all().await;
		self.inner.observers.close();
		Ok(())
	}
}

impl std::fmt::Debug for DataSource {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let state = self.inner.state.lock();
		f.debug_struct("DataSource")
			.field("keys", &state.keyed.len())
			.field("closed", &state.closed)
			.field("active_drivers", &self.inner.activation.active_count())
			.finish()
	}
}
