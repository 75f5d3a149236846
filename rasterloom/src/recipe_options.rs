//! Optional parameters of the recipe constructors.

use rasterloom_core::BandSchema;
use rasterloom_recipe::{DebugObserver, FootprintMapFn, MergeArraysFn, PoolSpec, TileSpec};
use rasterloom_source::SharedRasterSource;
use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Debug};
use std::sync::Arc;

/// Everything a recipe accepts beyond its required arguments; start from
/// [`RecipeOptions::default`] and override what differs.
///
/// # Example
/// ```
/// use rasterloom::RecipeOptions;
///
/// let options = RecipeOptions::default()
///     .with_cache_tiles(256, 256)
///     .with_overwrite(true);
/// ```
pub struct RecipeOptions {
	pub band_schema: Option<BandSchema>,
	pub sr: Option<String>,
	/// Defaults to chunk concatenation.
	pub merge_arrays: Option<MergeArraysFn>,
	/// Delete matching cache files before the scan.
	pub overwrite: bool,
	/// Upstream rasters by primitive name.
	pub primitives: BTreeMap<String, SharedRasterSource>,
	/// Per-primitive backpressure window of `queue_data` (default 8).
	pub queue_data_per_primitive: HashMap<String, usize>,
	/// Per-primitive footprint conversion (default identity).
	pub convert_footprint_per_primitive: HashMap<String, FootprintMapFn>,
	pub computation_pool: PoolSpec,
	pub merge_pool: PoolSpec,
	pub io_pool: PoolSpec,
	pub resample_pool: PoolSpec,
	pub cache_tiles: TileSpec,
	pub computation_tiles: Option<TileSpec>,
	pub max_resampling_size: Option<usize>,
	/// Cache fingerprint component; defaults to the compute closure's type
	/// name, which is unique per closure definition site.
	pub compute_id: Option<String>,
	/// Byte budget of the in-memory tile LRU of non-cached recipes.
	pub memory_budget: usize,
	pub debug_observers: Vec<Arc<dyn DebugObserver>>,
}

impl Default for RecipeOptions {
	fn default() -> Self {
		RecipeOptions {
			band_schema: None,
			sr: None,
			merge_arrays: None,
			overwrite: false,
			primitives: BTreeMap::new(),
			queue_data_per_primitive: HashMap::new(),
			convert_footprint_per_primitive: HashMap::new(),
			computation_pool: PoolSpec::named("cpu"),
			merge_pool: PoolSpec::named("cpu"),
			io_pool: PoolSpec::named("io"),
			resample_pool: PoolSpec::named("cpu"),
			cache_tiles: TileSpec::default(),
			computation_tiles: None,
			max_resampling_size: None,
			compute_id: None,
			memory_budget: 256 << 20,
			debug_observers: Vec::new(),
		}
	}
}

impl RecipeOptions {
	#[must_use]
	pub fn with_primitive(mut self, name: &str, source: SharedRasterSource) -> Self {
		self.primitives.insert(name.to_string(), source);
		self
	}

	#[must_use]
	pub fn with_cache_tiles(mut self, width: u32, height: u32) -> Self {
		self.cache_tiles = TileSpec::Shape(width, height);
		self
	}

	#[must_use]
	pub fn with_computation_tiles(mut self, width: u32, height: u32) -> Self {
		self.computation_tiles = Some(TileSpec::Shape(width, height));
		self
	}

	#[must_use]
	pub fn with_overwrite(mut self, overwrite: bool) -> Self {
		self.overwrite = overwrite;
		self
	}

	#[must_use]
	pub fn with_band_schema(mut self, schema: BandSchema) -> Self {
		self.band_schema = Some(schema);
		self
	}

	#[must_use]
	pub fn with_observer(mut self, observer: Arc<dyn DebugObserver>) -> Self {
		self.debug_observers.push(observer);
		self
	}
}

impl Debug for RecipeOptions {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RecipeOptions")
			.field("primitives", &self.primitives.keys().collect::<Vec<_>>())
			.field("cache_tiles", &self.cache_tiles)
			.field("overwrite", &self.overwrite)
			.finish()
	}
}
