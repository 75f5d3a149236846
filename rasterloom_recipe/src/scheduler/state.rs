//! Recipe definitions and the scheduler-owned runtime state.

use crate::{ObserverSet, PoolHandle, TileGrid};
use anyhow::Result;
use rasterloom_core::{BandSchema, ByteCache, Chunk, Footprint, RasterArray, RasterDtype};
use rasterloom_source::SharedRasterSource;
use std::fmt::{self, Debug};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::oneshot;

pub type RecipeId = u64;
pub type QueryId = u64;

/// The user-supplied computation: primitives in, one array on the
/// computation footprint out.
pub type ComputeArrayFn = Arc<dyn Fn(&Footprint, &[PrimitiveArray]) -> Result<RasterArray> + Send + Sync>;

/// Merges the chunks one primitive delivered into a single array on the
/// requested footprint. Defaults to
/// [`concat_chunks`](rasterloom_core::concat_chunks).
pub type MergeArraysFn = Arc<dyn Fn(&Footprint, &[Chunk]) -> Result<RasterArray> + Send + Sync>;

/// Maps a computation footprint into the frame a primitive is queried in.
pub type FootprintMapFn = Arc<dyn Fn(&Footprint) -> Footprint + Send + Sync>;

/// One primitive's contribution to a computation, as handed to
/// `compute_array`.
#[derive(Clone, Debug)]
pub struct PrimitiveArray {
	pub name: String,
	pub fp: Footprint,
	pub array: RasterArray,
}

/// One primitive binding of a recipe.
#[derive(Clone)]
pub struct PrimitiveBinding {
	pub name: String,
	pub source: SharedRasterSource,
	pub convert_footprint: FootprintMapFn,
	/// Backpressure window of this edge's `queue_data`.
	pub queue_size: usize,
}

impl Debug for PrimitiveBinding {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PrimitiveBinding")
			.field("name", &self.name)
			.field("queue_size", &self.queue_size)
			.finish()
	}
}

/// Everything immutable about one recipe, shared between the scheduler and
/// its worker tasks.
pub struct RecipeDef {
	pub fp: Footprint,
	pub dtype: RasterDtype,
	pub band_count: usize,
	pub band_schema: BandSchema,
	pub sr: Option<String>,
	pub compute_array: ComputeArrayFn,
	pub merge_arrays: MergeArraysFn,
	/// Sorted by name; primitive results keep this order.
	pub primitives: Vec<PrimitiveBinding>,
	pub computation_pool: PoolHandle,
	pub merge_pool: PoolHandle,
	pub io_pool: PoolHandle,
	pub resample_pool: PoolHandle,
	pub max_resampling_size: Option<usize>,
	pub observers: ObserverSet,
}

impl Debug for RecipeDef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RecipeDef")
			.field("fp", &self.fp)
			.field("dtype", &self.dtype)
			.field("band_count", &self.band_count)
			.field("primitives", &self.primitives)
			.finish()
	}
}

/// Where computed cache tiles live.
pub enum TileStore {
	/// One file per tile in the cache directory, atomic rename discipline.
	Disk { paths: Vec<PathBuf> },
	/// A byte-budget LRU of computed tiles; nothing persists.
	Memory { cache: ByteCache<usize, RasterArray> },
}

impl TileStore {
	/// The on-disk path of a tile, for disk stores.
	#[must_use]
	pub fn path_of(&self, tile: usize) -> Option<PathBuf> {
		match self {
			TileStore::Disk { paths } => paths.get(tile).cloned(),
			TileStore::Memory { .. } => None,
		}
	}
}

impl Debug for TileStore {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			TileStore::Disk { paths } => write!(f, "TileStore::Disk({} tiles)", paths.len()),
			TileStore::Memory { cache } => write!(f, "TileStore::Memory({} cached)", cache.len()),
		}
	}
}

/// A prepared recipe, ready for registration with the scheduler.
#[derive(Debug)]
pub struct RecipeSetup {
	pub def: Arc<RecipeDef>,
	pub grid: TileGrid,
	/// Computation tiles, flattened row-major.
	pub comp_tiles: Vec<Footprint>,
	/// For each cache tile, the index of its producing computation tile
	/// (lowest row-major index containing it).
	pub comp_of_tile: Vec<usize>,
	pub store: TileStore,
	/// Tiles already present on disk after the cache scan.
	pub ready: Vec<bool>,
}

/// Per-cache-tile state, owned by the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
	Missing,
	Building,
	Ready,
}

/// Scheduler-owned mutable state of one recipe.
pub(crate) struct RecipeRuntime {
	pub def: Arc<RecipeDef>,
	pub grid: TileGrid,
	pub comp_tiles: Vec<Footprint>,
	pub comp_of_tile: Vec<usize>,
	pub states: Vec<SlotState>,
	pub subscribers: Vec<Vec<QueryId>>,
	pub store: TileStore,
	/// Queries currently open on this recipe.
	pub in_flight: usize,
}

impl RecipeRuntime {
	pub fn new(setup: RecipeSetup) -> RecipeRuntime {
		let states = setup
			.ready
			.iter()
			.map(|&ready| if ready { SlotState::Ready } else { SlotState::Missing })
			.collect();
		RecipeRuntime {
			def: setup.def,
			subscribers: vec![Vec::new(); setup.grid.len()],
			grid: setup.grid,
			comp_tiles: setup.comp_tiles,
			comp_of_tile: setup.comp_of_tile,
			states,
			store: setup.store,
			in_flight: 0,
		}
	}
}

/// One in-flight query.
pub(crate) struct QueryState {
	pub recipe: RecipeId,
	pub fp: Footprint,
	pub bands: Vec<usize>,
	pub dst: Option<RasterArray>,
	pub remaining: usize,
	pub reply: Option<oneshot::Sender<Result<RasterArray>>>,
}
