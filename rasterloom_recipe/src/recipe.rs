//! Recipe construction and the computed raster sources.
//!
//! [`RecipeParams`] gathers everything a recipe needs; [`create_recipe`]
//! validates it (tilings, primitive bindings, cycle detection), prepares the
//! tile store (on-disk cache tiles or an in-memory byte-budget LRU) and
//! registers the recipe with the scheduler. The returned
//! [`CachedRecipeRaster`] is an ordinary read-only [`RasterSource`]: queries
//! on the recipe grid go straight to the scheduler, off-grid queries are
//! answered via an on-grid sampling query plus one resampling pass.

use crate::{
	CacheTileIndex, ComputeArrayFn, FootprintMapFn, MergeArraysFn, ObserverSet, PoolHandle, PrimitiveBinding,
	RecipeDef, RecipeId, RecipeSetup, SchedulerHandle, TileGrid, TileStore, recipe_fingerprint,
};
use anyhow::{Result, ensure};
use async_trait::async_trait;
use rasterloom_core::{
	BandSchema, BoundaryEffect, ByteCache, Chunk, ChunkStream, DEFAULT_QUEUE_SIZE, ErrorKind, Footprint, Interpolation,
	MaskMode, RasterArray, RasterDtype, concat_chunks, remap,
};
use rasterloom_derive::context;
use rasterloom_source::{RasterSource, SharedRasterSource, default_dst_nodata, resolve_bands};
use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Debug};
use std::path::PathBuf;
use std::sync::Arc;

/// A tiling given either as a tile shape (applied with
/// [`BoundaryEffect::Shrink`]) or as an explicit grid of footprints.
#[derive(Clone, Debug)]
pub enum TileSpec {
	Shape(u32, u32),
	Explicit(Vec<Vec<Footprint>>),
}

impl Default for TileSpec {
	fn default() -> Self {
		TileSpec::Shape(512, 512)
	}
}

impl TileSpec {
	fn to_tiling(&self, fp: &Footprint) -> Result<Vec<Vec<Footprint>>> {
		match self {
			TileSpec::Shape(w, h) => fp.tile((*w, *h), (0, 0), BoundaryEffect::Shrink),
			TileSpec::Explicit(tiling) => Ok(tiling.clone()),
		}
	}
}

/// Where a recipe keeps its computed tiles.
#[derive(Clone, Debug)]
pub enum RecipeStorage {
	/// Fingerprinted tile files under `cache_dir`; `overwrite` deletes
	/// matching files before the scan.
	Disk { cache_dir: PathBuf, overwrite: bool },
	/// A byte-budget in-memory LRU of computed tiles; nothing persists.
	Memory { byte_budget: usize },
}

/// Parameters of a recipe; start from [`RecipeParams::new`] and override
/// what differs from the defaults.
pub struct RecipeParams {
	pub fp: Footprint,
	pub dtype: RasterDtype,
	pub band_count: usize,
	pub band_schema: Option<BandSchema>,
	pub sr: Option<String>,
	pub compute_array: ComputeArrayFn,
	/// Identity of the computation, part of the cache fingerprint. The
	/// registry fills this from the compute closure's type name when unset.
	pub compute_id: Option<String>,
	pub merge_arrays: Option<MergeArraysFn>,
	pub primitives: BTreeMap<String, SharedRasterSource>,
	pub queue_data_per_primitive: HashMap<String, usize>,
	pub convert_footprint_per_primitive: HashMap<String, FootprintMapFn>,
	pub computation_pool: PoolHandle,
	pub merge_pool: PoolHandle,
	pub io_pool: PoolHandle,
	pub resample_pool: PoolHandle,
	pub cache_tiles: TileSpec,
	/// Defaults to the cache tiling. Computation tiles may overlap and may
	/// overhang the raster; every cache tile must be contained in one.
	pub computation_tiles: Option<TileSpec>,
	pub max_resampling_size: Option<usize>,
	pub observers: ObserverSet,
	pub allow_interpolation: bool,
}

impl RecipeParams {
	#[must_use]
	pub fn new(fp: Footprint, dtype: RasterDtype, band_count: usize, compute_array: ComputeArrayFn) -> RecipeParams {
		RecipeParams {
			fp,
			dtype,
			band_count,
			band_schema: None,
			sr: None,
			compute_array,
			compute_id: None,
			merge_arrays: None,
			primitives: BTreeMap::new(),
			queue_data_per_primitive: HashMap::new(),
			convert_footprint_per_primitive: HashMap::new(),
			computation_pool: PoolHandle::Inline,
			merge_pool: PoolHandle::Inline,
			io_pool: PoolHandle::Inline,
			resample_pool: PoolHandle::Inline,
			cache_tiles: TileSpec::default(),
			computation_tiles: None,
			max_resampling_size: None,
			observers: ObserverSet::default(),
			allow_interpolation: false,
		}
	}
}

impl Debug for RecipeParams {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RecipeParams")
			.field("fp", &self.fp)
			.field("dtype", &self.dtype)
			.field("band_count", &self.band_count)
			.field("primitives", &self.primitives.keys().collect::<Vec<_>>())
			.finish()
	}
}

/// Fails with `BadArgument` when the primitive graph reaches back into
/// itself (possible with user-implemented sources).
fn detect_primitive_cycle(primitives: &[SharedRasterSource]) -> Result<()> {
	fn visit(source: &SharedRasterSource, stack: &mut Vec<*const ()>) -> Result<()> {
		let ptr = Arc::as_ptr(source).cast::<()>();
		ensure!(
			!stack.contains(&ptr),
			ErrorKind::BadArgument("primitive cycle: a recipe transitively consumes itself".to_string())
		);
		stack.push(ptr);
		for upstream in source.primitive_sources() {
			visit(&upstream, stack)?;
		}
		stack.pop();
		Ok(())
	}

	let mut stack = Vec::new();
	for source in primitives {
		visit(source, &mut stack)?;
	}
	Ok(())
}

/// Validates the parameters, prepares the tile store and registers the
/// recipe with the scheduler.
#[context("creating raster recipe")]
pub async fn create_recipe(
	scheduler: &SchedulerHandle,
	mut params: RecipeParams,
	storage: RecipeStorage,
) -> Result<CachedRecipeRaster> {
	ensure!(
		params.band_count >= 1,
		ErrorKind::BadArgument("band count must be >= 1".to_string())
	);
	let band_schema = BandSchema::resolve(params.band_schema.take(), params.band_count)?;

	for name in params
		.queue_data_per_primitive
		.keys()
		.chain(params.convert_footprint_per_primitive.keys())
	{
		ensure!(
			params.primitives.contains_key(name),
			ErrorKind::BadArgument(format!("'{name}' is not a primitive of this recipe"))
		);
	}
	for (name, queue_size) in &params.queue_data_per_primitive {
		ensure!(
			*queue_size >= 1,
			ErrorKind::BadArgument(format!("queue size of primitive '{name}' must be >= 1"))
		);
	}

	let upstream: Vec<SharedRasterSource> = params.primitives.values().cloned().collect();
	detect_primitive_cycle(&upstream)?;

	// cache tiling
	let cache_tiling = params.cache_tiles.to_tiling(&params.fp)?;
	let grid = TileGrid::new(params.fp, &cache_tiling)?;

	// computation tiling; defaults to the cache tiling
	let comp_tiles: Vec<Footprint> = match &params.computation_tiles {
		None => grid.iter().copied().collect(),
		Some(spec) => spec.to_tiling(&params.fp)?.into_iter().flatten().collect(),
	};
	ensure!(
		!comp_tiles.is_empty(),
		ErrorKind::BadTiling("computation tiling is empty".to_string())
	);
	for comp in &comp_tiles {
		ensure!(
			comp.same_grid(&params.fp),
			ErrorKind::BadTiling(format!("computation tile {comp:?} is not on the raster grid"))
		);
	}
	// lowest row-major computation tile containing each cache tile
	let comp_of_tile: Vec<usize> = grid
		.iter()
		.map(|tile| {
			comp_tiles
				.iter()
				.position(|comp| comp.contains_same_grid(tile))
				.ok_or_else(|| {
					anyhow::Error::from(ErrorKind::BadTiling(format!(
						"cache tile {tile:?} is not contained in any computation tile"
					)))
				})
		})
		.collect::<Result<_>>()?;

	// tile store
	let (store, ready) = match &storage {
		RecipeStorage::Disk { cache_dir, overwrite } => {
			let compute_id = params.compute_id.as_deref().ok_or_else(|| {
				ErrorKind::BadArgument("a cached recipe needs a compute_id to fingerprint its cache".to_string())
			})?;
			let fingerprint = recipe_fingerprint(
				&params.fp,
				&cache_tiling,
				params.dtype,
				params.band_count,
				&band_schema,
				params.sr.as_deref(),
				compute_id,
			);
			let index = CacheTileIndex::build(
				cache_dir,
				&grid,
				fingerprint,
				params.dtype,
				params.band_count,
				&band_schema,
				*overwrite,
			)?;
			let ready: Vec<bool> = index.tiles.iter().map(|t| t.ready).collect();
			let paths: Vec<PathBuf> = index.tiles.into_iter().map(|t| t.path).collect();
			(TileStore::Disk { paths }, ready)
		}
		RecipeStorage::Memory { byte_budget } => (
			TileStore::Memory {
				cache: ByteCache::with_byte_budget(*byte_budget)?,
			},
			vec![false; grid.len()],
		),
	};

	// primitive bindings, sorted by name
	let identity: FootprintMapFn = Arc::new(|fp: &Footprint| *fp);
	let primitives: Vec<PrimitiveBinding> = params
		.primitives
		.iter()
		.map(|(name, source)| PrimitiveBinding {
			name: name.clone(),
			source: Arc::clone(source),
			convert_footprint: params
				.convert_footprint_per_primitive
				.get(name)
				.cloned()
				.unwrap_or_else(|| Arc::clone(&identity)),
			queue_size: params
				.queue_data_per_primitive
				.get(name)
				.copied()
				.unwrap_or(DEFAULT_QUEUE_SIZE),
		})
		.collect();

	let def = Arc::new(RecipeDef {
		fp: params.fp,
		dtype: params.dtype,
		band_count: params.band_count,
		band_schema,
		sr: params.sr.clone(),
		compute_array: params.compute_array,
		merge_arrays: params
			.merge_arrays
			.unwrap_or_else(|| Arc::new(|fp: &Footprint, chunks: &[Chunk]| concat_chunks(fp, chunks))),
		primitives,
		computation_pool: params.computation_pool,
		merge_pool: params.merge_pool,
		io_pool: params.io_pool,
		resample_pool: params.resample_pool,
		max_resampling_size: params.max_resampling_size,
		observers: params.observers,
	});

	let recipe_id = scheduler
		.register(RecipeSetup {
			def: Arc::clone(&def),
			grid: grid.clone(),
			comp_tiles,
			comp_of_tile,
			store,
			ready,
		})
		.await?;

	Ok(CachedRecipeRaster {
		state: Arc::new(RecipeSourceState {
			recipe_id,
			scheduler: scheduler.clone(),
			def,
			grid,
			upstream,
			allow_interpolation: params.allow_interpolation,
		}),
	})
}

struct RecipeSourceState {
	recipe_id: RecipeId,
	scheduler: SchedulerHandle,
	def: Arc<RecipeDef>,
	grid: TileGrid,
	upstream: Vec<SharedRasterSource>,
	allow_interpolation: bool,
}

/// A computed raster: read-only, lazily evaluated, cache-backed.
#[derive(Clone)]
pub struct CachedRecipeRaster {
	state: Arc<RecipeSourceState>,
}

impl CachedRecipeRaster {
	/// Evicts every cached tile; fails while queries are in flight.
	pub async fn invalidate_cache(&self) -> Result<()> {
		self.state.scheduler.invalidate(self.state.recipe_id).await
	}

	/// Off-grid access resamples; kernels beyond nearest need the container's
	/// `allow_interpolation` flag.
	fn check_grid(&self, fp: &Footprint, interpolation: Interpolation) -> Result<()> {
		ensure!(
			fp.same_grid(&self.state.def.fp)
				|| interpolation == Interpolation::Nearest
				|| self.state.allow_interpolation,
			ErrorKind::BadArgument(format!(
				"footprint is off the recipe's grid and {interpolation} resampling is not allowed \
				 (pass allow_interpolation=true to the data source)"
			))
		);
		Ok(())
	}

	/// Off-grid reads: answer an on-grid sampling query, then resample onto
	/// the requested footprint on the resample pool, tiled to honor
	/// `max_resampling_size`.
	async fn get_data_resampled(
		&self,
		fp: &Footprint,
		bands: &[usize],
		dst_nodata: f64,
		interpolation: Interpolation,
	) -> Result<RasterArray> {
		let def = &self.state.def;
		let out_shape = (fp.ry() as usize, fp.rx() as usize, bands.len());
		let Some(sampling) = def.fp.build_sampling_footprint(fp, interpolation)? else {
			return Ok(RasterArray::filled(def.dtype, out_shape, dst_nodata));
		};

		let inner = Arc::new(
			self
				.state
				.scheduler
				.query(self.state.recipe_id, sampling, bands.to_vec(), dst_nodata)
				.await?,
		);
		let src_nodata = def.band_schema.shared_nodata();

		let chunk_fps: Vec<Footprint> = match def.max_resampling_size {
			Some(limit) if fp.pixel_count() > limit => {
				let side = (limit as f64).sqrt().floor().max(1.0) as u32;
				fp.tile((side, side), (0, 0), BoundaryEffect::Shrink)?
					.into_iter()
					.flatten()
					.collect()
			}
			_ => vec![*fp],
		};

		let mut out = RasterArray::filled(def.dtype, out_shape, dst_nodata);
		for chunk_fp in chunk_fps {
			let inner = Arc::clone(&inner);
			let remapped = def
				.resample_pool
				.run(move || {
					remap(
						&sampling,
						&chunk_fp,
						&inner,
						src_nodata,
						dst_nodata,
						MaskMode::Erode,
						interpolation,
						None,
					)
				})
				.await?;
			let (rows, cols) = chunk_fp.slice_in(fp)?;
			out.copy_window_from(&remapped, rows.start, cols.start)?;
		}
		Ok(out)
	}
}

#[async_trait]
impl RasterSource for CachedRecipeRaster {
	fn footprint(&self) -> &Footprint {
		&self.state.def.fp
	}

	fn dtype(&self) -> RasterDtype {
		self.state.def.dtype
	}

	fn band_count(&self) -> usize {
		self.state.def.band_count
	}

	fn band_schema(&self) -> &BandSchema {
		&self.state.def.band_schema
	}

	fn sr_stored(&self) -> Option<&str> {
		self.state.def.sr.as_deref()
	}

	async fn get_data(
		&self,
		fp: Option<&Footprint>,
		bands: Option<&[usize]>,
		dst_nodata: Option<f64>,
		interpolation: Option<Interpolation>,
	) -> Result<RasterArray> {
		let def = &self.state.def;
		let fp = fp.copied().unwrap_or(def.fp);
		let bands = resolve_bands(bands, def.band_count)?;
		let dst_nodata = default_dst_nodata(dst_nodata, &def.band_schema);
		let interpolation = interpolation.unwrap_or_default();
		self.check_grid(&fp, interpolation)?;

		if fp.same_grid(&def.fp) {
			self
				.state
				.scheduler
				.query(self.state.recipe_id, fp, bands, dst_nodata)
				.await
		} else {
			self.get_data_resampled(&fp, &bands, dst_nodata, interpolation).await
		}
	}

	/// Streams the window chunked along the cache tiling, so repeated
	/// streams of the same region stay cache-friendly.
	async fn queue_data(
		&self,
		fp: &Footprint,
		bands: Option<&[usize]>,
		dst_nodata: Option<f64>,
		interpolation: Option<Interpolation>,
		max_queue_size: Option<usize>,
	) -> Result<ChunkStream> {
		self.check_grid(fp, interpolation.unwrap_or_default())?;
		let chunk_fps: Vec<Footprint> = if fp.same_grid(&self.state.def.fp) {
			self
				.state
				.grid
				.tiles_intersecting(fp)?
				.into_iter()
				.map(|index| self.state.grid.tile(index).intersection(fp))
				.collect::<Result<_>>()?
		} else {
			vec![*fp]
		};

		let this = self.clone();
		let bands = bands.map(<[usize]>::to_vec);
		let (tx, stream) = ChunkStream::channel(max_queue_size.unwrap_or(DEFAULT_QUEUE_SIZE));
		tokio::spawn(async move {
			for chunk_fp in chunk_fps {
				match this
					.get_data(Some(&chunk_fp), bands.as_deref(), dst_nodata, interpolation)
					.await
				{
					Ok(array) => {
						if !tx.send(chunk_fp, array).await {
							return;
						}
					}
					Err(err) => {
						tx.fail(err).await;
						return;
					}
				}
			}
		});
		Ok(stream)
	}

	fn primitive_sources(&self) -> Vec<SharedRasterSource> {
		self.state.upstream.clone()
	}
}

impl Debug for CachedRecipeRaster {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CachedRecipeRaster")
			.field("recipe_id", &self.state.recipe_id)
			.field("fp", &self.state.def.fp)
			.field("dtype", &self.state.def.dtype)
			.field("primitives", &self.state.upstream.len())
			.finish()
	}
}
