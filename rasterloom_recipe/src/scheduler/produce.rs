//! The produce task: primitives → merge → compute → persist.
//!
//! Runs as a detached tokio task per claimed computation tile. Every failure
//! along the way is posted back as one `ProduceFailed` message; tiles already
//! persisted before the failure stay valid.

use crate::scheduler::{Msg, RecipeId};
use crate::{PrimitiveArray, PrimitiveBinding, RecipeDef, write_tile_atomic};
use anyhow::{Context, Result, ensure};
use rasterloom_core::{Chunk, Footprint, RasterArray};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// One cache tile claimed by a produce run.
pub(crate) struct ClaimedTile {
	pub index: usize,
	pub fp: Footprint,
	/// `None` for memory-backed stores.
	pub path: Option<PathBuf>,
}

pub(crate) struct ProduceJob {
	pub recipe: RecipeId,
	pub def: Arc<RecipeDef>,
	pub comp_fp: Footprint,
	pub claimed: Vec<ClaimedTile>,
	pub tx: UnboundedSender<Msg>,
}

pub(crate) async fn run_produce(job: ProduceJob) {
	let tiles: Vec<usize> = job.claimed.iter().map(|t| t.index).collect();
	if let Err(err) = produce(&job).await {
		let _ = job.tx.send(Msg::ProduceFailed {
			recipe: job.recipe,
			tiles,
			error: format!("{err:#}"),
		});
	}
}

async fn produce(job: &ProduceJob) -> Result<()> {
	let def = &job.def;

	// 1. Pull every primitive through its converted footprint, in stable
	//    name order.
	let mut primitive_arrays = Vec::with_capacity(def.primitives.len());
	for primitive in &def.primitives {
		let converted = (primitive.convert_footprint)(&job.comp_fp);
		let array = collect_primitive(def, primitive, &converted)
			.await
			.with_context(|| format!("collecting primitive '{}'", primitive.name))?;
		primitive_arrays.push(PrimitiveArray {
			name: primitive.name.clone(),
			fp: converted,
			array,
		});
	}

	// 2. Compute the whole computation tile on the computation pool.
	let compute = Arc::clone(&def.compute_array);
	let comp_fp = job.comp_fp;
	let result = def
		.computation_pool
		.run(move || compute(&comp_fp, &primitive_arrays))
		.await
		.context("compute_array failed")?;
	ensure!(
		result.dtype() == def.dtype,
		"compute_array returned dtype {}, the recipe declares {}",
		result.dtype(),
		def.dtype
	);
	ensure!(
		result.shape() == (comp_fp.ry() as usize, comp_fp.rx() as usize, def.band_count),
		"compute_array returned {result:?} for a {}x{}x{} computation tile",
		comp_fp.ry(),
		comp_fp.rx(),
		def.band_count
	);

	// 3. Slice and persist each claimed cache tile; notify after the rename.
	for tile in &job.claimed {
		let (rows, cols) = tile.fp.slice_in(&job.comp_fp)?;
		let slice = result.slice_window(rows, cols)?;
		let array = match &tile.path {
			Some(path) => {
				let path = path.clone();
				let fp = tile.fp;
				let schema = def.band_schema.clone();
				let sr = def.sr.clone();
				def
					.io_pool
					.run(move || write_tile_atomic(&path, &fp, &schema, sr.as_deref(), &slice))
					.await?;
				None
			}
			None => Some(slice),
		};
		let _ = job.tx.send(Msg::TileBuilt {
			recipe: job.recipe,
			tile: tile.index,
			array,
		});
	}
	Ok(())
}

/// Streams one primitive and merges its chunks into a single array on the
/// converted footprint.
async fn collect_primitive(def: &RecipeDef, binding: &PrimitiveBinding, converted: &Footprint) -> Result<RasterArray> {
	let stream = binding
		.source
		.queue_data(converted, None, None, None, Some(binding.queue_size))
		.await?;
	let mut chunks: Vec<Chunk> = stream.collect_all().await?;

	// stable sub-result order: (top, left) in the converted frame
	chunks.sort_by_key(|(fp, _)| converted.offset_of(fp).map(|(col, row)| (row, col)).unwrap_or((i64::MAX, i64::MAX)));

	if chunks.len() == 1 && chunks[0].0 == *converted {
		return Ok(chunks.pop().expect("one chunk is present").1);
	}
	let merge = Arc::clone(&def.merge_arrays);
	let target = *converted;
	def.merge_pool.run(move || merge(&target, &chunks)).await
}
