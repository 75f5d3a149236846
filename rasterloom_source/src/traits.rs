//! The object-safe source traits shared by every registered variant.

use anyhow::{Result, bail, ensure};
use async_trait::async_trait;
use futures::future::BoxFuture;
use rasterloom_core::{
	BandSchema, BoundaryEffect, Chunk, ChunkStream, DEFAULT_QUEUE_SIZE, ErrorKind, Footprint, Interpolation,
	RasterArray, RasterDtype,
};
use std::fmt::Debug;
use std::sync::Arc;

/// Side chunk length used when a large read is streamed piece by piece.
pub const STREAM_TILE_SIZE: u32 = 512;

/// Common read interface of every raster variant: file-backed, memory-backed,
/// array-wrapping and computed (recipes).
///
/// All footprints are expressed in the container's working frame. `bands` is
/// a 0-based selection (`None` = all bands); `dst_nodata` defaults to the
/// schema's nodata (or 0). Writes are only available on sources opened in
/// write mode.
#[async_trait]
pub trait RasterSource: Debug + Send + Sync {
	/// Geometry in the working frame.
	fn footprint(&self) -> &Footprint;

	fn dtype(&self) -> RasterDtype;

	fn band_count(&self) -> usize;

	fn band_schema(&self) -> &BandSchema;

	/// Spatial reference found in the storage, if any.
	fn sr_stored(&self) -> Option<&str> {
		None
	}

	fn writable(&self) -> bool {
		false
	}

	/// Reads a window. `fp = None` reads the full footprint; windows beyond
	/// the raster are filled with `dst_nodata`.
	async fn get_data(
		&self,
		fp: Option<&Footprint>,
		bands: Option<&[usize]>,
		dst_nodata: Option<f64>,
		interpolation: Option<Interpolation>,
	) -> Result<RasterArray>;

	/// Writes `array` (living on `fp`) into the source. Read-only sources
	/// reject this.
	async fn set_data(
		&self,
		_fp: &Footprint,
		_array: &RasterArray,
		_bands: Option<&[usize]>,
		_interpolation: Option<Interpolation>,
	) -> Result<()> {
		bail!(ErrorKind::BadArgument("source is not writable".to_string()))
	}

	/// Sets every pixel of the selected bands to `value`.
	async fn fill(&self, _value: f64, _bands: Option<&[usize]>) -> Result<()> {
		bail!(ErrorKind::BadArgument("source is not writable".to_string()))
	}

	/// Streams a window as a bounded, lazy sequence of chunks (see
	/// [`ChunkStream`]); the producer suspends once `max_queue_size` chunks
	/// are undelivered.
	async fn queue_data(
		&self,
		fp: &Footprint,
		bands: Option<&[usize]>,
		dst_nodata: Option<f64>,
		interpolation: Option<Interpolation>,
		max_queue_size: Option<usize>,
	) -> Result<ChunkStream>;

	/// Deletes the underlying dataset (file-backed, writable sources).
	async fn delete(&self) -> Result<()> {
		bail!(ErrorKind::BadArgument("source cannot be deleted".to_string()))
	}

	/// Upstream sources this one computes from; non-empty only for recipes.
	/// Creation-time cycle detection walks this graph.
	fn primitive_sources(&self) -> Vec<Arc<dyn RasterSource>> {
		Vec::new()
	}

	/// Releases the source's resources. Called by the registry close cascade;
	/// idempotent.
	async fn close(&self) -> Result<()> {
		Ok(())
	}
}

/// Sources whose native handle lives in the activation pool.
#[async_trait]
pub trait Activatable: Send + Sync {
	async fn activate(&self) -> Result<()>;
	async fn deactivate(&self);
	fn is_active(&self) -> bool;
}

/// Resolves a band selection against a source's band count.
pub fn resolve_bands(bands: Option<&[usize]>, band_count: usize) -> Result<Vec<usize>> {
	match bands {
		None => Ok((0..band_count).collect()),
		Some(selection) => {
			ensure!(
				!selection.is_empty(),
				ErrorKind::BadArgument("band selection is empty".to_string())
			);
			for &b in selection {
				ensure!(
					b < band_count,
					ErrorKind::BadArgument(format!("band index {b} out of range (raster has {band_count} bands)"))
				);
			}
			Ok(selection.to_vec())
		}
	}
}

/// The `dst_nodata` a read uses when the caller does not pass one.
#[must_use]
pub fn default_dst_nodata(dst_nodata: Option<f64>, schema: &BandSchema) -> f64 {
	dst_nodata.or_else(|| schema.shared_nodata()).unwrap_or(0.0)
}

/// Default `queue_data` implementation: tiles the window into
/// [`STREAM_TILE_SIZE`]² chunks and produces them through a bounded channel,
/// reading each chunk via `read_chunk`.
pub fn stream_in_tiles(
	fp: &Footprint,
	max_queue_size: Option<usize>,
	read_chunk: impl Fn(Footprint) -> BoxFuture<'static, Result<RasterArray>> + Send + 'static,
) -> Result<ChunkStream> {
	let tiles = fp.tile((STREAM_TILE_SIZE, STREAM_TILE_SIZE), (0, 0), BoundaryEffect::Shrink)?;
	let (tx, stream) = ChunkStream::channel(max_queue_size.unwrap_or(DEFAULT_QUEUE_SIZE));

	tokio::spawn(async move {
		for tile in tiles.into_iter().flatten() {
			match read_chunk(tile).await {
				Ok(array) => {
					if !tx.send(tile, array).await {
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

/// Drains a chunk stream and reassembles the full window; convenience used
/// by tests and by consumers that need the whole array anyway.
pub async fn collect_stream(fp: &Footprint, stream: ChunkStream) -> Result<RasterArray> {
	let chunks: Vec<Chunk> = stream.collect_all().await?;
	rasterloom_core::concat_chunks(fp, &chunks)
}

/// Shared handle to a raster source, as stored in registries and primitive
/// bindings.
pub type SharedRasterSource = Arc<dyn RasterSource>;
