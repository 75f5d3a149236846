//! The array-wrapping in-memory raster source.

use crate::{OpenMode, RasterSource, default_dst_nodata, resolve_bands, stream_in_tiles};
use anyhow::{Result, ensure};
use async_trait::async_trait;
use parking_lot::RwLock;
use rasterloom_core::{
	BandSchema, ChunkStream, ErrorKind, Footprint, Interpolation, MaskMode, RasterArray, RasterDtype, remap,
};
use rasterloom_derive::context;
use std::fmt::{self, Debug};
use std::sync::Arc;

struct MemoryState {
	fp: Footprint,
	dtype: RasterDtype,
	band_schema: BandSchema,
	sr: Option<String>,
	mode: OpenMode,
	allow_interpolation: bool,
	data: RwLock<RasterArray>,
}

/// A raster wrapping a caller-supplied array; the trivial leaf source.
///
/// Reads and writes go straight to the wrapped array under a read/write
/// lock. Created writable by default.
#[derive(Clone)]
pub struct MemoryRaster {
	state: Arc<MemoryState>,
}

impl MemoryRaster {
	/// Wraps `array` as a raster living on `fp`.
	#[context("wrapping an array as a raster on {fp:?}")]
	pub fn wrap(
		fp: Footprint,
		array: RasterArray,
		band_schema: Option<BandSchema>,
		sr: Option<String>,
		mode: OpenMode,
		allow_interpolation: bool,
	) -> Result<MemoryRaster> {
		let (rows, cols, bands) = array.shape();
		ensure!(
			(rows, cols) == fp.shape(),
			ErrorKind::BadArgument(format!("array {array:?} does not match the footprint {fp:?}"))
		);
		ensure!(bands >= 1, ErrorKind::BadArgument("band count must be >= 1".to_string()));
		let band_schema = band_schema.unwrap_or_else(|| BandSchema::all_default(bands));
		band_schema.validate(bands)?;

		Ok(MemoryRaster {
			state: Arc::new(MemoryState {
				fp,
				dtype: array.dtype(),
				band_schema,
				sr,
				mode,
				allow_interpolation,
				data: RwLock::new(array),
			}),
		})
	}

	/// Off-grid access resamples; kernels beyond nearest need the container's
	/// `allow_interpolation` flag.
	fn check_grid(&self, fp: &Footprint, interpolation: Interpolation) -> Result<()> {
		ensure!(
			fp.same_grid(&self.state.fp)
				|| interpolation == Interpolation::Nearest
				|| self.state.allow_interpolation,
			ErrorKind::BadArgument(format!(
				"footprint is off the raster's grid and {interpolation} resampling is not allowed \
				 (pass allow_interpolation=true to the data source)"
			))
		);
		Ok(())
	}
}

#[async_trait]
impl RasterSource for MemoryRaster {
	fn footprint(&self) -> &Footprint {
		&self.state.fp
	}

	fn dtype(&self) -> RasterDtype {
		self.state.dtype
	}

	fn band_count(&self) -> usize {
		self.state.band_schema.band_count()
	}

	fn band_schema(&self) -> &BandSchema {
		&self.state.band_schema
	}

	fn sr_stored(&self) -> Option<&str> {
		self.state.sr.as_deref()
	}

	fn writable(&self) -> bool {
		self.state.mode.writable()
	}

	async fn get_data(
		&self,
		fp: Option<&Footprint>,
		bands: Option<&[usize]>,
		dst_nodata: Option<f64>,
		interpolation: Option<Interpolation>,
	) -> Result<RasterArray> {
		let fp = fp.copied().unwrap_or(self.state.fp);
		let bands = resolve_bands(bands, self.band_count())?;
		let dst_nodata = default_dst_nodata(dst_nodata, &self.state.band_schema);
		let interpolation = interpolation.unwrap_or_default();
		self.check_grid(&fp, interpolation)?;

		let Some(sampling) = self.state.fp.build_sampling_footprint(&fp, interpolation)? else {
			return Ok(RasterArray::filled(
				self.state.dtype,
				(fp.ry() as usize, fp.rx() as usize, bands.len()),
				dst_nodata,
			));
		};

		let (rows, cols) = sampling.slice_in(&self.state.fp)?;
		let window = self.state.data.read().slice_window(rows, cols)?.select_bands(&bands)?;

		remap(
			&sampling,
			&fp,
			&window,
			self.state.band_schema.shared_nodata(),
			dst_nodata,
			MaskMode::Erode,
			interpolation,
			None,
		)
	}

	async fn set_data(
		&self,
		fp: &Footprint,
		array: &RasterArray,
		bands: Option<&[usize]>,
		interpolation: Option<Interpolation>,
	) -> Result<()> {
		ensure!(
			self.writable(),
			ErrorKind::BadArgument("raster was created read-only".to_string())
		);
		ensure!(
			array.dtype() == self.state.dtype,
			ErrorKind::BadArgument(format!(
				"array dtype {} does not match the raster dtype {}; dtypes are never reinterpreted",
				array.dtype(),
				self.state.dtype
			))
		);
		let bands = resolve_bands(bands, self.band_count())?;
		ensure!(
			array.band_count() == bands.len(),
			ErrorKind::BadArgument(format!(
				"array has {} bands but {} bands were selected",
				array.band_count(),
				bands.len()
			))
		);
		let interpolation = interpolation.unwrap_or_default();
		if !fp.share_area(&self.state.fp) {
			return Ok(());
		}
		self.check_grid(fp, interpolation)?;

		let Some(dst) = self.state.fp.build_sampling_footprint(fp, interpolation)? else {
			return Ok(());
		};
		let nodata = self.state.band_schema.shared_nodata();
		let remapped = remap(
			fp,
			&dst,
			array,
			nodata,
			nodata.unwrap_or(0.0),
			MaskMode::Erode,
			interpolation,
			None,
		)?;

		let (rows, cols) = dst.slice_in(&self.state.fp)?;
		self
			.state
			.data
			.write()
			.copy_bands_from(&remapped, rows.start, cols.start, &bands)
	}

	async fn fill(&self, value: f64, bands: Option<&[usize]>) -> Result<()> {
		ensure!(
			self.writable(),
			ErrorKind::BadArgument("raster was created read-only".to_string())
		);
		let bands = resolve_bands(bands, self.band_count())?;
		self.state.data.write().fill_value(value, &bands)
	}

	async fn queue_data(
		&self,
		fp: &Footprint,
		bands: Option<&[usize]>,
		dst_nodata: Option<f64>,
		interpolation: Option<Interpolation>,
		max_queue_size: Option<usize>,
	) -> Result<ChunkStream> {
		let this = self.clone();
		let bands = bands.map(<[usize]>::to_vec);
		stream_in_tiles(fp, max_queue_size, move |tile| {
			let this = this.clone();
			let bands = bands.clone();
			Box::pin(async move { this.get_data(Some(&tile), bands.as_deref(), dst_nodata, interpolation).await })
		})
	}
}

impl Debug for MemoryRaster {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("MemoryRaster")
			.field("fp", &self.state.fp)
			.field("dtype", &self.state.dtype)
			.field("mode", &self.state.mode)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	fn checkerboard(fp: &Footprint) -> RasterArray {
		let (rows, cols) = fp.shape();
		let mut data = ndarray::Array3::<f64>::zeros((rows, cols, 1));
		for r in 0..rows {
			for c in 0..cols {
				data[(r, c, 0)] = ((r + c) % 2) as f64 * 255.0;
			}
		}
		RasterArray::from_f64(RasterDtype::U8, &data)
	}

	fn source(fp: Footprint) -> MemoryRaster {
		MemoryRaster::wrap(fp, checkerboard(&fp), None, None, OpenMode::Write, false).unwrap()
	}

	#[tokio::test]
	async fn full_read_returns_the_wrapped_array() {
		let fp = Footprint::north_up((0.0, 0.0), (1.0, 1.0), (4, 4)).unwrap();
		let raster = source(fp);
		let out = raster.get_data(None, None, None, None).await.unwrap();
		assert_eq!(out, checkerboard(&fp));
	}

	#[tokio::test]
	async fn set_then_get_roundtrips_exactly() {
		let fp = Footprint::north_up((0.0, 0.0), (1.0, 1.0), (4, 4)).unwrap();
		let raster = source(fp);
		let window = fp.sub_footprint(1, 1, 2, 2).unwrap();
		let patch = RasterArray::filled(RasterDtype::U8, (2, 2, 1), 42.0);
		raster.set_data(&window, &patch, None, None).await.unwrap();
		let out = raster.get_data(Some(&window), None, None, None).await.unwrap();
		assert_eq!(out, patch);
	}

	#[tokio::test]
	async fn reads_beyond_the_raster_fill_nodata() {
		let fp = Footprint::north_up((0.0, 0.0), (1.0, 1.0), (4, 4)).unwrap();
		let raster = source(fp);
		let outside = fp.sub_footprint(3, 0, 2, 1).unwrap();
		let out = raster.get_data(Some(&outside), None, Some(7.0), None).await.unwrap();
		assert_eq!(out.get(0, 1, 0), 7.0);
	}

	#[tokio::test]
	async fn dtype_is_never_reinterpreted_on_write() {
		let fp = Footprint::north_up((0.0, 0.0), (1.0, 1.0), (4, 4)).unwrap();
		let raster = source(fp);
		let wrong = RasterArray::filled(RasterDtype::I16, (4, 4, 1), 1.0);
		let err = raster.set_data(&fp, &wrong, None, None).await.unwrap_err();
		assert!(matches!(ErrorKind::of(&err), Some(ErrorKind::BadArgument(_))));
	}

	#[tokio::test]
	async fn off_grid_kernels_require_allow_interpolation() {
		let fp = Footprint::north_up((0.0, 0.0), (1.0, 1.0), (4, 4)).unwrap();
		let raster = source(fp);
		let off = Footprint::north_up((0.5, 0.0), (1.0, 1.0), (2, 2)).unwrap();

		// nearest resampling never needs the flag, explicitly or as default
		assert!(raster.get_data(Some(&off), None, None, None).await.is_ok());
		assert!(
			raster
				.get_data(Some(&off), None, None, Some(Interpolation::Nearest))
				.await
				.is_ok()
		);
		assert!(
			raster
				.get_data(Some(&off), None, None, Some(Interpolation::Bilinear))
				.await
				.is_err()
		);

		let lenient = MemoryRaster::wrap(fp, checkerboard(&fp), None, None, OpenMode::Write, true).unwrap();
		assert!(
			lenient
				.get_data(Some(&off), None, None, Some(Interpolation::Bilinear))
				.await
				.is_ok()
		);
	}

	#[tokio::test]
	async fn wrap_validates_shape() {
		let fp = Footprint::north_up((0.0, 0.0), (1.0, 1.0), (4, 4)).unwrap();
		let wrong = RasterArray::zeros(RasterDtype::U8, (2, 2, 1));
		assert!(MemoryRaster::wrap(fp, wrong, None, None, OpenMode::Write, false).is_err());
	}

	#[tokio::test]
	async fn queue_data_streams_the_window() {
		let fp = Footprint::north_up((0.0, 0.0), (1.0, 1.0), (4, 4)).unwrap();
		let raster = source(fp);
		let stream = raster.queue_data(&fp, None, None, None, Some(2)).await.unwrap();
		let full = crate::collect_stream(&fp, stream).await.unwrap();
		assert_eq!(full, checkerboard(&fp));
	}
}
