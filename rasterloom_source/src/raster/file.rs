//! File-backed raster sources leasing their native handle from the
//! activation pool.

use crate::{
	Activatable, ActivationPool, DriverAllocator, OpenMode, RasterDriverInfo, RasterSource, SrFrame, default_dst_nodata,
	resolve_bands, stream_in_tiles,
};
use anyhow::{Result, ensure};
use async_trait::async_trait;
use rasterloom_core::{
	BandSchema, ChunkStream, ErrorKind, Footprint, Interpolation, MaskMode, RasterArray, RasterDtype, remap,
};
use rasterloom_derive::context;
use std::fmt::{self, Debug};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

struct FileState {
	uid: Uuid,
	allocator: DriverAllocator,
	pool: Arc<ActivationPool>,
	path: PathBuf,
	mode: OpenMode,
	/// Metadata captured from the driver at open time.
	info: RasterDriverInfo,
	/// Geometry converted into the container's working frame.
	fp_work: Footprint,
	allow_interpolation: bool,
	closed: AtomicBool,
}

/// A raster stored in a file, accessed through a pooled native driver.
///
/// The driver object is opened lazily and may be deactivated at any time by
/// pool pressure; every operation re-acquires a lease, so the source survives
/// its handle being recycled.
#[derive(Clone)]
pub struct FileRaster {
	state: Arc<FileState>,
}

impl FileRaster {
	/// Opens the file once to capture its metadata, then releases the driver
	/// back to the pool.
	#[context("opening raster '{}'", path.display())]
	pub async fn open(
		pool: Arc<ActivationPool>,
		allocator: DriverAllocator,
		path: &Path,
		mode: OpenMode,
		sr_frame: &SrFrame,
		allow_interpolation: bool,
	) -> Result<FileRaster> {
		let uid = Uuid::new_v4();
		let info = {
			let mut lease = pool.acquire(uid, &allocator).await?;
			lease.driver().as_raster()?.info().clone()
		};
		let fp_work = sr_frame.to_work(&info.footprint, info.sr_stored.as_deref())?;
		info.band_schema.validate(info.band_count)?;

		Ok(FileRaster {
			state: Arc::new(FileState {
				uid,
				allocator,
				pool,
				path: path.to_path_buf(),
				mode,
				info,
				fp_work,
				allow_interpolation,
				closed: AtomicBool::new(false),
			}),
		})
	}

	pub fn path(&self) -> &std::path::Path {
		&self.state.path
	}

	pub fn mode(&self) -> OpenMode {
		self.state.mode
	}

	fn check_open(&self) -> Result<()> {
		ensure!(!self.state.closed.load(Ordering::SeqCst), ErrorKind::Closed);
		Ok(())
	}

	/// Off-grid access resamples; kernels beyond nearest need the container's
	/// `allow_interpolation` flag.
	fn check_grid(&self, fp: &Footprint, interpolation: Interpolation) -> Result<()> {
		ensure!(
			fp.same_grid(&self.state.fp_work)
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
impl RasterSource for FileRaster {
	fn footprint(&self) -> &Footprint {
		&self.state.fp_work
	}

	fn dtype(&self) -> RasterDtype {
		self.state.info.dtype
	}

	fn band_count(&self) -> usize {
		self.state.info.band_count
	}

	fn band_schema(&self) -> &BandSchema {
		&self.state.info.band_schema
	}

	fn sr_stored(&self) -> Option<&str> {
		self.state.info.sr_stored.as_deref()
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
		self.check_open()?;
		let fp = fp.copied().unwrap_or(self.state.fp_work);
		let bands = resolve_bands(bands, self.band_count())?;
		let dst_nodata = default_dst_nodata(dst_nodata, self.band_schema());
		let interpolation = interpolation.unwrap_or_default();
		self.check_grid(&fp, interpolation)?;

		let Some(sampling) = self.state.fp_work.build_sampling_footprint(&fp, interpolation)? else {
			return Ok(RasterArray::filled(
				self.dtype(),
				(fp.ry() as usize, fp.rx() as usize, bands.len()),
				dst_nodata,
			));
		};

		let window = sampling.slice_in(&self.state.fp_work)?;
		let array = {
			let mut lease = self.state.pool.acquire(self.state.uid, &self.state.allocator).await?;
			lease.driver().as_raster()?.read_window(window, &bands)?
		};

		remap(
			&sampling,
			&fp,
			&array,
			self.band_schema().shared_nodata(),
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
		self.check_open()?;
		ensure!(
			self.writable(),
			ErrorKind::BadArgument("raster was opened read-only".to_string())
		);
		ensure!(
			array.dtype() == self.dtype(),
			ErrorKind::BadArgument(format!(
				"array dtype {} does not match the raster dtype {}; dtypes are never reinterpreted",
				array.dtype(),
				self.dtype()
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
		if !fp.share_area(&self.state.fp_work) {
			return Ok(());
		}
		self.check_grid(fp, interpolation)?;

		let Some(dst) = self.state.fp_work.build_sampling_footprint(fp, interpolation)? else {
			return Ok(());
		};
		let nodata = self.band_schema().shared_nodata();
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

		let (rows, cols) = dst.slice_in(&self.state.fp_work)?;
		let mut lease = self.state.pool.acquire(self.state.uid, &self.state.allocator).await?;
		let driver = lease.driver().as_raster()?;
		driver.write_window((rows.start, cols.start), &bands, &remapped)?;
		driver.flush()
	}

	async fn fill(&self, value: f64, bands: Option<&[usize]>) -> Result<()> {
		self.check_open()?;
		ensure!(
			self.writable(),
			ErrorKind::BadArgument("raster was opened read-only".to_string())
		);
		let bands = resolve_bands(bands, self.band_count())?;
		let mut lease = self.state.pool.acquire(self.state.uid, &self.state.allocator).await?;
		let driver = lease.driver().as_raster()?;
		driver.fill(value, &bands)?;
		driver.flush()
	}

	async fn queue_data(
		&self,
		fp: &Footprint,
		bands: Option<&[usize]>,
		dst_nodata: Option<f64>,
		interpolation: Option<Interpolation>,
		max_queue_size: Option<usize>,
	) -> Result<ChunkStream> {
		self.check_open()?;
		let this = self.clone();
		let bands = bands.map(<[usize]>::to_vec);
		stream_in_tiles(fp, max_queue_size, move |tile| {
			let this = this.clone();
			let bands = bands.clone();
			Box::pin(async move { this.get_data(Some(&tile), bands.as_deref(), dst_nodata, interpolation).await })
		})
	}

	async fn delete(&self) -> Result<()> {
		self.check_open()?;
		ensure!(
			self.writable(),
			ErrorKind::BadArgument("raster was opened read-only".to_string())
		);
		let mut lease = self.state.pool.acquire(self.state.uid, &self.state.allocator).await?;
		lease.driver().as_raster()?.delete()?;
		lease.discard();
		self.state.closed.store(true, Ordering::SeqCst);
		Ok(())
	}

	async fn close(&self) -> Result<()> {
		if !self.state.closed.swap(true, Ordering::SeqCst) {
			self.state.pool.deactivate(self.state.uid).await;
		}
		Ok(())
	}
}

#[async_trait]
impl Activatable for FileRaster {
	async fn activate(&self) -> Result<()> {
		self.check_open()?;
		drop(self.state.pool.acquire(self.state.uid, &self.state.allocator).await?);
		Ok(())
	}

	async fn deactivate(&self) {
		self.state.pool.deactivate(self.state.uid).await;
	}

	fn is_active(&self) -> bool {
		self.state.pool.is_active(self.state.uid)
	}
}

impl Debug for FileRaster {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("FileRaster")
			.field("path", &self.state.path)
			.field("mode", &self.state.mode)
			.field("dtype", &self.state.info.dtype)
			.field("fp", &self.state.fp_work)
			.finish()
	}
}
