//! Remapping raster data between grids.
//!
//! Given an array on a source footprint, produce the array a destination
//! footprint would see: a pure window copy when the grids match, otherwise a
//! resampling pass with the requested interpolation kernel. Nodata handling
//! follows the `mask_mode`: with [`MaskMode::Erode`], a destination pixel
//! whose kernel touches any nodata (or out-of-source) pixel becomes
//! `dst_nodata`.
//!
//! Integer dtypes are resampled in f64 and cast back with saturation;
//! `Bool` only supports nearest.

use crate::{ErrorKind, Footprint, Interpolation, RasterArray, RasterDtype};
use anyhow::{Result, ensure};
use ndarray::{Array2, Array3};
use rasterloom_derive::context;

/// Nodata handling during resampling.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MaskMode {
	/// Kernel touching a nodata source pixel yields `dst_nodata`.
	#[default]
	Erode,
	/// Nodata values participate in the kernel like ordinary data.
	Ignore,
}

/// Remaps `array` (living on `src_fp`) onto `dst_fp`.
///
/// Pixels of the destination not covered by the source are filled with
/// `dst_nodata`. When `max_size` is given, destinations with more pixels
/// fail with `BadArgument`; callers tile larger requests.
#[context("remapping {array:?} from {src_fp:?} to {dst_fp:?}")]
pub fn remap(
	src_fp: &Footprint,
	dst_fp: &Footprint,
	array: &RasterArray,
	src_nodata: Option<f64>,
	dst_nodata: f64,
	mask_mode: MaskMode,
	interpolation: Interpolation,
	max_size: Option<usize>,
) -> Result<RasterArray> {
	let (rows, cols, bands) = array.shape();
	ensure!(
		(rows, cols) == src_fp.shape(),
		ErrorKind::BadArgument(format!("array {array:?} does not match its footprint {src_fp:?}"))
	);
	if let Some(limit) = max_size {
		ensure!(
			dst_fp.pixel_count() <= limit,
			ErrorKind::BadArgument(format!(
				"destination of {} pixels exceeds max_resampling_size {limit}",
				dst_fp.pixel_count()
			))
		);
	}

	if src_fp.same_grid(dst_fp) {
		return copy_same_grid(src_fp, dst_fp, array, dst_nodata);
	}

	log::trace!("resampling {array:?} onto {dst_fp:?} with {interpolation}");
	let dtype = array.dtype();
	ensure!(
		!(dtype == RasterDtype::Bool && interpolation != Interpolation::Nearest),
		ErrorKind::BadArgument(format!("bool rasters only support nearest, not {interpolation}"))
	);

	let (dst_rows, dst_cols) = dst_fp.shape();
	let mut out = Array3::<f64>::from_elem((dst_rows, dst_cols, bands), dst_nodata);

	for band in 0..bands {
		let src = array.band_to_f64(band)?;
		for r in 0..dst_rows {
			for c in 0..dst_cols {
				// destination pixel center, in source pixel-center coordinates
				let pt = dst_fp.raster_to_spatial((c as f64 + 0.5, r as f64 + 0.5));
				let (col, row) = src_fp.spatial_to_raster(pt);
				let (uc, ur) = (col - 0.5, row - 0.5);

				let sampled = match interpolation {
					Interpolation::Nearest => sample_nearest(&src, ur, uc, src_nodata, mask_mode),
					Interpolation::Bilinear => sample_kernel(&src, ur, uc, src_nodata, mask_mode, linear_weights),
					Interpolation::Cubic => sample_kernel(&src, ur, uc, src_nodata, mask_mode, cubic_weights),
				};
				if let Some(v) = sampled {
					out[(r, c, band)] = v;
				}
			}
		}
	}

	Ok(RasterArray::from_f64(dtype, &out))
}

/// Exact, dtype-preserving copy between footprints on one grid.
fn copy_same_grid(src_fp: &Footprint, dst_fp: &Footprint, array: &RasterArray, dst_nodata: f64) -> Result<RasterArray> {
	let (_, _, bands) = array.shape();
	let (dst_rows, dst_cols) = dst_fp.shape();
	let mut out = RasterArray::filled(array.dtype(), (dst_rows, dst_cols, bands), dst_nodata);

	match dst_fp.intersection(src_fp) {
		Ok(overlap) => {
			let (src_rows, src_cols) = overlap.slice_in(src_fp)?;
			let (out_rows, out_cols) = overlap.slice_in(dst_fp)?;
			let window = array.slice_window(src_rows, src_cols)?;
			out.copy_window_from(&window, out_rows.start, out_cols.start)?;
		}
		Err(err) if matches!(ErrorKind::of(&err), Some(ErrorKind::NoOverlap)) => {}
		Err(err) => return Err(err),
	}
	Ok(out)
}

/// Nearest source pixel, or `None` for out-of-source / eroded samples.
fn sample_nearest(src: &Array2<f64>, ur: f64, uc: f64, nodata: Option<f64>, mask_mode: MaskMode) -> Option<f64> {
	let (rows, cols) = src.dim();
	let i = ur.round() as i64;
	let j = uc.round() as i64;
	if i < 0 || j < 0 || i >= rows as i64 || j >= cols as i64 {
		return None;
	}
	let v = src[(i as usize, j as usize)];
	if nodata == Some(v) && mask_mode == MaskMode::Erode {
		return None;
	}
	Some(v)
}

/// Per-axis weights of the bilinear kernel: two taps starting at `floor(u)`.
fn linear_weights(u: f64) -> (i64, [f64; 4], usize) {
	let base = u.floor();
	let f = u - base;
	(base as i64, [1.0 - f, f, 0.0, 0.0], 2)
}

/// Per-axis weights of the Catmull-Rom kernel: four taps starting at
/// `floor(u) - 1`.
fn cubic_weights(u: f64) -> (i64, [f64; 4], usize) {
	let base = u.floor();
	let f = u - base;
	let f2 = f * f;
	let f3 = f2 * f;
	let w = [
		0.5 * (-f + 2.0 * f2 - f3),
		0.5 * (2.0 - 5.0 * f2 + 3.0 * f3),
		0.5 * (f + 4.0 * f2 - 3.0 * f3),
		0.5 * (-f2 + f3),
	];
	(base as i64 - 1, w, 4)
}

/// Separable kernel sampling with erode semantics across nodata and the
/// source border. Taps with zero weight do not count as "touching".
fn sample_kernel(
	src: &Array2<f64>,
	ur: f64,
	uc: f64,
	nodata: Option<f64>,
	mask_mode: MaskMode,
	weights: fn(f64) -> (i64, [f64; 4], usize),
) -> Option<f64> {
	let (rows, cols) = src.dim();
	let (i0, wr, taps_r) = weights(ur);
	let (j0, wc, taps_c) = weights(uc);

	let mut acc = 0.0;
	for (di, &wi) in wr.iter().enumerate().take(taps_r) {
		if wi == 0.0 {
			continue;
		}
		for (dj, &wj) in wc.iter().enumerate().take(taps_c) {
			if wj == 0.0 {
				continue;
			}
			let i = i0 + di as i64;
			let j = j0 + dj as i64;
			if i < 0 || j < 0 || i >= rows as i64 || j >= cols as i64 {
				return None;
			}
			let v = src[(i as usize, j as usize)];
			if nodata == Some(v) && mask_mode == MaskMode::Erode {
				return None;
			}
			acc += wi * wj * v;
		}
	}
	Some(acc)
}
