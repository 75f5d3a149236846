//! Deriving the source window needed to resample onto a destination grid.

use crate::{Footprint, Interpolation};
use anyhow::Result;
use rasterloom_derive::context;

impl Footprint {
	/// Returns the smallest footprint on **this** (source) grid whose pixels
	/// cover the interpolation kernel of every destination pixel center of
	/// `dst_fp`, or `None` when the destination does not touch the source.
	///
	/// On a shared grid this degenerates to the plain pixel intersection.
	#[context("deriving sampling footprint for {interpolation} interpolation")]
	pub fn build_sampling_footprint(&self, dst_fp: &Footprint, interpolation: Interpolation) -> Result<Option<Footprint>> {
		if self.same_grid(dst_fp) {
			let (col, row) = self.offset_of(dst_fp)?;
			let col0 = col.max(0);
			let row0 = row.max(0);
			let col1 = (col + i64::from(dst_fp.rx)).min(i64::from(self.rx));
			let row1 = (row + i64::from(dst_fp.ry)).min(i64::from(self.ry));
			if col1 <= col0 || row1 <= row0 {
				return Ok(None);
			}
			return Ok(Some(self.sub_footprint(
				col0,
				row0,
				(col1 - col0) as u32,
				(row1 - row0) as u32,
			)?));
		}

		// Destination pixel centers span [0.5, r-0.5] on each axis; the affine
		// map is linear, so extremes occur at the corner centers.
		let radius = interpolation.kernel_radius();
		let centers = [
			(0.5, 0.5),
			(f64::from(dst_fp.rx) - 0.5, 0.5),
			(0.5, f64::from(dst_fp.ry) - 0.5),
			(f64::from(dst_fp.rx) - 0.5, f64::from(dst_fp.ry) - 0.5),
		];

		let mut col_min = f64::INFINITY;
		let mut col_max = f64::NEG_INFINITY;
		let mut row_min = f64::INFINITY;
		let mut row_max = f64::NEG_INFINITY;
		for c in centers {
			let pt = dst_fp.raster_to_spatial(c);
			let (col, row) = self.spatial_to_raster(pt);
			col_min = col_min.min(col);
			col_max = col_max.max(col);
			row_min = row_min.min(row);
			row_max = row_max.max(row);
		}

		// Source pixel k (center at k + 0.5) participates when it lies within
		// the kernel radius of a sampling location.
		let snap = 1e-9;
		let k0 = (col_min - 0.5 - radius - snap).ceil().max(0.0) as i64;
		let k1 = (col_max - 0.5 + radius + snap).floor().min(f64::from(self.rx - 1)) as i64;
		let j0 = (row_min - 0.5 - radius - snap).ceil().max(0.0) as i64;
		let j1 = (row_max - 0.5 + radius + snap).floor().min(f64::from(self.ry - 1)) as i64;
		if (col_max - 0.5 + radius) < 0.0
			|| (col_min - 0.5 - radius) > f64::from(self.rx - 1)
			|| (row_max - 0.5 + radius) < 0.0
			|| (row_min - 0.5 - radius) > f64::from(self.ry - 1)
			|| k1 < k0
			|| j1 < j0
		{
			return Ok(None);
		}

		Ok(Some(self.sub_footprint(k0, j0, (k1 - k0 + 1) as u32, (j1 - j0 + 1) as u32)?))
	}
}
