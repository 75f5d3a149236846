//! Read-only queries on footprints: accessors, grid tests, coordinate
//! mappings, intersection and slicing.

use crate::{ErrorKind, Footprint};
use anyhow::{Result, ensure};
use rasterloom_derive::context;

/// Integer tolerance when checking that an offset lands on a grid node.
const GRID_SNAP_EPS: f64 = 1e-6;

impl Footprint {
	// -------------------------------------------------------------------------
	// Accessors
	// -------------------------------------------------------------------------

	/// Raster width in pixels (along `ax`).
	#[must_use]
	#[inline]
	pub fn rx(&self) -> u32 {
		self.rx
	}

	/// Raster height in pixels (along `ay`).
	#[must_use]
	#[inline]
	pub fn ry(&self) -> u32 {
		self.ry
	}

	/// Array shape `(rows, cols)`.
	#[must_use]
	pub fn shape(&self) -> (usize, usize) {
		(self.ry as usize, self.rx as usize)
	}

	/// Total pixel count.
	#[must_use]
	pub fn pixel_count(&self) -> usize {
		self.rx as usize * self.ry as usize
	}

	/// Top-left corner (the origin of the affine transform).
	#[must_use]
	pub fn tl(&self) -> (f64, f64) {
		self.origin
	}

	/// Per-column pixel vector.
	#[must_use]
	pub fn ax(&self) -> (f64, f64) {
		self.ax
	}

	/// Per-row pixel vector.
	#[must_use]
	pub fn ay(&self) -> (f64, f64) {
		self.ay
	}

	/// Area of one pixel in world units.
	#[must_use]
	pub fn pixel_area(&self) -> f64 {
		(self.ax.0 * self.ay.1 - self.ax.1 * self.ay.0).abs()
	}

	/// The four corners `[tl, tr, br, bl]` of the covered parallelogram.
	#[must_use]
	pub fn poly(&self) -> [(f64, f64); 4] {
		let w = f64::from(self.rx);
		let h = f64::from(self.ry);
		let tl = self.origin;
		let tr = (tl.0 + w * self.ax.0, tl.1 + w * self.ax.1);
		let bl = (tl.0 + h * self.ay.0, tl.1 + h * self.ay.1);
		let br = (tr.0 + h * self.ay.0, tr.1 + h * self.ay.1);
		[tl, tr, br, bl]
	}

	/// World-distance epsilon used by grid comparisons, relative to the pixel
	/// vector magnitudes.
	#[must_use]
	pub(super) fn grid_eps(&self) -> f64 {
		1e-9 * (self.ax.0.hypot(self.ax.1) + self.ay.0.hypot(self.ay.1))
	}

	// -------------------------------------------------------------------------
	// Coordinate mappings
	// -------------------------------------------------------------------------

	/// Maps a raster coordinate (continuous, `(col, row)`, grid nodes at
	/// integers) to a world point.
	#[must_use]
	pub fn raster_to_spatial(&self, (col, row): (f64, f64)) -> (f64, f64) {
		(
			self.origin.0 + col * self.ax.0 + row * self.ay.0,
			self.origin.1 + col * self.ax.1 + row * self.ay.1,
		)
	}

	/// Maps a world point to continuous raster coordinates `(col, row)` by
	/// the inverse affine. Integer results fall on grid nodes; rounding policy
	/// for non-aligned points is the caller's business.
	#[must_use]
	pub fn spatial_to_raster(&self, pt: (f64, f64)) -> (f64, f64) {
		let dx = pt.0 - self.origin.0;
		let dy = pt.1 - self.origin.1;
		let det = self.ax.0 * self.ay.1 - self.ax.1 * self.ay.0;
		let col = (dx * self.ay.1 - dy * self.ay.0) / det;
		let row = (dy * self.ax.0 - dx * self.ax.1) / det;
		(col, row)
	}

	// -------------------------------------------------------------------------
	// Grid relations
	// -------------------------------------------------------------------------

	/// Whether two footprints live on the same pixel grid: equal pixel
	/// vectors and an origin offset that is an integer combination of them.
	#[must_use]
	pub fn same_grid(&self, other: &Footprint) -> bool {
		let eps = self.grid_eps().max(other.grid_eps());
		if (self.ax.0 - other.ax.0).abs() > eps
			|| (self.ax.1 - other.ax.1).abs() > eps
			|| (self.ay.0 - other.ay.0).abs() > eps
			|| (self.ay.1 - other.ay.1).abs() > eps
		{
			return false;
		}
		let (col, row) = self.spatial_to_raster(other.origin);
		(col - col.round()).abs() <= GRID_SNAP_EPS && (row - row.round()).abs() <= GRID_SNAP_EPS
	}

	/// Integer pixel offset of `other`'s top-left node within this grid.
	///
	/// # Errors
	/// Fails with `BadArgument` when the footprints do not share a grid.
	pub fn offset_of(&self, other: &Footprint) -> Result<(i64, i64)> {
		ensure!(
			self.same_grid(other),
			ErrorKind::BadArgument(format!("footprints {self:?} and {other:?} do not share a grid"))
		);
		let (col, row) = self.spatial_to_raster(other.origin);
		Ok((col.round() as i64, row.round() as i64))
	}

	/// Whether the two covered polygons overlap with positive area.
	///
	/// Exact for parallelograms (separating axis test); touching edges do not
	/// count as shared area.
	#[must_use]
	pub fn share_area(&self, other: &Footprint) -> bool {
		let a = self.poly();
		let b = other.poly();
		let eps = self.grid_eps().max(other.grid_eps());

		let project = |poly: &[(f64, f64); 4], axis: (f64, f64)| {
			let mut min = f64::INFINITY;
			let mut max = f64::NEG_INFINITY;
			for p in poly {
				let d = p.0 * axis.0 + p.1 * axis.1;
				min = min.min(d);
				max = max.max(d);
			}
			(min, max)
		};

		// Edge normals of both parallelograms.
		for axis in [
			(-self.ax.1, self.ax.0),
			(-self.ay.1, self.ay.0),
			(-other.ax.1, other.ax.0),
			(-other.ay.1, other.ay.0),
		] {
			let (min_a, max_a) = project(&a, axis);
			let (min_b, max_b) = project(&b, axis);
			if max_a <= min_b + eps || max_b <= min_a + eps {
				return false;
			}
		}
		true
	}

	/// Whether this footprint fully contains `other` on the shared grid.
	#[must_use]
	pub fn contains_same_grid(&self, other: &Footprint) -> bool {
		match self.offset_of(other) {
			Ok((col, row)) => {
				col >= 0
					&& row >= 0 && col + i64::from(other.rx) <= i64::from(self.rx)
					&& row + i64::from(other.ry) <= i64::from(self.ry)
			}
			Err(_) => false,
		}
	}

	// -------------------------------------------------------------------------
	// Intersection and slicing
	// -------------------------------------------------------------------------

	/// Integer-pixel intersection of two same-grid footprints.
	///
	/// # Errors
	/// `BadArgument` when the grids differ, `NoOverlap` when the pixel ranges
	/// are disjoint.
	///
	/// # Example
	/// ```
	/// # use rasterloom_core::Footprint;
	/// let fp = Footprint::north_up((0.0, 0.0), (1.0, 1.0), (8, 8)).unwrap();
	/// assert_eq!(fp.intersection(&fp).unwrap(), fp);
	/// ```
	#[context("intersecting footprints")]
	pub fn intersection(&self, other: &Footprint) -> Result<Footprint> {
		let (col, row) = self.offset_of(other)?;
		let col0 = col.max(0);
		let row0 = row.max(0);
		let col1 = (col + i64::from(other.rx)).min(i64::from(self.rx));
		let row1 = (row + i64::from(other.ry)).min(i64::from(self.ry));
		ensure!(col1 > col0 && row1 > row0, ErrorKind::NoOverlap);
		self.sub_footprint(col0, row0, (col1 - col0) as u32, (row1 - row0) as u32)
	}

	/// Pixel index ranges of this footprint inside `container`
	/// (`(rows, cols)`), for slicing arrays shaped like `container`.
	///
	/// # Errors
	/// Fails when the grids differ or `self` is not fully inside `container`.
	#[context("slicing footprint into its container")]
	pub fn slice_in(&self, container: &Footprint) -> Result<(std::ops::Range<usize>, std::ops::Range<usize>)> {
		let (col, row) = container.offset_of(self)?;
		ensure!(
			col >= 0
				&& row >= 0
				&& col + i64::from(self.rx) <= i64::from(container.rx)
				&& row + i64::from(self.ry) <= i64::from(container.ry),
			ErrorKind::BadArgument(format!("footprint {self:?} is not contained in {container:?}"))
		);
		let (col, row) = (col as usize, row as usize);
		Ok((row..row + self.ry as usize, col..col + self.rx as usize))
	}
}
