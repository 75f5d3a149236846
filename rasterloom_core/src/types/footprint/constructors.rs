//! Affine raster footprints on a shared spatial frame.
//!
//! A `Footprint` describes **where a raster lives**: an origin point, two
//! pixel vectors and a size in pixels. The pixel at raster index `(col, row)`
//! covers the parallelogram spanned by `ax` and `ay` at
//! `origin + col·ax + row·ay`.
//!
//! ## Conventions
//! - Raster indices are zero-based; `(col, row)` with `col` along `ax`.
//! - `shape()` is `(rows, cols)`, matching array layout.
//! - The canonical north-up form has `ax = (w, 0)` and `ay = (0, -h)` with
//!   `w, h > 0` (y decreasing downwards).
//! - Footprints derived from each other by integer pixel arithmetic stay on
//!   the same grid bit-for-bit up to float rounding; grid tests use a small
//!   relative epsilon.
//!
//! ## Examples
//! ```
//! # use rasterloom_core::Footprint;
//! let fp = Footprint::north_up((0.0, 0.0), (1.0, 1.0), (4, 4)).unwrap();
//! assert_eq!(fp.shape(), (4, 4));
//! let tile = fp.sub_footprint(2, 2, 2, 2).unwrap();
//! assert!(tile.same_grid(&fp));
//! ```

use anyhow::{Result, ensure};
use rasterloom_derive::context;

/// An affine 2D raster geometry: origin, two pixel vectors and a pixel size.
///
/// Immutable; all operations return new footprints. Invariants enforced at
/// construction: `rx, ry >= 1`, all coordinates finite, and `ax`, `ay`
/// linearly independent.
#[derive(Clone, Copy, PartialEq)]
pub struct Footprint {
	pub(super) origin: (f64, f64),
	pub(super) ax: (f64, f64),
	pub(super) ay: (f64, f64),
	pub(super) rx: u32,
	pub(super) ry: u32,
}

impl Footprint {
	/// Creates a footprint from an explicit affine transform.
	///
	/// # Errors
	/// Fails when the size is zero on either axis, a coordinate is not
	/// finite, or the pixel vectors are (near) collinear.
	#[context("creating footprint at {origin:?} with size {rsize:?}")]
	pub fn new(origin: (f64, f64), ax: (f64, f64), ay: (f64, f64), rsize: (u32, u32)) -> Result<Footprint> {
		let (rx, ry) = rsize;
		ensure!(rx >= 1 && ry >= 1, "raster size ({rx}x{ry}) must be at least 1x1");
		for v in [origin.0, origin.1, ax.0, ax.1, ay.0, ay.1] {
			ensure!(v.is_finite(), "footprint coordinates must be finite");
		}
		let cross = ax.0 * ay.1 - ax.1 * ay.0;
		let scale = (ax.0.hypot(ax.1)) * (ay.0.hypot(ay.1));
		ensure!(
			cross.abs() > scale * 1e-12,
			"pixel vectors ax={ax:?} and ay={ay:?} are linearly dependent"
		);
		Ok(Footprint { origin, ax, ay, rx, ry })
	}

	/// Creates a north-up footprint: top-left corner `tl`, positive pixel
	/// sizes, `ay` pointing down (negative y component).
	///
	/// # Example
	/// ```
	/// # use rasterloom_core::Footprint;
	/// let fp = Footprint::north_up((100.0, 200.0), (0.5, 0.5), (10, 20)).unwrap();
	/// assert_eq!(fp.ay(), (0.0, -0.5));
	/// ```
	#[context("creating north-up footprint at {tl:?}")]
	pub fn north_up(tl: (f64, f64), pixel_size: (f64, f64), rsize: (u32, u32)) -> Result<Footprint> {
		ensure!(
			pixel_size.0 > 0.0 && pixel_size.1 > 0.0,
			"pixel size {pixel_size:?} must be positive"
		);
		Self::new(tl, (pixel_size.0, 0.0), (0.0, -pixel_size.1), rsize)
	}

	/// Derives a sub-footprint by integer pixel arithmetic.
	///
	/// `col` and `row` are the offset of the new top-left pixel in this grid
	/// and may be negative or beyond the bounds: computation tiles are allowed
	/// to overhang the raster they compute.
	#[context("deriving {w}x{h} sub-footprint at ({col}, {row})")]
	pub fn sub_footprint(&self, col: i64, row: i64, w: u32, h: u32) -> Result<Footprint> {
		let col = col as f64;
		let row = row as f64;
		Footprint::new(
			(
				self.origin.0 + col * self.ax.0 + row * self.ay.0,
				self.origin.1 + col * self.ax.1 + row * self.ay.1,
			),
			self.ax,
			self.ay,
			(w, h),
		)
	}

	/// Same geometry, different size; the origin stays put.
	#[context("resizing footprint to {w}x{h}")]
	pub fn with_size(&self, w: u32, h: u32) -> Result<Footprint> {
		Footprint::new(self.origin, self.ax, self.ay, (w, h))
	}
}
