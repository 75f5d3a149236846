//! Decomposing a footprint into a grid of sub-footprints.

use crate::{ErrorKind, Footprint};
use anyhow::{Result, bail, ensure};
use rasterloom_derive::context;

/// What to do with partial tiles at the right/bottom border.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BoundaryEffect {
	/// Clip the last row/column of tiles to the raster bounds.
	#[default]
	Shrink,
	/// Drop partial tiles entirely.
	Exclude,
	/// Shift the last tiles backward so they stay full-size (they then
	/// overlap their neighbors).
	Overlap,
	/// Fail unless the tile size evenly divides the raster size.
	Exception,
}

/// Tile offsets and lengths along one axis.
fn axis_tiles(total: u32, tile: u32, overlap: u32, boundary: BoundaryEffect) -> Result<Vec<(u32, u32)>> {
	ensure!(tile >= 1, "tile size must be at least 1");
	ensure!(overlap < tile, "overlap ({overlap}) must be smaller than the tile size ({tile})");
	let stride = tile - overlap;

	let mut tiles = Vec::new();
	let mut pos: u32 = 0;
	loop {
		if pos + tile <= total {
			tiles.push((pos, tile));
			if pos + tile == total {
				break;
			}
			pos += stride;
		} else {
			match boundary {
				BoundaryEffect::Shrink => tiles.push((pos, total - pos)),
				BoundaryEffect::Exclude => {}
				BoundaryEffect::Overlap => {
					ensure!(
						total >= tile,
						ErrorKind::BadArgument(format!(
							"cannot keep tiles full-size: tile ({tile}) exceeds the raster extent ({total})"
						))
					);
					tiles.push((total - tile, tile));
				}
				BoundaryEffect::Exception => bail!(ErrorKind::BadArgument(format!(
					"tile size {tile} with overlap {overlap} does not evenly cover {total} pixels"
				))),
			}
			break;
		}
	}
	Ok(tiles)
}

impl Footprint {
	/// Decomposes this footprint into a `(rows, cols)` grid of sub-footprints
	/// of at most `size = (width, height)` pixels, with `overlap` shared
	/// pixels between horizontal/vertical neighbors and `boundary` governing
	/// partial tiles at the border.
	///
	/// With `overlap = (0, 0)` and [`BoundaryEffect::Shrink`] the result
	/// exact-covers the footprint without overlap.
	///
	/// # Example
	/// ```
	/// # use rasterloom_core::{BoundaryEffect, Footprint};
	/// let fp = Footprint::north_up((0.0, 0.0), (1.0, 1.0), (10, 10)).unwrap();
	/// let grid = fp.tile((4, 4), (0, 0), BoundaryEffect::Shrink).unwrap();
	/// assert_eq!(grid.len(), 3);        // rows
	/// assert_eq!(grid[0].len(), 3);     // cols
	/// assert_eq!(grid[2][2].shape(), (2, 2));
	/// ```
	#[context("tiling footprint into {size:?} tiles")]
	pub fn tile(&self, size: (u32, u32), overlap: (u32, u32), boundary: BoundaryEffect) -> Result<Vec<Vec<Footprint>>> {
		let cols = axis_tiles(self.rx, size.0, overlap.0, boundary)?;
		let rows = axis_tiles(self.ry, size.1, overlap.1, boundary)?;
		ensure!(
			!cols.is_empty() && !rows.is_empty(),
			ErrorKind::BadArgument("tiling produced no tiles".to_string())
		);

		rows
			.iter()
			.map(|&(row_off, h)| {
				cols
					.iter()
					.map(|&(col_off, w)| self.sub_footprint(i64::from(col_off), i64::from(row_off), w, h))
					.collect::<Result<Vec<_>>>()
			})
			.collect()
	}
}
