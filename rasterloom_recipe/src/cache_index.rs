//! Cache tilings and the on-disk cache tile index.
//!
//! A [`TileGrid`] is the validated, exact-cover, non-overlapping grid of
//! cache tiles over a recipe footprint. The [`CacheTileIndex`] adds the
//! on-disk side: canonical filenames, the directory scan that recognizes
//! previously computed tiles by fingerprint, and header validation.

use crate::{fingerprint_hex, read_tile_header};
use anyhow::{Result, ensure};
use rasterloom_core::{BandSchema, ErrorKind, Footprint, RasterDtype};
use rasterloom_derive::context;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

/// A validated grid tiling of a raster footprint: tiles cover every pixel
/// exactly once, arranged row-major in `rows × cols`.
#[derive(Clone, Debug)]
pub struct TileGrid {
	raster_fp: Footprint,
	rows: usize,
	cols: usize,
	tiles: Vec<Footprint>,
}

impl TileGrid {
	/// Validates that `tiling` is a gapless, non-overlapping grid cover of
	/// `raster_fp`.
	///
	/// # Errors
	/// `BadTiling` describing the first violation found.
	#[context("validating cache tiling of {raster_fp:?}")]
	pub fn new(raster_fp: Footprint, tiling: &[Vec<Footprint>]) -> Result<TileGrid> {
		ensure!(
			!tiling.is_empty() && !tiling[0].is_empty(),
			ErrorKind::BadTiling("tiling is empty".to_string())
		);
		let cols = tiling[0].len();
		ensure!(
			tiling.iter().all(|row| row.len() == cols),
			ErrorKind::BadTiling("tiling rows have differing lengths".to_string())
		);

		// Column widths/offsets from the first row, row heights/offsets from
		// the first column; every tile must agree with both.
		let mut col_edges = Vec::with_capacity(cols + 1);
		let mut expected_col = 0i64;
		for tile in &tiling[0] {
			col_edges.push(expected_col);
			expected_col += i64::from(tile.rx());
		}
		ensure!(
			expected_col == i64::from(raster_fp.rx()),
			ErrorKind::BadTiling(format!(
				"tile widths sum to {expected_col} but the raster is {} pixels wide",
				raster_fp.rx()
			))
		);

		let mut row_edges = Vec::with_capacity(tiling.len() + 1);
		let mut expected_row = 0i64;
		for row in tiling {
			row_edges.push(expected_row);
			expected_row += i64::from(row[0].ry());
		}
		ensure!(
			expected_row == i64::from(raster_fp.ry()),
			ErrorKind::BadTiling(format!(
				"tile heights sum to {expected_row} but the raster is {} pixels tall",
				raster_fp.ry()
			))
		);

		let mut tiles = Vec::with_capacity(tiling.len() * cols);
		for (r, row) in tiling.iter().enumerate() {
			for (c, tile) in row.iter().enumerate() {
				let offset = raster_fp.offset_of(tile).map_err(|_| {
					ErrorKind::BadTiling(format!("tile ({r}, {c}) is not on the raster grid: {tile:?}"))
				})?;
				ensure!(
					offset == (col_edges[c], row_edges[r]),
					ErrorKind::BadTiling(format!(
						"tile ({r}, {c}) sits at {offset:?}, expected ({}, {})",
						col_edges[c], row_edges[r]
					))
				);
				ensure!(
					tile.rx() == tiling[0][c].rx() && tile.ry() == row[0].ry(),
					ErrorKind::BadTiling(format!("tile ({r}, {c}) breaks the grid structure: {tile:?}"))
				);
				tiles.push(*tile);
			}
		}

		Ok(TileGrid {
			raster_fp,
			rows: tiling.len(),
			cols,
			tiles,
		})
	}

	#[must_use]
	pub fn raster_fp(&self) -> &Footprint {
		&self.raster_fp
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.tiles.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.tiles.is_empty()
	}

	#[must_use]
	pub fn shape(&self) -> (usize, usize) {
		(self.rows, self.cols)
	}

	#[must_use]
	pub fn tile(&self, index: usize) -> &Footprint {
		&self.tiles[index]
	}

	pub fn iter(&self) -> impl Iterator<Item = &Footprint> {
		self.tiles.iter()
	}

	/// Indices (row-major) of the tiles whose pixels intersect `query`.
	/// The query must share the raster grid; windows beyond the raster
	/// simply intersect fewer tiles.
	pub fn tiles_intersecting(&self, query: &Footprint) -> Result<Vec<usize>> {
		let (q_col, q_row) = self.raster_fp.offset_of(query)?;
		let q_col1 = q_col + i64::from(query.rx());
		let q_row1 = q_row + i64::from(query.ry());

		let mut hits = Vec::new();
		for (index, tile) in self.tiles.iter().enumerate() {
			let (t_col, t_row) = self.raster_fp.offset_of(tile)?;
			let t_col1 = t_col + i64::from(tile.rx());
			let t_row1 = t_row + i64::from(tile.ry());
			if q_col < t_col1 && t_col < q_col1 && q_row < t_row1 && t_row < q_row1 {
				hits.push(index);
			}
		}
		Ok(hits)
	}
}

/// Canonical cache filename of one tile:
/// `{fingerprint}_x{col}_y{row}_w{width}_h{height}.tif`, with `col`/`row`
/// the pixel offsets of the tile's top-left corner within the raster.
pub fn tile_file_name(fingerprint: u64, raster_fp: &Footprint, tile_fp: &Footprint) -> Result<String> {
	let (col, row) = raster_fp.offset_of(tile_fp)?;
	Ok(format!(
		"{}_x{col}_y{row}_w{}_h{}.tif",
		fingerprint_hex(fingerprint),
		tile_fp.rx(),
		tile_fp.ry()
	))
}

/// One cache tile on disk.
#[derive(Clone, Debug)]
pub struct CacheTile {
	pub fp: Footprint,
	pub path: PathBuf,
	/// Whether a fingerprint-validated file currently exists.
	pub ready: bool,
}

/// The on-disk cache index of one cached recipe.
#[derive(Debug)]
pub struct CacheTileIndex {
	pub dir: PathBuf,
	pub fingerprint: u64,
	pub tiles: Vec<CacheTile>,
}

impl CacheTileIndex {
	/// Builds the index: derives canonical paths and scans `dir` for
	/// previously computed tiles.
	///
	/// Files carrying our fingerprint are header-validated against the
	/// declared geometry and marked ready, or deleted first when
	/// `overwrite` is set. Anything else in the directory is ignored.
	#[context("indexing cache directory '{}'", dir.display())]
	pub fn build(
		dir: &Path,
		grid: &TileGrid,
		fingerprint: u64,
		dtype: RasterDtype,
		band_count: usize,
		band_schema: &BandSchema,
		overwrite: bool,
	) -> Result<CacheTileIndex> {
		band_schema.validate(band_count)?;
		fs::create_dir_all(dir)?;

		let mut tiles = Vec::with_capacity(grid.len());
		for tile_fp in grid.iter() {
			let name = tile_file_name(fingerprint, grid.raster_fp(), tile_fp)?;
			tiles.push(CacheTile {
				fp: *tile_fp,
				path: dir.join(name),
				ready: false,
			});
		}

		let prefix = fingerprint_hex(fingerprint);
		let pattern = Regex::new(r"^([0-9a-f]{16})_x(\d+)_y(\d+)_w(\d+)_h(\d+)\.tif$")?;
		for entry in fs::read_dir(dir)? {
			let entry = entry?;
			let name = entry.file_name().to_string_lossy().to_string();
			let Some(captures) = pattern.captures(&name) else {
				log::debug!("cache scan: ignoring '{name}'");
				continue;
			};
			if &captures[1] != prefix {
				log::debug!("cache scan: ignoring '{name}' (foreign fingerprint)");
				continue;
			}
			if overwrite {
				log::info!("cache scan: deleting '{name}' (overwrite requested)");
				fs::remove_file(entry.path())?;
				continue;
			}

			let Some(tile) = tiles.iter_mut().find(|t| t.path == entry.path()) else {
				log::warn!("cache scan: '{name}' carries our fingerprint but matches no tile; ignoring");
				continue;
			};
			match read_tile_header(&tile.path) {
				Ok(header) if header.fp == tile.fp && header.dtype == dtype && header.band_count == band_count => {
					tile.ready = true;
				}
				Ok(header) => {
					log::warn!("cache scan: '{name}' header {header:?} contradicts its name; ignoring");
				}
				Err(err) => {
					log::warn!("cache scan: cannot read '{name}': {err:#}; ignoring");
				}
			}
		}

		Ok(CacheTileIndex {
			dir: dir.to_path_buf(),
			fingerprint,
			tiles,
		})
	}

	/// Number of tiles currently ready on disk.
	#[must_use]
	pub fn ready_count(&self) -> usize {
		self.tiles.iter().filter(|t| t.ready).count()
	}
}
