//! Driver traits: the seam between sources and native file formats.
//!
//! Native drivers (GDAL-shaped readers/writers) are external collaborators.
//! They enter the library as *allocator closures* producing boxed objects
//! implementing [`RasterDriver`] or [`VectorDriver`]; the activation pool
//! decides when such an object is live. Driver failures must surface the
//! driver's own message verbatim, wrapped in
//! [`ErrorKind::DriverError`](rasterloom_core::ErrorKind::DriverError).

use crate::vector::Feature;
use anyhow::Result;
use rasterloom_core::{BandSchema, Footprint, RasterArray, RasterDtype};
use std::ops::Range;

/// Metadata a raster driver exposes about its dataset, captured once at open.
#[derive(Clone, Debug)]
pub struct RasterDriverInfo {
	/// Geometry as stored in the file.
	pub footprint: Footprint,
	pub dtype: RasterDtype,
	pub band_count: usize,
	pub band_schema: BandSchema,
	/// Spatial reference found in the file metadata, if any.
	pub sr_stored: Option<String>,
}

/// A live native raster handle.
///
/// Windows are `(rows, cols)` pixel ranges in the driver's stored geometry;
/// band indices are 0-based. A driver object is never shared across
/// concurrent operations; the activation pool serializes access.
pub trait RasterDriver: Send {
	fn info(&self) -> &RasterDriverInfo;

	/// Reads a window of the selected bands, shaped `(rows, cols, bands)`.
	fn read_window(&mut self, window: (Range<usize>, Range<usize>), bands: &[usize]) -> Result<RasterArray>;

	/// Writes `data` (shaped `(rows, cols, bands.len())`) with its top-left
	/// pixel at `origin = (row, col)`.
	fn write_window(&mut self, origin: (usize, usize), bands: &[usize], data: &RasterArray) -> Result<()>;

	/// Sets every pixel of the selected bands to `value`.
	fn fill(&mut self, value: f64, bands: &[usize]) -> Result<()>;

	/// Flushes buffered writes to storage.
	fn flush(&mut self) -> Result<()> {
		Ok(())
	}

	/// Deletes the underlying dataset. The driver object is unusable after.
	fn delete(&mut self) -> Result<()>;
}

/// A live native vector handle.
pub trait VectorDriver: Send {
	/// Number of features in the dataset.
	fn len(&self) -> usize;

	fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Spatial reference found in the file metadata, if any.
	fn sr_stored(&self) -> Option<String>;

	/// Reads the feature at `index`.
	fn read_feature(&mut self, index: usize) -> Result<Feature>;

	/// Appends a feature (writable datasets only).
	fn insert_feature(&mut self, feature: &Feature) -> Result<()>;

	fn flush(&mut self) -> Result<()> {
		Ok(())
	}

	/// Deletes the underlying dataset.
	fn delete(&mut self) -> Result<()>;
}
