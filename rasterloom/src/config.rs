//! Construction-time configuration of a [`DataSource`](crate::DataSource).

use rasterloom_recipe::DebugObserver;
use rasterloom_source::{FootprintConverter, IdentityConverter};
use std::fmt::{self, Debug};
use std::sync::Arc;

/// Options of [`DataSource::new`](crate::DataSource::new).
///
/// The `(sr_work, sr_fallback, sr_forced)` triple selects the conversion
/// mode; only four combinations are legal (see
/// [`SrRule`](rasterloom_source::SrRule)).
#[derive(Clone)]
pub struct DataSourceConfig {
	pub sr_work: Option<String>,
	pub sr_fallback: Option<String>,
	pub sr_forced: Option<String>,
	/// Check each conversion's round trip and fail when it loses more than
	/// `significant_digits` of precision.
	pub analyse_transformation: bool,
	/// Allow vector features without a geometry.
	pub allow_none_geometry: bool,
	/// Allow off-grid raster reads/writes with interpolating kernels
	/// (bilinear, cubic). Nearest-neighbor resampling is always available.
	pub allow_interpolation: bool,
	/// Upper bound on simultaneously active native drivers
	/// (`None` = unbounded).
	pub max_active: Option<usize>,
	/// Precision used by the transformation analysis.
	pub significant_digits: u8,
	/// The external footprint conversion routine.
	pub footprint_converter: Arc<dyn FootprintConverter>,
	/// Observers attached to every recipe created in this container.
	pub debug_observers: Vec<Arc<dyn DebugObserver>>,
}

impl Default for DataSourceConfig {
	fn default() -> Self {
		DataSourceConfig {
			sr_work: None,
			sr_fallback: None,
			sr_forced: None,
			analyse_transformation: true,
			allow_none_geometry: false,
			allow_interpolation: false,
			max_active: None,
			significant_digits: 9,
			footprint_converter: Arc::new(IdentityConverter),
			debug_observers: Vec::new(),
		}
	}
}

impl DataSourceConfig {
	/// Mode 2: work in `sr`, using each source's stored reference.
	#[must_use]
	pub fn with_sr_work(mut self, sr: &str) -> Self {
		self.sr_work = Some(sr.to_string());
		self
	}

	/// Mode 3: like `with_sr_work`, falling back for sources without one.
	#[must_use]
	pub fn with_sr_fallback(mut self, sr: &str) -> Self {
		self.sr_fallback = Some(sr.to_string());
		self
	}

	/// Mode 4: ignore stored references, treat every source as `sr`.
	#[must_use]
	pub fn with_sr_forced(mut self, sr: &str) -> Self {
		self.sr_forced = Some(sr.to_string());
		self
	}

	#[must_use]
	pub fn with_max_active(mut self, max_active: usize) -> Self {
		self.max_active = Some(max_active);
		self
	}

	#[must_use]
	pub fn with_allow_interpolation(mut self, allow: bool) -> Self {
		self.allow_interpolation = allow;
		self
	}
}

impl Debug for DataSourceConfig {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("DataSourceConfig")
			.field("sr_work", &self.sr_work)
			.field("sr_fallback", &self.sr_fallback)
			.field("sr_forced", &self.sr_forced)
			.field("analyse_transformation", &self.analyse_transformation)
			.field("allow_none_geometry", &self.allow_none_geometry)
			.field("allow_interpolation", &self.allow_interpolation)
			.field("max_active", &self.max_active)
			.finish()
	}
}
