//! Distinguished error kinds of the rasterloom library surface.
//!
//! Errors are propagated as [`anyhow::Error`] chains (with `#[context]`
//! messages along the way), but every failure that callers may want to react
//! to programmatically carries an [`ErrorKind`] somewhere in the chain.
//! Callers match kinds via [`ErrorKind::of`], never by message text.

use thiserror::Error;

/// The closed set of library error kinds.
///
/// # Example
/// ```
/// use rasterloom_core::ErrorKind;
///
/// let err: anyhow::Error = anyhow::Error::from(ErrorKind::Closed).context("looking up 'dem'");
/// assert!(matches!(ErrorKind::of(&err), Some(ErrorKind::Closed)));
/// ```
#[derive(Debug, Error)]
pub enum ErrorKind {
	/// Shape/type/range violation at an API boundary.
	#[error("bad argument: {0}")]
	BadArgument(String),

	/// A key is already registered in the data source.
	#[error("duplicate key '{0}'")]
	DuplicateKey(String),

	/// A key is not registered in the data source.
	#[error("unknown key '{0}'")]
	UnknownKey(String),

	/// The data source has been closed; no further operations are possible.
	#[error("the data source is closed")]
	Closed,

	/// Illegal combination of `sr_work` / `sr_fallback` / `sr_forced`.
	#[error("bad combination of sr_work / sr_fallback / sr_forced")]
	BadSrMode,

	/// A spatial reference conversion loses too much precision.
	#[error("spatial reference conversion is too lossy: {0}")]
	SrConversionLossy(String),

	/// A cache tiling does not exactly cover the raster footprint.
	#[error("bad cache tiling: {0}")]
	BadTiling(String),

	/// Geometric precondition violation: the footprints do not overlap.
	#[error("footprints do not overlap")]
	NoOverlap,

	/// The underlying native driver reported a failure; the message is the
	/// driver's, verbatim.
	#[error("driver error: {0}")]
	DriverError(String),

	/// `activate_all` was asked to activate more sources than `max_active`.
	#[error("cannot activate {requested} sources with max_active = {max_active}")]
	TooMany { requested: usize, max_active: usize },

	/// The query was cancelled by its caller or by registry shutdown.
	#[error("query was cancelled")]
	Cancelled,

	/// A user-supplied `compute_array` / `merge_arrays` / footprint converter
	/// failed; the original error is preserved in the message.
	#[error("producer error: {0}")]
	ProducerError(String),
}

impl ErrorKind {
	/// Finds the error kind carried by an error chain, if any.
	pub fn of(err: &anyhow::Error) -> Option<&ErrorKind> {
		err.downcast_ref::<ErrorKind>()
	}

	/// Wraps an arbitrary producer failure, preserving its message chain.
	pub fn producer(err: &anyhow::Error) -> ErrorKind {
		ErrorKind::ProducerError(format!("{err:#}"))
	}
}
