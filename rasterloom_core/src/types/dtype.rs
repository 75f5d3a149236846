//! The closed set of pixel dtypes a raster can carry.

use anyhow::{Result, bail};
use std::fmt::{self, Debug, Display};
use std::str::FromStr;

/// Pixel dtype of a raster source or recipe.
///
/// The set is closed: every [`RasterArray`](crate::RasterArray) variant maps
/// onto exactly one dtype. `Bool` is stored as one byte per pixel and only
/// supports nearest-neighbor resampling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RasterDtype {
	U8,
	U16,
	I16,
	U32,
	I32,
	F32,
	F64,
	Bool,
}

impl RasterDtype {
	/// Bytes occupied by one pixel of one band.
	#[must_use]
	pub fn byte_size(&self) -> usize {
		match self {
			RasterDtype::U8 | RasterDtype::Bool => 1,
			RasterDtype::U16 | RasterDtype::I16 => 2,
			RasterDtype::U32 | RasterDtype::I32 | RasterDtype::F32 => 4,
			RasterDtype::F64 => 8,
		}
	}

	/// Whether values are integers (resampling goes through f64 and saturates
	/// on the way back).
	#[must_use]
	pub fn is_integer(&self) -> bool {
		matches!(
			self,
			RasterDtype::U8 | RasterDtype::U16 | RasterDtype::I16 | RasterDtype::U32 | RasterDtype::I32
		)
	}

	/// Smallest representable value, as f64.
	#[must_use]
	pub fn min_value(&self) -> f64 {
		match self {
			RasterDtype::U8 | RasterDtype::U16 | RasterDtype::U32 | RasterDtype::Bool => 0.0,
			RasterDtype::I16 => f64::from(i16::MIN),
			RasterDtype::I32 => f64::from(i32::MIN),
			RasterDtype::F32 => f64::from(f32::MIN),
			RasterDtype::F64 => f64::MIN,
		}
	}

	/// Largest representable value, as f64.
	#[must_use]
	pub fn max_value(&self) -> f64 {
		match self {
			RasterDtype::U8 => f64::from(u8::MAX),
			RasterDtype::U16 => f64::from(u16::MAX),
			RasterDtype::I16 => f64::from(i16::MAX),
			RasterDtype::U32 => f64::from(u32::MAX),
			RasterDtype::I32 => f64::from(i32::MAX),
			RasterDtype::F32 => f64::from(f32::MAX),
			RasterDtype::F64 => f64::MAX,
			RasterDtype::Bool => 1.0,
		}
	}

	/// Canonical lowercase name, used in cache fingerprints and file headers.
	#[must_use]
	pub fn as_str(&self) -> &'static str {
		match self {
			RasterDtype::U8 => "uint8",
			RasterDtype::U16 => "uint16",
			RasterDtype::I16 => "int16",
			RasterDtype::U32 => "uint32",
			RasterDtype::I32 => "int32",
			RasterDtype::F32 => "float32",
			RasterDtype::F64 => "float64",
			RasterDtype::Bool => "bool",
		}
	}

	/// Stable single-byte tag used by the tile file codec.
	#[must_use]
	pub fn tag(&self) -> u8 {
		match self {
			RasterDtype::U8 => 1,
			RasterDtype::U16 => 2,
			RasterDtype::I16 => 3,
			RasterDtype::U32 => 4,
			RasterDtype::I32 => 5,
			RasterDtype::F32 => 6,
			RasterDtype::F64 => 7,
			RasterDtype::Bool => 8,
		}
	}

	/// Inverse of [`tag`](Self::tag).
	pub fn from_tag(tag: u8) -> Result<RasterDtype> {
		Ok(match tag {
			1 => RasterDtype::U8,
			2 => RasterDtype::U16,
			3 => RasterDtype::I16,
			4 => RasterDtype::U32,
			5 => RasterDtype::I32,
			6 => RasterDtype::F32,
			7 => RasterDtype::F64,
			8 => RasterDtype::Bool,
			_ => bail!("unknown dtype tag {tag}"),
		})
	}
}

impl Display for RasterDtype {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for RasterDtype {
	type Err = anyhow::Error;

	fn from_str(s: &str) -> Result<Self> {
		Ok(match s {
			"uint8" | "u8" => RasterDtype::U8,
			"uint16" | "u16" => RasterDtype::U16,
			"int16" | "i16" => RasterDtype::I16,
			"uint32" | "u32" => RasterDtype::U32,
			"int32" | "i32" => RasterDtype::I32,
			"float32" | "f32" => RasterDtype::F32,
			"float64" | "f64" => RasterDtype::F64,
			"bool" => RasterDtype::Bool,
			_ => bail!("unknown dtype name '{s}'"),
		})
	}
}
