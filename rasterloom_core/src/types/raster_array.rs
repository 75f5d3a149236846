//! Dtype-tagged raster pixel containers.
//!
//! A [`RasterArray`] holds the pixels of one raster window, shaped
//! `(rows, cols, bands)`. The dtype set is closed (see
//! [`RasterDtype`]); each variant wraps an [`ndarray::Array3`] of the
//! matching element type, and a small set of macros dispatches operations
//! across the variants.

use crate::{ErrorKind, RasterDtype};
use anyhow::{Result, ensure};
use ndarray::{Array2, Array3, Axis, s};
use std::fmt::{self, Debug};
use std::ops::Range;

/// One pixel element of a raster; the bridge between concrete scalar types
/// and [`RasterDtype`]s.
///
/// `from_f64` casts with saturation for integer types (`NaN` maps to 0);
/// `Bool` treats any non-zero, non-`NaN` value as `true`.
pub trait RasterElement: Copy + PartialEq + Send + Sync + 'static {
	const DTYPE: RasterDtype;
	fn from_f64(v: f64) -> Self;
	fn to_f64(self) -> f64;
}

macro_rules! impl_int_element {
	($t:ty, $dtype:expr) => {
		impl RasterElement for $t {
			const DTYPE: RasterDtype = $dtype;

			fn from_f64(v: f64) -> Self {
				if v.is_nan() {
					return 0;
				}
				num_traits::cast::<f64, $t>(v.round()).unwrap_or(if v > 0.0 { <$t>::MAX } else { <$t>::MIN })
			}

			fn to_f64(self) -> f64 {
				self as f64
			}
		}
	};
}

impl_int_element!(u8, RasterDtype::U8);
impl_int_element!(u16, RasterDtype::U16);
impl_int_element!(i16, RasterDtype::I16);
impl_int_element!(u32, RasterDtype::U32);
impl_int_element!(i32, RasterDtype::I32);

impl RasterElement for f32 {
	const DTYPE: RasterDtype = RasterDtype::F32;

	fn from_f64(v: f64) -> Self {
		v as f32
	}

	fn to_f64(self) -> f64 {
		f64::from(self)
	}
}

impl RasterElement for f64 {
	const DTYPE: RasterDtype = RasterDtype::F64;

	fn from_f64(v: f64) -> Self {
		v
	}

	fn to_f64(self) -> f64 {
		self
	}
}

impl RasterElement for bool {
	const DTYPE: RasterDtype = RasterDtype::Bool;

	fn from_f64(v: f64) -> Self {
		!v.is_nan() && v != 0.0
	}

	fn to_f64(self) -> f64 {
		if self { 1.0 } else { 0.0 }
	}
}

/// Pixels of one raster window, shaped `(rows, cols, bands)`.
#[derive(Clone, PartialEq)]
pub enum RasterArray {
	U8(Array3<u8>),
	U16(Array3<u16>),
	I16(Array3<i16>),
	U32(Array3<u32>),
	I32(Array3<i32>),
	F32(Array3<f32>),
	F64(Array3<f64>),
	Bool(Array3<bool>),
}

/// Runs `$body` with `$arr` bound to the inner `Array3<T>` of any variant.
macro_rules! each_variant {
	($value:expr, $arr:ident => $body:expr) => {
		match $value {
			RasterArray::U8($arr) => $body,
			RasterArray::U16($arr) => $body,
			RasterArray::I16($arr) => $body,
			RasterArray::U32($arr) => $body,
			RasterArray::I32($arr) => $body,
			RasterArray::F32($arr) => $body,
			RasterArray::F64($arr) => $body,
			RasterArray::Bool($arr) => $body,
		}
	};
}

/// Like `each_variant!` but rewraps the produced `Array3<T>` in the same
/// variant.
macro_rules! map_variant {
	($value:expr, $arr:ident => $body:expr) => {
		match $value {
			RasterArray::U8($arr) => RasterArray::U8($body),
			RasterArray::U16($arr) => RasterArray::U16($body),
			RasterArray::I16($arr) => RasterArray::I16($body),
			RasterArray::U32($arr) => RasterArray::U32($body),
			RasterArray::I32($arr) => RasterArray::I32($body),
			RasterArray::F32($arr) => RasterArray::F32($body),
			RasterArray::F64($arr) => RasterArray::F64($body),
			RasterArray::Bool($arr) => RasterArray::Bool($body),
		}
	};
}

/// Runs `$body` with both inner arrays when the variants match; yields `None`
/// on a dtype mismatch.
macro_rules! zip_variants {
	($a:expr, $b:expr, ($x:ident, $y:ident) => $body:expr) => {
		match ($a, $b) {
			(RasterArray::U8($x), RasterArray::U8($y)) => Some($body),
			(RasterArray::U16($x), RasterArray::U16($y)) => Some($body),
			(RasterArray::I16($x), RasterArray::I16($y)) => Some($body),
			(RasterArray::U32($x), RasterArray::U32($y)) => Some($body),
			(RasterArray::I32($x), RasterArray::I32($y)) => Some($body),
			(RasterArray::F32($x), RasterArray::F32($y)) => Some($body),
			(RasterArray::F64($x), RasterArray::F64($y)) => Some($body),
			(RasterArray::Bool($x), RasterArray::Bool($y)) => Some($body),
			_ => None,
		}
	};
}

/// Builds the variant for a runtime dtype from a closure generic over the
/// element type.
macro_rules! for_dtype {
	($dtype:expr, $t:ident => $body:expr) => {
		match $dtype {
			RasterDtype::U8 => {
				type $t = u8;
				RasterArray::U8($body)
			}
			RasterDtype::U16 => {
				type $t = u16;
				RasterArray::U16($body)
			}
			RasterDtype::I16 => {
				type $t = i16;
				RasterArray::I16($body)
			}
			RasterDtype::U32 => {
				type $t = u32;
				RasterArray::U32($body)
			}
			RasterDtype::I32 => {
				type $t = i32;
				RasterArray::I32($body)
			}
			RasterDtype::F32 => {
				type $t = f32;
				RasterArray::F32($body)
			}
			RasterDtype::F64 => {
				type $t = f64;
				RasterArray::F64($body)
			}
			RasterDtype::Bool => {
				type $t = bool;
				RasterArray::Bool($body)
			}
		}
	};
}

impl RasterArray {
	/// A `(rows, cols, bands)` array with every pixel set to `value`
	/// (saturating-cast from f64).
	#[must_use]
	pub fn filled(dtype: RasterDtype, shape: (usize, usize, usize), value: f64) -> RasterArray {
		for_dtype!(dtype, T => Array3::from_elem(shape, <T as RasterElement>::from_f64(value)))
	}

	/// A zero-initialized `(rows, cols, bands)` array.
	#[must_use]
	pub fn zeros(dtype: RasterDtype, shape: (usize, usize, usize)) -> RasterArray {
		Self::filled(dtype, shape, 0.0)
	}

	/// Builds an array of the given dtype from f64 data, casting each value
	/// with saturation.
	#[must_use]
	pub fn from_f64(dtype: RasterDtype, data: &Array3<f64>) -> RasterArray {
		for_dtype!(dtype, T => data.mapv(<T as RasterElement>::from_f64))
	}

	/// The dtype tag of this array.
	#[must_use]
	pub fn dtype(&self) -> RasterDtype {
		match self {
			RasterArray::U8(_) => RasterDtype::U8,
			RasterArray::U16(_) => RasterDtype::U16,
			RasterArray::I16(_) => RasterDtype::I16,
			RasterArray::U32(_) => RasterDtype::U32,
			RasterArray::I32(_) => RasterDtype::I32,
			RasterArray::F32(_) => RasterDtype::F32,
			RasterArray::F64(_) => RasterDtype::F64,
			RasterArray::Bool(_) => RasterDtype::Bool,
		}
	}

	/// `(rows, cols, bands)`.
	#[must_use]
	pub fn shape(&self) -> (usize, usize, usize) {
		each_variant!(self, a => a.dim())
	}

	#[must_use]
	pub fn band_count(&self) -> usize {
		self.shape().2
	}

	/// Memory footprint of the pixel data in bytes.
	#[must_use]
	pub fn byte_size(&self) -> usize {
		let (rows, cols, bands) = self.shape();
		rows * cols * bands * self.dtype().byte_size()
	}

	/// Copies a `rows × cols` window (all bands) out of this array.
	pub fn slice_window(&self, rows: Range<usize>, cols: Range<usize>) -> Result<RasterArray> {
		let (r, c, _) = self.shape();
		ensure!(
			rows.end <= r && cols.end <= c,
			ErrorKind::BadArgument(format!(
				"window rows {rows:?} cols {cols:?} exceeds array shape {:?}",
				self.shape()
			))
		);
		Ok(map_variant!(self, a => a.slice(s![rows.clone(), cols.clone(), ..]).to_owned()))
	}

	/// Copies the whole of `src` into this array at `(dst_row, dst_col)`.
	///
	/// Dtypes and band counts must match; the destination window must fit.
	pub fn copy_window_from(&mut self, src: &RasterArray, dst_row: usize, dst_col: usize) -> Result<()> {
		let (src_rows, src_cols, src_bands) = src.shape();
		let (rows, cols, bands) = self.shape();
		ensure!(
			src_bands == bands,
			ErrorKind::BadArgument(format!("band count mismatch: {src_bands} vs {bands}"))
		);
		ensure!(
			dst_row + src_rows <= rows && dst_col + src_cols <= cols,
			ErrorKind::BadArgument(format!(
				"window {src_rows}x{src_cols} at ({dst_row}, {dst_col}) exceeds array shape {rows}x{cols}"
			))
		);
		let self_dtype = self.dtype();
		let src_dtype = src.dtype();
		let copied = zip_variants!(self, src, (d, s) => {
			d.slice_mut(s![dst_row..dst_row + src_rows, dst_col..dst_col + src_cols, ..])
				.assign(s);
		});
		ensure!(
			copied.is_some(),
			ErrorKind::BadArgument(format!("dtype mismatch: {} vs {}", self_dtype, src_dtype))
		);
		Ok(())
	}

	/// Copies the whole of `src` into this array at `(dst_row, dst_col)`,
	/// band `i` of `src` landing in band `dst_bands[i]`.
	pub fn copy_bands_from(&mut self, src: &RasterArray, dst_row: usize, dst_col: usize, dst_bands: &[usize]) -> Result<()> {
		let (src_rows, src_cols, src_bands) = src.shape();
		let (rows, cols, bands) = self.shape();
		ensure!(
			src_bands == dst_bands.len(),
			ErrorKind::BadArgument(format!(
				"source has {src_bands} bands but {} destination bands were selected",
				dst_bands.len()
			))
		);
		ensure!(
			dst_row + src_rows <= rows && dst_col + src_cols <= cols,
			ErrorKind::BadArgument(format!(
				"window {src_rows}x{src_cols} at ({dst_row}, {dst_col}) exceeds array shape {rows}x{cols}"
			))
		);
		for &b in dst_bands {
			ensure!(
				b < bands,
				ErrorKind::BadArgument(format!("band index {b} out of range (raster has {bands} bands)"))
			);
		}
		let self_dtype = self.dtype();
		let src_dtype = src.dtype();
		let copied = zip_variants!(self, src, (d, s) => {
			for (i, &b) in dst_bands.iter().enumerate() {
				d.slice_mut(s![dst_row..dst_row + src_rows, dst_col..dst_col + src_cols, b..=b])
					.assign(&s.slice(s![.., .., i..=i]));
			}
		});
		ensure!(
			copied.is_some(),
			ErrorKind::BadArgument(format!("dtype mismatch: {} vs {}", self_dtype, src_dtype))
		);
		Ok(())
	}

	/// A new array holding the selected bands, in the given order.
	pub fn select_bands(&self, bands: &[usize]) -> Result<RasterArray> {
		ensure!(
			!bands.is_empty(),
			ErrorKind::BadArgument("band selection is empty".to_string())
		);
		let count = self.band_count();
		for &b in bands {
			ensure!(
				b < count,
				ErrorKind::BadArgument(format!("band index {b} out of range (raster has {count} bands)"))
			);
		}
		Ok(map_variant!(self, a => a.select(Axis(2), bands)))
	}

	/// One band as f64 values.
	pub fn band_to_f64(&self, band: usize) -> Result<Array2<f64>> {
		ensure!(
			band < self.band_count(),
			ErrorKind::BadArgument(format!("band index {band} out of range"))
		);
		Ok(each_variant!(self, a => a.index_axis(Axis(2), band).mapv(RasterElement::to_f64)))
	}

	/// The whole array as f64 values.
	#[must_use]
	pub fn to_f64_array(&self) -> Array3<f64> {
		each_variant!(self, a => a.mapv(RasterElement::to_f64))
	}

	/// One pixel as f64. Panics out of bounds; test and assembly helper.
	#[must_use]
	pub fn get(&self, row: usize, col: usize, band: usize) -> f64 {
		each_variant!(self, a => a[(row, col, band)].to_f64())
	}

	/// Sets every pixel of the selected bands to `value`
	/// (saturating-cast from f64).
	pub fn fill_value(&mut self, value: f64, bands: &[usize]) -> Result<()> {
		let count = self.band_count();
		for &b in bands {
			ensure!(
				b < count,
				ErrorKind::BadArgument(format!("band index {b} out of range (raster has {count} bands)"))
			);
		}
		each_variant!(self, a => {
			for &b in bands {
				a.index_axis_mut(Axis(2), b).fill(RasterElement::from_f64(value));
			}
		});
		Ok(())
	}
}

impl Debug for RasterArray {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let (rows, cols, bands) = self.shape();
		write!(f, "RasterArray({}, {rows}x{cols}x{bands})", self.dtype())
	}
}

/// Typed constructors, mostly for tests and the in-memory source.
impl<T: RasterElement> From<Array3<T>> for RasterArray
where
	RasterArray: FromTyped<T>,
{
	fn from(array: Array3<T>) -> Self {
		<RasterArray as FromTyped<T>>::from_typed(array)
	}
}

/// Wraps a typed `Array3` in the matching variant.
pub trait FromTyped<T> {
	fn from_typed(array: Array3<T>) -> RasterArray;
}

macro_rules! impl_from_typed {
	($t:ty, $variant:ident) => {
		impl FromTyped<$t> for RasterArray {
			fn from_typed(array: Array3<$t>) -> RasterArray {
				RasterArray::$variant(array)
			}
		}
	};
}

impl_from_typed!(u8, U8);
impl_from_typed!(u16, U16);
impl_from_typed!(i16, I16);
impl_from_typed!(u32, U32);
impl_from_typed!(i32, I32);
impl_from_typed!(f32, F32);
impl_from_typed!(f64, F64);
impl_from_typed!(bool, Bool);

#[cfg(test)]
mod tests {
	use super::*;
	use ndarray::arr3;
	use rstest::rstest;

	#[test]
	fn filled_uses_saturating_casts() {
		let a = RasterArray::filled(RasterDtype::U8, (2, 2, 1), 300.0);
		assert_eq!(a.get(0, 0, 0), 255.0);
		let b = RasterArray::filled(RasterDtype::I16, (1, 1, 1), -1e9);
		assert_eq!(b.get(0, 0, 0), f64::from(i16::MIN));
		let c = RasterArray::filled(RasterDtype::U8, (1, 1, 1), f64::NAN);
		assert_eq!(c.get(0, 0, 0), 0.0);
		let d = RasterArray::filled(RasterDtype::Bool, (1, 1, 1), 2.0);
		assert_eq!(d.get(0, 0, 0), 1.0);
	}

	#[rstest]
	#[case(RasterDtype::U8, 12)]
	#[case(RasterDtype::F64, 96)]
	#[case(RasterDtype::Bool, 12)]
	fn byte_size_follows_dtype(#[case] dtype: RasterDtype, #[case] expected: usize) {
		let a = RasterArray::zeros(dtype, (2, 3, 2));
		assert_eq!(a.byte_size(), expected);
	}

	#[test]
	fn slice_and_copy_roundtrip() {
		let mut dst = RasterArray::zeros(RasterDtype::U8, (4, 4, 1));
		let src = RasterArray::filled(RasterDtype::U8, (2, 2, 1), 7.0);
		dst.copy_window_from(&src, 1, 2).unwrap();
		assert_eq!(dst.get(1, 2, 0), 7.0);
		assert_eq!(dst.get(2, 3, 0), 7.0);
		assert_eq!(dst.get(0, 0, 0), 0.0);

		let window = dst.slice_window(1..3, 2..4).unwrap();
		assert_eq!(window, src);
	}

	#[test]
	fn copy_rejects_mismatches() {
		let mut dst = RasterArray::zeros(RasterDtype::U8, (4, 4, 1));
		let wrong_dtype = RasterArray::zeros(RasterDtype::U16, (2, 2, 1));
		assert!(dst.copy_window_from(&wrong_dtype, 0, 0).is_err());
		let wrong_bands = RasterArray::zeros(RasterDtype::U8, (2, 2, 2));
		assert!(dst.copy_window_from(&wrong_bands, 0, 0).is_err());
		let too_big = RasterArray::zeros(RasterDtype::U8, (3, 3, 1));
		assert!(dst.copy_window_from(&too_big, 2, 2).is_err());
	}

	#[test]
	fn copy_bands_targets_the_selection() {
		let mut dst = RasterArray::zeros(RasterDtype::U8, (2, 2, 3));
		let src = RasterArray::from(arr3(&[[[1u8], [2]], [[3], [4]]]));
		dst.copy_bands_from(&src, 0, 0, &[2]).unwrap();
		assert_eq!(dst.get(0, 0, 2), 1.0);
		assert_eq!(dst.get(1, 1, 2), 4.0);
		assert_eq!(dst.get(0, 0, 0), 0.0);
		assert!(dst.copy_bands_from(&src, 0, 0, &[3]).is_err());
		assert!(dst.copy_bands_from(&src, 0, 0, &[0, 1]).is_err());
	}

	#[test]
	fn fill_value_targets_bands() {
		let mut a = RasterArray::zeros(RasterDtype::U8, (2, 2, 2));
		a.fill_value(9.0, &[1]).unwrap();
		assert_eq!(a.get(0, 0, 0), 0.0);
		assert_eq!(a.get(1, 1, 1), 9.0);
		assert!(a.fill_value(1.0, &[2]).is_err());
	}

	#[test]
	fn select_bands_reorders() {
		let a = RasterArray::from(arr3(&[[[1u8, 2], [3, 4]], [[5, 6], [7, 8]]]));
		let b = a.select_bands(&[1, 0]).unwrap();
		assert_eq!(b.get(0, 0, 0), 2.0);
		assert_eq!(b.get(0, 0, 1), 1.0);
		assert!(a.select_bands(&[2]).is_err());
		assert!(a.select_bands(&[]).is_err());
	}

	#[test]
	fn f64_roundtrip_saturates() {
		let data = arr3(&[[[0.4], [254.6]], [[300.0], [-5.0]]]);
		let a = RasterArray::from_f64(RasterDtype::U8, &data);
		assert_eq!(a.get(0, 0, 0), 0.0);
		assert_eq!(a.get(0, 1, 0), 255.0);
		assert_eq!(a.get(1, 0, 0), 255.0);
		assert_eq!(a.get(1, 1, 0), 0.0);
	}

	#[test]
	fn band_to_f64_extracts_one_band() {
		let a = RasterArray::from(arr3(&[[[1u8, 10], [2, 20]]]));
		let band = a.band_to_f64(1).unwrap();
		assert_eq!(band[(0, 0)], 10.0);
		assert_eq!(band[(0, 1)], 20.0);
		assert!(a.band_to_f64(2).is_err());
	}

	#[test]
	fn debug_is_compact() {
		let a = RasterArray::zeros(RasterDtype::F32, (512, 512, 3));
		assert_eq!(format!("{a:?}"), "RasterArray(float32, 512x512x3)");
	}
}
