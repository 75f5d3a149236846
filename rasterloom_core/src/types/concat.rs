//! Reassembling one array from same-grid chunks.

use crate::{ErrorKind, Footprint, RasterArray};
use anyhow::{Result, ensure};
use rasterloom_derive::context;

/// Concatenates same-grid chunks into one array covering exactly `fp`.
///
/// Chunks may extend beyond `fp`; the overhang is clipped. Every pixel of
/// `fp` must be covered by exactly one chunk; gaps and overlaps are both
/// rejected. This is the default `merge_arrays` of recipes.
///
/// # Example
/// ```
/// # use rasterloom_core::{Footprint, RasterArray, RasterDtype, concat_chunks};
/// let fp = Footprint::north_up((0.0, 0.0), (1.0, 1.0), (4, 2)).unwrap();
/// let left = fp.sub_footprint(0, 0, 2, 2).unwrap();
/// let right = fp.sub_footprint(2, 0, 2, 2).unwrap();
/// let arr = concat_chunks(
///     &fp,
///     &[
///         (left, RasterArray::filled(RasterDtype::U8, (2, 2, 1), 1.0)),
///         (right, RasterArray::filled(RasterDtype::U8, (2, 2, 1), 2.0)),
///     ],
/// )
/// .unwrap();
/// assert_eq!(arr.get(0, 0, 0), 1.0);
/// assert_eq!(arr.get(0, 3, 0), 2.0);
/// ```
#[context("concatenating {} chunks into {fp:?}", chunks.len())]
pub fn concat_chunks(fp: &Footprint, chunks: &[(Footprint, RasterArray)]) -> Result<RasterArray> {
	ensure!(
		!chunks.is_empty(),
		ErrorKind::BadArgument("cannot concatenate zero chunks".to_string())
	);
	let dtype = chunks[0].1.dtype();
	let bands = chunks[0].1.band_count();

	let (rows, cols) = fp.shape();
	let mut out = RasterArray::zeros(dtype, (rows, cols, bands));
	let mut covered = vec![false; rows * cols];

	for (chunk_fp, chunk) in chunks {
		ensure!(
			chunk.dtype() == dtype && chunk.band_count() == bands,
			ErrorKind::BadArgument(format!(
				"chunk {chunk:?} does not match the first chunk's dtype/bands ({dtype}, {bands})"
			))
		);
		ensure!(
			chunk.shape().0 == chunk_fp.ry() as usize && chunk.shape().1 == chunk_fp.rx() as usize,
			ErrorKind::BadArgument(format!("chunk {chunk:?} does not match its footprint {chunk_fp:?}"))
		);

		let overlap = match fp.intersection(chunk_fp) {
			Ok(overlap) => overlap,
			Err(err) if matches!(ErrorKind::of(&err), Some(ErrorKind::NoOverlap)) => continue,
			Err(err) => return Err(err),
		};
		let (src_rows, src_cols) = overlap.slice_in(chunk_fp)?;
		let (dst_rows, dst_cols) = overlap.slice_in(fp)?;

		for r in dst_rows.clone() {
			for c in dst_cols.clone() {
				let cell = &mut covered[r * cols + c];
				ensure!(
					!*cell,
					ErrorKind::BadArgument(format!("chunks overlap at pixel ({r}, {c}) of {fp:?}"))
				);
				*cell = true;
			}
		}

		let window = chunk.slice_window(src_rows, src_cols)?;
		out.copy_window_from(&window, dst_rows.start, dst_cols.start)?;
	}

	ensure!(
		covered.iter().all(|&c| c),
		ErrorKind::BadArgument(format!(
			"chunks leave {} of {} pixels of {fp:?} uncovered",
			covered.iter().filter(|&&c| !c).count(),
			covered.len()
		))
	);
	Ok(out)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::RasterDtype;

	fn fp(tl: (f64, f64), size: (u32, u32)) -> Footprint {
		Footprint::north_up(tl, (1.0, 1.0), size).unwrap()
	}

	#[test]
	fn chunks_with_overhang_are_clipped() {
		let target = fp((0.0, 0.0), (2, 2));
		// one chunk covering the target plus a border on every side
		let big_fp = target.sub_footprint(-1, -1, 4, 4).unwrap();
		let big = RasterArray::filled(RasterDtype::U16, (4, 4, 1), 9.0);
		let out = concat_chunks(&target, &[(big_fp, big)]).unwrap();
		assert_eq!(out.shape(), (2, 2, 1));
		assert_eq!(out.get(1, 1, 0), 9.0);
	}

	#[test]
	fn gaps_are_rejected() {
		let target = fp((0.0, 0.0), (4, 2));
		let left = target.sub_footprint(0, 0, 2, 2).unwrap();
		let err = concat_chunks(
			&target,
			&[(left, RasterArray::zeros(RasterDtype::U8, (2, 2, 1)))],
		)
		.unwrap_err();
		assert!(matches!(ErrorKind::of(&err), Some(ErrorKind::BadArgument(_))));
	}

	#[test]
	fn overlapping_chunks_are_rejected() {
		let target = fp((0.0, 0.0), (4, 2));
		let left = target.sub_footprint(0, 0, 3, 2).unwrap();
		let right = target.sub_footprint(2, 0, 2, 2).unwrap();
		assert!(
			concat_chunks(
				&target,
				&[
					(left, RasterArray::zeros(RasterDtype::U8, (2, 3, 1))),
					(right, RasterArray::zeros(RasterDtype::U8, (2, 2, 1))),
				],
			)
			.is_err()
		);
	}

	#[test]
	fn zero_chunks_is_an_error() {
		assert!(concat_chunks(&fp((0.0, 0.0), (2, 2)), &[]).is_err());
	}
}
