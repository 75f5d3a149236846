//! Cache fingerprints.
//!
//! A fingerprint identifies the *content* a cache directory holds: the raster
//! geometry, the cache tiling, dtype, band count and schema, spatial
//! reference, and the identity of the compute function. Two recipes with the
//! same tiling but different logic must never share cache files, so the
//! compute identity is always part of the hash.
//!
//! The hash is a stable 64-bit seahash over a canonical byte encoding,
//! rendered as 16 lowercase hex digits in cache filenames.

use rasterloom_core::{BandSchema, Footprint, RasterDtype};
use seahash::SeaHasher;
use std::hash::Hasher;

fn write_footprint(hasher: &mut SeaHasher, fp: &Footprint) {
	for v in [fp.tl().0, fp.tl().1, fp.ax().0, fp.ax().1, fp.ay().0, fp.ay().1] {
		hasher.write_u64(v.to_bits());
	}
	hasher.write_u32(fp.rx());
	hasher.write_u32(fp.ry());
}

/// Computes the fingerprint of a cached recipe.
#[must_use]
pub fn recipe_fingerprint(
	raster_fp: &Footprint,
	cache_tiling: &[Vec<Footprint>],
	dtype: RasterDtype,
	band_count: usize,
	band_schema: &BandSchema,
	sr: Option<&str>,
	compute_id: &str,
) -> u64 {
	let mut hasher = SeaHasher::default();
	write_footprint(&mut hasher, raster_fp);
	hasher.write_usize(cache_tiling.len());
	for row in cache_tiling {
		hasher.write_usize(row.len());
		for tile in row {
			write_footprint(&mut hasher, tile);
		}
	}
	hasher.write_u8(dtype.tag());
	hasher.write_usize(band_count);
	hasher.write(band_schema.fingerprint_text().as_bytes());
	hasher.write(sr.unwrap_or("").as_bytes());
	hasher.write_u8(0);
	hasher.write(compute_id.as_bytes());
	hasher.finish()
}

/// The 16-hex-digit rendering used as the cache filename prefix.
#[must_use]
pub fn fingerprint_hex(fingerprint: u64) -> String {
	format!("{fingerprint:016x}")
}
