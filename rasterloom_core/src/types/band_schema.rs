//! Per-band metadata of raster sources.

use anyhow::{Result, ensure};
use std::fmt::Write;

/// Color role of a single band.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Interpretation {
	#[default]
	Undefined,
	Gray,
	Red,
	Green,
	Blue,
	Alpha,
	Hue,
	Saturation,
	Lightness,
	Palette,
}

impl Interpretation {
	/// Stable single-byte tag used by file headers.
	#[must_use]
	pub fn tag(&self) -> u8 {
		match self {
			Interpretation::Undefined => 0,
			Interpretation::Gray => 1,
			Interpretation::Red => 2,
			Interpretation::Green => 3,
			Interpretation::Blue => 4,
			Interpretation::Alpha => 5,
			Interpretation::Hue => 6,
			Interpretation::Saturation => 7,
			Interpretation::Lightness => 8,
			Interpretation::Palette => 9,
		}
	}

	pub fn from_tag(tag: u8) -> Result<Interpretation> {
		Ok(match tag {
			0 => Interpretation::Undefined,
			1 => Interpretation::Gray,
			2 => Interpretation::Red,
			3 => Interpretation::Green,
			4 => Interpretation::Blue,
			5 => Interpretation::Alpha,
			6 => Interpretation::Hue,
			7 => Interpretation::Saturation,
			8 => Interpretation::Lightness,
			9 => Interpretation::Palette,
			_ => anyhow::bail!("unknown interpretation tag {tag}"),
		})
	}
}

/// How invalid pixels of a band are flagged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MaskKind {
	/// Every pixel is valid.
	#[default]
	AllValid,
	/// One mask shared by all bands of the dataset.
	PerDataset,
	/// Validity is carried by an alpha band.
	Alpha,
	/// Validity is encoded by the nodata value.
	Nodata,
}

impl MaskKind {
	/// Stable single-byte tag used by file headers.
	#[must_use]
	pub fn tag(&self) -> u8 {
		match self {
			MaskKind::AllValid => 0,
			MaskKind::PerDataset => 1,
			MaskKind::Alpha => 2,
			MaskKind::Nodata => 3,
		}
	}

	pub fn from_tag(tag: u8) -> Result<MaskKind> {
		Ok(match tag {
			0 => MaskKind::AllValid,
			1 => MaskKind::PerDataset,
			2 => MaskKind::Alpha,
			3 => MaskKind::Nodata,
			_ => anyhow::bail!("unknown mask kind tag {tag}"),
		})
	}
}

/// Metadata of one band: nodata value, color interpretation, affine value
/// transform and mask kind.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BandFields {
	pub nodata: Option<f64>,
	pub interpretation: Interpretation,
	pub offset: f64,
	pub scale: f64,
	pub mask: MaskKind,
}

impl Default for BandFields {
	fn default() -> Self {
		Self {
			nodata: None,
			interpretation: Interpretation::Undefined,
			offset: 0.0,
			scale: 1.0,
			mask: MaskKind::AllValid,
		}
	}
}

impl BandFields {
	/// Shorthand for a band whose only non-default field is `nodata`.
	#[must_use]
	pub fn with_nodata(nodata: f64) -> Self {
		Self {
			nodata: Some(nodata),
			mask: MaskKind::Nodata,
			..Self::default()
		}
	}
}

/// Band metadata of a whole raster, one [`BandFields`] per band.
///
/// A schema is built either by broadcasting one `BandFields` across every
/// band or by specifying every band explicitly; mixed forms are rejected.
///
/// # Example
/// ```
/// use rasterloom_core::{BandFields, BandSchema};
///
/// let schema = BandSchema::broadcast(BandFields::with_nodata(-9999.0), 3);
/// assert_eq!(schema.band_count(), 3);
/// assert_eq!(schema.band(2).nodata, Some(-9999.0));
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct BandSchema {
	bands: Vec<BandFields>,
}

impl BandSchema {
	/// Builds a schema from one `BandFields` per band.
	pub fn new(bands: Vec<BandFields>) -> Result<BandSchema> {
		ensure!(!bands.is_empty(), "a band schema needs at least one band");
		Ok(BandSchema { bands })
	}

	/// Repeats `fields` across `band_count` bands.
	#[must_use]
	pub fn broadcast(fields: BandFields, band_count: usize) -> BandSchema {
		BandSchema {
			bands: vec![fields; band_count.max(1)],
		}
	}

	/// All-default schema for `band_count` bands.
	#[must_use]
	pub fn all_default(band_count: usize) -> BandSchema {
		Self::broadcast(BandFields::default(), band_count)
	}

	/// Resolves an optional caller-supplied schema against a band count:
	/// absent schemas default, single-band schemas broadcast, anything else
	/// must match exactly.
	pub fn resolve(schema: Option<BandSchema>, band_count: usize) -> Result<BandSchema> {
		ensure!(band_count >= 1, "band count must be >= 1");
		Ok(match schema {
			None => Self::all_default(band_count),
			Some(schema) if schema.band_count() == 1 && band_count > 1 => Self::broadcast(*schema.band(0), band_count),
			Some(schema) => {
				schema.validate(band_count)?;
				schema
			}
		})
	}

	/// Checks the schema against the band count declared by a source.
	pub fn validate(&self, band_count: usize) -> Result<()> {
		ensure!(
			self.bands.len() == band_count,
			"band schema has {} bands but the raster declares {band_count}",
			self.bands.len()
		);
		Ok(())
	}

	#[must_use]
	pub fn band_count(&self) -> usize {
		self.bands.len()
	}

	/// Fields of band `index` (0-based). Panics on out-of-range indices;
	/// callers validate band selections at the API boundary.
	#[must_use]
	pub fn band(&self, index: usize) -> &BandFields {
		&self.bands[index]
	}

	pub fn iter(&self) -> impl Iterator<Item = &BandFields> {
		self.bands.iter()
	}

	/// Nodata of band 0, the value used as the default `dst_nodata`.
	#[must_use]
	pub fn shared_nodata(&self) -> Option<f64> {
		self.bands[0].nodata
	}

	/// Stable textual encoding, a component of cache fingerprints.
	#[must_use]
	pub fn fingerprint_text(&self) -> String {
		let mut out = String::new();
		for b in &self.bands {
			let _ = write!(
				out,
				"[{:?}|{:?}|{}|{}|{:?}]",
				b.nodata, b.interpretation, b.offset, b.scale, b.mask
			);
		}
		out
	}
}
