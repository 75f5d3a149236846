//! Spatial reference rules of a data source container.
//!
//! The container works in one coordinate frame (`sr_work`); each source
//! declares (or omits) the frame its storage uses (`sr_stored`). The rule
//! derived from the `(sr_work, sr_fallback, sr_forced)` triple decides which
//! frame a source is *treated* as (`sr_virtual`), and the converter seam
//! turns footprints between frames. Raster content is never warped; only
//! the footprint is converted.

use anyhow::{Result, bail, ensure};
use rasterloom_core::{ErrorKind, Footprint};
use rasterloom_derive::context;
use std::fmt::Debug;
use std::sync::Arc;

/// Pure footprint conversion between two named spatial references.
///
/// Implemented by the external SR library binding; the default
/// [`IdentityConverter`] treats every frame as equal.
pub trait FootprintConverter: Debug + Send + Sync {
	fn convert_footprint(&self, fp: &Footprint, from: &str, to: &str) -> Result<Footprint>;
}

/// Converter that never changes a footprint.
#[derive(Debug, Default)]
pub struct IdentityConverter;

impl FootprintConverter for IdentityConverter {
	fn convert_footprint(&self, fp: &Footprint, _from: &str, _to: &str) -> Result<Footprint> {
		Ok(*fp)
	}
}

/// The four legal `(sr_work, sr_fallback, sr_forced)` combinations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SrRule {
	/// No working frame: every source is used as stored, unconverted.
	NoConversion,
	/// Use each source's `sr_stored`; a source without one is an error.
	FromStored { work: String },
	/// Use `sr_stored`, treating sources without one as `fallback`.
	WithFallback { work: String, fallback: String },
	/// Ignore `sr_stored`; every source is treated as `forced`.
	Forced { work: String, forced: String },
}

impl SrRule {
	/// Derives the rule from the constructor triple.
	///
	/// # Errors
	/// `BadSrMode` for any combination outside the four-row table.
	pub fn derive(work: Option<String>, fallback: Option<String>, forced: Option<String>) -> Result<SrRule> {
		Ok(match (work, fallback, forced) {
			(None, None, None) => SrRule::NoConversion,
			(Some(work), None, None) => SrRule::FromStored { work },
			(Some(work), Some(fallback), None) => SrRule::WithFallback { work, fallback },
			(Some(work), None, Some(forced)) => SrRule::Forced { work, forced },
			_ => bail!(ErrorKind::BadSrMode),
		})
	}

	/// The container's working frame, if any.
	#[must_use]
	pub fn sr_work(&self) -> Option<&str> {
		match self {
			SrRule::NoConversion => None,
			SrRule::FromStored { work } | SrRule::WithFallback { work, .. } | SrRule::Forced { work, .. } => Some(work),
		}
	}

	/// The frame a source with the given `sr_stored` is treated as.
	pub fn sr_virtual(&self, sr_stored: Option<&str>) -> Result<Option<String>> {
		Ok(match self {
			SrRule::NoConversion => None,
			SrRule::FromStored { .. } => match sr_stored {
				Some(stored) => Some(stored.to_string()),
				None => bail!(ErrorKind::BadArgument(
					"source has no stored spatial reference and no sr_fallback was given".to_string()
				)),
			},
			SrRule::WithFallback { fallback, .. } => Some(sr_stored.unwrap_or(fallback.as_str()).to_string()),
			SrRule::Forced { forced, .. } => Some(forced.clone()),
		})
	}
}

/// The container-wide conversion context handed to every source: the rule,
/// the converter and the loss-analysis settings.
#[derive(Clone, Debug)]
pub struct SrFrame {
	pub rule: SrRule,
	pub converter: Arc<dyn FootprintConverter>,
	pub analyse_transformation: bool,
	pub significant_digits: u8,
}

impl SrFrame {
	#[must_use]
	pub fn no_conversion() -> SrFrame {
		SrFrame {
			rule: SrRule::NoConversion,
			converter: Arc::new(IdentityConverter),
			analyse_transformation: true,
			significant_digits: 9,
		}
	}

	/// Converts a stored-frame footprint into the working frame, analysing
	/// the round trip for precision loss when configured to.
	#[context("converting footprint to the working frame")]
	pub fn to_work(&self, fp: &Footprint, sr_stored: Option<&str>) -> Result<Footprint> {
		let Some(virt) = self.rule.sr_virtual(sr_stored)? else {
			return Ok(*fp);
		};
		let Some(work) = self.rule.sr_work() else {
			return Ok(*fp);
		};
		if virt == work {
			return Ok(*fp);
		}
		let converted = self.converter.convert_footprint(fp, &virt, work)?;
		if self.analyse_transformation {
			self.analyse(fp, &converted, &virt, work)?;
		}
		Ok(converted)
	}

	/// Converts a working-frame footprint back into a source's virtual frame.
	#[context("converting footprint from the working frame")]
	pub fn from_work(&self, fp: &Footprint, sr_stored: Option<&str>) -> Result<Footprint> {
		let Some(virt) = self.rule.sr_virtual(sr_stored)? else {
			return Ok(*fp);
		};
		let Some(work) = self.rule.sr_work() else {
			return Ok(*fp);
		};
		if virt == work {
			return Ok(*fp);
		}
		self.converter.convert_footprint(fp, work, &virt)
	}

	/// Round-trips the conversion and compares corners at the configured
	/// number of significant digits.
	fn analyse(&self, original: &Footprint, converted: &Footprint, from: &str, to: &str) -> Result<()> {
		let back = self.converter.convert_footprint(converted, to, from)?;
		let tolerance = 10f64.powi(-i32::from(self.significant_digits));
		for (a, b) in original.poly().iter().zip(back.poly().iter()) {
			let scale = a.0.abs().max(a.1.abs()).max(1.0);
			let err = ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt() / scale;
			ensure!(
				err <= tolerance,
				ErrorKind::SrConversionLossy(format!(
					"round trip {from} -> {to} -> {from} moves a corner by a relative {err:.2e} (tolerance {tolerance:.2e})"
				))
			);
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[test]
	fn the_four_legal_modes() {
		let w = || Some("EPSG:32632".to_string());
		let f = || Some("WGS84".to_string());
		assert_eq!(SrRule::derive(None, None, None).unwrap(), SrRule::NoConversion);
		assert!(matches!(SrRule::derive(w(), None, None).unwrap(), SrRule::FromStored { .. }));
		assert!(matches!(
			SrRule::derive(w(), f(), None).unwrap(),
			SrRule::WithFallback { .. }
		));
		assert!(matches!(SrRule::derive(w(), None, f()).unwrap(), SrRule::Forced { .. }));
	}

	#[rstest]
	#[case(None, None, Some("WGS84"))]
	#[case(None, Some("WGS84"), None)]
	#[case(None, Some("WGS84"), Some("WGS84"))]
	#[case(Some("EPSG:32632"), Some("WGS84"), Some("WGS84"))]
	fn illegal_modes_fail(#[case] work: Option<&str>, #[case] fallback: Option<&str>, #[case] forced: Option<&str>) {
		let err = SrRule::derive(
			work.map(str::to_string),
			fallback.map(str::to_string),
			forced.map(str::to_string),
		)
		.unwrap_err();
		assert!(matches!(ErrorKind::of(&err), Some(ErrorKind::BadSrMode)));
	}

	#[test]
	fn virtual_frame_resolution() {
		let from_stored = SrRule::derive(Some("A".into()), None, None).unwrap();
		assert_eq!(from_stored.sr_virtual(Some("B")).unwrap(), Some("B".to_string()));
		assert!(from_stored.sr_virtual(None).is_err());

		let fallback = SrRule::derive(Some("A".into()), Some("F".into()), None).unwrap();
		assert_eq!(fallback.sr_virtual(None).unwrap(), Some("F".to_string()));
		assert_eq!(fallback.sr_virtual(Some("B")).unwrap(), Some("B".to_string()));

		let forced = SrRule::derive(Some("A".into()), None, Some("X".into())).unwrap();
		assert_eq!(forced.sr_virtual(Some("B")).unwrap(), Some("X".to_string()));
	}

	/// A converter that doubles coordinates one way but does not invert
	/// exactly, to exercise the loss analysis.
	#[derive(Debug)]
	struct LossyConverter;

	impl FootprintConverter for LossyConverter {
		fn convert_footprint(&self, fp: &Footprint, from: &str, _to: &str) -> Result<Footprint> {
			let factor = if from == "A" { 2.0 } else { 0.5001 };
			let tl = fp.tl();
			let ax = fp.ax();
			let ay = fp.ay();
			Footprint::new(
				(tl.0 * factor, tl.1 * factor),
				(ax.0 * factor, ax.1 * factor),
				(ay.0 * factor, ay.1 * factor),
				(fp.rx(), fp.ry()),
			)
		}
	}

	#[test]
	fn lossy_round_trips_are_detected() {
		let frame = SrFrame {
			rule: SrRule::derive(Some("B".into()), None, Some("A".into())).unwrap(),
			converter: Arc::new(LossyConverter),
			analyse_transformation: true,
			significant_digits: 6,
		};
		let fp = Footprint::north_up((100.0, 100.0), (1.0, 1.0), (4, 4)).unwrap();
		let err = frame.to_work(&fp, None).unwrap_err();
		assert!(matches!(ErrorKind::of(&err), Some(ErrorKind::SrConversionLossy(_))));

		let relaxed = SrFrame {
			analyse_transformation: false,
			..frame
		};
		assert!(relaxed.to_work(&fp, None).is_ok());
	}

	#[test]
	fn identity_frames_skip_conversion() {
		let frame = SrFrame::no_conversion();
		let fp = Footprint::north_up((0.0, 0.0), (1.0, 1.0), (2, 2)).unwrap();
		assert_eq!(frame.to_work(&fp, Some("anything")).unwrap(), fp);
		assert_eq!(frame.from_work(&fp, Some("anything")).unwrap(), fp);
	}
}
