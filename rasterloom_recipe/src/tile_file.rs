//! The cache tile file codec.
//!
//! A cache tile is a self-describing single-file raster: a fixed header
//! (magic, version, footprint, dtype, band count, optional spatial
//! reference) followed by the pixels, row-major and band-interleaved, in
//! little-endian byte order.
//!
//! Writes go to a `<final>.tmp.<uuid>` sibling, are fsynced, and land under
//! the final name with an atomic rename. Readers only ever open final names,
//! so a crash mid-write leaves nothing visible.

use anyhow::{Result, ensure};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rasterloom_core::{BandFields, BandSchema, ErrorKind, Footprint, Interpretation, MaskKind, RasterArray, RasterDtype};
use rasterloom_derive::context;
use std::fs::{File, rename};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use uuid::Uuid;

const MAGIC: &[u8; 4] = b"RLTF";
const VERSION: u8 = 1;

/// Decoded header of a tile file.
#[derive(Clone, Debug, PartialEq)]
pub struct TileHeader {
	pub fp: Footprint,
	pub dtype: RasterDtype,
	pub band_count: usize,
	pub band_schema: BandSchema,
	pub sr: Option<String>,
}

fn write_header(
	out: &mut impl Write,
	fp: &Footprint,
	dtype: RasterDtype,
	band_schema: &BandSchema,
	sr: Option<&str>,
) -> Result<()> {
	out.write_all(MAGIC)?;
	out.write_u8(VERSION)?;
	for v in [fp.tl().0, fp.tl().1, fp.ax().0, fp.ax().1, fp.ay().0, fp.ay().1] {
		out.write_f64::<LittleEndian>(v)?;
	}
	out.write_u32::<LittleEndian>(fp.rx())?;
	out.write_u32::<LittleEndian>(fp.ry())?;
	out.write_u8(dtype.tag())?;
	out.write_u16::<LittleEndian>(band_schema.band_count() as u16)?;
	for band in band_schema.iter() {
		match band.nodata {
			Some(nodata) => {
				out.write_u8(1)?;
				out.write_f64::<LittleEndian>(nodata)?;
			}
			None => {
				out.write_u8(0)?;
				out.write_f64::<LittleEndian>(0.0)?;
			}
		}
		out.write_u8(band.interpretation.tag())?;
		out.write_f64::<LittleEndian>(band.offset)?;
		out.write_f64::<LittleEndian>(band.scale)?;
		out.write_u8(band.mask.tag())?;
	}
	let sr = sr.unwrap_or("");
	out.write_u32::<LittleEndian>(sr.len() as u32)?;
	out.write_all(sr.as_bytes())?;
	Ok(())
}

fn read_header_from(input: &mut impl Read) -> Result<TileHeader> {
	let mut magic = [0u8; 4];
	input.read_exact(&mut magic)?;
	ensure!(&magic == MAGIC, "not a tile file (bad magic {magic:?})");
	let version = input.read_u8()?;
	ensure!(version == VERSION, "unsupported tile file version {version}");

	let mut coords = [0f64; 6];
	for c in &mut coords {
		*c = input.read_f64::<LittleEndian>()?;
	}
	let rx = input.read_u32::<LittleEndian>()?;
	let ry = input.read_u32::<LittleEndian>()?;
	let fp = Footprint::new(
		(coords[0], coords[1]),
		(coords[2], coords[3]),
		(coords[4], coords[5]),
		(rx, ry),
	)?;

	let dtype = RasterDtype::from_tag(input.read_u8()?)?;
	let band_count = input.read_u16::<LittleEndian>()? as usize;
	ensure!(band_count >= 1, "tile file declares zero bands");
	let mut bands = Vec::with_capacity(band_count);
	for _ in 0..band_count {
		let has_nodata = input.read_u8()? != 0;
		let nodata_value = input.read_f64::<LittleEndian>()?;
		let interpretation = Interpretation::from_tag(input.read_u8()?)?;
		let offset = input.read_f64::<LittleEndian>()?;
		let scale = input.read_f64::<LittleEndian>()?;
		let mask = MaskKind::from_tag(input.read_u8()?)?;
		bands.push(BandFields {
			nodata: has_nodata.then_some(nodata_value),
			interpretation,
			offset,
			scale,
			mask,
		});
	}
	let band_schema = BandSchema::new(bands)?;
	let sr_len = input.read_u32::<LittleEndian>()? as usize;
	let sr = if sr_len == 0 {
		None
	} else {
		let mut buf = vec![0u8; sr_len];
		input.read_exact(&mut buf)?;
		Some(String::from_utf8(buf)?)
	};

	Ok(TileHeader {
		fp,
		dtype,
		band_count,
		band_schema,
		sr,
	})
}

fn write_pixels(out: &mut impl Write, array: &RasterArray) -> Result<()> {
	let flat = array.to_f64_array();
	let dtype = array.dtype();
	match dtype {
		RasterDtype::U8 | RasterDtype::Bool => {
			for &v in &flat {
				out.write_u8(v as u8)?;
			}
		}
		RasterDtype::U16 => {
			for &v in &flat {
				out.write_u16::<LittleEndian>(v as u16)?;
			}
		}
		RasterDtype::I16 => {
			for &v in &flat {
				out.write_i16::<LittleEndian>(v as i16)?;
			}
		}
		RasterDtype::U32 => {
			for &v in &flat {
				out.write_u32::<LittleEndian>(v as u32)?;
			}
		}
		RasterDtype::I32 => {
			for &v in &flat {
				out.write_i32::<LittleEndian>(v as i32)?;
			}
		}
		RasterDtype::F32 => {
			for &v in &flat {
				out.write_f32::<LittleEndian>(v as f32)?;
			}
		}
		RasterDtype::F64 => {
			for &v in &flat {
				out.write_f64::<LittleEndian>(v)?;
			}
		}
	}
	Ok(())
}

fn read_pixels(input: &mut impl Read, header: &TileHeader) -> Result<RasterArray> {
	let (rows, cols) = header.fp.shape();
	let shape = (rows, cols, header.band_count);
	let count = rows * cols * header.band_count;
	let mut flat = ndarray::Array3::<f64>::zeros(shape);
	{
		let slice = flat.as_slice_mut().expect("freshly allocated arrays are contiguous");
		match header.dtype {
			RasterDtype::U8 | RasterDtype::Bool => {
				let mut buf = vec![0u8; count];
				input.read_exact(&mut buf)?;
				for (dst, src) in slice.iter_mut().zip(buf) {
					*dst = f64::from(src);
				}
			}
			RasterDtype::U16 => {
				for dst in slice.iter_mut() {
					*dst = f64::from(input.read_u16::<LittleEndian>()?);
				}
			}
			RasterDtype::I16 => {
				for dst in slice.iter_mut() {
					*dst = f64::from(input.read_i16::<LittleEndian>()?);
				}
			}
			RasterDtype::U32 => {
				for dst in slice.iter_mut() {
					*dst = f64::from(input.read_u32::<LittleEndian>()?);
				}
			}
			RasterDtype::I32 => {
				for dst in slice.iter_mut() {
					*dst = f64::from(input.read_i32::<LittleEndian>()?);
				}
			}
			RasterDtype::F32 => {
				for dst in slice.iter_mut() {
					*dst = f64::from(input.read_f32::<LittleEndian>()?);
				}
			}
			RasterDtype::F64 => {
				for dst in slice.iter_mut() {
					*dst = input.read_f64::<LittleEndian>()?;
				}
			}
		}
	}
	Ok(RasterArray::from_f64(header.dtype, &flat))
}

/// Writes a tile file atomically: temp sibling, fsync, rename.
#[context("writing cache tile '{}'", path.display())]
pub fn write_tile_atomic(
	path: &Path,
	fp: &Footprint,
	band_schema: &BandSchema,
	sr: Option<&str>,
	array: &RasterArray,
) -> Result<()> {
	let (rows, cols, bands) = array.shape();
	ensure!(
		(rows, cols) == fp.shape(),
		ErrorKind::BadArgument(format!("array {array:?} does not match the tile footprint {fp:?}"))
	);
	band_schema.validate(bands)?;

	let file_name = path
		.file_name()
		.and_then(|n| n.to_str())
		.ok_or_else(|| ErrorKind::BadArgument(format!("bad tile path '{}'", path.display())))?;
	let tmp_path = path.with_file_name(format!("{file_name}.tmp.{}", Uuid::new_v4().simple()));

	{
		let file = File::create(&tmp_path)?;
		let mut out = BufWriter::new(file);
		write_header(&mut out, fp, array.dtype(), band_schema, sr)?;
		write_pixels(&mut out, array)?;
		out.flush()?;
		out.get_ref().sync_all()?;
	}
	rename(&tmp_path, path)?;
	Ok(())
}

/// Reads and validates the header only; used while indexing a cache dir.
#[context("reading cache tile header '{}'", path.display())]
pub fn read_tile_header(path: &Path) -> Result<TileHeader> {
	let mut input = BufReader::new(File::open(path)?);
	read_header_from(&mut input)
}

/// Reads a whole tile file back.
#[context("reading cache tile '{}'", path.display())]
pub fn read_tile(path: &Path) -> Result<(TileHeader, RasterArray)> {
	let mut input = BufReader::new(File::open(path)?);
	let header = read_header_from(&mut input)?;
	let array = read_pixels(&mut input, &header)?;
	Ok((header, array))
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;
	use rstest::rstest;

	fn tile_fp() -> Footprint {
		Footprint::north_up((10.0, -4.0), (0.5, 0.5), (6, 3)).unwrap()
	}

	fn gradient(dtype: RasterDtype, bands: usize) -> RasterArray {
		let mut flat = ndarray::Array3::<f64>::zeros((3, 6, bands));
		for ((r, c, b), v) in flat.indexed_iter_mut() {
			*v = (r * 100 + c * 10 + b) as f64;
		}
		RasterArray::from_f64(dtype, &flat)
	}

	#[rstest]
	#[case(RasterDtype::U8, 1)]
	#[case(RasterDtype::I16, 2)]
	#[case(RasterDtype::U32, 1)]
	#[case(RasterDtype::F32, 3)]
	#[case(RasterDtype::F64, 1)]
	#[case(RasterDtype::Bool, 1)]
	fn roundtrip_preserves_everything(#[case] dtype: RasterDtype, #[case] bands: usize) {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("tile.tif");
		let fp = tile_fp();
		let array = gradient(dtype, bands);

		write_tile_atomic(&path, &fp, &BandSchema::all_default(bands), Some("EPSG:32632"), &array).unwrap();
		let (header, back) = read_tile(&path).unwrap();
		assert_eq!(header.fp, fp);
		assert_eq!(header.dtype, dtype);
		assert_eq!(header.band_count, bands);
		assert_eq!(header.sr.as_deref(), Some("EPSG:32632"));
		assert_eq!(back, array);
	}

	#[test]
	fn no_temp_files_left_behind() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("tile.tif");
		write_tile_atomic(&path, &tile_fp(), &BandSchema::all_default(1), None, &gradient(RasterDtype::U8, 1)).unwrap();

		let names: Vec<String> = std::fs::read_dir(dir.path())
			.unwrap()
			.map(|e| e.unwrap().file_name().to_string_lossy().to_string())
			.collect();
		assert_eq!(names, vec!["tile.tif".to_string()]);
	}

	#[test]
	fn header_only_read_skips_pixels() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("tile.tif");
		write_tile_atomic(&path, &tile_fp(), &BandSchema::all_default(2), None, &gradient(RasterDtype::F64, 2)).unwrap();
		let header = read_tile_header(&path).unwrap();
		assert_eq!(header.fp, tile_fp());
		assert_eq!(header.band_count, 2);
		assert_eq!(header.sr, None);
	}

	#[test]
	fn garbage_files_are_rejected() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("junk.tif");
		std::fs::write(&path, b"not a tile at all").unwrap();
		assert!(read_tile_header(&path).is_err());
		assert!(read_tile(&path).is_err());
	}

	#[test]
	fn shape_mismatch_is_rejected_before_writing() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("tile.tif");
		let wrong = RasterArray::zeros(RasterDtype::U8, (2, 2, 1));
		assert!(write_tile_atomic(&path, &tile_fp(), &BandSchema::all_default(1), None, &wrong).is_err());
		assert!(!path.exists());
	}
}
