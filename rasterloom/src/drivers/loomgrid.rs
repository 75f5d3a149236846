//! The built-in `loomgrid` driver.
//!
//! Loomgrid is the workspace's own single-file format family: rasters use
//! the same self-describing codec as cache tiles, vectors a length-prefixed
//! binary feature list. Datasets are loaded whole on activation and
//! rewritten atomically on flush, which fits the bounded,
//! driver-per-lease access pattern of the activation pool.
//!
//! All failures surface as [`ErrorKind::DriverError`] carrying this
//! driver's message verbatim.

use crate::drivers::{DriverFactory, RasterCreation};
use anyhow::{Result, bail};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use geo::{Geometry, LineString, Point, Polygon};
use rasterloom_core::{ErrorKind, RasterArray};
use rasterloom_recipe::{read_tile, write_tile_atomic};
use rasterloom_source::{
	DriverAllocator, DriverObject, Feature, OpenMode, RasterDriver, RasterDriverInfo, VectorDriver,
};
use std::collections::BTreeMap;
use std::fs::{File, rename};
use std::io::{BufReader, BufWriter, Read, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The built-in driver name.
pub const LOOMGRID: &str = "loomgrid";

fn driver_err(message: String) -> anyhow::Error {
	ErrorKind::DriverError(message).into()
}

// ---------------------------------------------------------------------------
// Raster driver
// ---------------------------------------------------------------------------

struct LoomgridRaster {
	path: PathBuf,
	mode: OpenMode,
	info: RasterDriverInfo,
	data: RasterArray,
}

impl LoomgridRaster {
	fn open(path: &Path, mode: OpenMode) -> Result<LoomgridRaster> {
		let (header, data) =
			read_tile(path).map_err(|err| driver_err(format!("loomgrid: cannot open '{}': {err:#}", path.display())))?;
		Ok(LoomgridRaster {
			path: path.to_path_buf(),
			mode,
			info: RasterDriverInfo {
				footprint: header.fp,
				dtype: header.dtype,
				band_count: header.band_count,
				band_schema: header.band_schema,
				sr_stored: header.sr,
			},
			data,
		})
	}

	fn check_writable(&self) -> Result<()> {
		if self.mode.writable() {
			Ok(())
		} else {
			Err(driver_err(format!(
				"loomgrid: '{}' was opened read-only",
				self.path.display()
			)))
		}
	}
}

impl RasterDriver for LoomgridRaster {
	fn info(&self) -> &RasterDriverInfo {
		&self.info
	}

	fn read_window(&mut self, window: (Range<usize>, Range<usize>), bands: &[usize]) -> Result<RasterArray> {
		self
			.data
			.slice_window(window.0, window.1)?
			.select_bands(bands)
			.map_err(|err| driver_err(format!("loomgrid: bad band selection on '{}': {err:#}", self.path.display())))
	}

	fn write_window(&mut self, origin: (usize, usize), bands: &[usize], data: &RasterArray) -> Result<()> {
		self.check_writable()?;
		self.data.copy_bands_from(data, origin.0, origin.1, bands)
	}

	fn fill(&mut self, value: f64, bands: &[usize]) -> Result<()> {
		self.check_writable()?;
		self.data.fill_value(value, bands)
	}

	fn flush(&mut self) -> Result<()> {
		if self.mode.writable() {
			write_tile_atomic(
				&self.path,
				&self.info.footprint,
				&self.info.band_schema,
				self.info.sr_stored.as_deref(),
				&self.data,
			)?;
		}
		Ok(())
	}

	fn delete(&mut self) -> Result<()> {
		std::fs::remove_file(&self.path)
			.map_err(|err| driver_err(format!("loomgrid: cannot delete '{}': {err}", self.path.display())))
	}
}

// ---------------------------------------------------------------------------
// Vector driver
// ---------------------------------------------------------------------------

const VECTOR_MAGIC: &[u8; 4] = b"RLVF";
const VECTOR_VERSION: u8 = 1;

fn write_coords(out: &mut impl Write, line: &LineString<f64>) -> Result<()> {
	out.write_u32::<LittleEndian>(line.0.len() as u32)?;
	for c in line.coords() {
		out.write_f64::<LittleEndian>(c.x)?;
		out.write_f64::<LittleEndian>(c.y)?;
	}
	Ok(())
}

fn read_coords(input: &mut impl Read) -> Result<LineString<f64>> {
	let count = input.read_u32::<LittleEndian>()? as usize;
	let mut coords = Vec::with_capacity(count);
	for _ in 0..count {
		let x = input.read_f64::<LittleEndian>()?;
		let y = input.read_f64::<LittleEndian>()?;
		coords.push((x, y));
	}
	Ok(LineString::from(coords))
}

fn write_geometry(out: &mut impl Write, geometry: &Geometry<f64>) -> Result<()> {
	match geometry {
		Geometry::Point(p) => {
			out.write_u8(1)?;
			out.write_f64::<LittleEndian>(p.x())?;
			out.write_f64::<LittleEndian>(p.y())?;
		}
		Geometry::LineString(line) => {
			out.write_u8(2)?;
			write_coords(out, line)?;
		}
		Geometry::Polygon(polygon) => {
			out.write_u8(3)?;
			write_coords(out, polygon.exterior())?;
			out.write_u32::<LittleEndian>(polygon.interiors().len() as u32)?;
			for ring in polygon.interiors() {
				write_coords(out, ring)?;
			}
		}
		Geometry::MultiPoint(points) => {
			out.write_u8(4)?;
			out.write_u32::<LittleEndian>(points.0.len() as u32)?;
			for p in &points.0 {
				out.write_f64::<LittleEndian>(p.x())?;
				out.write_f64::<LittleEndian>(p.y())?;
			}
		}
		Geometry::MultiLineString(lines) => {
			out.write_u8(5)?;
			out.write_u32::<LittleEndian>(lines.0.len() as u32)?;
			for line in &lines.0 {
				write_coords(out, line)?;
			}
		}
		Geometry::MultiPolygon(polygons) => {
			out.write_u8(6)?;
			out.write_u32::<LittleEndian>(polygons.0.len() as u32)?;
			for polygon in &polygons.0 {
				write_coords(out, polygon.exterior())?;
				out.write_u32::<LittleEndian>(polygon.interiors().len() as u32)?;
				for ring in polygon.interiors() {
					write_coords(out, ring)?;
				}
			}
		}
		Geometry::GeometryCollection(collection) => {
			out.write_u8(7)?;
			out.write_u32::<LittleEndian>(collection.0.len() as u32)?;
			for g in &collection.0 {
				write_geometry(out, g)?;
			}
		}
		other => bail!(driver_err(format!(
			"loomgrid: unsupported geometry type {other:?}"
		))),
	}
	Ok(())
}

fn read_polygon(input: &mut impl Read) -> Result<Polygon<f64>> {
	let exterior = read_coords(input)?;
	let ring_count = input.read_u32::<LittleEndian>()? as usize;
	let mut interiors = Vec::with_capacity(ring_count);
	for _ in 0..ring_count {
		interiors.push(read_coords(input)?);
	}
	Ok(Polygon::new(exterior, interiors))
}

fn read_geometry(input: &mut impl Read) -> Result<Geometry<f64>> {
	Ok(match input.read_u8()? {
		1 => {
			let x = input.read_f64::<LittleEndian>()?;
			let y = input.read_f64::<LittleEndian>()?;
			Geometry::Point(Point::new(x, y))
		}
		2 => Geometry::LineString(read_coords(input)?),
		3 => Geometry::Polygon(read_polygon(input)?),
		4 => {
			let count = input.read_u32::<LittleEndian>()? as usize;
			let mut points = Vec::with_capacity(count);
			for _ in 0..count {
				let x = input.read_f64::<LittleEndian>()?;
				let y = input.read_f64::<LittleEndian>()?;
				points.push(Point::new(x, y));
			}
			Geometry::MultiPoint(geo::MultiPoint(points))
		}
		5 => {
			let count = input.read_u32::<LittleEndian>()? as usize;
			let mut lines = Vec::with_capacity(count);
			for _ in 0..count {
				lines.push(read_coords(input)?);
			}
			Geometry::MultiLineString(geo::MultiLineString(lines))
		}
		6 => {
			let count = input.read_u32::<LittleEndian>()? as usize;
			let mut polygons = Vec::with_capacity(count);
			for _ in 0..count {
				polygons.push(read_polygon(input)?);
			}
			Geometry::MultiPolygon(geo::MultiPolygon(polygons))
		}
		7 => {
			let count = input.read_u32::<LittleEndian>()? as usize;
			let mut geometries = Vec::with_capacity(count);
			for _ in 0..count {
				geometries.push(read_geometry(input)?);
			}
			Geometry::GeometryCollection(geo::GeometryCollection(geometries))
		}
		tag => bail!(driver_err(format!("loomgrid: unknown geometry tag {tag}"))),
	})
}

fn write_string(out: &mut impl Write, s: &str) -> Result<()> {
	out.write_u32::<LittleEndian>(s.len() as u32)?;
	out.write_all(s.as_bytes())?;
	Ok(())
}

fn read_string(input: &mut impl Read) -> Result<String> {
	let len = input.read_u32::<LittleEndian>()? as usize;
	let mut buf = vec![0u8; len];
	input.read_exact(&mut buf)?;
	Ok(String::from_utf8(buf)?)
}

struct LoomgridVector {
	path: PathBuf,
	mode: OpenMode,
	sr: Option<String>,
	features: Vec<Feature>,
}

impl LoomgridVector {
	fn open(path: &Path, mode: OpenMode) -> Result<LoomgridVector> {
		Self::read_file(path, mode)
			.map_err(|err| driver_err(format!("loomgrid: cannot open '{}': {err:#}", path.display())))
	}

	fn read_file(path: &Path, mode: OpenMode) -> Result<LoomgridVector> {
		let mut input = BufReader::new(File::open(path)?);
		let mut magic = [0u8; 4];
		input.read_exact(&mut magic)?;
		anyhow::ensure!(&magic == VECTOR_MAGIC, "not a loomgrid vector file");
		let version = input.read_u8()?;
		anyhow::ensure!(version == VECTOR_VERSION, "unsupported vector file version {version}");

		let sr = match read_string(&mut input)? {
			s if s.is_empty() => None,
			s => Some(s),
		};
		let count = input.read_u32::<LittleEndian>()? as usize;
		let mut features = Vec::with_capacity(count);
		for _ in 0..count {
			let geometry = match input.read_u8()? {
				0 => None,
				_ => Some(read_geometry(&mut input)?),
			};
			let prop_count = input.read_u16::<LittleEndian>()? as usize;
			let mut properties = BTreeMap::new();
			for _ in 0..prop_count {
				let key = read_string(&mut input)?;
				let value = read_string(&mut input)?;
				properties.insert(key, value);
			}
			features.push(Feature { geometry, properties });
		}
		Ok(LoomgridVector {
			path: path.to_path_buf(),
			mode,
			sr,
			features,
		})
	}

	fn write_file(path: &Path, sr: Option<&str>, features: &[Feature]) -> Result<()> {
		let file_name = path
			.file_name()
			.and_then(|n| n.to_str())
			.ok_or_else(|| driver_err(format!("loomgrid: bad vector path '{}'", path.display())))?;
		let tmp_path = path.with_file_name(format!("{file_name}.tmp.{}", uuid::Uuid::new_v4().simple()));
		{
			let file = File::create(&tmp_path)?;
			let mut out = BufWriter::new(file);
			out.write_all(VECTOR_MAGIC)?;
			out.write_u8(VECTOR_VERSION)?;
			write_string(&mut out, sr.unwrap_or(""))?;
			out.write_u32::<LittleEndian>(features.len() as u32)?;
			for feature in features {
				match &feature.geometry {
					Some(geometry) => {
						out.write_u8(1)?;
						write_geometry(&mut out, geometry)?;
					}
					None => out.write_u8(0)?,
				}
				out.write_u16::<LittleEndian>(feature.properties.len() as u16)?;
				for (key, value) in &feature.properties {
					write_string(&mut out, key)?;
					write_string(&mut out, value)?;
				}
			}
			out.flush()?;
			out.get_ref().sync_all()?;
		}
		rename(&tmp_path, path)?;
		Ok(())
	}
}

impl VectorDriver for LoomgridVector {
	fn len(&self) -> usize {
		self.features.len()
	}

	fn sr_stored(&self) -> Option<String> {
		self.sr.clone()
	}

	fn read_feature(&mut self, index: usize) -> Result<Feature> {
		self
			.features
			.get(index)
			.cloned()
			.ok_or_else(|| driver_err(format!("loomgrid: feature index {index} out of range")))
	}

	fn insert_feature(&mut self, feature: &Feature) -> Result<()> {
		if !self.mode.writable() {
			bail!(driver_err(format!(
				"loomgrid: '{}' was opened read-only",
				self.path.display()
			)));
		}
		self.features.push(feature.clone());
		Ok(())
	}

	fn flush(&mut self) -> Result<()> {
		if self.mode.writable() {
			Self::write_file(&self.path, self.sr.as_deref(), &self.features)
				.map_err(|err| driver_err(format!("loomgrid: cannot write '{}': {err:#}", self.path.display())))?;
		}
		Ok(())
	}

	fn delete(&mut self) -> Result<()> {
		std::fs::remove_file(&self.path)
			.map_err(|err| driver_err(format!("loomgrid: cannot delete '{}': {err}", self.path.display())))
	}
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Factory of the built-in `loomgrid` driver.
pub struct LoomgridDriver;

impl DriverFactory for LoomgridDriver {
	fn name(&self) -> &str {
		LOOMGRID
	}

	fn open_raster(&self, path: &Path, _options: &[String], mode: OpenMode) -> Result<DriverAllocator> {
		let path = path.to_path_buf();
		Ok(Arc::new(move || {
			Ok(DriverObject::Raster(Box::new(LoomgridRaster::open(&path, mode)?)))
		}))
	}

	fn create_raster(&self, creation: &RasterCreation) -> Result<DriverAllocator> {
		creation.band_schema.validate(creation.band_count)?;
		let fill = creation.band_schema.shared_nodata().unwrap_or(0.0);
		let array = RasterArray::filled(
			creation.dtype,
			(
				creation.fp.ry() as usize,
				creation.fp.rx() as usize,
				creation.band_count,
			),
			fill,
		);
		write_tile_atomic(creation.path, &creation.fp, &creation.band_schema, creation.sr, &array)
			.map_err(|err| driver_err(format!("loomgrid: cannot create '{}': {err:#}", creation.path.display())))?;
		self.open_raster(creation.path, creation.options, OpenMode::Write)
	}

	fn open_vector(&self, path: &Path, _options: &[String], mode: OpenMode) -> Result<DriverAllocator> {
		let path = path.to_path_buf();
		Ok(Arc::new(move || {
			Ok(DriverObject::Vector(Box::new(LoomgridVector::open(&path, mode)?)))
		}))
	}

	fn create_vector(&self, path: &Path, sr: Option<&str>, options: &[String]) -> Result<DriverAllocator> {
		LoomgridVector::write_file(path, sr, &[])
			.map_err(|err| driver_err(format!("loomgrid: cannot create '{}': {err:#}", path.display())))?;
		self.open_vector(path, options, OpenMode::Write)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rasterloom_core::{BandFields, BandSchema, Footprint, RasterDtype};

	fn creation_fp() -> Footprint {
		Footprint::north_up((0.0, 0.0), (1.0, 1.0), (4, 4)).unwrap()
	}

	#[test]
	fn created_rasters_reopen_with_their_metadata() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("r.loomgrid");
		let schema = BandSchema::broadcast(BandFields::with_nodata(-1.0), 2);

		let allocator = LoomgridDriver
			.create_raster(&RasterCreation {
				path: &path,
				fp: creation_fp(),
				dtype: RasterDtype::I16,
				band_count: 2,
				band_schema: schema.clone(),
				sr: Some("EPSG:32632"),
				options: &[],
			})
			.unwrap();

		let mut driver = allocator().unwrap();
		let raster = driver.as_raster().unwrap();
		assert_eq!(raster.info().dtype, RasterDtype::I16);
		assert_eq!(raster.info().band_schema, schema);
		assert_eq!(raster.info().sr_stored.as_deref(), Some("EPSG:32632"));
		// new datasets are filled with the schema nodata
		let data = raster.read_window((0..4, 0..4), &[0, 1]).unwrap();
		assert_eq!(data.get(0, 0, 0), -1.0);
	}

	#[test]
	fn raster_write_read_cycle_through_reopen() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("r.loomgrid");
		let allocator = LoomgridDriver
			.create_raster(&RasterCreation {
				path: &path,
				fp: creation_fp(),
				dtype: RasterDtype::U8,
				band_count: 1,
				band_schema: BandSchema::all_default(1),
				sr: None,
				options: &[],
			})
			.unwrap();

		{
			let mut driver = allocator().unwrap();
			let raster = driver.as_raster().unwrap();
			let patch = RasterArray::filled(RasterDtype::U8, (2, 2, 1), 9.0);
			raster.write_window((1, 1), &[0], &patch).unwrap();
			raster.flush().unwrap();
		}
		// a fresh driver object sees the flushed pixels
		let mut driver = allocator().unwrap();
		let raster = driver.as_raster().unwrap();
		let data = raster.read_window((0..4, 0..4), &[0]).unwrap();
		assert_eq!(data.get(1, 1, 0), 9.0);
		assert_eq!(data.get(0, 0, 0), 0.0);
	}

	#[test]
	fn read_only_rasters_reject_writes() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("r.loomgrid");
		LoomgridDriver
			.create_raster(&RasterCreation {
				path: &path,
				fp: creation_fp(),
				dtype: RasterDtype::U8,
				band_count: 1,
				band_schema: BandSchema::all_default(1),
				sr: None,
				options: &[],
			})
			.unwrap();

		let allocator = LoomgridDriver.open_raster(&path, &[], OpenMode::Read).unwrap();
		let mut driver = allocator().unwrap();
		let raster = driver.as_raster().unwrap();
		let err = raster.fill(1.0, &[0]).unwrap_err();
		assert!(matches!(ErrorKind::of(&err), Some(ErrorKind::DriverError(_))));
	}

	#[test]
	fn vector_features_roundtrip() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("v.loomgrid");
		let allocator = LoomgridDriver.create_vector(&path, Some("WGS84"), &[]).unwrap();

		let mut feature = Feature::new(Some(Geometry::Point(Point::new(1.5, -2.5))));
		feature.properties.insert("name".to_string(), "summit".to_string());
		let polygon = Feature::new(Some(Geometry::Polygon(Polygon::new(
			LineString::from(vec![(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 0.0)]),
			vec![],
		))));

		{
			let mut driver = allocator().unwrap();
			let vector = driver.as_vector().unwrap();
			vector.insert_feature(&feature).unwrap();
			vector.insert_feature(&polygon).unwrap();
			vector.flush().unwrap();
		}
		let mut driver = allocator().unwrap();
		let vector = driver.as_vector().unwrap();
		assert_eq!(vector.len(), 2);
		assert_eq!(vector.sr_stored().as_deref(), Some("WGS84"));
		assert_eq!(vector.read_feature(0).unwrap(), feature);
		assert_eq!(vector.read_feature(1).unwrap(), polygon);
		assert!(vector.read_feature(2).is_err());
	}

	#[test]
	fn missing_files_report_driver_errors() {
		let dir = tempfile::tempdir().unwrap();
		let allocator = LoomgridDriver
			.open_raster(&dir.path().join("absent.loomgrid"), &[], OpenMode::Read)
			.unwrap();
		let err = allocator().unwrap_err();
		assert!(matches!(ErrorKind::of(&err), Some(ErrorKind::DriverError(_))));
	}
}
