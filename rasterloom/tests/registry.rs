//! Registry lifecycle, source roundtrips and spatial-reference modes.

use geo::{Geometry, Point};
use rasterloom::{
	DataSource, DataSourceConfig, ErrorKind, Feature, Footprint, Interpolation, OpenMode, RasterArray, RasterDtype,
	RasterSource, VectorSource,
};
use std::sync::Arc;

fn fp_4x4() -> Footprint {
	Footprint::north_up((0.0, 0.0), (1.0, 1.0), (4, 4)).unwrap()
}

fn ds() -> DataSource {
	let _ = env_logger::builder().is_test(true).try_init();
	DataSource::new(DataSourceConfig::default()).unwrap()
}

fn gradient(dtype: RasterDtype) -> RasterArray {
	let mut data = ndarray::Array3::<f64>::zeros((4, 4, 1));
	for ((r, c, _), v) in data.indexed_iter_mut() {
		*v = (r * 4 + c) as f64;
	}
	RasterArray::from_f64(dtype, &data)
}

// ------------------------------ keys ------------------------------

#[test]
fn duplicate_and_empty_keys_are_rejected() {
	let ds = ds();
	ds.wrap_array_raster("dem", fp_4x4(), gradient(RasterDtype::U8), None, None, OpenMode::Write)
		.unwrap();

	let err = ds
		.wrap_array_raster("dem", fp_4x4(), gradient(RasterDtype::U8), None, None, OpenMode::Write)
		.unwrap_err();
	assert!(matches!(ErrorKind::of(&err), Some(ErrorKind::DuplicateKey(k)) if k == "dem"));

	let err = ds
		.wrap_array_raster("", fp_4x4(), gradient(RasterDtype::U8), None, None, OpenMode::Write)
		.unwrap_err();
	assert!(matches!(ErrorKind::of(&err), Some(ErrorKind::BadArgument(_))));
}

#[test]
fn lookup_and_containment() {
	let ds = ds();
	let dem = ds
		.wrap_array_raster("dem", fp_4x4(), gradient(RasterDtype::U8), None, None, OpenMode::Write)
		.unwrap();

	assert!(ds.contains_key("dem"));
	assert!(!ds.contains_key("ortho"));
	assert_eq!(ds.len(), 1);
	assert_eq!(ds.keys(), vec!["dem".to_string()]);

	let looked_up = ds.get_raster("dem").unwrap();
	assert!(ds.contains_raster(&looked_up));
	assert!(ds.contains_raster(&(dem as rasterloom::SharedRasterSource)));

	let err = ds.get_raster("ortho").unwrap_err();
	assert!(matches!(ErrorKind::of(&err), Some(ErrorKind::UnknownKey(_))));
	let err = ds.get_vector("dem").unwrap_err();
	assert!(matches!(ErrorKind::of(&err), Some(ErrorKind::BadArgument(_))));
}

#[tokio::test]
async fn anonymous_sources_join_the_close_cascade() {
	let ds = ds();
	let anon = ds
		.awrap_array_raster(fp_4x4(), gradient(RasterDtype::U8), None, None, OpenMode::Write)
		.unwrap();
	assert_eq!(ds.len(), 0);
	assert!(ds.contains_raster(&(anon as rasterloom::SharedRasterSource)));
	ds.close().await.unwrap();
}

// ------------------------------ close ------------------------------

#[tokio::test]
async fn close_succeeds_then_fails_with_closed() {
	let ds = ds();
	ds.close().await.unwrap();
	let err = ds.close().await.unwrap_err();
	assert!(matches!(ErrorKind::of(&err), Some(ErrorKind::Closed)));

	let err = ds
		.wrap_array_raster("dem", fp_4x4(), gradient(RasterDtype::U8), None, None, OpenMode::Write)
		.unwrap_err();
	assert!(matches!(ErrorKind::of(&err), Some(ErrorKind::Closed)));
	let err = ds.get_raster("dem").unwrap_err();
	assert!(matches!(ErrorKind::of(&err), Some(ErrorKind::Closed)));
}

// ------------------------------ raster roundtrips ------------------------------

#[tokio::test]
async fn file_raster_set_then_get_roundtrips() {
	let ds = ds();
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("dem.loomgrid");

	let dem = ds
		.create_raster(
			"dem",
			&path,
			fp_4x4(),
			RasterDtype::I16,
			1,
			None,
			"loomgrid",
			&[],
			None,
		)
		.await
		.unwrap();

	let array = gradient(RasterDtype::I16);
	dem.set_data(&fp_4x4(), &array, None, None).await.unwrap();
	let back = dem.get_data(None, None, None, None).await.unwrap();
	assert_eq!(back, array);

	// a window read slices the same data
	let window = fp_4x4().sub_footprint(1, 1, 2, 2).unwrap();
	let out = dem.get_data(Some(&window), None, None, None).await.unwrap();
	assert_eq!(out.get(0, 0, 0), 5.0);
	ds.close().await.unwrap();

	// the file persists after close and reopens read-only
	let ds2 = crate::ds();
	let reopened = ds2
		.open_raster("dem", &path, "loomgrid", &[], OpenMode::Read)
		.await
		.unwrap();
	let back = reopened.get_data(None, None, None, None).await.unwrap();
	assert_eq!(back, gradient(RasterDtype::I16));
	assert!(reopened.set_data(&fp_4x4(), &array, None, None).await.is_err());
	ds2.close().await.unwrap();
}

#[tokio::test]
async fn unknown_drivers_are_rejected() {
	let ds = ds();
	let err = ds
		.open_raster("dem", "/nowhere.tif".as_ref(), "GTiff", &[], OpenMode::Read)
		.await
		.unwrap_err();
	assert!(matches!(ErrorKind::of(&err), Some(ErrorKind::BadArgument(_))));
}

#[tokio::test]
async fn fill_and_delete_file_rasters() {
	let ds = ds();
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("scratch.loomgrid");

	let raster = ds
		.acreate_raster(&path, fp_4x4(), RasterDtype::U8, 1, None, "loomgrid", &[], None)
		.await
		.unwrap();
	raster.fill(9.0, None).await.unwrap();
	let out = raster.get_data(None, None, None, None).await.unwrap();
	assert_eq!(out.get(2, 2, 0), 9.0);

	raster.delete().await.unwrap();
	assert!(!path.exists());
	let err = raster.get_data(None, None, None, None).await.unwrap_err();
	assert!(matches!(ErrorKind::of(&err), Some(ErrorKind::Closed)));
	ds.close().await.unwrap();
}

// ------------------------------ interpolation gate ------------------------------

#[tokio::test]
async fn off_grid_kernels_need_allow_interpolation() {
	let strict = ds();
	strict
		.wrap_array_raster("dem", fp_4x4(), gradient(RasterDtype::F64), None, None, OpenMode::Write)
		.unwrap();
	let off = Footprint::north_up((0.5, 0.0), (1.0, 1.0), (2, 2)).unwrap();
	let dem = strict.get_raster("dem").unwrap();

	// nearest resampling never needs the flag, as the default or explicitly
	dem.get_data(Some(&off), None, None, None).await.unwrap();
	dem
		.get_data(Some(&off), None, None, Some(Interpolation::Nearest))
		.await
		.unwrap();

	let err = dem
		.get_data(Some(&off), None, None, Some(Interpolation::Bilinear))
		.await
		.unwrap_err();
	assert!(matches!(ErrorKind::of(&err), Some(ErrorKind::BadArgument(_))));

	let lenient = DataSource::new(DataSourceConfig::default().with_allow_interpolation(true)).unwrap();
	lenient
		.wrap_array_raster("dem", fp_4x4(), gradient(RasterDtype::F64), None, None, OpenMode::Write)
		.unwrap();
	lenient
		.get_raster("dem")
		.unwrap()
		.get_data(Some(&off), None, None, Some(Interpolation::Bilinear))
		.await
		.unwrap();
}

// ------------------------------ sr modes ------------------------------

#[test]
fn illegal_sr_combinations_fail_construction() {
	let config = DataSourceConfig {
		sr_fallback: Some("WGS84".to_string()),
		..DataSourceConfig::default()
	};
	let err = DataSource::new(config).unwrap_err();
	assert!(matches!(ErrorKind::of(&err), Some(ErrorKind::BadSrMode)));
}

#[test]
fn mode_two_requires_a_stored_sr() {
	let ds = DataSource::new(DataSourceConfig::default().with_sr_work("EPSG:32632")).unwrap();
	// a source without sr_stored cannot resolve its virtual frame
	let err = ds
		.wrap_array_raster("dem", fp_4x4(), gradient(RasterDtype::U8), None, None, OpenMode::Write)
		.unwrap_err();
	assert!(matches!(ErrorKind::of(&err), Some(ErrorKind::BadArgument(_))));

	// with a stored sr (and the identity converter) it registers fine
	ds.wrap_array_raster(
		"dem",
		fp_4x4(),
		gradient(RasterDtype::U8),
		None,
		Some("EPSG:32632".to_string()),
		OpenMode::Write,
	)
	.unwrap();
}

// ------------------------------ vectors ------------------------------

#[tokio::test]
async fn vector_create_insert_reopen() {
	let ds = ds();
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("sites.loomgrid");

	let sites = ds
		.create_vector("sites", &path, "loomgrid", &[], Some("WGS84"))
		.await
		.unwrap();
	let mut feature = Feature::new(Some(Geometry::Point(Point::new(8.0, 51.0))));
	feature.properties.insert("name".to_string(), "station".to_string());
	sites.insert_feature(&feature).await.unwrap();
	assert_eq!(sites.feature_count().await.unwrap(), 1);
	ds.close().await.unwrap();

	let ds2 = crate::ds();
	let reopened = ds2
		.open_vector("sites", &path, "loomgrid", &[], OpenMode::Read)
		.await
		.unwrap();
	assert_eq!(reopened.sr_stored(), Some("WGS84"));
	assert_eq!(reopened.get_features().await.unwrap(), vec![feature]);
	ds2.close().await.unwrap();
}

#[tokio::test]
async fn none_geometry_is_gated_by_config() {
	let strict = ds();
	let vector = strict.wrap_features("sites", vec![Feature::new(None)], None).unwrap();
	assert!(vector.get_feature(0).await.is_err());

	let lenient = DataSource::new(DataSourceConfig {
		allow_none_geometry: true,
		..DataSourceConfig::default()
	})
	.unwrap();
	let vector = lenient.wrap_features("sites", vec![Feature::new(None)], None).unwrap();
	assert!(vector.get_feature(0).await.is_ok());
}

// ------------------------------ user pools ------------------------------

#[tokio::test]
async fn user_pools_register_once() {
	let ds = ds();
	let pool = rasterloom::WorkerPool::new("render", 2).unwrap();
	ds.register_pool(Arc::clone(&pool)).unwrap();
	let err = ds.register_pool(pool).unwrap_err();
	assert!(matches!(ErrorKind::of(&err), Some(ErrorKind::DuplicateKey(_))));
}
