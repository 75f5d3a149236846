//! End-to-end tests of the cached recipe engine through the `DataSource`
//! facade.

use anyhow::Result;
use rasterloom::{
	DataSource, DataSourceConfig, ErrorKind, Footprint, RasterArray, RasterDtype, RasterSource, RecipeOptions,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn fp_4x4() -> Footprint {
	Footprint::north_up((0.0, 0.0), (1.0, 1.0), (4, 4)).unwrap()
}

fn ds() -> DataSource {
	let _ = env_logger::builder().is_test(true).try_init();
	DataSource::new(DataSourceConfig::default()).unwrap()
}

fn counting_fill(value: f64, dtype: RasterDtype) -> (
	impl Fn(&Footprint, &[rasterloom::PrimitiveArray]) -> Result<RasterArray> + Send + Sync + 'static,
	Arc<AtomicUsize>,
) {
	let calls = Arc::new(AtomicUsize::new(0));
	let counter = Arc::clone(&calls);
	let compute = move |fp: &Footprint, primitives: &[rasterloom::PrimitiveArray]| {
		assert!(primitives.is_empty());
		counter.fetch_add(1, Ordering::SeqCst);
		Ok(RasterArray::filled(
			dtype,
			(fp.ry() as usize, fp.rx() as usize, 1),
			value,
		))
	};
	(compute, calls)
}

fn tif_count(dir: &std::path::Path) -> usize {
	std::fs::read_dir(dir)
		.unwrap()
		.filter(|e| {
			e.as_ref()
				.unwrap()
				.file_name()
				.to_string_lossy()
				.ends_with(".tif")
		})
		.count()
}

/// Scenario 1: an identity recipe over a 4x4 footprint with 2x2 cache tiles.
#[tokio::test]
async fn identity_recipe_fills_and_persists_four_tiles() {
	let ds = ds();
	let cache = tempfile::tempdir().unwrap();
	let (compute, calls) = counting_fill(42.0, RasterDtype::U8);

	let recipe = ds
		.create_cached_raster_recipe(
			"answer",
			fp_4x4(),
			RasterDtype::U8,
			1,
			cache.path(),
			RecipeOptions::default().with_cache_tiles(2, 2),
			compute,
		)
		.await
		.unwrap();

	let out = recipe.get_data(None, None, None, None).await.unwrap();
	assert_eq!(out.shape(), (4, 4, 1));
	for r in 0..4 {
		for c in 0..4 {
			assert_eq!(out.get(r, c, 0), 42.0);
		}
	}
	assert_eq!(calls.load(Ordering::SeqCst), 4);
	assert_eq!(tif_count(cache.path()), 4);
	ds.close().await.unwrap();
}

/// Scenario 2: overlapping queries share cache tiles; each tile is computed
/// exactly once across both.
#[tokio::test]
async fn cache_hits_skip_recomputation() {
	let ds = ds();
	let cache = tempfile::tempdir().unwrap();
	let (compute, calls) = counting_fill(42.0, RasterDtype::U8);

	let recipe = ds
		.create_cached_raster_recipe(
			"answer",
			fp_4x4(),
			RasterDtype::U8,
			1,
			cache.path(),
			RecipeOptions::default().with_cache_tiles(2, 2),
			compute,
		)
		.await
		.unwrap();

	let corner = fp_4x4().sub_footprint(0, 0, 2, 2).unwrap();
	recipe.get_data(Some(&corner), None, None, None).await.unwrap();
	assert_eq!(calls.load(Ordering::SeqCst), 1);

	let full = recipe.get_data(None, None, None, None).await.unwrap();
	assert_eq!(full.get(3, 3, 0), 42.0);
	assert_eq!(calls.load(Ordering::SeqCst), 4);
	ds.close().await.unwrap();
}

/// The cache outlives the recipe: a second recipe with the same compute_id
/// reuses the files and never invokes compute_array.
#[tokio::test]
async fn cache_files_survive_recreation() {
	let cache = tempfile::tempdir().unwrap();
	{
		let ds = ds();
		let (compute, _) = counting_fill(42.0, RasterDtype::U8);
		let mut options = RecipeOptions::default().with_cache_tiles(2, 2);
		options.compute_id = Some("fill-42".to_string());
		let recipe = ds
			.create_cached_raster_recipe("answer", fp_4x4(), RasterDtype::U8, 1, cache.path(), options, compute)
			.await
			.unwrap();
		recipe.get_data(None, None, None, None).await.unwrap();
		ds.close().await.unwrap();
	}

	let ds = ds();
	let (compute, calls) = counting_fill(42.0, RasterDtype::U8);
	let mut options = RecipeOptions::default().with_cache_tiles(2, 2);
	options.compute_id = Some("fill-42".to_string());
	let recipe = ds
		.create_cached_raster_recipe("answer", fp_4x4(), RasterDtype::U8, 1, cache.path(), options, compute)
		.await
		.unwrap();
	let out = recipe.get_data(None, None, None, None).await.unwrap();
	assert_eq!(out.get(0, 0, 0), 42.0);
	assert_eq!(calls.load(Ordering::SeqCst), 0);
	ds.close().await.unwrap();
}

/// A different compute_id must not share cache files with the first recipe.
#[tokio::test]
async fn distinct_compute_ids_use_disjoint_caches() {
	let cache = tempfile::tempdir().unwrap();
	let ds = ds();

	let (compute_a, _) = counting_fill(1.0, RasterDtype::U8);
	let mut options = RecipeOptions::default().with_cache_tiles(2, 2);
	options.compute_id = Some("a".to_string());
	let a = ds
		.create_cached_raster_recipe("a", fp_4x4(), RasterDtype::U8, 1, cache.path(), options, compute_a)
		.await
		.unwrap();
	a.get_data(None, None, None, None).await.unwrap();

	let (compute_b, calls_b) = counting_fill(2.0, RasterDtype::U8);
	let mut options = RecipeOptions::default().with_cache_tiles(2, 2);
	options.compute_id = Some("b".to_string());
	let b = ds
		.create_cached_raster_recipe("b", fp_4x4(), RasterDtype::U8, 1, cache.path(), options, compute_b)
		.await
		.unwrap();
	let out = b.get_data(None, None, None, None).await.unwrap();
	assert_eq!(out.get(0, 0, 0), 2.0);
	assert_eq!(calls_b.load(Ordering::SeqCst), 4);
	assert_eq!(tif_count(cache.path()), 8);
	ds.close().await.unwrap();
}

/// Scenario 3: recipe B consumes recipe A as its primitive and adds one.
#[tokio::test]
async fn primitive_fan_in_adds_one() {
	let ds = ds();
	let cache_a = tempfile::tempdir().unwrap();
	let cache_b = tempfile::tempdir().unwrap();

	let (compute_a, _) = counting_fill(42.0, RasterDtype::U8);
	let a = ds
		.create_cached_raster_recipe(
			"a",
			fp_4x4(),
			RasterDtype::U8,
			1,
			cache_a.path(),
			RecipeOptions::default().with_cache_tiles(2, 2),
			compute_a,
		)
		.await
		.unwrap();

	let b = ds
		.create_cached_raster_recipe(
			"b",
			fp_4x4(),
			RasterDtype::U8,
			1,
			cache_b.path(),
			RecipeOptions::default()
				.with_cache_tiles(2, 2)
				.with_primitive("a", a as rasterloom::SharedRasterSource),
			|fp: &Footprint, primitives: &[rasterloom::PrimitiveArray]| {
				assert_eq!(primitives.len(), 1);
				assert_eq!(primitives[0].name, "a");
				assert_eq!(primitives[0].fp, *fp);
				Ok(RasterArray::from_f64(
					RasterDtype::U8,
					&(primitives[0].array.to_f64_array() + 1.0),
				))
			},
		)
		.await
		.unwrap();

	let out = b.get_data(None, None, None, None).await.unwrap();
	for r in 0..4 {
		for c in 0..4 {
			assert_eq!(out.get(r, c, 0), 43.0);
		}
	}
	ds.close().await.unwrap();
}

/// Scenario 4: a 5x5 window over a 10x10 recipe with 4x4 cache tiles only
/// produces the four intersecting tiles, and boundary pixels are correct.
#[tokio::test]
async fn partial_overlap_produces_only_touched_tiles() {
	let ds = ds();
	let cache = tempfile::tempdir().unwrap();
	let fp = Footprint::north_up((0.0, 0.0), (1.0, 1.0), (10, 10)).unwrap();

	let calls = Arc::new(AtomicUsize::new(0));
	let counter = Arc::clone(&calls);
	let raster_fp = fp;
	let recipe = ds
		.create_cached_raster_recipe(
			"gradient",
			fp,
			RasterDtype::U16,
			1,
			cache.path(),
			RecipeOptions::default().with_cache_tiles(4, 4),
			move |comp_fp: &Footprint, _primitives: &[rasterloom::PrimitiveArray]| {
				counter.fetch_add(1, Ordering::SeqCst);
				// value = global_row * 100 + global_col
				let (col0, row0) = raster_fp.offset_of(comp_fp)?;
				let mut data = ndarray::Array3::<f64>::zeros((comp_fp.ry() as usize, comp_fp.rx() as usize, 1));
				for r in 0..comp_fp.ry() as usize {
					for c in 0..comp_fp.rx() as usize {
						data[(r, c, 0)] = ((row0 as usize + r) * 100 + col0 as usize + c) as f64;
					}
				}
				Ok(RasterArray::from_f64(RasterDtype::U16, &data))
			},
		)
		.await
		.unwrap();

	let window = fp.sub_footprint(3, 3, 5, 5).unwrap();
	let out = recipe.get_data(Some(&window), None, None, None).await.unwrap();
	assert_eq!(out.shape(), (5, 5, 1));
	for r in 0..5 {
		for c in 0..5 {
			assert_eq!(out.get(r, c, 0), ((r + 3) * 100 + c + 3) as f64);
		}
	}
	// only the four tiles intersecting the window were produced
	assert_eq!(calls.load(Ordering::SeqCst), 4);
	assert_eq!(tif_count(cache.path()), 4);

	// the border tile is strictly smaller than interior tiles
	let full = recipe.get_data(None, None, None, None).await.unwrap();
	assert_eq!(full.get(9, 9, 0), 909.0);
	assert_eq!(tif_count(cache.path()), 9);
	ds.close().await.unwrap();
}

/// Queries beyond the recipe bounds are cropped; out-of-raster pixels carry
/// the requested nodata.
#[tokio::test]
async fn out_of_bounds_pixels_fill_with_dst_nodata() {
	let ds = ds();
	let cache = tempfile::tempdir().unwrap();
	let (compute, _) = counting_fill(42.0, RasterDtype::U8);

	let recipe = ds
		.create_cached_raster_recipe(
			"answer",
			fp_4x4(),
			RasterDtype::U8,
			1,
			cache.path(),
			RecipeOptions::default().with_cache_tiles(2, 2),
			compute,
		)
		.await
		.unwrap();

	// window hanging two pixels past the right edge
	let window = fp_4x4().sub_footprint(2, 0, 4, 2).unwrap();
	let out = recipe.get_data(Some(&window), None, Some(7.0), None).await.unwrap();
	assert_eq!(out.get(0, 0, 0), 42.0);
	assert_eq!(out.get(0, 1, 0), 42.0);
	assert_eq!(out.get(0, 2, 0), 7.0);
	assert_eq!(out.get(0, 3, 0), 7.0);
	ds.close().await.unwrap();
}

/// Scenario 5: cancelling one query does not disturb a second query on the
/// same tiles, and the tile is computed exactly once.
#[tokio::test]
async fn cancellation_keeps_production_single() {
	let ds = ds();
	let cache = tempfile::tempdir().unwrap();
	let calls = Arc::new(AtomicUsize::new(0));
	let counter = Arc::clone(&calls);

	let recipe = ds
		.create_cached_raster_recipe(
			"slow",
			fp_4x4(),
			RasterDtype::U8,
			1,
			cache.path(),
			RecipeOptions::default().with_cache_tiles(4, 4),
			move |fp: &Footprint, _primitives: &[rasterloom::PrimitiveArray]| {
				counter.fetch_add(1, Ordering::SeqCst);
				std::thread::sleep(Duration::from_millis(200));
				Ok(RasterArray::filled(
					RasterDtype::U8,
					(fp.ry() as usize, fp.rx() as usize, 1),
					5.0,
				))
			},
		)
		.await
		.unwrap();

	let q1 = {
		let recipe = Arc::clone(&recipe);
		tokio::spawn(async move { recipe.get_data(None, None, None, None).await })
	};
	tokio::time::sleep(Duration::from_millis(50)).await;
	q1.abort();
	assert!(q1.await.is_err());

	// the orphaned build runs to completion; the second query subscribes to
	// it instead of recomputing
	let out = recipe.get_data(None, None, None, None).await.unwrap();
	assert_eq!(out.get(0, 0, 0), 5.0);
	assert_eq!(calls.load(Ordering::SeqCst), 1);
	ds.close().await.unwrap();
}

/// A failing compute_array fails its queries with ProducerError, reverts the
/// tiles, and a later query succeeds.
#[tokio::test]
async fn producer_failures_revert_tiles() {
	let ds = ds();
	let cache = tempfile::tempdir().unwrap();
	let attempts = Arc::new(AtomicUsize::new(0));
	let counter = Arc::clone(&attempts);

	let recipe = ds
		.create_cached_raster_recipe(
			"flaky",
			fp_4x4(),
			RasterDtype::U8,
			1,
			cache.path(),
			RecipeOptions::default().with_cache_tiles(4, 4),
			move |fp: &Footprint, _primitives: &[rasterloom::PrimitiveArray]| {
				if counter.fetch_add(1, Ordering::SeqCst) == 0 {
					anyhow::bail!("simulated sensor dropout");
				}
				Ok(RasterArray::filled(
					RasterDtype::U8,
					(fp.ry() as usize, fp.rx() as usize, 1),
					1.0,
				))
			},
		)
		.await
		.unwrap();

	let err = recipe.get_data(None, None, None, None).await.unwrap_err();
	match ErrorKind::of(&err) {
		Some(ErrorKind::ProducerError(message)) => assert!(message.contains("simulated sensor dropout")),
		other => panic!("expected ProducerError, got {other:?}"),
	}

	// the tile reverted to missing; the retry succeeds
	let out = recipe.get_data(None, None, None, None).await.unwrap();
	assert_eq!(out.get(0, 0, 0), 1.0);
	assert_eq!(attempts.load(Ordering::SeqCst), 2);
	ds.close().await.unwrap();
}

/// Deterministic recipes produce byte-identical results on repeat queries.
#[tokio::test]
async fn repeated_queries_are_identical() {
	let ds = ds();
	let cache = tempfile::tempdir().unwrap();
	let (compute, _) = counting_fill(42.0, RasterDtype::U8);

	let recipe = ds
		.create_cached_raster_recipe(
			"answer",
			fp_4x4(),
			RasterDtype::U8,
			1,
			cache.path(),
			RecipeOptions::default().with_cache_tiles(2, 2),
			compute,
		)
		.await
		.unwrap();

	let first = recipe.get_data(None, None, None, None).await.unwrap();
	let second = recipe.get_data(None, None, None, None).await.unwrap();
	assert_eq!(first, second);
	ds.close().await.unwrap();
}

/// Concurrent overlapping queries coalesce: every tile is computed at most
/// once.
#[tokio::test]
async fn concurrent_queries_coalesce() {
	let ds = ds();
	let cache = tempfile::tempdir().unwrap();
	let calls = Arc::new(AtomicUsize::new(0));
	let counter = Arc::clone(&calls);

	let recipe = ds
		.create_cached_raster_recipe(
			"shared",
			fp_4x4(),
			RasterDtype::U8,
			1,
			cache.path(),
			RecipeOptions::default().with_cache_tiles(2, 2),
			move |fp: &Footprint, _primitives: &[rasterloom::PrimitiveArray]| {
				counter.fetch_add(1, Ordering::SeqCst);
				std::thread::sleep(Duration::from_millis(20));
				Ok(RasterArray::filled(
					RasterDtype::U8,
					(fp.ry() as usize, fp.rx() as usize, 1),
					3.0,
				))
			},
		)
		.await
		.unwrap();

	let queries: Vec<_> = (0..8)
		.map(|_| {
			let recipe = Arc::clone(&recipe);
			tokio::spawn(async move { recipe.get_data(None, None, None, None).await })
		})
		.collect();
	for q in queries {
		let out = q.await.unwrap().unwrap();
		assert_eq!(out.get(3, 3, 0), 3.0);
	}
	assert_eq!(calls.load(Ordering::SeqCst), 4);
	ds.close().await.unwrap();
}

/// The recipe streams its window chunked along cache tiles.
#[tokio::test]
async fn queue_data_streams_cache_aligned_chunks() {
	let ds = ds();
	let cache = tempfile::tempdir().unwrap();
	let (compute, _) = counting_fill(42.0, RasterDtype::U8);

	let recipe = ds
		.create_cached_raster_recipe(
			"answer",
			fp_4x4(),
			RasterDtype::U8,
			1,
			cache.path(),
			RecipeOptions::default().with_cache_tiles(2, 2),
			compute,
		)
		.await
		.unwrap();

	let fp = fp_4x4();
	let stream = recipe.queue_data(&fp, None, None, None, Some(2)).await.unwrap();
	let chunks = stream.collect_all().await.unwrap();
	assert_eq!(chunks.len(), 4);
	for (chunk_fp, array) in &chunks {
		assert_eq!(chunk_fp.shape(), (2, 2));
		assert_eq!(array.get(0, 0, 0), 42.0);
	}
	ds.close().await.unwrap();
}
