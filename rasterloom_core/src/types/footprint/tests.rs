use crate::{BoundaryEffect, ErrorKind, Footprint, Interpolation};
use anyhow::Result;
use approx::assert_abs_diff_eq;
use rstest::rstest;

fn fp(tl: (f64, f64), size: (u32, u32)) -> Footprint {
	Footprint::north_up(tl, (1.0, 1.0), size).unwrap()
}

// ------------------------------ construction ------------------------------

#[test]
fn construction_validates_size_and_vectors() {
	assert!(Footprint::north_up((0.0, 0.0), (1.0, 1.0), (0, 4)).is_err());
	assert!(Footprint::north_up((0.0, 0.0), (1.0, 1.0), (4, 0)).is_err());
	assert!(Footprint::north_up((0.0, 0.0), (0.0, 1.0), (4, 4)).is_err());
	assert!(Footprint::new((0.0, 0.0), (1.0, 0.0), (2.0, 0.0), (4, 4)).is_err()); // collinear
	assert!(Footprint::new((f64::NAN, 0.0), (1.0, 0.0), (0.0, -1.0), (4, 4)).is_err());
}

#[test]
fn north_up_points_down() {
	let a = fp((10.0, 20.0), (4, 3));
	assert_eq!(a.tl(), (10.0, 20.0));
	assert_eq!(a.ax(), (1.0, 0.0));
	assert_eq!(a.ay(), (0.0, -1.0));
	assert_eq!(a.shape(), (3, 4));
	assert_eq!(a.pixel_count(), 12);
	assert_eq!(a.pixel_area(), 1.0);
}

// ------------------------------ coordinate mapping ------------------------------

#[test]
fn spatial_raster_roundtrip() {
	let a = Footprint::new((3.0, 7.0), (0.5, 0.1), (0.2, -0.8), (16, 16)).unwrap();
	for (col, row) in [(0.0, 0.0), (3.0, 5.0), (15.5, 0.25)] {
		let pt = a.raster_to_spatial((col, row));
		let (c, r) = a.spatial_to_raster(pt);
		assert_abs_diff_eq!(c, col, epsilon = 1e-9);
		assert_abs_diff_eq!(r, row, epsilon = 1e-9);
	}
}

#[test]
fn grid_nodes_map_to_integers() {
	let a = fp((100.0, 50.0), (8, 8));
	let (c, r) = a.spatial_to_raster((103.0, 48.0));
	assert_eq!((c, r), (3.0, 2.0));
}

// ------------------------------ same_grid / offset ------------------------------

#[test]
fn same_grid_accepts_integer_shifts_only() {
	let a = fp((0.0, 0.0), (8, 8));
	assert!(a.same_grid(&fp((3.0, -2.0), (4, 4))));
	assert!(!a.same_grid(&fp((0.5, 0.0), (4, 4))));

	// differing pixel vectors
	let b = Footprint::north_up((0.0, 0.0), (2.0, 2.0), (4, 4)).unwrap();
	assert!(!a.same_grid(&b));
}

#[test]
fn sub_footprints_stay_on_grid() -> Result<()> {
	let a = Footprint::new((12.5, -3.25), (0.25, 0.0), (0.0, -0.25), (64, 64))?;
	let b = a.sub_footprint(17, 23, 8, 8)?;
	assert!(a.same_grid(&b));
	assert_eq!(a.offset_of(&b)?, (17, 23));
	// negative offsets (overhanging tiles) round-trip too
	let c = a.sub_footprint(-4, -2, 8, 8)?;
	assert_eq!(a.offset_of(&c)?, (-4, -2));
	Ok(())
}

// ------------------------------ share_area ------------------------------

#[test]
fn share_area_positive_overlap_only() {
	let a = fp((0.0, 0.0), (4, 4));
	assert!(a.share_area(&fp((2.0, -2.0), (4, 4))));
	// touching along an edge is not shared area
	assert!(!a.share_area(&fp((4.0, 0.0), (4, 4))));
	assert!(!a.share_area(&fp((10.0, 0.0), (2, 2))));
}

#[test]
fn share_area_works_across_grids() {
	let a = fp((0.0, 0.0), (4, 4));
	let rotated = Footprint::new((2.0, -2.0), (0.7, 0.7), (0.7, -0.7), (4, 4)).unwrap();
	assert!(a.share_area(&rotated));
}

// ------------------------------ intersection ------------------------------

#[test]
fn intersection_is_idempotent() -> Result<()> {
	let a = fp((0.0, 0.0), (8, 8));
	assert_eq!(a.intersection(&a)?, a);
	Ok(())
}

#[test]
fn intersection_clips_to_overlap() -> Result<()> {
	let a = fp((0.0, 0.0), (8, 8));
	let b = fp((5.0, -6.0), (8, 8));
	let i = a.intersection(&b)?;
	assert_eq!(a.offset_of(&i)?, (5, 6));
	assert_eq!(i.shape(), (2, 3));
	Ok(())
}

#[test]
fn intersection_failures_carry_kinds() {
	let a = fp((0.0, 0.0), (4, 4));
	let disjoint = fp((10.0, 0.0), (4, 4));
	let err = a.intersection(&disjoint).unwrap_err();
	assert!(matches!(ErrorKind::of(&err), Some(ErrorKind::NoOverlap)));

	let off_grid = fp((0.25, 0.0), (4, 4));
	let err = a.intersection(&off_grid).unwrap_err();
	assert!(matches!(ErrorKind::of(&err), Some(ErrorKind::BadArgument(_))));
}

// ------------------------------ slice_in ------------------------------

#[test]
fn slice_in_returns_row_col_ranges() -> Result<()> {
	let a = fp((0.0, 0.0), (8, 8));
	let b = a.sub_footprint(2, 3, 4, 2)?;
	let (rows, cols) = b.slice_in(&a)?;
	assert_eq!(rows, 3..5);
	assert_eq!(cols, 2..6);
	// not contained
	let c = a.sub_footprint(6, 6, 4, 4)?;
	assert!(c.slice_in(&a).is_err());
	Ok(())
}

// ------------------------------ tiling ------------------------------

#[test]
fn shrink_tiling_exact_covers_without_overlap() -> Result<()> {
	let a = fp((0.0, 0.0), (10, 10));
	let grid = a.tile((4, 4), (0, 0), BoundaryEffect::Shrink)?;
	assert_eq!((grid.len(), grid[0].len()), (3, 3));

	// pixel-exact cover, no overlap
	let mut covered = vec![vec![0u8; 10]; 10];
	for row in &grid {
		for tile in row {
			let (rows, cols) = tile.slice_in(&a)?;
			for r in rows {
				for c in cols.clone() {
					covered[r][c] += 1;
				}
			}
		}
	}
	assert!(covered.iter().flatten().all(|&n| n == 1));

	// border tiles shrink
	assert_eq!(grid[2][2].shape(), (2, 2));
	assert_eq!(grid[0][2].shape(), (4, 2));
	Ok(())
}

#[rstest]
#[case(BoundaryEffect::Exclude, 2, 2)]
#[case(BoundaryEffect::Overlap, 3, 3)]
fn boundary_effects_change_grid_shape(#[case] boundary: BoundaryEffect, #[case] rows: usize, #[case] cols: usize) {
	let a = fp((0.0, 0.0), (10, 10));
	let grid = a.tile((4, 4), (0, 0), boundary).unwrap();
	assert_eq!((grid.len(), grid[0].len()), (rows, cols));
	for row in &grid {
		for tile in row {
			if boundary == BoundaryEffect::Overlap {
				assert_eq!(tile.shape(), (4, 4));
			}
		}
	}
}

#[test]
fn exception_tiling_requires_exact_division() {
	let a = fp((0.0, 0.0), (10, 10));
	assert!(a.tile((4, 4), (0, 0), BoundaryEffect::Exception).is_err());
	assert!(a.tile((5, 5), (0, 0), BoundaryEffect::Exception).is_ok());
}

// ------------------------------ sampling footprints ------------------------------

#[test]
fn sampling_same_grid_is_the_intersection() -> Result<()> {
	let src = fp((0.0, 0.0), (8, 8));
	let dst = fp((5.0, -6.0), (8, 8));
	let s = src.build_sampling_footprint(&dst, Interpolation::Nearest)?.unwrap();
	assert_eq!(s, src.intersection(&dst)?);
	Ok(())
}

#[test]
fn sampling_disjoint_returns_none() -> Result<()> {
	let src = fp((0.0, 0.0), (8, 8));
	let dst = fp((100.0, 0.0), (4, 4));
	assert!(src.build_sampling_footprint(&dst, Interpolation::Bilinear)?.is_none());
	Ok(())
}

#[test]
fn sampling_window_grows_with_kernel() -> Result<()> {
	let src = fp((0.0, 0.0), (64, 64));
	// destination at half resolution over the middle of the source
	let dst = Footprint::north_up((16.0, -16.0), (2.0, 2.0), (8, 8))?;

	let near = src.build_sampling_footprint(&dst, Interpolation::Nearest)?.unwrap();
	let cubic = src.build_sampling_footprint(&dst, Interpolation::Cubic)?.unwrap();
	assert!(near.pixel_count() < cubic.pixel_count());
	assert!(src.contains_same_grid(&near));
	assert!(src.contains_same_grid(&cubic));
	Ok(())
}

#[test]
fn sampling_clips_to_source_bounds() -> Result<()> {
	let src = fp((0.0, 0.0), (8, 8));
	// destination half outside the source
	let dst = fp((-4.0, 0.0), (8, 8));
	let s = src.build_sampling_footprint(&dst, Interpolation::Nearest)?.unwrap();
	assert!(src.contains_same_grid(&s));
	assert_eq!(src.offset_of(&s)?, (0, 0));
	Ok(())
}
